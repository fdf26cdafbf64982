//! Request-log contract
//!
//! The surrounding proxy writes one record per completed call; the engine
//! only reads them back as reflection exemplars and bootstrap material.

use async_trait::async_trait;

use super::storage::StorageResult;
use crate::types::RequestRecord;

/// Query over the request log.
#[derive(Debug, Clone)]
pub struct LogQuery {
    /// Skill whose records to fetch
    pub skill_id: String,
    /// Restrict to one partition
    pub partition_id: Option<String>,
    /// Only records that carry a request embedding
    pub embedding_not_null: bool,
    /// Maximum records to return
    pub limit: usize,
}

impl LogQuery {
    /// All records of a skill, newest first, up to `limit`.
    pub fn skill(skill_id: impl Into<String>, limit: usize) -> Self {
        Self {
            skill_id: skill_id.into(),
            partition_id: None,
            embedding_not_null: false,
            limit,
        }
    }

    /// Restrict to one partition.
    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    /// Only records with a non-null embedding.
    pub fn embedded_only(mut self) -> Self {
        self.embedding_not_null = true;
        self
    }
}

/// Read-only connector to the proxy's request log.
#[async_trait]
pub trait LogConnector: Send + Sync + 'static {
    /// Fetch records matching the query, newest first.
    async fn get_logs(&self, query: LogQuery) -> StorageResult<Vec<RequestRecord>>;

    /// Count records matching the query (the limit caps the count).
    async fn count_logs(&self, query: LogQuery) -> StorageResult<usize>;
}
