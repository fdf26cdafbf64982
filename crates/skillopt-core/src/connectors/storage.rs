//! Relational storage contract
//!
//! The engine persists nothing itself; skills, partitions, arms, and
//! evaluations live behind this connector. Every operation is atomic at the
//! row level — the lock discipline and stats accounting depend on it.

use async_trait::async_trait;

use crate::types::{
    Arm, ArmPatch, ArmStats, Evaluation, EvaluationPatch, Partition, PartitionPatch, Skill,
    SkillPatch,
};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter for arm queries: by owning skill or by owning partition.
#[derive(Debug, Clone, Default)]
pub struct ArmFilter {
    /// Match arms belonging to this skill
    pub skill_id: Option<String>,
    /// Match arms belonging to this partition
    pub partition_id: Option<String>,
}

impl ArmFilter {
    /// All arms of a skill, across partitions.
    pub fn skill(id: impl Into<String>) -> Self {
        Self {
            skill_id: Some(id.into()),
            partition_id: None,
        }
    }

    /// All arms of one partition.
    pub fn partition(id: impl Into<String>) -> Self {
        Self {
            skill_id: None,
            partition_id: Some(id.into()),
        }
    }

    /// Whether the given arm matches this filter.
    pub fn matches(&self, arm: &Arm) -> bool {
        if let Some(skill_id) = &self.skill_id {
            if &arm.skill_id != skill_id {
                return false;
            }
        }
        if let Some(partition_id) = &self.partition_id {
            if &arm.partition_id != partition_id {
                return false;
            }
        }
        true
    }
}

/// Relational storage connector.
///
/// Implementations must be thread-safe; each operation must apply atomically
/// at the row level. List operations return rows in insertion order — the
/// bandit's tie-breaking relies on it.
#[async_trait]
pub trait StorageConnector: Send + Sync + 'static {
    /// Fetch a skill by id.
    async fn get_skill(&self, id: &str) -> StorageResult<Option<Skill>>;

    /// Apply a partial update to a skill row and return the updated row.
    ///
    /// The whole patch (including lock fields and the regeneration flag)
    /// must land in a single atomic write.
    async fn update_skill(&self, id: &str, patch: SkillPatch) -> StorageResult<Skill>;

    /// Fetch all partitions of a skill, ordered by partition index.
    async fn get_partitions(&self, skill_id: &str) -> StorageResult<Vec<Partition>>;

    /// Insert a batch of partitions.
    async fn create_partitions(&self, partitions: Vec<Partition>) -> StorageResult<()>;

    /// Apply a partial update to a partition row and return the updated row.
    async fn update_partition(&self, id: &str, patch: PartitionPatch) -> StorageResult<Partition>;

    /// Delete a partition row.
    async fn delete_partition(&self, id: &str) -> StorageResult<()>;

    /// Fetch arms matching the filter, in insertion order.
    async fn get_arms(&self, filter: ArmFilter) -> StorageResult<Vec<Arm>>;

    /// Insert a batch of arms.
    async fn create_arms(&self, arms: Vec<Arm>) -> StorageResult<()>;

    /// Apply a partial update to an arm row (parameters and/or stats),
    /// preserving its id. Used by in-place resets.
    async fn update_arm(&self, id: &str, patch: ArmPatch) -> StorageResult<Arm>;

    /// Overwrite an arm's statistics in one row write.
    async fn update_arm_stats(&self, id: &str, stats: ArmStats) -> StorageResult<Arm>;

    /// Delete every arm of a partition; returns the number deleted.
    async fn delete_arms_for_partition(&self, partition_id: &str) -> StorageResult<usize>;

    /// Delete every arm of a skill; returns the number deleted.
    async fn delete_arms_for_skill(&self, skill_id: &str) -> StorageResult<usize>;

    /// Fetch the evaluations attached to a skill, in insertion order.
    async fn get_evaluations(&self, skill_id: &str) -> StorageResult<Vec<Evaluation>>;

    /// Insert a batch of evaluations.
    async fn create_evaluations(&self, evaluations: Vec<Evaluation>) -> StorageResult<()>;

    /// Apply a partial update to an evaluation row.
    async fn update_evaluation(
        &self,
        id: &str,
        patch: EvaluationPatch,
    ) -> StorageResult<Evaluation>;

    /// Delete every evaluation of a skill; returns the number deleted.
    async fn delete_evaluations_for_skill(&self, skill_id: &str) -> StorageResult<usize>;
}
