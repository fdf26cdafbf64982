//! In-memory connector implementations
//!
//! The default backends for development and tests. Rows live in `RwLock`ed
//! collections; every trait operation takes the write lock once, which gives
//! the row-level atomicity the contract asks for. Insertion order is
//! preserved so bandit tie-breaking behaves like a serial column would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::logs::{LogConnector, LogQuery};
use super::storage::{ArmFilter, StorageConnector, StorageError, StorageResult};
use crate::types::{
    Arm, ArmPatch, ArmStats, Evaluation, EvaluationPatch, Partition, PartitionPatch,
    RequestRecord, Skill, SkillPatch,
};

/// In-memory relational storage.
///
/// All data is lost on process restart; suitable for tests, development,
/// and as the reference semantics for real backends.
#[derive(Default)]
pub struct InMemoryStorage {
    skills: RwLock<Vec<Skill>>,
    partitions: RwLock<Vec<Partition>>,
    arms: RwLock<Vec<Arm>>,
    evaluations: RwLock<Vec<Evaluation>>,
    offline: AtomicBool,
}

impl InMemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend becoming unreachable; every subsequent
    /// operation fails with a connection error until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("storage offline".to_string()));
        }
        Ok(())
    }

    /// Insert a skill row. Skill creation is owned by the surrounding CRUD
    /// layer, so it lives off-trait.
    pub fn insert_skill(&self, skill: Skill) {
        self.skills.write().unwrap().push(skill);
    }

    /// Number of arm rows currently stored, across all skills.
    pub fn arm_count(&self) -> usize {
        self.arms.read().unwrap().len()
    }
}

#[async_trait]
impl StorageConnector for InMemoryStorage {
    async fn get_skill(&self, id: &str) -> StorageResult<Option<Skill>> {
        self.check_online()?;
        let skills = self.skills.read().unwrap();
        Ok(skills.iter().find(|s| s.id == id).cloned())
    }

    async fn update_skill(&self, id: &str, patch: SkillPatch) -> StorageResult<Skill> {
        self.check_online()?;
        let mut skills = self.skills.write().unwrap();
        let skill = skills
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("skill {id}")))?;
        patch.apply(skill);
        Ok(skill.clone())
    }

    async fn get_partitions(&self, skill_id: &str) -> StorageResult<Vec<Partition>> {
        self.check_online()?;
        let partitions = self.partitions.read().unwrap();
        let mut rows: Vec<Partition> = partitions
            .iter()
            .filter(|p| p.skill_id == skill_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.index);
        Ok(rows)
    }

    async fn create_partitions(&self, rows: Vec<Partition>) -> StorageResult<()> {
        self.check_online()?;
        self.partitions.write().unwrap().extend(rows);
        Ok(())
    }

    async fn update_partition(&self, id: &str, patch: PartitionPatch) -> StorageResult<Partition> {
        self.check_online()?;
        let mut partitions = self.partitions.write().unwrap();
        let partition = partitions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("partition {id}")))?;
        patch.apply(partition);
        Ok(partition.clone())
    }

    async fn delete_partition(&self, id: &str) -> StorageResult<()> {
        self.check_online()?;
        let mut partitions = self.partitions.write().unwrap();
        let before = partitions.len();
        partitions.retain(|p| p.id != id);
        if partitions.len() == before {
            return Err(StorageError::NotFound(format!("partition {id}")));
        }
        Ok(())
    }

    async fn get_arms(&self, filter: ArmFilter) -> StorageResult<Vec<Arm>> {
        self.check_online()?;
        let arms = self.arms.read().unwrap();
        Ok(arms.iter().filter(|a| filter.matches(a)).cloned().collect())
    }

    async fn create_arms(&self, rows: Vec<Arm>) -> StorageResult<()> {
        self.check_online()?;
        self.arms.write().unwrap().extend(rows);
        Ok(())
    }

    async fn update_arm(&self, id: &str, patch: ArmPatch) -> StorageResult<Arm> {
        self.check_online()?;
        let mut arms = self.arms.write().unwrap();
        let arm = arms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("arm {id}")))?;
        patch.apply(arm);
        Ok(arm.clone())
    }

    async fn update_arm_stats(&self, id: &str, stats: ArmStats) -> StorageResult<Arm> {
        self.check_online()?;
        let mut arms = self.arms.write().unwrap();
        let arm = arms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("arm {id}")))?;
        arm.stats = stats;
        Ok(arm.clone())
    }

    async fn delete_arms_for_partition(&self, partition_id: &str) -> StorageResult<usize> {
        self.check_online()?;
        let mut arms = self.arms.write().unwrap();
        let before = arms.len();
        arms.retain(|a| a.partition_id != partition_id);
        Ok(before - arms.len())
    }

    async fn delete_arms_for_skill(&self, skill_id: &str) -> StorageResult<usize> {
        self.check_online()?;
        let mut arms = self.arms.write().unwrap();
        let before = arms.len();
        arms.retain(|a| a.skill_id != skill_id);
        Ok(before - arms.len())
    }

    async fn get_evaluations(&self, skill_id: &str) -> StorageResult<Vec<Evaluation>> {
        self.check_online()?;
        let evaluations = self.evaluations.read().unwrap();
        Ok(evaluations
            .iter()
            .filter(|e| e.skill_id == skill_id)
            .cloned()
            .collect())
    }

    async fn create_evaluations(&self, rows: Vec<Evaluation>) -> StorageResult<()> {
        self.check_online()?;
        self.evaluations.write().unwrap().extend(rows);
        Ok(())
    }

    async fn update_evaluation(
        &self,
        id: &str,
        patch: EvaluationPatch,
    ) -> StorageResult<Evaluation> {
        self.check_online()?;
        let mut evaluations = self.evaluations.write().unwrap();
        let evaluation = evaluations
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("evaluation {id}")))?;
        patch.apply(evaluation);
        Ok(evaluation.clone())
    }

    async fn delete_evaluations_for_skill(&self, skill_id: &str) -> StorageResult<usize> {
        self.check_online()?;
        let mut evaluations = self.evaluations.write().unwrap();
        let before = evaluations.len();
        evaluations.retain(|e| e.skill_id != skill_id);
        Ok(before - evaluations.len())
    }
}

/// In-memory request log.
///
/// Tests append records directly; the engine only ever reads. Records are
/// returned newest first, matching how a real log store would page.
#[derive(Default)]
pub struct InMemoryLogStore {
    records: RwLock<Vec<RequestRecord>>,
}

impl InMemoryLogStore {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record, as the surrounding proxy would.
    pub fn append(&self, record: RequestRecord) {
        self.records.write().unwrap().push(record);
    }

    fn matches(record: &RequestRecord, query: &LogQuery) -> bool {
        if record.skill_id != query.skill_id {
            return false;
        }
        if let Some(partition_id) = &query.partition_id {
            if record.partition_id.as_deref() != Some(partition_id.as_str()) {
                return false;
            }
        }
        if query.embedding_not_null && record.embedding.is_none() {
            return false;
        }
        true
    }
}

#[async_trait]
impl LogConnector for InMemoryLogStore {
    async fn get_logs(&self, query: LogQuery) -> StorageResult<Vec<RequestRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .rev()
            .filter(|r| Self::matches(r, &query))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_logs(&self, query: LogQuery) -> StorageResult<usize> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|r| Self::matches(r, &query))
            .take(query.limit)
            .count())
    }
}
