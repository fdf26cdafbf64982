use thiserror::Error;

use crate::connectors::StorageError;

/// Errors surfaced by the engine's public entry points.
///
/// The serving path only ever propagates `Storage` connectivity failures;
/// learning-path failures degrade internally and never reach the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Skill {0} has no partitions")]
    NoPartitions(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid parameters for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
