//! Collaborator contracts
//!
//! The engine is a library between two backends it does not own: a
//! relational store for skills/partitions/arms/evaluations and an
//! append-only request log, plus the LLM gateway it calls for embeddings
//! and judge prompts. Each is a trait here, with in-memory reference
//! implementations used by tests and development.

mod llm;
mod logs;
mod memory;
mod storage;

#[cfg(feature = "openai")]
mod openai;

pub use llm::LlmClient;
pub use logs::{LogConnector, LogQuery};
pub use memory::{InMemoryLogStore, InMemoryStorage};
pub use storage::{ArmFilter, StorageConnector, StorageError, StorageResult};

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
