//! Skillopt core - data model and collaborator contracts
//!
//! This crate defines everything the optimization engine shares with the
//! outside world: the persisted entities (skills, partitions, arms,
//! evaluations, request records), the collaborator traits the engine is
//! parameterized over ([`StorageConnector`], [`LogConnector`],
//! [`LlmClient`]), the engine configuration, and the event sink UI
//! consumers observe the engine through.
//!
//! The engine logic itself lives in `skillopt-engine`; this crate has no
//! opinions about selection or learning.
//!
//! # Quick Start
//!
//! ```rust
//! use skillopt_core::{InMemoryStorage, Skill};
//!
//! let storage = InMemoryStorage::new();
//! let skill = Skill::new("tutor", "Explains Rust", "A language tutor")
//!     .with_clusters(2)
//!     .with_embedding("text-embedding-3-small", 1536);
//! storage.insert_skill(skill);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connectors;
pub mod errors;
pub mod events;
pub mod types;

pub use config::EngineConfig;
pub use connectors::{
    ArmFilter, InMemoryLogStore, InMemoryStorage, LlmClient, LogConnector, LogQuery,
    StorageConnector, StorageError, StorageResult,
};
pub use errors::{EngineError, Result};
pub use events::{event, CapturingSink, EventSink, NullSink};
pub use types::*;

#[cfg(feature = "openai")]
pub use connectors::OpenAiClient;
