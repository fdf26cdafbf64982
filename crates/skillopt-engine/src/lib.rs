//! Skillopt engine - online optimization for LLM gateway skills
//!
//! This crate is the learning core of the gateway: it partitions incoming
//! traffic by semantic similarity, runs a UCB bandit over LLM configurations
//! ("arms") inside each partition, scores finished calls with LLM-as-judge
//! evaluators, rewrites underperforming system prompts from real
//! conversations, and regenerates evaluation rubrics once real traffic has
//! been observed — all while requests are served live.
//!
//! The whole surface is [`SkillOptimizer`]: select an arm, record the
//! outcome, reset a partition or a skill. Storage, logs, and the LLM
//! gateway are collaborator traits from `skillopt-core`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skillopt_core::{ChatMessage, InMemoryLogStore, InMemoryStorage, InvocationRequest};
//! use skillopt_engine::SkillOptimizer;
//!
//! # async fn run(llm: Arc<dyn skillopt_core::LlmClient>) -> skillopt_core::Result<()> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let logs = Arc::new(InMemoryLogStore::new());
//! let optimizer = SkillOptimizer::new(storage, logs, llm);
//!
//! let request = InvocationRequest::chat(vec![ChatMessage::user("Plan a trip")]);
//! let selection = optimizer.select_arm_for_request("skill-id", &request).await?;
//! if let Some(handle) = selection.handle {
//!     // ... forward the call upstream with the selected arm ...
//!     optimizer.record_outcome(&handle, &serde_json::json!({})).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! select_arm_for_request          record_outcome
//!         │                             │
//!         ▼                             ▼
//!  ┌─────────────┐              ┌──────────────┐
//!  │ Partitioner │              │ Reward       │
//!  │ (embedding) │              │ Pipeline     │
//!  └──────┬──────┘              └──────┬───────┘
//!         ▼                            ▼
//!  ┌─────────────┐              ┌──────────────┐     fire-and-forget
//!  │ UCB Bandit  │              │ Arm Store    │──▶ ┌────────────────┐
//!  │ Selector    │              │ Update       │    │ Reflection /   │
//!  └─────────────┘              └──────────────┘    │ Rubric Bootstrap│
//!                                                   └────────────────┘
//! ```

#![warn(missing_docs)]

pub mod bandit;
pub mod engine;
pub mod llm_pool;
pub mod partitioner;
pub mod rewards;
pub mod transcript;

mod arms;
mod bootstrap;
mod locks;
mod prompts;
mod reflection;

pub use bandit::{best_arm, select_arm, worst_arm, ArmLockRegistry};
pub use engine::SkillOptimizer;
pub use llm_pool::LlmPool;
pub use partitioner::{cosine_similarity, nearest_partition, seeded_centroids};
pub use rewards::{
    evaluator_for, parse_object, parse_verdict, verdict_schema,
    ConversationCompletenessParams, Evaluator, EvaluatorScore, JudgeVerdict,
    KnowledgeRetentionParams, RewardBreakdown, RoleAdherenceParams, TaskCompletionParams,
    ToolCorrectnessParams, TurnRelevancyParams, NEUTRAL_SCORE,
};
pub use transcript::{render_examples, render_transcript, response_text};
