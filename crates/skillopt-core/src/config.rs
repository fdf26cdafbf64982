//! Engine configuration
//!
//! Deadlines, lock timeouts, and concurrency bounds for the optimization
//! engine. Every knob has a serde default so a partial config file works.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the optimization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for one embedding call, in seconds
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Deadline for one judge call, per evaluator, in seconds
    #[serde(default = "default_judge_timeout_secs")]
    pub judge_timeout_secs: u64,

    /// Deadline for one prompt-reflection call, in seconds
    #[serde(default = "default_reflect_timeout_secs")]
    pub reflect_timeout_secs: u64,

    /// Age after which a reflection lock is treated as stale, in seconds
    #[serde(default = "default_reflection_lock_timeout_secs")]
    pub reflection_lock_timeout_secs: u64,

    /// Age after which an evaluation lock is treated as stale, in seconds
    #[serde(default = "default_evaluation_lock_timeout_secs")]
    pub evaluation_lock_timeout_secs: u64,

    /// Logged requests with embeddings required before rubric regeneration
    #[serde(default = "default_bootstrap_min_requests")]
    pub bootstrap_min_requests: usize,

    /// Most recent exemplar conversations fed to the prompt reflector
    #[serde(default = "default_reflection_exemplar_limit")]
    pub reflection_exemplar_limit: usize,

    /// UCB exploration constant used when the skill has no override
    #[serde(default = "default_exploration_constant")]
    pub exploration_constant: f64,

    /// Concurrent upstream LLM calls across the whole engine
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,

    /// Concurrent background tasks (reflection, bootstrap) across all skills
    #[serde(default = "default_background_task_limit")]
    pub background_task_limit: usize,
}

fn default_embed_timeout_secs() -> u64 { 10 }
fn default_judge_timeout_secs() -> u64 { 30 }
fn default_reflect_timeout_secs() -> u64 { 60 }
fn default_reflection_lock_timeout_secs() -> u64 { 600 }
fn default_evaluation_lock_timeout_secs() -> u64 { 300 }
fn default_bootstrap_min_requests() -> usize { 5 }
fn default_reflection_exemplar_limit() -> usize { 7 }
fn default_exploration_constant() -> f64 { 1.0 }
fn default_llm_concurrency() -> usize { 8 }
fn default_background_task_limit() -> usize { 32 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embed_timeout_secs: default_embed_timeout_secs(),
            judge_timeout_secs: default_judge_timeout_secs(),
            reflect_timeout_secs: default_reflect_timeout_secs(),
            reflection_lock_timeout_secs: default_reflection_lock_timeout_secs(),
            evaluation_lock_timeout_secs: default_evaluation_lock_timeout_secs(),
            bootstrap_min_requests: default_bootstrap_min_requests(),
            reflection_exemplar_limit: default_reflection_exemplar_limit(),
            exploration_constant: default_exploration_constant(),
            llm_concurrency: default_llm_concurrency(),
            background_task_limit: default_background_task_limit(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding call deadline.
    pub fn with_embed_timeout(mut self, secs: u64) -> Self {
        self.embed_timeout_secs = secs;
        self
    }

    /// Set the per-evaluator judge deadline.
    pub fn with_judge_timeout(mut self, secs: u64) -> Self {
        self.judge_timeout_secs = secs;
        self
    }

    /// Set the reflection call deadline.
    pub fn with_reflect_timeout(mut self, secs: u64) -> Self {
        self.reflect_timeout_secs = secs;
        self
    }

    /// Set the default exploration constant.
    pub fn with_exploration(mut self, c: f64) -> Self {
        self.exploration_constant = c;
        self
    }

    /// Set the upstream LLM concurrency bound.
    pub fn with_llm_concurrency(mut self, n: usize) -> Self {
        self.llm_concurrency = n.max(1);
        self
    }

    /// Embedding deadline as a `Duration`.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    /// Judge deadline as a `Duration`.
    pub fn judge_timeout(&self) -> Duration {
        Duration::from_secs(self.judge_timeout_secs)
    }

    /// Reflection deadline as a `Duration`.
    pub fn reflect_timeout(&self) -> Duration {
        Duration::from_secs(self.reflect_timeout_secs)
    }

    /// Reflection lock staleness threshold as a `Duration`.
    pub fn reflection_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.reflection_lock_timeout_secs)
    }

    /// Evaluation lock staleness threshold as a `Duration`.
    pub fn evaluation_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_lock_timeout_secs)
    }
}
