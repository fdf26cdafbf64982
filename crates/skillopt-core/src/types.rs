//! Core data model for the optimization engine
//!
//! Entities mirror the rows the storage connector persists: skills own
//! partitions, partitions own arms, and evaluations attach to skills.
//! Identifiers are opaque UUID-shaped strings; timestamps are UTC instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway function names whose calls participate in optimization.
///
/// Anything else bypasses partitioning and bandit selection and is served
/// with a default arm.
pub const OPTIMIZABLE_FUNCTIONS: &[&str] = &[
    "chat-complete",
    "stream-chat-complete",
    "create-model-response",
];

/// Whether a gateway function name participates in arm selection and
/// reward recording.
pub fn is_optimizable_function(name: &str) -> bool {
    OPTIMIZABLE_FUNCTIONS.contains(&name)
}

/// Mint a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Messages & requests
// =============================================================================

/// Chat message for multi-turn conversations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant, tool)
    pub role: String,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Create a tool message
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
        }
    }
}

/// An incoming gateway call addressed to a skill.
///
/// Carries everything the engine needs to partition the call and later score
/// the outcome: the ordered message list plus the structural constraints of
/// the request (tool list, response-format schema). Sampling parameters are
/// deliberately absent; they belong to the arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Gateway function name (e.g. `chat-complete`)
    pub function_name: String,
    /// Ordered conversation messages
    pub messages: Vec<ChatMessage>,
    /// Tool definitions attached to the call, as raw JSON
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    /// Response-format schema attached to the call, if any
    #[serde(default)]
    pub response_format: Option<serde_json::Value>,
}

impl InvocationRequest {
    /// Create a request with the given function name and no messages.
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            response_format: None,
        }
    }

    /// Create a chat-completion request from a message list.
    pub fn chat(messages: Vec<ChatMessage>) -> Self {
        Self {
            function_name: "chat-complete".to_string(),
            messages,
            tools: Vec::new(),
            response_format: None,
        }
    }

    /// Attach tool definitions.
    pub fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a response-format schema.
    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Textual fingerprint used for embedding.
    ///
    /// Concatenates the ordered user/system/tool message contents verbatim,
    /// newline-joined and trimmed. Assistant turns are excluded so the
    /// fingerprint reflects what was asked, not what a model answered.
    pub fn fingerprint(&self) -> String {
        self.messages
            .iter()
            .filter(|m| matches!(m.role.as_str(), "user" | "system" | "tool"))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

// =============================================================================
// Skills
// =============================================================================

/// A unit of optimization owned by an agent.
///
/// A skill owns `cluster_count` partitions of the request embedding space,
/// a per-arm pull threshold that gates reflection, and the two advisory lock
/// timestamps that arbitrate background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Opaque identifier
    pub id: String,
    /// Human-readable skill name
    pub name: String,
    /// Skill description, free text, may be updated
    pub description: String,
    /// Description of the owning agent, used in generation prompts
    pub agent_description: String,
    /// Upstream model newly generated arms are configured with
    pub model_id: String,
    /// Number of embedding-space partitions (K, >= 1)
    pub cluster_count: u32,
    /// Minimum pulls per arm before reflection may run (m)
    pub min_pulls_per_arm: u64,
    /// System-prompt variants generated per partition (s)
    pub prompt_variants: u32,
    /// Embedding model identifier; `None` disables partitioning
    pub embedding_model: Option<String>,
    /// Dimension of the configured embedding model
    pub embedding_dimensions: usize,
    /// UCB exploration constant override; engine default applies when `None`
    pub exploration_constant: Option<f64>,
    /// Advisory lock for the reflection pass
    pub reflection_lock_at: Option<DateTime<Utc>>,
    /// Advisory lock for evaluation regeneration
    pub evaluation_lock_at: Option<DateTime<Utc>>,
    /// Set exactly once, when traffic-derived evaluations replaced the
    /// description-derived ones
    pub evaluations_regenerated_at: Option<DateTime<Utc>>,
    /// Lifetime request count across all partitions
    pub total_requests: u64,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last mutation instant
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    /// Create a skill with a single partition and defaults suitable for
    /// development.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent_description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            description: description.into(),
            agent_description: agent_description.into(),
            model_id: "gpt-4o-mini".to_string(),
            cluster_count: 1,
            min_pulls_per_arm: 3,
            prompt_variants: 2,
            embedding_model: None,
            embedding_dimensions: 0,
            exploration_constant: None,
            reflection_lock_at: None,
            evaluation_lock_at: None,
            evaluations_regenerated_at: None,
            total_requests: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the model newly generated arms use.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the partition count.
    pub fn with_clusters(mut self, k: u32) -> Self {
        self.cluster_count = k.max(1);
        self
    }

    /// Set the per-arm pull threshold.
    pub fn with_min_pulls(mut self, m: u64) -> Self {
        self.min_pulls_per_arm = m;
        self
    }

    /// Set the number of system-prompt variants per partition.
    pub fn with_prompt_variants(mut self, s: u32) -> Self {
        self.prompt_variants = s.max(1);
        self
    }

    /// Configure the embedding model and its dimension.
    pub fn with_embedding(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.embedding_model = Some(model.into());
        self.embedding_dimensions = dimensions;
        self
    }

    /// Override the UCB exploration constant.
    pub fn with_exploration(mut self, c: f64) -> Self {
        self.exploration_constant = Some(c);
        self
    }
}

// =============================================================================
// Partitions
// =============================================================================

/// One region of a skill's request embedding space.
///
/// Hosts its own arm set and bandit counters. Partitions exist together or
/// not at all and are numbered 1..K within a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// Opaque identifier
    pub id: String,
    /// Owning skill
    pub skill_id: String,
    /// Position within the skill, 1-based
    pub index: u32,
    /// Fixed-dimension centroid in embedding space
    pub centroid: Vec<f32>,
    /// Pulls since the last reflection or reset
    pub total_steps: u64,
    /// Lifetime request count (monotonically nondecreasing outside resets)
    pub total_requests: u64,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

impl Partition {
    /// Create a partition with zeroed counters.
    pub fn new(skill_id: impl Into<String>, index: u32, centroid: Vec<f32>) -> Self {
        Self {
            id: new_id(),
            skill_id: skill_id.into(),
            index,
            centroid,
            total_steps: 0,
            total_requests: 0,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Arms
// =============================================================================

/// Sampling parameters forwarded to the upstream provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Completion token budget
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A concrete LLM configuration candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmParams {
    /// Upstream model identifier
    pub model_id: String,
    /// System prompt injected ahead of the conversation
    pub system_prompt: String,
    /// Sampling parameters
    #[serde(default)]
    pub sampling: SamplingParams,
}

impl ArmParams {
    /// Create arm parameters with default sampling.
    pub fn new(model_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            sampling: SamplingParams::default(),
        }
    }

    /// Copy of these params with a different system prompt.
    pub fn with_prompt(&self, system_prompt: impl Into<String>) -> Self {
        Self {
            model_id: self.model_id.clone(),
            system_prompt: system_prompt.into(),
            sampling: self.sampling.clone(),
        }
    }
}

/// Incremental reward statistics for one arm.
///
/// `mean` is always `total_reward / pulls` when `pulls > 0`; all fields are
/// zero otherwise. `sum_squares` accumulates squared rewards for variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    /// Pull count
    pub pulls: u64,
    /// Running mean reward
    pub mean: f64,
    /// Sum of squared rewards
    pub sum_squares: f64,
    /// Cumulative reward
    pub total_reward: f64,
}

impl ArmStats {
    /// Fresh zeroed statistics.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Fold one observed reward into the running statistics.
    pub fn record(&mut self, reward: f64) {
        self.pulls += 1;
        self.total_reward += reward;
        self.mean = self.total_reward / self.pulls as f64;
        self.sum_squares += reward * reward;
    }

    /// Sample variance of observed rewards (population form).
    pub fn variance(&self) -> f64 {
        if self.pulls == 0 {
            return 0.0;
        }
        let n = self.pulls as f64;
        (self.sum_squares / n - self.mean * self.mean).max(0.0)
    }

    /// Accounting invariant: zeroed when unpulled, `mean == total / pulls`
    /// otherwise.
    pub fn is_consistent(&self) -> bool {
        if self.pulls == 0 {
            return self.mean == 0.0 && self.sum_squares == 0.0 && self.total_reward == 0.0;
        }
        (self.mean - self.total_reward / self.pulls as f64).abs() < 1e-9
    }
}

/// A concrete LLM configuration candidate attached to one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    /// Opaque identifier; stable across in-place resets
    pub id: String,
    /// Owning partition
    pub partition_id: String,
    /// Owning skill (denormalized for skill-wide queries)
    pub skill_id: String,
    /// Model, system prompt, and sampling parameters
    pub params: ArmParams,
    /// Incremental reward statistics
    pub stats: ArmStats,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

impl Arm {
    /// Create an arm with zeroed statistics.
    pub fn new(
        partition_id: impl Into<String>,
        skill_id: impl Into<String>,
        params: ArmParams,
    ) -> Self {
        Self {
            id: new_id(),
            partition_id: partition_id.into(),
            skill_id: skill_id.into(),
            params,
            stats: ArmStats::zeroed(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Evaluations
// =============================================================================

/// Automated evaluator families the reward pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationMethod {
    /// Did the assistant accomplish what the user asked for
    TaskCompletion,
    /// Is each assistant turn relevant to the turn before it
    TurnRelevancy,
    /// Were tools invoked correctly and with sensible arguments
    ToolCorrectness,
    /// Does the assistant retain facts established earlier
    KnowledgeRetention,
    /// Did the conversation reach a complete resolution
    ConversationCompleteness,
    /// Did the assistant stay within its assigned role
    RoleAdherence,
}

impl EvaluationMethod {
    /// Every supported method, in declaration order.
    pub fn all() -> &'static [EvaluationMethod] {
        &[
            EvaluationMethod::TaskCompletion,
            EvaluationMethod::TurnRelevancy,
            EvaluationMethod::ToolCorrectness,
            EvaluationMethod::KnowledgeRetention,
            EvaluationMethod::ConversationCompleteness,
            EvaluationMethod::RoleAdherence,
        ]
    }

    /// Stable kebab-case name used on the wire and in events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompletion => "task-completion",
            Self::TurnRelevancy => "turn-relevancy",
            Self::ToolCorrectness => "tool-correctness",
            Self::KnowledgeRetention => "knowledge-retention",
            Self::ConversationCompleteness => "conversation-completeness",
            Self::RoleAdherence => "role-adherence",
        }
    }
}

impl std::fmt::Display for EvaluationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EvaluationMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task-completion" => Ok(Self::TaskCompletion),
            "turn-relevancy" => Ok(Self::TurnRelevancy),
            "tool-correctness" => Ok(Self::ToolCorrectness),
            "knowledge-retention" => Ok(Self::KnowledgeRetention),
            "conversation-completeness" => Ok(Self::ConversationCompleteness),
            "role-adherence" => Ok(Self::RoleAdherence),
            _ => Err(anyhow::anyhow!(
                "Unknown evaluation method: {}. Supported: {}",
                s,
                EvaluationMethod::all()
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// One automated evaluator attached to a skill.
///
/// `params` is the method-specific parameter pack (the rubric); its shape is
/// validated against the method's declared schema before persisting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Opaque identifier
    pub id: String,
    /// Owning skill
    pub skill_id: String,
    /// Evaluator family
    pub method: EvaluationMethod,
    /// Contribution weight in (0, 1]
    pub weight: f64,
    /// Method-specific parameter pack
    pub params: serde_json::Value,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last mutation instant
    pub updated_at: DateTime<Utc>,
}

impl Evaluation {
    /// Create an evaluation row.
    pub fn new(
        skill_id: impl Into<String>,
        method: EvaluationMethod,
        weight: f64,
        params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            skill_id: skill_id.into(),
            method,
            weight,
            params,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Request records
// =============================================================================

/// A completed call as recorded by the surrounding proxy's log store.
///
/// Append-only from the engine's perspective; the engine only ever reads
/// these back as exemplars and bootstrap material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Opaque identifier
    pub id: String,
    /// Skill that served the call
    pub skill_id: String,
    /// Partition the call was routed to, when partitioning ran
    pub partition_id: Option<String>,
    /// Arm that served the call, when one was selected
    pub arm_id: Option<String>,
    /// Gateway function name
    pub function_name: String,
    /// Ordered input messages
    pub input_messages: Vec<ChatMessage>,
    /// Upstream response body
    pub response: serde_json::Value,
    /// Tool definitions attached to the call
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    /// Response-format schema attached to the call, if any
    #[serde(default)]
    pub response_format: Option<serde_json::Value>,
    /// Request embedding, when the embedding provider was configured
    pub embedding: Option<Vec<f32>>,
    /// End-to-end latency in milliseconds
    pub latency_ms: u64,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Create a record for the given skill and messages; remaining fields
    /// start empty and are filled with the builder helpers.
    pub fn new(skill_id: impl Into<String>, input_messages: Vec<ChatMessage>) -> Self {
        Self {
            id: new_id(),
            skill_id: skill_id.into(),
            partition_id: None,
            arm_id: None,
            function_name: "chat-complete".to_string(),
            input_messages,
            response: serde_json::Value::Null,
            tools: Vec::new(),
            response_format: None,
            embedding: None,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the partition the call was routed to.
    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    /// Set the serving arm.
    pub fn with_arm(mut self, arm_id: impl Into<String>) -> Self {
        self.arm_id = Some(arm_id.into());
        self
    }

    /// Set the upstream response body.
    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = response;
        self
    }

    /// Set the request embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach tool definitions.
    pub fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a response-format schema.
    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Ticket returned by arm selection and redeemed by `record_outcome`.
///
/// Carries the original request so the reward pipeline can score the
/// request/response pair without a round-trip to the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionHandle {
    /// Skill the selection was made for
    pub skill_id: String,
    /// Partition the request was routed to
    pub partition_id: String,
    /// Selected arm
    pub arm_id: String,
    /// Selection instant
    pub selected_at: DateTime<Utc>,
    /// The request as submitted
    pub request: InvocationRequest,
}

/// Result of `select_arm_for_request`.
///
/// Non-optimizable function names yield a default arm with no handle; a
/// skill with no arms yet yields neither.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The arm to serve the call with, when one exists
    pub arm: Option<Arm>,
    /// Partition the request was routed to
    pub partition_id: Option<String>,
    /// Ticket for `record_outcome`; absent on the bypass path
    pub handle: Option<SelectionHandle>,
}

/// Options for the partition and skill reset operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetOptions {
    /// Also zero the lifetime `total_requests` observability counters
    pub clear_observability_count: bool,
}

impl ResetOptions {
    /// Reset that also clears the lifetime request counters.
    pub fn clearing() -> Self {
        Self {
            clear_observability_count: true,
        }
    }
}

// =============================================================================
// Partial updates
// =============================================================================

/// Partial update for a skill row.
///
/// `None` fields are left untouched. The nullable timestamp columns use a
/// double `Option` so the outer layer means "write this field" and the inner
/// value may be `None` (clear).
#[derive(Debug, Clone, Default)]
pub struct SkillPatch {
    /// Replace the description
    pub description: Option<String>,
    /// Write the reflection lock field
    pub reflection_lock_at: Option<Option<DateTime<Utc>>>,
    /// Write the evaluation lock field
    pub evaluation_lock_at: Option<Option<DateTime<Utc>>>,
    /// Write the regeneration completion flag
    pub evaluations_regenerated_at: Option<Option<DateTime<Utc>>>,
    /// Amount to add to the lifetime request counter
    pub increment_total_requests: u64,
}

impl SkillPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the reflection lock field.
    pub fn reflection_lock(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.reflection_lock_at = Some(at);
        self
    }

    /// Write the evaluation lock field.
    pub fn evaluation_lock(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.evaluation_lock_at = Some(at);
        self
    }

    /// Write the regeneration completion flag.
    pub fn regenerated_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.evaluations_regenerated_at = Some(at);
        self
    }

    /// Bump the lifetime request counter.
    pub fn bump_requests(mut self) -> Self {
        self.increment_total_requests += 1;
        self
    }

    /// Apply this patch to a skill row, refreshing `updated_at`.
    pub fn apply(&self, skill: &mut Skill) {
        if let Some(description) = &self.description {
            skill.description = description.clone();
        }
        if let Some(at) = self.reflection_lock_at {
            skill.reflection_lock_at = at;
        }
        if let Some(at) = self.evaluation_lock_at {
            skill.evaluation_lock_at = at;
        }
        if let Some(at) = self.evaluations_regenerated_at {
            skill.evaluations_regenerated_at = at;
        }
        skill.total_requests += self.increment_total_requests;
        skill.updated_at = Utc::now();
    }
}

/// Partial update for a partition row.
#[derive(Debug, Clone, Default)]
pub struct PartitionPatch {
    /// Replace the centroid (resets only; centroids never move online)
    pub centroid: Option<Vec<f32>>,
    /// Overwrite the step counter (used to zero it)
    pub total_steps: Option<u64>,
    /// Overwrite the lifetime request counter (used to zero it)
    pub total_requests: Option<u64>,
    /// Amount to add to the step counter
    pub increment_total_steps: u64,
    /// Amount to add to the lifetime request counter
    pub increment_total_requests: u64,
}

impl PartitionPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that bumps both counters by one, as a recorded outcome does.
    pub fn bump() -> Self {
        Self {
            increment_total_steps: 1,
            increment_total_requests: 1,
            ..Self::default()
        }
    }

    /// Zero the step counter.
    pub fn zero_steps(mut self) -> Self {
        self.total_steps = Some(0);
        self
    }

    /// Zero the lifetime request counter.
    pub fn zero_requests(mut self) -> Self {
        self.total_requests = Some(0);
        self
    }

    /// Replace the centroid.
    pub fn with_centroid(mut self, centroid: Vec<f32>) -> Self {
        self.centroid = Some(centroid);
        self
    }

    /// Apply this patch to a partition row. Overwrites run before
    /// increments so a zero-and-bump patch lands on one.
    pub fn apply(&self, partition: &mut Partition) {
        if let Some(centroid) = &self.centroid {
            partition.centroid = centroid.clone();
        }
        if let Some(steps) = self.total_steps {
            partition.total_steps = steps;
        }
        if let Some(requests) = self.total_requests {
            partition.total_requests = requests;
        }
        partition.total_steps += self.increment_total_steps;
        partition.total_requests += self.increment_total_requests;
    }
}

/// Partial update for an arm row. Stats writes go through the dedicated
/// `update_arm_stats` connector operation; this patch covers in-place
/// parameter replacement during resets.
#[derive(Debug, Clone, Default)]
pub struct ArmPatch {
    /// Replace the arm parameters
    pub params: Option<ArmParams>,
    /// Replace the statistics (used to zero them during resets)
    pub stats: Option<ArmStats>,
}

impl ArmPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the parameters.
    pub fn with_params(mut self, params: ArmParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Zero the statistics.
    pub fn zero_stats(mut self) -> Self {
        self.stats = Some(ArmStats::zeroed());
        self
    }

    /// Apply this patch to an arm row.
    pub fn apply(&self, arm: &mut Arm) {
        if let Some(params) = &self.params {
            arm.params = params.clone();
        }
        if let Some(stats) = self.stats {
            arm.stats = stats;
        }
    }
}

/// Partial update for an evaluation row.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPatch {
    /// Replace the parameter pack
    pub params: Option<serde_json::Value>,
    /// Replace the weight
    pub weight: Option<f64>,
}

impl EvaluationPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the parameter pack.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Apply this patch to an evaluation row, refreshing `updated_at`.
    pub fn apply(&self, evaluation: &mut Evaluation) {
        if let Some(params) = &self.params {
            evaluation.params = params.clone();
        }
        if let Some(weight) = self.weight {
            evaluation.weight = weight;
        }
        evaluation.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizable_function_filter() {
        assert!(is_optimizable_function("chat-complete"));
        assert!(is_optimizable_function("stream-chat-complete"));
        assert!(is_optimizable_function("create-model-response"));
        assert!(!is_optimizable_function("embed"));
        assert!(!is_optimizable_function("moderate"));
    }

    #[test]
    fn test_fingerprint_excludes_assistant_turns() {
        let request = InvocationRequest::chat(vec![
            ChatMessage::system("You are a tutor"),
            ChatMessage::user("  Explain borrowing  "),
            ChatMessage::assistant("Borrowing lets you..."),
            ChatMessage::tool("{\"result\": 42}"),
        ]);

        let fp = request.fingerprint();
        assert!(fp.starts_with("You are a tutor"));
        assert!(fp.contains("Explain borrowing"));
        assert!(fp.ends_with("{\"result\": 42}"));
        assert!(!fp.contains("Borrowing lets you"));
    }

    #[test]
    fn test_arm_stats_record() {
        let mut stats = ArmStats::zeroed();
        assert!(stats.is_consistent());

        stats.record(0.5);
        stats.record(1.0);
        stats.record(0.25);

        assert_eq!(stats.pulls, 3);
        assert!((stats.total_reward - 1.75).abs() < 1e-12);
        assert!((stats.mean - 1.75 / 3.0).abs() < 1e-12);
        assert!((stats.sum_squares - (0.25 + 1.0 + 0.0625)).abs() < 1e-12);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_arm_stats_variance() {
        let mut stats = ArmStats::zeroed();
        assert_eq!(stats.variance(), 0.0);

        stats.record(0.0);
        stats.record(1.0);
        assert!((stats.variance() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_evaluation_method_round_trip() {
        for method in EvaluationMethod::all() {
            let parsed: EvaluationMethod = method.as_str().parse().unwrap();
            assert_eq!(parsed, *method);
        }
        assert!("sentiment".parse::<EvaluationMethod>().is_err());
    }

    #[test]
    fn test_evaluation_method_serde_kebab_case() {
        let json = serde_json::to_string(&EvaluationMethod::TurnRelevancy).unwrap();
        assert_eq!(json, "\"turn-relevancy\"");
    }

    #[test]
    fn test_skill_patch_lock_write_and_clear() {
        let mut skill = Skill::new("tutor", "Explains Rust", "A language tutor");
        let now = Utc::now();

        SkillPatch::new().reflection_lock(Some(now)).apply(&mut skill);
        assert_eq!(skill.reflection_lock_at, Some(now));

        SkillPatch::new().reflection_lock(None).apply(&mut skill);
        assert_eq!(skill.reflection_lock_at, None);

        // Untouched patch leaves the flag alone
        SkillPatch::new().bump_requests().apply(&mut skill);
        assert_eq!(skill.reflection_lock_at, None);
        assert_eq!(skill.total_requests, 1);
    }

    #[test]
    fn test_partition_patch_zero_before_increment() {
        let mut partition = Partition::new("skill", 1, vec![1.0, 0.0]);
        partition.total_steps = 7;

        let patch = PartitionPatch {
            total_steps: Some(0),
            increment_total_steps: 1,
            ..PartitionPatch::default()
        };
        patch.apply(&mut partition);
        assert_eq!(partition.total_steps, 1);
    }

    #[test]
    fn test_arm_patch_preserves_id() {
        let mut arm = Arm::new("p1", "s1", ArmParams::new("gpt-4o-mini", "Be terse."));
        arm.stats.record(0.9);
        let id = arm.id.clone();

        ArmPatch::new()
            .with_params(arm.params.with_prompt("Be thorough."))
            .zero_stats()
            .apply(&mut arm);

        assert_eq!(arm.id, id);
        assert_eq!(arm.params.system_prompt, "Be thorough.");
        assert_eq!(arm.stats, ArmStats::zeroed());
    }

    #[test]
    fn test_skill_builder() {
        let skill = Skill::new("tutor", "Explains Rust", "A language tutor")
            .with_clusters(4)
            .with_min_pulls(5)
            .with_prompt_variants(3)
            .with_embedding("text-embedding-3-small", 1536)
            .with_exploration(1.4);

        assert_eq!(skill.cluster_count, 4);
        assert_eq!(skill.min_pulls_per_arm, 5);
        assert_eq!(skill.prompt_variants, 3);
        assert_eq!(skill.embedding_dimensions, 1536);
        assert_eq!(skill.exploration_constant, Some(1.4));
    }
}
