//! Evaluator families
//!
//! One evaluator per `EvaluationMethod`. Each owns a typed parameter pack
//! (the rubric), declares its JSON schema, renders the judge prompt for
//! online scoring, and renders the generation prompt used to write a fresh
//! rubric from the skill description or from real traffic examples.

use anyhow::{Context, Result};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use skillopt_core::EvaluationMethod;

/// An automated evaluator capability.
///
/// `judge_prompt` and the params prompts are pure renderers; the actual LLM
/// round-trip and verdict parsing belong to the reward pipeline.
pub trait Evaluator: Send + Sync {
    /// The method this evaluator implements.
    fn method(&self) -> EvaluationMethod;

    /// JSON schema of the parameter pack.
    fn parameter_schema(&self) -> Value;

    /// Check a parameter pack against the method's schema.
    fn validate_params(&self, params: &Value) -> Result<()>;

    /// Parameter pack derived from the skill description alone, used when
    /// no generated pack is available.
    fn default_params(&self, skill_description: &str) -> Value;

    /// Judge prompt scoring one request/response pair under this rubric.
    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String;

    /// Generation prompt whose JSON reply becomes a fresh parameter pack.
    /// `examples` carries rendered traffic transcripts when available;
    /// description-only generation passes `None`.
    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String;
}

/// Look up the evaluator for a method.
pub fn evaluator_for(method: EvaluationMethod) -> &'static dyn Evaluator {
    match method {
        EvaluationMethod::TaskCompletion => &TaskCompletion,
        EvaluationMethod::TurnRelevancy => &TurnRelevancy,
        EvaluationMethod::ToolCorrectness => &ToolCorrectness,
        EvaluationMethod::KnowledgeRetention => &KnowledgeRetention,
        EvaluationMethod::ConversationCompleteness => &ConversationCompleteness,
        EvaluationMethod::RoleAdherence => &RoleAdherence,
    }
}

// =============================================================================
// Shared prompt scaffolding
// =============================================================================

fn score_prompt(method: EvaluationMethod, rubric: &str, transcript: &str, response: &str) -> String {
    format!(
        r#"You are a strict conversation judge scoring one dimension: {method}.

## Rubric
{rubric}

## Conversation
{transcript}

## Assistant response under evaluation
{response}

Score how well the response satisfies the rubric, where 0 is a complete
failure and 1 is flawless. Return only a JSON object:
{{"score": <number between 0 and 1>, "reasoning": "<one sentence>"}}"#
    )
}

fn rubric_prompt(
    method: EvaluationMethod,
    schema: &Value,
    agent_description: &str,
    skill_description: &str,
    examples: Option<&str>,
) -> String {
    let grounding = match examples {
        Some(examples) => format!(
            "## Real conversations handled by this skill\n{examples}\n\n\
             Ground the rubric in what these conversations actually look like."
        ),
        None => "No traffic has been observed yet; derive the rubric from the \
                 descriptions alone."
            .to_string(),
    };

    format!(
        r#"You design evaluation rubrics for an LLM gateway.

## Agent
{agent_description}

## Skill
{skill_description}

{grounding}

Write the parameter pack for the "{method}" evaluator. Be concrete and
specific to this skill; avoid generic phrasing. Return only a JSON object
matching this schema:
{schema}"#,
        schema = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()),
    )
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

fn check_params<T: for<'de> Deserialize<'de>>(method: EvaluationMethod, params: &Value) -> Result<()> {
    serde_json::from_value::<T>(params.clone())
        .map(|_| ())
        .with_context(|| format!("parameter pack does not match the {method} schema"))
}

fn bullet_list(header: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let bullets = items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n{header}\n{bullets}")
}

// =============================================================================
// task-completion
// =============================================================================

/// Rubric for the task-completion evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TaskCompletionParams {
    /// What a successful completion looks like for this skill
    pub criteria: String,
    /// Observable signs the task was accomplished
    #[serde(default)]
    pub success_indicators: Vec<String>,
}

struct TaskCompletion;

impl Evaluator for TaskCompletion {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::TaskCompletion
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<TaskCompletionParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<TaskCompletionParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(TaskCompletionParams {
            criteria: format!(
                "The assistant fully accomplishes what the user asked for. \
                 Skill context: {skill_description}"
            ),
            success_indicators: Vec::new(),
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: TaskCompletionParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let rubric = format!(
            "{}{}",
            parsed.criteria,
            bullet_list("Success indicators:", &parsed.success_indicators)
        );
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

// =============================================================================
// turn-relevancy
// =============================================================================

/// Rubric for the turn-relevancy evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TurnRelevancyParams {
    /// What counts as a relevant assistant turn for this skill
    pub criteria: String,
    /// Treat restating earlier turns as irrelevant
    #[serde(default)]
    pub penalize_repetition: bool,
}

struct TurnRelevancy;

impl Evaluator for TurnRelevancy {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::TurnRelevancy
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<TurnRelevancyParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<TurnRelevancyParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(TurnRelevancyParams {
            criteria: format!(
                "Each assistant turn directly addresses the preceding user turn. \
                 Skill context: {skill_description}"
            ),
            penalize_repetition: true,
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: TurnRelevancyParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let mut rubric = parsed.criteria;
        if parsed.penalize_repetition {
            rubric.push_str("\nRepeating earlier turns without new content counts against the score.");
        }
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

// =============================================================================
// tool-correctness
// =============================================================================

/// Rubric for the tool-correctness evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ToolCorrectnessParams {
    /// What correct tool usage looks like for this skill
    pub criteria: String,
    /// Tools the assistant is expected to reach for
    #[serde(default)]
    pub expected_tools: Vec<String>,
}

struct ToolCorrectness;

impl Evaluator for ToolCorrectness {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::ToolCorrectness
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<ToolCorrectnessParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<ToolCorrectnessParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(ToolCorrectnessParams {
            criteria: format!(
                "Tools are invoked when needed, with well-formed arguments, and \
                 their results are used in the reply. Skill context: {skill_description}"
            ),
            expected_tools: Vec::new(),
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: ToolCorrectnessParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let rubric = format!(
            "{}{}",
            parsed.criteria,
            bullet_list("Expected tools:", &parsed.expected_tools)
        );
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

// =============================================================================
// knowledge-retention
// =============================================================================

/// Rubric for the knowledge-retention evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeRetentionParams {
    /// What retaining conversation knowledge means for this skill
    pub criteria: String,
    /// Kinds of facts the assistant must not drop or contradict
    #[serde(default)]
    pub key_facts: Vec<String>,
}

struct KnowledgeRetention;

impl Evaluator for KnowledgeRetention {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::KnowledgeRetention
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<KnowledgeRetentionParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<KnowledgeRetentionParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(KnowledgeRetentionParams {
            criteria: format!(
                "The assistant remembers facts established earlier in the \
                 conversation and never contradicts them. Skill context: {skill_description}"
            ),
            key_facts: Vec::new(),
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: KnowledgeRetentionParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let rubric = format!(
            "{}{}",
            parsed.criteria,
            bullet_list("Facts that must be retained:", &parsed.key_facts)
        );
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

// =============================================================================
// conversation-completeness
// =============================================================================

/// Rubric for the conversation-completeness evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConversationCompletenessParams {
    /// What a fully resolved conversation looks like for this skill
    pub criteria: String,
    /// Outcomes the conversation must reach to count as complete
    #[serde(default)]
    pub required_outcomes: Vec<String>,
}

struct ConversationCompleteness;

impl Evaluator for ConversationCompleteness {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::ConversationCompleteness
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<ConversationCompletenessParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<ConversationCompletenessParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(ConversationCompletenessParams {
            criteria: format!(
                "The conversation ends with the user's need fully resolved, \
                 with no dangling questions. Skill context: {skill_description}"
            ),
            required_outcomes: Vec::new(),
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: ConversationCompletenessParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let rubric = format!(
            "{}{}",
            parsed.criteria,
            bullet_list("Required outcomes:", &parsed.required_outcomes)
        );
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

// =============================================================================
// role-adherence
// =============================================================================

/// Rubric for the role-adherence evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleAdherenceParams {
    /// The role the assistant must stay within
    pub role: String,
    /// Behaviors that break the role
    #[serde(default)]
    pub forbidden_behaviors: Vec<String>,
}

struct RoleAdherence;

impl Evaluator for RoleAdherence {
    fn method(&self) -> EvaluationMethod {
        EvaluationMethod::RoleAdherence
    }

    fn parameter_schema(&self) -> Value {
        schema_value::<RoleAdherenceParams>()
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        check_params::<RoleAdherenceParams>(self.method(), params)
    }

    fn default_params(&self, skill_description: &str) -> Value {
        serde_json::to_value(RoleAdherenceParams {
            role: format!("The assistant described by: {skill_description}"),
            forbidden_behaviors: Vec::new(),
        })
        .unwrap_or(Value::Null)
    }

    fn judge_prompt(&self, params: &Value, transcript: &str, response: &str) -> String {
        let parsed: RoleAdherenceParams = serde_json::from_value(params.clone())
            .unwrap_or_else(|_| {
                serde_json::from_value(self.default_params("")).expect("default params are valid")
            });
        let rubric = format!(
            "The assistant must stay in role: {}{}",
            parsed.role,
            bullet_list("Forbidden behaviors:", &parsed.forbidden_behaviors)
        );
        score_prompt(self.method(), &rubric, transcript, response)
    }

    fn params_prompt(
        &self,
        agent_description: &str,
        skill_description: &str,
        examples: Option<&str>,
    ) -> String {
        rubric_prompt(
            self.method(),
            &self.parameter_schema(),
            agent_description,
            skill_description,
            examples,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_covers_every_method() {
        for method in EvaluationMethod::all() {
            let evaluator = evaluator_for(*method);
            assert_eq!(evaluator.method(), *method);
        }
    }

    #[test]
    fn test_default_params_pass_their_own_schema() {
        for method in EvaluationMethod::all() {
            let evaluator = evaluator_for(*method);
            let params = evaluator.default_params("A tutor that explains Rust");
            evaluator
                .validate_params(&params)
                .unwrap_or_else(|e| panic!("{method}: {e}"));
        }
    }

    #[test]
    fn test_validate_rejects_wrong_shape() {
        let evaluator = evaluator_for(EvaluationMethod::TaskCompletion);
        assert!(evaluator.validate_params(&json!({"criteria": 42})).is_err());
        assert!(evaluator
            .validate_params(&json!({"criteria": "x", "unexpected": true}))
            .is_err());
        assert!(evaluator.validate_params(&json!({"criteria": "x"})).is_ok());
    }

    #[test]
    fn test_judge_prompt_carries_rubric_and_transcript() {
        let evaluator = evaluator_for(EvaluationMethod::RoleAdherence);
        let params = json!({
            "role": "a formal travel agent",
            "forbidden_behaviors": ["slang", "medical advice"]
        });

        let prompt = evaluator.judge_prompt(&params, "User: hi", "hello there");
        assert!(prompt.contains("role-adherence"));
        assert!(prompt.contains("a formal travel agent"));
        assert!(prompt.contains("- slang"));
        assert!(prompt.contains("User: hi"));
        assert!(prompt.contains("\"score\""));
    }

    #[test]
    fn test_judge_prompt_with_invalid_params_uses_defaults() {
        let evaluator = evaluator_for(EvaluationMethod::TurnRelevancy);
        let prompt = evaluator.judge_prompt(&json!("not an object"), "User: hi", "hello");
        assert!(prompt.contains("turn-relevancy"));
        assert!(prompt.contains("directly addresses"));
    }

    #[test]
    fn test_params_prompt_modes() {
        let evaluator = evaluator_for(EvaluationMethod::TaskCompletion);

        let from_examples =
            evaluator.params_prompt("An assistant", "Trip planning", Some("### Example 1\n..."));
        assert!(from_examples.contains("Real conversations"));
        assert!(from_examples.contains("parameter pack"));

        let from_description = evaluator.params_prompt("An assistant", "Trip planning", None);
        assert!(from_description.contains("No traffic has been observed"));
    }
}
