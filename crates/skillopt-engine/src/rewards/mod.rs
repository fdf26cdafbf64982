//! Reward pipeline
//!
//! Scores a finished request with the weighted basket of evaluators attached
//! to the skill and returns a scalar reward in [0, 1]. Evaluator failures of
//! any kind — transport errors, timeouts, unparseable judge replies — degrade
//! to a recorded neutral score for that evaluator only; the pipeline as a
//! whole only fails when storage itself is unreachable.

mod judge;
mod methods;

pub use judge::{parse_object, parse_verdict, verdict_schema, JudgeVerdict, NEUTRAL_SCORE};
pub use methods::{
    evaluator_for, ConversationCompletenessParams, Evaluator, KnowledgeRetentionParams,
    RoleAdherenceParams, TaskCompletionParams, ToolCorrectnessParams, TurnRelevancyParams,
};

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::warn;

use skillopt_core::{
    event, EngineError, EvaluationMethod, InvocationRequest, RequestRecord, Skill,
};

use crate::engine::EngineCtx;
use crate::transcript;

/// One evaluator's contribution to a reward.
#[derive(Debug, Clone)]
pub struct EvaluatorScore {
    /// Evaluator family
    pub method: EvaluationMethod,
    /// Weight it carried
    pub weight: f64,
    /// Score in [0, 1]
    pub score: f64,
    /// True when the neutral fallback was recorded
    pub fallback: bool,
}

/// Scalar reward plus the per-evaluator breakdown behind it.
#[derive(Debug, Clone)]
pub struct RewardBreakdown {
    /// Weight-normalized mean of the evaluator scores
    pub reward: f64,
    /// Individual evaluator results, in evaluation order
    pub scores: Vec<EvaluatorScore>,
}

impl RewardBreakdown {
    /// The neutral breakdown used when a skill has no evaluations attached.
    pub fn neutral() -> Self {
        Self {
            reward: NEUTRAL_SCORE,
            scores: Vec::new(),
        }
    }
}

/// Score one request/response pair for a skill.
///
/// Evaluators run concurrently, each under its own judge deadline. Only a
/// storage failure propagates.
pub(crate) async fn compute_reward(
    ctx: &EngineCtx,
    skill: &Skill,
    request: &InvocationRequest,
    response: &Value,
) -> Result<RewardBreakdown, EngineError> {
    let evaluations = ctx.storage.get_evaluations(&skill.id).await?;
    if evaluations.is_empty() {
        return Ok(RewardBreakdown::neutral());
    }

    let mut record = RequestRecord::new(&skill.id, request.messages.clone())
        .with_tools(request.tools.clone())
        .with_response(response.clone());
    if let Some(format) = &request.response_format {
        record = record.with_response_format(format.clone());
    }
    let conversation = transcript::render_transcript(&record);
    let reply = transcript::response_text(response);
    let schema = verdict_schema();

    let futures = evaluations.iter().map(|evaluation| {
        let conversation = conversation.as_str();
        let reply = reply.as_str();
        let schema = &schema;
        async move {
            let evaluator = evaluator_for(evaluation.method);
            let prompt = evaluator.judge_prompt(&evaluation.params, conversation, reply);
            let verdict = match ctx
                .llm
                .judge(&prompt, Some(schema), ctx.config.judge_timeout())
                .await
            {
                Ok(raw) => parse_verdict(&raw),
                Err(error) => {
                    warn!(
                        skill_id = %skill.id,
                        method = %evaluation.method,
                        %error,
                        "judge call failed; recording neutral score"
                    );
                    JudgeVerdict::neutral()
                }
            };
            EvaluatorScore {
                method: evaluation.method,
                weight: evaluation.weight,
                score: verdict.score,
                fallback: verdict.fallback,
            }
        }
    });
    let scores: Vec<EvaluatorScore> = join_all(futures).await;

    for score in scores.iter().filter(|s| s.fallback) {
        ctx.events.emit(
            event::EVALUATOR_FALLBACK,
            json!({
                "skill_id": skill.id,
                "method": score.method.as_str(),
                "score": score.score,
                "fallback": true,
            }),
        );
    }

    let total_weight: f64 = scores.iter().filter(|s| s.weight > 0.0).map(|s| s.weight).sum();
    let reward = if total_weight > 0.0 {
        scores
            .iter()
            .filter(|s| s.weight > 0.0)
            .map(|s| s.weight * s.score)
            .sum::<f64>()
            / total_weight
    } else {
        NEUTRAL_SCORE
    };

    Ok(RewardBreakdown { reward, scores })
}
