//! Rubric bootstrap
//!
//! Evaluations attached at skill creation are synthesized from descriptions
//! alone. Once a handful of real requests exist, this pass rewrites every
//! rubric from actual traffic, seeds an improved system prompt across all
//! arms, and marks the skill done. It runs at most once per skill lifetime;
//! the completion flag and the evaluation lock arbitrate concurrent
//! attempts.

use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use skillopt_core::{
    event, ArmFilter, ArmPatch, Evaluation, LogQuery, PartitionPatch, Skill, SkillPatch,
};

use crate::engine::EngineCtx;
use crate::locks::{self, LockKind};
use crate::prompts;
use crate::rewards::{evaluator_for, parse_object};
use crate::transcript;

/// Regenerate a skill's evaluations from real traffic if it qualifies.
///
/// Background entry point: every failure is logged and swallowed; the next
/// qualifying request retries.
pub(crate) async fn maybe_bootstrap(ctx: &EngineCtx, skill_id: &str) {
    if let Err(error) = run(ctx, skill_id).await {
        warn!(skill_id, %error, "rubric bootstrap failed");
    }
}

async fn run(ctx: &EngineCtx, skill_id: &str) -> anyhow::Result<()> {
    let Some(skill) = ctx.storage.get_skill(skill_id).await? else {
        return Ok(());
    };

    if skill.evaluations_regenerated_at.is_some() {
        return Ok(());
    }
    if let Some(held_at) = skill.evaluation_lock_at {
        let timeout = chrono::Duration::seconds(ctx.config.evaluation_lock_timeout_secs as i64);
        if !locks::is_stale(held_at, timeout, Utc::now()) {
            return Ok(());
        }
    }

    let observed = ctx
        .logs
        .count_logs(LogQuery::skill(skill_id, ctx.config.bootstrap_min_requests).embedded_only())
        .await?;
    if observed < ctx.config.bootstrap_min_requests {
        return Ok(());
    }

    let Some(_token) = locks::try_acquire(ctx, skill_id, LockKind::Evaluation).await? else {
        debug!(skill_id, "evaluation lock contended; aborting");
        return Ok(());
    };

    // The flag may have flipped between the trigger check and the lock
    // write; completion wins over a fresh pass.
    let Some(fresh) = ctx.storage.get_skill(skill_id).await? else {
        locks::release(ctx, skill_id, LockKind::Evaluation).await;
        return Ok(());
    };
    if fresh.evaluations_regenerated_at.is_some() {
        locks::release(ctx, skill_id, LockKind::Evaluation).await;
        return Ok(());
    }

    match regenerate_under_lock(ctx, &skill).await {
        // The completion write already cleared the lock
        Ok(()) => Ok(()),
        Err(error) => {
            locks::release(ctx, skill_id, LockKind::Evaluation).await;
            Err(error)
        }
    }
}

async fn regenerate_under_lock(ctx: &EngineCtx, skill: &Skill) -> anyhow::Result<()> {
    let records = ctx
        .logs
        .get_logs(LogQuery::skill(&skill.id, ctx.config.bootstrap_min_requests).embedded_only())
        .await?;
    let examples = transcript::render_examples(&records);
    let response_format = transcript::detect_response_format(&records);

    let evaluations = ctx.storage.get_evaluations(&skill.id).await?;

    let (new_params, seed) = tokio::join!(
        regenerate_params(ctx, skill, &evaluations, &examples),
        generate_seed_prompt(ctx, skill, &examples, response_format.as_ref()),
    );
    let seed = seed?;

    // Replace the evaluations wholesale, methods and weights unchanged.
    let replacement: Vec<Evaluation> = evaluations
        .iter()
        .zip(new_params)
        .map(|(old, params)| Evaluation::new(&skill.id, old.method, old.weight, params))
        .collect();
    ctx.storage.delete_evaluations_for_skill(&skill.id).await?;
    ctx.storage.create_evaluations(replacement).await?;

    // Every arm across every partition restarts from the seed prompt.
    let arms = ctx.storage.get_arms(ArmFilter::skill(&skill.id)).await?;
    for arm in &arms {
        ctx.storage
            .update_arm(
                &arm.id,
                ArmPatch::new()
                    .with_params(arm.params.with_prompt(seed.clone()))
                    .zero_stats(),
            )
            .await?;
    }

    // Completion flag and lock clear land in one write so observers see
    // either "in progress" or "done", never a gap.
    ctx.storage
        .update_skill(
            &skill.id,
            SkillPatch::new()
                .regenerated_at(Some(Utc::now()))
                .evaluation_lock(None),
        )
        .await?;

    // Step counters are zeroed after the completion write so increments
    // that raced the regeneration are erased rather than surviving it.
    for partition in ctx.storage.get_partitions(&skill.id).await? {
        ctx.storage
            .update_partition(&partition.id, PartitionPatch::new().zero_steps())
            .await?;
    }

    info!(
        skill_id = %skill.id,
        evaluations = evaluations.len(),
        arms = arms.len(),
        "rubric bootstrap complete"
    );
    ctx.events.emit(
        event::EVALUATIONS_REGENERATED,
        json!({
            "skill_id": skill.id,
            "evaluations": evaluations.len(),
            "arms_reseeded": arms.len(),
        }),
    );

    Ok(())
}

/// Rewrite each evaluation's parameter pack from traffic examples. A pack
/// that fails to generate or validate falls back to the old one — a stale
/// rubric beats a broken one.
async fn regenerate_params(
    ctx: &EngineCtx,
    skill: &Skill,
    evaluations: &[Evaluation],
    examples: &str,
) -> Vec<Value> {
    let mut packs = Vec::with_capacity(evaluations.len());
    for evaluation in evaluations {
        let evaluator = evaluator_for(evaluation.method);
        let prompt = evaluator.params_prompt(
            &skill.agent_description,
            &skill.description,
            Some(examples),
        );
        let schema = evaluator.parameter_schema();

        let pack = match ctx
            .llm
            .judge(&prompt, Some(&schema), ctx.config.judge_timeout())
            .await
        {
            Ok(raw) => match parse_object(&raw) {
                Some(params) if evaluator.validate_params(&params).is_ok() => params,
                _ => {
                    warn!(
                        skill_id = %skill.id,
                        method = %evaluation.method,
                        "generated params failed validation; keeping previous pack"
                    );
                    evaluation.params.clone()
                }
            },
            Err(error) => {
                warn!(
                    skill_id = %skill.id,
                    method = %evaluation.method,
                    %error,
                    "param generation failed; keeping previous pack"
                );
                evaluation.params.clone()
            }
        };
        packs.push(pack);
    }
    packs
}

async fn generate_seed_prompt(
    ctx: &EngineCtx,
    skill: &Skill,
    examples: &str,
    response_format: Option<&Value>,
) -> anyhow::Result<String> {
    let prompt = prompts::seed_prompt(
        &skill.agent_description,
        &skill.description,
        examples,
        response_format,
    );
    let raw = ctx
        .llm
        .judge(&prompt, None, ctx.config.reflect_timeout())
        .await
        .context("seed prompt generation failed")?;
    let seed = prompts::clean_prompt_text(&raw);
    anyhow::ensure!(!seed.is_empty(), "seed prompt generation returned empty text");
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillopt_core::{
        Arm, ArmParams, ChatMessage, EvaluationMethod, InMemoryLogStore, Partition, RequestRecord,
    };

    use crate::engine::test_support::{scripted_ctx, ScriptedLlm};

    fn bootstrap_llm() -> ScriptedLlm {
        ScriptedLlm::new().with_judge(|prompt| {
            if prompt.contains("parameter pack") {
                r#"{"criteria": "Stays on the turn topic.", "penalize_repetition": true}"#
                    .to_string()
            } else if prompt.contains("Write the system prompt") {
                "You are the reseeded assistant.".to_string()
            } else {
                r#"{"score": 0.6}"#.to_string()
            }
        })
    }

    async fn seed_skill(
        ctx: &EngineCtx,
        logs: &InMemoryLogStore,
        skill: &Skill,
        logged: usize,
    ) -> (Partition, Arm) {
        let partition = Partition::new(&skill.id, 1, vec![1.0, 0.0]);
        ctx.storage
            .create_partitions(vec![partition.clone()])
            .await
            .unwrap();

        let mut arm = Arm::new(&partition.id, &skill.id, ArmParams::new("m", "original"));
        arm.stats.record(0.4);
        ctx.storage.create_arms(vec![arm.clone()]).await.unwrap();

        ctx.storage
            .create_evaluations(vec![Evaluation::new(
                &skill.id,
                EvaluationMethod::TurnRelevancy,
                1.0,
                evaluator_for(EvaluationMethod::TurnRelevancy).default_params(&skill.description),
            )])
            .await
            .unwrap();

        for i in 0..logged {
            logs.append(
                RequestRecord::new(&skill.id, vec![ChatMessage::user(format!("q{i}"))])
                    .with_partition(&partition.id)
                    .with_embedding(vec![1.0, 0.0]),
            );
        }

        (partition, arm)
    }

    #[tokio::test]
    async fn test_bootstrap_regenerates_once() {
        let (ctx, fixture) = scripted_ctx(bootstrap_llm());
        let skill = fixture.skill.clone();
        let (partition, arm) = seed_skill(&ctx, &fixture.logs, &skill, 5).await;

        let before = ctx.storage.get_evaluations(&skill.id).await.unwrap();

        maybe_bootstrap(&ctx, &skill.id).await;

        let updated = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(updated.evaluations_regenerated_at.is_some());
        assert!(updated.evaluation_lock_at.is_none());

        let evaluations = ctx.storage.get_evaluations(&skill.id).await.unwrap();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].method, EvaluationMethod::TurnRelevancy);
        assert!((evaluations[0].weight - 1.0).abs() < 1e-12);
        assert_ne!(evaluations[0].params, before[0].params);
        assert_eq!(evaluations[0].params["criteria"], "Stays on the turn topic.");

        let arms = ctx.storage.get_arms(ArmFilter::skill(&skill.id)).await.unwrap();
        assert_eq!(arms[0].id, arm.id);
        assert_eq!(arms[0].params.system_prompt, "You are the reseeded assistant.");
        assert_eq!(arms[0].stats.pulls, 0);

        let partitions = ctx.storage.get_partitions(&skill.id).await.unwrap();
        assert_eq!(partitions[0].id, partition.id);
        assert_eq!(partitions[0].total_steps, 0);

        assert_eq!(fixture.events.count(event::EVALUATIONS_REGENERATED), 1);

        // A second pass is a no-op
        maybe_bootstrap(&ctx, &skill.id).await;
        assert_eq!(fixture.events.count(event::EVALUATIONS_REGENERATED), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_bootstrap() {
        let (ctx, fixture) = scripted_ctx(bootstrap_llm());
        let skill = fixture.skill.clone();
        seed_skill(&ctx, &fixture.logs, &skill, 4).await;

        maybe_bootstrap(&ctx, &skill.id).await;

        let updated = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(updated.evaluations_regenerated_at.is_none());
        assert_eq!(fixture.events.count(event::EVALUATIONS_REGENERATED), 0);
    }

    #[tokio::test]
    async fn test_records_without_embeddings_do_not_count() {
        let (ctx, fixture) = scripted_ctx(bootstrap_llm());
        let skill = fixture.skill.clone();
        seed_skill(&ctx, &fixture.logs, &skill, 3).await;
        for _ in 0..5 {
            fixture
                .logs
                .append(RequestRecord::new(&skill.id, vec![ChatMessage::user("no vector")]));
        }

        maybe_bootstrap(&ctx, &skill.id).await;

        let updated = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(updated.evaluations_regenerated_at.is_none());
    }

    #[tokio::test]
    async fn test_seed_failure_clears_lock_without_completion() {
        let llm = ScriptedLlm::new().with_judge(|prompt| {
            if prompt.contains("Write the system prompt") {
                // Unusable reply for plain-text generation
                String::new()
            } else {
                r#"{"criteria": "ok"}"#.to_string()
            }
        });
        let (ctx, fixture) = scripted_ctx(llm);
        let skill = fixture.skill.clone();
        seed_skill(&ctx, &fixture.logs, &skill, 5).await;

        maybe_bootstrap(&ctx, &skill.id).await;

        let updated = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(updated.evaluations_regenerated_at.is_none());
        assert!(updated.evaluation_lock_at.is_none());

        // Arms were left alone
        let arms = ctx.storage.get_arms(ArmFilter::skill(&skill.id)).await.unwrap();
        assert_eq!(arms[0].params.system_prompt, "original");
    }

    #[tokio::test]
    async fn test_invalid_generated_params_keep_previous_pack() {
        let llm = ScriptedLlm::new().with_judge(|prompt| {
            if prompt.contains("parameter pack") {
                r#"{"unexpected_field": 1}"#.to_string()
            } else if prompt.contains("Write the system prompt") {
                "Seed.".to_string()
            } else {
                r#"{"score": 0.6}"#.to_string()
            }
        });
        let (ctx, fixture) = scripted_ctx(llm);
        let skill = fixture.skill.clone();
        seed_skill(&ctx, &fixture.logs, &skill, 5).await;

        let before = ctx.storage.get_evaluations(&skill.id).await.unwrap();
        maybe_bootstrap(&ctx, &skill.id).await;

        let updated = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(updated.evaluations_regenerated_at.is_some());

        let evaluations = ctx.storage.get_evaluations(&skill.id).await.unwrap();
        assert_eq!(evaluations[0].params, before[0].params);
    }
}
