//! Reflective arm replacement
//!
//! Once every arm of a partition has enough reward samples, the engine
//! rewrites the losing system prompts from the winning one plus recent real
//! conversations, drops the worst arm outright, and starts the partition's
//! bandit over. The skill's reflection lock arbitrates concurrent attempts;
//! a failed pass leaves the arm set untouched.

use anyhow::Context;
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::{debug, info, warn};

use skillopt_core::{event, Arm, ArmFilter, LogQuery, PartitionPatch, Skill};

use crate::bandit;
use crate::engine::EngineCtx;
use crate::locks::{self, LockKind};
use crate::prompts;
use crate::transcript;

/// Run a reflection pass for one partition if it qualifies.
///
/// Background entry point: every failure is logged and swallowed so the
/// serving path never notices.
pub(crate) async fn maybe_reflect(ctx: &EngineCtx, skill_id: &str, partition_id: &str) {
    if let Err(error) = run(ctx, skill_id, partition_id).await {
        warn!(skill_id, partition_id, %error, "reflection pass failed");
    }
}

async fn run(ctx: &EngineCtx, skill_id: &str, partition_id: &str) -> anyhow::Result<()> {
    let Some(skill) = ctx.storage.get_skill(skill_id).await? else {
        return Ok(());
    };

    // Trigger checks before touching the lock: a fresh lock elsewhere, too
    // few arms, or an arm below the pull threshold all mean "not yet".
    if let Some(held_at) = skill.reflection_lock_at {
        let timeout = chrono::Duration::seconds(ctx.config.reflection_lock_timeout_secs as i64);
        if !locks::is_stale(held_at, timeout, chrono::Utc::now()) {
            return Ok(());
        }
    }

    let arms = ctx
        .storage
        .get_arms(ArmFilter::partition(partition_id))
        .await?;
    if arms.len() < 2 {
        return Ok(());
    }
    if arms.iter().any(|a| a.stats.pulls < skill.min_pulls_per_arm) {
        return Ok(());
    }

    let Some(_token) = locks::try_acquire(ctx, skill_id, LockKind::Reflection).await? else {
        debug!(skill_id, "reflection lock contended; aborting");
        return Ok(());
    };

    ctx.events.emit(
        event::REFLECTION_STARTED,
        json!({"skill_id": skill_id, "partition_id": partition_id}),
    );

    let result = reflect_under_lock(ctx, &skill, partition_id).await;
    locks::release(ctx, skill_id, LockKind::Reflection).await;
    result
}

async fn reflect_under_lock(
    ctx: &EngineCtx,
    skill: &Skill,
    partition_id: &str,
) -> anyhow::Result<()> {
    let exemplars = ctx
        .logs
        .get_logs(
            LogQuery::skill(&skill.id, ctx.config.reflection_exemplar_limit)
                .with_partition(partition_id)
                .embedded_only(),
        )
        .await?;
    let examples = transcript::render_examples(&exemplars);

    let arms = ctx
        .storage
        .get_arms(ArmFilter::partition(partition_id))
        .await?;
    anyhow::ensure!(arms.len() >= 2, "partition lost arms before reflection");

    let best = bandit::best_arm(&arms).context("no best arm")?.clone();
    let worst = bandit::worst_arm(&arms).context("no worst arm")?.clone();

    // Safety re-check: both endpoints must still exist with enough pulls.
    // A concurrent pass that already replaced the arm set fails here and
    // leaves everything alone.
    let fresh = ctx
        .storage
        .get_arms(ArmFilter::partition(partition_id))
        .await?;
    for endpoint in [&best, &worst] {
        let current = fresh
            .iter()
            .find(|a| a.id == endpoint.id)
            .context("arm vanished during reflection")?;
        anyhow::ensure!(
            current.stats.pulls >= skill.min_pulls_per_arm,
            "arm {} dropped below the pull threshold",
            current.id
        );
    }

    // Top half keeps its prompts; the worst arm is not recreated; the rest
    // of the slots get reflective rewrites of the best prompt.
    let mut sorted: Vec<Arm> = arms.clone();
    sorted.sort_by(|a, b| {
        b.stats
            .mean
            .partial_cmp(&a.stats.mean)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let keep_count = (sorted.len() + 1) / 2;
    let replace_count = sorted.len() - keep_count - 1;

    let mut pool: Vec<String> = sorted[..keep_count]
        .iter()
        .map(|a| a.params.system_prompt.clone())
        .collect();
    for _ in 0..replace_count {
        let request = prompts::reflect_prompt(
            &best.params.system_prompt,
            &examples,
            &skill.agent_description,
            &skill.description,
        );
        let raw = ctx
            .llm
            .judge(&request, None, ctx.config.reflect_timeout())
            .await
            .context("prompt reflector call failed")?;
        let candidate = prompts::clean_prompt_text(&raw);
        anyhow::ensure!(!candidate.is_empty(), "prompt reflector returned empty text");
        pool.push(candidate);
    }

    pool.shuffle(&mut rand::thread_rng());

    let survivors: Vec<&Arm> = sorted.iter().filter(|a| a.id != worst.id).collect();
    let replacement: Vec<Arm> = survivors
        .iter()
        .zip(pool)
        .map(|(base, prompt)| {
            Arm::new(partition_id, &skill.id, base.params.with_prompt(prompt))
        })
        .collect();

    ctx.storage.delete_arms_for_partition(partition_id).await?;
    ctx.storage.create_arms(replacement.clone()).await?;
    ctx.storage
        .update_partition(partition_id, PartitionPatch::new().zero_steps())
        .await?;

    info!(
        skill_id = %skill.id,
        partition_id,
        arms_before = arms.len(),
        arms_after = replacement.len(),
        "reflection replaced partition arms"
    );
    ctx.events.emit(
        event::REFLECTION_COMPLETED,
        json!({
            "skill_id": skill.id,
            "partition_id": partition_id,
            "dropped_arm_id": worst.id,
            "arms_after": replacement.len(),
        }),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillopt_core::{ArmParams, ChatMessage, InMemoryLogStore, Partition, RequestRecord};

    use crate::engine::test_support::{scripted_ctx, ScriptedLlm};

    async fn seed_partition(
        ctx: &EngineCtx,
        logs: &InMemoryLogStore,
        skill: &Skill,
        means: &[f64],
        pulls: u64,
    ) -> (Partition, Vec<Arm>) {
        let partition = Partition::new(&skill.id, 1, vec![1.0, 0.0]);
        ctx.storage
            .create_partitions(vec![partition.clone()])
            .await
            .unwrap();

        let mut arms = Vec::new();
        for (i, mean) in means.iter().enumerate() {
            let mut arm = Arm::new(
                &partition.id,
                &skill.id,
                ArmParams::new("model", format!("prompt-{i}")),
            );
            for _ in 0..pulls {
                arm.stats.record(*mean);
            }
            arms.push(arm);
        }
        ctx.storage.create_arms(arms.clone()).await.unwrap();

        for _ in 0..3 {
            logs.append(
                RequestRecord::new(&skill.id, vec![ChatMessage::user("hello")])
                    .with_partition(&partition.id)
                    .with_embedding(vec![1.0, 0.0]),
            );
        }

        (partition, arms)
    }

    #[tokio::test]
    async fn test_reflection_drops_worst_and_contracts() {
        let llm = ScriptedLlm::new().with_judge(|_| "A reflected prompt.".to_string());
        let (ctx, fixture) = scripted_ctx(llm);
        let skill = fixture.skill.clone();

        let (partition, arms) =
            seed_partition(&ctx, &fixture.logs, &skill, &[0.9, 0.6, 0.4, 0.1], skill.min_pulls_per_arm).await;

        maybe_reflect(&ctx, &skill.id, &partition.id).await;

        let after = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await
            .unwrap();
        assert_eq!(after.len(), 3);

        // All replacement arms start from zero
        assert!(after.iter().all(|a| a.stats.pulls == 0));

        // Top-half prompts survive, the worst arm's prompt does not, and
        // one slot was rewritten by the reflector.
        let prompt_pool: Vec<&str> = after
            .iter()
            .map(|a| a.params.system_prompt.as_str())
            .collect();
        assert!(prompt_pool.contains(&"prompt-0"));
        assert!(prompt_pool.contains(&"prompt-1"));
        assert!(prompt_pool.contains(&"A reflected prompt."));
        assert!(!prompt_pool.contains(&"prompt-3"));

        // Old ids are gone (full reflection churns ids)
        for arm in &arms {
            assert!(!after.iter().any(|a| a.id == arm.id));
        }

        // Partition steps were reset and the lock released
        let partition = ctx.storage.get_partitions(&skill.id).await.unwrap();
        assert_eq!(partition[0].total_steps, 0);
        let skill = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(skill.reflection_lock_at.is_none());

        assert_eq!(fixture.events.count(event::REFLECTION_COMPLETED), 1);
    }

    #[tokio::test]
    async fn test_underplayed_arms_do_not_reflect() {
        let (ctx, fixture) = scripted_ctx(ScriptedLlm::new());
        let skill = fixture.skill.clone();

        let (partition, _) = seed_partition(&ctx, &fixture.logs, &skill, &[0.9, 0.1], 1).await;
        maybe_reflect(&ctx, &skill.id, &partition.id).await;

        let after = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(fixture.events.count(event::REFLECTION_STARTED), 0);
    }

    #[tokio::test]
    async fn test_single_arm_partition_never_reflects() {
        let (ctx, fixture) = scripted_ctx(ScriptedLlm::new());
        let skill = fixture.skill.clone();

        let (partition, _) = seed_partition(&ctx, &fixture.logs, &skill, &[0.9], 10).await;
        maybe_reflect(&ctx, &skill.id, &partition.id).await;

        let after = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn test_held_lock_aborts_quietly() {
        let (ctx, fixture) = scripted_ctx(ScriptedLlm::new());
        let skill = fixture.skill.clone();

        let (partition, _) =
            seed_partition(&ctx, &fixture.logs, &skill, &[0.9, 0.1], skill.min_pulls_per_arm).await;
        ctx.storage
            .update_skill(
                &skill.id,
                skillopt_core::SkillPatch::new().reflection_lock(Some(chrono::Utc::now())),
            )
            .await
            .unwrap();

        maybe_reflect(&ctx, &skill.id, &partition.id).await;

        let after = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(fixture.events.count(event::REFLECTION_COMPLETED), 0);
    }

    #[tokio::test]
    async fn test_reflector_failure_clears_lock_and_keeps_arms() {
        // Four arms force one reflector call, which returns garbage (empty)
        let llm = ScriptedLlm::new().with_judge(|_| String::new());
        let (ctx, fixture) = scripted_ctx(llm);
        let skill = fixture.skill.clone();

        let (partition, arms) =
            seed_partition(&ctx, &fixture.logs, &skill, &[0.9, 0.6, 0.4, 0.1], skill.min_pulls_per_arm).await;

        maybe_reflect(&ctx, &skill.id, &partition.id).await;

        let after = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await
            .unwrap();
        assert_eq!(after.len(), arms.len());

        let skill = ctx.storage.get_skill(&skill.id).await.unwrap().unwrap();
        assert!(skill.reflection_lock_at.is_none());
    }
}
