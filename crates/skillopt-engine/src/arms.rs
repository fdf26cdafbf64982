//! Arm generation and in-place regeneration
//!
//! Fresh arm sets are built from LLM-generated system-prompt variants; all
//! arms of a skill share its configured model and default sampling. Resets
//! rewrite arms in place so their ids survive for external consumers.

use anyhow::{Context, Result};
use tracing::warn;

use skillopt_core::{
    Arm, ArmFilter, ArmParams, ArmPatch, EngineError, Partition, PartitionPatch, ResetOptions,
    Skill,
};

use crate::engine::EngineCtx;
use crate::prompts;

/// Generate `count` distinct system-prompt variants from the skill and
/// agent descriptions.
pub(crate) async fn generate_prompt_variants(
    ctx: &EngineCtx,
    skill: &Skill,
    count: usize,
) -> Result<Vec<String>> {
    let mut variants = Vec::with_capacity(count);
    for index in 0..count {
        let request =
            prompts::variant_prompt(&skill.agent_description, &skill.description, index, count);
        let raw = ctx
            .llm
            .judge(&request, None, ctx.config.reflect_timeout())
            .await
            .with_context(|| format!("prompt variant {} generation failed", index + 1))?;
        let variant = prompts::clean_prompt_text(&raw);
        anyhow::ensure!(!variant.is_empty(), "prompt variant {} came back empty", index + 1);
        variants.push(variant);
    }
    Ok(variants)
}

/// Build a fresh arm set for every partition of a skill, replacing whatever
/// existed. One arm per prompt variant per partition.
pub(crate) async fn generate_for_skill(
    ctx: &EngineCtx,
    skill: &Skill,
    partitions: &[Partition],
) -> Result<Vec<Arm>, EngineError> {
    let variants = generate_prompt_variants(ctx, skill, skill.prompt_variants as usize)
        .await
        .map_err(|e| EngineError::Generation(e.to_string()))?;

    ctx.storage.delete_arms_for_skill(&skill.id).await?;

    let mut created = Vec::with_capacity(partitions.len() * variants.len());
    for partition in partitions {
        for variant in &variants {
            created.push(Arm::new(
                &partition.id,
                &skill.id,
                ArmParams::new(&skill.model_id, variant.clone()),
            ));
        }
    }
    ctx.storage.create_arms(created.clone()).await?;
    Ok(created)
}

/// Regenerate a partition's arms in place: fresh prompts, zeroed stats,
/// same ids. A partition with no arms yet gets a newly created set instead.
/// Counters reset according to `opts`.
pub(crate) async fn regenerate_partition_in_place(
    ctx: &EngineCtx,
    skill: &Skill,
    partition: &Partition,
    opts: ResetOptions,
) -> Result<(), EngineError> {
    let arms = ctx
        .storage
        .get_arms(ArmFilter::partition(&partition.id))
        .await?;

    if arms.is_empty() {
        warn!(
            skill_id = %skill.id,
            partition = partition.index,
            "reset on a partition with no arms; creating a fresh set"
        );
        let variants = generate_prompt_variants(ctx, skill, skill.prompt_variants as usize)
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;
        let created: Vec<Arm> = variants
            .into_iter()
            .map(|variant| {
                Arm::new(
                    &partition.id,
                    &skill.id,
                    ArmParams::new(&skill.model_id, variant),
                )
            })
            .collect();
        ctx.storage.create_arms(created).await?;
    } else {
        let variants = generate_prompt_variants(ctx, skill, arms.len())
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;
        for (arm, variant) in arms.iter().zip(variants) {
            ctx.storage
                .update_arm(
                    &arm.id,
                    ArmPatch::new()
                        .with_params(arm.params.with_prompt(variant))
                        .zero_stats(),
                )
                .await?;
        }
    }

    let mut patch = PartitionPatch::new().zero_steps();
    if opts.clear_observability_count {
        patch = patch.zero_requests();
    }
    ctx.storage.update_partition(&partition.id, patch).await?;

    Ok(())
}
