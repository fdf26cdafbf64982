//! Engine facade
//!
//! [`SkillOptimizer`] is the whole public surface of the optimization
//! engine: select an arm for a request, record its outcome, and reset
//! partitions or skills. Everything else — partitioning, bandit updates,
//! reflection, rubric bootstrap — happens behind these entry points, with
//! the learning passes dispatched as fire-and-forget background tasks the
//! serving path never waits on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use skillopt_core::{
    event, is_optimizable_function, Arm, ArmFilter, EngineConfig, EngineError, Evaluation,
    EvaluationMethod, EventSink, InvocationRequest, LogConnector, NullSink, Partition,
    PartitionPatch, ResetOptions, Result, Selection, SelectionHandle, Skill, SkillPatch,
    StorageConnector,
};

use crate::arms;
use crate::bandit::{self, ArmLockRegistry};
use crate::bootstrap;
use crate::llm_pool::LlmPool;
use crate::partitioner;
use crate::reflection;
use crate::rewards::{self, evaluator_for, parse_object};

/// Shared state threaded through every engine component.
pub(crate) struct EngineCtx {
    pub(crate) storage: Arc<dyn StorageConnector>,
    pub(crate) logs: Arc<dyn LogConnector>,
    pub(crate) llm: LlmPool,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) config: EngineConfig,
    pub(crate) arm_locks: ArmLockRegistry,
    pub(crate) skill_tasks: SkillTaskRegistry,
    pub(crate) background: Arc<tokio::sync::Semaphore>,
}

impl EngineCtx {
    fn new(
        storage: Arc<dyn StorageConnector>,
        logs: Arc<dyn LogConnector>,
        llm: Arc<dyn skillopt_core::LlmClient>,
        config: EngineConfig,
    ) -> Self {
        let pool = LlmPool::new(llm, config.llm_concurrency);
        let background = Arc::new(tokio::sync::Semaphore::new(config.background_task_limit));
        Self {
            storage,
            logs,
            llm: pool,
            events: Arc::new(NullSink),
            config,
            arm_locks: ArmLockRegistry::new(),
            skill_tasks: SkillTaskRegistry::new(),
            background,
        }
    }
}

/// Per-skill serialization of background passes within this process.
///
/// The timestamp locks on the skill row arbitrate across processes; this
/// registry keeps one process from racing itself, so reflection and
/// bootstrap attempts for a skill run one at a time.
#[derive(Default)]
pub(crate) struct SkillTaskRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SkillTaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The task lock for a skill, created on first use.
    pub(crate) fn entry(&self, skill_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(skill_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// The skill optimization engine.
///
/// Construct one per process over the storage, log, and LLM collaborators;
/// it is cheap to clone-share behind `Arc` and safe to call concurrently.
pub struct SkillOptimizer {
    ctx: Arc<EngineCtx>,
}

impl SkillOptimizer {
    /// Create an engine with the default configuration and no event sink.
    pub fn new(
        storage: Arc<dyn StorageConnector>,
        logs: Arc<dyn LogConnector>,
        llm: Arc<dyn skillopt_core::LlmClient>,
    ) -> Self {
        Self::with_config(storage, logs, llm, EngineConfig::default())
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(
        storage: Arc<dyn StorageConnector>,
        logs: Arc<dyn LogConnector>,
        llm: Arc<dyn skillopt_core::LlmClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineCtx::new(storage, logs, llm, config)),
        }
    }

    /// Attach an event sink. Must be called before the engine is shared.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        Arc::get_mut(&mut self.ctx)
            .expect("engine not shared yet")
            .events = events;
        self
    }

    /// Select the arm to serve an incoming request with.
    ///
    /// Optimizable calls are embedded, routed to the nearest partition, and
    /// served by the partition's bandit; the returned handle is redeemed by
    /// [`record_outcome`](Self::record_outcome). Non-optimizable function
    /// names bypass all of that and receive the first arm of the first
    /// partition with no handle. A skill whose arms have not been generated
    /// yet yields no arm at all.
    #[instrument(skip(self, request), fields(skill_id = %skill_id, function = %request.function_name))]
    pub async fn select_arm_for_request(
        &self,
        skill_id: &str,
        request: &InvocationRequest,
    ) -> Result<Selection> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;
        let partitions = ctx.storage.get_partitions(skill_id).await?;
        if partitions.is_empty() {
            return Err(EngineError::NoPartitions(skill_id.to_string()));
        }

        if !is_optimizable_function(&request.function_name) {
            let first = &partitions[0];
            let arms = ctx.storage.get_arms(ArmFilter::partition(&first.id)).await?;
            return Ok(Selection {
                arm: arms.into_iter().next(),
                partition_id: Some(first.id.clone()),
                handle: None,
            });
        }

        let partition = partitioner::partition_for(ctx, &skill, request, &partitions).await;
        let arms = ctx
            .storage
            .get_arms(ArmFilter::partition(&partition.id))
            .await?;
        let exploration = skill
            .exploration_constant
            .unwrap_or(ctx.config.exploration_constant);

        let Some(arm) = bandit::select_arm(&arms, exploration) else {
            debug!(skill_id, "no arms generated yet; serving without one");
            return Ok(Selection {
                arm: None,
                partition_id: Some(partition.id.clone()),
                handle: None,
            });
        };

        ctx.events.emit(
            event::ARM_SELECTED,
            json!({
                "skill_id": skill_id,
                "partition_id": partition.id,
                "arm_id": arm.id,
                "pulls": arm.stats.pulls,
            }),
        );

        Ok(Selection {
            arm: Some(arm.clone()),
            partition_id: Some(partition.id.clone()),
            handle: Some(SelectionHandle {
                skill_id: skill_id.to_string(),
                partition_id: partition.id.clone(),
                arm_id: arm.id.clone(),
                selected_at: Utc::now(),
                request: request.clone(),
            }),
        })
    }

    /// Record the outcome of a served request.
    ///
    /// Scores the request/response pair with the skill's evaluators, folds
    /// the reward into the arm's statistics, bumps the partition and skill
    /// counters, and dispatches reflection and rubric bootstrap in the
    /// background. Only storage failures propagate; an outcome whose arm was
    /// replaced mid-flight is dropped silently.
    #[instrument(skip(self, handle, response), fields(skill_id = %handle.skill_id, arm_id = %handle.arm_id))]
    pub async fn record_outcome(&self, handle: &SelectionHandle, response: &Value) -> Result<()> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(&handle.skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(handle.skill_id.clone()))?;

        let breakdown = rewards::compute_reward(ctx, &skill, &handle.request, response).await?;

        // Serialize the read-modify-write per arm so concurrent outcomes
        // for the same arm cannot lose an observation.
        let applied = {
            let lock = ctx.arm_locks.lock_for(&handle.arm_id).await;
            let _guard = lock.lock().await;

            let arms = ctx
                .storage
                .get_arms(ArmFilter::partition(&handle.partition_id))
                .await?;
            match arms.into_iter().find(|a| a.id == handle.arm_id) {
                Some(arm) => {
                    let mut stats = arm.stats;
                    stats.record(breakdown.reward);
                    ctx.storage.update_arm_stats(&arm.id, stats).await?;
                    true
                }
                None => {
                    debug!(arm_id = %handle.arm_id, "arm replaced mid-flight; outcome dropped");
                    false
                }
            }
        };

        if !applied {
            ctx.arm_locks.forget(&handle.arm_id).await;
            return Ok(());
        }

        ctx.storage
            .update_partition(&handle.partition_id, PartitionPatch::bump())
            .await?;
        ctx.storage
            .update_skill(&handle.skill_id, SkillPatch::new().bump_requests())
            .await?;

        ctx.events.emit(
            event::OUTCOME_RECORDED,
            json!({
                "skill_id": handle.skill_id,
                "partition_id": handle.partition_id,
                "arm_id": handle.arm_id,
                "reward": breakdown.reward,
                "fallbacks": breakdown.scores.iter().filter(|s| s.fallback).count(),
            }),
        );

        self.dispatch_background(handle);
        Ok(())
    }

    /// Reset one partition: regenerate its arms' prompts in place (ids
    /// preserved), zero their statistics, and zero the step counter. With
    /// `clear_observability_count` the partition's lifetime request counter
    /// is zeroed too; the skill-level counter is never touched.
    #[instrument(skip(self), fields(skill_id = %skill_id, partition_id = %partition_id))]
    pub async fn reset_partition(
        &self,
        skill_id: &str,
        partition_id: &str,
        opts: ResetOptions,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;
        let partitions = ctx.storage.get_partitions(skill_id).await?;
        let partition = partitions
            .iter()
            .find(|p| p.id == partition_id)
            .ok_or_else(|| EngineError::PartitionNotFound(partition_id.to_string()))?;

        arms::regenerate_partition_in_place(ctx, &skill, partition, opts).await?;

        ctx.events.emit(
            event::PARTITION_RESET,
            json!({"skill_id": skill_id, "partition_id": partition_id}),
        );
        Ok(())
    }

    /// Reset a whole skill: reseed centroids in place (partition ids
    /// preserved), regenerate every arm in place, and re-parameterize the
    /// attached evaluations from the descriptions alone.
    #[instrument(skip(self), fields(skill_id = %skill_id))]
    pub async fn reset_skill(&self, skill_id: &str, opts: ResetOptions) -> Result<()> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;
        let partitions = ctx.storage.get_partitions(skill_id).await?;

        if skill.embedding_model.is_some() && skill.embedding_dimensions > 0 {
            let centroids = partitioner::seeded_centroids(
                &skill.id,
                skill.cluster_count as usize,
                skill.embedding_dimensions,
            );
            for (partition, centroid) in partitions.iter().zip(centroids) {
                ctx.storage
                    .update_partition(
                        &partition.id,
                        PartitionPatch::new().with_centroid(centroid),
                    )
                    .await?;
            }
        }

        for partition in &partitions {
            arms::regenerate_partition_in_place(ctx, &skill, partition, opts).await?;
        }

        for evaluation in ctx.storage.get_evaluations(skill_id).await? {
            let evaluator = evaluator_for(evaluation.method);
            let prompt =
                evaluator.params_prompt(&skill.agent_description, &skill.description, None);
            let schema = evaluator.parameter_schema();
            match ctx
                .llm
                .judge(&prompt, Some(&schema), ctx.config.judge_timeout())
                .await
            {
                Ok(raw) => match parse_object(&raw) {
                    Some(params) if evaluator.validate_params(&params).is_ok() => {
                        ctx.storage
                            .update_evaluation(
                                &evaluation.id,
                                skillopt_core::EvaluationPatch::new().with_params(params),
                            )
                            .await?;
                    }
                    _ => warn!(
                        skill_id,
                        method = %evaluation.method,
                        "regenerated params failed validation; keeping previous pack"
                    ),
                },
                Err(error) => warn!(
                    skill_id,
                    method = %evaluation.method,
                    %error,
                    "param regeneration failed; keeping previous pack"
                ),
            }
        }

        ctx.events
            .emit(event::SKILL_RESET, json!({"skill_id": skill_id}));
        Ok(())
    }

    /// Create the skill's partitions with deterministically seeded
    /// centroids. A no-op when partitions already exist.
    pub async fn provision_partitions(&self, skill_id: &str) -> Result<Vec<Partition>> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;

        let existing = ctx.storage.get_partitions(skill_id).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let k = skill.cluster_count as usize;
        let centroids: Vec<Vec<f32>> =
            if skill.embedding_model.is_some() && skill.embedding_dimensions > 0 {
                partitioner::seeded_centroids(&skill.id, k, skill.embedding_dimensions)
            } else {
                vec![Vec::new(); k]
            };

        let partitions: Vec<Partition> = centroids
            .into_iter()
            .enumerate()
            .map(|(i, centroid)| Partition::new(skill_id, i as u32 + 1, centroid))
            .collect();
        ctx.storage.create_partitions(partitions.clone()).await?;
        Ok(partitions)
    }

    /// Generate the skill's initial arm set: one arm per prompt variant per
    /// partition, replacing any existing arms.
    pub async fn generate_arms(&self, skill_id: &str) -> Result<Vec<Arm>> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;
        let partitions = ctx.storage.get_partitions(skill_id).await?;
        if partitions.is_empty() {
            return Err(EngineError::NoPartitions(skill_id.to_string()));
        }
        arms::generate_for_skill(ctx, &skill, &partitions).await
    }

    /// Synthesize evaluations for a skill from its descriptions alone, one
    /// per requested method with weight 1. Used at skill creation, before
    /// any traffic exists; the rubric bootstrap later rewrites them from
    /// real conversations.
    pub async fn seed_evaluations(
        &self,
        skill_id: &str,
        methods: &[EvaluationMethod],
    ) -> Result<Vec<Evaluation>> {
        let ctx = &self.ctx;
        let skill = ctx
            .storage
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| EngineError::SkillNotFound(skill_id.to_string()))?;

        let mut rows = Vec::with_capacity(methods.len());
        for method in methods {
            let evaluator = evaluator_for(*method);
            let prompt =
                evaluator.params_prompt(&skill.agent_description, &skill.description, None);
            let schema = evaluator.parameter_schema();
            let params = match ctx
                .llm
                .judge(&prompt, Some(&schema), ctx.config.judge_timeout())
                .await
            {
                Ok(raw) => match parse_object(&raw) {
                    Some(params) if evaluator.validate_params(&params).is_ok() => params,
                    _ => evaluator.default_params(&skill.description),
                },
                Err(error) => {
                    warn!(skill_id, method = %method, %error, "seeding params from defaults");
                    evaluator.default_params(&skill.description)
                }
            };
            rows.push(Evaluation::new(skill_id, *method, 1.0, params));
        }

        ctx.storage.create_evaluations(rows.clone()).await?;
        Ok(rows)
    }

    /// Hand reflection and rubric bootstrap to a background task. The
    /// serving path never waits on them; when the global background budget
    /// is exhausted the pass is skipped and the next outcome retries.
    fn dispatch_background(&self, handle: &SelectionHandle) {
        let Ok(permit) = self.ctx.background.clone().try_acquire_owned() else {
            warn!(
                skill_id = %handle.skill_id,
                "background task budget exhausted; skipping learning pass"
            );
            return;
        };

        let ctx = self.ctx.clone();
        let skill_id = handle.skill_id.clone();
        let partition_id = handle.partition_id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // One learning pass at a time per skill within this process;
            // the skill-row locks arbitrate across processes.
            let task_lock = ctx.skill_tasks.entry(&skill_id);
            let _guard = task_lock.lock_owned().await;
            reflection::maybe_reflect(&ctx, &skill_id, &partition_id).await;
            bootstrap::maybe_bootstrap(&ctx, &skill_id).await;
        });
    }
}
