//! Shared fixtures for the integration suites
//!
//! A harness wires a [`SkillOptimizer`] to in-memory connectors, a scripted
//! LLM double, and a capturing event sink. Tests play the role of the
//! surrounding proxy: they drive selections, append log records, and record
//! outcomes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use skillopt_core::{
    Arm, ArmParams, CapturingSink, ChatMessage, InMemoryLogStore, InMemoryStorage,
    InvocationRequest, LlmClient, Partition, RequestRecord, SelectionHandle, Skill,
    StorageConnector,
};
use skillopt_engine::SkillOptimizer;

/// Deterministic LLM double driven by closures.
pub struct TestLlm {
    embed_fn: Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>,
    judge_fn: Box<dyn Fn(&str) -> String + Send + Sync>,
    embed_calls: AtomicUsize,
    judge_calls: AtomicUsize,
}

impl TestLlm {
    pub fn new() -> Self {
        Self {
            embed_fn: Box::new(|_| vec![1.0, 0.0]),
            judge_fn: Box::new(|_| r#"{"score": 0.7}"#.to_string()),
            embed_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_embed(mut self, f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        self.embed_fn = Box::new(f);
        self
    }

    pub fn with_judge(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.judge_fn = Box::new(f);
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn judge_calls(&self) -> usize {
        self.judge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for TestLlm {
    async fn embed(&self, text: &str, _model: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.embed_fn)(text))
    }

    async fn judge(
        &self,
        prompt: &str,
        _json_schema: Option<&serde_json::Value>,
    ) -> anyhow::Result<String> {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.judge_fn)(prompt))
    }
}

/// An engine over in-memory backends with handles into all of them.
pub struct Harness {
    pub optimizer: Arc<SkillOptimizer>,
    pub storage: Arc<InMemoryStorage>,
    pub logs: Arc<InMemoryLogStore>,
    pub events: Arc<CapturingSink>,
    pub llm: Arc<TestLlm>,
    pub skill: Skill,
}

/// Build a harness around one skill.
pub fn harness(skill: Skill, llm: TestLlm) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let storage = Arc::new(InMemoryStorage::new());
    let logs = Arc::new(InMemoryLogStore::new());
    let events = Arc::new(CapturingSink::new());
    let llm = Arc::new(llm);

    storage.insert_skill(skill.clone());

    let optimizer = SkillOptimizer::new(storage.clone(), logs.clone(), llm.clone())
        .with_events(events.clone());

    Harness {
        optimizer: Arc::new(optimizer),
        storage,
        logs,
        events,
        llm,
        skill,
    }
}

/// Create one partition with the given centroid and one zero-stats arm per
/// prompt, in insertion order.
pub async fn seed_partition_with_arms(
    h: &Harness,
    index: u32,
    centroid: Vec<f32>,
    prompts: &[&str],
) -> (Partition, Vec<Arm>) {
    let partition = Partition::new(&h.skill.id, index, centroid);
    h.storage
        .create_partitions(vec![partition.clone()])
        .await
        .unwrap();

    let arms: Vec<Arm> = prompts
        .iter()
        .map(|prompt| {
            Arm::new(
                &partition.id,
                &h.skill.id,
                ArmParams::new(&h.skill.model_id, *prompt),
            )
        })
        .collect();
    h.storage.create_arms(arms.clone()).await.unwrap();

    (partition, arms)
}

/// Play one full request through the engine: select, log (as the proxy
/// would), and record the outcome. Returns the handle, or `None` when the
/// call was served without one.
pub async fn drive(
    h: &Harness,
    text: &str,
    log_embedding: Option<Vec<f32>>,
) -> Option<SelectionHandle> {
    let request = InvocationRequest::chat(vec![ChatMessage::user(text)]);
    let selection = h
        .optimizer
        .select_arm_for_request(&h.skill.id, &request)
        .await
        .unwrap();
    let handle = selection.handle?;

    let response = json!({"choices": [{"message": {"content": "ok"}}]});
    let mut record = RequestRecord::new(&h.skill.id, request.messages.clone())
        .with_partition(&handle.partition_id)
        .with_arm(&handle.arm_id)
        .with_response(response.clone());
    if let Some(embedding) = log_embedding {
        record = record.with_embedding(embedding);
    }
    h.logs.append(record);

    h.optimizer.record_outcome(&handle, &response).await.unwrap();
    Some(handle)
}

/// Poll a condition until it holds or the timeout passes. Background tasks
/// are fire-and-forget, so tests observe their effects this way.
pub async fn eventually(condition: impl Fn() -> bool, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait out a window and assert the condition never flips; for "exactly
/// once" style checks.
pub async fn never_within(condition: impl Fn() -> bool, window_ms: u64) -> bool {
    !eventually(condition, window_ms).await
}
