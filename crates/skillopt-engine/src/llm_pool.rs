//! Bounded LLM call pool
//!
//! Every upstream call the engine makes — embeddings, judge scoring, prompt
//! generation — funnels through this wrapper, which enforces a global
//! concurrency bound and a per-call deadline. Callers decide what a missed
//! deadline means; the pool just reports it as an error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;

use skillopt_core::LlmClient;

/// Concurrency-bounded, deadline-enforcing wrapper around an [`LlmClient`].
#[derive(Clone)]
pub struct LlmPool {
    client: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
}

impl LlmPool {
    /// Wrap a client with the given concurrency bound.
    pub fn new(client: Arc<dyn LlmClient>, concurrency: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Embed a text, waiting for a permit first. The deadline covers the
    /// upstream call only, not the permit wait.
    pub async fn embed(&self, text: &str, model: &str, deadline: Duration) -> Result<Vec<f32>> {
        let _permit = self.permits.acquire().await?;
        tokio::time::timeout(deadline, self.client.embed(text, model))
            .await
            .map_err(|_| anyhow!("embedding call exceeded {}s deadline", deadline.as_secs()))?
    }

    /// Ask the judge/generator model for a completion, bounded and deadlined.
    pub async fn judge(
        &self,
        prompt: &str,
        json_schema: Option<&serde_json::Value>,
        deadline: Duration,
    ) -> Result<String> {
        let _permit = self.permits.acquire().await?;
        tokio::time::timeout(deadline, self.client.judge(prompt, json_schema))
            .await
            .map_err(|_| anyhow!("judge call exceeded {}s deadline", deadline.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowClient {
        delay_ms: u64,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowClient {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        async fn tick(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>> {
            self.tick().await;
            Ok(vec![1.0, 0.0])
        }

        async fn judge(
            &self,
            _prompt: &str,
            _schema: Option<&serde_json::Value>,
        ) -> Result<String> {
            self.tick().await;
            Ok("{\"score\": 0.5}".to_string())
        }
    }

    #[tokio::test]
    async fn test_deadline_enforced() {
        let pool = LlmPool::new(Arc::new(SlowClient::new(200)), 4);
        let result = pool.embed("hi", "model", Duration::from_millis(10)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn test_call_within_deadline_succeeds() {
        let pool = LlmPool::new(Arc::new(SlowClient::new(5)), 4);
        let embedding = pool
            .embed("hi", "model", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let client = Arc::new(SlowClient::new(20));
        let pool = LlmPool::new(client.clone(), 2);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.judge("q", None, Duration::from_secs(1)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(client.peak.load(Ordering::SeqCst) <= 2);
    }
}
