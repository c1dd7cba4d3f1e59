//! Cognitive phase runner
//!
//! Fans one reasoning request per agent out concurrently and returns the results
//! aligned with the input order. A failed or timed-out request yields `None` for
//! that slot only.

use crate::agent::AgentContext;
use crate::rate_limit::RateLimiter;
use crate::reasoning::{RawOutput, ReasoningClient, ReasoningError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CognitivePhaseRunner {
    client: Arc<dyn ReasoningClient>,
    limiter: Arc<RateLimiter>,
    request_timeout: Duration,
}

impl CognitivePhaseRunner {
    pub fn new(
        client: Arc<dyn ReasoningClient>,
        limiter: Arc<RateLimiter>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            request_timeout,
        }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// One result per context, `results[i]` belonging to `contexts[i]`
    pub async fn run_phase(&self, contexts: &[AgentContext]) -> Vec<Option<RawOutput>> {
        let requests = contexts.iter().map(|context| async move {
            match self.request(context).await {
                Ok(output) => {
                    debug!(
                        agent_id = %context.agent_id,
                        phase = %context.phase,
                        environment = %context.environment,
                        "Agent responded"
                    );
                    Some(output)
                }
                Err(e) => {
                    warn!(
                        agent_id = %context.agent_id,
                        phase = %context.phase,
                        environment = %context.environment,
                        error = %e,
                        "Agent request failed"
                    );
                    None
                }
            }
        });

        // join_all yields in input order regardless of completion order
        join_all(requests).await
    }

    async fn request(&self, context: &AgentContext) -> Result<RawOutput, ReasoningError> {
        let _permit = self
            .limiter
            .acquire(u64::from(context.llm_config.max_tokens))
            .await?;

        tokio::time::timeout(self.request_timeout, self.client.request_decision(context))
            .await
            .map_err(|_| ReasoningError::Timeout(self.request_timeout))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::{LlmConfig, RateLimitConfig};
    use crate::reasoning::CognitivePhase;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client: per-agent delay and response, failures for listed agents
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub delays: HashMap<String, Duration>,
        pub responses: HashMap<String, Value>,
        pub failing: Vec<String>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningClient for ScriptedClient {
        async fn request_decision(
            &self,
            context: &AgentContext,
        ) -> Result<RawOutput, ReasoningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&context.agent_id) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(&context.agent_id) {
                return Err(ReasoningError::Request("service unavailable".into()));
            }
            let value = self
                .responses
                .get(&context.agent_id)
                .cloned()
                .unwrap_or_else(|| json!({"agent": context.agent_id}));
            Ok(RawOutput::json(value))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn runner(client: Arc<dyn ReasoningClient>, timeout_secs: u64) -> CognitivePhaseRunner {
        CognitivePhaseRunner::new(
            client,
            Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            Duration::from_secs(timeout_secs),
        )
    }

    fn contexts(n: usize) -> Vec<AgentContext> {
        (0..n)
            .map(|i| {
                Agent::new(format!("agent_{}", i), LlmConfig::default()).context(
                    "prediction_markets",
                    CognitivePhase::Action,
                    1,
                    Value::Null,
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_aligned_with_roster() {
        let mut client = ScriptedClient::default();
        // later agents finish first
        for i in 0..4u64 {
            client
                .delays
                .insert(format!("agent_{}", i), Duration::from_millis(400 - i * 100));
        }
        let runner = runner(Arc::new(client), 30);

        let results = runner.run_phase(&contexts(4)).await;

        let agents: Vec<String> = results
            .iter()
            .map(|r| r.as_ref().unwrap().json.as_ref().unwrap()["agent"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(agents, vec!["agent_0", "agent_1", "agent_2", "agent_3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_isolated_to_one_slot() {
        let client = ScriptedClient {
            failing: vec!["agent_1".to_string()],
            ..Default::default()
        };
        let runner = runner(Arc::new(client), 30);

        let results = runner.run_phase(&contexts(3)).await;
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_none() {
        let mut client = ScriptedClient::default();
        client
            .delays
            .insert("agent_2".to_string(), Duration::from_secs(120));
        let runner = runner(Arc::new(client), 10);

        let results = runner.run_phase(&contexts(3)).await;
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 2);
        assert!(results[2].is_none());
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let runner = runner(Arc::new(ScriptedClient::default()), 10);
        assert!(runner.run_phase(&[]).await.is_empty());
    }
}
