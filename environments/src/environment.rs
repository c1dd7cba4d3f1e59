//! Lifecycle wrapper around a mechanism: step counter and step history

use crate::mechanism::{Mechanism, MechanismError};
use common::{EnvironmentStep, GlobalActionBatch};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One `(batch, result)` pair recorded by the wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<A, O> {
    pub step: usize,
    pub batch: GlobalActionBatch<A>,
    pub result: EnvironmentStep<O>,
}

pub type EnvironmentHistory<A, O> = Vec<HistoryEntry<A, O>>;

/// Mechanism state merged with the wrapper's own bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub name: String,
    pub current_step: usize,
    pub max_steps: usize,
    pub history: serde_json::Value,
    #[serde(flatten)]
    pub mechanism: serde_json::Map<String, serde_json::Value>,
}

pub struct EnvironmentWrapper<M: Mechanism> {
    name: String,
    mechanism: M,
    current_step: usize,
    max_steps: usize,
    history: EnvironmentHistory<M::Action, M::Observation>,
}

impl<M: Mechanism> EnvironmentWrapper<M> {
    /// Wrap `mechanism`; the step limit defaults to its round limit
    pub fn new(name: impl Into<String>, mechanism: M) -> Self {
        let max_steps = mechanism.max_rounds();
        Self {
            name: name.into(),
            mechanism,
            current_step: 0,
            max_steps,
            history: Vec::new(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn history(&self) -> &[HistoryEntry<M::Action, M::Observation>] {
        &self.history
    }

    pub fn mechanism(&self) -> &M {
        &self.mechanism
    }

    pub fn mechanism_mut(&mut self) -> &mut M {
        &mut self.mechanism
    }

    /// Delegate to the mechanism and record the result.
    /// A failed step leaves the counter and history untouched.
    pub async fn step(
        &mut self,
        batch: GlobalActionBatch<M::Action>,
    ) -> Result<EnvironmentStep<M::Observation>, MechanismError> {
        let result = self.mechanism.step(&batch).await?;
        self.current_step += 1;
        debug!(
            environment = %self.name,
            step = self.current_step,
            done = result.done,
            "Environment stepped"
        );
        self.history.push(HistoryEntry {
            step: self.current_step,
            batch,
            result: result.clone(),
        });
        Ok(result)
    }

    pub fn reset(&mut self) {
        self.current_step = 0;
        self.history.clear();
        self.mechanism.reset();
    }

    pub fn global_state(&self) -> Result<EnvironmentSnapshot, MechanismError> {
        let mechanism = match self.mechanism.global_state()? {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("state".to_string(), other);
                map
            }
        };
        Ok(EnvironmentSnapshot {
            name: self.name.clone(),
            current_step: self.current_step,
            max_steps: self.max_steps,
            history: serde_json::to_value(&self.history)?,
            mechanism,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketState, Outcome};
    use crate::prediction_market::{MarketBet, PredictionMarketAction, PredictionMarketMechanism};
    use common::LocalAction;

    fn wrapper() -> EnvironmentWrapper<PredictionMarketMechanism> {
        let mechanism =
            PredictionMarketMechanism::new(3).with_market(MarketState::binary("event", "Question?"));
        EnvironmentWrapper::new("prediction_markets", mechanism)
    }

    fn batch(event_id: &str) -> GlobalActionBatch<PredictionMarketAction> {
        GlobalActionBatch::from_actions(vec![
            LocalAction::new(
                "agent_0",
                PredictionMarketAction::Bet(MarketBet {
                    event_id: event_id.to_string(),
                    outcome: Outcome::option("Yes"),
                    stake: 10.0,
                    price: None,
                }),
            ),
            LocalAction::new("agent_1", PredictionMarketAction::Hold),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_step_records_history() {
        let mut env = wrapper();
        let result = env.step(batch("event")).await.unwrap();

        assert_eq!(env.current_step(), 1);
        assert_eq!(env.max_steps(), 3);
        assert_eq!(env.history().len(), 1);
        assert_eq!(env.history()[0].result, result);
        assert_eq!(env.history()[0].batch.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let mut env = wrapper();
        assert!(env.step(batch("unknown")).await.is_err());
        assert_eq!(env.current_step(), 0);
        assert!(env.history().is_empty());
    }

    #[tokio::test]
    async fn test_global_state_merges_mechanism_state() {
        let mut env = wrapper();
        env.step(batch("event")).await.unwrap();

        let snapshot = env.global_state().unwrap();
        assert_eq!(snapshot.current_step, 1);
        assert_eq!(snapshot.mechanism["current_round"], 1);
        assert_eq!(snapshot.history.as_array().map(|h| h.len()), Some(1));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "prediction_markets");
        assert_eq!(json["max_rounds"], 3);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut env = wrapper();
        env.step(batch("event")).await.unwrap();
        env.reset();

        assert_eq!(env.current_step(), 0);
        assert!(env.history().is_empty());
        assert_eq!(env.mechanism().current_round(), 0);
    }
}
