//! The mechanism trait: one environment's round-transition rules

use async_trait::async_trait;
use common::{BatchError, EnvironmentStep, GlobalActionBatch};
use serde::Serialize;
use thiserror::Error;

/// Fatal mechanism errors. These abort the current round.
///
/// Per-action problems (bad outcome, bad stake, wrong phase) never surface here;
/// mechanisms log and skip them.
#[derive(Debug, Error)]
pub enum MechanismError {
    #[error("no market configuration found for event {0}")]
    MissingMarketConfig(String),

    #[error("invalid market configuration for event {event_id}: {source}")]
    InvalidMarketConfig {
        event_id: String,
        #[source]
        source: crate::config::ConfigError,
    },

    #[error("mechanism already finished all {0} rounds")]
    RoundLimitReached(usize),

    #[error("failed to assemble action batch: {0}")]
    Batch(#[from] BatchError),

    #[error("failed to serialize mechanism state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A deterministic reducer from a batch of actions to a new shared state.
///
/// `step` is never called concurrently for the same instance; callers hold
/// `&mut self` for its whole duration.
#[async_trait]
pub trait Mechanism: Send + Sync {
    /// Per-agent action payload accepted by this mechanism
    type Action: Clone + Serialize + Send + Sync;

    /// Per-agent observation payload produced by this mechanism
    type Observation: Clone + Serialize + Send + Sync;

    /// Reduce one batch in roster order and advance the round counter
    async fn step(
        &mut self,
        batch: &GlobalActionBatch<Self::Action>,
    ) -> Result<EnvironmentStep<Self::Observation>, MechanismError>;

    /// Return to round zero
    fn reset(&mut self);

    /// Serializable view of the mechanism state
    fn global_state(&self) -> Result<serde_json::Value, MechanismError>;

    fn current_round(&self) -> usize;

    fn max_rounds(&self) -> usize;

    /// True once `current_round >= max_rounds`
    fn is_done(&self) -> bool {
        self.current_round() >= self.max_rounds()
    }

    /// The most recent step result
    fn last_step(&self) -> Option<&EnvironmentStep<Self::Observation>>;
}
