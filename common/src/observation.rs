//! Observations returned by a mechanism step

use crate::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form step metadata (round number, rewards, rejected actions, ...)
pub type StepInfo = serde_json::Map<String, serde_json::Value>;

/// Read-only snapshot delivered to one agent after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObservation<O> {
    pub agent_id: AgentId,
    pub observation: O,
}

impl<O> LocalObservation<O> {
    pub fn new(agent_id: impl Into<AgentId>, observation: O) -> Self {
        Self {
            agent_id: agent_id.into(),
            observation,
        }
    }
}

/// Per-agent observations for one step, keyed by agent id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalObservation<O> {
    pub observations: BTreeMap<AgentId, LocalObservation<O>>,
}

impl<O> Default for GlobalObservation<O> {
    fn default() -> Self {
        Self {
            observations: BTreeMap::new(),
        }
    }
}

impl<O> GlobalObservation<O> {
    pub fn from_local_observations(
        observations: impl IntoIterator<Item = LocalObservation<O>>,
    ) -> Self {
        Self {
            observations: observations
                .into_iter()
                .map(|obs| (obs.agent_id.clone(), obs))
                .collect(),
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<&LocalObservation<O>> {
        self.observations.get(agent_id)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Result of one mechanism step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStep<O> {
    pub global_observation: GlobalObservation<O>,
    pub done: bool,
    #[serde(default)]
    pub info: StepInfo,
}

impl<O> EnvironmentStep<O> {
    pub fn new(global_observation: GlobalObservation<O>, done: bool, info: StepInfo) -> Self {
        Self {
            global_observation,
            done,
            info,
        }
    }

    /// Round number recorded by the mechanism, if any
    pub fn round(&self) -> Option<u64> {
        self.info.get("round").and_then(|v| v.as_u64())
    }
}
