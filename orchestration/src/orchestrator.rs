//! Orchestrator - Drives agents through the cognitive phases of each round
//!
//! Every environment gets its own orchestrator implementing
//! [`EnvironmentOrchestrator`]. Per round an orchestrator:
//! - Runs perception over the whole roster
//! - Runs the action phase, maps raw output to typed actions and steps the environment
//! - Runs reflection over the agents that received an observation
//! - Persists the round's actions, environment state and derived records
//!
//! The shared pieces live in [`OrchestratorServices`].

use crate::agent::{AgentContext, AgentObservation, SharedRoster};
use crate::phase_runner::CognitivePhaseRunner;
use crate::reasoning::{CognitivePhase, RawOutput};
use crate::storage::{ActionRecord, EnvironmentStateRecord, StorageService};
use anyhow::Result;
use async_trait::async_trait;
use common::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Span};
use uuid::Uuid;

/// Where an orchestrator is within its round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorStatus {
    Idle,
    SettingUp,
    Perceiving,
    Acting,
    Reflecting,
}

impl fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorStatus::Idle => "idle",
            OrchestratorStatus::SettingUp => "setting_up",
            OrchestratorStatus::Perceiving => "perceiving",
            OrchestratorStatus::Acting => "acting",
            OrchestratorStatus::Reflecting => "reflecting",
        };
        f.write_str(name)
    }
}

/// Identity and root span of one simulation run
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    span: Span,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            span: info_span!("simulation", run_id = %run_id),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Child span for one environment's orchestrator
    pub fn environment_span(&self, environment: &str) -> Span {
        info_span!(parent: &self.span, "environment", environment = %environment)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level control loop for one environment
#[async_trait]
pub trait EnvironmentOrchestrator: Send {
    fn name(&self) -> &str;

    fn status(&self) -> OrchestratorStatus;

    /// Reset the environment and brief the agents
    async fn setup_environment(&mut self) -> Result<()>;

    /// Run one round, or every remaining round when `round` is `None`
    async fn run_environment(&mut self, round: Option<usize>) -> Result<()>;

    /// Serializable record of a completed round
    fn get_round_summary(&self, round: usize) -> Option<serde_json::Value>;

    fn print_summary(&self);
}

/// Collaborators shared by every orchestrator of a run
#[derive(Clone)]
pub struct OrchestratorServices {
    pub roster: SharedRoster,
    pub runner: Arc<CognitivePhaseRunner>,
    pub storage: Arc<dyn StorageService>,
    pub context: RunContext,
}

impl OrchestratorServices {
    pub fn new(
        roster: SharedRoster,
        runner: Arc<CognitivePhaseRunner>,
        storage: Arc<dyn StorageService>,
        context: RunContext,
    ) -> Self {
        Self {
            roster,
            runner,
            storage,
            context,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.context.run_id()
    }

    pub async fn num_agents(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Snapshot contexts for the given agents (all when `only` is `None`), in roster order
    async fn contexts(
        &self,
        environment: &str,
        phase: CognitivePhase,
        round: usize,
        state: &serde_json::Value,
        only: Option<&HashSet<&str>>,
    ) -> Vec<AgentContext> {
        self.roster
            .read()
            .await
            .iter()
            .filter(|agent| only.map_or(true, |ids| ids.contains(agent.id.as_str())))
            .map(|agent| agent.context(environment, phase, round, state.clone()))
            .collect()
    }

    /// Store each response in its agent's memory
    async fn remember(
        &self,
        environment: &str,
        phase: CognitivePhase,
        round: usize,
        contexts: &[AgentContext],
        outputs: &[Option<RawOutput>],
    ) -> usize {
        let mut roster = self.roster.write().await;
        let mut responded = 0;
        for (context, output) in contexts.iter().zip(outputs) {
            let Some(output) = output else { continue };
            if let Some(agent) = roster.iter_mut().find(|a| a.id == context.agent_id) {
                agent.remember(environment, phase, round, output.text.clone());
                responded += 1;
            }
        }
        responded
    }

    /// Perception over the whole roster. Returns how many agents responded.
    pub async fn run_perception(
        &self,
        environment: &str,
        round: usize,
        state: &serde_json::Value,
    ) -> usize {
        let contexts = self
            .contexts(environment, CognitivePhase::Perception, round, state, None)
            .await;
        let outputs = self.runner.run_phase(&contexts).await;
        let responded = self
            .remember(environment, CognitivePhase::Perception, round, &contexts, &outputs)
            .await;
        debug!(round, responded, agents = contexts.len(), "Perception phase complete");
        responded
    }

    /// Action requests over the whole roster, paired with agent ids in roster order
    pub async fn run_actions(
        &self,
        environment: &str,
        round: usize,
        state: &serde_json::Value,
    ) -> Vec<(AgentId, Option<RawOutput>)> {
        let contexts = self
            .contexts(environment, CognitivePhase::Action, round, state, None)
            .await;
        let outputs = self.runner.run_phase(&contexts).await;
        contexts
            .into_iter()
            .map(|c| c.agent_id)
            .zip(outputs)
            .collect()
    }

    /// Reflection over the agents in `observed` only. No observed agents is a no-op.
    pub async fn run_reflection(
        &self,
        environment: &str,
        round: usize,
        observed: &[AgentId],
        state: &serde_json::Value,
    ) -> usize {
        if observed.is_empty() {
            warn!(round, "No agents received observations, skipping reflection");
            return 0;
        }

        let ids: HashSet<&str> = observed.iter().map(String::as_str).collect();
        let contexts = self
            .contexts(environment, CognitivePhase::Reflection, round, state, Some(&ids))
            .await;
        let outputs = self.runner.run_phase(&contexts).await;
        let responded = self
            .remember(environment, CognitivePhase::Reflection, round, &contexts, &outputs)
            .await;
        debug!(round, responded, agents = contexts.len(), "Reflection phase complete");
        responded
    }

    /// Write each agent's own action and observation slots
    pub async fn update_agents(
        &self,
        actions: Vec<(AgentId, serde_json::Value)>,
        observations: Vec<(AgentId, AgentObservation)>,
    ) {
        let mut roster = self.roster.write().await;
        for (agent_id, action) in actions {
            if let Some(agent) = roster.iter_mut().find(|a| a.id == agent_id) {
                agent.last_action = Some(action);
            }
        }
        for (agent_id, observation) in observations {
            if let Some(agent) = roster.iter_mut().find(|a| a.id == agent_id) {
                agent.last_observation = Some(observation);
            }
        }
    }

    /// Persist action records; failures are logged and swallowed
    pub async fn persist_actions(&self, records: Vec<ActionRecord>) {
        let count = records.len();
        if let Err(e) = self.storage.insert_actions(records).await {
            warn!(count, error = %e, "Failed to persist actions");
        }
    }

    /// Persist an environment snapshot; failures are logged and swallowed
    pub async fn persist_state(&self, record: EnvironmentStateRecord) {
        let round = record.round;
        if let Err(e) = self.storage.insert_environment_state(record).await {
            warn!(round, error = %e, "Failed to persist environment state");
        }
    }
}
