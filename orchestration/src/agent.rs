//! Agent roster
//!
//! Agents are plain records owned by the roster. Each round the orchestrator
//! writes only the agent's own slots (last action, last observation, memory).

use crate::config::LlmConfig;
use crate::reasoning::CognitivePhase;
use anyhow::ensure;
use common::AgentId;
use environments::{PredictionMarketObservation, WebResearchObservation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Roster shared by every orchestrator of a run, in roster order
pub type SharedRoster = Arc<RwLock<Vec<Agent>>>;

/// Last observation an agent received, by environment kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "environment", rename_all = "snake_case")]
pub enum AgentObservation {
    PredictionMarket(PredictionMarketObservation),
    WebResearch(WebResearchObservation),
}

/// One entry of an agent's episodic memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub environment: String,
    pub phase: CognitivePhase,
    pub round: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub llm_config: LlmConfig,
    /// Current instruction for the agent
    pub task: String,
    /// Environments this agent participates in
    pub environments: Vec<String>,
    pub last_action: Option<serde_json::Value>,
    pub last_observation: Option<AgentObservation>,
    pub memory: Vec<MemoryEntry>,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, llm_config: LlmConfig) -> Self {
        Self {
            id: id.into(),
            llm_config,
            task: String::new(),
            environments: Vec::new(),
            last_action: None,
            last_observation: None,
            memory: Vec::new(),
        }
    }

    pub fn join_environment(&mut self, environment: &str) {
        if !self.environments.iter().any(|e| e == environment) {
            self.environments.push(environment.to_string());
        }
    }

    pub fn remember(&mut self, environment: &str, phase: CognitivePhase, round: usize, content: String) {
        self.memory.push(MemoryEntry {
            environment: environment.to_string(),
            phase,
            round,
            content,
        });
    }

    /// Snapshot handed to the reasoning service for one request
    pub fn context(
        &self,
        environment: &str,
        phase: CognitivePhase,
        round: usize,
        environment_state: serde_json::Value,
    ) -> AgentContext {
        AgentContext {
            agent_id: self.id.clone(),
            environment: environment.to_string(),
            phase,
            round,
            task: self.task.clone(),
            llm_config: self.llm_config.clone(),
            last_action: self.last_action.clone(),
            last_observation: self
                .last_observation
                .as_ref()
                .and_then(|o| serde_json::to_value(o).ok()),
            environment_state,
        }
    }
}

/// Owned copy of everything a reasoning request needs.
///
/// Built before fan-out so concurrent requests never touch the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub environment: String,
    pub phase: CognitivePhase,
    pub round: usize,
    pub task: String,
    pub llm_config: LlmConfig,
    pub last_action: Option<serde_json::Value>,
    pub last_observation: Option<serde_json::Value>,
    /// Environment-specific view (market snapshot, research phase, ...)
    pub environment_state: serde_json::Value,
}

/// Build `num_agents` agents with ids `agent_{i}`, assigning LLM configs round-robin
pub fn create_agents(num_agents: usize, llm_configs: &[LlmConfig]) -> anyhow::Result<Vec<Agent>> {
    ensure!(!llm_configs.is_empty(), "at least one llm config is required");

    Ok((0..num_agents)
        .map(|i| Agent::new(format!("agent_{}", i), llm_configs[i % llm_configs.len()].clone()))
        .collect())
}

pub fn shared_roster(agents: Vec<Agent>) -> SharedRoster {
    Arc::new(RwLock::new(agents))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(name: &str) -> LlmConfig {
        LlmConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_agents_round_robin() {
        let agents = create_agents(5, &[llm("a"), llm("b")]).unwrap();

        let ids: Vec<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["agent_0", "agent_1", "agent_2", "agent_3", "agent_4"]);

        let configs: Vec<&str> = agents.iter().map(|a| a.llm_config.name.as_str()).collect();
        assert_eq!(configs, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn test_create_agents_requires_llm_config() {
        assert!(create_agents(2, &[]).is_err());
    }

    #[test]
    fn test_context_is_a_snapshot() {
        let mut agent = Agent::new("agent_0", llm("a"));
        agent.task = "Trade the market".to_string();
        agent.last_action = Some(serde_json::json!({"action_type": "HOLD"}));

        let context = agent.context(
            "prediction_markets",
            CognitivePhase::Action,
            2,
            serde_json::json!({"event_id": "fed"}),
        );
        agent.task.clear();

        assert_eq!(context.task, "Trade the market");
        assert_eq!(context.round, 2);
        assert_eq!(context.last_action.unwrap()["action_type"], "HOLD");
        assert!(context.last_observation.is_none());
    }

    #[test]
    fn test_join_environment_once() {
        let mut agent = Agent::new("agent_0", llm("a"));
        agent.join_environment("web_research");
        agent.join_environment("web_research");
        assert_eq!(agent.environments, vec!["web_research"]);
    }
}
