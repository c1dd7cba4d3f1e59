//! Web research orchestrator
//!
//! Each round refreshes the agents' research task with the current query, then
//! runs `sub_rounds` cycles of: perceive, search step, summary step, reflect,
//! persist.

use crate::actions::{empty_summary, parse_search_action, parse_summary_action, ActionParseError};
use crate::agent::AgentObservation;
use crate::orchestrator::{EnvironmentOrchestrator, OrchestratorServices, OrchestratorStatus};
use crate::reasoning::RawOutput;
use crate::storage::{ActionRecord, EnvironmentStateRecord};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{AgentId, GlobalActionBatch, LocalAction};
use environments::{
    EnvironmentWrapper, Mechanism, ResearchAction, ResearchPhase, SearchProvider,
    WebResearchConfig, WebResearchMechanism,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument, Span};
use uuid::Uuid;

/// Environment kind seen by the reasoning service
pub const WEB_RESEARCH: &str = "web_research";

pub struct WebResearchOrchestrator {
    config: WebResearchConfig,
    max_rounds: usize,
    environment: EnvironmentWrapper<WebResearchMechanism>,
    services: OrchestratorServices,
    status: OrchestratorStatus,
    span: Span,
    /// Final summary batch of each round
    summaries: BTreeMap<usize, GlobalActionBatch<ResearchAction>>,
}

impl WebResearchOrchestrator {
    pub fn new(
        config: WebResearchConfig,
        max_rounds: usize,
        provider: Arc<dyn SearchProvider>,
        services: OrchestratorServices,
    ) -> Result<Self> {
        config
            .validate()
            .with_context(|| format!("invalid configuration for {}", config.name))?;

        // two action steps per sub-round
        let max_steps = max_rounds * config.sub_rounds * 2;
        let mechanism = WebResearchMechanism::new(&config, max_steps, provider);
        let span = services.context.environment_span(&config.name);

        Ok(Self {
            environment: EnvironmentWrapper::new(config.name.clone(), mechanism),
            config,
            max_rounds,
            services,
            status: OrchestratorStatus::Idle,
            span,
            summaries: BTreeMap::new(),
        })
    }

    pub fn environment(&self) -> &EnvironmentWrapper<WebResearchMechanism> {
        &self.environment
    }

    fn view(&self) -> serde_json::Value {
        let mechanism = self.environment.mechanism();
        json!({
            "phase": mechanism.phase(),
            "query": mechanism.current_query(),
            "urls_per_query": self.config.urls_per_query,
            "summary_format": self.config.summary_format,
        })
    }

    async fn refresh_tasks(&self) {
        let task = format!(
            "Research the following topic using web search:\n{}",
            self.environment.mechanism().current_query()
        );
        let mut roster = self.services.roster.write().await;
        for agent in roster.iter_mut() {
            agent.task = task.clone();
        }
    }

    async fn run_round(&mut self, round: usize) -> Result<()> {
        info!(round, max_rounds = self.max_rounds, sub_rounds = self.config.sub_rounds, "Starting web research round");
        self.refresh_tasks().await;

        for sub_round in 1..=self.config.sub_rounds {
            if let Err(e) = self.run_sub_round(round, sub_round).await {
                error!(round, sub_round, error = %e, "Sub-round failed, aborting round");
                self.status = OrchestratorStatus::Idle;
                return Err(e.context(format!(
                    "round {} sub-round {} of {} failed",
                    round, sub_round, self.config.name
                )));
            }
        }

        self.status = OrchestratorStatus::Idle;
        info!(round, searches = self.environment.mechanism().search_history().len(), "Web research round complete");
        Ok(())
    }

    async fn run_sub_round(&mut self, round: usize, sub_round: usize) -> Result<()> {
        self.status = OrchestratorStatus::Perceiving;
        self.environment.mechanism_mut().switch_phase(ResearchPhase::Search);
        let view = self.view();
        self.services.run_perception(WEB_RESEARCH, round, &view).await;

        self.status = OrchestratorStatus::Acting;
        let urls_per_query = self.config.urls_per_query;
        let search_fallback = ResearchAction::search(self.config.initial_query.clone(), urls_per_query);
        let searches = self
            .run_action_step(
                round,
                ResearchPhase::Search,
                move |raw| parse_search_action(raw, urls_per_query),
                search_fallback,
            )
            .await?;

        let format = self.config.summary_format;
        let summaries = self
            .run_action_step(
                round,
                ResearchPhase::Summary,
                move |raw| parse_summary_action(raw, format),
                empty_summary(format),
            )
            .await?;

        self.status = OrchestratorStatus::Reflecting;
        let observed: Vec<AgentId> = summaries.agent_ids().map(str::to_string).collect();
        let view = self.view();
        self.services
            .run_reflection(WEB_RESEARCH, round, &observed, &view)
            .await;

        self.process_round_results(round, sub_round, &searches, &summaries)
            .await;
        self.summaries.insert(round, summaries);
        Ok(())
    }

    /// Switch phase, collect and map actions, step the environment
    async fn run_action_step(
        &mut self,
        round: usize,
        phase: ResearchPhase,
        parse: impl Fn(Option<&RawOutput>) -> Result<ResearchAction, ActionParseError> + Send,
        fallback: ResearchAction,
    ) -> Result<GlobalActionBatch<ResearchAction>> {
        self.environment.mechanism_mut().switch_phase(phase);
        let view = self.view();
        let outputs = self.services.run_actions(WEB_RESEARCH, round, &view).await;

        let mut batch = GlobalActionBatch::new();
        for (agent_id, output) in outputs {
            let action = match parse(output.as_ref()) {
                Ok(action) => action,
                Err(e) => {
                    warn!(agent_id = %agent_id, round, phase = %phase, error = %e, "Unusable action output, using fallback");
                    fallback.clone()
                }
            };
            batch.push(LocalAction::new(agent_id, action))?;
        }

        let step = self.environment.step(batch.clone()).await?;

        let actions = batch
            .iter()
            .map(|l| serde_json::to_value(&l.action).map(|v| (l.agent_id.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        let observations = step
            .global_observation
            .observations
            .iter()
            .map(|(id, obs)| (id.clone(), AgentObservation::WebResearch(obs.observation.clone())))
            .collect();
        self.services.update_agents(actions, observations).await;

        Ok(batch)
    }

    async fn process_round_results(
        &self,
        round: usize,
        sub_round: usize,
        searches: &GlobalActionBatch<ResearchAction>,
        summaries: &GlobalActionBatch<ResearchAction>,
    ) {
        let run_id = self.services.run_id();
        let now = Utc::now();

        let records = [("web_search", searches), ("research_summary", summaries)]
            .into_iter()
            .flat_map(|(action_type, batch)| {
                batch.iter().filter_map(move |l| {
                    let action = serde_json::to_value(&l.action).ok()?;
                    Some(ActionRecord {
                        id: Uuid::new_v4(),
                        run_id,
                        agent_id: l.agent_id.clone(),
                        environment_name: self.config.name.clone(),
                        round,
                        sub_round: Some(sub_round),
                        action_type: action_type.to_string(),
                        action,
                        created_at: now,
                    })
                })
            })
            .collect();
        self.services.persist_actions(records).await;

        let snapshot = match self
            .environment
            .global_state()
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::to_value(s).map_err(anyhow::Error::from))
        {
            Ok(state) => state,
            Err(e) => {
                warn!(round, sub_round, error = %e, "Failed to read environment state");
                return;
            }
        };

        self.services
            .persist_state(EnvironmentStateRecord {
                id: Uuid::new_v4(),
                run_id,
                environment_name: self.config.name.clone(),
                round,
                state: snapshot,
                metadata: json!({
                    "num_agents": summaries.len(),
                    "sub_round": sub_round,
                    "query": self.environment.mechanism().current_query(),
                    "timestamp": now,
                }),
                created_at: now,
            })
            .await;
    }
}

#[async_trait]
impl EnvironmentOrchestrator for WebResearchOrchestrator {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn status(&self) -> OrchestratorStatus {
        self.status
    }

    async fn setup_environment(&mut self) -> Result<()> {
        self.status = OrchestratorStatus::SettingUp;
        self.environment.reset();
        self.summaries.clear();

        {
            let mut roster = self.services.roster.write().await;
            for agent in roster.iter_mut() {
                agent.join_environment(&self.config.name);
            }
        }

        info!(
            environment = %self.config.name,
            query = %self.config.initial_query,
            sub_rounds = self.config.sub_rounds,
            "Web research ready"
        );
        self.status = OrchestratorStatus::Idle;
        Ok(())
    }

    async fn run_environment(&mut self, round: Option<usize>) -> Result<()> {
        let span = self.span.clone();
        if let Some(round) = round {
            let next = self.next_round()?;
            ensure!(
                round == next,
                "{} cannot run round {}, next round is {}",
                self.config.name,
                round,
                next
            );
            return self.run_round(round).instrument(span).await;
        }

        while !self.environment.mechanism().is_done() {
            let round = self.next_round()?;
            self.run_round(round).instrument(span.clone()).await?;
        }
        Ok(())
    }

    fn get_round_summary(&self, round: usize) -> Option<serde_json::Value> {
        let summaries = self.summaries.get(&round)?;
        let searches: Vec<_> = self
            .environment
            .mechanism()
            .search_history()
            .iter()
            .filter(|s| self.step_round(s.round) == Some(round))
            .map(|s| json!({"agent_id": s.agent_id, "query": s.query, "num_results": s.results.len()}))
            .collect();

        Some(json!({
            "environment": self.config.name,
            "round": round,
            "searches": searches,
            "summaries": summaries.iter().map(|l| json!({"agent_id": l.agent_id, "action": l.action})).collect::<Vec<_>>(),
        }))
    }

    fn print_summary(&self) {
        let _guard = self.span.enter();
        let mechanism = self.environment.mechanism();
        info!(
            steps = mechanism.current_round(),
            searches = mechanism.search_history().len(),
            query = %mechanism.current_query(),
            "Web research summary"
        );
        for (round, batch) in &self.summaries {
            for local in batch.iter() {
                info!(round, agent_id = %local.agent_id, action = ?local.action, "Research summary");
            }
        }
    }
}

impl WebResearchOrchestrator {
    fn steps_per_round(&self) -> usize {
        self.config.sub_rounds * 2
    }

    /// Orchestrator round that a mechanism step belongs to
    fn step_round(&self, step: usize) -> Option<usize> {
        (step > 0).then(|| (step - 1) / self.steps_per_round() + 1)
    }

    /// The round the mechanism will play next, from its step counter
    fn next_round(&self) -> Result<usize> {
        let mechanism = self.environment.mechanism();
        if mechanism.is_done() {
            bail!(
                "{} already finished all {} rounds",
                self.config.name,
                self.max_rounds
            );
        }
        Ok(mechanism.current_round() / self.steps_per_round() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::services;
    use crate::phase_runner::tests::ScriptedClient;
    use crate::reasoning::HeuristicReasoner;
    use crate::storage::InMemoryStorage;
    use environments::{StaticSearchProvider, SummaryContent, WebSearchResult};

    fn provider() -> Arc<StaticSearchProvider> {
        let doc = |url: &str, title: &str| WebSearchResult {
            url: url.to_string(),
            title: title.to_string(),
            content: format!("{} federal reserve rates outlook", title),
            timestamp: Utc::now(),
        };
        Arc::new(StaticSearchProvider::new(vec![
            doc("https://a.com/1", "Fed minutes"),
            doc("https://b.com/2", "Rate path"),
            doc("https://c.com/3", "Inflation outlook"),
        ]))
    }

    fn config() -> WebResearchConfig {
        WebResearchConfig {
            initial_query: "federal reserve rates".to_string(),
            sub_rounds: 2,
            urls_per_query: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_with_heuristic_agents() {
        let storage = Arc::new(InMemoryStorage::new());
        let services = services(3, Arc::new(HeuristicReasoner::new(4)), storage.clone());
        let mut orchestrator =
            WebResearchOrchestrator::new(config(), 2, provider(), services).unwrap();

        orchestrator.setup_environment().await.unwrap();
        orchestrator.run_environment(None).await.unwrap();

        let mechanism = orchestrator.environment().mechanism();
        // 3 agents * 2 sub-rounds * 2 rounds
        assert_eq!(mechanism.search_history().len(), 12);
        assert!(mechanism.is_done());

        let stats = storage.stats().await;
        assert_eq!(stats.total_actions, 24);
        assert_eq!(stats.total_states, 4);

        let states = storage.environment_states().await;
        assert_eq!(states[1].metadata["sub_round"], 2);

        let summary = orchestrator.get_round_summary(2).unwrap();
        assert_eq!(summary["summaries"].as_array().unwrap().len(), 3);
        assert_eq!(summary["searches"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_rounds_follow_mechanism_steps() {
        let storage = Arc::new(InMemoryStorage::new());
        let services = services(2, Arc::new(HeuristicReasoner::new(4)), storage.clone());
        let mut orchestrator =
            WebResearchOrchestrator::new(config(), 2, provider(), services).unwrap();

        orchestrator.setup_environment().await.unwrap();
        orchestrator.run_environment(Some(1)).await.unwrap();
        assert!(orchestrator.run_environment(Some(3)).await.is_err());
        orchestrator.run_environment(None).await.unwrap();

        let mechanism = orchestrator.environment().mechanism();
        assert!(mechanism.is_done());
        assert_eq!(mechanism.current_round(), mechanism.max_rounds());
        // 2 agents * 2 sub-rounds * (search + summary)
        assert_eq!(storage.actions_for_round("web_research", 1).await.len(), 8);
        assert_eq!(storage.actions_for_round("web_research", 2).await.len(), 8);
        assert!(orchestrator.run_environment(Some(3)).await.is_err());
        assert!(orchestrator.get_round_summary(2).is_some());
    }

    #[tokio::test]
    async fn test_unusable_output_uses_fallbacks() {
        let client = ScriptedClient::default();
        let services = services(2, Arc::new(client), Arc::new(InMemoryStorage::new()));
        let roster = services.roster.clone();
        let mut orchestrator =
            WebResearchOrchestrator::new(config(), 1, provider(), services).unwrap();

        orchestrator.setup_environment().await.unwrap();
        orchestrator.run_environment(Some(1)).await.unwrap();

        let history = orchestrator.environment().mechanism().search_history();
        assert!(history.iter().all(|s| s.query == "federal reserve rates"));

        let summary = orchestrator.get_round_summary(1).unwrap();
        let first = &summary["summaries"][0]["action"];
        assert_eq!(first["action"], "summary");
        assert_eq!(first["content"]["summary"], "");

        let roster = roster.read().await;
        assert!(roster[0].task.contains("federal reserve rates"));
        assert!(matches!(
            roster[0].last_observation,
            Some(AgentObservation::WebResearch(_))
        ));
    }

    #[tokio::test]
    async fn test_summary_phase_actions_are_recorded() {
        let client = ScriptedClient {
            responses: [(
                "agent_0".to_string(),
                json!({"query": "inflation outlook", "content": {"summary": "sticky"}}),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let services = services(1, Arc::new(client), Arc::new(InMemoryStorage::new()));
        let mut orchestrator =
            WebResearchOrchestrator::new(config(), 1, provider(), services).unwrap();

        orchestrator.setup_environment().await.unwrap();
        orchestrator.run_environment(Some(1)).await.unwrap();

        let batch = orchestrator.summaries.get(&1).unwrap();
        match batch.get("agent_0") {
            Some(ResearchAction::Summary {
                content: SummaryContent::Structured(s),
            }) => assert_eq!(s.summary, "sticky"),
            other => panic!("unexpected summary {:?}", other),
        }
        assert_eq!(
            orchestrator.environment().mechanism().current_query(),
            "inflation outlook"
        );
    }
}
