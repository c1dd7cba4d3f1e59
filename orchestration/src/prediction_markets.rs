//! Prediction market orchestrator

use crate::actions::parse_market_action;
use crate::agent::AgentObservation;
use crate::orchestrator::{EnvironmentOrchestrator, OrchestratorServices, OrchestratorStatus};
use crate::storage::{ActionRecord, EnvironmentStateRecord};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{AgentId, EnvironmentStep, GlobalActionBatch, LocalAction};
use environments::{
    EnvironmentWrapper, MarketConfig, Mechanism, PredictionMarketAction,
    PredictionMarketMechanism, PredictionMarketObservation, ResolutionPolicy,
};
use serde_json::json;
use tracing::{error, info, warn, Instrument, Span};
use uuid::Uuid;

/// Environment kind seen by the reasoning service
pub const PREDICTION_MARKETS: &str = "prediction_markets";

/// Action type recorded for every market action
const ACTION_TYPE: &str = "prediction_market_bet";

pub struct PredictionMarketOrchestrator {
    config: MarketConfig,
    max_rounds: usize,
    environment: EnvironmentWrapper<PredictionMarketMechanism>,
    services: OrchestratorServices,
    status: OrchestratorStatus,
    span: Span,
}

impl PredictionMarketOrchestrator {
    pub fn new(
        config: MarketConfig,
        max_rounds: usize,
        services: OrchestratorServices,
    ) -> Result<Self> {
        let mechanism = PredictionMarketMechanism::from_config(config.clone(), max_rounds)
            .with_context(|| format!("failed to create market {}", config.name))?;
        let span = services.context.environment_span(&config.name);

        Ok(Self {
            environment: EnvironmentWrapper::new(config.name.clone(), mechanism),
            config,
            max_rounds,
            services,
            status: OrchestratorStatus::Idle,
            span,
        })
    }

    pub fn with_resolution_policy(mut self, policy: Box<dyn ResolutionPolicy>) -> Self {
        self.environment.mechanism_mut().set_resolution_policy(policy);
        self
    }

    pub fn environment(&self) -> &EnvironmentWrapper<PredictionMarketMechanism> {
        &self.environment
    }

    /// The round the mechanism will play next; rounds always follow its counter
    fn next_round(&self) -> Result<usize> {
        let mechanism = self.environment.mechanism();
        if mechanism.is_done() {
            bail!(
                "{} already finished all {} rounds",
                self.config.name,
                mechanism.max_rounds()
            );
        }
        Ok(mechanism.current_round() + 1)
    }

    fn event_id(&self) -> &str {
        &self.config.name
    }

    /// Snapshot handed to agents: every market, including lazily created ones
    fn market_view(&self) -> serde_json::Value {
        json!({
            "event_id": self.event_id(),
            "markets": self.environment.mechanism().markets(),
        })
    }

    fn task(&self) -> String {
        let mut task = format!(
            "You are participating in a prediction market.\nMarket: {}",
            self.config.market
        );
        if !self.config.description.is_empty() {
            task.push_str(&format!("\nDescription: {}", self.config.description));
        }
        if !self.config.resolution_criteria.is_empty() {
            task.push_str(&format!("\nResolution criteria: {}", self.config.resolution_criteria));
        }
        if !self.config.resolution_date.is_empty() {
            task.push_str(&format!("\nResolves on: {}", self.config.resolution_date));
        }
        task.push_str(&format!(
            "\nBets must be between {} and {}. Respond with a BET or HOLD action.",
            self.config.min_bet, self.config.max_bet
        ));
        task
    }

    async fn run_round(&mut self, round: usize) -> Result<()> {
        info!(round, max_rounds = self.max_rounds, "Starting prediction market round");

        self.status = OrchestratorStatus::Perceiving;
        let view = self.market_view();
        self.services.run_perception(PREDICTION_MARKETS, round, &view).await;

        self.status = OrchestratorStatus::Acting;
        let (batch, step) = match self.run_action_phase(round, &view).await {
            Ok(result) => result,
            Err(e) => {
                error!(round, error = %e, "Action phase failed, aborting round");
                self.status = OrchestratorStatus::Idle;
                return Err(e.context(format!("round {} of {} failed", round, self.config.name)));
            }
        };

        self.status = OrchestratorStatus::Reflecting;
        let observed: Vec<AgentId> = batch
            .agent_ids()
            .filter(|id| step.global_observation.get(id).is_some())
            .map(str::to_string)
            .collect();
        let view = self.market_view();
        self.services
            .run_reflection(PREDICTION_MARKETS, round, &observed, &view)
            .await;

        self.process_round_results(round, &batch).await;
        self.status = OrchestratorStatus::Idle;

        info!(round, done = step.done, "Prediction market round complete");
        Ok(())
    }

    async fn run_action_phase(
        &mut self,
        round: usize,
        view: &serde_json::Value,
    ) -> Result<(
        GlobalActionBatch<PredictionMarketAction>,
        EnvironmentStep<PredictionMarketObservation>,
    )> {
        let outputs = self.services.run_actions(PREDICTION_MARKETS, round, view).await;

        let mut batch = GlobalActionBatch::new();
        for (agent_id, output) in outputs {
            let action = match parse_market_action(output.as_ref(), self.event_id()) {
                Ok(action) => action,
                Err(e) => {
                    warn!(agent_id = %agent_id, round, error = %e, "Unusable action output, holding");
                    PredictionMarketAction::Hold
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
            .map(|(id, obs)| {
                (id.clone(), AgentObservation::PredictionMarket(obs.observation.clone()))
            })
            .collect();
        self.services.update_agents(actions, observations).await;

        Ok((batch, step))
    }

    async fn process_round_results(
        &self,
        round: usize,
        batch: &GlobalActionBatch<PredictionMarketAction>,
    ) {
        let run_id = self.services.run_id();
        let now = Utc::now();

        let records = batch
            .iter()
            .filter_map(|l| {
                let action = serde_json::to_value(&l.action).ok()?;
                Some(ActionRecord {
                    id: Uuid::new_v4(),
                    run_id,
                    agent_id: l.agent_id.clone(),
                    environment_name: self.config.name.clone(),
                    round,
                    sub_round: None,
                    action_type: ACTION_TYPE.to_string(),
                    action,
                    created_at: now,
                })
            })
            .collect();
        self.services.persist_actions(records).await;

        match self.environment.global_state() {
            Ok(snapshot) => {
                let market = self.environment.mechanism().market(self.event_id());
                let metadata = json!({
                    "num_agents": batch.len(),
                    "market_topic": self.config.market,
                    "timestamp": now,
                    "current_prices": market.map(|m| &m.current_prices),
                    "total_liquidity": market.map(|m| m.total_liquidity),
                });
                match serde_json::to_value(&snapshot) {
                    Ok(state) => {
                        self.services
                            .persist_state(EnvironmentStateRecord {
                                id: Uuid::new_v4(),
                                run_id,
                                environment_name: self.config.name.clone(),
                                round,
                                state,
                                metadata,
                                created_at: now,
                            })
                            .await
                    }
                    Err(e) => warn!(round, error = %e, "Failed to serialize environment state"),
                }
            }
            Err(e) => warn!(round, error = %e, "Failed to read environment state"),
        }

        let trades = self.environment.mechanism().last_trades().to_vec();
        if !trades.is_empty() {
            let count = trades.len();
            if let Err(e) = self.services.storage.insert_trades(run_id, trades).await {
                warn!(round, count, error = %e, "Failed to persist trades");
            }
        }
    }
}

#[async_trait]
impl EnvironmentOrchestrator for PredictionMarketOrchestrator {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn status(&self) -> OrchestratorStatus {
        self.status
    }

    async fn setup_environment(&mut self) -> Result<()> {
        self.status = OrchestratorStatus::SettingUp;
        self.environment.reset();

        let task = self.task();
        {
            let mut roster = self.services.roster.write().await;
            for agent in roster.iter_mut() {
                agent.task = task.clone();
                agent.join_environment(&self.config.name);
            }
        }

        info!(
            environment = %self.config.name,
            market = %self.config.market,
            market_type = %self.config.market_type,
            "Prediction market ready"
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
        let summary = self.environment.mechanism().round_summary(round)?;
        let step = self
            .environment
            .history()
            .iter()
            .find(|entry| entry.result.round() == Some(round as u64));

        Some(json!({
            "environment": self.config.name,
            "round": round,
            "actions": serde_json::to_value(&summary.actions).ok()?,
            "market_states": step.and_then(|s| s.result.info.get("market_states").cloned()),
            "rejected_actions": step.and_then(|s| s.result.info.get("rejected_actions").cloned()),
            "done": step.map(|s| s.result.done),
        }))
    }

    fn print_summary(&self) {
        let _guard = self.span.enter();
        let mechanism = self.environment.mechanism();
        info!(
            rounds = mechanism.current_round(),
            max_rounds = mechanism.max_rounds(),
            "Prediction market summary"
        );
        for market in mechanism.markets().values() {
            info!(
                event_id = %market.event_id,
                question = %market.question,
                prices = ?market.current_prices,
                total_staked = market.total_staked(),
                resolved = market.resolved,
                outcome = ?market.outcome,
                "Market"
            );
        }
    }
}
