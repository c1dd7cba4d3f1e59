//! Prediction market mechanism
//!
//! Each round the mechanism:
//! 1. Applies every agent's bet in roster order (HOLDs are only recorded)
//! 2. Appends the round's actions to the round summary
//! 3. Resolves all open markets once the round limit is reached
//! 4. Hands every participating agent the same snapshot of all markets
//!
//! A bad bet is logged and recorded as rejected; it never aborts the round.

use crate::config::MarketConfig;
use crate::market::{MarketState, Outcome};
use crate::mechanism::{Mechanism, MechanismError};
use crate::resolution::{RandomResolution, ResolutionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AgentId, EnvironmentStep, GlobalActionBatch, GlobalObservation, LocalObservation, StepInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kind of market action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Bet,
    Hold,
}

/// A stake on one outcome of one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBet {
    pub event_id: String,
    pub outcome: Outcome,
    pub stake: f64,
    /// Price/probability the agent believes in
    #[serde(default)]
    pub price: Option<f64>,
}

/// Typed action accepted by the prediction market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionMarketAction {
    Bet(MarketBet),
    Hold,
}

impl PredictionMarketAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            PredictionMarketAction::Bet(_) => ActionType::Bet,
            PredictionMarketAction::Hold => ActionType::Hold,
        }
    }
}

/// What one agent's action did in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub agent_id: AgentId,
    /// The action that took effect; a rejected bet is recorded as HOLD
    pub action: PredictionMarketAction,
    /// Why the submitted bet was rejected, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

/// Audit record of one round, in roster order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    pub actions: Vec<RecordedAction>,
}

/// An applied bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub round: usize,
    pub agent_id: AgentId,
    pub event_id: String,
    pub outcome: Outcome,
    pub stake: f64,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of every market, shared by all agents after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMarketObservation {
    pub round: usize,
    pub markets: BTreeMap<String, MarketState>,
    pub timestamp: DateTime<Utc>,
}

/// Prediction market mechanism over one or more markets
pub struct PredictionMarketMechanism {
    max_rounds: usize,
    current_round: usize,
    markets: BTreeMap<String, MarketState>,
    initial_markets: BTreeMap<String, MarketState>,
    /// Template for markets referenced by bets but not yet created
    market_config: Option<MarketConfig>,
    round_summaries: Vec<RoundSummary>,
    last_trades: Vec<Trade>,
    last_step: Option<EnvironmentStep<PredictionMarketObservation>>,
    resolution: Box<dyn ResolutionPolicy>,
}

impl PredictionMarketMechanism {
    /// An empty mechanism; markets must be added with [`Self::with_market`]
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds,
            current_round: 0,
            markets: BTreeMap::new(),
            initial_markets: BTreeMap::new(),
            market_config: None,
            round_summaries: Vec::new(),
            last_trades: Vec::new(),
            last_step: None,
            resolution: Box::new(RandomResolution::new()),
        }
    }

    /// Seed the market described by `config` and keep it as the template for new events
    pub fn from_config(config: MarketConfig, max_rounds: usize) -> Result<Self, MechanismError> {
        let market = config
            .build_market(&config.name)
            .map_err(|source| MechanismError::InvalidMarketConfig {
                event_id: config.name.clone(),
                source,
            })?;

        let mut mechanism = Self::new(max_rounds).with_market(market);
        mechanism.market_config = Some(config);
        Ok(mechanism)
    }

    pub fn with_market(mut self, market: MarketState) -> Self {
        self.initial_markets
            .insert(market.event_id.clone(), market.clone());
        self.markets.insert(market.event_id.clone(), market);
        self
    }

    pub fn with_resolution_policy(mut self, policy: Box<dyn ResolutionPolicy>) -> Self {
        self.resolution = policy;
        self
    }

    pub fn set_resolution_policy(&mut self, policy: Box<dyn ResolutionPolicy>) {
        self.resolution = policy;
    }

    /// Create the market for `event_id` from the template configuration
    pub fn initialize_market(&mut self, event_id: &str) -> Result<(), MechanismError> {
        let config = self
            .market_config
            .as_ref()
            .ok_or_else(|| MechanismError::MissingMarketConfig(event_id.to_string()))?;

        let market =
            config
                .build_market(event_id)
                .map_err(|source| MechanismError::InvalidMarketConfig {
                    event_id: event_id.to_string(),
                    source,
                })?;

        info!(event_id = %event_id, market_type = %market.market_type, "Initialized market");
        self.markets.insert(event_id.to_string(), market);
        Ok(())
    }

    pub fn markets(&self) -> &BTreeMap<String, MarketState> {
        &self.markets
    }

    pub fn market(&self, event_id: &str) -> Option<&MarketState> {
        self.markets.get(event_id)
    }

    pub fn round_summaries(&self) -> &[RoundSummary] {
        &self.round_summaries
    }

    pub fn round_summary(&self, round: usize) -> Option<&RoundSummary> {
        self.round_summaries.iter().find(|s| s.round == round)
    }

    /// Trades applied in the most recent step
    pub fn last_trades(&self) -> &[Trade] {
        &self.last_trades
    }

    pub fn market_config(&self) -> Option<&MarketConfig> {
        self.market_config.as_ref()
    }

    /// Settle every open market using the resolution policy
    pub fn resolve_markets(&mut self) {
        for market in self.markets.values_mut() {
            if market.resolved {
                continue;
            }
            match self.resolution.choose_outcome(market) {
                Some(outcome) => match market.resolve(outcome) {
                    Ok(_) => info!(
                        event_id = %market.event_id,
                        outcome = ?market.outcome,
                        policy = self.resolution.name(),
                        "Market resolved"
                    ),
                    Err(e) => warn!(
                        event_id = %market.event_id,
                        error = %e,
                        "Resolution policy produced an invalid outcome"
                    ),
                },
                None => warn!(
                    event_id = %market.event_id,
                    policy = self.resolution.name(),
                    "Resolution policy left market open"
                ),
            }
        }
    }

    /// Create any markets the batch references but that do not exist yet.
    /// Fails before any state is touched if one cannot be created.
    fn ensure_markets(
        &mut self,
        batch: &GlobalActionBatch<PredictionMarketAction>,
    ) -> Result<(), MechanismError> {
        for local in batch.iter() {
            if let PredictionMarketAction::Bet(bet) = &local.action {
                if !self.markets.contains_key(&bet.event_id) {
                    self.initialize_market(&bet.event_id)?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Mechanism for PredictionMarketMechanism {
    type Action = PredictionMarketAction;
    type Observation = PredictionMarketObservation;

    async fn step(
        &mut self,
        batch: &GlobalActionBatch<PredictionMarketAction>,
    ) -> Result<EnvironmentStep<PredictionMarketObservation>, MechanismError> {
        if self.is_done() {
            return Err(MechanismError::RoundLimitReached(self.max_rounds));
        }
        self.ensure_markets(batch)?;

        self.current_round += 1;
        let round = self.current_round;
        let now = Utc::now();

        let mut recorded = Vec::with_capacity(batch.len());
        let mut rejected = Vec::new();
        let mut trades = Vec::new();

        for local in batch.iter() {
            let bet = match &local.action {
                PredictionMarketAction::Hold => {
                    debug!(agent_id = %local.agent_id, round, "Agent holds");
                    recorded.push(RecordedAction {
                        agent_id: local.agent_id.clone(),
                        action: PredictionMarketAction::Hold,
                        rejected: None,
                    });
                    continue;
                }
                PredictionMarketAction::Bet(bet) => bet,
            };

            let market = self
                .markets
                .get_mut(&bet.event_id)
                .ok_or_else(|| MechanismError::MissingMarketConfig(bet.event_id.clone()))?;

            match market.update_with_bet(&bet.outcome, bet.stake, bet.price) {
                Ok(()) => {
                    debug!(
                        agent_id = %local.agent_id,
                        event_id = %bet.event_id,
                        outcome = %bet.outcome,
                        stake = bet.stake,
                        "Bet applied"
                    );
                    trades.push(Trade {
                        id: Uuid::new_v4(),
                        round,
                        agent_id: local.agent_id.clone(),
                        event_id: bet.event_id.clone(),
                        outcome: bet.outcome.clone(),
                        stake: bet.stake,
                        price: bet.price,
                        timestamp: now,
                    });
                    recorded.push(RecordedAction {
                        agent_id: local.agent_id.clone(),
                        action: local.action.clone(),
                        rejected: None,
                    });
                }
                Err(e) => {
                    warn!(
                        agent_id = %local.agent_id,
                        event_id = %bet.event_id,
                        error = %e,
                        "Rejected bet"
                    );
                    rejected.push(json!({
                        "agent_id": local.agent_id,
                        "reason": e.to_string(),
                    }));
                    recorded.push(RecordedAction {
                        agent_id: local.agent_id.clone(),
                        action: PredictionMarketAction::Hold,
                        rejected: Some(e.to_string()),
                    });
                }
            }
        }

        self.round_summaries.push(RoundSummary {
            round,
            actions: recorded,
        });
        self.last_trades = trades;

        let done = self.current_round >= self.max_rounds;
        if done {
            self.resolve_markets();
        }

        let snapshot = PredictionMarketObservation {
            round,
            markets: self.markets.clone(),
            timestamp: now,
        };
        let global_observation = GlobalObservation::from_local_observations(
            batch
                .agent_ids()
                .map(|agent_id| LocalObservation::new(agent_id, snapshot.clone())),
        );

        let agent_rewards: BTreeMap<&str, f64> = batch.agent_ids().map(|id| (id, 1.0)).collect();
        let mut info = StepInfo::new();
        info.insert("round".to_string(), json!(round));
        info.insert("agent_rewards".to_string(), serde_json::to_value(agent_rewards)?);
        info.insert("market_states".to_string(), serde_json::to_value(&self.markets)?);
        info.insert("rejected_actions".to_string(), json!(rejected));

        let step = EnvironmentStep::new(global_observation, done, info);
        self.last_step = Some(step.clone());
        Ok(step)
    }

    fn reset(&mut self) {
        self.current_round = 0;
        self.markets = self.initial_markets.clone();
        self.round_summaries.clear();
        self.last_trades.clear();
        self.last_step = None;
    }

    fn global_state(&self) -> Result<serde_json::Value, MechanismError> {
        Ok(json!({
            "current_round": self.current_round,
            "max_rounds": self.max_rounds,
            "markets": serde_json::to_value(&self.markets)?,
            "round_summaries": serde_json::to_value(&self.round_summaries)?,
            "round_summaries_count": self.round_summaries.len(),
            "last_step": serde_json::to_value(&self.last_step)?,
        }))
    }

    fn current_round(&self) -> usize {
        self.current_round
    }

    fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    fn last_step(&self) -> Option<&EnvironmentStep<PredictionMarketObservation>> {
        self.last_step.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketType, NO, YES};
    use common::LocalAction;

    const EVENT: &str = "fed_cut";

    fn bet(outcome: &str, stake: f64) -> PredictionMarketAction {
        PredictionMarketAction::Bet(MarketBet {
            event_id: EVENT.to_string(),
            outcome: Outcome::option(outcome),
            stake,
            price: Some(0.5),
        })
    }

    fn batch(actions: Vec<(&str, PredictionMarketAction)>) -> GlobalActionBatch<PredictionMarketAction> {
        GlobalActionBatch::from_actions(
            actions
                .into_iter()
                .map(|(agent, action)| LocalAction::new(agent, action)),
        )
        .unwrap()
    }

    fn mechanism(max_rounds: usize) -> PredictionMarketMechanism {
        PredictionMarketMechanism::new(max_rounds)
            .with_market(MarketState::binary(EVENT, "Will the Fed cut?"))
            .with_resolution_policy(Box::new(RandomResolution::with_seed(11)))
    }

    #[tokio::test]
    async fn test_finished_mechanism_rejects_step() {
        let mut mech = mechanism(1);
        mech.step(&batch(vec![("A", bet("Yes", 5.0))])).await.unwrap();
        assert!(mech.is_done());

        let err = mech
            .step(&batch(vec![("A", bet("No", 5.0))]))
            .await
            .unwrap_err();
        assert!(matches!(err, MechanismError::RoundLimitReached(1)));
        assert_eq!(mech.current_round(), 1);
        assert_eq!(mech.market(EVENT).unwrap().total_stake.get(NO), None);
    }

    #[tokio::test]
    async fn test_three_agent_two_round_scenario() {
        let mut mech = mechanism(2);

        let step = mech
            .step(&batch(vec![
                ("A", bet("Yes", 40.0)),
                ("B", bet("No", 60.0)),
                ("C", PredictionMarketAction::Hold),
            ]))
            .await
            .unwrap();

        let market = mech.market(EVENT).unwrap();
        assert!((market.current_prices[YES] - 0.4).abs() < 1e-9);
        assert!((market.current_prices[NO] - 0.6).abs() < 1e-9);
        assert!(!step.done);
        assert_eq!(step.global_observation.len(), 3);

        let step = mech
            .step(&batch(vec![("A", bet("Yes", 10.0))]))
            .await
            .unwrap();

        let market = mech.market(EVENT).unwrap();
        assert_eq!(market.total_stake[YES], 50.0);
        assert_eq!(market.total_stake[NO], 60.0);
        assert!((market.current_prices[YES] - 50.0 / 110.0).abs() < 1e-9);
        assert!((market.current_prices[NO] - 60.0 / 110.0).abs() < 1e-9);
        assert!(step.done);
        assert!(market.resolved);
        assert!(matches!(
            &market.outcome,
            Some(Outcome::Option(o)) if o == YES || o == NO
        ));
    }

    #[tokio::test]
    async fn test_invalid_bet_is_skipped_not_fatal() {
        let mut mech = mechanism(5);

        let step = mech
            .step(&batch(vec![
                ("A", bet("Maybe", 40.0)),
                ("B", bet("No", 60.0)),
                ("C", bet("Yes", -3.0)),
            ]))
            .await
            .unwrap();

        let market = mech.market(EVENT).unwrap();
        assert_eq!(market.total_stake.get(YES), None);
        assert_eq!(market.total_stake[NO], 60.0);
        assert_eq!(mech.last_trades().len(), 1);

        let summary = mech.round_summary(1).unwrap();
        assert_eq!(summary.actions.len(), 3);
        assert_eq!(summary.actions[0].action, PredictionMarketAction::Hold);
        assert!(summary.actions[0].rejected.is_some());
        assert!(summary.actions[1].rejected.is_none());
        assert!(summary.actions[2].rejected.is_some());

        let rejected = step.info["rejected_actions"].as_array().unwrap();
        assert_eq!(rejected.len(), 2);
        assert_eq!(step.global_observation.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_market_config_is_fatal() {
        let mut mech = PredictionMarketMechanism::new(3);
        let err = mech
            .step(&batch(vec![("A", bet("Yes", 10.0))]))
            .await
            .unwrap_err();

        assert!(matches!(err, MechanismError::MissingMarketConfig(ref id) if id == EVENT));
        assert_eq!(mech.current_round(), 0);
        assert!(mech.round_summaries().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_created_from_template() {
        let config = MarketConfig {
            name: "template".to_string(),
            ..Default::default()
        };
        let mut mech = PredictionMarketMechanism::from_config(config, 3).unwrap();

        mech.step(&batch(vec![("A", bet("Yes", 10.0))]))
            .await
            .unwrap();

        let market = mech.market(EVENT).unwrap();
        assert_eq!(market.market_type, MarketType::Binary);
        assert_eq!(market.total_stake[YES], 10.0);
        assert!(mech.market("template").is_some());
    }

    #[tokio::test]
    async fn test_all_markets_resolved_at_round_limit() {
        let mut mech = mechanism(3)
            .with_market(MarketState::categorical(
                "second",
                "Which?",
                vec!["X".into(), "Y".into(), "Z".into()],
            ))
            .with_market(MarketState::scalar("rate", "Rate?", 3.5, 5.5));

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                mech.step(&batch(vec![("A", PredictionMarketAction::Hold)]))
                    .await
                    .unwrap(),
            );
        }

        assert!(last.unwrap().done);
        assert!(mech.is_done());
        assert!(mech.markets().values().all(|m| m.resolved));
    }

    #[tokio::test]
    async fn test_observations_share_one_snapshot() {
        let mut mech = mechanism(4);
        let step = mech
            .step(&batch(vec![("A", bet("Yes", 5.0)), ("B", PredictionMarketAction::Hold)]))
            .await
            .unwrap();

        let a = &step.global_observation.get("A").unwrap().observation;
        let b = &step.global_observation.get("B").unwrap().observation;
        assert_eq!(a, b);
        assert_eq!(a.markets[EVENT].total_stake[YES], 5.0);
    }

    #[tokio::test]
    async fn test_reset_restores_initial_markets() {
        let mut mech = mechanism(4);
        mech.step(&batch(vec![("A", bet("Yes", 5.0))]))
            .await
            .unwrap();
        mech.reset();

        assert_eq!(mech.current_round(), 0);
        assert!(mech.round_summaries().is_empty());
        assert!(mech.last_step().is_none());
        assert!(mech.market(EVENT).unwrap().total_stake.is_empty());
    }

    #[tokio::test]
    async fn test_global_state_shape() {
        let mut mech = mechanism(4);
        mech.step(&batch(vec![("A", bet("Yes", 5.0))]))
            .await
            .unwrap();

        let state = mech.global_state().unwrap();
        assert_eq!(state["current_round"], 1);
        assert_eq!(state["max_rounds"], 4);
        assert_eq!(state["round_summaries_count"], 1);
        assert!(state["markets"][EVENT].is_object());
        assert!(state["last_step"].is_object());
    }

    #[test]
    fn test_action_serde_shape() {
        let hold: PredictionMarketAction = serde_json::from_str(r#"{"action_type":"HOLD"}"#).unwrap();
        assert_eq!(hold, PredictionMarketAction::Hold);

        let json = serde_json::to_value(bet("Yes", 5.0)).unwrap();
        assert_eq!(json["action_type"], "BET");
        assert_eq!(json["outcome"], "Yes");
    }
}
