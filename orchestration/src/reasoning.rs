//! Reasoning service contract
//!
//! The reasoning service turns an [`AgentContext`] into raw agent output. Real
//! clients (hosted LLMs, prompt formatting, caching) live outside this crate; the
//! [`HeuristicReasoner`] here produces plausible decisions offline.

use crate::agent::AgentContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;

/// Stage of agent cognition within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitivePhase {
    Perception,
    Action,
    Reflection,
}

impl fmt::Display for CognitivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CognitivePhase::Perception => f.write_str("perception"),
            CognitivePhase::Action => f.write_str("action"),
            CognitivePhase::Reflection => f.write_str("reflection"),
        }
    }
}

/// Unparsed agent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
    /// Free text as returned by the service
    pub text: String,
    /// Structured payload when the service returned one (tool/JSON mode)
    #[serde(default)]
    pub json: Option<Value>,
}

impl RawOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            json: None,
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            text: value.to_string(),
            json: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReasoningError {
    #[error("reasoning request failed: {0}")]
    Request(String),

    #[error("reasoning request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limiter closed")]
    RateLimiterClosed,

    #[error("no decision available for {environment} {phase}")]
    Unsupported {
        environment: String,
        phase: CognitivePhase,
    },
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn request_decision(&self, context: &AgentContext) -> Result<RawOutput, ReasoningError>;

    fn name(&self) -> &str;
}

/// Offline reasoner that derives decisions from the environment state.
///
/// Decisions are seeded per `(agent, environment, phase, round)` so a run is
/// reproducible no matter in which order requests complete.
pub struct HeuristicReasoner {
    seed: u64,
    hold_probability: f64,
    /// Return a structured payload instead of prose with a fenced JSON block
    tool_mode: bool,
}

impl HeuristicReasoner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            hold_probability: 0.2,
            tool_mode: true,
        }
    }

    pub fn with_tool_mode(mut self, tool_mode: bool) -> Self {
        self.tool_mode = tool_mode;
        self
    }

    pub fn with_hold_probability(mut self, probability: f64) -> Self {
        self.hold_probability = probability.clamp(0.0, 1.0);
        self
    }

    fn rng_for(&self, context: &AgentContext) -> fastrand::Rng {
        let mut hasher = DefaultHasher::new();
        context.agent_id.hash(&mut hasher);
        context.environment.hash(&mut hasher);
        context.phase.hash(&mut hasher);
        context.round.hash(&mut hasher);
        fastrand::Rng::with_seed(self.seed ^ hasher.finish())
    }

    /// The market an agent trades on: the environment's own event while it is
    /// open, otherwise the first open market. A flat state is a single market.
    fn target_market(state: &Value) -> Option<&Value> {
        let Some(markets) = state.get("markets").and_then(Value::as_object) else {
            return Some(state);
        };
        let is_open = |m: &&Value| !m.get("resolved").and_then(Value::as_bool).unwrap_or(false);
        state
            .get("event_id")
            .and_then(Value::as_str)
            .and_then(|id| markets.get(id))
            .filter(is_open)
            .or_else(|| markets.values().find(is_open))
    }

    fn perceive(&self, context: &AgentContext) -> Value {
        let summary = match &context.last_observation {
            Some(_) => format!("Reviewing round {} results in {}", context.round, context.environment),
            None => format!("No prior observation in {}", context.environment),
        };
        json!({
            "monitoring": summary,
            "key_observations": [Self::target_market(&context.environment_state)
                .and_then(|m| m.get("question"))
                .cloned()
                .unwrap_or(Value::Null)],
            "strategy": "follow the evidence, size positions conservatively",
        })
    }

    fn bet(&self, context: &AgentContext, rng: &mut fastrand::Rng) -> Value {
        let Some(state) = Self::target_market(&context.environment_state) else {
            return json!({ "action_type": "HOLD" });
        };
        if rng.f64() < self.hold_probability {
            return json!({ "action_type": "HOLD" });
        }

        let min_bet = state.get("min_bet").and_then(Value::as_f64).unwrap_or(1.0);
        let max_bet = state
            .get("max_bet")
            .and_then(Value::as_f64)
            .unwrap_or(100.0)
            .min(min_bet * 25.0);
        let stake = (min_bet + rng.f64() * (max_bet - min_bet).max(0.0)).round().max(min_bet);

        let options: Vec<&str> = state
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| opts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let (outcome, price) = if options.is_empty() {
            let min = state.get("range_min").and_then(Value::as_f64).unwrap_or(0.0);
            let max = state.get("range_max").and_then(Value::as_f64).unwrap_or(1.0);
            let value = min + rng.f64() * (max - min);
            (json!((value * 100.0).round() / 100.0), Value::Null)
        } else {
            let option = options[rng.usize(..options.len())];
            let price = state
                .get("current_prices")
                .and_then(|p| p.get(option))
                .and_then(Value::as_f64)
                .unwrap_or(1.0 / options.len() as f64);
            (json!(option), json!(price))
        };

        json!({
            "action_type": "BET",
            "event_id": state.get("event_id").cloned().unwrap_or(Value::Null),
            "outcome": outcome,
            "stake": stake,
            "price": price,
        })
    }

    fn research(&self, context: &AgentContext, rng: &mut fastrand::Rng) -> Value {
        let state = &context.environment_state;
        let phase = state.get("phase").and_then(Value::as_str).unwrap_or("search");
        let query = state.get("query").and_then(Value::as_str).unwrap_or_default();

        if phase == "search" {
            const ANGLES: [&str; 4] = ["latest news", "analysis", "forecast", "market data"];
            let num_results = state.get("urls_per_query").and_then(Value::as_u64).unwrap_or(5);
            return json!({
                "action": "search",
                "query": format!("{} {}", query, ANGLES[rng.usize(..ANGLES.len())]),
                "num_results": num_results,
            });
        }

        let results: Vec<&Value> = context
            .last_observation
            .as_ref()
            .and_then(|o| o.get("search_results"))
            .and_then(Value::as_array)
            .map(|r| r.iter().collect())
            .unwrap_or_default();
        let key_findings: Vec<&str> = results
            .iter()
            .filter_map(|r| r.get("title").and_then(Value::as_str))
            .collect();
        let sources: Vec<&str> = results
            .iter()
            .filter_map(|r| r.get("url").and_then(Value::as_str))
            .collect();

        json!({
            "action": "summary",
            "content": {
                "summary": format!("{} sources reviewed on {}", sources.len(), query),
                "key_findings": key_findings,
                "sources": sources,
                "confidence": (rng.f64() * 100.0).round() / 100.0,
            }
        })
    }

    fn reflect(&self, context: &AgentContext) -> Value {
        json!({
            "reflection": format!("Round {} in {} complete", context.round, context.environment),
            "strategy_update": "keep position sizes within limits",
        })
    }
}

impl Default for HeuristicReasoner {
    fn default() -> Self {
        Self::new(fastrand::u64(..))
    }
}

#[async_trait]
impl ReasoningClient for HeuristicReasoner {
    async fn request_decision(&self, context: &AgentContext) -> Result<RawOutput, ReasoningError> {
        let mut rng = self.rng_for(context);
        let value = match (context.phase, context.environment.as_str()) {
            (CognitivePhase::Perception, _) => self.perceive(context),
            (CognitivePhase::Reflection, _) => self.reflect(context),
            (CognitivePhase::Action, "prediction_markets") => self.bet(context, &mut rng),
            (CognitivePhase::Action, "web_research") => self.research(context, &mut rng),
            (phase, environment) => {
                return Err(ReasoningError::Unsupported {
                    environment: environment.to_string(),
                    phase,
                })
            }
        };

        if self.tool_mode {
            return Ok(RawOutput::json(value));
        }
        Ok(RawOutput::text(format!(
            "{} {} for round {}:\n```json\n{:#}\n```",
            context.agent_id, context.phase, context.round, value
        )))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
