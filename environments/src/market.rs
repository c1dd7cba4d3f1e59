//! Market state for the prediction market mechanism
//!
//! A market tracks the total stake per option and derives prices from the stake
//! pool: `price[opt] = stake[opt] / Σ stake`. Prices are recomputed over every
//! declared option on every bet so they always sum to 1.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Binary market option labels
pub const YES: &str = "Yes";
pub const NO: &str = "No";

/// Capability set of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    Binary,
    Scalar,
    Categorical,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketType::Binary => "BINARY",
            MarketType::Scalar => "SCALAR",
            MarketType::Categorical => "CATEGORICAL",
        };
        f.write_str(name)
    }
}

/// Closed representation of a bet or resolution outcome.
///
/// Binary and categorical markets use named options, scalar markets use values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Value(f64),
    Option(String),
}

impl Outcome {
    pub fn option(name: impl Into<String>) -> Self {
        Outcome::Option(name.into())
    }

    /// Key under which stake for this outcome is tracked
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => write!(f, "{}", v),
            Outcome::Option(name) => f.write_str(name),
        }
    }
}

/// Recoverable validation failure for a single bet
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BetError {
    #[error("market {0} is already resolved")]
    MarketResolved(String),

    #[error("outcome {outcome} is not a valid option for event {event_id}")]
    InvalidOutcome { event_id: String, outcome: String },

    #[error("outcome {value} is outside valid range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("{market_type} markets do not accept outcome {outcome}")]
    OutcomeTypeMismatch {
        market_type: MarketType,
        outcome: String,
    },

    #[error("bet is missing an outcome")]
    MissingOutcome,

    #[error("stake must be positive, got {0}")]
    InvalidStake(f64),

    #[error("stake {stake} is outside allowed range [{min}, {max}]")]
    StakeOutOfBounds { stake: f64, min: f64, max: f64 },

    #[error("price must be between 0 and 1, got {0}")]
    InvalidPrice(f64),
}

/// State of a single tradeable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub event_id: String,
    pub market_type: MarketType,
    pub question: String,

    /// Declared options for binary/categorical markets
    #[serde(default)]
    pub options: Vec<String>,

    /// Value range for scalar markets
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,

    pub min_bet: f64,
    pub max_bet: f64,

    /// Total stake per option (or per value for scalar markets)
    pub total_stake: BTreeMap<String, f64>,
    pub current_prices: BTreeMap<String, f64>,
    pub total_liquidity: f64,

    pub resolved: bool,
    pub outcome: Option<Outcome>,
}

impl MarketState {
    /// A Yes/No market with uniform prices
    pub fn binary(event_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self::with_options(
            event_id,
            question,
            MarketType::Binary,
            vec![YES.to_string(), NO.to_string()],
        )
    }

    /// A market over the given named options with uniform prices
    pub fn categorical(
        event_id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self::with_options(event_id, question, MarketType::Categorical, options)
    }

    /// A market over a numeric range; prices appear once values are staked
    pub fn scalar(
        event_id: impl Into<String>,
        question: impl Into<String>,
        range_min: f64,
        range_max: f64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            market_type: MarketType::Scalar,
            question: question.into(),
            options: Vec::new(),
            range_min: Some(range_min),
            range_max: Some(range_max),
            min_bet: 0.0,
            max_bet: f64::MAX,
            total_stake: BTreeMap::new(),
            current_prices: BTreeMap::new(),
            total_liquidity: 0.0,
            resolved: false,
            outcome: None,
        }
    }

    fn with_options(
        event_id: impl Into<String>,
        question: impl Into<String>,
        market_type: MarketType,
        options: Vec<String>,
    ) -> Self {
        // option names are compared case-insensitively; keep the first spelling
        let mut unique: Vec<String> = Vec::with_capacity(options.len());
        for option in options {
            if !unique.iter().any(|o| o.eq_ignore_ascii_case(&option)) {
                unique.push(option);
            }
        }
        let options = unique;
        let current_prices = uniform_prices(&options);
        Self {
            event_id: event_id.into(),
            market_type,
            question: question.into(),
            options,
            range_min: None,
            range_max: None,
            min_bet: 0.0,
            max_bet: f64::MAX,
            total_stake: BTreeMap::new(),
            current_prices,
            total_liquidity: 0.0,
            resolved: false,
            outcome: None,
        }
    }

    /// Replace the opening prices (already validated by the caller)
    pub fn with_prices(mut self, prices: BTreeMap<String, f64>) -> Self {
        self.current_prices = prices;
        self
    }

    pub fn with_bet_limits(mut self, min_bet: f64, max_bet: f64) -> Self {
        self.min_bet = min_bet;
        self.max_bet = max_bet;
        self
    }

    pub fn with_liquidity(mut self, liquidity: f64) -> Self {
        self.total_liquidity = liquidity;
        self
    }

    /// Apply a bet: add the stake to its outcome and recompute all prices
    pub fn update_with_bet(
        &mut self,
        outcome: &Outcome,
        stake: f64,
        price: Option<f64>,
    ) -> Result<(), BetError> {
        if self.resolved {
            return Err(BetError::MarketResolved(self.event_id.clone()));
        }

        if !stake.is_finite() || stake <= 0.0 {
            return Err(BetError::InvalidStake(stake));
        }
        if stake < self.min_bet || stake > self.max_bet {
            return Err(BetError::StakeOutOfBounds {
                stake,
                min: self.min_bet,
                max: self.max_bet,
            });
        }
        if let Some(p) = price {
            if !(0.0..=1.0).contains(&p) {
                return Err(BetError::InvalidPrice(p));
            }
        }

        let key = self.validate_outcome(outcome)?;

        *self.total_stake.entry(key).or_insert(0.0) += stake;
        self.total_liquidity += stake;
        self.recompute_prices();
        Ok(())
    }

    /// Resolve the market once. Returns `false` when it was already resolved,
    /// in which case the existing outcome is kept.
    pub fn resolve(&mut self, outcome: Outcome) -> Result<bool, BetError> {
        if self.resolved {
            return Ok(false);
        }
        let key = self.validate_outcome(&outcome)?;

        self.outcome = Some(match self.market_type {
            MarketType::Scalar => outcome,
            _ => Outcome::Option(key),
        });
        self.resolved = true;
        Ok(true)
    }

    /// Sum of current prices; 1.0 for any market with prices
    pub fn price_sum(&self) -> f64 {
        self.current_prices.values().sum()
    }

    pub fn total_staked(&self) -> f64 {
        self.total_stake.values().sum()
    }

    /// Check an outcome against this market and return its stake key.
    /// Named options are matched case-insensitively and normalized to the declared label.
    fn validate_outcome(&self, outcome: &Outcome) -> Result<String, BetError> {
        match (self.market_type, outcome) {
            (MarketType::Scalar, Outcome::Value(value)) => {
                let min = self.range_min.unwrap_or(f64::NEG_INFINITY);
                let max = self.range_max.unwrap_or(f64::INFINITY);
                if !value.is_finite() || *value < min || *value > max {
                    return Err(BetError::OutOfRange {
                        value: *value,
                        min,
                        max,
                    });
                }
                Ok(outcome.key())
            }
            (MarketType::Binary | MarketType::Categorical, Outcome::Option(name)) => self
                .options
                .iter()
                .find(|opt| opt.eq_ignore_ascii_case(name.trim()))
                .cloned()
                .ok_or_else(|| BetError::InvalidOutcome {
                    event_id: self.event_id.clone(),
                    outcome: name.clone(),
                }),
            (market_type, other) => Err(BetError::OutcomeTypeMismatch {
                market_type,
                outcome: other.to_string(),
            }),
        }
    }

    fn recompute_prices(&mut self) {
        match self.market_type {
            MarketType::Scalar => {
                let total = self.total_staked();
                self.current_prices = if total > 0.0 {
                    self.total_stake
                        .iter()
                        .map(|(value, stake)| (value.clone(), stake / total))
                        .collect()
                } else {
                    BTreeMap::new()
                };
            }
            MarketType::Binary | MarketType::Categorical => {
                let total: f64 = self
                    .options
                    .iter()
                    .map(|opt| self.total_stake.get(opt).copied().unwrap_or(0.0))
                    .sum();
                self.current_prices = if total > 0.0 {
                    self.options
                        .iter()
                        .map(|opt| {
                            let stake = self.total_stake.get(opt).copied().unwrap_or(0.0);
                            (opt.clone(), stake / total)
                        })
                        .collect()
                } else {
                    uniform_prices(&self.options)
                };
            }
        }
    }
}

/// `1/n` for each of `n` options
pub fn uniform_prices(options: &[String]) -> BTreeMap<String, f64> {
    if options.is_empty() {
        return BTreeMap::new();
    }
    let uniform = 1.0 / options.len() as f64;
    options.iter().map(|opt| (opt.clone(), uniform)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_fresh_market_has_uniform_prices() {
        let market = MarketState::categorical(
            "fed",
            "What will the Fed do?",
            vec!["Cut".into(), "Hold".into(), "Hike".into(), "Pause".into()],
        );
        for price in market.current_prices.values() {
            assert!((price - 0.25).abs() < EPSILON);
        }

        let binary = MarketState::binary("rain", "Will it rain?");
        assert_eq!(binary.current_prices.get(YES), Some(&0.5));
        assert_eq!(binary.current_prices.get(NO), Some(&0.5));
    }

    #[test]
    fn test_duplicate_options_collapse() {
        let mut market = MarketState::categorical(
            "fed",
            "What will the Fed do?",
            vec!["Cut".into(), "cut".into(), "Hold".into()],
        );
        assert_eq!(market.options, vec!["Cut", "Hold"]);
        assert!((market.price_sum() - 1.0).abs() < EPSILON);

        market
            .update_with_bet(&Outcome::option("Cut"), 10.0, None)
            .unwrap();
        assert!((market.current_prices["Cut"] - 1.0).abs() < EPSILON);
        assert!((market.price_sum() - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_prices_always_sum_to_one() {
        let mut market = MarketState::categorical(
            "election",
            "Who wins?",
            vec!["A".into(), "B".into(), "C".into()],
        );
        let bets = [("A", 12.5), ("C", 3.0), ("A", 0.1), ("B", 99.0), ("C", 41.7)];

        for (outcome, stake) in bets {
            market
                .update_with_bet(&Outcome::option(outcome), stake, Some(0.5))
                .unwrap();
            assert!((market.price_sum() - 1.0).abs() < EPSILON);
            assert_eq!(market.current_prices.len(), 3);
        }
    }

    #[test]
    fn test_binary_bets_move_prices() {
        let mut market = MarketState::binary("event", "Question?");
        market.update_with_bet(&Outcome::option("Yes"), 40.0, None).unwrap();
        market.update_with_bet(&Outcome::option("no"), 60.0, None).unwrap();

        assert!((market.current_prices[YES] - 0.4).abs() < EPSILON);
        assert!((market.current_prices[NO] - 0.6).abs() < EPSILON);
        assert_eq!(market.total_stake[NO], 60.0);
        assert_eq!(market.total_liquidity, 100.0);
    }

    #[test]
    fn test_invalid_bets_leave_market_untouched() {
        let mut market = MarketState::binary("event", "Question?").with_bet_limits(1.0, 100.0);
        let before = market.clone();

        assert!(matches!(
            market.update_with_bet(&Outcome::option("Maybe"), 10.0, None),
            Err(BetError::InvalidOutcome { .. })
        ));
        assert_eq!(
            market.update_with_bet(&Outcome::option("Yes"), 0.0, None),
            Err(BetError::InvalidStake(0.0))
        );
        assert!(matches!(
            market.update_with_bet(&Outcome::option("Yes"), 500.0, None),
            Err(BetError::StakeOutOfBounds { .. })
        ));
        assert_eq!(
            market.update_with_bet(&Outcome::option("Yes"), 10.0, Some(1.5)),
            Err(BetError::InvalidPrice(1.5))
        );
        assert!(matches!(
            market.update_with_bet(&Outcome::Value(0.3), 10.0, None),
            Err(BetError::OutcomeTypeMismatch { .. })
        ));

        assert_eq!(market, before);
    }

    #[test]
    fn test_scalar_market_range_and_prices() {
        let mut market = MarketState::scalar("rate", "Fed funds rate?", 3.5, 5.5);
        assert!(market.current_prices.is_empty());

        market.update_with_bet(&Outcome::Value(5.25), 80.0, None).unwrap();
        market.update_with_bet(&Outcome::Value(5.0), 20.0, None).unwrap();
        assert!((market.current_prices["5.25"] - 0.8).abs() < EPSILON);
        assert!((market.current_prices["5"] - 0.2).abs() < EPSILON);

        assert!(matches!(
            market.update_with_bet(&Outcome::Value(7.0), 10.0, None),
            Err(BetError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut market = MarketState::binary("event", "Question?");
        assert_eq!(market.resolve(Outcome::option("yes")), Ok(true));
        assert_eq!(market.outcome, Some(Outcome::option(YES)));

        assert_eq!(market.resolve(Outcome::option(NO)), Ok(false));
        assert_eq!(market.outcome, Some(Outcome::option(YES)));
        assert!(market.resolved);
    }

    #[test]
    fn test_resolved_market_rejects_bets() {
        let mut market = MarketState::binary("event", "Question?");
        market.resolve(Outcome::option(NO)).unwrap();
        assert_eq!(
            market.update_with_bet(&Outcome::option(YES), 5.0, None),
            Err(BetError::MarketResolved("event".to_string()))
        );
    }

    #[test]
    fn test_outcome_serde_is_untagged() {
        let value: Outcome = serde_json::from_str("5.25").unwrap();
        assert_eq!(value, Outcome::Value(5.25));
        let option: Outcome = serde_json::from_str("\"Yes\"").unwrap();
        assert_eq!(option, Outcome::option("Yes"));
    }
}
