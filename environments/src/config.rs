//! Mechanism configuration records
//!
//! These records are handed to mechanism constructors as-is; loading them from
//! files is the caller's job.

use crate::market::{MarketState, MarketType, NO, YES};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Tolerance when checking that opening prices sum to 1
const PRICE_SUM_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("initial price {0} must be between 0 and 1")]
    InvalidInitialPrice(f64),

    #[error("{0} markets require a non-empty outcomes list")]
    MissingOutcomes(MarketType),

    #[error("outcome {0} is declared more than once")]
    DuplicateOutcome(String),

    #[error("initial prices must match outcomes exactly")]
    PricesDoNotMatchOutcomes,

    #[error("initial prices must sum to 1.0, got {0}")]
    PricesDoNotSumToOne(f64),

    #[error("scalar markets require range_min < range_max, got [{min:?}, {max:?}]")]
    InvalidRange { min: Option<f64>, max: Option<f64> },

    #[error("bet limits must satisfy 0 < min_bet <= max_bet, got [{min}, {max}]")]
    InvalidBetLimits { min: f64, max: f64 },

    #[error("sub_rounds must be at least 1")]
    NoSubRounds,
}

/// Validated shape of a market, selected by `market_type`
#[derive(Debug, Clone, PartialEq)]
pub enum MarketKind {
    Binary {
        initial_price: f64,
    },
    Categorical {
        outcomes: Vec<String>,
        initial_prices: BTreeMap<String, f64>,
    },
    Scalar {
        range_min: f64,
        range_max: f64,
    },
}

/// Configuration for one prediction market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Event id of the market
    #[serde(default = "default_market_name")]
    pub name: String,

    /// The market question
    pub market: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub resolution_criteria: String,

    /// Date when the market resolves (YYYY-MM-DD)
    #[serde(default)]
    pub resolution_date: String,

    #[serde(default = "default_market_type")]
    pub market_type: MarketType,

    /// Opening probability of "Yes" for binary markets
    #[serde(default)]
    pub initial_price: Option<f64>,

    /// Declared outcomes for categorical markets
    #[serde(default)]
    pub outcomes: Vec<String>,

    /// Opening probabilities for categorical markets; uniform when absent
    #[serde(default)]
    pub initial_prices: Option<BTreeMap<String, f64>>,

    #[serde(default)]
    pub range_min: Option<f64>,

    #[serde(default)]
    pub range_max: Option<f64>,

    #[serde(default = "default_initial_liquidity")]
    pub initial_liquidity: f64,

    #[serde(default = "default_min_bet")]
    pub min_bet: f64,

    #[serde(default = "default_max_bet")]
    pub max_bet: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: default_market_name(),
            market: "Will the Fed cut rates by 50+ bps at the next meeting?".to_string(),
            description: String::new(),
            resolution_criteria: String::new(),
            resolution_date: String::new(),
            market_type: MarketType::Binary,
            initial_price: Some(0.5),
            outcomes: Vec::new(),
            initial_prices: None,
            range_min: None,
            range_max: None,
            initial_liquidity: default_initial_liquidity(),
            min_bet: default_min_bet(),
            max_bet: default_max_bet(),
        }
    }
}

fn default_market_name() -> String {
    "prediction_markets".to_string()
}

fn default_market_type() -> MarketType {
    MarketType::Binary
}

fn default_initial_liquidity() -> f64 {
    1000.0
}

fn default_min_bet() -> f64 {
    1.0
}

fn default_max_bet() -> f64 {
    100.0
}

impl MarketConfig {
    /// Check the record and resolve it into a typed market shape
    pub fn validate(&self) -> Result<MarketKind, ConfigError> {
        if !(self.min_bet > 0.0 && self.min_bet <= self.max_bet) {
            return Err(ConfigError::InvalidBetLimits {
                min: self.min_bet,
                max: self.max_bet,
            });
        }

        match self.market_type {
            MarketType::Binary => {
                let initial_price = self.initial_price.unwrap_or(0.5);
                if !(0.0..=1.0).contains(&initial_price) {
                    return Err(ConfigError::InvalidInitialPrice(initial_price));
                }
                Ok(MarketKind::Binary { initial_price })
            }
            MarketType::Categorical => {
                if self.outcomes.is_empty() {
                    return Err(ConfigError::MissingOutcomes(MarketType::Categorical));
                }
                for (i, outcome) in self.outcomes.iter().enumerate() {
                    if self.outcomes[..i].iter().any(|o| o.eq_ignore_ascii_case(outcome)) {
                        return Err(ConfigError::DuplicateOutcome(outcome.clone()));
                    }
                }
                let initial_prices = match &self.initial_prices {
                    Some(prices) => {
                        // keys are matched case-insensitively and stored under the declared label
                        let normalized: BTreeMap<String, f64> = prices
                            .iter()
                            .filter_map(|(key, price)| {
                                self.outcomes
                                    .iter()
                                    .find(|o| o.eq_ignore_ascii_case(key))
                                    .map(|o| (o.clone(), *price))
                            })
                            .collect();
                        let keys: BTreeSet<&String> = normalized.keys().collect();
                        let outcomes: BTreeSet<&String> = self.outcomes.iter().collect();
                        if normalized.len() != prices.len() || keys != outcomes {
                            return Err(ConfigError::PricesDoNotMatchOutcomes);
                        }
                        let sum: f64 = normalized.values().sum();
                        if (sum - 1.0).abs() >= PRICE_SUM_TOLERANCE {
                            return Err(ConfigError::PricesDoNotSumToOne(sum));
                        }
                        normalized
                    }
                    None => crate::market::uniform_prices(&self.outcomes),
                };
                Ok(MarketKind::Categorical {
                    outcomes: self.outcomes.clone(),
                    initial_prices,
                })
            }
            MarketType::Scalar => match (self.range_min, self.range_max) {
                (Some(range_min), Some(range_max)) if range_min < range_max => {
                    Ok(MarketKind::Scalar {
                        range_min,
                        range_max,
                    })
                }
                (min, max) => Err(ConfigError::InvalidRange { min, max }),
            },
        }
    }

    /// Build the opening state of a market for `event_id`
    pub fn build_market(&self, event_id: &str) -> Result<MarketState, ConfigError> {
        let market = match self.validate()? {
            MarketKind::Binary { initial_price } => {
                let mut prices = BTreeMap::new();
                prices.insert(YES.to_string(), initial_price);
                prices.insert(NO.to_string(), 1.0 - initial_price);
                MarketState::binary(event_id, &self.market).with_prices(prices)
            }
            MarketKind::Categorical {
                outcomes,
                initial_prices,
            } => MarketState::categorical(event_id, &self.market, outcomes).with_prices(initial_prices),
            MarketKind::Scalar {
                range_min,
                range_max,
            } => MarketState::scalar(event_id, &self.market, range_min, range_max),
        };

        Ok(market
            .with_bet_limits(self.min_bet, self.max_bet)
            .with_liquidity(self.initial_liquidity))
    }
}

/// Output format expected from agents in the summary phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFormat {
    /// A `ResearchSummary` JSON object
    Structured,
    /// Free text
    Text,
}

/// Configuration for the web research environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebResearchConfig {
    #[serde(default = "default_research_name")]
    pub name: String,

    /// Topic every agent starts researching
    pub initial_query: String,

    /// Search/summary cycles per round
    #[serde(default = "default_sub_rounds")]
    pub sub_rounds: usize,

    /// Results requested per search
    #[serde(default = "default_urls_per_query")]
    pub urls_per_query: usize,

    #[serde(default = "default_summary_format")]
    pub summary_format: SummaryFormat,
}

impl Default for WebResearchConfig {
    fn default() -> Self {
        Self {
            name: default_research_name(),
            initial_query: "Federal Reserve interest rate outlook".to_string(),
            sub_rounds: default_sub_rounds(),
            urls_per_query: default_urls_per_query(),
            summary_format: default_summary_format(),
        }
    }
}

impl WebResearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sub_rounds == 0 {
            return Err(ConfigError::NoSubRounds);
        }
        Ok(())
    }
}

fn default_research_name() -> String {
    "web_research".to_string()
}

fn default_sub_rounds() -> usize {
    2
}

fn default_urls_per_query() -> usize {
    5
}

fn default_summary_format() -> SummaryFormat {
    SummaryFormat::Structured
}
