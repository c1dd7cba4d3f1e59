//! Environment mechanisms for the round-based agent simulation
//!
//! This crate provides:
//! - The [`Mechanism`] trait: a reducer from a batch of agent actions to a new
//!   shared state plus per-agent observations
//! - A prediction market mechanism (binary, categorical and scalar markets)
//! - A two-phase web research mechanism (search, then summary)
//! - [`EnvironmentWrapper`], which adds step counters and history around a mechanism

pub mod config;
pub mod environment;
pub mod market;
pub mod mechanism;
pub mod prediction_market;
pub mod resolution;
pub mod web_research;

pub use config::{ConfigError, MarketConfig, MarketKind, SummaryFormat, WebResearchConfig};
pub use environment::{EnvironmentHistory, EnvironmentSnapshot, EnvironmentWrapper, HistoryEntry};
pub use market::{BetError, MarketState, MarketType, Outcome};
pub use mechanism::{Mechanism, MechanismError};
pub use prediction_market::{
    ActionType, MarketBet, PredictionMarketAction, PredictionMarketMechanism,
    PredictionMarketObservation, RecordedAction, RoundSummary, Trade,
};
pub use resolution::{FixedResolution, RandomResolution, ResolutionPolicy};
pub use web_research::{
    ResearchAction, ResearchPhase, ResearchSummary, RewardInfo, SearchError, SearchProvider,
    SearchRecord, StaticSearchProvider, SummaryContent, WebResearchMechanism,
    WebResearchObservation, WebSearchResult,
};

// Re-export envelope types for convenience
pub use common::{
    AgentId, EnvironmentStep, GlobalActionBatch, GlobalObservation, LocalAction, LocalObservation,
};
