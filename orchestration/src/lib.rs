//! Simulation orchestration
//!
//! This crate drives a roster of agents through the environments in
//! `environments`. It includes:
//! - Agent roster and per-phase request contexts
//! - Concurrent, rate-limited cognitive phase runner over a pluggable reasoning client
//! - Mapping raw agent output onto typed mechanism actions
//! - Per-environment orchestrators and the meta orchestrator that sequences them
//! - Round artifact storage

pub mod actions;
pub mod agent;
pub mod config;
pub mod meta;
pub mod orchestrator;
pub mod phase_runner;
pub mod prediction_markets;
pub mod rate_limit;
pub mod reasoning;
pub mod storage;
pub mod web_research;

// Re-export commonly used types
pub use actions::ActionParseError;
pub use agent::{create_agents, shared_roster, Agent, AgentContext, AgentObservation, SharedRoster};
pub use config::{load_config, CorpusDocument, LlmConfig, OrchestratorConfig, RateLimitConfig};
pub use meta::MetaOrchestrator;
pub use orchestrator::{EnvironmentOrchestrator, OrchestratorServices, OrchestratorStatus, RunContext};
pub use phase_runner::CognitivePhaseRunner;
pub use prediction_markets::PredictionMarketOrchestrator;
pub use rate_limit::RateLimiter;
pub use reasoning::{CognitivePhase, HeuristicReasoner, RawOutput, ReasoningClient, ReasoningError};
pub use storage::{ActionRecord, EnvironmentStateRecord, InMemoryStorage, StorageService, StorageStats};
pub use web_research::WebResearchOrchestrator;
