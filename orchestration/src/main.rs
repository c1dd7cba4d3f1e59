use anyhow::Result;
use chrono::Utc;
use environments::{StaticSearchProvider, WebSearchResult};
use orchestration::{
    create_agents, load_config, shared_roster, CognitivePhaseRunner, HeuristicReasoner,
    InMemoryStorage, MetaOrchestrator, OrchestratorServices, RateLimiter, RunContext,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("MARKET_SIM_CONFIG")
        .unwrap_or_else(|_| "config/simulation.toml".to_string());
    let config = load_config(&config_path)?;
    info!(
        path = %config_path,
        agents = config.num_agents,
        rounds = config.max_rounds,
        environments = ?config.environment_order,
        "Configuration loaded"
    );

    let agents = create_agents(config.num_agents, &config.llm_configs)?;
    for llm in config.llm_configs.iter().filter(|c| c.client != "heuristic") {
        warn!(name = %llm.name, client = %llm.client, "No hosted client available, using heuristic reasoner");
    }
    let reasoner = Arc::new(
        HeuristicReasoner::new(config.seed.unwrap_or_else(|| fastrand::u64(..)))
            .with_tool_mode(config.tool_mode),
    );
    let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
    let runner = Arc::new(CognitivePhaseRunner::new(
        reasoner,
        limiter,
        Duration::from_secs(config.request_timeout_secs),
    ));
    let storage = Arc::new(InMemoryStorage::new());

    let now = Utc::now();
    let provider = Arc::new(StaticSearchProvider::new(
        config
            .search_corpus
            .iter()
            .map(|doc| WebSearchResult {
                url: doc.url.clone(),
                title: doc.title.clone(),
                content: doc.content.clone(),
                timestamp: now,
            })
            .collect(),
    ));

    let context = RunContext::new();
    info!(run_id = %context.run_id(), "Simulation run created");
    let services = OrchestratorServices::new(shared_roster(agents), runner, storage.clone(), context);

    let mut meta = MetaOrchestrator::new(&config, services, provider)?;
    let result = meta.run_simulation().await;

    let stats = storage.stats().await;
    info!(
        actions = stats.total_actions,
        states = stats.total_states,
        trades = stats.total_trades,
        "Storage summary"
    );

    result
}
