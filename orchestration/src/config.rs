//! Simulation configuration
//!
//! Settings come from a TOML file layered with environment overrides of the form
//! `MARKET_SIM__<SECTION>__<KEY>` (e.g. `MARKET_SIM__RATE_LIMITS__REQUESTS_PER_MINUTE=60`).

use anyhow::{ensure, Context};
use environments::{MarketConfig, WebResearchConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MARKET_SIM";

/// Reasoning model settings assigned to agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub name: String,

    /// Reasoning client backing this config
    #[serde(default = "default_client")]
    pub client: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Also the token estimate charged against the rate limit per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            name: "heuristic".to_string(),
            client: default_client(),
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            use_cache: default_use_cache(),
        }
    }
}

fn default_client() -> String {
    "heuristic".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_use_cache() -> bool {
    true
}

/// Budgets shared by every reasoning request of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: default_tokens_per_minute(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    500
}

fn default_tokens_per_minute() -> u64 {
    150_000
}

fn default_max_concurrent_requests() -> usize {
    16
}

/// A document served by the offline search provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Top-level simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_num_agents")]
    pub num_agents: usize,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    #[serde(default = "default_llm_configs")]
    pub llm_configs: Vec<LlmConfig>,

    /// Environments to run, in order
    #[serde(default = "default_environment_order")]
    pub environment_order: Vec<String>,

    #[serde(default)]
    pub prediction_market: MarketConfig,

    #[serde(default)]
    pub web_research: WebResearchConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Ask reasoning clients for tool-call style structured output
    #[serde(default)]
    pub tool_mode: bool,

    /// Documents for the offline search provider
    #[serde(default)]
    pub search_corpus: Vec<CorpusDocument>,

    /// Seed for the offline reasoner and market resolution; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_agents: default_num_agents(),
            max_rounds: default_max_rounds(),
            llm_configs: default_llm_configs(),
            environment_order: default_environment_order(),
            prediction_market: MarketConfig::default(),
            web_research: WebResearchConfig::default(),
            rate_limits: RateLimitConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            tool_mode: false,
            search_corpus: Vec::new(),
            seed: None,
        }
    }
}

fn default_num_agents() -> usize {
    3
}

fn default_max_rounds() -> usize {
    2
}

fn default_llm_configs() -> Vec<LlmConfig> {
    vec![LlmConfig::default()]
}

fn default_environment_order() -> Vec<String> {
    vec!["prediction_markets".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.num_agents > 0, "num_agents must be at least 1");
        ensure!(self.max_rounds > 0, "max_rounds must be at least 1");
        ensure!(!self.llm_configs.is_empty(), "at least one llm config is required");
        ensure!(
            self.rate_limits.requests_per_minute > 0 && self.rate_limits.tokens_per_minute > 0,
            "rate limits must be positive"
        );
        ensure!(
            self.rate_limits.max_concurrent_requests > 0,
            "max_concurrent_requests must be at least 1"
        );
        ensure!(self.request_timeout_secs > 0, "request_timeout_secs must be positive");

        self.prediction_market
            .validate()
            .context("invalid prediction_market section")?;
        self.web_research
            .validate()
            .context("invalid web_research section")?;
        Ok(())
    }
}

/// Load configuration from `path` (optional) plus environment overrides
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<OrchestratorConfig> {
    load_layered(path.as_ref(), env_overrides())
}

/// `MARKET_SIM__<FIELD>` variables, `__` separating nested sections
fn env_overrides() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn load_layered(path: &Path, env: config::Environment) -> anyhow::Result<OrchestratorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(env)
        .build()
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: OrchestratorConfig = settings
        .try_deserialize()
        .context("failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &OrchestratorConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let template = r#"# Market Simulation Configuration

# Number of agents in the roster (ids agent_0 .. agent_{n-1})
num_agents = 3

# Rounds per environment
max_rounds = 2

# Environments to run, in order
environment_order = ["prediction_markets", "web_research"]

# Per-request timeout for the reasoning service (seconds)
request_timeout_secs = 60

tool_mode = false

# Reasoning configs, assigned to agents round-robin
[[llm_configs]]
name = "heuristic"
client = "heuristic"
model = ""
temperature = 0.7
max_tokens = 1024
use_cache = true

[rate_limits]
requests_per_minute = 500
tokens_per_minute = 150000
max_concurrent_requests = 16

[prediction_market]
name = "prediction_markets"
market = "Will the Fed cut rates by 50+ bps at the next meeting?"
description = ""
resolution_criteria = ""
resolution_date = ""
market_type = "BINARY"
initial_price = 0.5
initial_liquidity = 1000.0
min_bet = 1.0
max_bet = 100.0

[web_research]
name = "web_research"
initial_query = "Federal Reserve interest rate outlook"
sub_rounds = 2
urls_per_query = 5
summary_format = "structured"
"#;

    std::fs::write(path, template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use environments::MarketType;
    use uuid::Uuid;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}.toml", name, Uuid::new_v4()))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.environment_order, vec!["prediction_markets"]);
    }

    #[test]
    fn test_template_loads() {
        let path = temp_path("template");
        create_config_template(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.num_agents, 3);
        assert_eq!(config.environment_order.len(), 2);
        assert_eq!(config.prediction_market.market_type, MarketType::Binary);
        assert_eq!(config.web_research.sub_rounds, 2);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(temp_path("missing")).unwrap();
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.llm_configs.len(), 1);
    }

    #[test]
    fn test_env_override() {
        let path = temp_path("env");
        std::fs::write(&path, "request_timeout_secs = 30\nmax_rounds = 4\n").unwrap();
        let mut vars = config::Map::new();
        vars.insert("MARKET_SIM__REQUEST_TIMEOUT_SECS".to_string(), "7".to_string());
        vars.insert("OTHER_APP__MAX_ROUNDS".to_string(), "9".to_string());

        let config = load_layered(&path, env_overrides().source(Some(vars))).unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(config.request_timeout_secs, 7);
        assert_eq!(config.max_rounds, 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let path = temp_path("invalid");
        std::fs::write(&path, "num_agents = 0\n").unwrap();
        assert!(load_config(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_save_config_roundtrip() {
        let path = temp_path("saved");
        let mut config = OrchestratorConfig::default();
        config.num_agents = 5;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.num_agents, 5);
        std::fs::remove_file(path).ok();
    }
}
