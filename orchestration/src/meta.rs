//! Meta orchestrator - runs each configured environment in order over one shared roster

use crate::config::OrchestratorConfig;
use crate::orchestrator::{EnvironmentOrchestrator, OrchestratorServices};
use crate::prediction_markets::{PredictionMarketOrchestrator, PREDICTION_MARKETS};
use crate::web_research::{WebResearchOrchestrator, WEB_RESEARCH};
use anyhow::{bail, Result};
use environments::{RandomResolution, SearchProvider};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

pub struct MetaOrchestrator {
    orchestrators: Vec<Box<dyn EnvironmentOrchestrator>>,
    services: OrchestratorServices,
}

impl MetaOrchestrator {
    /// Build one orchestrator per entry of `environment_order`; unknown names are skipped
    pub fn new(
        config: &OrchestratorConfig,
        services: OrchestratorServices,
        provider: Arc<dyn SearchProvider>,
    ) -> Result<Self> {
        let mut orchestrators: Vec<Box<dyn EnvironmentOrchestrator>> = Vec::new();

        for name in &config.environment_order {
            match name.as_str() {
                PREDICTION_MARKETS => {
                    let mut orchestrator = PredictionMarketOrchestrator::new(
                        config.prediction_market.clone(),
                        config.max_rounds,
                        services.clone(),
                    )?;
                    if let Some(seed) = config.seed {
                        orchestrator = orchestrator
                            .with_resolution_policy(Box::new(RandomResolution::with_seed(seed)));
                    }
                    orchestrators.push(Box::new(orchestrator));
                }
                WEB_RESEARCH => {
                    orchestrators.push(Box::new(WebResearchOrchestrator::new(
                        config.web_research.clone(),
                        config.max_rounds,
                        provider.clone(),
                        services.clone(),
                    )?));
                }
                other => warn!(environment = %other, "Unknown environment, skipping"),
            }
        }

        Ok(Self {
            orchestrators,
            services,
        })
    }

    pub fn environments(&self) -> Vec<&str> {
        self.orchestrators.iter().map(|o| o.name()).collect()
    }

    pub fn orchestrators(&self) -> &[Box<dyn EnvironmentOrchestrator>] {
        &self.orchestrators
    }

    /// Run every environment to completion. A failing environment does not stop the others.
    pub async fn run_simulation(&mut self) -> Result<()> {
        let span = self.services.context.span().clone();
        async {
            let agents = self.services.num_agents().await;
            info!(
                environments = ?self.environments(),
                agents,
                reasoner = %self.services.runner.client_name(),
                "Starting simulation"
            );

            let mut failed = Vec::new();
            for orchestrator in self.orchestrators.iter_mut() {
                let name = orchestrator.name().to_string();
                info!(environment = %name, "Running environment");

                let result = match orchestrator.setup_environment().await {
                    Ok(()) => orchestrator.run_environment(None).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    error!(environment = %name, error = ?e, "Environment failed");
                    failed.push(name);
                }
            }

            self.print_summary();

            if !failed.is_empty() {
                bail!("environments failed: {}", failed.join(", "));
            }
            info!("Simulation complete");
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub fn print_summary(&self) {
        for orchestrator in &self.orchestrators {
            orchestrator.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::services;
    use crate::reasoning::HeuristicReasoner;
    use crate::storage::tests::FailingStorage;
    use crate::storage::InMemoryStorage;
    use environments::StaticSearchProvider;

    fn config(order: &[&str]) -> OrchestratorConfig {
        OrchestratorConfig {
            num_agents: 2,
            max_rounds: 1,
            environment_order: order.iter().map(|s| s.to_string()).collect(),
            seed: Some(11),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_environment_skipped() {
        let services = services(2, Arc::new(HeuristicReasoner::new(1)), Arc::new(InMemoryStorage::new()));
        let meta = MetaOrchestrator::new(
            &config(&["auction", PREDICTION_MARKETS]),
            services,
            Arc::new(StaticSearchProvider::new(Vec::new())),
        )
        .unwrap();

        assert_eq!(meta.environments(), vec!["prediction_markets"]);
    }

    #[tokio::test]
    async fn test_runs_all_environments_in_order() {
        let storage = Arc::new(InMemoryStorage::new());
        let services = services(2, Arc::new(HeuristicReasoner::new(1)), storage.clone());
        let mut meta = MetaOrchestrator::new(
            &config(&[PREDICTION_MARKETS, WEB_RESEARCH]),
            services,
            Arc::new(StaticSearchProvider::new(Vec::new())),
        )
        .unwrap();

        meta.run_simulation().await.unwrap();

        let actions = storage.actions().await;
        assert_eq!(actions[0].environment_name, "prediction_markets");
        assert_eq!(actions.last().unwrap().environment_name, "web_research");
        // 2 bets, then 2 sub-rounds of search + summary for 2 agents
        assert_eq!(actions.len(), 2 + 2 * 2 * 2);
    }

    #[tokio::test]
    async fn test_storage_failures_do_not_fail_run() {
        let services = services(2, Arc::new(HeuristicReasoner::new(1)), Arc::new(FailingStorage));
        let mut meta = MetaOrchestrator::new(
            &config(&[PREDICTION_MARKETS]),
            services,
            Arc::new(StaticSearchProvider::new(Vec::new())),
        )
        .unwrap();

        assert!(meta.run_simulation().await.is_ok());
    }
}
