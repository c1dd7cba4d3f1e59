//! Web research mechanism
//!
//! Agents alternate between two phases. In the `search` phase each agent issues a
//! query which is run against a [`SearchProvider`]; in the `summary` phase each
//! agent submits what it learned. The phase is switched explicitly by the caller
//! between action steps and gates which action kind the mechanism applies.

use crate::config::WebResearchConfig;
use crate::mechanism::{Mechanism, MechanismError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AgentId, EnvironmentStep, GlobalActionBatch, GlobalObservation, LocalObservation, StepInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Average content length that earns the full content reward
const TARGET_CONTENT_LENGTH: f64 = 500.0;

/// Which action kind is currently legal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    #[default]
    Search,
    Summary,
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchPhase::Search => f.write_str("search"),
            ResearchPhase::Summary => f.write_str("summary"),
        }
    }
}

/// Structured research summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub predicted_outcome: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Body of a summary action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryContent {
    Structured(ResearchSummary),
    Text(String),
}

impl SummaryContent {
    pub fn is_empty(&self) -> bool {
        match self {
            SummaryContent::Structured(s) => s.summary.is_empty() && s.key_findings.is_empty(),
            SummaryContent::Text(t) => t.trim().is_empty(),
        }
    }
}

/// Action accepted by the web research mechanism
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResearchAction {
    Search {
        query: String,
        #[serde(default = "default_num_results")]
        num_results: usize,
    },
    Summary {
        content: SummaryContent,
    },
}

fn default_num_results() -> usize {
    5
}

impl ResearchAction {
    pub fn search(query: impl Into<String>, num_results: usize) -> Self {
        ResearchAction::Search {
            query: query.into(),
            num_results,
        }
    }

    pub fn summary(content: SummaryContent) -> Self {
        ResearchAction::Summary { content }
    }

    /// Phase in which this action is legal
    pub fn phase(&self) -> ResearchPhase {
        match self {
            ResearchAction::Search { .. } => ResearchPhase::Search,
            ResearchAction::Summary { .. } => ResearchPhase::Summary,
        }
    }
}

/// One fetched search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl WebSearchResult {
    /// Host part of the url, used for source diversity
    pub fn domain(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("search query is empty")]
    EmptyQuery,

    #[error("search backend unavailable: {0}")]
    Unavailable(String),
}

/// External search and fetch collaborator
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<WebSearchResult>, SearchError>;
}

/// Offline provider over a fixed document set; ranks documents by query term hits
pub struct StaticSearchProvider {
    documents: Vec<WebSearchResult>,
}

impl StaticSearchProvider {
    pub fn new(documents: Vec<WebSearchResult>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<WebSearchResult>, SearchError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| t.len() > 2)
            .collect();
        if terms.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let mut scored: Vec<(usize, &WebSearchResult)> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let text = format!("{} {}", doc.title, doc.content).to_lowercase();
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (hits > 0).then_some((hits, doc))
            })
            .collect();

        // stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(num_results)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

/// One executed search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub round: usize,
    pub agent_id: AgentId,
    pub query: String,
    pub results: Vec<WebSearchResult>,
}

/// Quality signals for one agent's search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RewardInfo {
    pub num_results: usize,
    pub content_length: usize,
    pub query_relevance: f64,
    pub reward: f64,
}

/// What one agent sees after a research step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResearchObservation {
    pub round: usize,
    pub phase: ResearchPhase,
    /// "success", or "rejected" when the action did not match the phase
    pub status: String,
    pub action: ResearchAction,
    #[serde(default)]
    pub search_results: Vec<WebSearchResult>,
}

pub struct WebResearchMechanism {
    max_rounds: usize,
    current_round: usize,
    phase: ResearchPhase,
    initial_query: String,
    current_query: String,
    urls_per_query: usize,
    search_history: Vec<SearchRecord>,
    last_step: Option<EnvironmentStep<WebResearchObservation>>,
    provider: Arc<dyn SearchProvider>,
}

impl WebResearchMechanism {
    pub fn new(
        config: &WebResearchConfig,
        max_rounds: usize,
        provider: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            max_rounds,
            current_round: 0,
            phase: ResearchPhase::Search,
            initial_query: config.initial_query.clone(),
            current_query: config.initial_query.clone(),
            urls_per_query: config.urls_per_query,
            search_history: Vec::new(),
            last_step: None,
            provider,
        }
    }

    /// Change the legal action kind. Nothing else is reset.
    pub fn switch_phase(&mut self, phase: ResearchPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Switching research phase");
        }
        self.phase = phase;
    }

    pub fn phase(&self) -> ResearchPhase {
        self.phase
    }

    /// Whether `action` is legal in the current phase
    pub fn allows(&self, action: &ResearchAction) -> bool {
        action.phase() == self.phase
    }

    pub fn current_query(&self) -> &str {
        &self.current_query
    }

    pub fn urls_per_query(&self) -> usize {
        self.urls_per_query
    }

    pub fn search_history(&self) -> &[SearchRecord] {
        &self.search_history
    }

    /// 0 for an empty query, 0.5 for repeating the current query, 1 otherwise
    pub fn query_relevance(&self, query: &str) -> f64 {
        let query = query.trim();
        if query.is_empty() {
            0.0
        } else if query.eq_ignore_ascii_case(self.current_query.trim()) {
            0.5
        } else {
            1.0
        }
    }

    /// Reward for one search from result count, content length and source diversity
    pub fn search_reward(&self, results: &[WebSearchResult]) -> f64 {
        if results.is_empty() {
            return 0.0;
        }

        let n = results.len() as f64;
        let results_ratio = (n / self.urls_per_query.max(1) as f64).min(1.0);
        let avg_content = results.iter().map(|r| r.content.len()).sum::<usize>() as f64 / n;
        let content_reward = (avg_content / TARGET_CONTENT_LENGTH).min(1.0);
        let unique_domains: HashSet<&str> = results.iter().map(|r| r.domain()).collect();
        let diversity = unique_domains.len() as f64 / n;

        0.2 + 0.3 * results_ratio + 0.3 * content_reward + 0.2 * diversity
    }
}

#[async_trait]
impl Mechanism for WebResearchMechanism {
    type Action = ResearchAction;
    type Observation = WebResearchObservation;

    async fn step(
        &mut self,
        batch: &GlobalActionBatch<ResearchAction>,
    ) -> Result<EnvironmentStep<WebResearchObservation>, MechanismError> {
        if self.is_done() {
            return Err(MechanismError::RoundLimitReached(self.max_rounds));
        }
        self.current_round += 1;
        let round = self.current_round;
        let phase = self.phase;

        let mut observations = Vec::with_capacity(batch.len());
        let mut reward_info = BTreeMap::new();

        for local in batch.iter() {
            let agent_id = &local.agent_id;

            if !self.allows(&local.action) {
                warn!(
                    agent_id = %agent_id,
                    phase = %phase,
                    action_phase = %local.action.phase(),
                    "Action not legal in current phase"
                );
                observations.push(LocalObservation::new(
                    agent_id.clone(),
                    WebResearchObservation {
                        round,
                        phase,
                        status: "rejected".to_string(),
                        action: local.action.clone(),
                        search_results: Vec::new(),
                    },
                ));
                continue;
            }

            let search_results = match &local.action {
                ResearchAction::Search { query, num_results } => {
                    let results = match self.provider.search(query, *num_results).await {
                        Ok(results) => results,
                        Err(e) => {
                            warn!(agent_id = %agent_id, query = %query, error = %e, "Search failed");
                            Vec::new()
                        }
                    };

                    let info = RewardInfo {
                        num_results: results.len(),
                        content_length: results.iter().map(|r| r.content.len()).sum(),
                        query_relevance: self.query_relevance(query),
                        reward: self.search_reward(&results),
                    };
                    debug!(
                        agent_id = %agent_id,
                        num_results = info.num_results,
                        reward = info.reward,
                        "Search completed"
                    );
                    reward_info.insert(agent_id.clone(), info);

                    self.current_query = query.clone();
                    self.search_history.push(SearchRecord {
                        round,
                        agent_id: agent_id.clone(),
                        query: query.clone(),
                        results: results.clone(),
                    });
                    results
                }
                ResearchAction::Summary { content } => {
                    if content.is_empty() {
                        debug!(agent_id = %agent_id, "Empty research summary");
                    }
                    Vec::new()
                }
            };

            observations.push(LocalObservation::new(
                agent_id.clone(),
                WebResearchObservation {
                    round,
                    phase,
                    status: "success".to_string(),
                    action: local.action.clone(),
                    search_results,
                },
            ));
        }

        let done = self.current_round >= self.max_rounds;
        if done {
            info!(round, searches = self.search_history.len(), "Web research complete");
        }

        let mut info = StepInfo::new();
        info.insert("round".to_string(), json!(round));
        info.insert("phase".to_string(), json!(phase));
        info.insert("reward_info".to_string(), serde_json::to_value(&reward_info)?);

        let step = EnvironmentStep::new(
            GlobalObservation::from_local_observations(observations),
            done,
            info,
        );
        self.last_step = Some(step.clone());
        Ok(step)
    }

    fn reset(&mut self) {
        self.current_round = 0;
        self.phase = ResearchPhase::Search;
        self.current_query = self.initial_query.clone();
        self.search_history.clear();
        self.last_step = None;
    }

    fn global_state(&self) -> Result<serde_json::Value, MechanismError> {
        Ok(json!({
            "current_round": self.current_round,
            "max_rounds": self.max_rounds,
            "current_phase": self.phase,
            "current_query": self.current_query,
            "search_history": serde_json::to_value(&self.search_history)?,
            "last_step": serde_json::to_value(&self.last_step)?,
        }))
    }

    fn current_round(&self) -> usize {
        self.current_round
    }

    fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    fn last_step(&self) -> Option<&EnvironmentStep<WebResearchObservation>> {
        self.last_step.as_ref()
    }
}
