// Round Artifact Storage Interface
// Persistence contract for per-round actions, environment snapshots and trades

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::AgentId;
use environments::Trade;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One agent's action in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub agent_id: AgentId,
    pub environment_name: String,
    pub round: usize,
    #[serde(default)]
    pub sub_round: Option<usize>,
    /// e.g. `prediction_market_bet`, `web_search`, `research_summary`
    pub action_type: String,
    pub action: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Environment snapshot after a round (or sub-round)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStateRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub environment_name: String,
    pub round: usize,
    pub state: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Trait for round artifact storage backends.
///
/// Orchestrators treat every call as fire-and-forget: errors are logged, never retried.
#[async_trait::async_trait]
pub trait StorageService: Send + Sync {
    async fn insert_actions(&self, records: Vec<ActionRecord>) -> Result<()>;

    async fn insert_environment_state(&self, record: EnvironmentStateRecord) -> Result<()>;

    async fn insert_trades(&self, run_id: Uuid, trades: Vec<Trade>) -> Result<()>;
}

/// In-memory storage (for testing and offline runs)
pub struct InMemoryStorage {
    actions: tokio::sync::RwLock<Vec<ActionRecord>>,
    states: tokio::sync::RwLock<Vec<EnvironmentStateRecord>>,
    trades: tokio::sync::RwLock<Vec<(Uuid, Trade)>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            actions: tokio::sync::RwLock::new(Vec::new()),
            states: tokio::sync::RwLock::new(Vec::new()),
            trades: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    pub async fn actions(&self) -> Vec<ActionRecord> {
        self.actions.read().await.clone()
    }

    /// Actions for one environment and round, in insertion order
    pub async fn actions_for_round(&self, environment_name: &str, round: usize) -> Vec<ActionRecord> {
        self.actions
            .read()
            .await
            .iter()
            .filter(|r| r.environment_name == environment_name && r.round == round)
            .cloned()
            .collect()
    }

    pub async fn environment_states(&self) -> Vec<EnvironmentStateRecord> {
        self.states.read().await.clone()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.trades.read().await.iter().map(|(_, t)| t.clone()).collect()
    }

    pub async fn stats(&self) -> StorageStats {
        StorageStats {
            total_actions: self.actions.read().await.len(),
            total_states: self.states.read().await.len(),
            total_trades: self.trades.read().await.len(),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_actions: usize,
    pub total_states: usize,
    pub total_trades: usize,
}

#[async_trait::async_trait]
impl StorageService for InMemoryStorage {
    async fn insert_actions(&self, records: Vec<ActionRecord>) -> Result<()> {
        let mut actions = self.actions.write().await;
        actions.extend(records);
        Ok(())
    }

    async fn insert_environment_state(&self, record: EnvironmentStateRecord) -> Result<()> {
        let mut states = self.states.write().await;
        states.push(record);
        Ok(())
    }

    async fn insert_trades(&self, run_id: Uuid, trades: Vec<Trade>) -> Result<()> {
        let mut stored = self.trades.write().await;
        stored.extend(trades.into_iter().map(|t| (run_id, t)));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Storage that rejects every write
    pub(crate) struct FailingStorage;

    #[async_trait::async_trait]
    impl StorageService for FailingStorage {
        async fn insert_actions(&self, _: Vec<ActionRecord>) -> Result<()> {
            anyhow::bail!("database unavailable")
        }

        async fn insert_environment_state(&self, _: EnvironmentStateRecord) -> Result<()> {
            anyhow::bail!("database unavailable")
        }

        async fn insert_trades(&self, _: Uuid, _: Vec<Trade>) -> Result<()> {
            anyhow::bail!("database unavailable")
        }
    }

    fn action(agent_id: &str, round: usize) -> ActionRecord {
        ActionRecord {
            id: Uuid::new_v4(),
            run_id: Uuid::nil(),
            agent_id: agent_id.to_string(),
            environment_name: "prediction_markets".to_string(),
            round,
            sub_round: None,
            action_type: "prediction_market_bet".to_string(),
            action: json!({"action_type": "HOLD"}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        storage
            .insert_actions(vec![action("agent_0", 1), action("agent_1", 1), action("agent_0", 2)])
            .await
            .unwrap();
        storage
            .insert_environment_state(EnvironmentStateRecord {
                id: Uuid::new_v4(),
                run_id: Uuid::nil(),
                environment_name: "prediction_markets".to_string(),
                round: 1,
                state: json!({}),
                metadata: json!({"num_agents": 2}),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let round_one = storage.actions_for_round("prediction_markets", 1).await;
        assert_eq!(round_one.len(), 2);
        assert_eq!(round_one[1].agent_id, "agent_1");

        let stats = storage.stats().await;
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.total_states, 1);
        assert_eq!(stats.total_trades, 0);
    }
}
