//! Per-agent actions and the roster-ordered batch handed to a mechanism

use crate::AgentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One agent's decision for one round. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAction<A> {
    pub agent_id: AgentId,
    pub action: A,
}

impl<A> LocalAction<A> {
    pub fn new(agent_id: impl Into<AgentId>, action: A) -> Self {
        Self {
            agent_id: agent_id.into(),
            action,
        }
    }
}

/// Errors raised while assembling a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("agent {0} already has an action in this batch")]
    DuplicateAgent(AgentId),
}

/// All actions for one `step` call.
///
/// Iteration order is insertion order, which callers keep equal to the agent
/// roster order. Mechanisms reduce the batch in exactly this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalActionBatch<A> {
    actions: Vec<LocalAction<A>>,
}

impl<A> Default for GlobalActionBatch<A> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
        }
    }
}

impl<A> GlobalActionBatch<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from actions already in roster order
    pub fn from_actions(
        actions: impl IntoIterator<Item = LocalAction<A>>,
    ) -> Result<Self, BatchError> {
        let mut batch = Self::new();
        for action in actions {
            batch.push(action)?;
        }
        Ok(batch)
    }

    /// Append an action; agent ids must be unique within the batch
    pub fn push(&mut self, action: LocalAction<A>) -> Result<(), BatchError> {
        if self.contains(&action.agent_id) {
            return Err(BatchError::DuplicateAgent(action.agent_id));
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.actions.iter().any(|a| a.agent_id == agent_id)
    }

    pub fn get(&self, agent_id: &str) -> Option<&A> {
        self.actions
            .iter()
            .find(|a| a.agent_id == agent_id)
            .map(|a| &a.action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalAction<A>> {
        self.actions.iter()
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.agent_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<A> IntoIterator for GlobalActionBatch<A> {
    type Item = LocalAction<A>;
    type IntoIter = std::vec::IntoIter<LocalAction<A>>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_keeps_insertion_order() {
        let batch = GlobalActionBatch::from_actions(vec![
            LocalAction::new("agent_2", 2),
            LocalAction::new("agent_0", 0),
            LocalAction::new("agent_1", 1),
        ])
        .unwrap();

        let ids: Vec<&str> = batch.agent_ids().collect();
        assert_eq!(ids, vec!["agent_2", "agent_0", "agent_1"]);
        assert_eq!(batch.get("agent_0"), Some(&0));
    }

    #[test]
    fn test_batch_rejects_duplicate_agent() {
        let mut batch = GlobalActionBatch::new();
        batch.push(LocalAction::new("agent_0", "hold")).unwrap();

        let err = batch.push(LocalAction::new("agent_0", "bet")).unwrap_err();
        assert_eq!(err, BatchError::DuplicateAgent("agent_0".to_string()));
        assert_eq!(batch.len(), 1);
    }
}
