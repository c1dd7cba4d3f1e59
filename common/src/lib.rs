//! Shared action/observation envelopes for the round-based simulation engine.
//!
//! Every environment mechanism consumes a [`GlobalActionBatch`] of typed per-agent
//! actions and answers with an [`EnvironmentStep`] carrying one observation per agent.
//! The payload types are mechanism-specific; the envelopes are not.

pub mod action;
pub mod observation;

pub use action::{BatchError, GlobalActionBatch, LocalAction};
pub use observation::{EnvironmentStep, GlobalObservation, LocalObservation, StepInfo};

/// Stable identifier of an agent within one simulation run
pub type AgentId = String;
