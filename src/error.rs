use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UInt;

/// Configuration errors. Raised by `Config::validate` before any
/// simulation executes.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("price grid must hold at least two finite, positive, strictly increasing prices")]
    InvalidGrid,
    #[error("period count must be positive")]
    NonPositivePeriods,
    #[error("replicate count must be positive")]
    NonPositiveReplicates,
    #[error("agent count must be 2 or 3, got {0}")]
    UnsupportedAgentCount(usize),
    #[error("exploration decay constant must be positive, got {0}")]
    NonPositiveDecay(f64),
    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
}

/// Errors that abort a single replicate. Other replicates continue.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicateError {
    /// A model fit produced a degenerate or non-finite result. Never
    /// masked by substituting a default action.
    #[error("numerical failure at period {period}: {detail}")]
    Numerical { period: UInt, detail: String },
    /// Indexed selection was requested before the learner's warm-up
    /// window completed.
    #[error("selection requested at period {period} before initialization completed")]
    State { period: UInt },
}

/// A replicate that aborted, tagged with its index so the failure can be
/// reported alongside the surviving replicates.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("replicate {replicate} aborted: {source}")]
pub struct ReplicateFailure {
    pub replicate: UInt,
    #[source]
    pub source: ReplicateError,
}
