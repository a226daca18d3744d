//! Error types for host facility calls and broker operations.

use ruleset_store::StoreError;
use thiserror::Error;

/// Failure reported by a host facility.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Host facility unavailable: {0}")]
    Unavailable(String),

    #[error("Host rejected the operation: {0}")]
    Rejected(String),

    #[error("Unknown ruleset: {0}")]
    UnknownRuleset(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
