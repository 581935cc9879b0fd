use thiserror::Error;

use crate::{
    form::FormField,
    gateway::GatewayError,
    tracker::{OperationKey, Phase, TransitionError},
};

/// Bad local input. Never reaches the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("book name must not be empty")]
    EmptyName,
    #[error("number of copies must be positive")]
    NonPositiveCopies,
    #[error("{field} is required")]
    Missing { field: FormField },
    #[error("{field} must be a whole number, got {value:?}")]
    NotANumber { field: FormField, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no session signer is connected")]
    NotConnected,
    #[error("{key} is already {phase}")]
    InvalidTransition { key: OperationKey, phase: Phase },
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for SyncError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Network(message) => Self::Network(message),
            GatewayError::Unavailable(message) => Self::Unavailable(message),
            GatewayError::Rejected { reason } => Self::Rejected { reason },
        }
    }
}

impl From<TransitionError> for SyncError {
    fn from(value: TransitionError) -> Self {
        Self::InvalidTransition {
            key: value.key,
            phase: value.from,
        }
    }
}

/// A mutation settled but the follow-up refresh did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key} settled in {tx_id} but the view could not be refreshed: {source}")]
pub struct StaleViewError {
    pub key: OperationKey,
    pub tx_id: String,
    pub source: GatewayError,
}
