//! Capabilities the client consumes from the ledger and the identity layer.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shared::domain::{BlockNumber, BookId, BookSummary, OperationKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{reason}")]
    Rejected { reason: String },
}

impl GatewayError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable(_))
    }
}

/// Receipt of an accepted submission, used to wait for finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitHandle {
    pub tx_id: String,
    pub kind: OperationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedEvent {
    pub tx_id: String,
    pub block_number: Option<BlockNumber>,
}

/// Signing capability bound to the current user session.
pub trait SessionSigner: Send + Sync {
    fn account(&self) -> &str;
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// Deterministic signer for local ledgers and tests: `sha256(account || payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevSigner {
    account: String,
}

impl DevSigner {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

impl SessionSigner for DevSigner {
    fn account(&self) -> &str {
        &self.account
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.account.as_bytes());
        hasher.update(payload);
        hasher.finalize().to_vec()
    }
}

/// The remote registry. Submit calls return once the ledger has accepted the
/// transaction; `await_finality` suspends until it is irreversibly applied or
/// rejected.
#[async_trait]
pub trait RegistryGateway: Send + Sync {
    async fn list_available(&self) -> Result<Vec<BookSummary>, GatewayError>;
    async fn create(
        &self,
        signer: &dyn SessionSigner,
        name: &str,
        copies: u64,
    ) -> Result<SubmitHandle, GatewayError>;
    async fn borrow(
        &self,
        signer: &dyn SessionSigner,
        id: BookId,
    ) -> Result<SubmitHandle, GatewayError>;
    async fn return_book(
        &self,
        signer: &dyn SessionSigner,
        id: BookId,
    ) -> Result<SubmitHandle, GatewayError>;
    async fn await_finality(&self, handle: &SubmitHandle) -> Result<ConfirmedEvent, GatewayError>;
}
