use chrono::{DateTime, Utc};
use shared::domain::{BlockNumber, BookId, BookSummary, OperationKind};

use crate::{error::{StaleViewError, ValidationError}, tracker::OperationKey};

/// A single-use mutation of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    CreateItem { name: String, copies: u64 },
    BorrowItem { id: BookId },
    ReturnItem { id: BookId },
}

impl MutationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateItem { .. } => OperationKind::Create,
            Self::BorrowItem { .. } => OperationKind::Borrow,
            Self::ReturnItem { .. } => OperationKind::Return,
        }
    }

    pub fn item(&self) -> Option<BookId> {
        match self {
            Self::CreateItem { .. } => None,
            Self::BorrowItem { id } | Self::ReturnItem { id } => Some(*id),
        }
    }

    /// Local shape checks; these never consult the ledger.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::CreateItem { name, copies } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::EmptyName);
                }
                if *copies == 0 {
                    return Err(ValidationError::NonPositiveCopies);
                }
                Ok(())
            }
            Self::BorrowItem { .. } | Self::ReturnItem { .. } => Ok(()),
        }
    }
}

/// Wholesale copy of the registry as of one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub items: Vec<BookSummary>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ViewSnapshot {
    pub fn find(&self, id: BookId) -> Option<&BookSummary> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&BookSummary> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What a reader should render for the current cache contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewPresentation {
    Loading,
    Empty,
    Populated(ViewSnapshot),
}

/// Successful outcome of a submission.
///
/// `stale_view` is set when the write reached finality but the follow-up
/// refresh failed; the mutation itself still counts as settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub key: OperationKey,
    pub tx_id: String,
    pub block_number: Option<BlockNumber>,
    pub stale_view: Option<StaleViewError>,
}

impl Settlement {
    pub fn is_view_fresh(&self) -> bool {
        self.stale_view.is_none()
    }
}
