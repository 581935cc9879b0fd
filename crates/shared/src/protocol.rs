use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BlockNumber, BookId, OperationKind};

/// A mutating call against the registry contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LedgerCall {
    AddBook { name: String, copies: u64 },
    BorrowBook { id: BookId },
    ReturnBook { id: BookId },
}

impl LedgerCall {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::AddBook { .. } => OperationKind::Create,
            Self::BorrowBook { .. } => OperationKind::Borrow,
            Self::ReturnBook { .. } => OperationKind::Return,
        }
    }

    /// Bytes covered by the session signature: the call's JSON encoding.
    pub fn signing_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub account: String,
    pub call: LedgerCall,
    pub signature_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSubmitted {
    pub tx_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Reverted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_id: String,
    pub status: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<BlockNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_call_is_tagged_with_payload() {
        let call = LedgerCall::BorrowBook { id: BookId(5) };
        let value = serde_json::to_value(&call).expect("encode");
        assert_eq!(value["type"], "borrow_book");
        assert_eq!(value["payload"]["id"], 5);
    }

    #[test]
    fn pending_receipt_omits_optional_fields() {
        let receipt: TransactionReceipt =
            serde_json::from_str(r#"{"tx_id":"0xab","status":"pending"}"#).expect("decode");
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        assert!(receipt.block_number.is_none());
        assert!(receipt.reason.is_none());
    }

    #[test]
    fn signing_payload_is_stable_for_equal_calls() {
        let a = LedgerCall::AddBook {
            name: "Dune".into(),
            copies: 3,
        };
        let payload = a.signing_payload().expect("encode");
        assert_eq!(payload, a.clone().signing_payload().expect("encode"));
        assert_eq!(serde_json::from_slice::<LedgerCall>(&payload).expect("decode"), a);
    }
}
