use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(BookId);
id_newtype!(BlockNumber);

/// One entry of the registry as reported by the ledger.
///
/// `available_copies <= total_copies` is enforced by the ledger; the client
/// never checks or repairs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: BookId,
    pub name: String,
    pub total_copies: u64,
    pub available_copies: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Borrow,
    Return,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [Self::Create, Self::Borrow, Self::Return];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Borrow => "borrow",
            Self::Return => "return",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_id_serializes_as_bare_number() {
        let encoded = serde_json::to_string(&BookId(5)).expect("encode");
        assert_eq!(encoded, "5");
    }

    #[test]
    fn book_summary_uses_snake_case_fields() {
        let book: BookSummary = serde_json::from_str(
            r#"{"id":3,"name":"Dune","total_copies":4,"available_copies":2}"#,
        )
        .expect("decode");
        assert_eq!(book.id, BookId(3));
        assert_eq!(book.available_copies, 2);
    }
}
