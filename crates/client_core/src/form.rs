//! Staging buffer for user-entered input that has not been submitted yet.

use std::{fmt, str::FromStr};

use shared::domain::{BookId, OperationKind};

use crate::{error::ValidationError, types::MutationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormField {
    BookName,
    NumberOfCopies,
    IdToBorrow,
    IdToReturn,
}

impl FormField {
    pub fn name(self) -> &'static str {
        match self {
            Self::BookName => "book_name",
            Self::NumberOfCopies => "number_of_copies",
            Self::IdToBorrow => "id_to_borrow",
            Self::IdToReturn => "id_to_return",
        }
    }

    /// The operation this field feeds.
    pub fn kind(self) -> OperationKind {
        match self {
            Self::BookName | Self::NumberOfCopies => OperationKind::Create,
            Self::IdToBorrow => OperationKind::Borrow,
            Self::IdToReturn => OperationKind::Return,
        }
    }

    fn for_kind(kind: OperationKind) -> &'static [FormField] {
        match kind {
            OperationKind::Create => &[Self::BookName, Self::NumberOfCopies],
            OperationKind::Borrow => &[Self::IdToBorrow],
            OperationKind::Return => &[Self::IdToReturn],
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormField {
    type Err = String;

    // Accepts both the snake_case names and the camelCase input names used by web forms.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "book_name" | "bookName" => Ok(Self::BookName),
            "number_of_copies" | "numberOfCopies" => Ok(Self::NumberOfCopies),
            "id_to_borrow" | "idToBorrow" => Ok(Self::IdToBorrow),
            "id_to_return" | "idToReturn" => Ok(Self::IdToReturn),
            other => Err(format!("unknown form field '{other}'")),
        }
    }
}

/// Raw text for every input, exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedForm {
    book_name: String,
    number_of_copies: String,
    id_to_borrow: String,
    id_to_return: String,
}

impl StagedForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, field: FormField, value: impl Into<String>) {
        *self.slot_mut(field) = value.into();
    }

    pub fn value(&self, field: FormField) -> &str {
        match field {
            FormField::BookName => &self.book_name,
            FormField::NumberOfCopies => &self.number_of_copies,
            FormField::IdToBorrow => &self.id_to_borrow,
            FormField::IdToReturn => &self.id_to_return,
        }
    }

    /// Coerces the staged text into a request. Does not mutate the buffer.
    pub fn snapshot_for(&self, kind: OperationKind) -> Result<MutationRequest, ValidationError> {
        match kind {
            OperationKind::Create => Ok(MutationRequest::CreateItem {
                name: self.book_name.trim().to_string(),
                copies: parse_whole_number(FormField::NumberOfCopies, &self.number_of_copies)?,
            }),
            OperationKind::Borrow => Ok(MutationRequest::BorrowItem {
                id: BookId(parse_whole_number(FormField::IdToBorrow, &self.id_to_borrow)?),
            }),
            OperationKind::Return => Ok(MutationRequest::ReturnItem {
                id: BookId(parse_whole_number(FormField::IdToReturn, &self.id_to_return)?),
            }),
        }
    }

    /// Clears only the inputs that feed `kind`.
    pub fn reset_for(&mut self, kind: OperationKind) {
        for field in FormField::for_kind(kind) {
            self.slot_mut(*field).clear();
        }
    }

    fn slot_mut(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::BookName => &mut self.book_name,
            FormField::NumberOfCopies => &mut self.number_of_copies,
            FormField::IdToBorrow => &mut self.id_to_borrow,
            FormField::IdToReturn => &mut self.id_to_return,
        }
    }
}

fn parse_whole_number(field: FormField, raw: &str) -> Result<u64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| ValidationError::NotANumber {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
#[path = "tests/form_tests.rs"]
mod tests;
