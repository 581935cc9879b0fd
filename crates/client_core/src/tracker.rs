use std::{collections::HashMap, fmt};

use serde::Deserialize;
use shared::domain::{BookId, OperationKind};
use thiserror::Error;

use crate::types::MutationRequest;

const GENERIC_FAILURE_REASON: &str = "transaction failed";

/// Unit of single-flight: at most one operation per key is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub item: Option<BookId>,
}

impl OperationKey {
    pub fn kind_only(kind: OperationKind) -> Self {
        Self { kind, item: None }
    }

    pub fn for_item(kind: OperationKind, item: BookId) -> Self {
        Self {
            kind,
            item: Some(item),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item {
            Some(item) => write!(f, "{}#{}", self.kind, item),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// How requests map onto tracker keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingGranularity {
    /// One tracked operation per kind; a borrow of any book blocks every other borrow.
    PerKind,
    /// Borrow and return are tracked per book; create stays per kind.
    #[default]
    PerItem,
}

impl TrackingGranularity {
    pub fn key_for(self, request: &MutationRequest) -> OperationKey {
        let kind = request.kind();
        match (self, request.item()) {
            (Self::PerItem, Some(item)) => OperationKey::for_item(kind, item),
            _ => OperationKey::kind_only(kind),
        }
    }
}

impl std::str::FromStr for TrackingGranularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_kind" | "kind" => Ok(Self::PerKind),
            "per_item" | "item" => Ok(Self::PerItem),
            other => Err(format!("unknown tracking granularity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    AwaitingFinality,
    Failed,
    Settled,
}

impl Phase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitting | Self::AwaitingFinality)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingFinality => "awaiting finality",
            Self::Failed => "failed",
            Self::Settled => "settled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationState {
    pub key: OperationKey,
    pub phase: Phase,
    pub last_error: Option<String>,
    /// Transaction id of the submission currently or last tracked under this key.
    pub tx_id: Option<String>,
}

impl OperationState {
    fn idle(key: OperationKey) -> Self {
        Self {
            key,
            phase: Phase::Idle,
            last_error: None,
            tx_id: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase.is_in_flight()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} {key} while it is {from}")]
pub struct TransitionError {
    pub key: OperationKey,
    pub from: Phase,
    pub action: &'static str,
}

/// In-memory lifecycle state for every operation key seen so far.
///
/// Transitions are pure; callers are responsible for serializing access.
#[derive(Debug, Default)]
pub struct OperationTracker {
    states: HashMap<OperationKey, OperationState>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, key: OperationKey) -> OperationState {
        self.states
            .get(&key)
            .cloned()
            .unwrap_or_else(|| OperationState::idle(key))
    }

    pub fn in_flight(&self, kind: OperationKind) -> bool {
        self.states
            .values()
            .any(|state| state.key.kind == kind && state.phase.is_in_flight())
    }

    /// Every tracked state, ordered by kind then item.
    pub fn states(&self) -> Vec<OperationState> {
        let mut states: Vec<_> = self.states.values().cloned().collect();
        states.sort_by_key(|state| {
            let kind_rank = OperationKind::ALL
                .iter()
                .position(|kind| *kind == state.key.kind)
                .unwrap_or(usize::MAX);
            (kind_rank, state.key.item)
        });
        states
    }

    pub fn begin(&mut self, key: OperationKey) -> Result<OperationState, TransitionError> {
        let state = self.entry(key);
        if state.phase.is_in_flight() {
            return Err(TransitionError {
                key,
                from: state.phase,
                action: "begin",
            });
        }
        state.phase = Phase::Submitting;
        state.last_error = None;
        state.tx_id = None;
        Ok(state.clone())
    }

    pub fn await_finality(
        &mut self,
        key: OperationKey,
        tx_id: impl Into<String>,
    ) -> Result<OperationState, TransitionError> {
        let state = self.entry(key);
        if state.phase != Phase::Submitting {
            return Err(TransitionError {
                key,
                from: state.phase,
                action: "await finality for",
            });
        }
        state.phase = Phase::AwaitingFinality;
        state.tx_id = Some(tx_id.into());
        Ok(state.clone())
    }

    pub fn fail(
        &mut self,
        key: OperationKey,
        reason: impl Into<String>,
    ) -> Result<OperationState, TransitionError> {
        let state = self.entry(key);
        if !state.phase.is_in_flight() {
            return Err(TransitionError {
                key,
                from: state.phase,
                action: "fail",
            });
        }
        let reason = reason.into();
        state.phase = Phase::Failed;
        state.last_error = Some(if reason.trim().is_empty() {
            GENERIC_FAILURE_REASON.to_string()
        } else {
            reason
        });
        Ok(state.clone())
    }

    pub fn settle(&mut self, key: OperationKey) -> Result<OperationState, TransitionError> {
        let state = self.entry(key);
        if state.phase != Phase::AwaitingFinality {
            return Err(TransitionError {
                key,
                from: state.phase,
                action: "settle",
            });
        }
        state.phase = Phase::Settled;
        state.last_error = None;
        Ok(state.clone())
    }

    fn entry(&mut self, key: OperationKey) -> &mut OperationState {
        self.states
            .entry(key)
            .or_insert_with(|| OperationState::idle(key))
    }
}

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tests;
