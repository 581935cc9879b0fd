//! Last-known-good snapshot of the registry.
//!
//! The snapshot is only ever replaced wholesale by a successful read. Reads
//! are ticketed in issue order: a read that completes after a newer read has
//! already been applied is dropped, so a slow query started before a write
//! can never roll the view back to pre-write contents.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    gateway::{GatewayError, RegistryGateway},
    types::{ViewPresentation, ViewSnapshot},
};

struct CacheState {
    snapshot: ViewSnapshot,
    stale: bool,
    next_ticket: u64,
    applied_ticket: u64,
    /// Reads issued with a ticket below this predate the latest confirmed write.
    fresh_from_ticket: u64,
    last_error: Option<GatewayError>,
}

pub struct ViewCache {
    state: RwLock<CacheState>,
    in_flight_reads: AtomicUsize,
}

/// Counts one read as in flight until dropped, including when the refresh
/// future is abandoned mid-read.
struct InFlightRead<'a>(&'a AtomicUsize);

impl<'a> InFlightRead<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightRead<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                snapshot: ViewSnapshot::default(),
                stale: true,
                next_ticket: 0,
                applied_ticket: 0,
                fresh_from_ticket: 0,
                last_error: None,
            }),
            in_flight_reads: AtomicUsize::new(0),
        }
    }

    /// Issues one read and applies it if nothing newer has been applied.
    ///
    /// Returns the snapshot the cache holds afterwards. On failure the
    /// previous snapshot is kept untouched.
    pub async fn refresh(
        &self,
        gateway: &dyn RegistryGateway,
    ) -> Result<ViewSnapshot, GatewayError> {
        let read = InFlightRead::enter(&self.in_flight_reads);
        let ticket = {
            let mut state = self.state.write().await;
            state.next_ticket += 1;
            state.next_ticket
        };

        let result = gateway.list_available().await;

        let mut state = self.state.write().await;
        drop(read);
        match result {
            Ok(items) => {
                if ticket < state.applied_ticket {
                    debug!(
                        ticket,
                        applied = state.applied_ticket,
                        "discarding out-of-order registry read"
                    );
                    return Ok(state.snapshot.clone());
                }
                state.snapshot = ViewSnapshot {
                    items,
                    fetched_at: Some(Utc::now()),
                };
                state.applied_ticket = ticket;
                state.stale = ticket < state.fresh_from_ticket;
                state.last_error = None;
                Ok(state.snapshot.clone())
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Records that the ledger state has moved past every read issued so far.
    pub async fn mark_stale(&self) {
        let mut state = self.state.write().await;
        state.stale = true;
        state.fresh_from_ticket = state.next_ticket + 1;
    }

    pub async fn current(&self) -> ViewSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub async fn is_refreshing(&self) -> bool {
        self.in_flight_reads.load(Ordering::SeqCst) > 0
    }

    pub async fn last_refresh_error(&self) -> Option<GatewayError> {
        self.state.read().await.last_error.clone()
    }

    pub async fn presentation(&self) -> ViewPresentation {
        let state = self.state.read().await;
        if state.stale {
            ViewPresentation::Loading
        } else if state.snapshot.is_empty() {
            ViewPresentation::Empty
        } else {
            ViewPresentation::Populated(state.snapshot.clone())
        }
    }
}

#[cfg(test)]
#[path = "tests/view_cache_tests.rs"]
mod tests;
