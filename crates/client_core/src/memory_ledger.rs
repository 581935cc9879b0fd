//! In-process registry ledger.
//!
//! Mutations are checked when submitted and applied when finality is awaited,
//! mirroring a chain where a transaction is accepted into the mempool first
//! and executed in a later block. Finality can be held back and reads can be
//! slowed down so callers can observe the intermediate phases.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{BlockNumber, BookId, BookSummary},
    protocol::LedgerCall,
};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::gateway::{ConfirmedEvent, GatewayError, RegistryGateway, SessionSigner, SubmitHandle};

pub const REASON_NO_COPIES: &str = "no copies available";
pub const REASON_UNKNOWN_BOOK: &str = "unknown book id";
pub const REASON_NOT_BORROWED: &str = "book is not currently borrowed";
pub const REASON_ALREADY_BORROWED: &str = "book already borrowed by this account";
pub const REASON_NOT_OWNER: &str = "caller is not the owner";
pub const REASON_EMPTY_NAME: &str = "book name is required";
pub const REASON_NO_COPIES_ADDED: &str = "number of copies must be positive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalityMode {
    Immediate,
    Delayed(Duration),
    /// Each `await_finality` waits for one permit from `release_finality`.
    Manual,
}

struct PendingTx {
    account: String,
    call: LedgerCall,
}

struct LedgerState {
    books: BTreeMap<BookId, BookSummary>,
    next_id: u64,
    loans: HashSet<(String, BookId)>,
    pending: HashMap<String, PendingTx>,
    block: u64,
    owner: Option<String>,
    list_failures: VecDeque<GatewayError>,
    submit_failures: VecDeque<GatewayError>,
    list_calls: usize,
    submit_calls: usize,
}

pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    finality: Mutex<FinalityMode>,
    finality_gate: Semaphore,
    read_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_books(Vec::new())
    }

    pub fn with_books(books: Vec<BookSummary>) -> Self {
        let next_id = books.iter().map(|book| book.id.0 + 1).max().unwrap_or(1);
        Self {
            state: Mutex::new(LedgerState {
                books: books.into_iter().map(|book| (book.id, book)).collect(),
                next_id,
                loans: HashSet::new(),
                pending: HashMap::new(),
                block: 0,
                owner: None,
                list_failures: VecDeque::new(),
                submit_failures: VecDeque::new(),
                list_calls: 0,
                submit_calls: 0,
            }),
            finality: Mutex::new(FinalityMode::Immediate),
            finality_gate: Semaphore::new(0),
            read_delay: Mutex::new(None),
        }
    }

    /// Restricts `create` to one account.
    pub async fn set_owner(&self, account: impl Into<String>) {
        self.state.lock().await.owner = Some(account.into());
    }

    pub async fn set_finality(&self, mode: FinalityMode) {
        *self.finality.lock().await = mode;
    }

    /// Lets `count` waiters in [`FinalityMode::Manual`] reach finality.
    pub fn release_finality(&self, count: usize) {
        self.finality_gate.add_permits(count);
    }

    /// Reads capture ledger contents immediately and return them after `delay`.
    pub async fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().await = delay;
    }

    pub async fn fail_next_list(&self, err: GatewayError) {
        self.state.lock().await.list_failures.push_back(err);
    }

    pub async fn fail_next_submit(&self, err: GatewayError) {
        self.state.lock().await.submit_failures.push_back(err);
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    pub async fn submit_calls(&self) -> usize {
        self.state.lock().await.submit_calls
    }

    /// Full registry contents, including books with no copies left.
    pub async fn books(&self) -> Vec<BookSummary> {
        self.state.lock().await.books.values().cloned().collect()
    }

    async fn submit(
        &self,
        signer: &dyn SessionSigner,
        call: LedgerCall,
    ) -> Result<SubmitHandle, GatewayError> {
        let mut state = self.state.lock().await;
        state.submit_calls += 1;
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        check_call(&state, signer.account(), &call)?;

        let tx_id = format!("0x{}", Uuid::new_v4().simple());
        let kind = call.kind();
        state.pending.insert(
            tx_id.clone(),
            PendingTx {
                account: signer.account().to_string(),
                call,
            },
        );
        Ok(SubmitHandle { tx_id, kind })
    }
}

#[async_trait]
impl RegistryGateway for MemoryLedger {
    async fn list_available(&self) -> Result<Vec<BookSummary>, GatewayError> {
        let books = {
            let mut state = self.state.lock().await;
            state.list_calls += 1;
            if let Some(err) = state.list_failures.pop_front() {
                return Err(err);
            }
            state
                .books
                .values()
                .filter(|book| book.available_copies > 0)
                .cloned()
                .collect::<Vec<_>>()
        };

        let delay = *self.read_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(books)
    }

    async fn create(
        &self,
        signer: &dyn SessionSigner,
        name: &str,
        copies: u64,
    ) -> Result<SubmitHandle, GatewayError> {
        self.submit(
            signer,
            LedgerCall::AddBook {
                name: name.to_string(),
                copies,
            },
        )
        .await
    }

    async fn borrow(
        &self,
        signer: &dyn SessionSigner,
        id: BookId,
    ) -> Result<SubmitHandle, GatewayError> {
        self.submit(signer, LedgerCall::BorrowBook { id }).await
    }

    async fn return_book(
        &self,
        signer: &dyn SessionSigner,
        id: BookId,
    ) -> Result<SubmitHandle, GatewayError> {
        self.submit(signer, LedgerCall::ReturnBook { id }).await
    }

    async fn await_finality(&self, handle: &SubmitHandle) -> Result<ConfirmedEvent, GatewayError> {
        let mode = *self.finality.lock().await;
        match mode {
            FinalityMode::Immediate => {}
            FinalityMode::Delayed(delay) => tokio::time::sleep(delay).await,
            FinalityMode::Manual => {
                self.finality_gate
                    .acquire()
                    .await
                    .map_err(|_| GatewayError::Unavailable("ledger shut down".into()))?
                    .forget();
            }
        }

        let mut state = self.state.lock().await;
        let pending = state
            .pending
            .remove(&handle.tx_id)
            .ok_or_else(|| GatewayError::rejected(format!("unknown transaction {}", handle.tx_id)))?;
        // Re-checked at execution time: other transactions may have landed since submission.
        check_call(&state, &pending.account, &pending.call)?;
        apply_call(&mut state, pending);
        state.block += 1;

        Ok(ConfirmedEvent {
            tx_id: handle.tx_id.clone(),
            block_number: Some(BlockNumber(state.block)),
        })
    }
}

fn check_call(state: &LedgerState, account: &str, call: &LedgerCall) -> Result<(), GatewayError> {
    match call {
        LedgerCall::AddBook { name, copies } => {
            if let Some(owner) = &state.owner {
                if owner != account {
                    return Err(GatewayError::rejected(REASON_NOT_OWNER));
                }
            }
            if name.trim().is_empty() {
                return Err(GatewayError::rejected(REASON_EMPTY_NAME));
            }
            if *copies == 0 {
                return Err(GatewayError::rejected(REASON_NO_COPIES_ADDED));
            }
        }
        LedgerCall::BorrowBook { id } => {
            let book = state
                .books
                .get(id)
                .ok_or_else(|| GatewayError::rejected(REASON_UNKNOWN_BOOK))?;
            if book.available_copies == 0 {
                return Err(GatewayError::rejected(REASON_NO_COPIES));
            }
            if state.loans.contains(&(account.to_string(), *id)) {
                return Err(GatewayError::rejected(REASON_ALREADY_BORROWED));
            }
        }
        LedgerCall::ReturnBook { id } => {
            if !state.books.contains_key(id) {
                return Err(GatewayError::rejected(REASON_UNKNOWN_BOOK));
            }
            if !state.loans.contains(&(account.to_string(), *id)) {
                return Err(GatewayError::rejected(REASON_NOT_BORROWED));
            }
        }
    }
    Ok(())
}

fn apply_call(state: &mut LedgerState, pending: PendingTx) {
    match pending.call {
        LedgerCall::AddBook { name, copies } => {
            let id = BookId(state.next_id);
            state.next_id += 1;
            state.books.insert(
                id,
                BookSummary {
                    id,
                    name,
                    total_copies: copies,
                    available_copies: copies,
                },
            );
        }
        LedgerCall::BorrowBook { id } => {
            if let Some(book) = state.books.get_mut(&id) {
                book.available_copies -= 1;
            }
            state.loans.insert((pending.account, id));
        }
        LedgerCall::ReturnBook { id } => {
            if let Some(book) = state.books.get_mut(&id) {
                book.available_copies += 1;
            }
            state.loans.remove(&(pending.account, id));
        }
    }
}

#[cfg(test)]
#[path = "tests/memory_ledger_tests.rs"]
mod tests;
