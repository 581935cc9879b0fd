use std::{collections::HashMap, future::Future, sync::Arc};

use futures::{Stream, StreamExt};
use shared::domain::OperationKind;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

pub mod error;
pub mod form;
pub mod gateway;
pub mod memory_ledger;
pub mod tracker;
pub mod types;
pub mod view_cache;

pub use error::{StaleViewError, SyncError, ValidationError};
pub use form::{FormField, StagedForm};
pub use gateway::{
    ConfirmedEvent, DevSigner, GatewayError, RegistryGateway, SessionSigner, SubmitHandle,
};
pub use memory_ledger::{FinalityMode, MemoryLedger};
pub use tracker::{OperationKey, OperationState, OperationTracker, Phase, TrackingGranularity};
pub use types::{MutationRequest, Settlement, ViewPresentation, ViewSnapshot};
pub use view_cache::ViewCache;

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    OperationChanged(OperationState),
    ViewRefreshStarted,
    ViewRefreshed(ViewSnapshot),
    ViewRefreshFailed(GatewayError),
    /// A mutation settled but the view could not be brought up to date.
    ViewStale(StaleViewError),
    /// Staged text for `kind` could not be turned into a request.
    StagedInputRejected {
        kind: OperationKind,
        error: ValidationError,
    },
    SessionChanged { account: Option<String> },
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub granularity: TrackingGranularity,
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            granularity: TrackingGranularity::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Client-side state for one registry session.
///
/// Owns the operation tracker, the view cache and the staged form, and runs
/// every mutation as submit, await finality, refresh. No internal lock is
/// held across a gateway call. Operation events are published while the
/// tracker lock is held, so per-key event order matches transition order.
pub struct RegistryClient {
    gateway: Arc<dyn RegistryGateway>,
    granularity: TrackingGranularity,
    session: RwLock<Option<Arc<dyn SessionSigner>>>,
    tracker: Mutex<OperationTracker>,
    cache: ViewCache,
    form: Mutex<StagedForm>,
    staged_errors: Mutex<HashMap<OperationKind, ValidationError>>,
    events: broadcast::Sender<ClientEvent>,
}

impl RegistryClient {
    pub fn new(gateway: Arc<dyn RegistryGateway>) -> Arc<Self> {
        Self::with_options(gateway, ClientOptions::default())
    }

    pub fn with_options(gateway: Arc<dyn RegistryGateway>, options: ClientOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Arc::new(Self {
            gateway,
            granularity: options.granularity,
            session: RwLock::new(None),
            tracker: Mutex::new(OperationTracker::new()),
            cache: ViewCache::new(),
            form: Mutex::new(StagedForm::new()),
            staged_errors: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Binds a session signer and loads the registry.
    pub async fn connect(
        &self,
        signer: Arc<dyn SessionSigner>,
    ) -> Result<ViewSnapshot, GatewayError> {
        let account = signer.account().to_string();
        *self.session.write().await = Some(signer);
        info!(account = %account, "registry session connected");
        self.publish(ClientEvent::SessionChanged {
            account: Some(account),
        });
        self.refresh().await
    }

    pub async fn disconnect(&self) {
        if self.session.write().await.take().is_some() {
            info!("registry session disconnected");
            self.publish(ClientEvent::SessionChanged { account: None });
        }
    }

    pub async fn account(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|signer| signer.account().to_string())
    }

    /// The independent read path. Readers must not assume it observes their own writes.
    pub async fn refresh(&self) -> Result<ViewSnapshot, GatewayError> {
        self.publish(ClientEvent::ViewRefreshStarted);
        match self.cache.refresh(self.gateway.as_ref()).await {
            Ok(snapshot) => {
                debug!(items = snapshot.items.len(), "registry view refreshed");
                self.publish(ClientEvent::ViewRefreshed(snapshot.clone()));
                Ok(snapshot)
            }
            Err(err) => {
                warn!(error = %err, transient = err.is_transient(), "registry refresh failed");
                self.publish(ClientEvent::ViewRefreshFailed(err.clone()));
                Err(err)
            }
        }
    }

    /// Submits `request` and returns once the ledger has finalized it and the
    /// view has been refreshed.
    ///
    /// Everything after `begin` runs on its own task, so the key still reaches
    /// `Failed` or `Settled` if the caller stops waiting.
    pub async fn submit(self: &Arc<Self>, request: MutationRequest) -> Result<Settlement, SyncError> {
        let signer = self.signer().await?;
        let key = self.granularity.key_for(&request);
        self.begin(key).await?;

        let this = Arc::clone(self);
        self.run_detached(key, async move {
            if let Err(err) = request.validate() {
                this.fail(key, &err.to_string()).await;
                return Err(err.into());
            }
            this.drive(key, request, signer.as_ref()).await
        })
        .await
    }

    /// Submits whatever is staged in the form for `kind`.
    ///
    /// Input that cannot be coerced is recorded as a failure on the kind-level
    /// key and kept as the staged error for `kind` (see
    /// [`staged_error`](Self::staged_error)); the staged text is kept so it
    /// can be corrected and retried.
    pub async fn submit_staged(self: &Arc<Self>, kind: OperationKind) -> Result<Settlement, SyncError> {
        self.signer().await?;
        let staged = self.form.lock().await.snapshot_for(kind);
        match staged {
            Ok(request) => {
                self.staged_errors.lock().await.remove(&kind);
                self.submit(request).await
            }
            Err(err) => {
                self.staged_errors.lock().await.insert(kind, err.clone());
                self.publish(ClientEvent::StagedInputRejected {
                    kind,
                    error: err.clone(),
                });

                let key = OperationKey::kind_only(kind);
                self.begin(key).await?;
                let this = Arc::clone(self);
                self.run_detached(key, async move {
                    this.fail(key, &err.to_string()).await;
                    Err(err.into())
                })
                .await
            }
        }
    }

    /// Why the staged input for `kind` was last refused, independent of which
    /// tracker key the UI renders. Cleared by editing a field of `kind` or by
    /// a staged submission that coerces.
    pub async fn staged_error(&self, kind: OperationKind) -> Option<ValidationError> {
        self.staged_errors.lock().await.get(&kind).cloned()
    }

    pub async fn update_form(&self, field: FormField, value: impl Into<String>) {
        self.form.lock().await.update(field, value);
        self.staged_errors.lock().await.remove(&field.kind());
    }

    pub async fn staged_form(&self) -> StagedForm {
        self.form.lock().await.clone()
    }

    pub async fn operation_state(&self, key: OperationKey) -> OperationState {
        self.tracker.lock().await.state_of(key)
    }

    pub async fn operation_states(&self) -> Vec<OperationState> {
        self.tracker.lock().await.states()
    }

    pub async fn is_busy(&self, kind: OperationKind) -> bool {
        self.tracker.lock().await.in_flight(kind)
    }

    pub fn key_for(&self, request: &MutationRequest) -> OperationKey {
        self.granularity.key_for(request)
    }

    pub fn view(&self) -> &ViewCache {
        &self.cache
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Same events as [`subscribe_events`](Self::subscribe_events); lagged items are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = ClientEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
    }

    async fn drive(
        &self,
        key: OperationKey,
        request: MutationRequest,
        signer: &dyn SessionSigner,
    ) -> Result<Settlement, SyncError> {
        let handle = match self.dispatch(request, signer).await {
            Ok(handle) => handle,
            Err(err) => {
                self.reject(key, err.clone()).await;
                return Err(err.into());
            }
        };

        {
            let mut tracker = self.tracker.lock().await;
            let state = tracker.await_finality(key, handle.tx_id.clone())?;
            self.publish(ClientEvent::OperationChanged(state));
        }
        debug!(key = %key, tx_id = %handle.tx_id, "awaiting finality");

        let confirmed = match self.gateway.await_finality(&handle).await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                self.reject(key, err.clone()).await;
                return Err(err.into());
            }
        };

        self.cache.mark_stale().await;
        let stale_view = match self.refresh().await {
            Ok(_) => None,
            Err(source) => {
                let stale = StaleViewError {
                    key,
                    tx_id: confirmed.tx_id.clone(),
                    source,
                };
                warn!(key = %key, tx_id = %confirmed.tx_id, "mutation settled with a stale view");
                self.publish(ClientEvent::ViewStale(stale.clone()));
                Some(stale)
            }
        };

        {
            let mut tracker = self.tracker.lock().await;
            let state = tracker.settle(key)?;
            self.form.lock().await.reset_for(key.kind);
            self.publish(ClientEvent::OperationChanged(state));
        }
        info!(
            key = %key,
            tx_id = %confirmed.tx_id,
            block = ?confirmed.block_number,
            "mutation settled"
        );

        Ok(Settlement {
            key,
            tx_id: confirmed.tx_id,
            block_number: confirmed.block_number,
            stale_view,
        })
    }

    async fn run_detached<F>(&self, key: OperationKey, work: F) -> Result<Settlement, SyncError>
    where
        F: Future<Output = Result<Settlement, SyncError>> + Send + 'static,
    {
        match tokio::spawn(work).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail(key, "submission task did not complete").await;
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
                Err(SyncError::Network(format!("submission task for {key} was cancelled")))
            }
        }
    }

    async fn dispatch(
        &self,
        request: MutationRequest,
        signer: &dyn SessionSigner,
    ) -> Result<SubmitHandle, GatewayError> {
        match request {
            MutationRequest::CreateItem { name, copies } => {
                self.gateway.create(signer, name.trim(), copies).await
            }
            MutationRequest::BorrowItem { id } => self.gateway.borrow(signer, id).await,
            MutationRequest::ReturnItem { id } => self.gateway.return_book(signer, id).await,
        }
    }

    async fn signer(&self) -> Result<Arc<dyn SessionSigner>, SyncError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(SyncError::NotConnected)
    }

    async fn begin(&self, key: OperationKey) -> Result<(), SyncError> {
        let mut tracker = self.tracker.lock().await;
        let state = tracker.begin(key).map_err(|err| {
            debug!(key = %key, phase = %err.from, "rejected duplicate submission");
            SyncError::from(err)
        })?;
        self.publish(ClientEvent::OperationChanged(state));
        Ok(())
    }

    async fn reject(&self, key: OperationKey, err: GatewayError) {
        warn!(key = %key, error = %err, transient = err.is_transient(), "mutation failed");
        self.fail(key, &err.to_string()).await;
    }

    async fn fail(&self, key: OperationKey, reason: &str) {
        let mut tracker = self.tracker.lock().await;
        match tracker.fail(key, reason) {
            Ok(state) => self.publish(ClientEvent::OperationChanged(state)),
            Err(err) => warn!(error = %err, "dropping failure for untracked operation"),
        }
    }

    fn publish(&self, event: ClientEvent) {
        // No subscribers is fine; the state is still readable through accessors.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
