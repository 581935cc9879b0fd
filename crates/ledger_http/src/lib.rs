//! [`RegistryGateway`] over the ledger service's JSON HTTP API.
//!
//! Mutations are posted as signed transactions; finality is observed by
//! polling the transaction receipt until it leaves the pending state.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use client_core::{ConfirmedEvent, GatewayError, RegistryGateway, SessionSigner, SubmitHandle};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{BookId, BookSummary},
    error::{ApiError, ErrorCode},
    protocol::{LedgerCall, ReceiptStatus, TransactionReceipt, TransactionRequest, TransactionSubmitted},
};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Transient poll failures stretch the interval up to this many doublings.
const MAX_BACKOFF_DOUBLINGS: u32 = 3;
const REVERTED_WITHOUT_REASON: &str = "transaction reverted";

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: Url,
    pub contract_address: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for a receipt. `None` waits as long as the ledger
    /// takes, polling through transport failures.
    pub finality_timeout: Option<Duration>,
    pub request_timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: &str, contract_address: impl Into<String>) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            contract_address: contract_address.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            finality_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallClass {
    Read,
    Mutation,
}

pub struct HttpRegistryGateway {
    http: Client,
    config: HttpGatewayConfig,
}

impl HttpRegistryGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpGatewayConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Network(format!("invalid ledger endpoint '{path}': {e}")))
    }

    async fn submit_call(
        &self,
        signer: &dyn SessionSigner,
        call: LedgerCall,
    ) -> Result<SubmitHandle, GatewayError> {
        let kind = call.kind();
        let payload = call
            .signing_payload()
            .map_err(|e| GatewayError::rejected(format!("cannot encode {kind} call: {e}")))?;
        let signature_b64 = STANDARD.encode(signer.sign(&payload));
        let request = TransactionRequest {
            account: signer.account().to_string(),
            call,
            signature_b64,
        };
        let url = self.endpoint(&format!(
            "contracts/{}/transactions",
            self.config.contract_address
        ))?;

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let submitted: TransactionSubmitted = decode(response, CallClass::Mutation).await?;
        debug!(tx_id = %submitted.tx_id, kind = %kind, "transaction accepted by ledger");

        Ok(SubmitHandle {
            tx_id: submitted.tx_id,
            kind,
        })
    }

    async fn fetch_receipt(&self, tx_id: &str) -> Result<TransactionReceipt, GatewayError> {
        let url = self.endpoint(&format!("transactions/{tx_id}/receipt"))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            // Not indexed yet.
            return Ok(TransactionReceipt {
                tx_id: tx_id.to_string(),
                status: ReceiptStatus::Pending,
                block_number: None,
                reason: None,
                confirmed_at: None,
            });
        }
        decode(response, CallClass::Read).await
    }
}

#[async_trait]
impl RegistryGateway for HttpRegistryGateway {
    async fn list_available(&self) -> Result<Vec<BookSummary>, GatewayError> {
        let url = self.endpoint(&format!(
            "contracts/{}/books/available",
            self.config.contract_address
        ))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        decode(response, CallClass::Read).await
    }

    async fn create(
        &self,
        signer: &dyn SessionSigner,
        name: &str,
        copies: u64,
    ) -> Result<SubmitHandle, GatewayError> {
        self.submit_call(
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
        self.submit_call(signer, LedgerCall::BorrowBook { id }).await
    }

    async fn return_book(
        &self,
        signer: &dyn SessionSigner,
        id: BookId,
    ) -> Result<SubmitHandle, GatewayError> {
        self.submit_call(signer, LedgerCall::ReturnBook { id }).await
    }

    async fn await_finality(&self, handle: &SubmitHandle) -> Result<ConfirmedEvent, GatewayError> {
        let deadline = self
            .config
            .finality_timeout
            .map(|timeout| Instant::now() + timeout);
        let mut consecutive_errors: u32 = 0;

        loop {
            match self.fetch_receipt(&handle.tx_id).await {
                Ok(receipt) => {
                    consecutive_errors = 0;
                    match receipt.status {
                        ReceiptStatus::Confirmed => {
                            return Ok(ConfirmedEvent {
                                tx_id: receipt.tx_id,
                                block_number: receipt.block_number,
                            });
                        }
                        ReceiptStatus::Reverted => {
                            return Err(GatewayError::rejected(
                                receipt
                                    .reason
                                    .filter(|reason| !reason.trim().is_empty())
                                    .unwrap_or_else(|| REVERTED_WITHOUT_REASON.to_string()),
                            ));
                        }
                        ReceiptStatus::Pending => {
                            debug!(tx_id = %handle.tx_id, "receipt pending");
                        }
                    }
                }
                // The transaction may still land; only the deadline ends the wait.
                Err(err) if err.is_transient() => {
                    consecutive_errors += 1;
                    warn!(
                        tx_id = %handle.tx_id,
                        attempt = consecutive_errors,
                        error = %err,
                        "receipt poll failed"
                    );
                }
                Err(err) => return Err(err),
            }

            let delay = self.config.poll_interval
                * 2u32.pow(consecutive_errors.min(MAX_BACKOFF_DOUBLINGS));
            if let Some(deadline) = deadline {
                if Instant::now() + delay > deadline {
                    return Err(GatewayError::Network(format!(
                        "transaction {} was not final within {:?}",
                        handle.tx_id,
                        self.config.finality_timeout.unwrap_or_default()
                    )));
                }
            }
            tokio::time::sleep(delay).await;
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Network(format!("ledger request timed out: {err}"))
    } else {
        GatewayError::Network(format!("ledger unreachable: {err}"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response, class: CallClass) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("invalid ledger response: {e}")));
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, class))
}

fn status_error(status: StatusCode, body: &str, class: CallClass) -> GatewayError {
    let api_error = serde_json::from_str::<ApiError>(body).ok();
    let message = api_error
        .as_ref()
        .map(|err| err.message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("ledger request failed")
                .to_string()
        });

    let unavailable = matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) || matches!(api_error.map(|err| err.code), Some(ErrorCode::Unavailable));

    if unavailable || class == CallClass::Read {
        if !unavailable {
            warn!(status = %status, "unexpected ledger read status");
        }
        GatewayError::Unavailable(message)
    } else {
        GatewayError::rejected(message)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
