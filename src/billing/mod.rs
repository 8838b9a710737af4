//! Clients for the billing platforms' verification APIs.
//!
//! Every outbound call is classified into one of the `VerifyError` variants so
//! handlers can tell "the store said no" (400) apart from "we could not ask"
//! (503). Upstream text is sanitized before it is stored in an error.

mod cafebazaar;
mod myket;
mod zarinpal;

pub use cafebazaar::CafeBazaarClient;
pub use myket::MyketClient;
pub use zarinpal::{PaymentRequest, PaymentVerification, ZarinPalClient};

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::error::{AppError, msg};
use crate::models::BillingPlatform;
use crate::util::{looks_like_html, sanitize_upstream_message};

/// Shared HTTP client. Requests that exceed the timeout surface as 503s.
pub fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(timeout_secs.clamp(1, 10)))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// Append `segments` to the API base, percent-encoding each one.
///
/// Client-supplied tokens and SKUs go through here, so a `/`, `?` or `#`
/// inside them can never change which upstream resource is addressed.
fn store_url(store: &'static str, api_base: &str, segments: &[&str]) -> Result<Url, VerifyError> {
    let misconfigured = |detail: String| VerifyError::Unavailable { store, detail };

    let mut url = Url::parse(api_base).map_err(|e| misconfigured(format!("invalid API base: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| misconfigured("API base cannot carry a path".into()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Credentials for this platform are not set.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The platform looked at the receipt and refused it.
    #[error("purchase rejected: {detail:?}")]
    Rejected { detail: Option<String> },

    /// The platform refused our own credentials.
    #[error("{0} rejected our credentials")]
    Unauthorized(&'static str),

    /// Transport failure, 5xx, or a body that is not the expected JSON.
    #[error("{store} unavailable: {detail}")]
    Unavailable { store: &'static str, detail: String },
}

impl VerifyError {
    pub fn rejected(detail: impl Into<String>) -> Self {
        VerifyError::Rejected {
            detail: sanitize_upstream_message(&detail.into()),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotConfigured(_) => {
                AppError::ServiceUnavailable(msg::SERVICE_NOT_CONFIGURED.into())
            }
            VerifyError::Rejected { detail } => AppError::StoreRejected { detail },
            VerifyError::Unauthorized(_) | VerifyError::Unavailable { .. } => {
                AppError::ServiceUnavailable(msg::UPSTREAM_UNAVAILABLE.into())
            }
        }
    }
}

/// A receipt the store confirmed as purchased.
#[derive(Debug, Clone)]
pub struct StorePurchase {
    pub purchase_state: i32,
    pub consumption_state: Option<i32>,
    /// Milliseconds since epoch, as reported by the store
    pub purchase_time: Option<i64>,
    pub developer_payload: Option<String>,
    /// Full verification payload, kept on the payment row
    pub raw: serde_json::Value,
}

/// Receipt shape shared by the CafeBazaar and Myket validation endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreReceipt {
    purchase_state: Option<i32>,
    consumption_state: Option<i32>,
    purchase_time: Option<i64>,
    developer_payload: Option<String>,
}

impl StoreReceipt {
    /// `purchaseState` 0 means purchased; anything else (refunded, cancelled) is a rejection.
    fn into_purchase(self, raw: serde_json::Value) -> Result<StorePurchase, VerifyError> {
        match self.purchase_state {
            Some(0) => Ok(StorePurchase {
                purchase_state: 0,
                consumption_state: self.consumption_state,
                purchase_time: self.purchase_time,
                developer_payload: self.developer_payload,
                raw,
            }),
            Some(state) => Err(VerifyError::rejected(format!(
                "purchaseState is {}",
                state
            ))),
            None => Err(VerifyError::rejected("receipt has no purchaseState")),
        }
    }
}

/// Receipt verification for an app store.
pub trait StoreVerifier: Send + Sync {
    fn platform(&self) -> BillingPlatform;

    fn is_configured(&self) -> bool;

    fn verify(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> impl Future<Output = Result<StorePurchase, VerifyError>> + Send;

    /// Whether completed purchases must be acknowledged back to the store.
    fn requires_acknowledgment(&self) -> bool {
        false
    }

    /// Tell the store the purchase was delivered. Default: nothing to do.
    fn acknowledge(
        &self,
        _product_id: &str,
        _purchase_token: &str,
    ) -> impl Future<Output = Result<(), VerifyError>> + Send {
        async { Ok(()) }
    }
}

/// Pull a human-readable message out of a JSON error body.
fn extract_message(body: &serde_json::Value) -> Option<String> {
    ["error_description", "message", "detail", "error", "msg"]
        .iter()
        .find_map(|key| body.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Read a store response and classify it. Returns the parsed JSON of a 2xx.
async fn read_store_response(
    store: &'static str,
    response: Response,
) -> Result<serde_json::Value, VerifyError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| VerifyError::Unavailable {
        store,
        detail: format!("failed to read body: {}", e),
    })?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::error!(store, %status, "Store rejected our credentials");
        return Err(VerifyError::Unauthorized(store));
    }

    if looks_like_html(&body) {
        let detail = sanitize_upstream_message(&body).unwrap_or_default();
        tracing::warn!(store, %status, detail = %detail, "Store returned markup instead of JSON");
        return Err(VerifyError::Unavailable { store, detail });
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        let detail = sanitize_upstream_message(&body).unwrap_or_default();
        tracing::warn!(store, %status, detail = %detail, "Store unavailable");
        return Err(VerifyError::Unavailable { store, detail });
    }

    let json: Option<serde_json::Value> = serde_json::from_str(&body).ok();

    if status.is_client_error() {
        let detail = json
            .as_ref()
            .and_then(extract_message)
            .unwrap_or_else(|| body.clone());
        tracing::info!(store, %status, "Store rejected purchase");
        return Err(VerifyError::rejected(detail));
    }

    json.ok_or_else(|| {
        tracing::warn!(store, %status, "Store returned a non-JSON body");
        VerifyError::Unavailable {
            store,
            detail: "malformed response".into(),
        }
    })
}

fn transport_error(store: &'static str, err: reqwest::Error) -> VerifyError {
    tracing::warn!(store, timeout = err.is_timeout(), "Store request failed: {}", err);
    VerifyError::Unavailable {
        store,
        detail: if err.is_timeout() {
            "timed out".into()
        } else {
            "request failed".into()
        },
    }
}
