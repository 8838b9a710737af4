//! ZarinPal payment gateway (REST v4) for website checkouts.
//!
//! Amounts are sent in Rials. `errors` comes back as either `[]` or an object,
//! and `data` as either an object or `[]`, so both are read as loose JSON.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use super::{VerifyError, transport_error};
use crate::config::ZarinPalConfig;
use crate::util::{looks_like_html, sanitize_upstream_message, token_prefix};

const STORE: &str = "zarinpal";

const CODE_SUCCESS: i64 = 100;
/// Verified earlier; still a successful payment.
const CODE_ALREADY_VERIFIED: i64 = 101;

/// Error codes that point at our merchant configuration rather than the payment.
const MERCHANT_ERROR_CODES: &[i64] = &[-10, -11, -12, -15, -16];

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    merchant_id: &'a str,
    amount: u64,
    currency: &'static str,
    callback_url: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    merchant_id: &'a str,
    amount: u64,
    authority: &'a str,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub authority: String,
    pub payment_url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub code: i64,
    pub ref_id: Option<String>,
    pub card_pan: Option<String>,
    pub raw: Value,
}

impl PaymentVerification {
    pub fn already_verified(&self) -> bool {
        self.code == CODE_ALREADY_VERIFIED
    }
}

#[derive(Debug, Clone)]
pub struct ZarinPalClient {
    client: Client,
    api_base: String,
    startpay_base: String,
    merchant_id: Option<String>,
}

impl ZarinPalClient {
    pub fn new(client: Client, config: &ZarinPalConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            startpay_base: config.startpay_base.trim_end_matches('/').to_string(),
            merchant_id: config.merchant_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.merchant_id.is_some()
    }

    fn merchant_id(&self) -> Result<&str, VerifyError> {
        self.merchant_id
            .as_deref()
            .ok_or(VerifyError::NotConfigured(STORE))
    }

    pub fn payment_url(&self, authority: &str) -> String {
        format!("{}/{}", self.startpay_base, authority)
    }

    /// Open a payment session. `amount_rial` must be a whole number of Rials.
    pub async fn request_payment(
        &self,
        amount_rial: u64,
        callback_url: &str,
        description: &str,
    ) -> Result<PaymentRequest, VerifyError> {
        let merchant_id = self.merchant_id()?;
        let body = RequestBody {
            merchant_id,
            amount: amount_rial,
            currency: "IRR",
            callback_url,
            description,
        };

        let json = self.post("payment/request.json", &body).await?;
        let code = data_code(&json);

        let authority = json
            .get("data")
            .and_then(|d| d.get("authority"))
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty());

        match (code, authority) {
            (Some(CODE_SUCCESS), Some(authority)) => Ok(PaymentRequest {
                authority: authority.to_string(),
                payment_url: self.payment_url(authority),
            }),
            _ => {
                let (err_code, message) = error_details(&json);
                tracing::warn!(
                    code = ?code.or(err_code),
                    message = ?message,
                    "ZarinPal refused to open a payment"
                );
                if err_code.is_some_and(|c| MERCHANT_ERROR_CODES.contains(&c)) {
                    return Err(VerifyError::Unauthorized(STORE));
                }
                Err(VerifyError::Unavailable {
                    store: STORE,
                    detail: message.unwrap_or_else(|| "payment request failed".into()),
                })
            }
        }
    }

    /// Confirm a payment after the user returns from the gateway.
    pub async fn verify_payment(
        &self,
        amount_rial: u64,
        authority: &str,
    ) -> Result<PaymentVerification, VerifyError> {
        let merchant_id = self.merchant_id()?;

        tracing::debug!(authority = %token_prefix(authority), "Verifying ZarinPal payment");

        let body = VerifyBody {
            merchant_id,
            amount: amount_rial,
            authority,
        };
        let json = self.post("payment/verify.json", &body).await?;

        match data_code(&json) {
            Some(code @ (CODE_SUCCESS | CODE_ALREADY_VERIFIED)) => {
                let data = json.get("data");
                let ref_id = data.and_then(|d| d.get("ref_id")).and_then(|r| match r {
                    Value::Number(n) => Some(n.to_string()),
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                });
                let card_pan = data
                    .and_then(|d| d.get("card_pan"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(PaymentVerification {
                    code,
                    ref_id,
                    card_pan,
                    raw: json,
                })
            }
            code => {
                let (err_code, message) = error_details(&json);
                tracing::info!(
                    code = ?code.or(err_code),
                    message = ?message,
                    "ZarinPal did not confirm payment"
                );
                if err_code.is_some_and(|c| MERCHANT_ERROR_CODES.contains(&c)) {
                    return Err(VerifyError::Unauthorized(STORE));
                }
                Err(VerifyError::rejected(
                    message.unwrap_or_else(|| format!("verification code {:?}", code.or(err_code))),
                ))
            }
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value, VerifyError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, path))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(STORE, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| VerifyError::Unavailable {
            store: STORE,
            detail: format!("failed to read body: {}", e),
        })?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || looks_like_html(&text) {
            let detail = sanitize_upstream_message(&text).unwrap_or_default();
            tracing::warn!(%status, detail = %detail, "ZarinPal unavailable");
            return Err(VerifyError::Unavailable { store: STORE, detail });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!(%status, "ZarinPal rejected merchant credentials");
            return Err(VerifyError::Unauthorized(STORE));
        }

        // 4xx bodies still carry the structured `errors` object.
        serde_json::from_str(&text).map_err(|_| {
            tracing::warn!(%status, "ZarinPal returned a non-JSON body");
            VerifyError::Unavailable {
                store: STORE,
                detail: "malformed response".into(),
            }
        })
    }
}

fn data_code(json: &Value) -> Option<i64> {
    json.get("data")
        .and_then(|d| d.get("code"))
        .and_then(Value::as_i64)
}

fn error_details(json: &Value) -> (Option<i64>, Option<String>) {
    let errors = json.get("errors").filter(|e| e.is_object());
    let code = errors.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = errors
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| {
            json.get("data")
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);
    (code, message)
}
