//! Website checkout completion via ZarinPal.
//!
//! The pending payment row (created at checkout) is keyed by the gateway's
//! `authority`, stored in `purchase_token`. Completion goes through the same
//! claim-and-activate transaction as the store flows.

use axum::{Extension, extract::State};
use serde_json::{Value, json};

use crate::billing::VerifyError;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Query, ValidatedJson};
use crate::fulfillment::{find_completed_purchase, fulfill_purchase};
use crate::middleware::AuthUser;
use crate::models::{BillingPlatform, CompletePayment, Payment};
use crate::money::{Currency, convert, to_whole_units};
use crate::util::token_prefix;

use super::dto::{ZarinPalCallbackQuery, ZarinPalVerifyRequest};
use super::purchases::{PurchaseResponse, log_fulfillment_error, respond};

/// Browser redirect target after the user leaves the gateway.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<ZarinPalCallbackQuery>,
) -> Result<PurchaseResponse> {
    let payment = load_payment(&state, &query.authority)?;

    if !query.status.eq_ignore_ascii_case("OK") {
        if !payment.is_completed() {
            let conn = state.db.get()?;
            queries::mark_payment_failed(&conn, &payment.id, None)?;
        }
        tracing::info!(
            payment_id = %payment.id,
            status = %query.status,
            "ZarinPal payment cancelled by user"
        );
        return Err(AppError::BadRequest(msg::PAYMENT_CANCELLED.into()));
    }

    complete_website_payment(&state, payment).await
}

/// App clients confirming a website payment themselves.
pub async fn verify(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<ZarinPalVerifyRequest>,
) -> Result<PurchaseResponse> {
    let payment = load_payment(&state, &request.authority)?;

    if payment.user_id != auth.id() {
        return Err(AppError::Forbidden(msg::PURCHASE_NOT_OWNED.into()));
    }

    complete_website_payment(&state, payment).await
}

fn load_payment(state: &AppState, authority: &str) -> Result<Payment> {
    let conn = state.db.get()?;
    queries::get_payment_by_token(&conn, BillingPlatform::Website, authority)?
        .or_not_found(msg::PAYMENT_NOT_FOUND)
}

async fn complete_website_payment(state: &AppState, payment: Payment) -> Result<PurchaseResponse> {
    let now = queries::now();

    if payment.is_completed() {
        let conn = state.db.get()?;
        let outcome = find_completed_purchase(
            &conn,
            &payment.user_id,
            BillingPlatform::Website,
            &payment.purchase_token,
        )?
        .ok_or_else(|| AppError::Internal("completed payment disappeared".into()))?;
        return Ok(respond(state, &outcome, None, now));
    }

    let plan_id = payment
        .metadata
        .as_ref()
        .and_then(|m| m.get("plan_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Internal(format!("payment {} has no plan_id", payment.id)))?;

    let plan = {
        let conn = state.db.get()?;
        queries::get_plan_by_id(&conn, &plan_id)?.or_not_found(msg::PLAN_NOT_FOUND)?
    };

    let amount_rial = to_whole_units(&convert(&payment.amount, payment.currency, Currency::Irr))
        .ok_or_else(|| AppError::Internal(format!("payment {} has no payable amount", payment.id)))?;

    let verification = match state
        .zarinpal
        .verify_payment(amount_rial, &payment.purchase_token)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                payment_id = %payment.id,
                authority = %token_prefix(&payment.purchase_token),
                "ZarinPal verification failed: {}",
                e
            );
            if matches!(e, VerifyError::Rejected { .. }) {
                let conn = state.db.get()?;
                queries::mark_payment_failed(&conn, &payment.id, None)?;
            }
            return Err(e.into());
        }
    };

    if verification.already_verified() {
        tracing::info!(
            payment_id = %payment.id,
            "ZarinPal reports the payment as already verified"
        );
    }

    let mut metadata = payment.metadata.clone().unwrap_or_else(|| json!({}));
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("card_pan".into(), json!(verification.card_pan));
        obj.insert("gateway_code".into(), json!(verification.code));
    }

    let input = CompletePayment {
        user_id: payment.user_id.clone(),
        amount: payment.amount.clone(),
        currency: payment.currency,
        billing_platform: BillingPlatform::Website,
        purchase_token: payment.purchase_token.clone(),
        transaction_id: verification.ref_id.clone(),
        order_id: None,
        product_id: payment.product_id.clone(),
        purchase_state: None,
        store_response: Some(verification.raw),
        metadata: Some(metadata),
    };

    let outcome = {
        let mut conn = state.db.get()?;
        fulfill_purchase(&mut conn, &plan, &input, now).map_err(|e| {
            log_fulfillment_error(e, &payment.user_id, BillingPlatform::Website, &payment.purchase_token)
        })?
    };

    Ok(respond(state, &outcome, None, now))
}
