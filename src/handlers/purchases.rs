//! The verification pipeline shared by the in-app store endpoints.

use axum::http::StatusCode;
use serde_json::json;

use crate::billing::StoreVerifier;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::fulfillment::{FulfillmentOutcome, find_completed_purchase, fulfill_purchase};
use crate::middleware::AuthUser;
use crate::models::{BillingPlatform, CompletePayment, Payment};
use crate::response::ApiResponse;
use crate::util::token_prefix;

use super::dto::{PurchaseResult, StorePurchaseRequest};

pub type PurchaseResponse = (StatusCode, ApiResponse<PurchaseResult>);

/// Verify a store receipt and apply it.
///
/// 1. duplicate check (no store call for completed receipts)
/// 2. store verification, with no database connection held
/// 3. plan lookup by the store SKU
/// 4. transactional claim + subscription activation
/// 5. best-effort acknowledgment for stores that need it
pub async fn verify_store_purchase<V: StoreVerifier>(
    state: &AppState,
    verifier: &V,
    auth: &AuthUser,
    request: StorePurchaseRequest,
) -> Result<PurchaseResponse> {
    let platform = verifier.platform();
    let now = queries::now();

    let existing = {
        let conn = state.db.get()?;
        find_completed_purchase(&conn, auth.id(), platform, &request.purchase_token)?
    };

    if let Some(mut outcome) = existing {
        let acknowledged = if verifier.requires_acknowledgment() {
            Some(ensure_acknowledged(state, verifier, &mut outcome.payment).await)
        } else {
            None
        };
        return Ok(respond(state, &outcome, acknowledged, now));
    }

    let purchase = verifier
        .verify(&request.product_id, &request.purchase_token)
        .await
        .map_err(|e| {
            tracing::warn!(
                user_id = %auth.id(),
                platform = platform.as_ref(),
                product_id = %request.product_id,
                token = %token_prefix(&request.purchase_token),
                "Store verification failed: {}",
                e
            );
            AppError::from(e)
        })?;

    let mut conn = state.db.get()?;

    let plan = queries::get_plan_by_store_product(&conn, platform, &request.product_id)?
        .ok_or_else(|| {
            tracing::warn!(
                platform = platform.as_ref(),
                product_id = %request.product_id,
                "Verified purchase has no plan mapping"
            );
            AppError::BadRequest(msg::PLAN_MAPPING_MISSING.into())
        })?;

    let input = CompletePayment {
        user_id: auth.id().to_string(),
        amount: plan.price.clone(),
        currency: plan.currency,
        billing_platform: platform,
        purchase_token: request.purchase_token.clone(),
        transaction_id: None,
        order_id: request.order_id.clone().filter(|o| !o.is_empty()),
        product_id: Some(request.product_id.clone()),
        purchase_state: Some(purchase.purchase_state),
        store_response: Some(purchase.raw),
        metadata: Some(json!({
            "plan_slug": plan.slug,
            "purchase_time": purchase.purchase_time,
            "consumption_state": purchase.consumption_state,
            "developer_payload": purchase.developer_payload,
        })),
    };

    let mut outcome = fulfill_purchase(&mut conn, &plan, &input, now)
        .map_err(|e| log_fulfillment_error(e, auth.id(), platform, &request.purchase_token))?;
    drop(conn);

    let acknowledged = if verifier.requires_acknowledgment() {
        Some(ensure_acknowledged(state, verifier, &mut outcome.payment).await)
    } else {
        None
    };

    Ok(respond(state, &outcome, acknowledged, now))
}

/// Log a failed fulfillment with the user, platform and token prefix.
///
/// Ownership conflicts are expected traffic; everything else is a server-side
/// fault whose cause never reaches the response body.
pub fn log_fulfillment_error(
    err: AppError,
    user_id: &str,
    platform: BillingPlatform,
    purchase_token: &str,
) -> AppError {
    if err.status().is_server_error() {
        tracing::error!(
            user_id = %user_id,
            platform = platform.as_ref(),
            token = %token_prefix(purchase_token),
            "Fulfillment failed: {}",
            err
        );
    } else {
        tracing::warn!(
            user_id = %user_id,
            platform = platform.as_ref(),
            token = %token_prefix(purchase_token),
            "Fulfillment refused: {}",
            err
        );
    }
    err
}

/// Acknowledge a completed payment with its store if not done yet.
/// Failure is logged and reported as `false`; the subscription stands.
pub async fn ensure_acknowledged<V: StoreVerifier>(
    state: &AppState,
    verifier: &V,
    payment: &mut Payment,
) -> bool {
    if payment.is_acknowledged {
        return true;
    }

    let product_id = payment.product_id.clone().unwrap_or_default();
    if let Err(e) = verifier.acknowledge(&product_id, &payment.purchase_token).await {
        tracing::warn!(
            payment_id = %payment.id,
            token = %token_prefix(&payment.purchase_token),
            "Store acknowledgment failed: {}",
            e
        );
        return false;
    }

    let marked = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::mark_payment_acknowledged(&conn, &payment.id));

    match marked {
        Ok(_) => {
            payment.is_acknowledged = true;
            payment.acknowledged_at = Some(queries::now());
            true
        }
        Err(e) => {
            tracing::error!(payment_id = %payment.id, "Failed to record acknowledgment: {}", e);
            false
        }
    }
}

/// 201 for a fresh fulfillment, 200 for a duplicate.
pub fn respond(
    state: &AppState,
    outcome: &FulfillmentOutcome,
    acknowledged: Option<bool>,
    now: i64,
) -> PurchaseResponse {
    let mut result = PurchaseResult::new(outcome, state.response_currency, now);
    result.acknowledged = acknowledged;

    let (status, message) = if outcome.is_duplicate {
        (StatusCode::OK, msg::PURCHASE_DUPLICATE)
    } else if outcome.renewed {
        (StatusCode::CREATED, msg::PURCHASE_RENEWED)
    } else {
        (StatusCode::CREATED, msg::PURCHASE_VERIFIED)
    };

    ApiResponse::ok(message, result).with_status(status)
}
