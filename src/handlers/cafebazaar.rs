use axum::{Extension, extract::State};

use crate::billing::StoreVerifier;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::ValidatedJson;
use crate::middleware::AuthUser;
use crate::models::BillingPlatform;
use crate::response::ApiResponse;

use super::dto::{
    AcknowledgeRequest, CafeBazaarStatusView, PaymentView, StorePurchaseRequest,
    SubscriptionStatusView,
};
use super::purchases::{PurchaseResponse, ensure_acknowledged, verify_store_purchase};

pub async fn verify(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<StorePurchaseRequest>,
) -> Result<PurchaseResponse> {
    verify_store_purchase(&state, &state.cafebazaar, &auth, request).await
}

/// Active subscription plus purchases still owed an acknowledgment.
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<CafeBazaarStatusView>> {
    let conn = state.db.get()?;
    let now = queries::now();

    let active = queries::get_active_subscription(&conn, auth.id(), now)?;
    let pending = queries::list_unacknowledged_payments(&conn, auth.id(), BillingPlatform::CafeBazaar)?;

    Ok(ApiResponse::ok(
        msg::SUBSCRIPTION_STATUS,
        CafeBazaarStatusView {
            status: SubscriptionStatusView::new(active.as_ref(), state.response_currency, now),
            pending_acknowledgments: pending
                .iter()
                .map(|p| PaymentView::new(p, state.response_currency))
                .collect(),
        },
    ))
}

/// Client-driven retry of the post-purchase acknowledgment.
pub async fn acknowledge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<AcknowledgeRequest>,
) -> Result<ApiResponse<PaymentView>> {
    let mut payment = {
        let conn = state.db.get()?;
        queries::get_payment_by_token(&conn, BillingPlatform::CafeBazaar, &request.purchase_token)?
            .or_not_found(msg::PAYMENT_NOT_FOUND)?
    };

    if payment.user_id != auth.id() {
        return Err(AppError::Forbidden(msg::PURCHASE_NOT_OWNED.into()));
    }
    if !payment.is_completed() {
        return Err(AppError::BadRequest(msg::PAYMENT_FAILED.into()));
    }

    if !payment.is_acknowledged {
        if !state.cafebazaar.is_configured() {
            return Err(AppError::ServiceUnavailable(msg::SERVICE_NOT_CONFIGURED.into()));
        }
        if !ensure_acknowledged(&state, &state.cafebazaar, &mut payment).await {
            return Err(AppError::ServiceUnavailable(msg::ACKNOWLEDGE_FAILED.into()));
        }
    }

    Ok(ApiResponse::ok(
        msg::ACKNOWLEDGED,
        PaymentView::new(&payment, state.response_currency),
    ))
}
