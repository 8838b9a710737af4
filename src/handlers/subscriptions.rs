use axum::{Extension, extract::State, http::StatusCode};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Path, Query, ValidatedJson};
use crate::id::is_valid_prefixed_id;
use crate::middleware::AuthUser;
use crate::models::{BillingPlatform, CreatePendingPayment};
use crate::money::{Currency, convert, to_whole_units};
use crate::pagination::{Paginated, PaginationQuery};
use crate::response::ApiResponse;

use super::dto::{
    CheckoutView, CreateSubscriptionRequest, PlanView, SubscriptionStatusView, SubscriptionView,
};

/// Public catalog, prices in the response currency.
pub async fn list_plans(State(state): State<AppState>) -> Result<ApiResponse<Vec<PlanView>>> {
    let conn = state.db.get()?;
    let plans = queries::list_active_plans(&conn)?;

    Ok(ApiResponse::ok(
        msg::PLANS_LISTED,
        plans
            .iter()
            .map(|p| PlanView::new(p, state.response_currency))
            .collect(),
    ))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<SubscriptionStatusView>> {
    let conn = state.db.get()?;
    let now = queries::now();
    let active = queries::get_active_subscription(&conn, auth.id(), now)?;

    Ok(ApiResponse::ok(
        msg::SUBSCRIPTION_STATUS,
        SubscriptionStatusView::new(active.as_ref(), state.response_currency, now),
    ))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<PaginationQuery>,
) -> Result<ApiResponse<Paginated<SubscriptionView>>> {
    let conn = state.db.get()?;
    let now = queries::now();
    let (limit, offset) = (page.limit(), page.offset());

    let total = queries::count_user_subscriptions(&conn, auth.id())?;
    let items = queries::list_user_subscriptions(&conn, auth.id(), limit, offset)?
        .iter()
        .map(|s| SubscriptionView::new(s, state.response_currency, now))
        .collect();

    Ok(ApiResponse::ok(
        msg::SUBSCRIPTIONS_LISTED,
        Paginated::new(items, total, limit, offset),
    ))
}

/// Start a website checkout: open a ZarinPal session and record a pending
/// payment keyed by its authority.
pub async fn create_website_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<CreateSubscriptionRequest>,
) -> Result<(StatusCode, ApiResponse<CheckoutView>)> {
    if !state.zarinpal.is_configured() {
        return Err(AppError::ServiceUnavailable(msg::SERVICE_NOT_CONFIGURED.into()));
    }

    let plan = {
        let conn = state.db.get()?;
        queries::get_plan_by_id_or_slug(&conn, request.plan.trim())?
            .or_not_found(msg::PLAN_NOT_FOUND)?
    };

    let amount_irr = convert(&plan.price, plan.currency, Currency::Irr);
    let amount_rial = to_whole_units(&amount_irr)
        .filter(|a| *a > 0)
        .ok_or_else(|| AppError::Internal(format!("plan {} has no payable price", plan.id)))?;

    let callback_url = format!("{}/api/v1/payments/zarinpal/callback", state.base_url);
    let description = format!("خرید اشتراک {}", plan.name);

    let checkout = state
        .zarinpal
        .request_payment(amount_rial, &callback_url, &description)
        .await
        .map_err(|e| {
            tracing::warn!(user_id = %auth.id(), plan = %plan.slug, "ZarinPal request failed: {}", e);
            AppError::from(e)
        })?;

    let payment = {
        let conn = state.db.get()?;
        queries::create_pending_payment(
            &conn,
            &CreatePendingPayment {
                user_id: auth.id().to_string(),
                amount: amount_irr,
                currency: Currency::Irr,
                billing_platform: BillingPlatform::Website,
                purchase_token: checkout.authority.clone(),
                product_id: Some(plan.slug.clone()),
                metadata: Some(json!({
                    "plan_id": plan.id,
                    "plan_slug": plan.slug,
                })),
            },
        )?
    };

    tracing::info!(
        user_id = %auth.id(),
        payment_id = %payment.id,
        plan = %plan.slug,
        amount_rial,
        "Website checkout started"
    );

    Ok(ApiResponse::ok(
        msg::PAYMENT_CREATED,
        CheckoutView::new(&payment, checkout.payment_url, state.response_currency),
    )
    .with_status(StatusCode::CREATED))
}

/// Owner-only. Ends entitlement immediately.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<SubscriptionView>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()));
    }

    let conn = state.db.get()?;
    let subscription = queries::get_subscription_by_id(&conn, &id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;

    if subscription.user_id != auth.id() {
        return Err(AppError::Forbidden(msg::FORBIDDEN.into()));
    }

    let cancelled = queries::cancel_subscription(&conn, &id)?
        .ok_or_else(|| AppError::BadRequest(msg::SUBSCRIPTION_NOT_CANCELLABLE.into()))?;

    tracing::info!(user_id = %auth.id(), subscription_id = %id, "Subscription cancelled");

    Ok(ApiResponse::ok(
        msg::SUBSCRIPTION_CANCELLED,
        SubscriptionView::new(&cancelled, state.response_currency, queries::now()),
    ))
}
