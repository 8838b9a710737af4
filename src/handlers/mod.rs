pub mod dto;
mod cafebazaar;
mod myket;
mod payments;
mod purchases;
mod subscriptions;
mod zarinpal;

use axum::{
    Router, middleware,
    routing::{MethodRouter, get, post},
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::middleware::user_auth;
use crate::rate_limit::{standard_layer, strict_layer};
use crate::response::ApiResponse;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> ApiResponse<HealthResponse> {
    ApiResponse::ok(
        "ok",
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

/// All routes under `/api/v1`. Pass `None` to disable rate limiting (tests).
pub fn router(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router<AppState> {
    let strict = rate_limit.map(|rl| strict_layer(rl.strict_rpm));
    // Endpoints that call out to a billing platform get the strict tier.
    let limited = |route: MethodRouter<AppState>| match &strict {
        Some(layer) => route.layer(layer.clone()),
        None => route,
    };

    let public = Router::new()
        .route("/health", get(health))
        .route("/subscriptions/plans", get(subscriptions::list_plans))
        .route("/payments/zarinpal/callback", get(zarinpal::callback));

    let authenticated = Router::new()
        .route(
            "/subscriptions",
            get(subscriptions::list_subscriptions)
                .merge(limited(post(subscriptions::create_website_subscription))),
        )
        .route("/subscriptions/status", get(subscriptions::status))
        .route("/subscriptions/{id}/cancel", post(subscriptions::cancel))
        .route("/subscriptions/cafebazaar/verify", limited(post(cafebazaar::verify)))
        .route("/subscriptions/cafebazaar/status", get(cafebazaar::status))
        .route(
            "/subscriptions/cafebazaar/acknowledge",
            limited(post(cafebazaar::acknowledge)),
        )
        .route("/payments", get(payments::list_payments))
        .route("/payments/myket/verify", limited(post(myket::verify)))
        .route("/payments/zarinpal/verify", limited(post(zarinpal::verify)))
        .layer(middleware::from_fn_with_state(state, user_auth));

    let mut api = public.merge(authenticated);
    if let Some(rl) = rate_limit {
        api = api.layer(standard_layer(rl.standard_rpm));
    }

    Router::new().nest("/api/v1", api)
}
