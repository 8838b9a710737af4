//! Per-IP rate limiting.
//!
//! Tiers:
//! - Strict: purchase verification and checkout creation (outbound store calls)
//! - Standard: everything else under `/api/v1`
//!
//! Configure via `RATE_LIMIT_STRICT_RPM` (default 10) and
//! `RATE_LIMIT_STANDARD_RPM` (default 60). Rejections use the usual JSON
//! envelope.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::{GovernorError, GovernorLayer};

use crate::error::msg;
use crate::response::ApiResponse;

pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Replenish one request every `60 / rpm` seconds, with a burst of `rpm`.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    let rpm = requests_per_minute.max(1);
    let period_ms = (60_000 / rpm as u64).max(1);

    // Period and burst are both non-zero here, so the builder always succeeds.
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_millis(period_ms))
        .burst_size(rpm)
        .finish()
        .expect("Failed to build rate limiter config");

    GovernorLayer::new(Arc::new(config)).error_handler(rejection)
}

fn rejection(err: GovernorError) -> Response {
    let (status, message, headers) = match err {
        GovernorError::TooManyRequests { wait_time, headers } => {
            tracing::debug!(wait_time, "Rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, msg::RATE_LIMITED, headers)
        }
        GovernorError::UnableToExtractKey => {
            tracing::error!("Rate limiter could not determine the client address");
            (StatusCode::INTERNAL_SERVER_ERROR, msg::INTERNAL, None)
        }
        GovernorError::Other { code, msg: detail, headers } => {
            tracing::warn!(%code, detail = ?detail, "Rate limiter rejected request");
            let message = if code == StatusCode::TOO_MANY_REQUESTS {
                msg::RATE_LIMITED
            } else {
                msg::INTERNAL
            };
            (code, message, headers)
        }
    };

    let mut response = (status, ApiResponse::<()>::failure(message, None)).into_response();
    if let Some(headers) = headers {
        response.headers_mut().extend(headers);
    }
    response
}

pub fn strict_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

pub fn standard_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}
