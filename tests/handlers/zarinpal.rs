//! Website checkout through ZarinPal: start, callback, app-side verify.

use axum::Router;
use axum::http::StatusCode;
use httpmock::prelude::*;
use serde_json::{Value, json};
use talebill::error::msg;

#[path = "../common/mod.rs"]
mod common;
use common::*;

const AUTHORITY: &str = "A00000000000000000000000000217885159";
const REQUEST_PATH: &str = "/pg/v4/payment/request.json";
const VERIFY_PATH: &str = "/pg/v4/payment/verify.json";

struct Fixture {
    server: MockServer,
    state: AppState,
    app: Router,
    token: String,
}

async fn fixture() -> Fixture {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1month", 99000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state.clone());
    Fixture {
        server,
        state,
        app,
        token,
    }
}

/// Mock the payment request and start a checkout for the 1month plan.
async fn start_checkout(f: &Fixture) -> Value {
    f.server
        .mock_async(|when, then| {
            when.method(POST)
                .path(REQUEST_PATH)
                .body_contains("\"amount\":990000")
                .body_contains("\"currency\":\"IRR\"")
                .body_contains(ZARINPAL_MERCHANT);
            then.status(200).json_body(json!({
                "data": {
                    "code": 100,
                    "message": "Success",
                    "authority": AUTHORITY,
                    "fee_type": "Merchant",
                    "fee": 100
                },
                "errors": []
            }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions",
            Some(&f.token),
            Some(json!({ "plan": "1month" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    body
}

fn verified_response() -> Value {
    json!({
        "data": {
            "code": 100,
            "message": "Verified",
            "card_hash": "1EBE3EBEBE35C7EC0F8D6EE4F2F859107A87822CA179BC9528767EA7B5489B69",
            "card_pan": "502229******5995",
            "ref_id": 201,
            "fee_type": "Merchant",
            "fee": 0
        },
        "errors": []
    })
}

fn callback_uri(status: &str) -> String {
    format!(
        "/api/v1/payments/zarinpal/callback?Authority={}&Status={}",
        AUTHORITY, status
    )
}

#[tokio::test]
async fn test_checkout_creates_pending_payment() {
    let f = fixture().await;
    let body = start_checkout(&f).await;

    assert_eq!(body["message"], msg::PAYMENT_CREATED);
    assert_eq!(body["data"]["authority"], AUTHORITY);
    assert_eq!(
        body["data"]["payment_url"],
        format!("{}/pg/StartPay/{}", f.server.base_url(), AUTHORITY)
    );
    assert_eq!(body["data"]["amount"].as_f64(), Some(990000.0));
    assert_eq!(body["data"]["currency"], "IRR");

    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::Website, AUTHORITY)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.currency, Currency::Irr);
    assert_eq!(payment.product_id.as_deref(), Some("1month"));
    assert_eq!(payment.metadata.unwrap()["plan_slug"], "1month");
}

#[tokio::test]
async fn test_callback_completes_payment() {
    let f = fixture().await;
    start_checkout(&f).await;

    let verify = f
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path(VERIFY_PATH)
                .body_contains(AUTHORITY)
                .body_contains("\"amount\":990000");
            then.status(200).json_body(verified_response());
        })
        .await;

    let (status, body) = send(&f.app, json_request("GET", &callback_uri("OK"), None, None)).await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["message"], msg::PURCHASE_VERIFIED);
    assert_eq!(body["data"]["payment"]["status"], "completed");
    assert_eq!(body["data"]["payment"]["transaction_id"], "201");
    assert_eq!(body["data"]["payment"]["payment_gateway"], "zarinpal");
    assert_eq!(body["data"]["subscription"]["billing_platform"], "website");
    assert_eq!(body["data"]["subscription"]["status"], "active");
    verify.assert_hits_async(1).await;

    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::Website, AUTHORITY)
        .unwrap()
        .unwrap();
    let metadata = payment.metadata.unwrap();
    assert_eq!(metadata["card_pan"], "502229******5995");
    assert_eq!(metadata["gateway_code"], 100);
    assert_eq!(metadata["plan_slug"], "1month");
}

#[tokio::test]
async fn test_app_verify_after_callback_is_duplicate() {
    let f = fixture().await;
    start_checkout(&f).await;

    let verify = f
        .server
        .mock_async(|when, then| {
            when.method(POST).path(VERIFY_PATH);
            then.status(200).json_body(verified_response());
        })
        .await;

    let (status, _) = send(&f.app, json_request("GET", &callback_uri("OK"), None, None)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/payments/zarinpal/verify",
            Some(&f.token),
            Some(json!({ "authority": AUTHORITY })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], msg::PURCHASE_DUPLICATE);
    assert_eq!(body["data"]["is_duplicate"], true);
    verify.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_app_verify_without_callback() {
    let f = fixture().await;
    start_checkout(&f).await;

    f.server
        .mock_async(|when, then| {
            when.method(POST).path(VERIFY_PATH);
            then.status(200).json_body(json!({
                "data": { "code": 101, "message": "Verified", "ref_id": "201", "card_pan": null },
                "errors": []
            }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/payments/zarinpal/verify",
            Some(&f.token),
            Some(json!({ "authority": AUTHORITY })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["data"]["payment"]["transaction_id"], "201");
}

#[tokio::test]
async fn test_cancelled_callback_fails_payment() {
    let f = fixture().await;
    start_checkout(&f).await;

    let verify = f
        .server
        .mock_async(|when, then| {
            when.method(POST).path(VERIFY_PATH);
            then.status(200).json_body(verified_response());
        })
        .await;

    let (status, body) = send(&f.app, json_request("GET", &callback_uri("NOK"), None, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], msg::PAYMENT_CANCELLED);
    verify.assert_hits_async(0).await;

    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::Website, AUTHORITY)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_gateway_rejection_fails_payment() {
    let f = fixture().await;
    start_checkout(&f).await;

    f.server
        .mock_async(|when, then| {
            when.method(POST).path(VERIFY_PATH);
            then.status(200).json_body(json!({
                "data": [],
                "errors": { "code": -51, "message": "Session is not valid, session is not active paid try.", "validations": [] }
            }));
        })
        .await;

    let (status, body) = send(&f.app, json_request("GET", &callback_uri("OK"), None, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], msg::PURCHASE_INVALID);

    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::Website, AUTHORITY)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(queries::get_active_subscription(&conn, &payment.user_id, now()).unwrap().is_none());
}

#[tokio::test]
async fn test_merchant_error_is_unavailable() {
    let f = fixture().await;
    start_checkout(&f).await;

    f.server
        .mock_async(|when, then| {
            when.method(POST).path(VERIFY_PATH);
            then.status(200).json_body(json!({
                "data": [],
                "errors": { "code": -11, "message": "Merchant is not active", "validations": [] }
            }));
        })
        .await;

    let (status, body) = send(&f.app, json_request("GET", &callback_uri("OK"), None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::UPSTREAM_UNAVAILABLE);

    // Not the payer's fault: the payment stays pending for a retry
    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::Website, AUTHORITY)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_verify_by_other_user_is_forbidden() {
    let f = fixture().await;
    start_checkout(&f).await;

    let other_token = {
        let conn = f.state.db.get().unwrap();
        create_test_user(&conn, "Other").1
    };

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/payments/zarinpal/verify",
            Some(&other_token),
            Some(json!({ "authority": AUTHORITY })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], msg::PURCHASE_NOT_OWNED);
}

#[tokio::test]
async fn test_unknown_authority_is_not_found() {
    let f = fixture().await;
    let (status, body) = send(&f.app, json_request("GET", &callback_uri("OK"), None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], msg::PAYMENT_NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_unknown_plan_is_not_found() {
    let f = fixture().await;
    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions",
            Some(&f.token),
            Some(json!({ "plan": "lifetime" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], msg::PLAN_NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_unconfigured_is_unavailable() {
    let state = create_test_app_state();
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1month", 99000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    let (status, body) = send(
        &app,
        json_request("POST", "/api/v1/subscriptions", Some(&token), Some(json!({ "plan": "1month" }))),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::SERVICE_NOT_CONFIGURED);
}
