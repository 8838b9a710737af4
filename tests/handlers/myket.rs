//! Myket receipt verification.

use axum::http::StatusCode;
use httpmock::prelude::*;
use serde_json::json;
use talebill::error::msg;

#[path = "../common/mod.rs"]
mod common;
use common::*;

const VERIFY_URI: &str = "/api/v1/payments/myket/verify";
const TOKEN: &str = "myket-purchase-token-0001";
const SKU: &str = "talebill_1year";

fn tokens_path(sku: &str, token: &str) -> String {
    format!(
        "/api/applications/{}/purchases/products/{}/tokens/{}",
        PACKAGE_NAME, sku, token
    )
}

#[tokio::test]
async fn test_verify_activates_without_acknowledgment() {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1year", 899000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    let validate = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(tokens_path(SKU, TOKEN))
                .header("x-access-token", MYKET_TOKEN);
            then.status(200).json_body(json!({
                "purchaseState": 0,
                "consumptionState": 0,
                "purchaseTime": 1_700_000_000_000i64,
                "developerPayload": ""
            }));
        })
        .await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&token),
            Some(json!({ "purchase_token": TOKEN, "product_id": SKU })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["message"], msg::PURCHASE_VERIFIED);
    assert!(
        body["data"].get("acknowledged").is_none(),
        "Myket purchases carry no acknowledgment flag"
    );
    assert_eq!(body["data"]["payment"]["billing_platform"], "myket");
    assert_eq!(body["data"]["payment"]["payment_gateway"], "myket");
    assert_eq!(body["data"]["payment"]["amount"].as_f64(), Some(8990000.0));
    assert_eq!(body["data"]["subscription"]["type"], "1year");
    assert_eq!(body["data"]["subscription"]["days_remaining"], 365);
    validate.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_invalid_token_is_bad_request() {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1year", 899000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    server
        .mock_async(|when, then| {
            when.method(GET).path(tokens_path(SKU, TOKEN));
            then.status(404).json_body(json!({ "message": "Purchase token is invalid" }));
        })
        .await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&token),
            Some(json!({ "purchase_token": TOKEN, "product_id": SKU })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], msg::PURCHASE_INVALID);
    assert_eq!(body["errors"]["store"][0], "Purchase token is invalid");
}

#[tokio::test]
async fn test_store_outage_is_unavailable() {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1year", 899000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state.clone());

    server
        .mock_async(|when, then| {
            when.method(GET).path(tokens_path(SKU, TOKEN));
            then.status(500).body("internal error");
        })
        .await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&token),
            Some(json!({ "purchase_token": TOKEN, "product_id": SKU })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::UPSTREAM_UNAVAILABLE);

    let conn = state.db.get().unwrap();
    assert!(
        queries::get_payment_by_token(&conn, BillingPlatform::Myket, TOKEN)
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_unconfigured_store_is_unavailable() {
    let state = create_test_app_state();
    let token = {
        let conn = state.db.get().unwrap();
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&token),
            Some(json!({ "purchase_token": TOKEN, "product_id": SKU })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::SERVICE_NOT_CONFIGURED);
}

#[tokio::test]
async fn test_fulfillment_failure_is_logged_with_context() {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let (user, token) = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1year", 899000);
        let user = create_test_user(&conn, "Ali");
        // Subscription writes now fail inside the transaction
        conn.execute_batch("ALTER TABLE subscriptions RENAME TO subscriptions_archived")
            .unwrap();
        user
    };
    let app = test_app(state.clone());

    server
        .mock_async(|when, then| {
            when.method(GET).path(tokens_path(SKU, TOKEN));
            then.status(200).json_body(json!({ "purchaseState": 0 }));
        })
        .await;

    let (logs, _guard) = capture_logs();
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&token),
            Some(json!({ "purchase_token": TOKEN, "product_id": SKU })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], msg::INTERNAL);
    assert!(body["errors"].is_null(), "internal causes stay out of the response");

    let logs = logs.contents();
    let line = logs
        .lines()
        .find(|l| l.contains("Fulfillment failed"))
        .unwrap_or_else(|| panic!("no fulfillment error logged:\n{}", logs));
    assert!(line.contains("ERROR"));
    assert!(line.contains(&user.id));
    assert!(line.contains("myket"));
    assert!(line.contains("myket-pu"));
    assert!(!line.contains(TOKEN), "full purchase token must not be logged");

    let conn = state.db.get().unwrap();
    assert!(
        queries::get_payment_by_token(&conn, BillingPlatform::Myket, TOKEN)
            .unwrap()
            .is_none()
    );
}
