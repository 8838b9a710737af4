//! CafeBazaar receipt verification, status and acknowledgment endpoints.

use axum::Router;
use axum::http::StatusCode;
use httpmock::prelude::*;
use serde_json::{Value, json};
use talebill::error::msg;

#[path = "../common/mod.rs"]
mod common;
use common::*;

const VERIFY_URI: &str = "/api/v1/subscriptions/cafebazaar/verify";
const TOKEN: &str = "bazaar-purchase-token-0001";
const SKU: &str = "talebill_1month";

fn validate_path(sku: &str, token: &str) -> String {
    format!("/api/validate/{}/inapp/{}/purchases/{}/", PACKAGE_NAME, sku, token)
}

fn acknowledge_path(sku: &str, token: &str) -> String {
    format!("/api/acknowledge/{}/inapp/{}/purchases/{}/", PACKAGE_NAME, sku, token)
}

fn receipt() -> Value {
    json!({
        "purchaseState": 0,
        "consumptionState": 1,
        "purchaseTime": 1_700_000_000_000i64,
        "developerPayload": "story-app",
        "kind": "androidpublisher#inappPurchase"
    })
}

struct Fixture {
    server: MockServer,
    state: AppState,
    app: Router,
    user: User,
    token: String,
}

async fn fixture() -> Fixture {
    let server = MockServer::start_async().await;
    let state = create_mock_app_state(&server.base_url());
    let (user, token) = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1month", 99000);
        create_test_user(&conn, "Ali")
    };
    let app = test_app(state.clone());
    Fixture {
        server,
        state,
        app,
        user,
        token,
    }
}

fn verify_body(token: &str, sku: &str) -> Value {
    json!({ "purchase_token": token, "product_id": sku, "order_id": "GPA.1234" })
}

#[tokio::test]
async fn test_verify_activates_subscription_and_acknowledges() {
    let f = fixture().await;
    let validate = f
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path(validate_path(SKU, TOKEN))
                .header("cafebazaar-pishkhan-api-secret", CAFEBAZAAR_SECRET);
            then.status(200).json_body(receipt());
        })
        .await;
    let ack = f
        .server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(200).json_body(json!({}));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], msg::PURCHASE_VERIFIED);

    let data = &body["data"];
    assert_eq!(data["is_duplicate"], false);
    assert_eq!(data["renewed"], false);
    assert_eq!(data["acknowledged"], true);

    // 99,000 IRT is answered as 990,000 IRR, as a JSON number
    assert_eq!(data["payment"]["amount"].as_f64(), Some(990000.0));
    assert_eq!(data["payment"]["currency"], "IRR");
    assert_eq!(data["payment"]["billing_platform"], "cafebazaar");
    assert_eq!(data["payment"]["status"], "completed");
    assert_eq!(data["payment"]["order_id"], "GPA.1234");
    assert_eq!(data["payment"]["is_acknowledged"], true);

    assert_eq!(data["subscription"]["status"], "active");
    assert_eq!(data["subscription"]["type"], "1month");
    assert_eq!(data["subscription"]["price"].as_f64(), Some(990000.0));
    assert_eq!(data["subscription"]["days_remaining"], 30);

    validate.assert_hits_async(1).await;
    ack.assert_hits_async(1).await;

    let conn = f.state.db.get().unwrap();
    let payment = queries::get_payment_by_token(&conn, BillingPlatform::CafeBazaar, TOKEN)
        .unwrap()
        .unwrap();
    assert_eq!(payment.user_id, f.user.id);
    assert_eq!(payment.store_response.unwrap()["developerPayload"], "story-app");
    assert_eq!(payment.metadata.unwrap()["plan_slug"], "1month");
}

#[tokio::test]
async fn test_duplicate_does_not_call_store_again() {
    let f = fixture().await;
    let validate = f
        .server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;
    f.server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(200);
        })
        .await;

    let request = || json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU)));

    let (first_status, first) = send(&f.app, request()).await;
    let (second_status, second) = send(&f.app, request()).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second["message"], msg::PURCHASE_DUPLICATE);
    assert_eq!(second["data"]["is_duplicate"], true);
    assert_eq!(second["data"]["payment"]["id"], first["data"]["payment"]["id"]);
    assert_eq!(
        second["data"]["subscription"]["end_date"],
        first["data"]["subscription"]["end_date"],
        "duplicate must not extend"
    );

    validate.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_second_purchase_renews() {
    let f = fixture().await;
    let second_token = "bazaar-purchase-token-0002";
    for token in [TOKEN, second_token] {
        f.server
            .mock_async(|when, then| {
                when.method(GET).path(validate_path(SKU, token));
                then.status(200).json_body(receipt());
            })
            .await;
        f.server
            .mock_async(|when, then| {
                when.method(POST).path(acknowledge_path(SKU, token));
                then.status(200);
            })
            .await;
    }

    let (_, first) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    let (status, second) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(second_token, SKU))),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["message"], msg::PURCHASE_RENEWED);
    assert_eq!(second["data"]["renewed"], true);
    assert_eq!(second["data"]["subscription"]["id"], first["data"]["subscription"]["id"]);
    assert_eq!(
        second["data"]["subscription"]["end_date"].as_i64().unwrap(),
        first["data"]["subscription"]["end_date"].as_i64().unwrap() + 30 * ONE_DAY
    );
}

#[tokio::test]
async fn test_acknowledge_failure_keeps_subscription() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;
    let mut failing_ack = f
        .server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(503).body("upstream down");
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["acknowledged"], false);
    assert_eq!(body["data"]["subscription"]["status"], "active");

    // The purchase shows up as owed an acknowledgment
    let (status, body) = send(
        &f.app,
        json_request("GET", "/api/v1/subscriptions/cafebazaar/status", Some(&f.token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["has_active_subscription"], true);
    assert_eq!(body["data"]["pending_acknowledgments"].as_array().unwrap().len(), 1);

    // Manual retry while the store is still failing
    let ack_body = json!({ "purchase_token": TOKEN });
    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions/cafebazaar/acknowledge",
            Some(&f.token),
            Some(ack_body.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::ACKNOWLEDGE_FAILED);

    failing_ack.delete_async().await;
    let ack = f
        .server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(200);
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions/cafebazaar/acknowledge",
            Some(&f.token),
            Some(ack_body),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], msg::ACKNOWLEDGED);
    assert_eq!(body["data"]["is_acknowledged"], true);
    ack.assert_hits_async(1).await;

    let (_, body) = send(
        &f.app,
        json_request("GET", "/api/v1/subscriptions/cafebazaar/status", Some(&f.token), None),
    )
    .await;
    assert!(body["data"]["pending_acknowledgments"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_acknowledge_unknown_or_foreign_purchase() {
    let f = fixture().await;
    let (status, _) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions/cafebazaar/acknowledge",
            Some(&f.token),
            Some(json!({ "purchase_token": "never-seen-token-01" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    {
        let mut conn = f.state.db.get().unwrap();
        let (other, _) = create_test_user(&conn, "Other");
        let plan = queries::get_plan_by_id_or_slug(&conn, "1month").unwrap().unwrap();
        fulfill_purchase(
            &mut conn,
            &plan,
            &store_purchase(&other.id, &plan, BillingPlatform::CafeBazaar, "others-token-0001"),
            now(),
        )
        .unwrap();
    }

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions/cafebazaar/acknowledge",
            Some(&f.token),
            Some(json!({ "purchase_token": "others-token-0001" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], msg::PURCHASE_NOT_OWNED);
}

#[tokio::test]
async fn test_store_not_found_is_bad_request() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(404)
                .json_body(json!({ "error": "not_found", "error_description": "The requested purchase is not found!" }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], msg::PURCHASE_INVALID);
    assert_eq!(body["errors"]["store"][0], "The requested purchase is not found!");

    let conn = f.state.db.get().unwrap();
    assert!(
        queries::get_payment_by_token(&conn, BillingPlatform::CafeBazaar, TOKEN)
            .unwrap()
            .is_none(),
        "rejected receipts leave no payment row"
    );
}

#[tokio::test]
async fn test_refunded_purchase_is_rejected() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(200).json_body(json!({ "purchaseState": 1, "consumptionState": 1 }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], msg::PURCHASE_INVALID);
}

#[tokio::test]
async fn test_html_error_page_is_not_leaked() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(502)
                .header("content-type", "text/html")
                .body("<!DOCTYPE html><html><head><title>502 Bad Gateway</title></head><body><h1>nginx</h1></body></html>");
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::UPSTREAM_UNAVAILABLE);
    assert!(!body.to_string().contains('<'), "markup leaked: {}", body);
}

#[tokio::test]
async fn test_rejection_detail_is_sanitized() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(400).json_body(json!({
                "error": "<b>Invalid</b> token<script>alert(1)</script>"
            }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["store"][0], "Invalid token");
    assert!(!body.to_string().contains("script"));
}

#[tokio::test]
async fn test_store_credentials_rejected_is_unavailable() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(401).json_body(json!({ "error": "invalid secret" }));
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::UPSTREAM_UNAVAILABLE);
}

#[tokio::test]
async fn test_foreign_token_is_forbidden_without_store_call() {
    let f = fixture().await;
    let validate = f
        .server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;
    f.server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(200);
        })
        .await;

    let (status, _) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let other_token = {
        let conn = f.state.db.get().unwrap();
        create_test_user(&conn, "Other").1
    };

    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&other_token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], msg::PURCHASE_NOT_OWNED);
    validate.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_unmapped_product_is_bad_request() {
    let f = fixture().await;
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path("unknown_sku", TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&f.token),
            Some(verify_body(TOKEN, "unknown_sku")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], msg::PLAN_MAPPING_MISSING);
}

#[tokio::test]
async fn test_legacy_sku_resolves_through_alias() {
    let f = fixture().await;
    {
        let conn = f.state.db.get().unwrap();
        queries::create_plan_alias(
            &conn,
            &PlanProductAlias {
                billing_platform: BillingPlatform::CafeBazaar,
                product_id: "monthly_subscription".into(),
                plan_slug: "1month".into(),
            },
        )
        .unwrap();
    }
    f.server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path("monthly_subscription", TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;
    f.server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path("monthly_subscription", TOKEN));
            then.status(200);
        })
        .await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&f.token),
            Some(verify_body(TOKEN, "monthly_subscription")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["subscription"]["type"], "1month");
}

#[tokio::test]
async fn test_invalid_body_is_unprocessable() {
    let f = fixture().await;

    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            VERIFY_URI,
            Some(&f.token),
            Some(json!({ "purchase_token": "short", "product_id": "" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["errors"]["purchase_token"].is_array());
    assert!(body["errors"]["product_id"].is_array());
}

#[tokio::test]
async fn test_path_like_token_cannot_replay_receipt() {
    let f = fixture().await;
    let validate = f
        .server
        .mock_async(|when, then| {
            when.method(GET).path(validate_path(SKU, TOKEN));
            then.status(200).json_body(receipt());
        })
        .await;
    f.server
        .mock_async(|when, then| {
            when.method(POST).path(acknowledge_path(SKU, TOKEN));
            then.status(200).json_body(json!({}));
        })
        .await;

    let (status, _) = send(
        &f.app,
        json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Each of these would resolve to the same upstream receipt if pasted into the URL raw
    let variants = [
        (format!("{}/.", TOKEN), SKU.to_string()),
        (format!("{}/./.", TOKEN), SKU.to_string()),
        (format!("{}?x=1", TOKEN), SKU.to_string()),
        (format!("{}#frag", TOKEN), SKU.to_string()),
        (TOKEN.to_string(), format!("../{}", SKU)),
        ("..........".to_string(), SKU.to_string()),
    ];
    for (token, sku) in variants {
        let (status, body) = send(
            &f.app,
            json_request("POST", VERIFY_URI, Some(&f.token), Some(verify_body(&token, &sku))),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{} / {}: {}", token, sku, body);
    }

    validate.assert_hits_async(1).await;
    let conn = f.state.db.get().unwrap();
    assert_eq!(queries::count_user_payments(&conn, &f.user.id).unwrap(), 1);
    let sub = queries::get_active_subscription(&conn, &f.user.id, now()).unwrap().unwrap();
    assert_eq!(sub.days_remaining(now()), 30);
}

#[tokio::test]
async fn test_acknowledge_rejects_path_like_token() {
    let f = fixture().await;
    let (status, body) = send(
        &f.app,
        json_request(
            "POST",
            "/api/v1/subscriptions/cafebazaar/acknowledge",
            Some(&f.token),
            Some(json!({ "purchase_token": format!("{}/..", TOKEN) })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["purchase_token"].is_array());
}

#[tokio::test]
async fn test_unconfigured_store_is_unavailable() {
    let state = create_test_app_state();
    let token = {
        let conn = state.db.get().unwrap();
        create_test_plan(&conn, "1month", 99000);
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    let (status, body) = send(
        &app,
        json_request("POST", VERIFY_URI, Some(&token), Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], msg::SERVICE_NOT_CONFIGURED);
}

#[tokio::test]
async fn test_requires_authentication() {
    let f = fixture().await;
    let (status, body) = send(
        &f.app,
        json_request("POST", VERIFY_URI, None, Some(verify_body(TOKEN, SKU))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], msg::UNAUTHENTICATED);
}
