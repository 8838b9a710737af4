//! Payment history.

use axum::http::StatusCode;
use talebill::error::msg;

#[path = "../common/mod.rs"]
mod common;
use common::*;

#[tokio::test]
async fn test_payment_history_lists_own_payments() {
    let state = create_test_app_state();
    let (token, other_token) = {
        let mut conn = state.db.get().unwrap();
        let plan = create_test_plan(&conn, "1month", 99000);
        let (user, token) = create_test_user(&conn, "Ali");
        let (other, other_token) = create_test_user(&conn, "Other");

        for (i, platform) in [BillingPlatform::CafeBazaar, BillingPlatform::Myket, BillingPlatform::Myket]
            .into_iter()
            .enumerate()
        {
            fulfill_purchase(
                &mut conn,
                &plan,
                &store_purchase(&user.id, &plan, platform, &format!("history-token-{:04}", i)),
                now(),
            )
            .unwrap();
        }
        fulfill_purchase(
            &mut conn,
            &plan,
            &store_purchase(&other.id, &plan, BillingPlatform::Myket, "other-token-0001"),
            now(),
        )
        .unwrap();
        (token, other_token)
    };
    let app = test_app(state);

    let (status, body) = send(&app, json_request("GET", "/api/v1/payments", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], msg::PAYMENTS_LISTED);
    assert_eq!(body["data"]["total"], 3);

    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    for item in items {
        assert_eq!(item["status"], "completed");
        assert_eq!(item["amount"].as_f64(), Some(990000.0));
        assert_eq!(item["currency"], "IRR");
        assert!(item["subscription_id"].is_string());
        assert!(item.get("store_response").is_none(), "raw store payload stays internal");
    }

    let (_, body) = send(
        &app,
        json_request("GET", "/api/v1/payments?limit=1&offset=1", Some(&token), None),
    )
    .await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["limit"], 1);
    assert_eq!(body["data"]["has_more"], true);

    let (_, body) = send(&app, json_request("GET", "/api/v1/payments", Some(&other_token), None)).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn test_payment_history_requires_token() {
    let app = test_app(create_test_app_state());
    let (status, body) = send(&app, json_request("GET", "/api/v1/payments", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], msg::UNAUTHENTICATED);
}

#[tokio::test]
async fn test_invalid_pagination_query() {
    let state = create_test_app_state();
    let token = {
        let conn = state.db.get().unwrap();
        create_test_user(&conn, "Ali").1
    };
    let app = test_app(state);

    let (status, body) = send(
        &app,
        json_request("GET", "/api/v1/payments?limit=abc", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["query"].is_array());
}
