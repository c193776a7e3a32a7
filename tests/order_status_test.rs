//! Fulfillment and payment transitions over HTTP.

mod common;

use agrismart_orders::repositories::OrderRepository;
use axum::http::Method;
use common::{response_json, TestApp, BUYER, FARMER, OTHER_BUYER, OTHER_FARMER};
use serde_json::{json, Value};
use uuid::Uuid;

async fn pending_order(app: &TestApp) -> String {
    let body = app
        .place_cod_order(BUYER, json!([{"productId": "P1", "quantity": 3, "unitPrice": 50}]))
        .await;
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn set_status(app: &TestApp, order_id: &str, token: &str, status: &str) -> (u16, Value) {
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": status })),
            Some(token),
        )
        .await;
    let code = response.status().as_u16();
    (code, response_json(response).await)
}

async fn set_payment(app: &TestApp, order_id: &str, token: &str, status: &str) -> (u16, Value) {
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/orders/{}/payment", order_id),
            Some(json!({ "paymentStatus": status })),
            Some(token),
        )
        .await;
    let code = response.status().as_u16();
    (code, response_json(response).await)
}

#[tokio::test]
async fn farmer_accepts_and_buyer_cannot() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let farmer = app.farmer_token(FARMER);
    let buyer = app.buyer_token(BUYER);

    let (code, body) = set_status(&app, &order_id, &farmer, "accepted").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(body["data"]["paymentStatus"], "pending");
    assert_eq!(body["data"]["version"], 2);

    let (code, body) = set_status(&app, &order_id, &buyer, "accepted").await;
    assert_eq!(code, 403);
    assert_eq!(body["error"], "Forbidden");
}

#[tokio::test]
async fn seller_path_runs_to_completion() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let farmer = app.farmer_token(FARMER);

    for status in ["accepted", "shipped", "completed"] {
        let (code, body) = set_status(&app, &order_id, &farmer, status).await;
        assert_eq!(code, 200, "transition to {}", status);
        assert_eq!(body["data"]["status"], status);
    }

    let (code, _) = set_status(&app, &order_id, &farmer, "shipped").await;
    assert_eq!(code, 409);
}

#[tokio::test]
async fn accepted_may_complete_without_shipping() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let farmer = app.farmer_token(FARMER);

    assert_eq!(set_status(&app, &order_id, &farmer, "accepted").await.0, 200);
    assert_eq!(set_status(&app, &order_id, &farmer, "completed").await.0, 200);
    assert_eq!(set_status(&app, &order_id, &farmer, "pending").await.0, 409);
}

#[tokio::test]
async fn buyer_cancellation_is_terminal() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let farmer = app.farmer_token(FARMER);
    let buyer = app.buyer_token(BUYER);

    let (code, body) = set_status(&app, &order_id, &buyer, "cancelled").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["status"], "cancelled");

    let before = app.orders.get(order_id.parse::<Uuid>().unwrap()).await.unwrap();
    for status in ["accepted", "rejected", "shipped", "completed", "cancelled", "pending"] {
        let (code, _) = set_status(&app, &order_id, &farmer, status).await;
        assert_eq!(code, 409, "farmer -> {}", status);
    }
    let after = app.orders.get(before.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn pending_transitions_by_role() {
    let statuses = ["pending", "accepted", "shipped", "completed", "rejected", "cancelled"];
    let allowed = [("farmer", "accepted"), ("farmer", "rejected"), ("buyer", "cancelled")];

    for role in ["buyer", "farmer"] {
        for status in statuses {
            let app = TestApp::new().await;
            let order_id = pending_order(&app).await;
            let token = if role == "buyer" {
                app.buyer_token(BUYER)
            } else {
                app.farmer_token(FARMER)
            };

            let (code, _) = set_status(&app, &order_id, &token, status).await;
            if allowed.contains(&(role, status)) {
                assert_eq!(code, 200, "{} -> {}", role, status);
            } else {
                assert!(
                    code == 403 || code == 409,
                    "{} -> {} returned {}",
                    role,
                    status,
                    code
                );
            }
        }
    }
}

#[tokio::test]
async fn non_parties_are_forbidden() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;

    let other_farmer = app.farmer_token(OTHER_FARMER);
    assert_eq!(set_status(&app, &order_id, &other_farmer, "accepted").await.0, 403);

    let other_buyer = app.buyer_token(OTHER_BUYER);
    assert_eq!(set_status(&app, &order_id, &other_buyer, "cancelled").await.0, 403);
    assert_eq!(set_payment(&app, &order_id, &other_buyer, "completed").await.0, 403);

    let anonymous = app
        .request(
            Method::PATCH,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({"status": "accepted"})),
            None,
        )
        .await;
    assert_eq!(anonymous.status(), 401);
}

#[tokio::test]
async fn unknown_status_and_order_are_reported() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let farmer = app.farmer_token(FARMER);

    assert_eq!(set_status(&app, &order_id, &farmer, "delivered-ish").await.0, 400);
    assert_eq!(
        set_status(&app, &Uuid::new_v4().to_string(), &farmer, "accepted").await.0,
        404
    );
}

#[tokio::test]
async fn payment_axis_is_buyer_only_and_idempotent() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app).await;
    let buyer = app.buyer_token(BUYER);
    let farmer = app.farmer_token(FARMER);

    assert_eq!(set_payment(&app, &order_id, &farmer, "completed").await.0, 403);

    let (code, body) = set_payment(&app, &order_id, &buyer, "completed").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["paymentStatus"], "completed");
    assert_eq!(body["data"]["status"], "pending");
    let version = body["data"]["version"].clone();

    let (code, body) = set_payment(&app, &order_id, &buyer, "completed").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["version"], version);

    assert_eq!(set_payment(&app, &order_id, &buyer, "failed").await.0, 409);
    assert_eq!(set_payment(&app, &order_id, &buyer, "refunded").await.0, 400);
}

#[tokio::test]
async fn fulfillment_does_not_touch_payment_axis() {
    let app = TestApp::new().await;
    let token = app.buyer_token(BUYER);
    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(json!({
                "items": [{"productId": "P1", "quantity": 1, "unitPrice": 50}],
                "paymentMethod": "upi",
                "deliveryAddress": "X"
            })),
            Some(&token),
        )
        .await;
    let order_id = response_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let farmer = app.farmer_token(FARMER);
    let (_, body) = set_status(&app, &order_id, &farmer, "accepted").await;
    assert_eq!(body["data"]["paymentStatus"], "processing");

    let (code, body) = set_payment(&app, &order_id, &token, "failed").await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(set_payment(&app, &order_id, &token, "processing").await.0, 200);
}
