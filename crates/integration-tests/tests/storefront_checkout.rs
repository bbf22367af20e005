//! Cart and checkout flows against the fake payment provider.

use axum::http::StatusCode;
use cardslawp_integration_tests::{FakeProvider, TestApp};
use cardslawp_storefront::payments::CaptureStatus;
use serde_json::json;

#[tokio::test]
async fn test_cart_is_priced_from_catalog() {
    let browser = TestApp::new().browser();

    let added = browser
        .post("/api/cart/add", json!({ "productId": "amazon-25", "quantity": 2 }))
        .await;
    assert_eq!(added.status, StatusCode::OK);
    assert_eq!(added.body["totalMinorUnits"], 5000);
    assert_eq!(added.body["itemCount"], 2);
    assert_eq!(added.body["currency"], "USD");
    assert_eq!(added.body["lines"][0]["lineTotalMinorUnits"], 5000);

    let more = browser
        .post("/api/cart/add", json!({ "productId": "amazon-25" }))
        .await;
    assert_eq!(more.body["totalMinorUnits"], 7500);

    let updated = browser
        .post(
            "/api/cart/update",
            json!({ "productId": "amazon-25", "quantity": 1 }),
        )
        .await;
    assert_eq!(updated.body["totalMinorUnits"], 2500);

    let removed = browser
        .post("/api/cart/remove", json!({ "productId": "amazon-25" }))
        .await;
    assert_eq!(removed.body["itemCount"], 0);
    assert_eq!(removed.body["totalMinorUnits"], 0);
}

#[tokio::test]
async fn test_cart_rejects_bad_input() {
    let browser = TestApp::new().browser();

    let unknown = browser
        .post("/api/cart/add", json!({ "productId": "no-such-card" }))
        .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown.error_kind(), "UnknownProduct");

    let negative = browser
        .post("/api/cart/add", json!({ "productId": "amazon-25", "quantity": -1 }))
        .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);
    assert_eq!(negative.error_kind(), "InvalidQuantity");

    let zero = browser
        .post("/api/cart/add", json!({ "productId": "amazon-25", "quantity": 0 }))
        .await;
    assert_eq!(zero.error_kind(), "InvalidQuantity");

    assert_eq!(browser.get("/api/cart").await.body["itemCount"], 0);
}

#[tokio::test]
async fn test_clear_cart() {
    let browser = TestApp::new().browser();
    browser
        .post("/api/cart/add", json!({ "productId": "steam-20", "quantity": 3 }))
        .await;

    let cleared = browser.post("/api/cart/clear", json!({})).await;
    assert_eq!(cleared.status, StatusCode::OK);
    assert_eq!(cleared.body["itemCount"], 0);
}

#[tokio::test]
async fn test_checkout_end_to_end() {
    let app = TestApp::new();
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25", "quantity": 2 }] }),
        )
        .await;
    assert_eq!(created.status, StatusCode::OK, "{}", created.body);
    assert_eq!(created.body["provider"], "paypal");
    assert_eq!(created.body["totalMinorUnits"], 5000);
    assert_eq!(created.body["providerHandle"]["type"], "approval");

    let reference = created.body["providerHandle"]["reference"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(app.provider.requested_total(&reference), Some(5000));

    // The priced cart replaced the session cart.
    assert_eq!(browser.get("/api/cart").await.body["totalMinorUnits"], 5000);

    let captured = browser
        .post(
            "/api/checkout/capture",
            json!({ "providerReference": reference }),
        )
        .await;
    assert_eq!(captured.status, StatusCode::OK, "{}", captured.body);
    let order = &captured.body["order"];
    assert_eq!(order["status"], "captured");
    assert_eq!(order["totalMinorUnits"], 5000);
    assert_eq!(order["providerReference"], reference.as_str());
    assert!(order["orderId"].is_string());

    assert_eq!(browser.get("/api/cart").await.body["itemCount"], 0);
}

#[tokio::test]
async fn test_checkout_uses_session_cart() {
    let app = TestApp::new();
    let browser = app.browser();
    browser
        .post("/api/cart/add", json!({ "productId": "netflix-30" }))
        .await;

    let created = browser.post("/api/checkout/create", json!({})).await;
    assert_eq!(created.status, StatusCode::OK, "{}", created.body);
    assert_eq!(created.body["totalMinorUnits"], 3000);
}

#[tokio::test]
async fn test_capture_is_idempotent() {
    let app = TestApp::new();
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "steam-20" }] }),
        )
        .await;
    let reference = created.body["providerHandle"]["reference"].clone();
    let body = json!({ "providerReference": reference });

    let first = browser.post("/api/checkout/capture", body.clone()).await;
    let second = browser.post("/api/checkout/capture", body).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.body["order"]["orderId"], second.body["order"]["orderId"]);
    assert_eq!(app.provider.capture_calls(), 1);
}

#[tokio::test]
async fn test_amount_mismatch_never_captures() {
    let app = TestApp::new();
    app.provider.capture_amount(4000);
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25", "quantity": 2 }] }),
        )
        .await;
    let body = json!({ "providerReference": created.body["providerHandle"]["reference"] });

    let mismatch = browser.post("/api/checkout/capture", body.clone()).await;
    assert_eq!(mismatch.status, StatusCode::CONFLICT);
    assert_eq!(mismatch.error_kind(), "AmountMismatch");

    // The failure is recorded; a retry reports it instead of capturing.
    let retry = browser.post("/api/checkout/capture", body).await;
    assert_eq!(retry.status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(retry.error_kind(), "PaymentFailed");

    // Nothing was sold, so the cart is still there.
    assert_eq!(browser.get("/api/cart").await.body["totalMinorUnits"], 5000);
}

#[tokio::test]
async fn test_declined_payment_keeps_cart() {
    let app = TestApp::new();
    app.provider
        .capture_status(CaptureStatus::Declined("INSTRUMENT_DECLINED".to_string()));
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25", "quantity": 2 }] }),
        )
        .await;
    let body = json!({ "providerReference": created.body["providerHandle"]["reference"] });

    let declined = browser.post("/api/checkout/capture", body.clone()).await;
    assert_eq!(declined.status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(declined.error_kind(), "PaymentFailed");
    assert_eq!(browser.get("/api/cart").await.body["totalMinorUnits"], 5000);

    // Nothing was recorded, so once the buyer pays the same checkout captures.
    app.provider.capture_status(CaptureStatus::Completed);
    let captured = browser.post("/api/checkout/capture", body).await;
    assert_eq!(captured.status, StatusCode::OK);
    assert_eq!(captured.body["order"]["status"], "captured");
    assert_eq!(captured.body["order"]["totalMinorUnits"], 5000);
    assert_eq!(app.provider.capture_calls(), 2);
}

#[tokio::test]
async fn test_unconfigured_provider_is_not_called() {
    let app = TestApp::with_provider(FakeProvider::unconfigured());
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25" }] }),
        )
        .await;
    assert_eq!(created.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(created.error_kind(), "ProviderUnavailable");
    assert_eq!(app.provider.create_calls(), 0);
}

#[tokio::test]
async fn test_unregistered_provider_is_unavailable() {
    let browser = TestApp::new().browser();
    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25" }], "provider": "stripe" }),
        )
        .await;
    assert_eq!(created.error_kind(), "ProviderUnavailable");
}

#[tokio::test]
async fn test_create_rejects_bad_carts() {
    let app = TestApp::new();
    let browser = app.browser();

    let empty = browser.post("/api/checkout/create", json!({})).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.error_kind(), "EmptyCart");

    let unknown = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "no-such-card" }] }),
        )
        .await;
    assert_eq!(unknown.error_kind(), "UnknownProduct");

    let negative = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-25", "quantity": -2 }] }),
        )
        .await;
    assert_eq!(negative.error_kind(), "InvalidQuantity");

    assert_eq!(app.provider.create_calls(), 0);
}

#[tokio::test]
async fn test_capture_from_another_session_rejected() {
    let app = TestApp::new();
    let buyer = app.browser();
    let stranger = app.browser();

    let created = buyer
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "apple-25" }] }),
        )
        .await;
    let body = json!({ "providerReference": created.body["providerHandle"]["reference"] });

    let stolen = stranger.post("/api/checkout/capture", body.clone()).await;
    assert_eq!(stolen.status, StatusCode::NOT_FOUND);
    assert_eq!(stolen.error_kind(), "UnknownCheckout");
    assert_eq!(app.provider.capture_calls(), 0);

    let own = buyer.post("/api/checkout/capture", body).await;
    assert_eq!(own.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_reference() {
    let browser = TestApp::new().browser();
    let response = browser
        .post(
            "/api/checkout/capture",
            json!({ "providerReference": "FAKE-404" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.error_kind(), "UnknownCheckout");
}

#[tokio::test]
async fn test_provider_return_confirms_server_side() {
    let app = TestApp::new();
    let browser = app.browser();

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "google-play-15" }] }),
        )
        .await;
    let reference = created.body["providerHandle"]["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let returned = browser
        .get(&format!("/api/checkout/return?token={reference}"))
        .await;
    assert_eq!(returned.status, StatusCode::OK, "{}", returned.body);
    assert_eq!(returned.body["order"]["status"], "captured");
    assert_eq!(app.provider.capture_calls(), 1);

    let missing = browser.get("/api/checkout/return").await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel() {
    let browser = TestApp::new().browser();
    let response = browser.get("/api/checkout/cancel").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "cancelled": true }));
}

#[tokio::test]
async fn test_verified_buyer_recorded_on_order() {
    let app = TestApp::new();
    let browser = app.browser();
    browser.verify_email("buyer@example.com").await;

    let created = browser
        .post(
            "/api/checkout/create",
            json!({ "cart": [{ "productId": "amazon-50" }] }),
        )
        .await;
    let captured = browser
        .post(
            "/api/checkout/capture",
            json!({ "providerReference": created.body["providerHandle"]["reference"] }),
        )
        .await;
    assert_eq!(
        captured.body["order"]["buyerIdentifier"],
        "buyer@example.com"
    );
}
