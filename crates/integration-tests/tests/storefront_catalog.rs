//! Catalog, health, and request-id behaviour of the assembled router.

use axum::http::StatusCode;
use cardslawp_integration_tests::{ADMIN_EMAIL, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_health_probes() {
    let browser = TestApp::new().browser();

    let live = browser.get("/health").await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.body, json!("ok"));

    // No database configured, so readiness has nothing to ping.
    assert_eq!(browser.get("/health/ready").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let browser = TestApp::new().browser();
    let response = browser.get("/api/products").await;
    let request_id = response.headers.get("x-request-id").unwrap();
    assert!(!request_id.is_empty());
}

#[tokio::test]
async fn test_list_products() {
    let browser = TestApp::new().browser();
    let response = browser.get("/api/products").await;
    assert_eq!(response.status, StatusCode::OK);

    let products = response.body.as_array().unwrap();
    let amazon = products
        .iter()
        .find(|p| p["id"] == "amazon-25")
        .expect("built-in catalog lists amazon-25");
    assert_eq!(amazon["unitPriceMinorUnits"], 2500);
    assert_eq!(amazon["currency"], "USD");
}

#[tokio::test]
async fn test_create_product_requires_admin() {
    let app = TestApp::new();
    let browser = app.browser();
    let product = json!({ "name": "Xbox $50", "unitPriceMinorUnits": 5000 });

    let anonymous = browser.post("/api/products", product.clone()).await;
    assert_eq!(anonymous.status, StatusCode::FORBIDDEN);
    assert_eq!(anonymous.error_kind(), "Unauthorized");

    // A verified email that is not the admin's is still refused.
    let verified = browser.verify_email("buyer@example.com").await;
    assert_eq!(verified.status, StatusCode::OK);
    let buyer = browser.post("/api/products", product).await;
    assert_eq!(buyer.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_adds_product() {
    let app = TestApp::new();
    let admin = app.browser();
    assert_eq!(admin.verify_email(ADMIN_EMAIL).await.status, StatusCode::OK);

    let created = admin
        .post(
            "/api/products",
            json!({ "id": "xbox-50", "name": "Xbox $50", "unitPriceMinorUnits": 5000 }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["id"], "xbox-50");
    assert_eq!(created.body["currency"], "USD");

    let listed = app.browser().get("/api/products").await;
    assert!(
        listed
            .body
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["id"] == "xbox-50")
    );

    let duplicate = admin
        .post(
            "/api/products",
            json!({ "id": "xbox-50", "name": "Xbox again", "unitPriceMinorUnits": 5000 }),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_product_validation() {
    let app = TestApp::new();
    let admin = app.browser();
    admin.verify_email(ADMIN_EMAIL).await;

    let free = admin
        .post(
            "/api/products",
            json!({ "name": "Free card", "unitPriceMinorUnits": 0 }),
        )
        .await;
    assert_eq!(free.status, StatusCode::BAD_REQUEST);

    let euros = admin
        .post(
            "/api/products",
            json!({ "name": "Euro card", "unitPriceMinorUnits": 1000, "currency": "EUR" }),
        )
        .await;
    assert_eq!(euros.status, StatusCode::BAD_REQUEST);
}
