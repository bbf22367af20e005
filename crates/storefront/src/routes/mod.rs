//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                     - Liveness
//! GET  /health/ready               - Readiness (pings PostgreSQL when configured)
//!
//! # Catalog
//! GET  /api/products               - List products
//! POST /api/products               - Add a product (verified admin email)
//!
//! # Session
//! GET  /api/session                - Session view
//! POST /api/session/login          - Issue an email code
//! POST /api/session/send-sms       - Issue an SMS code
//! POST /api/session/verify-email   - Submit the email code
//! POST /api/session/verify-phone   - Submit the SMS code
//! POST /api/session/logout         - Forget the visitor
//!
//! # Cart (every endpoint answers with the priced cart)
//! GET  /api/cart
//! POST /api/cart/add
//! POST /api/cart/update
//! POST /api/cart/remove
//! POST /api/cart/clear
//!
//! # Checkout
//! POST /api/checkout/create        - Open a provider payment
//! POST /api/checkout/capture       - Confirm payment and record the order
//! GET  /api/checkout/return        - Provider redirect back
//! GET  /api/checkout/cancel        - Provider cancel redirect
//! ```

pub mod cart;
pub mod checkout;
pub mod health;
pub mod products;
pub mod session;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new().route("/", get(products::index).post(products::create))
}

/// Create the session routes router.
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(session::show))
        .route("/login", post(session::login))
        .route("/send-sms", post(session::send_sms))
        .route("/verify-email", post(session::verify_email))
        .route("/verify-phone", post(session::verify_phone))
        .route("/logout", post(session::logout))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(checkout::create))
        .route("/capture", post(checkout::capture))
        .route("/return", get(checkout::return_from_provider))
        .route("/cancel", get(checkout::cancel))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    let api = Router::new()
        .nest("/products", product_routes())
        .nest("/session", session_routes())
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api", api)
}
