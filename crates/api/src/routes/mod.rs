//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Liveness
//! GET  /health/ready                - Store readiness
//!
//! # Users
//! POST /api/user/register           - Register, returns token
//! POST /api/user/login              - Login, returns token
//! POST /api/user/admin              - Admin login, returns admin token
//!
//! # Cart (user)
//! POST /api/cart/get                - Fetch cart
//! POST /api/cart/add                - Add one unit
//! POST /api/cart/update             - Set quantity
//!
//! # Orders
//! POST /api/order/place             - COD order (user)
//! POST /api/order/stripe            - Stripe checkout (user)
//! POST /api/order/razorpay          - Razorpay checkout (user)
//! POST /api/order/verifyStripe      - Confirm/cancel Stripe order (user)
//! POST /api/order/verifyRazorpay    - Confirm/cancel Razorpay order (user)
//! POST /api/order/userorders        - Own orders (user)
//! POST /api/order/list              - All orders (admin)
//! POST /api/order/status            - Set order status (admin)
//!
//! # Products
//! POST /api/product/add             - Add product (admin)
//! POST /api/product/remove          - Remove product (admin)
//! POST /api/product/single          - Product detail (admin)
//! GET  /api/product/list            - Product listing
//! ```

pub mod cart;
pub mod orders;
pub mod products;
pub mod users;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::db::CommerceStore;
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Every route, health checks included.
pub fn routes<S: CommerceStore, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness::<S, G>))
        .nest("/api/user", user_routes())
        .nest("/api/cart", cart_routes())
        .nest("/api/order", order_routes())
        .nest("/api/product", product_routes())
}

/// Create the user routes router.
pub fn user_routes<S: CommerceStore, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/register", post(users::register::<S, G>))
        .route("/login", post(users::login::<S, G>))
        .route("/admin", post(users::admin_login::<S, G>))
}

/// Create the cart routes router.
pub fn cart_routes<S: CommerceStore, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/get", post(cart::get::<S, G>))
        .route("/add", post(cart::add::<S, G>))
        .route("/update", post(cart::update::<S, G>))
}

/// Create the order routes router.
pub fn order_routes<S: CommerceStore, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/place", post(orders::place::<S, G>))
        .route("/stripe", post(orders::stripe::<S, G>))
        .route("/razorpay", post(orders::razorpay::<S, G>))
        .route("/verifyStripe", post(orders::verify_stripe::<S, G>))
        .route("/verifyRazorpay", post(orders::verify_razorpay::<S, G>))
        .route("/userorders", post(orders::user_orders::<S, G>))
        .route("/list", post(orders::list::<S, G>))
        .route("/status", post(orders::update_status::<S, G>))
}

/// Create the product routes router.
pub fn product_routes<S: CommerceStore, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/add", post(products::add::<S, G>))
        .route("/remove", post(products::remove::<S, G>))
        .route("/single", post(products::single::<S, G>))
        .route("/list", get(products::list::<S, G>))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
