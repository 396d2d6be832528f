//! Integration tests for Careveli.
//!
//! Tests drive the real router in-process with `tower::ServiceExt::oneshot`,
//! backed by a [`MemoryStore`] and a [`FakeGateway`] standing in for Stripe and
//! Razorpay.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p careveli-integration-tests
//!
//! # Include the PostgreSQL-backed tests
//! CAREVELI_TEST_DATABASE_URL=postgres://localhost/careveli_test \
//!     cargo test -p careveli-integration-tests -- --include-ignored
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use careveli_api::config::{AuthConfig, CheckoutConfig};
use careveli_api::db::{CommerceStore, MemoryStore};
use careveli_api::models::product::NewProduct;
use careveli_api::services::auth::AuthService;
use careveli_api::services::orders::{OrderWorkflow, Reconciliation};
use careveli_api::services::payments::{
    Checkout, PaymentError, PaymentGateway, PaymentProvider, PaymentState, ProviderSession,
};
use careveli_api::state::AppState;
use careveli_core::{Amount, ProductId, Role};

/// Signing secret shared by the app under test and [`TestApp::forge_token`].
pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Password used for every account the helpers create.
pub const PASSWORD: &str = "correct horse battery";

/// Signature the fake gateway accepts for Razorpay callbacks.
pub const GOOD_SIGNATURE: &str = "good-signature";

/// In-process payment provider.
///
/// Every session it opens is unpaid until [`FakeGateway::set_paid`] flips all
/// of them or [`FakeGateway::pay`] settles one.
#[derive(Clone, Default)]
pub struct FakeGateway {
    inner: Arc<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    paid: AtomicBool,
    paid_references: Mutex<HashSet<String>>,
    fail: AtomicBool,
    opened: AtomicUsize,
}

impl FakeGateway {
    pub fn set_paid(&self, paid: bool) {
        self.inner.paid.store(paid, Ordering::SeqCst);
    }

    /// Settle a single provider session.
    pub fn pay(&self, reference: &str) {
        self.inner
            .paid_references
            .lock()
            .unwrap()
            .insert(reference.to_owned());
    }

    /// Make every checkout creation fail with a provider error.
    pub fn set_failing(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    /// How many checkouts were opened with the provider.
    pub fn sessions_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }
}

impl PaymentGateway for FakeGateway {
    async fn open_checkout(
        &self,
        provider: PaymentProvider,
        checkout: &Checkout,
    ) -> Result<ProviderSession, PaymentError> {
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Api {
                provider,
                status: 500,
                message: "provider exploded".to_string(),
            });
        }
        let n = self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let reference = format!("{provider}_{}_{n}", checkout.order_id).to_lowercase();
        let payload = match provider {
            PaymentProvider::Stripe => {
                json!({ "session_url": format!("https://checkout.test/{reference}") })
            }
            PaymentProvider::Razorpay => json!({
                "order": { "id": reference, "amount": checkout.amount, "currency": checkout.currency.to_uppercase() },
                "keyId": "rzp_test_key",
            }),
        };
        Ok(ProviderSession { reference, payload })
    }

    async fn payment_state(
        &self,
        _provider: PaymentProvider,
        reference: &str,
    ) -> Result<PaymentState, PaymentError> {
        let settled = self.inner.paid_references.lock().unwrap().contains(reference);
        Ok(if settled || self.inner.paid.load(Ordering::SeqCst) {
            PaymentState::Paid
        } else {
            PaymentState::Unpaid
        })
    }

    fn verify_signature(
        &self,
        _provider: PaymentProvider,
        _reference: &str,
        _payment_id: &str,
        signature: &str,
    ) -> Result<(), PaymentError> {
        if signature == GOOD_SIGNATURE {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }
}

/// A response reduced to what tests assert on.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Router plus handles on its store, gateway and checkout settings.
pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub gateway: FakeGateway,
    pub checkout: CheckoutConfig,
}

impl TestApp {
    /// App with default checkout settings (delivery fee 10).
    #[must_use]
    pub fn new() -> Self {
        Self::with_checkout(CheckoutConfig {
            provider_timeout: Duration::from_secs(2),
            frontend_url: "https://shop.test".to_string(),
            ..CheckoutConfig::default()
        })
    }

    #[must_use]
    pub fn with_checkout(checkout: CheckoutConfig) -> Self {
        let store = MemoryStore::new();
        let gateway = FakeGateway::default();
        let state = AppState::new(store.clone(), gateway.clone(), &auth_config(), checkout.clone());
        Self {
            router: careveli_api::app(state),
            store,
            gateway,
            checkout,
        }
    }

    /// Run one reconciliation pass the way the background task does.
    pub async fn reconcile(&self, older_than: Duration) -> Reconciliation {
        OrderWorkflow::new(&self.store, &self.gateway, &self.checkout)
            .expire_provisional_orders(older_than)
            .await
            .unwrap()
    }

    /// Send a request with optional token and JSON body.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        self.send_with_headers(method, path, token, &[], body).await
    }

    /// POST with a token, the shape almost every endpoint uses.
    pub async fn post(&self, path: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn send_with_headers(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("token", token);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    /// Send a pre-built request.
    pub async fn dispatch(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, body }
    }

    /// Register a shopper through the API and return their token.
    pub async fn register(&self, email: &str) -> String {
        let response = self
            .send(
                Method::POST,
                "/api/user/register",
                None,
                Some(json!({ "name": "Shopper", "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.body["data"]["token"].as_str().unwrap().to_owned()
    }

    /// Bootstrap an admin the way the CLI does, then log in through the API.
    pub async fn admin_token(&self) -> String {
        AuthService::new(&self.store)
            .create_with_role("Admin", "admin@careveli.test", PASSWORD, Role::Admin)
            .await
            .unwrap();
        let response = self
            .send(
                Method::POST,
                "/api/user/admin",
                None,
                Some(json!({ "email": "admin@careveli.test", "password": PASSWORD })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.body["data"]["token"].as_str().unwrap().to_owned()
    }

    /// Add a product priced at `price` offering sizes S, M and L.
    pub async fn product(&self, name: &str, price: u32) -> ProductId {
        self.store
            .insert_product(NewProduct {
                name: name.to_string(),
                description: "Test product".to_string(),
                price: Amount::from_units(price),
                category: "Men".to_string(),
                sub_category: "Topwear".to_string(),
                images: vec![],
                sizes: vec!["S".into(), "M".into(), "L".into()],
                bestseller: false,
            })
            .await
            .unwrap()
            .id
    }

    /// The cart as returned by `/api/cart/get`.
    pub async fn cart(&self, token: &str) -> Value {
        let response = self.post("/api/cart/get", token, json!({})).await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.body["data"].clone()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Token settings for the app under test.
#[must_use]
pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: SecretString::from(JWT_SECRET),
        token_ttl: Duration::from_secs(3600),
    }
}

/// A valid shipping address.
#[must_use]
pub fn address() -> Value {
    json!({
        "firstName": "Asha",
        "lastName": "Rao",
        "email": "asha@example.com",
        "street": "12 MG Road",
        "city": "Pune",
        "state": "MH",
        "zipcode": "411001",
        "country": "India",
        "phone": "9999999999"
    })
}

/// Order body for `quantity` units of `item` in size M.
#[must_use]
pub fn order_body(item: ProductId, quantity: u32, amount: u32) -> Value {
    json!({
        "items": [{ "itemId": item, "size": "M", "quantity": quantity }],
        "amount": amount,
        "address": address(),
    })
}
