//! Razorpay Orders client.
//!
//! Uses three endpoints:
//! - `POST /v1/orders` to create a provider order the checkout widget pays
//! - `GET /v1/orders/{id}` to read its `status`
//! - `GET /v1/orders/{id}/payments` when the order has been `attempted`, since
//!   an authorized payment leaves the order short of `paid` until capture
//!
//! The widget relays `razorpay_signature`, an HMAC-SHA256 of
//! `"{order_id}|{payment_id}"` keyed with the key secret.

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{
    Checkout, PaymentError, PaymentProvider, PaymentState, ProviderSession, read_json,
    string_field,
};
use crate::config::RazorpayConfig;

const PROVIDER: PaymentProvider = PaymentProvider::Razorpay;

/// Razorpay API client.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: SecretString,
    api_base: String,
}

impl std::fmt::Debug for RazorpayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayClient")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RazorpayClient {
    /// Create a client sharing an existing HTTP connection pool.
    #[must_use]
    pub fn new(client: Client, config: &RazorpayConfig) -> Self {
        Self {
            client,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
        }
    }

    /// Create a provider order for the full amount.
    ///
    /// The returned payload is `{"order": <razorpay order>, "keyId": ...}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Razorpay rejects it.
    #[instrument(skip(self, checkout), fields(order_id = %checkout.order_id))]
    pub async fn create_order(&self, checkout: &Checkout) -> Result<ProviderSession, PaymentError> {
        let receipt = checkout.order_id.to_string();
        let body = serde_json::json!({
            "amount": checkout.amount,
            "currency": checkout.currency.to_uppercase(),
            "receipt": receipt,
            "notes": { "order_id": receipt },
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::from_reqwest(PROVIDER, &e))?;

        let order = read_json(PROVIDER, response).await?;
        let reference = string_field(PROVIDER, &order, "id")?;

        debug!(razorpay_order_id = %reference, "Razorpay order created");

        Ok(ProviderSession {
            reference,
            payload: serde_json::json!({ "order": order, "keyId": self.key_id }),
        })
    }

    /// Read the status of a provider order.
    ///
    /// An `attempted` order is settled by its payments: a captured or
    /// authorized payment counts as paid, one still `created` as pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Razorpay rejects it.
    #[instrument(skip(self))]
    pub async fn order_state(&self, razorpay_order_id: &str) -> Result<PaymentState, PaymentError> {
        let order = self.get(&format!("/v1/orders/{razorpay_order_id}")).await?;
        let status = string_field(PROVIDER, &order, "status")?;

        debug!(%status, "Razorpay order status");

        match status.as_str() {
            "paid" => Ok(PaymentState::Paid),
            "attempted" => {
                let payments = self
                    .get(&format!("/v1/orders/{razorpay_order_id}/payments"))
                    .await?;
                Ok(payments_state(&payments))
            }
            _ => Ok(PaymentState::Unpaid),
        }
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, PaymentError> {
        let response = self
            .client
            .get(format!("{}{path}", self.api_base))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .send()
            .await
            .map_err(|e| PaymentError::from_reqwest(PROVIDER, &e))?;

        read_json(PROVIDER, response).await
    }

    /// Check a checkout callback signature.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidSignature`] if the signature is not hex
    /// or does not match.
    #[instrument(skip(self, signature))]
    pub fn verify_signature(
        &self,
        razorpay_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), PaymentError> {
        let expected = hex::decode(signature).map_err(|_| PaymentError::InvalidSignature)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(self.key_secret.expose_secret().as_bytes())
            .map_err(|_| PaymentError::InvalidSignature)?;
        mac.update(razorpay_order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());

        // Constant-time comparison
        mac.verify_slice(&expected)
            .map_err(|_| PaymentError::InvalidSignature)?;

        debug!("Razorpay signature verified");
        Ok(())
    }
}

/// Fold a `GET /v1/orders/{id}/payments` collection into one state.
fn payments_state(collection: &serde_json::Value) -> PaymentState {
    let statuses = collection
        .get("items")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|payment| payment.get("status").and_then(serde_json::Value::as_str));

    let mut state = PaymentState::Unpaid;
    for status in statuses {
        match status {
            "captured" | "authorized" => return PaymentState::Paid,
            "created" => state = PaymentState::Pending,
            _ => {}
        }
    }
    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use careveli_core::OrderId;

    use super::*;

    const SECRET: &str = "rzp_secret_Qm7vT2kL9pR4";

    fn config(api_base: String) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_key".into(),
            key_secret: SecretString::from(SECRET),
            api_base,
        }
    }

    fn sign(order_id: &str, payment_id: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).expect("valid key length");
        mac.update(format!("{order_id}|{payment_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn create(
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if !headers.contains_key("authorization") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": {"description": "Authentication failed"}})),
            );
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": "order_Rzp001",
                "entity": "order",
                "amount": body["amount"],
                "currency": body["currency"],
                "receipt": body["receipt"],
                "status": "created"
            })),
        )
    }

    async fn fetch(Path(id): Path<String>) -> Json<serde_json::Value> {
        let status = match id.as_str() {
            "order_paid" => "paid",
            "order_new" => "created",
            _ => "attempted",
        };
        Json(serde_json::json!({"id": id, "status": status}))
    }

    async fn payments(Path(id): Path<String>) -> Json<serde_json::Value> {
        let statuses: &[&str] = match id.as_str() {
            "order_authorized" => &["failed", "authorized"],
            "order_in_flight" => &["created"],
            _ => &["failed"],
        };
        let items: Vec<_> = statuses
            .iter()
            .map(|status| serde_json::json!({"entity": "payment", "status": status}))
            .collect();
        Json(serde_json::json!({"entity": "collection", "count": items.len(), "items": items}))
    }

    async fn spawn_razorpay() -> RazorpayClient {
        let app = Router::new()
            .route("/v1/orders", post(create))
            .route("/v1/orders/{id}", get(fetch))
            .route("/v1/orders/{id}/payments", get(payments));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        RazorpayClient::new(Client::new(), &config(format!("http://{addr}")))
    }

    fn checkout() -> Checkout {
        Checkout {
            order_id: OrderId::new(7),
            currency: "inr".into(),
            lines: Vec::new(),
            amount: 50_000,
            success_url: String::new(),
            cancel_url: String::new(),
            idempotency_key: "checkout-7".into(),
            expires_at: chrono::DateTime::from_timestamp(1_900_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_order_uses_minor_units_and_receipt() {
        let client = spawn_razorpay().await;
        let session = client.create_order(&checkout()).await.unwrap();

        assert_eq!(session.reference, "order_Rzp001");
        assert_eq!(session.payload["keyId"], "rzp_test_key");
        assert_eq!(session.payload["order"]["amount"], 50_000);
        assert_eq!(session.payload["order"]["currency"], "INR");
        assert_eq!(session.payload["order"]["receipt"], "7");
    }

    #[tokio::test]
    async fn test_order_state() {
        let client = spawn_razorpay().await;
        assert_eq!(client.order_state("order_paid").await.unwrap(), PaymentState::Paid);
        assert_eq!(client.order_state("order_new").await.unwrap(), PaymentState::Unpaid);
        assert_eq!(client.order_state("order_failed").await.unwrap(), PaymentState::Unpaid);
    }

    #[tokio::test]
    async fn test_attempted_order_is_settled_by_its_payments() {
        let client = spawn_razorpay().await;
        assert_eq!(
            client.order_state("order_authorized").await.unwrap(),
            PaymentState::Paid
        );
        assert_eq!(
            client.order_state("order_in_flight").await.unwrap(),
            PaymentState::Pending
        );
    }

    #[test]
    fn test_signature_verification() {
        let client = RazorpayClient::new(Client::new(), &config("http://unused".into()));
        let signature = sign("order_1", "pay_1");

        assert!(client.verify_signature("order_1", "pay_1", &signature).is_ok());
        assert!(matches!(
            client.verify_signature("order_1", "pay_2", &signature),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            client.verify_signature("order_1", "pay_1", "not-hex"),
            Err(PaymentError::InvalidSignature)
        ));
    }
}
