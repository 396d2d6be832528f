//! Stripe Checkout client.
//!
//! Uses two endpoints:
//! - `POST /v1/checkout/sessions` (form-encoded) to open a hosted checkout
//! - `GET /v1/checkout/sessions/{id}` to read its `payment_status`
//!
//! Sessions carry `expires_at`, so a checkout can no longer be paid once its
//! provisional order is due for reconciliation.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use super::{
    Checkout, PaymentError, PaymentProvider, PaymentState, ProviderSession, read_json,
    string_field,
};
use crate::config::StripeConfig;

const PROVIDER: PaymentProvider = PaymentProvider::Stripe;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Create a client sharing an existing HTTP connection pool.
    #[must_use]
    pub fn new(client: Client, config: &StripeConfig) -> Self {
        Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
        }
    }

    /// Open a hosted checkout session.
    ///
    /// The returned payload is `{"session_url": ...}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    #[instrument(skip(self, checkout), fields(order_id = %checkout.order_id))]
    pub async fn create_session(&self, checkout: &Checkout) -> Result<ProviderSession, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", &checkout.idempotency_key)
            .form(&session_form(checkout))
            .send()
            .await
            .map_err(|e| PaymentError::from_reqwest(PROVIDER, &e))?;

        let session = read_json(PROVIDER, response).await?;
        let reference = string_field(PROVIDER, &session, "id")?;
        let url = string_field(PROVIDER, &session, "url")?;

        debug!(session_id = %reference, "Stripe checkout session created");

        Ok(ProviderSession {
            reference,
            payload: serde_json::json!({ "session_url": url }),
        })
    }

    /// Read the payment status of a checkout session.
    ///
    /// An unpaid session that is still `open` is [`PaymentState::Pending`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    #[instrument(skip(self))]
    pub async fn session_state(&self, session_id: &str) -> Result<PaymentState, PaymentError> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| PaymentError::from_reqwest(PROVIDER, &e))?;

        let session = read_json(PROVIDER, response).await?;
        let payment_status = string_field(PROVIDER, &session, "payment_status")?;
        let status = session
            .get("status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        debug!(%payment_status, %status, "Stripe session status");

        Ok(match (payment_status.as_str(), status) {
            ("paid" | "no_payment_required", _) => PaymentState::Paid,
            (_, "open") => PaymentState::Pending,
            _ => PaymentState::Unpaid,
        })
    }
}

/// Form fields for `POST /v1/checkout/sessions`.
fn session_form(checkout: &Checkout) -> Vec<(String, String)> {
    let order_id = checkout.order_id.to_string();
    let mut form = vec![
        ("mode".to_owned(), "payment".to_owned()),
        ("success_url".to_owned(), checkout.success_url.clone()),
        ("cancel_url".to_owned(), checkout.cancel_url.clone()),
        ("client_reference_id".to_owned(), order_id.clone()),
        ("metadata[order_id]".to_owned(), order_id),
        (
            "expires_at".to_owned(),
            checkout.expires_at.timestamp().to_string(),
        ),
    ];

    for (i, line) in checkout.lines.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            checkout.currency.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            line.name.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            line.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
    }

    form
}
