//! Payment provider integration.
//!
//! Providers are opaque HTTP services. The order workflow only sees the
//! [`PaymentGateway`] trait: open a checkout, ask whether it was paid, and
//! check a callback signature. [`HttpPaymentGateway`] talks to the real Stripe
//! and Razorpay APIs. Each call is made once; failures are reported, never
//! retried.

mod razorpay;
mod stripe;

pub use razorpay::RazorpayClient;
pub use stripe::StripeClient;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use careveli_core::OrderId;

use crate::config::PaymentsConfig;

/// External payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PaymentProvider {
    Stripe,
    Razorpay,
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stripe => "Stripe",
            Self::Razorpay => "Razorpay",
        })
    }
}

/// Errors that can occur when talking to a payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// No credentials were configured for the provider.
    #[error("{0} payments are not configured")]
    NotConfigured(PaymentProvider),

    /// The provider did not answer in time.
    #[error("{0} request timed out")]
    Timeout(PaymentProvider),

    /// The request never got a response (connection, TLS, DNS).
    #[error("{provider} request failed: {message}")]
    Request {
        provider: PaymentProvider,
        message: String,
    },

    /// The provider answered with an error status.
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: PaymentProvider,
        status: u16,
        message: String,
    },

    /// The provider answered with something we could not read.
    #[error("{provider} response error: {message}")]
    Response {
        provider: PaymentProvider,
        message: String,
    },

    /// A callback signature did not match.
    #[error("invalid payment signature")]
    InvalidSignature,
}

impl PaymentError {
    /// Whether the provider could not be reached at all, as opposed to
    /// answering with an error.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Request { .. })
    }

    fn from_reqwest(provider: PaymentProvider, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(provider)
        } else {
            Self::Request {
                provider,
                message: err.to_string(),
            }
        }
    }
}

/// One line shown on the provider's checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    /// Price per unit in minor units.
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything a provider needs to open a checkout for one order.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order_id: OrderId,
    /// Lower-case ISO 4217 code.
    pub currency: String,
    /// Item lines plus the delivery charge line.
    pub lines: Vec<CheckoutLine>,
    /// Order total in minor units.
    pub amount: i64,
    pub success_url: String,
    pub cancel_url: String,
    /// Sent to providers that deduplicate create calls.
    pub idempotency_key: String,
    /// When a hosted checkout stops accepting payment.
    pub expires_at: DateTime<Utc>,
}

/// A checkout opened with a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSession {
    /// Provider-side id (Stripe session id, Razorpay order id).
    pub reference: String,
    /// JSON handed to the client so it can complete the payment.
    pub payload: serde_json::Value,
}

/// Whether the provider considers a checkout paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Paid,
    /// Still payable, or a payment is in flight.
    Pending,
    Unpaid,
}

/// Seam between the order workflow and payment providers.
pub trait PaymentGateway: Send + Sync + 'static {
    /// Open a hosted checkout (Stripe) or provider order (Razorpay).
    fn open_checkout(
        &self,
        provider: PaymentProvider,
        checkout: &Checkout,
    ) -> impl Future<Output = Result<ProviderSession, PaymentError>> + Send;

    /// Ask the provider whether a checkout has been paid.
    fn payment_state(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> impl Future<Output = Result<PaymentState, PaymentError>> + Send;

    /// Verify a client-relayed callback signature.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidSignature`] on mismatch.
    fn verify_signature(
        &self,
        provider: PaymentProvider,
        reference: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), PaymentError>;
}

/// Gateway backed by the providers' HTTP APIs.
#[derive(Clone, Debug)]
pub struct HttpPaymentGateway {
    stripe: Option<StripeClient>,
    razorpay: Option<RazorpayClient>,
}

impl HttpPaymentGateway {
    /// Build clients for every configured provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &PaymentsConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            stripe: config
                .stripe
                .as_ref()
                .map(|c| StripeClient::new(client.clone(), c)),
            razorpay: config
                .razorpay
                .as_ref()
                .map(|c| RazorpayClient::new(client.clone(), c)),
        })
    }

    fn stripe(&self) -> Result<&StripeClient, PaymentError> {
        self.stripe
            .as_ref()
            .ok_or(PaymentError::NotConfigured(PaymentProvider::Stripe))
    }

    fn razorpay(&self) -> Result<&RazorpayClient, PaymentError> {
        self.razorpay
            .as_ref()
            .ok_or(PaymentError::NotConfigured(PaymentProvider::Razorpay))
    }
}

impl PaymentGateway for HttpPaymentGateway {
    async fn open_checkout(
        &self,
        provider: PaymentProvider,
        checkout: &Checkout,
    ) -> Result<ProviderSession, PaymentError> {
        match provider {
            PaymentProvider::Stripe => self.stripe()?.create_session(checkout).await,
            PaymentProvider::Razorpay => self.razorpay()?.create_order(checkout).await,
        }
    }

    async fn payment_state(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<PaymentState, PaymentError> {
        match provider {
            PaymentProvider::Stripe => self.stripe()?.session_state(reference).await,
            PaymentProvider::Razorpay => self.razorpay()?.order_state(reference).await,
        }
    }

    fn verify_signature(
        &self,
        provider: PaymentProvider,
        reference: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), PaymentError> {
        match provider {
            // Stripe redirects carry no signature; the session is re-fetched instead
            PaymentProvider::Stripe => Ok(()),
            PaymentProvider::Razorpay => {
                self.razorpay()?
                    .verify_signature(reference, payment_id, signature)
            }
        }
    }
}

/// Read a provider response body, turning error statuses into [`PaymentError::Api`].
///
/// Both providers wrap failures as `{"error": {...}}`; Stripe puts the text in
/// `message`, Razorpay in `description`.
async fn read_json(
    provider: PaymentProvider,
    response: reqwest::Response,
) -> Result<serde_json::Value, PaymentError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PaymentError::from_reqwest(provider, &e))?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                let error = v.get("error")?;
                error
                    .get("message")
                    .or_else(|| error.get("description"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_owned());

        tracing::error!(%provider, status = status.as_u16(), %message, "Payment provider error");
        return Err(PaymentError::Api {
            provider,
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| PaymentError::Response {
        provider,
        message: e.to_string(),
    })
}

/// Pull a required string field out of a provider response.
fn string_field(
    provider: PaymentProvider,
    value: &serde_json::Value,
    field: &str,
) -> Result<String, PaymentError> {
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PaymentError::Response {
            provider,
            message: format!("missing `{field}` in response"),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_provider_is_reported() {
        let gateway =
            HttpPaymentGateway::new(&PaymentsConfig::default(), Duration::from_secs(1)).unwrap();

        let err = gateway
            .payment_state(PaymentProvider::Stripe, "cs_test")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotConfigured(PaymentProvider::Stripe)));
        assert!(!err.is_unavailable());

        let err = gateway
            .verify_signature(PaymentProvider::Razorpay, "order", "pay", "sig")
            .unwrap_err();
        assert_eq!(err.to_string(), "Razorpay payments are not configured");
    }

    #[test]
    fn test_string_field() {
        let value = serde_json::json!({"id": "cs_1", "amount": 5});
        assert_eq!(
            string_field(PaymentProvider::Stripe, &value, "id").unwrap(),
            "cs_1"
        );
        assert!(string_field(PaymentProvider::Stripe, &value, "amount").is_err());
    }
}
