//! Order route handlers.
//!
//! Placement and verification act for the token's user. Listing all orders
//! and changing status are admin-only.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use serde::{Deserialize, Deserializer};
use tracing::instrument;

use careveli_core::OrderId;

use crate::db::CommerceStore;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::extract::ApiJson;
use crate::middleware::{RequireAdmin, RequireUser};
use crate::models::order::Order;
use crate::services::orders::{PlaceOrder, Verification};
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Client-chosen key that makes checkout creation safe to retry.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Body of `/api/order/verifyStripe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyStripeRequest {
    #[serde(deserialize_with = "order_id")]
    pub order_id: OrderId,
    /// The redirect carries it as a string, so both forms are accepted.
    #[serde(deserialize_with = "flag")]
    pub success: bool,
}

/// Body of `/api/order/verifyRazorpay`. Field names follow Razorpay's.
#[derive(Debug, Deserialize)]
pub struct VerifyRazorpayRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
}

/// Body of `/api/order/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    #[serde(deserialize_with = "order_id")]
    pub order_id: OrderId,
    pub status: String,
}

/// Place a cash-on-delivery order.
#[instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn place<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    ApiJson(body): ApiJson<PlaceOrder>,
) -> Result<Envelope<Order>> {
    let order = state.orders().place_order(principal.user_id, body).await?;
    Ok(Envelope::data(order).with_message("Order Placed"))
}

/// Open a Stripe checkout session.
#[instrument(skip(state, principal, headers, body), fields(user_id = %principal.user_id))]
pub async fn stripe<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    headers: HeaderMap,
    ApiJson(body): ApiJson<PlaceOrder>,
) -> Result<Envelope<serde_json::Value>> {
    let started = state
        .orders()
        .place_order_stripe(
            principal.user_id,
            body,
            header(&headers, ORIGIN.as_str()),
            header(&headers, IDEMPOTENCY_KEY_HEADER),
        )
        .await?;
    Ok(Envelope::data(started.into_data()))
}

/// Open a Razorpay order.
#[instrument(skip(state, principal, headers, body), fields(user_id = %principal.user_id))]
pub async fn razorpay<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    headers: HeaderMap,
    ApiJson(body): ApiJson<PlaceOrder>,
) -> Result<Envelope<serde_json::Value>> {
    let started = state
        .orders()
        .place_order_razorpay(
            principal.user_id,
            body,
            header(&headers, IDEMPOTENCY_KEY_HEADER),
        )
        .await?;
    Ok(Envelope::data(started.into_data()))
}

/// Confirm or cancel a Stripe order after the redirect.
#[instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn verify_stripe<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    ApiJson(body): ApiJson<VerifyStripeRequest>,
) -> Result<Envelope> {
    let outcome = state
        .orders()
        .verify_stripe(principal.user_id, body.order_id, body.success)
        .await?;
    Ok(verification_envelope(&outcome))
}

/// Confirm or discard a Razorpay order after the checkout callback.
#[instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn verify_razorpay<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    ApiJson(body): ApiJson<VerifyRazorpayRequest>,
) -> Result<Envelope> {
    let outcome = state
        .orders()
        .verify_razorpay(
            principal.user_id,
            &body.razorpay_order_id,
            body.razorpay_payment_id.as_deref(),
            body.razorpay_signature.as_deref(),
        )
        .await?;
    Ok(verification_envelope(&outcome))
}

/// The caller's orders.
pub async fn user_orders<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
) -> Result<Envelope<Vec<Order>>> {
    let orders = state.orders().user_orders(principal.user_id).await?;
    Ok(Envelope::data(orders))
}

/// Every order (admin).
pub async fn list<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireAdmin(_): RequireAdmin,
) -> Result<Envelope<Vec<Order>>> {
    let orders = state.orders().all_orders().await?;
    Ok(Envelope::data(orders))
}

/// Move an order along its fulfilment stages (admin).
#[instrument(skip(state, admin, body), fields(admin_id = %admin.user_id, order_id = %body.order_id))]
pub async fn update_status<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(body): ApiJson<StatusRequest>,
) -> Result<Envelope<Order>> {
    let order = state
        .orders()
        .update_status(body.order_id, &body.status)
        .await?;
    Ok(Envelope::data(order).with_message("Status Updated"))
}

fn verification_envelope(outcome: &Verification) -> Envelope {
    match outcome {
        Verification::Paid(_) => Envelope::ok("Payment Successful"),
        Verification::Cancelled => Envelope::failure("Payment Failed"),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(i64),
    Text(String),
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => Ok(b),
        Loose::Text(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected true or false, got {other:?}"
            ))),
        },
        Loose::Number(_) => Err(serde::de::Error::custom("expected a boolean")),
    }
}

fn order_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<OrderId, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Number(n) => i32::try_from(n)
            .map(OrderId::new)
            .map_err(serde::de::Error::custom),
        Loose::Text(s) => s.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("invalid order id {s:?}"))
        }),
        Loose::Bool(_) => Err(serde::de::Error::custom("expected an order id")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_stripe_accepts_string_flags() {
        let body: VerifyStripeRequest =
            serde_json::from_value(serde_json::json!({"orderId": "12", "success": "true"}))
                .unwrap();
        assert_eq!(body.order_id, OrderId::new(12));
        assert!(body.success);

        let body: VerifyStripeRequest =
            serde_json::from_value(serde_json::json!({"orderId": 12, "success": false}))
                .unwrap();
        assert!(!body.success);

        assert!(
            serde_json::from_value::<VerifyStripeRequest>(
                serde_json::json!({"orderId": 12, "success": "maybe"})
            )
            .is_err()
        );
    }

    #[test]
    fn test_cancelled_verification_reads_as_failure() {
        let body = serde_json::to_value(verification_envelope(&Verification::Cancelled)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Payment Failed");
    }
}
