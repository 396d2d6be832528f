//! Order snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use careveli_core::{
    Amount, AmountError, CheckoutState, OrderId, OrderStatus, PaymentMethod, ProductId,
    ShippingAddress, UserId,
};

/// One purchased line, copied from the catalog when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub item_id: ProductId,
    pub name: String,
    pub size: String,
    pub quantity: u32,
    pub unit_price: Amount,
}

impl OrderLine {
    /// `unit_price * quantity`.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] past [`Amount::MAX`].
    pub fn total(&self) -> Result<Amount, AmountError> {
        self.unit_price.times(self.quantity)
    }
}

/// A stored order.
///
/// `items` and `amount` are fixed at creation. Later writes only touch the
/// status, payment and provider fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub amount: Amount,
    pub address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment: bool,
    pub status: OrderStatus,
    pub checkout_state: CheckoutState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    /// What the client received when the provider session was opened.
    #[serde(skip)]
    pub provider_payload: Option<serde_json::Value>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self.checkout_state, CheckoutState::Provisional)
    }
}

/// A validated order ready to be stored.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub amount: Amount,
    pub address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub checkout_state: CheckoutState,
    pub idempotency_key: Option<String>,
}

/// A line as submitted by the client.
///
/// Only the item, size and quantity are trusted. Name and price come from the
/// catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    #[serde(alias = "_id", alias = "id")]
    pub item_id: ProductId,
    pub size: String,
    pub quantity: i64,
}
