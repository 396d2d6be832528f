//! Order lifecycle enums and the fulfilment state machine.
//!
//! An order moves along two independent axes:
//!
//! - [`CheckoutState`]: whether payment has been settled with the customer
//!   (`Provisional` orders are waiting on a payment provider and may be
//!   deleted if the payment fails).
//! - [`OrderStatus`]: fulfilment progress, which only moves forward one stage
//!   at a time.
//!
//! ```text
//! Order Placed -> Packing -> Shipped -> Out for delivery -> Delivered
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use super::text_column::text_column;

/// Error returned when a status, method or checkout string is not recognised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    /// What was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// A fulfilment transition that the state machine does not allow.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot move order from {from} to {to}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Fulfilment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OrderStatus {
    #[default]
    OrderPlaced,
    Packing,
    Shipped,
    OutForDelivery,
    Delivered,
}

impl OrderStatus {
    /// Every status in fulfilment order.
    pub const ALL: [Self; 5] = [
        Self::OrderPlaced,
        Self::Packing,
        Self::Shipped,
        Self::OutForDelivery,
        Self::Delivered,
    ];

    /// Human-readable label, also the stored and wire representation.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OrderPlaced => "Order Placed",
            Self::Packing => "Packing",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "Out for delivery",
            Self::Delivered => "Delivered",
        }
    }

    /// The stage that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::OrderPlaced => Some(Self::Packing),
            Self::Packing => Some(Self::Shipped),
            Self::Shipped => Some(Self::OutForDelivery),
            Self::OutForDelivery => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }

    /// Validate a move to `to`.
    ///
    /// Staying on the same stage is accepted (idempotent update). Otherwise
    /// only the immediately following stage is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] for backward moves and skipped stages.
    pub const fn transition_to(self, to: Self) -> Result<Self, TransitionError> {
        let same = self as u8 == to as u8;
        let advances = matches!(self.next(), Some(next) if next as u8 == to as u8);
        if same || advances {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    /// Accepts the labels case-insensitively, plus `snake_case` spellings
    /// such as `out_for_delivery`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Self::ALL
            .into_iter()
            .find(|status| {
                status
                    .label()
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .map(|c| c.to_ascii_lowercase())
                    .eq(wanted.chars())
            })
            .ok_or_else(|| ParseStatusError {
                kind: "order status",
                value: s.to_owned(),
            })
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.label().to_owned()
    }
}

text_column!(OrderStatus);

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaymentMethod {
    /// Cash on delivery.
    Cod,
    /// Stripe hosted checkout.
    Stripe,
    /// Razorpay order checkout.
    Razorpay,
}

impl PaymentMethod {
    /// Stored and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cod => "COD",
            Self::Stripe => "Stripe",
            Self::Razorpay => "Razorpay",
        }
    }

    /// Whether the order must be confirmed by an external provider.
    #[must_use]
    pub const fn requires_provider(&self) -> bool {
        !matches!(self, Self::Cod)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cod" => Ok(Self::Cod),
            "stripe" => Ok(Self::Stripe),
            "razorpay" => Ok(Self::Razorpay),
            _ => Err(ParseStatusError {
                kind: "payment method",
                value: s.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.as_str().to_owned()
    }
}

text_column!(PaymentMethod);

/// Whether the order has been settled with its payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckoutState {
    /// Created before payment confirmation; deleted if the payment fails.
    Provisional,
    /// Accepted for fulfilment.
    Confirmed,
}

impl CheckoutState {
    /// Stored and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "Provisional",
            Self::Confirmed => "Confirmed",
        }
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckoutState {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provisional" => Ok(Self::Provisional),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(ParseStatusError {
                kind: "checkout state",
                value: s.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for CheckoutState {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckoutState> for String {
    fn from(state: CheckoutState) -> Self {
        state.as_str().to_owned()
    }
}

text_column!(CheckoutState);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.label().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_from_str_is_lenient_about_spelling() {
        assert_eq!(
            "out_for_delivery".parse::<OrderStatus>().unwrap(),
            OrderStatus::OutForDelivery
        );
        assert_eq!(
            "ORDER PLACED".parse::<OrderStatus>().unwrap(),
            OrderStatus::OrderPlaced
        );
        assert!("Lost".parse::<OrderStatus>().is_err());
        assert!("".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_forward_single_step_allowed() {
        let mut status = OrderStatus::OrderPlaced;
        while let Some(next) = status.next() {
            status = status.transition_to(next).unwrap();
        }
        assert_eq!(status, OrderStatus::Delivered);
    }

    #[test]
    fn test_same_status_is_idempotent() {
        assert_eq!(
            OrderStatus::Shipped.transition_to(OrderStatus::Shipped),
            Ok(OrderStatus::Shipped)
        );
    }

    #[test]
    fn test_backward_and_skipping_rejected() {
        let err = OrderStatus::Shipped
            .transition_to(OrderStatus::Packing)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot move order from Shipped to Packing");
        assert!(
            OrderStatus::OrderPlaced
                .transition_to(OrderStatus::Delivered)
                .is_err()
        );
        assert!(
            OrderStatus::Delivered
                .transition_to(OrderStatus::OrderPlaced)
                .is_err()
        );
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::OutForDelivery).unwrap(),
            "\"Out for delivery\""
        );
        assert_eq!(serde_json::to_string(&PaymentMethod::Cod).unwrap(), "\"COD\"");
        assert_eq!(
            serde_json::from_str::<CheckoutState>("\"Provisional\"").unwrap(),
            CheckoutState::Provisional
        );
    }

    #[test]
    fn test_provider_methods() {
        assert!(!PaymentMethod::Cod.requires_provider());
        assert!(PaymentMethod::Stripe.requires_provider());
        assert!(PaymentMethod::Razorpay.requires_provider());
    }
}
