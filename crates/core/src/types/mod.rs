//! Core types for Careveli.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod amount;
pub mod cart;
pub mod email;
pub mod id;
pub mod order;
pub mod role;

mod text_column;

pub use address::{AddressError, ShippingAddress};
pub use amount::{Amount, AmountError};
pub use cart::{Cart, CartEntry, CartError};
pub use email::{Email, EmailError};
pub use id::*;
pub use order::{
    CheckoutState, OrderStatus, ParseStatusError, PaymentMethod, TransitionError,
};
pub use role::Role;
