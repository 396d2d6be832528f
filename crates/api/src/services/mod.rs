//! Domain services.
//!
//! Services borrow the store (and, for orders, the payment gateway) for the
//! length of one request.

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod orders;
pub mod payments;
