//! Careveli Core - Shared value types.
//!
//! This crate provides the domain vocabulary used by every Careveli component:
//! - `api` - The HTTP backend (cart, catalog, orders, payments)
//! - `cli` - Command-line tools for migrations and operations
//!
//! # Architecture
//!
//! The core crate contains only types and pure domain rules - no I/O, no
//! database access, no HTTP clients. Column mappings for `PostgreSQL` are
//! available behind the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, amounts, roles, cart and order state

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
