//! Domain models for the commerce API.
//!
//! These are validated domain objects, separate from the database row types
//! in `crate::db`.

pub mod order;
pub mod product;
pub mod user;
