//! Persistence for the commerce backend.
//!
//! # Tables
//!
//! - `users` - Identity records with argon2 password hashes and a role
//! - `products` - Catalog, soft-deleted via `is_deleted`
//! - `cart_items` - One row per (user, product, size)
//! - `orders` - Order snapshots with checkout and fulfilment state
//!
//! # Migrations
//!
//! Migrations are stored in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p careveli-cli -- migrate
//! ```
//!
//! Handlers never touch a pool directly. They go through [`CommerceStore`],
//! which has a `PostgreSQL` implementation ([`PgStore`]) and an in-memory one
//! ([`MemoryStore`]) used by tests.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use careveli_core::{CartEntry, Email, OrderId, OrderStatus, ProductId, Role, UserId};

use crate::models::order::{NewOrder, Order};
use crate::models::product::{NewProduct, Product};
use crate::models::user::{NewUser, User};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Map unique-constraint violations to `Conflict`, everything else to `Database`.
    pub(crate) fn from_insert(err: sqlx::Error, conflict: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(conflict.to_owned());
        }
        Self::Database(err)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Everything the services need from storage.
///
/// Multi-step writes (`place_confirmed_order`, `confirm_payment`) are atomic:
/// either the order change and the cart clear both happen or neither does.
pub trait CommerceStore: Clone + Send + Sync + 'static {
    /// Check that the store can serve queries.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user. Duplicate emails are a `Conflict`.
    fn create_user(
        &self,
        user: NewUser,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    fn user_by_id(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// Look up a user together with their password hash.
    fn user_credentials(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<Option<(User, String)>, RepositoryError>> + Send;

    /// Change a user's role. `NotFound` when no user has the email.
    fn set_user_role(
        &self,
        email: &Email,
        role: Role,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    // =========================================================================
    // Products
    // =========================================================================

    fn insert_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<Product, RepositoryError>> + Send;

    /// Fetch a product, including removed ones.
    fn product_by_id(
        &self,
        id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, RepositoryError>> + Send;

    /// Active, non-deleted products, newest first.
    fn list_products(&self) -> impl Future<Output = Result<Vec<Product>, RepositoryError>> + Send;

    /// Mark a product deleted. Returns `false` if it was missing or already removed.
    fn soft_delete_product(
        &self,
        id: ProductId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    // =========================================================================
    // Cart
    // =========================================================================

    fn cart_entries(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<CartEntry>, RepositoryError>> + Send;

    /// Add one unit to an entry, creating it when absent. Returns the new quantity.
    fn increment_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
    ) -> impl Future<Output = Result<u32, RepositoryError>> + Send;

    /// Overwrite an entry's quantity. Zero deletes the entry.
    fn set_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
        quantity: u32,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Insert a confirmed order and clear the owner's cart in one transaction.
    fn place_confirmed_order(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    /// Insert a provisional order. A reused idempotency key is a `Conflict`.
    fn insert_provisional_order(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    fn order_by_id(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn order_by_provider_reference(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Record the provider session created for an order.
    fn attach_provider_session(
        &self,
        id: OrderId,
        reference: &str,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    /// Mark a provisional order paid and confirmed, clearing the owner's cart
    /// in the same transaction. Confirmed orders are returned unchanged.
    fn confirm_payment(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    /// Delete an order only while it is still provisional.
    fn delete_provisional_order(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Every order, newest first.
    fn list_orders(&self) -> impl Future<Output = Result<Vec<Order>, RepositoryError>> + Send;

    /// A user's orders, newest first.
    fn list_user_orders(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<Order>, RepositoryError>> + Send;

    /// Compare-and-set the fulfilment status. Returns `false` when the stored
    /// status no longer equals `from`.
    fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Provisional orders created before `cutoff`, oldest first.
    fn stale_provisional_orders(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Order>, RepositoryError>> + Send;
}
