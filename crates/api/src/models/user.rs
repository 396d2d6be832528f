//! User domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use careveli_core::{Email, Role, UserId};

/// A registered user (domain type).
///
/// The password hash never lives on this type, so a `User` is safe to log or
/// return to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Normalised email address.
    pub email: Email,
    /// Role carried into every issued token.
    pub role: Role,
    /// Cleared to lock the account without deleting it.
    pub is_active: bool,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// Whether the email has been verified.
    pub is_email_verified: bool,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account may sign in and own a cart.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Email,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: Role,
}
