//! Admin user management commands.
//!
//! The API has no way to mint admins. These commands are the only bootstrap.
//!
//! # Usage
//!
//! ```bash
//! careveli admin create -e admin@example.com -n "Admin Name" -p 'long passphrase'
//! careveli admin promote -e shopper@example.com
//! ```

use careveli_api::db::PgStore;
use careveli_api::services::auth::{AuthError, AuthService};
use careveli_core::{Role, UserId};
use thiserror::Error;

use super::{ConnectError, connect};

/// Errors that can occur during admin operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Validation or store failure from the auth service.
    #[error("{0}")]
    Auth(#[from] AuthError),
}

/// Create a new admin user and return its id.
pub async fn create_user(email: &str, name: &str, password: &str) -> Result<UserId, AdminError> {
    let store = PgStore::new(connect().await?);

    tracing::info!("Creating admin user: {}", email);
    let user = AuthService::new(&store)
        .create_with_role(name, email, password, Role::Admin)
        .await?;

    tracing::info!(
        "Admin user created successfully! ID: {}, Email: {}",
        user.id,
        user.email
    );
    Ok(user.id)
}

/// Grant the admin role to an existing user.
pub async fn promote(email: &str) -> Result<(), AdminError> {
    let store = PgStore::new(connect().await?);

    let user = AuthService::new(&store).promote(email).await?;

    tracing::info!("Promoted {} (ID: {}) to admin", user.email, user.id);
    Ok(())
}
