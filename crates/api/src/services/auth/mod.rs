//! Authentication service.
//!
//! Provides password registration and login for shoppers and admins, plus the
//! bearer tokens handed out on success.

mod error;
pub mod token;

pub use error::AuthError;
pub use token::{Claims, TokenSigner};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use careveli_core::{Email, Role};

use crate::db::{CommerceStore, RepositoryError};
use crate::models::user::{NewUser, User};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Authentication service.
///
/// Handles registration, login, and admin bootstrap.
pub struct AuthService<'a, S> {
    store: &'a S,
}

impl<'a, S: CommerceStore> AuthService<'a, S> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Register a new shopper.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingName` if the name is blank.
    /// Returns `AuthError::InvalidEmail` if the email format is invalid.
    /// Returns `AuthError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AuthError::UserAlreadyExists` if the email is already registered.
    #[tracing::instrument(skip(self, password))]
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AuthError> {
        self.create_with_role(name, email, password, Role::User)
            .await
    }

    /// Create a user with an explicit role.
    ///
    /// # Errors
    ///
    /// Same as [`AuthService::register`].
    pub async fn create_with_role(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, AuthError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::MissingName);
        }
        let email = Email::parse(email)?;
        validate_password(password)?;
        let password_hash = hash_password(password)?;

        let user = self
            .store
            .create_user(NewUser {
                name: name.to_owned(),
                email,
                password_hash,
                role,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })?;

        tracing::info!(user_id = %user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Check a shopper's credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown email, a wrong
    /// password, or a deactivated or deleted account.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let (user, password_hash) = self
            .store
            .user_credentials(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &password_hash)?;

        if !user.is_usable() {
            tracing::warn!(user_id = %user.id, "Login attempt on disabled account");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Check an admin's credentials.
    ///
    /// # Errors
    ///
    /// Same as [`AuthService::login`], and `AuthError::InvalidCredentials`
    /// when the account is not an admin.
    #[tracing::instrument(skip(self, password))]
    pub async fn admin_login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self.login(email, password).await?;
        if !user.role.is_admin() {
            tracing::warn!(user_id = %user.id, "Admin login attempt by non-admin");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }

    /// Grant the admin role to an existing user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UserNotFound` if no user has the email.
    pub async fn promote(&self, email: &str) -> Result<User, AuthError> {
        let email = Email::parse(email)?;
        self.store
            .set_user_role(&email, Role::Admin)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => AuthError::Repository(other),
            })
    }
}

/// Validate password meets requirements.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}
