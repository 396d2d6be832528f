//! Bearer tokens.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url without
//! padding) signed with HMAC-SHA256. The payload carries the user id and the
//! role, so the admin gate trusts the signed `role` claim and never a
//! client-supplied value.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use careveli_core::{Role, UserId};

use super::AuthError;

/// Header for every issued token. Verification rejects any other algorithm.
const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: UserId,
    pub role: Role,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// Issues and verifies bearer tokens.
///
/// Implements `Debug` manually to redact the signing secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: SecretString,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"[REDACTED]")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: SecretString, ttl: Duration) -> Self {
        Self {
            secret,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Issue a token for a user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenSigning` if the claims cannot be encoded.
    pub fn issue(&self, user_id: UserId, role: Role) -> Result<String, AuthError> {
        self.issue_at(user_id, role, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenSigning` if the claims cannot be encoded.
    pub fn issue_at(
        &self,
        user_id: UserId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let iat = now.timestamp();
        let claims = Claims {
            sub: user_id,
            role,
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        };
        let payload =
            serde_json::to_vec(&claims).map_err(|e| AuthError::TokenSigning(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.mac(&signing_input)?.finalize().into_bytes();

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify a token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for malformed or badly signed tokens
    /// and `AuthError::TokenExpired` for expired ones.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`TokenSigner::verify`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let token = token.trim();
        let (signing_input, signature) = token.rsplit_once('.').ok_or(AuthError::InvalidToken)?;
        let (header, payload) = signing_input
            .split_once('.')
            .ok_or(AuthError::InvalidToken)?;
        if payload.contains('.') {
            return Err(AuthError::InvalidToken);
        }

        let header: Header = decode_json(header)?;
        if header.alg != "HS256" {
            return Err(AuthError::InvalidToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::InvalidToken)?;

        // Constant-time comparison
        self.mac(signing_input)?
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let claims: Claims = decode_json(payload)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    fn mac(&self, signing_input: &str) -> Result<Hmac<Sha256>, AuthError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| AuthError::TokenSigning(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)
}
