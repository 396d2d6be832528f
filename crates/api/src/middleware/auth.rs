//! Bearer token extractors.
//!
//! The token is read from the `token` header, then from
//! `Authorization: Bearer <token>`, then from a bare `Authorization` value.
//!
//! ```rust,ignore
//! async fn handler(RequireUser(principal): RequireUser) -> impl IntoResponse {
//!     format!("Hello, {}!", principal.user_id)
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use careveli_core::{Role, UserId};

use crate::db::CommerceStore;
use crate::error::{AppError, NOT_AUTHORIZED, set_sentry_user};
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Custom header carrying the token.
pub const TOKEN_HEADER: &str = "token";

/// The verified caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

/// Extractor that requires any valid token.
pub struct RequireUser(pub Principal);

/// Extractor that requires a token whose signed role is admin.
pub struct RequireAdmin(pub Principal);

impl<S: CommerceStore, G: PaymentGateway> FromRequestParts<AppState<S, G>> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S, G>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state).map(Self)
    }
}

impl<S: CommerceStore, G: PaymentGateway> FromRequestParts<AppState<S, G>> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S, G>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(&parts.headers, state)?;
        if !principal.role.is_admin() {
            tracing::warn!(user_id = %principal.user_id, "Admin route refused for non-admin token");
            return Err(not_authorized());
        }
        Ok(Self(principal))
    }
}

fn authenticate<S: CommerceStore, G: PaymentGateway>(
    headers: &HeaderMap,
    state: &AppState<S, G>,
) -> Result<Principal, AppError> {
    let token = bearer_token(headers).ok_or_else(not_authorized)?;

    let claims = state.tokens().verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        not_authorized()
    })?;

    set_sentry_user(&claims.sub);
    Ok(Principal {
        user_id: claims.sub,
        role: claims.role,
    })
}

/// Pull the raw token out of the request headers.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header(TOKEN_HEADER).or_else(|| {
        header(AUTHORIZATION.as_str()).map(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
                .map_or(value, str::trim)
        })
    })
}

fn not_authorized() -> AppError {
    AppError::Unauthorized(NOT_AUTHORIZED.to_string())
}
