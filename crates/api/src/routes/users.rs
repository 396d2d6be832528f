//! Registration and login.

use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::CommerceStore;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::extract::ApiJson;
use crate::models::user::User;
use crate::services::auth::AuthService;
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Registration form.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Login form.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by every successful login.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Register a shopper and log them in.
#[instrument(skip(state, form), fields(email = %form.email))]
pub async fn register<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    ApiJson(form): ApiJson<RegisterRequest>,
) -> Result<Envelope<TokenResponse>> {
    let user = AuthService::new(state.store())
        .register(&form.name, &form.email, &form.password)
        .await?;
    token_for(&state, &user)
}

/// Log a shopper in.
#[instrument(skip(state, form), fields(email = %form.email))]
pub async fn login<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    ApiJson(form): ApiJson<LoginRequest>,
) -> Result<Envelope<TokenResponse>> {
    let user = AuthService::new(state.store())
        .login(&form.email, &form.password)
        .await?;
    token_for(&state, &user)
}

/// Log an admin in.
#[instrument(skip(state, form), fields(email = %form.email))]
pub async fn admin_login<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    ApiJson(form): ApiJson<LoginRequest>,
) -> Result<Envelope<TokenResponse>> {
    let user = AuthService::new(state.store())
        .admin_login(&form.email, &form.password)
        .await?;
    token_for(&state, &user)
}

fn token_for<S: CommerceStore, G: PaymentGateway>(
    state: &AppState<S, G>,
    user: &User,
) -> Result<Envelope<TokenResponse>> {
    let token = state.tokens().issue(user.id, user.role)?;
    Ok(Envelope::data(TokenResponse { token }))
}
