//! Cart route handlers.
//!
//! The cart always belongs to the token's user. Any `userId` in the body is
//! ignored.

use axum::extract::State;
use serde::Deserialize;
use tracing::instrument;

use careveli_core::{Cart, ProductId};

use crate::db::CommerceStore;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::extract::ApiJson;
use crate::middleware::RequireUser;
use crate::services::cart::CartService;
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Body of `/api/cart/add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub item_id: ProductId,
    pub size: String,
}

/// Body of `/api/cart/update`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub item_id: ProductId,
    pub size: String,
    pub quantity: i64,
}

/// Fetch the caller's cart.
#[instrument(skip(state, principal), fields(user_id = %principal.user_id))]
pub async fn get<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
) -> Result<Envelope<Cart>> {
    let cart = CartService::new(state.store())
        .get_user_cart(principal.user_id)
        .await?;
    Ok(Envelope::data(cart))
}

/// Add one unit of an item.
#[instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn add<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    ApiJson(body): ApiJson<AddRequest>,
) -> Result<Envelope> {
    CartService::new(state.store())
        .add_to_cart(principal.user_id, body.item_id, &body.size)
        .await?;
    Ok(Envelope::ok("Added To Cart"))
}

/// Set an item's quantity.
#[instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn update<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireUser(principal): RequireUser,
    ApiJson(body): ApiJson<UpdateRequest>,
) -> Result<Envelope> {
    CartService::new(state.store())
        .update_cart(principal.user_id, body.item_id, &body.size, body.quantity)
        .await?;
    Ok(Envelope::ok("Cart Updated"))
}
