//! Catalog route handlers.

use axum::extract::State;
use serde::Deserialize;
use tracing::instrument;

use careveli_core::ProductId;

use crate::db::CommerceStore;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::extract::ApiJson;
use crate::middleware::RequireAdmin;
use crate::models::product::{NewProduct, Product};
use crate::services::catalog::CatalogService;
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Body naming a single product.
#[derive(Debug, Deserialize)]
pub struct ProductRef {
    #[serde(alias = "productId")]
    pub id: ProductId,
}

/// Add a product (admin). Images are URLs.
#[instrument(skip(state, admin, product), fields(admin_id = %admin.user_id))]
pub async fn add<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(product): ApiJson<NewProduct>,
) -> Result<Envelope<Product>> {
    let product = CatalogService::new(state.store())
        .add_product(product)
        .await?;
    Ok(Envelope::data(product).with_message("Product Added"))
}

/// Remove a product (admin).
#[instrument(skip(state, admin, body), fields(admin_id = %admin.user_id, product_id = %body.id))]
pub async fn remove<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(body): ApiJson<ProductRef>,
) -> Result<Envelope> {
    CatalogService::new(state.store())
        .remove_product(body.id)
        .await?;
    Ok(Envelope::ok("Product Removed"))
}

/// One product (admin).
pub async fn single<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    RequireAdmin(_): RequireAdmin,
    ApiJson(body): ApiJson<ProductRef>,
) -> Result<Envelope<Product>> {
    let product = CatalogService::new(state.store())
        .single_product(body.id)
        .await?;
    Ok(Envelope::data(product))
}

/// Every listed product.
pub async fn list<S: CommerceStore, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
) -> Result<Envelope<Vec<Product>>> {
    let products = CatalogService::new(state.store()).list_products().await?;
    Ok(Envelope::data(products))
}
