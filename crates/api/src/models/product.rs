//! Catalog product types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use careveli_core::{Amount, ProductId};

/// A catalog product.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Amount,
    pub category: String,
    pub sub_category: String,
    /// Image URLs, at most [`MAX_IMAGES`].
    pub images: Vec<String>,
    /// Offered sizes in display order. Empty means the product is unsized.
    pub sizes: Vec<String>,
    pub bestseller: bool,
    pub is_active: bool,
    #[serde(skip)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum number of images per product.
pub const MAX_IMAGES: usize = 4;

impl Product {
    /// Whether the product can be added to carts and ordered.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.is_active && !self.is_deleted
    }

    /// Whether `size` may be ordered. Unsized products accept any label.
    #[must_use]
    pub fn offers_size(&self, size: &str) -> bool {
        self.sizes.is_empty() || self.sizes.iter().any(|s| s == size)
    }
}

/// Admin input for a new product.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Amount,
    pub category: String,
    pub sub_category: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub bestseller: bool,
}
