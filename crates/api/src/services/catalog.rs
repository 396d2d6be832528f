//! Catalog service.

use std::collections::HashSet;

use careveli_core::ProductId;

use crate::db::CommerceStore;
use crate::error::{AppError, Result};
use crate::models::product::{MAX_IMAGES, NewProduct, Product};

/// Product management for admins plus the public listing.
pub struct CatalogService<'a, S> {
    store: &'a S,
}

impl<'a, S: CommerceStore> CatalogService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Validate and store a new product.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if a required field is blank, there are
    /// too many images, or sizes are blank or repeated.
    #[tracing::instrument(skip(self, product), fields(name = %product.name))]
    pub async fn add_product(&self, product: NewProduct) -> Result<Product> {
        let product = validate(product)?;
        let created = self.store.insert_product(product).await?;
        tracing::info!(product_id = %created.id, "Product added");
        Ok(created)
    }

    /// Soft-delete a product.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the product is missing or already removed.
    #[tracing::instrument(skip(self))]
    pub async fn remove_product(&self, id: ProductId) -> Result<()> {
        if !self.store.soft_delete_product(id).await? {
            return Err(AppError::NotFound("Product not found".to_string()));
        }
        tracing::info!("Product removed");
        Ok(())
    }

    /// One product, as long as it has not been removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the product is missing or removed.
    pub async fn single_product(&self, id: ProductId) -> Result<Product> {
        self.store
            .product_by_id(id)
            .await?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))
    }

    /// Every listed product, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.store.list_products().await?)
    }
}

fn validate(mut product: NewProduct) -> Result<NewProduct> {
    for (field, value) in [
        ("name", &mut product.name),
        ("description", &mut product.description),
        ("category", &mut product.category),
        ("subCategory", &mut product.sub_category),
    ] {
        *value = value.trim().to_owned();
        if value.is_empty() {
            return Err(AppError::Validation(format!("{field} is required")));
        }
    }

    product.images.retain(|url| !url.trim().is_empty());
    if product.images.len() > MAX_IMAGES {
        return Err(AppError::Validation(format!(
            "At most {MAX_IMAGES} images are allowed"
        )));
    }

    let mut seen = HashSet::new();
    for size in &mut product.sizes {
        *size = size.trim().to_owned();
        if size.is_empty() {
            return Err(AppError::Validation("Sizes cannot be blank".to_string()));
        }
        if !seen.insert(size.clone()) {
            return Err(AppError::Validation(format!("Duplicate size {size}")));
        }
    }

    Ok(product)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use careveli_core::Amount;

    use super::*;
    use crate::db::MemoryStore;

    fn shirt() -> NewProduct {
        NewProduct {
            name: " Linen Shirt ".into(),
            description: "Breathable".into(),
            price: Amount::from_units(499),
            category: "Men".into(),
            sub_category: "Topwear".into(),
            images: vec!["https://img.test/1.jpg".into(), String::new()],
            sizes: vec!["S".into(), "M".into()],
            bestseller: true,
        }
    }

    #[test]
    fn test_validate_trims_and_drops_empty_images() {
        let product = validate(shirt()).unwrap();
        assert_eq!(product.name, "Linen Shirt");
        assert_eq!(product.images.len(), 1);
    }

    #[test]
    fn test_validate_rejections() {
        let mut blank = shirt();
        blank.category = "  ".into();
        assert!(matches!(validate(blank), Err(AppError::Validation(m)) if m == "category is required"));

        let mut many = shirt();
        many.images = (0..5).map(|i| format!("https://img.test/{i}.jpg")).collect();
        assert!(validate(many).is_err());

        let mut dup = shirt();
        dup.sizes = vec!["M".into(), " M".into()];
        assert!(validate(dup).is_err());
    }

    #[tokio::test]
    async fn test_remove_hides_product() {
        let store = MemoryStore::new();
        let catalog = CatalogService::new(&store);
        let product = catalog.add_product(shirt()).await.unwrap();

        assert_eq!(catalog.list_products().await.unwrap().len(), 1);
        catalog.remove_product(product.id).await.unwrap();

        assert!(catalog.list_products().await.unwrap().is_empty());
        assert!(matches!(
            catalog.single_product(product.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            catalog.remove_product(product.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
