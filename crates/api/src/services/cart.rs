//! Cart service.
//!
//! Each (item, size) pair is stored as its own row, so concurrent adds for the
//! same user touch different rows or a single atomic upsert and never lose an
//! update.

use careveli_core::{Cart, ProductId, UserId, cart::normalize_size};

use crate::db::CommerceStore;
use crate::error::{AppError, Result};
use crate::models::product::Product;

/// Largest quantity a single cart entry or order line may hold.
pub const MAX_QUANTITY: u32 = 10_000;

/// Cart operations for one store.
pub struct CartService<'a, S> {
    store: &'a S,
}

impl<'a, S: CommerceStore> CartService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The user's whole cart.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user does not exist or was deleted.
    pub async fn get_user_cart(&self, user_id: UserId) -> Result<Cart> {
        self.ensure_user(user_id).await?;
        let entries = self.store.cart_entries(user_id).await?;
        Ok(Cart::from_entries(entries))
    }

    /// Add one unit of `item_id` in `size`. Returns the new quantity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a blank or unoffered size and
    /// `AppError::NotFound` for an unknown user or product.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(&self, user_id: UserId, item_id: ProductId, size: &str) -> Result<u32> {
        let size = normalize_size(size).map_err(|e| AppError::Validation(e.to_string()))?;
        self.ensure_user(user_id).await?;
        self.ensure_orderable(item_id, &size).await?;

        let quantity = self
            .store
            .increment_cart_entry(user_id, item_id, &size)
            .await?;
        tracing::debug!(quantity, "Cart entry incremented");
        Ok(quantity)
    }

    /// Set an explicit quantity. Zero removes the entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a negative or oversized quantity or
    /// a bad size, and `AppError::NotFound` for an unknown user or product.
    #[tracing::instrument(skip(self))]
    pub async fn update_cart(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
        quantity: i64,
    ) -> Result<()> {
        if quantity < 0 {
            return Err(AppError::Validation(
                "Quantity cannot be negative".to_string(),
            ));
        }
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q <= MAX_QUANTITY)
            .ok_or_else(|| AppError::Validation("Quantity is too large".to_string()))?;
        let size = normalize_size(size).map_err(|e| AppError::Validation(e.to_string()))?;

        self.ensure_user(user_id).await?;
        if quantity > 0 {
            self.ensure_orderable(item_id, &size).await?;
        }

        self.store
            .set_cart_entry(user_id, item_id, &size, quantity)
            .await?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<()> {
        match self.store.user_by_id(user_id).await? {
            Some(user) if !user.is_deleted => Ok(()),
            _ => Err(AppError::NotFound("User not found".to_string())),
        }
    }

    async fn ensure_orderable(&self, item_id: ProductId, size: &str) -> Result<Product> {
        let product = self
            .store
            .product_by_id(item_id)
            .await?
            .filter(Product::is_available)
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

        if !product.offers_size(size) {
            return Err(AppError::Validation(format!(
                "Size {size} is not available for {}",
                product.name
            )));
        }
        Ok(product)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use careveli_core::Role;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::product::NewProduct;
    use crate::models::user::NewUser;

    async fn seed(store: &MemoryStore) -> (UserId, ProductId) {
        let user = store
            .create_user(NewUser {
                name: "Asha".into(),
                email: careveli_core::Email::parse("asha@example.com").unwrap(),
                password_hash: "unused".into(),
                role: Role::User,
            })
            .await
            .unwrap();
        let product = store
            .insert_product(NewProduct {
                name: "Linen Shirt".into(),
                description: "Breathable".into(),
                price: careveli_core::Amount::from_units(499),
                category: "Men".into(),
                sub_category: "Topwear".into(),
                images: vec![],
                sizes: vec!["S".into(), "M".into()],
                bestseller: false,
            })
            .await
            .unwrap();
        (user.id, product.id)
    }

    #[tokio::test]
    async fn test_add_increments_by_one() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let cart = CartService::new(&store);

        assert_eq!(cart.add_to_cart(user, item, "M").await.unwrap(), 1);
        assert_eq!(cart.add_to_cart(user, item, " M ").await.unwrap(), 2);
        assert_eq!(cart.get_user_cart(user).await.unwrap().quantity(item, "M"), 2);
    }

    #[tokio::test]
    async fn test_update_to_zero_removes_key() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let cart = CartService::new(&store);

        cart.update_cart(user, item, "S", 3).await.unwrap();
        cart.update_cart(user, item, "S", 0).await.unwrap();
        assert!(cart.get_user_cart(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejections() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let cart = CartService::new(&store);

        assert!(matches!(
            cart.update_cart(user, item, "M", -1).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cart.update_cart(user, item, "M", i64::from(MAX_QUANTITY) + 1).await,
            Err(AppError::Validation(m)) if m == "Quantity is too large"
        ));
        assert!(matches!(
            cart.add_to_cart(user, item, "XXL").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cart.add_to_cart(user, item, "").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cart.add_to_cart(user, ProductId::new(999), "M").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            cart.get_user_cart(UserId::new(999)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_product_cannot_be_added() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        store.soft_delete_product(item).await.unwrap();

        assert!(matches!(
            CartService::new(&store).add_to_cart(user, item, "M").await,
            Err(AppError::NotFound(_))
        ));
    }
}
