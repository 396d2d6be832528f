//! In-memory implementation of [`CommerceStore`].
//!
//! Every operation holds one lock for its whole duration, which gives the
//! same all-or-nothing behaviour as the `PostgreSQL` transactions. Writes to
//! orders can be made to fail on demand to exercise rollback paths, and a
//! payment confirmation can be made to land just before a deletion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use careveli_core::{
    CartEntry, CheckoutState, Email, OrderId, OrderStatus, ProductId, Role, UserId,
};

use super::{CommerceStore, RepositoryError};
use crate::models::order::{NewOrder, Order};
use crate::models::product::{NewProduct, Product};
use crate::models::user::{NewUser, User};

type CartKey = (UserId, ProductId, String);

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, (User, String)>,
    products: BTreeMap<ProductId, Product>,
    cart: BTreeMap<CartKey, u32>,
    orders: BTreeMap<OrderId, Order>,
    next_user: i32,
    next_product: i32,
    next_order: i32,
}

impl Tables {
    fn next_id(counter: &mut i32) -> i32 {
        *counter += 1;
        *counter
    }

    fn clear_cart(&mut self, user_id: UserId) {
        self.cart.retain(|(owner, _, _), _| *owner != user_id);
    }

    fn insert_order(&mut self, order: NewOrder, state: CheckoutState) -> Result<Order, RepositoryError> {
        if let Some(key) = &order.idempotency_key
            && self
                .orders
                .values()
                .any(|o| o.user_id == order.user_id && o.idempotency_key.as_ref() == Some(key))
        {
            return Err(RepositoryError::Conflict(
                "idempotency key already used".to_owned(),
            ));
        }

        let now = Utc::now();
        let id = OrderId::new(Self::next_id(&mut self.next_order));
        let created = Order {
            id,
            user_id: order.user_id,
            items: order.items,
            amount: order.amount,
            address: order.address,
            payment_method: order.payment_method,
            payment: false,
            status: OrderStatus::default(),
            checkout_state: state,
            provider_reference: None,
            provider_payload: None,
            idempotency_key: order.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(id, created.clone());
        Ok(created)
    }

    fn newest_first<'a>(orders: impl Iterator<Item = &'a Order>) -> Vec<Order> {
        let mut list: Vec<Order> = orders.cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list
    }
}

/// Store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_order_writes: Arc<AtomicBool>,
    confirm_before_delete: Arc<AtomicBool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent order write fail with `Unavailable`.
    pub fn fail_order_writes(&self, fail: bool) {
        self.fail_order_writes.store(fail, Ordering::SeqCst);
    }

    /// Confirm a provisional order just before each deletion attempt, as a
    /// concurrent payment callback would, so the deletion finds nothing.
    pub fn confirm_before_delete(&self, race: bool) {
        self.confirm_before_delete.store(race, Ordering::SeqCst);
    }

    /// Rewrite an order's creation time.
    pub async fn backdate_order(&self, id: OrderId, created_at: DateTime<Utc>) {
        if let Some(order) = self.tables.lock().await.orders.get_mut(&id) {
            order.created_at = created_at;
        }
    }

    /// Number of stored orders, including provisional ones.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Deactivate or reactivate a user account.
    pub async fn set_user_active(&self, id: UserId, active: bool) {
        if let Some((user, _)) = self.tables.lock().await.users.get_mut(&id) {
            user.is_active = active;
        }
    }

    fn check_order_writes(&self) -> Result<(), RepositoryError> {
        if self.fail_order_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "order writes disabled".to_owned(),
            ));
        }
        Ok(())
    }
}

impl CommerceStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|(u, _)| u.email == user.email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }

        let now = Utc::now();
        let id = UserId::new(Tables::next_id(&mut tables.next_user));
        let created = User {
            id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_active: true,
            is_deleted: false,
            is_email_verified: false,
            created_at: now,
            updated_at: now,
        };
        tables
            .users
            .insert(id, (created.clone(), user.password_hash));
        Ok(created)
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .get(&id)
            .map(|(user, _)| user.clone()))
    }

    async fn user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|(user, _)| &user.email == email)
            .cloned())
    }

    async fn set_user_role(&self, email: &Email, role: Role) -> Result<User, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let (user, _) = tables
            .users
            .values_mut()
            .find(|(user, _)| &user.email == email)
            .ok_or(RepositoryError::NotFound)?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let id = ProductId::new(Tables::next_id(&mut tables.next_product));
        let created = Product {
            id,
            name: product.name,
            description: product.description,
            price: product.price,
            category: product.category,
            sub_category: product.sub_category,
            images: product.images,
            sizes: product.sizes,
            bestseller: product.bestseller,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(id, created.clone());
        Ok(created)
    }

    async fn product_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let tables = self.tables.lock().await;
        let mut list: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.is_available())
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn soft_delete_product(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        match tables.products.get_mut(&id) {
            Some(product) if !product.is_deleted => {
                product.is_deleted = true;
                product.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .cart
            .iter()
            .filter(|((owner, _, _), _)| *owner == user_id)
            .map(|((_, item_id, size), quantity)| CartEntry {
                item_id: *item_id,
                size: size.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn increment_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
    ) -> Result<u32, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let slot = tables
            .cart
            .entry((user_id, item_id, size.to_owned()))
            .or_insert(0);
        *slot = slot
            .checked_add(1)
            .ok_or_else(|| RepositoryError::Conflict("quantity out of range".to_owned()))?;
        Ok(*slot)
    }

    async fn set_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let key = (user_id, item_id, size.to_owned());
        if quantity == 0 {
            tables.cart.remove(&key);
        } else {
            tables.cart.insert(key, quantity);
        }
        Ok(())
    }

    async fn place_confirmed_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        self.check_order_writes()?;

        let user_id = order.user_id;
        let created = tables.insert_order(order, CheckoutState::Confirmed)?;
        tables.clear_cart(user_id);
        Ok(created)
    }

    async fn insert_provisional_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        self.check_order_writes()?;
        tables.insert_order(order, CheckoutState::Provisional)
    }

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.user_id == user_id && o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn attach_provider_session(
        &self,
        id: OrderId,
        reference: &str,
        payload: &serde_json::Value,
    ) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        self.check_order_writes()?;

        if tables
            .orders
            .values()
            .any(|o| o.id != id && o.provider_reference.as_deref() == Some(reference))
        {
            return Err(RepositoryError::Conflict(
                "provider reference already used".to_owned(),
            ));
        }

        let order = tables.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        order.provider_reference = Some(reference.to_owned());
        order.provider_payload = Some(payload.clone());
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn confirm_payment(&self, id: OrderId) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        self.check_order_writes()?;

        let order = tables.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if !order.is_provisional() {
            return Ok(order.clone());
        }

        order.payment = true;
        order.checkout_state = CheckoutState::Confirmed;
        order.updated_at = Utc::now();
        let confirmed = order.clone();
        tables.clear_cart(confirmed.user_id);
        Ok(confirmed)
    }

    async fn delete_provisional_order(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        if self.confirm_before_delete.load(Ordering::SeqCst)
            && let Some(order) = tables.orders.get_mut(&id).filter(|o| o.is_provisional())
        {
            order.payment = true;
            order.checkout_state = CheckoutState::Confirmed;
            let user_id = order.user_id;
            tables.clear_cart(user_id);
            return Ok(false);
        }
        if tables.orders.get(&id).is_some_and(Order::is_provisional) {
            tables.orders.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(Tables::newest_first(tables.orders.values()))
    }

    async fn list_user_orders(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(Tables::newest_first(
            tables.orders.values().filter(|o| o.user_id == user_id),
        ))
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        self.check_order_writes()?;

        match tables.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stale_provisional_orders(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.is_provisional() && o.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|o| (o.created_at, o.id));
        Ok(stale)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use careveli_core::{Amount, PaymentMethod, ShippingAddress};

    use super::*;
    use crate::models::order::OrderLine;

    fn address() -> ShippingAddress {
        ShippingAddress {
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            email: "asha@example.com".into(),
            street: "12 MG Road".into(),
            city: "Pune".into(),
            state: "MH".into(),
            zipcode: "411001".into(),
            country: "India".into(),
            phone: "9999999999".into(),
        }
    }

    fn new_order(user_id: UserId, key: Option<&str>) -> NewOrder {
        NewOrder {
            user_id,
            items: vec![OrderLine {
                item_id: ProductId::new(1),
                name: "Kurta".into(),
                size: "M".into(),
                quantity: 1,
                unit_price: Amount::from_units(90),
            }],
            amount: Amount::from_units(100),
            address: address(),
            payment_method: PaymentMethod::Stripe,
            checkout_state: CheckoutState::Provisional,
            idempotency_key: key.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn test_confirmed_order_clears_cart_atomically() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        store
            .increment_cart_entry(user, ProductId::new(1), "M")
            .await
            .unwrap();

        store.fail_order_writes(true);
        assert!(store.place_confirmed_order(new_order(user, None)).await.is_err());
        assert_eq!(store.cart_entries(user).await.unwrap().len(), 1);

        store.fail_order_writes(false);
        store.place_confirmed_order(new_order(user, None)).await.unwrap();
        assert!(store.cart_entries(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique_per_user() {
        let store = MemoryStore::new();
        store
            .insert_provisional_order(new_order(UserId::new(1), Some("k1")))
            .await
            .unwrap();

        let dup = store
            .insert_provisional_order(new_order(UserId::new(1), Some("k1")))
            .await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));

        // Another user may reuse the same key
        store
            .insert_provisional_order(new_order(UserId::new(2), Some("k1")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let store = MemoryStore::new();
        let order = store
            .place_confirmed_order(new_order(UserId::new(1), None))
            .await
            .unwrap();

        assert!(
            store
                .update_order_status(order.id, OrderStatus::OrderPlaced, OrderStatus::Packing)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_order_status(order.id, OrderStatus::OrderPlaced, OrderStatus::Packing)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_stale_lists_only_old_provisional_orders() {
        let store = MemoryStore::new();
        let old = store
            .insert_provisional_order(new_order(UserId::new(1), None))
            .await
            .unwrap();
        let fresh = store
            .insert_provisional_order(new_order(UserId::new(1), None))
            .await
            .unwrap();
        let confirmed = store
            .place_confirmed_order(new_order(UserId::new(1), None))
            .await
            .unwrap();

        let long_ago = Utc::now() - chrono::Duration::hours(3);
        store.backdate_order(old.id, long_ago).await;
        store.backdate_order(confirmed.id, long_ago).await;

        let stale = store
            .stale_provisional_orders(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        let ids: Vec<_> = stale.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![old.id]);
        assert!(!ids.contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_confirmation_racing_a_delete_wins() {
        let store = MemoryStore::new();
        let order = store
            .insert_provisional_order(new_order(UserId::new(1), None))
            .await
            .unwrap();

        store.confirm_before_delete(true);
        assert!(!store.delete_provisional_order(order.id).await.unwrap());

        let stored = store.order_by_id(order.id).await.unwrap().unwrap();
        assert!(stored.payment);
        assert!(!stored.is_provisional());
    }
}
