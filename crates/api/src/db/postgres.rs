//! `PostgreSQL` implementation of [`CommerceStore`].
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate compiles
//! without a live database.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use careveli_core::{
    Amount, CartEntry, CheckoutState, Email, OrderId, OrderStatus, PaymentMethod, ProductId, Role,
    ShippingAddress, UserId,
};

use super::{CommerceStore, RepositoryError};
use crate::models::order::{NewOrder, Order, OrderLine};
use crate::models::product::{NewProduct, Product};
use crate::models::user::{NewUser, User};

// =============================================================================
// Internal Row Types
// =============================================================================

const USER_COLUMNS: &str = "id, name, email, role, is_active, is_deleted, is_email_verified, \
                            created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    name: String,
    email: String,
    role: Role,
    is_active: bool,
    is_deleted: bool,
    is_email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: UserId::new(row.id),
            name: row.name,
            email,
            role: row.role,
            is_active: row.is_active,
            is_deleted: row.is_deleted,
            is_email_verified: row.is_email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

const PRODUCT_COLUMNS: &str = "id, name, description, price, category, sub_category, images, \
                               sizes, bestseller, is_active, is_deleted, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    name: String,
    description: String,
    price: Amount,
    category: String,
    sub_category: String,
    images: Vec<String>,
    sizes: Vec<String>,
    bestseller: bool,
    is_active: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            price: row.price,
            category: row.category,
            sub_category: row.sub_category,
            images: row.images,
            sizes: row.sizes,
            bestseller: row.bestseller,
            is_active: row.is_active,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    product_id: i32,
    size: String,
    quantity: i32,
}

impl TryFrom<CartRow> for CartEntry {
    type Error = RepositoryError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("negative cart quantity {}", row.quantity))
        })?;
        Ok(Self {
            item_id: ProductId::new(row.product_id),
            size: row.size,
            quantity,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, items, amount, address, payment_method, payment, \
                             status, checkout_state, provider_reference, provider_payload, \
                             idempotency_key, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    items: Json<Vec<OrderLine>>,
    amount: Amount,
    address: Json<ShippingAddress>,
    payment_method: PaymentMethod,
    payment: bool,
    status: OrderStatus,
    checkout_state: CheckoutState,
    provider_reference: Option<String>,
    provider_payload: Option<serde_json::Value>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            items: row.items.0,
            amount: row.amount,
            address: row.address.0,
            payment_method: row.payment_method,
            payment: row.payment,
            status: row.status,
            checkout_state: row.checkout_state,
            provider_reference: row.provider_reference,
            provider_payload: row.provider_payload,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Production store backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_order<'e, E>(
        executor: E,
        order: &NewOrder,
        state: CheckoutState,
    ) -> Result<Order, RepositoryError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            "INSERT INTO orders (user_id, items, amount, address, payment_method, payment, \
                                 status, checkout_state, idempotency_key) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8) \
             RETURNING {ORDER_COLUMNS}"
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(order.user_id)
            .bind(Json(&order.items))
            .bind(order.amount)
            .bind(Json(&order.address))
            .bind(order.payment_method)
            .bind(OrderStatus::default())
            .bind(state)
            .bind(order.idempotency_key.as_deref())
            .fetch_one(executor)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "idempotency key already used"))?;
        Ok(row.into())
    }
}

impl CommerceStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[tracing::instrument(skip(self, user), fields(email = %user.email))]
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let row: UserRow = sqlx::query_as(&sql)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "email already exists"))?;
        row.try_into()
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1");
        let row: Option<CredentialRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some((r.user.try_into()?, r.password_hash))),
            None => Ok(None),
        }
    }

    async fn set_user_role(&self, email: &Email, role: Role) -> Result<User, RepositoryError> {
        let sql = format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE email = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(email)
            .bind(role)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(RepositoryError::NotFound)?.try_into()
    }

    // =========================================================================
    // Products
    // =========================================================================

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let sql = format!(
            "INSERT INTO products (name, description, price, category, sub_category, images, \
                                   sizes, bestseller) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row: ProductRow = sqlx::query_as(&sql)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(&product.category)
            .bind(&product.sub_category)
            .bind(&product.images)
            .bind(&product.sizes)
            .bind(product.bestseller)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn product_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active AND NOT is_deleted \
             ORDER BY created_at DESC, id DESC"
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn soft_delete_product(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE products SET is_deleted = TRUE, updated_at = NOW() \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Cart
    // =========================================================================

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>, RepositoryError> {
        let rows: Vec<CartRow> = sqlx::query_as(
            "SELECT product_id, size, quantity FROM cart_items \
             WHERE user_id = $1 ORDER BY product_id, size",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn increment_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
    ) -> Result<u32, RepositoryError> {
        let quantity: i32 = sqlx::query_scalar(
            "INSERT INTO cart_items (user_id, product_id, size, quantity) \
             VALUES ($1, $2, $3, 1) \
             ON CONFLICT (user_id, product_id, size) \
             DO UPDATE SET quantity = cart_items.quantity + 1, updated_at = NOW() \
             RETURNING quantity",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(size)
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("negative cart quantity {quantity}"))
        })
    }

    async fn set_cart_entry(
        &self,
        user_id: UserId,
        item_id: ProductId,
        size: &str,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        if quantity == 0 {
            sqlx::query(
                "DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2 AND size = $3",
            )
            .bind(user_id)
            .bind(item_id)
            .bind(size)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let quantity = i32::try_from(quantity)
            .map_err(|_| RepositoryError::Conflict("quantity out of range".to_owned()))?;
        sqlx::query(
            "INSERT INTO cart_items (user_id, product_id, size, quantity) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, product_id, size) \
             DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(size)
        .bind(quantity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Orders
    // =========================================================================

    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id))]
    async fn place_confirmed_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let created = Self::insert_order(&mut *tx, &order, CheckoutState::Confirmed).await?;
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(order.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn insert_provisional_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        Self::insert_order(&self.pool, &order, CheckoutState::Provisional).await
    }

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn order_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE provider_reference = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND idempotency_key = $2"
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn attach_provider_session(
        &self,
        id: OrderId,
        reference: &str,
        payload: &serde_json::Value,
    ) -> Result<Order, RepositoryError> {
        let sql = format!(
            "UPDATE orders SET provider_reference = $2, provider_payload = $3, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(reference)
            .bind(payload)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "provider reference already used"))?;
        Ok(row.ok_or(RepositoryError::NotFound)?.into())
    }

    #[tracing::instrument(skip(self))]
    async fn confirm_payment(&self, id: OrderId) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let update = format!(
            "UPDATE orders SET payment = TRUE, checkout_state = $2, updated_at = NOW() \
             WHERE id = $1 AND checkout_state = $3 \
             RETURNING {ORDER_COLUMNS}"
        );
        let confirmed: Option<OrderRow> = sqlx::query_as(&update)
            .bind(id)
            .bind(CheckoutState::Confirmed)
            .bind(CheckoutState::Provisional)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = confirmed else {
            // Either missing or already confirmed by an earlier callback
            let select = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
            let existing: Option<OrderRow> = sqlx::query_as(&select)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(existing.ok_or(RepositoryError::NotFound)?.into());
        };

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(row.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn delete_provisional_order(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND checkout_state = $2")
            .bind(id)
            .bind(CheckoutState::Provisional)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC");
        let rows: Vec<OrderRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_user_orders(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn stale_provisional_orders(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE checkout_state = $1 AND created_at < $2 \
             ORDER BY created_at, id"
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(CheckoutState::Provisional)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
