//! Order placement, payment verification and fulfilment.
//!
//! # Checkout states
//!
//! ```text
//! COD:       (insert + clear cart) ───────────────────────────> Confirmed
//! Provider:  insert ──> Provisional ──(provider says paid)────> Confirmed (+ clear cart)
//!                           │
//!                           └──(cancelled / unpaid / expired)─> deleted
//! ```
//!
//! A provisional order whose provider call fails is deleted before the error
//! reaches the client, so failed checkouts leave nothing behind.
//!
//! Reconciliation asks the provider about every stale provisional order
//! before touching it: paid orders are confirmed, orders the provider still
//! considers payable are kept, and only unpaid ones are deleted.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use careveli_core::{
    Amount, AmountError, CheckoutState, OrderId, OrderStatus, PaymentMethod, ShippingAddress,
    UserId, cart::normalize_size,
};

use crate::config::CheckoutConfig;
use crate::db::{CommerceStore, RepositoryError};
use crate::error::{AppError, Result};
use crate::models::order::{NewOrder, Order, OrderItemRequest, OrderLine};
use crate::models::product::Product;
use crate::services::cart::MAX_QUANTITY;
use crate::services::payments::{
    Checkout, CheckoutLine, PaymentError, PaymentGateway, PaymentProvider, PaymentState,
};

/// Label of the extra checkout line carrying the delivery fee.
const DELIVERY_LINE: &str = "Delivery Charges";

/// Stripe accepts session expiries between 30 minutes and 24 hours out; the
/// extra minute absorbs clock skew.
const MIN_SESSION_MINUTES: i64 = 31;
const MAX_SESSION_HOURS: i64 = 23;

/// Client request to place an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub items: Vec<OrderItemRequest>,
    /// Total the client expects to pay, delivery included.
    pub amount: Amount,
    pub address: ShippingAddress,
}

/// A provider checkout that the client must now complete.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutStarted {
    pub order_id: OrderId,
    /// Provider payload (`session_url`, or Razorpay `order` + `keyId`).
    pub payload: serde_json::Value,
    /// Whether this is a replay of an earlier request with the same key.
    pub replayed: bool,
}

impl CheckoutStarted {
    /// Response body: the provider payload plus our `orderId`.
    #[must_use]
    pub fn into_data(self) -> serde_json::Value {
        let mut data = match self.payload {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("session".to_owned(), other);
                map
            }
        };
        data.insert("orderId".to_owned(), serde_json::json!(self.order_id));
        serde_json::Value::Object(data)
    }
}

/// Outcome of a payment verification callback.
#[derive(Debug, Clone)]
pub enum Verification {
    /// The order is paid and confirmed.
    Paid(Order),
    /// The payment did not happen and the provisional order was deleted.
    Cancelled,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Paid at the provider and now confirmed.
    pub confirmed: u64,
    /// Unpaid and deleted.
    pub expired: u64,
    /// Still payable, or the provider could not be asked.
    pub kept: u64,
}

/// The order workflow for one request.
pub struct OrderWorkflow<'a, S, G> {
    store: &'a S,
    payments: &'a G,
    config: &'a CheckoutConfig,
}

impl<'a, S: CommerceStore, G: PaymentGateway> OrderWorkflow<'a, S, G> {
    #[must_use]
    pub const fn new(store: &'a S, payments: &'a G, config: &'a CheckoutConfig) -> Self {
        Self {
            store,
            payments,
            config,
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Place a cash-on-delivery order and clear the cart in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for bad items, amount or address,
    /// `AppError::NotFound` for unknown users or products, and store errors.
    /// When the store fails the cart is left untouched.
    #[instrument(skip(self, request))]
    pub async fn place_order(&self, user_id: UserId, request: PlaceOrder) -> Result<Order> {
        let order = self
            .prepare(user_id, request, PaymentMethod::Cod, None)
            .await?;
        let order = self.store.place_confirmed_order(order).await?;

        info!(order_id = %order.id, amount = %order.amount, "COD order placed");
        Ok(order)
    }

    /// Start a Stripe hosted checkout.
    ///
    /// Redirect URLs are built from `origin`, falling back to the configured
    /// frontend URL.
    ///
    /// # Errors
    ///
    /// Same as [`OrderWorkflow::place_order`], plus provider failures.
    #[instrument(skip(self, request))]
    pub async fn place_order_stripe(
        &self,
        user_id: UserId,
        request: PlaceOrder,
        origin: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutStarted> {
        self.start_checkout(
            user_id,
            request,
            PaymentProvider::Stripe,
            origin,
            idempotency_key,
        )
        .await
    }

    /// Start a Razorpay checkout.
    ///
    /// # Errors
    ///
    /// Same as [`OrderWorkflow::place_order`], plus provider failures.
    #[instrument(skip(self, request))]
    pub async fn place_order_razorpay(
        &self,
        user_id: UserId,
        request: PlaceOrder,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutStarted> {
        self.start_checkout(
            user_id,
            request,
            PaymentProvider::Razorpay,
            None,
            idempotency_key,
        )
        .await
    }

    async fn start_checkout(
        &self,
        user_id: UserId,
        request: PlaceOrder,
        provider: PaymentProvider,
        origin: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutStarted> {
        let key = idempotency_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_owned);

        if let Some(key) = &key
            && let Some(existing) = self.store.order_by_idempotency_key(user_id, key).await?
        {
            return replay(&existing, provider);
        }

        let method = payment_method(provider);
        let new_order = self.prepare(user_id, request, method, key.clone()).await?;

        let order = match self.store.insert_provisional_order(new_order).await {
            Ok(order) => order,
            Err(RepositoryError::Conflict(_)) if key.is_some() => {
                // Lost a race with a concurrent request carrying the same key
                let existing = self
                    .store
                    .order_by_idempotency_key(user_id, key.as_deref().unwrap_or_default())
                    .await?
                    .ok_or_else(|| AppError::Conflict("Checkout already in progress".into()))?;
                return replay(&existing, provider);
            }
            Err(e) => return Err(e.into()),
        };

        match self.open_session(&order, provider, origin).await {
            Ok(started) => {
                info!(order_id = %order.id, %provider, "Provider checkout opened");
                Ok(started)
            }
            Err(err) => {
                warn!(order_id = %order.id, %provider, error = %err, "Checkout failed, discarding order");
                if let Err(cleanup) = self.store.delete_provisional_order(order.id).await {
                    tracing::error!(order_id = %order.id, error = %cleanup, "Failed to discard provisional order");
                }
                Err(err)
            }
        }
    }

    async fn open_session(
        &self,
        order: &Order,
        provider: PaymentProvider,
        origin: Option<&str>,
    ) -> Result<CheckoutStarted> {
        let checkout = self.build_checkout(order, origin)?;
        let session = self
            .call_provider(provider, self.payments.open_checkout(provider, &checkout))
            .await?;

        self.store
            .attach_provider_session(order.id, &session.reference, &session.payload)
            .await?;

        Ok(CheckoutStarted {
            order_id: order.id,
            payload: session.payload,
            replayed: false,
        })
    }

    fn build_checkout(&self, order: &Order, origin: Option<&str>) -> Result<Checkout> {
        let minor = |amount: Amount| {
            amount
                .minor_units()
                .map_err(|e| AppError::Validation(e.to_string()))
        };

        let mut lines = order
            .items
            .iter()
            .map(|line| {
                Ok(CheckoutLine {
                    name: line.name.clone(),
                    unit_amount: minor(line.unit_price)?,
                    quantity: line.quantity,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if self.config.delivery_fee > Amount::ZERO {
            lines.push(CheckoutLine {
                name: DELIVERY_LINE.to_owned(),
                unit_amount: minor(self.config.delivery_fee)?,
                quantity: 1,
            });
        }

        let origin = origin
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(&self.config.frontend_url)
            .trim_end_matches('/');

        Ok(Checkout {
            order_id: order.id,
            currency: self.config.currency.clone(),
            lines,
            amount: minor(order.amount)?,
            success_url: format!("{origin}/verify?success=true&orderId={}", order.id),
            cancel_url: format!("{origin}/verify?success=false&orderId={}", order.id),
            idempotency_key: format!("checkout-{}", order.id),
            expires_at: session_expiry(
                order.created_at,
                self.config.provisional_ttl,
                Utc::now(),
            ),
        })
    }

    /// Validate a request against the catalog and snapshot it into an order.
    async fn prepare(
        &self,
        user_id: UserId,
        request: PlaceOrder,
        payment_method: PaymentMethod,
        idempotency_key: Option<String>,
    ) -> Result<NewOrder> {
        match self.store.user_by_id(user_id).await? {
            Some(user) if user.is_usable() => {}
            _ => return Err(AppError::NotFound("User not found".to_string())),
        }

        if request.items.is_empty() {
            return Err(AppError::Validation("Order has no items".to_string()));
        }

        let mut items = Vec::with_capacity(request.items.len());
        for item in request.items {
            if item.quantity < 1 {
                return Err(AppError::Validation(
                    "Quantity must be at least 1".to_string(),
                ));
            }
            let quantity = u32::try_from(item.quantity)
                .ok()
                .filter(|q| *q <= MAX_QUANTITY)
                .ok_or_else(|| AppError::Validation("Quantity is too large".to_string()))?;
            let size = normalize_size(&item.size).map_err(|e| AppError::Validation(e.to_string()))?;

            let product = self
                .store
                .product_by_id(item.item_id)
                .await?
                .filter(Product::is_available)
                .ok_or_else(|| AppError::NotFound(format!("Product {} not found", item.item_id)))?;
            if !product.offers_size(&size) {
                return Err(AppError::Validation(format!(
                    "Size {size} is not available for {}",
                    product.name
                )));
            }

            items.push(OrderLine {
                item_id: product.id,
                name: product.name,
                size,
                quantity,
                unit_price: product.price,
            });
        }

        let total = items
            .iter()
            .try_fold(self.config.delivery_fee, |sum, line| {
                line.total().and_then(|line_total| sum.checked_add(line_total))
            })
            .map_err(|_: AmountError| {
                AppError::Validation("Order total is too large".to_string())
            })?;
        if request.amount != total {
            return Err(AppError::Validation(format!(
                "Order amount {} does not match total {total}",
                request.amount
            )));
        }

        request
            .address
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        Ok(NewOrder {
            user_id,
            items,
            amount: total,
            address: request.address,
            payment_method,
            checkout_state: if payment_method.requires_provider() {
                CheckoutState::Provisional
            } else {
                CheckoutState::Confirmed
            },
            idempotency_key,
        })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Handle the Stripe redirect back to the storefront.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the order is not the caller's,
    /// `AppError::Validation` when the provider reports it unpaid or when
    /// cancelling a paid order, and provider failures.
    #[instrument(skip(self))]
    pub async fn verify_stripe(
        &self,
        user_id: UserId,
        order_id: OrderId,
        success: bool,
    ) -> Result<Verification> {
        let order = self
            .store
            .order_by_id(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

        if order.payment_method != PaymentMethod::Stripe {
            return Err(AppError::Validation(
                "Order was not placed with Stripe".to_string(),
            ));
        }

        if !success {
            let already_paid = || AppError::Validation("Order is already paid".to_string());
            if !order.is_provisional() {
                return Err(already_paid());
            }
            return match self.discard(order.id).await? {
                Verification::Cancelled => {
                    info!("Stripe checkout cancelled, order discarded");
                    Ok(Verification::Cancelled)
                }
                Verification::Paid(_) => Err(already_paid()),
            };
        }

        if !order.is_provisional() {
            return Ok(Verification::Paid(order));
        }

        let reference = order
            .provider_reference
            .as_deref()
            .ok_or_else(|| AppError::Validation("Payment session missing".to_string()))?;
        let state = self
            .call_provider(
                PaymentProvider::Stripe,
                self.payments.payment_state(PaymentProvider::Stripe, reference),
            )
            .await?;

        match state {
            PaymentState::Paid => {
                let order = self.store.confirm_payment(order.id).await?;
                info!("Stripe payment confirmed");
                Ok(Verification::Paid(order))
            }
            PaymentState::Pending | PaymentState::Unpaid => Err(AppError::Validation(
                "Payment not completed".to_string(),
            )),
        }
    }

    /// Handle the Razorpay checkout callback.
    ///
    /// A verified signature means the customer authorized a payment, so the
    /// order is never deleted on that path: if the provider has not settled
    /// it yet, it stays provisional for reconciliation. Without a signature an
    /// unpaid order is discarded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no order of the caller's matches,
    /// `AppError::Payment` for a bad signature, `AppError::Validation` while
    /// the payment is unsettled, and provider failures.
    #[instrument(skip(self, signature))]
    pub async fn verify_razorpay(
        &self,
        user_id: UserId,
        razorpay_order_id: &str,
        payment_id: Option<&str>,
        signature: Option<&str>,
    ) -> Result<Verification> {
        let order = self
            .store
            .order_by_provider_reference(razorpay_order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

        if !order.is_provisional() {
            return Ok(Verification::Paid(order));
        }

        let signed = if let Some(signature) = signature {
            let payment_id = payment_id.ok_or_else(|| {
                AppError::Validation("razorpay_payment_id is required".to_string())
            })?;
            self.payments.verify_signature(
                PaymentProvider::Razorpay,
                razorpay_order_id,
                payment_id,
                signature,
            )?;
            true
        } else {
            false
        };

        let state = self
            .call_provider(
                PaymentProvider::Razorpay,
                self.payments
                    .payment_state(PaymentProvider::Razorpay, razorpay_order_id),
            )
            .await?;

        match state {
            PaymentState::Paid => {
                let order = self.store.confirm_payment(order.id).await?;
                info!(order_id = %order.id, "Razorpay payment confirmed");
                Ok(Verification::Paid(order))
            }
            PaymentState::Unpaid if !signed => {
                let outcome = self.discard(order.id).await?;
                if matches!(outcome, Verification::Cancelled) {
                    info!(order_id = %order.id, "Razorpay payment failed, order discarded");
                }
                Ok(outcome)
            }
            PaymentState::Pending | PaymentState::Unpaid => {
                warn!(order_id = %order.id, ?state, signed, "Razorpay payment not settled, keeping order");
                Err(AppError::Validation("Payment not completed".to_string()))
            }
        }
    }

    /// Delete an abandoned provisional order.
    ///
    /// When a concurrent callback confirmed the order first, the delete finds
    /// nothing and the paid order is returned instead.
    async fn discard(&self, order_id: OrderId) -> Result<Verification> {
        if self.store.delete_provisional_order(order_id).await? {
            return Ok(Verification::Cancelled);
        }
        match self.store.order_by_id(order_id).await? {
            Some(order) if !order.is_provisional() => Ok(Verification::Paid(order)),
            _ => Err(AppError::Conflict(
                "Order was changed by another request".to_string(),
            )),
        }
    }

    // =========================================================================
    // Listing and fulfilment
    // =========================================================================

    /// Every order, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn all_orders(&self) -> Result<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// The caller's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn user_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_user_orders(user_id).await?)
    }

    /// Move a confirmed order to `status`.
    ///
    /// Re-sending the current status is a no-op. Otherwise the order must
    /// advance exactly one stage.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown status, a provisional
    /// order, or an out-of-order move, `AppError::NotFound` for a missing
    /// order, and `AppError::Conflict` if another update won the race.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, status: &str) -> Result<Order> {
        let to: OrderStatus = status
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid status: {status}")))?;

        let order = self
            .store
            .order_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

        if order.is_provisional() {
            return Err(AppError::Validation(
                "Order is awaiting payment".to_string(),
            ));
        }
        if order.status == to {
            return Ok(order);
        }

        order
            .status
            .transition_to(to)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if !self.store.update_order_status(order.id, order.status, to).await? {
            return Err(AppError::Conflict(
                "Order status was changed by another request".to_string(),
            ));
        }

        info!(from = %order.status, %to, "Order status updated");
        self.store
            .order_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
    }

    /// Settle provisional orders created more than `older_than` ago.
    ///
    /// Each order is checked with its provider first. A provider that cannot
    /// be reached leaves the order for the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to list stale orders.
    #[instrument(skip(self))]
    pub async fn expire_provisional_orders(&self, older_than: Duration) -> Result<Reconciliation> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| AppError::Internal(format!("invalid expiry age: {e}")))?;
        let stale = self.store.stale_provisional_orders(Utc::now() - age).await?;

        let mut outcome = Reconciliation::default();
        for order in stale {
            match self.settle_stale(&order).await {
                Ok(Settled::Confirmed) => outcome.confirmed += 1,
                Ok(Settled::Expired) => outcome.expired += 1,
                Ok(Settled::Kept) => outcome.kept += 1,
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Could not reconcile provisional order");
                    outcome.kept += 1;
                }
            }
        }

        if outcome != Reconciliation::default() {
            info!(
                confirmed = outcome.confirmed,
                expired = outcome.expired,
                kept = outcome.kept,
                "Reconciled provisional orders"
            );
        }
        Ok(outcome)
    }

    async fn settle_stale(&self, order: &Order) -> Result<Settled> {
        let provider = match order.payment_method {
            PaymentMethod::Stripe => Some(PaymentProvider::Stripe),
            PaymentMethod::Razorpay => Some(PaymentProvider::Razorpay),
            PaymentMethod::Cod => None,
        };

        // No reference means the provider session was never opened
        if let (Some(provider), Some(reference)) = (provider, order.provider_reference.as_deref()) {
            let state = self
                .call_provider(provider, self.payments.payment_state(provider, reference))
                .await?;
            match state {
                PaymentState::Paid => {
                    self.store.confirm_payment(order.id).await?;
                    info!(order_id = %order.id, %provider, "Late payment confirmed");
                    return Ok(Settled::Confirmed);
                }
                PaymentState::Pending => return Ok(Settled::Kept),
                PaymentState::Unpaid => {}
            }
        }

        Ok(match self.discard(order.id).await {
            Ok(Verification::Cancelled) => Settled::Expired,
            Ok(Verification::Paid(_)) => Settled::Confirmed,
            Err(AppError::Conflict(_)) => Settled::Kept,
            Err(e) => return Err(e),
        })
    }

    /// Run a provider call under the configured timeout.
    async fn call_provider<T>(
        &self,
        provider: PaymentProvider,
        call: impl Future<Output = std::result::Result<T, PaymentError>>,
    ) -> std::result::Result<T, PaymentError> {
        tokio::time::timeout(self.config.provider_timeout, call)
            .await
            .unwrap_or(Err(PaymentError::Timeout(provider)))
    }
}

enum Settled {
    Confirmed,
    Expired,
    Kept,
}

/// Periodically reconcile provisional orders older than the configured TTL
/// until the runtime shuts down.
pub fn spawn_reconciliation<S: CommerceStore, G: PaymentGateway>(
    store: S,
    payments: G,
    config: CheckoutConfig,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let workflow = OrderWorkflow::new(&store, &payments, &config);
        loop {
            ticker.tick().await;
            if let Err(e) = workflow
                .expire_provisional_orders(config.provisional_ttl)
                .await
            {
                tracing::error!(error = %e, "Provisional order reconciliation failed");
            }
        }
    })
}

/// When a hosted checkout for an order created at `created_at` should stop
/// accepting payment, kept inside the window Stripe allows.
fn session_expiry(
    created_at: DateTime<Utc>,
    ttl: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let earliest = now + chrono::Duration::minutes(MIN_SESSION_MINUTES);
    let latest = now + chrono::Duration::hours(MAX_SESSION_HOURS);
    chrono::Duration::from_std(ttl)
        .map_or(latest, |ttl| created_at + ttl)
        .clamp(earliest, latest)
}

const fn payment_method(provider: PaymentProvider) -> PaymentMethod {
    match provider {
        PaymentProvider::Stripe => PaymentMethod::Stripe,
        PaymentProvider::Razorpay => PaymentMethod::Razorpay,
    }
}

/// Answer a repeated checkout request from the stored order.
fn replay(existing: &Order, provider: PaymentProvider) -> Result<CheckoutStarted> {
    if existing.payment_method != payment_method(provider) {
        return Err(AppError::Conflict(
            "Idempotency key already used for another checkout".to_string(),
        ));
    }
    let payload = existing
        .provider_payload
        .clone()
        .ok_or_else(|| AppError::Conflict("Checkout already in progress".to_string()))?;

    info!(order_id = %existing.id, "Replaying checkout for repeated idempotency key");
    Ok(CheckoutStarted {
        order_id: existing.id,
        payload,
        replayed: true,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use careveli_core::{Email, ProductId, Role};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::product::NewProduct;
    use crate::models::user::NewUser;
    use crate::services::payments::ProviderSession;

    /// Gateway that answers from fixed values and counts sessions opened.
    #[derive(Default)]
    struct StubGateway {
        paid: bool,
        pending: bool,
        fail_lookups: bool,
        fail: bool,
        hang: bool,
        opened: Arc<AtomicUsize>,
    }

    impl PaymentGateway for StubGateway {
        async fn open_checkout(
            &self,
            provider: PaymentProvider,
            checkout: &Checkout,
        ) -> std::result::Result<ProviderSession, PaymentError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(PaymentError::Api {
                    provider,
                    status: 400,
                    message: "rejected".into(),
                });
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderSession {
                reference: format!("ref_{}_{n}", checkout.order_id),
                payload: serde_json::json!({ "session_url": format!("https://pay.test/{n}") }),
            })
        }

        async fn payment_state(
            &self,
            provider: PaymentProvider,
            _reference: &str,
        ) -> std::result::Result<PaymentState, PaymentError> {
            if self.fail_lookups {
                return Err(PaymentError::Api {
                    provider,
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(if self.paid {
                PaymentState::Paid
            } else if self.pending {
                PaymentState::Pending
            } else {
                PaymentState::Unpaid
            })
        }

        fn verify_signature(
            &self,
            _provider: PaymentProvider,
            _reference: &str,
            _payment_id: &str,
            signature: &str,
        ) -> std::result::Result<(), PaymentError> {
            if signature == "good" {
                Ok(())
            } else {
                Err(PaymentError::InvalidSignature)
            }
        }
    }

    fn config() -> CheckoutConfig {
        CheckoutConfig {
            provider_timeout: Duration::from_millis(200),
            ..CheckoutConfig::default()
        }
    }

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

    async fn seed(store: &MemoryStore) -> (UserId, ProductId) {
        let user = store
            .create_user(NewUser {
                name: "Asha".into(),
                email: Email::parse("asha@example.com").unwrap(),
                password_hash: "unused".into(),
                role: Role::User,
            })
            .await
            .unwrap();
        let product = store
            .insert_product(NewProduct {
                name: "Linen Shirt".into(),
                description: "Breathable".into(),
                price: Amount::from_units(98),
                category: "Men".into(),
                sub_category: "Topwear".into(),
                images: vec![],
                sizes: vec!["M".into()],
                bestseller: false,
            })
            .await
            .unwrap();
        (user.id, product.id)
    }

    fn request(item: ProductId, quantity: i64, amount: u32) -> PlaceOrder {
        PlaceOrder {
            items: vec![OrderItemRequest {
                item_id: item,
                size: "M".into(),
                quantity,
            }],
            amount: Amount::from_units(amount),
            address: address(),
        }
    }

    #[tokio::test]
    async fn test_cod_order_snapshots_catalog() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let order = workflow.place_order(user, request(item, 5, 500)).await.unwrap();
        assert_eq!(order.items[0].name, "Linen Shirt");
        assert_eq!(order.items[0].unit_price, Amount::from_units(98));
        assert_eq!(order.amount, Amount::from_units(500));
        assert_eq!(order.payment_method, PaymentMethod::Cod);
        assert_eq!(order.checkout_state, CheckoutState::Confirmed);
        assert!(!order.payment);
    }

    #[tokio::test]
    async fn test_preparation_rejections() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let wrong_amount = workflow.place_order(user, request(item, 5, 499)).await;
        assert!(matches!(wrong_amount, Err(AppError::Validation(_))));

        let zero_quantity = workflow.place_order(user, request(item, 0, 10)).await;
        assert!(matches!(zero_quantity, Err(AppError::Validation(_))));

        let mut empty = request(item, 1, 108);
        empty.items.clear();
        assert!(matches!(
            workflow.place_order(user, empty).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_address = request(item, 1, 108);
        bad_address.address.zipcode = String::new();
        assert!(matches!(
            workflow.place_order(user, bad_address).await,
            Err(AppError::Validation(m)) if m.contains("zipcode")
        ));

        let unknown = workflow
            .place_order(user, request(ProductId::new(404), 1, 108))
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));

        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_provider_call_discards_order() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway {
            fail: true,
            ..StubGateway::default()
        };
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let result = workflow
            .place_order_stripe(user, request(item, 1, 108), None, None)
            .await;
        assert!(matches!(result, Err(AppError::Payment(PaymentError::Api { .. }))));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_hung_provider_times_out() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway {
            hang: true,
            ..StubGateway::default()
        };
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let result = workflow
            .place_order_razorpay(user, request(item, 1, 108), None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::Payment(PaymentError::Timeout(PaymentProvider::Razorpay)))
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_idempotent_checkout_reuses_session() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let first = workflow
            .place_order_stripe(user, request(item, 1, 108), None, Some("key-1"))
            .await
            .unwrap();
        let second = workflow
            .place_order_stripe(user, request(item, 1, 108), None, Some("key-1"))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.payload, second.payload);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 1);
        assert_eq!(store.order_count().await, 1);

        let other_provider = workflow
            .place_order_razorpay(user, request(item, 1, 108), Some("key-1"))
            .await;
        assert!(matches!(other_provider, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_checkout_urls_and_delivery_line() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let started = workflow
            .place_order_stripe(user, request(item, 1, 108), Some("https://shop.test/"), None)
            .await
            .unwrap();
        let order = store.order_by_id(started.order_id).await.unwrap().unwrap();
        let checkout = workflow
            .build_checkout(&order, Some("https://shop.test/"))
            .unwrap();

        assert_eq!(
            checkout.success_url,
            format!("https://shop.test/verify?success=true&orderId={}", order.id)
        );
        assert_eq!(checkout.lines.last().unwrap().name, DELIVERY_LINE);
        assert_eq!(checkout.lines.last().unwrap().unit_amount, 1_000);
        assert_eq!(checkout.amount, 10_800);
        assert_eq!(checkout.idempotency_key, format!("checkout-{}", order.id));
        let open_for = checkout.expires_at - Utc::now();
        assert!(open_for > chrono::Duration::minutes(58));
        assert!(open_for <= chrono::Duration::minutes(60));

        let data = started.into_data();
        assert_eq!(data["orderId"], order.id.as_i32());
        assert!(data["session_url"].is_string());
    }

    #[tokio::test]
    async fn test_status_moves_one_stage_at_a_time() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);
        let order = workflow.place_order(user, request(item, 1, 108)).await.unwrap();

        let skipped = workflow.update_status(order.id, "Shipped").await;
        assert!(matches!(skipped, Err(AppError::Validation(_))));

        let packed = workflow.update_status(order.id, "Packing").await.unwrap();
        assert_eq!(packed.status, OrderStatus::Packing);

        let again = workflow.update_status(order.id, "packing").await.unwrap();
        assert_eq!(again.status, OrderStatus::Packing);

        let backwards = workflow.update_status(order.id, "Order Placed").await;
        assert!(matches!(backwards, Err(AppError::Validation(_))));

        let unknown = workflow.update_status(order.id, "Lost").await;
        assert!(matches!(unknown, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_provisional_order_status_is_locked() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let started = workflow
            .place_order_stripe(user, request(item, 1, 108), None, None)
            .await
            .unwrap();
        assert!(matches!(
            workflow.update_status(started.order_id, "Packing").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_razorpay_signature_and_outcomes() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let paid = StubGateway {
            paid: true,
            ..StubGateway::default()
        };
        let config = config();
        let workflow = OrderWorkflow::new(&store, &paid, &config);

        let started = workflow
            .place_order_razorpay(user, request(item, 1, 108), None)
            .await
            .unwrap();
        let reference = store
            .order_by_id(started.order_id)
            .await
            .unwrap()
            .unwrap()
            .provider_reference
            .unwrap();

        let forged = workflow
            .verify_razorpay(user, &reference, Some("pay_1"), Some("bad"))
            .await;
        assert!(matches!(
            forged,
            Err(AppError::Payment(PaymentError::InvalidSignature))
        ));

        let stranger = workflow
            .verify_razorpay(UserId::new(999), &reference, None, None)
            .await;
        assert!(matches!(stranger, Err(AppError::NotFound(_))));

        let verified = workflow
            .verify_razorpay(user, &reference, Some("pay_1"), Some("good"))
            .await
            .unwrap();
        assert!(matches!(verified, Verification::Paid(ref o) if o.payment));

        // Unpaid provider order is discarded
        let unpaid = StubGateway::default();
        let workflow = OrderWorkflow::new(&store, &unpaid, &config);
        let started = workflow
            .place_order_razorpay(user, request(item, 1, 108), None)
            .await
            .unwrap();
        let reference = store
            .order_by_id(started.order_id)
            .await
            .unwrap()
            .unwrap()
            .provider_reference
            .unwrap();
        let outcome = workflow
            .verify_razorpay(user, &reference, None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, Verification::Cancelled));
        assert!(store.order_by_id(started.order_id).await.unwrap().is_none());
    }

    async fn provisional(
        store: &MemoryStore,
        gateway: &StubGateway,
        user: UserId,
        item: ProductId,
        provider: PaymentProvider,
    ) -> Order {
        let config = config();
        let workflow = OrderWorkflow::new(store, gateway, &config);
        let started = match provider {
            PaymentProvider::Stripe => workflow
                .place_order_stripe(user, request(item, 1, 108), None, None)
                .await
                .unwrap(),
            PaymentProvider::Razorpay => workflow
                .place_order_razorpay(user, request(item, 1, 108), None)
                .await
                .unwrap(),
        };
        store.order_by_id(started.order_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_order_total_beyond_storage_is_rejected() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store).await;
        let pricey = store
            .insert_product(NewProduct {
                name: "Heirloom Saree".into(),
                description: "One of a kind".into(),
                price: Amount::MAX,
                category: "Women".into(),
                sub_category: "Topwear".into(),
                images: vec![],
                sizes: vec!["M".into()],
                bestseller: false,
            })
            .await
            .unwrap();
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let result = workflow.place_order(user, request(pricey.id, 2, 1)).await;
        assert!(matches!(result, Err(AppError::Validation(m)) if m == "Order total is too large"));

        let too_many = workflow
            .place_order(user, request(pricey.id, i64::from(MAX_QUANTITY) + 1, 1))
            .await;
        assert!(matches!(too_many, Err(AppError::Validation(m)) if m == "Quantity is too large"));
        assert_eq!(store.order_count().await, 0);
    }

    #[test]
    fn test_session_expiry_stays_in_provider_window() {
        let now = Utc::now();
        let hour = Duration::from_secs(3600);

        assert_eq!(session_expiry(now, hour, now), now + chrono::Duration::hours(1));
        // Too soon for Stripe: pushed out to the minimum
        assert_eq!(
            session_expiry(now - chrono::Duration::minutes(50), hour, now),
            now + chrono::Duration::minutes(MIN_SESSION_MINUTES)
        );
        assert_eq!(
            session_expiry(now, Duration::from_secs(48 * 3600), now),
            now + chrono::Duration::hours(MAX_SESSION_HOURS)
        );
    }

    #[tokio::test]
    async fn test_reconcile_confirms_paid_stale_order() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let unpaid = StubGateway::default();
        let order = provisional(&store, &unpaid, user, item, PaymentProvider::Stripe).await;
        store.increment_cart_entry(user, item, "M").await.unwrap();

        // Paid at the provider after the customer left the checkout page
        let paid = StubGateway {
            paid: true,
            ..StubGateway::default()
        };
        let config = config();
        let workflow = OrderWorkflow::new(&store, &paid, &config);

        let outcome = workflow
            .expire_provisional_orders(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Reconciliation {
                confirmed: 1,
                ..Reconciliation::default()
            }
        );

        let stored = store.order_by_id(order.id).await.unwrap().unwrap();
        assert!(stored.payment);
        assert_eq!(stored.checkout_state, CheckoutState::Confirmed);
        assert!(store.cart_entries(user).await.unwrap().is_empty());

        let verified = workflow.verify_stripe(user, order.id, true).await.unwrap();
        assert!(matches!(verified, Verification::Paid(ref o) if o.id == order.id));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_payable_and_unreachable_orders() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let opener = StubGateway::default();
        let order = provisional(&store, &opener, user, item, PaymentProvider::Razorpay).await;
        let config = config();

        for gateway in [
            StubGateway {
                pending: true,
                ..StubGateway::default()
            },
            StubGateway {
                fail_lookups: true,
                ..StubGateway::default()
            },
        ] {
            let outcome = OrderWorkflow::new(&store, &gateway, &config)
                .expire_provisional_orders(Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(
                outcome,
                Reconciliation {
                    kept: 1,
                    ..Reconciliation::default()
                }
            );
            assert!(store.order_by_id(order.id).await.unwrap().is_some());
        }

        let outcome = OrderWorkflow::new(&store, &opener, &config)
            .expire_provisional_orders(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome.expired, 1);
        assert!(store.order_by_id(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_razorpay_callback_never_discards() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let config = config();

        for gateway in [
            StubGateway {
                pending: true,
                ..StubGateway::default()
            },
            StubGateway::default(),
        ] {
            let order = provisional(&store, &gateway, user, item, PaymentProvider::Razorpay).await;
            let reference = order.provider_reference.clone().unwrap();

            let result = OrderWorkflow::new(&store, &gateway, &config)
                .verify_razorpay(user, &reference, Some("pay_1"), Some("good"))
                .await;
            assert!(
                matches!(result, Err(AppError::Validation(ref m)) if m == "Payment not completed")
            );
            assert!(store.order_by_id(order.id).await.unwrap().unwrap().is_provisional());
        }
    }

    #[tokio::test]
    async fn test_cancel_racing_a_confirmation() {
        let store = MemoryStore::new();
        let (user, item) = seed(&store).await;
        let gateway = StubGateway::default();
        let config = config();
        let workflow = OrderWorkflow::new(&store, &gateway, &config);

        let stripe = provisional(&store, &gateway, user, item, PaymentProvider::Stripe).await;
        let razorpay = provisional(&store, &gateway, user, item, PaymentProvider::Razorpay).await;
        store.confirm_before_delete(true);

        let cancelled = workflow.verify_stripe(user, stripe.id, false).await;
        assert!(matches!(cancelled, Err(AppError::Validation(m)) if m == "Order is already paid"));
        assert!(store.order_by_id(stripe.id).await.unwrap().unwrap().payment);

        let reference = razorpay.provider_reference.unwrap();
        let outcome = workflow
            .verify_razorpay(user, &reference, None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, Verification::Paid(ref o) if o.id == razorpay.id));
    }
}
