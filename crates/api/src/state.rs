//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{AuthConfig, CheckoutConfig};
use crate::db::CommerceStore;
use crate::services::auth::TokenSigner;
use crate::services::orders::OrderWorkflow;
use crate::services::payments::PaymentGateway;

/// Application state shared across all handlers.
///
/// Generic over the store and the payment gateway so the same router runs
/// against Postgres and real providers in production, and against in-memory
/// fakes in tests. Cloning is cheap.
pub struct AppState<S, G> {
    inner: Arc<AppStateInner<S, G>>,
}

struct AppStateInner<S, G> {
    store: S,
    payments: G,
    tokens: TokenSigner,
    checkout: CheckoutConfig,
}

// Manual impl: `S` and `G` themselves need not be `Clone`.
impl<S, G> Clone for AppState<S, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CommerceStore, G: PaymentGateway> AppState<S, G> {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence backend
    /// * `payments` - Payment provider gateway
    /// * `auth` - Token signing settings
    /// * `checkout` - Checkout and order workflow settings
    #[must_use]
    pub fn new(store: S, payments: G, auth: &AuthConfig, checkout: CheckoutConfig) -> Self {
        let tokens = TokenSigner::new(auth.jwt_secret.clone(), auth.token_ttl);
        Self {
            inner: Arc::new(AppStateInner {
                store,
                payments,
                tokens,
                checkout,
            }),
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Get a reference to the payment gateway.
    #[must_use]
    pub fn payments(&self) -> &G {
        &self.inner.payments
    }

    /// Get a reference to the token signer.
    #[must_use]
    pub fn tokens(&self) -> &TokenSigner {
        &self.inner.tokens
    }

    /// Get a reference to the checkout settings.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutConfig {
        &self.inner.checkout
    }

    /// The order workflow bound to this state.
    #[must_use]
    pub fn orders(&self) -> OrderWorkflow<'_, S, G> {
        OrderWorkflow::new(self.store(), self.payments(), self.checkout())
    }
}
