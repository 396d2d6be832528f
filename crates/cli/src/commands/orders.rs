//! Order maintenance commands.

use std::time::Duration;

use careveli_api::config::{CheckoutConfig, ConfigError, PaymentsConfig};
use careveli_api::db::PgStore;
use careveli_api::error::AppError;
use careveli_api::services::orders::{OrderWorkflow, Reconciliation};
use careveli_api::services::payments::HttpPaymentGateway;
use thiserror::Error;

use super::{ConnectError, connect};

/// Errors that can occur during order maintenance.
#[derive(Debug, Error)]
pub enum OrdersError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Payment client error: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("{0}")]
    Reconcile(#[from] AppError),
}

/// Settle provisional orders older than `older_than_minutes` with their
/// providers: confirm the paid ones and delete the abandoned ones.
pub async fn reconcile(older_than_minutes: u64) -> Result<Reconciliation, OrdersError> {
    let store = PgStore::new(connect().await?);

    let checkout = CheckoutConfig {
        provisional_ttl: Duration::from_secs(older_than_minutes.saturating_mul(60)),
        ..CheckoutConfig::default()
    };
    let gateway = HttpPaymentGateway::new(&PaymentsConfig::from_env()?, checkout.provider_timeout)?;

    let outcome = OrderWorkflow::new(&store, &gateway, &checkout)
        .expire_provisional_orders(checkout.provisional_ttl)
        .await?;

    tracing::info!(
        "Reconciled provisional orders older than {} minutes: {} confirmed, {} deleted, {} kept",
        older_than_minutes,
        outcome.confirmed,
        outcome.expired,
        outcome.kept
    );
    Ok(outcome)
}
