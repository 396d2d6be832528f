//! Careveli API library.
//!
//! This crate provides the commerce backend as a library, so the binary, the
//! CLI and the integration tests all build the same router.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::{
    Router,
    http::{HeaderName, Method},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::db::CommerceStore;
use crate::middleware::auth::TOKEN_HEADER;
use crate::routes::orders::IDEMPOTENCY_KEY_HEADER;
use crate::services::payments::PaymentGateway;
use crate::state::AppState;

/// Build the full application router for `state`.
///
/// Sentry layers are added by the binary so tests stay free of a hub.
pub fn app<S: CommerceStore, G: PaymentGateway>(state: AppState<S, G>) -> Router {
    routes::routes()
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .layer(cors_layer())
        .with_state(state)
}

/// The storefront and admin panel are separate origins that send tokens in
/// headers, never cookies.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(TOKEN_HEADER),
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
        ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AuthConfig, CheckoutConfig, PaymentsConfig};
    use crate::db::MemoryStore;
    use crate::middleware::request_id::REQUEST_ID_HEADER;
    use crate::services::payments::HttpPaymentGateway;

    fn router() -> Router {
        let auth = AuthConfig {
            jwt_secret: SecretString::from("lib-test-secret-0123456789abcdefghij"),
            token_ttl: Duration::from_secs(60),
        };
        let payments =
            HttpPaymentGateway::new(&PaymentsConfig::default(), Duration::from_secs(1)).unwrap();
        app(AppState::new(
            MemoryStore::new(),
            payments,
            &auth,
            CheckoutConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let response = router()
            .oneshot(
                Request::get("/health")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = router()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
