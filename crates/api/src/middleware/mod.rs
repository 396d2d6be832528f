//! HTTP middleware stack for the API.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. CORS (the storefront and admin panel live on other origins)
//!
//! Authentication is per-route through the [`RequireUser`] and
//! [`RequireAdmin`] extractors.

pub mod auth;
pub mod request_id;

pub use auth::{Principal, RequireAdmin, RequireUser};
pub use request_id::request_id_middleware;
