//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CAREVELI_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `CAREVELI_JWT_SECRET` - Token signing secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `CAREVELI_HOST` - Bind address (default: 127.0.0.1)
//! - `CAREVELI_PORT` - Listen port (default: 3000)
//! - `CAREVELI_FRONTEND_URL` - Storefront origin used for checkout redirects
//!   when the request carries no `Origin` header (default: <http://localhost:5173>)
//! - `CAREVELI_TOKEN_TTL_HOURS` - Bearer token lifetime (default: 168)
//! - `CAREVELI_CURRENCY` - ISO 4217 currency for provider checkouts (default: inr)
//! - `CAREVELI_DELIVERY_FEE` - Flat delivery fee added to every order (default: 10)
//! - `CAREVELI_PROVIDER_TIMEOUT_SECS` - Timeout for each payment provider call (default: 15)
//! - `CAREVELI_PROVISIONAL_TTL_MINUTES` - Age after which unpaid provisional orders are
//!   reconciled, and how long hosted checkouts stay open (default: 60, min 30)
//! - `CAREVELI_RECONCILE_INTERVAL_SECS` - How often the reconciliation task runs (default: 300, min 1)
//! - `STRIPE_SECRET_KEY` - Enables Stripe checkout (`sk_...` or `rk_...`)
//! - `RAZORPAY_KEY_ID` / `RAZORPAY_KEY_SECRET` - Enable Razorpay checkout (`rzp_...` key id)
//!
//! Provider keys are issued by the provider, so they are only checked for
//! shape. The signing secret is ours and must also pass the placeholder and
//! entropy checks.
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use careveli_core::Amount;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Stripe refuses checkout sessions that expire sooner than this.
const MIN_PROVISIONAL_TTL_MINUTES: u64 = 30;

const STRIPE_KEY_PREFIXES: &[&str] = &["sk_", "rk_"];
const RAZORPAY_KEY_ID_PREFIXES: &[&str] = &["rzp_"];

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// API application configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Token signing configuration
    pub auth: AuthConfig,
    /// Checkout and order workflow settings
    pub checkout: CheckoutConfig,
    /// Payment provider credentials
    pub payments: PaymentsConfig,
    /// How often stale provisional orders are reconciled
    pub reconcile_interval: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry transaction sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Bearer token settings.
///
/// Implements `Debug` manually to redact the signing secret.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign tokens
    pub jwt_secret: SecretString,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

/// Settings used by the order workflow.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Lower-case ISO 4217 currency code sent to providers
    pub currency: String,
    /// Flat fee added on top of the item subtotal
    pub delivery_fee: Amount,
    /// Upper bound on each payment provider call
    pub provider_timeout: Duration,
    /// Provisional orders older than this are deleted by reconciliation
    pub provisional_ttl: Duration,
    /// Origin used for checkout redirect URLs when the request has none
    pub frontend_url: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "inr".to_string(),
            delivery_fee: Amount::from_units(10),
            provider_timeout: Duration::from_secs(15),
            provisional_ttl: Duration::from_secs(60 * 60),
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

/// Payment provider credentials. A provider without credentials is disabled.
#[derive(Debug, Clone, Default)]
pub struct PaymentsConfig {
    pub stripe: Option<StripeConfig>,
    pub razorpay: Option<RazorpayConfig>,
}

/// Stripe API credentials.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    pub secret_key: SecretString,
    /// API base URL
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Razorpay API credentials.
#[derive(Clone)]
pub struct RazorpayConfig {
    /// Public key id (`rzp_...`), also handed to the checkout widget
    pub key_id: String,
    /// Key secret, used for basic auth and callback signatures
    pub key_secret: SecretString,
    /// API base URL
    pub api_base: String,
}

impl std::fmt::Debug for RazorpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CAREVELI_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("CAREVELI_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("CAREVELI_PORT", "3000")?;

        let jwt_secret = get_validated_secret("CAREVELI_JWT_SECRET")?;
        validate_secret_length(&jwt_secret, "CAREVELI_JWT_SECRET")?;
        let ttl_hours = parse_env_or_default::<u64>("CAREVELI_TOKEN_TTL_HOURS", "168")?;

        let checkout = CheckoutConfig::from_env()?;
        let payments = PaymentsConfig::from_env()?;
        let reconcile_interval = reconcile_interval(parse_env_or_default::<u64>(
            "CAREVELI_RECONCILE_INTERVAL_SECS",
            "300",
        )?)?;

        Ok(Self {
            database_url,
            host,
            port,
            auth: AuthConfig {
                jwt_secret,
                token_ttl: Duration::from_secs(ttl_hours * 60 * 60),
            },
            checkout,
            payments,
            reconcile_interval,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or_default::<f32>("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env_or_default::<f32>(
                "SENTRY_TRACES_SAMPLE_RATE",
                "0.1",
            )?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let currency = get_env_or_default("CAREVELI_CURRENCY", "inr").to_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidEnvVar(
                "CAREVELI_CURRENCY".to_string(),
                "expected a three-letter ISO 4217 code".to_string(),
            ));
        }

        let fee = parse_env_or_default::<Decimal>("CAREVELI_DELIVERY_FEE", "10")?;
        let delivery_fee = Amount::new(fee).map_err(|e| {
            ConfigError::InvalidEnvVar("CAREVELI_DELIVERY_FEE".to_string(), e.to_string())
        })?;

        let frontend_url = get_env_or_default("CAREVELI_FRONTEND_URL", "http://localhost:5173");
        url::Url::parse(&frontend_url).map_err(|e| {
            ConfigError::InvalidEnvVar("CAREVELI_FRONTEND_URL".to_string(), e.to_string())
        })?;

        Ok(Self {
            currency,
            delivery_fee,
            provider_timeout: Duration::from_secs(parse_env_or_default::<u64>(
                "CAREVELI_PROVIDER_TIMEOUT_SECS",
                "15",
            )?),
            provisional_ttl: provisional_ttl(parse_env_or_default::<u64>(
                "CAREVELI_PROVISIONAL_TTL_MINUTES",
                "60",
            )?)?,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PaymentsConfig {
    /// Load provider credentials from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a key is malformed or only half of the
    /// Razorpay credentials are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let stripe = match get_optional_env("STRIPE_SECRET_KEY") {
            Some(key) => {
                validate_provider_key(&key, "STRIPE_SECRET_KEY", STRIPE_KEY_PREFIXES)?;
                Some(StripeConfig {
                    secret_key: SecretString::from(key),
                    api_base: get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com"),
                })
            }
            None => None,
        };

        let razorpay = match (
            get_optional_env("RAZORPAY_KEY_ID"),
            get_optional_env("RAZORPAY_KEY_SECRET"),
        ) {
            (Some(key_id), Some(key_secret)) => {
                validate_provider_key(&key_id, "RAZORPAY_KEY_ID", RAZORPAY_KEY_ID_PREFIXES)?;
                validate_provider_key(&key_secret, "RAZORPAY_KEY_SECRET", &[])?;
                Some(RazorpayConfig {
                    key_id,
                    key_secret: SecretString::from(key_secret),
                    api_base: get_env_or_default("RAZORPAY_API_BASE", "https://api.razorpay.com"),
                })
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("RAZORPAY_KEY_SECRET".to_string()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar("RAZORPAY_KEY_ID".to_string()));
            }
        };

        Ok(Self { stripe, razorpay })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating blank values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to a default literal.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Provisional order lifetime from a minute count.
fn provisional_ttl(minutes: u64) -> Result<Duration, ConfigError> {
    if minutes < MIN_PROVISIONAL_TTL_MINUTES {
        return Err(ConfigError::InvalidEnvVar(
            "CAREVELI_PROVISIONAL_TTL_MINUTES".to_string(),
            format!("must be at least {MIN_PROVISIONAL_TTL_MINUTES}"),
        ));
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "CAREVELI_PROVISIONAL_TTL_MINUTES".to_string(),
                "too large".to_string(),
            )
        })
}

/// Reconciliation period from a second count.
fn reconcile_interval(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            "CAREVELI_RECONCILE_INTERVAL_SECS".to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Check a provider-issued key for shape only.
///
/// An empty `prefixes` accepts any non-blank key without whitespace.
fn validate_provider_key(
    key: &str,
    var_name: &str,
    prefixes: &[&str],
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar(var_name.to_string(), reason);

    if key.trim().is_empty() {
        return Err(invalid("must not be blank".to_string()));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace".to_string()));
    }
    if !prefixes.is_empty() && !prefixes.iter().any(|p| key.starts_with(p)) {
        return Err(invalid(format!("expected a key starting with {}", prefixes.join(" or "))));
    }
    Ok(())
}

/// Validate that a signing secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_JWT_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_JWT_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
