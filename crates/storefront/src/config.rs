//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `BUILDIFY_API_URL` - Base URL of the Buildify API (default: <http://localhost:5000>)
//! - `BUILDIFY_API_TIMEOUT_SECS` - HTTP request timeout (default: 10)
//! - `BUILDIFY_SESSION_TTL_SECS` - Idle lifetime of the guest session store (default: 1800)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//!
//! ## Customer credentials (CLI only)
//! - `BUILDIFY_CUSTOMER_ID` - Account ID of the signed-in customer
//! - `BUILDIFY_CUSTOMER_TOKEN` - Bearer token issued by OTP login

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use buildify_core::UserId;

use crate::auth::AuthenticatedUser;

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Buildify API configuration
    pub api: ApiConfig,
    /// How long an idle guest session keeps its cart
    pub session_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Buildify REST API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, without a trailing slash on the path
    pub base_url: Url,
    /// Per-request timeout
    pub timeout: Duration,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = parse_base_url(
            "BUILDIFY_API_URL",
            &get_env_or_default("BUILDIFY_API_URL", DEFAULT_API_URL),
        )?;
        let timeout = get_secs_or_default("BUILDIFY_API_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let session_ttl =
            get_secs_or_default("BUILDIFY_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;

        Ok(Self {
            api: ApiConfig { base_url, timeout },
            session_ttl,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl ApiConfig {
    /// Build a config for the given base URL with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL does not parse.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url("base_url", base_url)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Join an API path such as `/api/customer/cart` onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        )
    }
}

/// Load the signed-in customer from `BUILDIFY_CUSTOMER_ID` and
/// `BUILDIFY_CUSTOMER_TOKEN`.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if either variable is unset.
pub fn customer_from_env() -> Result<AuthenticatedUser, ConfigError> {
    let _ = dotenvy::dotenv();

    let id = get_required_env("BUILDIFY_CUSTOMER_ID")?;
    let token = get_required_secret("BUILDIFY_CUSTOMER_TOKEN")?;
    Ok(AuthenticatedUser::new(UserId::new(id), token))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a duration in whole seconds, rejecting zero.
fn get_secs_or_default(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let raw = get_env_or_default(key, &default.to_string());
    parse_secs(key, &raw)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}
