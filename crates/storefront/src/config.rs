//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront (used for provider return URLs)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_ENVIRONMENT` - `development` or `production` (default: development)
//! - `STOREFRONT_DATABASE_URL` / `DATABASE_URL` - `PostgreSQL` for orders (default: in memory)
//! - `STOREFRONT_CATALOG_PATH` - JSON catalog file (default: built-in gift card catalog)
//! - `STOREFRONT_CURRENCY` - Store currency (default: USD)
//! - `STOREFRONT_ADMIN_EMAIL` - Email allowed to add catalog products once verified
//! - `STOREFRONT_PROVIDER_TIMEOUT_SECS` - Payment provider call timeout (default: 20)
//! - `STOREFRONT_DEFAULT_PROVIDER` - `stripe` or `paypal` (default: stripe)
//! - `STOREFRONT_PENDING_CHECKOUT_TTL_SECS` - How long a created checkout can be captured (default: 86400)
//! - `STOREFRONT_SESSION_IDLE_SECS` - Session idle expiry (default: 7 days)
//! - `STOREFRONT_VERIFICATION_CODE_TTL_SECS` - Verification code lifetime (default: 600)
//! - `STOREFRONT_EXPOSE_VERIFICATION_CODES` - Return codes in responses when no delivery
//!   channel is configured (default: false, refused in production)
//! - `STRIPE_SECRET_KEY`, `STRIPE_API_BASE` - Stripe Checkout
//! - `PAYPAL_CLIENT_ID`, `PAYPAL_CLIENT_SECRET`, `PAYPAL_MODE` - PayPal Orders (`sandbox` or `live`)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM` - Email codes
//! - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`, `TWILIO_API_BASE` - SMS codes
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use cardslawp_core::{CurrencyCode, Email, Phone, ProviderKind};

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Insecure setting {0}: {1}")]
    InsecureSetting(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront, without a trailing slash
    pub base_url: String,
    pub environment: Environment,
    /// `PostgreSQL` connection URL; orders stay in memory without it
    pub database_url: Option<SecretString>,
    /// Catalog JSON file; the built-in catalog is used without it
    pub catalog_path: Option<PathBuf>,
    /// The single currency the store prices and settles in
    pub currency: CurrencyCode,
    /// Verified session email allowed to mutate the catalog
    pub admin_email: Option<Email>,
    /// Session idle expiry
    pub session_idle: Duration,
    pub checkout: CheckoutConfig,
    pub verification: VerificationConfig,
    pub stripe: Option<StripeConfig>,
    pub paypal: Option<PayPalConfig>,
    pub smtp: Option<SmtpConfig>,
    pub twilio: Option<TwilioConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

/// Checkout orchestration settings.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Upper bound on any single payment provider call
    pub provider_timeout: Duration,
    /// Provider used when a checkout request does not name one
    pub default_provider: ProviderKind,
    /// How long a created checkout stays capturable
    pub pending_ttl: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(20),
            default_provider: ProviderKind::Stripe,
            pending_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Verification code settings.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub code_ttl: Duration,
    /// Return codes to the caller when no delivery channel exists.
    /// Development only.
    pub expose_codes: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(10 * 60),
            expose_codes: false,
        }
    }
}

/// Stripe Checkout credentials.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    /// API base URL, overridable for stripe-mock
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

/// PayPal environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayPalMode {
    #[default]
    Sandbox,
    Live,
}

impl PayPalMode {
    #[must_use]
    pub const fn api_base(self) -> &'static str {
        match self {
            Self::Sandbox => "https://api-m.sandbox.paypal.com",
            Self::Live => "https://api-m.paypal.com",
        }
    }
}

/// PayPal REST credentials.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub mode: PayPalMode,
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("mode", &self.mode)
            .finish()
    }
}

/// SMTP settings for emailing verification codes.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from_address: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Twilio settings for texting verification codes.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: Phone,
    pub api_base: String,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, if
    /// secrets fail validation (placeholder detection, entropy check), or if
    /// verification codes would be exposed in production.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = parse_env("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env("STOREFRONT_PORT", "3000")?;
        let base_url = validate_base_url(&get_required_env("STOREFRONT_BASE_URL")?)?;
        let environment = parse_env("STOREFRONT_ENVIRONMENT", "development")?;

        let database_url = get_database_url("STOREFRONT_DATABASE_URL");
        let catalog_path = get_optional_env("STOREFRONT_CATALOG_PATH").map(PathBuf::from);
        let currency = parse_env("STOREFRONT_CURRENCY", "USD")?;
        let admin_email = get_optional_env("STOREFRONT_ADMIN_EMAIL")
            .map(|raw| {
                Email::parse(&raw).map_err(|e| {
                    ConfigError::InvalidEnvVar("STOREFRONT_ADMIN_EMAIL".to_string(), e.to_string())
                })
            })
            .transpose()?;
        let session_idle = Duration::from_secs(parse_env(
            "STOREFRONT_SESSION_IDLE_SECS",
            &(7 * 24 * 60 * 60).to_string(),
        )?);

        let checkout = CheckoutConfig {
            provider_timeout: Duration::from_secs(parse_env("STOREFRONT_PROVIDER_TIMEOUT_SECS", "20")?),
            default_provider: parse_env("STOREFRONT_DEFAULT_PROVIDER", "stripe")?,
            pending_ttl: Duration::from_secs(parse_env(
                "STOREFRONT_PENDING_CHECKOUT_TTL_SECS",
                "86400",
            )?),
        };

        let verification = VerificationConfig {
            code_ttl: Duration::from_secs(parse_env("STOREFRONT_VERIFICATION_CODE_TTL_SECS", "600")?),
            expose_codes: parse_env("STOREFRONT_EXPOSE_VERIFICATION_CODES", "false")?,
        };
        validate_code_exposure(environment, verification.expose_codes)?;

        Ok(Self {
            host,
            port,
            base_url,
            environment,
            database_url,
            catalog_path,
            currency,
            admin_email,
            session_idle,
            checkout,
            verification,
            stripe: StripeConfig::from_env()?,
            paypal: PayPalConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            twilio: TwilioConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT")
                .or_else(|| Some(environment.as_str().to_string())),
            sentry_sample_rate: parse_env("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env("SENTRY_TRACES_SAMPLE_RATE", "0.1")?,
        })
    }

    /// Development defaults with no providers, delivery channels, or database.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            base_url: base_url.trim_end_matches('/').to_string(),
            environment: Environment::Development,
            database_url: None,
            catalog_path: None,
            currency: CurrencyCode::USD,
            admin_email: None,
            session_idle: Duration::from_secs(7 * 24 * 60 * 60),
            checkout: CheckoutConfig::default(),
            verification: VerificationConfig::default(),
            stripe: None,
            paypal: None,
            smtp: None,
            twilio: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether session cookies should carry the `Secure` flag.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        if get_optional_env("STRIPE_SECRET_KEY").is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            api_base: get_env_or_default("STRIPE_API_BASE", STRIPE_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        }))
    }
}

impl PayPalConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(client_id) = get_optional_env("PAYPAL_CLIENT_ID") else {
            return Ok(None);
        };
        let mode = match get_env_or_default("PAYPAL_MODE", "sandbox").as_str() {
            "live" => PayPalMode::Live,
            "sandbox" => PayPalMode::Sandbox,
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "PAYPAL_MODE".to_string(),
                    format!("expected sandbox or live, got {other}"),
                ));
            }
        };
        Ok(Some(Self {
            client_id,
            client_secret: get_validated_secret("PAYPAL_CLIENT_SECRET")?,
            mode,
        }))
    }
}

impl SmtpConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            host,
            port: parse_env("SMTP_PORT", "587")?,
            username: get_optional_env("SMTP_USERNAME"),
            password: get_optional_env("SMTP_PASSWORD").map(SecretString::from),
            from_address: get_required_env("SMTP_FROM")?,
        }))
    }
}

impl TwilioConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(account_sid) = get_optional_env("TWILIO_ACCOUNT_SID") else {
            return Ok(None);
        };
        let from_number = Phone::parse(&get_required_env("TWILIO_FROM_NUMBER")?).map_err(|e| {
            ConfigError::InvalidEnvVar("TWILIO_FROM_NUMBER".to_string(), e.to_string())
        })?;
        Ok(Some(Self {
            account_sid,
            auth_token: get_validated_secret("TWILIO_AUTH_TOKEN")?,
            from_number,
            api_base: get_env_or_default("TWILIO_API_BASE", TWILIO_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    get_optional_env(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    get_optional_env(primary_key)
        .or_else(|| get_optional_env("DATABASE_URL"))
        .map(SecretString::from)
}

/// Require an absolute http(s) URL and strip any trailing slash.
fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            "STOREFRONT_BASE_URL".to_string(),
            format!("unsupported scheme {}", parsed.scheme()),
        ));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Refuse to hand verification codes back to callers in production.
fn validate_code_exposure(environment: Environment, expose_codes: bool) -> Result<(), ConfigError> {
    if expose_codes && environment == Environment::Production {
        return Err(ConfigError::InsecureSetting(
            "STOREFRONT_EXPOSE_VERIFICATION_CODES".to_string(),
            "verification codes cannot be returned to callers in production".to_string(),
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
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the provider."
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
