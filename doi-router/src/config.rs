use crate::validator::DEFAULT_MAX_BATCH_SIZE;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the contact email sent with every lookup.
pub const EMAIL_ENV: &str = "UNPAYWALL_EMAIL";

/// Environment variable holding the provider admin key.
pub const ADMIN_KEY_ENV: &str = "UNPAYWALL_ADMIN_KEY";

const DEFAULT_PROVIDER_URL: &str = "https://api.unpaywall.org/v2/";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Max batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Timeouts must be at least 1ms")]
    InvalidTimeout,

    #[error("HTTP timeout ({http_timeout_ms}ms) exceeds the batch deadline ({batch_deadline_ms}ms)")]
    HttpTimeoutExceedsDeadline {
        http_timeout_ms: u64,
        batch_deadline_ms: u64,
    },

    #[error("Provider URL cannot be a base for identifier paths: {0}")]
    InvalidProviderUrl(String),

    #[error("No contact email: set provider.email or UNPAYWALL_EMAIL")]
    MissingContactEmail,
}

/// doi-router configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for batch requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Metadata provider the lookups are sent to
    pub provider: ProviderConfig,
    /// Batch size, concurrency and timeouts
    #[serde(default)]
    pub lookup: LookupConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.provider.validate()?;
        self.lookup.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL; the identifier is appended as path segments.
    #[serde(default = "default_provider_url")]
    pub url: Url,
    /// Contact email. The `UNPAYWALL_EMAIL` environment variable takes precedence.
    #[serde(default)]
    pub email: Option<String>,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.cannot_be_a_base() {
            return Err(ValidationError::InvalidProviderUrl(self.url.to_string()));
        }
        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: default_provider_url(),
            email: None,
        }
    }
}

fn default_provider_url() -> Url {
    Url::parse(DEFAULT_PROVIDER_URL).expect("default provider URL is valid")
}

/// Limits applied to every batch.
///
/// The defaults fit a 30 second platform limit: 1000 identifiers over 100
/// slots is 10 waves of 2.5s, and the batch deadline stops at 25s regardless.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupConfig {
    pub max_batch_size: usize,
    pub concurrency: usize,
    pub http_timeout_ms: u64,
    pub batch_deadline_ms: u64,
}

impl LookupConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if self.max_batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.http_timeout_ms == 0 || self.batch_deadline_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.http_timeout_ms > self.batch_deadline_ms {
            return Err(ValidationError::HttpTimeoutExceedsDeadline {
                http_timeout_ms: self.http_timeout_ms,
                batch_deadline_ms: self.batch_deadline_ms,
            });
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_deadline_ms)
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            concurrency: 100,
            http_timeout_ms: 2_500,
            batch_deadline_ms: 25_000,
        }
    }
}

/// Query credentials attached to every provider call.
///
/// Resolved once at start-up and handed to the client; the admin key is never
/// printed.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    email: String,
    admin_key: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, admin_key: Option<String>) -> Self {
        Self {
            email: email.into(),
            admin_key,
        }
    }

    /// Reads `UNPAYWALL_EMAIL` and `UNPAYWALL_ADMIN_KEY` from the process
    /// environment, falling back to the configured email.
    pub fn from_env(provider: &ProviderConfig) -> Result<Self, ValidationError> {
        Self::resolve(provider, |name| std::env::var(name).ok())
    }

    pub fn resolve<F>(provider: &ProviderConfig, env: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |value: String| {
            let value = value.trim().to_string();
            (!value.is_empty()).then_some(value)
        };

        let email = env(EMAIL_ENV)
            .and_then(non_blank)
            .or_else(|| provider.email.clone().and_then(non_blank))
            .ok_or(ValidationError::MissingContactEmail)?;

        let admin_key = env(ADMIN_KEY_ENV).and_then(non_blank);
        if admin_key.is_none() {
            tracing::warn!("{ADMIN_KEY_ENV} is not set, provider calls are unauthenticated");
        }

        Ok(Self { email, admin_key })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn admin_key(&self) -> Option<&str> {
        self.admin_key.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 8000
admin_listener:
    host: "127.0.0.1"
    port: 8001
provider:
    url: "http://127.0.0.1:9000/v2/"
    email: "team@example.org"
lookup:
    concurrency: 50
    batch_deadline_ms: 20000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.provider.email.as_deref(), Some("team@example.org"));
        assert_eq!(config.lookup.concurrency, 50);
        // Unset fields fall back to defaults
        assert_eq!(config.lookup.max_batch_size, 1000);
        assert_eq!(config.lookup.http_timeout(), Duration::from_millis(2500));
        assert_eq!(config.lookup.batch_deadline(), Duration::from_secs(20));
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
listener: {host: "0.0.0.0", port: 8000}
admin_listener: {host: "127.0.0.1", port: 8001}
provider: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.url.as_str(), DEFAULT_PROVIDER_URL);
        assert_eq!(config.lookup, LookupConfig::default());

        // Ten waves of per-call timeouts fit inside the batch deadline.
        let lookup = LookupConfig::default();
        let waves = lookup.max_batch_size.div_ceil(lookup.concurrency) as u64;
        assert!(waves * lookup.http_timeout_ms <= lookup.batch_deadline_ms);
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config {
            listener: Listener {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            admin_listener: Listener {
                host: "127.0.0.1".to_string(),
                port: 8001,
            },
            provider: ProviderConfig::default(),
            lookup: LookupConfig::default(),
        };
        assert!(base_config.validate().is_ok());

        let mut config = base_config.clone();
        config.admin_listener.port = 0;
        assert_eq!(config.validate().unwrap_err(), ValidationError::InvalidPort);

        let mut config = base_config.clone();
        config.lookup.concurrency = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::InvalidConcurrency
        );

        let mut config = base_config.clone();
        config.lookup.max_batch_size = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::InvalidBatchSize
        );

        let mut config = base_config.clone();
        config.lookup.http_timeout_ms = 0;
        assert_eq!(config.validate().unwrap_err(), ValidationError::InvalidTimeout);

        let mut config = base_config.clone();
        config.lookup.http_timeout_ms = 30_000;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::HttpTimeoutExceedsDeadline { .. }
        ));

        let mut config = base_config;
        config.provider.url = Url::parse("mailto:team@example.org").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidProviderUrl(_)
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(serde_yaml::from_str::<ProviderConfig>(r#"url: "not-a-url""#).is_err());

        // Invalid port type
        assert!(
            serde_yaml::from_str::<Listener>(r#"{host: "0.0.0.0", port: "not_a_number"}"#)
                .is_err()
        );

        // Missing required field
        assert!(serde_yaml::from_str::<Config>(r#"listener: {host: "0.0.0.0"}"#).is_err());
    }

    #[test]
    fn test_credentials_resolution() {
        let env: HashMap<&str, &str> =
            HashMap::from([(EMAIL_ENV, "env@example.org"), (ADMIN_KEY_ENV, "s3cret")]);
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let provider = ProviderConfig {
            email: Some("file@example.org".to_string()),
            ..ProviderConfig::default()
        };

        // Environment wins over the config file
        let creds = Credentials::resolve(&provider, lookup).unwrap();
        assert_eq!(creds.email(), "env@example.org");
        assert_eq!(creds.admin_key(), Some("s3cret"));

        // Missing admin key degrades to unauthenticated calls
        let creds = Credentials::resolve(&provider, |_| None).unwrap();
        assert_eq!(creds.email(), "file@example.org");
        assert_eq!(creds.admin_key(), None);

        // No email anywhere is an error
        assert_eq!(
            Credentials::resolve(&ProviderConfig::default(), |_| None).unwrap_err(),
            ValidationError::MissingContactEmail
        );
    }

    #[test]
    fn test_credentials_debug_hides_admin_key() {
        let creds = Credentials::new("team@example.org", Some("s3cret".to_string()));
        let printed = format!("{creds:?}");
        assert!(printed.contains("team@example.org"));
        assert!(!printed.contains("s3cret"));
    }
}
