//! Configuration management for Mailwire.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MailwireError, Result};
use crate::ratelimit::{CategoryLimits, ClassificationRule, EndpointType};

/// Prefix for environment variable overrides, e.g.
/// `MAILWIRE__RATE_LIMITING__ENABLED=false`.
const ENV_PREFIX: &str = "MAILWIRE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Mailwire client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailwireConfig {
    /// HTTP client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout applied to requests whose context carries no deadline
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Attach an idempotency key to POST requests that lack one
    #[serde(default = "default_idempotency_keys")]
    pub idempotency_keys: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: None,
            idempotency_keys: default_idempotency_keys(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn default_base_url() -> String {
    "https://api.mailwire.dev".to_string()
}

fn default_idempotency_keys() -> bool {
    true
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Global kill switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Limits for general API traffic
    #[serde(default = "default_general")]
    pub general: CategoryLimits,

    /// Limits for statistics queries
    #[serde(default = "default_statistics")]
    pub statistics: CategoryLimits,

    /// Limits for message-send traffic
    #[serde(default = "default_send_message")]
    pub send_message: CategoryLimits,

    /// Classification rules; empty means the built-in rules
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            general: default_general(),
            statistics: default_statistics(),
            send_message: default_send_message(),
            rules: Vec::new(),
        }
    }
}

impl RateLimitingConfig {
    /// Get the configured limits for a category.
    pub fn limits(&self, endpoint: EndpointType) -> &CategoryLimits {
        match endpoint {
            EndpointType::General => &self.general,
            EndpointType::Statistics => &self.statistics,
            EndpointType::SendMessage => &self.send_message,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_general() -> CategoryLimits {
    EndpointType::General.default_config().into()
}

fn default_statistics() -> CategoryLimits {
    EndpointType::Statistics.default_config().into()
}

fn default_send_message() -> CategoryLimits {
    EndpointType::SendMessage.default_config().into()
}

impl MailwireConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: MailwireConfig = serde_yaml::from_str(yaml)
            .map_err(|e| MailwireError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, overridden by
    /// `MAILWIRE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let config: MailwireConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every category's limits.
    pub fn validate(&self) -> Result<()> {
        for endpoint in EndpointType::ALL {
            self.rate_limiting.limits(endpoint).validate()?;
        }
        Ok(())
    }
}
