//! Client configuration.
//!
//! Configuration for the richgate client, including:
//! - Credentials (token and client id)
//! - Gateway endpoint and identify properties
//! - Reconnect backoff
//! - Logging verbosity

use std::path::Path;
use std::time::Duration;

use richgate_proto::commands::DEFAULT_INTENTS;
use richgate_proto::{Credentials, IdentifyProperties};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GatewayError;
use crate::gateway::ReconnectConfig;

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=9&encoding=json";

/// Reconnect backoff settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay.
    pub max_delay_ms: u64,
    /// Growth factor per attempt; 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Consecutive failed attempts before giving up (none = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Main client configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Secret token used to identify.
    pub token: String,
    /// Application id attached to activities.
    pub client_id: Option<String>,
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// Gateway intents bitfield.
    pub intents: u64,
    /// Identify properties.
    pub properties: IdentifyProperties,
    /// Informational logging.
    pub logs: bool,
    /// Per-opcode protocol event logging.
    pub handle_logs: bool,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            client_id: None,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
            properties: IdentifyProperties::default(),
            logs: true,
            handle_logs: false,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"[redacted]")
            .field("client_id", &self.client_id)
            .field("gateway_url", &self.gateway_url)
            .field("intents", &self.intents)
            .field("logs", &self.logs)
            .field("handle_logs", &self.handle_logs)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl GatewayConfig {
    /// Create a configuration with a token and defaults for everything else.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// The token may be supplied later (for example from the environment), so
    /// it is checked by [`GatewayConfig::credentials`] rather than here.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, GatewayError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let url = Url::parse(&self.gateway_url)
            .map_err(|e| GatewayError::Config(format!("invalid gateway_url: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(GatewayError::Config(
                "gateway_url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err(GatewayError::Config(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(GatewayError::Config(
                "reconnect.max_delay_ms must not be below reconnect.initial_delay_ms".to_string(),
            ));
        }

        let multiplier = self.reconnect.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(GatewayError::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build identify credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured.
    pub fn credentials(&self) -> Result<Credentials, GatewayError> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::Config("token is required".to_string()));
        }

        Ok(Credentials::new(self.token.trim())
            .with_properties(self.properties.clone())
            .with_intents(self.intents))
    }

    /// Reconnect backoff as used by the session.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }
}
