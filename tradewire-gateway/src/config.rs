//! Gateway configuration types.
//!
//! This module provides configuration for the gateway core including:
//! - WebSocket endpoint path
//! - JWT verification settings
//! - Per-connection queue sizes and collaborator timeouts

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GatewayError;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path of the WebSocket endpoint
    #[serde(default = "default_path")]
    pub path: String,

    /// JWT configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// WebSocket configuration
    #[serde(default)]
    pub websocket: WsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            jwt: JwtConfig::default(),
            websocket: WsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.jwt.secret.is_empty() {
            return Err(GatewayError::Config("jwt.secret cannot be empty".to_string()));
        }
        self.websocket.validate()
    }
}

/// JWT verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared HMAC secret
    #[serde(default = "default_jwt_secret")]
    pub secret: String,

    /// Lifetime of issued tokens in seconds
    #[serde(default = "default_token_expiration")]
    pub expiration_secs: u64,

    /// Required issuer claim, if any
    #[serde(default)]
    pub issuer: Option<String>,

    /// Required audience claim, if any
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            expiration_secs: default_token_expiration(),
            issuer: None,
            audience: None,
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum number of queued outbound events per connection
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// How long a send may wait on a full queue before the connection is dropped
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Upper bound on a credential verification call
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_ms: u64,

    /// Upper bound on a snapshot fetch
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_ms: u64,

    /// Send `auth_success` and `initial_state` after query-parameter authentication too
    #[serde(default)]
    pub sync_on_query_auth: bool,

    /// Payload of the `welcome` event
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_message_size: default_max_message_size(),
            send_timeout_ms: default_send_timeout(),
            verify_timeout_ms: default_verify_timeout(),
            snapshot_timeout_ms: default_snapshot_timeout(),
            sync_on_query_auth: false,
            welcome_message: default_welcome_message(),
        }
    }
}

impl WsConfig {
    /// Returns the send timeout as a Duration.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Returns the verification timeout as a Duration.
    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Returns the snapshot timeout as a Duration.
    #[must_use]
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.max_queue_size == 0 {
            return Err(GatewayError::Config(
                "websocket.max_queue_size must be greater than 0".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 || self.verify_timeout_ms == 0 || self.snapshot_timeout_ms == 0
        {
            return Err(GatewayError::Config(
                "websocket timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_jwt_secret() -> String {
    // Override with TRADEWIRE_JWT_SECRET or JWT_SECRET outside development
    "tradingplatformsecret".to_string()
}

fn default_token_expiration() -> u64 {
    12 * 60 * 60
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_send_timeout() -> u64 {
    5000
}

fn default_verify_timeout() -> u64 {
    3000
}

fn default_snapshot_timeout() -> u64 {
    5000
}

fn default_welcome_message() -> String {
    "Connected to Trading Platform WebSocket".to_string()
}
