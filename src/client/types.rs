// ABOUTME: Supporting types for inference client operations: configuration and zoo listings
// ABOUTME: Provides duration-based timeout configuration with sensible production defaults

use crate::params::ModelParams;
use std::time::Duration;

/// Client configuration shared by both transports.
///
/// Two timeout budgets govern every blocking operation: the connection
/// timeout bounds connects and control round-trips, the inference timeout
/// bounds stream replies and queue-full waits.
///
/// # Example
///
/// ```rust
/// use inferstream::ClientConfig;
/// use std::time::Duration;
///
/// // Defaults: 10 s connection timeout, 180 s inference timeout.
/// let config = ClientConfig::default();
///
/// // Custom budgets with an access token passed through opaquely.
/// let config = ClientConfig::new()
///     .with_connection_timeout(Duration::from_secs(5))
///     .with_inference_timeout(Duration::from_secs(30))
///     .with_token("secret");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Budget for connects and control-channel round-trips.
    pub connection_timeout: Duration,
    /// Budget for stream replies and queue-full waits.
    pub inference_timeout: Duration,
    /// Opaque access token forwarded to the server; the client attaches it
    /// but never interprets it.
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            inference_timeout: Duration::from_secs(180),
            token: None,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect/control round-trip budget.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the stream reply / queue wait budget.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    /// Attach an opaque access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// One entry of the server's model zoo listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Model name, as used in `open_stream`.
    pub name: String,
    /// The model's extended parameter document.
    pub extended_params: ModelParams,
}
