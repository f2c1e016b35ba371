//! Hub connection builder

use hubload_core::Protocol;
use std::time::Duration;
use tracing::Level;

use crate::HubConnection;

/// Builder for [`HubConnection`]
pub struct HubConnectionBuilder {
    url: String,
    protocol: Protocol,
    headers: Vec<(String, String)>,
    handshake_timeout: Duration,
    log_level: Option<Level>,
}

impl HubConnectionBuilder {
    /// Create a new builder
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            protocol: Protocol::Json,
            headers: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            log_level: None,
        }
    }

    /// Select the encoding negotiated with the hub
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Add a header to the upgrade request
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Bound on connect plus negotiation
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// `DEBUG` or `TRACE` enables per-frame logging for this connection
    pub fn log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Build a connection in the disconnected state
    pub fn build(self) -> HubConnection {
        HubConnection::new(
            self.url,
            self.protocol,
            self.headers,
            self.handshake_timeout,
            self.log_level.map_or(false, |level| level >= Level::DEBUG),
        )
    }
}
