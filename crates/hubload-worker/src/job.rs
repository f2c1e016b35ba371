//! Job configuration and results

use hubload_core::Protocol;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use url::Url;

use crate::error::{Result, WorkerError};
use crate::LOG_LEVEL_PROPERTY;

/// How each connection talks to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Message-oriented hub connection
    #[default]
    WebSockets,
    /// Raw duplex socket; negotiation and framing are done by the worker
    Sockets,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::WebSockets => "websockets",
            TransportKind::Sockets => "sockets",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportKind {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websockets" => Ok(TransportKind::WebSockets),
            "sockets" => Ok(TransportKind::Sockets),
            other => Err(WorkerError::Configuration(format!(
                "unknown transport '{}' (expected websockets or sockets)",
                other
            ))),
        }
    }
}

/// Parse a protocol selector, reporting unknown names as configuration errors
pub fn parse_protocol(s: &str) -> Result<Protocol> {
    s.parse()
        .map_err(|e: hubload_core::Error| WorkerError::Configuration(e.to_string()))
}

/// Longest accepted run; the echo request asks for one second more
pub const MAX_DURATION_SECS: u64 = u32::MAX as u64;

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_cool_down_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

/// One load test. Read-only once handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(default = "new_job_id")]
    pub id: String,
    pub connections: usize,
    /// Test duration in seconds
    pub duration: u64,
    pub server_url: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub protocol: Protocol,
    /// Extra headers sent with every upgrade request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub client_properties: BTreeMap<String, String>,
    /// Informational, shown in the job log text
    #[serde(default = "default_method")]
    pub method: String,
    /// Pause after closing the connections before the run completes
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,
    /// Bound on connect plus protocol negotiation, per connection
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl JobDescriptor {
    pub fn new(server_url: impl Into<String>, connections: usize, duration: u64) -> Self {
        Self {
            id: new_job_id(),
            connections,
            duration,
            server_url: server_url.into(),
            transport: TransportKind::default(),
            protocol: Protocol::default(),
            headers: BTreeMap::new(),
            client_properties: BTreeMap::new(),
            method: default_method(),
            cool_down_ms: default_cool_down_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_client_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.client_properties.insert(name.into(), value.into());
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down_ms = cool_down.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Reject jobs that cannot run, before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(WorkerError::Configuration(
                "there must be more than 0 connections".to_string(),
            ));
        }
        if self.duration == 0 {
            return Err(WorkerError::Configuration(
                "duration must be at least one second".to_string(),
            ));
        }
        if self.duration > MAX_DURATION_SECS {
            return Err(WorkerError::Configuration(format!(
                "duration must not exceed {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(WorkerError::Configuration(
                "handshake timeout must be positive".to_string(),
            ));
        }
        if let Some(level) = self.client_properties.get(LOG_LEVEL_PROPERTY) {
            level.parse::<Level>().map_err(|_| {
                WorkerError::Configuration(format!("invalid {}: {}", LOG_LEVEL_PROPERTY, level))
            })?;
        }
        self.websocket_url()?;
        Ok(())
    }

    /// Target URI with `http(s)` mapped onto `ws(s)`
    pub fn websocket_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.server_url).map_err(|e| {
            WorkerError::Configuration(format!("invalid server url '{}': {}", self.server_url, e))
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(WorkerError::Configuration(format!(
                    "unsupported url scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            WorkerError::Configuration(format!("cannot use '{}' over {}", self.server_url, scheme))
        })?;

        Ok(url.to_string())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Frame logging level requested through the client properties
    pub fn log_level(&self) -> Option<Level> {
        self.client_properties
            .get(LOG_LEVEL_PROPERTY)
            .and_then(|level| level.parse().ok())
    }

    /// One-line summary logged when a worker is created
    pub fn log_text(&self) -> String {
        let headers = serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string());
        format!(
            "[ID:{} Connections:{} Duration:{} Method:{} ServerUrl:{} Headers:{} TransportType:{}]",
            self.id,
            self.connections,
            self.duration,
            self.method,
            self.server_url,
            headers,
            self.transport
        )
    }
}

/// Append-only free text shared by a run and its receive loops
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    text: Arc<Mutex<String>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one note as its own line
    pub fn append(&self, note: impl AsRef<str>) {
        let mut text = self.text.lock();
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(note.as_ref());
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.lock().contains(needle)
    }
}

/// Latency figures in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    /// Mean of the per-connection averages
    pub average: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Outcome of a completed run, written once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub requests_per_second: f64,
    pub total_requests: usize,
    /// Stopwatch time from start to the stop trigger
    pub elapsed_seconds: f64,
    pub latency: LatencyReport,
    /// Received echoes per connection index
    pub connection_requests: Vec<usize>,
    pub min_connection_requests: usize,
    pub max_connection_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 10, 30);
        assert_eq!(job.transport, TransportKind::WebSockets);
        assert_eq!(job.protocol, Protocol::Json);
        assert_eq!(job.method, "GET");
        assert_eq!(job.cool_down(), Duration::from_secs(5));
        assert_eq!(job.handshake_timeout(), Duration::from_secs(10));
        assert!(uuid::Uuid::parse_str(&job.id).is_ok());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 0, 30);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 1, 0);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_duration() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 1, u64::MAX);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));

        let job = JobDescriptor::new("http://localhost:5000/echo", 1, MAX_DURATION_SECS + 1);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));

        let job = JobDescriptor::new("http://localhost:5000/echo", 1, MAX_DURATION_SECS);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let job = JobDescriptor::new("not a url", 1, 1);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));

        let job = JobDescriptor::new("ftp://localhost/echo", 1, 1);
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 1, 1)
            .with_client_property(LOG_LEVEL_PROPERTY, "loud");
        assert!(matches!(job.validate(), Err(WorkerError::Configuration(_))));

        let job = JobDescriptor::new("http://localhost:5000/echo", 1, 1)
            .with_client_property(LOG_LEVEL_PROPERTY, "debug");
        assert!(job.validate().is_ok());
        assert_eq!(job.log_level(), Some(Level::DEBUG));
    }

    #[test]
    fn test_websocket_url_mapping() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 1, 1);
        assert_eq!(job.websocket_url().unwrap(), "ws://localhost:5000/echo");

        let job = JobDescriptor::new("https://bench.example.com/hub?x=1", 1, 1);
        assert_eq!(
            job.websocket_url().unwrap(),
            "wss://bench.example.com/hub?x=1"
        );

        let job = JobDescriptor::new("ws://127.0.0.1:9000/echo", 1, 1);
        assert_eq!(job.websocket_url().unwrap(), "ws://127.0.0.1:9000/echo");
    }

    #[test]
    fn test_transport_selector() {
        assert_eq!("websockets".parse::<TransportKind>().unwrap(), TransportKind::WebSockets);
        assert_eq!("Sockets".parse::<TransportKind>().unwrap(), TransportKind::Sockets);
        assert!(matches!(
            "longpolling".parse::<TransportKind>(),
            Err(WorkerError::Configuration(_))
        ));
    }

    #[test]
    fn test_protocol_selector() {
        assert_eq!(parse_protocol("json").unwrap(), Protocol::Json);
        assert_eq!(parse_protocol("messagepack").unwrap(), Protocol::MessagePack);
        assert!(matches!(
            parse_protocol("protobuf"),
            Err(WorkerError::Configuration(_))
        ));
    }

    #[test]
    fn test_log_text() {
        let mut job = JobDescriptor::new("http://localhost:5000/echo", 4, 2)
            .with_header("x-run", "7")
            .with_transport(TransportKind::Sockets);
        job.id = "job-1".to_string();

        assert_eq!(
            job.log_text(),
            "[ID:job-1 Connections:4 Duration:2 Method:GET ServerUrl:http://localhost:5000/echo \
             Headers:{\"x-run\":\"7\"} TransportType:sockets]"
        );
    }

    #[test]
    fn test_job_from_json_with_defaults() {
        let job: JobDescriptor = serde_json::from_str(
            r#"{"connections":2,"duration":5,"server_url":"http://h/echo","protocol":"binary"}"#,
        )
        .unwrap();
        assert_eq!(job.protocol, Protocol::MessagePack);
        assert_eq!(job.transport, TransportKind::WebSockets);
        assert_eq!(job.cool_down_ms, 5000);
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_job_rejects_unknown_selector() {
        let result: std::result::Result<JobDescriptor, _> = serde_json::from_str(
            r#"{"connections":2,"duration":5,"server_url":"http://h/echo","transport":"longpolling"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_error_log_appends_lines() {
        let log = ErrorLog::new();
        assert!(log.is_empty());

        let shared = log.clone();
        log.append("first");
        shared.append("second");

        assert_eq!(log.text(), "first\nsecond");
        assert!(log.contains("second"));
    }
}
