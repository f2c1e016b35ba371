//! Common test helpers and utilities for hubload tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - An RAII echo target bound to a free port
//! - Assertion helpers for floating point results

use hubload_client::{HubConnection, HubConnectionBuilder, InvocationStream};
use hubload_echo::{EchoConfig, EchoServer};
use hubload_transport::{TransportServer, WebSocketServer};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::timeout;

pub use hubload_core::Protocol;

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// ============================================================================
// Test Echo Server - RAII wrapper with proper cleanup
// ============================================================================

/// An echo target on a free local port, shut down on drop
pub struct TestEchoServer {
    server: EchoServer,
    port: u16,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestEchoServer {
    /// Start an echo target pushing every millisecond
    pub async fn start() -> Self {
        Self::start_with_config(EchoConfig {
            push_interval: Some(Duration::from_millis(1)),
            ..Default::default()
        })
        .await
    }

    /// Start an echo target with custom configuration
    pub async fn start_with_config(config: EchoConfig) -> Self {
        // Bound before spawning, so the port accepts as soon as we return
        let listener = WebSocketServer::bind("127.0.0.1:0")
            .await
            .expect("failed to bind echo server");
        let port = listener.local_addr().expect("no local address").port();

        let server = EchoServer::new(config);
        let serving = server.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(listener).await;
        });

        Self {
            server,
            port,
            handle: Some(handle),
        }
    }

    /// WebSocket URL of the hub
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/echo", self.port)
    }

    /// Same endpoint as an http URL, as job descriptors usually carry it
    pub fn http_url(&self) -> String {
        format!("http://127.0.0.1:{}/echo", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server(&self) -> &EchoServer {
        &self.server
    }

    /// Build and start a hub connection to this server
    pub async fn connect(
        &self,
        protocol: Protocol,
    ) -> Result<HubConnection, hubload_client::ClientError> {
        let hub = HubConnectionBuilder::new(&self.url())
            .with_protocol(protocol)
            .build();
        hub.start().await?;
        Ok(hub)
    }

    /// Wait until the server sees `count` live sessions
    pub async fn wait_for_connections(&self, count: usize, max_wait: Duration) -> bool {
        let server = &self.server;
        wait_for(
            move || async move { server.connection_count() == count },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Stop the server explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.server.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestEchoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Collectors
// ============================================================================

/// Collect up to `n` invocations from a stream, giving up after `max_wait`
pub async fn collect_invocations(
    stream: &mut InvocationStream,
    n: usize,
    max_wait: Duration,
) -> Vec<Vec<Value>> {
    let mut collected = Vec::with_capacity(n);
    let deadline = Instant::now() + max_wait;

    while collected.len() < n {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, stream.next()).await {
            Ok(Some(arguments)) => collected.push(arguments),
            _ => break,
        }
    }
    collected
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that two values are approximately equal (for floating point)
pub fn assert_approx_eq(actual: f64, expected: f64, epsilon: f64, msg: &str) -> Result<(), String> {
    if (actual - expected).abs() < epsilon {
        Ok(())
    } else {
        Err(format!(
            "{}: expected {} +/- {}, got {}",
            msg, expected, epsilon, actual
        ))
    }
}
