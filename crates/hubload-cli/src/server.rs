//! Echo target for `hubload echo`

use anyhow::{Context, Result};
use colored::Colorize;
use hubload_echo::{EchoConfig, EchoServer};
use tokio::sync::mpsc;
use tracing::info;

/// Serve the echo target until shutdown
pub async fn run_echo(
    bind: &str,
    port: u16,
    config: EchoConfig,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let server = EchoServer::new(config);

    println!(
        "{} Echo target listening on {}",
        "OK".green().bold(),
        addr
    );
    match server.config().push_interval {
        Some(interval) => println!("  Push interval: {:?}", interval),
        None => println!("  Push interval: as fast as possible"),
    }
    if let Some(max) = server.config().max_connections {
        println!("  Connection cap: {}", max);
    }
    println!("  Press Ctrl+C to stop");

    let serving = server.clone();
    let serve = async move { serving.serve(&addr).await };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => {
            result.context("Echo target failed")?;
        }
        _ = shutdown_rx.recv() => {
            info!(
                "Echo target shutting down after {} invocations, {} push rounds",
                server.invocation_count(),
                server.push_count()
            );
            server.shutdown();
        }
    }

    println!("{}", "Echo target stopped".yellow());
    Ok(())
}
