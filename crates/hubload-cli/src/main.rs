//! hubload CLI - drive load runs against hub endpoints, or serve the echo target

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use hubload_echo::EchoConfig;
use hubload_worker::{StopOutcome, Worker, WorkerError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod job;
mod server;

use job::JobArgs;

/// hubload - connection fan-out load generator for hub endpoints
#[derive(Parser)]
#[command(name = "hubload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one load test and print its results
    Run(JobArgs),

    /// Serve the echo target
    Echo {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        /// Port number
        #[arg(short = 'P', long, default_value_t = hubload_core::DEFAULT_ECHO_PORT)]
        port: u16,

        /// Pause between push rounds in milliseconds (0 pushes back to back)
        #[arg(long, default_value = "0")]
        push_interval_ms: u64,

        /// Reject handshakes beyond this many live connections
        #[arg(long)]
        max_connections: Option<usize>,
    },

    /// Show version info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(()).await;
    });

    match cli.command {
        Commands::Run(args) => {
            run_job(args, &mut shutdown_rx).await?;
        }

        Commands::Echo {
            bind,
            port,
            push_interval_ms,
            max_connections,
        } => {
            let config = EchoConfig {
                push_interval: (push_interval_ms > 0)
                    .then(|| Duration::from_millis(push_interval_ms)),
                max_connections,
                ..Default::default()
            };
            server::run_echo(&bind, port, config, &mut shutdown_rx).await?;
        }

        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

async fn run_job(args: JobArgs, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
    let job = job::load_job(&args)?;
    let worker = Worker::new(job).context("Invalid job")?;

    println!(
        "{} Running {} {} connections against {} for {}s",
        "hubload".cyan().bold(),
        worker.job().connections,
        worker.job().transport,
        worker.url(),
        worker.job().duration
    );

    let run = worker.run();
    tokio::pin!(run);

    // `run` is polled first so the run has left `Created` before a stop
    let outcome = tokio::select! {
        biased;
        outcome = &mut run => outcome,
        _ = shutdown_rx.recv() => {
            match worker.stop_when_started().await {
                Ok(StopOutcome::Performed) => println!("{}", "Stopped early".yellow()),
                Ok(StopOutcome::AlreadyStopped) => {}
                Err(WorkerError::InvalidState { state, .. }) => {
                    warn!("Interrupted while {}", state);
                }
                Err(e) => warn!("Stop failed: {}", e),
            }
            run.await
        }
    };

    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            for line in worker.errors().text().lines() {
                eprintln!("  {} {}", "!".red().bold(), line);
            }
            let _ = worker.dispose().await;
            return Err(e).context("Load run failed");
        }
    };

    job::print_results(args.output, worker.job(), &results, &worker.errors().text())?;
    worker.dispose().await?;
    Ok(())
}

fn print_info() {
    println!("{}", "hubload - hub endpoint load generator".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!();
    println!("{}", "Transports:".green());
    println!("  - websockets (hub connection)");
    println!("  - sockets (raw WebSocket, manual framing)");
    println!();
    println!("{}", "Protocols:".green());
    println!("  - json");
    println!("  - messagepack");
    println!();
    println!("{}", "Examples:".green());
    println!("  hubload echo --port 5000                                  # Serve the echo target");
    println!("  hubload run -u http://localhost:5000/echo -n 100 -d 30    # 100 connections, 30s");
    println!("  hubload run --config job.toml --output json               # Job file, JSON results");
}
