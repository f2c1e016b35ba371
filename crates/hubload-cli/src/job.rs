//! Job loading and result output for `hubload run`

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use hubload_worker::{parse_protocol, JobDescriptor, JobResults, TransportKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Job selection: a TOML file, flags, or a file with flag overrides
#[derive(Debug, Default, Args)]
pub struct JobArgs {
    /// Job file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target URL (http, https, ws or wss)
    #[arg(short, long, env = "HUBLOAD_URL")]
    pub url: Option<String>,

    /// Number of concurrent connections
    #[arg(short = 'n', long)]
    pub connections: Option<usize>,

    /// Test duration in seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Transport (websockets, sockets)
    #[arg(short, long)]
    pub transport: Option<String>,

    /// Protocol (json, messagepack)
    #[arg(short, long)]
    pub protocol: Option<String>,

    /// Extra upgrade header, `Name: value`
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Client property, `key=value` (e.g. LogLevel=debug)
    #[arg(long = "property")]
    pub properties: Vec<String>,

    /// Pause after closing connections, in milliseconds
    #[arg(long)]
    pub cool_down_ms: Option<u64>,

    /// Result output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Read a job file
pub fn read_job_file(path: &Path) -> Result<JobDescriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid job file {}", path.display()))
}

/// Build the job from the file (if any) with flag overrides applied
pub fn load_job(args: &JobArgs) -> Result<JobDescriptor> {
    let mut job = match &args.config {
        Some(path) => read_job_file(path)?,
        None => {
            let (Some(url), Some(connections), Some(duration)) =
                (&args.url, args.connections, args.duration)
            else {
                bail!("--url, --connections and --duration are required without --config");
            };
            JobDescriptor::new(url.clone(), connections, duration)
        }
    };

    if let Some(url) = &args.url {
        job.server_url = url.clone();
    }
    if let Some(connections) = args.connections {
        job.connections = connections;
    }
    if let Some(duration) = args.duration {
        job.duration = duration;
    }
    if let Some(transport) = &args.transport {
        job.transport = transport.parse::<TransportKind>()?;
    }
    if let Some(protocol) = &args.protocol {
        job.protocol = parse_protocol(protocol)?;
    }
    for header in &args.headers {
        let (name, value) = split_pair(header, ':')
            .with_context(|| format!("Invalid header '{}', expected 'Name: value'", header))?;
        job.headers.insert(name, value);
    }
    for property in &args.properties {
        let (key, value) = split_pair(property, '=')
            .with_context(|| format!("Invalid property '{}', expected 'key=value'", property))?;
        job.client_properties.insert(key, value);
    }
    if let Some(cool_down_ms) = args.cool_down_ms {
        job = job.with_cool_down(Duration::from_millis(cool_down_ms));
    }

    job.validate()?;
    Ok(job)
}

fn split_pair(text: &str, separator: char) -> Option<(String, String)> {
    let (key, value) = text.split_once(separator)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

#[derive(Serialize)]
struct Report<'a> {
    job: &'a JobDescriptor,
    results: &'a JobResults,
    errors: Vec<&'a str>,
}

/// Print results in the selected format
pub fn print_results(
    format: OutputFormat,
    job: &JobDescriptor,
    results: &JobResults,
    errors: &str,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let report = Report {
                job,
                results,
                errors: errors.lines().collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            let latency = &results.latency;
            println!("{} Job {} completed", "OK".green().bold(), job.id);
            println!("  Requests:    {}", results.total_requests);
            println!("  Elapsed:     {:.3} s", results.elapsed_seconds);
            println!(
                "  Throughput:  {} req/s",
                format!("{:.1}", results.requests_per_second).cyan()
            );
            println!(
                "  Latency:     avg {:.3}  p50 {:.3}  p75 {:.3}  p90 {:.3}  p99 {:.3} ms",
                latency.average, latency.p50, latency.p75, latency.p90, latency.p99
            );
            println!(
                "  Per connection: min {} max {}",
                results.min_connection_requests, results.max_connection_requests
            );
            for line in errors.lines() {
                println!("  {} {}", "!".yellow().bold(), line);
            }
        }
    }
    Ok(())
}
