//! hubload Worker
//!
//! Drives one load test against a hub endpoint:
//!
//! 1. Builds N connections from a [`JobDescriptor`] and opens them concurrently
//! 2. Asks the endpoint to start echoing on connection 0
//! 3. Records the latency of every `echo` push per connection
//! 4. Stops exactly once, on the duration timer or an external [`Worker::stop`]
//! 5. Reduces the samples to throughput and latency percentiles
//!
//! # Example
//!
//! ```no_run
//! use hubload_worker::{JobDescriptor, Worker};
//!
//! # async fn example() -> hubload_worker::Result<()> {
//! let job = JobDescriptor::new("http://localhost:5000/echo", 100, 30);
//! let worker = Worker::new(job)?;
//! let results = worker.run().await?;
//! println!("{:.0} rps, p99 {:.2} ms", results.requests_per_second, results.latency.p99);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod job;
pub mod samples;
pub mod stats;
pub mod worker;

pub use connection::{Connection, Inbound, LoopContext, ReceiveLoop};
pub use error::{Result, WorkerError};
pub use job::{parse_protocol, ErrorLog, JobDescriptor, JobResults, LatencyReport, TransportKind};
pub use samples::{ConnectionSamples, SampleSnapshot, SampleStore};
pub use worker::{RunState, StopOutcome, Worker};

/// Client property selecting the hub connection's frame logging level
pub const LOG_LEVEL_PROPERTY: &str = "LogLevel";
