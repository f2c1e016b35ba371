//! hubload Echo
//!
//! The echo endpoint used as the load target:
//! - Negotiates the hub protocol per connection (JSON or MessagePack)
//! - Tracks live connections and received invocations
//! - On `Echo`, pushes a timestamped `echo` invocation to every peer
//!   until the requested duration elapses, `Stop` arrives, or no peers remain
//!
//! # Example
//!
//! ```no_run
//! use hubload_echo::{EchoConfig, EchoServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = EchoServer::new(EchoConfig::default());
//!     server.serve("0.0.0.0:5000").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod server;
pub mod session;

pub use error::{EchoError, Result};
pub use server::{EchoConfig, EchoServer};
pub use session::{Session, SessionId, SessionInfo};
