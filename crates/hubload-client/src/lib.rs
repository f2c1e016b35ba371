//! hubload Hub Client
//!
//! Message-oriented connection to a hub endpoint. The connection performs the
//! protocol negotiation, frames and encodes invocations, and dispatches inbound
//! invocations to per-target streams.
//!
//! # Example
//!
//! ```ignore
//! use hubload_client::HubConnectionBuilder;
//! use hubload_core::Protocol;
//!
//! #[tokio::main]
//! async fn main() -> hubload_client::Result<()> {
//!     let hub = HubConnectionBuilder::new("ws://localhost:5000/echo")
//!         .with_protocol(Protocol::MessagePack)
//!         .build();
//!
//!     let mut echoes = hub.on("echo");
//!     hub.start().await?;
//!     hub.send("Echo", vec![serde_json::json!(10)]).await?;
//!
//!     while let Some(args) = echoes.next().await {
//!         println!("echo {:?}", args);
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod error;

pub use builder::HubConnectionBuilder;
pub use client::{HubConnection, HubState, Invocation, InvocationStream};
pub use error::{ClientError, Result};
