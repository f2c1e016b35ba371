//! hubload Transport Layer
//!
//! Bidirectional WebSocket transport used by both connection variants of the
//! driver and by the echo target. Data is exchanged as opaque byte blocks;
//! framing and encoding live one layer up.

pub mod error;
pub mod traits;
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
