//! Worker error types

use thiserror::Error;

use crate::worker::RunState;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// Invalid job, rejected before any connection is made
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection {index} failed: {message}")]
    Connection { index: usize, message: String },

    /// Malformed inbound unit on a raw socket connection
    #[error("framing error on connection {index}: {message}")]
    Framing { index: usize, message: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] hubload_core::Error),
}

impl WorkerError {
    pub(crate) fn connection(index: usize, error: impl std::fmt::Display) -> Self {
        WorkerError::Connection {
            index,
            message: error.to_string(),
        }
    }
}
