//! Error types for clusterlink
//!
//! A single `Error` enum covers every failure the shard protocol can produce,
//! from rejected calls to torn-down connections.
//!
//! # Error Categories
//!
//! - **Call errors**: `NotConnected`, `AlreadyConnected`, `InvalidArgument`
//!   reject a single operation and leave the connection untouched
//! - **Protocol errors**: `MalformedMessage`, `ProtocolViolation` describe
//!   frames the aggregator should never have sent
//! - **Transport errors**: `Connection`, `ConnectionClosed`, `WebSocket`
//!   describe the socket itself
//! - **Processing errors**: `Serialization`, `EvalTimeout`
//!
//! `Connection` and `ProtocolViolation` are recovered by the connection
//! driver (teardown and reconnect). The others are returned to the caller.
//!
//! # Examples
//!
//! ```rust
//! use clusterlink_core::{close_code, Error};
//!
//! let error = Error::connection(close_code::PROTOCOL_ERROR, "unknown opcode 99");
//! assert_eq!(error.close_code(), Some(4001));
//! assert!(error.is_connection_level());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type for clusterlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for clusterlink operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The operation needs a `Ready` connection and there is none
    #[error("Not connected: the handshake has not completed")]
    NotConnected,

    /// `connect()` was called while a connection is already being driven
    #[error("Already connected")]
    AlreadyConnected,

    /// The caller passed arguments the protocol cannot carry
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An inbound frame was not a valid `{op, d}` envelope
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Unknown opcode, or an opcode that is not valid in the current state
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Transport-level error or close, carrying the WebSocket close code
    #[error("Connection error [{code}]: {reason}")]
    Connection {
        /// WebSocket close code (1006 when the socket failed without one)
        code: u16,
        /// Close reason or transport error text
        reason: String,
    },

    /// The connection was torn down before a pending reply arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// A remote eval reply did not arrive within the configured timeout
    #[error("Remote eval timed out after {0:?}")]
    EvalTimeout(Duration),

    /// An outbound payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The local transport rejected a frame
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl Error {
    /// Build a `Connection` error from a close code and reason
    pub fn connection(code: u16, reason: impl Into<String>) -> Self {
        Error::Connection {
            code,
            reason: reason.into(),
        }
    }

    /// The close code carried by a `Connection` error
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::Connection { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error concerns the connection as a whole rather than
    /// one call. Connection-level errors are what the `error` event carries.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::ProtocolViolation(_) | Error::ConnectionClosed
        )
    }

    /// Short snake_case label, used as a metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotConnected => "not_connected",
            Error::AlreadyConnected => "already_connected",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::MalformedMessage(_) => "malformed_message",
            Error::ProtocolViolation(_) => "protocol_violation",
            Error::Connection { .. } => "connection",
            Error::ConnectionClosed => "connection_closed",
            Error::EvalTimeout(_) => "eval_timeout",
            Error::Serialization(_) => "serialization",
            Error::WebSocket(_) => "websocket",
        }
    }
}
