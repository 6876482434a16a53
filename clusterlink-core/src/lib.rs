//! Core types and codec for the clusterlink shard protocol
//!
//! A cluster shard talks to its aggregator with a tiny opcode protocol: every
//! frame is a JSON object `{"op": <integer>, "d": <payload>}`. This crate
//! holds everything about that protocol that does not depend on a live
//! connection:
//!
//! - **Types**: the opcode enumeration, the envelope and the typed payloads
//! - **Codec**: encoding payloads into envelopes and decoding inbound frames
//! - **Error handling**: the error type shared by every clusterlink crate
//! - **Observability**: opt-in OpenTelemetry / `tracing-subscriber` bootstrap
//!
//! The crate is transport-agnostic. `clusterlink-client` drives these types
//! over a WebSocket.
//!
//! # Example
//!
//! ```rust
//! use clusterlink_core::{codec, OpCode, StatsReport};
//!
//! let stats = StatsReport::new(12, 0.25, 128.0, 42.0).unwrap();
//! let frame = codec::encode(OpCode::Stats, &stats).unwrap();
//!
//! let envelope = codec::decode(&frame).unwrap();
//! assert_eq!(envelope.opcode().unwrap(), OpCode::Stats);
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    close_code, ClientIdentity, Envelope, Hello, OpCode, RemoteEvalPayload, StatsReport,
};
