//! clusterlink - cluster shard ⇄ aggregator link over WebSocket
//!
//! This is the convenience crate that re-exports the clusterlink sub-crates.
//!
//! - **clusterlink-core**: opcode protocol types, codec, error handling,
//!   observability bootstrap
//! - **clusterlink-client**: the shard client (connection driver, backoff,
//!   remote eval, events)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use clusterlink::{ClientBuilder, ConnectionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::from_env()?.connect().await?;
//!     client.wait_for_state(ConnectionState::Ready).await?;
//!
//!     client.send_log("shard online").await?;
//!     Ok(())
//! }
//! ```

pub use clusterlink_client as client;
pub use clusterlink_core as core;

pub use clusterlink_client::{ClientBuilder, ClientEvent, ConnectionState, EventKind, ShardClient};
pub use clusterlink_core::{Error, Result};
