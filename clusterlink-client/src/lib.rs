//! Cluster shard client for the clusterlink aggregator protocol
//!
//! A shard keeps one WebSocket open to its aggregator, identifies itself,
//! reports stats, and answers or issues remote evaluations. This crate runs
//! that link: the handshake, opcode dispatch, reconnect with backoff, and
//! remote-eval correlation.
//!
//! # Core Features
//!
//! - **Handshake**: HELLO → IDENTIFY → READY_ACK, gated by connection state
//! - **Reporting**: stats, log lines and error reports
//! - **Remote Eval**: outbound calls with reply correlation, inbound requests
//!   answered through a single-use reply handle
//! - **Auto-Reconnection**: multiplicative backoff (3s ×1.5), reset on every
//!   new transport
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use clusterlink_client::{ClientBuilder, ClientEvent, ConnectionState, EventKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("secret", 0, 4).build()?;
//!
//!     client.on(EventKind::Error, |event| async move {
//!         if let ClientEvent::Error(error) = event {
//!             eprintln!("link error: {}", error);
//!         }
//!     }).await;
//!
//!     client.connect().await?;
//!     client.wait_for_state(ConnectionState::Ready).await?;
//!
//!     client.send_stats(120, 0.35, 512.0, 42.0).await?;
//!     let total = client.remote_eval(1, "guilds.size").await?;
//!     println!("cluster 1 has {} guilds", total);
//!
//!     client.disconnect(Some(false)).await;
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod connection;
mod connection_state;
mod correlation;
mod events;
mod metrics;
mod reconnect;
mod transport;

pub use client::ShardClient;
pub use client_builder::{
    ClientBuilder, DEFAULT_URL, ENV_CLUSTER_COUNT, ENV_CLUSTER_ID, ENV_TOKEN, ENV_URL,
};
pub use connection_state::{ConnectionManager, ConnectionState};
pub use correlation::EvalTracker;
pub use events::{ClientEvent, EvalReply, EventFn, EventHandler, EventKind};
pub use metrics::ClientMetrics;
pub use reconnect::{FixedDelay, MultiplicativeBackoff, ReconnectionStrategy};
