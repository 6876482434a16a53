//! Client builder
//!
//! `ClientBuilder` is the configuration layer of the client. It collects
//! the shard identity, the aggregator URL, the reconnection policy, an
//! optional remote-eval timeout and optional observability, then builds a
//! [`ShardClient`].
//!
//! # Environment
//!
//! [`ClientBuilder::from_env`] reads:
//!
//! | Variable | Required | Meaning |
//! |----------|----------|---------|
//! | `CLUSTERLINK_TOKEN` | yes | shared secret sent in IDENTIFY |
//! | `CLUSTERLINK_CLUSTER_ID` | yes | this shard's integer id |
//! | `CLUSTERLINK_CLUSTER_COUNT` | yes | total number of shards |
//! | `CLUSTERLINK_URL` | no | aggregator URL, default [`DEFAULT_URL`] |
//!
//! # Examples
//!
//! ```rust,no_run
//! use clusterlink_client::{ClientBuilder, MultiplicativeBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> clusterlink_core::Result<()> {
//! let client = ClientBuilder::new("secret", 3, 8)
//!     .url("ws://aggregator:3000/connect")
//!     .with_reconnect(Box::new(
//!         MultiplicativeBackoff::default().with_max_delay(Duration::from_secs(60)),
//!     ))
//!     .with_eval_timeout(Duration::from_secs(10))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::connection_state::ConnectionManager;
use crate::reconnect::{MultiplicativeBackoff, ReconnectionStrategy};
use crate::{ClientMetrics, ShardClient};
use clusterlink_core::{ClientIdentity, Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Aggregator URL used when none is configured
pub const DEFAULT_URL: &str = "ws://localhost:3000/connect";

pub const ENV_TOKEN: &str = "CLUSTERLINK_TOKEN";
pub const ENV_CLUSTER_ID: &str = "CLUSTERLINK_CLUSTER_ID";
pub const ENV_CLUSTER_COUNT: &str = "CLUSTERLINK_CLUSTER_COUNT";
pub const ENV_URL: &str = "CLUSTERLINK_URL";

/// Builder for configuring and creating a [`ShardClient`]
pub struct ClientBuilder {
    identity: ClientIdentity,
    url: String,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    auto_reconnect: bool,
    eval_timeout: Option<Duration>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    /// Create a builder for the shard `cluster_id` of `cluster_count`
    pub fn new(token: impl Into<String>, cluster_id: u32, cluster_count: u32) -> Self {
        Self::with_identity(ClientIdentity::new(token, cluster_id, cluster_count))
    }

    pub fn with_identity(identity: ClientIdentity) -> Self {
        Self {
            identity,
            url: DEFAULT_URL.to_string(),
            reconnect_strategy: None,
            auto_reconnect: true,
            eval_timeout: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Configure from `CLUSTERLINK_*` environment variables
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a required variable is missing or an id is not
    /// an integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Configure from an arbitrary variable lookup
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::InvalidArgument(format!("{} is not set", key)))
        };

        let identity = ClientIdentity::parse(
            required(ENV_TOKEN)?,
            &required(ENV_CLUSTER_ID)?,
            &required(ENV_CLUSTER_COUNT)?,
        )?;

        let mut builder = Self::with_identity(identity);
        if let Some(url) = lookup(ENV_URL) {
            builder.url = url;
        }
        Ok(builder)
    }

    /// Set the aggregator URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Use a custom reconnection strategy instead of the 3s ×1.5 backoff
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Whether to reconnect after the aggregator closes the socket (default: true)
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Fail outbound remote evals with `EvalTimeout` after `timeout`
    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build the client without connecting
    pub fn build(self) -> Result<ShardClient> {
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            clusterlink_core::init_observability(config.clone()).map_err(|e| {
                Error::InvalidArgument(format!("failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(ClientMetrics::new(config.service_name)))
        } else {
            None
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(MultiplicativeBackoff::default()));
        let manager = Arc::new(ConnectionManager::new(
            self.url,
            strategy,
            self.auto_reconnect,
        ));

        Ok(ShardClient::from_parts(
            self.identity,
            manager,
            self.eval_timeout,
            metrics,
        ))
    }

    /// Build the client and start connecting
    ///
    /// Returns as soon as the connection driver is running; use
    /// [`ShardClient::wait_for_state`] to wait for the handshake.
    pub async fn connect(self) -> Result<ShardClient> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
