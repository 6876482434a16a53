//! Cluster shard client over WebSocket
//!
//! `ShardClient` is the public face of a shard's link to its aggregator. It
//! starts and stops the connection driver, writes outbound frames through
//! the shared sink, and exposes the event registry.
//!
//! # Client Lifecycle
//!
//! 1. **Build**: configure with [`ClientBuilder`](crate::ClientBuilder)
//! 2. **Connect**: spawn the connection driver; it dials, handshakes and
//!    reconnects on its own
//! 3. **Use**: send stats, logs and errors, issue remote evals once `Ready`
//! 4. **Disconnect**: close with 1000, optionally turning reconnects off
//!
//! # Cloning
//!
//! `ShardClient` is cheaply cloneable. All clones share the same connection,
//! handlers and pending evals, so a clone can be moved into an event
//! handler.

use crate::connection::ConnectionDriver;
use crate::connection_state::{Command, ConnectionManager, ConnectionState};
use crate::correlation::EvalTracker;
use crate::events::{ClientEvent, EventHandler, EventKind, EventQueue};
use crate::metrics::ClientMetrics;
use crate::transport::OutboundSink;
use clusterlink_core::{ClientIdentity, Error, OpCode, RemoteEvalPayload, Result, StatsReport};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Client for one cluster shard
#[derive(Clone)]
pub struct ShardClient {
    identity: ClientIdentity,
    manager: Arc<ConnectionManager>,
    sink: OutboundSink,
    evals: EvalTracker,
    events: EventHandler,
    eval_timeout: Option<Duration>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ShardClient {
    pub(crate) fn from_parts(
        identity: ClientIdentity,
        manager: Arc<ConnectionManager>,
        eval_timeout: Option<Duration>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            identity,
            manager,
            sink: OutboundSink::new(metrics.clone()),
            evals: EvalTracker::new(),
            events: EventHandler::new(),
            eval_timeout,
            metrics,
        }
    }

    /// Start the connection driver
    ///
    /// Returns once the driver is running, not once the handshake is done.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` if a driver is already running for this client.
    #[tracing::instrument(skip(self), fields(url = %self.manager.url(), cluster_id = self.identity.cluster_id()))]
    pub async fn connect(&self) -> Result<()> {
        let commands = self.manager.begin().await?;

        let driver = ConnectionDriver {
            identity: self.identity.clone(),
            manager: Arc::clone(&self.manager),
            sink: self.sink.clone(),
            evals: self.evals.clone(),
            events: self.events.clone(),
            queue: EventQueue::spawn(self.events.clone()),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(driver.run(commands));
        Ok(())
    }

    /// Close the connection with 1000
    ///
    /// `Some(flag)` overrides the auto-reconnect setting; `None` keeps it.
    /// The close happens on the driver task, so this returns before the
    /// teardown and is safe to call from an event handler.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self, reconnect: Option<bool>) {
        if self
            .manager
            .send_command(Command::Disconnect { reconnect })
            .await
        {
            tracing::info!("Disconnect requested");
            return;
        }

        if let Some(enabled) = reconnect {
            self.manager.set_auto_reconnect(enabled);
        }
        tracing::debug!("Disconnect requested with no active connection");
    }

    /// Report shard statistics (STATS)
    ///
    /// # Errors
    ///
    /// `NotConnected` unless `Ready`; `InvalidArgument` if a float is NaN or
    /// infinite, in which case nothing is sent.
    #[tracing::instrument(skip(self))]
    pub async fn send_stats(
        &self,
        guild_count: u64,
        cpu_usage: f64,
        mem_usage: f64,
        ping: f64,
    ) -> Result<()> {
        self.ensure_ready()?;
        let stats = StatsReport::new(guild_count, cpu_usage, mem_usage, ping)?;
        self.send(OpCode::Stats, &stats).await
    }

    /// Forward a log line to the aggregator (LOG)
    #[tracing::instrument(skip(self, message))]
    pub async fn send_log(&self, message: impl AsRef<str>) -> Result<()> {
        self.ensure_ready()?;
        self.send(OpCode::Log, message.as_ref()).await
    }

    /// Forward an error report to the aggregator (ERROR)
    #[tracing::instrument(skip(self, message))]
    pub async fn send_error(&self, message: impl AsRef<str>) -> Result<()> {
        self.ensure_ready()?;
        self.send(OpCode::Error, message.as_ref()).await
    }

    /// Ask cluster `target` to evaluate `code` and wait for its reply
    ///
    /// Resolves with the reply's `data`. Without a configured eval timeout
    /// this waits until the reply arrives or the connection is torn down.
    /// Dropping the future stops tracking the request.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless `Ready`
    /// - `ConnectionClosed` if the connection drops first
    /// - `EvalTimeout` if a timeout is configured and elapses
    #[tracing::instrument(skip(self, code))]
    pub async fn remote_eval(&self, target: u32, code: impl Into<String>) -> Result<Value> {
        self.ensure_ready()?;
        let start = Instant::now();

        let (uid, rx) = self.evals.register(target).await;
        let _pending = PendingEvalGuard {
            evals: self.evals.clone(),
            uid,
        };
        let request = RemoteEvalPayload {
            id: target,
            uid,
            data: Value::String(code.into()),
        };
        self.send(OpCode::RemoteEval, &request).await?;
        tracing::debug!(uid, "Remote eval sent, waiting for reply");

        let outcome = match self.eval_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.record_eval("timeout", start);
                    tracing::warn!(uid, timeout_secs = timeout.as_secs_f64(), "Remote eval timed out");
                    return Err(Error::EvalTimeout(timeout));
                }
            },
            None => rx.await,
        };

        let result = outcome.unwrap_or(Err(Error::ConnectionClosed));
        self.record_eval(if result.is_ok() { "success" } else { "error" }, start);
        result
    }

    /// Register an async handler for one kind of event
    ///
    /// Handlers run on the client's dispatcher task, one event at a time,
    /// in registration order.
    pub async fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.events.register(kind, handler).await;
    }

    /// Whether any handler is registered for `kind`
    pub async fn has_listener(&self, kind: EventKind) -> bool {
        self.events.has_handler(kind).await
    }

    pub fn events(&self) -> &EventHandler {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Wait until the client reaches `state`
    ///
    /// # Errors
    ///
    /// The fatal error if the client stops in `Failed` first, or
    /// `NotConnected` if it stops in `Idle`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        self.manager.wait_for_state(state).await
    }

    /// Delay the next reconnect would currently wait
    pub async fn reconnect_delay(&self) -> Duration {
        self.manager.current_delay().await
    }

    /// Heartbeat interval announced by the last HELLO
    pub async fn heartbeat_interval(&self) -> Option<Duration> {
        self.manager.heartbeat_interval().await
    }

    /// The unobserved error that stopped the client, if it is `Failed`
    pub async fn fatal_error(&self) -> Option<Error> {
        self.manager.fatal_error().await
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn url(&self) -> &str {
        self.manager.url()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.manager.auto_reconnect()
    }

    /// Number of outbound remote evals still awaiting a reply
    pub async fn pending_evals(&self) -> usize {
        self.evals.pending_count().await
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn send<T: serde::Serialize + ?Sized>(&self, op: OpCode, payload: &T) -> Result<()> {
        let result = self.sink.send_ready(op, payload).await;
        if let Err(ref e) = result {
            tracing::warn!(op = %op, error = %e, "Send failed");
            if let Some(ref m) = self.metrics {
                m.record_error(e.kind());
            }
        }
        result
    }

    fn record_eval(&self, status: &'static str, start: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_remote_eval(status, start.elapsed().as_secs_f64());
        }
    }
}

/// Forgets an outbound eval however `remote_eval` exits, including when the
/// caller drops its future
struct PendingEvalGuard {
    evals: EvalTracker,
    uid: u64,
}

impl Drop for PendingEvalGuard {
    fn drop(&mut self) {
        self.evals.cancel_detached(self.uid);
    }
}
