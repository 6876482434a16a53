//! Connection state management
//!
//! `ConnectionManager` holds everything about a client's connection that
//! outlives a single socket: the current state, the backoff strategy, the
//! auto-reconnect flag, the heartbeat interval announced by the last HELLO,
//! and the command channel of the running connection driver.
//!
//! # Connection States
//!
//! ```text
//! Idle → Connecting → AwaitingHello → Identifying → Ready
//!  ↑         ↑                                        ↓
//!  │         └──────── Reconnecting ←──────────── Closing
//!  └──────────────────────────────────────────────────┘
//!                                   (no reconnect)
//! ```
//!
//! `Failed` is entered instead of `Idle` when a connection error surfaced
//! with no `error` listener registered. Both `Idle` and `Failed` accept a
//! new `connect()`.
//!
//! State changes are published on a watch channel, so callers can await a
//! particular state instead of polling.

use crate::reconnect::ReconnectionStrategy;
use clusterlink_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none scheduled
    Idle,
    /// Dialing the aggregator
    Connecting,
    /// Transport open, waiting for HELLO
    AwaitingHello,
    /// IDENTIFY sent, waiting for READY_ACK
    Identifying,
    /// Handshake complete
    Ready,
    /// Tearing the transport down
    Closing,
    /// Waiting out the backoff before dialing again
    Reconnecting,
    /// Stopped after an unobserved connection error
    Failed,
}

impl ConnectionState {
    /// Whether a connection driver is running in this state
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Idle | ConnectionState::Failed)
    }

    /// Numeric encoding for the connection-state gauge
    pub fn as_metric(self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::AwaitingHello => 2,
            ConnectionState::Identifying => 3,
            ConnectionState::Ready => 4,
            ConnectionState::Closing => 5,
            ConnectionState::Reconnecting => 6,
            ConnectionState::Failed => 7,
        }
    }
}

/// Commands sent from the facade to the connection driver
#[derive(Debug)]
pub(crate) enum Command {
    /// Close with 1000, optionally overriding the auto-reconnect flag
    Disconnect { reconnect: Option<bool> },
}

/// Manages connection state and reconnection policy for one client
pub struct ConnectionManager {
    url: String,
    state: watch::Sender<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    auto_reconnect: AtomicBool,
    heartbeat_interval: RwLock<Option<Duration>>,
    fatal_error: RwLock<Option<Error>>,
    driver: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl ConnectionManager {
    /// Create a new connection manager in the `Idle` state
    pub fn new(
        url: impl Into<String>,
        strategy: Box<dyn ReconnectionStrategy>,
        auto_reconnect: bool,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            url: url.into(),
            state,
            strategy: Mutex::new(strategy),
            auto_reconnect: AtomicBool::new(auto_reconnect),
            heartbeat_interval: RwLock::new(None),
            fatal_error: RwLock::new(None),
            driver: Mutex::new(None),
        }
    }

    /// Get the connection URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the connection reaches `target`
    ///
    /// Returns immediately if it is already there.
    ///
    /// # Errors
    ///
    /// If the client stops before reaching `target`: the fatal error when it
    /// settles in `Failed`, `NotConnected` when it settles in `Idle`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut rx = self.state.subscribe();
        let reached = *rx
            .wait_for(|state| *state == target || !state.is_active())
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        match reached {
            state if state == target => Ok(()),
            ConnectionState::Failed => Err(self
                .fatal_error()
                .await
                .unwrap_or(Error::ConnectionClosed)),
            _ => Err(Error::NotConnected),
        }
    }

    pub(crate) fn set_state(&self, new_state: ConnectionState) {
        let previous = self.state.send_replace(new_state);
        if previous != new_state {
            tracing::debug!(from = ?previous, to = ?new_state, "Connection state changed");
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Grow the backoff for one disconnect and return the delay to wait
    pub async fn next_reconnect_delay(&self) -> Duration {
        self.strategy.lock().await.next_delay()
    }

    /// The current backoff delay
    pub async fn current_delay(&self) -> Duration {
        self.strategy.lock().await.current_delay()
    }

    /// Return the backoff to its base delay
    pub async fn reset_backoff(&self) {
        self.strategy.lock().await.reset();
    }

    pub async fn heartbeat_interval(&self) -> Option<Duration> {
        *self.heartbeat_interval.read().await
    }

    pub(crate) async fn set_heartbeat_interval(&self, interval: Option<Duration>) {
        *self.heartbeat_interval.write().await = interval;
    }

    /// The error that stopped the client, if any
    pub async fn fatal_error(&self) -> Option<Error> {
        self.fatal_error.read().await.clone()
    }

    pub(crate) async fn record_fatal(&self, error: Error) {
        *self.fatal_error.write().await = Some(error);
    }

    /// Claim the driver slot and move to `Connecting`
    ///
    /// Fails with `AlreadyConnected` if a driver is already running.
    pub(crate) async fn begin(&self) -> Result<mpsc::UnboundedReceiver<Command>> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() || self.state().is_active() {
            return Err(Error::AlreadyConnected);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *driver = Some(tx);
        *self.fatal_error.write().await = None;
        self.set_state(ConnectionState::Connecting);
        Ok(rx)
    }

    /// Release the driver slot and settle in a terminal state
    pub(crate) async fn finish(&self, final_state: ConnectionState) {
        let mut driver = self.driver.lock().await;
        *driver = None;
        self.set_state(final_state);
    }

    /// Deliver a command to the running driver
    ///
    /// Returns `false` if no driver is running.
    pub(crate) async fn send_command(&self, command: Command) -> bool {
        match self.driver.lock().await.as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}
