//! Connection driver
//!
//! One driver task owns the link to the aggregator from `connect()` until
//! the client stops. Each pass of its loop is one transport lifetime:
//!
//! 1. **Dial** the aggregator URL
//! 2. **Serve** the socket: handshake, then steady-state dispatch, until the
//!    transport errors, closes, or the consumer disconnects
//! 3. **Tear down**: drop the write half, fail pending evals, emit
//!    `disconnect`, grow the backoff
//! 4. **Decide**: surface the error (if any), then either stop or wait out
//!    the backoff and dial again
//!
//! Inbound frames are handled one at a time in wire order. Handshake gating
//! is enforced by state: an opcode that is not valid in the current state
//! is a protocol violation and closes the socket with 4001. Events are only
//! queued here; their handlers run on the dispatcher task.

use crate::connection_state::{Command, ConnectionManager, ConnectionState};
use crate::correlation::EvalTracker;
use crate::events::{ClientEvent, EvalReply, EventHandler, EventKind, EventQueue};
use crate::metrics::ClientMetrics;
use crate::transport::{OutboundSink, WsStream};
use clusterlink_core::{
    close_code, codec, ClientIdentity, Envelope, Error, Hello, OpCode, RemoteEvalPayload, Result,
};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// How one transport lifetime ended
#[derive(Debug)]
enum Termination {
    /// The dial or the socket failed
    Errored(Error),
    /// The socket closed, or the consumer asked it to
    Closed {
        code: u16,
        reason: String,
        requested: bool,
    },
}

impl Termination {
    fn requested() -> Self {
        Termination::Closed {
            code: close_code::NORMAL_CLOSURE,
            reason: "disconnect requested".to_string(),
            requested: true,
        }
    }
}

pub(crate) struct ConnectionDriver {
    pub(crate) identity: ClientIdentity,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) sink: OutboundSink,
    pub(crate) evals: EvalTracker,
    pub(crate) events: EventHandler,
    pub(crate) queue: EventQueue,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionDriver {
    pub(crate) async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            self.transition(ConnectionState::Connecting);
            tracing::info!(url = %self.manager.url(), "Connecting to aggregator");

            let termination = match self.dial(&mut commands).await {
                Ok(stream) => self.serve(stream, &mut commands).await,
                Err(termination) => termination,
            };

            self.teardown().await;
            let delay = self.manager.next_reconnect_delay().await;

            let (always_reconnect, surfaced) = match termination {
                Termination::Errored(error) => (true, Some(error)),
                Termination::Closed {
                    requested: true, ..
                } => (false, None),
                Termination::Closed { code, reason, .. } => {
                    tracing::info!(code, reason = %reason, "Connection closed");
                    (false, Some(Error::connection(code, reason)))
                }
            };

            if let Some(error) = surfaced {
                if !self.surface(error).await {
                    return;
                }
            }

            if !always_reconnect && !self.manager.auto_reconnect() {
                tracing::info!("Auto-reconnect disabled, client stopped");
                self.finish(ConnectionState::Idle).await;
                return;
            }

            self.transition(ConnectionState::Reconnecting);
            if let Some(ref m) = self.metrics {
                m.record_reconnection_attempt();
            }
            tracing::info!(delay_secs = delay.as_secs_f64(), "Reconnecting");

            if !self.wait(delay, &mut commands).await {
                tracing::info!("Pending reconnect cancelled");
                self.finish(ConnectionState::Idle).await;
                return;
            }
        }
    }

    async fn dial(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> std::result::Result<WsStream, Termination> {
        tokio::select! {
            result = connect_async(self.manager.url()) => match result {
                Ok((stream, _)) => Ok(stream),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect");
                    Err(Termination::Errored(Error::connection(
                        close_code::ABNORMAL_CLOSURE,
                        e.to_string(),
                    )))
                }
            },
            command = commands.recv() => {
                self.apply(command);
                Err(Termination::requested())
            }
        }
    }

    async fn serve(
        &self,
        stream: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Termination {
        let (sink, mut stream) = stream.split();
        self.sink.install(sink).await;
        self.manager.reset_backoff().await;
        self.transition(ConnectionState::AwaitingHello);
        tracing::info!("Transport open, awaiting HELLO");
        self.queue.push(ClientEvent::Connect);

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Transport error");
                            return Termination::Errored(Error::connection(
                                close_code::ABNORMAL_CLOSURE,
                                e.to_string(),
                            ));
                        }
                        None => {
                            return Termination::Closed {
                                code: close_code::ABNORMAL_CLOSURE,
                                reason: "connection dropped without a close frame".to_string(),
                                requested: false,
                            };
                        }
                    };
                    if let Some(termination) = self.handle_frame(message).await {
                        return termination;
                    }
                }
                command = commands.recv() => {
                    self.apply(command);
                    self.transition(ConnectionState::Closing);
                    self.sink.close(close_code::NORMAL_CLOSURE, "disconnect requested").await;
                    return Termination::requested();
                }
            }
        }
    }

    async fn handle_frame(&self, message: Message) -> Option<Termination> {
        let decoded = match message {
            Message::Text(text) => codec::decode(&text),
            Message::Binary(data) => codec::decode_bytes(&data),
            Message::Ping(data) => {
                // Replaces the pong tungstenite queued and flushes it now.
                if let Err(e) = self.sink.send_message(Message::Pong(data)).await {
                    tracing::debug!(error = %e, "Failed to answer ping");
                }
                return None;
            }
            Message::Close(frame) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (close_code::NO_STATUS, String::new()),
                };
                return Some(Termination::Closed {
                    code,
                    reason,
                    requested: false,
                });
            }
            _ => return None,
        };

        let result = match decoded {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => None,
            Err(Error::MalformedMessage(reason)) => {
                tracing::warn!(reason = %reason, "Dropping malformed frame");
                if let Some(ref m) = self.metrics {
                    m.record_error("malformed_message");
                }
                None
            }
            Err(Error::ProtocolViolation(reason)) => {
                tracing::warn!(reason = %reason, "Protocol violation, closing connection");
                self.transition(ConnectionState::Closing);
                self.sink.close(close_code::PROTOCOL_ERROR, &reason).await;
                Some(Termination::Closed {
                    code: close_code::PROTOCOL_ERROR,
                    reason,
                    requested: false,
                })
            }
            Err(e) => Some(Termination::Errored(Error::connection(
                close_code::ABNORMAL_CLOSURE,
                e.to_string(),
            ))),
        }
    }

    async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let op = envelope.opcode()?;
        if let Some(ref m) = self.metrics {
            m.record_frame_received(op.name());
        }
        tracing::trace!(op = %op, "Frame received");

        if !op.is_inbound() {
            return Err(Error::ProtocolViolation(format!(
                "{} is never sent by the aggregator",
                op
            )));
        }

        let state = self.manager.state();
        match (state, op) {
            (ConnectionState::AwaitingHello, OpCode::Hello) => self.on_hello(&envelope).await,
            (ConnectionState::Identifying, OpCode::ReadyAck) => {
                self.on_ready().await;
                Ok(())
            }
            (ConnectionState::Ready, op) if op.is_handshake() => {
                tracing::warn!(op = %op, "Ignoring repeated handshake opcode");
                Ok(())
            }
            (ConnectionState::Ready, OpCode::SendAck) => {
                self.queue.push(ClientEvent::Send);
                Ok(())
            }
            (ConnectionState::Ready, OpCode::ClusterDataUpdate) => {
                self.queue.push(ClientEvent::ClustersDataUpdate(envelope.d));
                Ok(())
            }
            (ConnectionState::Ready, OpCode::ClusterStatusUpdate) => {
                self.queue
                    .push(ClientEvent::ClusterStatusUpdate(is_truthy(&envelope.d)));
                Ok(())
            }
            (ConnectionState::Ready, OpCode::RemoteEval) => self.on_remote_eval(&envelope).await,
            (state, op) => Err(Error::ProtocolViolation(format!(
                "{} received while {:?}",
                op, state
            ))),
        }
    }

    async fn on_hello(&self, envelope: &Envelope) -> Result<()> {
        let hello: Hello = envelope.payload().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HELLO payload unreadable, no heartbeat interval recorded");
            Hello::default()
        });
        let interval = hello.heartbeat_interval_ms.map(Duration::from_millis);
        self.manager.set_heartbeat_interval(interval).await;

        self.transition(ConnectionState::Identifying);
        tracing::info!(
            cluster_id = self.identity.cluster_id(),
            cluster_count = self.identity.cluster_count(),
            heartbeat_interval_ms = ?hello.heartbeat_interval_ms,
            "HELLO received, identifying"
        );
        self.sink.send(OpCode::Identify, &self.identity).await
    }

    async fn on_ready(&self) {
        self.sink.mark_ready().await;
        self.transition(ConnectionState::Ready);
        if let Some(ref m) = self.metrics {
            m.record_handshake();
        }
        tracing::info!(cluster_id = self.identity.cluster_id(), "Handshake complete");
        self.queue.push(ClientEvent::Ready);
    }

    async fn on_remote_eval(&self, envelope: &Envelope) -> Result<()> {
        let payload: RemoteEvalPayload = envelope.payload()?;
        if self.evals.complete(payload.uid, payload.data.clone()).await {
            return Ok(());
        }

        if !self.events.has_handler(EventKind::RemoteEval).await {
            tracing::debug!(uid = payload.uid, "Remote eval request with no handler, ignored");
            return Ok(());
        }

        tracing::debug!(uid = payload.uid, "Remote eval request received");
        let reply = EvalReply::new(payload.id, payload.uid, self.sink.clone());
        self.queue.push(ClientEvent::RemoteEval(payload, reply));
        Ok(())
    }

    async fn teardown(&self) {
        self.transition(ConnectionState::Closing);
        self.sink.clear().await;
        self.evals.fail_all(Error::ConnectionClosed).await;
        self.queue.push(ClientEvent::Disconnect);
    }

    /// Report a connection error
    ///
    /// Returns `false` if nobody listens for errors, in which case the
    /// client has stopped in `Failed`.
    async fn surface(&self, error: Error) -> bool {
        if let Some(ref m) = self.metrics {
            m.record_error(error.kind());
        }

        if self.events.has_handler(EventKind::Error).await {
            tracing::warn!(error = %error, "Connection error");
            self.queue.push(ClientEvent::Error(error));
            return true;
        }

        tracing::error!(error = %error, "Connection error with no error listener, client stopped");
        self.manager.record_fatal(error).await;
        self.finish(ConnectionState::Failed).await;
        false
    }

    /// Wait out the backoff, handling commands that arrive meanwhile
    ///
    /// Returns `false` if the reconnect was cancelled.
    async fn wait(&self, delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = commands.recv() => {
                    if command.is_none() {
                        return false;
                    }
                    self.apply(command);
                    if !self.manager.auto_reconnect() {
                        return false;
                    }
                }
            }
        }
    }

    fn apply(&self, command: Option<Command>) {
        if let Some(Command::Disconnect {
            reconnect: Some(enabled),
        }) = command
        {
            self.manager.set_auto_reconnect(enabled);
        }
    }

    fn transition(&self, state: ConnectionState) {
        self.manager.set_state(state);
        if let Some(ref m) = self.metrics {
            m.update_connection_state(state.as_metric());
        }
    }

    async fn finish(&self, state: ConnectionState) {
        self.manager.finish(state).await;
        if let Some(ref m) = self.metrics {
            m.update_connection_state(state.as_metric());
        }
    }
}

/// Loose truthiness for CLUSTER_STATUS_UPDATE payloads
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
