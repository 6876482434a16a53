//! Consumer-facing events
//!
//! The client reports what happens on the link through a typed registry:
//! handlers are registered per [`EventKind`] and awaited in registration
//! order. Events are queued by the connection driver and run on a separate
//! dispatcher task, so a slow handler delays later events but never the
//! socket: a handler may await its own `remote_eval` and the reply is
//! still read.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clusterlink_client::{ClientEvent, EventKind, ShardClient};
//!
//! # async fn example(client: &ShardClient) {
//! client.on(EventKind::RemoteEval, |event| async move {
//!     if let ClientEvent::RemoteEval(request, reply) = event {
//!         let _ = reply.send(Ok(request.data)).await;
//!     }
//! }).await;
//! # }
//! ```

use crate::transport::OutboundSink;
use clusterlink_core::{Error, OpCode, RemoteEvalPayload, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
#[cfg(test)]
use tokio::sync::oneshot;

/// Kinds of event a handler can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Transport opened
    Connect,
    /// Handshake completed
    Ready,
    /// Transport closed or failed
    Disconnect,
    /// The aggregator acknowledged a send (SEND_ACK)
    Send,
    ClustersDataUpdate,
    ClusterStatusUpdate,
    /// Another shard asked this one to evaluate something
    RemoteEval,
    /// A connection-level error was surfaced
    Error,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Ready => "ready",
            EventKind::Disconnect => "disconnect",
            EventKind::Send => "send",
            EventKind::ClustersDataUpdate => "clustersDataUpdate",
            EventKind::ClusterStatusUpdate => "clusterStatusUpdate",
            EventKind::RemoteEval => "remoteEval",
            EventKind::Error => "error",
        }
    }
}

/// An event delivered to registered handlers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connect,
    Ready,
    Disconnect,
    Send,
    ClustersDataUpdate(Value),
    ClusterStatusUpdate(bool),
    RemoteEval(RemoteEvalPayload, EvalReply),
    Error(Error),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connect => EventKind::Connect,
            ClientEvent::Ready => EventKind::Ready,
            ClientEvent::Disconnect => EventKind::Disconnect,
            ClientEvent::Send => EventKind::Send,
            ClientEvent::ClustersDataUpdate(_) => EventKind::ClustersDataUpdate,
            ClientEvent::ClusterStatusUpdate(_) => EventKind::ClusterStatusUpdate,
            ClientEvent::RemoteEval(..) => EventKind::RemoteEval,
            ClientEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Single-use reply handle for an inbound remote eval
///
/// Clones share the same slot: whichever handler calls [`EvalReply::send`]
/// first answers the request, later calls fail.
#[derive(Clone)]
pub struct EvalReply {
    id: u32,
    uid: u64,
    sink: OutboundSink,
    sent: Arc<AtomicBool>,
}

impl EvalReply {
    pub(crate) fn new(id: u32, uid: u64, sink: OutboundSink) -> Self {
        Self {
            id,
            uid,
            sink,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    /// Answer the request with `Ok(value)` or `Err(error)`
    ///
    /// Either way the reply frame is `{id, uid, data}` with `data` set to
    /// the value or the error.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if this request was already answered, or whatever
    /// the transport returns if the frame cannot be written.
    pub async fn send(&self, result: std::result::Result<Value, Value>) -> Result<()> {
        if self.sent.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument(format!(
                "remote eval {} was already answered",
                self.uid
            )));
        }

        let data = match result {
            Ok(value) => value,
            Err(error) => error,
        };
        let payload = RemoteEvalPayload {
            id: self.id,
            uid: self.uid,
            data,
        };
        self.sink.send_ready(OpCode::RemoteEval, &payload).await
    }
}

impl std::fmt::Debug for EvalReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalReply")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("sent", &self.is_sent())
            .finish()
    }
}

/// Type for event handler functions
pub type EventFn =
    Arc<dyn Fn(ClientEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registry of event handlers, keyed by kind
#[derive(Clone)]
pub struct EventHandler {
    handlers: Arc<Mutex<HashMap<EventKind, Vec<EventFn>>>>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append a handler for `kind`
    pub async fn register<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventFn = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Run every handler registered for the event's kind, in order
    pub async fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let handlers = match self.handlers.lock().await.get(&kind) {
            Some(list) => list.clone(),
            None => return,
        };

        // The lock is released here so handlers may register more handlers.
        for handler in handlers {
            handler(event.clone()).await;
        }
    }

    pub async fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers
            .lock()
            .await
            .get(&kind)
            .is_some_and(|list| !list.is_empty())
    }

    /// Remove every handler for `kind`, returning how many were removed
    pub async fn clear(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .await
            .remove(&kind)
            .map_or(0, |list| list.len())
    }

    /// Kinds with at least one handler
    pub async fn kinds(&self) -> Vec<EventKind> {
        self.handlers
            .lock()
            .await
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, _)| *kind)
            .collect()
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

enum Queued {
    Event(ClientEvent),
    #[cfg(test)]
    Flush(oneshot::Sender<()>),
}

/// FIFO of events waiting for their handlers
///
/// One dispatcher task per queue emits events in push order. It exits once
/// every clone of the queue is dropped and the backlog is drained.
#[derive(Clone)]
pub(crate) struct EventQueue {
    tx: mpsc::UnboundedSender<Queued>,
}

impl EventQueue {
    /// Spawn the dispatcher task for `handlers`
    pub(crate) fn spawn(handlers: EventHandler) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Queued::Event(event) => handlers.emit(event).await,
                    #[cfg(test)]
                    Queued::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::trace!("Event dispatcher stopped");
        });
        Self { tx }
    }

    pub(crate) fn push(&self, event: ClientEvent) {
        let kind = event.kind();
        if self.tx.send(Queued::Event(event)).is_err() {
            tracing::debug!(kind = kind.name(), "Event dispatcher gone, event dropped");
        }
    }

    /// Wait until every event pushed so far has been handled
    #[cfg(test)]
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Queued::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let events = EventHandler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            events
                .register(EventKind::Ready, move |_| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().await.push(label);
                    }
                })
                .await;
        }

        events.emit(ClientEvent::Ready).await;
        assert_eq!(*order.lock().await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_emit_only_reaches_matching_kind() {
        let events = EventHandler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        events
            .register(EventKind::ClusterStatusUpdate, move |event| {
                let counter = Arc::clone(&counter);
                async move {
                    if let ClientEvent::ClusterStatusUpdate(true) = event {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .await;

        events.emit(ClientEvent::ClusterStatusUpdate(true)).await;
        events.emit(ClientEvent::Connect).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_has_handler_and_clear() {
        let events = EventHandler::new();
        assert!(!events.has_handler(EventKind::Error).await);

        events.register(EventKind::Error, |_| async {}).await;
        events.register(EventKind::Error, |_| async {}).await;
        assert!(events.has_handler(EventKind::Error).await);
        assert_eq!(events.kinds().await, vec![EventKind::Error]);

        assert_eq!(events.clear(EventKind::Error).await, 2);
        assert!(!events.has_handler(EventKind::Error).await);
    }

    #[tokio::test]
    async fn test_handler_may_register_during_emit() {
        let events = EventHandler::new();
        let registry = events.clone();

        events
            .register(EventKind::Connect, move |_| {
                let registry = registry.clone();
                async move {
                    registry.register(EventKind::Ready, |_| async {}).await;
                }
            })
            .await;

        events.emit(ClientEvent::Connect).await;
        assert!(events.has_handler(EventKind::Ready).await);
    }

    #[tokio::test]
    async fn test_eval_reply_is_single_use() {
        let reply = EvalReply::new(7, 99, OutboundSink::new(None));
        let shared = reply.clone();

        // No transport: the first send claims the slot and fails on the write
        assert!(matches!(
            reply.send(Ok(serde_json::json!(2))).await,
            Err(Error::NotConnected)
        ));
        assert!(shared.is_sent());
        assert!(matches!(
            shared.send(Ok(serde_json::json!(2))).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_preserves_push_order() {
        let events = EventHandler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        events
            .register(EventKind::ClusterStatusUpdate, move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    if let ClientEvent::ClusterStatusUpdate(status) = event {
                        sink.lock().await.push(status);
                    }
                }
            })
            .await;

        let queue = EventQueue::spawn(events);
        for status in [true, false, false, true] {
            queue.push(ClientEvent::ClusterStatusUpdate(status));
        }
        queue.flush().await;

        assert_eq!(*order.lock().await, vec![true, false, false, true]);
    }

    #[tokio::test]
    async fn test_queue_does_not_block_on_slow_handler() {
        let events = EventHandler::new();
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        events
            .register(EventKind::Ready, move |_| {
                let mut release = release_rx.clone();
                async move {
                    let _ = release.wait_for(|go| *go).await;
                }
            })
            .await;

        let queue = EventQueue::spawn(events);
        // Pushing returns while the handler is still parked
        queue.push(ClientEvent::Ready);
        queue.push(ClientEvent::Ready);

        release_tx.send_replace(true);
        queue.flush().await;
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::ClustersDataUpdate.name(), "clustersDataUpdate");
        assert_eq!(ClientEvent::Error(Error::NotConnected).kind(), EventKind::Error);
    }
}
