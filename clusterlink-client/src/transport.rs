//! Outbound half of the WebSocket
//!
//! The write half of the current socket is shared between the connection
//! driver (IDENTIFY, pongs, close frames) and the public API (stats, logs,
//! remote evals). It lives behind a mutex so frames are never interleaved,
//! and it is `None` whenever no transport is open.
//!
//! A freshly installed transport only carries handshake traffic. Frames
//! written through [`OutboundSink::send_ready`] are refused until the driver
//! marks the link ready, and the check happens under the same lock as the
//! write.

use crate::metrics::ClientMetrics;
use clusterlink_core::{codec, Error, OpCode, Result};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Close reasons are limited to 123 bytes by the WebSocket framing
const MAX_CLOSE_REASON: usize = 123;

#[derive(Default)]
struct Link {
    sink: Option<WsSink>,
    ready: bool,
}

#[derive(Clone)]
pub(crate) struct OutboundSink {
    inner: Arc<Mutex<Link>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl OutboundSink {
    pub(crate) fn new(metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Link::default())),
            metrics,
        }
    }

    pub(crate) async fn install(&self, sink: WsSink) {
        let mut link = self.inner.lock().await;
        link.sink = Some(sink);
        link.ready = false;
    }

    /// Open the current transport to application frames
    pub(crate) async fn mark_ready(&self) {
        let mut link = self.inner.lock().await;
        link.ready = link.sink.is_some();
    }

    pub(crate) async fn clear(&self) {
        let mut link = self.inner.lock().await;
        link.sink = None;
        link.ready = false;
    }

    #[cfg(test)]
    pub(crate) async fn is_open(&self) -> bool {
        self.inner.lock().await.sink.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn is_ready(&self) -> bool {
        self.inner.lock().await.ready
    }

    /// Encode a payload under `op` and send it on any open transport
    pub(crate) async fn send<T: Serialize + ?Sized>(&self, op: OpCode, payload: &T) -> Result<()> {
        self.send_frame(op, payload, false).await
    }

    /// Like [`send`](Self::send), but only on a transport marked ready
    pub(crate) async fn send_ready<T: Serialize + ?Sized>(
        &self,
        op: OpCode,
        payload: &T,
    ) -> Result<()> {
        self.send_frame(op, payload, true).await
    }

    pub(crate) async fn send_message(&self, message: Message) -> Result<()> {
        self.write(message, false).await
    }

    async fn send_frame<T: Serialize + ?Sized>(
        &self,
        op: OpCode,
        payload: &T,
        require_ready: bool,
    ) -> Result<()> {
        let frame = codec::encode(op, payload)?;
        self.write(Message::Text(frame), require_ready).await?;

        if let Some(ref metrics) = self.metrics {
            metrics.record_frame_sent(op.name());
        }
        tracing::trace!(op = %op, "Frame sent");
        Ok(())
    }

    async fn write(&self, message: Message, require_ready: bool) -> Result<()> {
        let mut link = self.inner.lock().await;
        if require_ready && !link.ready {
            return Err(Error::NotConnected);
        }
        let sink = link.sink.as_mut().ok_or(Error::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    /// Send a close frame and drop the write half
    ///
    /// Errors are logged, not returned: the socket is going away either way.
    pub(crate) async fn close(&self, code: u16, reason: &str) {
        let taken = {
            let mut link = self.inner.lock().await;
            link.ready = false;
            link.sink.take()
        };
        let Some(mut sink) = taken else {
            return;
        };

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(truncate_reason(reason).to_string()),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, code, "Failed to send close frame");
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Failed to close sink");
        }
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, connect_async};

    /// A connected client write half and the server end of the same socket
    async fn socket_pair() -> (WsSink, WebSocketStream<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/connect", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });

        let (client, _) = connect_async(url).await.unwrap();
        let (sink, _) = client.split();
        (sink, server.await.unwrap())
    }

    async fn next_json(server: &mut WebSocketStream<TcpStream>) -> Value {
        match server.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_application_frames_wait_for_ready() {
        let (half, mut server) = socket_pair().await;
        let sink = OutboundSink::new(None);
        sink.install(half).await;

        let early = sink.send_ready(OpCode::Log, "early").await;
        assert!(matches!(early, Err(Error::NotConnected)));

        sink.send(OpCode::Identify, &json!({"token": "t"})).await.unwrap();
        sink.mark_ready().await;
        sink.send_ready(OpCode::Log, "late").await.unwrap();

        assert_eq!(next_json(&mut server).await["op"], 2);
        assert_eq!(next_json(&mut server).await, json!({"op": 5, "d": "late"}));
    }

    #[tokio::test]
    async fn test_new_transport_starts_unready() {
        let (first, _server1) = socket_pair().await;
        let (second, _server2) = socket_pair().await;
        let sink = OutboundSink::new(None);

        sink.install(first).await;
        sink.mark_ready().await;
        assert!(sink.is_ready().await);

        sink.install(second).await;
        assert!(!sink.is_ready().await);
        let result = sink.send_ready(OpCode::Stats, &json!({})).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_mark_ready_without_transport() {
        let sink = OutboundSink::new(None);
        sink.mark_ready().await;
        assert!(!sink.is_ready().await);
    }

    #[tokio::test]
    async fn test_send_without_transport() {
        let sink = OutboundSink::new(None);
        assert!(!sink.is_open().await);

        let result = sink.send(OpCode::Log, "hello").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_without_transport_is_noop() {
        let sink = OutboundSink::new(None);
        sink.close(1000, "bye").await;
        assert!(!sink.is_open().await);
    }

    #[test]
    fn test_truncate_reason() {
        assert_eq!(truncate_reason("short"), "short");

        let long = "x".repeat(200);
        assert_eq!(truncate_reason(&long).len(), MAX_CLOSE_REASON);

        // Never split a multi-byte character
        let wide = "é".repeat(100);
        let truncated = truncate_reason(&wide);
        assert!(truncated.len() <= MAX_CLOSE_REASON);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
