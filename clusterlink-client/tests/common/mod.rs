//! Common test utilities for clusterlink-client integration tests
//!
//! `MockAggregator` accepts WebSocket connections and hands each one to the
//! test as a `ServerConn`, so a test can script the aggregator side of the
//! protocol frame by frame.

#![allow(dead_code)]

use clusterlink_client::{ConnectionState, ShardClient};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// How long a test waits for anything before failing
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Mock aggregator for client testing
pub struct MockAggregator {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    connections: mpsc::Receiver<ServerConn>,
}

impl MockAggregator {
    /// Bind to an ephemeral port and start accepting
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Bind to `addr` and start accepting
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (conn_tx, connections) = mpsc::channel::<ServerConn>(16);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let conn_tx = conn_tx.clone();
                        tokio::spawn(async move {
                            if let Ok(ws) = accept_async(stream).await {
                                let _ = conn_tx.send(ServerConn { ws }).await;
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/connect", self.addr)
    }

    /// Wait for the client to open the next connection
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(TIMEOUT, self.connections.recv())
            .await
            .expect("Timed out waiting for a connection")
            .expect("Aggregator stopped")
    }

    /// Assert that no new connection arrives within `wait`
    pub async fn expect_no_connection(&mut self, wait: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(wait, self.connections.recv()).await {
            panic!("Unexpected reconnection");
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// The aggregator side of one accepted connection
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.expect("Failed to send frame");
    }

    /// Next frame of any kind, or `None` once the socket is gone
    pub async fn recv_raw(&mut self) -> Option<Message> {
        match tokio::time::timeout(TIMEOUT, self.ws.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            Ok(_) => None,
            Err(_) => panic!("Timed out waiting for a frame"),
        }
    }

    /// Next text frame, parsed as JSON
    pub async fn recv_json(&mut self) -> Value {
        loop {
            match self.recv_raw().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                other => panic!("Expected a text frame, got {:?}", other),
            }
        }
    }

    /// Read until the client's close frame and return its code
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            match self.recv_raw().await {
                Some(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Assert that the client sends nothing within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(message))) = tokio::time::timeout(wait, self.ws.next()).await {
            panic!("Unexpected frame: {:?}", message);
        }
    }

    /// Send HELLO, read IDENTIFY and send READY_ACK
    ///
    /// Returns the IDENTIFY frame.
    pub async fn handshake(&mut self) -> Value {
        self.send_json(hello(45_000)).await;
        let identify = self.recv_json().await;
        assert_eq!(identify["op"], 2);
        self.send_json(json!({"op": 1})).await;
        identify
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let _ = self.ws.send(Message::Close(Some(frame))).await;
    }
}

/// An address nothing listens on, at least until a test binds it
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `condition` until it holds
///
/// Handlers run on their own task, so their effects trail state changes.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if polled.is_err() {
        panic!("Timed out waiting for {}", what);
    }
}

pub fn hello(heartbeat_interval_ms: u64) -> Value {
    json!({"op": 0, "d": {"heartbeatIntervalMs": heartbeat_interval_ms}})
}

/// Wait until `client` reaches `state`
pub async fn wait_for(client: &ShardClient, state: ConnectionState) {
    tokio::time::timeout(TIMEOUT, client.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {:?}, still {:?}", state, client.state()))
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_aggregator_url() {
        let aggregator = MockAggregator::start().await;
        assert!(aggregator.url().starts_with("ws://127.0.0.1:"));
        assert!(aggregator.url().ends_with("/connect"));
        aggregator.shutdown().await;
    }

    #[test]
    fn test_hello_frame() {
        assert_eq!(hello(100), json!({"op": 0, "d": {"heartbeatIntervalMs": 100}}));
    }
}
