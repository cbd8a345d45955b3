//! Shared test utilities: an in-memory realtime server and recording
//! collaborators for the conversation monitor.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, FramedParts};

use convo_services::{
    AuthenticationCallback, AuthenticationDelegate, AuthenticationError, ConversationMonitor,
    ConversationMonitorBuilder, MonitorEvent,
};
use convo_socket::handshake::{compute_accept_key, find_head_end, parse_header, WsUrl};
use convo_socket::{BayeuxMessage, BoxedStream, Connector, Message, MessageCodec, Role, TransportError};

pub const APP_ID: &str = "app1";
pub const APP_USER_ID: &str = "user1";
pub const CLIENT_ID: &str = "client-1";
pub const USER_CHANNEL: &str = "/sdk/apps/app1/appusers/user1";
pub const WAIT: Duration = Duration::from_secs(5);

/// Hands the server half of each connection to the test. Connections past
/// `limit` are refused as if nothing listened on the port.
pub struct DuplexConnector {
    calls: AtomicUsize,
    limit: usize,
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::accepting(usize::MAX)
    }

    pub fn accepting(limit: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                limit,
                accepted: tx,
            }),
            rx,
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _url: &WsUrl) -> Result<BoxedStream, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.limit {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        let (client, server) = tokio::io::duplex(1 << 20);
        let _ = self.accepted.send(server);
        Ok(Box::new(client))
    }
}

/// Forwards every invalid-auth notification to the test.
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<(AuthenticationError, AuthenticationCallback)>,
}

impl ChannelDelegate {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(AuthenticationError, AuthenticationCallback)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl AuthenticationDelegate for ChannelDelegate {
    fn on_invalid_auth(&self, error: AuthenticationError, callback: AuthenticationCallback) {
        let _ = self.tx.send((error, callback));
    }
}

/// Monitor builder wired to the in-memory server.
pub fn test_builder(connector: Arc<DuplexConnector>) -> ConversationMonitorBuilder {
    ConversationMonitor::builder()
        .app_id(APP_ID)
        .app_user_id(APP_USER_ID)
        .client_id(CLIENT_ID)
        .host("http://realtime.test")
        .jwt("token-1")
        .max_connection_attempts(3)
        .retry_interval(Duration::from_secs(5))
        .connector(connector)
}

pub async fn next_connection(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Wait for the next monitor event matching `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<MonitorEvent>, mut pred: F) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for monitor event")
}

async fn read_upgrade_key(stream: &mut DuplexStream) -> String {
    let mut buf = BytesMut::new();
    let end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        let n = stream.read_buf(&mut buf).await.expect("read upgrade request");
        assert!(n > 0, "client closed before sending upgrade request");
    };
    let head = String::from_utf8(buf[..end].to_vec()).expect("utf-8 request");
    head.split("\r\n")
        .filter_map(parse_header)
        .find(|(name, _)| name.eq_ignore_ascii_case("Sec-WebSocket-Key"))
        .map(|(_, value)| value.to_string())
        .expect("missing Sec-WebSocket-Key")
}

/// Answer the Upgrade with 401.
pub async fn reject_unauthorized(mut stream: DuplexStream) {
    read_upgrade_key(&mut stream).await;
    stream
        .write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n")
        .await
        .expect("write 401");
}

/// Server side of one accepted connection.
pub struct FakeServer {
    framed: Framed<DuplexStream, MessageCodec>,
}

impl FakeServer {
    pub async fn accept(mut stream: DuplexStream) -> Self {
        let key = read_upgrade_key(&mut stream).await;
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(&key)
        );
        stream.write_all(response.as_bytes()).await.expect("write 101");
        let parts = FramedParts::new::<Message>(stream, MessageCodec::new(Role::Server));
        Self {
            framed: Framed::from_parts(parts),
        }
    }

    /// Next Bayeux message from the client, asserting its channel.
    pub async fn expect_channel(&mut self, channel: &str) -> BayeuxMessage {
        loop {
            let next = tokio::time::timeout(WAIT, self.framed.next())
                .await
                .expect("timed out waiting for client frame");
            match next {
                Some(Ok(Message::Text(text))) => {
                    let mut batch: Vec<BayeuxMessage> =
                        serde_json::from_str(&text).expect("bayeux batch");
                    let msg = batch.remove(0);
                    assert_eq!(msg.channel, channel);
                    return msg;
                }
                Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.framed
            .send(Message::Text(value.to_string()))
            .await
            .expect("server send");
    }

    /// Handshake, connect and subscribe. Returns the subscribe request.
    pub async fn complete_session(&mut self, bayeux_client_id: &str) -> BayeuxMessage {
        self.expect_channel("/meta/handshake").await;
        self.send_json(json!([{
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": bayeux_client_id
        }]))
        .await;
        self.expect_channel("/meta/connect").await;
        let subscribe = self.expect_channel("/meta/subscribe").await;
        self.send_json(json!([{
            "channel": "/meta/subscribe",
            "successful": true,
            "subscription": USER_CHANNEL
        }]))
        .await;
        subscribe
    }

    /// Publish `events` on the user channel.
    pub async fn publish_events(&mut self, events: Value) {
        self.send_json(json!([{
            "channel": USER_CHANNEL,
            "data": { "events": events }
        }]))
        .await;
    }

    pub async fn close(&mut self) {
        self.framed
            .send(Message::close(1000, "bye"))
            .await
            .expect("server close");
    }
}
