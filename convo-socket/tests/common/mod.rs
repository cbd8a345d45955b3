//! Shared test utilities: in-memory connectors and a scripted WebSocket /
//! Bayeux server running over `tokio::io::duplex`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, FramedParts};

use convo_socket::handshake::{compute_accept_key, find_head_end, parse_header, WsUrl};
use convo_socket::{
    BayeuxEvent, BayeuxMessage, BoxedStream, Connector, Frame, FrameCodec, Message, MessageCodec,
    Role, TransportError,
};

pub const TEST_URL: &str = "ws://realtime.test/faye";
pub const TEST_CHANNEL: &str = "/sdk/apps/app1/appusers/user1";
pub const WAIT: Duration = Duration::from_secs(5);

/// Hands the server half of every connection to the test.
pub struct DuplexConnector {
    calls: AtomicUsize,
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                calls: AtomicUsize::new(0),
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(1 << 20);
        let _ = self.accepted.send(server);
        Ok(Box::new(client))
    }
}

/// Fails every connection as if nothing listens on the port.
#[derive(Default)]
pub struct RefusingConnector {
    calls: AtomicUsize,
}

impl RefusingConnector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self, _url: &WsUrl) -> Result<BoxedStream, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )))
    }
}

/// Read the client's Upgrade request head and return its `Sec-WebSocket-Key`.
pub async fn read_upgrade_request(stream: &mut DuplexStream) -> (String, String) {
    let mut buf = BytesMut::new();
    let end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        let n = stream.read_buf(&mut buf).await.expect("read upgrade request");
        assert!(n > 0, "client closed before sending upgrade request");
    };
    let head = String::from_utf8(buf[..end].to_vec()).expect("utf-8 request");
    let key = head
        .split("\r\n")
        .filter_map(parse_header)
        .find(|(name, _)| name.eq_ignore_ascii_case("Sec-WebSocket-Key"))
        .map(|(_, value)| value.to_string())
        .expect("missing Sec-WebSocket-Key");
    (head, key)
}

/// Answer the Upgrade with 401.
pub async fn reject_unauthorized(mut stream: DuplexStream) {
    read_upgrade_request(&mut stream).await;
    stream
        .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n")
        .await
        .expect("write 401");
}

/// Server side of one accepted WebSocket connection.
pub struct ServerConn {
    framed: Framed<DuplexStream, MessageCodec>,
    pub request_head: String,
}

impl ServerConn {
    /// Complete the Upgrade, optionally appending raw bytes right after the
    /// response head.
    pub async fn accept_with(mut stream: DuplexStream, trailing: &[u8]) -> Self {
        let (request_head, key) = read_upgrade_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(&key)
        );
        let mut out = response.into_bytes();
        out.extend_from_slice(trailing);
        stream.write_all(&out).await.expect("write 101");

        let parts = FramedParts::new::<Message>(stream, MessageCodec::new(Role::Server));
        Self {
            framed: Framed::from_parts(parts),
            request_head,
        }
    }

    pub async fn accept(stream: DuplexStream) -> Self {
        Self::accept_with(stream, &[]).await
    }

    /// Next message from the client, pongs included.
    pub async fn next_raw(&mut self) -> Option<Message> {
        let next = tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for client frame");
        match next {
            Some(Ok(msg)) => Some(msg),
            Some(Err(e)) => panic!("client sent a bad frame: {e}"),
            None => None,
        }
    }

    /// Next message from the client, skipping pongs.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.next_raw().await {
                Some(Message::Pong(_)) => continue,
                other => return other,
            }
        }
    }

    /// Next text frame, parsed as a Bayeux batch.
    pub async fn recv_bayeux(&mut self) -> Vec<BayeuxMessage> {
        match self.next_message().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).expect("bayeux batch"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Next single Bayeux message, asserting its channel.
    pub async fn expect_channel(&mut self, channel: &str) -> BayeuxMessage {
        let mut batch = self.recv_bayeux().await;
        assert_eq!(batch.len(), 1, "expected one message per frame");
        let msg = batch.remove(0);
        assert_eq!(msg.channel, channel);
        msg
    }

    pub async fn send(&mut self, message: Message) {
        self.framed.send(message).await.expect("server send");
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send(Message::Text(value.to_string())).await;
    }

    /// Run the standard handshake/connect/subscribe exchange and return the
    /// subscribe request the client sent.
    pub async fn complete_session(&mut self, client_id: &str) -> BayeuxMessage {
        self.expect_channel("/meta/handshake").await;
        self.send_json(json!([{
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": client_id,
            "version": "1.0",
            "supportedConnectionTypes": ["websocket"]
        }]))
        .await;
        let connect = self.expect_channel("/meta/connect").await;
        assert_eq!(connect.client_id.as_deref(), Some(client_id));
        let subscribe = self.expect_channel("/meta/subscribe").await;
        self.send_json(json!([{
            "channel": "/meta/subscribe",
            "successful": true,
            "clientId": client_id,
            "subscription": subscribe.subscription.clone()
        }]))
        .await;
        subscribe
    }

    /// Switch to reading individual frames, keeping anything already buffered.
    pub fn into_frames(self) -> Framed<DuplexStream, FrameCodec> {
        let parts = self.framed.into_parts();
        let mut frames = FramedParts::new::<Frame>(parts.io, FrameCodec::new(Role::Server));
        frames.read_buf = parts.read_buf;
        Framed::from_parts(frames)
    }

    pub fn into_stream(self) -> DuplexStream {
        self.framed.into_inner()
    }
}

/// Wait for the next server half handed out by a [`DuplexConnector`].
pub async fn next_connection(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Wait for the next event matching `pred`, skipping others.
pub async fn wait_for_event<F>(rx: &mut mpsc::UnboundedReceiver<BayeuxEvent>, mut pred: F) -> BayeuxEvent
where
    F: FnMut(&BayeuxEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn test_ext() -> convo_socket::Extension {
    json!({"appId": "app1", "appUserId": "user1", "jwt": "token-1"})
        .as_object()
        .cloned()
        .expect("object")
}
