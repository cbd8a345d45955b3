//! WebSocket transport: one socket per connection attempt.
//!
//! A spawned task owns the socket. It performs the Upgrade handshake, then
//! multiplexes the read loop with an outbound queue so writes are serialized.
//! Everything the task observes is reported as a [`TransportEvent`] tagged
//! with the connection id, letting the owner discard events from connections
//! it has already replaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, FramedParts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use convo_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_FRAME_SIZE};

use crate::error::TransportError;
use crate::frame::{Message, MessageCodec, Role};
use crate::handshake::{
    build_request, find_head_end, generate_client_key, HandshakeResponse, WsUrl,
    MAX_RESPONSE_HEAD,
};

/// Any bidirectional byte stream the transport can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens the raw byte stream for a WebSocket URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &WsUrl) -> Result<BoxedStream, TransportError>;
}

/// Production connector: TCP, wrapped in rustls for `wss://`.
#[derive(Clone)]
pub struct TcpConnector {
    tls: TlsConnector,
}

impl TcpConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, url: &WsUrl) -> Result<BoxedStream, TransportError> {
        let tcp = TcpStream::connect(url.authority()).await?;
        tcp.set_nodelay(true)?;
        if !url.tls {
            return Ok(Box::new(tcp));
        }

        let domain = ServerName::try_from(url.host.clone())
            .map_err(|_| TransportError::InvalidUrl(format!("invalid tls server name: {}", url.host)))?;
        let stream = self.tls.connect(domain, tcp).await?;
        Ok(Box::new(stream))
    }
}

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Bound on connect + TLS + Upgrade.
    pub connect_timeout: Duration,
    /// Largest inbound message accepted.
    pub max_frame_size: usize,
    /// Split outgoing messages into frames of at most this many bytes.
    pub fragment_size: Option<usize>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            fragment_size: None,
        }
    }
}

/// What happened on a connection.
#[derive(Debug)]
pub enum TransportEventKind {
    /// The Upgrade completed; queued frames are being flushed.
    Opened,
    /// A complete text message.
    Message(String),
    /// The peer closed the connection or the stream ended.
    Closed { code: Option<u16>, reason: String },
    /// The connection failed and the task has stopped.
    Error(TransportError),
}

#[derive(Debug)]
pub struct TransportEvent {
    pub connection_id: u64,
    pub kind: TransportEventKind,
}

enum Outbound {
    Text(String),
    Close,
}

/// Handle to one connection's socket task.
pub struct Transport {
    connection_id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    opened: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Transport {
    /// Spawn the socket task and start connecting.
    pub fn open(
        connection_id: u64,
        url: WsUrl,
        options: TransportOptions,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let opened = Arc::new(AtomicBool::new(false));

        let task = SocketTask {
            connection_id,
            url,
            options,
            connector,
            events,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            opened: Arc::clone(&opened),
        };
        tokio::spawn(task.run());

        Self {
            connection_id,
            outbound: outbound_tx,
            cancel,
            opened,
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Queue a text frame. Frames queued before the Upgrade completes are
    /// sent in order once it does. No-op after [`Transport::disconnect`].
    pub fn send_text(&self, text: String) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("connection {} closed, dropping outbound frame", self.connection_id);
            return;
        }
        let _ = self.outbound.send(Outbound::Text(text));
    }

    /// Close the connection. An open socket gets a close frame after any
    /// queued frames; a connection still being established is abandoned.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.opened.load(Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
        } else {
            self.cancel.cancel();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // An open socket drains its queue and closes once the sender is gone.
        if !self.opened.load(Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }
}

struct SocketTask {
    connection_id: u64,
    url: WsUrl,
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    opened: Arc<AtomicBool>,
}

impl SocketTask {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            connection_id: self.connection_id,
            kind,
        });
    }

    async fn run(mut self) {
        let timeout = self.options.connect_timeout;
        let established = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("connection {} cancelled before upgrade", self.connection_id);
                return;
            }
            result = tokio::time::timeout(timeout, establish(self.connector.as_ref(), &self.url, &self.options)) => result,
        };

        let framed = match established {
            Ok(Ok(framed)) => framed,
            Ok(Err(e)) => {
                warn!("connection {} to {} failed: {e}", self.connection_id, self.url.authority());
                self.emit(TransportEventKind::Error(e));
                return;
            }
            Err(_) => {
                warn!("connection {} timed out after {timeout:?}", self.connection_id);
                self.emit(TransportEventKind::Error(TransportError::Timeout(format!(
                    "websocket upgrade did not complete within {timeout:?}"
                ))));
                return;
            }
        };

        info!("connection {} opened to {}", self.connection_id, self.url.authority());
        self.opened.store(true, Ordering::SeqCst);
        self.emit(TransportEventKind::Opened);

        let (mut sink, mut stream) = framed.split();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            self.emit(TransportEventKind::Error(e.into()));
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        debug!("connection {} closing", self.connection_id);
                        let _ = sink.send(Message::close(1000, "")).await;
                        let _ = sink.close().await;
                        return;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.emit(TransportEventKind::Message(text)),
                    Some(Ok(Message::Binary(data))) => {
                        debug!("ignoring {}-byte binary message", data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            self.emit(TransportEventKind::Error(e.into()));
                            return;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match &frame {
                            Some(f) => (Some(f.code), f.reason.clone()),
                            None => (None, String::new()),
                        };
                        info!("connection {} closed by server (code {code:?})", self.connection_id);
                        let _ = sink.send(Message::Close(frame)).await;
                        self.emit(TransportEventKind::Closed { code, reason });
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("connection {} read failed: {e}", self.connection_id);
                        self.emit(TransportEventKind::Error(e.into()));
                        return;
                    }
                    None => {
                        info!("connection {} reached end of stream", self.connection_id);
                        self.emit(TransportEventKind::Closed {
                            code: None,
                            reason: "EOF".into(),
                        });
                        return;
                    }
                },
            }
        }
    }
}

/// Connect, send the Upgrade request and validate the response. Bytes that
/// arrive after the response head are handed to the framed reader.
async fn establish(
    connector: &dyn Connector,
    url: &WsUrl,
    options: &TransportOptions,
) -> Result<Framed<BoxedStream, MessageCodec>, TransportError> {
    let mut stream = connector.connect(url).await?;

    let key = generate_client_key();
    stream.write_all(build_request(url, &key).as_bytes()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(TransportError::Handshake("response head too large".into()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during websocket upgrade",
            )));
        }
    };

    let head = buf.split_to(head_end);
    let response = HandshakeResponse::parse(&head)?;
    response.validate(&key)?;
    debug!("websocket upgrade accepted by {}", url.authority());

    let mut codec = MessageCodec::new(Role::Client).with_max_frame_size(options.max_frame_size);
    if let Some(size) = options.fragment_size {
        codec = codec.with_fragment_size(size);
    }
    let mut parts = FramedParts::new::<Message>(stream, codec);
    parts.read_buf = buf;
    Ok(Framed::from_parts(parts))
}
