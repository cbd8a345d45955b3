//! HTTP/1.1 Upgrade handshake (RFC 6455 section 4).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::TransportError;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the upgrade response head.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// `base64(SHA1(key + GUID))`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Random 16-byte nonce, base64 encoded.
pub fn generate_client_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// Parsed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    /// Path plus query, never empty.
    pub resource: String,
    pub tls: bool,
}

impl WsUrl {
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let url = url::Url::parse(input)
            .map_err(|e| TransportError::InvalidUrl(format!("{input}: {e}")))?;

        let tls = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl(format!("{input}: missing host")))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });

        let mut resource = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            host,
            port,
            resource,
            tls,
        })
    }

    fn is_default_port(&self) -> bool {
        self.port == if self.tls { 443 } else { 80 }
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        if self.is_default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the `Origin` header: the HTTP(S) origin of the same host.
    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    /// `host:port` for the TCP connect.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the Upgrade request.
pub fn build_request(url: &WsUrl, client_key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Origin: {}\r\n\
         \r\n",
        url.resource,
        url.host_header(),
        client_key,
        url.origin()
    )
}

/// First line of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub message: String,
}

/// Parse `HTTP/1.x NNN [message]`.
pub fn parse_status_line(line: &str) -> Result<StatusLine, TransportError> {
    let bad = || TransportError::Handshake(format!("unexpected status line: {line:?}"));

    let rest = line.strip_prefix("HTTP/1.").ok_or_else(bad)?;
    let mut chars = rest.chars();
    match chars.next() {
        Some('0') | Some('1') => {}
        _ => return Err(bad()),
    }
    let rest = chars.as_str().strip_prefix(' ').ok_or_else(bad)?;

    let code_str = rest.get(..3).ok_or_else(bad)?;
    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let code: u16 = code_str.parse().map_err(|_| bad())?;

    let message = match &rest[3..] {
        "" => String::new(),
        tail => tail.strip_prefix(' ').ok_or_else(bad)?.to_string(),
    };

    Ok(StatusLine { code, message })
}

/// Split a `Name: value` header line.
pub fn parse_header(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

/// Position just past the blank line ending the response head, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parsed upgrade response head.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub status: StatusLine,
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// Parse the response head (everything up to and including the blank line).
    pub fn parse(head: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| TransportError::Handshake("response head is not utf-8".into()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| TransportError::Handshake("received no reply from server".into()))?;
        let status = parse_status_line(status_line)?;

        let headers = lines
            .take_while(|l| !l.is_empty())
            .filter_map(parse_header)
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        Ok(Self { status, headers })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check the response against the key we sent.
    ///
    /// 401 is reported as [`TransportError::Unauthorized`] so the caller can
    /// route it to credential refresh instead of reconnecting.
    pub fn validate(&self, client_key: &str) -> Result<(), TransportError> {
        match self.status.code {
            101 => {}
            401 => {
                return Err(TransportError::Unauthorized {
                    status: 401,
                    message: self.status.message.clone(),
                })
            }
            code => {
                return Err(TransportError::Handshake(format!(
                    "unexpected code {code}, {}",
                    self.status.message
                )))
            }
        }

        let accept = self
            .header("Sec-WebSocket-Accept")
            .ok_or_else(|| TransportError::Handshake("no Sec-WebSocket-Accept header".into()))?;
        if accept != compute_accept_key(client_key) {
            return Err(TransportError::Handshake(
                "bad Sec-WebSocket-Accept header value".into(),
            ));
        }
        Ok(())
    }
}
