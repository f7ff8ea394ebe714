//! HTTP/1.1 upgrade handshake for both roles.
//!
//! ```text
//!  client                                   server
//!    │ GET path  Sec-WebSocket-Key: K          │
//!    │────────────────────────────────────────▶│
//!    │ 101  Sec-WebSocket-Accept: A            │
//!    │◀────────────────────────────────────────│
//!    A = base64(sha1(K ++ GUID))
//! ```

use core::fmt;

use crate::adapters::crypto;

/// Fixed GUID appended to the key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Status line is not `HTTP/1.1 101`.
    BadStatus,
    /// Request line is not a `GET ... HTTP/1.1`.
    BadRequestLine,
    MissingUpgrade,
    MissingConnection,
    MissingKey,
    UnsupportedVersion,
    /// `Sec-WebSocket-Accept` absent or not matching the sent key.
    AcceptMismatch,
    /// Header block not valid UTF-8.
    Malformed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadStatus => write!(f, "status is not 101"),
            Self::BadRequestLine => write!(f, "bad request line"),
            Self::MissingUpgrade => write!(f, "missing Upgrade: websocket"),
            Self::MissingConnection => write!(f, "missing Connection: upgrade"),
            Self::MissingKey => write!(f, "missing Sec-WebSocket-Key"),
            Self::UnsupportedVersion => write!(f, "unsupported Sec-WebSocket-Version"),
            Self::AcceptMismatch => write!(f, "Sec-WebSocket-Accept mismatch"),
            Self::Malformed => write!(f, "malformed header block"),
        }
    }
}

/// Random 16-byte nonce, base64 encoded.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    crypto::fill_random(&mut nonce);
    crypto::base64_encode(&nonce)
}

pub fn accept_key(key: &str) -> String {
    let mut input = String::with_capacity(key.len() + WS_GUID.len());
    input.push_str(key);
    input.push_str(WS_GUID);
    crypto::base64_encode(&crypto::sha1(input.as_bytes()))
}

/// Offset just past the blank line ending the header block, if present.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|p| p + HEADER_END.len())
}

pub fn client_request(host: &str, port: u16, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Cache-Control: no-cache\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: {key}\r\n\r\n"
    )
}

pub fn server_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: upgrade\r\n\
         Upgrade: websocket\r\n\
         Content-Length: 0\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

// ── Header parsing ───────────────────────────────────────────

struct Head<'a> {
    first: &'a str,
    lines: Vec<(&'a str, &'a str)>,
}

impl<'a> Head<'a> {
    fn parse(block: &'a [u8]) -> Result<Self, HandshakeError> {
        let text = core::str::from_utf8(block).map_err(|_| HandshakeError::Malformed)?;
        let mut it = text.split("\r\n");
        let first = it.next().unwrap_or_default();
        let lines = it
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        Ok(Self { first, lines })
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.lines
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Check a server's upgrade response against the key we sent.
pub fn validate_server_response(block: &[u8], key: &str) -> Result<(), HandshakeError> {
    let head = Head::parse(block)?;
    let mut status = head.first.split_whitespace();
    if status.next() != Some("HTTP/1.1") || status.next() != Some("101") {
        return Err(HandshakeError::BadStatus);
    }
    if !head.has_token("Upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !head.has_token("Connection", "upgrade") {
        return Err(HandshakeError::MissingConnection);
    }
    match head.get("Sec-WebSocket-Accept") {
        Some(a) if a == accept_key(key) => Ok(()),
        _ => Err(HandshakeError::AcceptMismatch),
    }
}

/// Validated client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub path: String,
    pub key: String,
}

/// Validate an inbound upgrade request; the caller answers with
/// [`server_response`] over [`accept_key`] of the returned key.
pub fn parse_client_request(block: &[u8]) -> Result<ClientRequest, HandshakeError> {
    let head = Head::parse(block)?;
    let mut req = head.first.split_whitespace();
    let (Some("GET"), Some(path), Some("HTTP/1.1")) = (req.next(), req.next(), req.next()) else {
        return Err(HandshakeError::BadRequestLine);
    };
    if !head.has_token("Upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !head.has_token("Connection", "upgrade") {
        return Err(HandshakeError::MissingConnection);
    }
    if head.get("Sec-WebSocket-Version") != Some("13") {
        return Err(HandshakeError::UnsupportedVersion);
    }
    let key = head
        .get("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;
    Ok(ClientRequest {
        path: path.to_owned(),
        key: key.to_owned(),
    })
}
