//! The target's handshake response.
//!
//! # Responsibilities
//! - Parse the response the target sends back to the forwarded upgrade
//! - Give filter hooks a mutable, order-preserving view of it
//! - Serialize whatever the hooks return, verbatim, for the client
//!
//! # Design Decisions
//! - 1xx, 204 and 304 responses never carry a body, so a `101` is always
//!   head-only and the tunnel bytes that follow it stay unread
//! - Header edits keep the position and casing of the line they replace

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::codec::{self, BodyFraming, CodecError, CodecLimits, RawHeader};

/// An HTTP/1.x response travelling from the target to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: Vec<RawHeader>,
    body: Bytes,
    /// The request was `HEAD`, so no body follows on the wire.
    head_request: bool,
}

impl HandshakeResponse {
    /// A fresh response with the canonical reason phrase and no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
            head_request: false,
        }
    }

    /// Read one response to a request made with `method`.
    pub async fn read_from<R>(
        reader: &mut R,
        method: &Method,
        limits: &CodecLimits,
    ) -> Result<Self, CodecError>
    where
        R: AsyncBufRead + Unpin,
    {
        let head = codec::read_head(reader, limits).await?;

        let mut parsed_headers = vec![httparse::EMPTY_HEADER; limits.max_headers];
        let mut parsed = httparse::Response::new(&mut parsed_headers);
        match parsed.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(CodecError::Malformed("incomplete response head".into()))
            }
            Err(e) => return Err(codec::map_parse_error(e, limits)),
        }

        let status = parsed
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| CodecError::Malformed("invalid status code".into()))?;
        let response = Self {
            version: codec::parse_version(parsed.version),
            status,
            reason: parsed.reason.unwrap_or_default().to_string(),
            headers: codec::raw_headers(&head, parsed.headers),
            body: Bytes::new(),
            head_request: method == Method::HEAD,
        };

        let framing = if response.is_bodiless() {
            BodyFraming::Empty
        } else {
            codec::body_framing(&response.headers, BodyFraming::UntilEof)?
        };
        let body = codec::read_body(reader, framing, limits).await?;

        Ok(Self { body, ..response })
    }

    /// Whether the message ends with its head, whatever its headers say.
    fn is_bodiless(&self) -> bool {
        self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
            || self.head_request
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// True for `101 Switching Protocols`.
    pub fn is_switching_protocols(&self) -> bool {
        self.status == StatusCode::SWITCHING_PROTOCOLS
    }

    /// Replace the status, resetting the reason phrase to the canonical one.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.reason = status.canonical_reason().unwrap_or_default().to_string();
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    /// Header lines in wire order and casing.
    pub fn raw_headers(&self) -> &[RawHeader] {
        &self.headers
    }

    /// An `http::HeaderMap` snapshot of the current headers.
    pub fn headers(&self) -> Result<HeaderMap, CodecError> {
        codec::header_map(&self.headers)
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_slice())
    }

    /// Set `name` to a single value. The first existing line keeps its place
    /// and casing; later duplicates are dropped.
    pub fn set_header(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.headers.iter().position(|h| h.is(name)) {
            Some(first) => {
                self.headers[first].value = value;
                let mut index = 0;
                self.headers.retain(|h| {
                    let keep = index <= first || !h.is(name);
                    index += 1;
                    keep
                });
            }
            None => self.headers.push(RawHeader::new(name, value)),
        }
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.headers.push(RawHeader::new(name, value));
    }

    /// Remove every line named `name`, returning how many were removed.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.is(name));
        before - self.headers.len()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the body. An existing `Content-Length` is kept in step.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        if self.header("content-length").is_some() {
            let len = self.body.len().to_string();
            self.set_header("content-length", len);
        }
    }

    /// Encode the response for the client.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(codec::version_str(self.version).as_bytes());
        out.extend_from_slice(format!(" {} ", self.status.as_u16()).as_bytes());
        out.extend_from_slice(self.reason.as_bytes());
        out.extend_from_slice(b"\r\n");

        let chunked = !self.is_bodiless()
            && matches!(
                codec::body_framing(&self.headers, BodyFraming::UntilEof),
                Ok(BodyFraming::Chunked)
            );
        codec::encode_tail(&mut out, &self.headers, &self.body, chunked);
        out
    }

    /// Write the response to `writer` and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        codec::write_all_flush(writer, &self.to_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCHING: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

    #[tokio::test]
    async fn switching_protocols_leaves_tunnel_bytes_unread() {
        let wire = [SWITCHING, &b"\x81\x05hello\r\n\r\n"[..]].concat();
        let mut input: &[u8] = &wire;
        let response = HandshakeResponse::read_from(&mut input, &Method::GET, &CodecLimits::default())
            .await
            .unwrap();

        assert!(response.is_switching_protocols());
        assert!(response.body().is_empty());
        assert_eq!(input, b"\x81\x05hello\r\n\r\n");
        assert_eq!(response.to_bytes(), SWITCHING);
    }

    #[tokio::test]
    async fn chunked_header_on_switching_protocols_adds_no_framing() {
        let wire = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Transfer-Encoding: chunked\r\n\r\n";
        let mut input: &[u8] = &[&wire[..], &b"\x81\x00"[..]].concat();
        let response = HandshakeResponse::read_from(&mut input, &Method::GET, &CodecLimits::default())
            .await
            .unwrap();

        assert_eq!(input, b"\x81\x00");
        assert_eq!(response.to_bytes(), wire);
    }

    #[tokio::test]
    async fn head_response_keeps_chunked_header_without_body() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut input: &[u8] = wire;
        let response = HandshakeResponse::read_from(&mut input, &Method::HEAD, &CodecLimits::default())
            .await
            .unwrap();
        assert_eq!(response.to_bytes(), wire);
    }

    #[tokio::test]
    async fn rejection_body_read_by_length() {
        let mut input: &[u8] = b"HTTP/1.1 403 Forbidden\r\nContent-Length: 4\r\n\r\nnope";
        let response = HandshakeResponse::read_from(&mut input, &Method::GET, &CodecLimits::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(&response.body()[..], b"nope");
    }

    #[tokio::test]
    async fn close_delimited_body() {
        let mut input: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\nno upgrade for you";
        let response = HandshakeResponse::read_from(&mut input, &Method::GET, &CodecLimits::default())
            .await
            .unwrap();
        assert_eq!(response.version(), Version::HTTP_10);
        assert_eq!(&response.body()[..], b"no upgrade for you");
    }

    #[test]
    fn set_header_replaces_in_place() {
        let mut response = HandshakeResponse::new(StatusCode::SWITCHING_PROTOCOLS);
        response.append_header("Upgrade", "websocket");
        response.append_header("X-Trace", "a");
        response.append_header("Connection", "Upgrade");
        response.append_header("x-trace", "b");

        response.set_header("X-TRACE", "c");
        assert_eq!(
            response.to_bytes(),
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nX-Trace: c\r\nConnection: Upgrade\r\n\r\n"
        );

        assert_eq!(response.remove_header("x-trace"), 1);
        assert_eq!(response.header("connection"), Some(&b"Upgrade"[..]));
    }

    #[test]
    fn set_body_keeps_content_length() {
        let mut response = HandshakeResponse::new(StatusCode::FORBIDDEN);
        response.append_header("Content-Length", "0");
        response.set_body("blocked");
        assert_eq!(response.header("content-length"), Some(&b"7"[..]));
        assert_eq!(
            response.to_bytes(),
            b"HTTP/1.1 403 Forbidden\r\nContent-Length: 7\r\n\r\nblocked"
        );
    }
}
