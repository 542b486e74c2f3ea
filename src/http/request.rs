//! The inbound upgrade request.
//!
//! # Responsibilities
//! - Parse one request head and body from the client connection
//! - Expose an `http::HeaderMap` view for upgrade detection
//! - Re-serialize the request for the target without touching header order,
//!   header casing, `Sec-WebSocket-*` values or the body
//!
//! # Design Decisions
//! - Headers are kept as raw lines; the `HeaderMap` is a read-only view
//! - Absolute-form targets are sent in origin-form; everything else is verbatim

use bytes::Bytes;
use http::uri::Authority;
use http::{HeaderMap, Method, Uri, Version};
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::codec::{self, BodyFraming, CodecError, CodecLimits, RawHeader};

/// An HTTP/1.x request as received from the client.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    method: Method,
    target: String,
    version: Version,
    raw_headers: Vec<RawHeader>,
    headers: HeaderMap,
    body: Bytes,
}

impl UpgradeRequest {
    /// Read one request from `reader`. Bytes after the request stay buffered.
    pub async fn read_from<R>(reader: &mut R, limits: &CodecLimits) -> Result<Self, CodecError>
    where
        R: AsyncBufRead + Unpin,
    {
        let head = codec::read_head(reader, limits).await?;

        let mut parsed_headers = vec![httparse::EMPTY_HEADER; limits.max_headers];
        let mut parsed = httparse::Request::new(&mut parsed_headers);
        match parsed.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(CodecError::Malformed("incomplete request head".into()))
            }
            Err(e) => return Err(codec::map_parse_error(e, limits)),
        }

        let method = parsed
            .method
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .ok_or_else(|| CodecError::Malformed("invalid method".into()))?;
        let target = parsed
            .path
            .ok_or_else(|| CodecError::Malformed("missing request target".into()))?
            .to_string();
        let version = codec::parse_version(parsed.version);
        let raw_headers = codec::raw_headers(&head, parsed.headers);
        let headers = codec::header_map(&raw_headers)?;

        let framing = codec::body_framing(&raw_headers, BodyFraming::Empty)?;
        let body = codec::read_body(reader, framing, limits).await?;

        Ok(Self {
            method,
            target,
            version,
            raw_headers,
            headers,
            body,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as the client sent it.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Header view used for detection and routing decisions.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header lines in wire order and casing.
    pub fn raw_headers(&self) -> &[RawHeader] {
        &self.raw_headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The authority of an absolute-form target, if the client used one.
    fn absolute_authority(&self) -> Option<Authority> {
        if self.target.starts_with('/') {
            return None;
        }
        self.target
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().cloned())
    }

    /// Where the request wants to go: the absolute-form authority if present,
    /// otherwise the `Host` header.
    pub fn authority(&self) -> Option<Authority> {
        self.absolute_authority().or_else(|| {
            self.headers
                .get(http::header::HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.trim().parse::<Authority>().ok())
        })
    }

    /// Path and query of the target, as sent to the origin.
    pub fn origin_form(&self) -> String {
        if self.target.starts_with('/') || self.target == "*" {
            return self.target.clone();
        }
        self.target
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.path_and_query().map(|pq| pq.as_str().to_string()))
            .filter(|pq| !pq.is_empty())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Encode the request as it is forwarded to the target.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.origin_form().as_bytes());
        out.push(b' ');
        out.extend_from_slice(codec::version_str(self.version).as_bytes());
        out.extend_from_slice(b"\r\n");

        if !self.raw_headers.iter().any(|h| h.is("host")) {
            if let Some(authority) = self.absolute_authority() {
                codec::encode_header(&mut out, "Host", authority.as_str().as_bytes());
            }
        }

        let chunked = matches!(
            codec::body_framing(&self.raw_headers, BodyFraming::Empty),
            Ok(BodyFraming::Chunked)
        );
        codec::encode_tail(&mut out, &self.raw_headers, &self.body, chunked);
        out
    }

    /// Write the request to `writer` and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        codec::write_all_flush(writer, &self.to_bytes()).await
    }
}
