//! HTTP/1.1 message framing shared by requests and responses.
//!
//! Heads are read line by line from an `AsyncBufRead`, so a reader is never
//! advanced past the end of the message it was asked for. Whatever is still
//! buffered afterwards belongs to the next protocol on the wire.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Version};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest chunk-size line accepted while decoding a chunked body.
const MAX_CHUNK_LINE: u64 = 4096;

/// Errors produced while reading an HTTP/1.1 message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed before a message started")]
    ConnectionClosed,

    #[error("connection closed in the middle of a message")]
    UnexpectedEof,

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("message has more than {0} headers")]
    TooManyHeaders(usize),

    #[error("message body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported transfer-encoding '{0}'")]
    UnsupportedTransferEncoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<httparse::Error> for CodecError {
    fn from(err: httparse::Error) -> Self {
        CodecError::Malformed(err.to_string())
    }
}

/// Parser limits applied to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    pub max_head_bytes: usize,
    pub max_headers: usize,
    pub max_body_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_headers: 100,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// One header line exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub name: String,
    pub value: Vec<u8>,
    /// Bytes from the colon up to the value, `": "` for lines built locally.
    separator: Vec<u8>,
    /// Whitespace between the value and the line end.
    trailing: Vec<u8>,
}

impl RawHeader {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            separator: b": ".to_vec(),
            trailing: Vec::new(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.separator);
        out.extend_from_slice(&self.value);
        out.extend_from_slice(&self.trailing);
        out.extend_from_slice(b"\r\n");
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// How the body of a message is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilEof,
}

/// Read one message head, including the terminating blank line.
///
/// Leading empty lines are skipped as RFC 9112 allows.
pub(crate) async fn read_head<R>(reader: &mut R, limits: &CodecLimits) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let start = head.len();
        let remaining = (limits.max_head_bytes - start) as u64 + 1;
        let n = (&mut *reader)
            .take(remaining)
            .read_until(b'\n', &mut head)
            .await?;

        if n == 0 {
            return Err(if head.is_empty() {
                CodecError::ConnectionClosed
            } else {
                CodecError::UnexpectedEof
            });
        }
        if head.len() > limits.max_head_bytes {
            return Err(CodecError::HeadTooLarge(limits.max_head_bytes));
        }
        if !head.ends_with(b"\n") {
            return Err(CodecError::UnexpectedEof);
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

/// Convert parsed headers, keeping each line's spacing as found in `head`.
pub(crate) fn raw_headers(head: &[u8], parsed: &[httparse::Header<'_>]) -> Vec<RawHeader> {
    parsed
        .iter()
        .map(|h| {
            let mut header = RawHeader::new(h.name, h.value);
            if let Some((separator, trailing)) = line_spacing(head, h) {
                header.separator = separator.to_vec();
                header.trailing = trailing.to_vec();
            }
            header
        })
        .collect()
}

/// Locate the separator and trailing whitespace of `header` inside `head`.
///
/// httparse hands out slices into `head`, so their offsets give the bytes
/// it skipped around the value. `None` when the layout is not recognizable.
fn line_spacing<'h>(head: &'h [u8], header: &httparse::Header<'_>) -> Option<(&'h [u8], &'h [u8])> {
    let base = head.as_ptr() as usize;
    let name_end = (header.name.as_ptr() as usize).checked_sub(base)? + header.name.len();
    let value_start = (header.value.as_ptr() as usize).checked_sub(base)?;
    let value_end = value_start + header.value.len();
    if name_end > value_start || value_end > head.len() {
        return None;
    }

    let line_end = value_end + head[value_end..].iter().position(|b| *b == b'\n')?;
    let rest = &head[value_end..line_end];
    let trailing = rest.strip_suffix(b"\r").unwrap_or(rest);
    let separator = &head[name_end..value_start];

    let is_space = |b: &u8| *b == b' ' || *b == b'\t';
    let valid = separator.first() == Some(&b':')
        && separator[1..].iter().all(is_space)
        && trailing.iter().all(is_space);
    valid.then_some((separator, trailing))
}

pub(crate) fn parse_version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

pub(crate) fn map_parse_error(err: httparse::Error, limits: &CodecLimits) -> CodecError {
    match err {
        httparse::Error::TooManyHeaders => CodecError::TooManyHeaders(limits.max_headers),
        other => other.into(),
    }
}

/// Build an `http::HeaderMap` view over raw headers.
pub(crate) fn header_map(headers: &[RawHeader]) -> Result<HeaderMap, CodecError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| CodecError::Malformed(format!("header name '{}': {}", header.name, e)))?;
        let value = HeaderValue::from_bytes(&header.value)
            .map_err(|e| CodecError::Malformed(format!("header '{}': {}", header.name, e)))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Determine body framing from headers. `default` is used when neither
/// `Transfer-Encoding` nor `Content-Length` is present.
pub(crate) fn body_framing(headers: &[RawHeader], default: BodyFraming) -> Result<BodyFraming, CodecError> {
    let mut last_coding: Option<String> = None;
    for header in headers.iter().filter(|h| h.is("transfer-encoding")) {
        for coding in header.value.split(|b| *b == b',') {
            let coding = coding.trim_ascii();
            if !coding.is_empty() {
                last_coding = Some(String::from_utf8_lossy(coding).to_ascii_lowercase());
            }
        }
    }
    if let Some(coding) = last_coding {
        return if coding == "chunked" {
            Ok(BodyFraming::Chunked)
        } else if default == BodyFraming::UntilEof {
            Ok(BodyFraming::UntilEof)
        } else {
            Err(CodecError::UnsupportedTransferEncoding(coding))
        };
    }

    let mut length: Option<u64> = None;
    for header in headers.iter().filter(|h| h.is("content-length")) {
        let parsed = std::str::from_utf8(&header.value)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| CodecError::Malformed("invalid content-length".into()))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(CodecError::Malformed("conflicting content-length values".into()))
            }
            _ => length = Some(parsed),
        }
    }

    Ok(match length {
        Some(0) => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
        None => default,
    })
}

/// Read a body according to its framing, decoding chunked transfer coding.
pub(crate) async fn read_body<R>(
    reader: &mut R,
    framing: BodyFraming,
    limits: &CodecLimits,
) -> Result<Bytes, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        BodyFraming::Empty => Ok(Bytes::new()),
        BodyFraming::Length(n) => {
            if n > limits.max_body_bytes as u64 {
                return Err(CodecError::BodyTooLarge(limits.max_body_bytes));
            }
            let mut body = vec![0u8; n as usize];
            reader.read_exact(&mut body).await.map_err(eof_aware)?;
            Ok(body.into())
        }
        BodyFraming::Chunked => read_chunked(reader, limits).await,
        BodyFraming::UntilEof => {
            let mut body = Vec::new();
            (&mut *reader)
                .take(limits.max_body_bytes as u64 + 1)
                .read_to_end(&mut body)
                .await?;
            if body.len() > limits.max_body_bytes {
                return Err(CodecError::BodyTooLarge(limits.max_body_bytes));
            }
            Ok(body.into())
        }
    }
}

async fn read_chunked<R>(reader: &mut R, limits: &CodecLimits) -> Result<Bytes, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_raw_line(reader, MAX_CHUNK_LINE).await?;
        let size = match httparse::parse_chunk_size(&line) {
            Ok(httparse::Status::Complete((_, size))) => size,
            _ => return Err(CodecError::Malformed("invalid chunk size".into())),
        };

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let trailer = read_line(reader, MAX_CHUNK_LINE).await?;
                if trailer.is_empty() {
                    return Ok(body.into());
                }
            }
        }

        if body.len() as u64 + size > limits.max_body_bytes as u64 {
            return Err(CodecError::BodyTooLarge(limits.max_body_bytes));
        }
        let start = body.len();
        body.resize(start + size as usize, 0);
        reader.read_exact(&mut body[start..]).await.map_err(eof_aware)?;

        if !read_line(reader, MAX_CHUNK_LINE).await?.is_empty() {
            return Err(CodecError::Malformed("missing CRLF after chunk data".into()));
        }
    }
}

/// Read a single line including its terminator.
async fn read_raw_line<R>(reader: &mut R, max: u64) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader).take(max).read_until(b'\n', &mut line).await?;
    if !line.ends_with(b"\n") {
        return Err(if line.len() as u64 >= max {
            CodecError::Malformed("line too long".into())
        } else {
            CodecError::UnexpectedEof
        });
    }
    Ok(line)
}

/// Read a single line, returning it without the line terminator.
async fn read_line<R>(reader: &mut R, max: u64) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = read_raw_line(reader, max).await?;
    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    Ok(line)
}

fn eof_aware(err: std::io::Error) -> CodecError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CodecError::UnexpectedEof
    } else {
        CodecError::Io(err)
    }
}

/// Serialize headers, blank line and body after an already written start line.
pub(crate) fn encode_tail(out: &mut Vec<u8>, headers: &[RawHeader], body: &[u8], chunked: bool) {
    for header in headers {
        header.encode(out);
    }
    out.extend_from_slice(b"\r\n");

    if chunked {
        if !body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    } else {
        out.extend_from_slice(body);
    }
}

pub(crate) fn encode_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    RawHeader::new(name, value).encode(out);
}

/// Write a fully encoded message and flush it.
pub(crate) async fn write_all_flush<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_stops_at_blank_line() {
        let mut input: &[u8] = b"\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\nleftover";
        let head = read_head(&mut input, &CodecLimits::default()).await.unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(input, b"leftover");
    }

    #[tokio::test]
    async fn head_limit_enforced() {
        let limits = CodecLimits {
            max_head_bytes: 16,
            ..CodecLimits::default()
        };
        let mut input: &[u8] = b"GET /a-very-long-path HTTP/1.1\r\n\r\n";
        let err = read_head(&mut input, &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::HeadTooLarge(16)));
    }

    #[tokio::test]
    async fn empty_input_is_connection_closed() {
        let mut input: &[u8] = b"";
        let err = read_head(&mut input, &CodecLimits::default()).await.unwrap_err();
        assert!(matches!(err, CodecError::ConnectionClosed));

        let mut truncated: &[u8] = b"GET / HTTP/1.1\r\nHost";
        let err = read_head(&mut truncated, &CodecLimits::default()).await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof));
    }

    #[tokio::test]
    async fn chunked_body_decoded_without_overread() {
        let mut input: &[u8] = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\nnext";
        let body = read_body(&mut input, BodyFraming::Chunked, &CodecLimits::default())
            .await
            .unwrap();
        assert_eq!(&body[..], b"Wikipedia");
        assert_eq!(input, b"next");
    }

    #[tokio::test]
    async fn bad_chunk_size_is_malformed() {
        let mut input: &[u8] = b"zz\r\nWiki\r\n0\r\n\r\n";
        let err = read_body(&mut input, BodyFraming::Chunked, &CodecLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn header_spacing_survives_reencoding() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade:websocket\r\nConnection:  Upgrade \r\nX-Tab:\tv\r\n\r\n";
        let mut parsed_headers = [httparse::EMPTY_HEADER; 8];
        let mut parsed = httparse::Response::new(&mut parsed_headers);
        assert!(parsed.parse(head).unwrap().is_complete());

        let headers = raw_headers(head, parsed.headers);
        let mut out = Vec::new();
        encode_tail(&mut out, &headers, b"", false);
        assert_eq!(out, b"Upgrade:websocket\r\nConnection:  Upgrade \r\nX-Tab:\tv\r\n\r\n");
    }

    #[tokio::test]
    async fn length_body_respects_limit() {
        let limits = CodecLimits {
            max_body_bytes: 4,
            ..CodecLimits::default()
        };
        let mut input: &[u8] = b"hello";
        let err = read_body(&mut input, BodyFraming::Length(5), &limits).await.unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge(4)));
    }

    #[test]
    fn framing_rules() {
        let chunked = vec![
            RawHeader::new("Transfer-Encoding", "gzip, chunked"),
            RawHeader::new("Content-Length", "10"),
        ];
        assert_eq!(body_framing(&chunked, BodyFraming::Empty).unwrap(), BodyFraming::Chunked);

        let length = vec![RawHeader::new("content-length", "12")];
        assert_eq!(body_framing(&length, BodyFraming::Empty).unwrap(), BodyFraming::Length(12));

        assert_eq!(body_framing(&[], BodyFraming::UntilEof).unwrap(), BodyFraming::UntilEof);

        let conflicting = vec![
            RawHeader::new("Content-Length", "1"),
            RawHeader::new("Content-Length", "2"),
        ];
        assert!(body_framing(&conflicting, BodyFraming::Empty).is_err());

        let gzip_only = vec![RawHeader::new("Transfer-Encoding", "gzip")];
        assert!(matches!(
            body_framing(&gzip_only, BodyFraming::Empty),
            Err(CodecError::UnsupportedTransferEncoding(_))
        ));
    }

    #[test]
    fn chunked_encoding_single_chunk() {
        let mut out = Vec::new();
        encode_tail(&mut out, &[RawHeader::new("X-A", "1")], b"abc", true);
        assert_eq!(out, b"X-A: 1\r\n\r\n3\r\nabc\r\n0\r\n\r\n");
    }
}
