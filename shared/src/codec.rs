//! HTTP/1.0 text codec for bridge traffic
//!
//! Requests are written as:
//! ```text
//! <METHOD> <path> HTTP/1.0\r\n
//! Content-Length: <n>\r\n        (PUT/POST only)
//! \r\n
//! <single-line JSON body>
//! ```
//!
//! Responses are read to EOF. The first line must match `HTTP/<d>.<d> <code>`,
//! headers run to the first blank line, and everything after it is the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::limits::{ERROR_MARKER, MAX_REQUEST_SIZE};
use crate::{Command, Method};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty response")]
    EmptyResponse,

    #[error("Malformed status line: {0:?}")]
    MalformedStatusLine(String),

    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("Invalid Content-Length header: {0:?}")]
    InvalidContentLength(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Body encode error: {0}")]
    EncodeError(#[from] serde_json::Error),
}

/// Encode a command into a request for a bridge with the given username
pub fn encode_request(username: &str, command: &Command) -> Result<Bytes, CodecError> {
    let request_line = format!("{} {} HTTP/1.0\r\n", command.method(), command.path(username));

    let mut buf = BytesMut::with_capacity(request_line.len() + 128);
    buf.put_slice(request_line.as_bytes());

    match command.body()? {
        Some(body) => {
            buf.put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            buf.put_slice(body.as_bytes());
        }
        None => buf.put_slice(b"\r\n"),
    }

    Ok(buf.freeze())
}

/// Parse a status line of the form `HTTP/<d>.<d> <code> [reason]`
pub fn parse_status_line(line: &str) -> Result<u16, CodecError> {
    let malformed = || CodecError::MalformedStatusLine(line.to_string());
    let rest = line.strip_prefix("HTTP/").ok_or_else(malformed)?;
    let (version, rest) = rest.split_once(' ').ok_or_else(malformed)?;

    let (major, minor) = version.split_once('.').ok_or_else(malformed)?;
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(major) || !is_digits(minor) {
        return Err(malformed());
    }

    let code: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    code.parse().map_err(|_| malformed())
}

/// A decoded bridge response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// The bridge reports application-level rejections inside a 200 body
    pub fn has_error_marker(&self) -> bool {
        self.body.contains(ERROR_MARKER)
    }
}

/// Decode a complete response (the connection has reached EOF)
pub fn decode_response(buf: &[u8]) -> Result<Response, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::EmptyResponse);
    }

    let text = String::from_utf8_lossy(buf);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let status = parse_status_line(lines.next().unwrap_or_default())?;

    // Skip headers
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }

    let body = lines.collect::<Vec<_>>().join("\n").trim_end().to_string();
    Ok(Response { status, body })
}

/// Encode a response (used by the bridge simulator)
pub fn encode_response(status: u16, reason: &str, body: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 128);
    buf.put_slice(format!("HTTP/1.0 {} {}\r\n", status, reason).as_bytes());
    buf.put_slice(b"Content-Type: application/json\r\n");
    buf.put_slice(b"Connection: close\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// A decoded request line plus body
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: String,
}

/// Try to decode a request from a buffer
///
/// Returns:
/// - `Ok(Some(request))` if a complete request was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Request>, CodecError> {
    if buf.len() > MAX_REQUEST_SIZE {
        return Err(CodecError::MessageTooLarge(buf.len()));
    }

    // Accept bare `\n` line endings as well as `\r\n`
    let head_end = match find_head_end(buf) {
        Some(end) => end,
        None => return Ok(None),
    };

    let head = String::from_utf8_lossy(&buf[..head_end.start]).into_owned();
    let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (method, path) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v)) if v.starts_with("HTTP/") => (m, p),
        _ => return Err(CodecError::MalformedRequestLine(request_line.to_string())),
    };
    let method: Method = method
        .parse()
        .map_err(|_| CodecError::MalformedRequestLine(request_line.to_string()))?;

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| CodecError::InvalidContentLength(value.trim().to_string()))?;
            }
        }
    }

    let total_len = head_end.end + content_length;
    if total_len > MAX_REQUEST_SIZE {
        return Err(CodecError::MessageTooLarge(total_len));
    }
    if buf.len() < total_len {
        return Ok(None);
    }

    let path = path.to_string();
    buf.advance(head_end.end);
    let body = buf.split_to(content_length);

    Ok(Some(Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    }))
}

/// Byte range of the blank line that ends the request head
fn find_head_end(buf: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut idx = 0;
    while idx < buf.len() {
        if buf[idx..].starts_with(b"\r\n\r\n") {
            return Some(idx..idx + 4);
        }
        if buf[idx..].starts_with(b"\n\n") {
            return Some(idx..idx + 2);
        }
        idx += 1;
    }
    None
}

/// Streaming request decoder for the simulator
#[derive(Debug, Default)]
pub struct RequestDecoder {
    buffer: BytesMut,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn decode_next(&mut self) -> Result<Option<Request>, CodecError> {
        decode_request(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
