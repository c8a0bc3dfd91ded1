//! Just enough HTTP/1.1 to serve one GET per connection.
//!
//! Only the request line is interpreted. Header lines are read up to the blank
//! line and discarded; bodies are never read. Every response closes the
//! connection.

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use devicestat_core::metric::unix_ms_now;

/// Longest accepted request or header line, terminator included.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Header lines read (and discarded) before dispatching anyway.
pub const MAX_HEADER_LINES: usize = 100;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the connection or sent a blank first line.
    #[error("empty request")]
    EmptyRequest,

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("line exceeds {MAX_LINE_BYTES} bytes")]
    Oversized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the peer should get a 400 before the connection closes.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MalformedRequestLine(_) | Self::Oversized)
    }
}

/// `METHOD SP path [SP version]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: Option<String>,
}

impl RequestLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }
        let malformed = || ProtocolError::MalformedRequestLine(line.to_string());

        let mut parts = line.split_whitespace();
        let method = parts.next().ok_or_else(malformed)?;
        let path = parts.next().ok_or_else(malformed)?;
        let version = parts.next();
        if parts.next().is_some()
            || !method.bytes().all(|b| b.is_ascii_uppercase())
            || !path.starts_with('/')
            || version.is_some_and(|v| !v.starts_with("HTTP/"))
        {
            return Err(malformed());
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.map(str::to_string),
        })
    }
}

async fn read_line_limited<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if n > MAX_LINE_BYTES {
        return Err(ProtocolError::Oversized);
    }
    Ok(n)
}

/// Read the request line and skip the headers. Header bytes are never
/// decoded; only the request line has to be UTF-8.
pub async fn read_request<R>(reader: &mut R) -> Result<RequestLine, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if read_line_limited(reader, &mut line).await? == 0 {
        return Err(ProtocolError::EmptyRequest);
    }
    let text = std::str::from_utf8(&line).map_err(|_| {
        ProtocolError::MalformedRequestLine(String::from_utf8_lossy(&line).trim_end().to_string())
    })?;
    let request = RequestLine::parse(text)?;

    let mut header = Vec::new();
    for _ in 0..MAX_HEADER_LINES {
        let n = read_line_limited(reader, &mut header).await?;
        if n == 0 || header.trim_ascii().is_empty() {
            break;
        }
    }
    Ok(request)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: u16,
    timestamp: u64,
}

/// A complete response, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    /// JSON body; an unencodable value becomes a 500.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: CONTENT_TYPE_JSON,
                body,
            },
            Err(e) => Self::error(500, &format!("Internal Server Error: {e}")),
        }
    }

    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: CONTENT_TYPE_HTML,
            body: body.into_bytes(),
        }
    }

    /// `{"error": message, "code": status, "timestamp": ms}`.
    pub fn error(status: u16, message: &str) -> Self {
        let body = ErrorBody {
            error: message,
            code: status,
            timestamp: unix_ms_now(),
        };
        Self {
            status,
            content_type: CONTENT_TYPE_JSON,
            // A struct of plain fields always encodes.
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Status line, fixed headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Connection: close\r\n\
             \r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len(),
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response.to_bytes()).await?;
    writer.flush().await
}
