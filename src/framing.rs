//! Message boundaries over a byte stream.
//!
//! Two interchangeable strategies, one per transport instance:
//!
//! - **Content-Length**: `Content-Length: <n>\r\n\r\n` followed by exactly `n`
//!   bytes of JSON (same as LSP).
//! - **Newline-delimited**: one JSON document per line; a trailing `\r` is
//!   tolerated.
//!
//! Malformed input is reported as a [`MessageError`] for that one message; the
//! offending bytes are consumed and anything buffered after them is kept.

use std::str::FromStr;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::protocol::{ErrorCode, Message, RequestId};

/// Default upper bound for a single message (4 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH_PREFIX: &[u8] = b"content-length:";
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Recoverable fault for a single inbound message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid JSON: {0}")]
    Parse(String),
    #[error("message too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid message: {reason}")]
    InvalidShape {
        id: Option<RequestId>,
        reason: String,
        /// The document had the shape of a response; responses are never answered.
        response: bool,
    },
}

impl MessageError {
    pub(crate) fn invalid_shape(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            id,
            reason: reason.into(),
            response: false,
        }
    }

    /// Mark a shape fault as coming from a response-shaped document.
    pub(crate) fn in_response(self) -> Self {
        match self {
            Self::InvalidShape { id, reason, .. } => Self::InvalidShape {
                id,
                reason,
                response: true,
            },
            other => other,
        }
    }

    /// Whether the peer should get an error response for this fault.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::InvalidShape { response: true, .. })
    }

    /// Registry code used when answering this fault.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidHeader(_) | Self::Parse(_) | Self::TooLarge { .. } => ErrorCode::ParseError,
            Self::InvalidShape { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Id of the offending request, when it could be recovered.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::InvalidShape { id, .. } => id.as_ref(),
            _ => None,
        }
    }
}

/// Boundary strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    ContentLength,
    #[default]
    NewlineDelimited,
}

impl FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content-length" | "content_length" | "lsp" => Ok(Self::ContentLength),
            "newline" | "ndjson" | "jsonl" | "line" => Ok(Self::NewlineDelimited),
            other => Err(format!("unknown framing mode: {other}")),
        }
    }
}

/// Incremental decoder/encoder for one direction of a byte stream.
#[derive(Debug)]
pub struct Framer {
    mode: FramingMode,
    buffer: BytesMut,
    max_message_bytes: usize,
    /// Body bytes of an oversized message still to be thrown away.
    discard: usize,
    /// Set after a bad header block: skip ahead to the next `Content-Length` header.
    resync: bool,
}

impl Framer {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            discard: 0,
            resync: false,
        }
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes received but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Accumulate raw input.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete message, `Ok(None)` if more bytes are needed.
    pub fn take_message(&mut self) -> Result<Option<Message>, MessageError> {
        if self.discard > 0 {
            let n = self.discard.min(self.buffer.len());
            self.buffer.advance(n);
            self.discard -= n;
            if self.discard > 0 {
                return Ok(None);
            }
        }

        let body = match self.mode {
            FramingMode::ContentLength => self.take_length_prefixed()?,
            FramingMode::NewlineDelimited => self.take_line()?,
        };
        let Some(body) = body else {
            return Ok(None);
        };

        trace!(len = body.len(), "framed message");
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| MessageError::Parse(e.to_string()))?;
        Message::from_value(value).map(Some)
    }

    /// Serialize a message with this framer's boundary. Inverse of [`Framer::take_message`].
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, MessageError> {
        let body = serde_json::to_vec(message).map_err(|e| MessageError::Parse(e.to_string()))?;
        Ok(match self.mode {
            FramingMode::ContentLength => {
                let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                out.extend_from_slice(&body);
                out
            }
            FramingMode::NewlineDelimited => {
                let mut out = body;
                out.push(b'\n');
                out
            }
        })
    }

    fn take_length_prefixed(&mut self) -> Result<Option<Vec<u8>>, MessageError> {
        if self.resync && !self.skip_to_next_header() {
            return Ok(None);
        }

        let Some(header_end) = find(&self.buffer, HEADER_TERMINATOR) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                self.buffer.clear();
                self.resync = true;
                return Err(MessageError::InvalidHeader(format!(
                    "header block exceeds {MAX_HEADER_BYTES} bytes"
                )));
            }
            return Ok(None);
        };

        let header = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        let content_length = match parse_content_length(&header) {
            Ok(n) => n,
            Err(e) => {
                // The body length is unknown, so whatever follows the bad header
                // is skipped up to the next frame.
                self.buffer.advance(header_end + HEADER_TERMINATOR.len());
                self.resync = true;
                return Err(e);
            }
        };

        if content_length > self.max_message_bytes {
            self.buffer.advance(header_end + HEADER_TERMINATOR.len());
            let available = content_length.min(self.buffer.len());
            self.buffer.advance(available);
            self.discard = content_length - available;
            warn!(size = content_length, limit = self.max_message_bytes, "discarding oversized message");
            return Err(MessageError::TooLarge {
                size: content_length,
                limit: self.max_message_bytes,
            });
        }

        let body_start = header_end + HEADER_TERMINATOR.len();
        if self.buffer.len() < body_start + content_length {
            return Ok(None);
        }

        self.buffer.advance(body_start);
        Ok(Some(self.buffer.split_to(content_length).to_vec()))
    }

    /// Drop bytes up to the next `Content-Length:` header. Keeps a tail that
    /// may be the start of a header still arriving. Returns whether one was found.
    fn skip_to_next_header(&mut self) -> bool {
        match find_ignore_case(&self.buffer, CONTENT_LENGTH_PREFIX) {
            Some(pos) => {
                self.buffer.advance(pos);
                self.resync = false;
                true
            }
            None => {
                let keep = CONTENT_LENGTH_PREFIX.len() - 1;
                let skipped = self.buffer.len().saturating_sub(keep);
                self.buffer.advance(skipped);
                false
            }
        }
    }

    fn take_line(&mut self) -> Result<Option<Vec<u8>>, MessageError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                if self.buffer.len() > self.max_message_bytes {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(MessageError::TooLarge {
                        size,
                        limit: self.max_message_bytes,
                    });
                }
                return Ok(None);
            };

            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_message_bytes {
                return Err(MessageError::TooLarge {
                    size: line.len(),
                    limit: self.max_message_bytes,
                });
            }
            return Ok(Some(line.to_vec()));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

fn parse_content_length(header: &str) -> Result<usize, MessageError> {
    let mut length = None;
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            return Err(MessageError::InvalidHeader(format!("malformed header line: {line:?}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let n = value
                .trim()
                .parse::<usize>()
                .map_err(|_| MessageError::InvalidHeader(format!("bad Content-Length: {:?}", value.trim())))?;
            length = Some(n);
        }
    }
    length.ok_or_else(|| MessageError::InvalidHeader("missing Content-Length".into()))
}
