//! Framed transport over any async byte stream (stdio, pipes, sockets).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Transport, TransportError, TransportEvent};
use crate::framing::{Framer, FramingMode};
use crate::protocol::Message;

const READ_CHUNK_BYTES: usize = 8 * 1024;
/// Consecutive read failures after which the stream is treated as ended.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

struct ReadHalf<R> {
    reader: R,
    framer: Framer,
    eof: bool,
    read_errors: u32,
}

/// Reads framed messages from `R`, writes framed messages to `W`.
///
/// Generic over reader/writer for testability.
pub struct StreamTransport<R, W> {
    read: Mutex<ReadHalf<R>>,
    writer: Mutex<W>,
    encoder: Framer,
    session_id: String,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl StreamTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Transport over the process's stdin/stdout.
    pub fn stdio(mode: FramingMode) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), mode)
    }
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, mode: FramingMode) -> Self {
        Self::with_framer(reader, writer, Framer::new(mode))
    }

    /// Use a pre-configured framer (e.g. a custom message size limit).
    pub fn with_framer(reader: R, writer: W, framer: Framer) -> Self {
        let mode = framer.mode();
        Self {
            read: Mutex::new(ReadHalf {
                reader,
                framer,
                eof: false,
                read_errors: 0,
            }),
            writer: Mutex::new(writer),
            encoder: Framer::new(mode),
            session_id: uuid::Uuid::now_v7().to_string(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Give back the writer, e.g. to inspect what was sent in tests.
    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn start(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.started.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.session_id, mode = ?self.encoder.mode(), "stream transport started");
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let bytes = self.encoder.encode(message)?;
        trace!(len = bytes.len(), "writing message");

        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> TransportEvent {
        let mut read = self.read.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return TransportEvent::Closed;
            }
            match read.framer.take_message() {
                Ok(Some(message)) => return TransportEvent::Message(message),
                Ok(None) if read.eof => return TransportEvent::Closed,
                Ok(None) => {}
                Err(e) => return TransportEvent::Error(e.into()),
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return TransportEvent::Closed,
                result = read.reader.read(&mut chunk) => result,
            };
            match result {
                Ok(0) => {
                    if read.framer.buffered_len() > 0 {
                        debug!(pending = read.framer.buffered_len(), "EOF with partial message buffered");
                    }
                    read.eof = true;
                }
                Ok(n) => {
                    read.read_errors = 0;
                    read.framer.append(&chunk[..n]);
                }
                Err(e) => {
                    read.read_errors += 1;
                    if read.read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        warn!(error = %e, failures = read.read_errors, "input stream keeps failing, treating as closed");
                        read.eof = true;
                    }
                    return TransportEvent::Error(e.into());
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();
        debug!(session_id = %self.session_id, "stream transport closed");
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Notification, Request};
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("EIO")))
        }
    }

    #[tokio::test]
    async fn reads_newline_delimited_messages_then_closes() {
        let input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n{\"jsonrpc\":\"2.0\",\"method\":\"n\"}\n";
        let transport = StreamTransport::new(Cursor::new(input.to_vec()), Vec::new(), FramingMode::NewlineDelimited);

        assert!(matches!(transport.receive().await, TransportEvent::Message(Message::Request(_))));
        assert!(matches!(transport.receive().await, TransportEvent::Message(Message::Notification(_))));
        assert_eq!(transport.receive().await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn malformed_line_is_an_error_event_not_closure() {
        let input = b"garbage\n{\"jsonrpc\":\"2.0\",\"method\":\"n\"}\n";
        let transport = StreamTransport::new(Cursor::new(input.to_vec()), Vec::new(), FramingMode::NewlineDelimited);

        assert!(matches!(transport.receive().await, TransportEvent::Error(TransportError::Message(_))));
        assert!(matches!(transport.receive().await, TransportEvent::Message(_)));
    }

    #[tokio::test]
    async fn persistent_read_failure_ends_the_stream() {
        let transport = StreamTransport::new(BrokenReader, Vec::new(), FramingMode::NewlineDelimited);

        for _ in 0..MAX_CONSECUTIVE_READ_ERRORS {
            assert!(matches!(transport.receive().await, TransportEvent::Error(TransportError::Io(_))));
        }
        assert_eq!(transport.receive().await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn writes_content_length_frames() {
        let transport = StreamTransport::new(Cursor::new(Vec::new()), Vec::new(), FramingMode::ContentLength);
        transport
            .send(&Request::new(1, "ping", None).into())
            .await
            .expect("send");

        let output = String::from_utf8(transport.into_writer()).expect("utf8");
        let (header, body) = output.split_once("\r\n\r\n").expect("header terminator");
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        let value: serde_json::Value = serde_json::from_str(body).expect("json body");
        assert_eq!(value["method"], "ping");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let transport = StreamTransport::new(Cursor::new(Vec::new()), Vec::new(), FramingMode::NewlineDelimited);
        transport.close().await.expect("close");
        let err = transport.send(&Notification::new("n", None).into()).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
