//! Wire framing for MCP over a byte stream.
//!
//! Two framings are supported:
//!
//! ```text
//! Lines:          {"jsonrpc":"2.0","id":1,...}\n
//! ContentLength:  Content-Length: <length>\r\n
//!                 \r\n
//!                 {"jsonrpc":"2.0","id":1,...}
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{McpError, Result};

/// Frames larger than this fail the session.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Longest accepted `Content-Length` header line.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Framing used on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Newline-delimited JSON.
    #[default]
    Lines,
    /// `Content-Length` header block followed by the body.
    ContentLength,
}

/// Reads whole frames from a buffered stream.
pub struct FrameReader<R> {
    inner: R,
    framing: Framing,
    line: String,
    max_frame_len: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self {
            inner,
            framing,
            line: String::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Override [`MAX_FRAME_LEN`].
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Next frame body, or `None` on a clean end of stream.
    ///
    /// End of stream inside a `Content-Length` frame is
    /// [`McpError::ConnectionClosed`]; a bad header is [`McpError::Protocol`].
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        match self.framing {
            Framing::Lines => self.next_line_frame().await,
            Framing::ContentLength => self.next_length_frame().await,
        }
    }

    /// Read one line into `self.line`, consuming at most `limit` bytes plus
    /// the line terminator. Returns the number of bytes read.
    async fn read_line_bounded(&mut self, limit: usize, what: &str) -> Result<usize> {
        self.line.clear();
        let read = (&mut self.inner)
            .take(limit as u64 + 2)
            .read_line(&mut self.line)
            .await
            .map_err(read_error)?;
        if self.line.trim_end().len() > limit {
            return Err(McpError::protocol(format!(
                "{what} exceeds maximum length of {limit} bytes"
            )));
        }
        Ok(read)
    }

    async fn next_line_frame(&mut self) -> Result<Option<String>> {
        loop {
            if self.read_line_bounded(self.max_frame_len, "frame").await? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    async fn next_length_frame(&mut self) -> Result<Option<String>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        // Read headers until the blank separator line
        loop {
            if self.read_line_bounded(MAX_HEADER_LEN, "header line").await? == 0 {
                return if saw_header {
                    Err(McpError::ConnectionClosed)
                } else {
                    Ok(None)
                };
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                if saw_header {
                    break;
                }
                continue;
            }
            saw_header = true;

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(McpError::protocol(format!("malformed header: {trimmed}")));
            };
            if key.trim().eq_ignore_ascii_case("content-length") {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    McpError::protocol(format!("invalid Content-Length: {e}"))
                })?;
                content_length = Some(len);
            }
        }

        let len =
            content_length.ok_or_else(|| McpError::protocol("missing Content-Length header"))?;
        if len > self.max_frame_len {
            return Err(McpError::protocol(format!(
                "frame exceeds maximum length of {} bytes",
                self.max_frame_len
            )));
        }

        let mut body = vec![0u8; len];
        if let Err(e) = self.inner.read_exact(&mut body).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                McpError::ConnectionClosed
            } else {
                e.into()
            });
        }
        String::from_utf8(body)
            .map(Some)
            .map_err(|_| McpError::protocol("frame body is not valid UTF-8"))
    }
}

fn read_error(e: std::io::Error) -> McpError {
    if e.kind() == std::io::ErrorKind::InvalidData {
        McpError::protocol("frame is not valid UTF-8")
    } else {
        e.into()
    }
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, framing: Framing, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match framing {
        Framing::Lines => {
            writer.write_all(body.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body.as_bytes()).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
