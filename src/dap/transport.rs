use super::transport_trait::{MessageReader, MessageWriter};
use super::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Reads Content-Length framed messages from any async byte stream.
pub struct DapReader<R> {
    stream: BufReader<R>,
}

/// Writes Content-Length framed messages to any async byte stream.
pub struct DapWriter<W> {
    stream: W,
}

impl<R: AsyncRead + Unpin + Send> DapReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn read_from_stream(&mut self) -> Result<String> {
        // Read headers up to the blank separator line
        let mut headers = String::new();
        loop {
            let mut line = String::new();
            let read = self.stream.read_line(&mut line).await?;

            if read == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "DAP stream closed",
                )));
            }

            if line == "\r\n" || line == "\n" {
                if headers.is_empty() {
                    // Tolerate stray blank lines between frames
                    continue;
                }
                break;
            }

            headers.push_str(&line);
        }

        let content_length = headers
            .lines()
            .find(|line| line.starts_with("Content-Length:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::Protocol("Missing Content-Length header".to_string()))?;

        trace!("DAP: Reading message with Content-Length: {}", content_length);

        let mut buffer = vec![0u8; content_length];
        self.stream.read_exact(&mut buffer).await?;

        let content = String::from_utf8(buffer)
            .map_err(|e| Error::Protocol(format!("Invalid UTF-8: {}", e)))?;

        debug!("DAP received: {}", content);
        Ok(content)
    }
}

impl<W: AsyncWrite + Unpin + Send> DapWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    async fn write_to_stream(&mut self, msg: &Message) -> Result<()> {
        let content = serde_json::to_string(msg)?;
        debug!("DAP sending: {}", content);

        let headers = format!("Content-Length: {}\r\n\r\n", content.len());
        self.stream.write_all(headers.as_bytes()).await?;
        self.stream.write_all(content.as_bytes()).await?;
        self.stream.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for DapReader<R> {
    async fn read_frame(&mut self) -> Result<String> {
        self.read_from_stream().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for DapWriter<W> {
    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        self.write_to_stream(msg).await
    }
}

/// Writer that several producers can hold at once, e.g. when replies and
/// events both go to stdout.
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn MessageWriter>>>,
}

impl SharedWriter {
    pub fn new(writer: Box<dyn MessageWriter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }
}

impl Clone for SharedWriter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl MessageWriter for SharedWriter {
    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_message(msg).await
    }
}

/// Decodes one frame payload into a DAP message.
pub fn decode_message(frame: &str) -> Result<Message> {
    serde_json::from_str(frame).map_err(|e| Error::Dap(format!("Failed to parse DAP message: {}", e)))
}

/// Framed halves of a TCP connection (used for lldb-dap).
pub fn split_socket(stream: TcpStream) -> (DapReader<OwnedReadHalf>, DapWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (DapReader::new(read), DapWriter::new(write))
}

/// Framed halves of the process's own stdin/stdout (used for the control channel).
pub fn stdio() -> (DapReader<tokio::io::Stdin>, DapWriter<tokio::io::Stdout>) {
    (
        DapReader::new(tokio::io::stdin()),
        DapWriter::new(tokio::io::stdout()),
    )
}
