//! Connected runtime socket
//!
//! The read half is drained by a background task that frames lines and posts
//! decoded messages to the session inbox. The write half stays with the
//! session, which is the only writer.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::framer::{self, LineFramer};
use super::protocol::{RuntimeCommand, RuntimeMessage};
use super::RuntimeInput;

const READ_CHUNK: usize = 8 * 1024;

/// Line-based connection to the runtime
pub struct RuntimeTransport {
    writer: Option<OwnedWriteHalf>,
    reader_task: JoinHandle<()>,
}

impl RuntimeTransport {
    /// Take ownership of a connected stream and start reading from it
    pub fn start(stream: TcpStream, inbox: mpsc::UnboundedSender<RuntimeInput>) -> Self {
        let (mut reader, writer) = stream.into_split();

        let reader_task = tokio::spawn(async move {
            let mut framer = LineFramer::new();
            let mut buf = vec![0u8; READ_CHUNK];

            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("Runtime closed the debug socket");
                        let _ = inbox.send(RuntimeInput::SocketClosed);
                        break;
                    }
                    Ok(n) => {
                        for frame in framer.feed(&buf[..n]) {
                            let input = match frame {
                                Ok(line) => {
                                    tracing::trace!(line = %line, "runtime <<<");
                                    framer::parse_line(&line)
                                        .and_then(RuntimeMessage::from_value)
                                        .map(RuntimeInput::Message)
                                        .unwrap_or_else(|_| RuntimeInput::ProtocolViolation(line))
                                }
                                Err(e) => RuntimeInput::ProtocolViolation(e.to_string()),
                            };
                            if inbox.send(input).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Runtime socket read failed");
                        let _ = inbox.send(RuntimeInput::SocketError(e.to_string()));
                        let _ = inbox.send(RuntimeInput::SocketClosed);
                        break;
                    }
                }
            }
        });

        Self {
            writer: Some(writer),
            reader_task,
        }
    }

    /// Write one command line to the runtime
    pub async fn send(&mut self, command: &RuntimeCommand) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::SocketError("connection already closed".to_string()))?;

        let line = framer::encode(command)?;
        tracing::trace!(line = %line.trim_end(), "runtime >>>");

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::SocketError(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::SocketError(e.to_string()))
    }

    /// Shut the connection down; safe to call more than once
    pub async fn close(&mut self) {
        self.reader_task.abort();
        if let Some(mut writer) = self.writer.take() {
            // Teardown errors are irrelevant to the client
            let _ = writer.shutdown().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl Drop for RuntimeTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
