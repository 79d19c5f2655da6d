//! Stdio transport: wraps a spawned child's stdin/stdout as a [`Transport`].
//!
//! The stdout side is driven by a background task that reads lines with
//! `BufReader::lines()` (never a whole-file read) and forwards decoded
//! [`Message`]s — or [`TransportError::Decode`] for malformed lines, which
//! the caller logs and drops without aborting the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::message::Message;
use crate::queue::RequestQueue;

use super::trait_def::{Received, Transport, TransportHandle};

pub struct StdioTransport {
    stdin: Arc<Mutex<ChildStdin>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let line = msg.encode_line();
        let mut stdin = self.stdin.lock().await;
        if let Err(source) = stdin.write_all(line.as_bytes()).await {
            self.closed.store(true, Ordering::Release);
            return Err(TransportError::Io { source });
        }
        if let Err(source) = stdin.flush().await {
            self.closed.store(true, Ordering::Release);
            return Err(TransportError::Io { source });
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Spawn the stdout-reading background task and return a [`TransportHandle`]
/// bound to `stdin`/`stdout`.
pub fn spawn<R>(stdin: ChildStdin, stdout: R) -> TransportHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let closed = Arc::new(AtomicBool::new(false));
    let queue = RequestQueue::new();

    let closed_reader = closed.clone();
    let queue_reader = queue.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let item = match serde_json::from_str::<serde_json::Value>(&line) {
                        Ok(v) => Received::Message(Message(v)),
                        Err(source) => {
                            warn!("malformed JSON line from child stdout: {source}");
                            Received::FramingError(TransportError::Decode { source })
                        }
                    };
                    queue_reader.push(item).await;
                }
                Ok(None) => {
                    debug!("child stdout closed (EOF)");
                    break;
                }
                Err(e) => {
                    warn!("error reading child stdout: {e}");
                    break;
                }
            }
        }
        closed_reader.store(true, Ordering::Release);
        queue_reader.close();
    });

    TransportHandle {
        transport: Box::new(StdioTransport {
            stdin: Arc::new(Mutex::new(stdin)),
            closed,
        }),
        inbound: queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn malformed_line_is_reported_without_closing_stream() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        writer.write_all(b"not json\n").await.unwrap();
        writer.write_all(b"{\"pong\":{}}\n").await.unwrap();

        // Use a throwaway duplex for stdin since we only exercise stdout here.
        let (stdin_tx, mut stdin_rx) = tokio::io::duplex(64);
        drop(stdin_rx.read(&mut [0u8; 1]).await); // keep rx alive, unused otherwise
        let _ = stdin_tx;

        let closed = Arc::new(AtomicBool::new(false));
        let out_queue = RequestQueue::new();
        let closed2 = closed.clone();
        let queue2 = out_queue.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let item = match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(v) => Received::Message(Message(v)),
                    Err(source) => Received::FramingError(TransportError::Decode { source }),
                };
                queue2.push(item).await;
            }
            closed2.store(true, Ordering::Release);
            queue2.close();
        });
        drop(writer);

        let first = out_queue.recv().await.unwrap();
        assert!(matches!(first, Received::FramingError(_)));
        let second = out_queue.recv().await.unwrap();
        assert!(matches!(second, Received::Message(_)));
    }
}
