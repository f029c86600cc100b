// ABOUTME: Serves one frontend connection: CR LF framing, welcome banner, command loop
// ABOUTME: Replies flow through the mailbox, which owns the write half while attached

use crate::commands::{Dispatcher, Flow};
use crate::registry::AccountRegistry;
use crate::shutdown::Shutdown;
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Accumulates reads until the buffered bytes end with CR LF.
///
/// A line ending in a bare LF is held and joined with the next read, so a
/// client that never sends CR stalls its own command stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Append a chunk; returns the complete line (without CR LF) if one is ready
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(chunk);
        if !self.buf.ends_with(b"\r\n") {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        line.truncate(line.len() - 2);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Serve `stream` until the client leaves, sends `bye`/`quit`, or the daemon
/// shuts down. Returns `Flow::Quit` if the daemon should stop.
pub async fn serve_connection<S>(
    stream: S,
    registry: &mut AccountRegistry,
    dispatcher: &Dispatcher,
    shutdown: &Shutdown,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    // the mailbox is not attached yet, so the greeting goes out directly
    let welcome = dispatcher.welcome(registry);
    if let Err(e) = write_half.write_all(welcome.as_bytes()).await {
        tracing::warn!(error = %e, "Failed to send welcome");
    }

    let mailbox = dispatcher.mailbox().clone();
    mailbox.attach(Box::new(write_half));

    let mut reader = BufReader::new(read_half);
    let mut frames = FrameBuffer::default();
    let mut chunk = Vec::new();
    let result = loop {
        chunk.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => break Ok(Flow::Quit),
            read = reader.read_until(b'\n', &mut chunk) => read,
        };
        match read {
            Ok(0) => {
                tracing::info!("Frontend closed the connection");
                break Ok(Flow::Bye);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Frontend read failed");
                break Ok(Flow::Bye);
            }
        }
        let Some(line) = frames.push(&chunk) else {
            continue;
        };
        match dispatcher.handle_line(&line, registry).await {
            Ok(Flow::Continue) => {}
            other => break other,
        }
    };

    // let queued replies reach the client before its writer is dropped
    mailbox.settle().await;
    mailbox.detach();
    mailbox.settle().await;
    result
}
