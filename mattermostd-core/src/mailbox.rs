// ABOUTME: Outgoing mailbox actor buffering protocol lines for the single frontend connection
// ABOUTME: One task owns the pending queue, history and writer; handles talk to it over a channel

use crate::config::Config;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

/// A frontend that accepts no bytes for this long is detached
pub const FRONTEND_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Write half of the attached frontend connection
pub type FrontendWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Requests handled by the mailbox task
enum MailboxCommand {
    Send(String),
    Attach(Option<FrontendWriter>),
    History,
    Settle(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct MailboxOptions {
    /// Keep every sent line for `request_history`
    pub keep_history: bool,
    /// Max retained history lines (0 = unbounded)
    pub history_limit: usize,
    /// Max undelivered lines while no frontend is attached (0 = unbounded)
    pub pending_limit: usize,
    /// Per-line write deadline; a frontend that misses it is detached
    pub write_timeout: Duration,
}

impl Default for MailboxOptions {
    fn default() -> Self {
        Self {
            keep_history: true,
            history_limit: 10_000,
            pending_limit: 100_000,
            write_timeout: FRONTEND_WRITE_TIMEOUT,
        }
    }
}

impl MailboxOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep_history: config.history_enabled(),
            history_limit: config.history_limit,
            pending_limit: config.pending_limit,
            write_timeout: FRONTEND_WRITE_TIMEOUT,
        }
    }
}

/// Cloneable handle to the mailbox task.
///
/// Lines are delivered in the order `send` was called, across all handles.
/// The task exits once every handle has been dropped.
#[derive(Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<MailboxCommand>,
}

impl Mailbox {
    /// Spawn the mailbox task on the current runtime
    pub fn spawn(options: MailboxOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(MailboxActor::new(options).run(rx));
        Self { tx }
    }

    /// Queue a fully formatted protocol line
    pub fn send(&self, line: impl Into<String>) {
        self.post(MailboxCommand::Send(line.into()));
    }

    /// Make `writer` the frontend, replacing any previous one, and flush pending lines to it
    pub fn attach(&self, writer: FrontendWriter) {
        self.post(MailboxCommand::Attach(Some(writer)));
    }

    pub fn detach(&self) {
        self.post(MailboxCommand::Attach(None));
    }

    /// Replay the retained history to the attached frontend, if any
    pub fn request_history(&self) {
        self.post(MailboxCommand::History);
    }

    /// Wait until every request queued before this call has been processed
    pub async fn settle(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(MailboxCommand::Settle(reply_tx));
        let _ = reply_rx.await;
    }

    fn post(&self, command: MailboxCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Mailbox task is gone, dropping request");
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

struct MailboxActor {
    options: MailboxOptions,
    pending: VecDeque<String>,
    history: VecDeque<String>,
    writer: Option<FrontendWriter>,
}

impl MailboxActor {
    fn new(options: MailboxOptions) -> Self {
        Self {
            options,
            pending: VecDeque::new(),
            history: VecDeque::new(),
            writer: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MailboxCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                MailboxCommand::Send(line) => {
                    self.enqueue(line);
                    self.deliver_pending().await;
                }
                MailboxCommand::Attach(writer) => {
                    // dropping the old writer closes its half of the connection
                    self.writer = writer;
                    tracing::debug!(attached = self.writer.is_some(), "Frontend (de)registered");
                    self.deliver_pending().await;
                }
                MailboxCommand::History => self.deliver_history().await,
                MailboxCommand::Settle(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        tracing::debug!("Mailbox task exiting");
    }

    fn enqueue(&mut self, line: String) {
        if self.options.keep_history {
            push_bounded(&mut self.history, line.clone(), self.options.history_limit);
        }
        if push_bounded(&mut self.pending, line, self.options.pending_limit) {
            tracing::warn!(
                limit = self.options.pending_limit,
                "Frontend queue full, dropped oldest undelivered line"
            );
        }
    }

    /// Write pending lines oldest first; a write error detaches the frontend
    /// and keeps the undelivered remainder queued
    async fn deliver_pending(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        while let Some(line) = self.pending.front() {
            if let Err(e) = write_line(writer, line, self.options.write_timeout).await {
                tracing::warn!(error = %e, "Frontend write failed, detaching");
                self.writer = None;
                return;
            }
            self.pending.pop_front();
        }
    }

    async fn deliver_history(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for line in &self.history {
            if let Err(e) = write_line(writer, line, self.options.write_timeout).await {
                tracing::warn!(error = %e, "Frontend write failed during history replay, detaching");
                self.writer = None;
                return;
            }
        }
    }
}

async fn write_line(
    writer: &mut FrontendWriter,
    line: &str,
    deadline: Duration,
) -> std::io::Result<()> {
    let write = async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    };
    tokio::time::timeout(deadline, write).await.map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "frontend stopped reading")
    })?
}

/// Append `item`, evicting the oldest entry past `limit` (0 = unbounded).
/// Returns true if something was evicted.
pub(crate) fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, limit: usize) -> bool {
    buf.push_back(item);
    if limit > 0 && buf.len() > limit {
        buf.pop_front();
        true
    } else {
        false
    }
}
