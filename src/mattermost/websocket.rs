// ABOUTME: Live event WebSocket for one Mattermost session
// ABOUTME: Authenticates with the session token, forwards events and watches ping/pong liveness

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mattermostd_core::model::WebSocketEvent;
use mattermostd_core::EventStream;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// How often a ping is sent
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A ping timeout is reported when no pong arrived for this long
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_BUFFER: usize = 256;

type WebSocketStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Connect to `url`, authenticate with `token` and start forwarding events
pub async fn connect(url: &str, token: &str) -> Result<EventStream> {
    tracing::debug!(%url, "Connecting event socket");
    let (socket, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let (mut write, read) = socket.split();

    let challenge = json!({
        "seq": 1,
        "action": "authentication_challenge",
        "data": { "token": token },
    });
    write
        .send(Message::Text(challenge.to_string().into()))
        .await
        .context("Failed to send authentication challenge")?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (ping_tx, ping_rx) = mpsc::channel(1);
    let closer = CancellationToken::new();
    tokio::spawn(run_socket(write, read, event_tx, ping_tx, closer.clone()));

    tracing::info!(%url, "Event socket connected");
    Ok(EventStream::from_channels(event_rx, ping_rx, closer))
}

/// Decode one text frame. Replies to our own requests (`seq_reply`) and
/// anything without an event name yield `None`.
pub fn parse_frame(text: &str) -> Option<WebSocketEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable event frame");
            return None;
        }
    };
    if value.get("seq_reply").is_some() {
        tracing::debug!(reply = %text, "Event socket reply");
        return None;
    }
    match value.get("event").and_then(|e| e.as_str()) {
        Some(name) if !name.is_empty() => serde_json::from_value(value).ok(),
        _ => None,
    }
}

async fn run_socket(
    mut write: SplitSink<WebSocketStream, Message>,
    mut read: SplitStream<WebSocketStream>,
    events: mpsc::Sender<WebSocketEvent>,
    ping_timeouts: mpsc::Sender<()>,
    closer: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = closer.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "Failed to close event socket");
                }
                break;
            }
            _ = ticker.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    // a full buffer means a timeout is already pending
                    let _ = ping_timeouts.try_send(());
                }
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    tracing::warn!(error = %e, "Event socket ping failed");
                    break;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_frame(text.as_str()) {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Event socket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Event socket read failed");
                    break;
                }
                None => break,
            }
        }
    }
    tracing::debug!("Event socket task finished");
}
