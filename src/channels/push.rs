//! Push strategy: one WebSocket connection to the platform's real-time
//! endpoint.
//!
//! Frames are JSON text, either one object or an array of objects:
//! `{type, user_id, nickname, avatar?, content?, msg_id?}`. The read loop
//! ends on close or read error and the channel becomes `Stopped`; there is
//! no automatic reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::channels::api::null_as_default;
use crate::channels::channel::Strategy;
use crate::channels::platform_channel::{ChannelShared, LoopSet};
use crate::error::ChannelError;
use crate::event::{Event, EventType};

pub(crate) type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    nickname: String,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    msg_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrameBatch {
    Many(Vec<PushFrame>),
    One(PushFrame),
}

/// Open the push connection for `room_id`.
pub(crate) async fn connect(
    name: &str,
    push_url: &str,
    room_id: &str,
    app_id: &str,
    token: Option<&SecretString>,
) -> Result<PushStream, ChannelError> {
    let connect_failed = |reason: String| ChannelError::ConnectFailed {
        name: name.to_string(),
        reason,
    };

    let mut endpoint = Url::parse(push_url).map_err(|e| connect_failed(e.to_string()))?;
    endpoint
        .query_pairs_mut()
        .append_pair("room_id", room_id)
        .append_pair("app_id", app_id);

    let mut request = endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| connect_failed(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| connect_failed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, _response) = tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| connect_failed(format!("timed out after {:?}", CONNECT_TIMEOUT)))?
    .map_err(|e| connect_failed(e.to_string()))?;

    tracing::info!(channel = name, room_id, "Push connection established");
    Ok(stream)
}

/// Spawn the read loop. Returns its loop handle and the outbound frame
/// sender used by `send_message`.
pub(crate) fn spawn(shared: Arc<ChannelShared>, stream: PushStream) -> (LoopSet, mpsc::Sender<String>) {
    let mut loops = LoopSet::new();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let shutdown = loops.subscribe();
    loops.push(tokio::spawn(run(shared, stream, rx, shutdown)));
    (loops, tx)
}

async fn run(
    shared: Arc<ChannelShared>,
    mut stream: PushStream,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = stream.close(None).await {
                    tracing::debug!(channel = %shared.name, error = %e, "Push close handshake failed");
                }
                break;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = stream.send(Message::text(frame)).await {
                    tracing::warn!(channel = %shared.name, error = %e, "Failed to write push frame");
                    shared.record_error(&e.to_string()).await;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match parse_frame(&shared, text.as_str()) {
                    Ok(events) => {
                        for event in events {
                            shared.emit(event).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %shared.name, error = %e, "Dropping malformed push frame");
                        shared.record_error(&e.to_string()).await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(channel = %shared.name, "Push connection closed by peer");
                    shared.mark_failed("push connection closed").await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(channel = %shared.name, error = %e, "Push read failed");
                    shared.mark_failed(&e.to_string()).await;
                    break;
                }
            },
        }
    }
}

/// Parse one text frame into zero or more events. Unknown frame types are
/// skipped.
pub(crate) fn parse_frame(shared: &ChannelShared, text: &str) -> Result<Vec<Event>, ChannelError> {
    let batch: FrameBatch =
        serde_json::from_str(text).map_err(|e| ChannelError::Parse(e.to_string()))?;
    let frames = match batch {
        FrameBatch::Many(frames) => frames,
        FrameBatch::One(frame) => vec![frame],
    };

    let events = frames
        .into_iter()
        .filter_map(|frame| {
            let event_type = match frame.kind.as_str() {
                "enter" => EventType::Enter,
                "comment" => EventType::Comment,
                "like" => EventType::Like,
                "follow" => EventType::Follow,
                "gift" => EventType::Gift,
                other => {
                    tracing::debug!(channel = %shared.name, frame_type = other, "Ignoring push frame type");
                    return None;
                }
            };

            let mut event = shared
                .event(event_type, frame.user_id, frame.nickname, Strategy::Push)
                .with_room(shared.room_id.clone().unwrap_or_default());
            if let Some(avatar) = frame.avatar {
                event = event.with_avatar(avatar);
            }
            if let Some(content) = frame.content {
                event = event.with_content(content);
            }
            if let Some(msg_id) = frame.msg_id.filter(|id| !id.is_empty()) {
                event = event.with_metadata("msg_id", msg_id);
            }
            Some(event)
        })
        .collect();

    Ok(events)
}
