//! Bidirectional transport: newline-delimited JSON over WebSocket.
//!
//! Flow per connection:
//! 1. Client upgrades `/ws` with a Bearer token (query parameter or
//!    `Authorization` header).
//! 2. Inbound control messages: `prompt`, `reconnect`,
//!    `permission_response`, `cancel`.
//! 3. Outbound events arrive via the fan-out pump: every bus event
//!    with a wire type is appended to the durable stream and, when the
//!    session has a live socket, written to it.
//!
//! A socket closing never cancels the agent — the session is only
//! marked disconnected and events keep accumulating for replay.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use co_domain::event::{BusEvent, EventOp};
use co_domain::message::Session;
use co_eventlog::{EventLog, StreamPos};

use crate::runtime::{agent::Attachment, AgentCall, EventBus};
use crate::state::AppState;

/// Outbound frames buffered per socket; overflow drops the socket (the
/// client replays on reconnect).
const SEND_QUEUE: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live socket sinks by session id. One socket owns a session at a
/// time; a newer connection displaces the older sink.
pub struct ConnectionRegistry {
    sinks: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub fn attach(&self, session_id: &str, tx: mpsc::Sender<String>) {
        self.sinks.lock().insert(session_id.to_owned(), tx);
    }

    /// Detach only if the stored sink is the given one (a reconnect may
    /// have displaced it already).
    pub fn detach(&self, session_id: &str, tx: &mpsc::Sender<String>) {
        let mut sinks = self.sinks.lock();
        if let Some(current) = sinks.get(session_id) {
            if current.same_channel(tx) {
                sinks.remove(session_id);
            }
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.sinks.lock().remove(session_id);
    }

    /// Non-blocking send. `false` means the socket is gone or
    /// backpressured and should be dropped.
    pub fn send(&self, session_id: &str, frame: String) -> bool {
        let sinks = self.sinks.lock();
        match sinks.get(session_id) {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fan-out pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Background subscriber translating bus events into durable stream
/// appends plus live socket writes. The append happens regardless of
/// connection state; the socket write only when connected.
pub fn spawn_fanout(
    bus: Arc<EventBus>,
    eventlog: Arc<EventLog>,
    connections: Arc<ConnectionRegistry>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(wire_type) = event.stream_type() else {
                continue;
            };
            let Some(session_id) = event.session_id().map(str::to_owned) else {
                continue;
            };
            let payload = event.stream_payload();
            let stream_id = eventlog.publish(&session_id, wire_type, payload.clone());

            if eventlog.is_connected(&session_id) {
                let frame = json!({
                    "type": wire_type,
                    "stream_id": stream_id,
                    "payload": payload,
                })
                .to_string();
                if !connections.send(&session_id, frame) {
                    tracing::debug!(
                        session_id = %session_id,
                        "socket gone or backpressured, demoting to disconnected"
                    );
                    connections.remove(&session_id);
                    eventlog.set_connection_status(&session_id, false);
                }
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound control messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImageSpec {
    Url(String),
    Full {
        url: String,
        #[serde(default)]
        mime_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Prompt {
        #[serde(default, alias = "sessionID")]
        session_id: Option<String>,
        content: String,
        #[serde(default)]
        images: Vec<ImageSpec>,
    },
    Reconnect {
        session_id: String,
        #[serde(rename = "lastMsgId")]
        last_msg_id: String,
    },
    PermissionResponse {
        id: String,
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        granted: bool,
        #[serde(default)]
        denied: bool,
        /// "Always allow this" — adds the invocation to the session
        /// allowlist.
        #[serde(default)]
        always: bool,
    },
    Cancel {
        #[serde(default)]
        session_id: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upgrade & auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token via query parameter (browser clients that cannot
    /// set headers on upgrade).
    pub token: Option<String>,
}

/// Constant-time token comparison via SHA-256 digest (hashing
/// normalizes lengths so `ct_eq` always compares 32 bytes).
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// GET /ws — authenticated upgrade to the bidirectional stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(expected) = &state.config.server.auth_token {
        let provided = query
            .token
            .clone()
            .or_else(|| bearer_from_headers(&headers))
            .unwrap_or_default();
        if !token_eq(&provided, expected) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing token",
            )
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(SEND_QUEUE);

    // Writer task: one frame per line.
    let writer = tokio::spawn(async move {
        while let Some(mut frame) = out_rx.recv().await {
            frame.push('\n');
            if ws_sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // The session this socket currently owns.
    let mut current_session: Option<String> = None;

    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        // Newline-delimited JSON: one frame may carry several messages.
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ClientMessage>(line) {
                Ok(message) => {
                    handle_message(&state, &out_tx, &mut current_session, message).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring unparseable client message");
                    send_error(&out_tx, &format!("unparseable message: {e}")).await;
                }
            }
        }
    }

    // Disconnect: mark the session disconnected but never cancel the
    // agent; events keep accumulating in the durable stream.
    if let Some(session_id) = current_session {
        state.connections.detach(&session_id, &out_tx);
        state.eventlog.set_connection_status(&session_id, false);
        tracing::debug!(session_id = %session_id, "client disconnected mid-session");
    }
    writer.abort();
}

async fn handle_message(
    state: &AppState,
    out_tx: &mpsc::Sender<String>,
    current_session: &mut Option<String>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Prompt {
            session_id,
            content,
            images,
        } => {
            let session_id = match session_id {
                Some(id) => id,
                None => match create_adhoc_session(state) {
                    Ok(id) => id,
                    Err(e) => {
                        send_error(out_tx, &e.to_string()).await;
                        return;
                    }
                },
            };
            adopt_session(state, out_tx, current_session, &session_id);

            let mut call = AgentCall::new(&session_id, content);
            call.attachments = images
                .into_iter()
                .map(|image| match image {
                    ImageSpec::Url(url) => Attachment {
                        url,
                        mime_type: None,
                    },
                    ImageSpec::Full { url, mime_type } => Attachment { url, mime_type },
                })
                .collect();

            // Never block the reader loop on a run.
            let coordinator = state.coordinator.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.run(call).await {
                    tracing::warn!(error = %e, "run failed");
                    send_error(&out_tx, &e.to_string()).await;
                }
            });
        }

        ClientMessage::Reconnect {
            session_id,
            last_msg_id,
        } => {
            adopt_session(state, out_tx, current_session, &session_id);
            replay(state, out_tx, &session_id, &last_msg_id).await;
        }

        ClientMessage::PermissionResponse {
            id,
            tool_call_id: _,
            granted,
            denied,
            always,
        } => {
            if granted && !denied {
                state.broker.grant(&id, always);
            } else {
                state.broker.deny(&id);
            }
        }

        ClientMessage::Cancel { session_id } => {
            let target = session_id.or_else(|| current_session.clone());
            match target {
                Some(id) => state.coordinator.cancel(&id),
                None => send_error(out_tx, "no session to cancel").await,
            }
        }
    }
}

/// Point this socket at a session: live sink + connected flag.
fn adopt_session(
    state: &AppState,
    out_tx: &mpsc::Sender<String>,
    current_session: &mut Option<String>,
    session_id: &str,
) {
    if let Some(previous) = current_session.as_deref() {
        if previous != session_id {
            state.connections.detach(previous, out_tx);
            state.eventlog.set_connection_status(previous, false);
        }
    }
    state.connections.attach(session_id, out_tx.clone());
    state.eventlog.set_connection_status(session_id, true);
    *current_session = Some(session_id.to_owned());
}

fn create_adhoc_session(state: &AppState) -> co_domain::Result<String> {
    let session = Session::new("default", "New session");
    state.store.create_session(&session)?;
    state.bus.publish(BusEvent::Session {
        op: EventOp::Created,
        session: session.clone(),
    });
    Ok(session.id)
}

/// Replay all stream entries strictly after the client's last seen id,
/// then send `reconnection_status` and a fresh `session_update`.
async fn replay(
    state: &AppState,
    out_tx: &mpsc::Sender<String>,
    session_id: &str,
    last_msg_id: &str,
) {
    // A fresh process may need to rehydrate this session's log first.
    state.eventlog.load_snapshot(session_id);

    let start = if last_msg_id.is_empty() {
        StreamPos::Start
    } else {
        match last_msg_id.parse::<StreamPos>() {
            Ok(pos) => pos,
            Err(_) => {
                send_error(out_tx, &format!("invalid lastMsgId: {last_msg_id}")).await;
                return;
            }
        }
    };

    let (entries, last_stream_id) = state.eventlog.read_from(session_id, start, usize::MAX);
    let replayed = entries.len();
    for entry in entries {
        let frame = json!({
            "_replay": true,
            "_streamId": entry.stream_id,
            "_type": entry.entry_type,
            "_payload": entry.payload,
        })
        .to_string();
        if out_tx.send(frame).await.is_err() {
            return;
        }
    }

    let status = json!({
        "type": "reconnection_status",
        "payload": {
            "messages_replayed": replayed,
            "generation_active": state.eventlog.is_active(session_id),
            "last_stream_id": last_stream_id,
        }
    })
    .to_string();
    let _ = out_tx.send(status).await;

    // Fresh counters/context so the client does not wait for the next
    // natural session event.
    match state.store.get_session(session_id) {
        Ok(Some(session)) => {
            let frame = json!({
                "type": "session_update",
                "payload": session,
            })
            .to_string();
            let _ = out_tx.send(frame).await;
        }
        Ok(None) => send_error(out_tx, &format!("unknown session: {session_id}")).await,
        Err(e) => send_error(out_tx, &e.to_string()).await,
    }
}

async fn send_error(out_tx: &mpsc::Sender<String>, message: &str) {
    let frame = json!({"type": "error", "payload": {"message": message}}).to_string();
    let _ = out_tx.send(frame).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_eq_constant_time_compare() {
        assert!(token_eq("secret", "secret"));
        assert!(!token_eq("secret", "Secret"));
        assert!(!token_eq("", "secret"));
    }

    #[test]
    fn prompt_message_parses_with_alias() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"prompt","sessionID":"s1","content":"hello"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Prompt {
                session_id,
                content,
                images,
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(content, "hello");
                assert!(images.is_empty());
            }
            other => panic!("expected Prompt, got {other:?}"),
        }
    }

    #[test]
    fn prompt_images_accept_strings_and_objects() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"prompt","content":"look","images":[
                "https://x/a.png",
                {"url":"https://x/b.jpg","mime_type":"image/jpeg"}
            ]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Prompt { images, .. } => assert_eq!(images.len(), 2),
            other => panic!("expected Prompt, got {other:?}"),
        }
    }

    #[test]
    fn reconnect_message_parses_camel_case_id() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"reconnect","session_id":"s1","lastMsgId":"42"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Reconnect {
                session_id,
                last_msg_id,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(last_msg_id, "42");
            }
            other => panic!("expected Reconnect, got {other:?}"),
        }
    }

    #[test]
    fn permission_response_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"permission_response","id":"p1","tool_call_id":"tc1","granted":true,"denied":false}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PermissionResponse {
                id, granted, denied, always, ..
            } => {
                assert_eq!(id, "p1");
                assert!(granted);
                assert!(!denied);
                assert!(!always);
            }
            other => panic!("expected PermissionResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_send_reports_backpressure() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel::<String>(1);
        registry.attach("s1", tx);

        assert!(registry.send("s1", "a".into()));
        // Buffer full now.
        assert!(!registry.send("s1", "b".into()));
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(!registry.send("ghost", "x".into()));
    }

    #[tokio::test]
    async fn registry_detach_only_removes_own_sink() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx) = mpsc::channel::<String>(1);
        let (new_tx, mut new_rx) = mpsc::channel::<String>(1);
        registry.attach("s1", old_tx.clone());
        // Reconnect displaces the old sink.
        registry.attach("s1", new_tx);
        // The old socket's teardown must not kick out the new one.
        registry.detach("s1", &old_tx);
        assert!(registry.send("s1", "still here".into()));
        assert_eq!(new_rx.recv().await.unwrap(), "still here");
    }
}
