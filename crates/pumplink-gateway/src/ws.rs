//! WebSocket handler for the conversational gateway.
//!
//! The `/ws` endpoint upgrades an HTTP connection to a WebSocket. The
//! credential is extracted before the upgrade (query parameter, cookie,
//! or subprotocol, in that priority order) and verified; a failed
//! verification still completes the upgrade but immediately closes the
//! socket with the policy-violation code (1008) -- no session is spawned
//! and no store call is made.
//!
//! On success the handler sends `connected`, spawns the per-session FIFO
//! worker, registers its handle, then multiplexes with `tokio::select!`
//! between outbound session events, inbound client frames, and the
//! process-wide shutdown token (which closes with code 1000).

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use pumplink_core::auth::TokenVerifier;
use pumplink_core::session::{SessionLimits, spawn_session};
use pumplink_types::error::AuthError;
use pumplink_types::event::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ClientEvent, ServerEvent};
use pumplink_types::identity::UserIdentity;

use crate::state::AppState;

/// Upgrade an HTTP request to a WebSocket chat connection.
///
/// This is mounted at `/ws` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let credential = extract_credential(query.as_deref(), &headers);
    let identity = match &credential {
        Some(credential) => state.verifier.verify(&credential.value).await,
        None => Err(AuthError::Missing),
    };

    // A token offered as a subprotocol has to be selected in the 101
    // response, or the client side fails the handshake (RFC 6455 §4.1).
    let ws = match credential {
        Some(Credential {
            value,
            from_protocol_header: true,
        }) => ws.protocols([value]),
        _ => ws,
    };

    ws.on_upgrade(move |socket| handle_ws_connection(socket, identity, state))
}

/// A credential found in the handshake request.
struct Credential {
    value: String,
    /// The token arrived as a `Sec-WebSocket-Protocol` entry and must be
    /// echoed back on upgrade.
    from_protocol_header: bool,
}

/// Pull the credential from the first transport location carrying one:
/// `token` query parameter, then `token` cookie, then a
/// `Sec-WebSocket-Protocol` entry beginning with the token prefix.
fn extract_credential(query: Option<&str>, headers: &HeaderMap) -> Option<Credential> {
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(("token", value)) = pair.split_once('=')
                && !value.is_empty()
            {
                return Some(Credential {
                    value: value.to_string(),
                    from_protocol_header: false,
                });
            }
        }
    }

    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookies.split(';') {
            if let Some(value) = part.trim().strip_prefix("token=")
                && !value.is_empty()
            {
                return Some(Credential {
                    value: value.to_string(),
                    from_protocol_header: false,
                });
            }
        }
    }

    if let Some(protocols) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        for entry in protocols.split(',') {
            let entry = entry.trim();
            if entry.starts_with("plk_") {
                return Some(Credential {
                    value: entry.to_string(),
                    from_protocol_header: true,
                });
            }
        }
    }

    None
}

/// Core WebSocket connection handler.
async fn handle_ws_connection(
    mut socket: WebSocket,
    identity: Result<UserIdentity, AuthError>,
    state: AppState,
) {
    let user = match identity {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(error = %err, "Rejecting unauthenticated connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    if send_event(&mut ws_sender, &ServerEvent::Connected).await.is_err() {
        return;
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let limits = SessionLimits {
        context_messages: state.config.context_messages,
        history_messages: state.config.history_messages,
    };
    let handle = spawn_session(
        user,
        state.repo.clone(),
        state.relay.clone(),
        limits,
        out_tx,
    );
    let session_id = handle.session_id;
    state.sessions.insert(session_id, handle.clone());

    loop {
        tokio::select! {
            // --- Branch 1: Forward session replies to the client ---
            event = out_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut ws_sender, &event).await.is_err() {
                            break;
                        }
                    }
                    // Worker stopped; nothing more will arrive.
                    None => break,
                }
            }

            // --- Branch 2: Queue client events onto the session ---
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if !handle.submit(event) {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(error = %err, "Malformed client event");
                                let reply = ServerEvent::Error {
                                    message: format!("malformed event: {err}"),
                                };
                                if send_event(&mut ws_sender, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Client disconnected
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "WebSocket receive error");
                        break;
                    }
                    // Ignore binary, ping, pong protocol frames
                    Some(Ok(_)) => {}
                }
            }

            // --- Branch 3: Server shutdown ---
            _ = state.shutdown.cancelled() => {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_NORMAL,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    // Dropping the handle lets an in-flight turn finish its store writes
    // before the worker exits; the reply is simply not deliverable.
    state.sessions.remove(&session_id);
    tracing::debug!(session_id = %session_id, "WebSocket connection closed");
}

async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to serialize server event");
            return Ok(());
        }
    };
    ws_sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
