//! WebSocket connection handler — one task per connected client.
//!
//! DESIGN
//! ======
//! Grounded on the teacher's `routes/ws.rs` upgrade-then-`select!` shape:
//! generate a connection id, authenticate, then loop over inbound client
//! frames and outbound board-hub broadcasts until either side closes. Kept
//! from the teacher: the single `select!` loop, cleanup-on-disconnect
//! broadcasting a departure event, and "every request gets a reply" (frame.rs
//! says so in its own header — this handler never special-cases a syscall
//! into a silent no-reply path).
//!
//! Generalized from the teacher's binary-frame/syscall-prefix dispatch to
//! the full board-event list, and from its single shared `AppState.boards`
//! map to routing every event through the hub the syscall's `board_id`
//! names (`HubRegistry::get_or_create`). Rate limiting and schema
//! validation run in that order before anything reaches a hub's
//! channel; a validation failure replies with an error frame and keeps the
//! connection open, a rate-limit breach replies with an error frame and
//! closes it.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → extract bearer token → `IdentityProvider::verify`
//! 2. Claim the per-user connection slot; a superseded earlier connection is
//! sent `DUPLICATE_SESSION` and closed.
//! 3. `select!` loop: inbound client frame → rate limit → validate →
//! dispatch to the named board's hub → reply; hub broadcast → forward.
//! 4. Close → `board:leave` the joined board (if any) → release presence,
//! rate-limit state, and the connection-registry slot.

pub mod rate_limit;
pub mod validator;

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::UserIdentity;
use crate::frame::{Data, Frame, Status};
use crate::hub::{HubMessageKind, HubRequest};
use crate::state::AppState;
use validator::ValidationError;

const WS_OUTBOUND_CHANNEL_CAPACITY: usize = 256;

fn extract_bearer_token(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_owned());
        }
    }
    params.get("token").cloned()
}

/// Axum handler for the WebSocket upgrade route. Authentication happens
/// before the upgrade completes — a missing or rejected token never reaches
/// the connection loop.
pub async fn handle_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = extract_bearer_token(&headers, &params) else {
        return (StatusCode::UNAUTHORIZED, "bearer token required").into_response();
    };
    let identity = match state.identity.verify(&token).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(%err, "websocket handshake rejected");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };
    ws.on_upgrade(move |socket| run_connection(socket, state, identity))
}

async fn run_connection(mut socket: WebSocket, state: AppState, identity: UserIdentity) {
    let connection_id = Uuid::new_v4();
    let user_id = identity.user_id;

    let (mut kill_rx, previous) = state.connections.claim(user_id, connection_id).await;
    if let Some(prev_kill) = previous {
        let _ = prev_kill.send(()).await;
    }

    let session = crate::models::Session { connection_id, user_id, board_id: None, connected_at: chrono::Utc::now() };
    let _ = state.presence.put_session(&session).await;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(WS_OUTBOUND_CHANNEL_CAPACITY);
    let mut current_board: Option<Uuid> = None;

    state.metrics.incr_gauge("connections_active", 1);
    info!(%connection_id, %user_id, "connection authenticated");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        if !handle_inbound(&state, &mut socket, &mut current_board, connection_id, user_id, &identity, &outbound_tx, &text).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = outbound_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            _ = kill_rx.recv() => {
                let duplicate = Frame::request("board:error", Data::new()).with_data("code", "DUPLICATE_SESSION").with_data("message", "another connection authenticated as this user");
                let _ = send_frame(&mut socket, &duplicate).await;
                break;
            }
        }
    }

    teardown(&state, current_board, connection_id, user_id).await;
    info!(%connection_id, %user_id, "connection closed");
}

async fn teardown(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid) {
    state.metrics.incr_gauge("connections_active", -1);
    if let Some(board_id) = current_board {
        let hub = state.hubs.get_or_create(board_id).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Frame::request("board:left", Data::new()).with_board_id(board_id);
        if hub.send(HubRequest { connection_id, user_id, frame: request, kind: HubMessageKind::Unsubscribe, reply: reply_tx }).await {
            let _ = reply_rx.await;
        }
    }
    // Backstop for any board this process still thinks the user is present
    // on but that this connection never tracked as `current_board` (e.g. a
    // crash recovery path) — invariant 5.
    let stale_boards = state.presence.remove_user_from_all_boards(user_id).await.unwrap_or_default();
    for board_id in stale_boards {
        if Some(board_id) == current_board {
            continue;
        }
        let hub = state.hubs.get_or_create(board_id).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Frame::request("user:left", Data::new()).with_board_id(board_id);
        if hub.send(HubRequest { connection_id, user_id, frame: request, kind: HubMessageKind::PresenceGone, reply: reply_tx }).await {
            let _ = reply_rx.await;
        }
    }
    state.rate_limiter.remove(connection_id);
    state.connections.release(user_id, connection_id).await;
    let _ = state.presence.remove_session(connection_id).await;
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}

/// Returns `false` if the connection must be torn down (a rate-limit
/// breach); `true` to keep reading.
#[allow(clippy::too_many_arguments)]
async fn handle_inbound(
    state: &AppState,
    socket: &mut WebSocket,
    current_board: &mut Option<Uuid>,
    connection_id: Uuid,
    user_id: Uuid,
    identity: &UserIdentity,
    outbound_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> bool {
    let inbound: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            let placeholder = Frame::request("unknown", Data::new());
            let _ = send_frame(socket, &placeholder.error("malformed frame: not valid JSON")).await;
            return true;
        }
    };

    state.metrics.record_ws_event(&inbound.syscall);

    let limited =
    if inbound.syscall == "cursor:move" { state.rate_limiter.check_cursor(connection_id) } else { state.rate_limiter.check_event(connection_id) };
    if let Err(err) = limited {
        let _ = send_frame(socket, &inbound.error_from(&err)).await;
        return false;
    }

    let reply = dispatch(state, current_board, connection_id, user_id, identity, outbound_tx, &inbound).await;
    let frame = match reply {
        Ok(frame) | Err(frame) => frame,
    };
    let _ = send_frame(socket, &frame).await;
    true
}

fn board_id_of(inbound: &Frame) -> Result<Uuid, ValidationError> {
    let raw = validator::required_str("board_id", inbound.data.get("board_id"))?;
    validator::uuid_field("board_id", raw)
}

fn require_joined(current_board: Option<Uuid>, board_id: Uuid) -> Result<(), ValidationError> {
    if current_board == Some(board_id) { Ok(()) } else { Err(ValidationError::NotOnBoard) }
}

/// Every syscall resolves to exactly one outbound frame — either the hub's
/// `done`/`done_with` reply or an `error` frame. Broadcasts to *other*
/// subscribers are the hub's concern; this function only ever
/// produces the reply owed to the connection that sent the request.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AppState,
    current_board: &mut Option<Uuid>,
    connection_id: Uuid,
    user_id: Uuid,
    identity: &UserIdentity,
    outbound_tx: &mpsc::Sender<Frame>,
    inbound: &Frame,
) -> Result<Frame, Frame> {
    match inbound.syscall.as_str() {
        "board:join" => handle_join(state, current_board, connection_id, user_id, identity, outbound_tx, inbound).await,
        "board:leave" => handle_leave(state, current_board, connection_id, user_id, inbound).await,
        "cursor:move" => handle_cursor_move(state, *current_board, connection_id, user_id, inbound).await,
        "heartbeat" => handle_heartbeat(state, *current_board, connection_id, user_id, inbound).await,
        "object:create" => handle_object_create(state, *current_board, connection_id, user_id, inbound).await,
        "object:update" => handle_object_update(state, *current_board, connection_id, user_id, inbound).await,
        "object:delete" => handle_object_delete(state, *current_board, connection_id, user_id, inbound).await,
        "objects:batch_create" => handle_batch_create(state, *current_board, connection_id, user_id, inbound).await,
        "objects:batch_move" => handle_batch_move(state, *current_board, connection_id, user_id, inbound).await,
        "edit:start" => handle_edit_start(state, *current_board, connection_id, user_id, inbound).await,
        "edit:end" => handle_edit_end(state, *current_board, connection_id, user_id, inbound).await,
        other => Err(inbound.error_from(&ValidationError::UnknownSyscall { syscall: other.to_owned() })),
    }
}

/// Round-trips one `HubMessageKind` through the board's hub and returns
/// whatever it replies with, synthesizing an error frame if the hub task
/// has already exited (a retiring hub racing a late message,).
async fn round_trip(state: &AppState, board_id: Uuid, connection_id: Uuid, user_id: Uuid, frame: Frame, kind: HubMessageKind) -> Frame {
    let hub = state.hubs.get_or_create(board_id).await;
    let (reply_tx, reply_rx) = oneshot::channel();
    let unavailable = || Frame::request(frame.syscall.clone(), Data::new()).with_board_id(board_id).error("board hub unavailable, retry");
    if !hub.send(HubRequest { connection_id, user_id, frame: frame.clone(), kind, reply: reply_tx }).await {
        return unavailable();
    }
    reply_rx.await.unwrap_or_else(|_| unavailable())
}

async fn handle_join(
    state: &AppState,
    current_board: &mut Option<Uuid>,
    connection_id: Uuid,
    user_id: Uuid,
    identity: &UserIdentity,
    outbound_tx: &mpsc::Sender<Frame>,
    inbound: &Frame,
) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    let request = Frame::request("board:state", Data::new()).with_board_id(board_id);
    let kind = HubMessageKind::Subscribe {
        user_name: identity.name.clone(),
        avatar: identity.avatar.clone(),
        color: identity.color.clone(),
        outbound: outbound_tx.clone(),
    };
    let reply = round_trip(state, board_id, connection_id, user_id, request, kind).await;
    if reply.status == Status::Error {
        return Err(reply);
    }
    *current_board = Some(board_id);
    Ok(reply)
}

async fn handle_leave(state: &AppState, current_board: &mut Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(*current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let request = Frame::request("board:leave", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::Unsubscribe).await;
    *current_board = None;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_cursor_move(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let x = validator::required_f64("x", inbound.data.get("x")).map_err(|e| inbound.error_from(&e))?;
    let y = validator::required_f64("y", inbound.data.get("y")).map_err(|e| inbound.error_from(&e))?;
    validator::coordinate("x", x).map_err(|e| inbound.error_from(&e))?;
    validator::coordinate("y", y).map_err(|e| inbound.error_from(&e))?;

    let mut data = Data::new();
    data.insert("x".into(), serde_json::json!(x));
    data.insert("y".into(), serde_json::json!(y));
    let request = Frame::request("cursor:move", Data::new()).with_board_id(board_id);
    Ok(round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::CursorMove { data }).await)
}

async fn handle_heartbeat(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let request = Frame::request("heartbeat", Data::new()).with_board_id(board_id);
    Ok(round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::Heartbeat).await)
}

async fn handle_object_create(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let raw_object = validator::required("object", inbound.data.get("object")).map_err(|e| inbound.error_from(&e))?;
    let object = validator::parse_and_validate_object(raw_object, user_id).map_err(|e| inbound.error_from(&e))?;

    let request = Frame::request("object:created", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::ObjectCreate { object }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_object_update(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let object_id_raw = validator::required_str("object_id", inbound.data.get("object_id")).map_err(|e| inbound.error_from(&e))?;
    let object_id = validator::uuid_field("object_id", object_id_raw).map_err(|e| inbound.error_from(&e))?;
    let updates = validator::required("updates", inbound.data.get("updates")).map_err(|e| inbound.error_from(&e))?.as_object().cloned().ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "updates" }))?;
    validator::validate_patch_fields(&updates).map_err(|e| inbound.error_from(&e))?;

    let request = Frame::request("object:updated", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::ObjectUpdate { id: object_id, patch: updates }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_object_delete(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let object_id_raw = validator::required_str("object_id", inbound.data.get("object_id")).map_err(|e| inbound.error_from(&e))?;
    let object_id = validator::uuid_field("object_id", object_id_raw).map_err(|e| inbound.error_from(&e))?;

    let request = Frame::request("object:deleted", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::ObjectDelete { id: object_id }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_batch_create(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let raw_objects = validator::required("objects", inbound.data.get("objects")).map_err(|e| inbound.error_from(&e))?.as_array().cloned().ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "objects" }))?;
    validator::batch_len(raw_objects.len()).map_err(|e| inbound.error_from(&e))?;

    let mut objects = Vec::with_capacity(raw_objects.len());
    for raw in &raw_objects {
        objects.push(validator::parse_and_validate_object(raw, user_id).map_err(|e| inbound.error_from(&e))?);
    }

    let request = Frame::request("objects:batch_created", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::BatchCreate { objects }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_batch_move(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let raw_moves = validator::required("moves", inbound.data.get("moves")).map_err(|e| inbound.error_from(&e))?.as_array().cloned().ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "moves" }))?;
    validator::batch_len(raw_moves.len()).map_err(|e| inbound.error_from(&e))?;

    let mut patches = Vec::with_capacity(raw_moves.len());
    for raw in &raw_moves {
        let mut patch = raw.as_object().cloned().ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "moves" }))?;
        let id_value = patch.remove("object_id").ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "object_id" }))?;
        let id_str = id_value.as_str().ok_or_else(|| inbound.error_from(&ValidationError::MissingField { field: "object_id" }))?;
        let object_id = validator::uuid_field("object_id", id_str).map_err(|e| inbound.error_from(&e))?;
        validator::validate_patch_fields(&patch).map_err(|e| inbound.error_from(&e))?;
        patches.push((object_id, patch));
    }

    let request = Frame::request("objects:batch_moved", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::BatchMove { patches }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_edit_start(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let object_id_raw = validator::required_str("object_id", inbound.data.get("object_id")).map_err(|e| inbound.error_from(&e))?;
    let object_id = validator::uuid_field("object_id", object_id_raw).map_err(|e| inbound.error_from(&e))?;

    let request = Frame::request("edit:start", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::EditStart { object_id }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

async fn handle_edit_end(state: &AppState, current_board: Option<Uuid>, connection_id: Uuid, user_id: Uuid, inbound: &Frame) -> Result<Frame, Frame> {
    let board_id = board_id_of(inbound).map_err(|e| inbound.error_from(&e))?;
    require_joined(current_board, board_id).map_err(|e| inbound.error_from(&e))?;
    let object_id_raw = validator::required_str("object_id", inbound.data.get("object_id")).map_err(|e| inbound.error_from(&e))?;
    let object_id = validator::uuid_field("object_id", object_id_raw).map_err(|e| inbound.error_from(&e))?;

    let request = Frame::request("edit:end", Data::new()).with_board_id(board_id);
    let reply = round_trip(state, board_id, connection_id, user_id, request, HubMessageKind::EditEnd { object_id }).await;
    if reply.status == Status::Error { Err(reply) } else { Ok(reply) }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
