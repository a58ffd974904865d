//! Board hub — one `tokio::spawn`ed task per active
//! board, the sole writer for that board's cached state.
//!
//! DESIGN
//! ======
//! Task/channel/`select!` shape grounded on the teacher's
//! `spawn_frame_persistence_worker` (`services/persistence.rs`); the
//! sender-reply-vs-peer-broadcast split grounded on `routes/ws.rs`'s
//! `Outcome`-returning handlers, generalized here to one hub task per
//! board (rather than a shared `AppState` map) so every mutation for a
//! board serializes through exactly one writer.
//!
//! A reliable-class broadcast that can't fit a subscriber's bounded
//! outbound buffer disconnects that subscriber by dropping its sender —
//! the connection task's `mpsc::Receiver::recv` then observes the
//! channel closed and tears the socket down.
//! Lossy-class broadcasts (`cursor:moved`) are dropped silently instead.

pub mod object;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::cache::edit_lock::{EditLockRegistry, EditStartOutcome};
use crate::cache::presence::PresenceRegistry;
use crate::cache::state::StateCache;
use crate::frame::{Data, ErrorCode, Frame};
use crate::metrics::Metrics;
use crate::models::{BoardObject, CachedBoardState, PresenceRecord};
use crate::repository::board::BoardRepository;

const HUB_INBOX_CAPACITY: usize = 256;

/// How long a hub with zero subscribers keeps its in-memory state before
/// retiring, so a quick rejoin doesn't force a cold reload from the cache.
const IDLE_RETIRE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("board {0} is not loaded")]
    BoardNotLoaded(Uuid),
    #[error(transparent)]
    Create(#[from] object::CreateError),
    #[error(transparent)]
    NotFound(#[from] object::NotFoundError),
    #[error("batch of {0} exceeds the maximum of {1}")]
    BatchTooLarge(usize, usize),
}

impl ErrorCode for HubError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BoardNotLoaded(_) => "E_NOT_FOUND",
            Self::Create(e) => e.error_code(),
            Self::NotFound(e) => e.error_code(),
            Self::BatchTooLarge(_, _) => "E_VALIDATION",
        }
    }
}

/// One message kind "message kinds handled".
pub enum HubMessageKind {
    Subscribe { user_name: String, avatar: Option<String>, color: String, outbound: mpsc::Sender<Frame> },
    Unsubscribe,
    /// Backstop for a board this hub never saw a live `Subscribe` for on
    /// this connection (stale presence from a crash/race) — broadcasts
    /// `user:left` by `user_id` alone, with no subscriber entry required.
    PresenceGone,
    CursorMove { data: serde_json::Map<String, serde_json::Value> },
    Heartbeat,
    ObjectCreate { object: BoardObject },
    ObjectUpdate { id: Uuid, patch: serde_json::Map<String, serde_json::Value> },
    ObjectDelete { id: Uuid },
    BatchCreate { objects: Vec<BoardObject> },
    BatchMove { patches: Vec<(Uuid, serde_json::Map<String, serde_json::Value>)> },
    EditStart { object_id: Uuid },
    EditEnd { object_id: Uuid },
}

/// A message sent to a board hub. `frame` is the inbound request the
/// connection handler is servicing — the hub replies by calling
/// `frame.done_with`/`frame.error_from` on it, inheriting correlation.
pub struct HubRequest {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub frame: Frame,
    pub kind: HubMessageKind,
    pub reply: oneshot::Sender<Frame>,
}

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    /// Send a request to the hub. Returns `false` if the hub task has
    /// already exited (the caller should retry via `HubRegistry` to get a
    /// freshly spawned one).
    pub async fn send(&self, request: HubRequest) -> bool {
        self.tx.send(request).await.is_ok()
    }
}

/// Dependencies every hub task shares, independent of which board it
/// serves.
#[derive(Clone)]
pub struct HubDeps {
    pub state_cache: Arc<StateCache>,
    pub presence: Arc<PresenceRegistry>,
    pub edit_locks: Arc<EditLockRegistry>,
    pub repository: Arc<dyn BoardRepository>,
    pub metrics: Arc<Metrics>,
    pub max_objects_per_board: usize,
    pub max_batch_size: usize,
}

/// Creates hub tasks lazily on first subscribe, analogous to the
/// teacher's `AppState::boards` map but holding hub *handles* rather than
/// the mutable state directly.
pub struct HubRegistry {
    hubs: RwLock<HashMap<Uuid, HubHandle>>,
    deps: HubDeps,
}

impl HubRegistry {
    #[must_use]
    pub fn new(deps: HubDeps) -> Arc<Self> {
        Arc::new(Self { hubs: RwLock::new(HashMap::new()), deps })
    }

    /// Returns the existing hub for `board_id`, or spawns a fresh one.
    pub async fn get_or_create(self: &Arc<Self>, board_id: Uuid) -> HubHandle {
        if let Some(handle) = self.hubs.read().await.get(&board_id) {
            return handle.clone();
        }
        let mut hubs = self.hubs.write().await;
        if let Some(handle) = hubs.get(&board_id) {
            return handle.clone();
        }
        let handle = spawn_hub(board_id, self.deps.clone(), Arc::clone(self));
        hubs.insert(board_id, handle.clone());
        handle
    }

    async fn retire(&self, board_id: Uuid) {
        self.hubs.write().await.remove(&board_id);
        info!(%board_id, "hub retired");
    }
}

struct Subscriber {
    user_id: Uuid,
    user_name: String,
    outbound: mpsc::Sender<Frame>,
}

fn spawn_hub(board_id: Uuid, deps: HubDeps, registry: Arc<HubRegistry>) -> HubHandle {
    let (tx, mut rx) = mpsc::channel::<HubRequest>(HUB_INBOX_CAPACITY);

    tokio::spawn(async move {
        let mut state: Option<CachedBoardState> = None;
        let mut subscribers: HashMap<Uuid, Subscriber> = HashMap::new();

        loop {
            let next = if subscribers.is_empty() {
                tokio::select! {
                    req = rx.recv() => req,
                    _ = tokio::time::sleep(IDLE_RETIRE_AFTER) => {
                        info!(%board_id, "hub idle-stopped");
                        break;
                    }
                }
            } else {
                rx.recv().await
            };

            let Some(req) = next else { break };
            handle_message(board_id, &deps, &mut state, &mut subscribers, req).await;
        }

        registry.retire(board_id).await;
    });

    HubHandle { tx }
}

async fn ensure_state<'a>(
    deps: &HubDeps,
    board_id: Uuid,
    state: &'a mut Option<CachedBoardState>,
) -> Result<&'a mut CachedBoardState, HubError> {
    if state.is_none() {
        let loaded = match deps.state_cache.get_state(board_id).await {
            Ok(Some(s)) => s,
            _ => deps.state_cache.load_from_durable(board_id, deps.repository.as_ref()).await.map_err(|_| HubError::BoardNotLoaded(board_id))?,
        };
        *state = Some(loaded);
    }
    Ok(state.as_mut().expect("just populated"))
}

/// Reliable-class broadcast: every full/closed outbound buffer disconnects
/// its owner.
fn broadcast_reliable(subscribers: &mut HashMap<Uuid, Subscriber>, frame: &Frame, exclude: Option<Uuid>) {
    let mut dead = Vec::new();
    for (connection_id, sub) in subscribers.iter() {
        if Some(*connection_id) == exclude {
            continue;
        }
        if sub.outbound.try_send(frame.clone()).is_err() {
            dead.push(*connection_id);
        }
    }
    for id in dead {
        subscribers.remove(&id);
    }
}

/// Lossy-class broadcast: a full buffer silently drops the frame.
fn broadcast_lossy(subscribers: &HashMap<Uuid, Subscriber>, frame: &Frame, exclude: Option<Uuid>) {
    for (connection_id, sub) in subscribers.iter() {
        if Some(*connection_id) == exclude {
            continue;
        }
        let _ = sub.outbound.try_send(frame.clone());
    }
}

/// Label used for the hub's own `ws_event_total{event}` counter — distinct
/// from the inbound syscall name recorded in `connection::handle_inbound`,
/// since some kinds (`PresenceGone`) never pass through that dispatch.
fn message_kind_label(kind: &HubMessageKind) -> &'static str {
    match kind {
        HubMessageKind::Subscribe { .. } => "board:join",
        HubMessageKind::Unsubscribe => "board:leave",
        HubMessageKind::PresenceGone => "presence:gone",
        HubMessageKind::CursorMove { .. } => "cursor:move",
        HubMessageKind::Heartbeat => "heartbeat",
        HubMessageKind::ObjectCreate { .. } => "object:create",
        HubMessageKind::ObjectUpdate { .. } => "object:update",
        HubMessageKind::ObjectDelete { .. } => "object:delete",
        HubMessageKind::BatchCreate { .. } => "objects:batch_create",
        HubMessageKind::BatchMove { .. } => "objects:batch_move",
        HubMessageKind::EditStart { .. } => "edit:start",
        HubMessageKind::EditEnd { .. } => "edit:end",
    }
}

async fn handle_message(
    board_id: Uuid,
    deps: &HubDeps,
    state: &mut Option<CachedBoardState>,
    subscribers: &mut HashMap<Uuid, Subscriber>,
    req: HubRequest,
) {
    deps.metrics.record_ws_event(message_kind_label(&req.kind));

    match req.kind {
        HubMessageKind::Subscribe { user_name, avatar, color, outbound } => {
            let snapshot = match ensure_state(deps, board_id, state).await {
                Ok(s) => s.clone(),
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                    return;
                }
            };

            let record = PresenceRecord {
                user_id: req.user_id,
                board_id,
                name: user_name.clone(),
                avatar,
                color,
                last_heartbeat: Utc::now(),
            };
            let _ = deps.presence.add_user(&record).await;
            let presence_list = deps.presence.list_users(board_id).await.unwrap_or_default();

            subscribers.insert(req.connection_id, Subscriber { user_id: req.user_id, user_name, outbound });

            let mut data = Data::new();
            data.insert("objects".into(), serde_json::to_value(&snapshot.objects).unwrap_or_default());
            data.insert("presence".into(), serde_json::to_value(&presence_list).unwrap_or_default());
            let reply = req.frame.done_with(data);
            let _ = req.reply.send(reply);

            let mut joined = Data::new();
            joined.insert("user_id".into(), serde_json::json!(req.user_id));
            let frame = Frame::request("user:joined", joined).with_board_id(board_id);
            broadcast_reliable(subscribers, &frame, Some(req.connection_id));
        }

        HubMessageKind::Unsubscribe => {
            if let Some(sub) = subscribers.remove(&req.connection_id) {
                let _ = deps.presence.remove_user(board_id, sub.user_id).await;
                let _ = deps.edit_locks.clear_user_edits(board_id, sub.user_id).await;

                let mut data = Data::new();
                data.insert("user_id".into(), serde_json::json!(sub.user_id));
                let frame = Frame::request("user:left", data).with_board_id(board_id);
                broadcast_reliable(subscribers, &frame, None);
            }
            let _ = req.reply.send(req.frame.done());
        }

        HubMessageKind::PresenceGone => {
            let _ = deps.edit_locks.clear_user_edits(board_id, req.user_id).await;
            let mut data = Data::new();
            data.insert("user_id".into(), serde_json::json!(req.user_id));
            let frame = Frame::request("user:left", data).with_board_id(board_id);
            broadcast_reliable(subscribers, &frame, None);
            let _ = req.reply.send(req.frame.done());
        }

        HubMessageKind::CursorMove { data } => {
            let mut payload = Data::new();
            payload.insert("user_id".into(), serde_json::json!(req.user_id));
            payload.extend(data);
            let frame = Frame::request("cursor:moved", payload).with_board_id(board_id);
            broadcast_lossy(subscribers, &frame, Some(req.connection_id));
            let _ = req.reply.send(req.frame.done());
        }

        HubMessageKind::Heartbeat => {
            let _ = deps.presence.refresh(board_id, req.user_id).await;
            let _ = req.reply.send(req.frame.done());
        }

        HubMessageKind::ObjectCreate { object } => {
            let now = Utc::now();
            let outcome = match ensure_state(deps, board_id, state).await {
                Ok(s) => self::object::create(s, object, deps.max_objects_per_board, now).map_err(HubError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(created) => {
                    if let Some(s) = state.as_ref() {
                        let _ = deps.state_cache.set_state(board_id, s).await;
                    }
                    let mut data = Data::new();
                    data.insert("object".into(), serde_json::to_value(&created).unwrap_or_default());
                    let frame = Frame::request("object:created", data.clone()).with_board_id(board_id);
                    broadcast_reliable(subscribers, &frame, Some(req.connection_id));
                    let _ = req.reply.send(req.frame.done_with(data));
                }
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                }
            }
        }

        HubMessageKind::ObjectUpdate { id, patch } => {
            let now = Utc::now();
            let user_id = req.user_id;
            let outcome = match ensure_state(deps, board_id, state).await {
                Ok(s) => self::object::update(s, id, &patch, user_id, now).map_err(HubError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(updated) => {
                    if let Some(s) = state.as_ref() {
                        let _ = deps.state_cache.set_state(board_id, s).await;
                    }
                    let mut data = Data::new();
                    data.insert("object".into(), serde_json::to_value(&updated).unwrap_or_default());
                    let frame = Frame::request("object:updated", data.clone()).with_board_id(board_id);
                    broadcast_reliable(subscribers, &frame, Some(req.connection_id));
                    let _ = req.reply.send(req.frame.done_with(data));
                }
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                }
            }
        }

        HubMessageKind::ObjectDelete { id } => {
            let now = Utc::now();
            let outcome = match ensure_state(deps, board_id, state).await {
                Ok(s) => self::object::delete(s, id, now).map_err(HubError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(deletion) => {
                    if let Some(s) = state.as_ref() {
                        let _ = deps.state_cache.set_state(board_id, s).await;
                    }
                    let mut data = Data::new();
                    data.insert("id".into(), serde_json::json!(id));
                    let frame = Frame::request("object:deleted", data.clone()).with_board_id(board_id);
                    broadcast_reliable(subscribers, &frame, Some(req.connection_id));

                    for touched in deletion.orphaned_children.iter().chain(deletion.detached_connectors.iter()) {
                        let mut touched_data = Data::new();
                        touched_data.insert("object".into(), serde_json::to_value(touched).unwrap_or_default());
                        let touched_frame = Frame::request("object:updated", touched_data).with_board_id(board_id);
                        broadcast_reliable(subscribers, &touched_frame, None);
                    }

                    let _ = req.reply.send(req.frame.done_with(data));
                }
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                }
            }
        }

        HubMessageKind::BatchCreate { objects } => {
            if objects.len() > deps.max_batch_size {
                let err = HubError::BatchTooLarge(objects.len(), deps.max_batch_size);
                let _ = req.reply.send(req.frame.error_from(&err));
                return;
            }
            let s = match ensure_state(deps, board_id, state).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                    return;
                }
            };
            if s.objects.len() + objects.len() > deps.max_objects_per_board {
                let err = HubError::from(self::object::CreateError::LimitReached(deps.max_objects_per_board));
                let _ = req.reply.send(req.frame.error_from(&err));
                return;
            }
            if let Some(dup) = objects.iter().find(|o| s.contains(o.id())) {
                let err = HubError::from(self::object::CreateError::Duplicate(dup.id()));
                let _ = req.reply.send(req.frame.error_from(&err));
                return;
            }

            let now = Utc::now();
            let created: Vec<BoardObject> = objects.into_iter().map(|mut o| {
                let common = o.common_mut();
                common.created_at = now;
                common.updated_at = now;
                o
            }).collect();
            s.objects.extend(created.iter().cloned());
            let _ = deps.state_cache.set_state(board_id, s).await;

            let mut data = Data::new();
            data.insert("objects".into(), serde_json::to_value(&created).unwrap_or_default());
            let frame = Frame::request("objects:batch_created", data.clone()).with_board_id(board_id);
            broadcast_reliable(subscribers, &frame, Some(req.connection_id));
            let _ = req.reply.send(req.frame.done_with(data));
        }

        HubMessageKind::BatchMove { patches } => {
            if patches.len() > deps.max_batch_size {
                let err = HubError::BatchTooLarge(patches.len(), deps.max_batch_size);
                let _ = req.reply.send(req.frame.error_from(&err));
                return;
            }
            let s = match ensure_state(deps, board_id, state).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = req.reply.send(req.frame.error_from(&e));
                    return;
                }
            };

            let now = Utc::now();
            let user_id = req.user_id;
            let mut updated = Vec::with_capacity(patches.len());
            for (id, patch) in patches {
                if let Ok(obj) = self::object::update(s, id, &patch, user_id, now) {
                    updated.push(obj);
                }
            }
            let _ = deps.state_cache.set_state(board_id, s).await;

            let mut data = Data::new();
            data.insert("objects".into(), serde_json::to_value(&updated).unwrap_or_default());
            let frame = Frame::request("objects:batch_moved", data.clone()).with_board_id(board_id);
            broadcast_reliable(subscribers, &frame, Some(req.connection_id));
            let _ = req.reply.send(req.frame.done_with(data));
        }

        HubMessageKind::EditStart { object_id } => {
            let user_name = subscribers.get(&req.connection_id).map(|s| s.user_name.clone()).unwrap_or_default();
            match deps.edit_locks.start_edit(board_id, object_id, req.user_id, &user_name).await {
                Ok(EditStartOutcome::Claimed(lock)) => {
                    let mut data = Data::new();
                    data.insert("object_id".into(), serde_json::json!(object_id));
                    data.insert("user_id".into(), serde_json::json!(lock.user_id));
                    let _ = req.reply.send(req.frame.done_with(data));
                }
                Ok(EditStartOutcome::Conflict(lock)) => {
                    let mut data = Data::new();
                    data.insert("object_id".into(), serde_json::json!(object_id));
                    data.insert("held_by".into(), serde_json::json!(lock.user_id));
                    data.insert("held_by_name".into(), serde_json::json!(lock.user_name));

                    // edit:warning is sent to the requester only, with the
                    // documented `editors: [{user_id, user_name}]` shape.
                    if let Some(sub) = subscribers.get(&req.connection_id) {
                        let mut warning_data = Data::new();
                        warning_data.insert("object_id".into(), serde_json::json!(object_id));
                        warning_data.insert(
                            "editors".into(),
                            serde_json::json!([{ "user_id": lock.user_id, "user_name": lock.user_name }]),
                        );
                        let warning = Frame::request("edit:warning", warning_data).with_board_id(board_id);
                        let _ = sub.outbound.try_send(warning);
                    }
                    let _ = req.reply.send(req.frame.done_with(data));
                }
                Err(_) => {
                    let _ = req.reply.send(req.frame.error("edit lock registry unavailable"));
                }
            }
        }

        HubMessageKind::EditEnd { object_id } => {
            let _ = deps.edit_locks.end_edit(board_id, object_id, req.user_id).await;
            let _ = req.reply.send(req.frame.done());
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
