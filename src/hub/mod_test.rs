use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::*;
use crate::cache::MemoryBackend;
use crate::frame::Status;
use crate::metrics::Metrics;
use crate::models::ObjectCommon;
use crate::repository::board::test_support::FakeBoardRepository;

fn sticky(id: Uuid) -> BoardObject {
    let now = Utc::now();
    BoardObject::Sticky {
        common: ObjectCommon {
            id,
            x: 0.0,
            y: 0.0,
            frame_id: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            last_edited_by: Uuid::new_v4(),
            z_index: None,
            created_via: None,
        },
        text: String::new(),
        color: "#FFFFFF".into(),
        width: 100.0,
        height: 100.0,
    }
}

async fn test_registry(max_objects: usize, max_batch: usize) -> (Arc<HubRegistry>, Uuid) {
    let backend: Arc<dyn crate::cache::KvBackend> = Arc::new(MemoryBackend::new());
    let repo = Arc::new(FakeBoardRepository::new());
    let board = repo.seed_board(0, Vec::new()).await;

    let deps = HubDeps {
        state_cache: Arc::new(StateCache::new(backend.clone())),
        presence: Arc::new(PresenceRegistry::new(backend.clone(), Duration::from_secs(30), Duration::from_secs(3600))),
        edit_locks: Arc::new(EditLockRegistry::new(backend, Duration::from_secs(300), Arc::new(Metrics::new()))),
        repository: repo,
        metrics: Arc::new(Metrics::new()),
        max_objects_per_board: max_objects,
        max_batch_size: max_batch,
    };
    (HubRegistry::new(deps), board.id)
}

/// Subscribes a fresh connection, returning its outbound receiver and the
/// reply frame for the subscribe request itself.
async fn subscribe(
    hub: &HubHandle,
    connection_id: Uuid,
    user_id: Uuid,
    name: &str,
) -> (mpsc::Receiver<Frame>, Frame) {
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = Frame::request("board:subscribe", Data::new());
    hub.send(HubRequest {
        connection_id,
        user_id,
        frame: request,
        kind: HubMessageKind::Subscribe {
            user_name: name.to_owned(),
            avatar: None,
            color: "#123456".into(),
            outbound: outbound_tx,
        },
        reply: reply_tx,
    })
    .await;
    (outbound_rx, reply_rx.await.unwrap())
}

async fn send(hub: &HubHandle, connection_id: Uuid, user_id: Uuid, kind: HubMessageKind) -> Frame {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = Frame::request("object:op", Data::new());
    hub.send(HubRequest { connection_id, user_id, frame: request, kind, reply: reply_tx }).await;
    reply_rx.await.unwrap()
}

#[tokio::test]
async fn subscribe_returns_current_objects_and_presence() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let user_id = Uuid::new_v4();
    let (_rx, reply) = subscribe(&hub, Uuid::new_v4(), user_id, "Alice").await;

    assert_eq!(reply.status, Status::Done);
    let presence = reply.data.get("presence").unwrap().as_array().unwrap();
    assert_eq!(presence.len(), 1);
}

#[tokio::test]
async fn second_subscriber_is_told_about_the_first_joining() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let (mut rx_a, _reply_a) = subscribe(&hub, Uuid::new_v4(), Uuid::new_v4(), "Alice").await;
    let (_rx_b, _reply_b) = subscribe(&hub, Uuid::new_v4(), Uuid::new_v4(), "Bob").await;

    let joined = rx_a.recv().await.unwrap();
    assert_eq!(joined.syscall, "user:joined");
}

#[tokio::test]
async fn object_create_is_broadcast_to_other_subscribers_but_not_the_sender() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let conn_a = Uuid::new_v4();
    let (mut rx_a, _) = subscribe(&hub, conn_a, Uuid::new_v4(), "Alice").await;
    let (mut rx_b, _) = subscribe(&hub, Uuid::new_v4(), Uuid::new_v4(), "Bob").await;
    let _ = rx_a.recv().await; // Bob's user:joined
    let _ = rx_b.try_recv(); // drain nothing pending

    let object_id = Uuid::new_v4();
    let reply = send(&hub, conn_a, Uuid::new_v4(), HubMessageKind::ObjectCreate { object: sticky(object_id) }).await;
    assert_eq!(reply.status, Status::Done);

    let broadcast = rx_b.recv().await.unwrap();
    assert_eq!(broadcast.syscall, "object:created");

    // Alice (the sender) gets no separate peer broadcast, only her own reply.
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn object_create_rejects_duplicate_id() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;
    let conn = Uuid::new_v4();
    let user = Uuid::new_v4();
    let (_rx, _) = subscribe(&hub, conn, user, "Alice").await;

    let object_id = Uuid::new_v4();
    let first = send(&hub, conn, user, HubMessageKind::ObjectCreate { object: sticky(object_id) }).await;
    assert_eq!(first.status, Status::Done);

    let second = send(&hub, conn, user, HubMessageKind::ObjectCreate { object: sticky(object_id) }).await;
    assert_eq!(second.status, Status::Error);
    assert_eq!(second.data.get("code").and_then(|v| v.as_str()), Some("E_DUPLICATE"));
}

#[tokio::test]
async fn object_delete_of_a_frame_broadcasts_orphan_updates_to_everyone_including_sender() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;
    let conn = Uuid::new_v4();
    let user = Uuid::new_v4();
    let (mut rx, _) = subscribe(&hub, conn, user, "Alice").await;

    let frame_id = Uuid::new_v4();
    let frame_obj = BoardObject::Frame {
        common: ObjectCommon {
            id: frame_id,
            x: 0.0,
            y: 0.0,
            frame_id: None,
            created_by: user,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_edited_by: user,
            z_index: None,
            created_via: None,
        },
        title: None,
        width: 400.0,
        height: 300.0,
    };
    send(&hub, conn, user, HubMessageKind::ObjectCreate { object: frame_obj }).await;

    let child_id = Uuid::new_v4();
    let mut child = sticky(child_id);
    child.common_mut().frame_id = Some(frame_id);
    send(&hub, conn, user, HubMessageKind::ObjectCreate { object: child }).await;

    let reply = send(&hub, conn, user, HubMessageKind::ObjectDelete { id: frame_id }).await;
    assert_eq!(reply.status, Status::Done);

    // The sender receives no peer broadcast for its own delete, but it does
    // receive the side-effect `object:updated` for the orphaned child.
    let touched = rx.recv().await.unwrap();
    assert_eq!(touched.syscall, "object:updated");
}

#[tokio::test]
async fn batch_create_over_the_limit_is_rejected_atomically() {
    let (registry, board_id) = test_registry(2000, 2).await;
    let hub = registry.get_or_create(board_id).await;
    let conn = Uuid::new_v4();
    let user = Uuid::new_v4();
    let (_rx, _) = subscribe(&hub, conn, user, "Alice").await;

    let objects = vec![sticky(Uuid::new_v4()), sticky(Uuid::new_v4()), sticky(Uuid::new_v4())];
    let reply = send(&hub, conn, user, HubMessageKind::BatchCreate { objects }).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data.get("code").and_then(|v| v.as_str()), Some("E_VALIDATION"));
}

#[tokio::test]
async fn edit_start_conflict_warns_only_the_requester() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let conn_a = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let (mut rx_a, _) = subscribe(&hub, conn_a, user_a, "Alice").await;
    let conn_b = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let (mut rx_b, _) = subscribe(&hub, conn_b, user_b, "Bob").await;
    let _ = rx_a.recv().await; // Bob's user:joined

    let object_id = Uuid::new_v4();
    let first = send(&hub, conn_a, user_a, HubMessageKind::EditStart { object_id }).await;
    assert_eq!(first.status, Status::Done);

    let second = send(&hub, conn_b, user_b, HubMessageKind::EditStart { object_id }).await;
    assert_eq!(second.status, Status::Done);
    assert_eq!(second.data.get("held_by").and_then(|v| v.as_str()), Some(user_a.to_string()).as_deref());

    let warning = rx_b.recv().await.unwrap();
    assert_eq!(warning.syscall, "edit:warning");
    let editors = warning.data.get("editors").and_then(|v| v.as_array()).expect("editors array");
    assert_eq!(editors.len(), 1);
    assert_eq!(editors[0].get("user_id").and_then(|v| v.as_str()), Some(user_a.to_string()).as_deref());
    assert_eq!(editors[0].get("user_name").and_then(|v| v.as_str()), Some("Alice"));
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_releases_edit_locks_and_notifies_remaining_subscribers() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let conn_a = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let (mut rx_a, _) = subscribe(&hub, conn_a, user_a, "Alice").await;
    let conn_b = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let (mut rx_b, _) = subscribe(&hub, conn_b, user_b, "Bob").await;
    let _ = rx_a.recv().await;

    let reply = send(&hub, conn_a, user_a, HubMessageKind::Unsubscribe).await;
    assert_eq!(reply.status, Status::Done);

    let left = rx_b.recv().await.unwrap();
    assert_eq!(left.syscall, "user:left");
}

#[tokio::test]
async fn presence_gone_notifies_subscribers_without_a_live_connection_entry() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let conn_a = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let (mut rx_a, _) = subscribe(&hub, conn_a, user_a, "Alice").await;

    // A stale user never subscribed through this hub (e.g. presence left
    // over from a crashed connection on another process), so there is no
    // `Subscriber` entry for it — the backstop notification must still land.
    let ghost_user = Uuid::new_v4();
    let reply = send(&hub, Uuid::new_v4(), ghost_user, HubMessageKind::PresenceGone).await;
    assert_eq!(reply.status, Status::Done);

    let left = rx_a.recv().await.unwrap();
    assert_eq!(left.syscall, "user:left");
    assert_eq!(left.data.get("user_id").and_then(|v| v.as_str()), Some(ghost_user.to_string()).as_deref());
}

#[tokio::test]
async fn cursor_move_is_lossy_broadcast_excluding_sender() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let hub = registry.get_or_create(board_id).await;

    let conn_a = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let (mut rx_a, _) = subscribe(&hub, conn_a, user_a, "Alice").await;
    let conn_b = Uuid::new_v4();
    let (mut rx_b, _) = subscribe(&hub, conn_b, Uuid::new_v4(), "Bob").await;
    let _ = rx_a.recv().await;

    let mut data = serde_json::Map::new();
    data.insert("x".into(), serde_json::json!(10.0));
    data.insert("y".into(), serde_json::json!(20.0));
    let reply = send(&hub, conn_a, user_a, HubMessageKind::CursorMove { data }).await;
    assert_eq!(reply.status, Status::Done);

    let moved = rx_b.recv().await.unwrap();
    assert_eq!(moved.syscall, "cursor:moved");
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn registry_reuses_the_same_hub_for_repeated_lookups() {
    let (registry, board_id) = test_registry(2000, 50).await;
    let first = registry.get_or_create(board_id).await;
    let second = registry.get_or_create(board_id).await;

    let conn = Uuid::new_v4();
    let user = Uuid::new_v4();
    let (_rx, reply) = subscribe(&first, conn, user, "Alice").await;
    assert_eq!(reply.status, Status::Done);

    // Same hub instance: a subscribe through the "second" handle sees Alice
    // already present.
    let (_rx2, reply2) = subscribe(&second, Uuid::new_v4(), Uuid::new_v4(), "Bob").await;
    let presence = reply2.data.get("presence").unwrap().as_array().unwrap();
    assert_eq!(presence.len(), 2);
}
