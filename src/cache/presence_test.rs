use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::*;
use crate::cache::MemoryBackend;

fn registry() -> PresenceRegistry {
    PresenceRegistry::new(Arc::new(MemoryBackend::new()), Duration::from_secs(30), Duration::from_secs(86_400))
}

fn record(board_id: Uuid, user_id: Uuid) -> PresenceRecord {
    PresenceRecord {
        user_id,
        board_id,
        name: "Alice".into(),
        avatar: None,
        color: "#ff0000".into(),
        last_heartbeat: Utc::now(),
    }
}

#[tokio::test]
async fn add_then_list_users_returns_record() {
    let reg = registry();
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    reg.add_user(&record(board_id, user_id)).await.unwrap();

    let users = reg.list_users(board_id).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, user_id);
}

#[tokio::test]
async fn refresh_unknown_user_returns_false() {
    let reg = registry();
    assert!(!reg.refresh(Uuid::new_v4(), Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn refresh_known_user_returns_true() {
    let reg = registry();
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    reg.add_user(&record(board_id, user_id)).await.unwrap();
    assert!(reg.refresh(board_id, user_id).await.unwrap());
}

#[tokio::test]
async fn remove_user_drops_from_list() {
    let reg = registry();
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    reg.add_user(&record(board_id, user_id)).await.unwrap();
    reg.remove_user(board_id, user_id).await.unwrap();
    assert!(reg.list_users(board_id).await.unwrap().is_empty());
}

// Invariant 5: after remove_user_from_all_boards, no presence key
// remains and every board the user was on is returned for user:left.
#[tokio::test]
async fn remove_user_from_all_boards_returns_every_board_and_clears_presence() {
    let reg = registry();
    let user_id = Uuid::new_v4();
    let board_a = Uuid::new_v4();
    let board_b = Uuid::new_v4();
    reg.add_user(&record(board_a, user_id)).await.unwrap();
    reg.add_user(&record(board_b, user_id)).await.unwrap();

    let mut boards = reg.remove_user_from_all_boards(user_id).await.unwrap();
    boards.sort();
    let mut expected = vec![board_a, board_b];
    expected.sort();
    assert_eq!(boards, expected);

    assert!(reg.list_users(board_a).await.unwrap().is_empty());
    assert!(reg.list_users(board_b).await.unwrap().is_empty());
}

#[tokio::test]
async fn session_round_trip() {
    let reg = registry();
    let connection_id = Uuid::new_v4();
    let session = Session { connection_id, user_id: Uuid::new_v4(), board_id: None, connected_at: Utc::now() };
    reg.put_session(&session).await.unwrap();

    let loaded = reg.get_session(connection_id).await.unwrap().expect("present");
    assert_eq!(loaded.user_id, session.user_id);

    reg.remove_session(connection_id).await.unwrap();
    assert!(reg.get_session(connection_id).await.unwrap().is_none());
}
