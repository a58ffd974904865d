use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::*;
use crate::cache::MemoryBackend;

fn history(limit: usize) -> ChatHistory {
    ChatHistory::new(Arc::new(MemoryBackend::new()), limit, Duration::from_secs(86_400))
}

fn msg(content: &str) -> ChatMessage {
    ChatMessage { role: "user".into(), content: content.into(), created_at: chrono::Utc::now() }
}

#[tokio::test]
async fn append_then_get_round_trips_in_order() {
    let h = history(50);
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    h.append(board_id, user_id, &msg("one")).await;
    h.append(board_id, user_id, &msg("two")).await;

    let msgs = h.get(board_id, user_id).await;
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].content, "one");
    assert_eq!(msgs[1].content, "two");
}

#[tokio::test]
async fn sliding_window_caps_at_limit() {
    let h = history(3);
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    for i in 0..5 {
        h.append(board_id, user_id, &msg(&i.to_string())).await;
    }
    let msgs = h.get(board_id, user_id).await;
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[0].content, "2");
    assert_eq!(msgs[2].content, "4");
}

#[tokio::test]
async fn purge_clears_one_users_history() {
    let h = history(50);
    let board_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    h.append(board_id, user_id, &msg("one")).await;
    h.purge(board_id, user_id).await;
    assert!(h.get(board_id, user_id).await.is_empty());
}

#[tokio::test]
async fn purge_all_clears_every_listed_user() {
    let h = history(50);
    let board_id = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    h.append(board_id, a, &msg("a")).await;
    h.append(board_id, b, &msg("b")).await;
    h.purge_all(board_id, &[a, b]).await;
    assert!(h.get(board_id, a).await.is_empty());
    assert!(h.get(board_id, b).await.is_empty());
}
