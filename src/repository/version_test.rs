use uuid::Uuid;

use super::test_support::FakeVersionRepository;
use super::*;
use crate::models::ObjectCommon;

fn sticky() -> BoardObject {
    let now = chrono::Utc::now();
    BoardObject::Sticky {
        common: ObjectCommon {
            id: Uuid::new_v4(),
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
        color: "#000000".into(),
        width: 100.0,
        height: 100.0,
    }
}

#[tokio::test]
async fn create_snapshot_stores_the_given_objects() {
    let repo = FakeVersionRepository::new();
    let board_id = Uuid::new_v4();
    let created_by = Uuid::new_v4();
    let objects = vec![sticky(), sticky()];

    let version = repo.create_snapshot(board_id, created_by, &objects, 50).await.unwrap();
    assert_eq!(version.board_id, board_id);
    assert_eq!(version.created_by, created_by);
    assert_eq!(version.snapshot.len(), 2);
}

// BoardVersion retention: keep at most N per board, oldest evicted on insert.
#[tokio::test]
async fn retention_trims_oldest_beyond_max() {
    let repo = FakeVersionRepository::new();
    let board_id = Uuid::new_v4();
    let created_by = Uuid::new_v4();

    for _ in 0..7 {
        repo.create_snapshot(board_id, created_by, &[], 5).await.unwrap();
    }

    assert_eq!(repo.count_for(board_id), 5);
}

#[tokio::test]
async fn retention_does_not_trim_other_boards() {
    let repo = FakeVersionRepository::new();
    let board_a = Uuid::new_v4();
    let board_b = Uuid::new_v4();
    let created_by = Uuid::new_v4();

    for _ in 0..6 {
        repo.create_snapshot(board_a, created_by, &[], 5).await.unwrap();
    }
    repo.create_snapshot(board_b, created_by, &[], 5).await.unwrap();

    assert_eq!(repo.count_for(board_a), 5);
    assert_eq!(repo.count_for(board_b), 1);
}

#[tokio::test]
async fn list_versions_orders_newest_first() {
    let repo = FakeVersionRepository::new();
    let board_id = Uuid::new_v4();
    let created_by = Uuid::new_v4();

    let first = repo.create_snapshot(board_id, created_by, &[], 50).await.unwrap();
    let second = repo.create_snapshot(board_id, created_by, &[], 50).await.unwrap();

    let listed = repo.list_versions(board_id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].created_at >= listed[1].created_at);
    assert!(listed.iter().any(|v| v.id == first.id));
    assert!(listed.iter().any(|v| v.id == second.id));
}
