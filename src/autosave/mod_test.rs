use std::sync::Arc;

use uuid::Uuid;

use super::*;
use crate::auth::TestIdentityProvider;
use crate::cache::MemoryBackend;
use crate::config::Config;
use crate::models::{BoardObject, ObjectCommon};
use crate::repository::board::test_support::FakeBoardRepository;
use crate::repository::version::test_support::FakeVersionRepository;

fn sticky(id: Uuid) -> BoardObject {
    let now = chrono::Utc::now();
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

struct Harness {
    state: AppState,
    repository: Arc<FakeBoardRepository>,
    versions: Arc<FakeVersionRepository>,
}

fn harness() -> Harness {
    let backend: Arc<dyn crate::cache::KvBackend> = Arc::new(MemoryBackend::new());
    let repository = Arc::new(FakeBoardRepository::new());
    let versions = Arc::new(FakeVersionRepository::new());
    let state = AppState::new(
        Config::for_tests(),
        backend,
        repository.clone(),
        versions.clone(),
        Arc::new(TestIdentityProvider),
        Arc::new(crate::metrics::Metrics::new()),
    );
    Harness { state, repository, versions }
}

#[tokio::test]
async fn flush_board_persists_cached_objects_and_bumps_version() {
    let h = harness();
    let board = h.repository.seed_board(0, Vec::new()).await;
    let cached = CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0);
    h.state.state_cache.set_state(board.id, &cached).await.unwrap();

    let worker = AutoSaveWorker::new(&h.state);
    worker.flush_board(board.id).await.unwrap();

    let durable = h.repository.find_by_id(board.id).await.unwrap().unwrap();
    assert_eq!(durable.version, 1);
    assert_eq!(durable.objects.len(), 1);

    let recached = h.state.state_cache.get_state(board.id).await.unwrap().unwrap();
    assert_eq!(recached.postgres_version, 1);
}

#[tokio::test]
async fn flush_board_on_missing_cache_entry_is_a_no_op() {
    let h = harness();
    let worker = AutoSaveWorker::new(&h.state);
    worker.flush_board(Uuid::new_v4()).await.unwrap();
}

#[tokio::test]
async fn lost_optimistic_race_reloads_the_durable_row_and_resets_the_counter() {
    let h = harness();
    let board = h.repository.seed_board(0, vec![sticky(Uuid::new_v4())]).await;
    let cached = CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0);
    h.state.state_cache.set_state(board.id, &cached).await.unwrap();

    // A concurrent writer bumps the durable row out from under the cache.
    h.repository.force_version(board.id, 7);

    let worker = AutoSaveWorker::new(&h.state);
    worker.flush_board(board.id).await.unwrap();

    let recached = h.state.state_cache.get_state(board.id).await.unwrap().unwrap();
    assert_eq!(recached.postgres_version, 7);
    assert_eq!(recached.objects.len(), 1);
    assert_eq!(*worker.counters.lock().await.get(&board.id).unwrap_or(&0), 0);
}

#[tokio::test]
async fn a_snapshot_is_written_every_nth_successful_flush() {
    let h = harness();
    let board = h.repository.seed_board(0, vec![sticky(Uuid::new_v4())]).await;
    h.state.state_cache.set_state(board.id, &CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0)).await.unwrap();

    let worker = AutoSaveWorker::new(&h.state);
    let n = h.state.config.version_snapshot_every_n_saves;

    for _ in 0..n - 1 {
        worker.flush_board(board.id).await.unwrap();
    }
    assert_eq!(h.versions.count_for(board.id), 0);

    worker.flush_board(board.id).await.unwrap();
    assert_eq!(h.versions.count_for(board.id), 1);
}

#[tokio::test]
async fn one_boards_failure_does_not_stop_the_tick_from_reaching_the_rest() {
    let h = harness();
    let good = h.repository.seed_board(0, Vec::new()).await;
    h.state.state_cache.set_state(good.id, &CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0)).await.unwrap();

    // A board with a live cache entry but no durable row: its flush errors
    // out but must not prevent the other board's flush in the same tick.
    let missing_board_id = Uuid::new_v4();
    h.state.state_cache.set_state(missing_board_id, &CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0)).await.unwrap();

    let worker = AutoSaveWorker::new(&h.state);
    worker.tick_once().await;

    let durable = h.repository.find_by_id(good.id).await.unwrap().unwrap();
    assert_eq!(durable.version, 1);
}

#[tokio::test]
async fn a_second_spawn_is_a_no_op() {
    let h = harness();
    let worker = AutoSaveWorker::new(&h.state);

    let first = worker.spawn();
    assert!(first.is_some());
    let second = worker.spawn();
    assert!(second.is_none());

    if let Some(handle) = first {
        handle.abort();
    }
}

#[tokio::test]
async fn flush_all_persists_every_active_board() {
    let h = harness();
    let a = h.repository.seed_board(0, Vec::new()).await;
    let b = h.repository.seed_board(0, Vec::new()).await;
    h.state.state_cache.set_state(a.id, &CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0)).await.unwrap();
    h.state.state_cache.set_state(b.id, &CachedBoardState::new(vec![sticky(Uuid::new_v4())], 0)).await.unwrap();

    let worker = AutoSaveWorker::new(&h.state);
    worker.flush_all().await;

    assert_eq!(h.repository.find_by_id(a.id).await.unwrap().unwrap().version, 1);
    assert_eq!(h.repository.find_by_id(b.id).await.unwrap().unwrap().version, 1);
}
