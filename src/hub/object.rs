//! Pure object mutations over a board's cached state. Kept free of channels/IO so the hub's message loop
//! stays a thin dispatcher and these rules are unit-testable directly.
//!
//! DESIGN
//! ======
//! Grounded on the teacher's `services/object.rs` create/update/delete
//! shape, generalized from the teacher's single flat object row to the
//! spec's tagged `BoardObject` enum and its frame-orphan / connector-detach
//! invariants (, invariants 6 and 7).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{BoardObject, CachedBoardState};

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("object {0} already exists on this board")]
    Duplicate(Uuid),
    #[error("board already has the maximum of {0} objects")]
    LimitReached(usize),
}

impl crate::frame::ErrorCode for CreateError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "E_DUPLICATE",
            Self::LimitReached(_) => "E_LIMIT",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("object {0} not found on this board")]
pub struct NotFoundError(pub Uuid);

impl crate::frame::ErrorCode for NotFoundError {
    fn error_code(&self) -> &'static str {
        "E_NOT_FOUND"
    }
}

/// `object_create`: enforce the per-board cap, reject a duplicate
/// id, and stamp `created_at == updated_at == now` server-side.
pub fn create(
    state: &mut CachedBoardState,
    mut object: BoardObject,
    max_objects_per_board: usize,
    now: DateTime<Utc>,
) -> Result<BoardObject, CreateError> {
    if state.contains(object.id()) {
        return Err(CreateError::Duplicate(object.id()));
    }
    if state.objects.len() >= max_objects_per_board {
        return Err(CreateError::LimitReached(max_objects_per_board));
    }

    let common = object.common_mut();
    common.created_at = now;
    common.updated_at = now;

    state.objects.push(object.clone());
    Ok(object)
}

/// `object_update`: merge an LWW patch, stamping `updated_at` and
/// `last_edited_by`.
pub fn update(
    state: &mut CachedBoardState,
    id: Uuid,
    patch: &serde_json::Map<String, serde_json::Value>,
    editor: Uuid,
    now: DateTime<Utc>,
) -> Result<BoardObject, NotFoundError> {
    let idx = state.index_of(id).ok_or(NotFoundError(id))?;
    state.objects[idx].apply_patch(patch, editor, now);
    Ok(state.objects[idx].clone())
}

/// Outcome of `delete`: the removed object plus every other object this
/// delete touched as a side effect.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub deleted: BoardObject,
    /// Children re-parented to no frame because their frame was deleted.
    pub orphaned_children: Vec<BoardObject>,
    /// Connectors whose dangling endpoint was cleared.
    pub detached_connectors: Vec<BoardObject>,
}

/// `object_delete`: removes the object; if it was a frame, clears
/// `frame_id` on every child that pointed to it; clears any connector
/// endpoint that pointed to the deleted id. Both side effects are applied
/// in the same tick so the hub can broadcast a single consistent batch.
pub fn delete(state: &mut CachedBoardState, id: Uuid, now: DateTime<Utc>) -> Result<DeleteOutcome, NotFoundError> {
    let idx = state.index_of(id).ok_or(NotFoundError(id))?;
    let deleted = state.objects.remove(idx);
    let was_frame = deleted.is_frame();

    let mut orphaned_children = Vec::new();
    let mut detached_connectors = Vec::new();

    for object in &mut state.objects {
        if was_frame && object.orphan_from_frame(id) {
            object.common_mut().updated_at = now;
            orphaned_children.push(object.clone());
        }
        if object.detach_connector_reference(id) {
            object.common_mut().updated_at = now;
            detached_connectors.push(object.clone());
        }
    }

    Ok(DeleteOutcome { deleted, orphaned_children, detached_connectors })
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
