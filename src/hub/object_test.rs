use uuid::Uuid;

use super::*;
use crate::models::ObjectCommon;

fn common(id: Uuid, frame_id: Option<Uuid>) -> ObjectCommon {
    let now = Utc::now();
    ObjectCommon {
        id,
        x: 0.0,
        y: 0.0,
        frame_id,
        created_by: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        last_edited_by: Uuid::new_v4(),
        z_index: None,
        created_via: None,
    }
}

fn sticky(id: Uuid, frame_id: Option<Uuid>) -> BoardObject {
    BoardObject::Sticky { common: common(id, frame_id), text: String::new(), color: "#FFFFFF".into(), width: 100.0, height: 100.0 }
}

fn frame(id: Uuid) -> BoardObject {
    BoardObject::Frame { common: common(id, None), title: None, width: 400.0, height: 300.0 }
}

fn connector(id: Uuid, from: Option<Uuid>, to: Option<Uuid>) -> BoardObject {
    BoardObject::Connector {
        common: common(id, None),
        from_object_id: from,
        to_object_id: to,
        from_anchor: None,
        to_anchor: None,
        x2: 10.0,
        y2: 10.0,
        style: None,
        color: "#000000".into(),
    }
}

fn empty_state() -> CachedBoardState {
    CachedBoardState::new(Vec::new(), 0)
}

#[test]
fn create_adds_object_and_stamps_timestamps() {
    let mut state = empty_state();
    let now = Utc::now();
    let obj = create(&mut state, sticky(Uuid::new_v4(), None), 2000, now).unwrap();
    assert_eq!(obj.common().created_at, now);
    assert_eq!(obj.common().updated_at, now);
    assert_eq!(state.objects.len(), 1);
}

#[test]
fn create_rejects_duplicate_id() {
    let id = Uuid::new_v4();
    let mut state = CachedBoardState::new(vec![sticky(id, None)], 0);
    let err = create(&mut state, sticky(id, None), 2000, Utc::now()).unwrap_err();
    assert!(matches!(err, CreateError::Duplicate(dup) if dup == id));
}

#[test]
fn create_rejects_once_board_at_cap() {
    let mut state = CachedBoardState::new(vec![sticky(Uuid::new_v4(), None)], 0);
    let err = create(&mut state, sticky(Uuid::new_v4(), None), 1, Utc::now()).unwrap_err();
    assert!(matches!(err, CreateError::LimitReached(1)));
}

#[test]
fn update_merges_patch_and_stamps_editor() {
    let id = Uuid::new_v4();
    let mut state = CachedBoardState::new(vec![sticky(id, None)], 0);
    let editor = Uuid::new_v4();
    let now = Utc::now();
    let mut patch = serde_json::Map::new();
    patch.insert("text".into(), serde_json::json!("hello"));

    let updated = update(&mut state, id, &patch, editor, now).unwrap();
    let BoardObject::Sticky { text,.. } = &updated else { panic!("expected sticky") };
    assert_eq!(text, "hello");
    assert_eq!(updated.common().last_edited_by, editor);
    assert_eq!(updated.common().updated_at, now);
}

#[test]
fn update_missing_object_errors() {
    let mut state = empty_state();
    let id = Uuid::new_v4();
    let err = update(&mut state, id, &serde_json::Map::new(), Uuid::new_v4(), Utc::now()).unwrap_err();
    assert_eq!(err.0, id);
}

#[test]
fn delete_removes_object() {
    let id = Uuid::new_v4();
    let mut state = CachedBoardState::new(vec![sticky(id, None)], 0);
    let outcome = delete(&mut state, id, Utc::now()).unwrap();
    assert_eq!(outcome.deleted.id(), id);
    assert!(state.objects.is_empty());
}

// Invariant 6: deleting a frame orphans its children's `frame_id`,
// leaving the children themselves intact.
#[test]
fn delete_frame_orphans_children() {
    let frame_id = Uuid::new_v4();
    let child_id = Uuid::new_v4();
    let mut state = CachedBoardState::new(vec![frame(frame_id), sticky(child_id, Some(frame_id))], 0);

    let outcome = delete(&mut state, frame_id, Utc::now()).unwrap();
    assert_eq!(outcome.orphaned_children.len(), 1);
    assert_eq!(outcome.orphaned_children[0].id(), child_id);

    let child = state.objects.iter().find(|o| o.id() == child_id).unwrap();
    assert!(child.common().frame_id.is_none());
}

// Invariant 7: deleting an object detaches connector endpoints that
// referenced it, the connector itself is never removed.
#[test]
fn delete_object_detaches_connector_endpoints() {
    let victim = Uuid::new_v4();
    let connector_id = Uuid::new_v4();
    let mut state = CachedBoardState::new(vec![sticky(victim, None), connector(connector_id, Some(victim), None)], 0);

    let outcome = delete(&mut state, victim, Utc::now()).unwrap();
    assert_eq!(outcome.detached_connectors.len(), 1);
    assert_eq!(outcome.detached_connectors[0].id(), connector_id);

    let surviving = state.objects.iter().find(|o| o.id() == connector_id).unwrap();
    let BoardObject::Connector { from_object_id, .. } = surviving else {
        panic!("expected connector")
    };
    assert!(from_object_id.is_none());

    // S8: the broadcastable JSON reads back `from_object_id` as the empty
    // string, not an absent key.
    let value = serde_json::to_value(surviving).expect("serialize");
    assert_eq!(value.get("from_object_id").and_then(|v| v.as_str()), Some(""));
}

#[test]
fn delete_non_frame_object_does_not_touch_unrelated_children() {
    let shape_id = Uuid::new_v4();
    let other_frame = Uuid::new_v4();
    let child_id = Uuid::new_v4();
    let mut state =
    CachedBoardState::new(vec![sticky(shape_id, None), frame(other_frame), sticky(child_id, Some(other_frame))], 0);

    let outcome = delete(&mut state, shape_id, Utc::now()).unwrap();
    assert!(outcome.orphaned_children.is_empty());
    assert!(outcome.detached_connectors.is_empty());
}

#[test]
fn delete_missing_object_errors() {
    let mut state = empty_state();
    assert!(delete(&mut state, Uuid::new_v4(), Utc::now()).is_err());
}
