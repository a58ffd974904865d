//! Board objects — a tagged sum over the six drawable kinds.
//!
//! DESIGN
//! ======
//! Mirrors `BoardObject` in the spec's data model: common placement/audit
//! fields plus per-kind fields. Dispatch over kind is a `match`, never a
//! trait object — see `apply_patch`, `detach_reference`, `frame_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A connector endpoint reference wire-encoded as `""` when detached rather
/// than omitted or `null` — spec's detached-reference scenario (S8) requires
/// a surviving connector's `from_object_id`/`to_object_id` to read back as
/// the empty string after the object it pointed to is deleted.
mod uuid_or_empty {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(value: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_str(&id.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        Uuid::parse_str(&raw).map(Some).map_err(serde::de::Error::custom)
    }
}

/// How an object came to exist on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedVia {
    Manual,
    Ai,
}

/// Fields shared by every object kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCommon {
    pub id: Uuid,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_edited_by: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_via: Option<CreatedVia>,
}

/// A placed object on a board. Tagged by `type`, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardObject {
    Sticky {
        #[serde(flatten)]
        common: ObjectCommon,
        text: String,
        color: String,
        width: f64,
        height: f64,
    },
    Shape {
        #[serde(flatten)]
        common: ObjectCommon,
        shape_kind: String,
        color: String,
        width: f64,
        height: f64,
    },
    Frame {
        #[serde(flatten)]
        common: ObjectCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        width: f64,
        height: f64,
    },
    Connector {
        #[serde(flatten)]
        common: ObjectCommon,
        #[serde(default, with = "uuid_or_empty")]
        from_object_id: Option<Uuid>,
        #[serde(default, with = "uuid_or_empty")]
        to_object_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_anchor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_anchor: Option<String>,
        x2: f64,
        y2: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
        color: String,
    },
    Text {
        #[serde(flatten)]
        common: ObjectCommon,
        text: String,
        width: f64,
        height: f64,
        color: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_size: Option<f64>,
    },
    Line {
        #[serde(flatten)]
        common: ObjectCommon,
        x2: f64,
        y2: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_style: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stroke_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stroke_weight: Option<f64>,
        color: String,
    },
}

impl BoardObject {
    #[must_use]
    pub fn common(&self) -> &ObjectCommon {
        match self {
            Self::Sticky { common, .. }
            | Self::Shape { common, .. }
            | Self::Frame { common, .. }
            | Self::Connector { common, .. }
            | Self::Text { common, .. }
            | Self::Line { common, .. } => common,
        }
    }

    pub fn common_mut(&mut self) -> &mut ObjectCommon {
        match self {
            Self::Sticky { common, .. }
            | Self::Shape { common, .. }
            | Self::Frame { common, .. }
            | Self::Connector { common, .. }
            | Self::Text { common, .. }
            | Self::Line { common, .. } => common,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.common().id
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sticky { .. } => "sticky",
            Self::Shape { .. } => "shape",
            Self::Frame { .. } => "frame",
            Self::Connector { .. } => "connector",
            Self::Text { .. } => "text",
            Self::Line { .. } => "line",
        }
    }

    #[must_use]
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame { .. })
    }

    /// Clear a `frame_id` back-reference, e.g. when the referenced frame is
    /// deleted. Returns `true` if a reference was actually cleared.
    pub fn orphan_from_frame(&mut self, frame_id: Uuid) -> bool {
        let common = self.common_mut();
        if common.frame_id == Some(frame_id) {
            common.frame_id = None;
            true
        } else {
            false
        }
    }

    /// Clear a connector's dangling endpoint reference to a deleted object.
    /// Returns `true` if an endpoint was actually cleared.
    pub fn detach_connector_reference(&mut self, deleted_id: Uuid) -> bool {
        let Self::Connector { from_object_id, to_object_id, .. } = self else {
            return false;
        };
        let mut touched = false;
        if *from_object_id == Some(deleted_id) {
            *from_object_id = None;
            touched = true;
        }
        if *to_object_id == Some(deleted_id) {
            *to_object_id = None;
            touched = true;
        }
        touched
    }

    /// Merge a JSON patch into this object's mutable fields (LWW). Unknown
    /// keys and keys that don't apply to this variant are ignored. Always
    /// stamps `updated_at`/`last_edited_by`.
    pub fn apply_patch(&mut self, patch: &serde_json::Map<String, serde_json::Value>, editor: Uuid, now: DateTime<Utc>) {
        if let Some(x) = patch.get("x").and_then(serde_json::Value::as_f64) {
            self.common_mut().x = x;
        }
        if let Some(y) = patch.get("y").and_then(serde_json::Value::as_f64) {
            self.common_mut().y = y;
        }
        if let Some(z) = patch.get("z_index").and_then(serde_json::Value::as_i64) {
            #[allow(clippy::cast_possible_truncation)]
            {
                self.common_mut().z_index = Some(z as i32);
            }
        }
        if let Some(frame_id) = patch.get("frame_id") {
            self.common_mut().frame_id = frame_id.as_str().and_then(|s| Uuid::parse_str(s).ok());
        }

        match self {
            Self::Sticky { text, color, width, height, .. } | Self::Text { text, color, width, height, .. } => {
                if let Some(v) = patch.get("text").and_then(serde_json::Value::as_str) {
                    *text = v.to_owned();
                }
                if let Some(v) = patch.get("color").and_then(serde_json::Value::as_str) {
                    *color = v.to_owned();
                }
                if let Some(v) = patch.get("width").and_then(serde_json::Value::as_f64) {
                    *width = v;
                }
                if let Some(v) = patch.get("height").and_then(serde_json::Value::as_f64) {
                    *height = v;
                }
            }
            Self::Shape { color, width, height, shape_kind, .. } => {
                if let Some(v) = patch.get("color").and_then(serde_json::Value::as_str) {
                    *color = v.to_owned();
                }
                if let Some(v) = patch.get("width").and_then(serde_json::Value::as_f64) {
                    *width = v;
                }
                if let Some(v) = patch.get("height").and_then(serde_json::Value::as_f64) {
                    *height = v;
                }
                if let Some(v) = patch.get("shape_kind").and_then(serde_json::Value::as_str) {
                    *shape_kind = v.to_owned();
                }
            }
            Self::Frame { width, height, title, .. } => {
                if let Some(v) = patch.get("width").and_then(serde_json::Value::as_f64) {
                    *width = v;
                }
                if let Some(v) = patch.get("height").and_then(serde_json::Value::as_f64) {
                    *height = v;
                }
                if let Some(v) = patch.get("title").and_then(serde_json::Value::as_str) {
                    *title = Some(v.to_owned());
                }
            }
            Self::Connector { from_object_id, to_object_id, from_anchor, to_anchor, x2, y2, style, color, .. } => {
                if let Some(v) = patch.get("from_object_id") {
                    *from_object_id = v.as_str().and_then(|s| Uuid::parse_str(s).ok());
                }
                if let Some(v) = patch.get("to_object_id") {
                    *to_object_id = v.as_str().and_then(|s| Uuid::parse_str(s).ok());
                }
                if let Some(v) = patch.get("from_anchor").and_then(serde_json::Value::as_str) {
                    *from_anchor = Some(v.to_owned());
                }
                if let Some(v) = patch.get("to_anchor").and_then(serde_json::Value::as_str) {
                    *to_anchor = Some(v.to_owned());
                }
                if let Some(v) = patch.get("x2").and_then(serde_json::Value::as_f64) {
                    *x2 = v;
                }
                if let Some(v) = patch.get("y2").and_then(serde_json::Value::as_f64) {
                    *y2 = v;
                }
                if let Some(v) = patch.get("style").and_then(serde_json::Value::as_str) {
                    *style = Some(v.to_owned());
                }
                if let Some(v) = patch.get("color").and_then(serde_json::Value::as_str) {
                    *color = v.to_owned();
                }
            }
            Self::Line { x2, y2, endpoint_style, stroke_pattern, stroke_weight, color, .. } => {
                if let Some(v) = patch.get("x2").and_then(serde_json::Value::as_f64) {
                    *x2 = v;
                }
                if let Some(v) = patch.get("y2").and_then(serde_json::Value::as_f64) {
                    *y2 = v;
                }
                if let Some(v) = patch.get("endpoint_style").and_then(serde_json::Value::as_str) {
                    *endpoint_style = Some(v.to_owned());
                }
                if let Some(v) = patch.get("stroke_pattern").and_then(serde_json::Value::as_str) {
                    *stroke_pattern = Some(v.to_owned());
                }
                if let Some(v) = patch.get("stroke_weight").and_then(serde_json::Value::as_f64) {
                    *stroke_weight = Some(v);
                }
                if let Some(v) = patch.get("color").and_then(serde_json::Value::as_str) {
                    *color = v.to_owned();
                }
            }
        }

        let common = self.common_mut();
        common.updated_at = now;
        common.last_edited_by = editor;
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
