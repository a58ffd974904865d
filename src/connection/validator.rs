//! Schema validator — the "Zod-equivalent" checkpoint every inbound
//! event passes through after the rate limiter and before it reaches a
//! board hub. A failure here always produces a single `error` frame; it
//! never reaches the hub's channel.
//!
//! DESIGN
//! ======
//! Grounded on the teacher's `services/validation.rs` shape (one function
//! per checked field, a single error enum, bounds as named constants)
//! generalized from the teacher's frame/trace field checks to the board
//! object/coordinate/color rules in.

use uuid::Uuid;

use crate::models::BoardObject;

pub const MAX_TEXT_LEN: usize = 10_000;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_BATCH_LEN: usize = 50;
pub const COORDINATE_MIN: f64 = -1_000_000.0;
pub const COORDINATE_MAX: f64 = 1_000_000.0;
pub const DIMENSION_MIN: f64 = 50.0;
pub const DIMENSION_MAX: f64 = 2_000.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be a well-formed UUID")]
    BadUuid { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must match #RRGGBB")]
    BadColor { field: &'static str },
    #[error("{field} must be in [{min}, {max}]")]
    OutOfRange { field: &'static str, min: f64, max: f64 },
    #[error("batch of {len} exceeds the maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("missing required field {field}")]
    MissingField { field: &'static str },
    #[error("unknown syscall {syscall:?}")]
    UnknownSyscall { syscall: String },
    #[error("connection is not joined to this board")]
    NotOnBoard,
}

impl crate::frame::ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        "E_VALIDATION"
    }
}

pub fn uuid_field(field: &'static str, raw: &str) -> Result<Uuid, ValidationError> {
    raw.parse().map_err(|_| ValidationError::BadUuid { field })
}

pub fn text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    bounded_string(field, value, MAX_TEXT_LEN)
}

pub fn title(field: &'static str, value: &str) -> Result<(), ValidationError> {
    bounded_string(field, value, MAX_TITLE_LEN)
}

fn bounded_string(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// `#RRGGBB`, case-insensitive hex digits, exactly six of them.
pub fn color(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let bytes = value.as_bytes();
    let ok = bytes.len() == 7 && bytes[0] == b'#' && bytes[1..].iter().all(u8::is_ascii_hexdigit);
    if ok { Ok(()) } else { Err(ValidationError::BadColor { field }) }
}

pub fn coordinate(field: &'static str, value: f64) -> Result<(), ValidationError> {
    in_range(field, value, COORDINATE_MIN, COORDINATE_MAX)
}

pub fn dimension(field: &'static str, value: f64) -> Result<(), ValidationError> {
    in_range(field, value, DIMENSION_MIN, DIMENSION_MAX)
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, min, max })
    }
}

pub fn batch_len(len: usize) -> Result<(), ValidationError> {
    if len > MAX_BATCH_LEN { Err(ValidationError::BatchTooLarge { len, max: MAX_BATCH_LEN }) } else { Ok(()) }
}

pub fn required<'a>(field: &'static str, value: Option<&'a serde_json::Value>) -> Result<&'a serde_json::Value, ValidationError> {
    value.ok_or(ValidationError::MissingField { field })
}

pub fn required_str<'a>(field: &'static str, value: Option<&'a serde_json::Value>) -> Result<&'a str, ValidationError> {
    required(field, value)?.as_str().ok_or(ValidationError::MissingField { field })
}

pub fn required_f64(field: &'static str, value: Option<&serde_json::Value>) -> Result<f64, ValidationError> {
    required(field, value)?.as_f64().ok_or(ValidationError::MissingField { field })
}

/// Deserialize an inbound `object` payload and check its bounds ('s
/// per-kind coordinate/dimension/color/text limits), stamping
/// `created_by`/`last_edited_by` with the connection's own identity — the
/// server is authoritative over who made the edit, never the client.
pub fn parse_and_validate_object(value: &serde_json::Value, user_id: Uuid) -> Result<BoardObject, ValidationError> {
    let mut object: BoardObject =
    serde_json::from_value(value.clone()).map_err(|_| ValidationError::MissingField { field: "object" })?;

    {
        let common = object.common_mut();
        common.created_by = user_id;
        common.last_edited_by = user_id;
    }

    validate_object_bounds(&object)?;
    Ok(object)
}

fn validate_object_bounds(object: &BoardObject) -> Result<(), ValidationError> {
    let common = object.common();
    coordinate("x", common.x)?;
    coordinate("y", common.y)?;

    match object {
        BoardObject::Sticky { text: t, color: c, width, height,.. } | BoardObject::Text { text: t, color: c, width, height,.. } => {
            text("text", t)?;
            color("color", c)?;
            dimension("width", *width)?;
            dimension("height", *height)?;
        }
        BoardObject::Shape { color: c, width, height,.. } => {
            color("color", c)?;
            dimension("width", *width)?;
            dimension("height", *height)?;
        }
        BoardObject::Frame { title: t, width, height,.. } => {
            if let Some(t) = t {
                title("title", t)?;
            }
            dimension("width", *width)?;
            dimension("height", *height)?;
        }
        BoardObject::Connector { x2, y2, color: c,.. } | BoardObject::Line { x2, y2, color: c,.. } => {
            coordinate("x2", *x2)?;
            coordinate("y2", *y2)?;
            color("color", c)?;
        }
    }
    Ok(())
}

/// Checks the same bounds against a raw JSON patch (`object:update`,
/// `objects:batch_move`) without requiring every field to be present.
pub fn validate_patch_fields(patch: &serde_json::Map<String, serde_json::Value>) -> Result<(), ValidationError> {
    if let Some(v) = patch.get("x").and_then(serde_json::Value::as_f64) {
        coordinate("x", v)?;
    }
    if let Some(v) = patch.get("y").and_then(serde_json::Value::as_f64) {
        coordinate("y", v)?;
    }
    if let Some(v) = patch.get("x2").and_then(serde_json::Value::as_f64) {
        coordinate("x2", v)?;
    }
    if let Some(v) = patch.get("y2").and_then(serde_json::Value::as_f64) {
        coordinate("y2", v)?;
    }
    if let Some(v) = patch.get("width").and_then(serde_json::Value::as_f64) {
        dimension("width", v)?;
    }
    if let Some(v) = patch.get("height").and_then(serde_json::Value::as_f64) {
        dimension("height", v)?;
    }
    if let Some(v) = patch.get("color").and_then(serde_json::Value::as_str) {
        color("color", v)?;
    }
    if let Some(v) = patch.get("text").and_then(serde_json::Value::as_str) {
        text("text", v)?;
    }
    if let Some(v) = patch.get("title").and_then(serde_json::Value::as_str) {
        title("title", v)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "validator_test.rs"]
mod tests;
