//! Data model — board objects and the live/durable records built around them.

pub mod board;
pub mod object;

pub use board::{Board, BoardVersion, CachedBoardState, EditLock, PresenceRecord, Session};
pub use object::{BoardObject, CreatedVia, ObjectCommon};
