//! Durable storage (,) — typed access to board rows and
//! immutable version snapshots, grounded on the teacher's `services/board.rs`
//! and `services/savepoint.rs` but generalized to the spec's optimistic
//! version locking and retention rules.

pub mod board;
pub mod version;

pub use board::{BoardFilter, BoardPatch, BoardRepository, PgBoardRepository, RepositoryError};
pub use version::{PgVersionRepository, VersionRepository};
