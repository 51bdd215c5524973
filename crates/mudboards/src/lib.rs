//! `mudboards`: persistent bulletin boards attached to in-world objects.
//!
//! Each board is a flat file under the board root, keyed by the vnum of its
//! backing object. The on-disk format is line oriented: a magic header, a
//! control line with the clearance thresholds, the messages (newest first,
//! `~`-terminated bodies), then the per-reader "seen" records bucketed by a
//! 301-slot hash. Two identity encodings exist: legacy files store numeric
//! player ids, current files store names; a board never mixes the two.
//!
//! Boards tolerate damage: a short control line, a wrong message count, or
//! a read record with no matching message are corrected (or dropped) on
//! load and the fixed file is written straight back.

use thiserror::Error;

pub mod board;
pub mod file;
pub mod identity;
pub mod memory;
pub mod message;
pub mod ops;
pub mod registry;

pub use board::{Board, Levels, Version, IMMORTAL_TIER};
pub use identity::{Actor, Identity, NameDirectory};
pub use message::{Message, MessageId};
pub use ops::{BoardService, Draft};
pub use registry::{BoardConfig, BoardRegistry, ObjectDirectory};

/// User-visible refusals from board operations. Load-time trouble
/// (bad header, stale orphan, count drift) is logged and absorbed by the
/// loader instead of surfacing here.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("you are not allowed to do that on this board")]
    PermissionDenied,
    #[error("wait until the author finishes writing")]
    EditConflict,
    #[error("that message exists only in your imagination")]
    NotFound,
    #[error("board {0} could not be found")]
    UnknownBoard(i64),
}
