use ulid::Ulid;

use crate::model::UserId;

/// Everything the engine can refuse to do, and why.
#[derive(Debug)]
pub enum EngineError {
    /// Slot or question id that does not exist.
    NotFound(Ulid),
    /// A field failed validation; the message names the field.
    Bounds(&'static str),
    /// The proposed slot overlaps the identified existing slot.
    Overlap(Ulid),
    /// The question is not accepting submissions.
    Closed(Ulid),
    /// The student already answered and resubmission is off.
    Duplicate(Ulid),
    /// Read-gated write lost the race; the message names the check.
    Conflict(&'static str),
    /// Directory has no such user.
    UnknownUser(UserId),
    /// Directory has no such room.
    UnknownRoom(i64),
    /// The user is not a teacher.
    NotTeacher(UserId),
    /// The acting teacher does not own the entity.
    NotOwner(Ulid),
    /// A configured hard limit was hit; the message names it.
    LimitExceeded(&'static str),
    /// The durability layer failed.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Bounds(msg) => write!(f, "out of bounds: {msg}"),
            EngineError::Overlap(id) => write!(f, "overlaps existing slot: {id}"),
            EngineError::Closed(id) => write!(f, "question not open: {id}"),
            EngineError::Duplicate(id) => {
                write!(f, "already answered and resubmission is off: {id}")
            }
            EngineError::Conflict(msg) => write!(f, "concurrent conflict: {msg}"),
            EngineError::UnknownUser(id) => write!(f, "unknown user: {id}"),
            EngineError::UnknownRoom(id) => write!(f, "unknown room: {id}"),
            EngineError::NotTeacher(id) => write!(f, "user is not a teacher: {id}"),
            EngineError::NotOwner(id) => write!(f, "not the owner of: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
