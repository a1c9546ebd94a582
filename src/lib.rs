//! In-memory tutoring engine with WAL durability.
//!
//! Two halves share one event log:
//! - weekly availability slots per teacher, with strict non-overlap inside
//!   the 07:00–21:00 timeline, and
//! - time-windowed questions with versioned, append-only student responses,
//!   automatic grading where the question kind allows it, and an optional
//!   close-on-first-correct trigger.
//!
//! Users and rooms live elsewhere; the engine validates their ids through
//! the [`directory::Directory`] trait. Embed via [`runtime::Runtime`], or
//! construct an [`engine::Engine`] directly for finer control.

pub mod autoclose;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod runtime;
pub mod wal;

pub use directory::{Directory, InMemoryDirectory};
pub use engine::{Engine, EngineError, OpenState};
pub use notify::NotifyHub;
pub use runtime::{Runtime, RuntimeConfig};
