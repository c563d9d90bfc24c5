//! Error taxonomy of the simulation core.
//!
//! * [`GameDataError`]: malformed or incompatible data at the load boundary.
//! * [`EngineError`]: broken engine invariants. These are bugs, they abort
//!   the run instead of being patched over.
//!
//! Expected absence (a destroyed object, an empty flag, no path) is never an
//! error; it is modelled with `Option` and `bool`.

use crate::object::Serial;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GameDataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed savegame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("description error: {0}")]
    Description(#[from] wldata::DescriptionError),

    /// The savegame was written by a format revision this build cannot read.
    #[error("unknown savegame version {found} (supported: {supported})")]
    UnknownVersion { found: u32, supported: u32 },

    #[error("savegame was written for tribe '{found}', loaded with '{expected}'")]
    TribeMismatch { expected: String, found: String },

    /// A strict reference points at an object that is not part of the save.
    #[error("{owner}: reference to unknown object {serial}")]
    UnknownObject { owner: String, serial: Serial },

    #[error("invalid savegame data: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A task update returned without scheduling, skipping, popping or signalling.
    #[error("MO({serial}): update[{task}] failed to act")]
    FailedToAct { serial: Serial, task: &'static str },

    #[error("MO({serial}): init_auto_task() failed to set a task")]
    AutoTaskFailed { serial: Serial },

    #[error("MO({serial}): task stack misuse: {reason}")]
    TaskStackMisuse { serial: Serial, reason: String },

    #[error("MO({serial}): task '{task}' is unique and already on the stack")]
    DuplicateUniqueTask { serial: Serial, task: &'static str },

    /// A flag claimed to have a pending ware but refused the ack.
    #[error("flag {flag}: ack_pickup refused, flag bookkeeping is messed up")]
    AckRefused { flag: Serial },

    #[error("flag {flag}: add_ware beyond capacity {capacity}")]
    FlagFull { flag: Serial, capacity: usize },

    #[error("object {0} is missing or has the wrong type")]
    MissingObject(Serial),

    #[error("inconsistent economy: {0}")]
    InconsistentEconomy(String),
}
