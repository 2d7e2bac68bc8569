use thiserror::Error;

/// Errors reported by [`ArenaAllocator`](crate::ArenaAllocator) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("bad arguments")]
    BadArguments,

    #[error("arena is not initialized")]
    Uninitialized,

    #[error("arena is already initialized")]
    AlreadyInitialized,

    #[error("{call} failed (errno {errno})")]
    SystemCallFailed { call: &'static str, errno: i32 },

    #[error("out of memory (requested: {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("invalid handle {addr:#x}")]
    InvalidHandle { addr: usize },

    #[error("chunk list corrupted at offset {offset:#x}")]
    Corrupted { offset: usize },
}

impl ArenaError {
    /// Status code recorded for this error.
    pub fn status(&self) -> Status {
        match self {
            ArenaError::BadArguments => Status::BadArguments,
            ArenaError::Uninitialized => Status::Uninitialized,
            ArenaError::AlreadyInitialized => Status::AlreadyInitialized,
            ArenaError::SystemCallFailed { .. } => Status::SystemCallFailed,
            ArenaError::OutOfMemory { .. } => Status::OutOfMemory,
            ArenaError::InvalidHandle { .. } => Status::InvalidHandle,
            ArenaError::Corrupted { .. } => Status::Corrupted,
        }
    }
}

/// Outcome code of the most recent operation on an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    BadArguments,
    Uninitialized,
    AlreadyInitialized,
    SystemCallFailed,
    OutOfMemory,
    InvalidHandle,
    Corrupted,
}

impl<T> From<&Result<T, ArenaError>> for Status {
    fn from(result: &Result<T, ArenaError>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }
}
