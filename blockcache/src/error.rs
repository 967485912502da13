use blockcache_core::BlockId;

/// Failures of block cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying store failed to read, write or free a block.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A usage contract of the block was violated.
    #[error("illegal block state: {0}")]
    IllegalState(&'static str),
    /// A byte range does not lie within a block.
    #[error("invalid block range {min}..{max}")]
    InvalidRange { min: usize, max: usize },
    /// The block's buffer was already handed back to the buffer pool.
    #[error("buffer of {0:?} was already released")]
    Released(BlockId),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error originated in the store.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    // A copy for each caller sharing one failure.
    pub(crate) fn replicate(&self) -> Error {
        match self {
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
            Error::IllegalState(what) => Error::IllegalState(what),
            Error::InvalidRange { min, max } => Error::InvalidRange {
                min: *min,
                max: *max,
            },
            Error::Released(id) => Error::Released(*id),
        }
    }
}
