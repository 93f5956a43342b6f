//! Error types.
//!
//! Store and export failures surface as [`PulseError`]; rejected lifecycle
//! transitions as [`LifecycleError`]. The binary wraps both in `anyhow`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// The record store rejected the query or could not be reached
    #[error("record store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A vacancy referenced by id does not exist
    #[error("vacancy {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("vacancy is already closed")]
    AlreadyClosed,

    #[error("vacancy is not closed")]
    NotClosed,

    #[error("closing instant precedes the opening instant")]
    ClosesBeforeOpening,

    /// Freezing and closing are mutually exclusive
    #[error("a closed vacancy cannot be frozen")]
    FrozenWhileClosed,

    #[error("nothing to change")]
    NoChange,

    #[error("{0} must not be empty")]
    Blank(&'static str),

    #[error("{0} has an unrecognised value")]
    Invalid(&'static str),
}
