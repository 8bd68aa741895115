use thiserror::Error;

/// Error taxonomy for the optimization engine.
///
/// Per-member run failures are recoverable (the member is dropped for the
/// generation); everything else here terminates the run.
#[derive(Error, Debug)]
pub enum MoeaError {
    #[error("diversity metrics requested before the ranking engine was bound to objectives")]
    NotInitialized,

    #[error("generation {generation}: only {found} feasible members, need at least {required}")]
    InsufficientMembers {
        generation: u32,
        found: usize,
        required: usize,
    },

    #[error("run dispatch failed: {0}")]
    RunDispatch(String),

    #[error("bad configuration: {0}")]
    Configuration(String),

    #[error("malformed member table: {0}")]
    Shape(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
