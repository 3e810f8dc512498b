//! Cart errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A concurrent writer got in the way; the whole operation may be retried.
    #[error("Concurrent cart modification")]
    Conflict,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CartError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CartError::Conflict)
    }
}
