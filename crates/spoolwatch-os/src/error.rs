use std::io;

/// All possible runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tick interval is zero.
    #[error("The tick interval must be greater than zero")]
    ZeroTickInterval,
    /// An I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
