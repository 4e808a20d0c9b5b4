use core::fmt;

/// All possible error kinds reported by the hardware abstraction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation is not available on the selected platform.
    Unsupported,
    /// The requested flash partition does not exist.
    NotFound,
    /// An access falls outside of a flash partition.
    OutOfBounds,
    /// The flash driver reported a failure.
    Storage,
}

impl ErrorKind {
    const fn description(self) -> &'static str {
        match self {
            Self::Unsupported => "Unsupported operation",
            Self::NotFound => "Partition not found",
            Self::OutOfBounds => "Out of bounds access",
            Self::Storage => "Storage failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description().fmt(f)
    }
}

/// A hardware abstraction layer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    info: &'static str,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a short description of
    /// the failed operation.
    #[must_use]
    #[inline]
    pub const fn new(kind: ErrorKind, info: &'static str) -> Self {
        Self { kind, info }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the description of the failed operation.
    #[must_use]
    #[inline]
    pub const fn info(&self) -> &'static str {
        self.info
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl core::error::Error for Error {}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
