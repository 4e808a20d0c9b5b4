use serde::Serialize;

use spoolwatch_hal::error::{Error as HalError, ErrorKind as HalErrorKind};
use spoolwatch_hal::system::{HeapStats, ResetDiagnostics};

use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// All possible errors reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The requested resource does not exist.
    NotFound,
    /// The request is invalid.
    InvalidData,
    /// The operation is not available on this platform.
    Unsupported,
    /// An internal error occurred.
    Internal,
}

impl ErrorKind {
    const fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidData => StatusCode::BAD_REQUEST,
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorKind,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<&'a str>,
}

/// A response providing details about an error.
///
/// Contains an [`ErrorKind`], a general error description,
/// and optional information about the encountered error.
pub struct ErrorResponse(Response);

impl ErrorResponse {
    /// Generates an [`ErrorResponse`].
    #[must_use]
    pub fn with_description(error: ErrorKind, description: &str) -> Self {
        Self::new(error, description, None)
    }

    /// Generates an [`ErrorResponse`] with information about the encountered
    /// error.
    #[must_use]
    pub fn with_description_error(error: ErrorKind, description: &str, info: &str) -> Self {
        Self::new(error, description, Some(info))
    }

    /// Generates an [`ErrorResponse`] for a missing resource.
    #[must_use]
    #[inline]
    pub fn not_found(description: &str) -> Self {
        Self::with_description(ErrorKind::NotFound, description)
    }

    /// Generates an [`ErrorResponse`] for a failed hardware operation.
    #[must_use]
    pub fn hal(description: &str, error: HalError) -> Self {
        let kind = match error.kind() {
            HalErrorKind::NotFound => ErrorKind::NotFound,
            HalErrorKind::OutOfBounds => ErrorKind::InvalidData,
            HalErrorKind::Unsupported => ErrorKind::Unsupported,
            HalErrorKind::Storage => ErrorKind::Internal,
        };
        Self::with_description_error(kind, description, &error.to_string())
    }

    fn new(error: ErrorKind, description: &str, info: Option<&str>) -> Self {
        let body = ErrorBody {
            error,
            description,
            info,
        };
        Self((error.status(), Json(body)).into_response())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        self.0
    }
}

/// Crash dump availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoreDumpInfo {
    /// Whether a crash dump is stored.
    pub available: bool,
    /// Size of the stored crash dump, in bytes.
    pub size: usize,
}

/// System diagnostics of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    /// Platform name.
    pub platform: &'static str,
    /// Whether a preemptive multitasking kernel is running.
    pub has_rtos: bool,
    /// Facts about the most recent reboot.
    pub reset: ResetDiagnostics,
    /// Heap statistics.
    pub heap: HeapStats,
    /// Monotonic cycle counter.
    pub cycle_count: u32,
    /// Crash dump availability.
    pub coredump: CoreDumpInfo,
}

/// Firmware version and chip family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionResponse {
    /// Firmware version.
    pub firmware_version: &'static str,
    /// Version of the build.
    pub build_version: &'static str,
    /// Chip family.
    pub chip_family: &'static str,
}
