use thiserror::Error;

/// Errors reported by token operations.
///
/// Every OS failure is mapped into one of these variants at the provider
/// boundary; raw Win32 codes only survive inside [`Error::Platform`].
#[derive(Debug, Error)]
pub enum Error {
    /// A null/zero token handle was supplied by the caller.
    #[error("token handle must not be null")]
    InvalidArgument,

    /// The handle is closed, of the wrong type, or rejected by the OS.
    #[error("invalid or closed access token")]
    InvalidToken,

    /// The token does not grant the rights needed for the requested query.
    #[error("access denied while querying the token")]
    AccessDenied,

    /// Allocation failed while growing a token-information buffer.
    #[error("out of resources while querying the token")]
    OutOfResources,

    /// Any other OS-reported failure, carrying the raw error code.
    #[error("platform error {code}: {message}")]
    Platform {
        /// Raw OS error code (`GetLastError` on Windows).
        code: u32,
        /// Human-readable description of the failure point.
        message: String,
    },
}

// Win32 error codes the taxonomy cares about. Everything else is `Platform`.
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_INVALID_HANDLE: u32 = 6;
const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
const ERROR_OUTOFMEMORY: u32 = 14;

impl Error {
    /// Maps a raw Win32 error code to the taxonomy.
    ///
    /// `context` names the failing call and is kept only for the
    /// [`Error::Platform`] fallback.
    #[must_use]
    pub fn from_os_code(code: u32, context: &str) -> Self {
        match code {
            ERROR_ACCESS_DENIED => Self::AccessDenied,
            ERROR_INVALID_HANDLE => Self::InvalidToken,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => Self::OutOfResources,
            _ => Self::Platform {
                code,
                message: format!("{context} failed"),
            },
        }
    }
}

/// Error type returned when parsing a SID from text or bytes fails.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("invalid SID format")]
pub struct InvalidSidFormat;
