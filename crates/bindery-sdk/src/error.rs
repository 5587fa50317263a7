//! Error types shared by the bridge and native backends

use std::fmt;

/// Result type for backend operations
pub type NativeResult<T> = Result<T, NativeError>;

/// Failures reported by a native backend.
///
/// These describe problems with a backend request itself (unknown ids,
/// out-of-range memory, failed declarations), never exceptions thrown by
/// native code. Thrown exceptions travel as [`NativeThrow`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    /// Scope id not known to the backend
    #[error("Unknown scope: {0}")]
    UnknownScope(u64),

    /// Method id not known to the backend
    #[error("Unknown method: {0}")]
    UnknownMethod(u64),

    /// Malformed type signature
    #[error("Cannot parse type: {0}")]
    TypeParse(String),

    /// Declaration rejected by the native compiler (carries the diagnostic)
    #[error("{0}")]
    Compilation(String),

    /// Library could not be loaded
    #[error("Library error: {0}")]
    Library(String),

    /// Template instantiation failed
    #[error("Instantiation failed: {0}")]
    Instantiation(String),

    /// Access outside any live allocation
    #[error("Invalid memory access: {0}")]
    Memory(String),

    /// Value of the wrong shape for a native slot
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Invalid argument to a backend operation
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Construction of an abstract class was requested
    #[error("Cannot construct abstract class {0}")]
    AbstractClass(String),

    /// Operation not supported by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<String> for NativeError {
    fn from(s: String) -> Self {
        NativeError::ArgumentError(s)
    }
}

impl From<&str> for NativeError {
    fn from(s: &str) -> Self {
        NativeError::ArgumentError(s.to_string())
    }
}

// ============================================================================
// Exceptions crossing the boundary
// ============================================================================

/// Where an exception was originally raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowOrigin {
    /// Thrown by native code
    Native,
    /// Raised by a host override during a reverse call
    Host,
}

/// A native-catchable exception.
///
/// Native code observes host exceptions raised inside reverse calls as a
/// `NativeThrow` with `origin == ThrowOrigin::Host`; the bridge re-raises
/// those as the original host error once they leave the forward call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeThrow {
    /// Exception type name (`std::runtime_error`, `ValueError`, ...)
    pub kind: String,
    /// Exception message (`what()`)
    pub message: String,
    /// Where the exception was raised
    pub origin: ThrowOrigin,
}

impl NativeThrow {
    /// Exception thrown by native code
    pub fn native(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            origin: ThrowOrigin::Native,
        }
    }

    /// Host exception travelling through native frames
    pub fn host(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            origin: ThrowOrigin::Host,
        }
    }

    /// `std::runtime_error` with the given message
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::native("std::runtime_error", message)
    }
}

impl fmt::Display for NativeThrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for NativeThrow {}

impl From<NativeError> for NativeThrow {
    fn from(err: NativeError) -> Self {
        let kind = match err {
            NativeError::Memory(_) => "std::out_of_range",
            NativeError::ArgumentError(_) | NativeError::TypeMismatch { .. } => {
                "std::invalid_argument"
            }
            _ => "std::runtime_error",
        };
        NativeThrow::native(kind, err.to_string())
    }
}
