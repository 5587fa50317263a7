//! Bridge error taxonomy

use std::path::PathBuf;

use bindery_sdk::NativeError;

use crate::config::ConfigError;
use crate::value::HostError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced at a lookup or call site.
///
/// Every variant that crosses the native boundary carries the entity name
/// and, where relevant, the attempted signatures and argument types.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Name absent from the scope after autoload attempts
    #[error("'{scope}' has no attribute '{name}'")]
    UnknownEntity {
        /// Qualified scope name ("" for the global namespace)
        scope: String,
        /// Requested name
        name: String,
    },

    /// Native JIT rejected a declaration
    #[error("compilation failed:\n{diagnostic}")]
    CompilationFailure {
        /// Compiler diagnostic text
        diagnostic: String,
    },

    /// No overload accepts the arguments
    #[error("none of the {} overloaded methods of {name} accepts ({args}):\n  {}", .candidates.len(), .candidates.join("\n  "))]
    NoMatch {
        /// Qualified function name
        name: String,
        /// Argument types of the call
        args: String,
        /// Prototypes of all candidates tried
        candidates: Vec<String>,
    },

    /// Two or more overloads tie at the best rank
    #[error("ambiguous call to {name}({args}); candidates:\n  {}", .candidates.join("\n  "))]
    Ambiguous {
        /// Qualified function name
        name: String,
        /// Argument types of the call
        args: String,
        /// Tied prototypes
        candidates: Vec<String>,
    },

    /// Assignment to a const-qualified member
    #[error("cannot assign to const member '{member}' of '{scope}'")]
    ConstViolation {
        /// Qualified scope name
        scope: String,
        /// Member name
        member: String,
    },

    /// Out-of-bounds index on a sized array or view
    #[error("index {index} out of range for {what} of length {len}")]
    Bounds {
        /// Description of the indexed entity
        what: String,
        /// Requested index
        index: i64,
        /// Known length
        len: usize,
    },

    /// Exception thrown by native code during a call
    #[error("{name} => {kind}: {message}")]
    NativeException {
        /// Prototype of the called function
        name: String,
        /// Native exception type
        kind: String,
        /// Exception message
        message: String,
    },

    /// Misuse of object ownership (destroying a borrowed object, use after destroy)
    #[error("ownership error: {0}")]
    Ownership(String),

    /// Template instantiation failed
    #[error("template instantiation of {name}<{args}> failed: {reason}")]
    InstantiationFailure {
        /// Template name
        name: String,
        /// Template arguments
        args: String,
        /// Backend diagnostic
        reason: String,
    },

    /// Direct construction of an abstract class
    #[error("cannot instantiate abstract class '{0}'")]
    AbstractClass(String),

    /// Reflection library could not be loaded
    #[error("missing reflection library: {}", .path.display())]
    MissingReflectionLibrary {
        /// Library path as given
        path: PathBuf,
    },

    /// Value cannot be converted to or from a native type
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Host exception (raised by host code, possibly inside a reverse call)
    #[error("{0}")]
    Host(HostError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend request failed
    #[error("native backend error: {0}")]
    Backend(#[from] NativeError),
}

impl BridgeError {
    /// Exception kind name used when the error crosses into native code
    pub fn kind_name(&self) -> &str {
        match self {
            BridgeError::UnknownEntity { .. } => "AttributeError",
            BridgeError::CompilationFailure { .. } => "SyntaxError",
            BridgeError::NoMatch { .. } | BridgeError::Conversion(_) => "TypeError",
            BridgeError::Ambiguous { .. } => "AmbiguousError",
            BridgeError::ConstViolation { .. } => "ConstViolationError",
            BridgeError::Bounds { .. } => "IndexError",
            BridgeError::NativeException { kind, .. } => kind,
            BridgeError::Ownership(_) => "OwnershipError",
            BridgeError::InstantiationFailure { .. } => "InstantiationError",
            BridgeError::AbstractClass(_) => "TypeError",
            BridgeError::MissingReflectionLibrary { .. } => "ImportError",
            BridgeError::Host(err) => &err.kind,
            BridgeError::Config(_) => "ConfigError",
            BridgeError::Io(_) => "OSError",
            BridgeError::Backend(_) => "RuntimeError",
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            BridgeError::Host(err) => err.message.clone(),
            BridgeError::NativeException { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn unknown(scope: &str, name: &str) -> Self {
        BridgeError::UnknownEntity {
            scope: scope.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        BridgeError::Conversion(msg.into())
    }

    /// Backend failure; compiler diagnostics become `CompilationFailure`
    pub(crate) fn native(err: NativeError) -> Self {
        match err {
            NativeError::Compilation(diagnostic) => BridgeError::CompilationFailure { diagnostic },
            other => BridgeError::Backend(other),
        }
    }
}

impl From<HostError> for BridgeError {
    fn from(err: HostError) -> Self {
        BridgeError::Host(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_lists_candidates() {
        let err = BridgeError::NoMatch {
            name: "f".to_string(),
            args: "Opaque".to_string(),
            candidates: vec!["int f(int)".to_string(), "int f(double)".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("none of the 2 overloaded methods"));
        assert!(text.contains("int f(double)"));
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn test_host_error_keeps_kind() {
        let err: BridgeError = HostError::new("ValueError", "boom").into();
        assert_eq!(err.kind_name(), "ValueError");
        assert_eq!(err.message(), "boom");
    }
}
