//! Bindery Engine
//!
//! Dynamic bindings between a host language and a native runtime:
//! - **Reflection Gateway**: cached scope, overload and member lookup (`reflect`)
//! - **Type Converter Registry**: native type → marshalling strategy (`convert`)
//! - **Overload Resolver**: ranks overloads against call arguments (`overload`)
//! - **Proxy Object Model**: instance, scope, callable and template proxies (`proxy`)
//! - **Cross-Call Bridge**: forward calls, reverse calls, attribute access (`bridge`)
//! - **Pythonizations**: user transforms of generated proxies (`pythonize`)
//! - **Low-level casts and arrays** (`ll`)
//!
//! # Example
//!
//! ```rust,ignore
//! use bindery_engine::{Bridge, BridgeConfig, RuntimeBuilder, Value};
//! use bindery_sdk::NativeValue;
//!
//! let mut b = RuntimeBuilder::new();
//! b.namespace("geo", |ns| {
//!     ns.function("int area(int w, int h)", |f| Ok(NativeValue::Int(f.int(0)? * f.int(1)?)));
//! });
//! let bridge = Bridge::new(std::sync::Arc::new(b.build()?), BridgeConfig::default())?;
//!
//! let area = bridge.lookup("geo.area")?;
//! let result = bridge.call(&area, &[Value::Int(3), Value::Int(4)])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

// ============================================================================
// Core Modules
// ============================================================================

/// Native backends (in-process runtime)
pub mod backend;

/// Cross-Call Bridge and the process-wide bridge state
pub mod bridge;

/// Bridge configuration
pub mod config;

/// Type Converter Registry
pub mod convert;

/// Error taxonomy
pub mod error;

/// Low-level casts and native arrays
pub mod ll;

/// Reflection library loader
pub mod loader;

/// Logging setup
pub mod logging;

/// Overload Resolver
pub mod overload;

/// Proxy Object Model
pub mod proxy;

/// Pythonization hooks
pub mod pythonize;

/// Reflection Gateway
pub mod reflect;

/// Exclusive-access token
pub mod sync;

/// Host-side values
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{body, InProcessRuntime, NativeFrame, RuntimeBuilder, ScopeBuilder};
pub use bridge::Bridge;
pub use config::{BridgeConfig, ConfigError};
pub use convert::{Converter, ConverterFactory, Temporaries};
pub use error::{BridgeError, BridgeResult};
pub use overload::{MatchRank, SignatureRank};
pub use proxy::{
    BoundMethod, HostClass, InstanceProxy, LowLevelView, OverloadProxy, ScopeProxy, SmartPointer,
};
pub use pythonize::{PostProcessor, PythonizationFn, PythonizationHandle};
pub use value::{HostError, HostType, Value};
