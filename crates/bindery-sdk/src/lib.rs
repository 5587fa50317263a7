//! Bindery SDK - the native backend contract
//!
//! This crate holds the types and traits shared between the bindery engine
//! and a native backend, so that backends can be written without depending
//! on the engine:
//!
//! - reflection records ([`ScopeInfo`], [`Signature`], [`DataMember`], ...)
//!   and parsed type signatures ([`TypeSpec`])
//! - marshalled values ([`NativeValue`]) and their byte layout
//! - the [`NativeRuntime`] trait (JIT, reflection, memory, invocation)
//! - [`ReverseDispatch`] and [`NativeCallContext`] for native → host calls
//!
//! # Example
//!
//! ```ignore
//! use bindery_sdk::{NativeRuntime, ScopeId};
//!
//! fn list_globals(rt: &dyn NativeRuntime) -> Vec<String> {
//!     rt.member_names(ScopeId::GLOBAL)
//! }
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod runtime;
pub mod types;
pub mod value;

pub use context::NativeCallContext;
pub use error::{NativeError, NativeResult, NativeThrow, ThrowOrigin};
pub use runtime::{NativeRuntime, ReverseDispatch};
pub use types::{
    normalize_name, split_template_args, Address, ArrayExtent, BaseInfo, Builtin, DataMember,
    EntityDecl, EnumDecl, MethodId, Param, Reference, ScopeId, ScopeInfo, ScopeKind, Signature,
    TemplateParams, TypeSpec, VirtualMethod, POINTER_SIZE,
};
pub use value::{decode_builtin, decode_pointer, encode_builtin, encode_pointer, NativeValue};
