//! Native backends
//!
//! The engine only talks to [`NativeRuntime`](bindery_sdk::NativeRuntime).
//! The in-process backend implements it for natives written in Rust and
//! for reflection libraries loaded at runtime.

pub mod inprocess;

pub use inprocess::{
    body, InProcessRuntime, NativeBody, NativeFrame, RuntimeBuilder, ScopeBuilder,
};
