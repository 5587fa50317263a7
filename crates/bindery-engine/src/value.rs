//! Host-side values
//!
//! `Value` models the dynamic language: immediates plus reference-counted
//! proxies for native entities. Identity (`Value::is`) is pointer identity
//! for proxies and value equality for immediates.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::proxy::callable::{BoundMethod, HostMethod, OverloadProxy};
use crate::proxy::scope::{EnumProxy, ScopeProxy};
use crate::proxy::template::TemplateProxy;
use crate::proxy::view::{LowLevelView, SmartPointer};
use crate::proxy::InstanceProxy;

/// A dynamic-language value
#[derive(Clone)]
pub enum Value {
    /// `None`
    None,
    /// The `nullptr` sentinel
    NullPtr,
    /// Boolean
    Bool(bool),
    /// Integer (wide enough for every native integer width)
    Int(i128),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// List
    List(Vec<Value>),
    /// Native instance proxy
    Object(Arc<InstanceProxy>),
    /// Namespace or class proxy
    Scope(Arc<ScopeProxy>),
    /// Enum type proxy
    Enum(Arc<EnumProxy>),
    /// Unbound overload set
    Callable(Arc<OverloadProxy>),
    /// Method bound to an instance
    Bound(Arc<BoundMethod>),
    /// Host-defined function (pythonizations, host class methods)
    HostFn(Arc<HostMethod>),
    /// Class template proxy
    Template(Arc<TemplateProxy>),
    /// Typed view of native memory
    View(Arc<LowLevelView>),
    /// Explicit smart pointer handle
    Smart(Arc<SmartPointer>),
    /// Host object the bridge cannot convert
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Identity comparison (`a is b`)
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::NullPtr, Value::NullPtr) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Scope(a), Value::Scope(b)) => Arc::ptr_eq(a, b),
            (Value::Enum(a), Value::Enum(b)) => Arc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(a, b),
            (Value::Bound(a), Value::Bound(b)) => Arc::ptr_eq(a, b),
            (Value::HostFn(a), Value::HostFn(b)) => Arc::ptr_eq(a, b),
            (Value::Template(a), Value::Template(b)) => Arc::ptr_eq(a, b),
            (Value::View(a), Value::View(b)) => Arc::ptr_eq(a, b),
            (Value::Smart(a), Value::Smart(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Truthiness
    pub fn truthy(&self) -> bool {
        match self {
            Value::None | Value::NullPtr => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::View(v) => v.address() != 0,
            _ => true,
        }
    }

    /// Type name used in diagnostics
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::NullPtr => "nullptr_t".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Object(o) => o.class().qualified_name().to_string(),
            Value::Scope(s) => format!("<scope {}>", s.qualified_name()),
            Value::Enum(e) => format!("<enum {}>", e.qualified_name()),
            Value::Callable(c) => format!("<function {}>", c.qualified_name()),
            Value::Bound(_) => "<bound method>".to_string(),
            Value::HostFn(f) => format!("<host function {}>", f.name()),
            Value::Template(t) => format!("<template {}>", t.qualified_name()),
            Value::View(v) => format!("{}*", v.element_type()),
            Value::Smart(s) => format!("std::shared_ptr<{}>", s.class().qualified_name()),
            Value::Opaque(_) => "object".to_string(),
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i128> {
        match *self {
            Value::Int(i) => Some(i),
            Value::Bool(b) => Some(b as i128),
            _ => None,
        }
    }

    /// Get as float (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the instance proxy
    pub fn as_instance(&self) -> Option<&Arc<InstanceProxy>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get the scope proxy
    pub fn as_scope(&self) -> Option<&Arc<ScopeProxy>> {
        match self {
            Value::Scope(s) => Some(s),
            _ => None,
        }
    }

    /// Get the view
    pub fn as_view(&self) -> Option<&Arc<LowLevelView>> {
        match self {
            Value::View(v) => Some(v),
            _ => None,
        }
    }

    /// Check if this is `None` or `nullptr`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::None | Value::NullPtr)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::NullPtr => write!(f, "nullptr"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(l) => f.debug_list().entries(l.iter()).finish(),
            Value::Object(o) => write!(
                f,
                "<{} object at {:#x}>",
                o.class().qualified_name(),
                o.raw_address()
            ),
            Value::View(v) => write!(f, "<{}* view at {:#x}>", v.element_type(), v.address()),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i128)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i as i128)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i as i128)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

// ============================================================================
// Host types and exceptions
// ============================================================================

/// Host type tags usable as template arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    /// Host `int`
    Int,
    /// Host `float`
    Float,
    /// Host `bool`
    Bool,
    /// Host `str`
    Str,
}

impl HostType {
    /// Native type the tag stands for
    pub fn native_name(self) -> &'static str {
        match self {
            HostType::Int => "int",
            HostType::Float => "double",
            HostType::Bool => "bool",
            HostType::Str => "std::string",
        }
    }
}

impl From<HostType> for Value {
    fn from(t: HostType) -> Self {
        Value::Str(t.native_name().to_string())
    }
}

/// A dynamic-language exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    /// Exception class name
    pub kind: String,
    /// Exception message
    pub message: String,
}

impl HostError {
    /// Create a host exception
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HostError {}
