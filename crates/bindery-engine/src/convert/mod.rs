//! Type Converter Registry
//!
//! Maps a native type signature to the strategy that marshals host values
//! into call arguments and native memory back into host values. Built-in
//! converters are derived from the parsed signature on first use; user
//! converters registered for a type shadow the built-in one until they are
//! unregistered again.

mod builtin;
mod object;
mod pointer;

use std::sync::Arc;

use bindery_sdk::{normalize_name, Address, NativeRuntime, NativeValue, ScopeId, TypeSpec};
use dashmap::DashMap;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::overload::MatchRank;
use crate::value::Value;

pub use builtin::{
    BoolConverter, CStringConverter, CharConverter, EnumConverter, FloatConverter, IntConverter,
    StdStringConverter, VoidConverter,
};
pub use object::{ObjectConverter, PassMode, SmartConverter};
pub use pointer::{BuiltinRefConverter, PointerConverter};

/// Marshalling strategy for one native type
pub trait Converter: Send + Sync {
    /// Native type this converter handles
    fn type_name(&self) -> &str;

    /// How well `value` matches; `None` if it cannot be converted at all
    fn rank(&self, bridge: &Bridge, value: &Value) -> Option<MatchRank>;

    /// Convert a host value into a call argument
    fn to_native(
        &self,
        bridge: &Bridge,
        value: &Value,
        temps: &mut Temporaries,
    ) -> BridgeResult<NativeValue>;

    /// Convert a returned native value; `creates` marks ownership transfer
    fn from_native(&self, bridge: &Bridge, value: NativeValue, creates: bool) -> BridgeResult<Value>;

    /// Read a value of this type from native memory
    fn from_memory(&self, _bridge: &Bridge, _address: Address) -> BridgeResult<Value> {
        Err(BridgeError::conversion(format!(
            "cannot read '{}' from memory",
            self.type_name()
        )))
    }

    /// Write a host value into native memory
    fn to_memory(&self, _bridge: &Bridge, _value: &Value, _address: Address) -> BridgeResult<()> {
        Err(BridgeError::conversion(format!(
            "cannot assign to '{}' in memory",
            self.type_name()
        )))
    }

    /// Storage size in bytes
    fn size(&self) -> usize {
        bindery_sdk::POINTER_SIZE
    }
}

/// Builds a converter for a parsed type
pub type ConverterFactory = Arc<dyn Fn(&TypeSpec) -> Arc<dyn Converter> + Send + Sync>;

// ============================================================================
// Call temporaries
// ============================================================================

/// Native objects created only for the duration of one call.
///
/// Everything recorded here is destroyed when the value is dropped, after
/// the native call returned or failed.
pub struct Temporaries {
    runtime: Arc<dyn NativeRuntime>,
    objects: Vec<(ScopeId, Address)>,
    smart: Vec<u64>,
    buffers: Vec<Address>,
}

impl Temporaries {
    /// Create an empty set
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self {
            runtime,
            objects: Vec::new(),
            smart: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Destroy `address` after the call
    pub fn object(&mut self, class: ScopeId, address: Address) {
        self.objects.push((class, address));
    }

    /// Release a smart pointer handle after the call
    pub fn smart(&mut self, handle: u64) {
        self.smart.push(handle);
    }

    /// Free raw storage after the call
    pub fn buffer(&mut self, address: Address) {
        self.buffers.push(address);
    }

    /// Number of pending temporaries
    pub fn len(&self) -> usize {
        self.objects.len() + self.smart.len() + self.buffers.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Temporaries {
    fn drop(&mut self) {
        for handle in self.smart.drain(..) {
            if let Err(e) = self.runtime.smart_release(handle) {
                tracing::warn!(target: "bindery::convert", handle, error = %e, "releasing temporary handle failed");
            }
        }
        for (class, address) in self.objects.drain(..).rev() {
            if let Err(e) = self.runtime.destruct(class, address) {
                tracing::warn!(target: "bindery::convert", address, error = %e, "destroying temporary failed");
            }
        }
        for address in self.buffers.drain(..) {
            if let Err(e) = self.runtime.free(address) {
                tracing::warn!(target: "bindery::convert", address, error = %e, "freeing temporary failed");
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of converters keyed by normalized type signature
pub struct ConverterRegistry {
    /// User factories; the last registered one wins
    user: DashMap<String, Vec<ConverterFactory>>,
    /// Resolved converters
    cache: DashMap<String, Arc<dyn Converter>>,
    cache_enabled: bool,
}

impl ConverterRegistry {
    /// Create an empty registry
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            user: DashMap::new(),
            cache: DashMap::new(),
            cache_enabled,
        }
    }

    fn key(type_name: &str) -> String {
        TypeSpec::parse(type_name)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| normalize_name(type_name))
    }

    /// Register a converter factory; shadows the current converter
    pub fn register(&self, type_name: &str, factory: ConverterFactory) {
        let key = Self::key(type_name);
        tracing::debug!(target: "bindery::convert", ty = %key, "registering converter");
        self.user.entry(key).or_default().push(factory);
        self.cache.clear();
    }

    /// Remove the most recently registered factory. Returns false if none
    /// was registered for the type.
    pub fn unregister(&self, type_name: &str) -> bool {
        let key = Self::key(type_name);
        let removed = match self.user.get_mut(&key) {
            Some(mut stack) => stack.pop().is_some(),
            None => false,
        };
        self.user.remove_if(&key, |_, stack| stack.is_empty());
        self.cache.clear();
        removed
    }

    fn user_factory(&self, key: &str) -> Option<ConverterFactory> {
        self.user.get(key).and_then(|stack| stack.last().cloned())
    }

    /// Converter for a native type signature
    pub fn get(&self, bridge: &Bridge, type_name: &str) -> BridgeResult<Arc<dyn Converter>> {
        let key = Self::key(type_name);
        if let Some(conv) = self.cache.get(&key) {
            return Ok(conv.clone());
        }
        let canonical = bridge
            .runtime()
            .resolve_type(&key)
            .unwrap_or_else(|| key.clone());
        let spec = TypeSpec::parse(&canonical)?;

        let factory = self
            .user_factory(&key)
            .or_else(|| self.user_factory(&canonical));
        let conv = match factory {
            Some(factory) => factory(&spec),
            None => builtin_converter(bridge, &spec)?.ok_or_else(|| {
                BridgeError::conversion(format!("no converter for type '{}'", type_name))
            })?,
        };
        tracing::trace!(target: "bindery::convert", ty = %key, canonical = %canonical, "resolved converter");
        if self.cache_enabled {
            self.cache.insert(key, conv.clone());
        }
        Ok(conv)
    }

    /// Drop every resolved converter
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Built-in converter for a parsed type, if one applies
fn builtin_converter(bridge: &Bridge, spec: &TypeSpec) -> BridgeResult<Option<Arc<dyn Converter>>> {
    use bindery_sdk::{ArrayExtent, Builtin, Reference};

    let name = spec.to_string();
    let indirect = spec.pointers > 0 || spec.array.is_some();
    let mutable_ref = spec.reference == Reference::LValue && !spec.is_const;

    if let Some(kind) = spec.builtin() {
        let conv: Arc<dyn Converter> = match (kind, indirect) {
            (Builtin::Void, false) => Arc::new(VoidConverter),
            (Builtin::Char { .. }, true) if spec.pointers <= 1 => {
                if spec.is_const && spec.array.is_none() {
                    Arc::new(CStringConverter::new(&name))
                } else {
                    let len = match spec.array {
                        Some(ArrayExtent::Fixed(n)) => Some(n),
                        _ => None,
                    };
                    Arc::new(PointerConverter::new(spec, len))
                }
            }
            (_, true) => {
                let len = match spec.array {
                    Some(ArrayExtent::Fixed(n)) if spec.pointers == 0 => Some(n),
                    _ => None,
                };
                Arc::new(PointerConverter::new(spec, len))
            }
            (_, false) if mutable_ref => Arc::new(BuiltinRefConverter::new(spec, kind)),
            (Builtin::Bool, false) => Arc::new(BoolConverter),
            (Builtin::Char { signed }, false) => Arc::new(CharConverter::new(signed)),
            (Builtin::Float { .. }, false) => Arc::new(FloatConverter::new(kind)),
            (_, false) => Arc::new(IntConverter::new(kind, &spec.base)),
        };
        return Ok(Some(conv));
    }

    if spec.base == "std::string" && !indirect {
        return Ok(Some(Arc::new(StdStringConverter::new(&name))));
    }

    if let Some(pointee) = spec.smart_pointee() {
        if indirect {
            return Ok(None);
        }
        let class = bridge.resolve_class(&pointee)?;
        return Ok(class.map(|id| Arc::new(SmartConverter::new(&name, id, spec)) as Arc<dyn Converter>));
    }

    if let Some(decl) = bridge.find_enum(&spec.base) {
        if indirect {
            return Ok(Some(Arc::new(PointerConverter::new(spec, None))));
        }
        return Ok(Some(Arc::new(EnumConverter::new(decl))));
    }

    match bridge.resolve_class(&spec.base)? {
        Some(class) => {
            let size = bridge.runtime().scope_info(class)?.size;
            Ok(Some(Arc::new(ObjectConverter::new(spec, class, size))))
        }
        None => Ok(None),
    }
}

/// Native type a host value maps to when nothing else is known
/// (C varargs, template argument deduction)
pub fn natural_type(value: &Value) -> Option<String> {
    let name = match value {
        Value::Bool(_) => "bool".to_string(),
        Value::Int(i) if i32::try_from(*i).is_ok() => "int".to_string(),
        Value::Int(i) if i64::try_from(*i).is_ok() => "long".to_string(),
        Value::Int(_) => "unsigned long".to_string(),
        Value::Float(_) => "double".to_string(),
        Value::Str(_) => "std::string".to_string(),
        Value::Object(o) => o.class().qualified_name().to_string(),
        Value::Smart(s) => format!("std::shared_ptr<{}>", s.class().qualified_name()),
        Value::View(v) => format!("{}*", v.element_type()),
        Value::NullPtr => "void*".to_string(),
        _ => return None,
    };
    Some(name)
}

/// Type used to pass a host value through C varargs
pub(crate) fn vararg_type(value: &Value) -> Option<String> {
    match value {
        Value::Str(_) => Some("const char*".to_string()),
        Value::Object(o) => Some(format!("{}*", o.class().qualified_name())),
        other => natural_type(other),
    }
}
