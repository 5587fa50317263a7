//! Converters for class instances and shared pointers

use bindery_sdk::{
    decode_pointer, encode_pointer, Address, NativeValue, Reference, ScopeId, TypeSpec,
    POINTER_SIZE,
};

use super::{Converter, Temporaries};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::overload::MatchRank;
use crate::proxy::{InstanceProxy, SmartPointer};
use crate::value::Value;

/// How a class parameter is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// `T` (or `T&&`)
    ByValue,
    /// `T*`
    Pointer,
    /// `T&`
    Reference,
    /// `const T&`
    ConstRef,
}

impl PassMode {
    fn of(spec: &TypeSpec) -> Self {
        match (spec.pointers, spec.reference) {
            (0, Reference::LValue) if spec.is_const => PassMode::ConstRef,
            (0, Reference::LValue) => PassMode::Reference,
            (0, _) => PassMode::ByValue,
            _ => PassMode::Pointer,
        }
    }

    /// Check if a temporary built from a host value can bind
    fn accepts_temporary(self) -> bool {
        matches!(self, PassMode::ByValue | PassMode::ConstRef)
    }
}

/// Rank of passing an object of class `actual` where `expected` is wanted
fn class_rank(bridge: &Bridge, actual: ScopeId, expected: ScopeId) -> Option<MatchRank> {
    if actual == expected {
        Some(MatchRank::Exact)
    } else if bridge.runtime().is_subclass(actual, expected) {
        Some(MatchRank::DerivedToBase)
    } else {
        None
    }
}

/// Address of the `expected` sub-object of an object of class `actual`
fn upcast(bridge: &Bridge, address: Address, actual: ScopeId, expected: ScopeId) -> BridgeResult<Address> {
    let offset = bridge.runtime().base_offset(actual, expected).ok_or_else(|| {
        BridgeError::conversion(format!(
            "{} does not derive from {}",
            bridge.class_name(actual),
            bridge.class_name(expected)
        ))
    })?;
    Ok(address + offset as u64)
}

// ============================================================================
// Objects
// ============================================================================

/// Class instances by value, pointer or reference
pub struct ObjectConverter {
    name: String,
    class: ScopeId,
    mode: PassMode,
    size: usize,
    /// Element type if the class is a `std::vector` instantiation
    vector_element: Option<String>,
}

impl ObjectConverter {
    /// Converter for `spec`, whose base resolved to `class` of `size` bytes
    pub fn new(spec: &TypeSpec, class: ScopeId, size: usize) -> Self {
        let vector_element = match spec.template_name() {
            Some("std::vector") => spec.template_args().into_iter().next(),
            _ => None,
        };
        Self {
            name: spec.to_string(),
            class,
            mode: PassMode::of(spec),
            size,
            vector_element,
        }
    }

    /// How the parameter is passed
    pub fn mode(&self) -> PassMode {
        self.mode
    }

    fn instance_address(&self, bridge: &Bridge, o: &InstanceProxy) -> BridgeResult<Address> {
        upcast(bridge, o.address()?, o.class().id(), self.class)
    }

    /// Build a temporary native vector from a host list
    fn vector_from_list(
        &self,
        bridge: &Bridge,
        element: &str,
        items: &[Value],
        temps: &mut Temporaries,
    ) -> BridgeResult<Address> {
        let runtime = bridge.runtime();
        let ctor = runtime
            .constructors(self.class)
            .into_iter()
            .find(|c| c.required_args() == 0)
            .ok_or_else(|| BridgeError::conversion(format!("{} has no default constructor", self.name)))?;
        let address = runtime
            .construct(ctor.id, &[], false)
            .map_err(|t| bridge.native_exception(&ctor, t))?;
        temps.object(self.class, address);

        let push_back = runtime
            .overloads(self.class, "push_back")
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::conversion(format!("{} has no push_back", self.name)))?;
        let conv = bridge.converter(element)?;
        for item in items {
            let raw = conv.to_native(bridge, item, temps)?;
            runtime
                .invoke(push_back.id, Some(address), &[raw])
                .map_err(|t| bridge.native_exception(&push_back, t))?;
        }
        tracing::trace!(target: "bindery::convert", ty = %self.name, len = items.len(), "built temporary vector");
        Ok(address)
    }
}

impl Converter for ObjectConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::Object(o) => class_rank(bridge, o.class().id(), self.class),
            Value::Smart(s) => class_rank(bridge, s.class().id(), self.class),
            Value::NullPtr if self.mode == PassMode::Pointer => Some(MatchRank::Exact),
            Value::None if self.mode == PassMode::Pointer => Some(MatchRank::Conversion),
            Value::List(items) if self.mode.accepts_temporary() => {
                let element = self.vector_element.as_ref()?;
                let conv = bridge.converter(element).ok()?;
                items
                    .iter()
                    .all(|i| conv.rank(bridge, i).is_some())
                    .then_some(MatchRank::Conversion)
            }
            _ => None,
        }
    }

    fn to_native(&self, bridge: &Bridge, value: &Value, temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match value {
            Value::Object(o) => Ok(NativeValue::Ptr(self.instance_address(bridge, o)?)),
            Value::Smart(s) => Ok(NativeValue::Ptr(upcast(
                bridge,
                s.pointee(),
                s.class().id(),
                self.class,
            )?)),
            Value::NullPtr | Value::None if self.mode == PassMode::Pointer => Ok(NativeValue::Ptr(0)),
            Value::List(items) if self.mode.accepts_temporary() => {
                let element = self.vector_element.as_ref().ok_or_else(|| {
                    BridgeError::conversion(format!("cannot pass a list as {}", self.name))
                })?;
                Ok(NativeValue::Ptr(self.vector_from_list(bridge, element, items, temps)?))
            }
            other => Err(BridgeError::conversion(format!(
                "cannot pass {} as {}",
                other.type_name(),
                self.name
            ))),
        }
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Object(address) => Ok(Value::Object(bridge.wrap_object(address, self.class, true)?)),
            NativeValue::Ptr(0) => Ok(Value::NullPtr),
            NativeValue::Ptr(address) => Ok(Value::Object(bridge.wrap_object(address, self.class, creates)?)),
            NativeValue::Smart { handle, pointee } => bridge.wrap_smart(handle, pointee, self.class),
            other => Err(BridgeError::conversion(format!(
                "{} expected, native returned {}",
                self.name,
                other.type_name()
            ))),
        }
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let target = match self.mode {
            PassMode::ByValue => address,
            _ => decode_pointer(&bridge.runtime().read(address, POINTER_SIZE)?)?,
        };
        if target == 0 {
            return Ok(Value::NullPtr);
        }
        Ok(Value::Object(bridge.wrap_object(target, self.class, false)?))
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        if self.mode == PassMode::ByValue {
            let Value::Object(o) = value else {
                return Err(BridgeError::conversion(format!(
                    "cannot assign {} to {}",
                    value.type_name(),
                    self.name
                )));
            };
            let source = self.instance_address(bridge, o)?;
            let bytes = bridge.runtime().read(source, self.size)?;
            return Ok(bridge.runtime().write(address, &bytes)?);
        }
        let pointer = match value {
            Value::Object(o) => self.instance_address(bridge, o)?,
            Value::NullPtr | Value::None => 0,
            other => {
                return Err(BridgeError::conversion(format!(
                    "cannot assign {} to {}",
                    other.type_name(),
                    self.name
                )))
            }
        };
        Ok(bridge.runtime().write(address, &encode_pointer(pointer))?)
    }

    fn size(&self) -> usize {
        match self.mode {
            PassMode::ByValue => self.size,
            _ => POINTER_SIZE,
        }
    }
}

// ============================================================================
// Shared pointers
// ============================================================================

/// `std::shared_ptr<T>` by value or reference.
///
/// Returned handles are exposed as plain instance proxies that keep the
/// handle alive; passing such a proxy back shares ownership again.
pub struct SmartConverter {
    name: String,
    class: ScopeId,
    by_value: bool,
}

impl SmartConverter {
    /// Converter for a smart pointer type managing objects of `class`
    pub fn new(name: &str, class: ScopeId, spec: &TypeSpec) -> Self {
        Self {
            name: name.to_string(),
            class,
            by_value: spec.reference == Reference::None,
        }
    }

    fn smart_of<'a>(value: &'a Value) -> Option<&'a std::sync::Arc<SmartPointer>> {
        match value {
            Value::Smart(s) => Some(s),
            Value::Object(o) => o.smart(),
            _ => None,
        }
    }
}

impl Converter for SmartConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        let smart = Self::smart_of(value)?;
        class_rank(bridge, smart.class().id(), self.class)
    }

    fn to_native(&self, bridge: &Bridge, value: &Value, temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        let smart = Self::smart_of(value).ok_or_else(|| {
            BridgeError::conversion(format!("cannot pass {} as {}", value.type_name(), self.name))
        })?;
        let pointee = upcast(bridge, smart.pointee(), smart.class().id(), self.class)?;
        let handle = if self.by_value {
            let copy = bridge.runtime().smart_copy(smart.handle())?;
            temps.smart(copy);
            copy
        } else {
            smart.handle()
        };
        Ok(NativeValue::Smart { handle, pointee })
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Smart { handle, pointee } => {
                // a returned reference is still owned by native code
                let handle = if self.by_value {
                    handle
                } else {
                    bridge.runtime().smart_copy(handle)?
                };
                bridge.wrap_smart(handle, pointee, self.class)
            }
            NativeValue::Ptr(0) => Ok(Value::NullPtr),
            other => Err(BridgeError::conversion(format!(
                "{} expected, native returned {}",
                self.name,
                other.type_name()
            ))),
        }
    }

    fn size(&self) -> usize {
        2 * POINTER_SIZE
    }
}
