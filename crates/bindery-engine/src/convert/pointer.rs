//! Converters for builtin pointers, arrays and mutable references

use std::sync::Arc;

use bindery_sdk::{
    decode_pointer, encode_builtin, encode_pointer, Address, ArrayExtent, Builtin, NativeValue,
    TypeSpec, POINTER_SIZE,
};

use super::builtin::int_value;
use super::{Converter, Temporaries};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::overload::MatchRank;
use crate::proxy::LowLevelView;
use crate::value::Value;

fn same_element(view: &LowLevelView, element: &TypeSpec) -> bool {
    let ours = view.element_type();
    ours.base == element.base && ours.pointers == element.pointers
}

// ============================================================================
// Pointers and arrays
// ============================================================================

/// `T*` and `T[N]` for builtin `T`; results become low-level views
pub struct PointerConverter {
    name: String,
    element: TypeSpec,
    len: Option<usize>,
    /// Array stored inline (data member `T m[N]`), not behind a pointer
    inline: bool,
}

impl PointerConverter {
    /// Converter for a pointer or array type with an optional known length
    pub fn new(spec: &TypeSpec, len: Option<usize>) -> Self {
        let inline = matches!(spec.array, Some(ArrayExtent::Fixed(_))) && spec.pointers == 0;
        Self {
            name: spec.to_string(),
            element: spec.element(),
            len,
            inline,
        }
    }

    fn view(&self, bridge: &Bridge, address: Address) -> Value {
        Value::View(Arc::new(LowLevelView::new(
            bridge.runtime().clone(),
            address,
            self.element.clone(),
            self.len,
        )))
    }

    fn element_kind(&self) -> Option<Builtin> {
        if self.element.pointers > 0 {
            return None;
        }
        self.element.builtin().filter(|b| *b != Builtin::Void)
    }

    /// Copy a host list into a fresh buffer owned by `temps`
    fn buffer(&self, bridge: &Bridge, items: &[Value], temps: &mut Temporaries) -> BridgeResult<Address> {
        let kind = self
            .element_kind()
            .ok_or_else(|| BridgeError::conversion(format!("cannot pass a list as {}", self.name)))?;
        let conv = bridge.converter(&kind_name(&self.element))?;
        let mut bytes = Vec::with_capacity(items.len() * kind.size());
        for item in items {
            let raw = conv.to_native(bridge, item, temps)?;
            bytes.extend(encode_builtin(kind, &raw)?);
        }
        let address = bridge.runtime().allocate(bytes.len().max(1))?;
        temps.buffer(address);
        bridge.runtime().write(address, &bytes)?;
        Ok(address)
    }
}

fn kind_name(element: &TypeSpec) -> String {
    let mut plain = element.clone();
    plain.is_const = false;
    plain.to_string()
}

impl Converter for PointerConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::View(v) if same_element(v, &self.element) => Some(MatchRank::Exact),
            Value::View(_) if self.element.base == "void" => Some(MatchRank::Conversion),
            Value::NullPtr => Some(MatchRank::Exact),
            Value::None => Some(MatchRank::Conversion),
            Value::Object(_) | Value::Smart(_) if self.element.base == "void" => Some(MatchRank::Conversion),
            Value::List(items) if self.element_kind().is_some() => {
                let conv = bridge.converter(&kind_name(&self.element)).ok()?;
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
            Value::View(v) => Ok(NativeValue::Ptr(v.address())),
            Value::NullPtr | Value::None => Ok(NativeValue::Ptr(0)),
            Value::Object(o) => Ok(NativeValue::Ptr(o.address()?)),
            Value::Smart(s) => Ok(NativeValue::Ptr(s.pointee())),
            Value::List(items) => Ok(NativeValue::Ptr(self.buffer(bridge, items, temps)?)),
            other => Err(BridgeError::conversion(format!(
                "cannot pass {} as {}",
                other.type_name(),
                self.name
            ))),
        }
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Ptr(address) | NativeValue::Object(address) => Ok(self.view(bridge, address)),
            NativeValue::Str(s) => Ok(Value::Str(s)),
            other => Err(BridgeError::conversion(format!(
                "{} expected, native returned {}",
                self.name,
                other.type_name()
            ))),
        }
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        if self.inline {
            return Ok(self.view(bridge, address));
        }
        let pointer = decode_pointer(&bridge.runtime().read(address, POINTER_SIZE)?)?;
        Ok(self.view(bridge, pointer))
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        if self.inline {
            let Value::List(items) = value else {
                return Err(BridgeError::conversion(format!(
                    "cannot assign {} to {}",
                    value.type_name(),
                    self.name
                )));
            };
            let capacity = self.len.unwrap_or(0);
            if items.len() > capacity {
                return Err(BridgeError::Bounds {
                    what: self.name.clone(),
                    index: items.len() as i64 - 1,
                    len: capacity,
                });
            }
            let conv = bridge.converter(&kind_name(&self.element))?;
            let stride = conv.size() as u64;
            for (i, item) in items.iter().enumerate() {
                conv.to_memory(bridge, item, address + i as u64 * stride)?;
            }
            return Ok(());
        }
        let pointer = match value {
            Value::View(v) => v.address(),
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
        match (self.inline, self.len, self.element_kind()) {
            (true, Some(n), Some(kind)) => n * kind.size(),
            _ => POINTER_SIZE,
        }
    }
}

// ============================================================================
// Mutable references to builtins
// ============================================================================

/// `T&` for builtin `T`: an output parameter.
///
/// Host immediates cannot be updated in place, so only views (e.g. from
/// `ll::array_new`) are accepted; returned references are read through.
pub struct BuiltinRefConverter {
    name: String,
    element: TypeSpec,
    kind: Builtin,
}

impl BuiltinRefConverter {
    /// Converter for a mutable reference to a builtin
    pub fn new(spec: &TypeSpec, kind: Builtin) -> Self {
        Self {
            name: spec.to_string(),
            element: TypeSpec::value(&spec.base),
            kind,
        }
    }

    fn read(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        bridge.converter(&self.element.to_string())?.from_memory(bridge, address)
    }
}

impl Converter for BuiltinRefConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::View(v) if same_element(v, &self.element) => Some(MatchRank::Exact),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match value {
            Value::View(v) if v.address() != 0 => Ok(NativeValue::Ptr(v.address())),
            other => Err(BridgeError::conversion(format!(
                "{} requires a {} view, got {}",
                self.name,
                self.element,
                other.type_name()
            ))),
        }
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Ptr(0) => Ok(Value::NullPtr),
            NativeValue::Ptr(address) => self.read(bridge, address),
            // by-value fallback from natives that return the referenced value
            other => {
                let value = if self.kind.is_float() {
                    other.as_f64().map(Value::Float)
                } else {
                    int_value(&other)
                };
                value.ok_or_else(|| {
                    BridgeError::conversion(format!(
                        "{} expected, native returned {}",
                        self.name,
                        other.type_name()
                    ))
                })
            }
        }
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let pointer = decode_pointer(&bridge.runtime().read(address, POINTER_SIZE)?)?;
        self.read(bridge, pointer)
    }

    fn size(&self) -> usize {
        POINTER_SIZE
    }
}
