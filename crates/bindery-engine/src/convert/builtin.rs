//! Converters for builtin value types, strings and enums

use bindery_sdk::{decode_builtin, encode_builtin, Address, Builtin, EnumDecl, NativeValue};

use super::{Converter, Temporaries};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::overload::MatchRank;
use crate::value::Value;

fn wrong_type(expected: &str, value: &Value) -> BridgeError {
    BridgeError::conversion(format!(
        "expected {}, got {}",
        expected,
        value.type_name()
    ))
}

fn read_builtin(bridge: &Bridge, kind: Builtin, address: Address) -> BridgeResult<NativeValue> {
    let bytes = bridge.runtime().read(address, kind.size())?;
    Ok(decode_builtin(kind, &bytes)?)
}

fn write_builtin(bridge: &Bridge, kind: Builtin, value: &NativeValue, address: Address) -> BridgeResult<()> {
    let bytes = encode_builtin(kind, value)?;
    Ok(bridge.runtime().write(address, &bytes)?)
}

/// Host integer for an integral native value
pub(crate) fn int_value(value: &NativeValue) -> Option<Value> {
    match *value {
        NativeValue::Int(i) => Some(Value::Int(i as i128)),
        NativeValue::UInt(u) => Some(Value::Int(u as i128)),
        NativeValue::Bool(b) => Some(Value::Int(b as i128)),
        NativeValue::Char(c) => Some(Value::Int(c as i128)),
        _ => None,
    }
}

// ============================================================================
// void
// ============================================================================

/// `void` returns
pub struct VoidConverter;

impl Converter for VoidConverter {
    fn type_name(&self) -> &str {
        "void"
    }

    fn rank(&self, _bridge: &Bridge, _value: &Value) -> Option<MatchRank> {
        None
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        Err(wrong_type("nothing", value))
    }

    fn from_native(&self, _bridge: &Bridge, _value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        Ok(Value::None)
    }

    fn size(&self) -> usize {
        0
    }
}

// ============================================================================
// bool
// ============================================================================

/// `bool`
pub struct BoolConverter;

impl Converter for BoolConverter {
    fn type_name(&self) -> &str {
        "bool"
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::Bool(_) => Some(MatchRank::Exact),
            Value::Int(0) | Value::Int(1) => Some(MatchRank::Narrowing),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match value {
            Value::Bool(b) => Ok(NativeValue::Bool(*b)),
            Value::Int(i @ (0 | 1)) => Ok(NativeValue::Bool(*i == 1)),
            other => Err(wrong_type("bool", other)),
        }
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| BridgeError::conversion(format!("bool expected, native returned {}", value.type_name())))
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let raw = read_builtin(bridge, Builtin::Bool, address)?;
        self.from_native(bridge, raw, false)
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        let raw = self.to_native(bridge, value, &mut Temporaries::new(bridge.runtime().clone()))?;
        write_builtin(bridge, Builtin::Bool, &raw, address)
    }

    fn size(&self) -> usize {
        1
    }
}

// ============================================================================
// char
// ============================================================================

/// `char`, `signed char`, `unsigned char`
pub struct CharConverter {
    kind: Builtin,
}

impl CharConverter {
    /// Converter for a signed or unsigned char
    pub fn new(signed: bool) -> Self {
        Self {
            kind: Builtin::Char { signed },
        }
    }

    fn byte(&self, value: &Value) -> Option<u8> {
        match value {
            // one character in U+0000..=U+00FF, the range `from_native` produces
            Value::Str(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => u8::try_from(u32::from(c)).ok(),
                    _ => None,
                }
            }
            Value::Int(i) => {
                let (lo, hi) = self.kind.int_range()?;
                (lo..=hi).contains(i).then_some(*i as u8)
            }
            _ => None,
        }
    }
}

impl Converter for CharConverter {
    fn type_name(&self) -> &str {
        match self.kind {
            Builtin::Char { signed: false } => "unsigned char",
            _ => "char",
        }
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        // a one-character string prefers string and pointer parameters
        self.byte(value).map(|_| MatchRank::Narrowing)
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        self.byte(value)
            .map(NativeValue::Char)
            .ok_or_else(|| wrong_type("a single character", value))
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        let byte = match value {
            NativeValue::Char(c) => c,
            ref other => other
                .as_i64()
                .map(|i| i as u8)
                .ok_or_else(|| BridgeError::conversion(format!("char expected, native returned {}", other.type_name())))?,
        };
        Ok(Value::Str((byte as char).to_string()))
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let raw = read_builtin(bridge, self.kind, address)?;
        self.from_native(bridge, raw, false)
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        let byte = self.byte(value).ok_or_else(|| wrong_type("a single character", value))?;
        write_builtin(bridge, self.kind, &NativeValue::Char(byte), address)
    }

    fn size(&self) -> usize {
        1
    }
}

// ============================================================================
// Integers
// ============================================================================

/// Fixed-width integers of every native width
pub struct IntConverter {
    kind: Builtin,
    name: String,
}

impl IntConverter {
    /// Converter for an integral builtin
    pub fn new(kind: Builtin, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }

    fn in_range(&self, i: i128) -> bool {
        self.kind
            .int_range()
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&i))
    }

    fn checked(&self, i: i128) -> BridgeResult<NativeValue> {
        if !self.in_range(i) {
            return Err(BridgeError::conversion(format!(
                "{} out of range for {}",
                i, self.name
            )));
        }
        Ok(match self.kind {
            Builtin::Int { signed: false, .. } | Builtin::WChar => NativeValue::UInt(i as u64),
            _ => NativeValue::Int(i as i64),
        })
    }
}

impl Converter for IntConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match *value {
            Value::Int(i) if self.in_range(i) => Some(match self.kind {
                Builtin::Int { bits: 32, signed: true } => MatchRank::Exact,
                Builtin::Int { bits, signed: true } if bits > 32 => MatchRank::Promotion,
                Builtin::Int { signed: true, .. } => MatchRank::Narrowing,
                _ => MatchRank::Conversion,
            }),
            Value::Bool(_) => Some(MatchRank::Promotion),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match *value {
            Value::Int(i) => self.checked(i),
            Value::Bool(b) => self.checked(b as i128),
            ref other => Err(wrong_type(&self.name, other)),
        }
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        int_value(&value).ok_or_else(|| {
            BridgeError::conversion(format!(
                "{} expected, native returned {}",
                self.name,
                value.type_name()
            ))
        })
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let raw = read_builtin(bridge, self.kind, address)?;
        self.from_native(bridge, raw, false)
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        let raw = self.to_native(bridge, value, &mut Temporaries::new(bridge.runtime().clone()))?;
        write_builtin(bridge, self.kind, &raw, address)
    }

    fn size(&self) -> usize {
        self.kind.size()
    }
}

// ============================================================================
// Floating point
// ============================================================================

/// `float`, `double`, `long double`
pub struct FloatConverter {
    kind: Builtin,
}

impl FloatConverter {
    /// Converter for a floating point builtin
    pub fn new(kind: Builtin) -> Self {
        Self { kind }
    }
}

impl Converter for FloatConverter {
    fn type_name(&self) -> &str {
        match self.kind {
            Builtin::Float { bits: 32 } => "float",
            Builtin::Float { bits: 64 } => "double",
            _ => "long double",
        }
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match (value, self.kind) {
            (Value::Float(_), Builtin::Float { bits: 64 }) => Some(MatchRank::Exact),
            (Value::Float(_), Builtin::Float { bits: 32 }) => Some(MatchRank::Narrowing),
            (Value::Float(_), _) => Some(MatchRank::Promotion),
            (Value::Int(_), _) => Some(MatchRank::Conversion),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        value
            .as_float()
            .map(NativeValue::Float)
            .ok_or_else(|| wrong_type(self.type_name(), value))
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        value.as_f64().map(Value::Float).ok_or_else(|| {
            BridgeError::conversion(format!(
                "{} expected, native returned {}",
                self.type_name(),
                value.type_name()
            ))
        })
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let raw = read_builtin(bridge, self.kind, address)?;
        self.from_native(bridge, raw, false)
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        let raw = self.to_native(bridge, value, &mut Temporaries::new(bridge.runtime().clone()))?;
        write_builtin(bridge, self.kind, &raw, address)
    }

    fn size(&self) -> usize {
        self.kind.size()
    }
}

// ============================================================================
// Strings
// ============================================================================

/// `const char*`: immutable NUL-terminated strings
pub struct CStringConverter {
    name: String,
}

impl CStringConverter {
    /// Converter for a const char pointer spelling
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Converter for CStringConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::Str(_) => Some(MatchRank::Exact),
            Value::View(v) if v.element_type().base == "char" => Some(MatchRank::Exact),
            Value::NullPtr | Value::None => Some(MatchRank::Conversion),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match value {
            Value::Str(s) => Ok(NativeValue::Str(s.clone())),
            Value::View(v) => Ok(NativeValue::Ptr(v.address())),
            Value::NullPtr | Value::None => Ok(NativeValue::Ptr(0)),
            other => Err(wrong_type("str", other)),
        }
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Str(s) => Ok(Value::Str(s)),
            NativeValue::Ptr(0) => Ok(Value::None),
            NativeValue::Ptr(address) => self.from_c_string(bridge, address),
            other => Err(BridgeError::conversion(format!(
                "string expected, native returned {}",
                other.type_name()
            ))),
        }
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let pointer = bindery_sdk::decode_pointer(&bridge.runtime().read(address, 8)?)?;
        if pointer == 0 {
            return Ok(Value::None);
        }
        self.from_c_string(bridge, pointer)
    }
}

impl CStringConverter {
    fn from_c_string(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        loop {
            let b = bridge.runtime().read(cursor, 1)?[0];
            if b == 0 {
                break;
            }
            bytes.push(b);
            cursor += 1;
        }
        Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// `std::string` by value or reference
pub struct StdStringConverter {
    name: String,
}

impl StdStringConverter {
    /// Converter for a std::string spelling
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Converter for StdStringConverter {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::Str(_) => Some(MatchRank::Conversion),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        match value {
            Value::Str(s) => Ok(NativeValue::Str(s.clone())),
            other => Err(wrong_type("str", other)),
        }
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Str(s) => Ok(Value::Str(s)),
            other => Err(BridgeError::conversion(format!(
                "std::string expected, native returned {}",
                other.type_name()
            ))),
        }
    }

    fn size(&self) -> usize {
        32
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Enum types; enumerators are host integers
pub struct EnumConverter {
    decl: EnumDecl,
    inner: IntConverter,
    kind: Builtin,
}

impl EnumConverter {
    /// Converter for an enum declaration
    pub fn new(decl: EnumDecl) -> Self {
        let kind = Builtin::from_name(&decl.underlying).unwrap_or(Builtin::Int {
            bits: 32,
            signed: true,
        });
        let inner = IntConverter::new(kind, &decl.qualified_name);
        Self { decl, inner, kind }
    }
}

impl Converter for EnumConverter {
    fn type_name(&self) -> &str {
        &self.decl.qualified_name
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match *value {
            Value::Int(i) if self.inner.in_range(i) => Some(MatchRank::Conversion),
            _ => None,
        }
    }

    fn to_native(&self, bridge: &Bridge, value: &Value, temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        self.inner.to_native(bridge, value, temps)
    }

    fn from_native(&self, bridge: &Bridge, value: NativeValue, creates: bool) -> BridgeResult<Value> {
        self.inner.from_native(bridge, value, creates)
    }

    fn from_memory(&self, bridge: &Bridge, address: Address) -> BridgeResult<Value> {
        self.inner.from_memory(bridge, address)
    }

    fn to_memory(&self, bridge: &Bridge, value: &Value, address: Address) -> BridgeResult<()> {
        self.inner.to_memory(bridge, value, address)
    }

    fn size(&self) -> usize {
        self.kind.size()
    }
}
