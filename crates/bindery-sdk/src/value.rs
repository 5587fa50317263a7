//! Marshalled native values
//!
//! `NativeValue` is what crosses the bridge: arguments handed to
//! [`NativeRuntime::invoke`](crate::NativeRuntime::invoke) and the values
//! native code returns. Builtins also have a byte encoding for reading and
//! writing data members and buffers.

use crate::error::{NativeError, NativeResult};
use crate::types::{Address, Builtin, POINTER_SIZE};

/// A native argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// No value (`void` return)
    Void,
    /// `bool`
    Bool(bool),
    /// Signed integer of any width
    Int(i64),
    /// Unsigned integer of any width
    UInt(u64),
    /// Floating point of any width
    Float(f64),
    /// Single `char`
    Char(u8),
    /// Immutable string (`const char*` or `std::string` by value)
    Str(String),
    /// Raw pointer or reference
    Ptr(Address),
    /// Freshly constructed object returned by value; the receiver owns it
    Object(Address),
    /// Reference-counted smart pointer handle
    Smart {
        /// Handle identifying this copy of the smart pointer
        handle: u64,
        /// Address of the managed object
        pointee: Address,
    },
}

impl NativeValue {
    /// Get as a signed integer (accepts every integral variant)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            NativeValue::Int(i) => Some(i),
            NativeValue::UInt(u) => i64::try_from(u).ok(),
            NativeValue::Bool(b) => Some(b as i64),
            NativeValue::Char(c) => Some(c as i8 as i64),
            _ => None,
        }
    }

    /// Get as an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            NativeValue::UInt(u) => Some(u),
            NativeValue::Int(i) => u64::try_from(i).ok(),
            NativeValue::Bool(b) => Some(b as u64),
            NativeValue::Char(c) => Some(c as u64),
            NativeValue::Ptr(a) => Some(a),
            _ => None,
        }
    }

    /// Get as a float (integers widen)
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            NativeValue::Float(f) => Some(f),
            NativeValue::Int(i) => Some(i as f64),
            NativeValue::UInt(u) => Some(u as f64),
            _ => None,
        }
    }

    /// Get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            NativeValue::Bool(b) => Some(b),
            NativeValue::Int(i) => Some(i != 0),
            NativeValue::UInt(u) => Some(u != 0),
            _ => None,
        }
    }

    /// Get as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Address carried by pointer-like variants
    pub fn as_address(&self) -> Option<Address> {
        match *self {
            NativeValue::Ptr(a) | NativeValue::Object(a) => Some(a),
            NativeValue::Smart { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    /// Variant name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Void => "void",
            NativeValue::Bool(_) => "bool",
            NativeValue::Int(_) => "int",
            NativeValue::UInt(_) => "unsigned",
            NativeValue::Float(_) => "float",
            NativeValue::Char(_) => "char",
            NativeValue::Str(_) => "string",
            NativeValue::Ptr(_) => "pointer",
            NativeValue::Object(_) => "object",
            NativeValue::Smart { .. } => "smart pointer",
        }
    }
}

// ============================================================================
// Byte encoding
// ============================================================================

fn mismatch(expected: &str, value: &NativeValue) -> NativeError {
    NativeError::TypeMismatch {
        expected: expected.to_string(),
        got: value.type_name().to_string(),
    }
}

/// Encode a builtin value in native (little-endian) layout.
pub fn encode_builtin(kind: Builtin, value: &NativeValue) -> NativeResult<Vec<u8>> {
    match kind {
        Builtin::Void => Ok(Vec::new()),
        Builtin::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch("bool", value))?;
            Ok(vec![b as u8])
        }
        Builtin::Char { .. } => match *value {
            NativeValue::Char(c) => Ok(vec![c]),
            _ => {
                let i = value.as_i64().ok_or_else(|| mismatch("char", value))?;
                Ok(vec![i as u8])
            }
        },
        Builtin::WChar | Builtin::Int { .. } => {
            let raw = match *value {
                NativeValue::UInt(u) => u,
                _ => value.as_i64().ok_or_else(|| mismatch("integer", value))? as u64,
            };
            Ok(raw.to_le_bytes()[..kind.size()].to_vec())
        }
        Builtin::Float { bits } => {
            let f = value.as_f64().ok_or_else(|| mismatch("floating point", value))?;
            Ok(match bits {
                32 => (f as f32).to_le_bytes().to_vec(),
                64 => f.to_le_bytes().to_vec(),
                _ => {
                    let mut bytes = f.to_le_bytes().to_vec();
                    bytes.resize(kind.size(), 0);
                    bytes
                }
            })
        }
    }
}

/// Decode a builtin value from its native layout.
pub fn decode_builtin(kind: Builtin, bytes: &[u8]) -> NativeResult<NativeValue> {
    if bytes.len() < kind.size() {
        return Err(NativeError::Memory(format!(
            "need {} bytes, have {}",
            kind.size(),
            bytes.len()
        )));
    }
    let value = match kind {
        Builtin::Void => NativeValue::Void,
        Builtin::Bool => NativeValue::Bool(bytes[0] != 0),
        Builtin::Char { .. } => NativeValue::Char(bytes[0]),
        Builtin::WChar => NativeValue::UInt(u32::from_le_bytes(le_array(bytes)) as u64),
        Builtin::Int { bits, signed } => {
            let mut raw = [0u8; 8];
            raw[..kind.size()].copy_from_slice(&bytes[..kind.size()]);
            let unsigned = u64::from_le_bytes(raw);
            if signed {
                let shift = 64 - bits as u32;
                NativeValue::Int(((unsigned << shift) as i64) >> shift)
            } else {
                NativeValue::UInt(unsigned)
            }
        }
        Builtin::Float { bits: 32 } => NativeValue::Float(f32::from_le_bytes(le_array(bytes)) as f64),
        Builtin::Float { .. } => NativeValue::Float(f64::from_le_bytes(le_array(bytes))),
    };
    Ok(value)
}

/// Encode a pointer value.
pub fn encode_pointer(address: Address) -> [u8; POINTER_SIZE] {
    address.to_le_bytes()
}

/// Decode a pointer value.
pub fn decode_pointer(bytes: &[u8]) -> NativeResult<Address> {
    if bytes.len() < POINTER_SIZE {
        return Err(NativeError::Memory("truncated pointer".to_string()));
    }
    Ok(u64::from_le_bytes(le_array(bytes)))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_short_roundtrip() {
        let kind = Builtin::from_name("short").unwrap();
        let bytes = encode_builtin(kind, &NativeValue::Int(-2)).unwrap();
        assert_eq!(bytes, vec![0xfe, 0xff]);
        assert_eq!(decode_builtin(kind, &bytes).unwrap(), NativeValue::Int(-2));
    }

    #[test]
    fn test_unsigned_and_float_layouts() {
        let kind = Builtin::from_name("unsigned int").unwrap();
        let bytes = encode_builtin(kind, &NativeValue::UInt(0xdead_beef)).unwrap();
        assert_eq!(decode_builtin(kind, &bytes).unwrap(), NativeValue::UInt(0xdead_beef));

        let kind = Builtin::from_name("long double").unwrap();
        let bytes = encode_builtin(kind, &NativeValue::Float(1.5)).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_builtin(kind, &bytes).unwrap(), NativeValue::Float(1.5));
    }

    #[test]
    fn test_encode_rejects_strings() {
        let kind = Builtin::from_name("int").unwrap();
        assert!(encode_builtin(kind, &NativeValue::Str("1".into())).is_err());
    }

    #[test]
    fn test_decode_short_buffer() {
        let kind = Builtin::from_name("double").unwrap();
        assert!(matches!(
            decode_builtin(kind, &[0, 1]),
            Err(NativeError::Memory(_))
        ));
    }
}
