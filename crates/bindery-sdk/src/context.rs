//! NativeCallContext trait: what native code sees while it runs
//!
//! Native function bodies executed by a backend receive a context through
//! which they touch memory, create and destroy objects, and make virtual
//! calls (which may land in host overrides).

use crate::error::{NativeError, NativeResult, NativeThrow};
use crate::types::{Address, Builtin};
use crate::value::{decode_builtin, decode_pointer, encode_builtin, encode_pointer, NativeValue};

/// Operations available to native code during a call.
pub trait NativeCallContext {
    // ========================================================================
    // Memory
    // ========================================================================

    /// Read raw bytes
    fn read(&self, address: Address, len: usize) -> NativeResult<Vec<u8>>;

    /// Write raw bytes
    fn write(&self, address: Address, bytes: &[u8]) -> NativeResult<()>;

    /// Allocate raw storage
    fn allocate(&self, size: usize) -> NativeResult<Address>;

    /// Release raw storage
    fn free(&self, address: Address) -> NativeResult<()>;

    // ========================================================================
    // Objects
    // ========================================================================

    /// Construct an object of the named class with the first constructor
    /// taking `args.len()` arguments
    fn construct(&self, class: &str, args: &[NativeValue]) -> Result<Address, NativeThrow>;

    /// Destroy an object of the named class
    fn destruct(&self, class: &str, address: Address) -> Result<(), NativeThrow>;

    /// Call a virtual method; host overrides take precedence
    fn call_virtual(
        &self,
        this: Address,
        method: &str,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow>;

    /// Call a free function by qualified name (first overload with a
    /// matching argument count)
    fn call_function(&self, qualified_name: &str, args: &[NativeValue])
        -> Result<NativeValue, NativeThrow>;

    /// Wrap an object of the named class in a new shared pointer
    fn make_shared(&self, class: &str, address: Address) -> NativeResult<NativeValue>;

    /// Copy a shared pointer handle
    fn smart_copy(&self, handle: u64) -> NativeResult<u64>;

    /// Release a shared pointer handle
    fn smart_release(&self, handle: u64) -> NativeResult<()>;

    /// Number of handles sharing ownership with `handle`
    fn smart_use_count(&self, handle: u64) -> NativeResult<usize>;

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// Read a builtin value
    fn read_builtin(&self, address: Address, kind: Builtin) -> NativeResult<NativeValue> {
        decode_builtin(kind, &self.read(address, kind.size())?)
    }

    /// Write a builtin value
    fn write_builtin(&self, address: Address, kind: Builtin, value: &NativeValue) -> NativeResult<()> {
        self.write(address, &encode_builtin(kind, value)?)
    }

    /// Read an `int`
    fn read_i32(&self, address: Address) -> NativeResult<i32> {
        let bytes = self.read(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write an `int`
    fn write_i32(&self, address: Address, value: i32) -> NativeResult<()> {
        self.write(address, &value.to_le_bytes())
    }

    /// Read a `long`
    fn read_i64(&self, address: Address) -> NativeResult<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.read(address, 8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Write a `long`
    fn write_i64(&self, address: Address, value: i64) -> NativeResult<()> {
        self.write(address, &value.to_le_bytes())
    }

    /// Read a `double`
    fn read_f64(&self, address: Address) -> NativeResult<f64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.read(address, 8)?);
        Ok(f64::from_le_bytes(raw))
    }

    /// Write a `double`
    fn write_f64(&self, address: Address, value: f64) -> NativeResult<()> {
        self.write(address, &value.to_le_bytes())
    }

    /// Read a pointer
    fn read_ptr(&self, address: Address) -> NativeResult<Address> {
        decode_pointer(&self.read(address, 8)?)
    }

    /// Write a pointer
    fn write_ptr(&self, address: Address, value: Address) -> NativeResult<()> {
        self.write(address, &encode_pointer(value))
    }

    /// Read a NUL-terminated string
    fn read_cstr(&self, address: Address) -> NativeResult<String> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        loop {
            let b = self.read(cursor, 1)?[0];
            if b == 0 {
                break;
            }
            bytes.push(b);
            cursor += 1;
        }
        String::from_utf8(bytes).map_err(|e| NativeError::TypeMismatch {
            expected: "utf-8 string".to_string(),
            got: e.to_string(),
        })
    }

    /// Allocate a NUL-terminated copy of `s`
    fn alloc_cstr(&self, s: &str) -> NativeResult<Address> {
        let address = self.allocate(s.len() + 1)?;
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.write(address, &bytes)?;
        Ok(address)
    }
}
