//! Typed memory views and shared pointer handles

use std::sync::Arc;

use bindery_sdk::{Address, NativeRuntime, TypeSpec};
use parking_lot::Mutex;

use super::scope::ScopeProxy;
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;

// ============================================================================
// Low-level views
// ============================================================================

/// Typed view of native memory (a pointer or array result).
///
/// The length is unknown for plain pointers until [`reshape`](Self::reshape)
/// sets it; indexing is bounds checked whenever it is known. A null view
/// has no valid index.
pub struct LowLevelView {
    runtime: Arc<dyn NativeRuntime>,
    address: Address,
    element: TypeSpec,
    len: Mutex<Option<usize>>,
    is_const: bool,
    owner: Mutex<Option<Value>>,
}

impl LowLevelView {
    /// View `len` elements of type `element` at `address`
    pub fn new(
        runtime: Arc<dyn NativeRuntime>,
        address: Address,
        element: TypeSpec,
        len: Option<usize>,
    ) -> Self {
        let is_const = element.is_const && element.pointers == 0;
        Self {
            runtime,
            address,
            element,
            len: Mutex::new(len),
            is_const,
            owner: Mutex::new(None),
        }
    }

    /// Keep `owner` (the object the memory belongs to) alive with the view
    pub fn keep_alive(&self, owner: Value) {
        let old = self.owner.lock().replace(owner);
        drop(old);
    }

    /// Start address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Element type
    pub fn element_type(&self) -> &TypeSpec {
        &self.element
    }

    /// Known length
    pub fn len(&self) -> Option<usize> {
        *self.len.lock()
    }

    /// Check if the view is null or known to be empty
    pub fn is_empty(&self) -> bool {
        self.address == 0 || self.len() == Some(0)
    }

    /// Check if writes are rejected
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    /// Set the length
    pub fn reshape(&self, len: usize) {
        *self.len.lock() = Some(len);
    }

    fn slot(&self, bridge: &Bridge, index: i64) -> BridgeResult<(Address, Arc<dyn crate::convert::Converter>)> {
        let len = self.len();
        let bounds = || BridgeError::Bounds {
            what: format!("{}* view", self.element),
            index,
            len: len.unwrap_or(0),
        };
        if self.address == 0 {
            return Err(bounds());
        }
        let index = match (index, len) {
            (i, Some(n)) if i < 0 && i.unsigned_abs() <= n as u64 => n - i.unsigned_abs() as usize,
            (i, _) if i < 0 => return Err(bounds()),
            (i, Some(n)) if i as usize >= n => return Err(bounds()),
            (i, _) => i as usize,
        };
        let mut element = self.element.clone();
        element.is_const = false;
        let conv = bridge.converter(&element.to_string())?;
        let stride = conv.size().max(1) as u64;
        Ok((self.address + index as u64 * stride, conv))
    }

    /// Read element `index`
    pub fn get(&self, bridge: &Bridge, index: i64) -> BridgeResult<Value> {
        let (address, conv) = self.slot(bridge, index)?;
        conv.from_memory(bridge, address)
    }

    /// Write element `index`
    pub fn set(&self, bridge: &Bridge, index: i64, value: &Value) -> BridgeResult<()> {
        if self.is_const {
            return Err(BridgeError::ConstViolation {
                scope: format!("{}* view", self.element),
                member: format!("[{}]", index),
            });
        }
        let (address, conv) = self.slot(bridge, index)?;
        conv.to_memory(bridge, value, address)
    }

    /// Copy out every element; requires a known length
    pub fn to_list(&self, bridge: &Bridge) -> BridgeResult<Vec<Value>> {
        let len = self.len().ok_or_else(|| {
            BridgeError::conversion(format!("{}* view has no known length", self.element))
        })?;
        (0..len as i64).map(|i| self.get(bridge, i)).collect()
    }

    /// Release the storage of an array allocated by `ll::array_new`
    pub(crate) fn free(&self) -> BridgeResult<()> {
        Ok(self.runtime.free(self.address)?)
    }
}

// ============================================================================
// Shared pointers
// ============================================================================

/// One host-held copy of a native shared pointer.
///
/// The handle is released when the last proxy exposing it is dropped.
pub struct SmartPointer {
    runtime: Arc<dyn NativeRuntime>,
    handle: u64,
    class: Arc<ScopeProxy>,
    pointee: Address,
}

impl SmartPointer {
    pub(crate) fn new(
        runtime: Arc<dyn NativeRuntime>,
        handle: u64,
        class: Arc<ScopeProxy>,
        pointee: Address,
    ) -> Self {
        Self {
            runtime,
            handle,
            class,
            pointee,
        }
    }

    /// Native handle
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Class of the managed object
    pub fn class(&self) -> &Arc<ScopeProxy> {
        &self.class
    }

    /// Address of the managed object
    pub fn pointee(&self) -> Address {
        self.pointee
    }

    /// Number of handles sharing ownership
    pub fn use_count(&self) -> BridgeResult<usize> {
        Ok(self.runtime.smart_use_count(self.handle)?)
    }
}

impl Drop for SmartPointer {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.smart_release(self.handle) {
            tracing::warn!(target: "bindery::proxy", handle = self.handle, error = %e, "releasing shared pointer failed");
        }
    }
}
