//! Proxy Object Model
//!
//! Host-visible stand-ins for native entities:
//!
//! - [`InstanceProxy`]: a native object (address + runtime class) with an
//!   ownership flag and an idempotent destroy
//! - [`ScopeProxy`](scope::ScopeProxy): a namespace or class
//! - [`OverloadProxy`](callable::OverloadProxy) and
//!   [`BoundMethod`](callable::BoundMethod): callables
//! - [`TemplateProxy`](template::TemplateProxy): a class template
//! - [`LowLevelView`](view::LowLevelView) and
//!   [`SmartPointer`](view::SmartPointer): typed memory and shared handles
//!
//! Attribute access and calls are dispatched by the [`Bridge`](crate::Bridge).

pub mod callable;
pub mod host;
pub mod identity;
pub mod scope;
pub mod template;
pub mod view;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bindery_sdk::{Address, NativeRuntime};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;

pub use callable::{BoundMethod, HostFn, HostMethod, MethodRef, OverloadProxy};
pub use host::{DispatchTable, HostClass};
pub use identity::IdentityMap;
pub use scope::{EnumProxy, ScopeProxy};
pub use template::TemplateProxy;
pub use view::{LowLevelView, SmartPointer};

/// Proxy for one native object.
///
/// Ownership states: owning (destroys the object when dropped or
/// destroyed), borrowed (never destroys), destroyed (every further access
/// fails with an ownership error).
pub struct InstanceProxy {
    address: Address,
    class: Arc<ScopeProxy>,
    owns: AtomicBool,
    destroyed: AtomicBool,
    smart: Option<Arc<SmartPointer>>,
    host: Option<Arc<HostClass>>,
    runtime: Arc<dyn NativeRuntime>,
    identity: Weak<IdentityMap>,
    dispatch: Weak<DispatchTable>,
    attrs: Mutex<FxHashMap<String, Value>>,
}

impl InstanceProxy {
    pub(crate) fn new(
        address: Address,
        class: Arc<ScopeProxy>,
        owns: bool,
        runtime: Arc<dyn NativeRuntime>,
        identity: Weak<IdentityMap>,
    ) -> Self {
        Self {
            address,
            class,
            owns: AtomicBool::new(owns),
            destroyed: AtomicBool::new(false),
            smart: None,
            host: None,
            runtime,
            identity,
            dispatch: Weak::new(),
            attrs: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn with_smart(mut self, smart: Arc<SmartPointer>) -> Self {
        self.smart = Some(smart);
        self
    }

    pub(crate) fn with_host(mut self, host: Arc<HostClass>, dispatch: Weak<DispatchTable>) -> Self {
        self.host = Some(host);
        self.dispatch = dispatch;
        self
    }

    /// Runtime class of the object
    pub fn class(&self) -> &Arc<ScopeProxy> {
        &self.class
    }

    /// Address of the object, even after it was destroyed
    pub fn raw_address(&self) -> Address {
        self.address
    }

    /// Address of the object; fails once the object is destroyed
    pub fn address(&self) -> BridgeResult<Address> {
        if self.is_destroyed() {
            return Err(BridgeError::Ownership(format!(
                "use of destroyed {} object at {:#x}",
                self.class.qualified_name(),
                self.address
            )));
        }
        Ok(self.address)
    }

    /// Check if the proxy destroys the object
    pub fn owns(&self) -> bool {
        self.owns.load(Ordering::SeqCst)
    }

    /// Transfer ownership to (`true`) or away from (`false`) the proxy
    pub fn set_owns(&self, owns: bool) {
        self.owns.store(owns, Ordering::SeqCst);
    }

    /// Check if the object was destroyed through this proxy
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Smart pointer keeping the object alive, if any
    pub fn smart(&self) -> Option<&Arc<SmartPointer>> {
        self.smart.as_ref()
    }

    /// Host class of a host subclass instance
    pub fn host_class(&self) -> Option<&Arc<HostClass>> {
        self.host.as_ref()
    }

    /// Host attribute stored on this proxy
    pub fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.lock().get(name).cloned()
    }

    /// Store a host attribute on this proxy
    pub fn set_attr(&self, name: &str, value: Value) {
        let old = self.attrs.lock().insert(name.to_string(), value);
        drop(old);
    }

    /// Destroy the native object now.
    ///
    /// A second destroy is a no-op. Destroying a borrowed object is an
    /// ownership error.
    pub fn destroy(&self) -> BridgeResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        if !self.owns() {
            return Err(BridgeError::Ownership(format!(
                "cannot destroy borrowed {} object at {:#x}",
                self.class.qualified_name(),
                self.address
            )));
        }
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(target: "bindery::proxy", class = %self.class.qualified_name(), address = self.address, "destroying object");
        self.unregister();
        self.runtime.destruct(self.class.id(), self.address)?;
        Ok(())
    }

    fn unregister(&self) {
        let me = self as *const InstanceProxy;
        if let Some(identity) = self.identity.upgrade() {
            identity.remove(self.address, self.class.id(), me);
        }
        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.remove(self.address, me);
        }
    }
}

impl Drop for InstanceProxy {
    fn drop(&mut self) {
        if self.is_destroyed() {
            return;
        }
        self.unregister();
        if self.owns() {
            tracing::trace!(target: "bindery::proxy", class = %self.class.qualified_name(), address = self.address, "releasing owned object");
            if let Err(e) = self.runtime.destruct(self.class.id(), self.address) {
                tracing::warn!(target: "bindery::proxy", address = self.address, error = %e, "destructor failed during release");
            }
        }
    }
}
