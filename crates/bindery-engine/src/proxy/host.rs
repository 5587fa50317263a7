//! Host subclasses of native classes
//!
//! A [`HostClass`] derives from a native class and overrides some of its
//! virtual methods with host functions. Instances are native objects of the
//! base class whose address is entered in the [`DispatchTable`]; the reverse
//! shim consults that table when native code makes a virtual call.

use std::sync::{Arc, Weak};

use bindery_sdk::Address;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::callable::{HostFn, HostMethod};
use super::scope::ScopeProxy;
use super::InstanceProxy;
use crate::bridge::Bridge;
use crate::error::BridgeResult;
use crate::value::Value;

/// A host class deriving from a native class
pub struct HostClass {
    name: String,
    base: Arc<ScopeProxy>,
    methods: FxHashMap<String, Arc<HostMethod>>,
}

impl HostClass {
    /// Start a host class deriving from `base`
    pub fn new(name: &str, base: Arc<ScopeProxy>) -> Self {
        Self {
            name: name.to_string(),
            base,
            methods: FxHashMap::default(),
        }
    }

    /// Add (or override) a method
    pub fn method<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&Bridge, &Value, &[Value]) -> BridgeResult<Value> + Send + Sync + 'static,
    {
        let func: HostFn = Arc::new(func);
        self.methods
            .insert(name.to_string(), Arc::new(HostMethod::new(name, func)));
        self
    }

    /// Host class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native base class
    pub fn base(&self) -> &Arc<ScopeProxy> {
        &self.base
    }

    /// Host override of `name`
    pub fn lookup(&self, name: &str) -> Option<&Arc<HostMethod>> {
        self.methods.get(name)
    }

    /// Pure virtual methods of the base left without a host override
    pub fn missing_overrides(&self) -> Vec<String> {
        self.base
            .info()
            .virtuals
            .iter()
            .filter(|v| v.is_pure && !self.methods.contains_key(&v.name))
            .map(|v| v.name.clone())
            .collect()
    }
}

/// Native address → host class and proxy of every live host instance
#[derive(Default)]
pub struct DispatchTable {
    entries: Mutex<FxHashMap<Address, (Arc<HostClass>, Weak<InstanceProxy>)>>,
}

impl DispatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Route virtual calls on the proxy's object to `class`
    pub fn register(&self, class: Arc<HostClass>, proxy: &Arc<InstanceProxy>) {
        self.entries
            .lock()
            .insert(proxy.raw_address(), (class, Arc::downgrade(proxy)));
    }

    /// Host class and live proxy for the object at `address`
    pub fn get(&self, address: Address) -> Option<(Arc<HostClass>, Arc<InstanceProxy>)> {
        let entry = self.entries.lock().get(&address).cloned();
        let (class, proxy) = entry?;
        Some((class, proxy.upgrade()?))
    }

    /// Check if the object at `address` has a live host override of
    /// `method`, without taking a reference on its proxy
    pub fn overrides(&self, address: Address, method: &str) -> bool {
        self.entries
            .lock()
            .get(&address)
            .is_some_and(|(class, proxy)| proxy.strong_count() > 0 && class.lookup(method).is_some())
    }

    pub(crate) fn remove(&self, address: Address, owner: *const InstanceProxy) {
        let mut entries = self.entries.lock();
        let stale = entries
            .get(&address)
            .is_some_and(|(_, w)| std::ptr::eq(w.as_ptr(), owner));
        if stale {
            entries.remove(&address);
        }
    }

    /// Number of registered host instances
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no host instance is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
