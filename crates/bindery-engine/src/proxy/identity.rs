//! Identity map: (address, class) → live instance proxy
//!
//! Entries are weak so the map never keeps a proxy alive. A proxy removes
//! its own entry when it is dropped; an entry is only removed by the proxy
//! it points to, so a newer proxy for a recycled address is never evicted
//! by a stale one.

use std::sync::{Arc, Weak};

use bindery_sdk::{Address, ScopeId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::InstanceProxy;

/// Process-wide map from native object to its host proxy
pub struct IdentityMap {
    enabled: bool,
    entries: Mutex<FxHashMap<(Address, ScopeId), Weak<InstanceProxy>>>,
}

impl IdentityMap {
    /// Create an empty map; a disabled map never returns a proxy
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Check if proxies are reused
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Live proxy for the object, if any
    pub fn get(&self, address: Address, class: ScopeId) -> Option<Arc<InstanceProxy>> {
        if !self.enabled {
            return None;
        }
        // upgrade under the lock, drop outside it
        let found = self.entries.lock().get(&(address, class)).and_then(Weak::upgrade);
        found
    }

    /// Record `proxy` as the identity of its object
    pub fn insert(&self, proxy: &Arc<InstanceProxy>) {
        if !self.enabled {
            return;
        }
        let key = (proxy.raw_address(), proxy.class().id());
        self.entries.lock().insert(key, Arc::downgrade(proxy));
    }

    /// Forget the entry for the object if it still belongs to `owner`
    pub(crate) fn remove(&self, address: Address, class: ScopeId, owner: *const InstanceProxy) {
        let mut entries = self.entries.lock();
        let stale = entries
            .get(&(address, class))
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), owner));
        if stale {
            entries.remove(&(address, class));
        }
    }

    /// Number of tracked objects (including entries whose proxy is dying)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
