//! Namespace, class and enum proxies

use std::sync::Arc;

use bindery_sdk::{EnumDecl, ScopeId, ScopeInfo};
use dashmap::{DashMap, DashSet};

use crate::value::Value;

/// Proxy for a native namespace or class.
///
/// Reflected members are resolved on demand by the bridge; the proxy only
/// stores host-side state: cached member proxies, attributes added by
/// pythonizations, and names hidden by a rename.
pub struct ScopeProxy {
    info: Arc<ScopeInfo>,
    attrs: DashMap<String, Value>,
    hidden: DashSet<String>,
}

impl ScopeProxy {
    pub(crate) fn new(info: Arc<ScopeInfo>) -> Self {
        Self {
            info,
            attrs: DashMap::new(),
            hidden: DashSet::new(),
        }
    }

    /// Scope identity
    pub fn id(&self) -> ScopeId {
        self.info.id
    }

    /// Unqualified name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Fully qualified name ("" for the global namespace)
    pub fn qualified_name(&self) -> &str {
        &self.info.qualified_name
    }

    /// Reflection information
    pub fn info(&self) -> &ScopeInfo {
        &self.info
    }

    /// Check if this is a class
    pub fn is_class(&self) -> bool {
        self.info.is_class()
    }

    /// Check if the class has unimplemented pure virtuals
    pub fn is_abstract(&self) -> bool {
        self.info.is_abstract
    }

    /// Host-side attribute (pythonization or cached member)
    pub fn attr(&self, name: &str) -> Option<Value> {
        if self.hidden.contains(name) {
            return None;
        }
        self.attrs.get(name).map(|v| v.value().clone())
    }

    /// Check if a host-side attribute exists
    pub fn has_attr(&self, name: &str) -> bool {
        !self.hidden.contains(name) && self.attrs.contains_key(name)
    }

    /// Set a host-side attribute; un-hides a renamed name
    pub fn set_attr(&self, name: &str, value: Value) {
        self.hidden.remove(name);
        let old = self.attrs.insert(name.to_string(), value);
        drop(old);
    }

    /// Remove a host-side attribute
    pub fn remove_attr(&self, name: &str) -> Option<Value> {
        self.attrs.remove(name).map(|(_, v)| v)
    }

    /// Hide a reflected name (the target of a rename)
    pub fn hide(&self, name: &str) {
        self.attrs.remove(name);
        self.hidden.insert(name.to_string());
    }

    /// Check if a name was hidden by a rename
    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.contains(name)
    }

    /// Names of host-side attributes
    pub fn attr_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attrs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Proxy for a native enum type
pub struct EnumProxy {
    decl: EnumDecl,
}

impl EnumProxy {
    pub(crate) fn new(decl: EnumDecl) -> Self {
        Self { decl }
    }

    /// Unqualified name
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Fully qualified name
    pub fn qualified_name(&self) -> &str {
        &self.decl.qualified_name
    }

    /// Underlying integer type
    pub fn underlying(&self) -> &str {
        &self.decl.underlying
    }

    /// Value of an enumerator
    pub fn value(&self, name: &str) -> Option<i64> {
        self.decl
            .values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Enumerators in declaration order
    pub fn values(&self) -> &[(String, i64)] {
        &self.decl.values
    }

    /// Declaration
    pub fn decl(&self) -> &EnumDecl {
        &self.decl
    }
}
