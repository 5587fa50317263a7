//! Callable proxies: overload sets, bound methods, host functions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bindery_sdk::{normalize_name, ScopeId, TypeSpec};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::reflect::{Gateway, OverloadSet};
use crate::value::Value;

/// Host function: `(bridge, receiver, args)`; the receiver is `None` for
/// free functions
pub type HostFn = Arc<dyn Fn(&Bridge, &Value, &[Value]) -> BridgeResult<Value> + Send + Sync>;

// ============================================================================
// Native overload sets
// ============================================================================

/// Unbound proxy for a native overload set.
///
/// The set is fetched from the gateway at call time so overloads declared
/// after the proxy was created are still seen. Instantiated templates and
/// explicitly selected overloads carry a fixed set instead.
pub struct OverloadProxy {
    scope: ScopeId,
    scope_name: String,
    name: String,
    fixed: Option<Arc<OverloadSet>>,
    gateway: Arc<Gateway>,
    release_gil: AtomicBool,
    creates: AtomicBool,
}

impl OverloadProxy {
    pub(crate) fn new(scope: ScopeId, scope_name: &str, name: &str, gateway: Arc<Gateway>) -> Self {
        Self {
            scope,
            scope_name: scope_name.to_string(),
            name: name.to_string(),
            fixed: None,
            gateway,
            release_gil: AtomicBool::new(false),
            creates: AtomicBool::new(false),
        }
    }

    pub(crate) fn fixed(set: Arc<OverloadSet>, gateway: Arc<Gateway>) -> Self {
        Self {
            scope: set.scope,
            scope_name: set.scope_name.clone(),
            name: set.name.clone(),
            fixed: Some(set),
            gateway,
            release_gil: AtomicBool::new(false),
            creates: AtomicBool::new(false),
        }
    }

    /// Declaring scope
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Qualified name of the declaring scope
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Scope::name`
    pub fn qualified_name(&self) -> String {
        if self.scope_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope_name, self.name)
        }
    }

    /// Current overload set
    pub fn overloads(&self) -> BridgeResult<Arc<OverloadSet>> {
        match &self.fixed {
            Some(set) => Ok(set.clone()),
            None => self.gateway.overloads(self.scope, &self.name),
        }
    }

    /// Prototypes of every overload
    pub fn signatures(&self) -> BridgeResult<Vec<String>> {
        Ok(self
            .overloads()?
            .signatures
            .iter()
            .map(|s| s.prototype())
            .collect())
    }

    /// Doc string: one prototype per line
    pub fn doc(&self) -> BridgeResult<String> {
        Ok(self.signatures()?.join("\n"))
    }

    /// Run calls with the exclusive-access token released
    pub fn set_release_gil(&self, release: bool) {
        self.release_gil.store(release, Ordering::SeqCst);
    }

    /// Check if calls release the exclusive-access token
    pub fn release_gil(&self) -> bool {
        self.release_gil.load(Ordering::SeqCst)
    }

    /// Mark returned pointers as owned by the caller
    pub fn set_creates(&self, creates: bool) {
        self.creates.store(creates, Ordering::SeqCst);
    }

    /// Check if returned pointers are owned by the caller
    pub fn creates(&self) -> bool {
        self.creates.load(Ordering::SeqCst)
    }

    /// Proxy restricted to the overload whose parameter list matches
    /// `params` (`"int, double"`)
    pub fn select(&self, params: &str) -> BridgeResult<Arc<OverloadProxy>> {
        let wanted: Vec<String> = split_params(params);
        let set = self.overloads()?;
        let chosen = set
            .signatures
            .iter()
            .find(|sig| {
                sig.params.len() == wanted.len()
                    && sig
                        .params
                        .iter()
                        .zip(&wanted)
                        .all(|(p, w)| canonical(&p.ty) == *w)
            })
            .cloned()
            .ok_or_else(|| BridgeError::NoMatch {
                name: self.qualified_name(),
                args: params.to_string(),
                candidates: set.signatures.iter().map(|s| s.prototype()).collect(),
            })?;
        let proxy = OverloadProxy::fixed(
            Arc::new(set.with_signatures(vec![chosen])),
            self.gateway.clone(),
        );
        proxy.set_release_gil(self.release_gil());
        proxy.set_creates(self.creates());
        Ok(Arc::new(proxy))
    }
}

fn canonical(ty: &str) -> String {
    TypeSpec::parse(ty)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| normalize_name(ty))
}

fn split_params(params: &str) -> Vec<String> {
    bindery_sdk::split_template_args(params)
        .iter()
        .filter(|p| !p.is_empty() && p.as_str() != "void")
        .map(|p| canonical(p))
        .collect()
}

// ============================================================================
// Host functions
// ============================================================================

/// Named host function (pythonization or host class method)
pub struct HostMethod {
    name: String,
    func: HostFn,
}

impl HostMethod {
    /// Wrap a host function
    pub fn new(name: &str, func: HostFn) -> Self {
        Self {
            name: name.to_string(),
            func,
        }
    }

    /// Wrap a closure
    pub fn from_fn<F>(name: &str, func: F) -> Self
    where
        F: Fn(&Bridge, &Value, &[Value]) -> BridgeResult<Value> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(func))
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call with an explicit receiver
    pub fn call(&self, bridge: &Bridge, receiver: &Value, args: &[Value]) -> BridgeResult<Value> {
        (self.func)(bridge, receiver, args)
    }
}

// ============================================================================
// Bound methods
// ============================================================================

/// Method part of a bound method
#[derive(Clone)]
pub enum MethodRef {
    /// Native overload set
    Native(Arc<OverloadProxy>),
    /// Host function
    Host(Arc<HostMethod>),
}

impl MethodRef {
    /// Method name
    pub fn name(&self) -> String {
        match self {
            MethodRef::Native(p) => p.name().to_string(),
            MethodRef::Host(h) => h.name().to_string(),
        }
    }
}

/// A method together with the instance it was accessed on.
///
/// The receiver is passed at call time, so the same method can be rebound
/// to another instance.
pub struct BoundMethod {
    method: MethodRef,
    receiver: Value,
}

impl BoundMethod {
    /// Bind `method` to `receiver`
    pub fn new(method: MethodRef, receiver: Value) -> Self {
        Self { method, receiver }
    }

    /// The method
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// The receiver
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Same method bound to another instance
    pub fn rebind(&self, receiver: Value) -> BoundMethod {
        BoundMethod::new(self.method.clone(), receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_params_canonicalizes() {
        assert_eq!(
            split_params("const  std::string &, int"),
            vec!["const std::string&".to_string(), "int".to_string()]
        );
        assert!(split_params("void").is_empty());
        assert!(split_params("").is_empty());
    }
}
