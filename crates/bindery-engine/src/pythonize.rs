//! Pythonization hooks
//!
//! User transforms applied to proxies as they are created:
//!
//! - callbacks run once per new class or namespace proxy whose qualified
//!   name matches their scope filter
//! - compose rules post-process the results of matching methods
//! - ownership-transfer rules mark pointer results of matching methods as
//!   owned by the caller
//! - size-argument rules give returned pointer views the length passed in
//!   one of the call's arguments
//! - renames expose a member under a new name and hide the old one
//!
//! Class and method patterns are regular expressions matched as written
//! (unanchored unless the pattern anchors itself).
//!
//! The builtin pythonizations add container protocols (`extend`,
//! `__len__`, `__getitem__`, `__setitem__`, `__str__`) to classes exposing
//! the matching native members.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::bridge::Bridge;
use crate::config::ConfigError;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::{HostMethod, ScopeProxy};
use crate::value::Value;

/// Callback run on every new matching scope proxy
pub type PythonizationFn = Arc<dyn Fn(&Bridge, &Arc<ScopeProxy>) -> BridgeResult<()> + Send + Sync>;

/// Post-processor applied to a method's converted result
pub type PostProcessor = Arc<dyn Fn(&Bridge, Value) -> BridgeResult<Value> + Send + Sync>;

/// Handle identifying a registered pythonization callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PythonizationHandle(u64);

struct Callback {
    handle: PythonizationHandle,
    scope_filter: String,
    func: PythonizationFn,
}

impl Callback {
    fn applies_to(&self, qualified_name: &str) -> bool {
        self.scope_filter.is_empty()
            || qualified_name == self.scope_filter
            || qualified_name
                .strip_prefix(self.scope_filter.as_str())
                .is_some_and(|rest| rest.starts_with("::"))
    }
}

struct MethodPattern {
    class: Regex,
    method: Regex,
}

impl MethodPattern {
    fn new(class: &str, method: &str) -> BridgeResult<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| {
                BridgeError::Config(ConfigError::ValidationError(format!(
                    "invalid pattern '{}': {}",
                    p, e
                )))
            })
        };
        Ok(Self {
            class: compile(class)?,
            method: compile(method)?,
        })
    }

    fn matches(&self, class: &str, method: &str) -> bool {
        self.class.is_match(class) && self.method.is_match(method)
    }
}

/// Registry of pythonizations
#[derive(Default)]
pub struct Pythonizations {
    next_handle: AtomicU64,
    callbacks: RwLock<Vec<Callback>>,
    compose: RwLock<Vec<(MethodPattern, PostProcessor)>>,
    transfers: RwLock<Vec<MethodPattern>>,
    size_args: RwLock<Vec<(MethodPattern, usize)>>,
    renames: RwLock<FxHashMap<String, Vec<(String, String)>>>,
}

impl Pythonizations {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Register a callback for scopes named `scope_filter` or nested in it
    /// (an empty filter matches every scope)
    pub fn add(&self, func: PythonizationFn, scope_filter: &str) -> PythonizationHandle {
        let handle = PythonizationHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.callbacks.write().push(Callback {
            handle,
            scope_filter: scope_filter.trim_start_matches("::").to_string(),
            func,
        });
        tracing::debug!(target: "bindery::proxy", filter = scope_filter, "added pythonization");
        handle
    }

    /// Remove a callback; false if it was not registered
    pub fn remove(&self, handle: PythonizationHandle) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|c| c.handle != handle);
        callbacks.len() != before
    }

    /// Callbacks applying to a scope, in registration order
    pub fn callbacks_for(&self, qualified_name: &str) -> Vec<PythonizationFn> {
        self.callbacks
            .read()
            .iter()
            .filter(|c| c.applies_to(qualified_name))
            .map(|c| c.func.clone())
            .collect()
    }

    // ========================================================================
    // Method rules
    // ========================================================================

    /// Post-process results of methods matching the patterns
    pub fn add_compose(&self, class_pattern: &str, method_pattern: &str, post: PostProcessor) -> BridgeResult<()> {
        let pattern = MethodPattern::new(class_pattern, method_pattern)?;
        self.compose.write().push((pattern, post));
        Ok(())
    }

    /// Post-processors for `class::method`, in registration order
    pub fn post_processors(&self, class: &str, method: &str) -> Vec<PostProcessor> {
        self.compose
            .read()
            .iter()
            .filter(|(p, _)| p.matches(class, method))
            .map(|(_, post)| post.clone())
            .collect()
    }

    /// Mark pointer results of matching methods as owned by the caller
    pub fn add_transfer(&self, class_pattern: &str, method_pattern: &str) -> BridgeResult<()> {
        let pattern = MethodPattern::new(class_pattern, method_pattern)?;
        self.transfers.write().push(pattern);
        Ok(())
    }

    /// Check if results of `class::method` are owned by the caller
    pub fn transfers(&self, class: &str, method: &str) -> bool {
        self.transfers.read().iter().any(|p| p.matches(class, method))
    }

    /// Take the length of pointer results of matching methods from
    /// argument `index`
    pub fn add_size_arg(&self, class_pattern: &str, method_pattern: &str, index: usize) -> BridgeResult<()> {
        let pattern = MethodPattern::new(class_pattern, method_pattern)?;
        self.size_args.write().push((pattern, index));
        Ok(())
    }

    /// Argument holding the result length of `class::method`; the most
    /// recent matching rule wins
    pub fn size_arg(&self, class: &str, method: &str) -> Option<usize> {
        self.size_args
            .read()
            .iter()
            .rev()
            .find(|(p, _)| p.matches(class, method))
            .map(|(_, index)| *index)
    }

    // ========================================================================
    // Renames
    // ========================================================================

    /// Expose `class::from` as `to`; applied to proxies created later and
    /// to the live proxy by the bridge
    pub fn add_rename(&self, class: &str, from: &str, to: &str) {
        self.renames
            .write()
            .entry(class.trim_start_matches("::").to_string())
            .or_default()
            .push((from.to_string(), to.to_string()));
    }

    /// Renames registered for a scope
    pub fn renames_for(&self, qualified_name: &str) -> Vec<(String, String)> {
        self.renames
            .read()
            .get(qualified_name)
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================================================
// Builtin pythonizations
// ============================================================================

fn host_fn<F>(name: &str, func: F) -> Value
where
    F: Fn(&Bridge, &Value, &[Value]) -> BridgeResult<Value> + Send + Sync + 'static,
{
    Value::HostFn(Arc::new(HostMethod::from_fn(name, func)))
}

fn one_arg<'a>(name: &str, args: &'a [Value], count: usize) -> BridgeResult<&'a [Value]> {
    if args.len() != count {
        return Err(BridgeError::conversion(format!(
            "{}() takes {} arguments ({} given)",
            name,
            count,
            args.len()
        )));
    }
    Ok(args)
}

/// Length of a container instance, through its `size()`
fn container_len(bridge: &Bridge, receiver: &Value) -> BridgeResult<i128> {
    bridge
        .call_method(receiver, "size", &[])?
        .as_int()
        .ok_or_else(|| BridgeError::conversion("size() did not return an integer"))
}

/// Normalise a host index against a container with a `size()`
fn checked_index(bridge: &Bridge, receiver: &Value, index: &Value, has_size: bool) -> BridgeResult<Value> {
    let Some(i) = index.as_int() else {
        return Ok(index.clone());
    };
    if !has_size {
        return Ok(index.clone());
    }
    let len = container_len(bridge, receiver)?;
    let actual = if i < 0 { i + len } else { i };
    if actual < 0 || actual >= len {
        return Err(BridgeError::Bounds {
            what: receiver.type_name(),
            index: i as i64,
            len: len as usize,
        });
    }
    Ok(Value::Int(actual))
}

/// Install container and string protocols on a new class proxy
pub(crate) fn apply_builtin(bridge: &Bridge, scope: &Arc<ScopeProxy>) -> BridgeResult<()> {
    if !scope.is_class() {
        return Ok(());
    }
    let has = |name: &str| bridge.has_member(scope.id(), name);
    let has_size = has("size")?;

    if has("push_back")? && !scope.has_attr("extend") {
        scope.set_attr(
            "extend",
            host_fn("extend", |bridge, receiver, args| {
                let args = one_arg("extend", args, 1)?;
                let Value::List(items) = &args[0] else {
                    return Err(BridgeError::conversion(format!(
                        "extend() expects a list, got {}",
                        args[0].type_name()
                    )));
                };
                for item in items {
                    bridge.call_method(receiver, "push_back", std::slice::from_ref(item))?;
                }
                Ok(Value::None)
            }),
        );
    }

    if has_size && !scope.has_attr("__len__") {
        scope.set_attr(
            "__len__",
            host_fn("__len__", |bridge, receiver, _args| {
                Ok(Value::Int(container_len(bridge, receiver)?))
            }),
        );
    }

    if has("operator[]")? {
        scope.set_attr(
            "__getitem__",
            host_fn("__getitem__", move |bridge, receiver, args| {
                let args = one_arg("__getitem__", args, 1)?;
                let index = checked_index(bridge, receiver, &args[0], has_size)?;
                bridge.call_method(receiver, "operator[]", &[index])
            }),
        );
        scope.set_attr(
            "__setitem__",
            host_fn("__setitem__", move |bridge, receiver, args| {
                let args = one_arg("__setitem__", args, 2)?;
                let index = checked_index(bridge, receiver, &args[0], has_size)?;
                bridge.store_through(receiver, "operator[]", &[index], &args[1])?;
                Ok(Value::None)
            }),
        );
    }

    for conversion in ["operator const char*", "operator std::string"] {
        if has(conversion)? {
            scope.set_attr(
                "__str__",
                host_fn("__str__", move |bridge, receiver, _args| {
                    bridge.call_method(receiver, conversion, &[])
                }),
            );
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_filter_matches_nested_scopes() {
        let py = Pythonizations::new();
        let f: PythonizationFn = Arc::new(|_, _| Ok(()));
        py.add(f.clone(), "geo");
        py.add(f, "");
        assert_eq!(py.callbacks_for("geo").len(), 2);
        assert_eq!(py.callbacks_for("geo::Point").len(), 2);
        assert_eq!(py.callbacks_for("geometry").len(), 1);
    }

    #[test]
    fn test_remove_unknown_handle() {
        let py = Pythonizations::new();
        let handle = py.add(Arc::new(|_, _| Ok(())), "");
        assert!(py.remove(handle));
        assert!(!py.remove(handle));
        assert!(!py.remove(PythonizationHandle(999)));
    }

    #[test]
    fn test_method_patterns() {
        let py = Pythonizations::new();
        py.add_transfer("^Factory$", "^create").unwrap();
        assert!(py.transfers("Factory", "create_point"));
        assert!(!py.transfers("geo::Factory", "create_point"));
        assert!(!py.transfers("Factory", "destroy"));
        assert!(matches!(py.add_transfer("(", "x"), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_latest_size_rule_wins() {
        let py = Pythonizations::new();
        py.add_size_arg("", "^get_data$", 0).unwrap();
        py.add_size_arg("Buffer", "^get_data$", 1).unwrap();
        assert_eq!(py.size_arg("Buffer", "get_data"), Some(1));
        assert_eq!(py.size_arg("Other", "get_data"), Some(0));
        assert_eq!(py.size_arg("Other", "data"), None);
    }
}
