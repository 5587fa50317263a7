//! Forward calls: host → native
//!
//! A call resolves the overload, converts every argument (recording call
//! temporaries), adjusts `this` to the declaring class, invokes the
//! runtime with panics caught at the boundary, and converts the result.
//! Pythonization rules then shape the result: ownership transfer, size
//! arguments and composed post-processors.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bindery_sdk::{Address, NativeValue, ScopeId, Signature, TypeSpec};

use super::Bridge;
use crate::convert::Temporaries;
use crate::error::{BridgeError, BridgeResult};
use crate::overload::{self, describe_args, Resolution};
use crate::proxy::template::template_args;
use crate::proxy::{BoundMethod, MethodRef, OverloadProxy, ScopeProxy};
use crate::reflect::{Entity, OverloadSet};
use crate::value::Value;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "native code panicked".to_string()
}

impl Bridge {
    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a callable value.
    ///
    /// Classes construct a new owning instance, instances call their
    /// `operator()`, templates instantiate with the arguments as template
    /// arguments.
    pub fn call(&self, target: &Value, args: &[Value]) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        match target {
            Value::Callable(proxy) => self.call_overloads(proxy, None, args),
            Value::Bound(bound) => self.call_bound(bound, args),
            Value::HostFn(func) => func.call(self, &Value::None, args),
            Value::Scope(scope) => self.construct(scope, args),
            Value::Object(_) | Value::Smart(_) => self.call_method(target, "operator()", args),
            Value::Template(_) => self.instantiate(target, args),
            other => Err(BridgeError::conversion(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Call `receiver.name(args...)`
    pub fn call_method(&self, receiver: &Value, name: &str, args: &[Value]) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        let method = self.getattr(receiver, name)?;
        self.call(&method, args)
    }

    fn call_bound(&self, bound: &BoundMethod, args: &[Value]) -> BridgeResult<Value> {
        match bound.method() {
            MethodRef::Native(proxy) => self.call_overloads(proxy, Some(bound.receiver()), args),
            MethodRef::Host(func) => func.call(self, bound.receiver(), args),
        }
    }

    /// Call a native overload set; an unbound method takes its receiver
    /// from the first argument
    pub(crate) fn call_overloads(
        &self,
        proxy: &OverloadProxy,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let set = proxy.overloads()?;
        if set.is_empty() {
            return Err(BridgeError::unknown(proxy.scope_name(), proxy.name()));
        }
        let unbound = receiver.is_none() && set.signatures.iter().all(|s| !s.is_static);
        let (receiver, args) = match (receiver, args.split_first()) {
            (Some(receiver), _) => (Some(receiver), args),
            (None, Some((first, rest))) if unbound => (Some(first), rest),
            (None, None) if unbound => {
                return Err(BridgeError::conversion(format!(
                    "unbound method {}() needs an instance",
                    proxy.qualified_name()
                )))
            }
            (None, _) => (None, args),
        };
        self.invoke_set(proxy, &set, receiver, args)
    }

    fn convert_args(
        &self,
        resolution: &Resolution,
        args: &[Value],
        temps: &mut Temporaries,
    ) -> BridgeResult<Vec<NativeValue>> {
        resolution
            .converters
            .iter()
            .zip(args)
            .map(|(conv, arg)| conv.to_native(self, arg, temps))
            .collect()
    }

    fn receiver_address(&self, receiver: &Value, declaring: ScopeId) -> BridgeResult<Address> {
        let object = self.instance_of(receiver)?;
        let address = object.address()?;
        let offset = self
            .runtime()
            .base_offset(object.class().id(), declaring)
            .ok_or_else(|| {
                BridgeError::conversion(format!(
                    "{} object is not a {}",
                    object.class().qualified_name(),
                    self.class_name(declaring)
                ))
            })?;
        Ok(address + offset as u64)
    }

    fn invoke_native(
        &self,
        sig: &Signature,
        this: Option<Address>,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        let runtime = self.runtime();
        match panic::catch_unwind(AssertUnwindSafe(|| runtime.invoke(sig.id, this, args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(thrown)) => {
                tracing::debug!(target: "bindery::bridge", function = %sig.prototype(), kind = %thrown.kind, "native exception");
                Err(self.native_exception(sig, thrown))
            }
            Err(payload) => Err(BridgeError::NativeException {
                name: sig.prototype(),
                kind: "panic".to_string(),
                message: panic_message(payload),
            }),
        }
    }

    fn invoke_set(
        &self,
        proxy: &OverloadProxy,
        set: &OverloadSet,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let resolution = overload::resolve(self, set, args)?;
        let sig = &resolution.signature;
        let mut temps = Temporaries::new(self.runtime().clone());
        let native_args = self.convert_args(&resolution, args, &mut temps)?;

        let this = match receiver {
            Some(receiver) if !sig.is_static => Some(self.receiver_address(receiver, sig.scope)?),
            _ => None,
        };
        if !sig.is_static && this.is_none() {
            return Err(BridgeError::conversion(format!(
                "method {}() needs an instance",
                set.qualified_name()
            )));
        }

        let raw = {
            let guard = self.state.token.acquire();
            let _released = proxy.release_gil().then(|| guard.release());
            self.invoke_native(sig, this, &native_args)?
        };

        let rules = &self.state.pythonizations;
        let creates = proxy.creates() || rules.transfers(&sig.scope_name, &set.name);
        let mut value = self
            .converter(&sig.return_type)?
            .from_native(self, raw, creates)?;
        drop(temps);

        if let Value::View(view) = &value {
            if let Some(len) = rules
                .size_arg(&sig.scope_name, &set.name)
                .and_then(|index| args.get(index))
                .and_then(Value::as_int)
            {
                view.reshape(usize::try_from(len).unwrap_or(0));
            }
            if let Some(receiver) = receiver {
                view.keep_alive(receiver.clone());
            }
        }
        for post in rules.post_processors(&sig.scope_name, &set.name) {
            value = post(self, value)?;
        }
        tracing::trace!(target: "bindery::bridge", function = %sig.prototype(), args = %describe_args(args), "call returned");
        Ok(value)
    }

    // ========================================================================
    // Construction
    // ========================================================================

    pub(crate) fn construct_native(
        &self,
        class: &Arc<ScopeProxy>,
        args: &[Value],
        allow_abstract: bool,
    ) -> BridgeResult<Address> {
        let set = self.gateway().constructors(class.id())?;
        let resolution = overload::resolve(self, &set, args)?;
        let sig = &resolution.signature;
        let mut temps = Temporaries::new(self.runtime().clone());
        let native_args = self.convert_args(&resolution, args, &mut temps)?;
        let runtime = self.runtime();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.construct(sig.id, &native_args, allow_abstract)
        }));
        match outcome {
            Ok(Ok(address)) => Ok(address),
            Ok(Err(thrown)) => Err(self.native_exception(sig, thrown)),
            Err(payload) => Err(BridgeError::NativeException {
                name: sig.prototype(),
                kind: "panic".to_string(),
                message: panic_message(payload),
            }),
        }
    }

    fn construct(&self, class: &Arc<ScopeProxy>, args: &[Value]) -> BridgeResult<Value> {
        if !class.is_class() {
            return Err(BridgeError::conversion(format!(
                "namespace '{}' is not callable",
                class.qualified_name()
            )));
        }
        if class.is_abstract() {
            return Err(BridgeError::AbstractClass(class.qualified_name().to_string()));
        }
        let address = self.construct_native(class, args, false)?;
        Ok(Value::Object(self.new_proxy(address, class.clone(), true)))
    }

    // ========================================================================
    // Templates
    // ========================================================================

    /// `target[args]`: instantiate a class or function template
    pub fn instantiate(&self, target: &Value, args: &[Value]) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        let names = template_args(args)?;
        match target {
            Value::Template(template) => {
                let id = self.instantiate_class(template.scope(), template.name(), &names)?;
                Ok(Value::Scope(self.scope_proxy(id)?))
            }
            Value::Callable(proxy) => Ok(Value::Callable(self.instantiate_function(proxy, &names)?)),
            Value::Bound(bound) => match bound.method() {
                MethodRef::Native(proxy) => {
                    let instantiated = self.instantiate_function(proxy, &names)?;
                    Ok(Value::Bound(Arc::new(BoundMethod::new(
                        MethodRef::Native(instantiated),
                        bound.receiver().clone(),
                    ))))
                }
                MethodRef::Host(func) => Err(BridgeError::conversion(format!(
                    "host method {} is not a template",
                    func.name()
                ))),
            },
            other => Err(BridgeError::conversion(format!(
                "{} is not a template",
                other.type_name()
            ))),
        }
    }

    fn instantiate_function(&self, proxy: &OverloadProxy, names: &[String]) -> BridgeResult<Arc<OverloadProxy>> {
        let set = proxy.overloads()?;
        let mut instantiated = Vec::new();
        let mut failure = None;
        for sig in set.signatures.iter().filter(|s| s.is_template()) {
            match self.runtime().instantiate_function(sig.scope, &sig.name, names) {
                Ok(inst) => instantiated.push(inst),
                Err(e) => {
                    failure.get_or_insert(e.to_string());
                }
            }
        }
        if instantiated.is_empty() {
            return Err(BridgeError::InstantiationFailure {
                name: proxy.qualified_name(),
                args: names.join(","),
                reason: failure.unwrap_or_else(|| "no function template of that name".to_string()),
            });
        }
        let fixed = OverloadProxy::fixed(
            Arc::new(set.with_signatures(instantiated)),
            self.gateway().clone(),
        );
        fixed.set_release_gil(proxy.release_gil());
        fixed.set_creates(proxy.creates());
        Ok(Arc::new(fixed))
    }

    // ========================================================================
    // Operators and protocols
    // ========================================================================

    /// `lhs <op> rhs` through `operator<op>`: a member of the left operand's
    /// class first, then a free function in its enclosing namespace, then
    /// in the global namespace
    pub fn binary_op(&self, op: &str, lhs: &Value, rhs: &Value) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        let name = format!("operator{}", op);
        if let Ok(object) = self.instance_of(lhs) {
            let class = object.class();
            if self.has_member(class.id(), &name)? {
                return self.call_method(lhs, &name, std::slice::from_ref(rhs));
            }
            let mut scopes = Vec::with_capacity(2);
            if let Some(parent) = class.info().parent {
                scopes.push(parent);
            }
            if !scopes.contains(&ScopeId::GLOBAL) {
                scopes.push(ScopeId::GLOBAL);
            }
            for scope in scopes {
                if let Some(Entity::Function(set)) = self.gateway().try_lookup(scope, &name)? {
                    let proxy = OverloadProxy::new(set.scope, &set.scope_name, &set.name, self.gateway().clone());
                    return self.call_overloads(&proxy, None, &[lhs.clone(), rhs.clone()]);
                }
            }
        }
        Err(BridgeError::NoMatch {
            name,
            args: describe_args(&[lhs.clone(), rhs.clone()]),
            candidates: Vec::new(),
        })
    }

    /// `target = value` through `operator=`
    pub fn assign(&self, target: &Value, value: &Value) -> BridgeResult<()> {
        self.call_method(target, "operator=", std::slice::from_ref(value))?;
        Ok(())
    }

    /// `len(value)`
    pub fn len(&self, value: &Value) -> BridgeResult<usize> {
        let _token = self.state.token.acquire();
        match value {
            Value::List(items) => Ok(items.len()),
            Value::Str(s) => Ok(s.len()),
            Value::View(view) => view.len().ok_or_else(|| {
                BridgeError::conversion(format!("{}* view has no known length", view.element_type()))
            }),
            other => {
                let len = self.call_method(other, "__len__", &[])?;
                len.as_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| BridgeError::conversion("__len__() did not return a length"))
            }
        }
    }

    /// `target[index]`
    pub fn getitem(&self, target: &Value, index: &Value) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        match target {
            Value::View(view) => view.get(self, self.index_of(index)?),
            Value::List(items) => {
                let i = self.index_of(index)?;
                let len = items.len();
                let actual = if i < 0 { i + len as i64 } else { i };
                usize::try_from(actual)
                    .ok()
                    .and_then(|a| items.get(a))
                    .cloned()
                    .ok_or(BridgeError::Bounds {
                        what: "list".to_string(),
                        index: i,
                        len,
                    })
            }
            other => self.call_method(other, "__getitem__", std::slice::from_ref(index)),
        }
    }

    /// `target[index] = value`
    pub fn setitem(&self, target: &Value, index: &Value, value: &Value) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        match target {
            Value::View(view) => view.set(self, self.index_of(index)?, value),
            other => {
                self.call_method(other, "__setitem__", &[index.clone(), value.clone()])?;
                Ok(())
            }
        }
    }

    fn index_of(&self, index: &Value) -> BridgeResult<i64> {
        index
            .as_int()
            .and_then(|i| i64::try_from(i).ok())
            .ok_or_else(|| BridgeError::conversion(format!("indices must be integers, not {}", index.type_name())))
    }

    /// `str(value)`; instances use their `__str__` when they have one
    pub fn to_string(&self, value: &Value) -> BridgeResult<String> {
        let _token = self.state.token.acquire();
        match value {
            Value::Str(s) => Ok(s.clone()),
            Value::Object(_) | Value::Smart(_) => match self.call_method(value, "__str__", &[]) {
                Ok(Value::Str(s)) => Ok(s),
                Ok(other) => Ok(format!("{:?}", other)),
                Err(BridgeError::UnknownEntity { .. }) => Ok(format!("{:?}", value)),
                Err(e) => Err(e),
            },
            other => Ok(format!("{:?}", other)),
        }
    }

    /// Signatures of a callable, one per line
    pub fn doc(&self, value: &Value) -> BridgeResult<String> {
        match value {
            Value::Callable(proxy) => proxy.doc(),
            Value::Bound(bound) => match bound.method() {
                MethodRef::Native(proxy) => proxy.doc(),
                MethodRef::Host(func) => Ok(format!("{}(...)", func.name())),
            },
            Value::Scope(scope) => Ok(scope.qualified_name().to_string()),
            other => Ok(other.type_name()),
        }
    }

    /// Assign `value` through the reference returned by
    /// `receiver.method(args...)`
    pub(crate) fn store_through(
        &self,
        receiver: &Value,
        method: &str,
        args: &[Value],
        value: &Value,
    ) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        let object = self.instance_of(receiver)?;
        let class = object.class();
        let set = match self.gateway().lookup_member(class.id(), method)? {
            Some((Entity::Function(set), _)) => set,
            _ => return Err(BridgeError::unknown(class.qualified_name(), method)),
        };
        let resolution = overload::resolve(self, &set, args)?;
        let sig = &resolution.signature;
        let returned = TypeSpec::parse(&sig.return_type)?;
        if !returned.is_reference() || returned.is_const {
            return Err(BridgeError::ConstViolation {
                scope: class.qualified_name().to_string(),
                member: format!("{}()", method),
            });
        }
        let mut temps = Temporaries::new(self.runtime().clone());
        let native_args = self.convert_args(&resolution, args, &mut temps)?;
        let this = self.receiver_address(receiver, sig.scope)?;
        let address = match self.invoke_native(sig, Some(this), &native_args)? {
            NativeValue::Ptr(address) if address != 0 => address,
            other => {
                return Err(BridgeError::conversion(format!(
                    "{} returned {:?} instead of a reference",
                    sig.prototype(),
                    other
                )))
            }
        };
        let target = returned.element();
        self.converter(&target.to_string())?
            .to_memory(self, value, address)
    }
}
