//! Cross-Call Bridge
//!
//! [`Bridge`] is the process-wide state object tying the engine together:
//! the reflection gateway, converter registry, identity map, host dispatch
//! table, scope proxy cache and pythonization registry. Every public entry
//! point acquires the exclusive-access token before touching any of it.
//!
//! Attribute access and proxy creation live here; the forward call path is
//! in [`forward`](self::forward) and the reverse shim in `reverse`.

mod forward;
mod reverse;

use std::path::Path;
use std::sync::Arc;

use bindery_sdk::{
    normalize_name, split_template_args, Address, DataMember, EnumDecl, NativeRuntime, NativeThrow,
    ScopeId, Signature, ThrowOrigin,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::backend::RuntimeBuilder;
use crate::config::{BridgeConfig, ConfigError};
use crate::convert::{Converter, ConverterFactory, ConverterRegistry};
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::{
    BoundMethod, DispatchTable, EnumProxy, HostClass, IdentityMap, InstanceProxy, MethodRef,
    OverloadProxy, ScopeProxy, TemplateProxy,
};
use crate::pythonize::{
    apply_builtin, PostProcessor, PythonizationFn, PythonizationHandle, Pythonizations,
};
use crate::reflect::{Entity, Gateway};
use crate::sync::ExclusiveToken;
use crate::value::{HostError, Value};

use reverse::ReverseShim;

static GLOBAL: OnceCell<Bridge> = OnceCell::new();

pub(crate) struct BridgeState {
    runtime: Arc<dyn NativeRuntime>,
    config: BridgeConfig,
    token: ExclusiveToken,
    gateway: Arc<Gateway>,
    converters: ConverterRegistry,
    identity: Arc<IdentityMap>,
    dispatch: Arc<DispatchTable>,
    scopes: DashMap<ScopeId, Arc<ScopeProxy>>,
    pythonizations: Pythonizations,
    sizes: DashMap<String, usize>,
}

/// Handle to the bridge state; cheap to clone
#[derive(Clone)]
pub struct Bridge {
    state: Arc<BridgeState>,
}

/// Split `a::b::C<x::y>` into (`a::b`, `C<x::y>`), ignoring `::` inside
/// template argument lists
fn split_scope(name: &str) -> (&str, &str) {
    let bytes = name.as_bytes();
    let mut depth = 0usize;
    let mut split = None;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => split = Some(i),
            _ => {}
        }
    }
    match split {
        Some(i) => (&name[..i], &name[i + 2..]),
        None => ("", name),
    }
}

fn cacheable(value: &Value) -> bool {
    matches!(
        value,
        Value::Scope(_) | Value::Callable(_) | Value::Enum(_) | Value::Template(_)
    )
}

impl Bridge {
    /// Create a bridge over `runtime`.
    ///
    /// Applies the configured include paths and autoload maps, then loads
    /// the preload libraries, in order.
    pub fn new(runtime: Arc<dyn NativeRuntime>, config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let state = Arc::new(BridgeState {
            gateway: Arc::new(Gateway::new(runtime.clone())),
            converters: ConverterRegistry::new(config.converter_cache),
            identity: Arc::new(IdentityMap::new(config.identity_map)),
            dispatch: Arc::new(DispatchTable::new()),
            token: ExclusiveToken::new(),
            scopes: DashMap::new(),
            pythonizations: Pythonizations::new(),
            sizes: DashMap::new(),
            config: config.clone(),
            runtime,
        });
        state
            .runtime
            .set_reverse_dispatch(Arc::new(ReverseShim::new(Arc::downgrade(&state))));
        let bridge = Bridge { state };

        for path in &config.include_paths {
            bridge.add_include_path(path)?;
        }
        for path in &config.autoload_maps {
            bridge.add_autoload_map(path)?;
        }
        for path in &config.preload_libraries {
            bridge.load_reflection_info(path)?;
        }
        tracing::debug!(
            target: "bindery::bridge",
            includes = config.include_paths.len(),
            preloads = config.preload_libraries.len(),
            "bridge ready"
        );
        Ok(bridge)
    }

    /// The process-wide bridge, created on first use from the environment
    /// and an in-process runtime with the `std` declarations
    pub fn global() -> BridgeResult<&'static Bridge> {
        GLOBAL.get_or_try_init(|| {
            let config = BridgeConfig::from_env()?;
            let mut builder = RuntimeBuilder::new();
            builder.stdlib();
            let runtime = builder.build()?;
            Bridge::new(Arc::new(runtime), config)
        })
    }

    /// Install `bridge` as the process-wide bridge; fails (returning it)
    /// if one is already in use
    pub fn install_global(bridge: Bridge) -> Result<(), Bridge> {
        GLOBAL.set(bridge)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The native runtime
    pub fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.state.runtime
    }

    /// The reflection gateway
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// Configuration the bridge was created with
    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// The exclusive-access token
    pub fn token(&self) -> &ExclusiveToken {
        &self.state.token
    }

    /// Pythonization registry
    pub fn pythonizations(&self) -> &Pythonizations {
        &self.state.pythonizations
    }

    /// Number of objects in the identity map
    pub fn tracked_objects(&self) -> usize {
        self.state.identity.len()
    }

    /// Number of live host subclass instances
    pub fn host_instances(&self) -> usize {
        self.state.dispatch.len()
    }

    // ========================================================================
    // Declarations and libraries
    // ========================================================================

    /// Forward native source text to the JIT
    pub fn cppdef(&self, source: &str) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.runtime().declare(source).map_err(|e| {
            tracing::debug!(target: "bindery::bridge", error = %e, "declaration rejected");
            BridgeError::native(e)
        })
    }

    /// Process `#include "<header>"`
    pub fn include(&self, header: &str) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.runtime()
            .process_line(&format!("#include \"{}\"", header))
            .map_err(BridgeError::native)
    }

    /// Append an include directory; it must exist
    pub fn add_include_path(&self, path: &Path) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        if !path.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "include directory {} does not exist",
                path.display()
            ))
            .into());
        }
        Ok(self.runtime().add_include_path(path)?)
    }

    /// Register an autoload map; cached misses are retried once
    pub fn add_autoload_map(&self, path: &Path) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        if !path.is_file() {
            return Err(ConfigError::ValidationError(format!(
                "autoload map {} does not exist",
                path.display()
            ))
            .into());
        }
        self.runtime().add_autoload_map(path)?;
        self.gateway().bump_generation();
        Ok(())
    }

    /// Load a reflection library
    pub fn load_reflection_info(&self, path: &Path) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.runtime().load_library(path).map_err(|e| {
            tracing::warn!(target: "bindery::loader", path = %path.display(), error = %e, "cannot load reflection library");
            BridgeError::MissingReflectionLibrary {
                path: path.to_path_buf(),
            }
        })?;
        self.gateway().bump_generation();
        Ok(())
    }

    // ========================================================================
    // Converters
    // ========================================================================

    /// Converter for a native type signature
    pub fn converter(&self, type_name: &str) -> BridgeResult<Arc<dyn Converter>> {
        self.state.converters.get(self, type_name)
    }

    /// Converter for a native type signature (alias of [`converter`](Self::converter))
    pub fn get_converter(&self, type_name: &str) -> BridgeResult<Arc<dyn Converter>> {
        let _token = self.state.token.acquire();
        self.converter(type_name)
    }

    /// Register a converter factory for a type
    pub fn register_converter(&self, type_name: &str, factory: ConverterFactory) {
        let _token = self.state.token.acquire();
        self.state.converters.register(type_name, factory);
    }

    /// Remove the latest converter registered for a type
    pub fn unregister_converter(&self, type_name: &str) -> bool {
        let _token = self.state.token.acquire();
        self.state.converters.unregister(type_name)
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// Qualified name of a scope
    pub fn class_name(&self, scope: ScopeId) -> String {
        self.gateway().scope_name(scope)
    }

    /// The global namespace
    pub fn gbl(&self) -> BridgeResult<Arc<ScopeProxy>> {
        self.scope_proxy(ScopeId::GLOBAL)
    }

    /// Resolve a dotted path (`geo.Point.origin`) from the global namespace
    pub fn lookup(&self, path: &str) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        let mut value = Value::Scope(self.gbl()?);
        for part in path.split('.').filter(|p| !p.is_empty()) {
            value = self.getattr(&value, part)?;
        }
        Ok(value)
    }

    /// Class named `name`, instantiating class templates on demand
    pub fn resolve_class(&self, name: &str) -> BridgeResult<Option<ScopeId>> {
        let name = normalize_name(name.trim_start_matches("::"));
        if let Some(id) = self.gateway().find_scope(&name) {
            return Ok(self.gateway().scope_info(id)?.is_class().then_some(id));
        }
        let Some(open) = name.find('<').filter(|_| name.ends_with('>')) else {
            return Ok(None);
        };
        let args = split_template_args(&name[open + 1..name.len() - 1]);
        let (parent, leaf) = split_scope(&name[..open]);
        let parent = if parent.is_empty() {
            ScopeId::GLOBAL
        } else {
            match self.gateway().find_scope(parent) {
                Some(id) => id,
                None => return Ok(None),
            }
        };
        match self.gateway().try_lookup(parent, leaf)? {
            Some(Entity::ClassTemplate { scope, name: template }) => {
                let id = self.instantiate_class(scope, &template, &args)?;
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    fn instantiate_class(&self, scope: ScopeId, name: &str, args: &[String]) -> BridgeResult<ScopeId> {
        self.runtime()
            .instantiate_class(scope, name, args)
            .map_err(|e| BridgeError::InstantiationFailure {
                name: match self.class_name(scope) {
                    s if s.is_empty() => name.to_string(),
                    s => format!("{}::{}", s, name),
                },
                args: args.join(","),
                reason: e.to_string(),
            })
    }

    /// Enum declaration named `name`
    pub fn find_enum(&self, name: &str) -> Option<EnumDecl> {
        let name = name.trim_start_matches("::");
        let (parent, leaf) = split_scope(name);
        let scope = if parent.is_empty() {
            ScopeId::GLOBAL
        } else {
            self.gateway().find_scope(parent)?
        };
        match self.gateway().try_lookup(scope, leaf) {
            Ok(Some(Entity::Enum(decl))) => Some(decl),
            _ => None,
        }
    }

    /// Check if a class (or one of its bases) declares `name`
    pub fn has_member(&self, scope: ScopeId, name: &str) -> BridgeResult<bool> {
        Ok(self.gateway().lookup_member(scope, name)?.is_some())
    }

    // ========================================================================
    // Scope proxies
    // ========================================================================

    /// Proxy for a scope; created (and pythonized) once
    pub fn scope_proxy(&self, id: ScopeId) -> BridgeResult<Arc<ScopeProxy>> {
        if let Some(proxy) = self.state.scopes.get(&id).map(|p| p.value().clone()) {
            return Ok(proxy);
        }
        let _token = self.state.token.acquire();
        let info = self.gateway().scope_info(id)?;
        let (proxy, created) = match self.state.scopes.entry(id) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let proxy = Arc::new(ScopeProxy::new(info));
                e.insert(proxy.clone());
                (proxy, true)
            }
        };
        if created {
            tracing::debug!(target: "bindery::proxy", scope = %proxy.qualified_name(), "created scope proxy");
            self.pythonize(&proxy)?;
        }
        Ok(proxy)
    }

    fn pythonize(&self, scope: &Arc<ScopeProxy>) -> BridgeResult<()> {
        apply_builtin(self, scope)?;
        for (from, to) in self.state.pythonizations.renames_for(scope.qualified_name()) {
            self.apply_rename(scope, &from, &to);
        }
        for callback in self.state.pythonizations.callbacks_for(scope.qualified_name()) {
            callback(self, scope)?;
        }
        Ok(())
    }

    fn apply_rename(&self, scope: &Arc<ScopeProxy>, from: &str, to: &str) {
        match self.scope_attr(scope, from) {
            Ok(value) => {
                scope.set_attr(to, value);
                scope.hide(from);
            }
            Err(e) => {
                tracing::warn!(target: "bindery::proxy", scope = %scope.qualified_name(), from, to, error = %e, "rename skipped");
            }
        }
    }

    fn entity_value(&self, entity: Entity) -> BridgeResult<Value> {
        Ok(match entity {
            Entity::Scope(id) => Value::Scope(self.scope_proxy(id)?),
            Entity::Function(set) => Value::Callable(Arc::new(OverloadProxy::new(
                set.scope,
                &set.scope_name,
                &set.name,
                self.gateway().clone(),
            ))),
            Entity::Data(member) => {
                let address = member.address.ok_or_else(|| {
                    BridgeError::conversion(format!(
                        "instance member '{}' needs an object",
                        member.name
                    ))
                })?;
                self.converter(&member.ty)?.from_memory(self, address)?
            }
            Entity::Enum(decl) => Value::Enum(Arc::new(EnumProxy::new(decl))),
            Entity::Enumerator { value, .. } => Value::Int(value as i128),
            Entity::ClassTemplate { scope, name } => Value::Template(Arc::new(TemplateProxy::new(
                scope,
                &self.class_name(scope),
                &name,
            ))),
        })
    }

    fn scope_attr(&self, scope: &Arc<ScopeProxy>, name: &str) -> BridgeResult<Value> {
        if let Some(value) = scope.attr(name) {
            return Ok(value);
        }
        if scope.is_hidden(name) {
            return Err(BridgeError::unknown(scope.qualified_name(), name));
        }
        let found = if scope.is_class() {
            self.gateway()
                .lookup_member(scope.id(), name)?
                .map(|(entity, _)| entity)
        } else {
            self.gateway().try_lookup(scope.id(), name)?
        };
        let entity = found.ok_or_else(|| BridgeError::unknown(scope.qualified_name(), name))?;
        let value = self.entity_value(entity)?;
        if cacheable(&value) {
            scope.set_attr(name, value.clone());
        }
        Ok(value)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// `target.name`
    pub fn getattr(&self, target: &Value, name: &str) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        match target {
            Value::Scope(scope) => self.scope_attr(scope, name),
            Value::Object(o) => self.instance_attr(o, target, name),
            Value::Smart(smart) => {
                let object = Value::Object(self.smart_object(smart));
                self.getattr(&object, name)
            }
            Value::Enum(e) => e
                .value(name)
                .map(|v| Value::Int(v as i128))
                .ok_or_else(|| BridgeError::unknown(e.qualified_name(), name)),
            Value::Callable(c) if name == "__doc__" => Ok(Value::Str(c.doc()?)),
            other => Err(BridgeError::unknown(&other.type_name(), name)),
        }
    }

    fn instance_attr(&self, o: &Arc<InstanceProxy>, receiver: &Value, name: &str) -> BridgeResult<Value> {
        o.address()?;
        if let Some(value) = o.attr(name) {
            return Ok(value);
        }
        if let Some(method) = o.host_class().and_then(|h| h.lookup(name)) {
            return Ok(Value::Bound(Arc::new(BoundMethod::new(
                MethodRef::Host(method.clone()),
                receiver.clone(),
            ))));
        }
        let class = o.class().clone();
        if let Some(value) = class.attr(name) {
            return Ok(self.bind(value, receiver));
        }
        if class.is_hidden(name) {
            return Err(BridgeError::unknown(class.qualified_name(), name));
        }
        let (entity, owner) = self
            .gateway()
            .lookup_member(class.id(), name)?
            .ok_or_else(|| BridgeError::unknown(class.qualified_name(), name))?;
        match entity {
            Entity::Data(member) => self.read_member(o, receiver, owner, &member),
            entity => {
                let value = self.entity_value(entity)?;
                if cacheable(&value) {
                    class.set_attr(name, value.clone());
                }
                Ok(self.bind(value, receiver))
            }
        }
    }

    fn bind(&self, value: Value, receiver: &Value) -> Value {
        match value {
            Value::Callable(p) if p.overloads().is_ok_and(|set| set.has_methods()) => Value::Bound(
                Arc::new(BoundMethod::new(MethodRef::Native(p), receiver.clone())),
            ),
            Value::HostFn(h) => Value::Bound(Arc::new(BoundMethod::new(
                MethodRef::Host(h),
                receiver.clone(),
            ))),
            other => other,
        }
    }

    fn member_address(&self, o: &InstanceProxy, owner: ScopeId, member: &DataMember) -> BridgeResult<Address> {
        if let Some(address) = member.address {
            return Ok(address);
        }
        let base = o.address()?;
        let offset = self
            .runtime()
            .base_offset(o.class().id(), owner)
            .ok_or_else(|| {
                BridgeError::conversion(format!(
                    "{} is not a base of {}",
                    self.class_name(owner),
                    o.class().qualified_name()
                ))
            })?;
        Ok(base + offset as u64 + member.offset as u64)
    }

    fn read_member(&self, o: &InstanceProxy, receiver: &Value, owner: ScopeId, member: &DataMember) -> BridgeResult<Value> {
        let address = self.member_address(o, owner, member)?;
        let value = self.converter(&member.ty)?.from_memory(self, address)?;
        if let Value::View(view) = &value {
            view.keep_alive(receiver.clone());
        }
        tracing::trace!(target: "bindery::convert", member = %member.name, ty = %member.ty, address, "read data member");
        Ok(value)
    }

    /// `target.name = value`.
    ///
    /// Native data members are written through their converter; any other
    /// name becomes a host attribute of the proxy.
    pub fn setattr(&self, target: &Value, name: &str, value: &Value) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        match target {
            Value::Object(o) => {
                o.address()?;
                match self.gateway().lookup_member(o.class().id(), name)? {
                    Some((Entity::Data(member), owner)) => {
                        if member.is_const {
                            return Err(BridgeError::ConstViolation {
                                scope: self.class_name(owner),
                                member: name.to_string(),
                            });
                        }
                        let address = self.member_address(o, owner, &member)?;
                        self.converter(&member.ty)?.to_memory(self, value, address)
                    }
                    _ => {
                        o.set_attr(name, value.clone());
                        Ok(())
                    }
                }
            }
            Value::Scope(scope) => {
                let found = if scope.is_class() {
                    self.gateway()
                        .lookup_member(scope.id(), name)?
                        .map(|(entity, _)| entity)
                } else {
                    self.gateway().try_lookup(scope.id(), name)?
                };
                match found {
                    Some(Entity::Data(member)) => {
                        if member.is_const {
                            return Err(BridgeError::ConstViolation {
                                scope: scope.qualified_name().to_string(),
                                member: name.to_string(),
                            });
                        }
                        let address = member.address.ok_or_else(|| {
                            BridgeError::conversion(format!(
                                "instance member '{}' needs an object",
                                name
                            ))
                        })?;
                        self.converter(&member.ty)?.to_memory(self, value, address)
                    }
                    _ => {
                        scope.set_attr(name, value.clone());
                        Ok(())
                    }
                }
            }
            Value::Smart(smart) => {
                let object = Value::Object(self.smart_object(smart));
                self.setattr(&object, name, value)
            }
            other => Err(BridgeError::conversion(format!(
                "cannot set attribute '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Instance proxies
    // ========================================================================

    fn new_proxy(&self, address: Address, class: Arc<ScopeProxy>, owns: bool) -> Arc<InstanceProxy> {
        let proxy = Arc::new(InstanceProxy::new(
            address,
            class,
            owns,
            self.runtime().clone(),
            Arc::downgrade(&self.state.identity),
        ));
        self.state.identity.insert(&proxy);
        tracing::debug!(target: "bindery::proxy", class = %proxy.class().qualified_name(), address, owns, "created instance proxy");
        proxy
    }

    /// Proxy for the object at `address`, declared as a `class`.
    ///
    /// The object is downcast to its most-derived type; a live proxy for the
    /// same (address, type) is returned instead of a new one.
    pub fn wrap_object(&self, address: Address, class: ScopeId, owns: bool) -> BridgeResult<Arc<InstanceProxy>> {
        let (actual, start) = self.runtime().dynamic_type(address, class);
        if let Some((_, host)) = self.state.dispatch.get(start) {
            return Ok(host);
        }
        if let Some(existing) = self.state.identity.get(start, actual) {
            if owns {
                existing.set_owns(true);
            }
            return Ok(existing);
        }
        let class = self.scope_proxy(actual)?;
        Ok(self.new_proxy(start, class, owns))
    }

    /// Borrowed proxy viewing the memory at `address` as a `class`, without
    /// downcasting
    pub(crate) fn view_as(&self, address: Address, class: ScopeId) -> BridgeResult<Arc<InstanceProxy>> {
        if let Some(existing) = self.state.identity.get(address, class) {
            return Ok(existing);
        }
        let class = self.scope_proxy(class)?;
        Ok(self.new_proxy(address, class, false))
    }

    /// Proxy exposing the object managed by a smart pointer handle
    pub fn wrap_smart(&self, handle: u64, pointee: Address, class: ScopeId) -> BridgeResult<Value> {
        let smart = Arc::new(crate::proxy::SmartPointer::new(
            self.runtime().clone(),
            handle,
            self.scope_proxy(class)?,
            pointee,
        ));
        let (actual, start) = self.runtime().dynamic_type(pointee, class);
        let proxy = InstanceProxy::new(
            start,
            self.scope_proxy(actual)?,
            false,
            self.runtime().clone(),
            std::sync::Weak::new(),
        )
        .with_smart(smart);
        Ok(Value::Object(Arc::new(proxy)))
    }

    fn smart_object(&self, smart: &Arc<crate::proxy::SmartPointer>) -> Arc<InstanceProxy> {
        let proxy = InstanceProxy::new(
            smart.pointee(),
            smart.class().clone(),
            false,
            self.runtime().clone(),
            std::sync::Weak::new(),
        )
        .with_smart(smart.clone());
        Arc::new(proxy)
    }

    pub(crate) fn instance_of(&self, value: &Value) -> BridgeResult<Arc<InstanceProxy>> {
        match value {
            Value::Object(o) => Ok(o.clone()),
            Value::Smart(s) => Ok(self.smart_object(s)),
            other => Err(BridgeError::conversion(format!(
                "{} is not a native instance",
                other.type_name()
            ))),
        }
    }

    /// The smart pointer behind a proxy returned by smart pointer
    pub fn smartptr(&self, value: &Value) -> BridgeResult<Value> {
        match value {
            Value::Smart(_) => Ok(value.clone()),
            Value::Object(o) => o.smart().cloned().map(Value::Smart).ok_or_else(|| {
                BridgeError::conversion(format!(
                    "{} object is not held by a smart pointer",
                    o.class().qualified_name()
                ))
            }),
            other => Err(BridgeError::conversion(format!(
                "{} is not a native instance",
                other.type_name()
            ))),
        }
    }

    /// Destroy the native object behind an owning proxy
    pub fn destroy(&self, value: &Value) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        match value {
            Value::Object(o) => o.destroy(),
            other => Err(BridgeError::Ownership(format!(
                "{} is not a native instance",
                other.type_name()
            ))),
        }
    }

    /// Transfer ownership of the native object to (`true`) or away from
    /// (`false`) its proxy
    pub fn set_ownership(&self, value: &Value, owns: bool) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        let o = self.instance_of(value)?;
        o.address()?;
        o.set_owns(owns);
        Ok(())
    }

    /// Raw address behind a proxy, view or null value
    pub fn addressof(&self, value: &Value) -> BridgeResult<Address> {
        match value {
            Value::Object(o) => o.address(),
            Value::View(v) => Ok(v.address()),
            Value::Smart(s) => Ok(s.pointee()),
            Value::None | Value::NullPtr => Ok(0),
            other => Err(BridgeError::conversion(format!(
                "cannot take the address of {}",
                other.type_name()
            ))),
        }
    }

    /// Borrowed proxy for the object of type `class` at `address`
    pub fn bind_object(&self, address: Address, class: &Value) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        if address == 0 {
            return Ok(Value::NullPtr);
        }
        let id = self.class_id(class)?;
        Ok(Value::Object(self.wrap_object(address, id, false)?))
    }

    fn class_id(&self, class: &Value) -> BridgeResult<ScopeId> {
        match class {
            Value::Scope(s) if s.is_class() => Ok(s.id()),
            Value::Str(name) => self
                .resolve_class(name)?
                .ok_or_else(|| BridgeError::unknown("", name)),
            other => Err(BridgeError::conversion(format!(
                "{} is not a class",
                other.type_name()
            ))),
        }
    }

    /// The `nullptr` sentinel
    pub fn nullptr(&self) -> Value {
        Value::NullPtr
    }

    /// Storage size of a type, class or object
    pub fn sizeof(&self, ty: &Value) -> BridgeResult<usize> {
        let _token = self.state.token.acquire();
        let name = match ty {
            Value::Str(s) => normalize_name(s),
            Value::Scope(s) => s.qualified_name().to_string(),
            Value::Object(o) => o.class().qualified_name().to_string(),
            other => {
                return Err(BridgeError::conversion(format!(
                    "sizeof() needs a type, got {}",
                    other.type_name()
                )))
            }
        };
        if let Some(size) = self.state.sizes.get(&name).map(|s| *s.value()) {
            return Ok(size);
        }
        let size = match self.runtime().size_of(&name) {
            Some(size) => size,
            None => match self.resolve_class(&name)? {
                Some(id) => self.gateway().scope_info(id)?.size,
                None => return Err(BridgeError::unknown("", &name)),
            },
        };
        self.state.sizes.insert(name, size);
        Ok(size)
    }

    // ========================================================================
    // Host subclasses
    // ========================================================================

    /// Start a host class deriving from the native class `base`
    pub fn host_class(&self, name: &str, base: &Value) -> BridgeResult<HostClass> {
        let id = self.class_id(base)?;
        Ok(HostClass::new(name, self.scope_proxy(id)?))
    }

    /// Construct an instance of a host class.
    ///
    /// The native base object is constructed (abstract bases included) and
    /// its address is routed to the host overrides for virtual calls made
    /// by native code.
    pub fn instantiate_host(&self, class: &Arc<HostClass>, args: &[Value]) -> BridgeResult<Value> {
        let _token = self.state.token.acquire();
        let missing = class.missing_overrides();
        if !missing.is_empty() {
            return Err(BridgeError::AbstractClass(format!(
                "{} (pure virtual methods not overridden: {})",
                class.name(),
                missing.join(", ")
            )));
        }
        let base = class.base().clone();
        let address = self.construct_native(&base, args, true)?;
        let proxy = Arc::new(
            InstanceProxy::new(
                address,
                base,
                true,
                self.runtime().clone(),
                Arc::downgrade(&self.state.identity),
            )
            .with_host(class.clone(), Arc::downgrade(&self.state.dispatch)),
        );
        self.state.identity.insert(&proxy);
        self.state.dispatch.register(class.clone(), &proxy);
        tracing::debug!(target: "bindery::reverse", class = class.name(), address, "registered host instance");
        Ok(Value::Object(proxy))
    }

    // ========================================================================
    // Pythonizations
    // ========================================================================

    /// Run `callback` on every scope proxy created from now on whose name is
    /// `scope_filter` or nested in it
    pub fn add_pythonization(&self, callback: PythonizationFn, scope_filter: &str) -> PythonizationHandle {
        let _token = self.state.token.acquire();
        self.state.pythonizations.add(callback, scope_filter)
    }

    /// Remove a pythonization callback; false if it was never registered
    pub fn remove_pythonization(&self, handle: PythonizationHandle) -> bool {
        let _token = self.state.token.acquire();
        self.state.pythonizations.remove(handle)
    }

    /// Post-process results of methods matching the patterns
    pub fn compose_method(&self, class_pattern: &str, method_pattern: &str, post: PostProcessor) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.state
            .pythonizations
            .add_compose(class_pattern, method_pattern, post)
    }

    /// Mark pointer results of matching methods as owned by the caller
    pub fn set_ownership_transfer(&self, class_pattern: &str, method_pattern: &str) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.state
            .pythonizations
            .add_transfer(class_pattern, method_pattern)
    }

    /// Give pointer results of matching methods the length passed in
    /// argument `index`
    pub fn set_size_arg(&self, class_pattern: &str, method_pattern: &str, index: usize) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        self.state
            .pythonizations
            .add_size_arg(class_pattern, method_pattern, index)
    }

    /// Expose `class::from` as `to` and hide `from`
    pub fn rename_attribute(&self, class: &str, from: &str, to: &str) -> BridgeResult<()> {
        let _token = self.state.token.acquire();
        let class = normalize_name(class.trim_start_matches("::"));
        self.state.pythonizations.add_rename(&class, from, to);
        let live = self
            .gateway()
            .find_scope(&class)
            .and_then(|id| self.state.scopes.get(&id).map(|p| p.value().clone()));
        if let Some(scope) = live {
            self.apply_rename(&scope, from, to);
        }
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Host error for an exception thrown out of `sig`.
    ///
    /// Host exceptions raised by an override inside the call are re-raised
    /// as themselves.
    pub(crate) fn native_exception(&self, sig: &Signature, thrown: NativeThrow) -> BridgeError {
        match thrown.origin {
            ThrowOrigin::Host => BridgeError::Host(HostError::new(thrown.kind, thrown.message)),
            ThrowOrigin::Native => BridgeError::NativeException {
                name: sig.prototype(),
                kind: thrown.kind,
                message: thrown.message,
            },
        }
    }
}
