//! Reflection Gateway
//!
//! Answers "what is `name` in `scope`" by querying the native runtime and
//! caching the answer per (scope, name). Successful lookups are never
//! invalidated. A miss is remembered together with the autoload generation
//! and the runtime's declaration epoch: it is retried only once new
//! declarations appeared or a new autoload map was registered, and the
//! autoloader is consulted at most once per generation.
//!
//! Overload sets are cached per declaration epoch, so overloads declared
//! later extend the set seen by the next call.

mod cache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bindery_sdk::{DataMember, EntityDecl, EnumDecl, NativeRuntime, ScopeId, ScopeInfo};
use dashmap::DashMap;

use crate::error::{BridgeError, BridgeResult};

pub use cache::OverloadSet;
use cache::Cached;

/// A resolved native entity
#[derive(Debug, Clone)]
pub enum Entity {
    /// Namespace or class
    Scope(ScopeId),
    /// Function or method overload set
    Function(Arc<OverloadSet>),
    /// Data member or namespace variable
    Data(DataMember),
    /// Enum type
    Enum(EnumDecl),
    /// Unscoped enumerator
    Enumerator {
        /// Qualified enum name
        enum_name: String,
        /// Enumerator value
        value: i64,
    },
    /// Class template
    ClassTemplate {
        /// Declaring scope
        scope: ScopeId,
        /// Template name
        name: String,
    },
}

/// Caching front of the native runtime's reflection
pub struct Gateway {
    runtime: Arc<dyn NativeRuntime>,
    entities: DashMap<(ScopeId, String), Cached>,
    overloads: DashMap<(ScopeId, String), Arc<OverloadSet>>,
    constructors: DashMap<ScopeId, Arc<OverloadSet>>,
    infos: DashMap<ScopeId, Arc<ScopeInfo>>,
    generation: AtomicU64,
}

impl Gateway {
    /// Create a gateway over `runtime`
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self {
            runtime,
            entities: DashMap::new(),
            overloads: DashMap::new(),
            constructors: DashMap::new(),
            infos: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// The native runtime
    pub fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.runtime
    }

    /// Start a new autoload generation; cached misses are retried once
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Current autoload generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Reflection information of a scope
    pub fn scope_info(&self, scope: ScopeId) -> BridgeResult<Arc<ScopeInfo>> {
        if let Some(info) = self.infos.get(&scope) {
            return Ok(info.value().clone());
        }
        let info = Arc::new(self.runtime.scope_info(scope)?);
        self.infos.insert(scope, info.clone());
        Ok(info)
    }

    /// Qualified name of a scope ("" for the global namespace)
    pub fn scope_name(&self, scope: ScopeId) -> String {
        self.scope_info(scope)
            .map(|info| info.qualified_name.clone())
            .unwrap_or_default()
    }

    /// Find a scope by qualified name, autoloading it if necessary
    pub fn find_scope(&self, qualified_name: &str) -> Option<ScopeId> {
        if let Some(id) = self.runtime.find_scope(qualified_name) {
            return Some(id);
        }
        if self.runtime.autoload(qualified_name) {
            tracing::debug!(target: "bindery::reflect", name = qualified_name, "autoloaded scope");
            return self.runtime.find_scope(qualified_name);
        }
        None
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve `name` in `scope`
    pub fn lookup(&self, scope: ScopeId, name: &str) -> BridgeResult<Entity> {
        self.find(scope, name, true)?
            .ok_or_else(|| BridgeError::unknown(&self.scope_name(scope), name))
    }

    /// Resolve `name` in `scope`; `None` if absent
    pub fn try_lookup(&self, scope: ScopeId, name: &str) -> BridgeResult<Option<Entity>> {
        self.find(scope, name, true)
    }

    /// Resolve a member of a class, searching bases depth-first.
    ///
    /// Returns the entity and the class declaring it. A name declared in a
    /// derived class hides every base declaration of that name.
    pub fn lookup_member(&self, class: ScopeId, name: &str) -> BridgeResult<Option<(Entity, ScopeId)>> {
        if let Some(entity) = self.find(class, name, false)? {
            return Ok(Some((entity, class)));
        }
        let info = self.scope_info(class)?;
        for base in &info.bases {
            if let Some(found) = self.lookup_member(base.scope, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn find(&self, scope: ScopeId, name: &str, autoload: bool) -> BridgeResult<Option<Entity>> {
        let key = (scope, name.to_string());
        let generation = self.generation();
        let cached = self.entities.get(&key).map(|c| c.value().clone());
        let autoloaded = match cached {
            Some(Cached::Found(decl)) => return self.entity(scope, name, decl).map(Some),
            Some(Cached::Missing { generation: g, epoch }) => {
                if g == generation && epoch == self.runtime.declaration_epoch() {
                    return Ok(None);
                }
                g == generation
            }
            None => false,
        };

        tracing::debug!(target: "bindery::reflect", scope = scope.0, name, "lookup cache miss");
        let mut decl = self.runtime.lookup(scope, name).map_err(BridgeError::native)?;
        if decl.is_none() && autoload && !autoloaded {
            let qualified = match self.scope_name(scope) {
                s if s.is_empty() => name.to_string(),
                s => format!("{}::{}", s, name),
            };
            if self.runtime.autoload(&qualified) {
                tracing::debug!(target: "bindery::reflect", name = %qualified, "autoloaded");
                decl = self.runtime.lookup(scope, name).map_err(BridgeError::native)?;
            }
        }

        match decl {
            Some(decl) => {
                self.entities.insert(key, Cached::Found(decl.clone()));
                self.entity(scope, name, decl).map(Some)
            }
            None => {
                let epoch = self.runtime.declaration_epoch();
                self.entities.insert(key, Cached::Missing { generation, epoch });
                Ok(None)
            }
        }
    }

    fn entity(&self, scope: ScopeId, name: &str, decl: EntityDecl) -> BridgeResult<Entity> {
        Ok(match decl {
            EntityDecl::Scope(id) => Entity::Scope(id),
            EntityDecl::Function => Entity::Function(self.overloads(scope, name)?),
            EntityDecl::DataMember(m) => Entity::Data(m),
            EntityDecl::Enum(e) => Entity::Enum(e),
            EntityDecl::Enumerator { enum_name, value } => Entity::Enumerator { enum_name, value },
            EntityDecl::ClassTemplate => Entity::ClassTemplate {
                scope,
                name: name.to_string(),
            },
        })
    }

    // ========================================================================
    // Overload sets
    // ========================================================================

    /// Overloads of `name` declared in `scope`, refreshed when new
    /// declarations appeared
    pub fn overloads(&self, scope: ScopeId, name: &str) -> BridgeResult<Arc<OverloadSet>> {
        let key = (scope, name.to_string());
        let epoch = self.runtime.declaration_epoch();
        let cached = self.overloads.get(&key).map(|s| s.value().clone());
        if let Some(set) = cached.filter(|s| s.epoch == epoch) {
            return Ok(set);
        }
        let signatures = self.runtime.overloads(scope, name);
        let set = Arc::new(OverloadSet::new(
            scope,
            &self.scope_name(scope),
            name,
            signatures,
            epoch,
        ));
        tracing::debug!(target: "bindery::reflect", name = %set.qualified_name(), count = set.len(), "loaded overload set");
        self.overloads.insert(key, set.clone());
        Ok(set)
    }

    /// Constructors of a class
    pub fn constructors(&self, class: ScopeId) -> BridgeResult<Arc<OverloadSet>> {
        let epoch = self.runtime.declaration_epoch();
        let cached = self.constructors.get(&class).map(|s| s.value().clone());
        if let Some(set) = cached.filter(|s| s.epoch == epoch) {
            return Ok(set);
        }
        let info = self.scope_info(class)?;
        let set = Arc::new(OverloadSet::new(
            class,
            &info.qualified_name,
            &info.name,
            self.runtime.constructors(class),
            epoch,
        ));
        self.constructors.insert(class, set.clone());
        Ok(set)
    }

    /// Names declared directly in a scope
    pub fn member_names(&self, scope: ScopeId) -> Vec<String> {
        self.runtime.member_names(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RuntimeBuilder;
    use bindery_sdk::NativeValue;

    fn gateway() -> (Gateway, Arc<crate::backend::InProcessRuntime>) {
        let mut b = RuntimeBuilder::new();
        b.namespace("geo", |ns| {
            ns.function("int area(int w, int h)", |f| Ok(NativeValue::Int(f.int(0)? * f.int(1)?)));
            ns.class("Base", 8, |c| {
                c.data("int m_id", 0);
                c.method("int id() const", |_| Ok(NativeValue::Int(1)));
            });
            ns.class("Derived", 8, |c| {
                c.base("Base");
            });
        });
        b.on_declare(|scope, source| {
            let name = source.trim().trim_end_matches(';');
            scope.function(&format!("int {}()", name), |_| Ok(NativeValue::Int(0)));
            Ok(())
        });
        let rt = Arc::new(b.build().unwrap());
        (Gateway::new(rt.clone()), rt)
    }

    #[test]
    fn test_lookup_function_and_scope() {
        let (gw, _rt) = gateway();
        let Entity::Scope(geo) = gw.lookup(ScopeId::GLOBAL, "geo").unwrap() else {
            panic!("expected namespace");
        };
        match gw.lookup(geo, "area").unwrap() {
            Entity::Function(set) => {
                assert_eq!(set.qualified_name(), "geo::area");
                assert_eq!(set.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_entity_names_scope() {
        let (gw, _rt) = gateway();
        let geo = gw.find_scope("geo").unwrap();
        match gw.lookup(geo, "volume") {
            Err(BridgeError::UnknownEntity { scope, name }) => {
                assert_eq!(scope, "geo");
                assert_eq!(name, "volume");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_miss_retried_after_new_declarations() {
        let (gw, rt) = gateway();
        assert!(gw.try_lookup(ScopeId::GLOBAL, "late").unwrap().is_none());
        rt.declare("late;").unwrap();
        assert!(matches!(
            gw.try_lookup(ScopeId::GLOBAL, "late").unwrap(),
            Some(Entity::Function(_))
        ));
    }

    #[test]
    fn test_member_lookup_searches_bases() {
        let (gw, _rt) = gateway();
        let derived = gw.find_scope("geo::Derived").unwrap();
        let base = gw.find_scope("geo::Base").unwrap();
        let (entity, owner) = gw.lookup_member(derived, "id").unwrap().unwrap();
        assert!(matches!(entity, Entity::Function(_)));
        assert_eq!(owner, base);
        assert!(gw.lookup_member(derived, "missing").unwrap().is_none());
    }

    #[test]
    fn test_overload_set_grows_with_epoch() {
        let (gw, rt) = gateway();
        let first = gw.overloads(ScopeId::GLOBAL, "grow").unwrap();
        assert!(first.is_empty());
        rt.declare("grow;").unwrap();
        assert_eq!(gw.overloads(ScopeId::GLOBAL, "grow").unwrap().len(), 1);
    }
}
