//! Scope and method tables of the in-process backend

use std::sync::Arc;

use bindery_sdk::{
    normalize_name, BaseInfo, Builtin, DataMember, EntityDecl, EnumDecl, MethodId,
    NativeError, NativeResult, NativeThrow, NativeValue, Param, ScopeId, ScopeInfo, ScopeKind,
    Signature, TypeSpec, VirtualMethod, POINTER_SIZE,
};
use rustc_hash::FxHashMap;

use super::builder::{NativeFrame, ScopeBuilder};
use super::proto::{substitute, Prototype};

/// Body of a native function
pub type NativeBody =
    Arc<dyn Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync>;

/// Produces the body of a function template instantiation, or None if the
/// template cannot be instantiated with the given arguments
pub type FunctionInstantiator = Arc<dyn Fn(&[String]) -> Option<NativeBody> + Send + Sync>;

/// Defines the members of a class template instantiation
pub type ClassInstantiator =
    Arc<dyn Fn(&mut ScopeBuilder<'_>, &[String]) -> Result<(), String> + Send + Sync>;

pub(crate) struct MethodDef {
    pub sig: Signature,
    pub body: Option<NativeBody>,
    pub instantiator: Option<FunctionInstantiator>,
}

pub(crate) struct ScopeDef {
    pub info: ScopeInfo,
    pub order: Vec<String>,
    pub children: FxHashMap<String, ScopeId>,
    pub methods: FxHashMap<String, Vec<MethodId>>,
    pub ctors: Vec<MethodId>,
    pub dtor: Option<NativeBody>,
    pub data: FxHashMap<String, DataMember>,
    pub enums: FxHashMap<String, EnumDecl>,
    pub enumerators: FxHashMap<String, (String, i64)>,
    pub class_templates: FxHashMap<String, ClassInstantiator>,
    pub typedefs: FxHashMap<String, String>,
}

impl ScopeDef {
    fn new(info: ScopeInfo) -> Self {
        Self {
            info,
            order: Vec::new(),
            children: FxHashMap::default(),
            methods: FxHashMap::default(),
            ctors: Vec::new(),
            dtor: None,
            data: FxHashMap::default(),
            enums: FxHashMap::default(),
            enumerators: FxHashMap::default(),
            class_templates: FxHashMap::default(),
            typedefs: FxHashMap::default(),
        }
    }

    fn note(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }
}

pub(crate) struct Registry {
    pub scopes: Vec<ScopeDef>,
    pub by_name: FxHashMap<String, ScopeId>,
    pub methods: Vec<MethodDef>,
    pub instantiated: FxHashMap<(MethodId, Vec<String>), MethodId>,
}

impl Registry {
    pub fn new() -> Self {
        let global = ScopeInfo {
            id: ScopeId::GLOBAL,
            name: String::new(),
            qualified_name: String::new(),
            kind: ScopeKind::Namespace,
            parent: None,
            size: 0,
            is_abstract: false,
            bases: Vec::new(),
            virtuals: Vec::new(),
        };
        let mut by_name = FxHashMap::default();
        by_name.insert(String::new(), ScopeId::GLOBAL);
        Self {
            scopes: vec![ScopeDef::new(global)],
            by_name,
            methods: Vec::new(),
            instantiated: FxHashMap::default(),
        }
    }

    pub fn scope(&self, id: ScopeId) -> NativeResult<&ScopeDef> {
        self.scopes
            .get(id.0 as usize)
            .ok_or(NativeError::UnknownScope(id.0))
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> NativeResult<&mut ScopeDef> {
        self.scopes
            .get_mut(id.0 as usize)
            .ok_or(NativeError::UnknownScope(id.0))
    }

    pub fn method(&self, id: MethodId) -> NativeResult<&MethodDef> {
        self.methods
            .get(id.0 as usize)
            .ok_or(NativeError::UnknownMethod(id.0))
    }

    pub fn qualify(&self, parent: ScopeId, name: &str) -> String {
        let prefix = self
            .scope(parent)
            .map(|s| s.info.qualified_name.clone())
            .unwrap_or_default();
        if prefix.is_empty() {
            normalize_name(name)
        } else {
            format!("{}::{}", prefix, normalize_name(name))
        }
    }

    /// Create (or reopen) a scope
    pub fn add_scope(
        &mut self,
        parent: ScopeId,
        name: &str,
        kind: ScopeKind,
        size: usize,
    ) -> NativeResult<ScopeId> {
        let name = normalize_name(name);
        if let Some(&existing) = self.scope(parent)?.children.get(&name) {
            return Ok(existing);
        }
        let id = ScopeId(self.scopes.len() as u64);
        let qualified_name = self.qualify(parent, &name);
        self.scopes.push(ScopeDef::new(ScopeInfo {
            id,
            name: name.clone(),
            qualified_name: qualified_name.clone(),
            kind,
            parent: Some(parent),
            size,
            is_abstract: false,
            bases: Vec::new(),
            virtuals: Vec::new(),
        }));
        self.by_name.insert(qualified_name, id);
        let parent_def = self.scope_mut(parent)?;
        parent_def.children.insert(name.clone(), id);
        parent_def.note(&name);
        Ok(id)
    }

    pub fn add_method(
        &mut self,
        scope: ScopeId,
        proto: Prototype,
        is_constructor: bool,
        body: Option<NativeBody>,
        instantiator: Option<FunctionInstantiator>,
    ) -> NativeResult<MethodId> {
        let id = MethodId(self.methods.len() as u64);
        let def = self.scope(scope)?;
        let is_namespace = def.info.kind == ScopeKind::Namespace;
        let sig = Signature {
            id,
            scope,
            scope_name: def.info.qualified_name.clone(),
            name: if is_constructor {
                def.info.name.clone()
            } else {
                proto.name.clone()
            },
            return_type: proto.return_type,
            params: proto.params,
            is_static: proto.is_static || is_namespace,
            is_const: proto.is_const,
            is_virtual: proto.is_virtual,
            is_constructor,
            is_variadic: proto.is_variadic,
            template: proto.template,
        };
        self.methods.push(MethodDef {
            sig,
            body,
            instantiator,
        });
        let def = self.scope_mut(scope)?;
        if is_constructor {
            def.ctors.push(id);
        } else {
            def.methods.entry(proto.name.clone()).or_default().push(id);
            def.note(&proto.name);
        }
        Ok(id)
    }

    /// Resolve `name` as seen from `from`, walking out through enclosing scopes
    pub fn resolve_scope_name(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let name = normalize_name(name.trim_start_matches("::"));
        let mut cursor = Some(from);
        while let Some(scope) = cursor {
            let candidate = self.qualify(scope, &name);
            if let Some(&id) = self.by_name.get(&candidate) {
                return Some(id);
            }
            cursor = self.scope(scope).ok().and_then(|s| s.info.parent);
        }
        None
    }

    /// Find an enum or typedef by name as seen from `from`; returns the
    /// qualified enum name or the typedef target
    fn resolve_alias(&self, from: ScopeId, name: &str) -> Option<(String, bool)> {
        let name = normalize_name(name.trim_start_matches("::"));
        let (head, leaf) = match name.rfind("::") {
            Some(idx) => (Some(&name[..idx]), &name[idx + 2..]),
            None => (None, name.as_str()),
        };
        let mut cursor = Some(from);
        while let Some(scope) = cursor {
            let owner = match head {
                Some(h) => self.resolve_scope_name(scope, h),
                None => Some(scope),
            };
            if let Some(def) = owner.and_then(|o| self.scope(o).ok()) {
                if let Some(e) = def.enums.get(leaf) {
                    return Some((e.qualified_name.clone(), true));
                }
                if let Some(target) = def.typedefs.get(leaf) {
                    return Some((target.clone(), false));
                }
            }
            if head.is_some() {
                break;
            }
            cursor = self.scope(scope).ok().and_then(|s| s.info.parent);
        }
        None
    }

    /// Qualify the class, enum and typedef names in a type as seen from `from`
    pub fn qualify_type(&self, from: ScopeId, ty: &str) -> String {
        let Ok(mut spec) = TypeSpec::parse(ty) else {
            return ty.to_string();
        };
        spec.base = self.qualify_base(from, &spec.base);
        spec.to_string()
    }

    fn qualify_base(&self, from: ScopeId, base: &str) -> String {
        if Builtin::from_name(base).is_some() {
            return base.to_string();
        }
        if let Some(open) = base.find('<') {
            if base.ends_with('>') {
                let head = self.qualify_base(from, &base[..open]);
                let args = bindery_sdk::split_template_args(&base[open + 1..base.len() - 1])
                    .iter()
                    .map(|a| self.qualify_type(from, a))
                    .collect::<Vec<_>>()
                    .join(",");
                return format!("{}<{}>", head, args);
            }
        }
        if let Some(id) = self.resolve_scope_name(from, base) {
            return self.scope(id).map(|s| s.info.qualified_name.clone()).unwrap_or_default();
        }
        if let Some(template) = self.resolve_class_template(from, base) {
            return template;
        }
        match self.resolve_alias(from, base) {
            Some((target, _)) => target,
            None => base.to_string(),
        }
    }

    fn resolve_class_template(&self, from: ScopeId, name: &str) -> Option<String> {
        let mut cursor = Some(from);
        while let Some(scope) = cursor {
            let def = self.scope(scope).ok()?;
            if def.class_templates.contains_key(name) {
                return Some(self.qualify(scope, name));
            }
            cursor = def.info.parent;
        }
        None
    }

    /// Signature with its types qualified for the caller
    pub fn public_signature(&self, id: MethodId) -> NativeResult<Signature> {
        let def = self.method(id)?;
        let mut sig = def.sig.clone();
        if sig.template.is_none() {
            sig.return_type = self.qualify_type(sig.scope, &sig.return_type);
            for param in &mut sig.params {
                param.ty = self.qualify_type(sig.scope, &param.ty);
            }
        }
        Ok(sig)
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> NativeResult<Option<EntityDecl>> {
        let def = self.scope(scope)?;
        let name = normalize_name(name);
        if let Some(&child) = def.children.get(&name) {
            return Ok(Some(EntityDecl::Scope(child)));
        }
        if def.methods.get(&name).is_some_and(|m| !m.is_empty()) {
            return Ok(Some(EntityDecl::Function));
        }
        if let Some(member) = def.data.get(&name) {
            let mut member = member.clone();
            member.ty = self.qualify_type(scope, &member.ty);
            return Ok(Some(EntityDecl::DataMember(member)));
        }
        if let Some(e) = def.enums.get(&name) {
            return Ok(Some(EntityDecl::Enum(e.clone())));
        }
        if let Some((enum_name, value)) = def.enumerators.get(&name) {
            return Ok(Some(EntityDecl::Enumerator {
                enum_name: enum_name.clone(),
                value: *value,
            }));
        }
        if def.class_templates.contains_key(&name) {
            return Ok(Some(EntityDecl::ClassTemplate));
        }
        if let Some(target) = def.typedefs.get(&name) {
            if let Some(id) = self.by_name.get(target) {
                return Ok(Some(EntityDecl::Scope(*id)));
            }
        }
        Ok(None)
    }

    pub fn canonical_type(&self, name: &str) -> Option<String> {
        let normalized = normalize_name(name);
        let mut current = self.resolve_alias(ScopeId::GLOBAL, &normalized)?;
        // typedef chains
        for _ in 0..16 {
            if current.1 {
                break;
            }
            match self.resolve_alias(ScopeId::GLOBAL, &current.0) {
                Some(next) if next.0 != current.0 => current = next,
                _ => break,
            }
        }
        Some(current.0)
    }

    pub fn type_size(&self, ty: &str) -> Option<usize> {
        let spec = TypeSpec::parse(ty).ok()?;
        let unit = if spec.pointers > 0 || spec.is_reference() {
            POINTER_SIZE
        } else if let Some(b) = spec.builtin() {
            b.size()
        } else if let Some(&id) = self.by_name.get(&spec.base) {
            self.scope(id).ok()?.info.size
        } else if spec.base == "std::string" {
            32
        } else if let Some(canonical) = self.canonical_type(&spec.base) {
            if let Some(e) = self.find_enum(&canonical) {
                Builtin::from_name(&e.underlying)?.size()
            } else {
                return self.type_size(&canonical);
            }
        } else {
            return None;
        };
        Some(match (spec.array, spec.pointers > 0 || spec.is_reference()) {
            (Some(bindery_sdk::ArrayExtent::Fixed(n)), false) => unit * n,
            _ => unit,
        })
    }

    pub fn find_enum(&self, qualified: &str) -> Option<&EnumDecl> {
        let (head, leaf) = match qualified.rfind("::") {
            Some(idx) => (&qualified[..idx], &qualified[idx + 2..]),
            None => ("", qualified),
        };
        let id = self.by_name.get(head)?;
        self.scope(*id).ok()?.enums.get(leaf)
    }

    // ========================================================================
    // Inheritance
    // ========================================================================

    pub fn is_subclass(&self, derived: ScopeId, base: ScopeId) -> bool {
        self.base_offset(derived, base).is_some()
    }

    pub fn base_offset(&self, derived: ScopeId, base: ScopeId) -> Option<usize> {
        if derived == base {
            return Some(0);
        }
        let def = self.scope(derived).ok()?;
        def.info.bases.iter().find_map(|b| {
            self.base_offset(b.scope, base)
                .map(|inner| b.offset + inner)
        })
    }

    /// Find the implementation of `name` for an object of type `scope`,
    /// searching bases depth-first. Overloads whose parameter types fit the
    /// argument values win over ones that only fit the argument count.
    /// Returns the method and the offset of its declaring sub-object.
    pub fn find_impl(
        &self,
        scope: ScopeId,
        name: &str,
        args: &[NativeValue],
    ) -> Option<(MethodId, usize)> {
        self.find_impl_where(scope, name, &|sig| sig.accepts_native(args))
            .or_else(|| {
                self.find_impl_where(scope, name, &|sig| {
                    args.len() >= sig.required_args()
                        && sig.max_args().map_or(true, |max| args.len() <= max)
                })
            })
    }

    fn find_impl_where(
        &self,
        scope: ScopeId,
        name: &str,
        fits: &dyn Fn(&Signature) -> bool,
    ) -> Option<(MethodId, usize)> {
        let def = self.scope(scope).ok()?;
        if let Some(ids) = def.methods.get(name) {
            for id in ids {
                let m = self.method(*id).ok()?;
                if m.body.is_some() && fits(&m.sig) {
                    return Some((*id, 0));
                }
            }
        }
        def.info.bases.iter().find_map(|b| {
            self.find_impl_where(b.scope, name, fits)
                .map(|(id, off)| (id, b.offset + off))
        })
    }

    /// Compute inherited virtual slots and abstractness; add the implicit
    /// default constructor if none was declared.
    pub fn finish_class(&mut self, scope: ScopeId) -> NativeResult<()> {
        let mut virtuals: Vec<VirtualMethod> = Vec::new();
        let bases = self.scope(scope)?.info.bases.clone();
        for base in &bases {
            for v in &self.scope(base.scope)?.info.virtuals {
                if !virtuals.iter().any(|x| x.name == v.name) {
                    virtuals.push(v.clone());
                }
            }
        }
        let def = self.scope(scope)?;
        let mut own: Vec<(String, bool, bool)> = Vec::new();
        for (name, ids) in &def.methods {
            for id in ids {
                let m = self.method(*id)?;
                own.push((name.clone(), m.sig.is_virtual, m.body.is_none() && m.sig.template.is_none()));
            }
        }
        for (name, is_virtual, is_pure) in own {
            match virtuals.iter_mut().find(|v| v.name == name) {
                // an override of an inherited virtual is virtual too
                Some(slot) => slot.is_pure = is_pure,
                None if is_virtual => virtuals.push(VirtualMethod { name, is_pure }),
                None => {}
            }
        }
        let needs_ctor = def.ctors.is_empty();
        let def = self.scope_mut(scope)?;
        def.info.is_abstract = virtuals.iter().any(|v| v.is_pure);
        def.info.virtuals = virtuals;
        if needs_ctor {
            let proto = Prototype {
                name: String::new(),
                return_type: "void".to_string(),
                params: Vec::new(),
                is_static: false,
                is_virtual: false,
                is_const: false,
                is_pure: false,
                is_variadic: false,
                template: None,
            };
            let body: NativeBody = Arc::new(|_| Ok(NativeValue::Void));
            self.add_method(scope, proto, true, Some(body), None)?;
        }
        Ok(())
    }

    pub fn add_base(&mut self, scope: ScopeId, base: ScopeId, offset: usize) -> NativeResult<()> {
        self.scope(base)?;
        self.scope_mut(scope)?.info.bases.push(BaseInfo { scope: base, offset });
        Ok(())
    }

    // ========================================================================
    // Function templates
    // ========================================================================

    /// Instantiate the function template `template` with `args`
    pub fn instantiate(&mut self, template: MethodId, args: &[String]) -> NativeResult<MethodId> {
        if let Some(&id) = self.instantiated.get(&(template, args.to_vec())) {
            return Ok(id);
        }
        let def = self.method(template)?;
        let params = def
            .sig
            .template
            .clone()
            .ok_or_else(|| NativeError::Instantiation(format!("{} is not a template", def.sig.name)))?;
        let fixed = if params.variadic {
            params.names.len().saturating_sub(1)
        } else {
            params.names.len()
        };
        if args.len() < fixed || (!params.variadic && args.len() != fixed) {
            return Err(NativeError::Instantiation(format!(
                "{} expects {} template arguments, got {}",
                def.sig.name,
                params.names.len(),
                args.len()
            )));
        }
        let instantiator = def
            .instantiator
            .clone()
            .ok_or_else(|| NativeError::Instantiation(def.sig.name.clone()))?;
        let body = instantiator(args).ok_or_else(|| {
            NativeError::Instantiation(format!(
                "no instantiation of {} for <{}>",
                def.sig.name,
                args.join(", ")
            ))
        })?;

        let pack_name = params.variadic.then(|| params.names.last().cloned()).flatten();
        let pack_args: Vec<String> = args[fixed.min(args.len())..].to_vec();
        let mut new_params: Vec<Param> = Vec::new();
        for p in &def.sig.params {
            let is_pack = pack_name
                .as_ref()
                .is_some_and(|pack| p.ty.contains("...") && p.ty.contains(pack.as_str()));
            if is_pack {
                for (i, arg) in pack_args.iter().enumerate() {
                    let ty = substitute(&p.ty.replace("...", ""), &[pack_name.clone().unwrap_or_default()], &[arg.clone()]);
                    new_params.push(Param::new(&format!("{}{}", p.name, i), ty.trim()));
                }
            } else {
                let mut q = p.clone();
                q.ty = substitute(&p.ty, &params.names, args);
                new_params.push(q);
            }
        }
        let name = format!("{}<{}>", def.sig.name, args.join(","));
        let return_type = substitute(&def.sig.return_type, &params.names, args);
        let scope = def.sig.scope;
        let is_static = def.sig.is_static;
        let is_const = def.sig.is_const;

        let id = MethodId(self.methods.len() as u64);
        let sig = Signature {
            id,
            scope,
            scope_name: self.scope(scope)?.info.qualified_name.clone(),
            name,
            return_type,
            params: new_params,
            is_static,
            is_const,
            is_virtual: false,
            is_constructor: false,
            is_variadic: false,
            template: None,
        };
        self.methods.push(MethodDef {
            sig,
            body: Some(body),
            instantiator: None,
        });
        self.instantiated.insert((template, args.to_vec()), id);
        Ok(id)
    }
}
