//! Declaring natives for the in-process backend
//!
//! ```ignore
//! let mut b = RuntimeBuilder::new();
//! b.namespace("geo", |ns| {
//!     ns.class("Point", 16, |c| {
//!         c.data("double x", 0).data("double y", 8);
//!         c.method("double norm() const", |f| {
//!             let this = f.this()?;
//!             let (x, y) = (f.ctx.read_f64(this)?, f.ctx.read_f64(this + 8)?);
//!             Ok(NativeValue::Float((x * x + y * y).sqrt()))
//!         });
//!     });
//! });
//! let runtime = b.build()?;
//! ```

use std::sync::Arc;

use bindery_sdk::{
    encode_builtin, encode_pointer, normalize_name, Address, EnumDecl, NativeCallContext,
    NativeError, NativeResult, NativeThrow, NativeValue, ScopeId, ScopeKind, TypeSpec,
};
use rustc_hash::FxHashMap;

use super::arena::Arena;
use super::proto::{parse_params, parse_prototype, Prototype};
use super::registry::{ClassInstantiator, FunctionInstantiator, NativeBody, Registry};
use super::InProcessRuntime;

/// Hook compiling source text passed to `declare`
pub type DeclareHook = Arc<dyn Fn(&mut ScopeBuilder<'_>, &str) -> Result<(), String> + Send + Sync>;

/// Defines the contents of a named in-process library
pub type LibraryDefiner = Arc<dyn Fn(&mut ScopeBuilder<'_>) + Send + Sync>;

// ============================================================================
// Call frames
// ============================================================================

/// What a native body sees when it runs
pub struct NativeFrame<'a> {
    /// Backend operations
    pub ctx: &'a dyn NativeCallContext,
    /// Object the method was called on
    pub this: Option<Address>,
    /// Arguments, in declaration order (trailing defaulted ones may be absent)
    pub args: &'a [NativeValue],
}

impl<'a> NativeFrame<'a> {
    fn bad_arg(&self, index: usize, expected: &str) -> NativeThrow {
        let got = self
            .args
            .get(index)
            .map(|a| a.type_name())
            .unwrap_or("nothing");
        NativeThrow::native(
            "std::invalid_argument",
            format!("argument {} must be {}, got {}", index, expected, got),
        )
    }

    /// The `this` pointer
    pub fn this(&self) -> Result<Address, NativeThrow> {
        self.this
            .ok_or_else(|| NativeThrow::runtime_error("method called without an object"))
    }

    /// Raw argument
    pub fn arg(&self, index: usize) -> Result<&NativeValue, NativeThrow> {
        self.args.get(index).ok_or_else(|| self.bad_arg(index, "present"))
    }

    /// Check if an argument was passed
    pub fn has_arg(&self, index: usize) -> bool {
        index < self.args.len()
    }

    /// Integer argument
    pub fn int(&self, index: usize) -> Result<i64, NativeThrow> {
        self.arg(index)?
            .as_i64()
            .ok_or_else(|| self.bad_arg(index, "an integer"))
    }

    /// Integer argument with a default
    pub fn int_or(&self, index: usize, default: i64) -> Result<i64, NativeThrow> {
        if self.has_arg(index) {
            self.int(index)
        } else {
            Ok(default)
        }
    }

    /// Floating point argument
    pub fn float(&self, index: usize) -> Result<f64, NativeThrow> {
        self.arg(index)?
            .as_f64()
            .ok_or_else(|| self.bad_arg(index, "a number"))
    }

    /// Boolean argument
    pub fn bool(&self, index: usize) -> Result<bool, NativeThrow> {
        self.arg(index)?
            .as_bool()
            .ok_or_else(|| self.bad_arg(index, "a bool"))
    }

    /// String argument
    pub fn str(&self, index: usize) -> Result<&str, NativeThrow> {
        self.arg(index)?
            .as_str()
            .ok_or_else(|| self.bad_arg(index, "a string"))
    }

    /// Pointer argument (also accepts smart pointers)
    pub fn ptr(&self, index: usize) -> Result<Address, NativeThrow> {
        match self.arg(index)? {
            NativeValue::Ptr(a) | NativeValue::Object(a) => Ok(*a),
            NativeValue::Smart { pointee, .. } => Ok(*pointee),
            _ => Err(self.bad_arg(index, "a pointer")),
        }
    }
}

// ============================================================================
// Scope builder
// ============================================================================

/// Declares the contents of one namespace or class
pub struct ScopeBuilder<'r> {
    reg: &'r mut Registry,
    arena: &'r Arena,
    scope: ScopeId,
    error: &'r mut Option<NativeError>,
}

impl<'r> ScopeBuilder<'r> {
    pub(crate) fn new(
        reg: &'r mut Registry,
        arena: &'r Arena,
        scope: ScopeId,
        error: &'r mut Option<NativeError>,
    ) -> Self {
        Self {
            reg,
            arena,
            scope,
            error,
        }
    }

    fn fail(&mut self, err: NativeError) {
        if self.error.is_none() {
            *self.error = Some(err);
        }
    }

    fn check<T>(&mut self, result: NativeResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn child<F>(&mut self, id: ScopeId, f: F)
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        let mut child = ScopeBuilder {
            reg: &mut *self.reg,
            arena: self.arena,
            scope: id,
            error: &mut *self.error,
        };
        f(&mut child);
    }

    /// Scope being declared
    pub fn id(&self) -> ScopeId {
        self.scope
    }

    /// Qualified name of the scope being declared
    pub fn qualified_name(&self) -> String {
        self.reg
            .scope(self.scope)
            .map(|s| s.info.qualified_name.clone())
            .unwrap_or_default()
    }

    /// Declare (or reopen) a nested namespace
    pub fn namespace<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        let result = self.reg.add_scope(self.scope, name, ScopeKind::Namespace, 0);
        if let Some(id) = self.check(result) {
            self.child(id, f);
        }
        self
    }

    /// Declare a class with the given instance size
    pub fn class<F>(&mut self, name: &str, size: usize, f: F) -> &mut Self
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        let result = self.reg.add_scope(self.scope, name, ScopeKind::Class, size);
        if let Some(id) = self.check(result) {
            self.child(id, f);
            let finished = self.reg.finish_class(id);
            self.check(finished);
        }
        self
    }

    /// Add a base class at offset 0
    pub fn base(&mut self, name: &str) -> &mut Self {
        self.base_at(name, 0)
    }

    /// Add a base class at the given sub-object offset
    pub fn base_at(&mut self, name: &str, offset: usize) -> &mut Self {
        match self.reg.resolve_scope_name(self.scope, name) {
            Some(base) => {
                let result = self.reg.add_base(self.scope, base, offset);
                self.check(result);
            }
            None => self.fail(NativeError::TypeParse(format!("unknown base class {}", name))),
        }
        self
    }

    fn add_function(
        &mut self,
        proto: &str,
        body: Option<NativeBody>,
        instantiator: Option<FunctionInstantiator>,
    ) {
        let parsed = parse_prototype(proto);
        if let Some(parsed) = self.check(parsed) {
            let result = self.reg.add_method(self.scope, parsed, false, body, instantiator);
            self.check(result);
        }
    }

    /// Declare a free function (in a namespace) or a method (in a class)
    pub fn function<F>(&mut self, proto: &str, body: F) -> &mut Self
    where
        F: Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync + 'static,
    {
        self.add_function(proto, Some(Arc::new(body)), None);
        self
    }

    /// Declare a method; alias of [`function`](Self::function) that reads
    /// better inside classes
    pub fn method<F>(&mut self, proto: &str, body: F) -> &mut Self
    where
        F: Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync + 'static,
    {
        self.function(proto, body)
    }

    /// Declare a pure virtual method (`virtual R f(...) = 0`)
    pub fn pure_virtual(&mut self, proto: &str) -> &mut Self {
        let proto = if proto.trim_end().ends_with("= 0") {
            proto.to_string()
        } else {
            format!("{} = 0", proto)
        };
        self.add_function(&proto, None, None);
        self
    }

    /// Declare a constructor with the given parameter list
    pub fn constructor<F>(&mut self, params: &str, body: F) -> &mut Self
    where
        F: Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync + 'static,
    {
        let (params, is_variadic) = parse_params(params);
        let proto = Prototype {
            name: String::new(),
            return_type: "void".to_string(),
            params,
            is_static: false,
            is_virtual: false,
            is_const: false,
            is_pure: false,
            is_variadic,
            template: None,
        };
        let result = self
            .reg
            .add_method(self.scope, proto, true, Some(Arc::new(body)), None);
        self.check(result);
        self
    }

    /// Declare the destructor
    pub fn destructor<F>(&mut self, body: F) -> &mut Self
    where
        F: Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync + 'static,
    {
        let result = self.reg.scope_mut(self.scope).map(|def| {
            def.dtor = Some(Arc::new(body));
        });
        self.check(result);
        self
    }

    fn parse_decl(&mut self, decl: &str) -> Option<(String, String, bool)> {
        let (params, _) = parse_params(decl);
        match params.into_iter().next() {
            Some(p) if !p.name.is_empty() => {
                let is_const = TypeSpec::parse(&p.ty)
                    .map(|s| s.is_const && s.pointers == 0)
                    .unwrap_or(false);
                Some((p.name, p.ty, is_const))
            }
            _ => {
                self.fail(NativeError::TypeParse(format!("bad declaration: {}", decl)));
                None
            }
        }
    }

    /// Declare an instance data member at a byte offset
    /// (`"const int m_const"`, `"double m_array[4]"`)
    pub fn data(&mut self, decl: &str, offset: usize) -> &mut Self {
        if let Some((name, ty, is_const)) = self.parse_decl(decl) {
            let result = self.reg.scope_mut(self.scope).map(|def| {
                def.data.insert(
                    name.clone(),
                    bindery_sdk::DataMember {
                        name: name.clone(),
                        ty,
                        offset,
                        is_const,
                        address: None,
                    },
                );
                if !def.order.contains(&name) {
                    def.order.push(name);
                }
            });
            self.check(result);
        }
        self
    }

    /// Declare a static data member (or namespace variable) with storage
    /// initialised to `initial`; returns the storage address
    pub fn static_data(&mut self, decl: &str, initial: NativeValue) -> Address {
        let Some((name, ty, is_const)) = self.parse_decl(decl) else {
            return 0;
        };
        let qualified = self.reg.qualify_type(self.scope, &ty);
        let size = self.reg.type_size(&qualified).unwrap_or(8);
        let Some(address) = ({
            let allocated = self.arena.allocate(size);
            self.check(allocated)
        }) else {
            return 0;
        };
        let bytes = match TypeSpec::parse(&qualified) {
            Ok(spec) if spec.pointers > 0 => Ok(encode_pointer(initial.as_u64().unwrap_or(0)).to_vec()),
            Ok(spec) if spec.is_value() => match spec.builtin() {
                Some(kind) => encode_builtin(kind, &initial),
                None => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        };
        if let Some(bytes) = self.check(bytes) {
            if !bytes.is_empty() {
                let written = self.arena.write(address, &bytes);
                self.check(written);
            }
        }
        let result = self.reg.scope_mut(self.scope).map(|def| {
            def.data.insert(
                name.clone(),
                bindery_sdk::DataMember {
                    name: name.clone(),
                    ty,
                    offset: 0,
                    is_const,
                    address: Some(address),
                },
            );
            if !def.order.contains(&name) {
                def.order.push(name);
            }
        });
        self.check(result);
        address
    }

    /// Declare an enum; unscoped enumerators are also visible in this scope
    pub fn enumeration(
        &mut self,
        name: &str,
        underlying: &str,
        scoped: bool,
        values: &[(&str, i64)],
    ) -> &mut Self {
        let qualified_name = self.reg.qualify(self.scope, name);
        let decl = EnumDecl {
            name: name.to_string(),
            qualified_name: qualified_name.clone(),
            underlying: normalize_name(underlying),
            scoped,
            values: values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        };
        let result = self.reg.scope_mut(self.scope).map(|def| {
            def.enums.insert(name.to_string(), decl);
            if !def.order.iter().any(|n| n == name) {
                def.order.push(name.to_string());
            }
            if !scoped {
                for (n, v) in values {
                    def.enumerators
                        .insert(n.to_string(), (qualified_name.clone(), *v));
                    def.order.push(n.to_string());
                }
            }
        });
        self.check(result);
        self
    }

    /// Declare a typedef
    pub fn typedef(&mut self, alias: &str, target: &str) -> &mut Self {
        let target = self.reg.qualify_type(self.scope, target);
        let result = self.reg.scope_mut(self.scope).map(|def| {
            def.typedefs.insert(normalize_name(alias), target);
        });
        self.check(result);
        self
    }

    /// Declare a function template; `instantiate` produces the body for
    /// a list of template arguments
    pub fn function_template<F>(&mut self, proto: &str, instantiate: F) -> &mut Self
    where
        F: Fn(&[String]) -> Option<NativeBody> + Send + Sync + 'static,
    {
        self.add_function(proto, None, Some(Arc::new(instantiate)));
        self
    }

    /// Declare a class template; `instantiate` declares the members of
    /// `name<args...>`
    pub fn class_template<F>(&mut self, name: &str, instantiate: F) -> &mut Self
    where
        F: Fn(&mut ScopeBuilder<'_>, &[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        let instantiate: ClassInstantiator = Arc::new(instantiate);
        let result = self.reg.scope_mut(self.scope).map(|def| {
            def.class_templates.insert(name.to_string(), instantiate);
            if !def.order.iter().any(|n| n == name) {
                def.order.push(name.to_string());
            }
        });
        self.check(result);
        self
    }

    /// Set the instance size of the class being declared
    pub fn size(&mut self, size: usize) -> &mut Self {
        let result = self.reg.scope_mut(self.scope).map(|def| def.info.size = size);
        self.check(result);
        self
    }
}

/// Wrap a closure as a native body (for template instantiators)
pub fn body<F>(f: F) -> NativeBody
where
    F: Fn(&NativeFrame<'_>) -> Result<NativeValue, NativeThrow> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ============================================================================
// Runtime builder
// ============================================================================

/// Builds an [`InProcessRuntime`]
pub struct RuntimeBuilder {
    pub(crate) registry: Registry,
    pub(crate) arena: Arena,
    pub(crate) error: Option<NativeError>,
    pub(crate) libraries: FxHashMap<String, LibraryDefiner>,
    pub(crate) declare_hook: Option<DeclareHook>,
}

impl RuntimeBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            arena: Arena::new(),
            error: None,
            libraries: FxHashMap::default(),
            declare_hook: None,
        }
    }

    /// Declare into the global namespace
    pub fn global<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        let mut b = ScopeBuilder::new(
            &mut self.registry,
            &self.arena,
            ScopeId::GLOBAL,
            &mut self.error,
        );
        f(&mut b);
        self
    }

    /// Declare a namespace at global scope
    pub fn namespace<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        self.global(|g| {
            g.namespace(name, f);
        })
    }

    /// Declare a class at global scope
    pub fn class<F>(&mut self, name: &str, size: usize, f: F) -> &mut Self
    where
        F: FnOnce(&mut ScopeBuilder<'_>),
    {
        self.global(|g| {
            g.class(name, size, f);
        })
    }

    /// Register a named library whose contents are declared when it is
    /// loaded (directly or through an autoload map)
    pub fn library<F>(&mut self, name: &str, define: F) -> &mut Self
    where
        F: Fn(&mut ScopeBuilder<'_>) + Send + Sync + 'static,
    {
        self.libraries.insert(name.to_string(), Arc::new(define));
        self
    }

    /// Install the hook compiling source text passed to `declare`
    pub fn on_declare<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut ScopeBuilder<'_>, &str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.declare_hook = Some(Arc::new(hook));
        self
    }

    /// Add the `std` declarations (`std::vector<T>` for builtin `T`)
    pub fn stdlib(&mut self) -> &mut Self {
        super::stdlib::install(self);
        self
    }

    /// Finish building; fails with the first declaration error
    pub fn build(self) -> NativeResult<InProcessRuntime> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(InProcessRuntime::from_parts(
            self.registry,
            self.arena,
            self.libraries,
            self.declare_hook,
        ))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
