//! In-process native backend
//!
//! Natives are declared in Rust through [`RuntimeBuilder`]: namespaces,
//! classes with a byte layout, functions whose bodies are closures, data
//! members at offsets, enums, typedefs and templates. All native memory
//! lives in an [`Arena`](arena::Arena), so every access is bounds checked.
//!
//! The runtime also serves as the backend for dynamic reflection
//! libraries: a shared library exporting `bindery_reflection_init` hands
//! its declarations to the `declare` hook.

mod arena;
mod builder;
mod proto;
mod registry;
mod stdlib;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bindery_sdk::{
    normalize_name, Address, EntityDecl, MethodId, NativeCallContext, NativeError, NativeResult,
    NativeRuntime, NativeThrow, NativeValue, ReverseDispatch, ScopeId, ScopeInfo, ScopeKind,
    Signature, TypeSpec,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::loader::Library;

pub use builder::{body, DeclareHook, LibraryDefiner, NativeFrame, RuntimeBuilder, ScopeBuilder};
pub use registry::{ClassInstantiator, FunctionInstantiator, NativeBody};

use arena::Arena;
use registry::Registry;

// ============================================================================
// Shared pointers
// ============================================================================

struct SmartBlock {
    class: ScopeId,
    pointee: Address,
    count: usize,
}

#[derive(Default)]
struct SmartTable {
    next_handle: u64,
    next_block: u64,
    handles: FxHashMap<u64, u64>,
    blocks: FxHashMap<u64, SmartBlock>,
}

impl SmartTable {
    fn issue(&mut self, block: u64) -> u64 {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, block);
        self.next_handle
    }

    fn block_of(&self, handle: u64) -> NativeResult<u64> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or_else(|| NativeError::Memory(format!("invalid smart pointer handle {}", handle)))
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// [`NativeRuntime`] whose natives are written in Rust
pub struct InProcessRuntime {
    registry: RwLock<Registry>,
    arena: Arena,
    /// Start address -> most-derived class of every constructed object
    objects: Mutex<BTreeMap<Address, ScopeId>>,
    smart: Mutex<SmartTable>,
    dispatcher: RwLock<Option<Arc<dyn ReverseDispatch>>>,
    epoch: AtomicU64,
    include_paths: RwLock<Vec<PathBuf>>,
    libraries: FxHashMap<String, LibraryDefiner>,
    loaded: Mutex<FxHashSet<String>>,
    autoload_map: RwLock<FxHashMap<String, PathBuf>>,
    pending: Mutex<Vec<String>>,
    declare_hook: Option<DeclareHook>,
    dynamic: Mutex<Vec<Library>>,
}

impl InProcessRuntime {
    /// Start declaring natives
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn from_parts(
        registry: Registry,
        arena: Arena,
        libraries: FxHashMap<String, LibraryDefiner>,
        declare_hook: Option<DeclareHook>,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            arena,
            objects: Mutex::new(BTreeMap::new()),
            smart: Mutex::new(SmartTable::default()),
            dispatcher: RwLock::new(None),
            epoch: AtomicU64::new(0),
            include_paths: RwLock::new(Vec::new()),
            libraries,
            loaded: Mutex::new(FxHashSet::default()),
            autoload_map: RwLock::new(FxHashMap::default()),
            pending: Mutex::new(Vec::new()),
            declare_hook,
            dynamic: Mutex::new(Vec::new()),
        }
    }

    /// Queue source text to be compiled by the next lookup
    pub fn declare_deferred(&self, source: &str) {
        self.pending.lock().push(source.to_string());
    }

    /// Number of constructed objects not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.objects.lock().len()
    }

    /// Bytes of native memory currently allocated
    pub fn live_bytes(&self) -> usize {
        self.arena.live_bytes()
    }

    /// Native allocations currently live
    pub fn live_blocks(&self) -> usize {
        self.arena.live_blocks()
    }

    /// Run `f` against the global scope under the registry write lock
    fn define<F>(&self, f: F) -> NativeResult<()>
    where
        F: FnOnce(&mut ScopeBuilder<'_>) -> Result<(), String>,
    {
        let mut error = None;
        let result = {
            let mut reg = self.registry.write();
            let mut b = ScopeBuilder::new(&mut reg, &self.arena, ScopeId::GLOBAL, &mut error);
            f(&mut b)
        };
        self.epoch.fetch_add(1, Ordering::SeqCst);
        result.map_err(NativeError::Compilation)?;
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn compile(&self, source: &str) -> NativeResult<()> {
        let hook = self
            .declare_hook
            .clone()
            .ok_or_else(|| NativeError::Compilation("no declaration compiler installed".to_string()))?;
        self.define(|b| hook(b, source)).map_err(|e| match e {
            NativeError::Compilation(msg) => NativeError::Compilation(msg),
            other => NativeError::Compilation(other.to_string()),
        })
    }

    fn compile_pending(&self) -> NativeResult<()> {
        let pending: Vec<String> = std::mem::take(&mut *self.pending.lock());
        for source in pending {
            self.compile(&source)?;
        }
        Ok(())
    }

    fn find_include(&self, header: &str) -> Option<PathBuf> {
        let direct = Path::new(header);
        if direct.is_absolute() && direct.is_file() {
            return Some(direct.to_path_buf());
        }
        self.include_paths
            .read()
            .iter()
            .map(|dir| dir.join(header))
            .find(|p| p.is_file())
    }

    fn library_key(&self, path: &Path) -> Option<String> {
        let full = path.to_string_lossy().to_string();
        if self.libraries.contains_key(&full) {
            return Some(full);
        }
        let file = path.file_name()?.to_string_lossy().to_string();
        if self.libraries.contains_key(&file) {
            return Some(file);
        }
        let stem = path.file_stem()?.to_string_lossy().to_string();
        self.libraries.contains_key(&stem).then_some(stem)
    }

    fn signatures(&self, ids: &[MethodId]) -> Vec<Signature> {
        let reg = self.registry.read();
        ids.iter()
            .filter_map(|id| reg.public_signature(*id).ok())
            .collect()
    }

    /// Object containing `address`: its start and most-derived class
    fn containing_object(&self, address: Address) -> Option<(Address, ScopeId)> {
        let objects = self.objects.lock();
        let (&start, &scope) = objects.range(..=address).next_back()?;
        let size = self.registry.read().scope(scope).ok()?.info.size as u64;
        (address < start + size.max(1)).then_some((start, scope))
    }

    fn run_body(
        &self,
        body: &NativeBody,
        this: Option<Address>,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow> {
        body(&NativeFrame {
            ctx: self,
            this,
            args,
        })
    }

    /// Run base default constructors, then `ctor`
    fn run_ctor_chain(
        &self,
        scope: ScopeId,
        address: Address,
        ctor: Option<MethodId>,
        args: &[NativeValue],
    ) -> Result<(), NativeThrow> {
        let (bases, body) = {
            let reg = self.registry.read();
            let def = reg.scope(scope)?;
            let body = match ctor {
                Some(id) => reg.method(id)?.body.clone(),
                None => def
                    .ctors
                    .iter()
                    .filter_map(|id| reg.method(*id).ok())
                    .find(|m| m.sig.required_args() == 0)
                    .and_then(|m| m.body.clone()),
            };
            (def.info.bases.clone(), body)
        };
        for base in bases {
            self.run_ctor_chain(base.scope, address + base.offset as u64, None, &[])?;
        }
        if let Some(body) = body {
            self.run_body(&body, Some(address), args)?;
        }
        Ok(())
    }

    /// Run the destructor of `scope`, then those of its bases
    fn run_dtor_chain(&self, scope: ScopeId, address: Address) {
        let (bases, dtor) = {
            let reg = self.registry.read();
            match reg.scope(scope) {
                Ok(def) => (def.info.bases.clone(), def.dtor.clone()),
                Err(_) => return,
            }
        };
        if let Some(dtor) = dtor {
            if let Err(thrown) = self.run_body(&dtor, Some(address), &[]) {
                tracing::warn!(target: "bindery::native", error = %thrown, "destructor threw");
            }
        }
        for base in bases.iter().rev() {
            self.run_dtor_chain(base.scope, address + base.offset as u64);
        }
    }

    fn fits(sig: &Signature, count: usize) -> bool {
        count >= sig.required_args() && sig.max_args().map_or(true, |max| count <= max)
    }

    /// Native virtual dispatch: the most-derived native implementation
    fn call_native_virtual(
        &self,
        this: Address,
        method: &str,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow> {
        let (start, scope) = self.containing_object(this).ok_or_else(|| {
            NativeThrow::runtime_error(format!("virtual call of {} on unknown object {:#x}", method, this))
        })?;
        let (body, offset) = {
            let reg = self.registry.read();
            let (id, offset) = reg.find_impl(scope, method, args).ok_or_else(|| {
                NativeThrow::runtime_error(format!("pure virtual method called: {}", method))
            })?;
            (reg.method(id)?.body.clone(), offset)
        };
        match body {
            Some(body) => self.run_body(&body, Some(start + offset as u64), args),
            None => Err(NativeThrow::runtime_error(format!(
                "pure virtual method called: {}",
                method
            ))),
        }
    }

    fn first_fitting_ctor(&self, class: &str, count: usize) -> Result<MethodId, NativeThrow> {
        let scope = self
            .find_scope(class)
            .ok_or_else(|| NativeThrow::runtime_error(format!("unknown class {}", class)))?;
        self.constructors(scope)
            .into_iter()
            .find(|s| Self::fits(s, count))
            .map(|s| s.id)
            .ok_or_else(|| {
                NativeThrow::native(
                    "std::invalid_argument",
                    format!("no constructor of {} takes {} arguments", class, count),
                )
            })
    }
}

impl NativeRuntime for InProcessRuntime {
    fn declare(&self, source: &str) -> NativeResult<()> {
        self.compile(source)
    }

    fn process_line(&self, line: &str) -> NativeResult<()> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("#include") else {
            return self.compile(line);
        };
        let header = rest
            .trim()
            .trim_matches(|c| c == '"' || c == '<' || c == '>')
            .to_string();
        let path = self.find_include(&header).ok_or_else(|| {
            NativeError::Compilation(format!("fatal error: '{}' file not found", header))
        })?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| NativeError::Compilation(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(target: "bindery::native", header = %path.display(), "including header");
        self.compile(&source)
    }

    fn add_include_path(&self, path: &Path) -> NativeResult<()> {
        let mut paths = self.include_paths.write();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_path_buf());
        }
        Ok(())
    }

    fn load_library(&self, path: &Path) -> NativeResult<()> {
        if let Some(key) = self.library_key(path) {
            if !self.loaded.lock().insert(key.clone()) {
                return Ok(());
            }
            let define = self.libraries.get(&key).cloned();
            if let Some(define) = define {
                self.define(|b| {
                    define(b);
                    Ok(())
                })?;
            }
            tracing::debug!(target: "bindery::native", library = %key, "loaded in-process library");
            return Ok(());
        }

        let library = Library::open(path).map_err(|e| NativeError::Library(e.to_string()))?;
        let source = library
            .reflection_source()
            .map_err(|e| NativeError::Library(e.to_string()))?;
        self.compile(&source)?;
        self.dynamic.lock().push(library);
        Ok(())
    }

    fn add_autoload_map(&self, path: &Path) -> NativeResult<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NativeError::Library(format!("{}: {}", path.display(), e)))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(library), None) => {
                    let library = if self.libraries.contains_key(library) {
                        PathBuf::from(library)
                    } else {
                        dir.join(library)
                    };
                    entries.push((normalize_name(name), library));
                }
                _ => {
                    return Err(NativeError::Library(format!(
                        "{}:{}: expected `<qualified name> <library>`",
                        path.display(),
                        number + 1
                    )))
                }
            }
        }
        self.autoload_map.write().extend(entries);
        Ok(())
    }

    fn autoload(&self, qualified_name: &str) -> bool {
        let library = self.autoload_map.read().get(&normalize_name(qualified_name)).cloned();
        let Some(library) = library else {
            return false;
        };
        if let Some(key) = self.library_key(&library) {
            if self.loaded.lock().contains(&key) {
                return false;
            }
        }
        match self.load_library(&library) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    target: "bindery::native",
                    name = qualified_name,
                    library = %library.display(),
                    error = %e,
                    "autoload failed"
                );
                false
            }
        }
    }

    fn declaration_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn scope_info(&self, scope: ScopeId) -> NativeResult<ScopeInfo> {
        Ok(self.registry.read().scope(scope)?.info.clone())
    }

    fn find_scope(&self, qualified_name: &str) -> Option<ScopeId> {
        let reg = self.registry.read();
        let name = normalize_name(qualified_name.trim_start_matches("::"));
        if let Some(id) = reg.by_name.get(&name) {
            return Some(*id);
        }
        let canonical = reg.canonical_type(&name)?;
        reg.by_name.get(&canonical).copied()
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> NativeResult<Option<EntityDecl>> {
        self.compile_pending()?;
        self.registry.read().lookup(scope, name)
    }

    fn member_names(&self, scope: ScopeId) -> Vec<String> {
        self.registry
            .read()
            .scope(scope)
            .map(|s| s.order.clone())
            .unwrap_or_default()
    }

    fn overloads(&self, scope: ScopeId, name: &str) -> Vec<Signature> {
        let ids = self
            .registry
            .read()
            .scope(scope)
            .ok()
            .and_then(|s| s.methods.get(&normalize_name(name)).cloned())
            .unwrap_or_default();
        self.signatures(&ids)
    }

    fn constructors(&self, scope: ScopeId) -> Vec<Signature> {
        let ids = self
            .registry
            .read()
            .scope(scope)
            .map(|s| s.ctors.clone())
            .unwrap_or_default();
        self.signatures(&ids)
    }

    fn resolve_type(&self, name: &str) -> Option<String> {
        let mut spec = TypeSpec::parse(name).ok()?;
        let reg = self.registry.read();
        if let Some(canonical) = reg.canonical_type(&spec.base) {
            // a typedef to a pointer folds its indirection into ours
            let target = TypeSpec::parse(&canonical).ok()?;
            spec.pointers += target.pointers;
            spec.is_const |= target.is_const;
            spec.base = target.base;
        }
        Some(spec.to_string())
    }

    fn size_of(&self, type_name: &str) -> Option<usize> {
        let reg = self.registry.read();
        let qualified = reg.qualify_type(ScopeId::GLOBAL, type_name);
        reg.type_size(&qualified)
    }

    fn instantiate_function(
        &self,
        scope: ScopeId,
        name: &str,
        template_args: &[String],
    ) -> NativeResult<Signature> {
        let args: Vec<String> = template_args.iter().map(|a| normalize_name(a)).collect();
        let mut reg = self.registry.write();
        let templates: Vec<MethodId> = reg
            .scope(scope)?
            .methods
            .get(name)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| reg.method(*id).is_ok_and(|m| m.sig.template.is_some()))
                    .collect()
            })
            .unwrap_or_default();
        if templates.is_empty() {
            return Err(NativeError::Instantiation(format!("{} is not a function template", name)));
        }
        let mut last_error = None;
        for template in templates {
            match reg.instantiate(template, &args) {
                Ok(id) => return reg.public_signature(id),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| NativeError::Instantiation(name.to_string())))
    }

    fn instantiate_class(
        &self,
        scope: ScopeId,
        name: &str,
        template_args: &[String],
    ) -> NativeResult<ScopeId> {
        let args: Vec<String> = {
            let reg = self.registry.read();
            template_args
                .iter()
                .map(|a| reg.qualify_type(scope, &normalize_name(a)))
                .collect()
        };
        let leaf = format!("{}<{}>", name, args.join(","));
        let mut reg = self.registry.write();
        let qualified = reg.qualify(scope, &leaf);
        if let Some(&id) = reg.by_name.get(&qualified) {
            return Ok(id);
        }
        let instantiate = reg
            .scope(scope)?
            .class_templates
            .get(name)
            .cloned()
            .ok_or_else(|| NativeError::Instantiation(format!("{} is not a class template", name)))?;

        let id = reg.add_scope(scope, &leaf, ScopeKind::Class, 0)?;
        let mut error = None;
        let result = {
            let mut b = ScopeBuilder::new(&mut reg, &self.arena, id, &mut error);
            instantiate(&mut b, &args)
        };
        let failure = match (result, error) {
            (Err(msg), _) => Some(msg),
            (Ok(()), Some(err)) => Some(err.to_string()),
            (Ok(()), None) => reg.finish_class(id).err().map(|e| e.to_string()),
        };
        if let Some(reason) = failure {
            // the failed instantiation is the newest scope; unlink it
            reg.by_name.remove(&qualified);
            if let Ok(parent) = reg.scope_mut(scope) {
                parent.children.remove(&normalize_name(&leaf));
                parent.order.retain(|n| *n != normalize_name(&leaf));
            }
            if reg.scopes.len() as u64 == id.0 + 1 {
                reg.scopes.pop();
            }
            return Err(NativeError::Instantiation(format!("{}: {}", qualified, reason)));
        }
        drop(reg);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(target: "bindery::native", class = %qualified, "instantiated class template");
        Ok(id)
    }

    fn invoke(
        &self,
        method: MethodId,
        this: Option<Address>,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow> {
        let (sig, body) = {
            let reg = self.registry.read();
            let def = reg.method(method)?;
            (def.sig.clone(), def.body.clone())
        };
        if !Self::fits(&sig, args.len()) {
            return Err(NativeError::ArgumentError(format!(
                "{} called with {} arguments",
                sig.prototype(),
                args.len()
            ))
            .into());
        }
        if sig.is_virtual {
            if let Some(this) = this {
                return self.call_native_virtual(this, &sig.name, args);
            }
        }
        match body {
            Some(body) => self.run_body(&body, this, args),
            None => Err(NativeThrow::runtime_error(format!(
                "{} has no definition",
                sig.qualified_name()
            ))),
        }
    }

    fn construct(
        &self,
        ctor: MethodId,
        args: &[NativeValue],
        allow_abstract: bool,
    ) -> Result<Address, NativeThrow> {
        let (scope, size) = {
            let reg = self.registry.read();
            let def = reg.method(ctor)?;
            let info = &reg.scope(def.sig.scope)?.info;
            if !def.sig.is_constructor {
                return Err(NativeError::ArgumentError(format!("{} is not a constructor", def.sig.name)).into());
            }
            if info.is_abstract && !allow_abstract {
                return Err(NativeError::AbstractClass(info.qualified_name.clone()).into());
            }
            if !Self::fits(&def.sig, args.len()) {
                return Err(NativeError::ArgumentError(format!(
                    "{} called with {} arguments",
                    def.sig.prototype(),
                    args.len()
                ))
                .into());
            }
            (info.id, info.size)
        };
        let address = self.arena.allocate(size)?;
        self.objects.lock().insert(address, scope);
        if let Err(thrown) = self.run_ctor_chain(scope, address, Some(ctor), args) {
            self.objects.lock().remove(&address);
            let _ = self.arena.free(address);
            return Err(thrown);
        }
        Ok(address)
    }

    fn destruct(&self, scope: ScopeId, address: Address) -> NativeResult<()> {
        let registered = self.objects.lock().remove(&address);
        let scope = registered.unwrap_or(scope);
        self.run_dtor_chain(scope, address);
        self.arena.free(address)
    }

    fn allocate(&self, size: usize) -> NativeResult<Address> {
        self.arena.allocate(size)
    }

    fn free(&self, address: Address) -> NativeResult<()> {
        self.arena.free(address)
    }

    fn read(&self, address: Address, len: usize) -> NativeResult<Vec<u8>> {
        self.arena.read(address, len)
    }

    fn write(&self, address: Address, bytes: &[u8]) -> NativeResult<()> {
        self.arena.write(address, bytes)
    }

    fn dynamic_type(&self, address: Address, declared: ScopeId) -> (ScopeId, Address) {
        match self.containing_object(address) {
            Some((start, scope))
                if self.base_offset(scope, declared) == Some((address - start) as usize) =>
            {
                (scope, start)
            }
            _ => (declared, address),
        }
    }

    fn is_subclass(&self, derived: ScopeId, base: ScopeId) -> bool {
        self.registry.read().is_subclass(derived, base)
    }

    fn base_offset(&self, derived: ScopeId, base: ScopeId) -> Option<usize> {
        self.registry.read().base_offset(derived, base)
    }

    fn smart_copy(&self, handle: u64) -> NativeResult<u64> {
        let mut table = self.smart.lock();
        let block = table.block_of(handle)?;
        if let Some(b) = table.blocks.get_mut(&block) {
            b.count += 1;
        }
        Ok(table.issue(block))
    }

    fn smart_release(&self, handle: u64) -> NativeResult<()> {
        let expired = {
            let mut table = self.smart.lock();
            let block = table.block_of(handle)?;
            table.handles.remove(&handle);
            let last = match table.blocks.get_mut(&block) {
                Some(b) => {
                    b.count -= 1;
                    b.count == 0
                }
                None => false,
            };
            if last {
                table.blocks.remove(&block)
            } else {
                None
            }
        };
        if let Some(block) = expired {
            NativeRuntime::destruct(self, block.class, block.pointee)?;
        }
        Ok(())
    }

    fn smart_use_count(&self, handle: u64) -> NativeResult<usize> {
        let table = self.smart.lock();
        let block = table.block_of(handle)?;
        Ok(table.blocks.get(&block).map(|b| b.count).unwrap_or(0))
    }

    fn set_reverse_dispatch(&self, dispatcher: Arc<dyn ReverseDispatch>) {
        *self.dispatcher.write() = Some(dispatcher);
    }
}

impl NativeCallContext for InProcessRuntime {
    fn read(&self, address: Address, len: usize) -> NativeResult<Vec<u8>> {
        self.arena.read(address, len)
    }

    fn write(&self, address: Address, bytes: &[u8]) -> NativeResult<()> {
        self.arena.write(address, bytes)
    }

    fn allocate(&self, size: usize) -> NativeResult<Address> {
        self.arena.allocate(size)
    }

    fn free(&self, address: Address) -> NativeResult<()> {
        self.arena.free(address)
    }

    fn construct(&self, class: &str, args: &[NativeValue]) -> Result<Address, NativeThrow> {
        let ctor = self.first_fitting_ctor(class, args.len())?;
        NativeRuntime::construct(self, ctor, args, false)
    }

    fn destruct(&self, class: &str, address: Address) -> Result<(), NativeThrow> {
        let scope = self
            .find_scope(class)
            .ok_or_else(|| NativeThrow::runtime_error(format!("unknown class {}", class)))?;
        NativeRuntime::destruct(self, scope, address).map_err(NativeThrow::from)
    }

    fn call_virtual(
        &self,
        this: Address,
        method: &str,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow> {
        let dispatcher = self.dispatcher.read().clone();
        if let Some(dispatcher) = dispatcher {
            if let Some(result) = dispatcher.dispatch(this, method, args) {
                return result;
            }
        }
        self.call_native_virtual(this, method, args)
    }

    fn call_function(
        &self,
        qualified_name: &str,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow> {
        let (scope, name) = match qualified_name.rfind("::") {
            Some(idx) => (
                self.find_scope(&qualified_name[..idx]).ok_or_else(|| {
                    NativeThrow::runtime_error(format!("unknown scope in {}", qualified_name))
                })?,
                &qualified_name[idx + 2..],
            ),
            None => (ScopeId::GLOBAL, qualified_name),
        };
        let sig = self
            .overloads(scope, name)
            .into_iter()
            .find(|s| !s.is_template() && Self::fits(s, args.len()))
            .ok_or_else(|| {
                NativeThrow::runtime_error(format!(
                    "no overload of {} takes {} arguments",
                    qualified_name,
                    args.len()
                ))
            })?;
        self.invoke(sig.id, None, args)
    }

    fn make_shared(&self, class: &str, address: Address) -> NativeResult<NativeValue> {
        let scope = self
            .find_scope(class)
            .ok_or_else(|| NativeError::TypeParse(format!("unknown class {}", class)))?;
        let mut table = self.smart.lock();
        table.next_block += 1;
        let block = table.next_block;
        table.blocks.insert(
            block,
            SmartBlock {
                class: scope,
                pointee: address,
                count: 1,
            },
        );
        let handle = table.issue(block);
        Ok(NativeValue::Smart {
            handle,
            pointee: address,
        })
    }

    fn smart_copy(&self, handle: u64) -> NativeResult<u64> {
        NativeRuntime::smart_copy(self, handle)
    }

    fn smart_release(&self, handle: u64) -> NativeResult<()> {
        NativeRuntime::smart_release(self, handle)
    }

    fn smart_use_count(&self, handle: u64) -> NativeResult<usize> {
        NativeRuntime::smart_use_count(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_runtime() -> InProcessRuntime {
        let mut b = RuntimeBuilder::new();
        b.global(|g| {
            g.static_data("int g_live", NativeValue::Int(0));
        });
        b.class("Counter", 8, |c| {
            c.data("int m_value", 0);
            c.constructor("int v = 0", |f| {
                let this = f.this()?;
                f.ctx.write_i32(this, f.int_or(0, 0)? as i32)?;
                Ok(NativeValue::Void)
            });
            c.method("int value() const", |f| {
                Ok(NativeValue::Int(f.ctx.read_i32(f.this()?)? as i64))
            });
            c.method("virtual int twice() const", |f| {
                Ok(NativeValue::Int(2 * f.ctx.read_i32(f.this()?)? as i64))
            });
        });
        b.class("Tripler", 8, |c| {
            c.base("Counter");
            c.method("int twice() const", |f| {
                Ok(NativeValue::Int(3 * f.ctx.read_i32(f.this()?)? as i64))
            });
        });
        b.build().unwrap()
    }

    fn ctor(rt: &InProcessRuntime, class: &str) -> MethodId {
        let scope = rt.find_scope(class).unwrap();
        rt.constructors(scope)[0].id
    }

    #[test]
    fn test_construct_invoke_destruct() {
        let rt = counter_runtime();
        let scope = rt.find_scope("Counter").unwrap();
        let obj = NativeRuntime::construct(&rt, ctor(&rt, "Counter"), &[NativeValue::Int(7)], false).unwrap();
        assert_eq!(rt.live_objects(), 1);

        let value = rt.overloads(scope, "value")[0].id;
        assert_eq!(rt.invoke(value, Some(obj), &[]).unwrap(), NativeValue::Int(7));

        NativeRuntime::destruct(&rt, scope, obj).unwrap();
        assert_eq!(rt.live_objects(), 0);
        assert!(NativeRuntime::read(&rt, obj, 4).is_err());
    }

    #[test]
    fn test_virtual_dispatch_uses_most_derived() {
        let rt = counter_runtime();
        let base = rt.find_scope("Counter").unwrap();
        let tripler = rt.find_scope("Tripler").unwrap();
        let obj = NativeRuntime::construct(&rt, ctor(&rt, "Tripler"), &[], false).unwrap();
        NativeCallContext::write_i32(&rt, obj, 5).unwrap();

        let twice = rt.overloads(base, "twice")[0].id;
        assert_eq!(rt.invoke(twice, Some(obj), &[]).unwrap(), NativeValue::Int(15));
        assert_eq!(rt.dynamic_type(obj, base), (tripler, obj));
        assert!(rt.is_subclass(tripler, base));
    }

    #[test]
    fn test_argument_count_checked() {
        let rt = counter_runtime();
        let scope = rt.find_scope("Counter").unwrap();
        let value = rt.overloads(scope, "value")[0].id;
        let err = rt.invoke(value, Some(0), &[NativeValue::Int(1)]).unwrap_err();
        assert_eq!(err.kind, "std::invalid_argument");
    }

    #[test]
    fn test_static_data_storage() {
        let rt = counter_runtime();
        match rt.lookup(ScopeId::GLOBAL, "g_live").unwrap() {
            Some(EntityDecl::DataMember(m)) => {
                let address = m.address.unwrap();
                assert_eq!(NativeCallContext::read_i32(&rt, address).unwrap(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shared_pointer_counts() {
        let rt = counter_runtime();
        let obj = NativeRuntime::construct(&rt, ctor(&rt, "Counter"), &[], false).unwrap();
        let NativeValue::Smart { handle, .. } = rt.make_shared("Counter", obj).unwrap() else {
            panic!("expected smart pointer");
        };
        let copy = NativeRuntime::smart_copy(&rt, handle).unwrap();
        assert_eq!(NativeRuntime::smart_use_count(&rt, copy).unwrap(), 2);
        NativeRuntime::smart_release(&rt, handle).unwrap();
        assert_eq!(rt.live_objects(), 1);
        NativeRuntime::smart_release(&rt, copy).unwrap();
        assert_eq!(rt.live_objects(), 0);
        assert!(NativeRuntime::smart_use_count(&rt, copy).is_err());
    }

    #[test]
    fn test_declare_without_hook_fails() {
        let rt = counter_runtime();
        assert!(matches!(rt.declare("int x;"), Err(NativeError::Compilation(_))));
    }

    #[test]
    fn test_deferred_declaration_compiles_on_lookup() {
        let mut b = RuntimeBuilder::new();
        b.on_declare(|scope, source| match source.strip_prefix("namespace ") {
            Some(name) => {
                scope.namespace(name.trim(), |_| {});
                Ok(())
            }
            None => Err(format!("error: expected declaration: {}", source)),
        });
        let rt = b.build().unwrap();
        rt.declare_deferred("namespace lazy");
        assert!(matches!(
            rt.lookup(ScopeId::GLOBAL, "lazy").unwrap(),
            Some(EntityDecl::Scope(_))
        ));
        rt.declare_deferred("garbage");
        match rt.lookup(ScopeId::GLOBAL, "lazy") {
            Err(NativeError::Compilation(msg)) => assert!(msg.contains("expected declaration")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_autoload_map_loads_library_once() {
        let mut b = RuntimeBuilder::new();
        b.library("libGeo", |g| {
            g.namespace("geo", |_| {});
        });
        let rt = b.build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("geo.map");
        std::fs::write(&map, "# name library\ngeo libGeo\n").unwrap();
        rt.add_autoload_map(&map).unwrap();

        assert_eq!(rt.lookup(ScopeId::GLOBAL, "geo").unwrap(), None);
        assert!(rt.autoload("geo"));
        assert!(rt.lookup(ScopeId::GLOBAL, "geo").unwrap().is_some());
        assert!(!rt.autoload("geo"));
    }
}
