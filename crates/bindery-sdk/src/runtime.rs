//! NativeRuntime trait: the native side of the bridge
//!
//! The bridge never compiles, reflects or executes native code itself. It
//! programs against this trait, which a backend implements on top of a JIT,
//! an interpreter or (for embedding and tests) natives written in Rust.

use std::path::Path;
use std::sync::Arc;

use crate::error::{NativeResult, NativeThrow};
use crate::types::{Address, EntityDecl, MethodId, ScopeId, ScopeInfo, Signature};
use crate::value::NativeValue;

/// Abstract native runtime.
///
/// Memory access goes exclusively through [`read`](Self::read) and
/// [`write`](Self::write): a backend must reject addresses outside live
/// allocations instead of touching wild memory.
pub trait NativeRuntime: Send + Sync {
    // ========================================================================
    // Declarations and libraries
    // ========================================================================

    /// Compile native source text; errors carry the compiler diagnostic
    fn declare(&self, source: &str) -> NativeResult<()>;

    /// Process a single preprocessor-level line (`#include "x.h"`)
    fn process_line(&self, line: &str) -> NativeResult<()>;

    /// Append a directory to the include search path
    fn add_include_path(&self, path: &Path) -> NativeResult<()>;

    /// Load a reflection/metadata library
    fn load_library(&self, path: &Path) -> NativeResult<()>;

    /// Register an autoload map (qualified name → library)
    fn add_autoload_map(&self, path: &Path) -> NativeResult<()>;

    /// Try to make `qualified_name` available by loading its library.
    /// Returns true if a library was loaded.
    fn autoload(&self, qualified_name: &str) -> bool;

    /// Counter bumped whenever new declarations become visible
    fn declaration_epoch(&self) -> u64;

    // ========================================================================
    // Reflection
    // ========================================================================

    /// Reflection information for a scope
    fn scope_info(&self, scope: ScopeId) -> NativeResult<ScopeInfo>;

    /// Find a scope by fully qualified name
    fn find_scope(&self, qualified_name: &str) -> Option<ScopeId>;

    /// Look up a name declared directly in `scope` (bases are not searched).
    /// May compile pending declarations first.
    fn lookup(&self, scope: ScopeId, name: &str) -> NativeResult<Option<EntityDecl>>;

    /// Names declared directly in `scope`
    fn member_names(&self, scope: ScopeId) -> Vec<String>;

    /// Overloads of `name` declared directly in `scope`, in declaration order
    fn overloads(&self, scope: ScopeId, name: &str) -> Vec<Signature>;

    /// Constructors of a class, in declaration order
    fn constructors(&self, scope: ScopeId) -> Vec<Signature>;

    /// Canonical spelling of a type name (typedefs resolved)
    fn resolve_type(&self, name: &str) -> Option<String>;

    /// Storage size of a type
    fn size_of(&self, type_name: &str) -> Option<usize>;

    /// Instantiate a function template with explicit arguments
    fn instantiate_function(
        &self,
        scope: ScopeId,
        name: &str,
        template_args: &[String],
    ) -> NativeResult<Signature>;

    /// Instantiate a class template with explicit arguments
    fn instantiate_class(
        &self,
        scope: ScopeId,
        name: &str,
        template_args: &[String],
    ) -> NativeResult<ScopeId>;

    // ========================================================================
    // Calls and object lifetime
    // ========================================================================

    /// Invoke a function or method
    fn invoke(
        &self,
        method: MethodId,
        this: Option<Address>,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeThrow>;

    /// Allocate and construct an object; returns its address
    fn construct(
        &self,
        ctor: MethodId,
        args: &[NativeValue],
        allow_abstract: bool,
    ) -> Result<Address, NativeThrow>;

    /// Run the destructor chain and release the storage
    fn destruct(&self, scope: ScopeId, address: Address) -> NativeResult<()>;

    // ========================================================================
    // Memory
    // ========================================================================

    /// Allocate raw storage
    fn allocate(&self, size: usize) -> NativeResult<Address>;

    /// Release raw storage
    fn free(&self, address: Address) -> NativeResult<()>;

    /// Read `len` bytes
    fn read(&self, address: Address, len: usize) -> NativeResult<Vec<u8>>;

    /// Write bytes
    fn write(&self, address: Address, bytes: &[u8]) -> NativeResult<()>;

    // ========================================================================
    // Type relationships
    // ========================================================================

    /// Most-derived type and start address of the object at `address`,
    /// which is known to be (at least) a `declared`.
    fn dynamic_type(&self, address: Address, declared: ScopeId) -> (ScopeId, Address);

    /// Check if `derived` is `base` or inherits from it
    fn is_subclass(&self, derived: ScopeId, base: ScopeId) -> bool;

    /// Offset of the `base` sub-object within `derived`
    fn base_offset(&self, derived: ScopeId, base: ScopeId) -> Option<usize>;

    // ========================================================================
    // Smart pointers
    // ========================================================================

    /// Copy a smart pointer (shares ownership); returns the new handle
    fn smart_copy(&self, handle: u64) -> NativeResult<u64>;

    /// Drop a smart pointer handle
    fn smart_release(&self, handle: u64) -> NativeResult<()>;

    /// Number of handles sharing ownership with `handle`
    fn smart_use_count(&self, handle: u64) -> NativeResult<usize>;

    // ========================================================================
    // Reverse calls
    // ========================================================================

    /// Install the shim consulted by virtual calls made from native code
    fn set_reverse_dispatch(&self, dispatcher: Arc<dyn ReverseDispatch>);
}

/// Forwarding shim for native → host calls.
///
/// Installed by the bridge; backends consult it whenever native code makes
/// a virtual call so that host overrides take precedence.
pub trait ReverseDispatch: Send + Sync {
    /// Dispatch `method` on the object at `this` to a host override.
    ///
    /// Returns `None` if no host override exists for this object and method,
    /// in which case the backend runs the native implementation.
    fn dispatch(
        &self,
        this: Address,
        method: &str,
        args: &[NativeValue],
    ) -> Option<Result<NativeValue, NativeThrow>>;
}
