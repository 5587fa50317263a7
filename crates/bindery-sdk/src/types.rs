//! Reflection records and native type signatures
//!
//! Everything the bridge learns about the native side is expressed with the
//! types in this module: scope identities, overload signatures, data member
//! layouts, enums, and parsed type signatures (`TypeSpec`).

use std::fmt;

use crate::error::NativeError;
use crate::value::NativeValue;

/// Native memory address.
pub type Address = u64;

/// Size of a native pointer in bytes.
pub const POINTER_SIZE: usize = 8;

// ============================================================================
// Identities
// ============================================================================

/// Identity of a native namespace or class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// The global namespace
    pub const GLOBAL: ScopeId = ScopeId(0);

    /// Check if this is the global namespace
    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

/// Identity of a single native function, method or constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

// ============================================================================
// Builtin types
// ============================================================================

/// Classification of the native builtin (non-class) types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `void`
    Void,
    /// `bool`
    Bool,
    /// `char`, `signed char`, `unsigned char`
    Char {
        /// Whether the char type is signed
        signed: bool,
    },
    /// `wchar_t`
    WChar,
    /// Fixed-width integer of any native width
    Int {
        /// Width in bits
        bits: u8,
        /// Whether the type is signed
        signed: bool,
    },
    /// `float`, `double`, `long double`
    Float {
        /// Width in bits (32, 64, or 128 for extended precision)
        bits: u8,
    },
}

impl Builtin {
    /// Classify a canonical builtin type name.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "void" => Builtin::Void,
            "bool" => Builtin::Bool,
            "char" | "signed char" => Builtin::Char { signed: true },
            "unsigned char" => Builtin::Char { signed: false },
            "wchar_t" => Builtin::WChar,
            "short" | "int16_t" => Builtin::Int { bits: 16, signed: true },
            "unsigned short" | "uint16_t" => Builtin::Int { bits: 16, signed: false },
            "int" | "int32_t" => Builtin::Int { bits: 32, signed: true },
            "unsigned int" | "uint32_t" => Builtin::Int { bits: 32, signed: false },
            "int8_t" => Builtin::Int { bits: 8, signed: true },
            "uint8_t" => Builtin::Int { bits: 8, signed: false },
            "long" | "long long" | "int64_t" | "ssize_t" | "ptrdiff_t" | "intptr_t" => {
                Builtin::Int { bits: 64, signed: true }
            }
            "unsigned long" | "unsigned long long" | "uint64_t" | "size_t" | "uintptr_t" => {
                Builtin::Int { bits: 64, signed: false }
            }
            "float" => Builtin::Float { bits: 32 },
            "double" => Builtin::Float { bits: 64 },
            "long double" => Builtin::Float { bits: 128 },
            _ => return None,
        };
        Some(kind)
    }

    /// Storage size in bytes.
    pub fn size(self) -> usize {
        match self {
            Builtin::Void => 0,
            Builtin::Bool | Builtin::Char { .. } => 1,
            Builtin::WChar => 4,
            Builtin::Int { bits, .. } => bits as usize / 8,
            Builtin::Float { bits } => bits as usize / 8,
        }
    }

    /// Check if this is an integral type (chars and bool excluded)
    pub fn is_integer(self) -> bool {
        matches!(self, Builtin::Int { .. })
    }

    /// Check if this is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, Builtin::Float { .. })
    }

    /// Inclusive value range of an integer type.
    pub fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Builtin::Int { bits, signed: true } => {
                let half = 1i128 << (bits - 1);
                Some((-half, half - 1))
            }
            Builtin::Int { bits, signed: false } => Some((0, (1i128 << bits) - 1)),
            Builtin::Char { signed: true } => Some((i8::MIN as i128, i8::MAX as i128)),
            Builtin::Char { signed: false } => Some((0, u8::MAX as i128)),
            Builtin::WChar => Some((0, u32::MAX as i128)),
            Builtin::Bool => Some((0, 1)),
            _ => None,
        }
    }
}

// ============================================================================
// Type signatures
// ============================================================================

/// Reference qualifier of a parsed type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Plain value or pointer
    None,
    /// `T&`
    LValue,
    /// `T&&`
    RValue,
}

/// Array extent of a parsed type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayExtent {
    /// `T[N]`
    Fixed(usize),
    /// `T[]`
    Unsized,
}

/// A parsed native type signature such as `const std::string&` or `double[4]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpec {
    /// Canonical base name without qualifiers (`int`, `std::vector<double>`)
    pub base: String,
    /// Whether the value (or pointee) is const-qualified
    pub is_const: bool,
    /// Pointer depth
    pub pointers: u8,
    /// Reference qualifier
    pub reference: Reference,
    /// Array extent, if declared as an array
    pub array: Option<ArrayExtent>,
}

impl TypeSpec {
    /// Parse a native type signature.
    pub fn parse(text: &str) -> Result<Self, NativeError> {
        let mut rest = text.trim();
        if rest.is_empty() {
            return Err(NativeError::TypeParse("empty type".to_string()));
        }

        let mut array = None;
        if rest.ends_with(']') {
            let open = rest
                .rfind('[')
                .ok_or_else(|| NativeError::TypeParse(text.to_string()))?;
            let extent = rest[open + 1..rest.len() - 1].trim();
            array = Some(if extent.is_empty() {
                ArrayExtent::Unsized
            } else {
                ArrayExtent::Fixed(
                    extent
                        .parse()
                        .map_err(|_| NativeError::TypeParse(text.to_string()))?,
                )
            });
            rest = rest[..open].trim_end();
        }

        let mut reference = Reference::None;
        if let Some(stripped) = rest.strip_suffix("&&") {
            reference = Reference::RValue;
            rest = stripped.trim_end();
        } else if let Some(stripped) = rest.strip_suffix('&') {
            reference = Reference::LValue;
            rest = stripped.trim_end();
        }

        let mut pointers = 0u8;
        loop {
            if let Some(stripped) = rest.strip_suffix('*') {
                pointers += 1;
                rest = stripped.trim_end();
            } else if rest.ends_with(" const") && rest[..rest.len() - 6].trim_end().ends_with('*') {
                // `T* const` qualifies the pointer itself, not the pointee
                rest = rest[..rest.len() - 6].trim_end();
            } else {
                break;
            }
        }

        let mut is_const = false;
        if let Some(stripped) = rest.strip_prefix("const ") {
            is_const = true;
            rest = stripped.trim_start();
        }
        if let Some(stripped) = rest.strip_suffix(" const") {
            is_const = true;
            rest = stripped.trim_end();
        }
        let rest = rest.strip_prefix("volatile ").unwrap_or(rest);

        let base = normalize_name(rest);
        if base.is_empty() {
            return Err(NativeError::TypeParse(text.to_string()));
        }

        Ok(TypeSpec {
            base,
            is_const,
            pointers,
            reference,
            array,
        })
    }

    /// Builtin classification of the base type (ignores indirection).
    pub fn builtin(&self) -> Option<Builtin> {
        Builtin::from_name(&self.base)
    }

    /// Check if this is a plain value (no pointer, reference, or array)
    pub fn is_value(&self) -> bool {
        self.pointers == 0 && self.reference == Reference::None && self.array.is_none()
    }

    /// Check if this is a reference type
    pub fn is_reference(&self) -> bool {
        self.reference != Reference::None
    }

    /// Check if the type is `void`
    pub fn is_void(&self) -> bool {
        self.base == "void" && self.pointers == 0 && self.array.is_none()
    }

    /// Template name of the base (`std::vector` for `std::vector<double>`).
    pub fn template_name(&self) -> Option<&str> {
        self.base
            .find('<')
            .filter(|_| self.base.ends_with('>'))
            .map(|idx| &self.base[..idx])
    }

    /// Top-level template arguments of the base.
    pub fn template_args(&self) -> Vec<String> {
        match self.base.find('<') {
            Some(open) if self.base.ends_with('>') => {
                split_template_args(&self.base[open + 1..self.base.len() - 1])
            }
            _ => Vec::new(),
        }
    }

    /// Pointee type name if this is a smart pointer (`std::shared_ptr<T>`).
    pub fn smart_pointee(&self) -> Option<String> {
        match self.template_name() {
            Some("std::shared_ptr") | Some("std::unique_ptr") => {
                self.template_args().into_iter().next()
            }
            _ => None,
        }
    }

    /// Check if a marshalled value can stand for an argument of this type.
    ///
    /// Used to pick among overloads when native code makes a call with
    /// already-marshalled arguments. Integral variants are interchangeable;
    /// class types accept any address.
    pub fn accepts_native(&self, value: &NativeValue) -> bool {
        use NativeValue as V;
        let address = matches!(value, V::Ptr(_) | V::Object(_) | V::Smart { .. });
        if self.smart_pointee().is_some() {
            return address;
        }
        if self.base == "std::string" {
            return matches!(value, V::Str(_)) || (address && self.pointers as usize + self.is_reference() as usize > 0);
        }
        let Some(kind) = self.builtin() else {
            // classes by value or reference, and enums
            return address || (self.pointers == 0 && matches!(value, V::Int(_) | V::UInt(_)));
        };
        let indirect = self.pointers > 0 || self.array.is_some();
        if indirect {
            let text = matches!(kind, Builtin::Char { .. }) && self.pointers == 1 && matches!(value, V::Str(_));
            return address || text;
        }
        if self.is_reference() && address {
            return true;
        }
        match kind {
            Builtin::Void => false,
            Builtin::Bool => matches!(value, V::Bool(_) | V::Int(_) | V::UInt(_)),
            Builtin::Char { .. } => matches!(value, V::Char(_) | V::Int(_) | V::UInt(_)),
            Builtin::WChar | Builtin::Int { .. } => {
                matches!(value, V::Int(_) | V::UInt(_) | V::Char(_) | V::Bool(_))
            }
            Builtin::Float { .. } => matches!(value, V::Float(_) | V::Int(_) | V::UInt(_)),
        }
    }

    /// The same type with one level of pointer or array removed.
    pub fn element(&self) -> TypeSpec {
        let mut elem = self.clone();
        elem.reference = Reference::None;
        if elem.array.is_some() {
            elem.array = None;
        } else if elem.pointers > 0 {
            elem.pointers -= 1;
        }
        elem
    }

    /// Build a plain value type from a base name.
    pub fn value(base: &str) -> TypeSpec {
        TypeSpec {
            base: normalize_name(base),
            is_const: false,
            pointers: 0,
            reference: Reference::None,
            array: None,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        write!(f, "{}", self.base)?;
        for _ in 0..self.pointers {
            write!(f, "*")?;
        }
        match self.reference {
            Reference::None => {}
            Reference::LValue => write!(f, "&")?,
            Reference::RValue => write!(f, "&&")?,
        }
        match self.array {
            Some(ArrayExtent::Fixed(n)) => write!(f, "[{}]", n),
            Some(ArrayExtent::Unsized) => write!(f, "[]"),
            None => Ok(()),
        }
    }
}

/// Normalize a qualified native name: collapse whitespace, drop spaces next
/// to template punctuation, and canonicalize builtin spellings.
pub fn normalize_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let prev = if i > 0 { chars[i - 1] } else { ' ' };
            let next = chars.get(i + 1).copied().unwrap_or(' ');
            if matches!(prev, '<' | ',' | '>') || matches!(next, '<' | ',' | '>') {
                continue;
            }
        }
        out.push(c);
    }
    if out.contains('<') {
        return out;
    }
    match out.as_str() {
        "unsigned" => "unsigned int".to_string(),
        "signed" | "signed int" => "int".to_string(),
        "short int" | "signed short" => "short".to_string(),
        "unsigned short int" => "unsigned short".to_string(),
        "long int" | "signed long" => "long".to_string(),
        "unsigned long int" => "unsigned long".to_string(),
        "long long int" => "long long".to_string(),
        "unsigned long long int" => "unsigned long long".to_string(),
        "std::basic_string<char>" => "std::string".to_string(),
        _ => out,
    }
}

/// Split a template argument list on top-level commas.
pub fn split_template_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in args.chars() {
        match c {
            '<' | '(' => {
                depth += 1;
                current.push(c);
            }
            '>' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(normalize_name(&current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(normalize_name(&current));
    }
    out
}

// ============================================================================
// Reflection records
// ============================================================================

/// Whether a scope is a namespace or a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A namespace
    Namespace,
    /// A class or struct
    Class,
}

/// A direct base class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseInfo {
    /// Base scope
    pub scope: ScopeId,
    /// Offset of the base sub-object within the derived object
    pub offset: usize,
}

/// A virtual method slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMethod {
    /// Method name
    pub name: String,
    /// Whether the method is pure virtual
    pub is_pure: bool,
}

/// Reflection information about a namespace or class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    /// Scope identity
    pub id: ScopeId,
    /// Unqualified name
    pub name: String,
    /// Fully qualified name (`Namespace::Class`)
    pub qualified_name: String,
    /// Namespace or class
    pub kind: ScopeKind,
    /// Enclosing scope (None for the global namespace)
    pub parent: Option<ScopeId>,
    /// Instance size in bytes (0 for namespaces)
    pub size: usize,
    /// Whether the class has unimplemented pure virtual methods
    pub is_abstract: bool,
    /// Direct bases
    pub bases: Vec<BaseInfo>,
    /// Virtual methods declared or inherited by this class
    pub virtuals: Vec<VirtualMethod>,
}

impl ScopeInfo {
    /// Check if this scope is a class
    pub fn is_class(&self) -> bool {
        self.kind == ScopeKind::Class
    }

    /// Look up a virtual method slot by name
    pub fn virtual_method(&self, name: &str) -> Option<&VirtualMethod> {
        self.virtuals.iter().find(|v| v.name == name)
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name (may be empty)
    pub name: String,
    /// Declared type
    pub ty: String,
    /// Whether a default argument is available
    pub has_default: bool,
}

impl Param {
    /// Create a parameter without default
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            has_default: false,
        }
    }

    /// Create a parameter with a default argument
    pub fn with_default(name: &str, ty: &str) -> Self {
        Self {
            has_default: true,
            ..Self::new(name, ty)
        }
    }
}

/// Template parameter list of a function template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParams {
    /// Template parameter names (`T`, `Args`)
    pub names: Vec<String>,
    /// Whether the last parameter is a pack
    pub variadic: bool,
}

/// One entry of an overload set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Method identity used for invocation
    pub id: MethodId,
    /// Declaring scope
    pub scope: ScopeId,
    /// Qualified name of the declaring scope ("" for global)
    pub scope_name: String,
    /// Function name
    pub name: String,
    /// Declared return type
    pub return_type: String,
    /// Declared parameters
    pub params: Vec<Param>,
    /// Static member or free function
    pub is_static: bool,
    /// `const`-qualified method
    pub is_const: bool,
    /// Virtual method
    pub is_virtual: bool,
    /// Constructor
    pub is_constructor: bool,
    /// C-style variadic (`...`)
    pub is_variadic: bool,
    /// Template parameters for uninstantiated templates
    pub template: Option<TemplateParams>,
}

impl Signature {
    /// Number of arguments that must be supplied
    pub fn required_args(&self) -> usize {
        self.params
            .iter()
            .position(|p| p.has_default)
            .unwrap_or(self.params.len())
    }

    /// Maximum number of arguments (None if unbounded)
    pub fn max_args(&self) -> Option<usize> {
        let pack = self.template.as_ref().map(|t| t.variadic).unwrap_or(false);
        if self.is_variadic || pack {
            None
        } else {
            Some(self.params.len())
        }
    }

    /// Check if `args` fit this signature by count and by value kind
    pub fn accepts_native(&self, args: &[NativeValue]) -> bool {
        let count_fits =
            args.len() >= self.required_args() && self.max_args().map_or(true, |max| args.len() <= max);
        count_fits
            && self.params.iter().zip(args).all(|(param, arg)| {
                TypeSpec::parse(&param.ty).map_or(true, |spec| spec.accepts_native(arg))
            })
    }

    /// Check if this is an uninstantiated template
    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// Qualified function name (`Scope::name`)
    pub fn qualified_name(&self) -> String {
        if self.scope_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope_name, self.name)
        }
    }

    /// Human-readable prototype used for doc strings and diagnostics.
    pub fn prototype(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| {
                let mut s = if p.name.is_empty() {
                    p.ty.clone()
                } else {
                    format!("{} {}", p.ty, p.name)
                };
                if p.has_default {
                    s.push_str(" = default");
                }
                s
            })
            .chain(self.is_variadic.then(|| "...".to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut proto = if self.is_constructor {
            format!("{}({})", self.qualified_name(), params)
        } else {
            format!("{} {}({})", self.return_type, self.qualified_name(), params)
        };
        if self.is_const {
            proto.push_str(" const");
        }
        if let Some(t) = &self.template {
            let names = t.names.join(", ");
            proto = format!("template<{}{}> {}", names, if t.variadic { "..." } else { "" }, proto);
        }
        proto
    }
}

/// A data member (instance or static)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMember {
    /// Member name
    pub name: String,
    /// Declared type
    pub ty: String,
    /// Byte offset within the instance (instance members)
    pub offset: usize,
    /// `const`-qualified member
    pub is_const: bool,
    /// Static storage address (static members and namespace variables)
    pub address: Option<Address>,
}

impl DataMember {
    /// Check if this member has static storage
    pub fn is_static(&self) -> bool {
        self.address.is_some()
    }
}

/// An enum type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    /// Unqualified name
    pub name: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Underlying integer type
    pub underlying: String,
    /// Whether enumerators are only visible through the enum (`enum class`)
    pub scoped: bool,
    /// Enumerators in declaration order
    pub values: Vec<(String, i64)>,
}

/// An entity found by name in a scope
#[derive(Debug, Clone, PartialEq)]
pub enum EntityDecl {
    /// A nested namespace or class
    Scope(ScopeId),
    /// A function or method overload set (may include templates)
    Function,
    /// A data member or namespace variable
    DataMember(DataMember),
    /// An enum type
    Enum(EnumDecl),
    /// An unscoped enumerator visible in the enclosing scope
    Enumerator {
        /// Qualified enum name
        enum_name: String,
        /// Enumerator value
        value: i64,
    },
    /// A class template
    ClassTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_char_pointer() {
        let spec = TypeSpec::parse("const char*").unwrap();
        assert_eq!(spec.base, "char");
        assert!(spec.is_const);
        assert_eq!(spec.pointers, 1);
        assert_eq!(spec.to_string(), "const char*");
    }

    #[test]
    fn test_parse_reference_and_template() {
        let spec = TypeSpec::parse("const std::vector< double > &").unwrap();
        assert_eq!(spec.base, "std::vector<double>");
        assert_eq!(spec.reference, Reference::LValue);
        assert_eq!(spec.template_name(), Some("std::vector"));
        assert_eq!(spec.template_args(), vec!["double".to_string()]);
    }

    #[test]
    fn test_parse_array_and_east_const() {
        let spec = TypeSpec::parse("double[4]").unwrap();
        assert_eq!(spec.array, Some(ArrayExtent::Fixed(4)));
        assert_eq!(spec.element().to_string(), "double");

        let spec = TypeSpec::parse("char const* const").unwrap();
        assert!(spec.is_const);
        assert_eq!(spec.pointers, 1);
    }

    #[test]
    fn test_normalize_builtin_spellings() {
        assert_eq!(normalize_name("unsigned"), "unsigned int");
        assert_eq!(normalize_name("long   int"), "long");
        assert_eq!(
            normalize_name("std::map<int, std::string>"),
            "std::map<int,std::string>"
        );
    }

    #[test]
    fn test_smart_pointee() {
        let spec = TypeSpec::parse("std::shared_ptr<pyzables::Countable>&").unwrap();
        assert_eq!(spec.smart_pointee().as_deref(), Some("pyzables::Countable"));
        assert!(TypeSpec::parse("int*").unwrap().smart_pointee().is_none());
    }

    #[test]
    fn test_builtin_ranges() {
        assert_eq!(
            Builtin::from_name("unsigned short").unwrap().int_range(),
            Some((0, 65535))
        );
        assert_eq!(Builtin::from_name("long double").unwrap().size(), 16);
        assert!(Builtin::from_name("std::string").is_none());
    }

    #[test]
    fn test_prototype() {
        let sig = Signature {
            id: MethodId(1),
            scope: ScopeId(3),
            scope_name: "ConcreteClass".to_string(),
            name: "array_method".to_string(),
            return_type: "void".to_string(),
            params: vec![Param::new("ad", "int*"), Param::new("size", "int")],
            is_static: false,
            is_const: false,
            is_virtual: false,
            is_constructor: false,
            is_variadic: false,
            template: None,
        };
        assert_eq!(
            sig.prototype(),
            "void ConcreteClass::array_method(int* ad, int size)"
        );
        assert_eq!(sig.required_args(), 2);
        assert_eq!(sig.max_args(), Some(2));
    }

    #[test]
    fn test_accepts_native_by_kind() {
        let int = TypeSpec::parse("int").unwrap();
        assert!(int.accepts_native(&NativeValue::Int(1)));
        assert!(!int.accepts_native(&NativeValue::Str("1".to_string())));

        let text = TypeSpec::parse("const std::string&").unwrap();
        assert!(text.accepts_native(&NativeValue::Str("a".to_string())));
        assert!(!text.accepts_native(&NativeValue::Int(1)));

        let cstr = TypeSpec::parse("const char*").unwrap();
        assert!(cstr.accepts_native(&NativeValue::Str("a".to_string())));
        assert!(cstr.accepts_native(&NativeValue::Ptr(0)));

        let shape = TypeSpec::parse("const shapes::Shape*").unwrap();
        assert!(shape.accepts_native(&NativeValue::Ptr(64)));
        assert!(!shape.accepts_native(&NativeValue::Float(1.0)));

        let ratio = TypeSpec::parse("double").unwrap();
        assert!(ratio.accepts_native(&NativeValue::Int(2)));
        assert!(!ratio.accepts_native(&NativeValue::Ptr(64)));
    }

    #[test]
    fn test_signature_accepts_native() {
        let sig = Signature {
            id: MethodId(2),
            scope: ScopeId(3),
            scope_name: "Base".to_string(),
            name: "describe".to_string(),
            return_type: "std::string".to_string(),
            params: vec![Param::new("s", "const std::string&")],
            is_static: false,
            is_const: true,
            is_virtual: true,
            is_constructor: false,
            is_variadic: false,
            template: None,
        };
        assert!(sig.accepts_native(&[NativeValue::Str("hello".to_string())]));
        assert!(!sig.accepts_native(&[NativeValue::Int(7)]));
        assert!(!sig.accepts_native(&[]));
    }
}
