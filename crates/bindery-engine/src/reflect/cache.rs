//! Cached reflection records

use bindery_sdk::{EntityDecl, ScopeId, Signature};

/// Ordered overload set of one name in one scope
#[derive(Debug, Clone)]
pub struct OverloadSet {
    /// Declaring scope
    pub scope: ScopeId,
    /// Qualified name of the declaring scope
    pub scope_name: String,
    /// Function name
    pub name: String,
    /// Signatures in declaration order
    pub signatures: Vec<Signature>,
    /// Declaration epoch the set was read at
    pub(crate) epoch: u64,
}

impl OverloadSet {
    pub(crate) fn new(
        scope: ScopeId,
        scope_name: &str,
        name: &str,
        signatures: Vec<Signature>,
        epoch: u64,
    ) -> Self {
        Self {
            scope,
            scope_name: scope_name.to_string(),
            name: name.to_string(),
            signatures,
            epoch,
        }
    }

    /// Same set restricted to `signatures`
    pub fn with_signatures(&self, signatures: Vec<Signature>) -> Self {
        Self {
            signatures,
            ..self.clone()
        }
    }

    /// `Scope::name`
    pub fn qualified_name(&self) -> String {
        if self.scope_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope_name, self.name)
        }
    }

    /// Number of signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Check if the set has no signatures
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Check if every overload is a constructor
    pub fn is_constructor(&self) -> bool {
        !self.signatures.is_empty() && self.signatures.iter().all(|s| s.is_constructor)
    }

    /// Check if any overload needs an instance
    pub fn has_methods(&self) -> bool {
        self.signatures
            .iter()
            .any(|s| !s.is_static && !s.is_constructor)
    }
}

/// A cached lookup result
#[derive(Debug, Clone)]
pub(crate) enum Cached {
    /// The name exists
    Found(EntityDecl),
    /// The name was absent at this autoload generation and declaration epoch
    Missing { generation: u64, epoch: u64 },
}
