//! Class template proxies

use bindery_sdk::{normalize_name, split_template_args, ScopeId};

use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;

/// Proxy for an uninstantiated class template (`std::vector`)
pub struct TemplateProxy {
    scope: ScopeId,
    scope_name: String,
    name: String,
}

impl TemplateProxy {
    pub(crate) fn new(scope: ScopeId, scope_name: &str, name: &str) -> Self {
        Self {
            scope,
            scope_name: scope_name.to_string(),
            name: name.to_string(),
        }
    }

    /// Declaring scope
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Scope::name`
    pub fn qualified_name(&self) -> String {
        if self.scope_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope_name, self.name)
        }
    }
}

/// Native template arguments for host values.
///
/// Strings may hold several comma-separated arguments; whitespace around
/// the commas is insignificant. Classes stand for their qualified name,
/// integers for non-type arguments.
pub fn template_args(args: &[Value]) -> BridgeResult<Vec<String>> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Str(s) => out.extend(split_template_args(s)),
            Value::Scope(s) => out.push(s.qualified_name().to_string()),
            Value::Enum(e) => out.push(e.qualified_name().to_string()),
            Value::Int(i) => out.push(i.to_string()),
            Value::Bool(b) => out.push(b.to_string()),
            other => {
                return Err(BridgeError::conversion(format!(
                    "{} is not a valid template argument",
                    other.type_name()
                )))
            }
        }
    }
    Ok(out.into_iter().map(|a| normalize_name(&a)).collect())
}
