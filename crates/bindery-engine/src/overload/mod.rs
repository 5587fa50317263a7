//! Overload Resolver
//!
//! Picks the native overload that best matches a call's arguments. Every
//! argument is ranked by its parameter's converter; a candidate with an
//! unconvertible argument is dropped, the rest are ordered by
//! [`SignatureRank::preference`].
//!
//! Candidates are tried in three phases, each only if the previous one
//! produced nothing: regular signatures, C-variadic signatures (extra
//! arguments passed at their natural type), then function templates
//! instantiated on demand from the deduced argument types.

pub mod rank;

use std::sync::Arc;

use bindery_sdk::{Signature, TypeSpec};

use crate::bridge::Bridge;
use crate::convert::{natural_type, vararg_type, Converter};
use crate::error::{BridgeError, BridgeResult};
use crate::reflect::OverloadSet;
use crate::value::Value;

pub use rank::{MatchRank, SignatureRank};

/// The chosen overload with one converter per passed argument
pub struct Resolution {
    /// Selected signature (an instantiation for templates)
    pub signature: Signature,
    /// Converters for the passed arguments, in order
    pub converters: Vec<Arc<dyn Converter>>,
    /// Rank the signature was selected with
    pub rank: SignatureRank,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("signature", &self.signature.prototype())
            .field("rank", &self.rank)
            .finish()
    }
}

struct Candidate {
    signature: Signature,
    converters: Vec<Arc<dyn Converter>>,
    rank: SignatureRank,
}

/// Describe argument types for diagnostics
pub fn describe_args(args: &[Value]) -> String {
    args.iter()
        .map(|a| a.type_name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn accepts_count(sig: &Signature, count: usize) -> bool {
    count >= sig.required_args() && sig.max_args().map_or(true, |max| count <= max)
}

/// Rank `args` against the declared parameters of `sig`.
///
/// Arguments past the declared parameters are ranked through `extra`,
/// which yields the type to pass them as.
fn rank_candidate(
    bridge: &Bridge,
    sig: &Signature,
    order: usize,
    args: &[Value],
    extra: Option<fn(&Value) -> Option<String>>,
) -> Option<Candidate> {
    let mut converters = Vec::with_capacity(args.len());
    let mut ranks = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let (ty, forced) = match sig.params.get(i) {
            Some(param) => (param.ty.clone(), None),
            None => (extra?(arg)?, Some(MatchRank::Conversion)),
        };
        let conv = match bridge.converter(&ty) {
            Ok(conv) => conv,
            Err(e) => {
                tracing::trace!(target: "bindery::resolve", ty = %ty, error = %e, "parameter type has no converter");
                return None;
            }
        };
        let rank = conv.rank(bridge, arg)?;
        ranks.push(forced.map_or(rank, |f| f.min(rank)));
        converters.push(conv);
    }
    Some(Candidate {
        signature: sig.clone(),
        converters,
        rank: SignatureRank::from_args(&ranks, order),
    })
}

/// Best candidate; ambiguous only when the best ones tie on narrowing
fn select(set: &OverloadSet, args: &[Value], mut candidates: Vec<Candidate>) -> BridgeResult<Option<Candidate>> {
    if candidates.is_empty() {
        return Ok(None);
    }
    candidates.sort_by(|a, b| a.rank.preference(&b.rank));
    let best_rank = candidates[0].rank;
    if best_rank.worst == MatchRank::Narrowing {
        let tied: Vec<String> = candidates
            .iter()
            .filter(|c| c.rank.ties_with(&best_rank))
            .map(|c| c.signature.prototype())
            .collect();
        if tied.len() > 1 {
            return Err(BridgeError::Ambiguous {
                name: set.qualified_name(),
                args: describe_args(args),
                candidates: tied,
            });
        }
    }
    Ok(candidates.into_iter().next())
}

/// Deduce template arguments from the call arguments
fn deduce(sig: &Signature, args: &[Value]) -> Option<Vec<String>> {
    let template = sig.template.as_ref()?;
    let pack = template
        .variadic
        .then(|| template.names.last().cloned())
        .flatten();
    let mut deduced: Vec<Option<String>> = vec![None; template.names.len()];
    let mut pack_args: Vec<String> = Vec::new();

    for (i, param) in sig.params.iter().enumerate() {
        if let Some(pack) = &pack {
            if param.ty.contains("...") && param.ty.contains(pack.as_str()) {
                for arg in args.iter().skip(i) {
                    pack_args.push(natural_type(arg)?);
                }
                break;
            }
        }
        let Some(arg) = args.get(i) else {
            break;
        };
        let Ok(spec) = TypeSpec::parse(&param.ty) else {
            continue;
        };
        if let Some(slot) = template.names.iter().position(|n| *n == spec.base) {
            if deduced[slot].is_none() {
                // T* deduces T from a pointer view
                let mut natural = natural_type(arg)?;
                for _ in 0..spec.pointers {
                    natural = natural.strip_suffix('*')?.to_string();
                }
                deduced[slot] = Some(natural);
            }
        }
    }

    let fixed = if pack.is_some() {
        template.names.len() - 1
    } else {
        template.names.len()
    };
    let mut out: Vec<String> = Vec::with_capacity(fixed + pack_args.len());
    for slot in deduced.into_iter().take(fixed) {
        out.push(slot?);
    }
    out.extend(pack_args);
    Some(out)
}

/// Resolve a call against an overload set.
///
/// Errors: `NoMatch` if nothing accepts the arguments, `Ambiguous` on a
/// narrowing tie, `InstantiationFailure` if only template candidates
/// remained and none could be instantiated.
pub fn resolve(bridge: &Bridge, set: &OverloadSet, args: &[Value]) -> BridgeResult<Resolution> {
    let regular: Vec<Candidate> = set
        .signatures
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_template() && !s.is_variadic && accepts_count(s, args.len()))
        .filter_map(|(order, s)| rank_candidate(bridge, s, order, args, None))
        .collect();
    if let Some(found) = select(set, args, regular)? {
        return Ok(chosen(set, found, "regular"));
    }

    let variadic: Vec<Candidate> = set
        .signatures
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_template() && s.is_variadic && args.len() >= s.required_args())
        .filter_map(|(order, s)| rank_candidate(bridge, s, order, args, Some(vararg_type)))
        .collect();
    if let Some(found) = select(set, args, variadic)? {
        return Ok(chosen(set, found, "variadic"));
    }

    let mut failure: Option<BridgeError> = None;
    let mut instantiated = Vec::new();
    for (order, sig) in set.signatures.iter().enumerate().filter(|(_, s)| s.is_template()) {
        let Some(template_args) = deduce(sig, args) else {
            continue;
        };
        match bridge
            .runtime()
            .instantiate_function(sig.scope, &sig.name, &template_args)
        {
            Ok(inst) => {
                if !accepts_count(&inst, args.len()) {
                    continue;
                }
                if let Some(c) = rank_candidate(bridge, &inst, order, args, None) {
                    instantiated.push(c);
                }
            }
            Err(e) => {
                tracing::debug!(target: "bindery::resolve", name = %sig.qualified_name(), error = %e, "template instantiation failed");
                failure.get_or_insert(BridgeError::InstantiationFailure {
                    name: sig.qualified_name(),
                    args: template_args.join(","),
                    reason: e.to_string(),
                });
            }
        }
    }
    if let Some(found) = select(set, args, instantiated)? {
        return Ok(chosen(set, found, "template"));
    }
    if let Some(err) = failure {
        return Err(err);
    }

    Err(BridgeError::NoMatch {
        name: set.qualified_name(),
        args: describe_args(args),
        candidates: set.signatures.iter().map(|s| s.prototype()).collect(),
    })
}

fn chosen(set: &OverloadSet, c: Candidate, phase: &str) -> Resolution {
    tracing::debug!(
        target: "bindery::resolve",
        name = %set.qualified_name(),
        signature = %c.signature.prototype(),
        rank = %c.rank.worst,
        phase,
        "selected overload"
    );
    Resolution {
        signature: c.signature,
        converters: c.converters,
        rank: c.rank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_sdk::{MethodId, Param, ScopeId, TemplateParams};

    fn template(names: &[&str], variadic: bool, params: &[(&str, &str)]) -> Signature {
        Signature {
            id: MethodId(0),
            scope: ScopeId::GLOBAL,
            scope_name: String::new(),
            name: "f".to_string(),
            return_type: "void".to_string(),
            params: params.iter().map(|(n, t)| Param::new(n, t)).collect(),
            is_static: true,
            is_const: false,
            is_virtual: false,
            is_constructor: false,
            is_variadic: false,
            template: Some(TemplateParams {
                names: names.iter().map(|n| n.to_string()).collect(),
                variadic,
            }),
        }
    }

    #[test]
    fn test_deduce_from_reference_param() {
        let sig = template(&["T"], false, &[("x", "const T&")]);
        assert_eq!(deduce(&sig, &[Value::Float(1.5)]), Some(vec!["double".to_string()]));
        assert_eq!(deduce(&sig, &[Value::Int(3)]), Some(vec!["int".to_string()]));
    }

    #[test]
    fn test_deduce_variadic_pack() {
        let sig = template(&["R", "Args"], true, &[("r", "R"), ("args", "Args...")]);
        assert_eq!(
            deduce(&sig, &[Value::Bool(true), Value::Int(1), Value::Str("s".into())]),
            Some(vec!["bool".to_string(), "int".to_string(), "std::string".to_string()])
        );
    }

    #[test]
    fn test_undeducible_template_is_skipped() {
        let sig = template(&["T"], false, &[]);
        assert_eq!(deduce(&sig, &[]), None);
    }
}
