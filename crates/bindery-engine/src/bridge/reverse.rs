//! Reverse calls: native → host
//!
//! The shim is installed in the runtime when the bridge is created. Native
//! virtual calls on an object registered in the dispatch table go to the
//! host override; the token is acquired only on that path, before any host
//! state is touched, and host errors travel back as native-catchable throws.
//! Calls on plain native objects never wait for the token.

use std::sync::{Arc, Weak};

use bindery_sdk::{Address, NativeThrow, NativeValue, ReverseDispatch, Signature};

use super::{Bridge, BridgeState};
use crate::convert::Temporaries;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::{HostMethod, InstanceProxy};
use crate::reflect::Entity;
use crate::value::Value;

pub(crate) struct ReverseShim {
    state: Weak<BridgeState>,
}

impl ReverseShim {
    pub(crate) fn new(state: Weak<BridgeState>) -> Self {
        Self { state }
    }
}

impl ReverseDispatch for ReverseShim {
    fn dispatch(
        &self,
        this: Address,
        method: &str,
        args: &[NativeValue],
    ) -> Option<Result<NativeValue, NativeThrow>> {
        let state = self.state.upgrade()?;
        if !state.dispatch.overrides(this, method) {
            return None;
        }
        let bridge = Bridge { state };
        let _token = bridge.state.token.acquire();
        // re-check under the token: the proxy may have been dropped meanwhile
        let (class, proxy) = bridge.state.dispatch.get(this)?;
        let host = class.lookup(method)?.clone();
        tracing::debug!(target: "bindery::reverse", class = class.name(), method, "dispatching to host override");
        let result = bridge.reverse_call(&proxy, &host, method, args).map_err(|e| {
            tracing::debug!(target: "bindery::reverse", method, error = %e, "host override raised");
            NativeThrow::host(e.kind_name(), e.message())
        });
        Some(result)
    }
}

impl Bridge {
    /// Native signature a host override stands in for: the first virtual
    /// overload whose parameter types fit the argument values, else the
    /// first one taking that many arguments
    fn overridden_signature(&self, proxy: &InstanceProxy, method: &str, args: &[NativeValue]) -> BridgeResult<Signature> {
        let class = proxy.class();
        match self.gateway().lookup_member(class.id(), method)? {
            Some((Entity::Function(set), _)) => {
                let instance = || set.signatures.iter().filter(|s| !s.is_static);
                instance()
                    .find(|s| s.accepts_native(args))
                    .or_else(|| instance().find(|s| s.params.len() == args.len()))
                    .cloned()
                    .ok_or_else(|| BridgeError::NoMatch {
                        name: set.qualified_name(),
                        args: format!("{} native arguments", args.len()),
                        candidates: set.signatures.iter().map(|s| s.prototype()).collect(),
                    })
            }
            _ => Err(BridgeError::unknown(class.qualified_name(), method)),
        }
    }

    fn reverse_call(
        &self,
        proxy: &Arc<InstanceProxy>,
        host: &HostMethod,
        method: &str,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        let sig = self.overridden_signature(proxy, method, args)?;
        let host_args = sig
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| self.converter(&param.ty)?.from_native(self, arg.clone(), false))
            .collect::<BridgeResult<Vec<Value>>>()?;

        let receiver = Value::Object(proxy.clone());
        let result = host.call(self, &receiver, &host_args)?;

        if sig.return_type == "void" {
            return Ok(NativeValue::Void);
        }
        let mut temps = Temporaries::new(self.runtime().clone());
        let native = self
            .converter(&sig.return_type)?
            .to_native(self, &result, &mut temps)?;
        if !temps.is_empty() {
            tracing::warn!(target: "bindery::reverse", method, "override result needed call temporaries; they are released on return");
        }
        Ok(native)
    }
}
