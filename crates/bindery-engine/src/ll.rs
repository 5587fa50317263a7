//! Low-level escape hatches
//!
//! Raw casts and array management that bypass the Overload Resolver. None
//! of these check that the memory really holds what the cast claims; they
//! exist for the cases the conversion machinery cannot express.

use std::sync::Arc;

use bindery_sdk::{Builtin, TypeSpec};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::LowLevelView;
use crate::value::Value;

/// Reduce `value` to a `bits`-wide integer the way a native conversion does
fn wrap_int(value: i128, bits: u8, signed: bool) -> i128 {
    if bits >= 128 {
        return value;
    }
    let modulus = 1i128 << bits;
    let wrapped = value.rem_euclid(modulus);
    if signed && wrapped >= modulus / 2 {
        wrapped - modulus
    } else {
        wrapped
    }
}

fn builtin_cast(kind: Builtin, value: &Value) -> BridgeResult<Value> {
    let bad = || BridgeError::conversion(format!("cannot cast {} to a number", value.type_name()));
    let integral = |value: &Value| -> BridgeResult<i128> {
        match value {
            Value::Float(f) if f.is_finite() => Ok(f.trunc() as i128),
            other => other.as_int().ok_or_else(bad),
        }
    };
    Ok(match kind {
        Builtin::Bool => Value::Bool(value.truthy()),
        Builtin::Float { bits: 32 } => Value::Float(value.as_float().ok_or_else(bad)? as f32 as f64),
        Builtin::Float { .. } => Value::Float(value.as_float().ok_or_else(bad)?),
        Builtin::Char { signed } => Value::Int(wrap_int(integral(value)?, 8, signed)),
        Builtin::WChar => Value::Int(wrap_int(integral(value)?, 32, true)),
        Builtin::Int { bits, signed } => Value::Int(wrap_int(integral(value)?, bits, signed)),
        Builtin::Void => return Err(BridgeError::conversion("cannot cast to void")),
    })
}

fn parse(ty: &str) -> BridgeResult<TypeSpec> {
    Ok(TypeSpec::parse(ty)?)
}

/// `static_cast<ty>(value)`: numeric conversion between builtins (floats
/// truncate toward zero) or a cast between related class pointers
pub fn static_cast(bridge: &Bridge, ty: &str, value: &Value) -> BridgeResult<Value> {
    let spec = parse(ty)?;
    if let (Some(kind), true) = (spec.builtin(), spec.pointers == 0) {
        return builtin_cast(kind, value);
    }
    let target = bridge
        .resolve_class(&spec.base)?
        .ok_or_else(|| BridgeError::unknown("", &spec.base))?;
    if value.is_null() {
        return Ok(Value::NullPtr);
    }
    let object = bridge.instance_of(value)?;
    let address = object.address()?;
    let from = object.class().id();
    let runtime = bridge.runtime();
    let cast_to = if let Some(offset) = runtime.base_offset(from, target) {
        address + offset as u64
    } else if let Some(offset) = runtime.base_offset(target, from) {
        address.checked_sub(offset as u64).ok_or_else(|| {
            BridgeError::conversion(format!("invalid downcast to {}", spec.base))
        })?
    } else {
        return Err(BridgeError::conversion(format!(
            "static_cast from {} to {}: classes are unrelated",
            object.class().qualified_name(),
            spec.base
        )));
    };
    Ok(Value::Object(bridge.view_as(cast_to, target)?))
}

/// Same as [`static_cast`]
pub fn cast(bridge: &Bridge, ty: &str, value: &Value) -> BridgeResult<Value> {
    static_cast(bridge, ty, value)
}

/// `reinterpret_cast<ty>(address)`: view the memory at an integer address
/// (or at another proxy's address) as `ty`.
///
/// Class types give a borrowed proxy; builtin types give a view of unknown
/// length. Address 0 gives an empty view (or `nullptr` for classes).
pub fn reinterpret_cast(bridge: &Bridge, ty: &str, value: &Value) -> BridgeResult<Value> {
    let address = match value {
        Value::Int(i) => u64::try_from(*i)
            .map_err(|_| BridgeError::conversion(format!("{} is not an address", i)))?,
        other => bridge.addressof(other)?,
    };
    let mut spec = parse(ty)?;
    if spec.pointers > 0 {
        spec.pointers -= 1;
    }
    if spec.builtin().is_some() || spec.pointers > 0 {
        let len = (address == 0).then_some(0);
        let view = LowLevelView::new(bridge.runtime().clone(), address, spec, len);
        return Ok(Value::View(Arc::new(view)));
    }
    let class = bridge
        .resolve_class(&spec.base)?
        .ok_or_else(|| BridgeError::unknown("", &spec.base))?;
    if address == 0 {
        return Ok(Value::NullPtr);
    }
    Ok(Value::Object(bridge.view_as(address, class)?))
}

/// `dynamic_cast<ty>(value)`: the object as `ty` if its runtime type
/// derives from `ty`, `nullptr` otherwise
pub fn dynamic_cast(bridge: &Bridge, ty: &str, value: &Value) -> BridgeResult<Value> {
    let spec = parse(ty)?;
    let target = bridge
        .resolve_class(&spec.base)?
        .ok_or_else(|| BridgeError::unknown("", &spec.base))?;
    if value.is_null() {
        return Ok(Value::NullPtr);
    }
    let object = bridge.instance_of(value)?;
    let runtime = bridge.runtime();
    let (actual, start) = runtime.dynamic_type(object.address()?, object.class().id());
    match runtime.base_offset(actual, target) {
        Some(offset) if runtime.is_subclass(actual, target) => {
            Ok(Value::Object(bridge.view_as(start + offset as u64, target)?))
        }
        _ => Ok(Value::NullPtr),
    }
}

/// Set the length of a pointer view
pub fn reshape(view: &Value, len: usize) -> BridgeResult<()> {
    match view {
        Value::View(view) => {
            view.reshape(len);
            Ok(())
        }
        other => Err(BridgeError::conversion(format!(
            "reshape() needs a pointer view, got {}",
            other.type_name()
        ))),
    }
}

/// Allocate a zeroed native array of `len` elements of type `ty`
pub fn array_new(bridge: &Bridge, ty: &str, len: usize) -> BridgeResult<Value> {
    let _token = bridge.token().acquire();
    let element = parse(ty)?;
    let size = bridge.converter(&element.to_string())?.size().max(1);
    let bytes = size
        .checked_mul(len)
        .ok_or_else(|| BridgeError::conversion(format!("array of {} {} is too large", len, ty)))?;
    let runtime = bridge.runtime();
    let address = runtime.allocate(bytes)?;
    runtime.write(address, &vec![0u8; bytes])?;
    tracing::debug!(target: "bindery::bridge", ty, len, address, "allocated native array");
    let view = LowLevelView::new(runtime.clone(), address, element, Some(len));
    Ok(Value::View(Arc::new(view)))
}

/// Release an array allocated by [`array_new`]
pub fn array_delete(bridge: &Bridge, view: &Value) -> BridgeResult<()> {
    let _token = bridge.token().acquire();
    match view {
        Value::View(view) => view.free(),
        other => Err(BridgeError::conversion(format!(
            "array_delete() needs an array view, got {}",
            other.type_name()
        ))),
    }
}
