//! Pythonizations
//!
//! Tests cover:
//! - Scope callbacks (filtering, removal)
//! - Composed methods, renames, ownership and size rules
//! - Builtin container protocols on `std::vector<T>`
//! - `__str__` from conversion operators

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bindery_engine::{
    Bridge, BridgeError, HostType, PostProcessor, PythonizationFn, RuntimeBuilder, ScopeProxy, Value,
};
use bindery_sdk::NativeValue;
use common::{declare_counters, declare_geo, float, int, string, world_with, World};

fn geo_and_counters() -> World {
    world_with(|b| {
        declare_geo(b);
        declare_counters(b);
    })
}

// ===== Callbacks =====

#[test]
fn test_callback_runs_once_per_matching_scope() {
    let w = geo_and_counters();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let callback: PythonizationFn = Arc::new(move |_: &Bridge, scope: &Arc<ScopeProxy>| {
        counter.fetch_add(1, Ordering::SeqCst);
        scope.set_attr("tagged", Value::Bool(true));
        Ok(())
    });
    w.bridge.add_pythonization(callback, "geo");

    let point = w.get("geo.Point");
    assert_eq!(seen.load(Ordering::SeqCst), 2, "geo and geo::Point");
    w.get("geo.Point");
    w.call("geo.Point", &[]);
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    assert!(w.bridge.getattr(&point, "tagged").unwrap().is(&Value::Bool(true)));

    // outside the filter
    w.get("Counter");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_removed_callback_no_longer_runs() {
    let w = geo_and_counters();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let handle = w.bridge.add_pythonization(
        Arc::new(move |_: &Bridge, _: &Arc<ScopeProxy>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        "",
    );
    assert!(w.bridge.remove_pythonization(handle));
    assert!(!w.bridge.remove_pythonization(handle));

    w.get("geo.Point");
    w.get("Counter");
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_callback_can_add_host_methods() {
    let w = geo_and_counters();
    w.bridge.add_pythonization(
        Arc::new(|bridge: &Bridge, scope: &Arc<ScopeProxy>| {
            if scope.qualified_name() == "geo::Point" {
                let point = Value::Scope(scope.clone());
                bridge.setattr(
                    &point,
                    "__doc__",
                    &Value::from("a point in the plane"),
                )?;
            }
            Ok(())
        }),
        "geo::Point",
    );
    let point = w.get("geo.Point");
    assert_eq!(
        string(&w.bridge.getattr(&point, "__doc__").unwrap()),
        "a point in the plane"
    );
}

// ===== Method Rules =====

#[test]
fn test_composed_method_post_processes_result() {
    let w = geo_and_counters();
    let double: PostProcessor = Arc::new(|_: &Bridge, value: Value| match value {
        Value::Float(x) => Ok(Value::Float(x * 2.0)),
        other => Ok(other),
    });
    w.bridge.compose_method("^geo::Point$", "^norm$", double).unwrap();

    let p = w.call("geo.Point", &[Value::Float(3.0), Value::Float(4.0)]);
    assert_eq!(float(&w.bridge.call_method(&p, "norm", &[]).unwrap()), 10.0);
    // other methods are untouched
    let q = w.bridge.call_method(&p, "scaled", &[Value::Float(1.0)]).unwrap();
    assert_eq!(float(&w.bridge.getattr(&q, "x").unwrap()), 3.0);
}

#[test]
fn test_invalid_pattern_is_config_error() {
    let w = geo_and_counters();
    assert!(matches!(
        w.bridge.set_ownership_transfer("[", "x"),
        Err(BridgeError::Config(_))
    ));
    assert!(matches!(
        w.bridge.set_size_arg("Buffer", "(", 0),
        Err(BridgeError::Config(_))
    ));
}

#[test]
fn test_rename_before_proxy_creation() {
    let w = geo_and_counters();
    w.bridge.rename_attribute("geo::Point", "norm", "length").unwrap();

    let p = w.call("geo.Point", &[Value::Float(3.0), Value::Float(4.0)]);
    assert_eq!(float(&w.bridge.call_method(&p, "length", &[]).unwrap()), 5.0);
    assert!(matches!(
        w.bridge.call_method(&p, "norm", &[]),
        Err(BridgeError::UnknownEntity { .. })
    ));
}

#[test]
fn test_rename_applies_to_live_proxy() {
    let w = geo_and_counters();
    let p = w.call("geo.Point", &[Value::Float(1.0), Value::Float(0.0)]);
    w.bridge.rename_attribute("::geo::Point", "scaled", "times").unwrap();

    let q = w.bridge.call_method(&p, "times", &[Value::Float(5.0)]).unwrap();
    assert_eq!(float(&w.bridge.getattr(&q, "x").unwrap()), 5.0);
    assert!(w.bridge.call_method(&p, "scaled", &[Value::Float(5.0)]).is_err());
}

fn declare_buffer(b: &mut RuntimeBuilder) {
    b.class("Buffer", 8, |c| {
        c.constructor("", |f| {
            let this = f.this()?;
            let data = f.ctx.allocate(8 * 8)?;
            for i in 0..8u64 {
                f.ctx.write_f64(data + i * 8, i as f64 * 0.5)?;
            }
            f.ctx.write_ptr(this, data)?;
            Ok(NativeValue::Void)
        });
        c.destructor(|f| {
            let data = f.ctx.read_ptr(f.this()?)?;
            f.ctx.free(data)?;
            Ok(NativeValue::Void)
        });
        c.method("double* values(int n)", |f| {
            Ok(NativeValue::Ptr(f.ctx.read_ptr(f.this()?)?))
        });
    });
}

#[test]
fn test_size_argument_gives_view_a_length() {
    let w = world_with(declare_buffer);
    let buffer = w.call("Buffer", &[]);

    let unsized_view = w.bridge.call_method(&buffer, "values", &[Value::Int(3)]).unwrap();
    assert!(w.bridge.len(&unsized_view).is_err());

    w.bridge.set_size_arg("^Buffer$", "^values$", 0).unwrap();
    let view = w.bridge.call_method(&buffer, "values", &[Value::Int(3)]).unwrap();
    assert_eq!(w.bridge.len(&view).unwrap(), 3);
    assert_eq!(float(&w.bridge.getitem(&view, &Value::Int(2)).unwrap()), 1.0);
    assert!(matches!(
        w.bridge.getitem(&view, &Value::Int(3)),
        Err(BridgeError::Bounds { index: 3, len: 3, .. })
    ));

    // writes land in the native buffer
    w.bridge.setitem(&view, &Value::Int(0), &Value::Float(9.0)).unwrap();
    let again = w.bridge.call_method(&buffer, "values", &[Value::Int(8)]).unwrap();
    assert_eq!(float(&w.bridge.getitem(&again, &Value::Int(0)).unwrap()), 9.0);
    assert_eq!(w.bridge.len(&again).unwrap(), 8);
}

// ===== Container Protocols =====

fn double_vector(w: &World) -> Value {
    let vector = w.get("std.vector");
    let class = w.bridge.instantiate(&vector, &[Value::from(HostType::Float)]).unwrap();
    w.bridge.call(&class, &[]).unwrap()
}

#[test]
fn test_vector_extend_and_len() {
    let w = world_with(|_| {});
    let v = double_vector(&w);
    assert_eq!(w.bridge.len(&v).unwrap(), 0);

    let items = Value::List(vec![Value::Float(1.0), Value::Float(2.0), Value::Int(3)]);
    w.bridge.call_method(&v, "extend", &[items]).unwrap();
    assert_eq!(w.bridge.len(&v).unwrap(), 3);
    assert!(w.bridge.call_method(&v, "extend", &[Value::Float(1.0)]).is_err());
}

#[test]
fn test_vector_indexing() {
    let w = world_with(|_| {});
    let v = double_vector(&w);
    let items = Value::List(vec![Value::Float(1.5), Value::Float(2.5), Value::Float(3.5)]);
    w.bridge.call_method(&v, "extend", &[items]).unwrap();

    assert_eq!(float(&w.bridge.getitem(&v, &Value::Int(0)).unwrap()), 1.5);
    assert_eq!(float(&w.bridge.getitem(&v, &Value::Int(-1)).unwrap()), 3.5);

    w.bridge.setitem(&v, &Value::Int(1), &Value::Float(7.0)).unwrap();
    assert_eq!(float(&w.bridge.call_method(&v, "at", &[Value::Int(1)]).unwrap()), 7.0);
    w.bridge.setitem(&v, &Value::Int(-3), &Value::Float(0.0)).unwrap();
    assert_eq!(float(&w.bridge.getitem(&v, &Value::Int(0)).unwrap()), 0.0);
}

#[test]
fn test_vector_index_out_of_range() {
    let w = world_with(|_| {});
    let v = double_vector(&w);
    w.bridge
        .call_method(&v, "push_back", &[Value::Float(1.0)])
        .unwrap();
    assert!(matches!(
        w.bridge.getitem(&v, &Value::Int(1)),
        Err(BridgeError::Bounds { index: 1, len: 1, .. })
    ));
    assert!(matches!(
        w.bridge.getitem(&v, &Value::Int(-2)),
        Err(BridgeError::Bounds { .. })
    ));
    assert!(matches!(
        w.bridge.setitem(&v, &Value::Int(5), &Value::Float(0.0)),
        Err(BridgeError::Bounds { .. })
    ));
    // native range check on the unchecked path
    match w.bridge.call_method(&v, "at", &[Value::Int(4)]) {
        Err(err @ BridgeError::NativeException { .. }) => {
            assert_eq!(err.kind_name(), "std::out_of_range")
        }
        other => panic!("expected std::out_of_range, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_vector_buffers_are_released() {
    let w = world_with(|_| {});
    let blocks = w.runtime.live_blocks();
    let v = double_vector(&w);
    let items = Value::List((0..100).map(Value::from).collect());
    w.bridge.call_method(&v, "extend", &[items]).unwrap();
    assert_eq!(w.bridge.len(&v).unwrap(), 100);
    drop(v);
    assert_eq!(w.runtime.live_blocks(), blocks);
}

// ===== String Conversion =====

#[test]
fn test_str_from_conversion_operator() {
    let w = world_with(|b| {
        b.class("Label", 4, |c| {
            c.data("int m_id", 0);
            c.constructor("int id", |f| {
                f.ctx.write_i32(f.this()?, f.int(0)? as i32)?;
                Ok(NativeValue::Void)
            });
            c.method("operator std::string() const", |f| {
                let id = f.ctx.read_i32(f.this()?)?;
                Ok(NativeValue::Str(format!("label #{}", id)))
            });
        });
        declare_counters(b);
    });
    let label = w.call("Label", &[Value::Int(7)]);
    assert_eq!(w.bridge.to_string(&label).unwrap(), "label #7");
    assert_eq!(int(&w.bridge.getattr(&label, "m_id").unwrap()), 7);

    // no conversion operator: falls back to a generic description
    let counter = w.call("Counter", &[]);
    let text = w.bridge.to_string(&counter).unwrap();
    assert!(!text.is_empty());
}
