//! Host subclasses of native classes and reverse calls
//!
//! Tests cover:
//! - Native virtual calls reaching host overrides
//! - Methods without an override falling back to native dispatch
//! - Host errors crossing native frames (caught and uncaught)
//! - Abstract bases
//! - Downcasting and identity of objects coming back from native code
//! - Overloaded virtual methods
//! - Releasing the exclusive token around long native calls
//! - Native virtual calls from native threads

mod common;

use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use bindery_engine::{Bridge, BridgeError, HostClass, HostError, Value};
use bindery_sdk::{NativeCallContext, NativeValue};
use common::{declare_shapes, float, int, string, world_with, World};

fn shapes() -> World {
    world_with(declare_shapes)
}

/// Host class whose area is `m_sides * 1.5`
fn triangle(w: &World) -> Arc<HostClass> {
    let base = w.get("shapes.Shape");
    let class = w
        .bridge
        .host_class("Triangle", &base)
        .unwrap()
        .method("area", |bridge: &Bridge, this: &Value, _args: &[Value]| {
            let sides = bridge.getattr(this, "m_sides")?;
            Ok(Value::Float(sides.as_int().unwrap_or(0) as f64 * 1.5))
        });
    Arc::new(class)
}

// ===== Overrides =====

#[test]
fn test_native_virtual_call_reaches_host_override() {
    let w = shapes();
    let t = w.bridge.instantiate_host(&triangle(&w), &[]).unwrap();
    w.bridge.setattr(&t, "m_sides", &Value::Int(3)).unwrap();

    assert_eq!(float(&w.call("shapes.area_of", &[t.clone()])), 4.5);
    // host side sees the override too
    assert_eq!(float(&w.bridge.call_method(&t, "area", &[]).unwrap()), 4.5);
}

#[test]
fn test_unoverridden_virtual_uses_native_implementation() {
    let w = shapes();
    let t = w.bridge.instantiate_host(&triangle(&w), &[]).unwrap();
    w.bridge.setattr(&t, "m_sides", &Value::Int(3)).unwrap();

    assert_eq!(string(&w.call("shapes.name_of", &[t.clone()])), "shape");
    assert_eq!(int(&w.call("shapes.sides_of", &[t.clone(), Value::Int(2)])), 6);
    assert_eq!(string(&w.bridge.call_method(&t, "name", &[]).unwrap()), "shape");
}

#[test]
fn test_override_receives_converted_arguments() {
    let w = shapes();
    let base = w.get("shapes.Shape");
    let class = w
        .bridge
        .host_class("Doubler", &base)
        .unwrap()
        .method("area", |_: &Bridge, _: &Value, _: &[Value]| Ok(Value::Float(1.0)))
        .method("scaled_sides", |_: &Bridge, _: &Value, args: &[Value]| {
            let factor = args.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(factor * 100))
        });
    let d = w.bridge.instantiate_host(&Arc::new(class), &[]).unwrap();
    assert_eq!(int(&w.call("shapes.sides_of", &[d, Value::Int(3)])), 300);
}

#[test]
fn test_override_with_wrong_result_type_is_an_error() {
    let w = shapes();
    let base = w.get("shapes.Shape");
    let class = w
        .bridge
        .host_class("Broken", &base)
        .unwrap()
        .method("area", |_: &Bridge, _: &Value, _: &[Value]| Ok(Value::from("wide")));
    let b = w.bridge.instantiate_host(&Arc::new(class), &[]).unwrap();
    let area_of = w.get("shapes.area_of");
    assert!(w.bridge.call(&area_of, &[b]).is_err());
}

// ===== Host Errors =====

fn failing(w: &World) -> Value {
    let base = w.get("shapes.Shape");
    let class = w
        .bridge
        .host_class("Failing", &base)
        .unwrap()
        .method("area", |_: &Bridge, _: &Value, _: &[Value]| {
            Err(BridgeError::Host(HostError::new("ValueError", "bad")))
        });
    w.bridge.instantiate_host(&Arc::new(class), &[]).unwrap()
}

#[test]
fn test_host_error_propagates_through_native_frames() {
    let w = shapes();
    let f = failing(&w);
    let area_of = w.get("shapes.area_of");
    match w.bridge.call(&area_of, &[f]) {
        Err(BridgeError::Host(err)) => {
            assert_eq!(err.kind, "ValueError");
            assert_eq!(err.message, "bad");
        }
        other => panic!("expected the host error back, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_native_code_can_catch_host_errors() {
    let w = shapes();
    let f = failing(&w);
    assert_eq!(float(&w.call("shapes.safe_area", &[f])), -1.0);
}

// ===== Abstract Classes =====

#[test]
fn test_abstract_class_cannot_be_constructed() {
    let w = shapes();
    let shape = w.get("shapes.Shape");
    assert!(matches!(
        w.bridge.call(&shape, &[]),
        Err(BridgeError::AbstractClass(_))
    ));
}

#[test]
fn test_missing_pure_virtual_override() {
    let w = shapes();
    let base = w.get("shapes.Shape");
    let class = w
        .bridge
        .host_class("Incomplete", &base)
        .unwrap()
        .method("name", |_: &Bridge, _: &Value, _: &[Value]| Ok(Value::from("incomplete")));
    match w.bridge.instantiate_host(&Arc::new(class), &[]) {
        Err(BridgeError::AbstractClass(msg)) => assert!(msg.contains("area"), "{}", msg),
        other => panic!("expected AbstractClass, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_host_class_needs_a_native_base() {
    let w = shapes();
    assert!(w.bridge.host_class("Nothing", &Value::Int(1)).is_err());
}

// ===== Downcasts and Identity =====

#[test]
fn test_returned_base_pointer_is_downcast() {
    let w = shapes();
    let sq = w.call("shapes.make_square", &[Value::Float(2.0)]);
    let object = sq.as_instance().unwrap();
    assert_eq!(object.class().qualified_name(), "shapes::Square");
    assert_eq!(float(&w.bridge.call_method(&sq, "area", &[]).unwrap()), 4.0);
    assert_eq!(float(&w.bridge.getattr(&sq, "m_side").unwrap()), 2.0);
    // base members through the derived proxy
    assert_eq!(int(&w.bridge.getattr(&sq, "m_sides").unwrap()), 4);
    w.bridge.set_ownership(&sq, true).unwrap();
}

#[test]
fn test_native_square_through_base_function() {
    let w = shapes();
    let square = w.get("shapes.Square");
    let sq = w.bridge.call(&square, &[Value::Float(3.0)]).unwrap();
    assert_eq!(float(&w.call("shapes.area_of", &[sq.clone()])), 9.0);
    assert_eq!(string(&w.call("shapes.name_of", &[sq])), "square");
}

#[test]
fn test_host_instance_keeps_identity() {
    let w = shapes();
    let t = w.bridge.instantiate_host(&triangle(&w), &[]).unwrap();
    let back = w.call("shapes.pass_through", &[t.clone()]);
    assert!(back.is(&t));
    assert_eq!(
        back.as_instance().unwrap().host_class().map(|h| h.name().to_string()),
        Some("Triangle".to_string())
    );
}

#[test]
fn test_host_instances_are_released() {
    let w = shapes();
    let objects = w.runtime.live_objects();
    let before = w.bridge.host_instances();
    let class = triangle(&w);

    let a = w.bridge.instantiate_host(&class, &[]).unwrap();
    let b = w.bridge.instantiate_host(&class, &[]).unwrap();
    assert_eq!(w.bridge.host_instances(), before + 2);
    assert_eq!(w.runtime.live_objects(), objects + 2);

    drop(a);
    drop(b);
    assert_eq!(w.bridge.host_instances(), before);
    assert_eq!(w.runtime.live_objects(), objects);
}

// ===== Overloaded Virtuals =====

fn declare_describers(b: &mut bindery_engine::RuntimeBuilder) {
    b.namespace("text", |ns| {
        ns.class("Describer", 8, |c| {
            c.method("virtual std::string describe(int n) const", |f| {
                Ok(NativeValue::Str(format!("native int {}", f.int(0)?)))
            });
            c.method("virtual std::string describe(const std::string& s) const", |f| {
                Ok(NativeValue::Str(format!("native string {}", f.str(0)?)))
            });
        });
        ns.function("std::string describe_text(const text::Describer* d)", |f| {
            f.ctx.call_virtual(f.ptr(0)?, "describe", &[NativeValue::Str("hello".to_string())])
        });
        ns.function("std::string describe_number(const text::Describer* d)", |f| {
            f.ctx.call_virtual(f.ptr(0)?, "describe", &[NativeValue::Int(7)])
        });
    });
}

#[test]
fn test_native_overloaded_virtual_picks_by_argument_kind() {
    let w = world_with(declare_describers);
    let d = w.call("text.Describer", &[]);
    assert_eq!(string(&w.call("text.describe_text", &[d.clone()])), "native string hello");
    assert_eq!(string(&w.call("text.describe_number", &[d])), "native int 7");
}

#[test]
fn test_host_override_of_overloaded_virtual() {
    let w = world_with(declare_describers);
    let base = w.get("text.Describer");
    let class = w
        .bridge
        .host_class("Echo", &base)
        .unwrap()
        .method("describe", |_: &Bridge, _: &Value, args: &[Value]| match args.first() {
            Some(Value::Str(s)) => Ok(Value::from(format!("host string {}", s))),
            Some(Value::Int(n)) => Ok(Value::from(format!("host int {}", n))),
            other => Err(BridgeError::Host(HostError::new(
                "TypeError",
                format!("unexpected {:?}", other),
            ))),
        });
    let e = w.bridge.instantiate_host(&Arc::new(class), &[]).unwrap();
    assert_eq!(string(&w.call("text.describe_text", &[e.clone()])), "host string hello");
    assert_eq!(string(&w.call("text.describe_number", &[e])), "host int 7");
}

// ===== Token Release =====

#[test]
fn test_released_token_lets_other_threads_call_in() {
    let barrier = Arc::new(Barrier::new(2));
    let shared = barrier.clone();
    let w = world_with(move |b| {
        b.namespace("pool", |ns| {
            ns.function("void rendezvous()", move |_| {
                shared.wait();
                Ok(NativeValue::Void)
            });
        });
    });
    let Value::Callable(rendezvous) = w.get("pool.rendezvous") else {
        panic!("pool.rendezvous is not callable");
    };
    rendezvous.set_release_gil(true);
    assert!(rendezvous.release_gil());

    // both calls block in native code until the other arrives
    thread::scope(|s| {
        for _ in 0..2 {
            let bridge = w.bridge.clone();
            s.spawn(move || {
                let f = bridge.lookup("pool.rendezvous").unwrap();
                bridge.call(&f, &[]).unwrap();
            });
        }
    });
    assert!(!w.bridge.token().is_held());
}

#[test]
fn test_native_virtual_call_does_not_wait_for_the_token() {
    let w = shapes();
    let _t = w.bridge.instantiate_host(&triangle(&w), &[]).unwrap();
    let square = w.call("shapes.make_square", &[Value::Float(3.0)]);
    let address = w.bridge.addressof(&square).unwrap();

    let guard = w.bridge.token().acquire();
    let (tx, rx) = mpsc::channel();
    let runtime = w.runtime.clone();
    let worker = thread::spawn(move || {
        let _ = tx.send(runtime.call_virtual(address, "area", &[]));
    });
    let area = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("native virtual call blocked on the token")
        .unwrap();
    assert_eq!(area, NativeValue::Float(9.0));
    drop(guard);
    worker.join().unwrap();
}

#[test]
fn test_host_override_from_native_thread_waits_for_the_token() {
    let w = shapes();
    let t = w.bridge.instantiate_host(&triangle(&w), &[]).unwrap();
    w.bridge.setattr(&t, "m_sides", &Value::Int(3)).unwrap();
    let address = w.bridge.addressof(&t).unwrap();

    let guard = w.bridge.token().acquire();
    let (tx, rx) = mpsc::channel();
    let runtime = w.runtime.clone();
    let worker = thread::spawn(move || {
        let _ = tx.send(runtime.call_virtual(address, "area", &[]));
    });
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(guard);
    let area = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(area, NativeValue::Float(4.5));
    worker.join().unwrap();
}
