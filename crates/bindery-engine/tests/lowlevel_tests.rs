//! Low-level casts, arrays and pointer views
//!
//! Tests cover:
//! - Numeric static casts
//! - Class casts through single and multiple inheritance
//! - reinterpret_cast of raw addresses
//! - Native arrays and array data members
//! - sizeof / addressof

mod common;

use bindery_engine::{ll, BridgeError, RuntimeBuilder, Value};
use bindery_sdk::NativeValue;
use common::{declare_counters, float, int, world_with, World};

fn declare_diamondless(b: &mut RuntimeBuilder) {
    b.class("Left", 8, |c| {
        c.data("int a", 0);
    });
    b.class("Right", 8, |c| {
        c.data("int b", 0);
    });
    b.class("Both", 16, |c| {
        c.base("Left");
        c.base_at("Right", 8);
        c.constructor("", |f| {
            let this = f.this()?;
            f.ctx.write_i32(this, 1)?;
            f.ctx.write_i32(this + 8, 2)?;
            Ok(NativeValue::Void)
        });
    });
}

fn casts() -> World {
    world_with(|b| {
        declare_diamondless(b);
        declare_counters(b);
    })
}

// ===== Numeric Casts =====

#[test]
fn test_static_cast_between_numbers() {
    let w = casts();
    let b = &w.bridge;
    assert_eq!(int(&ll::static_cast(b, "int", &Value::Float(3.7)).unwrap()), 3);
    assert_eq!(int(&ll::static_cast(b, "int", &Value::Float(-3.7)).unwrap()), -3);
    assert_eq!(int(&ll::static_cast(b, "unsigned char", &Value::Int(300)).unwrap()), 44);
    assert_eq!(int(&ll::static_cast(b, "signed char", &Value::Int(200)).unwrap()), -56);
    assert_eq!(float(&ll::static_cast(b, "double", &Value::Int(2)).unwrap()), 2.0);
    assert_eq!(float(&ll::cast(b, "float", &Value::Float(0.1)).unwrap()), 0.1f32 as f64);
    assert!(ll::static_cast(b, "bool", &Value::Int(5)).unwrap().is(&Value::Bool(true)));
    assert!(ll::static_cast(b, "int", &Value::from("7")).is_err());
}

// ===== Class Casts =====

#[test]
fn test_upcast_adjusts_for_base_offset() {
    let w = casts();
    let both = w.call("Both", &[]);
    let base = w.bridge.addressof(&both).unwrap();

    let left = ll::static_cast(&w.bridge, "Left*", &both).unwrap();
    assert_eq!(w.bridge.addressof(&left).unwrap(), base);
    assert_eq!(int(&w.bridge.getattr(&left, "a").unwrap()), 1);

    let right = ll::static_cast(&w.bridge, "Right*", &both).unwrap();
    assert_eq!(w.bridge.addressof(&right).unwrap(), base + 8);
    assert_eq!(int(&w.bridge.getattr(&right, "b").unwrap()), 2);
    assert!(!right.as_instance().unwrap().owns());

    // members of both bases through the derived proxy
    assert_eq!(int(&w.bridge.getattr(&both, "a").unwrap()), 1);
    assert_eq!(int(&w.bridge.getattr(&both, "b").unwrap()), 2);
}

#[test]
fn test_downcast_returns_the_original_proxy() {
    let w = casts();
    let both = w.call("Both", &[]);
    let right = ll::static_cast(&w.bridge, "Right*", &both).unwrap();
    let back = ll::static_cast(&w.bridge, "Both*", &right).unwrap();
    assert!(back.is(&both));
}

#[test]
fn test_static_cast_between_unrelated_classes_fails() {
    let w = casts();
    let left = w.call("Left", &[]);
    assert!(ll::static_cast(&w.bridge, "Right*", &left).is_err());
    assert!(matches!(
        ll::static_cast(&w.bridge, "Nowhere*", &left),
        Err(BridgeError::UnknownEntity { .. })
    ));
    assert!(ll::static_cast(&w.bridge, "Right*", &Value::NullPtr)
        .unwrap()
        .is(&Value::NullPtr));
}

#[test]
fn test_dynamic_cast_checks_runtime_type() {
    let w = casts();
    let both = w.call("Both", &[]);
    let right = ll::static_cast(&w.bridge, "Right*", &both).unwrap();

    // cross cast through the most-derived object
    let left = ll::dynamic_cast(&w.bridge, "Left*", &right).unwrap();
    assert_eq!(
        w.bridge.addressof(&left).unwrap(),
        w.bridge.addressof(&both).unwrap()
    );

    let plain = w.call("Left", &[]);
    assert!(ll::dynamic_cast(&w.bridge, "Right*", &plain)
        .unwrap()
        .is(&Value::NullPtr));
    assert!(ll::dynamic_cast(&w.bridge, "Right*", &Value::NullPtr)
        .unwrap()
        .is(&Value::NullPtr));
}

// ===== reinterpret_cast =====

#[test]
fn test_reinterpret_null_address() {
    let w = casts();
    let view = ll::reinterpret_cast(&w.bridge, "int*", &Value::Int(0)).unwrap();
    assert_eq!(w.bridge.len(&view).unwrap(), 0);
    assert!(matches!(
        w.bridge.getitem(&view, &Value::Int(0)),
        Err(BridgeError::Bounds { .. })
    ));
    assert!(ll::reinterpret_cast(&w.bridge, "Counter*", &Value::Int(0))
        .unwrap()
        .is(&Value::NullPtr));
    assert!(ll::reinterpret_cast(&w.bridge, "int*", &Value::Int(-1)).is_err());
}

#[test]
fn test_reinterpret_object_memory() {
    let w = casts();
    let c = w.call("Counter", &[Value::Int(11)]);
    let address = w.bridge.addressof(&c).unwrap();

    let same = ll::reinterpret_cast(&w.bridge, "Counter*", &Value::Int(address as i128)).unwrap();
    assert!(same.is(&c));

    let ints = ll::reinterpret_cast(&w.bridge, "int*", &c).unwrap();
    assert!(w.bridge.len(&ints).is_err());
    ll::reshape(&ints, 2).unwrap();
    assert_eq!(int(&w.bridge.getitem(&ints, &Value::Int(0)).unwrap()), 11);
    assert_eq!(int(&w.bridge.getitem(&ints, &Value::Int(1)).unwrap()), 42);

    w.bridge.setitem(&ints, &Value::Int(0), &Value::Int(12)).unwrap();
    assert_eq!(int(&w.bridge.call_method(&c, "value", &[]).unwrap()), 12);
    assert!(ll::reshape(&c, 1).is_err());
}

// ===== Arrays =====

#[test]
fn test_array_new_and_delete() {
    let w = casts();
    let blocks = w.runtime.live_blocks();
    let bytes = w.runtime.live_bytes();

    let array = ll::array_new(&w.bridge, "double", 4).unwrap();
    assert_eq!(w.runtime.live_blocks(), blocks + 1);
    assert_eq!(w.bridge.len(&array).unwrap(), 4);
    assert_eq!(float(&w.bridge.getitem(&array, &Value::Int(3)).unwrap()), 0.0);

    for i in 0..4 {
        w.bridge
            .setitem(&array, &Value::Int(i), &Value::Float(i as f64 * 1.25))
            .unwrap();
    }
    assert_eq!(float(&w.bridge.getitem(&array, &Value::Int(2)).unwrap()), 2.5);
    assert_eq!(float(&w.bridge.getitem(&array, &Value::Int(-1)).unwrap()), 3.75);
    assert!(matches!(
        w.bridge.getitem(&array, &Value::Int(-5)),
        Err(BridgeError::Bounds { .. })
    ));
    assert!(matches!(
        w.bridge.getitem(&array, &Value::Int(i64::MIN as i128)),
        Err(BridgeError::Bounds { index: i64::MIN, len: 4, .. })
    ));
    assert!(matches!(
        w.bridge.setitem(&array, &Value::Int(4), &Value::Float(0.0)),
        Err(BridgeError::Bounds { index: 4, len: 4, .. })
    ));
    assert!(w
        .bridge
        .setitem(&array, &Value::Int(0), &Value::from("x"))
        .is_err());

    ll::array_delete(&w.bridge, &array).unwrap();
    assert_eq!(w.runtime.live_blocks(), blocks);
    assert_eq!(w.runtime.live_bytes(), bytes);
    assert!(ll::array_delete(&w.bridge, &Value::Int(1)).is_err());
}

#[test]
fn test_array_data_member() {
    let w = casts();
    let c = w.call("Counter", &[]);
    let view = w.bridge.getattr(&c, "m_array").unwrap();
    assert_eq!(w.bridge.len(&view).unwrap(), 4);

    w.bridge.setitem(&view, &Value::Int(2), &Value::Float(1.5)).unwrap();
    let again = w.bridge.getattr(&c, "m_array").unwrap();
    assert_eq!(float(&w.bridge.getitem(&again, &Value::Int(2)).unwrap()), 1.5);

    match w.bridge.getitem(&view, &Value::Int(4)) {
        Err(BridgeError::Bounds { index, len, .. }) => {
            assert_eq!(index, 4);
            assert_eq!(len, 4);
        }
        other => panic!("expected Bounds, got {:?}", other.map(|_| ())),
    }
    // the view keeps the object alive
    drop(c);
    assert_eq!(float(&w.bridge.getitem(&view, &Value::Int(2)).unwrap()), 1.5);
}

#[test]
fn test_const_data_member_is_read_only() {
    let w = casts();
    let c = w.call("Counter", &[]);
    assert_eq!(int(&w.bridge.getattr(&c, "m_const").unwrap()), 42);
    match w.bridge.setattr(&c, "m_const", &Value::Int(1)) {
        Err(BridgeError::ConstViolation { scope, member }) => {
            assert_eq!(scope, "Counter");
            assert_eq!(member, "m_const");
        }
        other => panic!("expected ConstViolation, got {:?}", other),
    }
}

// ===== sizeof / addressof =====

#[test]
fn test_sizeof() {
    let w = casts();
    assert_eq!(w.bridge.sizeof(&Value::from("double")).unwrap(), 8);
    assert_eq!(w.bridge.sizeof(&Value::from("short")).unwrap(), 2);
    assert_eq!(w.bridge.sizeof(&w.get("Counter")).unwrap(), 48);
    let c = w.call("Counter", &[]);
    assert_eq!(w.bridge.sizeof(&c).unwrap(), 48);
    assert_eq!(w.bridge.sizeof(&w.get("Both")).unwrap(), 16);
    assert!(w.bridge.sizeof(&Value::from("Nowhere")).is_err());
    assert!(w.bridge.sizeof(&Value::Int(3)).is_err());
}

#[test]
fn test_addressof() {
    let w = casts();
    assert_eq!(w.bridge.addressof(&w.bridge.nullptr()).unwrap(), 0);
    assert_eq!(w.bridge.addressof(&Value::None).unwrap(), 0);
    let c = w.call("Counter", &[]);
    assert_ne!(w.bridge.addressof(&c).unwrap(), 0);
    assert!(w.bridge.addressof(&Value::Float(1.0)).is_err());
}

// ===== Call and Assignment Operators =====

fn declare_gauge(b: &mut RuntimeBuilder) {
    b.class("Gauge", 8, |c| {
        c.data("int m_level", 0);
        c.constructor("int level = 0", |f| {
            f.ctx.write_i32(f.this()?, f.int_or(0, 0)? as i32)?;
            Ok(NativeValue::Void)
        });
        c.method("int operator()(int delta)", |f| {
            let this = f.this()?;
            let level = f.ctx.read_i32(this)? + f.int(0)? as i32;
            f.ctx.write_i32(this, level)?;
            Ok(NativeValue::Int(level as i64))
        });
        c.method("Gauge& operator=(const Gauge& other)", |f| {
            let this = f.this()?;
            let level = f.ctx.read_i32(f.ptr(0)?)?;
            f.ctx.write_i32(this, level)?;
            Ok(NativeValue::Ptr(this))
        });
        c.method("const int* levels() const", |f| Ok(NativeValue::Ptr(f.this()?)));
    });
}

#[test]
fn test_calling_an_instance_uses_call_operator() {
    let w = world_with(declare_gauge);
    let g = w.call("Gauge", &[Value::Int(3)]);
    assert_eq!(int(&w.bridge.call(&g, &[Value::Int(4)]).unwrap()), 7);
    assert_eq!(int(&w.bridge.getattr(&g, "m_level").unwrap()), 7);

    assert!(w.bridge.call(&g, &[Value::from("x")]).is_err());
    assert!(w.bridge.call(&Value::Int(1), &[]).is_err());
}

#[test]
fn test_assign_uses_assignment_operator() {
    let w = world_with(declare_gauge);
    let a = w.call("Gauge", &[Value::Int(1)]);
    let b = w.call("Gauge", &[Value::Int(9)]);
    w.bridge.assign(&a, &b).unwrap();
    assert_eq!(int(&w.bridge.getattr(&a, "m_level").unwrap()), 9);
    assert!(w.bridge.assign(&a, &Value::from("nine")).is_err());
}

#[test]
fn test_view_of_const_pointer_is_read_only() {
    let w = world_with(declare_gauge);
    let g = w.call("Gauge", &[Value::Int(5)]);
    let view = w.bridge.call_method(&g, "levels", &[]).unwrap();
    ll::reshape(&view, 1).unwrap();
    assert_eq!(int(&w.bridge.getitem(&view, &Value::Int(0)).unwrap()), 5);
    assert!(matches!(
        w.bridge.setitem(&view, &Value::Int(0), &Value::Int(6)),
        Err(BridgeError::ConstViolation { .. })
    ));
}
