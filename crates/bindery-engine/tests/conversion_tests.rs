//! Value conversion through the bridge
//!
//! Tests cover:
//! - Builtin arguments and results (property-based)
//! - Range and type rejection at the call boundary
//! - Global data members (read, write, const)
//! - Enums and enumerators
//! - Host lists passed as `const std::vector<T>&`
//! - User converters shadowing the builtin ones

mod common;

use std::sync::Arc;

use bindery_engine::{Bridge, BridgeError, BridgeResult, Converter, MatchRank, Temporaries, Value};
use bindery_sdk::{NativeValue, TypeSpec};
use common::{declare_counters, declare_geo, float, int, string, world, world_with, World};
use proptest::prelude::*;

fn echo_world() -> World {
    world_with(|b| {
        b.namespace("echo", |ns| {
            ns.function("int echo_int(int v)", |f| Ok(f.arg(0)?.clone()));
            ns.function("long echo_long(long v)", |f| Ok(f.arg(0)?.clone()));
            ns.function("unsigned int echo_uint(unsigned int v)", |f| Ok(f.arg(0)?.clone()));
            ns.function("double echo_double(double v)", |f| Ok(f.arg(0)?.clone()));
            ns.function("bool echo_bool(bool v)", |f| Ok(f.arg(0)?.clone()));
            ns.function("std::string echo_string(const std::string& s)", |f| {
                Ok(NativeValue::Str(f.str(0)?.to_string()))
            });
            ns.function("const char* echo_cstr(const char* s)", |f| {
                Ok(NativeValue::Str(f.str(0)?.to_string()))
            });
            ns.function("unsigned char echo_uchar(unsigned char c)", |f| Ok(f.arg(0)?.clone()));
            ns.class("Cell", 2, |c| {
                c.data("unsigned char m_byte", 0);
                c.data("char m_char", 1);
            });
        });
        declare_counters(b);
    })
}

// ===== Builtin Round Trips =====

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_int_arguments_survive_the_call(v in any::<i32>()) {
        let w = echo_world();
        let result = w.call("echo.echo_int", &[Value::from(v)]);
        prop_assert_eq!(int(&result), v as i128);
    }

    #[test]
    fn test_long_arguments_survive_the_call(v in any::<i64>()) {
        let w = echo_world();
        let result = w.call("echo.echo_long", &[Value::from(v)]);
        prop_assert_eq!(int(&result), v as i128);
    }

    #[test]
    fn test_double_arguments_survive_the_call(v in -1.0e12f64..1.0e12) {
        let w = echo_world();
        let result = w.call("echo.echo_double", &[Value::from(v)]);
        prop_assert_eq!(float(&result), v);
    }

    #[test]
    fn test_string_arguments_survive_the_call(s in "[a-zA-Z0-9 _.-]{0,40}") {
        let w = echo_world();
        let result = w.call("echo.echo_string", &[Value::from(s.as_str())]);
        prop_assert_eq!(string(&result), s.clone());
        let result = w.call("echo.echo_cstr", &[Value::from(s.as_str())]);
        prop_assert_eq!(string(&result), s);
    }

    #[test]
    fn test_char_members_round_trip_every_byte(v in 0u8..=255) {
        let w = echo_world();
        let cell = w.call("echo.Cell", &[]);
        for (member, raw) in [("m_byte", v as i128), ("m_char", v as i8 as i128)] {
            w.bridge.setattr(&cell, member, &Value::Int(raw)).unwrap();
            let read = w.bridge.getattr(&cell, member).unwrap();
            prop_assert_eq!(string(&read).chars().count(), 1);
            w.bridge.setattr(&cell, member, &read).unwrap();
            prop_assert!(w.bridge.getattr(&cell, member).unwrap().is(&read));
        }
        let text = string(&w.bridge.getattr(&cell, "m_byte").unwrap());
        let echoed = w.call("echo.echo_uchar", &[Value::from(text.as_str())]);
        prop_assert_eq!(string(&echoed), text);
    }
}

#[test]
fn test_bool_round_trip() {
    let w = echo_world();
    assert!(w.call("echo.echo_bool", &[Value::Bool(true)]).is(&Value::Bool(true)));
    assert!(w.call("echo.echo_bool", &[Value::Bool(false)]).is(&Value::Bool(false)));
    // 0 and 1 narrow to bool
    assert!(w.call("echo.echo_bool", &[Value::Int(1)]).is(&Value::Bool(true)));
}

#[test]
fn test_int_widens_to_double() {
    let w = echo_world();
    assert_eq!(float(&w.call("echo.echo_double", &[Value::Int(7)])), 7.0);
}

// ===== Rejections =====

#[test]
fn test_out_of_range_int_is_no_match() {
    let w = echo_world();
    let f = w.get("echo.echo_int");
    assert!(matches!(
        w.bridge.call(&f, &[Value::Int(1 << 31)]),
        Err(BridgeError::NoMatch { .. })
    ));
    let g = w.get("echo.echo_uint");
    assert!(matches!(
        w.bridge.call(&g, &[Value::Int(-1)]),
        Err(BridgeError::NoMatch { .. })
    ));
    assert_eq!(int(&w.call("echo.echo_uint", &[Value::Int(u32::MAX as i128)])), u32::MAX as i128);
}

#[test]
fn test_float_is_not_an_int() {
    let w = echo_world();
    let f = w.get("echo.echo_int");
    assert!(matches!(
        w.bridge.call(&f, &[Value::Float(1.5)]),
        Err(BridgeError::NoMatch { .. })
    ));
    let s = w.get("echo.echo_string");
    assert!(matches!(
        w.bridge.call(&s, &[Value::Int(3)]),
        Err(BridgeError::NoMatch { .. })
    ));
}

// ===== Global Data =====

#[test]
fn test_read_and_write_global_variable() {
    let w = echo_world();
    assert_eq!(int(&w.get("g_counter")), 5);

    let gbl = Value::Scope(w.bridge.gbl().unwrap());
    w.bridge.setattr(&gbl, "g_counter", &Value::Int(9)).unwrap();
    assert_eq!(int(&w.get("g_counter")), 9);

    // the value lives in native memory, not in a host cache
    w.bridge.setattr(&gbl, "g_counter", &Value::Int(-3)).unwrap();
    assert_eq!(int(&w.bridge.getattr(&gbl, "g_counter").unwrap()), -3);
}

#[test]
fn test_const_global_rejects_assignment() {
    let w = echo_world();
    let gbl = Value::Scope(w.bridge.gbl().unwrap());
    assert_eq!(int(&w.get("g_limit")), 100);
    match w.bridge.setattr(&gbl, "g_limit", &Value::Int(1)) {
        Err(BridgeError::ConstViolation { member, .. }) => assert_eq!(member, "g_limit"),
        other => panic!("expected ConstViolation, got {:?}", other),
    }
    assert_eq!(int(&w.get("g_limit")), 100);
}

#[test]
fn test_global_assignment_checks_range() {
    let w = echo_world();
    let gbl = Value::Scope(w.bridge.gbl().unwrap());
    assert!(w.bridge.setattr(&gbl, "g_counter", &Value::Int(1 << 40)).is_err());
    assert_eq!(int(&w.get("g_counter")), 5);
}

// ===== Enums =====

#[test]
fn test_enum_values() {
    let w = world();
    let axis = w.get("geo.Axis");
    assert_eq!(int(&w.bridge.getattr(&axis, "X").unwrap()), 0);
    assert_eq!(int(&w.bridge.getattr(&axis, "Y").unwrap()), 1);
    // unscoped enumerators are visible in the enclosing namespace
    assert_eq!(int(&w.get("geo.Y")), 1);
    assert!(matches!(
        w.bridge.getattr(&axis, "Z"),
        Err(BridgeError::UnknownEntity { .. })
    ));
}

#[test]
fn test_enum_parameter_takes_integers() {
    let w = world();
    let y = w.get("geo.Axis.Y");
    assert_eq!(int(&w.call("geo.axis_index", &[y])), 1);
    let f = w.get("geo.axis_index");
    assert!(matches!(
        w.bridge.call(&f, &[Value::from("Y")]),
        Err(BridgeError::NoMatch { .. })
    ));
}

// ===== Containers =====

#[test]
fn test_list_passed_as_const_vector_reference() {
    let w = world_with(declare_geo);
    let objects = w.runtime.live_objects();
    let blocks = w.runtime.live_blocks();

    let values = Value::List(vec![Value::Float(1.5), Value::Float(2.5), Value::Int(3)]);
    assert_eq!(float(&w.call("geo.sum", &[values])), 7.0);
    assert_eq!(float(&w.call("geo.sum", &[Value::List(Vec::new())])), 0.0);

    // the temporary vector and its buffer are gone after the call
    assert_eq!(w.runtime.live_objects(), objects);
    assert_eq!(w.runtime.live_blocks(), blocks);
}

#[test]
fn test_list_with_unconvertible_element_is_no_match() {
    let w = world_with(declare_geo);
    let f = w.get("geo.sum");
    let values = Value::List(vec![Value::Float(1.0), Value::from("two")]);
    assert!(matches!(
        w.bridge.call(&f, &[values]),
        Err(BridgeError::NoMatch { .. })
    ));
}

// ===== User Converters =====

/// Accepts decimal strings where an `int` is expected
struct DecimalString;

impl Converter for DecimalString {
    fn type_name(&self) -> &str {
        "int"
    }

    fn rank(&self, _bridge: &Bridge, value: &Value) -> Option<MatchRank> {
        match value {
            Value::Int(_) => Some(MatchRank::Exact),
            Value::Str(s) if s.parse::<i32>().is_ok() => Some(MatchRank::Conversion),
            _ => None,
        }
    }

    fn to_native(&self, _bridge: &Bridge, value: &Value, _temps: &mut Temporaries) -> BridgeResult<NativeValue> {
        let parsed = match value {
            Value::Int(i) => i32::try_from(*i).ok(),
            Value::Str(s) => s.parse::<i32>().ok(),
            _ => None,
        };
        parsed
            .map(|i| NativeValue::Int(i as i64))
            .ok_or_else(|| BridgeError::Conversion(format!("{:?} is not an int", value)))
    }

    fn from_native(&self, _bridge: &Bridge, value: NativeValue, _creates: bool) -> BridgeResult<Value> {
        match value {
            NativeValue::Int(i) => Ok(Value::Int(i as i128)),
            other => Err(BridgeError::Conversion(format!("unexpected {:?}", other))),
        }
    }

    fn size(&self) -> usize {
        4
    }
}

#[test]
fn test_registered_converter_shadows_builtin() {
    let w = echo_world();
    let f = w.get("echo.echo_int");
    assert!(w.bridge.call(&f, &[Value::from("42")]).is_err());

    w.bridge
        .register_converter("int", Arc::new(|_: &TypeSpec| Arc::new(DecimalString) as Arc<dyn Converter>));
    assert_eq!(int(&w.bridge.call(&f, &[Value::from("42")]).unwrap()), 42);
    assert_eq!(int(&w.bridge.call(&f, &[Value::Int(5)]).unwrap()), 5);

    assert!(w.bridge.unregister_converter("int"));
    assert!(!w.bridge.unregister_converter("int"));
    assert!(matches!(
        w.bridge.call(&f, &[Value::from("42")]),
        Err(BridgeError::NoMatch { .. })
    ));
}

#[test]
fn test_get_converter() {
    let w = echo_world();
    assert_eq!(w.bridge.get_converter("double").unwrap().size(), 8);
    assert_eq!(w.bridge.get_converter("short").unwrap().size(), 2);
    assert!(w.bridge.get_converter("NoSuchType").is_err());
}
