//! Shared native declarations for the integration tests
//!
//! Every test file builds its own runtime from these declarations so that
//! tests never share native state.

#![allow(dead_code)]

use std::sync::Arc;

use bindery_engine::{Bridge, BridgeConfig, InProcessRuntime, RuntimeBuilder, Value};
use bindery_sdk::{NativeThrow, NativeValue, ThrowOrigin};

/// A bridge plus a typed handle on its in-process runtime
pub struct World {
    pub runtime: Arc<InProcessRuntime>,
    pub bridge: Bridge,
}

impl World {
    /// Resolve a dotted path, panicking with the error on failure
    pub fn get(&self, path: &str) -> Value {
        match self.bridge.lookup(path) {
            Ok(value) => value,
            Err(e) => panic!("lookup of {} failed: {}", path, e),
        }
    }

    /// Call `path(args...)`
    pub fn call(&self, path: &str, args: &[Value]) -> Value {
        let target = self.get(path);
        match self.bridge.call(&target, args) {
            Ok(value) => value,
            Err(e) => panic!("call of {} failed: {}", path, e),
        }
    }
}

/// Build a world from a declaration closure (plus the `std` declarations)
pub fn world_with<F>(declare: F) -> World
where
    F: FnOnce(&mut RuntimeBuilder),
{
    world_with_config(declare, BridgeConfig::default())
}

/// Build a world with an explicit configuration
pub fn world_with_config<F>(declare: F, config: BridgeConfig) -> World
where
    F: FnOnce(&mut RuntimeBuilder),
{
    bindery_engine::logging::init();
    let mut b = RuntimeBuilder::new();
    b.stdlib();
    declare(&mut b);
    let runtime = Arc::new(b.build().expect("declarations are valid"));
    let bridge = Bridge::new(runtime.clone(), config).expect("bridge");
    World { runtime, bridge }
}

/// The full fixture: geometry, counters, shapes and overloads
pub fn world() -> World {
    world_with(|b| {
        declare_geo(b);
        declare_counters(b);
        declare_shapes(b);
    })
}

// ============================================================================
// geo: value classes, operators, smart pointers
// ============================================================================

pub fn declare_geo(b: &mut RuntimeBuilder) {
    b.namespace("geo", |ns| {
        ns.class("Point", 16, |c| {
            c.data("double x", 0).data("double y", 8);
            c.constructor("double x = 0, double y = 0", |f| {
                let this = f.this()?;
                let x = if f.has_arg(0) { f.float(0)? } else { 0.0 };
                let y = if f.has_arg(1) { f.float(1)? } else { 0.0 };
                f.ctx.write_f64(this, x)?;
                f.ctx.write_f64(this + 8, y)?;
                Ok(NativeValue::Void)
            });
            c.method("double norm() const", |f| {
                let this = f.this()?;
                let (x, y) = (f.ctx.read_f64(this)?, f.ctx.read_f64(this + 8)?);
                Ok(NativeValue::Float((x * x + y * y).sqrt()))
            });
            c.method("geo::Point scaled(double k) const", |f| {
                let this = f.this()?;
                let k = f.float(0)?;
                let (x, y) = (f.ctx.read_f64(this)?, f.ctx.read_f64(this + 8)?);
                let p = f
                    .ctx
                    .construct("geo::Point", &[NativeValue::Float(x * k), NativeValue::Float(y * k)])?;
                Ok(NativeValue::Object(p))
            });
            c.method("geo::Point* self()", |f| Ok(NativeValue::Ptr(f.this()?)));
        });

        ns.function(
            "geo::Point operator+(const geo::Point& a, const geo::Point& b)",
            |f| {
                let (a, b) = (f.ptr(0)?, f.ptr(1)?);
                let x = f.ctx.read_f64(a)? + f.ctx.read_f64(b)?;
                let y = f.ctx.read_f64(a + 8)? + f.ctx.read_f64(b + 8)?;
                let p = f
                    .ctx
                    .construct("geo::Point", &[NativeValue::Float(x), NativeValue::Float(y)])?;
                Ok(NativeValue::Object(p))
            },
        );
        ns.function(
            "double distance(const geo::Point& a, const geo::Point& b)",
            |f| {
                let (a, b) = (f.ptr(0)?, f.ptr(1)?);
                let dx = f.ctx.read_f64(a)? - f.ctx.read_f64(b)?;
                let dy = f.ctx.read_f64(a + 8)? - f.ctx.read_f64(b + 8)?;
                Ok(NativeValue::Float((dx * dx + dy * dy).sqrt()))
            },
        );
        ns.function("std::shared_ptr<geo::Point> make_shared_point(double x, double y)", |f| {
            let p = f
                .ctx
                .construct("geo::Point", &[NativeValue::Float(f.float(0)?), NativeValue::Float(f.float(1)?)])?;
            Ok(f.ctx.make_shared("geo::Point", p)?)
        });
        ns.function("double shared_norm(std::shared_ptr<geo::Point> p)", |f| {
            let p = f.ptr(0)?;
            let (x, y) = (f.ctx.read_f64(p)?, f.ctx.read_f64(p + 8)?);
            Ok(NativeValue::Float((x * x + y * y).sqrt()))
        });
        ns.function("double sum(const std::vector<double>& values)", |f| {
            let v = f.ptr(0)?;
            let data = f.ctx.read_ptr(v)?;
            let len = f.ctx.read_i64(v + 8)?;
            let mut total = 0.0;
            for i in 0..len as u64 {
                total += f.ctx.read_f64(data + i * 8)?;
            }
            Ok(NativeValue::Float(total))
        });
        ns.enumeration("Axis", "int", false, &[("X", 0), ("Y", 1)]);
        ns.function("int axis_index(geo::Axis a)", |f| Ok(NativeValue::Int(f.int(0)?)));
    });
}

// ============================================================================
// counters: ownership and identity
// ============================================================================

pub fn declare_counters(b: &mut RuntimeBuilder) {
    b.global(|g| {
        g.static_data("int g_counter", NativeValue::Int(5));
        g.static_data("const int g_limit", NativeValue::Int(100));
    });
    b.class("Counter", 48, |c| {
        c.data("int m_value", 0);
        c.data("const int m_const", 4);
        c.data("double m_array[4]", 8);
        c.data("long m_long", 40);
        c.constructor("int v = 0", |f| {
            let this = f.this()?;
            f.ctx.write_i32(this, f.int_or(0, 0)? as i32)?;
            f.ctx.write_i32(this + 4, 42)?;
            Ok(NativeValue::Void)
        });
        c.method("int value() const", |f| {
            Ok(NativeValue::Int(f.ctx.read_i32(f.this()?)? as i64))
        });
        c.method("void increment()", |f| {
            let this = f.this()?;
            let v = f.ctx.read_i32(this)?;
            f.ctx.write_i32(this, v + 1)?;
            Ok(NativeValue::Void)
        });
        c.method("static int limit()", |_| Ok(NativeValue::Int(100)));
        c.method("void fail() const", |_| {
            Err(NativeThrow::native("std::logic_error", "counter failure"))
        });
    });
    b.global(|g| {
        g.function("Counter* make_raw(int v)", |f| {
            let p = f.ctx.construct("Counter", &[NativeValue::Int(f.int(0)?)])?;
            Ok(NativeValue::Ptr(p))
        });
        g.function("void delete_raw(Counter* c)", |f| {
            f.ctx.destruct("Counter", f.ptr(0)?)?;
            Ok(NativeValue::Void)
        });
        g.function("Counter* same(Counter* c)", |f| Ok(NativeValue::Ptr(f.ptr(0)?)));
        g.function("int read_value(const Counter& c)", |f| {
            Ok(NativeValue::Int(f.ctx.read_i32(f.ptr(0)?)? as i64))
        });
    });
}

// ============================================================================
// shapes: virtual methods, abstract bases and host overrides
// ============================================================================

pub fn declare_shapes(b: &mut RuntimeBuilder) {
    b.namespace("shapes", |ns| {
        ns.class("Shape", 8, |c| {
            c.data("int m_sides", 0);
            c.pure_virtual("virtual double area() const");
            c.method("virtual std::string name() const", |_| {
                Ok(NativeValue::Str("shape".to_string()))
            });
            c.method("virtual int scaled_sides(int factor) const", |f| {
                Ok(NativeValue::Int(f.ctx.read_i32(f.this()?)? as i64 * f.int(0)?))
            });
        });
        ns.class("Square", 16, |c| {
            c.base("Shape");
            c.data("double m_side", 8);
            c.constructor("double side", |f| {
                let this = f.this()?;
                f.ctx.write_i32(this, 4)?;
                f.ctx.write_f64(this + 8, f.float(0)?)?;
                Ok(NativeValue::Void)
            });
            c.method("double area() const", |f| {
                let side = f.ctx.read_f64(f.this()? + 8)?;
                Ok(NativeValue::Float(side * side))
            });
            c.method("std::string name() const", |_| Ok(NativeValue::Str("square".to_string())));
        });

        ns.function("double area_of(const shapes::Shape* s)", |f| {
            f.ctx.call_virtual(f.ptr(0)?, "area", &[])
        });
        ns.function("std::string name_of(const shapes::Shape* s)", |f| {
            f.ctx.call_virtual(f.ptr(0)?, "name", &[])
        });
        ns.function("int sides_of(const shapes::Shape* s, int factor)", |f| {
            f.ctx.call_virtual(f.ptr(0)?, "scaled_sides", &[NativeValue::Int(f.int(1)?)])
        });
        // catches host exceptions raised by overrides
        ns.function("double safe_area(const shapes::Shape* s)", |f| {
            match f.ctx.call_virtual(f.ptr(0)?, "area", &[]) {
                Err(thrown) if thrown.origin == ThrowOrigin::Host => Ok(NativeValue::Float(-1.0)),
                other => other,
            }
        });
        ns.function("shapes::Shape* make_square(double side)", |f| {
            let p = f.ctx.construct("shapes::Square", &[NativeValue::Float(f.float(0)?)])?;
            Ok(NativeValue::Ptr(p))
        });
        ns.function("shapes::Shape* pass_through(shapes::Shape* s)", |f| {
            Ok(NativeValue::Ptr(f.ptr(0)?))
        });
    });
}

/// Unwrap a host float
pub fn float(value: &Value) -> f64 {
    match value {
        Value::Float(x) => *x,
        other => panic!("expected a float, got {:?}", other),
    }
}

/// Unwrap a host integer
pub fn int(value: &Value) -> i128 {
    match value {
        Value::Int(i) => *i,
        other => panic!("expected an integer, got {:?}", other),
    }
}

/// Unwrap a host string
pub fn string(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => panic!("expected a string, got {:?}", other),
    }
}
