//! `std` declarations of the in-process backend
//!
//! `std::vector<T>` for builtin and pointer element types. Layout:
//! data pointer at 0, size at 8, capacity at 16.

use bindery_sdk::{
    decode_builtin, decode_pointer, encode_builtin, encode_pointer, Address, Builtin,
    NativeCallContext, NativeThrow, NativeValue, TypeSpec, POINTER_SIZE,
};

use super::builder::{NativeFrame, RuntimeBuilder};

const DATA: u64 = 0;
const SIZE: u64 = 8;
const CAPACITY: u64 = 16;
const VECTOR_SIZE: usize = 24;

#[derive(Clone, Copy)]
enum Element {
    Builtin(Builtin),
    Pointer,
}

impl Element {
    fn parse(name: &str) -> Result<Self, String> {
        let spec = TypeSpec::parse(name).map_err(|e| e.to_string())?;
        if spec.pointers > 0 && !spec.is_reference() {
            return Ok(Element::Pointer);
        }
        match spec.builtin() {
            Some(Builtin::Void) | None => Err(format!(
                "std::vector<{}> requires a builtin or pointer element type",
                name
            )),
            Some(b) if spec.is_value() => Ok(Element::Builtin(b)),
            Some(_) => Err(format!("invalid element type {}", name)),
        }
    }

    fn size(self) -> usize {
        match self {
            Element::Builtin(b) => b.size(),
            Element::Pointer => POINTER_SIZE,
        }
    }

    fn encode(self, value: &NativeValue) -> Result<Vec<u8>, NativeThrow> {
        match self {
            Element::Builtin(b) => Ok(encode_builtin(b, value)?),
            Element::Pointer => {
                let address = match value {
                    NativeValue::Ptr(a) | NativeValue::Object(a) => *a,
                    other => other.as_u64().unwrap_or(0),
                };
                Ok(encode_pointer(address).to_vec())
            }
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<NativeValue, NativeThrow> {
        match self {
            Element::Builtin(b) => Ok(decode_builtin(b, bytes)?),
            Element::Pointer => Ok(NativeValue::Ptr(decode_pointer(bytes)?)),
        }
    }
}

struct Header {
    data: Address,
    size: u64,
    capacity: u64,
}

fn header(ctx: &dyn NativeCallContext, this: Address) -> Result<Header, NativeThrow> {
    Ok(Header {
        data: ctx.read_ptr(this + DATA)?,
        size: ctx.read_i64(this + SIZE)? as u64,
        capacity: ctx.read_i64(this + CAPACITY)? as u64,
    })
}

fn reserve(f: &NativeFrame<'_>, this: Address, elem: Element, wanted: u64) -> Result<(), NativeThrow> {
    let h = header(f.ctx, this)?;
    if wanted <= h.capacity {
        return Ok(());
    }
    let capacity = wanted.max(4).max(h.capacity * 2);
    let esize = elem.size() as u64;
    let data = f.ctx.allocate((capacity * esize) as usize)?;
    if h.data != 0 {
        if h.size > 0 {
            let old = f.ctx.read(h.data, (h.size * esize) as usize)?;
            f.ctx.write(data, &old)?;
        }
        f.ctx.free(h.data)?;
    }
    f.ctx.write_ptr(this + DATA, data)?;
    f.ctx.write_i64(this + CAPACITY, capacity as i64)?;
    Ok(())
}

fn checked_index(f: &NativeFrame<'_>, h: &Header) -> Result<u64, NativeThrow> {
    let index = f.int(0)?;
    if index < 0 || index as u64 >= h.size {
        return Err(NativeThrow::native(
            "std::out_of_range",
            format!("vector index {} out of range for size {}", index, h.size),
        ));
    }
    Ok(index as u64)
}

pub(crate) fn install(b: &mut RuntimeBuilder) {
    b.namespace("std", |std| {
        std.class_template("vector", |c, args| {
            let [elem_name] = args else {
                return Err(format!("std::vector takes one template argument, got {}", args.len()));
            };
            let elem = Element::parse(elem_name)?;
            let esize = elem.size() as u64;
            c.size(VECTOR_SIZE);

            c.constructor("", |_| Ok(NativeValue::Void));
            c.constructor("unsigned long n", move |f| {
                let this = f.this()?;
                let n = f.int(0)?.max(0) as u64;
                reserve(f, this, elem, n)?;
                f.ctx.write_i64(this + SIZE, n as i64)?;
                Ok(NativeValue::Void)
            });
            c.destructor(|f| {
                let data = f.ctx.read_ptr(f.this()? + DATA)?;
                if data != 0 {
                    f.ctx.free(data)?;
                }
                Ok(NativeValue::Void)
            });

            c.method(&format!("void push_back({} const& value)", elem_name), move |f| {
                let this = f.this()?;
                let bytes = elem.encode(f.arg(0)?)?;
                let size = header(f.ctx, this)?.size;
                reserve(f, this, elem, size + 1)?;
                let data = header(f.ctx, this)?.data;
                f.ctx.write(data + size * esize, &bytes)?;
                f.ctx.write_i64(this + SIZE, (size + 1) as i64)?;
                Ok(NativeValue::Void)
            });
            c.method("unsigned long size() const", |f| {
                Ok(NativeValue::UInt(header(f.ctx, f.this()?)?.size))
            });
            c.method("bool empty() const", |f| {
                Ok(NativeValue::Bool(header(f.ctx, f.this()?)?.size == 0))
            });
            c.method(&format!("{}& operator[](unsigned long i)", elem_name), move |f| {
                let h = header(f.ctx, f.this()?)?;
                let index = checked_index(f, &h)?;
                Ok(NativeValue::Ptr(h.data + index * esize))
            });
            c.method(&format!("{} at(unsigned long i) const", elem_name), move |f| {
                let h = header(f.ctx, f.this()?)?;
                let index = checked_index(f, &h)?;
                elem.decode(&f.ctx.read(h.data + index * esize, esize as usize)?)
            });
            c.method(&format!("{}* data()", elem_name), |f| {
                Ok(NativeValue::Ptr(header(f.ctx, f.this()?)?.data))
            });
            c.method("void clear()", |f| {
                f.ctx.write_i64(f.this()? + SIZE, 0)?;
                Ok(NativeValue::Void)
            });
            Ok(())
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::inprocess::InProcessRuntime;
    use bindery_sdk::{NativeRuntime, ScopeId};

    fn runtime() -> InProcessRuntime {
        let mut b = RuntimeBuilder::new();
        b.stdlib();
        b.build().unwrap()
    }

    #[test]
    fn test_vector_push_back_and_index() {
        let rt = runtime();
        let std = rt.find_scope("std").unwrap();
        let vec = rt
            .instantiate_class(std, "vector", &["double".to_string()])
            .unwrap();
        assert_eq!(rt.find_scope("std::vector<double>"), Some(vec));
        assert_eq!(rt.size_of("std::vector<double>"), Some(VECTOR_SIZE));

        let ctor = rt.constructors(vec)[0].id;
        let obj = NativeRuntime::construct(&rt, ctor, &[], false).unwrap();
        let push = rt.overloads(vec, "push_back")[0].id;
        for i in 0..10 {
            rt.invoke(push, Some(obj), &[NativeValue::Float(i as f64)]).unwrap();
        }
        let size = rt.overloads(vec, "size")[0].id;
        assert_eq!(rt.invoke(size, Some(obj), &[]).unwrap(), NativeValue::UInt(10));

        let at = rt.overloads(vec, "at")[0].id;
        assert_eq!(
            rt.invoke(at, Some(obj), &[NativeValue::Int(7)]).unwrap(),
            NativeValue::Float(7.0)
        );
        let err = rt.invoke(at, Some(obj), &[NativeValue::Int(10)]).unwrap_err();
        assert_eq!(err.kind, "std::out_of_range");

        NativeRuntime::destruct(&rt, vec, obj).unwrap();
        assert_eq!(rt.live_blocks(), 0);
    }

    #[test]
    fn test_vector_of_class_fails_to_instantiate() {
        let mut b = RuntimeBuilder::new();
        b.stdlib();
        b.class("Point", 16, |_| {});
        let rt = b.build().unwrap();
        let std = rt.find_scope("std").unwrap();
        assert!(rt
            .instantiate_class(std, "vector", &["Point".to_string()])
            .is_err());
        assert_eq!(rt.find_scope("std::vector<Point>"), None);
        assert!(rt.lookup(ScopeId::GLOBAL, "Point").unwrap().is_some());
    }
}
