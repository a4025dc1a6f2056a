// Host handles on VM values
// A handle borrows its Context, so it can never outlive the runtime it points into

use super::context::Context;
use super::convert::{FromValue, HostValue, IntoArgs};
use super::error::{Error, Result};
use crate::vm::value::Value as RawValue;
use std::fmt;

/// Closed set of value kinds visible to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Symbol,
    Array,
    Hash,
    Range,
    Proc,
    Module,
    Object,
    Exception,
}

impl ValueTag {
    pub fn name(self) -> &'static str {
        match self {
            ValueTag::Nil => "nil",
            ValueTag::Boolean => "boolean",
            ValueTag::Integer => "integer",
            ValueTag::Float => "float",
            ValueTag::String => "string",
            ValueTag::Symbol => "symbol",
            ValueTag::Array => "array",
            ValueTag::Hash => "hash",
            ValueTag::Range => "range",
            ValueTag::Proc => "proc",
            ValueTag::Module => "module",
            ValueTag::Object => "object",
            ValueTag::Exception => "exception",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn tag_of(ctx: &Context, raw: &RawValue) -> ValueTag {
    match raw {
        RawValue::Nil => ValueTag::Nil,
        RawValue::Bool(_) => ValueTag::Boolean,
        RawValue::Integer(_) => ValueTag::Integer,
        RawValue::Float(_) => ValueTag::Float,
        RawValue::String(_) => ValueTag::String,
        RawValue::Symbol(_) => ValueTag::Symbol,
        RawValue::Array(_) => ValueTag::Array,
        RawValue::Hash(_) => ValueTag::Hash,
        RawValue::Range(..) => ValueTag::Range,
        RawValue::Proc(_) => ValueTag::Proc,
        RawValue::Class(_) => ValueTag::Module,
        RawValue::Object(_) => {
            let runtime = ctx.runtime();
            if runtime.is_kind_of(raw, &runtime.builtins.exception) {
                ValueTag::Exception
            } else {
                ValueTag::Object
            }
        }
    }
}

/// A VM value held by the host.
///
/// Heap values stay registered as collector roots for as long as the
/// handle (or any clone of it) is alive.
pub struct Value<'ctx> {
    ctx: &'ctx Context,
    raw: RawValue,
    root: Option<u64>,
}

impl<'ctx> Value<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, raw: RawValue) -> Self {
        let root = match raw {
            RawValue::Nil
            | RawValue::Bool(_)
            | RawValue::Integer(_)
            | RawValue::Float(_)
            | RawValue::Symbol(_)
            | RawValue::Range(..) => None,
            _ => Some(ctx.runtime().add_root(raw.clone())),
        };
        Self { ctx, raw, root }
    }

    pub(crate) fn raw(&self) -> &RawValue {
        &self.raw
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn tag(&self) -> ValueTag {
        tag_of(self.ctx, &self.raw)
    }

    pub fn is_nil(&self) -> bool {
        self.raw.is_nil()
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            found: self.tag(),
        }
    }

    pub fn to_int(&self) -> Result<i64> {
        match self.raw {
            RawValue::Integer(n) => Ok(n),
            _ => Err(self.mismatch("integer")),
        }
    }

    pub fn to_float(&self) -> Result<f64> {
        match self.raw {
            RawValue::Float(f) => Ok(f),
            _ => Err(self.mismatch("float")),
        }
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.raw {
            RawValue::Bool(b) => Ok(b),
            _ => Err(self.mismatch("boolean")),
        }
    }

    /// Raw string contents, no transcoding
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.raw {
            RawValue::String(bytes) => Ok(bytes.borrow().clone()),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_symbol(&self) -> Result<String> {
        match &self.raw {
            RawValue::Symbol(name) => Ok(name.to_string()),
            _ => Err(self.mismatch("symbol")),
        }
    }

    /// Recursive conversion into a host value; fails on the first opaque element
    pub fn to_interface(&self) -> Result<HostValue> {
        HostValue::from_raw(self.ctx, &self.raw)
    }

    pub fn to<T: FromValue>(&self) -> Result<T> {
        T::from_value(self)
    }

    /// Send `method` to this value, e.g. `value.call("push", (1, 2))`
    pub fn call<A: IntoArgs>(&self, method: &str, args: A) -> Result<Value<'ctx>> {
        let args = args.into_args(self.ctx)?;
        self.ctx.send(&self.raw, method, &args)
    }

    /// The value as the VM's `inspect` would print it
    pub fn inspect(&self) -> String {
        self.raw.inspect()
    }
}

impl Clone for Value<'_> {
    fn clone(&self) -> Self {
        Value::new(self.ctx, self.raw.clone())
    }
}

impl Drop for Value<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.root.take() {
            self.ctx.runtime().remove_root(id);
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw.to_s())
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}, {})", self.tag(), self.raw.inspect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        let ctx = Context::new();
        let cases = [
            ("nil", ValueTag::Nil),
            ("true", ValueTag::Boolean),
            ("1", ValueTag::Integer),
            ("1.5", ValueTag::Float),
            ("\"s\"", ValueTag::String),
            (":s", ValueTag::Symbol),
            ("[1]", ValueTag::Array),
            ("{a: 1}", ValueTag::Hash),
            ("1..3", ValueTag::Range),
            ("proc { 1 }", ValueTag::Proc),
            ("Math", ValueTag::Module),
            ("Object.new", ValueTag::Object),
            ("RuntimeError.new(\"x\")", ValueTag::Exception),
        ];
        for (source, tag) in cases {
            let value = ctx.load_string(source, ()).unwrap();
            assert_eq!(value.tag(), tag, "{}", source);
        }
    }

    #[test]
    fn test_accessors_do_not_coerce() {
        let ctx = Context::new();
        let int = ctx.load_string("3", ()).unwrap();
        assert_eq!(int.to_int().unwrap(), 3);
        assert_eq!(
            int.to_float(),
            Err(Error::TypeMismatch {
                expected: "float",
                found: ValueTag::Integer
            })
        );
        let float = ctx.load_string("3.0", ()).unwrap();
        assert!(matches!(float.to_int(), Err(Error::TypeMismatch { .. })));
        let sym = ctx.load_string(":ok", ()).unwrap();
        assert_eq!(sym.as_symbol().unwrap(), "ok");
        assert!(sym.to_bytes().is_err());
    }

    #[test]
    fn test_handles_register_roots() {
        let ctx = Context::new();
        let before = ctx.runtime().root_count();
        let array = ctx.load_string("[1, 2]", ()).unwrap();
        assert_eq!(ctx.runtime().root_count(), before + 1);
        let copy = array.clone();
        assert_eq!(ctx.runtime().root_count(), before + 2);
        drop(array);
        drop(copy);
        assert_eq!(ctx.runtime().root_count(), before);
        let _int = ctx.load_string("7", ()).unwrap();
        assert_eq!(ctx.runtime().root_count(), before);
    }

    #[test]
    fn test_call_display_and_inspect() {
        let ctx = Context::new();
        let array = ctx.load_string("[3, 1, 2]", ()).unwrap();
        let sorted = array.call("sort", ()).unwrap();
        assert_eq!(sorted.inspect(), "[1, 2, 3]");
        let joined = sorted.call("join", ("-",)).unwrap();
        assert_eq!(joined.to_string(), "1-2-3");
        let error = array.call("no_such_method", ()).unwrap_err();
        assert_eq!(error.class_name(), Some("NoMethodError"));
    }
}
