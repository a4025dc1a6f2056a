// Conversions between host data and VM values
// Strict by tag: no int/float widening, no string/symbol blurring

use super::context::Context;
use super::error::{Error, Result};
use super::value::{tag_of, Value, ValueTag};
use crate::vm::value::{RHash, Value as RawValue};
use std::collections::HashMap;
use std::hash::Hash;

/// Plain host data a VM value can be converted into and built from
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// String contents that are not valid UTF-8
    Bytes(Vec<u8>),
    Symbol(String),
    Array(Vec<HostValue>),
    /// Entries in insertion order
    Hash(Vec<(HostValue, HostValue)>),
}

impl HostValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            HostValue::Nil => ValueTag::Nil,
            HostValue::Bool(_) => ValueTag::Boolean,
            HostValue::Int(_) => ValueTag::Integer,
            HostValue::Float(_) => ValueTag::Float,
            HostValue::String(_) | HostValue::Bytes(_) => ValueTag::String,
            HostValue::Symbol(_) => ValueTag::Symbol,
            HostValue::Array(_) => ValueTag::Array,
            HostValue::Hash(_) => ValueTag::Hash,
        }
    }

    pub(crate) fn from_raw(ctx: &Context, raw: &RawValue) -> Result<Self> {
        let mut path = Vec::new();
        Self::convert(ctx, raw, &mut path)
    }

    /// `path` holds the containers being converted, so cycles fail instead of recursing forever
    fn convert(ctx: &Context, raw: &RawValue, path: &mut Vec<usize>) -> Result<Self> {
        match raw {
            RawValue::Nil => Ok(HostValue::Nil),
            RawValue::Bool(b) => Ok(HostValue::Bool(*b)),
            RawValue::Integer(n) => Ok(HostValue::Int(*n)),
            RawValue::Float(f) => Ok(HostValue::Float(*f)),
            RawValue::String(bytes) => {
                let bytes = bytes.borrow().clone();
                Ok(match String::from_utf8(bytes) {
                    Ok(text) => HostValue::String(text),
                    Err(error) => HostValue::Bytes(error.into_bytes()),
                })
            }
            RawValue::Symbol(name) => Ok(HostValue::Symbol(name.to_string())),
            RawValue::Array(items) => {
                let identity = raw.identity();
                if path.contains(&identity) {
                    return Err(Error::UnsupportedType(ValueTag::Array));
                }
                path.push(identity);
                let items = items.borrow().clone();
                let converted = items
                    .iter()
                    .map(|item| Self::convert(ctx, item, path))
                    .collect::<Result<Vec<_>>>();
                path.pop();
                Ok(HostValue::Array(converted?))
            }
            RawValue::Hash(hash) => {
                let identity = raw.identity();
                if path.contains(&identity) {
                    return Err(Error::UnsupportedType(ValueTag::Hash));
                }
                path.push(identity);
                let entries = hash.borrow().entries();
                let converted = entries
                    .iter()
                    .map(|(key, value)| {
                        Ok((Self::convert(ctx, key, path)?, Self::convert(ctx, value, path)?))
                    })
                    .collect::<Result<Vec<_>>>();
                path.pop();
                Ok(HostValue::Hash(converted?))
            }
            other => Err(Error::UnsupportedType(tag_of(ctx, other))),
        }
    }

    pub(crate) fn into_raw(self, ctx: &Context) -> RawValue {
        let runtime = ctx.runtime();
        match self {
            HostValue::Nil => RawValue::Nil,
            HostValue::Bool(b) => RawValue::Bool(b),
            HostValue::Int(n) => RawValue::Integer(n),
            HostValue::Float(f) => RawValue::Float(f),
            HostValue::String(text) => RawValue::string(text.into_bytes()),
            HostValue::Bytes(bytes) => RawValue::string(bytes),
            HostValue::Symbol(name) => RawValue::symbol(&name),
            HostValue::Array(items) => {
                runtime.new_array(items.into_iter().map(|item| item.into_raw(ctx)).collect())
            }
            HostValue::Hash(entries) => {
                let mut hash = RHash::new();
                for (key, value) in entries {
                    hash.insert(key.into_raw(ctx), value.into_raw(ctx));
                }
                runtime.new_hash(hash)
            }
        }
    }

    /// JSON rendering; hash keys must be strings or symbols and floats finite
    pub fn to_json(&self) -> Result<serde_json::Value> {
        use serde_json::Value as Json;
        Ok(match self {
            HostValue::Nil => Json::Null,
            HostValue::Bool(b) => Json::Bool(*b),
            HostValue::Int(n) => Json::from(*n),
            HostValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or(Error::UnsupportedType(ValueTag::Float))?,
            HostValue::String(text) | HostValue::Symbol(text) => Json::String(text.clone()),
            HostValue::Bytes(_) => return Err(Error::UnsupportedType(ValueTag::String)),
            HostValue::Array(items) => {
                Json::Array(items.iter().map(HostValue::to_json).collect::<Result<_>>()?)
            }
            HostValue::Hash(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match key {
                        HostValue::String(text) | HostValue::Symbol(text) => text.clone(),
                        other => {
                            return Err(Error::TypeMismatch {
                                expected: "string key",
                                found: other.tag(),
                            })
                        }
                    };
                    object.insert(key, value.to_json()?);
                }
                Json::Object(object)
            }
        })
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::Nil,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(number) => match number.as_i64() {
                Some(n) => HostValue::Int(n),
                None => HostValue::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(text) => HostValue::String(text),
            Json::Array(items) => HostValue::Array(items.into_iter().map(HostValue::from).collect()),
            Json::Object(object) => HostValue::Hash(
                object
                    .into_iter()
                    .map(|(key, value)| (HostValue::String(key), HostValue::from(value)))
                    .collect(),
            ),
        }
    }
}

// ==================== Host -> VM ====================

/// Host data that can become a VM value in a given Context
pub trait IntoValue {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>>;
}

impl IntoValue for () {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(ctx.nil())
    }
}

impl IntoValue for bool {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, RawValue::Bool(self)))
    }
}

macro_rules! impl_into_integer {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
                    Ok(Value::new(ctx, RawValue::Integer(i64::from(self))))
                }
            }
        )*
    };
}

impl_into_integer!(i8, i16, i32, i64, u8, u16, u32);

impl IntoValue for f32 {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, RawValue::Float(f64::from(self))))
    }
}

impl IntoValue for f64 {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, RawValue::Float(self)))
    }
}

impl IntoValue for &str {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, RawValue::str(self)))
    }
}

impl IntoValue for String {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, RawValue::string(self.into_bytes())))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        match self {
            Some(value) => value.into_value(ctx),
            None => Ok(ctx.nil()),
        }
    }
}

fn array_of<'c, T: IntoValue>(
    ctx: &'c Context,
    items: impl Iterator<Item = T>,
) -> Result<Value<'c>> {
    let mut raw = Vec::new();
    for item in items {
        raw.push(item.into_value(ctx)?.raw().clone());
    }
    Ok(Value::new(ctx, ctx.runtime().new_array(raw)))
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        array_of(ctx, self.into_iter())
    }
}

impl<T: IntoValue + Clone> IntoValue for &[T] {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        array_of(ctx, self.iter().cloned())
    }
}

impl<K: IntoValue, V: IntoValue, S> IntoValue for HashMap<K, V, S> {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        let mut hash = RHash::new();
        for (key, value) in self {
            let key = key.into_value(ctx)?;
            let value = value.into_value(ctx)?;
            hash.insert(key.raw().clone(), value.raw().clone());
        }
        Ok(Value::new(ctx, ctx.runtime().new_hash(hash)))
    }
}

impl IntoValue for HostValue {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        Ok(Value::new(ctx, self.into_raw(ctx)))
    }
}

impl IntoValue for serde_json::Value {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        HostValue::from(self).into_value(ctx)
    }
}

impl IntoValue for &Value<'_> {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        if !self.context().same_context(ctx) {
            return Err(Error::state("value belongs to a different context"));
        }
        Ok(Value::new(ctx, self.raw().clone()))
    }
}

impl IntoValue for Value<'_> {
    fn into_value<'c>(self, ctx: &'c Context) -> Result<Value<'c>> {
        (&self).into_value(ctx)
    }
}

// ==================== VM -> Host ====================

/// Host types a VM value can be read back as
pub trait FromValue: Sized {
    fn from_value(value: &Value<'_>) -> Result<Self>;
}

impl FromValue for () {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        if value.is_nil() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: "nil",
                found: value.tag(),
            })
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        value.to_bool()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        value.to_int()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        value.to_float()
    }
}

impl FromValue for String {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        String::from_utf8(value.to_bytes()?).map_err(|_| Error::TypeMismatch {
            expected: "UTF-8 string",
            found: ValueTag::String,
        })
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        if value.is_nil() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        let RawValue::Array(items) = value.raw() else {
            return Err(Error::TypeMismatch {
                expected: "array",
                found: value.tag(),
            });
        };
        let items = items.borrow().clone();
        items
            .into_iter()
            .map(|item| T::from_value(&Value::new(value.context(), item)))
            .collect()
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        let RawValue::Hash(hash) = value.raw() else {
            return Err(Error::TypeMismatch {
                expected: "hash",
                found: value.tag(),
            });
        };
        let ctx = value.context();
        let entries = hash.borrow().entries();
        entries
            .into_iter()
            .map(|(key, item)| {
                Ok((
                    K::from_value(&Value::new(ctx, key))?,
                    V::from_value(&Value::new(ctx, item))?,
                ))
            })
            .collect()
    }
}

impl FromValue for HostValue {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        value.to_interface()
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value<'_>) -> Result<Self> {
        value.to_interface()?.to_json()
    }
}

// ==================== Argument lists ====================

/// Anything usable as a script argument list (`ARGV`) or method arguments
pub trait IntoArgs {
    fn into_args<'c>(self, ctx: &'c Context) -> Result<Vec<Value<'c>>>;
}

impl IntoArgs for () {
    fn into_args<'c>(self, _ctx: &'c Context) -> Result<Vec<Value<'c>>> {
        Ok(Vec::new())
    }
}

macro_rules! impl_into_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoValue),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args<'c>(self, ctx: &'c Context) -> Result<Vec<Value<'c>>> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_value(ctx)?),+])
            }
        }
    };
}

impl_into_args_tuple!(A);
impl_into_args_tuple!(A, B);
impl_into_args_tuple!(A, B, C);
impl_into_args_tuple!(A, B, C, D);
impl_into_args_tuple!(A, B, C, D, E);
impl_into_args_tuple!(A, B, C, D, E, F);

impl<T: IntoValue> IntoArgs for Vec<T> {
    fn into_args<'c>(self, ctx: &'c Context) -> Result<Vec<Value<'c>>> {
        self.into_iter().map(|item| item.into_value(ctx)).collect()
    }
}

impl<T: IntoValue + Clone> IntoArgs for &[T] {
    fn into_args<'c>(self, ctx: &'c Context) -> Result<Vec<Value<'c>>> {
        self.iter().cloned().map(|item| item.into_value(ctx)).collect()
    }
}

impl<T: IntoValue, const N: usize> IntoArgs for [T; N] {
    fn into_args<'c>(self, ctx: &'c Context) -> Result<Vec<Value<'c>>> {
        self.into_iter().map(|item| item.into_value(ctx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_round_trip() {
        let ctx = Context::new();
        let host = HostValue::Hash(vec![
            (HostValue::Symbol("name".into()), HostValue::String("garnet".into())),
            (
                HostValue::String("list".into()),
                HostValue::Array(vec![HostValue::Int(1), HostValue::Float(2.5), HostValue::Nil]),
            ),
        ]);
        let value = ctx.to_value(host.clone()).unwrap();
        assert_eq!(value.tag(), ValueTag::Hash);
        assert_eq!(value.to_interface().unwrap(), host);
    }

    #[test]
    fn test_non_utf8_string_surfaces_as_bytes() {
        let ctx = Context::new();
        let value = ctx.to_value(HostValue::Bytes(vec![0xff, 0x61])).unwrap();
        assert_eq!(value.to_interface().unwrap(), HostValue::Bytes(vec![0xff, 0x61]));
        assert!(matches!(value.to::<String>(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_opaque_values_fail_closed() {
        let ctx = Context::new();
        let value = ctx.load_string("[1, proc { 2 }]", ()).unwrap();
        assert_eq!(value.to_interface(), Err(Error::UnsupportedType(ValueTag::Proc)));
        let range = ctx.load_string("1..2", ()).unwrap();
        assert_eq!(range.to_interface(), Err(Error::UnsupportedType(ValueTag::Range)));
    }

    #[test]
    fn test_recursive_array_is_rejected() {
        let ctx = Context::new();
        let value = ctx.load_string("a = [1]\na << a\na", ()).unwrap();
        assert_eq!(value.to_interface(), Err(Error::UnsupportedType(ValueTag::Array)));
    }

    #[test]
    fn test_typed_collections() {
        let ctx = Context::new();
        let value = ctx.load_string("[1, nil, 3]", ()).unwrap();
        assert_eq!(value.to::<Vec<Option<i64>>>().unwrap(), vec![Some(1), None, Some(3)]);
        assert!(value.to::<Vec<i64>>().is_err());

        let hash = ctx.load_string("{\"a\" => 1, \"b\" => 2}", ()).unwrap();
        let map = hash.to::<HashMap<String, i64>>().unwrap();
        assert_eq!(map.get("b"), Some(&2));

        let mut source = HashMap::new();
        source.insert("k".to_string(), vec![1i64, 2]);
        let back = ctx.to_value(source).unwrap();
        assert_eq!(back.inspect(), "{\"k\" => [1, 2]}");
    }

    #[test]
    fn test_symbol_is_not_a_string() {
        let ctx = Context::new();
        let sym = ctx.load_string(":name", ()).unwrap();
        assert_eq!(
            sym.to::<String>(),
            Err(Error::TypeMismatch {
                expected: "string",
                found: ValueTag::Symbol
            })
        );
        assert_eq!(sym.to_interface().unwrap(), HostValue::Symbol("name".into()));
    }

    #[test]
    fn test_json_bridge() {
        let ctx = Context::new();
        let value = ctx
            .to_value(json!({"id": 7, "tags": ["a", "b"], "ratio": 0.5, "none": null}))
            .unwrap();
        assert_eq!(value.call("[]", ("id",)).unwrap().to_int().unwrap(), 7);
        let back: serde_json::Value = ctx
            .load_string("{name: \"x\", n: [1, 2.5]}", ())
            .unwrap()
            .to()
            .unwrap();
        assert_eq!(back, json!({"name": "x", "n": [1, 2.5]}));
    }

    #[test]
    fn test_json_rejects_non_string_keys() {
        let host = HostValue::Hash(vec![(HostValue::Int(1), HostValue::Nil)]);
        assert_eq!(
            host.to_json(),
            Err(Error::TypeMismatch {
                expected: "string key",
                found: ValueTag::Integer
            })
        );
    }

    #[test]
    fn test_args_from_tuples_slices_and_arrays() {
        let ctx = Context::new();
        let args = (1, "two", 3.0).into_args(&ctx).unwrap();
        let tags: Vec<ValueTag> = args.iter().map(Value::tag).collect();
        assert_eq!(tags, vec![ValueTag::Integer, ValueTag::String, ValueTag::Float]);
        assert_eq!([1i64, 2].into_args(&ctx).unwrap().len(), 2);
        assert_eq!(vec!["a"].as_slice().into_args(&ctx).unwrap().len(), 1);
    }
}
