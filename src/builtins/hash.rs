// Hash built-ins
// Keys compare by eql? (1 and 1.0 are distinct); iteration follows insertion order
// Provides: new, [], []=, fetch, dig, key?, keys, values, each, map, select, reject,
// merge, delete, to_a, sort_by, min_by, max_by, sum, count, any?, all?, transform_values

use super::array::{extreme_by, fold, sort_by_values, sum_values};
use super::{check_arity, expect_block, inspect_value, values_equal};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::{RHash, Value};
use std::cmp::Ordering;

pub fn install(builtins: &Builtins) {
    let hash = &builtins.hash;
    hash.define_singleton_native("new", hash_new);
    hash.define_native("[]", hash_get);
    hash.define_native("[]=", hash_set);
    hash.define_native("store", hash_set);
    hash.define_native("fetch", hash_fetch);
    hash.define_native("dig", hash_dig);
    hash.define_native("key?", hash_has_key);
    hash.define_native("has_key?", hash_has_key);
    hash.define_native("include?", hash_has_key);
    hash.define_native("member?", hash_has_key);
    hash.define_native("value?", hash_has_value);
    hash.define_native("has_value?", hash_has_value);
    hash.define_native("key", hash_key_for);
    hash.define_native("keys", hash_keys);
    hash.define_native("values", hash_values);
    hash.define_native("values_at", hash_values_at);
    hash.define_native("length", hash_length);
    hash.define_native("size", hash_length);
    hash.define_native("empty?", hash_empty);
    hash.define_native("each", hash_each);
    hash.define_native("each_pair", hash_each);
    hash.define_native("each_key", hash_each_key);
    hash.define_native("each_value", hash_each_value);
    hash.define_native("each_with_object", hash_each_with_object);
    hash.define_native("map", hash_map);
    hash.define_native("collect", hash_map);
    hash.define_native("flat_map", hash_flat_map);
    hash.define_native("select", hash_select);
    hash.define_native("filter", hash_select);
    hash.define_native("reject", hash_reject);
    hash.define_native("find", hash_find);
    hash.define_native("detect", hash_find);
    hash.define_native("count", hash_count);
    hash.define_native("any?", hash_any);
    hash.define_native("all?", hash_all);
    hash.define_native("sum", hash_sum);
    hash.define_native("inject", hash_inject);
    hash.define_native("reduce", hash_inject);
    hash.define_native("sort_by", hash_sort_by);
    hash.define_native("min_by", hash_min_by);
    hash.define_native("max_by", hash_max_by);
    hash.define_native("group_by", hash_group_by);
    hash.define_native("partition", hash_partition);
    hash.define_native("transform_values", hash_transform_values);
    hash.define_native("transform_keys", hash_transform_keys);
    hash.define_native("merge", hash_merge);
    hash.define_native("update", hash_update);
    hash.define_native("merge!", hash_update);
    hash.define_native("delete", hash_delete);
    hash.define_native("clear", hash_clear);
    hash.define_native("invert", hash_invert);
    hash.define_native("to_a", hash_to_a);
    hash.define_native("entries", hash_to_a);
    hash.define_native("to_h", hash_to_h);
    hash.define_native("sort", hash_sort);
    hash.define_native("first", hash_first);
    hash.define_native("default", hash_default);
    hash.define_native("default=", hash_set_default);
    hash.define_native("==", hash_equal);
    hash.define_native("inspect", hash_inspect);
    hash.define_native("to_s", hash_inspect);
}

fn table(recv: &Value) -> RHash {
    match recv {
        Value::Hash(hash) => hash.borrow().clone(),
        _ => RHash::new(),
    }
}

fn entries(recv: &Value) -> Vec<(Value, Value)> {
    match recv {
        Value::Hash(hash) => hash.borrow().entries(),
        _ => Vec::new(),
    }
}

/// `[key, value]` pairs, the shape blocks and Enumerable-style methods see
fn pairs(vm: &dyn ValueCaller, recv: &Value) -> Vec<Value> {
    let runtime = vm.runtime();
    entries(recv)
        .into_iter()
        .map(|(key, value)| runtime.new_array(vec![key, value]))
        .collect()
}

fn new_hash(vm: &dyn ValueCaller, hash: RHash) -> Value {
    vm.runtime().new_hash(hash)
}

fn expect_hash(vm: &dyn ValueCaller, value: &Value) -> Result<RHash, NativeError> {
    match value {
        Value::Hash(hash) => Ok(hash.borrow().clone()),
        other => Err(NativeError::type_error(format!(
            "no implicit conversion of {} into Hash",
            super::class_name(vm, other)
        ))),
    }
}

fn hash_new(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let mut hash = RHash::new();
    hash.default = args.first().cloned().unwrap_or(Value::Nil);
    Ok(new_hash(vm, hash))
}

fn hash_get(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let Value::Hash(hash) = recv else {
        return Ok(Value::Nil);
    };
    let hash = hash.borrow();
    Ok(hash.get(&args[0]).cloned().unwrap_or_else(|| hash.default.clone()))
}

fn hash_set(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    if let Value::Hash(hash) = recv {
        hash.borrow_mut().insert(args[0].clone(), args[1].clone());
    }
    Ok(args[1].clone())
}

fn hash_fetch(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    if let Some(value) = table(recv).get(&args[0]) {
        return Ok(value.clone());
    }
    if let Some(block) = block {
        return vm.call(block, vec![args[0].clone()]);
    }
    match args.get(1) {
        Some(default) => Ok(default.clone()),
        None => Err(NativeError::Raise(
            ErrorKind::KeyError,
            format!("key not found: {}", inspect_value(vm, &args[0])?),
        )),
    }
}

fn hash_dig(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let mut current = recv.clone();
    for key in args {
        if current.is_nil() {
            return Ok(Value::Nil);
        }
        current = vm.call_method(&current, "[]", vec![key.clone()], None)?;
    }
    Ok(current)
}

fn hash_has_key(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(table(recv).contains_key(&args[0])))
}

fn hash_has_value(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    for (_, value) in entries(recv) {
        if values_equal(vm, &value, &args[0])? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn hash_key_for(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    for (key, value) in entries(recv) {
        if values_equal(vm, &value, &args[0])? {
            return Ok(key);
        }
    }
    Ok(Value::Nil)
}

fn hash_keys(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(vm.runtime().new_array(table(recv).keys()))
}

fn hash_values(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(vm.runtime().new_array(table(recv).values()))
}

fn hash_values_at(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let hash = table(recv);
    let values = args
        .iter()
        .map(|key| hash.get(key).cloned().unwrap_or_else(|| hash.default.clone()))
        .collect();
    Ok(vm.runtime().new_array(values))
}

fn hash_length(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(table(recv).len() as i64))
}

fn hash_empty(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(table(recv).is_empty()))
}

// ==================== Iteration ====================

fn hash_each(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for pair in pairs(vm, recv) {
        vm.call(block, vec![pair])?;
    }
    Ok(recv.clone())
}

fn hash_each_key(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for (key, _) in entries(recv) {
        vm.call(block, vec![key])?;
    }
    Ok(recv.clone())
}

fn hash_each_value(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for (_, value) in entries(recv) {
        vm.call(block, vec![value])?;
    }
    Ok(recv.clone())
}

fn hash_each_with_object(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let block = expect_block(block)?;
    let memo = args[0].clone();
    for pair in pairs(vm, recv) {
        vm.call(block, vec![pair, memo.clone()])?;
    }
    Ok(memo)
}

fn hash_map(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::new();
    for pair in pairs(vm, recv) {
        out.push(vm.call(block, vec![pair])?);
    }
    Ok(vm.runtime().new_array(out))
}

fn hash_flat_map(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::new();
    for pair in pairs(vm, recv) {
        match vm.call(block, vec![pair])? {
            Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
            other => out.push(other),
        }
    }
    Ok(vm.runtime().new_array(out))
}

/// Entries split by the block's answer for `[key, value]`
fn split_entries(vm: &mut dyn ValueCaller, recv: &Value, block: &Value) -> Result<(RHash, RHash), NativeError> {
    let (mut kept, mut dropped) = (RHash::new(), RHash::new());
    for (key, value) in entries(recv) {
        let pair = vm.runtime().new_array(vec![key.clone(), value.clone()]);
        if vm.call(block, vec![pair])?.is_truthy() {
            kept.insert(key, value);
        } else {
            dropped.insert(key, value);
        }
    }
    Ok((kept, dropped))
}

fn hash_select(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (kept, _) = split_entries(vm, recv, expect_block(block)?)?;
    Ok(new_hash(vm, kept))
}

fn hash_reject(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (_, dropped) = split_entries(vm, recv, expect_block(block)?)?;
    Ok(new_hash(vm, dropped))
}

fn hash_partition(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (kept, dropped) = split_entries(vm, recv, expect_block(block)?)?;
    let to_pairs = |vm: &dyn ValueCaller, hash: RHash| {
        let runtime = vm.runtime();
        let items = hash
            .entries()
            .into_iter()
            .map(|(k, v)| runtime.new_array(vec![k, v]))
            .collect();
        runtime.new_array(items)
    };
    let result = vec![to_pairs(vm, kept), to_pairs(vm, dropped)];
    Ok(vm.runtime().new_array(result))
}

fn hash_find(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for pair in pairs(vm, recv) {
        if vm.call(block, vec![pair.clone()])?.is_truthy() {
            return Ok(pair);
        }
    }
    Ok(Value::Nil)
}

fn hash_count(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let Some(block) = block else {
        return Ok(Value::Integer(table(recv).len() as i64));
    };
    let mut count = 0;
    for pair in pairs(vm, recv) {
        if vm.call(block, vec![pair])?.is_truthy() {
            count += 1;
        }
    }
    Ok(Value::Integer(count))
}

fn hash_any(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let Some(block) = block else {
        return Ok(Value::Bool(!table(recv).is_empty()));
    };
    for pair in pairs(vm, recv) {
        if vm.call(block, vec![pair])?.is_truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn hash_all(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let Some(block) = block else {
        return Ok(Value::Bool(true));
    };
    for pair in pairs(vm, recv) {
        if !vm.call(block, vec![pair])?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn hash_sum(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    sum_values(vm, elements, args, block)
}

fn hash_inject(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    fold(vm, elements, args, block)
}

fn hash_sort_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    let sorted = sort_by_values(vm, elements, expect_block(block)?)?;
    Ok(vm.runtime().new_array(sorted))
}

fn hash_min_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    extreme_by(vm, elements, expect_block(block)?, Ordering::Less)
}

fn hash_max_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    extreme_by(vm, elements, expect_block(block)?, Ordering::Greater)
}

fn hash_group_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    let array = vm.runtime().new_array(elements);
    vm.call_method(&array, "group_by", Vec::new(), block.cloned())
}

fn hash_transform_values(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = RHash::new();
    for (key, value) in entries(recv) {
        out.insert(key, vm.call(block, vec![value])?);
    }
    Ok(new_hash(vm, out))
}

fn hash_transform_keys(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = RHash::new();
    for (key, value) in entries(recv) {
        out.insert(vm.call(block, vec![key])?, value);
    }
    Ok(new_hash(vm, out))
}

/// Fold `other` into `into`, resolving clashes through the block when given
fn merge_into(
    vm: &mut dyn ValueCaller,
    into: &mut RHash,
    other: RHash,
    block: Option<&Value>,
) -> Result<(), NativeError> {
    for (key, value) in other.entries() {
        let value = match (into.get(&key).cloned(), block) {
            (Some(old), Some(block)) => vm.call(block, vec![key.clone(), old, value])?,
            _ => value,
        };
        into.insert(key, value);
    }
    Ok(())
}

fn hash_merge(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let mut merged = table(recv);
    for arg in args {
        let other = expect_hash(vm, arg)?;
        merge_into(vm, &mut merged, other, block)?;
    }
    Ok(new_hash(vm, merged))
}

fn hash_update(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let mut merged = table(recv);
    for arg in args {
        let other = expect_hash(vm, arg)?;
        merge_into(vm, &mut merged, other, block)?;
    }
    if let Value::Hash(hash) = recv {
        *hash.borrow_mut() = merged;
    }
    Ok(recv.clone())
}

fn hash_delete(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let removed = match recv {
        Value::Hash(hash) => hash.borrow_mut().remove(&args[0]),
        _ => None,
    };
    match (removed, block) {
        (Some(value), _) => Ok(value),
        (None, Some(block)) => vm.call(block, vec![args[0].clone()]),
        (None, None) => Ok(Value::Nil),
    }
}

fn hash_clear(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    if let Value::Hash(hash) = recv {
        hash.borrow_mut().clear();
    }
    Ok(recv.clone())
}

fn hash_invert(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut out = RHash::new();
    for (key, value) in entries(recv) {
        out.insert(value, key);
    }
    Ok(new_hash(vm, out))
}

fn hash_to_a(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    Ok(vm.runtime().new_array(elements))
}

fn hash_to_h(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn hash_sort(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let elements = pairs(vm, recv);
    let array = vm.runtime().new_array(elements);
    vm.call_method(&array, "sort", Vec::new(), block.cloned())
}

fn hash_first(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let elements = pairs(vm, recv);
    let array = vm.runtime().new_array(elements);
    vm.call_method(&array, "first", args.to_vec(), None)
}

fn hash_default(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(table(recv).default)
}

fn hash_set_default(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    if let Value::Hash(hash) = recv {
        hash.borrow_mut().default = args[0].clone();
    }
    Ok(args[0].clone())
}

fn hash_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(values_equal(vm, recv, &args[0])?))
}

fn hash_inspect(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&inspect_value(vm, recv)?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_literal_access_and_default() {
        assert_eq!(eval("h = { a: 1, \"b\" => 2 }\nh[:a] + h[\"b\"]"), "3");
        assert_eq!(eval("h = {}\nh[:missing]"), "nil");
        assert_eq!(eval("h = Hash.new(0)\nh[:x] += 1\nh"), "{x: 1}");
    }

    #[test]
    fn test_fetch_missing_key_raises_key_error() {
        assert_eq!(eval("{ a: 1 }.fetch(:b)"), "KeyError: key not found: :b");
        assert_eq!(eval("{ a: 1 }.fetch(:b, 5)"), "5");
        assert_eq!(eval("{ a: 1 }.fetch(:b) { |k| k.to_s }"), "\"b\"");
    }

    #[test]
    fn test_integer_and_float_keys_are_distinct() {
        assert_eq!(eval("h = { 1 => :int }\nh[1.0]"), "nil");
    }

    #[test]
    fn test_iteration_destructures_pairs() {
        assert_eq!(eval("t = []\n{ a: 1, b: 2 }.each { |k, v| t << \"#{k}=#{v}\" }\nt"), "[\"a=1\", \"b=2\"]");
        assert_eq!(eval("{ a: 1, b: 2 }.map { |k, v| v * 10 }"), "[10, 20]");
        assert_eq!(eval("{ a: 1, b: 2 }.select { |k, v| v > 1 }"), "{b: 2}");
        assert_eq!(eval("{ a: 3, b: 1 }.sort_by { |k, v| v }.first"), "[:b, 1]");
    }

    #[test]
    fn test_merge_and_delete() {
        assert_eq!(eval("{ a: 1 }.merge({ b: 2 })"), "{a: 1, b: 2}");
        assert_eq!(eval("{ a: 1 }.merge({ a: 2 }) { |k, o, n| o + n }"), "{a: 3}");
        assert_eq!(eval("h = { a: 1, b: 2 }\nh.delete(:a)\nh"), "{b: 2}");
        assert_eq!(eval("{ a: 1 }.transform_values { |v| v + 1 }"), "{a: 2}");
    }
}
