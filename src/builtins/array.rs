// Array built-ins
// Iteration methods snapshot the array first, so blocks may mutate it freely
// Provides: new, [], []=, <<, push, pop, shift, unshift, each, each_with_index, map, select,
// reject, inject, sum, sort, sort_by, min, max, include?, join, first, last, flatten, uniq,
// zip, take, drop, each_slice, group_by, partition, tally, + - * == and friends

use super::{
    check_arity, compare_values, expect_block, expect_integer, expect_name, inspect_value,
    to_s_bytes, values_equal,
};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::{RHash, Value};
use std::cmp::Ordering;

pub fn install(builtins: &Builtins) {
    let array = &builtins.array;
    array.define_singleton_native("new", array_new);
    array.define_native("[]", array_get);
    array.define_native("slice", array_get);
    array.define_native("[]=", array_set);
    array.define_native("at", array_at);
    array.define_native("dig", array_dig);
    array.define_native("fetch", array_fetch);
    array.define_native("<<", array_push);
    array.define_native("push", array_push);
    array.define_native("append", array_push);
    array.define_native("pop", array_pop);
    array.define_native("shift", array_shift);
    array.define_native("unshift", array_unshift);
    array.define_native("prepend", array_unshift);
    array.define_native("insert", array_insert);
    array.define_native("concat", array_concat);
    array.define_native("delete", array_delete);
    array.define_native("delete_at", array_delete_at);
    array.define_native("clear", array_clear);
    array.define_native("length", array_length);
    array.define_native("size", array_length);
    array.define_native("empty?", array_empty);
    array.define_native("first", array_first);
    array.define_native("last", array_last);
    array.define_native("take", array_take);
    array.define_native("drop", array_drop);
    array.define_native("each", array_each);
    array.define_native("each_with_index", array_each_with_index);
    array.define_native("each_with_object", array_each_with_object);
    array.define_native("each_slice", array_each_slice);
    array.define_native("reverse_each", array_reverse_each);
    array.define_native("map", array_map);
    array.define_native("collect", array_map);
    array.define_native("flat_map", array_flat_map);
    array.define_native("map_with_index", array_map_with_index);
    array.define_native("select", array_select);
    array.define_native("filter", array_select);
    array.define_native("reject", array_reject);
    array.define_native("partition", array_partition);
    array.define_native("group_by", array_group_by);
    array.define_native("tally", array_tally);
    array.define_native("find", array_find);
    array.define_native("detect", array_find);
    array.define_native("find_index", array_index);
    array.define_native("index", array_index);
    array.define_native("inject", array_inject);
    array.define_native("reduce", array_inject);
    array.define_native("sum", array_sum);
    array.define_native("count", array_count);
    array.define_native("any?", array_any);
    array.define_native("all?", array_all);
    array.define_native("none?", array_none);
    array.define_native("include?", array_include);
    array.define_native("member?", array_include);
    array.define_native("sort", array_sort);
    array.define_native("sort_by", array_sort_by);
    array.define_native("min", array_min);
    array.define_native("max", array_max);
    array.define_native("min_by", array_min_by);
    array.define_native("max_by", array_max_by);
    array.define_native("reverse", array_reverse);
    array.define_native("rotate", array_rotate);
    array.define_native("uniq", array_uniq);
    array.define_native("compact", array_compact);
    array.define_native("flatten", array_flatten);
    array.define_native("zip", array_zip);
    array.define_native("join", array_join);
    array.define_native("+", array_plus);
    array.define_native("-", array_minus);
    array.define_native("*", array_times);
    array.define_native("&", array_and);
    array.define_native("|", array_or);
    array.define_native("==", array_equal);
    array.define_native("eql?", array_equal);
    array.define_native("<=>", array_compare);
    array.define_native("to_a", array_to_a);
    array.define_native("entries", array_to_a);
    array.define_native("to_h", array_to_h);
    array.define_native("inspect", array_inspect);
    array.define_native("to_s", array_inspect);
}

/// Snapshot of the receiver's elements
fn items(recv: &Value) -> Vec<Value> {
    match recv {
        Value::Array(items) => items.borrow().clone(),
        _ => Vec::new(),
    }
}

fn with_items<R>(recv: &Value, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
    match recv {
        Value::Array(items) => Some(f(&mut items.borrow_mut())),
        _ => None,
    }
}

fn new_array(vm: &dyn ValueCaller, items: Vec<Value>) -> Value {
    vm.runtime().new_array(items)
}

fn expect_array(vm: &dyn ValueCaller, value: &Value) -> Result<Vec<Value>, NativeError> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        other => Err(NativeError::type_error(format!(
            "no implicit conversion of {} into Array",
            super::class_name(vm, other)
        ))),
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    usize::try_from(index).ok()
}

fn array_new(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 2)?;
    let size = match args.first() {
        Some(size) => expect_integer(vm, size)?,
        None => 0,
    };
    if size < 0 {
        return Err(NativeError::argument("negative array size"));
    }
    let mut out = Vec::with_capacity(size as usize);
    for i in 0..size {
        let value = match block {
            Some(block) => vm.call(block, vec![Value::Integer(i)])?,
            None => args.get(1).cloned().unwrap_or(Value::Nil),
        };
        out.push(value);
    }
    Ok(new_array(vm, out))
}

// ==================== Access ====================

fn array_get(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let all = items(recv);
    let len = all.len();
    let (start, count) = match (&args[0], args.get(1)) {
        (Value::Range(a, b, exclusive), None) => {
            let Some(start) = resolve_index(*a, len) else {
                return Ok(Value::Nil);
            };
            let end = match resolve_index(*b, len) {
                Some(end) if *exclusive => end,
                Some(end) => end + 1,
                None => 0,
            };
            (start, end.saturating_sub(start))
        }
        (index, None) => {
            let index = expect_integer(vm, index)?;
            return Ok(resolve_index(index, len)
                .and_then(|i| all.get(i).cloned())
                .unwrap_or(Value::Nil));
        }
        (index, Some(count)) => {
            let Some(start) = resolve_index(expect_integer(vm, index)?, len) else {
                return Ok(Value::Nil);
            };
            let count = expect_integer(vm, count)?;
            if count < 0 {
                return Ok(Value::Nil);
            }
            (start, count as usize)
        }
    };
    if start > len {
        return Ok(Value::Nil);
    }
    let end = (start + count).min(len);
    Ok(new_array(vm, all[start..end].to_vec()))
}

fn array_set(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    let index = expect_integer(vm, &args[0])?;
    let value = args[1].clone();
    let len = items(recv).len();
    let Some(index) = resolve_index(index, len) else {
        return Err(NativeError::Raise(
            ErrorKind::IndexError,
            format!("index {} too small for array; minimum: -{}", index, len),
        ));
    };
    with_items(recv, |items| {
        if index >= items.len() {
            items.resize(index + 1, Value::Nil);
        }
        items[index] = value.clone();
    });
    Ok(value)
}

fn array_at(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let all = items(recv);
    let index = expect_integer(vm, &args[0])?;
    Ok(resolve_index(index, all.len())
        .and_then(|i| all.get(i).cloned())
        .unwrap_or(Value::Nil))
}

fn array_dig(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
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

fn array_fetch(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let all = items(recv);
    let index = expect_integer(vm, &args[0])?;
    if let Some(value) = resolve_index(index, all.len()).and_then(|i| all.get(i)) {
        return Ok(value.clone());
    }
    if let Some(block) = block {
        return vm.call(block, vec![args[0].clone()]);
    }
    match args.get(1) {
        Some(default) => Ok(default.clone()),
        None => Err(NativeError::Raise(
            ErrorKind::IndexError,
            format!(
                "index {} outside of array bounds: {}...{}",
                index,
                -(all.len() as i64),
                all.len()
            ),
        )),
    }
}

fn array_push(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    with_items(recv, |items| items.extend(args.iter().cloned()));
    Ok(recv.clone())
}

fn array_pop(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(with_items(recv, Vec::pop).flatten().unwrap_or(Value::Nil))
}

fn array_shift(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let shifted = with_items(recv, |items| {
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    });
    Ok(shifted.flatten().unwrap_or(Value::Nil))
}

fn array_unshift(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    with_items(recv, |items| {
        items.splice(0..0, args.iter().cloned());
    });
    Ok(recv.clone())
}

fn array_insert(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let index = expect_integer(vm, &args[0])?;
    let len = items(recv).len();
    let position = if index < 0 {
        resolve_index(index + 1, len)
    } else {
        Some(index as usize)
    };
    let Some(position) = position else {
        return Err(NativeError::Raise(
            ErrorKind::IndexError,
            format!("index {} too small for array; minimum: -{}", index, len + 1),
        ));
    };
    with_items(recv, |items| {
        if position > items.len() {
            items.resize(position, Value::Nil);
        }
        items.splice(position..position, args[1..].iter().cloned());
    });
    Ok(recv.clone())
}

fn array_concat(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut additions = Vec::new();
    for arg in args {
        additions.extend(expect_array(vm, arg)?);
    }
    with_items(recv, |items| items.extend(additions));
    Ok(recv.clone())
}

fn array_delete(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut kept = Vec::new();
    let mut found = None;
    for item in items(recv) {
        if values_equal(vm, &item, &args[0])? {
            found = Some(item);
        } else {
            kept.push(item);
        }
    }
    with_items(recv, |items| *items = kept);
    Ok(found.unwrap_or(Value::Nil))
}

fn array_delete_at(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let index = expect_integer(vm, &args[0])?;
    let removed = with_items(recv, |items| {
        let i = resolve_index(index, items.len())?;
        (i < items.len()).then(|| items.remove(i))
    });
    Ok(removed.flatten().unwrap_or(Value::Nil))
}

fn array_clear(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    with_items(recv, Vec::clear);
    Ok(recv.clone())
}

fn array_length(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(items(recv).len() as i64))
}

fn array_empty(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(items(recv).is_empty()))
}

fn take_count(vm: &dyn ValueCaller, value: &Value) -> Result<usize, NativeError> {
    let count = expect_integer(vm, value)?;
    usize::try_from(count).map_err(|_| NativeError::argument("negative array size"))
}

fn array_first(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let all = items(recv);
    match args.first() {
        None => Ok(all.first().cloned().unwrap_or(Value::Nil)),
        Some(count) => {
            let count = take_count(vm, count)?.min(all.len());
            Ok(new_array(vm, all[..count].to_vec()))
        }
    }
}

fn array_last(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let all = items(recv);
    match args.first() {
        None => Ok(all.last().cloned().unwrap_or(Value::Nil)),
        Some(count) => {
            let count = take_count(vm, count)?.min(all.len());
            Ok(new_array(vm, all[all.len() - count..].to_vec()))
        }
    }
}

fn array_take(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let all = items(recv);
    let count = take_count(vm, &args[0])?.min(all.len());
    Ok(new_array(vm, all[..count].to_vec()))
}

fn array_drop(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let all = items(recv);
    let count = take_count(vm, &args[0])?.min(all.len());
    Ok(new_array(vm, all[count..].to_vec()))
}

// ==================== Iteration ====================

fn array_each(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for item in items(recv) {
        vm.call(block, vec![item])?;
    }
    Ok(recv.clone())
}

fn array_each_with_index(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for (i, item) in items(recv).into_iter().enumerate() {
        vm.call(block, vec![item, Value::Integer(i as i64)])?;
    }
    Ok(recv.clone())
}

fn array_each_with_object(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let block = expect_block(block)?;
    let memo = args[0].clone();
    for item in items(recv) {
        vm.call(block, vec![item, memo.clone()])?;
    }
    Ok(memo)
}

fn array_each_slice(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let size = take_count(vm, &args[0])?;
    if size == 0 {
        return Err(NativeError::argument("invalid slice size"));
    }
    let slices: Vec<Value> = items(recv)
        .chunks(size)
        .map(|chunk| new_array(vm, chunk.to_vec()))
        .collect();
    match block {
        Some(block) => {
            for slice in slices {
                vm.call(block, vec![slice])?;
            }
            Ok(Value::Nil)
        }
        None => Ok(new_array(vm, slices)),
    }
}

fn array_reverse_each(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for item in items(recv).into_iter().rev() {
        vm.call(block, vec![item])?;
    }
    Ok(recv.clone())
}

fn array_map(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::new();
    for item in items(recv) {
        out.push(vm.call(block, vec![item])?);
    }
    Ok(new_array(vm, out))
}

fn array_flat_map(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::new();
    for item in items(recv) {
        match vm.call(block, vec![item])? {
            Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
            other => out.push(other),
        }
    }
    Ok(new_array(vm, out))
}

fn array_map_with_index(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::new();
    for (i, item) in items(recv).into_iter().enumerate() {
        out.push(vm.call(block, vec![item, Value::Integer(i as i64)])?);
    }
    Ok(new_array(vm, out))
}

/// Elements split by the truthiness of the block's answer
fn split_by_block(vm: &mut dyn ValueCaller, recv: &Value, block: &Value) -> Result<(Vec<Value>, Vec<Value>), NativeError> {
    let (mut kept, mut dropped) = (Vec::new(), Vec::new());
    for item in items(recv) {
        if vm.call(block, vec![item.clone()])?.is_truthy() {
            kept.push(item);
        } else {
            dropped.push(item);
        }
    }
    Ok((kept, dropped))
}

fn array_select(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (kept, _) = split_by_block(vm, recv, expect_block(block)?)?;
    Ok(new_array(vm, kept))
}

fn array_reject(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (_, dropped) = split_by_block(vm, recv, expect_block(block)?)?;
    Ok(new_array(vm, dropped))
}

fn array_partition(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let (kept, dropped) = split_by_block(vm, recv, expect_block(block)?)?;
    let pair = vec![new_array(vm, kept), new_array(vm, dropped)];
    Ok(new_array(vm, pair))
}

fn array_group_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut groups = RHash::new();
    for item in items(recv) {
        let key = vm.call(block, vec![item.clone()])?;
        match groups.get(&key) {
            Some(Value::Array(group)) => group.borrow_mut().push(item),
            _ => {
                let group = new_array(vm, vec![item]);
                groups.insert(key, group);
            }
        }
    }
    Ok(vm.runtime().new_hash(groups))
}

fn array_tally(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut counts = RHash::new();
    for item in items(recv) {
        let count = counts.get(&item).and_then(Value::as_integer).unwrap_or(0);
        counts.insert(item, Value::Integer(count + 1));
    }
    Ok(vm.runtime().new_hash(counts))
}

fn array_find(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for item in items(recv) {
        if vm.call(block, vec![item.clone()])?.is_truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Nil)
}

fn array_index(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    for (i, item) in items(recv).into_iter().enumerate() {
        let found = match (args.first(), block) {
            (Some(target), _) => values_equal(vm, &item, target)?,
            (None, Some(block)) => vm.call(block, vec![item])?.is_truthy(),
            (None, None) => return Err(NativeError::argument("wrong number of arguments (given 0, expected 1)")),
        };
        if found {
            return Ok(Value::Integer(i as i64));
        }
    }
    Ok(Value::Nil)
}

/// Shared by Array, Hash and Range: fold with a block, or with a method named by a symbol
pub fn fold(
    vm: &mut dyn ValueCaller,
    elements: Vec<Value>,
    args: &[Value],
    block: Option<&Value>,
) -> NativeResult {
    check_arity(args, 0, 2)?;
    let (initial, operator) = match (args, block) {
        ([init, op], _) => (Some(init.clone()), Some(expect_name(vm, op)?)),
        ([Value::Symbol(op)], None) => (None, Some(op.to_string())),
        ([init], _) => (Some(init.clone()), None),
        _ => (None, None),
    };
    let mut elements = elements.into_iter();
    let Some(mut acc) = initial.or_else(|| elements.next()) else {
        return Ok(Value::Nil);
    };
    for item in elements {
        acc = match (&operator, block) {
            (Some(op), _) => vm.call_method(&acc, op, vec![item], None)?,
            (None, Some(block)) => vm.call(block, vec![acc, item])?,
            (None, None) => return Err(NativeError::Raise(ErrorKind::LocalJumpError, "no block given".to_string())),
        };
    }
    Ok(acc)
}

fn array_inject(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    fold(vm, items(recv), args, block)
}

/// `sum` with an optional start value and mapping block
pub fn sum_values(
    vm: &mut dyn ValueCaller,
    elements: Vec<Value>,
    args: &[Value],
    block: Option<&Value>,
) -> NativeResult {
    check_arity(args, 0, 1)?;
    let mut acc = args.first().cloned().unwrap_or(Value::Integer(0));
    for item in elements {
        let item = match block {
            Some(block) => vm.call(block, vec![item])?,
            None => item,
        };
        acc = match super::numeric::arith(super::numeric::ArithOp::Add, &acc, &item) {
            Some(result) => result?,
            None => vm.call_method(&acc, "+", vec![item], None)?,
        };
    }
    Ok(acc)
}

fn array_sum(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    sum_values(vm, items(recv), args, block)
}

fn array_count(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let all = items(recv);
    let mut count = 0;
    match (args.first(), block) {
        (Some(target), _) => {
            for item in &all {
                if values_equal(vm, item, target)? {
                    count += 1;
                }
            }
        }
        (None, Some(block)) => {
            for item in all {
                if vm.call(block, vec![item])?.is_truthy() {
                    count += 1;
                }
            }
        }
        (None, None) => count = all.len(),
    }
    Ok(Value::Integer(count as i64))
}

/// Truthiness of each element, through the block when one is given
pub fn predicate_results(vm: &mut dyn ValueCaller, elements: Vec<Value>, block: Option<&Value>) -> Result<Vec<bool>, NativeError> {
    let mut out = Vec::with_capacity(elements.len());
    for item in elements {
        out.push(match block {
            Some(block) => vm.call(block, vec![item])?.is_truthy(),
            None => item.is_truthy(),
        });
    }
    Ok(out)
}

fn array_any(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    for item in items(recv) {
        let truthy = match block {
            Some(block) => vm.call(block, vec![item])?.is_truthy(),
            None => item.is_truthy(),
        };
        if truthy {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn array_all(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    for item in items(recv) {
        let truthy = match block {
            Some(block) => vm.call(block, vec![item])?.is_truthy(),
            None => item.is_truthy(),
        };
        if !truthy {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn array_none(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let results = predicate_results(vm, items(recv), block)?;
    Ok(Value::Bool(!results.into_iter().any(|truthy| truthy)))
}

fn array_include(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    for item in items(recv) {
        if values_equal(vm, &item, &args[0])? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

// ==================== Ordering ====================

/// Merge sort through a fallible comparison; stable, and a raise aborts the sort
pub fn sort_values(
    vm: &mut dyn ValueCaller,
    mut elements: Vec<Value>,
    compare: &mut dyn FnMut(&mut dyn ValueCaller, &Value, &Value) -> Result<Ordering, NativeError>,
) -> Result<Vec<Value>, NativeError> {
    if elements.len() <= 1 {
        return Ok(elements);
    }
    let right = elements.split_off(elements.len() / 2);
    let left = sort_values(vm, elements, compare)?;
    let right = sort_values(vm, right, compare)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut left, mut right) = (left.into_iter().peekable(), right.into_iter().peekable());
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare(vm, a, b)? == Ordering::Greater {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn block_ordering(vm: &mut dyn ValueCaller, block: &Value, a: &Value, b: &Value) -> Result<Ordering, NativeError> {
    match vm.call(block, vec![a.clone(), b.clone()])? {
        Value::Integer(n) => Ok(n.cmp(&0)),
        _ => Err(super::comparison_failed(vm, a, b)),
    }
}

fn array_sort(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let sorted = match block {
        Some(block) => sort_values(vm, items(recv), &mut |vm, a, b| block_ordering(vm, block, a, b))?,
        None => sort_values(vm, items(recv), &mut compare_values)?,
    };
    Ok(new_array(vm, sorted))
}

/// Elements paired with their block-computed keys
fn keyed(vm: &mut dyn ValueCaller, elements: Vec<Value>, block: &Value) -> Result<Vec<Value>, NativeError> {
    let mut pairs = Vec::with_capacity(elements.len());
    for item in elements {
        let key = vm.call(block, vec![item.clone()])?;
        pairs.push(new_array(vm, vec![key, item]));
    }
    Ok(pairs)
}

fn pair_parts(pair: &Value) -> (Value, Value) {
    let parts = items(pair);
    (
        parts.first().cloned().unwrap_or(Value::Nil),
        parts.get(1).cloned().unwrap_or(Value::Nil),
    )
}

pub fn sort_by_values(vm: &mut dyn ValueCaller, elements: Vec<Value>, block: &Value) -> Result<Vec<Value>, NativeError> {
    let pairs = keyed(vm, elements, block)?;
    let sorted = sort_values(vm, pairs, &mut |vm, a, b| {
        compare_values(vm, &pair_parts(a).0, &pair_parts(b).0)
    })?;
    Ok(sorted.iter().map(|pair| pair_parts(pair).1).collect())
}

fn array_sort_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let sorted = sort_by_values(vm, items(recv), expect_block(block)?)?;
    Ok(new_array(vm, sorted))
}

/// The element that wins every comparison against `wanted`
pub fn extreme(
    vm: &mut dyn ValueCaller,
    elements: Vec<Value>,
    block: Option<&Value>,
    wanted: Ordering,
) -> NativeResult {
    let mut best: Option<Value> = None;
    for item in elements {
        best = Some(match best {
            None => item,
            Some(current) => {
                let ordering = match block {
                    Some(block) => block_ordering(vm, block, &item, &current)?,
                    None => compare_values(vm, &item, &current)?,
                };
                if ordering == wanted {
                    item
                } else {
                    current
                }
            }
        });
    }
    Ok(best.unwrap_or(Value::Nil))
}

/// `min_by`/`max_by`: the element whose key wins
pub fn extreme_by(vm: &mut dyn ValueCaller, elements: Vec<Value>, block: &Value, wanted: Ordering) -> NativeResult {
    let mut best: Option<(Value, Value)> = None;
    for item in elements {
        let key = vm.call(block, vec![item.clone()])?;
        best = Some(match best {
            None => (key, item),
            Some((best_key, best_item)) => {
                if compare_values(vm, &key, &best_key)? == wanted {
                    (key, item)
                } else {
                    (best_key, best_item)
                }
            }
        });
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::Nil))
}

fn array_min(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme(vm, items(recv), block, Ordering::Less)
}

fn array_max(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme(vm, items(recv), block, Ordering::Greater)
}

fn array_min_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme_by(vm, items(recv), expect_block(block)?, Ordering::Less)
}

fn array_max_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme_by(vm, items(recv), expect_block(block)?, Ordering::Greater)
}

// ==================== Transformations ====================

fn array_reverse(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut all = items(recv);
    all.reverse();
    Ok(new_array(vm, all))
}

fn array_rotate(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let mut all = items(recv);
    if !all.is_empty() {
        let count = match args.first() {
            Some(count) => expect_integer(vm, count)?,
            None => 1,
        };
        let shift = count.rem_euclid(all.len() as i64) as usize;
        all.rotate_left(shift);
    }
    Ok(new_array(vm, all))
}

fn array_uniq(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let mut seen = RHash::new();
    let mut out = Vec::new();
    for item in items(recv) {
        let key = match block {
            Some(block) => vm.call(block, vec![item.clone()])?,
            None => item.clone(),
        };
        if !seen.contains_key(&key) {
            seen.insert(key, Value::Bool(true));
            out.push(item);
        }
    }
    Ok(new_array(vm, out))
}

fn array_compact(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let kept = items(recv).into_iter().filter(|item| !item.is_nil()).collect();
    Ok(new_array(vm, kept))
}

fn flatten_into(out: &mut Vec<Value>, items: Vec<Value>, depth: Option<i64>, seen: &mut Vec<usize>) -> Result<(), NativeError> {
    for item in items {
        match &item {
            Value::Array(inner) if !matches!(depth, Some(d) if d <= 0) => {
                let id = item.identity();
                if seen.contains(&id) {
                    return Err(NativeError::argument("tried to flatten recursive array"));
                }
                seen.push(id);
                let inner = inner.borrow().clone();
                flatten_into(out, inner, depth.map(|d| d - 1), seen)?;
                seen.pop();
            }
            _ => out.push(item),
        }
    }
    Ok(())
}

fn array_flatten(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let depth = match args.first() {
        Some(depth) => Some(expect_integer(vm, depth)?),
        None => None,
    };
    let mut out = Vec::new();
    let mut seen = vec![recv.identity()];
    flatten_into(&mut out, items(recv), depth, &mut seen)?;
    Ok(new_array(vm, out))
}

fn array_zip(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut others = Vec::with_capacity(args.len());
    for arg in args {
        others.push(expect_array(vm, arg)?);
    }
    let mut out = Vec::new();
    for (i, item) in items(recv).into_iter().enumerate() {
        let mut row = vec![item];
        row.extend(others.iter().map(|other| other.get(i).cloned().unwrap_or(Value::Nil)));
        out.push(new_array(vm, row));
    }
    Ok(new_array(vm, out))
}

fn array_join(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let separator = match args.first() {
        Some(Value::Nil) | None => Vec::new(),
        Some(sep) => super::expect_bytes(vm, sep)?,
    };
    let mut out = Vec::new();
    for (i, item) in items(recv).iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(&separator);
        }
        match item {
            Value::Array(_) => {
                let inner = array_join(vm, item, args, None)?;
                out.extend(to_s_bytes(vm, &inner)?);
            }
            other => out.extend(to_s_bytes(vm, other)?),
        }
    }
    Ok(Value::string(out))
}

fn array_plus(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut all = items(recv);
    all.extend(expect_array(vm, &args[0])?);
    Ok(new_array(vm, all))
}

fn array_minus(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut removed = RHash::new();
    for item in expect_array(vm, &args[0])? {
        removed.insert(item, Value::Bool(true));
    }
    let kept = items(recv)
        .into_iter()
        .filter(|item| !removed.contains_key(item))
        .collect();
    Ok(new_array(vm, kept))
}

fn array_times(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    if let Value::String(_) = &args[0] {
        return array_join(vm, recv, args, None);
    }
    let count = take_count(vm, &args[0])?;
    let items = items(recv);
    let repeated = (0..count).flat_map(|_| items.iter().cloned()).collect();
    Ok(new_array(vm, repeated))
}

fn array_and(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut other = RHash::new();
    for item in expect_array(vm, &args[0])? {
        other.insert(item, Value::Bool(true));
    }
    let mut seen = RHash::new();
    let mut out = Vec::new();
    for item in items(recv) {
        if other.contains_key(&item) && !seen.contains_key(&item) {
            seen.insert(item.clone(), Value::Bool(true));
            out.push(item);
        }
    }
    Ok(new_array(vm, out))
}

fn array_or(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut all = items(recv);
    all.extend(expect_array(vm, &args[0])?);
    let union = new_array(vm, all);
    array_uniq(vm, &union, &[], None)
}

fn array_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(values_equal(vm, recv, &args[0])?))
}

fn array_compare(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    if !matches!(args[0], Value::Array(_)) {
        return Ok(Value::Nil);
    }
    Ok(Value::Integer(compare_values(vm, recv, &args[0])? as i64))
}

fn array_to_a(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn array_to_h(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let mut hash = RHash::new();
    for item in items(recv) {
        let pair = match block {
            Some(block) => vm.call(block, vec![item])?,
            None => item,
        };
        match &pair {
            Value::Array(parts) if parts.borrow().len() == 2 => {
                let (key, value) = pair_parts(&pair);
                hash.insert(key, value);
            }
            other => {
                return Err(NativeError::type_error(format!(
                    "wrong element type {} (expected array)",
                    super::class_name(vm, other)
                )))
            }
        }
    }
    Ok(vm.runtime().new_hash(hash))
}

fn array_inspect(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&inspect_value(vm, recv)?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_block_iteration() {
        assert_eq!(eval("[1, 2, 3].map { |x| x * 2 }"), "[2, 4, 6]");
        assert_eq!(eval("[1, 2, 3, 4].select { |x| x.even? }"), "[2, 4]");
        assert_eq!(eval("[1, 2, 3, 4].reject(&:even?)"), "[1, 3]");
        assert_eq!(eval("t = 0\n[1, 2].each_with_index { |x, i| t += x * i }\nt"), "2");
    }

    #[test]
    fn test_inject_forms() {
        assert_eq!(eval("[1, 2, 3].inject(:+)"), "6");
        assert_eq!(eval("[1, 2, 3].inject(10) { |s, x| s + x }"), "16");
        assert_eq!(eval("[1, 2, 3.5].inject(:+)"), "6.5");
        assert_eq!(eval("[].inject(:+)"), "nil");
        assert_eq!(eval("[1, 2, 3].sum"), "6");
    }

    #[test]
    fn test_sorting() {
        assert_eq!(eval("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(eval("[3, 1, 2].sort { |a, b| b <=> a }"), "[3, 2, 1]");
        assert_eq!(eval("[\"ccc\", \"a\", \"bb\"].sort_by(&:length)"), "[\"a\", \"bb\", \"ccc\"]");
        assert_eq!(eval("[1, \"a\"].sort"), "ArgumentError: comparison of Integer with String failed");
        assert_eq!(eval("[\"a\", 1].sort"), "ArgumentError: comparison of String with 1 failed");
        assert_eq!(eval("[[2, :b], [1, :a], [2, :a]].sort_by(&:first)"), "[[1, :a], [2, :b], [2, :a]]");
        assert_eq!(eval("[4, 9, 2].max"), "9");
        assert_eq!(eval("[\"aa\", \"b\"].min_by(&:length)"), "\"b\"");
    }

    #[test]
    fn test_indexing_and_mutation() {
        assert_eq!(eval("a = [1, 2, 3]\na[-1]"), "3");
        assert_eq!(eval("a = [1, 2, 3]\na[1..2]"), "[2, 3]");
        assert_eq!(eval("a = [1]\na[3] = 4\na"), "[1, nil, nil, 4]");
        assert_eq!(eval("a = [1, 2]\na << 3\na.push(4, 5)\na.pop\na"), "[1, 2, 3, 4]");
        assert_eq!(eval("a = [1, 2, 3]\na.shift\na.unshift(0)\na"), "[0, 2, 3]");
    }

    #[test]
    fn test_break_out_of_each_returns_value() {
        assert_eq!(eval("[1, 2, 3].each { |x| break x * 10 if x == 2 }"), "20");
    }

    #[test]
    fn test_set_operations_and_shapes() {
        assert_eq!(eval("[1, 2, 2, 3].uniq"), "[1, 2, 3]");
        assert_eq!(eval("[1, [2, [3]]].flatten"), "[1, 2, 3]");
        assert_eq!(eval("[1, 2, 3] - [2]"), "[1, 3]");
        assert_eq!(eval("[1, 2] * 3"), "[1, 2, 1, 2, 1, 2]");
        assert_eq!(eval("[1, 2] * \",\""), "\"1,2\"");
        assert_eq!(eval("[1, 2].zip([3, 4])"), "[[1, 3], [2, 4]]");
        assert_eq!(eval("[1, 2, 3].join(\"-\")"), "\"1-2-3\"");
        assert_eq!(eval("[1, 2, 3, 4].each_slice(2).to_a"), "[[1, 2], [3, 4]]");
        assert_eq!(eval("[\"a\", \"b\", \"a\"].tally"), "{\"a\" => 2, \"b\" => 1}");
    }

    #[test]
    fn test_array_new_with_block() {
        assert_eq!(eval("Array.new(3) { |i| i * i }"), "[0, 1, 4]");
        assert_eq!(eval("Array.new(2, :x)"), "[:x, :x]");
    }
}
