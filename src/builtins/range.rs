// Range built-ins (integer ranges only)
// Iteration walks the bounds directly; `to_a` is the only method that materializes

use super::array::{extreme_by, fold, sort_by_values, sum_values};
use super::{check_arity, expect_block, expect_integer};
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::Value;
use std::cmp::Ordering;

pub fn install(builtins: &Builtins) {
    let range = &builtins.range;
    range.define_singleton_native("new", range_new);
    range.define_native("each", range_each);
    range.define_native("reverse_each", range_reverse_each);
    range.define_native("each_with_index", range_each_with_index);
    range.define_native("step", range_step);
    range.define_native("each_slice", range_each_slice);
    range.define_native("to_a", range_to_a);
    range.define_native("entries", range_to_a);
    range.define_native("map", range_map);
    range.define_native("collect", range_map);
    range.define_native("flat_map", range_flat_map);
    range.define_native("select", range_select);
    range.define_native("filter", range_select);
    range.define_native("reject", range_reject);
    range.define_native("find", range_find);
    range.define_native("detect", range_find);
    range.define_native("inject", range_inject);
    range.define_native("reduce", range_inject);
    range.define_native("sum", range_sum);
    range.define_native("sort_by", range_sort_by);
    range.define_native("min_by", range_min_by);
    range.define_native("max_by", range_max_by);
    range.define_native("any?", range_any);
    range.define_native("all?", range_all);
    range.define_native("count", range_count);
    range.define_native("include?", range_include);
    range.define_native("member?", range_include);
    range.define_native("cover?", range_include);
    range.define_native("===", range_include);
    range.define_native("first", range_first);
    range.define_native("begin", range_begin);
    range.define_native("last", range_last);
    range.define_native("end", range_end);
    range.define_native("min", range_min);
    range.define_native("max", range_max);
    range.define_native("size", range_size);
    range.define_native("exclude_end?", range_exclude_end);
    range.define_native("==", range_equal);
    range.define_native("eql?", range_equal);
    range.define_native("to_s", range_to_s);
    range.define_native("inspect", range_inspect);
}

/// Bounds as `(first, last)` inclusive; None when empty
fn bounds(recv: &Value) -> Option<(i64, i64)> {
    let Value::Range(start, end, exclusive) = recv else {
        return None;
    };
    let last = if *exclusive { end.checked_sub(1)? } else { *end };
    (*start <= last).then_some((*start, last))
}

fn len(recv: &Value) -> i64 {
    bounds(recv).map_or(0, |(first, last)| last - first + 1)
}

/// Iterate the integers, stopping at the first failure
fn for_each(
    recv: &Value,
    mut f: impl FnMut(Value) -> Result<(), NativeError>,
) -> Result<(), NativeError> {
    if let Some((first, last)) = bounds(recv) {
        for i in first..=last {
            f(Value::Integer(i))?;
        }
    }
    Ok(())
}

fn elements(recv: &Value) -> Vec<Value> {
    bounds(recv)
        .map(|(first, last)| (first..=last).map(Value::Integer).collect())
        .unwrap_or_default()
}

fn range_new(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 3)?;
    let start = expect_integer(vm, &args[0])?;
    let end = expect_integer(vm, &args[1])?;
    let exclusive = args.get(2).is_some_and(Value::is_truthy);
    Ok(Value::Range(start, end, exclusive))
}

fn range_each(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for_each(recv, |i| vm.call(block, vec![i]).map(drop))?;
    Ok(recv.clone())
}

fn range_reverse_each(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    if let Some((first, last)) = bounds(recv) {
        for i in (first..=last).rev() {
            vm.call(block, vec![Value::Integer(i)])?;
        }
    }
    Ok(recv.clone())
}

fn range_each_with_index(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut index = 0;
    for_each(recv, |i| {
        vm.call(block, vec![i, Value::Integer(index)])?;
        index += 1;
        Ok(())
    })?;
    Ok(recv.clone())
}

fn range_step(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let step = expect_integer(vm, &args[0])?;
    if step <= 0 {
        return Err(NativeError::argument("step can't be negative or zero"));
    }
    let mut values = Vec::new();
    if let Some((first, last)) = bounds(recv) {
        let mut i = first;
        while i <= last {
            values.push(Value::Integer(i));
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    match block {
        Some(block) => {
            for value in values {
                vm.call(block, vec![value])?;
            }
            Ok(recv.clone())
        }
        None => Ok(vm.runtime().new_array(values)),
    }
}

fn range_each_slice(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let array = vm.runtime().new_array(elements(recv));
    vm.call_method(&array, "each_slice", args.to_vec(), block.cloned())
}

fn range_to_a(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(vm.runtime().new_array(elements(recv)))
}

fn range_map(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let mut out = Vec::with_capacity(len(recv) as usize);
    for_each(recv, |i| {
        out.push(vm.call(block, vec![i])?);
        Ok(())
    })?;
    Ok(vm.runtime().new_array(out))
}

fn range_flat_map(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let array = vm.runtime().new_array(elements(recv));
    vm.call_method(&array, "flat_map", args.to_vec(), block.cloned())
}

fn filter(vm: &mut dyn ValueCaller, recv: &Value, block: &Value, keep: bool) -> NativeResult {
    let mut out = Vec::new();
    for_each(recv, |i| {
        if vm.call(block, vec![i.clone()])?.is_truthy() == keep {
            out.push(i);
        }
        Ok(())
    })?;
    Ok(vm.runtime().new_array(out))
}

fn range_select(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    filter(vm, recv, expect_block(block)?, true)
}

fn range_reject(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    filter(vm, recv, expect_block(block)?, false)
}

fn range_find(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    if let Some((first, last)) = bounds(recv) {
        for i in first..=last {
            if vm.call(block, vec![Value::Integer(i)])?.is_truthy() {
                return Ok(Value::Integer(i));
            }
        }
    }
    Ok(Value::Nil)
}

fn range_inject(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    fold(vm, elements(recv), args, block)
}

fn range_sum(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    if args.is_empty() && block.is_none() {
        let Some((first, last)) = bounds(recv) else {
            return Ok(Value::Integer(0));
        };
        let total = (first as i128 + last as i128) * (last as i128 - first as i128 + 1) / 2;
        return i64::try_from(total)
            .map(Value::Integer)
            .map_err(|_| NativeError::Raise(crate::error::ErrorKind::RangeError, "integer overflow".to_string()));
    }
    sum_values(vm, elements(recv), args, block)
}

fn range_sort_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let sorted = sort_by_values(vm, elements(recv), expect_block(block)?)?;
    Ok(vm.runtime().new_array(sorted))
}

fn range_min_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme_by(vm, elements(recv), expect_block(block)?, Ordering::Less)
}

fn range_max_by(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    extreme_by(vm, elements(recv), expect_block(block)?, Ordering::Greater)
}

fn range_any(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let Some(block) = block else {
        return Ok(Value::Bool(len(recv) > 0));
    };
    Ok(Value::Bool(!range_find(vm, recv, &[], Some(block))?.is_nil()))
}

fn range_all(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    if let Some((first, last)) = bounds(recv) {
        for i in first..=last {
            if !vm.call(block, vec![Value::Integer(i)])?.is_truthy() {
                return Ok(Value::Bool(false));
            }
        }
    }
    Ok(Value::Bool(true))
}

fn range_count(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let Some(block) = block else {
        return Ok(Value::Integer(len(recv)));
    };
    let mut count = 0;
    for_each(recv, |i| {
        if vm.call(block, vec![i])?.is_truthy() {
            count += 1;
        }
        Ok(())
    })?;
    Ok(Value::Integer(count))
}

fn range_include(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let Value::Range(start, end, exclusive) = recv else {
        return Ok(Value::Bool(false));
    };
    let Some(x) = args[0].as_f64() else {
        return Ok(Value::Bool(false));
    };
    let (start, end) = (*start as f64, *end as f64);
    let below_end = if *exclusive { x < end } else { x <= end };
    Ok(Value::Bool(start <= x && below_end))
}

fn range_first(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let Some(count) = args.first() else {
        return range_begin(vm, recv, args, None);
    };
    let count = expect_integer(vm, count)?;
    if count < 0 {
        return Err(NativeError::argument("negative array size (or size too big)"));
    }
    let taken = elements(recv).into_iter().take(count as usize).collect();
    Ok(vm.runtime().new_array(taken))
}

fn range_begin(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv {
        Value::Range(start, _, _) => Ok(Value::Integer(*start)),
        _ => Ok(Value::Nil),
    }
}

fn range_last(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let Some(count) = args.first() else {
        return range_end(vm, recv, args, None);
    };
    let count = expect_integer(vm, count)?.max(0) as usize;
    let all = elements(recv);
    let skip = all.len().saturating_sub(count);
    Ok(vm.runtime().new_array(all[skip..].to_vec()))
}

fn range_end(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv {
        Value::Range(_, end, _) => Ok(Value::Integer(*end)),
        _ => Ok(Value::Nil),
    }
}

fn range_min(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    if block.is_some() || !args.is_empty() {
        let array = vm.runtime().new_array(elements(recv));
        return vm.call_method(&array, "min", args.to_vec(), block.cloned());
    }
    Ok(bounds(recv).map_or(Value::Nil, |(first, _)| Value::Integer(first)))
}

fn range_max(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    if block.is_some() || !args.is_empty() {
        let array = vm.runtime().new_array(elements(recv));
        return vm.call_method(&array, "max", args.to_vec(), block.cloned());
    }
    Ok(bounds(recv).map_or(Value::Nil, |(_, last)| Value::Integer(last)))
}

fn range_size(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(len(recv)))
}

fn range_exclude_end(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(matches!(recv, Value::Range(_, _, true))))
}

fn range_equal(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.same(&args[0])))
}

fn range_to_s(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&recv.inspect()))
}

fn range_inspect(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&recv.inspect()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_inclusive_and_exclusive_bounds() {
        assert_eq!(eval("(1..4).to_a"), "[1, 2, 3, 4]");
        assert_eq!(eval("(1...4).to_a"), "[1, 2, 3]");
        assert_eq!(eval("(5..1).to_a"), "[]");
        assert_eq!(eval("(1...4).size"), "3");
    }

    #[test]
    fn test_enumeration() {
        assert_eq!(eval("(1..5).select(&:odd?)"), "[1, 3, 5]");
        assert_eq!(eval("(1..4).inject(:*)"), "24");
        assert_eq!(eval("(1..100).sum"), "5050");
        assert_eq!(eval("(0..10).step(5)"), "[0, 5, 10]");
        assert_eq!(eval("t = 0\n(1..3).each { |i| t += i }\nt"), "6");
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval("(1..10).include?(10)"), "true");
        assert_eq!(eval("(1...10).include?(10)"), "false");
        assert_eq!(eval("(1..10) === 2.5"), "true");
    }
}
