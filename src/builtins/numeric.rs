// Integer and Float built-ins, plus the arithmetic fast paths the VM uses
// Provides: + - * / % ** <=> == coerce-free mixed arithmetic, times, upto, downto, step,
// abs, round, floor, ceil, to_i, to_f, to_s, even?, odd?, zero?, divmod

use super::{check_arity, comparison_failed, expect_block, expect_integer};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::{format_float, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

fn overflow() -> NativeError {
    NativeError::Raise(ErrorKind::RangeError, "integer overflow".to_string())
}

fn zero_division() -> NativeError {
    NativeError::Raise(ErrorKind::ZeroDivisionError, "divided by 0".to_string())
}

/// Numeric arithmetic; None when either side is not a number
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> Option<NativeResult> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(integer_arith(op, *x, *y)),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            Some(Ok(Value::Float(float_arith(op, x, y))))
        }
        _ => None,
    }
}

fn integer_arith(op: ArithOp, x: i64, y: i64) -> NativeResult {
    let result = match op {
        ArithOp::Add => x.checked_add(y),
        ArithOp::Sub => x.checked_sub(y),
        ArithOp::Mul => x.checked_mul(y),
        ArithOp::Div => {
            if y == 0 {
                return Err(zero_division());
            }
            floor_div(x, y)
        }
        ArithOp::Mod => {
            if y == 0 {
                return Err(zero_division());
            }
            floor_mod(x, y)
        }
        ArithOp::Pow => {
            if y < 0 {
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp))
        }
    };
    result.map(Value::Integer).ok_or_else(overflow)
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        Some(r + y)
    } else {
        Some(r)
    }
}

fn float_arith(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        ArithOp::Pow => x.powf(y),
    }
}

/// `==` for values that never dispatch; None for containers and objects
pub fn primitive_equal(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x == y),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Some(a.as_f64()? == b.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(*x.borrow() == *y.borrow()),
        (Value::Array(_), _) | (Value::Hash(_), _) | (Value::Object(_), _) => None,
        _ => Some(a.same(b)),
    }
}

/// Ordering of numbers and strings. `Some(None)` for NaN, None for anything else
pub fn compare_primitives(a: &Value, b: &Value) -> Option<Option<Ordering>> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(Some(x.cmp(y))),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Some(a.as_f64()?.partial_cmp(&b.as_f64()?))
        }
        (Value::String(x), Value::String(y)) => Some(Some(x.borrow().as_slice().cmp(y.borrow().as_slice()))),
        _ => None,
    }
}

pub fn install(builtins: &Builtins) {
    let numeric = &builtins.numeric;
    numeric.define_native("+", num_add);
    numeric.define_native("-", num_sub);
    numeric.define_native("*", num_mul);
    numeric.define_native("/", num_div);
    numeric.define_native("%", num_mod);
    numeric.define_native("modulo", num_mod);
    numeric.define_native("**", num_pow);
    numeric.define_native("-@", num_negate);
    numeric.define_native("<=>", num_compare);
    numeric.define_native("==", num_equal);
    numeric.define_native("abs", num_abs);
    numeric.define_native("zero?", num_zero);
    numeric.define_native("positive?", num_positive);
    numeric.define_native("negative?", num_negative);
    numeric.define_native("to_i", num_to_i);
    numeric.define_native("to_int", num_to_i);
    numeric.define_native("to_f", num_to_f);
    numeric.define_native("to_s", num_to_s);
    numeric.define_native("inspect", num_to_s);
    numeric.define_native("divmod", num_divmod);
    numeric.define_native("fdiv", num_fdiv);
    numeric.define_native("integer?", num_is_integer);
    numeric.define_native("hash", num_hash);
    numeric.define_native("eql?", num_eql);

    let integer = &builtins.integer;
    integer.define_native("times", int_times);
    integer.define_native("upto", int_upto);
    integer.define_native("downto", int_downto);
    integer.define_native("step", int_step);
    integer.define_native("even?", int_even);
    integer.define_native("odd?", int_odd);
    integer.define_native("succ", int_succ);
    integer.define_native("next", int_succ);
    integer.define_native("pred", int_pred);
    integer.define_native("chr", int_chr);
    integer.define_native("gcd", int_gcd);
    integer.define_native("round", int_self);
    integer.define_native("floor", int_self);
    integer.define_native("ceil", int_self);

    let float = &builtins.float;
    float.define_native("round", float_round);
    float.define_native("floor", float_floor);
    float.define_native("ceil", float_ceil);
    float.define_native("nan?", float_nan);
    float.define_native("infinite?", float_infinite);
    float.define_native("finite?", float_finite);

    float
        .constants
        .borrow_mut()
        .insert(crate::vm::interner::intern("INFINITY"), Value::Float(f64::INFINITY));
    float
        .constants
        .borrow_mut()
        .insert(crate::vm::interner::intern("NAN"), Value::Float(f64::NAN));
    integer
        .constants
        .borrow_mut()
        .insert(crate::vm::interner::intern("MAX"), Value::Integer(i64::MAX));

    install_comparable(builtins);
}

fn binary(vm: &dyn ValueCaller, op: ArithOp, recv: &Value, args: &[Value]) -> NativeResult {
    check_arity(args, 1, 1)?;
    match arith(op, recv, &args[0]) {
        Some(result) => result,
        None => Err(NativeError::type_error(format!(
            "{} can't be coerced into {}",
            super::class_name(vm, &args[0]),
            super::class_name(vm, recv)
        ))),
    }
}

fn num_add(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Add, recv, args)
}

fn num_sub(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Sub, recv, args)
}

fn num_mul(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Mul, recv, args)
}

fn num_div(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Div, recv, args)
}

fn num_mod(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Mod, recv, args)
}

fn num_pow(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, ArithOp::Pow, recv, args)
}

fn num_negate(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv {
        Value::Integer(n) => n.checked_neg().map(Value::Integer).ok_or_else(overflow),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Ok(Value::Nil),
    }
}

fn num_compare(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(match compare_primitives(recv, &args[0]) {
        Some(Some(ordering)) => Value::Integer(ordering as i64),
        _ => Value::Nil,
    })
}

fn num_equal(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(primitive_equal(recv, &args[0]).unwrap_or(false)))
}

fn num_eql(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.same(&args[0])))
}

fn num_hash(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(match recv {
        Value::Float(f) => Value::Integer(f.to_bits() as i64),
        other => other.clone(),
    })
}

fn num_abs(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv {
        Value::Integer(n) => n.checked_abs().map(Value::Integer).ok_or_else(overflow),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        _ => Ok(Value::Nil),
    }
}

fn num_zero(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_f64() == Some(0.0)))
}

fn num_positive(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_f64().is_some_and(|f| f > 0.0)))
}

fn num_negative(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_f64().is_some_and(|f| f < 0.0)))
}

fn num_to_i(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv {
        Value::Float(f) => float_to_integer(f.trunc()),
        other => Ok(other.clone()),
    }
}

fn num_to_f(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.as_f64().map(Value::Float).unwrap_or(Value::Nil))
}

fn num_to_s(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(match recv {
        Value::Float(f) => Value::str(&format_float(*f)),
        other => Value::str(&other.to_s()),
    })
}

fn num_divmod(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let quotient = match binary(vm, ArithOp::Div, recv, args)? {
        Value::Float(f) => Value::Float(f.floor()),
        other => other,
    };
    let remainder = binary(vm, ArithOp::Mod, recv, args)?;
    Ok(vm.runtime().new_array(vec![quotient, remainder]))
}

fn num_fdiv(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let x = super::expect_float(vm, recv)?;
    let y = super::expect_float(vm, &args[0])?;
    Ok(Value::Float(x / y))
}

fn num_is_integer(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(matches!(recv, Value::Integer(_))))
}

// ==================== Integer ====================

fn int_times(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    let count = expect_integer(vm, recv)?;
    for i in 0..count {
        vm.call(block, vec![Value::Integer(i)])?;
    }
    Ok(recv.clone())
}

fn int_upto(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let block = expect_block(block)?;
    let (from, to) = (expect_integer(vm, recv)?, expect_integer(vm, &args[0])?);
    for i in from..=to {
        vm.call(block, vec![Value::Integer(i)])?;
    }
    Ok(recv.clone())
}

fn int_downto(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let block = expect_block(block)?;
    let (from, to) = (expect_integer(vm, recv)?, expect_integer(vm, &args[0])?);
    for i in (to..=from).rev() {
        vm.call(block, vec![Value::Integer(i)])?;
    }
    Ok(recv.clone())
}

/// `from.step(limit, step = 1) { |i| }`, counting down for a negative step
fn int_step(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let block = expect_block(block)?;
    let from = expect_integer(vm, recv)?;
    let limit = expect_integer(vm, &args[0])?;
    let step = match args.get(1) {
        Some(step) => expect_integer(vm, step)?,
        None => 1,
    };
    if step == 0 {
        return Err(NativeError::argument("step can't be 0"));
    }
    let mut i = from;
    while (step > 0 && i <= limit) || (step < 0 && i >= limit) {
        vm.call(block, vec![Value::Integer(i)])?;
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(recv.clone())
}

fn int_even(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_integer().is_some_and(|n| n % 2 == 0)))
}

fn int_odd(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_integer().is_some_and(|n| n % 2 != 0)))
}

fn int_succ(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    integer_arith(ArithOp::Add, recv.as_integer().unwrap_or(0), 1)
}

fn int_pred(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    integer_arith(ArithOp::Sub, recv.as_integer().unwrap_or(0), 1)
}

fn int_chr(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    match recv.as_integer().and_then(|n| u8::try_from(n).ok()) {
        Some(byte) => Ok(Value::string(vec![byte])),
        None => Err(NativeError::Raise(
            ErrorKind::RangeError,
            format!("{} out of char range", recv.inspect()),
        )),
    }
}

fn int_gcd(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let (mut a, mut b) = (
        expect_integer(vm, recv)?.unsigned_abs(),
        expect_integer(vm, &args[0])?.unsigned_abs(),
    );
    while b != 0 {
        (a, b) = (b, a % b);
    }
    i64::try_from(a).map(Value::Integer).map_err(|_| overflow())
}

fn int_self(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

// ==================== Float ====================

fn float_to_integer(f: f64) -> NativeResult {
    if f.is_nan() || f.is_infinite() || f.abs() >= 9.2e18 {
        return Err(NativeError::Raise(
            ErrorKind::RangeError,
            format!("{} out of range of integer", format_float(f)),
        ));
    }
    Ok(Value::Integer(f as i64))
}

fn float_round(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let f = super::expect_float(vm, recv)?;
    match args.first() {
        Some(digits) => {
            let digits = expect_integer(vm, digits)?.clamp(-20, 20) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((f * scale).round() / scale))
        }
        None => float_to_integer(f.round()),
    }
}

fn float_floor(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    float_to_integer(super::expect_float(vm, recv)?.floor())
}

fn float_ceil(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    float_to_integer(super::expect_float(vm, recv)?.ceil())
}

fn float_nan(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_f64().is_some_and(f64::is_nan)))
}

fn float_infinite(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(match recv.as_f64() {
        Some(f) if f == f64::INFINITY => Value::Integer(1),
        Some(f) if f == f64::NEG_INFINITY => Value::Integer(-1),
        _ => Value::Nil,
    })
}

fn float_finite(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(recv.as_f64().is_some_and(f64::is_finite)))
}

/// Comparable: the relational operators in terms of `<=>`
fn install_comparable(builtins: &Builtins) {
    let comparable = &builtins.comparable;
    comparable.define_native("<", cmp_less);
    comparable.define_native("<=", cmp_less_equal);
    comparable.define_native(">", cmp_greater);
    comparable.define_native(">=", cmp_greater_equal);
    comparable.define_native("between?", cmp_between);
    comparable.define_native("clamp", cmp_clamp);
}

fn spaceship(vm: &mut dyn ValueCaller, a: &Value, b: &Value) -> Result<Ordering, NativeError> {
    if let Some(ordering) = compare_primitives(a, b) {
        return ordering.ok_or_else(|| comparison_failed(vm, a, b));
    }
    match vm.call_method(a, "<=>", vec![b.clone()], None)? {
        Value::Integer(n) => Ok(n.cmp(&0)),
        _ => Err(comparison_failed(vm, a, b)),
    }
}

fn relational(
    vm: &mut dyn ValueCaller,
    recv: &Value,
    args: &[Value],
    test: fn(Ordering) -> bool,
) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(test(spaceship(vm, recv, &args[0])?)))
}

fn cmp_less(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    relational(vm, recv, args, |o| o == Ordering::Less)
}

fn cmp_less_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    relational(vm, recv, args, |o| o != Ordering::Greater)
}

fn cmp_greater(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    relational(vm, recv, args, |o| o == Ordering::Greater)
}

fn cmp_greater_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    relational(vm, recv, args, |o| o != Ordering::Less)
}

fn cmp_between(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    let above = spaceship(vm, recv, &args[0])? != Ordering::Less;
    let below = spaceship(vm, recv, &args[1])? != Ordering::Greater;
    Ok(Value::Bool(above && below))
}

fn cmp_clamp(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    if spaceship(vm, recv, &args[0])? == Ordering::Less {
        return Ok(args[0].clone());
    }
    if spaceship(vm, recv, &args[1])? == Ordering::Greater {
        return Ok(args[1].clone());
    }
    Ok(recv.clone())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;
    use super::*;

    #[test]
    fn test_floor_division_and_modulo() {
        assert_eq!(integer_arith(ArithOp::Div, 7, 2).unwrap().as_integer(), Some(3));
        assert_eq!(integer_arith(ArithOp::Div, -7, 2).unwrap().as_integer(), Some(-4));
        assert_eq!(integer_arith(ArithOp::Mod, -7, 3).unwrap().as_integer(), Some(2));
        assert_eq!(integer_arith(ArithOp::Mod, 7, -3).unwrap().as_integer(), Some(-2));
    }

    #[test]
    fn test_overflow_and_zero_division() {
        assert!(matches!(
            integer_arith(ArithOp::Add, i64::MAX, 1),
            Err(NativeError::Raise(ErrorKind::RangeError, _))
        ));
        assert!(matches!(
            integer_arith(ArithOp::Div, 1, 0),
            Err(NativeError::Raise(ErrorKind::ZeroDivisionError, _))
        ));
        assert!(matches!(
            integer_arith(ArithOp::Div, i64::MIN, -1),
            Err(NativeError::Raise(ErrorKind::RangeError, _))
        ));
    }

    #[test]
    fn test_mixed_arithmetic_is_float() {
        let Some(Ok(Value::Float(f))) = arith(ArithOp::Add, &Value::Integer(1), &Value::Float(0.5)) else {
            panic!("expected a float");
        };
        assert_eq!(f, 1.5);
        assert!(arith(ArithOp::Add, &Value::Integer(1), &Value::Nil).is_none());
    }

    #[test]
    fn test_integer_and_float_are_distinct_but_equal() {
        assert_eq!(primitive_equal(&Value::Integer(1), &Value::Float(1.0)), Some(true));
        assert_eq!(eval("1.eql?(1.0)"), "false");
        assert_eq!(eval("3.7.floor"), "3");
        assert_eq!(eval("2.5.round"), "3");
        assert_eq!(eval("3.14159.round(2)"), "3.14");
        assert_eq!(eval("7.divmod(2)"), "[3, 1]");
    }

    #[test]
    fn test_iteration_helpers() {
        assert_eq!(eval("a = []\n3.times { |i| a << i }\na"), "[0, 1, 2]");
        assert_eq!(eval("a = []\n3.downto(1) { |i| a << i }\na"), "[3, 2, 1]");
        assert_eq!(eval("a = []\n1.step(10, 4) { |i| a << i }\na"), "[1, 5, 9]");
        assert_eq!(eval("a = []\n10.step(1, -3) { |i| a << i }\na"), "[10, 7, 4, 1]");
        assert_eq!(eval("10.step(1, 0) { |i| i }"), "ArgumentError: step can't be 0");
        assert_eq!(eval("5.between?(1, 10)"), "true");
        assert_eq!(eval("15.clamp(1, 10)"), "10");
    }

    #[test]
    fn test_comparison_with_incompatible_type() {
        assert_eq!(
            eval("1 < \"a\""),
            "ArgumentError: comparison of Integer with String failed"
        );
    }
}
