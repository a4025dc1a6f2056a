// Math and GC modules
// Math functions take Integer or Float and always answer a Float

use super::{check_arity, expect_float};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::interner::intern;
use crate::vm::runtime::Builtins;
use crate::vm::value::{Class, RHash, Value};
use std::rc::Rc;

pub fn install(builtins: &Builtins) {
    let math = &builtins.math;
    math.constants
        .borrow_mut()
        .insert(intern("PI"), Value::Float(std::f64::consts::PI));
    math.constants
        .borrow_mut()
        .insert(intern("E"), Value::Float(std::f64::consts::E));
    let domain_error = Class::new("Math::DomainError", Some(builtins.argument_error.clone()), false);
    math.constants
        .borrow_mut()
        .insert(intern("DomainError"), Value::Class(Rc::new(domain_error)));

    math.define_singleton_native("sqrt", math_sqrt);
    math.define_singleton_native("cbrt", math_cbrt);
    math.define_singleton_native("sin", math_sin);
    math.define_singleton_native("cos", math_cos);
    math.define_singleton_native("tan", math_tan);
    math.define_singleton_native("atan", math_atan);
    math.define_singleton_native("atan2", math_atan2);
    math.define_singleton_native("exp", math_exp);
    math.define_singleton_native("log", math_log);
    math.define_singleton_native("log2", math_log2);
    math.define_singleton_native("log10", math_log10);
    math.define_singleton_native("hypot", math_hypot);
    math.define_singleton_native("pow", math_pow);

    let gc = &builtins.gc;
    gc.define_singleton_native("start", gc_start);
    gc.define_singleton_native("count", gc_count);
    gc.define_singleton_native("stat", gc_stat);
}

fn domain_error(name: &str) -> NativeError {
    NativeError::Raise(
        ErrorKind::Custom("Math::DomainError".to_string()),
        format!("Numerical argument is out of domain - \"{}\"", name),
    )
}

fn unary(vm: &dyn ValueCaller, args: &[Value], f: fn(f64) -> f64) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Float(f(expect_float(vm, &args[0])?)))
}

fn binary(vm: &dyn ValueCaller, args: &[Value], f: fn(f64, f64) -> f64) -> NativeResult {
    check_arity(args, 2, 2)?;
    let (x, y) = (expect_float(vm, &args[0])?, expect_float(vm, &args[1])?);
    Ok(Value::Float(f(x, y)))
}

fn math_sqrt(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let x = expect_float(vm, &args[0])?;
    if x < 0.0 {
        return Err(domain_error("sqrt"));
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_cbrt(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::cbrt)
}

fn math_sin(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::sin)
}

fn math_cos(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::cos)
}

fn math_tan(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::tan)
}

fn math_atan(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::atan)
}

fn math_atan2(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, args, f64::atan2)
}

fn math_exp(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::exp)
}

fn math_log(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let x = expect_float(vm, &args[0])?;
    if x < 0.0 {
        return Err(domain_error("log"));
    }
    match args.get(1) {
        Some(base) => Ok(Value::Float(x.ln() / expect_float(vm, base)?.ln())),
        None => Ok(Value::Float(x.ln())),
    }
}

fn math_log2(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::log2)
}

fn math_log10(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    unary(vm, args, f64::log10)
}

fn math_hypot(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, args, f64::hypot)
}

fn math_pow(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    binary(vm, args, f64::powf)
}

// ==================== GC ====================

/// Collection is deferred to the interpreter's next safe point
fn gc_start(vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    vm.runtime().gc_requested.set(true);
    Ok(Value::Nil)
}

fn gc_count(vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(vm.runtime().gc_stats().collections as i64))
}

fn gc_stat(vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let runtime = vm.runtime().clone();
    let stats = runtime.gc_stats();
    let mut hash = RHash::new();
    hash.insert(Value::symbol("count"), Value::Integer(stats.collections as i64));
    hash.insert(Value::symbol("tracked"), Value::Integer(stats.tracked_count as i64));
    hash.insert(Value::symbol("cycles_broken"), Value::Integer(stats.cycles_broken as i64));
    hash.insert(Value::symbol("host_roots"), Value::Integer(runtime.root_count() as i64));
    Ok(runtime.new_hash(hash))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_math_functions() {
        assert_eq!(eval("Math.sqrt(16)"), "4.0");
        assert_eq!(eval("Math.hypot(3, 4)"), "5.0");
        assert_eq!(eval("Math::PI > 3.14"), "true");
        assert_eq!(eval("Math.log(8, 2)"), "3.0");
    }

    #[test]
    fn test_math_rejects_non_numbers() {
        assert_eq!(
            eval("Math.sqrt(-1)"),
            "Math::DomainError: Numerical argument is out of domain - \"sqrt\""
        );
        assert_eq!(eval("Math.sqrt(\"4\")"), "TypeError: can't convert String into Float");
    }

    #[test]
    fn test_gc_stat_reports_counts() {
        assert_eq!(eval("GC.stat[:count].is_a?(Integer)"), "true");
        assert_eq!(eval("GC.start"), "nil");
    }
}
