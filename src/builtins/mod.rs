// Built-in classes and modules
// Each submodule installs the native methods of one part of the core library

pub mod array;
pub mod exception;
pub mod hash;
pub mod kernel;
pub mod math;
pub mod module;
pub mod numeric;
pub mod proc;
pub mod range;
pub mod string;

use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::{Method, Value};
use std::cmp::Ordering;

/// Populate the builtin class table with its native methods
pub fn install(builtins: &Builtins) {
    kernel::install(builtins);
    module::install(builtins);
    numeric::install(builtins);
    string::install(builtins);
    array::install(builtins);
    hash::install(builtins);
    range::install(builtins);
    proc::install(builtins);
    exception::install(builtins);
    math::install(builtins);
}

// ==================== Argument helpers ====================

/// Reject calls outside `min..=max` arguments (`usize::MAX` for no upper bound)
pub fn check_arity(args: &[Value], min: usize, max: usize) -> Result<(), NativeError> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = if max == usize::MAX {
        format!("{}+", min)
    } else if min == max {
        min.to_string()
    } else {
        format!("{}..{}", min, max)
    };
    Err(NativeError::argument(format!(
        "wrong number of arguments (given {}, expected {})",
        args.len(),
        expected
    )))
}

pub fn class_name(vm: &dyn ValueCaller, value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        other => vm.runtime().class_of(other).name.clone(),
    }
}

pub fn expect_integer(vm: &dyn ValueCaller, value: &Value) -> Result<i64, NativeError> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Float(f) if f.is_finite() => Ok(*f as i64),
        other => Err(NativeError::type_error(format!(
            "no implicit conversion of {} into Integer",
            class_name(vm, other)
        ))),
    }
}

pub fn expect_float(vm: &dyn ValueCaller, value: &Value) -> Result<f64, NativeError> {
    value.as_f64().ok_or_else(|| {
        NativeError::type_error(format!(
            "can't convert {} into Float",
            class_name(vm, value)
        ))
    })
}

pub fn expect_bytes(vm: &dyn ValueCaller, value: &Value) -> Result<Vec<u8>, NativeError> {
    match value {
        Value::String(bytes) => Ok(bytes.borrow().clone()),
        other => Err(NativeError::type_error(format!(
            "no implicit conversion of {} into String",
            class_name(vm, other)
        ))),
    }
}

pub fn expect_block<'a>(block: Option<&'a Value>) -> Result<&'a Value, NativeError> {
    block.ok_or_else(|| {
        NativeError::Raise(ErrorKind::LocalJumpError, "no block given (yield)".to_string())
    })
}

/// Method name from a symbol or string argument
pub fn expect_name(vm: &dyn ValueCaller, value: &Value) -> Result<String, NativeError> {
    match value {
        Value::Symbol(name) => Ok(name.to_string()),
        Value::String(bytes) => Ok(String::from_utf8_lossy(&bytes.borrow()).into_owned()),
        other => Err(NativeError::type_error(format!(
            "{} is not a symbol nor a string",
            other.inspect()
        ))),
    }
}

// ==================== Dispatching helpers ====================

/// `a == b`, calling user definitions for objects
pub fn values_equal(vm: &mut dyn ValueCaller, a: &Value, b: &Value) -> Result<bool, NativeError> {
    if let Some(equal) = numeric::primitive_equal(a, b) {
        return Ok(equal);
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            if x.as_ptr() == y.as_ptr() {
                return Ok(true);
            }
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (left, right) in x.iter().zip(y.iter()) {
                if !values_equal(vm, left, right)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Hash(x), Value::Hash(y)) => {
            if x.as_ptr() == y.as_ptr() {
                return Ok(true);
            }
            let (left, right) = (x.borrow().entries(), y.borrow().clone());
            if left.len() != right.len() {
                return Ok(false);
            }
            for (key, value) in &left {
                match right.get(key) {
                    Some(other) => {
                        if !values_equal(vm, value, other)? {
                            return Ok(false);
                        }
                    }
                    None => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Object(_), _) => {
            let result = vm.call_method(a, "==", vec![b.clone()], None)?;
            Ok(result.is_truthy())
        }
        _ => Ok(a.same(b)),
    }
}

/// `a <=> b` for sorting; nil results raise ArgumentError
pub fn compare_values(vm: &mut dyn ValueCaller, a: &Value, b: &Value) -> Result<Ordering, NativeError> {
    match numeric::compare_primitives(a, b) {
        Some(Some(ordering)) => return Ok(ordering),
        Some(None) => return Err(comparison_failed(vm, a, b)),
        None => {}
    }
    if let (Value::Array(x), Value::Array(y)) = (a, b) {
        let (x, y) = (x.borrow().clone(), y.borrow().clone());
        for (left, right) in x.iter().zip(y.iter()) {
            let ordering = compare_values(vm, left, right)?;
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        return Ok(x.len().cmp(&y.len()));
    }
    let result = vm.call_method(a, "<=>", vec![b.clone()], None)?;
    match result {
        Value::Integer(n) => Ok(n.cmp(&0)),
        _ => Err(comparison_failed(vm, a, b)),
    }
}

pub fn comparison_failed(vm: &dyn ValueCaller, a: &Value, b: &Value) -> NativeError {
    let right = match b {
        Value::Integer(_) | Value::Float(_) | Value::Nil => b.inspect(),
        other => class_name(vm, other),
    };
    NativeError::argument(format!(
        "comparison of {} with {} failed",
        class_name(vm, a),
        right
    ))
}

/// Bytes of `to_s`, dispatching for objects and classes
pub fn to_s_bytes(vm: &mut dyn ValueCaller, value: &Value) -> Result<Vec<u8>, NativeError> {
    match value {
        Value::String(bytes) => Ok(bytes.borrow().clone()),
        Value::Object(_) => {
            let text = vm.call_method(value, "to_s", Vec::new(), None)?;
            match text {
                Value::String(bytes) => Ok(bytes.borrow().clone()),
                other => Ok(other.to_s().into_bytes()),
            }
        }
        Value::Array(_) | Value::Hash(_) => Ok(inspect_value(vm, value)?.into_bytes()),
        other => Ok(other.to_s().into_bytes()),
    }
}

/// `inspect`, honouring user-defined `inspect` methods inside containers
pub fn inspect_value(vm: &mut dyn ValueCaller, value: &Value) -> Result<String, NativeError> {
    let mut seen = Vec::new();
    inspect_nested(vm, value, &mut seen)
}

fn inspect_nested(
    vm: &mut dyn ValueCaller,
    value: &Value,
    seen: &mut Vec<usize>,
) -> Result<String, NativeError> {
    match value {
        Value::Array(items) => {
            let id = value.identity();
            if seen.contains(&id) {
                return Ok("[...]".to_string());
            }
            seen.push(id);
            let items = items.borrow().clone();
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(inspect_nested(vm, item, seen)?);
            }
            seen.pop();
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Hash(hash) => {
            let id = value.identity();
            if seen.contains(&id) {
                return Ok("{...}".to_string());
            }
            seen.push(id);
            let entries = hash.borrow().entries();
            let mut parts = Vec::with_capacity(entries.len());
            for (key, item) in &entries {
                let item = inspect_nested(vm, item, seen)?;
                match key {
                    Value::Symbol(name) => parts.push(format!("{}: {}", name, item)),
                    other => parts.push(format!("{} => {}", inspect_nested(vm, other, seen)?, item)),
                }
            }
            seen.pop();
            if parts.is_empty() {
                Ok("{}".to_string())
            } else {
                Ok(format!("{{{}}}", parts.join(", ")))
            }
        }
        Value::Object(_) | Value::Class(_) => {
            let custom = vm
                .runtime()
                .find_method(value, "inspect")
                .is_some_and(|entry| matches!(entry.method, Method::User { .. }));
            if custom {
                let text = vm.call_method(value, "inspect", Vec::new(), None)?;
                return Ok(text.to_s());
            }
            Ok(value.inspect())
        }
        other => Ok(other.inspect()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::compiler::compile_source;
    use crate::vm::caller::NativeResult;
    use crate::vm::runtime::Runtime;
    use crate::vm::vm::VM;

    /// Run a snippet and render the result (or the raised exception) as text
    pub fn eval(source: &str) -> String {
        let runtime = Runtime::new();
        let function = compile_source(source, "test.rb").expect("snippet compiles");
        let result: NativeResult = VM::new(runtime.clone()).run_function(function);
        let text = match result {
            Ok(value) => value.inspect(),
            Err(error) => {
                let exception = runtime.materialize(error);
                format!(
                    "{}: {}",
                    runtime.class_of(&exception).name,
                    runtime.exception_message(&exception)
                )
            }
        };
        runtime.teardown();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arity_messages() {
        let args = [Value::Integer(1), Value::Integer(2)];
        assert!(check_arity(&args, 2, 2).is_ok());
        let Err(NativeError::Raise(kind, message)) = check_arity(&args, 0, 1) else {
            panic!("expected an arity error");
        };
        assert_eq!(kind, ErrorKind::ArgumentError);
        assert_eq!(message, "wrong number of arguments (given 2, expected 0..1)");
        let Err(NativeError::Raise(_, message)) = check_arity(&args, 3, usize::MAX) else {
            panic!("expected an arity error");
        };
        assert_eq!(message, "wrong number of arguments (given 2, expected 3+)");
    }

    #[test]
    fn test_inspect_uses_user_definitions() {
        let source = "class Pt\n  def inspect\n    \"<pt>\"\n  end\nend\n[Pt.new, 1].inspect";
        assert_eq!(test_support::eval(source), "\"[<pt>, 1]\"");
    }
}
