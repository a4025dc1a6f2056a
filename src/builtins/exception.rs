// Exception built-ins
// The message lives in @message and the backtrace in a hidden ivar set when first raised

use super::{check_arity, to_s_bytes};
use crate::vm::caller::{NativeResult, ValueCaller};
use crate::vm::interner::intern;
use crate::vm::runtime::{Builtins, MESSAGE_IVAR};
use crate::vm::value::Value;

pub fn install(builtins: &Builtins) {
    let exception = &builtins.exception;
    exception.define_singleton_native("exception", exception_class_exception);
    exception.define_native("initialize", exception_initialize);
    exception.define_native("message", exception_message);
    exception.define_native("to_s", exception_message);
    exception.define_native("full_message", exception_full_message);
    exception.define_native("backtrace", exception_backtrace);
    exception.define_native("inspect", exception_inspect);
    exception.define_native("exception", exception_exception);
    exception.define_native("==", exception_equal);
}

fn exception_class_exception(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    vm.call_method(recv, "new", args.to_vec(), None)
}

fn exception_initialize(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    if let Value::Object(object) = recv {
        let message = args.first().cloned().unwrap_or(Value::Nil);
        object.borrow_mut().ivars.insert(intern(MESSAGE_IVAR), message);
    }
    Ok(Value::Nil)
}

fn exception_message(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let message = match recv {
        Value::Object(object) => object.borrow().ivars.get(MESSAGE_IVAR).cloned(),
        _ => None,
    };
    match message {
        Some(Value::Nil) | None => Ok(Value::str(&vm.runtime().class_of(recv).name)),
        Some(message) => Ok(Value::string(to_s_bytes(vm, &message)?)),
    }
}

/// `file:line:in 'name': message (Class)` followed by the remaining frames
fn exception_full_message(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let message = vm.call_method(recv, "message", Vec::new(), None)?.to_s();
    let runtime = vm.runtime().clone();
    let class = runtime.class_of(recv).name.clone();
    let backtrace = runtime.exception_backtrace(recv);
    let mut text = match backtrace.first() {
        Some(origin) => format!("{}: {} ({})", origin, message, class),
        None => format!("{} ({})", message, class),
    };
    for line in backtrace.iter().skip(1) {
        text.push_str("\n\tfrom ");
        text.push_str(line);
    }
    Ok(Value::str(&text))
}

fn exception_backtrace(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let runtime = vm.runtime().clone();
    let lines = runtime.exception_backtrace(recv);
    if lines.is_empty() {
        return Ok(Value::Nil);
    }
    Ok(runtime.new_array(lines.iter().map(|line| Value::str(line)).collect()))
}

fn exception_inspect(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let class = vm.runtime().class_of(recv).name.clone();
    let message = vm.call_method(recv, "message", Vec::new(), None)?.to_s();
    if message.is_empty() || message == class {
        return Ok(Value::str(&class));
    }
    Ok(Value::str(&format!("#<{}: {}>", class, message)))
}

fn exception_exception(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let Some(message) = args.first() else {
        return Ok(recv.clone());
    };
    let class = Value::Class(vm.runtime().class_of(recv));
    vm.call_method(&class, "new", vec![message.clone()], None)
}

fn exception_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let other = &args[0];
    if recv.same(other) {
        return Ok(Value::Bool(true));
    }
    let runtime = vm.runtime().clone();
    if !std::rc::Rc::ptr_eq(&runtime.class_of(recv), &runtime.class_of(other)) {
        return Ok(Value::Bool(false));
    }
    let left = vm.call_method(recv, "message", Vec::new(), None)?;
    let right = vm.call_method(other, "message", Vec::new(), None)?;
    Ok(Value::Bool(left.to_s() == right.to_s()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_message_defaults_to_class_name() {
        assert_eq!(eval("RuntimeError.new.message"), "\"RuntimeError\"");
        assert_eq!(eval("ArgumentError.new(\"bad\").message"), "\"bad\"");
    }

    #[test]
    fn test_custom_exception_hierarchy_and_rescue() {
        let source = "class AppError < StandardError\nend\nbegin\n  raise AppError, \"boom\"\nrescue StandardError => e\n  [e.class, e.message]\nend";
        assert_eq!(eval(source), "[AppError, \"boom\"]");
    }

    #[test]
    fn test_inspect_and_equality() {
        assert_eq!(eval("KeyError.new(\"k\").inspect"), "\"#<KeyError: k>\"");
        assert_eq!(eval("RuntimeError.new(\"a\") == RuntimeError.new(\"a\")"), "true");
        assert_eq!(eval("RuntimeError.new(\"a\") == ArgumentError.new(\"a\")"), "false");
    }

    #[test]
    fn test_backtrace_is_recorded_when_raised() {
        let source = "def fail_here\n  raise \"x\"\nend\nbegin\n  fail_here\nrescue => e\n  e.backtrace.first\nend";
        assert_eq!(eval(source), "\"test.rb:2:in 'fail_here'\"");
    }
}
