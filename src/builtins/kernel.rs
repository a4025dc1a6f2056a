// Kernel built-ins and the behaviour every object shares
// Provides: puts, print, p, raise, loop, proc, lambda, Integer(), Float(), String(), Array(),
// class, is_a?, respond_to?, send, ==, equal?, hash, object_id, inspect, to_s, dup, tap,
// instance_variable_get/set, plus NilClass, TrueClass and FalseClass

use super::{check_arity, expect_block, expect_name, inspect_value, to_s_bytes, values_equal};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeFn, NativeResult, ValueCaller};
use crate::vm::interner::intern;
use crate::vm::runtime::{Builtins, MESSAGE_IVAR};
use crate::vm::value::{Class, Object, Proc, Value};
use std::io::Write;
use std::rc::Rc;

fn define_private(class: &Class, name: &str, function: NativeFn) {
    class.define_native(name, function);
    class.private_methods.borrow_mut().insert(intern(name));
}

pub fn install(builtins: &Builtins) {
    let kernel = &builtins.kernel;
    define_private(kernel, "puts", kernel_puts);
    define_private(kernel, "print", kernel_print);
    define_private(kernel, "p", kernel_p);
    define_private(kernel, "raise", kernel_raise);
    define_private(kernel, "loop", kernel_loop);
    define_private(kernel, "proc", kernel_proc);
    define_private(kernel, "lambda", kernel_lambda);
    define_private(kernel, "Integer", kernel_integer);
    define_private(kernel, "Float", kernel_float);
    define_private(kernel, "String", kernel_string);
    define_private(kernel, "Array", kernel_array);
    define_private(kernel, "initialize", kernel_initialize);

    kernel.define_native("class", kernel_class);
    kernel.define_native("is_a?", kernel_is_a);
    kernel.define_native("kind_of?", kernel_is_a);
    kernel.define_native("instance_of?", kernel_instance_of);
    kernel.define_native("respond_to?", kernel_respond_to);
    kernel.define_native("send", kernel_send);
    kernel.define_native("__send__", kernel_send);
    kernel.define_native("public_send", kernel_public_send);
    kernel.define_native("nil?", kernel_is_nil);
    kernel.define_native("==", kernel_equal);
    kernel.define_native("equal?", kernel_identical);
    kernel.define_native("eql?", kernel_identical);
    kernel.define_native("===", kernel_case_equal);
    kernel.define_native("hash", kernel_hash);
    kernel.define_native("object_id", kernel_object_id);
    kernel.define_native("to_s", kernel_to_s);
    kernel.define_native("inspect", kernel_inspect);
    kernel.define_native("freeze", kernel_itself);
    kernel.define_native("frozen?", kernel_frozen);
    kernel.define_native("itself", kernel_itself);
    kernel.define_native("dup", kernel_dup);
    kernel.define_native("clone", kernel_dup);
    kernel.define_native("tap", kernel_tap);
    kernel.define_native("then", kernel_then);
    kernel.define_native("instance_variable_get", kernel_ivar_get);
    kernel.define_native("instance_variable_set", kernel_ivar_set);
    kernel.define_native("instance_variable_defined?", kernel_ivar_defined);
    kernel.define_native("instance_variables", kernel_ivars);

    let nil = &builtins.nil;
    nil.define_native("to_s", nil_to_s);
    nil.define_native("to_a", nil_to_a);
    nil.define_native("to_i", nil_to_i);
    nil.define_native("to_f", nil_to_f);
    nil.define_native("inspect", nil_inspect);
    nil.define_native("nil?", nil_is_nil);
    nil.define_native("&", bool_and);
    nil.define_native("|", bool_or);

    for class in [&builtins.true_class, &builtins.false_class] {
        class.define_native("to_s", bool_to_s);
        class.define_native("inspect", bool_to_s);
        class.define_native("&", bool_and);
        class.define_native("|", bool_or);
        class.define_native("^", bool_xor);
    }
}

// ==================== Output ====================

fn write_stdout(bytes: &[u8]) -> Result<(), NativeError> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes)
        .and_then(|_| out.flush())
        .map_err(|e| NativeError::from(format!("write failed: {}", e)))
}

fn puts_lines(vm: &mut dyn ValueCaller, value: &Value, out: &mut Vec<u8>) -> Result<(), NativeError> {
    if let Value::Array(items) = value {
        let items = items.borrow().clone();
        if items.is_empty() && out.is_empty() {
            out.push(b'\n');
        }
        for item in &items {
            puts_lines(vm, item, out)?;
        }
        return Ok(());
    }
    let bytes = to_s_bytes(vm, value)?;
    let ends_with_newline = bytes.last() == Some(&b'\n');
    out.extend_from_slice(&bytes);
    if !ends_with_newline {
        out.push(b'\n');
    }
    Ok(())
}

fn kernel_puts(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut out = Vec::new();
    if args.is_empty() {
        out.push(b'\n');
    }
    for arg in args {
        puts_lines(vm, arg, &mut out)?;
    }
    write_stdout(&out)?;
    Ok(Value::Nil)
}

fn kernel_print(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut out = Vec::new();
    for arg in args {
        out.extend(to_s_bytes(vm, arg)?);
    }
    write_stdout(&out)?;
    Ok(Value::Nil)
}

fn kernel_p(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut out = Vec::new();
    for arg in args {
        out.extend(inspect_value(vm, arg)?.into_bytes());
        out.push(b'\n');
    }
    write_stdout(&out)?;
    Ok(match args {
        [] => Value::Nil,
        [one] => one.clone(),
        many => vm.runtime().new_array(many.to_vec()),
    })
}

// ==================== Control ====================

fn kernel_raise(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 2)?;
    let exception = match args {
        [] => {
            return Err(NativeError::Raise(
                ErrorKind::RuntimeError,
                "unhandled exception".to_string(),
            ))
        }
        [Value::String(message)] => {
            let message = String::from_utf8_lossy(&message.borrow()).into_owned();
            return Err(NativeError::Raise(ErrorKind::RuntimeError, message));
        }
        [class @ Value::Class(_), rest @ ..] => {
            vm.call_method(class, "new", rest.to_vec(), None)?
        }
        [object, rest @ ..] => {
            if let (Value::Object(inner), Some(message)) = (object, rest.first()) {
                inner
                    .borrow_mut()
                    .ivars
                    .insert(intern(MESSAGE_IVAR), message.clone());
            }
            object.clone()
        }
    };
    let runtime = vm.runtime().clone();
    if !runtime.is_kind_of(&exception, &runtime.builtins.exception) {
        return Err(NativeError::type_error("exception class/object expected"));
    }
    Err(NativeError::Exception(exception))
}

fn kernel_loop(vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    loop {
        vm.call(block, Vec::new())?;
    }
}

fn kernel_proc(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    Ok(expect_block(block)
        .map_err(|_| NativeError::argument("tried to create Proc object without a block"))?
        .clone())
}

fn kernel_lambda(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)
        .map_err(|_| NativeError::argument("tried to create Proc object without a block"))?;
    match block {
        Value::Proc(proc) if !proc.is_lambda => Ok(Value::Proc(Rc::new(Proc {
            body: proc.body.clone(),
            is_lambda: true,
        }))),
        other => Ok(other.clone()),
    }
}

// ==================== Conversions ====================

fn kernel_integer(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    match &args[0] {
        Value::Integer(n) => Ok(Value::Integer(*n)),
        Value::Float(f) if f.is_finite() => Ok(Value::Integer(f.trunc() as i64)),
        Value::String(bytes) => {
            let text = String::from_utf8_lossy(&bytes.borrow()).into_owned();
            let cleaned = text.trim().replace('_', "");
            cleaned.parse::<i64>().map(Value::Integer).map_err(|_| {
                NativeError::argument(format!("invalid value for Integer(): {}", args[0].inspect()))
            })
        }
        other => Err(NativeError::type_error(format!(
            "can't convert {} into Integer",
            super::class_name(vm, other)
        ))),
    }
}

fn kernel_float(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    match &args[0] {
        Value::String(bytes) => {
            let text = String::from_utf8_lossy(&bytes.borrow()).into_owned();
            text.trim().replace('_', "").parse::<f64>().map(Value::Float).map_err(|_| {
                NativeError::argument(format!("invalid value for Float(): {}", args[0].inspect()))
            })
        }
        other => super::expect_float(vm, other).map(Value::Float),
    }
}

fn kernel_string(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::string(to_s_bytes(vm, &args[0])?))
}

fn kernel_array(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(_) => args[0].clone(),
        Value::Nil => vm.runtime().new_array(Vec::new()),
        Value::Hash(hash) => {
            let pairs = hash.borrow().entries();
            let runtime = vm.runtime().clone();
            let pairs = pairs
                .into_iter()
                .map(|(k, v)| runtime.new_array(vec![k, v]))
                .collect();
            runtime.new_array(pairs)
        }
        Value::Range(..) => vm.call_method(&args[0], "to_a", Vec::new(), None)?,
        other => vm.runtime().new_array(vec![other.clone()]),
    })
}

fn kernel_initialize(_vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 0)?;
    Ok(Value::Nil)
}

// ==================== Object protocol ====================

fn kernel_class(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Class(vm.runtime().class_of(recv)))
}

fn expect_class(vm: &dyn ValueCaller, value: &Value) -> Result<Rc<Class>, NativeError> {
    match value {
        Value::Class(class) => Ok(class.clone()),
        other => Err(NativeError::type_error(format!(
            "class or module required, got {}",
            super::class_name(vm, other)
        ))),
    }
}

fn kernel_is_a(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = expect_class(vm, &args[0])?;
    Ok(Value::Bool(vm.runtime().is_kind_of(recv, &class)))
}

fn kernel_instance_of(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = expect_class(vm, &args[0])?;
    Ok(Value::Bool(Rc::ptr_eq(&vm.runtime().class_of(recv), &class)))
}

fn kernel_respond_to(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let name = expect_name(vm, &args[0])?;
    let include_private = args.get(1).is_some_and(Value::is_truthy);
    Ok(Value::Bool(vm.runtime().respond_to(recv, &name, include_private)))
}

fn kernel_send(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let name = expect_name(vm, &args[0])?;
    vm.call_method(recv, &name, args[1..].to_vec(), block.cloned())
}

fn kernel_public_send(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let name = expect_name(vm, &args[0])?;
    let runtime = vm.runtime().clone();
    if runtime.respond_to(recv, &name, true) && !runtime.respond_to(recv, &name, false) {
        return Err(NativeError::Raise(
            ErrorKind::NoMethodError,
            format!("private method '{}' called for {}", name, runtime.describe(recv)),
        ));
    }
    vm.call_method(recv, &name, args[1..].to_vec(), block.cloned())
}

fn kernel_is_nil(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(false))
}

fn kernel_equal(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.same(&args[0])))
}

fn kernel_identical(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.same(&args[0])))
}

fn kernel_case_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(values_equal(vm, recv, &args[0])?))
}

fn kernel_hash(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    crate::vm::value::HashKey::from_value(recv).hash(&mut hasher);
    Ok(Value::Integer(hasher.finish() as i64))
}

fn kernel_object_id(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(match recv {
        Value::Nil => 8,
        Value::Bool(true) => 20,
        Value::Bool(false) => 0,
        Value::Integer(n) => n.wrapping_mul(2).wrapping_add(1),
        other => (other.identity() >> 3) as i64,
    }))
}

fn kernel_to_s(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let runtime = vm.runtime();
    if recv.same(&runtime.main) {
        return Ok(Value::str("main"));
    }
    Ok(match recv {
        Value::Object(_) => Value::str(&format!("#<{}>", runtime.class_of(recv).name)),
        other => Value::str(&other.to_s()),
    })
}

fn kernel_inspect(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    if recv.same(&vm.runtime().main) {
        return Ok(Value::str("main"));
    }
    Ok(Value::str(&recv.inspect()))
}

fn kernel_frozen(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(!matches!(
        recv,
        Value::String(_) | Value::Array(_) | Value::Hash(_) | Value::Object(_)
    )))
}

fn kernel_itself(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn kernel_dup(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let runtime = vm.runtime();
    Ok(match recv {
        Value::String(bytes) => Value::string(bytes.borrow().clone()),
        Value::Array(items) => runtime.new_array(items.borrow().clone()),
        Value::Hash(hash) => runtime.new_hash(hash.borrow().clone()),
        Value::Object(object) => {
            let copy = runtime.new_object(&object.borrow().class);
            if let Value::Object(target) = &copy {
                target.borrow_mut().ivars = object.borrow().ivars.clone();
            }
            copy
        }
        other => other.clone(),
    })
}

fn kernel_tap(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    vm.call(expect_block(block)?, vec![recv.clone()])?;
    Ok(recv.clone())
}

fn kernel_then(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    vm.call(expect_block(block)?, vec![recv.clone()])
}

fn ivar_name(vm: &dyn ValueCaller, value: &Value) -> Result<String, NativeError> {
    let name = expect_name(vm, value)?;
    if !name.starts_with('@') || name.len() < 2 {
        return Err(NativeError::Raise(
            ErrorKind::NameError,
            format!("'{}' is not allowed as an instance variable name", name),
        ));
    }
    Ok(name)
}

fn kernel_ivar_get(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let name = ivar_name(vm, &args[0])?;
    let value = match recv {
        Value::Object(object) => object.borrow().ivars.get(name.as_str()).cloned(),
        Value::Class(class) => class.ivars.borrow().get(name.as_str()).cloned(),
        _ => None,
    };
    Ok(value.unwrap_or(Value::Nil))
}

fn kernel_ivar_set(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    let name = intern(&ivar_name(vm, &args[0])?);
    let value = args[1].clone();
    match recv {
        Value::Object(object) => {
            object.borrow_mut().ivars.insert(name, value.clone());
        }
        Value::Class(class) => {
            class.ivars.borrow_mut().insert(name, value.clone());
        }
        other => {
            return Err(NativeError::Raise(
                ErrorKind::FrozenError,
                format!("can't modify frozen {}", super::class_name(vm, other)),
            ))
        }
    }
    Ok(value)
}

fn kernel_ivar_defined(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let name = ivar_name(vm, &args[0])?;
    Ok(Value::Bool(match recv {
        Value::Object(object) => object.borrow().ivars.contains_key(name.as_str()),
        Value::Class(class) => class.ivars.borrow().contains_key(name.as_str()),
        _ => false,
    }))
}

fn kernel_ivars(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let names: Vec<Value> = match recv {
        Value::Object(object) => visible_ivars(&object.borrow()),
        Value::Class(class) => class
            .ivars
            .borrow()
            .keys()
            .map(|name| Value::Symbol(name.clone()))
            .collect(),
        _ => Vec::new(),
    };
    Ok(vm.runtime().new_array(names))
}

fn visible_ivars(object: &Object) -> Vec<Value> {
    let mut names: Vec<_> = object
        .ivars
        .keys()
        .filter(|name| !name.starts_with("@__"))
        .cloned()
        .collect();
    names.sort();
    names.into_iter().map(Value::Symbol).collect()
}

// ==================== nil, true, false ====================

fn nil_to_s(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(""))
}

fn nil_to_a(vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(vm.runtime().new_array(Vec::new()))
}

fn nil_to_i(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(0))
}

fn nil_to_f(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Float(0.0))
}

fn nil_inspect(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str("nil"))
}

fn nil_is_nil(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(true))
}

fn bool_to_s(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&recv.inspect()))
}

fn bool_and(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.is_truthy() && args[0].is_truthy()))
}

fn bool_or(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.is_truthy() || args[0].is_truthy()))
}

fn bool_xor(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.is_truthy() != args[0].is_truthy()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_raise_forms() {
        assert_eq!(eval("raise \"boom\""), "RuntimeError: boom");
        assert_eq!(eval("raise ArgumentError"), "ArgumentError: ArgumentError");
        assert_eq!(eval("raise ArgumentError, \"bad\""), "ArgumentError: bad");
        assert_eq!(eval("raise 5"), "TypeError: exception class/object expected");
    }

    #[test]
    fn test_loop_and_break() {
        assert_eq!(eval("i = 0\nloop do\n  i += 1\n  break i * 2 if i == 4\nend"), "8");
    }

    #[test]
    fn test_lambda_is_strict_and_proc_is_not() {
        assert_eq!(eval("proc { |a, b| [a, b] }.call(1)"), "[1, nil]");
        assert_eq!(
            eval("lambda { |a, b| [a, b] }.call(1)"),
            "ArgumentError: wrong number of arguments (given 1, expected 2)"
        );
        assert_eq!(eval("lambda { |x| x }.lambda?"), "true");
    }

    #[test]
    fn test_object_protocol() {
        assert_eq!(eval("5.is_a?(Comparable)"), "true");
        assert_eq!(eval("nil.to_a"), "[]");
        assert_eq!(eval("5.respond_to?(:times)"), "true");
        assert_eq!(eval("5.respond_to?(:puts)"), "false");
        assert_eq!(eval("3.send(:+, 4)"), "7");
        assert_eq!(eval("Integer(\"42\") + Float(\"0.5\")"), "42.5");
        assert_eq!(eval("self.to_s"), "\"main\"");
    }

    #[test]
    fn test_private_kernel_methods_need_implicit_receiver() {
        assert_eq!(
            eval("5.puts"),
            "NoMethodError: private method 'puts' called for an instance of Integer"
        );
    }

    #[test]
    fn test_instance_variables() {
        let source = "class P\n  def initialize\n    @a = 1\n    @b = 2\n  end\nend\no = P.new\no.instance_variable_set(\"@c\", 3)\n[o.instance_variables, o.instance_variable_get(\"@a\")]";
        assert_eq!(eval(source), "[[:@a, :@b, :@c], 1]");
    }
}
