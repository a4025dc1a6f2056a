// Module and Class built-ins
// Provides: new, allocate, superclass, name, ancestors, ===, <, include, extend, include?,
// attr_reader/attr_writer/attr_accessor, private, public, alias_method, module_function,
// const_get, const_set, const_defined?, constants, instance_methods, method_defined?

use super::{check_arity, expect_name};
use crate::error::ErrorKind;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::interner::intern;
use crate::vm::runtime::Builtins;
use crate::vm::value::{Class, Method, Value};
use std::rc::Rc;

pub fn install(builtins: &Builtins) {
    let module = &builtins.module;
    module.define_native("name", module_name);
    module.define_native("to_s", module_name);
    module.define_native("inspect", module_name);
    module.define_native("===", module_case_equal);
    module.define_native("==", module_equal);
    module.define_native("<", module_less);
    module.define_native("<=", module_less_equal);
    module.define_native("ancestors", module_ancestors);
    module.define_native("include", module_include);
    module.define_native("extend", module_extend);
    module.define_native("include?", module_includes);
    module.define_native("attr_reader", module_attr_reader);
    module.define_native("attr_writer", module_attr_writer);
    module.define_native("attr_accessor", module_attr_accessor);
    module.define_native("private", module_private);
    module.define_native("public", module_public);
    module.define_native("alias_method", module_alias_method);
    module.define_native("module_function", module_module_function);
    module.define_native("const_get", module_const_get);
    module.define_native("const_set", module_const_set);
    module.define_native("const_defined?", module_const_defined);
    module.define_native("constants", module_constants);
    module.define_native("instance_methods", module_instance_methods);
    module.define_native("method_defined?", module_method_defined);
    module.define_native("private_method_defined?", module_private_method_defined);

    let class = &builtins.class;
    class.define_native("new", class_new);
    class.define_native("allocate", class_allocate);
    class.define_native("superclass", class_superclass);

    // Immediate values have no constructor
    for immediate in [
        &builtins.integer,
        &builtins.float,
        &builtins.symbol,
        &builtins.nil,
        &builtins.true_class,
        &builtins.false_class,
    ] {
        immediate.define_singleton_native("new", no_allocator);
        immediate.define_singleton_native("allocate", no_allocator);
    }
}

fn receiver_class(recv: &Value) -> Result<&Rc<Class>, NativeError> {
    recv.as_class()
        .ok_or_else(|| NativeError::type_error("receiver is not a class or module"))
}

fn module_name(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&receiver_class(recv)?.name))
}

fn module_case_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    Ok(Value::Bool(vm.runtime().is_kind_of(&args[0], class)))
}

fn module_equal(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(recv.same(&args[0])))
}

fn module_less(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let (class, other) = (receiver_class(recv)?, receiver_class(&args[0])?);
    if Rc::ptr_eq(class, other) {
        return Ok(Value::Bool(false));
    }
    if class.is_subclass_of(other) {
        return Ok(Value::Bool(true));
    }
    Ok(if other.is_subclass_of(class) {
        Value::Bool(false)
    } else {
        Value::Nil
    })
}

fn module_less_equal(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    if recv.same(args.first().unwrap_or(&Value::Nil)) {
        return Ok(Value::Bool(true));
    }
    module_less(vm, recv, args, block)
}

fn module_ancestors(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let ancestors = receiver_class(recv)?
        .ancestors()
        .into_iter()
        .map(Value::Class)
        .collect();
    Ok(vm.runtime().new_array(ancestors))
}

fn expect_module(vm: &dyn ValueCaller, value: &Value) -> Result<Rc<Class>, NativeError> {
    match value {
        Value::Class(module) if module.is_module => Ok(module.clone()),
        other => Err(NativeError::type_error(format!(
            "wrong argument type {} (expected Module)",
            super::class_name(vm, other)
        ))),
    }
}

fn module_include(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let class = receiver_class(recv)?;
    for arg in args {
        let module = expect_module(vm, arg)?;
        if Rc::ptr_eq(&module, class) {
            return Err(NativeError::argument("cyclic include detected"));
        }
        if !class.ancestors().iter().any(|c| Rc::ptr_eq(c, &module)) {
            class.includes.borrow_mut().push(module);
        }
    }
    Ok(recv.clone())
}

fn module_extend(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, usize::MAX)?;
    let class = receiver_class(recv)?;
    for arg in args {
        let module = expect_module(vm, arg)?;
        let mut extends = class.extends.borrow_mut();
        if !extends.iter().any(|c| Rc::ptr_eq(c, &module)) {
            extends.push(module);
        }
    }
    Ok(recv.clone())
}

fn module_includes(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    let module = expect_module(vm, &args[0])?;
    Ok(Value::Bool(
        !Rc::ptr_eq(class, &module) && class.is_subclass_of(&module),
    ))
}

fn define_attr(
    vm: &dyn ValueCaller,
    recv: &Value,
    args: &[Value],
    reader: bool,
    writer: bool,
) -> NativeResult {
    let class = receiver_class(recv)?;
    let mut defined = Vec::new();
    for arg in args {
        let name = expect_name(vm, arg)?;
        let ivar = intern(&format!("@{}", name));
        let private = class.default_private.get();
        if reader {
            define_entry(class, &name, Method::AttrReader(ivar.clone()), private);
            defined.push(Value::symbol(&name));
        }
        if writer {
            let setter = format!("{}=", name);
            define_entry(class, &setter, Method::AttrWriter(ivar), private);
            defined.push(Value::symbol(&setter));
        }
    }
    Ok(vm.runtime().new_array(defined))
}

fn define_entry(class: &Class, name: &str, method: Method, private: bool) {
    let name = intern(name);
    class.methods.borrow_mut().insert(name.clone(), method);
    if private {
        class.private_methods.borrow_mut().insert(name);
    } else {
        class.private_methods.borrow_mut().remove(&name);
    }
}

fn module_attr_reader(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    define_attr(vm, recv, args, true, false)
}

fn module_attr_writer(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    define_attr(vm, recv, args, false, true)
}

fn module_attr_accessor(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    define_attr(vm, recv, args, true, true)
}

/// `private` / `public` with names marks those methods, without names switches the default
fn set_visibility(vm: &dyn ValueCaller, recv: &Value, args: &[Value], private: bool) -> NativeResult {
    let class = receiver_class(recv)?;
    if args.is_empty() {
        class.default_private.set(private);
        return Ok(Value::Nil);
    }
    let mut names = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => names.extend(items.borrow().iter().cloned()),
            other => names.push(other.clone()),
        }
    }
    for name in &names {
        let name = expect_name(vm, name)?;
        let defined = crate::vm::runtime::walk_ancestors(class, &mut |c| {
            c.methods.borrow().contains_key(name.as_str())
        });
        if !defined {
            return Err(NativeError::Raise(
                ErrorKind::NameError,
                format!("undefined method '{}' for class '{}'", name, class.name),
            ));
        }
        let name = intern(&name);
        if private {
            class.private_methods.borrow_mut().insert(name);
        } else {
            class.private_methods.borrow_mut().remove(&name);
        }
    }
    Ok(match args {
        [single] => single.clone(),
        many => vm.runtime().new_array(many.to_vec()),
    })
}

fn module_private(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    set_visibility(vm, recv, args, true)
}

fn module_public(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    set_visibility(vm, recv, args, false)
}

fn find_instance_method(class: &Rc<Class>, name: &str) -> Option<Method> {
    let mut found = None;
    crate::vm::runtime::walk_ancestors(class, &mut |c| {
        found = c.methods.borrow().get(name).cloned();
        found.is_some()
    });
    found
}

fn module_alias_method(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    let class = receiver_class(recv)?;
    let (new_name, old_name) = (expect_name(vm, &args[0])?, expect_name(vm, &args[1])?);
    let Some(method) = find_instance_method(class, &old_name) else {
        return Err(NativeError::Raise(
            ErrorKind::NameError,
            format!("undefined method '{}' for class '{}'", old_name, class.name),
        ));
    };
    class.methods.borrow_mut().insert(intern(&new_name), method);
    Ok(Value::symbol(&new_name))
}

/// Copy the named instance methods (all of them without names) to the module itself
fn module_module_function(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let class = receiver_class(recv)?;
    let names: Vec<String> = if args.is_empty() {
        class.methods.borrow().keys().map(|k| k.to_string()).collect()
    } else {
        args.iter()
            .map(|arg| expect_name(vm, arg))
            .collect::<Result<_, _>>()?
    };
    for name in names {
        let method = class.methods.borrow().get(name.as_str()).cloned();
        if let Some(method) = method {
            class.singleton_methods.borrow_mut().insert(intern(&name), method);
        }
    }
    Ok(Value::Nil)
}

fn constant_name(vm: &dyn ValueCaller, value: &Value) -> Result<String, NativeError> {
    let name = expect_name(vm, value)?;
    if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
        return Err(NativeError::Raise(
            ErrorKind::NameError,
            format!("wrong constant name {}", name),
        ));
    }
    Ok(name)
}

fn module_const_get(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    let path = expect_name(vm, &args[0])?;
    let runtime = vm.runtime();
    let mut current = class.clone();
    let mut value = Value::Nil;
    for segment in path.split("::") {
        let found = runtime
            .scoped_const(&current, segment)
            .or_else(|| runtime.builtins.object.constants.borrow().get(segment).cloned());
        let Some(found) = found else {
            return Err(NativeError::Raise(
                ErrorKind::NameError,
                format!("uninitialized constant {}::{}", current.name, segment),
            ));
        };
        if let Value::Class(next) = &found {
            current = next.clone();
        }
        value = found;
    }
    Ok(value)
}

fn module_const_set(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 2, 2)?;
    let class = receiver_class(recv)?;
    let name = constant_name(vm, &args[0])?;
    class.constants.borrow_mut().insert(intern(&name), args[1].clone());
    Ok(args[1].clone())
}

fn module_const_defined(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    let name = expect_name(vm, &args[0])?;
    Ok(Value::Bool(vm.runtime().scoped_const(class, &name).is_some()))
}

fn module_constants(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let class = receiver_class(recv)?;
    let mut names: Vec<_> = class.constants.borrow().keys().cloned().collect();
    names.sort();
    Ok(vm
        .runtime()
        .new_array(names.into_iter().map(Value::Symbol).collect()))
}

fn module_instance_methods(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let class = receiver_class(recv)?;
    let inherited = args.first().map_or(true, Value::is_truthy);
    let mut names: Vec<Value> = Vec::new();
    let mut collect = |c: &Rc<Class>| {
        let private = c.private_methods.borrow();
        let mut own: Vec<_> = c
            .methods
            .borrow()
            .keys()
            .filter(|name| !private.contains(*name))
            .cloned()
            .collect();
        own.sort();
        for name in own {
            let value = Value::Symbol(name);
            if !names.iter().any(|n| n.same(&value)) {
                names.push(value);
            }
        }
        !inherited
    };
    if inherited {
        crate::vm::runtime::walk_ancestors(class, &mut collect);
    } else {
        collect(class);
    }
    Ok(vm.runtime().new_array(names))
}

fn module_method_defined(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    let name = expect_name(vm, &args[0])?;
    let mut public = false;
    crate::vm::runtime::walk_ancestors(class, &mut |c| {
        if c.methods.borrow().contains_key(name.as_str()) {
            public = !c.private_methods.borrow().contains(name.as_str());
            return true;
        }
        false
    });
    Ok(Value::Bool(public))
}

fn module_private_method_defined(
    vm: &mut dyn ValueCaller,
    recv: &Value,
    args: &[Value],
    _: Option<&Value>,
) -> NativeResult {
    check_arity(args, 1, 1)?;
    let class = receiver_class(recv)?;
    let name = expect_name(vm, &args[0])?;
    let mut private = false;
    crate::vm::runtime::walk_ancestors(class, &mut |c| {
        if c.methods.borrow().contains_key(name.as_str()) {
            private = c.private_methods.borrow().contains(name.as_str());
            return true;
        }
        false
    });
    Ok(Value::Bool(private))
}

// ==================== Class ====================

fn class_new(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    let object = class_allocate(vm, recv, &[], None)?;
    vm.call_method(&object, "initialize", args.to_vec(), block.cloned())?;
    Ok(object)
}

fn class_allocate(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let class = receiver_class(recv)?;
    Ok(vm.runtime().new_object(class))
}

fn class_superclass(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(receiver_class(recv)?
        .superclass
        .clone()
        .map(Value::Class)
        .unwrap_or(Value::Nil))
}

fn no_allocator(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Err(NativeError::Raise(
        ErrorKind::NoMethodError,
        format!("undefined method 'new' for {}", vm.runtime().describe(recv)),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_attr_accessor_and_initialize() {
        let source = "class Point\n  attr_accessor :x, :y\n  def initialize(x, y)\n    @x = x\n    @y = y\n  end\nend\npt = Point.new(1, 2)\npt.x = 10\n[pt.x, pt.y]";
        assert_eq!(eval(source), "[10, 2]");
    }

    #[test]
    fn test_attr_reader_sees_ivars_from_initialize() {
        let source = "class P\n  attr_reader :x\n  def initialize\n    @x = 5\n  end\nend\np = P.new\n[p.x, p.instance_variable_get(\"@x\"), p.inspect]";
        assert_eq!(eval(source), "[5, 5, \"#<P @x=5>\"]");
    }

    #[test]
    fn test_include_and_ancestors() {
        let source = "module Greet\n  def greet\n    \"hi #{name}\"\n  end\nend\nclass User\n  include Greet\n  def name\n    \"bob\"\n  end\nend\n[User.new.greet, User.include?(Greet), User.ancestors.first(3)]";
        assert_eq!(eval(source), "[\"hi bob\", true, [User, Greet, Object]]");
    }

    #[test]
    fn test_extend_adds_class_methods() {
        let source = "module Factory\n  def build\n    new\n  end\nend\nclass Widget\n  extend Factory\nend\nWidget.build.class";
        assert_eq!(eval(source), "Widget");
    }

    #[test]
    fn test_private_methods() {
        let source = "class Vault\n  def open\n    secret\n  end\n  private\n  def secret\n    42\n  end\nend\nVault.new.open";
        assert_eq!(eval(source), "42");
        let source = "class Vault\n  private\n  def secret\n    42\n  end\nend\nVault.new.secret";
        assert_eq!(
            eval(source),
            "NoMethodError: private method 'secret' called for an instance of Vault"
        );
    }

    #[test]
    fn test_case_equality_and_comparison() {
        assert_eq!(eval("[Integer === 3, String === 3, Integer < Numeric]"), "[true, false, true]");
    }

    #[test]
    fn test_new_on_immediates_is_rejected() {
        assert_eq!(
            eval("Integer.new"),
            "NoMethodError: undefined method 'new' for class Integer"
        );
    }

    #[test]
    fn test_const_get_and_superclass() {
        let source = "module Outer\n  class Inner\n  end\nend\n[Object.const_get(\"Outer::Inner\"), Outer::Inner.superclass]";
        assert_eq!(eval(source), "[Outer::Inner, Object]");
    }
}
