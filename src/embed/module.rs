// Module and class bindings
// A handle on a VM module or class into which host functions are registered

use super::context::Context;
use super::convert::IntoValue;
use super::error::{Error, Result};
use super::trampoline::{HostFn, Trampoline};
use super::value::Value;
use crate::vm::interner::intern;
use crate::vm::value::{Class, Method, Value as RawValue};
use std::rc::Rc;

pub struct Module<'ctx> {
    ctx: &'ctx Context,
    class: Rc<Class>,
}

impl<'ctx> Module<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, class: Rc<Class>) -> Self {
        Self { ctx, class }
    }

    pub(crate) fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// Last path segment, e.g. `Inner`
    pub fn name(&self) -> &str {
        self.class
            .name
            .rsplit("::")
            .next()
            .unwrap_or(&self.class.name)
    }

    /// Qualified name, e.g. `Outer::Inner`
    pub fn full_name(&self) -> &str {
        &self.class.name
    }

    pub fn is_class(&self) -> bool {
        !self.class.is_module
    }

    /// Whether both handles name the same VM module
    pub fn same(&self, other: &Module<'_>) -> bool {
        Rc::ptr_eq(&self.class, &other.class)
    }

    pub fn as_value(&self) -> Value<'ctx> {
        Value::new(self.ctx, RawValue::Class(self.class.clone()))
    }

    fn host_method<F>(&self, name: &str, f: F) -> Result<Method>
    where
        F: for<'c> Fn(&'c Context) -> Result<Value<'c>> + 'static,
    {
        if name.is_empty() {
            return Err(Error::state("method name must not be empty"));
        }
        let function: Rc<HostFn> = Rc::new(f);
        Ok(Method::Host(Rc::new(Trampoline::new(self.ctx, name, function))))
    }

    /// Register `f` as `Name.method(...)`; arity is not checked
    pub fn define_class_method<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: for<'c> Fn(&'c Context) -> Result<Value<'c>> + 'static,
    {
        let method = self.host_method(name, f)?;
        self.class
            .singleton_methods
            .borrow_mut()
            .insert(intern(name), method);
        Ok(())
    }

    /// Register `f` as an instance method; the receiver is `Context::self_value`
    pub fn define_method<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: for<'c> Fn(&'c Context) -> Result<Value<'c>> + 'static,
    {
        let method = self.host_method(name, f)?;
        self.class.private_methods.borrow_mut().remove(name);
        self.class.methods.borrow_mut().insert(intern(name), method);
        Ok(())
    }

    pub fn define_const<T: IntoValue>(&self, name: &str, value: T) -> Result<()> {
        Context::check_constant_name(name)?;
        let value = value.into_value(self.ctx)?;
        self.class
            .constants
            .borrow_mut()
            .insert(intern(name), value.raw().clone());
        Ok(())
    }
}

impl std::fmt::Debug for Module<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.class.is_module { "module" } else { "class" };
        write!(f, "Module({} {})", kind, self.class.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_method_is_callable_from_script() {
        let ctx = Context::new();
        let greeter = ctx.define_module("Greeter", None).unwrap();
        greeter
            .define_class_method("hello", |ctx| {
                let args = ctx.get_args()?;
                let name = match args.first() {
                    Some(arg) => arg.to::<String>()?,
                    None => String::new(),
                };
                ctx.to_value(format!("Hello {}!", name))
            })
            .unwrap();
        let value = ctx.load_string("Greeter.hello(\"Matz\")", ()).unwrap();
        assert_eq!(value.to::<String>().unwrap(), "Hello Matz!");
    }

    #[test]
    fn test_instance_method_sees_receiver() {
        let ctx = Context::new();
        let counter = ctx.define_class("Counter", None, None).unwrap();
        counter
            .define_method("label", |ctx| {
                let receiver = ctx.self_value()?;
                let class = receiver.call("class", ())?;
                ctx.to_value(format!("<{}>", class))
            })
            .unwrap();
        let value = ctx.load_string("Counter.new.label", ()).unwrap();
        assert_eq!(value.to::<String>().unwrap(), "<Counter>");
    }

    #[test]
    fn test_block_is_visible_to_callback() {
        let ctx = Context::new();
        let util = ctx.define_module("Util", None).unwrap();
        util.define_class_method("twice", |ctx| {
            let Some(block) = ctx.get_block()? else {
                return Ok(ctx.nil());
            };
            let first = block.call("call", (1,))?;
            block.call("call", (first,))
        })
        .unwrap();
        let value = ctx.load_string("Util.twice { |x| x + 10 }", ()).unwrap();
        assert_eq!(value.to_int().unwrap(), 21);
        assert!(ctx.load_string("Util.twice", ()).unwrap().is_nil());
    }

    #[test]
    fn test_constants_and_names() {
        let ctx = Context::new();
        let outer = ctx.define_module("Outer", None).unwrap();
        let inner = ctx.define_module("Inner", Some(&outer)).unwrap();
        inner.define_const("VERSION", "1.0").unwrap();
        assert_eq!(inner.name(), "Inner");
        assert_eq!(inner.full_name(), "Outer::Inner");
        assert!(!inner.is_class());
        let value = ctx.load_string("Outer::Inner::VERSION", ()).unwrap();
        assert_eq!(value.to::<String>().unwrap(), "1.0");
        assert!(inner.define_const("version", 1).is_err());
    }

    #[test]
    fn test_host_error_becomes_script_exception() {
        let ctx = Context::new();
        let checks = ctx.define_module("Checks", None).unwrap();
        checks
            .define_class_method("positive", |ctx| {
                let args = ctx.get_args()?;
                let n = args.first().map(|arg| arg.to_int()).transpose()?.unwrap_or(0);
                if n <= 0 {
                    return Err(Error::Runtime {
                        class: "ArgumentError".to_string(),
                        message: format!("{} is not positive", n),
                        backtrace: Vec::new(),
                    });
                }
                ctx.to_value(n)
            })
            .unwrap();
        let source = "begin\n  Checks.positive(-1)\nrescue ArgumentError => e\n  \"caught: \" + e.message\nend";
        let value = ctx.load_string(source, ()).unwrap();
        assert_eq!(value.to::<String>().unwrap(), "caught: -1 is not positive");

        let error = ctx.load_string("Checks.positive(\"x\")", ()).unwrap_err();
        assert_eq!(error.class_name(), Some("RuntimeError"));
        assert!(error.to_string().contains("type mismatch"));
    }
}
