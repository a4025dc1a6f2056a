// Garnet Context
// One runtime, its configuration and the stack of in-flight host callbacks

use super::config::Config;
use super::convert::{IntoArgs, IntoValue, HostValue};
use super::error::{Error, Result};
use super::module::Module;
use super::runnable::Runnable;
use super::value::Value;
use crate::compiler::{compile_source, FunctionConstant};
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::gc::GcStats;
use crate::vm::interner::intern;
use crate::vm::runtime::Runtime;
use crate::vm::value::{Class, Value as RawValue};
use crate::vm::VM;
use std::cell::RefCell;
use std::rc::Rc;

/// Receiver, arguments and block of one active host callback
pub(crate) struct CallbackFrame {
    pub receiver: RawValue,
    pub args: Vec<RawValue>,
    pub block: Option<RawValue>,
}

pub(crate) struct ContextInner {
    pub runtime: Rc<Runtime>,
    pub config: Config,
    pub frames: RefCell<Vec<CallbackFrame>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.runtime.teardown();
    }
}

/// Binds `ARGV` for one run and puts the caller's binding back on drop
struct ArgvBinding<'a> {
    runtime: &'a Runtime,
    previous: Option<RawValue>,
}

impl<'a> ArgvBinding<'a> {
    fn bind(runtime: &'a Runtime, argv: RawValue) -> Self {
        let previous = runtime
            .builtins
            .object
            .constants
            .borrow_mut()
            .insert(intern("ARGV"), argv);
        Self { runtime, previous }
    }
}

impl Drop for ArgvBinding<'_> {
    fn drop(&mut self) {
        let mut constants = self.runtime.builtins.object.constants.borrow_mut();
        match self.previous.take() {
            Some(previous) => {
                constants.insert(intern("ARGV"), previous);
            }
            None => {
                constants.remove("ARGV");
            }
        }
    }
}

/// An embedded interpreter.
///
/// Every [`Value`] borrows the Context it came from, so handles cannot
/// outlive it; dropping (or [`close`](Context::close)-ing) the Context
/// tears the whole heap down.
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create from JSON options, e.g. `{"filename": "app.rb"}`
    pub fn from_options(options: &str) -> Result<Self> {
        Self::with_config(Config::from_json(options)?)
    }

    fn build(config: Config) -> Self {
        let runtime = Runtime::new();
        runtime.trace.set(config.trace);
        runtime.gc_stats.set(config.gc_stats);
        if config.trace {
            eprintln!("[VM] context created for {}", config.filename);
        }
        Self {
            inner: Rc::new(ContextInner {
                runtime,
                config,
                frames: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.inner.runtime
    }

    pub(crate) fn same_context(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn wrap(&self, raw: RawValue) -> Value<'_> {
        Value::new(self, raw)
    }

    /// Turn a VM-level failure into a host error
    pub(crate) fn host_error(&self, error: NativeError) -> Error {
        let exception = self.runtime().materialize(error);
        Error::from_exception(self.runtime(), &exception)
    }

    fn finish(&self, result: NativeResult) -> Result<Value<'_>> {
        match result {
            Ok(value) => Ok(self.wrap(value)),
            Err(error) => Err(self.host_error(error)),
        }
    }

    /// Raw argument values, rejecting handles from another Context
    fn raw_args(&self, args: &[Value<'_>]) -> Result<Vec<RawValue>> {
        args.iter()
            .map(|arg| {
                if arg.context().same_context(self) {
                    Ok(arg.raw().clone())
                } else {
                    Err(Error::state("value belongs to a different context"))
                }
            })
            .collect()
    }

    // ==================== Execution ====================

    pub(crate) fn compile(&self, source: &str) -> Result<Rc<FunctionConstant>> {
        let filename = &self.inner.config.filename;
        if self.inner.config.trace {
            eprintln!("[VM] compile {} ({} bytes)", filename, source.len());
        }
        Ok(compile_source(source, filename)?)
    }

    /// Compile without running; nothing in the runtime changes until `run`
    pub fn parse(&self, source: &str) -> Result<Runnable<'_>> {
        let function = self.compile(source)?;
        Ok(Runnable::new(self, function))
    }

    /// Compile, bind `ARGV` and run.
    ///
    /// With `no_exec` set the program is returned unexecuted as a proc.
    pub fn load_string<A: IntoArgs>(&self, source: &str, args: A) -> Result<Value<'_>> {
        let function = self.compile(source)?;
        if self.inner.config.no_exec {
            let vm = VM::new(self.runtime().clone());
            return Ok(self.wrap(vm.program_proc(function)));
        }
        self.execute(function, args)
    }

    /// Like `load_string`, converting the result to host data
    pub fn load_string_result<A: IntoArgs>(&self, source: &str, args: A) -> Result<HostValue> {
        self.load_string(source, args)?.to_interface()
    }

    pub(crate) fn execute<A: IntoArgs>(
        &self,
        function: Rc<FunctionConstant>,
        args: A,
    ) -> Result<Value<'_>> {
        let args = args.into_args(self)?;
        let argv = self.raw_args(&args)?;
        let runtime = self.runtime();
        let _argv = ArgvBinding::bind(runtime, runtime.new_array(argv));

        let mut vm = VM::new(runtime.clone());
        let result = vm.run_function(function);
        drop(vm);
        self.finish(result)
    }

    /// Send `method` to a raw receiver on a fresh interpreter
    pub(crate) fn send(&self, receiver: &RawValue, method: &str, args: &[Value<'_>]) -> Result<Value<'_>> {
        let args = self.raw_args(args)?;
        let mut vm = VM::new(self.runtime().clone());
        let result = vm.call_method(receiver, method, args, None);
        drop(vm);
        self.finish(result)
    }

    /// Call a top-level method, e.g. one defined with `def` in a loaded script
    pub fn call<A: IntoArgs>(&self, name: &str, args: A) -> Result<Value<'_>> {
        let args = args.into_args(self)?;
        let main = self.runtime().main.clone();
        self.send(&main, name, &args)
    }

    // ==================== Modules and classes ====================

    fn namespace(&self, parent: Option<&Module<'_>>) -> Result<Option<Rc<Class>>> {
        match parent {
            Some(parent) if !parent.context().same_context(self) => {
                Err(Error::state("module belongs to a different context"))
            }
            Some(parent) => Ok(Some(parent.class().clone())),
            None => Ok(None),
        }
    }

    pub(crate) fn check_constant_name(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(Error::Runtime {
                class: "NameError".to_string(),
                message: format!("wrong constant name {}", name),
                backtrace: Vec::new(),
            })
        }
    }

    /// Define a module under `parent` (top level when None), or reopen it
    pub fn define_module(&self, name: &str, parent: Option<&Module<'_>>) -> Result<Module<'_>> {
        Self::check_constant_name(name)?;
        let namespace = self.namespace(parent)?;
        let class = self
            .runtime()
            .define_module(name, namespace.as_ref())
            .map_err(|error| self.host_error(error))?;
        Ok(Module::new(self, class))
    }

    /// Define a class under `parent`, or reopen it; `superclass` defaults to Object
    pub fn define_class(
        &self,
        name: &str,
        superclass: Option<&Module<'_>>,
        parent: Option<&Module<'_>>,
    ) -> Result<Module<'_>> {
        Self::check_constant_name(name)?;
        let namespace = self.namespace(parent)?;
        let superclass = self.namespace(superclass)?;
        let class = self
            .runtime()
            .define_class(name, superclass.as_ref(), namespace.as_ref())
            .map_err(|error| self.host_error(error))?;
        Ok(Module::new(self, class))
    }

    /// Constant `name` directly under `parent`; enclosing scopes are not searched
    fn lookup(&self, name: &str, parent: Option<&Module<'_>>) -> Option<Rc<Class>> {
        let namespace = match parent {
            Some(parent) if !parent.context().same_context(self) => return None,
            Some(parent) => parent.class().clone(),
            None => self.runtime().builtins.object.clone(),
        };
        let constants = namespace.constants.borrow();
        match constants.get(name) {
            Some(RawValue::Class(class)) => Some(class.clone()),
            _ => None,
        }
    }

    pub fn has_module(&self, name: &str, parent: Option<&Module<'_>>) -> bool {
        self.lookup(name, parent).is_some_and(|class| class.is_module)
    }

    pub fn get_module(&self, name: &str, parent: Option<&Module<'_>>) -> Option<Module<'_>> {
        self.lookup(name, parent)
            .filter(|class| class.is_module)
            .map(|class| Module::new(self, class))
    }

    pub fn get_class(&self, name: &str, parent: Option<&Module<'_>>) -> Option<Module<'_>> {
        self.lookup(name, parent)
            .filter(|class| !class.is_module)
            .map(|class| Module::new(self, class))
    }

    // ==================== Callback state ====================

    fn with_frame<T>(&self, f: impl FnOnce(&CallbackFrame) -> T) -> Result<T> {
        let frames = self.inner.frames.borrow();
        frames
            .last()
            .map(f)
            .ok_or_else(|| Error::state("no host callback is active"))
    }

    /// Arguments of the innermost active host callback
    pub fn get_args(&self) -> Result<Vec<Value<'_>>> {
        let args = self.with_frame(|frame| frame.args.clone())?;
        Ok(args.into_iter().map(|arg| self.wrap(arg)).collect())
    }

    pub fn get_block(&self) -> Result<Option<Value<'_>>> {
        let block = self.with_frame(|frame| frame.block.clone())?;
        Ok(block.map(|block| self.wrap(block)))
    }

    /// Receiver of the innermost active host callback
    pub fn self_value(&self) -> Result<Value<'_>> {
        let receiver = self.with_frame(|frame| frame.receiver.clone())?;
        Ok(self.wrap(receiver))
    }

    // ==================== Values and globals ====================

    pub fn to_value<T: IntoValue>(&self, host: T) -> Result<Value<'_>> {
        host.into_value(self)
    }

    pub fn nil(&self) -> Value<'_> {
        self.wrap(RawValue::Nil)
    }

    /// Set `$name` (the leading `$` is optional)
    pub fn set_global<T: IntoValue>(&self, name: &str, value: T) -> Result<()> {
        let value = value.into_value(self)?;
        self.runtime()
            .globals
            .borrow_mut()
            .insert(intern(name.trim_start_matches('$')), value.raw().clone());
        Ok(())
    }

    pub fn get_global(&self, name: &str) -> Value<'_> {
        let name = name.trim_start_matches('$');
        let value = self.runtime().globals.borrow().get(name).cloned();
        self.wrap(value.unwrap_or(RawValue::Nil))
    }

    // ==================== Collection ====================

    /// Run the cycle collector now; answers the number of containers emptied
    pub fn collect_garbage(&self) -> Result<usize> {
        let runtime = self.runtime();
        if runtime.depth.get() > 0 || runtime.native_depth.get() > 0 {
            return Err(Error::state("cannot collect while a script is running"));
        }
        Ok(runtime.collect_garbage(Vec::new()))
    }

    pub fn gc_stats(&self) -> GcStats {
        self.runtime().gc_stats()
    }

    /// Tear the runtime down now instead of at drop
    pub fn close(self) {
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_string_binds_argv() {
        let ctx = Context::new();
        let value = ctx.load_string("ARGV.length", ("a", "b")).unwrap();
        assert_eq!(value.to_int().unwrap(), 2);
        let value = ctx.load_string("ARGV", ()).unwrap();
        assert_eq!(value.inspect(), "[]");
    }

    #[test]
    fn test_nested_run_restores_argv() {
        let ctx = Context::new();
        let nested = ctx.define_module("Nested", None).unwrap();
        nested
            .define_class_method("inner", |ctx| ctx.load_string("ARGV[0]", ("inner",)))
            .unwrap();
        let value = ctx
            .load_string("seen = Nested.inner\n[seen, ARGV[0]]", ("outer",))
            .unwrap();
        assert_eq!(value.inspect(), "[\"inner\", \"outer\"]");

        let error = ctx.load_string("Nested.inner\nraise \"stop\"", ("outer",));
        assert!(error.is_err());
        assert!(runtime_argv(&ctx).is_none());
    }

    fn runtime_argv(ctx: &Context) -> Option<RawValue> {
        ctx.runtime().builtins.object.constants.borrow().get("ARGV").cloned()
    }

    #[test]
    fn test_runtime_error_carries_class_and_backtrace() {
        let ctx = Context::with_config(Config::new().filename("app.rb")).unwrap();
        let error = ctx.load_string("def boom\n  raise ArgumentError, \"bad\"\nend\nboom", ()).unwrap_err();
        let Error::Runtime { class, message, backtrace } = error else {
            panic!("expected a runtime error");
        };
        assert_eq!(class, "ArgumentError");
        assert_eq!(message, "bad");
        assert_eq!(backtrace.first().map(String::as_str), Some("app.rb:2:in 'boom'"));
    }

    #[test]
    fn test_get_args_outside_callback() {
        let ctx = Context::new();
        assert!(matches!(ctx.get_args(), Err(Error::State(_))));
        assert!(matches!(ctx.self_value(), Err(Error::State(_))));
    }

    #[test]
    fn test_globals() {
        let ctx = Context::new();
        ctx.set_global("limit", 10).unwrap();
        assert_eq!(ctx.load_string("$limit * 2", ()).unwrap().to_int().unwrap(), 20);
        ctx.load_string("$seen = :yes", ()).unwrap();
        assert_eq!(ctx.get_global("$seen").as_symbol().unwrap(), "yes");
        assert!(ctx.get_global("missing").is_nil());
    }

    #[test]
    fn test_call_top_level_method() {
        let ctx = Context::new();
        ctx.load_string("def twice(x)\n  x * 2\nend", ()).unwrap();
        assert_eq!(ctx.call("twice", (21,)).unwrap().to_int().unwrap(), 42);
        let error = ctx.call("missing", ()).unwrap_err();
        assert_eq!(error.class_name(), Some("NoMethodError"));
    }

    #[test]
    fn test_invalid_module_name() {
        let ctx = Context::new();
        let error = ctx.define_module("lower", None).unwrap_err();
        assert_eq!(error.class_name(), Some("NameError"));
    }

    #[test]
    fn test_define_class_and_reopen_from_script() {
        let ctx = Context::new();
        let point = ctx.define_class("Point", None, None).unwrap();
        assert_eq!(point.name(), "Point");
        ctx.load_string("class Point\n  def origin?\n    true\n  end\nend", ()).unwrap();
        assert!(ctx.load_string("Point.new.origin?", ()).unwrap().to_bool().unwrap());
        assert!(ctx.get_class("Point", None).is_some());
        assert!(ctx.get_module("Point", None).is_none());
    }

    #[test]
    fn test_class_over_module_is_a_type_error() {
        let ctx = Context::new();
        ctx.define_module("Tools", None).unwrap();
        let error = ctx.define_class("Tools", None, None).unwrap_err();
        assert_eq!(error.class_name(), Some("TypeError"));
    }
}
