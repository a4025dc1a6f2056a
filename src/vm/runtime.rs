// Garnet Runtime
// State shared by every execution in one context: class table, globals,
// the main object, host roots and the cycle collector

use super::caller::NativeError;
use super::gc::{GcHeap, GcStats, Root};
use super::interner::intern;
use super::value::{Class, Cref, Env, Method, MethodInfo, Object, RHash, Value};
use crate::error::ErrorKind;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// Instance variable holding an exception's message
pub const MESSAGE_IVAR: &str = "@message";
/// Instance variable holding an exception's backtrace (hidden from inspect)
pub const BACKTRACE_IVAR: &str = "@__backtrace";

/// Nested native calls allowed before SystemStackError
pub const MAX_NATIVE_DEPTH: usize = 200;

/// The builtin classes and modules
pub struct Builtins {
    pub object: Rc<Class>,
    pub module: Rc<Class>,
    pub class: Rc<Class>,
    pub kernel: Rc<Class>,
    pub comparable: Rc<Class>,
    pub nil: Rc<Class>,
    pub true_class: Rc<Class>,
    pub false_class: Rc<Class>,
    pub numeric: Rc<Class>,
    pub integer: Rc<Class>,
    pub float: Rc<Class>,
    pub string: Rc<Class>,
    pub symbol: Rc<Class>,
    pub array: Rc<Class>,
    pub hash: Rc<Class>,
    pub range: Rc<Class>,
    pub proc: Rc<Class>,
    pub math: Rc<Class>,
    pub gc: Rc<Class>,

    pub exception: Rc<Class>,
    pub script_error: Rc<Class>,
    pub syntax_error: Rc<Class>,
    pub not_implemented_error: Rc<Class>,
    pub standard_error: Rc<Class>,
    pub runtime_error: Rc<Class>,
    pub argument_error: Rc<Class>,
    pub type_error: Rc<Class>,
    pub name_error: Rc<Class>,
    pub no_method_error: Rc<Class>,
    pub zero_division_error: Rc<Class>,
    pub index_error: Rc<Class>,
    pub key_error: Rc<Class>,
    pub range_error: Rc<Class>,
    pub local_jump_error: Rc<Class>,
    pub frozen_error: Rc<Class>,
    pub system_stack_error: Rc<Class>,
}

/// A method found by lookup
pub struct MethodEntry {
    pub method: Method,
    pub info: Rc<MethodInfo>,
    pub private: bool,
}

pub struct Runtime {
    pub builtins: Builtins,
    pub globals: RefCell<FxHashMap<Arc<str>, Value>>,
    /// `self` at the top level
    pub main: Value,
    pub gc: RefCell<GcHeap>,
    /// Executions (VM instances) currently running
    pub depth: Cell<usize>,
    /// Native methods and host callbacks currently on the Rust stack
    pub native_depth: Cell<usize>,
    /// Set by `GC.start`; honoured at the next safe point
    pub gc_requested: Cell<bool>,
    pub trace: Cell<bool>,
    pub gc_stats: Cell<bool>,
    host_roots: RefCell<FxHashMap<u64, Value>>,
    next_root: Cell<u64>,
    classes: RefCell<Vec<Rc<Class>>>,
}

impl Runtime {
    pub fn new() -> Rc<Runtime> {
        let object = Rc::new(Class::new("Object", None, false));
        let mut classes = vec![object.clone()];

        let mut class = |name: &str, superclass: &Rc<Class>| {
            let class = Rc::new(Class::new(name, Some(superclass.clone()), false));
            object
                .constants
                .borrow_mut()
                .insert(intern(name), Value::Class(class.clone()));
            classes.push(class.clone());
            class
        };

        let module = class("Module", &object);
        let class_class = class("Class", &module);
        let nil = class("NilClass", &object);
        let true_class = class("TrueClass", &object);
        let false_class = class("FalseClass", &object);
        let numeric = class("Numeric", &object);
        let integer = class("Integer", &numeric);
        let float = class("Float", &numeric);
        let string = class("String", &object);
        let symbol = class("Symbol", &object);
        let array = class("Array", &object);
        let hash = class("Hash", &object);
        let range = class("Range", &object);
        let proc = class("Proc", &object);

        let exception = class("Exception", &object);
        let script_error = class("ScriptError", &exception);
        let syntax_error = class("SyntaxError", &script_error);
        let not_implemented_error = class("NotImplementedError", &script_error);
        let standard_error = class("StandardError", &exception);
        let runtime_error = class("RuntimeError", &standard_error);
        let argument_error = class("ArgumentError", &standard_error);
        let type_error = class("TypeError", &standard_error);
        let name_error = class("NameError", &standard_error);
        let no_method_error = class("NoMethodError", &name_error);
        let zero_division_error = class("ZeroDivisionError", &standard_error);
        let index_error = class("IndexError", &standard_error);
        let key_error = class("KeyError", &index_error);
        let range_error = class("RangeError", &standard_error);
        let local_jump_error = class("LocalJumpError", &standard_error);
        let frozen_error = class("FrozenError", &runtime_error);
        let system_stack_error = class("SystemStackError", &exception);

        let mut module_named = |name: &str| {
            let module = Rc::new(Class::new(name, None, true));
            object
                .constants
                .borrow_mut()
                .insert(intern(name), Value::Class(module.clone()));
            classes.push(module.clone());
            module
        };
        let kernel = module_named("Kernel");
        let comparable = module_named("Comparable");
        let math = module_named("Math");
        let gc = module_named("GC");

        object
            .constants
            .borrow_mut()
            .insert(intern("Object"), Value::Class(object.clone()));
        object.includes.borrow_mut().push(kernel.clone());
        numeric.includes.borrow_mut().push(comparable.clone());
        string.includes.borrow_mut().push(comparable.clone());

        let builtins = Builtins {
            object: object.clone(),
            module,
            class: class_class,
            kernel,
            comparable,
            nil,
            true_class,
            false_class,
            numeric,
            integer,
            float,
            string,
            symbol,
            array,
            hash,
            range,
            proc,
            math,
            gc,
            exception,
            script_error,
            syntax_error,
            not_implemented_error,
            standard_error,
            runtime_error,
            argument_error,
            type_error,
            name_error,
            no_method_error,
            zero_division_error,
            index_error,
            key_error,
            range_error,
            local_jump_error,
            frozen_error,
            system_stack_error,
        };
        crate::builtins::install(&builtins);

        let main = Value::Object(Rc::new(RefCell::new(Object::new(object))));

        Rc::new(Runtime {
            builtins,
            globals: RefCell::new(FxHashMap::default()),
            main,
            gc: RefCell::new(GcHeap::new()),
            depth: Cell::new(0),
            native_depth: Cell::new(0),
            gc_requested: Cell::new(false),
            trace: Cell::new(false),
            gc_stats: Cell::new(false),
            host_roots: RefCell::new(FxHashMap::default()),
            next_root: Cell::new(1),
            classes: RefCell::new(classes),
        })
    }

    // ==================== Classes ====================

    /// Define (or reopen) a class under `namespace` (Object when None)
    pub fn define_class(
        &self,
        name: &str,
        superclass: Option<&Rc<Class>>,
        namespace: Option<&Rc<Class>>,
    ) -> Result<Rc<Class>, NativeError> {
        let namespace = namespace.unwrap_or(&self.builtins.object);
        if let Some(existing) = namespace.constants.borrow().get(name) {
            return match existing {
                Value::Class(class) if !class.is_module => {
                    if let Some(superclass) = superclass {
                        let same = class
                            .superclass
                            .as_ref()
                            .is_some_and(|current| Rc::ptr_eq(current, superclass));
                        if !same {
                            return Err(NativeError::type_error(format!(
                                "superclass mismatch for class {}",
                                name
                            )));
                        }
                    }
                    Ok(class.clone())
                }
                _ => Err(NativeError::type_error(format!("{} is not a class", name))),
            };
        }

        let superclass = superclass.unwrap_or(&self.builtins.object);
        if superclass.is_module {
            return Err(NativeError::type_error("superclass must be a Class"));
        }
        let class = Rc::new(Class::new(
            self.qualified_name(namespace, name),
            Some(superclass.clone()),
            false,
        ));
        self.register(namespace, name, &class);
        Ok(class)
    }

    /// Define (or reopen) a module under `namespace` (Object when None)
    pub fn define_module(
        &self,
        name: &str,
        namespace: Option<&Rc<Class>>,
    ) -> Result<Rc<Class>, NativeError> {
        let namespace = namespace.unwrap_or(&self.builtins.object);
        if let Some(existing) = namespace.constants.borrow().get(name) {
            return match existing {
                Value::Class(module) if module.is_module => Ok(module.clone()),
                _ => Err(NativeError::type_error(format!("{} is not a module", name))),
            };
        }
        let module = Rc::new(Class::new(self.qualified_name(namespace, name), None, true));
        self.register(namespace, name, &module);
        Ok(module)
    }

    fn qualified_name(&self, namespace: &Rc<Class>, name: &str) -> String {
        if Rc::ptr_eq(namespace, &self.builtins.object) {
            name.to_string()
        } else {
            format!("{}::{}", namespace.name, name)
        }
    }

    fn register(&self, namespace: &Rc<Class>, name: &str, class: &Rc<Class>) {
        namespace
            .constants
            .borrow_mut()
            .insert(intern(name), Value::Class(class.clone()));
        self.classes.borrow_mut().push(class.clone());
    }

    pub fn class_of(&self, value: &Value) -> Rc<Class> {
        let b = &self.builtins;
        match value {
            Value::Nil => b.nil.clone(),
            Value::Bool(true) => b.true_class.clone(),
            Value::Bool(false) => b.false_class.clone(),
            Value::Integer(_) => b.integer.clone(),
            Value::Float(_) => b.float.clone(),
            Value::String(_) => b.string.clone(),
            Value::Symbol(_) => b.symbol.clone(),
            Value::Array(_) => b.array.clone(),
            Value::Hash(_) => b.hash.clone(),
            Value::Range(..) => b.range.clone(),
            Value::Proc(_) => b.proc.clone(),
            Value::Class(class) if class.is_module => b.module.clone(),
            Value::Class(_) => b.class.clone(),
            Value::Object(object) => object.borrow().class.clone(),
        }
    }

    pub fn is_kind_of(&self, value: &Value, class: &Rc<Class>) -> bool {
        self.class_of(value).is_subclass_of(class)
    }

    /// Visit the method tables a message to `receiver` searches, in order.
    /// The flag tells whether the singleton table is meant. Stops when `f` returns true.
    fn walk_lookup(&self, receiver: &Value, f: &mut dyn FnMut(&Rc<Class>, bool) -> bool) {
        match receiver {
            Value::Class(target) => {
                let mut current = Some(target.clone());
                while let Some(class) = current {
                    if f(&class, true) {
                        return;
                    }
                    for module in class.extends.borrow().iter().rev() {
                        if walk_module(module, &mut |m| f(m, false)) {
                            return;
                        }
                    }
                    current = class.superclass.clone();
                }
                let meta = if target.is_module {
                    &self.builtins.module
                } else {
                    &self.builtins.class
                };
                walk_ancestors(meta, &mut |c| f(c, false));
            }
            other => {
                walk_ancestors(&self.class_of(other), &mut |c| f(c, false));
            }
        }
    }

    pub fn find_method(&self, receiver: &Value, name: &str) -> Option<MethodEntry> {
        let mut found = None;
        self.walk_lookup(receiver, &mut |class, singleton| {
            found = lookup_in(class, singleton, name);
            found.is_some()
        });
        found
    }

    /// The method `super` reaches from `info` on `receiver`
    pub fn find_super_method(&self, receiver: &Value, info: &MethodInfo) -> Option<MethodEntry> {
        let mut passed = false;
        let mut found = None;
        self.walk_lookup(receiver, &mut |class, singleton| {
            if !passed {
                passed = Rc::ptr_eq(class, &info.owner) && singleton == info.singleton;
                return false;
            }
            found = lookup_in(class, singleton, &info.name);
            found.is_some()
        });
        found
    }

    pub fn respond_to(&self, receiver: &Value, name: &str, include_private: bool) -> bool {
        match self.find_method(receiver, name) {
            Some(entry) => include_private || !entry.private,
            None => false,
        }
    }

    // ==================== Constants ====================

    /// Lexical scopes first (top level excluded), then ancestors, then Object
    pub fn lookup_const(&self, cref: &Rc<Cref>, name: &str) -> Option<Value> {
        let mut scope = Some(cref);
        while let Some(current) = scope {
            if current.parent.is_none() {
                break;
            }
            if let Some(value) = current.class.constants.borrow().get(name) {
                return Some(value.clone());
            }
            scope = current.parent.as_ref();
        }

        let mut found = None;
        walk_ancestors(&cref.class, &mut |class| {
            found = class.constants.borrow().get(name).cloned();
            found.is_some()
        });
        found.or_else(|| self.builtins.object.constants.borrow().get(name).cloned())
    }

    /// `Scope::Name`
    pub fn scoped_const(&self, scope: &Rc<Class>, name: &str) -> Option<Value> {
        let object = &self.builtins.object;
        let mut found = None;
        walk_ancestors(scope, &mut |class| {
            if Rc::ptr_eq(class, object) && !Rc::ptr_eq(scope, object) {
                return true;
            }
            found = class.constants.borrow().get(name).cloned();
            found.is_some()
        });
        found
    }

    /// Resolve a path such as `Outer::Inner` from the top level
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut current = Value::Class(self.builtins.object.clone());
        for segment in path.split("::") {
            let class = current.as_class()?.clone();
            current = self.scoped_const(&class, segment)?;
        }
        Some(current)
    }

    // ==================== Allocation ====================

    pub fn new_array(&self, items: Vec<Value>) -> Value {
        let array = Rc::new(RefCell::new(items));
        self.gc.borrow_mut().track_array(&array);
        Value::Array(array)
    }

    pub fn new_hash(&self, hash: RHash) -> Value {
        let hash = Rc::new(RefCell::new(hash));
        self.gc.borrow_mut().track_hash(&hash);
        Value::Hash(hash)
    }

    pub fn new_object(&self, class: &Rc<Class>) -> Value {
        let object = Rc::new(RefCell::new(Object::new(class.clone())));
        self.gc.borrow_mut().track_object(&object);
        Value::Object(object)
    }

    /// Environments are only tracked once a block captures them
    pub fn new_env(&self, size: usize, parent: Option<Rc<Env>>) -> Rc<Env> {
        Rc::new(Env::new(size, parent))
    }

    pub fn capture_env(&self, env: &Rc<Env>) {
        self.gc.borrow_mut().track_env(env);
    }

    // ==================== Exceptions ====================

    pub fn error_class(&self, kind: &ErrorKind) -> Rc<Class> {
        let b = &self.builtins;
        match kind {
            ErrorKind::SyntaxError => b.syntax_error.clone(),
            ErrorKind::StandardError => b.standard_error.clone(),
            ErrorKind::RuntimeError => b.runtime_error.clone(),
            ErrorKind::ArgumentError => b.argument_error.clone(),
            ErrorKind::TypeError => b.type_error.clone(),
            ErrorKind::NameError => b.name_error.clone(),
            ErrorKind::NoMethodError => b.no_method_error.clone(),
            ErrorKind::ZeroDivisionError => b.zero_division_error.clone(),
            ErrorKind::IndexError => b.index_error.clone(),
            ErrorKind::KeyError => b.key_error.clone(),
            ErrorKind::RangeError => b.range_error.clone(),
            ErrorKind::LocalJumpError => b.local_jump_error.clone(),
            ErrorKind::FrozenError => b.frozen_error.clone(),
            ErrorKind::SystemStackError => b.system_stack_error.clone(),
            ErrorKind::Custom(name) => match self.resolve_path(name) {
                Some(Value::Class(class)) if class.is_subclass_of(&b.exception) => class,
                _ => b.runtime_error.clone(),
            },
        }
    }

    pub fn make_exception(&self, class: &Rc<Class>, message: &str) -> Value {
        let exception = self.new_object(class);
        if let Value::Object(object) = &exception {
            object
                .borrow_mut()
                .ivars
                .insert(intern(MESSAGE_IVAR), Value::str(message));
        }
        exception
    }

    /// Turn a native failure into an exception object
    pub fn materialize(&self, error: NativeError) -> Value {
        match error {
            NativeError::Raise(kind, message) => {
                self.make_exception(&self.error_class(&kind), &message)
            }
            NativeError::Exception(exception) => exception,
            NativeError::Break(..) => {
                self.make_exception(&self.builtins.local_jump_error, "break from proc-closure")
            }
        }
    }

    pub fn exception_message(&self, exception: &Value) -> String {
        match exception {
            Value::Object(object) => {
                let object = object.borrow();
                match object.ivars.get(MESSAGE_IVAR) {
                    Some(Value::Nil) | None => object.class.name.clone(),
                    Some(message) => message.to_s(),
                }
            }
            other => other.to_s(),
        }
    }

    pub fn exception_backtrace(&self, exception: &Value) -> Vec<String> {
        let Value::Object(object) = exception else {
            return Vec::new();
        };
        match object.borrow().ivars.get(BACKTRACE_IVAR) {
            Some(Value::Array(lines)) => lines.borrow().iter().map(Value::to_s).collect(),
            _ => Vec::new(),
        }
    }

    /// Attach a backtrace unless the exception already carries one
    pub fn set_backtrace_once(&self, exception: &Value, lines: Vec<String>) {
        let Value::Object(object) = exception else {
            return;
        };
        if object.borrow().ivars.contains_key(BACKTRACE_IVAR) {
            return;
        }
        let lines = lines.iter().map(|line| Value::str(line)).collect();
        let lines = self.new_array(lines);
        object
            .borrow_mut()
            .ivars
            .insert(intern(BACKTRACE_IVAR), lines);
    }

    /// How error messages name a receiver: `an instance of Foo`, `nil`, `main:Object`
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Class(class) if class.is_module => format!("module {}", class.name),
            Value::Class(class) => format!("class {}", class.name),
            other if other.same(&self.main) => "main:Object".to_string(),
            other => format!("an instance of {}", self.class_of(other).name),
        }
    }

    // ==================== Roots and collection ====================

    pub fn add_root(&self, value: Value) -> u64 {
        let id = self.next_root.get();
        self.next_root.set(id + 1);
        self.host_roots.borrow_mut().insert(id, value);
        id
    }

    pub fn remove_root(&self, id: u64) {
        self.host_roots.borrow_mut().remove(&id);
    }

    pub fn root_count(&self) -> usize {
        self.host_roots.borrow().len()
    }

    /// Whether a collection may run now
    pub fn at_safe_point(&self) -> bool {
        self.depth.get() <= 1 && self.native_depth.get() == 0
    }

    /// Collect with the runtime's own roots plus the caller's
    pub fn collect_garbage(&self, mut roots: Vec<Root>) -> usize {
        roots.push(Root::Value(self.main.clone()));
        roots.extend(self.host_roots.borrow().values().cloned().map(Root::Value));
        roots.extend(self.globals.borrow().values().cloned().map(Root::Value));
        roots.extend(self.classes.borrow().iter().cloned().map(Root::Class));

        let mut gc = self.gc.borrow_mut();
        let broken = gc.collect(roots);
        self.gc_requested.set(false);
        if self.gc_stats.get() {
            let stats = gc.get_stats();
            eprintln!(
                "[GC] collection #{}: {} tracked, {} emptied ({} total)",
                stats.collections, stats.tracked_count, broken, stats.cycles_broken
            );
        }
        broken
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.borrow().get_stats()
    }

    /// Break every cycle so the whole heap is freed with the runtime
    pub fn teardown(&self) {
        if self.trace.get() {
            eprintln!(
                "[VM] teardown: {} classes, {} host roots",
                self.classes.borrow().len(),
                self.root_count()
            );
        }
        self.host_roots.borrow_mut().clear();
        self.globals.borrow_mut().clear();
        self.gc.borrow_mut().clear_all();
        if let Value::Object(main) = &self.main {
            main.borrow_mut().ivars.clear();
        }
        for class in self.classes.borrow_mut().drain(..) {
            class.clear();
        }
    }
}

/// Instance-method ancestry of a class; stops when `f` returns true
pub fn walk_ancestors(class: &Rc<Class>, f: &mut dyn FnMut(&Rc<Class>) -> bool) -> bool {
    let mut current = Some(class.clone());
    while let Some(class) = current {
        if f(&class) {
            return true;
        }
        for module in class.includes.borrow().iter().rev() {
            if walk_module(module, f) {
                return true;
            }
        }
        current = class.superclass.clone();
    }
    false
}

fn walk_module(module: &Rc<Class>, f: &mut dyn FnMut(&Rc<Class>) -> bool) -> bool {
    if f(module) {
        return true;
    }
    for included in module.includes.borrow().iter().rev() {
        if walk_module(included, f) {
            return true;
        }
    }
    false
}

fn lookup_in(class: &Rc<Class>, singleton: bool, name: &str) -> Option<MethodEntry> {
    let table = if singleton {
        class.singleton_methods.borrow()
    } else {
        class.methods.borrow()
    };
    let (key, method) = table.get_key_value(name)?;
    Some(MethodEntry {
        method: method.clone(),
        info: Rc::new(MethodInfo {
            owner: class.clone(),
            name: key.clone(),
            singleton,
        }),
        private: !singleton && class.private_methods.borrow().contains(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::caller::{NativeResult, ValueCaller};

    #[test]
    fn test_builtin_hierarchy() {
        let runtime = Runtime::new();
        let b = &runtime.builtins;
        assert!(b.no_method_error.is_subclass_of(&b.name_error));
        assert!(b.key_error.is_subclass_of(&b.standard_error));
        assert!(!b.system_stack_error.is_subclass_of(&b.standard_error));
        assert!(runtime.is_kind_of(&Value::Integer(1), &b.comparable));
        runtime.teardown();
    }

    #[test]
    fn test_define_class_reopens_and_checks_superclass() {
        let runtime = Runtime::new();
        let base = runtime.define_class("Base", None, None).unwrap();
        let child = runtime.define_class("Child", Some(&base), None).unwrap();
        let again = runtime.define_class("Child", None, None).unwrap();
        assert!(Rc::ptr_eq(&child, &again));

        let other = runtime.define_class("Other", None, None).unwrap();
        assert!(runtime.define_class("Child", Some(&other), None).is_err());
        assert!(runtime.define_module("Child", None).is_err());
        runtime.teardown();
    }

    #[test]
    fn test_nested_names_are_qualified() {
        let runtime = Runtime::new();
        let outer = runtime.define_module("Outer", None).unwrap();
        let inner = runtime.define_class("Inner", None, Some(&outer)).unwrap();
        assert_eq!(inner.name, "Outer::Inner");
        assert!(runtime.resolve_path("Outer::Inner").is_some());
        assert!(runtime.resolve_path("Inner").is_none());
        runtime.teardown();
    }

    #[test]
    fn test_super_lookup_skips_to_next_owner() {
        let runtime = Runtime::new();
        let base = runtime.define_class("Base", None, None).unwrap();
        let child = runtime.define_class("Child", Some(&base), None).unwrap();
        fn one(_: &mut dyn ValueCaller, _: &Value, _: &[Value], _: Option<&Value>) -> NativeResult {
            Ok(Value::Integer(1))
        }
        base.define_native("go", one);
        child.define_native("go", one);

        let object = runtime.new_object(&child);
        let entry = runtime.find_method(&object, "go").unwrap();
        assert!(Rc::ptr_eq(&entry.info.owner, &child));
        let parent = runtime.find_super_method(&object, &entry.info).unwrap();
        assert!(Rc::ptr_eq(&parent.info.owner, &base));
        assert!(runtime.find_super_method(&object, &parent.info).is_none());
        runtime.teardown();
    }

    #[test]
    fn test_materialize_uses_builtin_class() {
        let runtime = Runtime::new();
        let exception = runtime.materialize(NativeError::argument("bad"));
        assert_eq!(runtime.class_of(&exception).name, "ArgumentError");
        assert_eq!(runtime.exception_message(&exception), "bad");
        runtime.teardown();
    }
}
