use super::caller::{HostFunction, NativeFn};
use crate::compiler::FunctionConstant;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A runtime value
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Mutable byte string; no encoding is assumed
    String(Rc<RefCell<Vec<u8>>>),
    Symbol(Arc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<RHash>>),
    Range(i64, i64, bool),
    Proc(Rc<Proc>),
    /// Classes and modules
    Class(Rc<Class>),
    Object(Rc<RefCell<Object>>),
}

impl Value {
    pub fn string(bytes: impl Into<Vec<u8>>) -> Value {
        Value::String(Rc::new(RefCell::new(bytes.into())))
    }

    pub fn str(text: &str) -> Value {
        Value::string(text.as_bytes().to_vec())
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(super::interner::intern(name))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value as a float, integers widened
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<Class>> {
        match self {
            Value::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_proc(&self) -> Option<&Rc<Proc>> {
        match self {
            Value::Proc(p) => Some(p),
            _ => None,
        }
    }

    /// String contents, lossily decoded
    pub fn string_lossy(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(String::from_utf8_lossy(&s.borrow()).into_owned()),
            _ => None,
        }
    }

    /// Address used for identity comparisons and GC tracking; 0 for immediates
    pub fn identity(&self) -> usize {
        match self {
            Value::String(s) => Rc::as_ptr(s) as *const () as usize,
            Value::Array(a) => Rc::as_ptr(a) as *const () as usize,
            Value::Hash(h) => Rc::as_ptr(h) as *const () as usize,
            Value::Proc(p) => Rc::as_ptr(p) as *const () as usize,
            Value::Class(c) => Rc::as_ptr(c) as *const () as usize,
            Value::Object(o) => Rc::as_ptr(o) as *const () as usize,
            _ => 0,
        }
    }

    /// `equal?`: same object, or the same immediate value
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Range(a1, b1, e1), Value::Range(a2, b2, e2)) => {
                a1 == a2 && b1 == b2 && e1 == e2
            }
            _ => {
                let id = self.identity();
                id != 0 && id == other.identity()
            }
        }
    }

    /// Structural `to_s` for values that do not dispatch to user code
    pub fn to_s(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::String(s) => String::from_utf8_lossy(&s.borrow()).into_owned(),
            Value::Symbol(s) => s.to_string(),
            Value::Class(c) => c.name.clone(),
            _ => self.inspect(),
        }
    }

    /// Structural `inspect`
    pub fn inspect(&self) -> String {
        let mut seen = FxHashSet::default();
        self.inspect_guarded(&mut seen)
    }

    fn inspect_guarded(&self, seen: &mut FxHashSet<usize>) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => inspect_bytes(&s.borrow()),
            Value::Symbol(s) => format!(":{}", s),
            Value::Range(a, b, exclusive) => {
                format!("{}{}{}", a, if *exclusive { "..." } else { ".." }, b)
            }
            Value::Array(items) => {
                if !seen.insert(self.identity()) {
                    return "[...]".to_string();
                }
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| v.inspect_guarded(seen))
                    .collect();
                seen.remove(&self.identity());
                format!("[{}]", parts.join(", "))
            }
            Value::Hash(hash) => {
                if !seen.insert(self.identity()) {
                    return "{...}".to_string();
                }
                let parts: Vec<String> = hash
                    .borrow()
                    .iter()
                    .map(|(k, v)| match k {
                        Value::Symbol(name) => format!("{}: {}", name, v.inspect_guarded(seen)),
                        _ => format!("{} => {}", k.inspect_guarded(seen), v.inspect_guarded(seen)),
                    })
                    .collect();
                seen.remove(&self.identity());
                if parts.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{{}}}", parts.join(", "))
                }
            }
            Value::Proc(p) => {
                if p.is_lambda {
                    "#<Proc (lambda)>".to_string()
                } else {
                    "#<Proc>".to_string()
                }
            }
            Value::Class(c) => c.name.clone(),
            Value::Object(obj) => {
                if !seen.insert(self.identity()) {
                    return "#<...>".to_string();
                }
                let obj_ref = obj.borrow();
                let text = if let Some(message) = obj_ref.ivars.get("@message") {
                    format!("#<{}: {}>", obj_ref.class.name, message.to_s())
                } else if obj_ref.ivars.is_empty() {
                    format!("#<{}>", obj_ref.class.name)
                } else {
                    let ivars: Vec<String> = obj_ref
                        .ivars
                        .iter()
                        .filter(|(name, _)| !name.starts_with("@__"))
                        .map(|(name, v)| format!("{}={}", name, v.inspect_guarded(seen)))
                        .collect();
                    format!("#<{} {}>", obj_ref.class.name, ivars.join(", "))
                };
                seen.remove(&self.identity());
                text
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inspect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_s())
    }
}

/// Float formatting with a trailing `.0` for whole numbers
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Double-quoted representation with escapes
pub fn inspect_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("\"");
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                '\u{1b}' => out.push_str("\\e"),
                '#' => out.push('#'),
                c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
                c => out.push(c),
            }
        }
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{:02X}", byte));
        }
    }
    out.push('"');
    out
}

// ==================== Hash ====================

/// Key identity for hash lookups (`eql?` semantics: 1 and 1.0 differ)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(u64),
    String(Vec<u8>),
    Symbol(Arc<str>),
    Array(Vec<HashKey>),
    Range(i64, i64, bool),
    Identity(usize),
}

impl HashKey {
    pub fn from_value(value: &Value) -> HashKey {
        match value {
            Value::Nil => HashKey::Nil,
            Value::Bool(b) => HashKey::Bool(*b),
            Value::Integer(n) => HashKey::Integer(*n),
            Value::Float(f) => HashKey::Float(f.to_bits()),
            Value::String(s) => HashKey::String(s.borrow().clone()),
            Value::Symbol(s) => HashKey::Symbol(s.clone()),
            Value::Array(items) => {
                HashKey::Array(items.borrow().iter().map(HashKey::from_value).collect())
            }
            Value::Range(a, b, e) => HashKey::Range(*a, *b, *e),
            other => HashKey::Identity(other.identity()),
        }
    }
}

/// Insertion-ordered hash table
#[derive(Clone, Default)]
pub struct RHash {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<HashKey, usize>,
    pub default: Value,
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl RHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index
            .get(&HashKey::from_value(key))
            .map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(&HashKey::from_value(key))
    }

    /// Insert or replace; string keys are copied so later mutation cannot move them
    pub fn insert(&mut self, key: Value, value: Value) {
        let hash_key = HashKey::from_value(&key);
        if let Some(&i) = self.index.get(&hash_key) {
            self.entries[i].1 = value;
            return;
        }
        let key = match key {
            Value::String(s) => Value::string(s.borrow().clone()),
            other => other,
        };
        self.index.insert(hash_key, self.entries.len());
        self.entries.push((key, value));
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let i = self.index.remove(&HashKey::from_value(key))?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries.clone()
    }
}

// ==================== Procs and environments ====================

/// Local variable storage of one method or block activation
pub struct Env {
    pub slots: RefCell<Vec<Value>>,
    /// Environment of the enclosing block or method, for blocks
    pub parent: Option<Rc<Env>>,
}

impl Env {
    pub fn new(size: usize, parent: Option<Rc<Env>>) -> Self {
        Self {
            slots: RefCell::new(vec![Value::Nil; size]),
            parent,
        }
    }

    /// Walk `depth` environments outward
    pub fn ancestor(self: &Rc<Self>, depth: usize) -> Option<Rc<Env>> {
        let mut env = self.clone();
        for _ in 0..depth {
            env = env.parent.clone()?;
        }
        Some(env)
    }
}

/// Lexical class nesting used for constant lookup and `def`
pub struct Cref {
    pub class: Rc<Class>,
    pub parent: Option<Rc<Cref>>,
}

/// The method a frame is executing, for `super`
pub struct MethodInfo {
    pub owner: Rc<Class>,
    pub name: Arc<str>,
    pub singleton: bool,
}

#[derive(Clone)]
pub enum ProcBody {
    Block {
        function: Rc<FunctionConstant>,
        env: Rc<Env>,
        self_value: Value,
        cref: Rc<Cref>,
        method: Option<Rc<MethodInfo>>,
        /// Block of the frame that created this one; target of `yield` inside it
        outer_block: Value,
    },
    /// `&:name`
    Symbol(Arc<str>),
}

pub struct Proc {
    pub body: ProcBody,
    pub is_lambda: bool,
}

impl Proc {
    pub fn arity(&self) -> i64 {
        match &self.body {
            ProcBody::Block { function, .. } => {
                if self.is_lambda {
                    function.arity()
                } else if function.optional > 0 || function.rest {
                    -(function.required as i64) - 1
                } else {
                    function.required as i64
                }
            }
            ProcBody::Symbol(_) => -2,
        }
    }
}

// ==================== Classes and objects ====================

#[derive(Clone)]
pub enum Method {
    User {
        function: Rc<FunctionConstant>,
        cref: Rc<Cref>,
    },
    Native(NativeFn),
    Host(Rc<dyn HostFunction>),
    AttrReader(Arc<str>),
    AttrWriter(Arc<str>),
}

pub struct Class {
    /// Fully qualified, e.g. `Outer::Inner`
    pub name: String,
    pub is_module: bool,
    pub superclass: Option<Rc<Class>>,
    pub methods: RefCell<FxHashMap<Arc<str>, Method>>,
    pub singleton_methods: RefCell<FxHashMap<Arc<str>, Method>>,
    pub constants: RefCell<FxHashMap<Arc<str>, Value>>,
    pub ivars: RefCell<FxHashMap<Arc<str>, Value>>,
    /// Included modules, in inclusion order
    pub includes: RefCell<Vec<Rc<Class>>>,
    /// Modules extended into the singleton
    pub extends: RefCell<Vec<Rc<Class>>>,
    pub private_methods: RefCell<FxHashSet<Arc<str>>>,
    /// Set by a bare `private` in the class body
    pub default_private: Cell<bool>,
}

impl Class {
    pub fn new(name: impl Into<String>, superclass: Option<Rc<Class>>, is_module: bool) -> Self {
        Self {
            name: name.into(),
            is_module,
            superclass,
            methods: RefCell::new(FxHashMap::default()),
            singleton_methods: RefCell::new(FxHashMap::default()),
            constants: RefCell::new(FxHashMap::default()),
            ivars: RefCell::new(FxHashMap::default()),
            includes: RefCell::new(Vec::new()),
            extends: RefCell::new(Vec::new()),
            private_methods: RefCell::new(FxHashSet::default()),
            default_private: Cell::new(false),
        }
    }

    pub fn define_native(&self, name: &str, function: NativeFn) {
        self.methods
            .borrow_mut()
            .insert(super::interner::intern(name), Method::Native(function));
    }

    pub fn define_singleton_native(&self, name: &str, function: NativeFn) {
        self.singleton_methods
            .borrow_mut()
            .insert(super::interner::intern(name), Method::Native(function));
    }

    /// Linearized ancestors: the class, its modules (latest first), then the superclass chain
    pub fn ancestors(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut out: Vec<Rc<Class>> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(class) = current {
            push_unique(&mut out, &class);
            for module in class.includes.borrow().iter().rev() {
                for ancestor in module.ancestors() {
                    push_unique(&mut out, &ancestor);
                }
            }
            current = class.superclass.clone();
        }
        out
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.ancestors().iter().any(|c| Rc::ptr_eq(c, other))
    }

    /// Drop every table entry; breaks class <-> method cycles on teardown
    pub fn clear(&self) {
        self.methods.borrow_mut().clear();
        self.singleton_methods.borrow_mut().clear();
        self.constants.borrow_mut().clear();
        self.ivars.borrow_mut().clear();
        self.includes.borrow_mut().clear();
        self.extends.borrow_mut().clear();
    }
}

fn push_unique(out: &mut Vec<Rc<Class>>, class: &Rc<Class>) {
    if !out.iter().any(|c| Rc::ptr_eq(c, class)) {
        out.push(class.clone());
    }
}

pub struct Object {
    pub class: Rc<Class>,
    pub ivars: FxHashMap<Arc<str>, Value>,
}

impl Object {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            ivars: FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }

    #[test]
    fn test_hash_keeps_insertion_order_and_distinguishes_int_float() {
        let mut hash = RHash::new();
        hash.insert(Value::str("b"), Value::Integer(1));
        hash.insert(Value::Integer(1), Value::Integer(2));
        hash.insert(Value::Float(1.0), Value::Integer(3));
        hash.insert(Value::str("b"), Value::Integer(4));
        assert_eq!(hash.len(), 3);
        assert_eq!(hash.get(&Value::str("b")).and_then(Value::as_integer), Some(4));
        assert_eq!(hash.get(&Value::Integer(1)).and_then(Value::as_integer), Some(2));
        assert_eq!(hash.get(&Value::Float(1.0)).and_then(Value::as_integer), Some(3));

        hash.remove(&Value::Integer(1));
        let keys: Vec<String> = hash.keys().iter().map(Value::inspect).collect();
        assert_eq!(keys, vec!["\"b\"", "1.0"]);
        assert_eq!(hash.get(&Value::Float(1.0)).and_then(Value::as_integer), Some(3));
    }

    #[test]
    fn test_string_keys_are_copied() {
        let mut hash = RHash::new();
        let key = Value::str("k");
        hash.insert(key.clone(), Value::Nil);
        if let Value::String(s) = &key {
            s.borrow_mut().push(b'!');
        }
        assert!(hash.contains_key(&Value::str("k")));
    }

    #[test]
    fn test_inspect_formats() {
        assert_eq!(Value::Float(6.5).inspect(), "6.5");
        assert_eq!(Value::Float(3.0).inspect(), "3.0");
        assert_eq!(Value::string(b"a\"\n\xff".to_vec()).inspect(), "\"a\\\"\\n\\xFF\"");
        let array = Value::Array(Rc::new(RefCell::new(vec![
            Value::Integer(1),
            Value::symbol("x"),
            Value::Nil,
        ])));
        assert_eq!(array.inspect(), "[1, :x, nil]");
    }

    #[test]
    fn test_self_referencing_array_inspect_terminates() {
        let array = Rc::new(RefCell::new(Vec::new()));
        array.borrow_mut().push(Value::Array(array.clone()));
        assert_eq!(Value::Array(array.clone()).inspect(), "[[...]]");
        array.borrow_mut().clear();
    }

    #[test]
    fn test_ancestors_include_modules_before_superclass() {
        let object = Rc::new(Class::new("Object", None, false));
        let mixin = Rc::new(Class::new("Mixin", None, true));
        let class = Rc::new(Class::new("Foo", Some(object.clone()), false));
        class.includes.borrow_mut().push(mixin.clone());
        let names: Vec<String> = class.ancestors().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["Foo", "Mixin", "Object"]);
        assert!(class.is_subclass_of(&object));
    }
}
