// Garnet Virtual Machine
// Stack-based VM executing compiled functions against a shared Runtime.
// One VM is created per host entry (script run, host call); nested calls
// made by natives and callbacks re-enter the same VM through ValueCaller.

use super::caller::{NativeError, NativeResult, ValueCaller};
use super::gc::Root;
use super::interner::intern;
use super::runtime::{MethodEntry, Runtime, MAX_NATIVE_DEPTH};
use super::value::{Cref, Env, Method, MethodInfo, Proc, ProcBody, RHash, Value};
use crate::builtins::numeric::{arith, compare_primitives, primitive_equal, ArithOp};
use crate::compiler::{class_flags, send_flags, Constant, FunctionConstant, OpCode};
use crate::error::{ErrorKind, StackFrame};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

const FRAMES_MAX: usize = 10_000;
/// Instructions between checks of the collection threshold
const GC_CHECK_INTERVAL: usize = 1024;

type Args = SmallVec<[Value; 8]>;

/// Call frame for one method, block, class body or program activation
struct CallFrame {
    function: Rc<FunctionConstant>,
    ip: usize,
    stack_base: usize,
    env: Rc<Env>,
    self_value: Value,
    /// Block passed to this activation, or nil
    block: Value,
    /// Positional arguments actually passed
    argc: usize,
    method: Option<Rc<MethodInfo>>,
    cref: Rc<Cref>,
    /// `class << obj` body: `def` targets the singleton
    define_singleton: bool,
    /// Identity of the proc this frame runs, 0 for non-blocks
    proc_id: usize,
    is_lambda: bool,
    /// Value of the call regardless of the body (attribute assignment)
    result_override: Option<Value>,
}

impl CallFrame {
    fn new(
        function: Rc<FunctionConstant>,
        stack_base: usize,
        env: Rc<Env>,
        self_value: Value,
        cref: Rc<Cref>,
    ) -> Self {
        Self {
            function,
            ip: 0,
            stack_base,
            env,
            self_value,
            block: Value::Nil,
            argc: 0,
            method: None,
            cref,
            define_singleton: false,
            proc_id: 0,
            is_lambda: false,
            result_override: None,
        }
    }

    fn line(&self) -> usize {
        self.function.chunk.get_line(self.ip.saturating_sub(1))
    }
}

/// Exception handler for begin/rescue
struct ExceptionHandler {
    frame_index: usize,
    stack_size: usize,
    catch_ip: usize,
}

pub struct VM {
    runtime: Rc<Runtime>,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<ExceptionHandler>,
    gc_counter: usize,
}

pub fn proc_identity(proc: &Rc<Proc>) -> usize {
    Rc::as_ptr(proc) as *const () as usize
}

fn block_identity(block: &Value) -> usize {
    match block {
        Value::Proc(proc) => proc_identity(proc),
        _ => 0,
    }
}

/// `1`, `1..2` or `1+`, as in argument count errors
pub fn expected_arity(function: &FunctionConstant) -> String {
    if function.rest {
        format!("{}+", function.required)
    } else if function.optional > 0 {
        format!("{}..{}", function.required, function.positional())
    } else {
        function.required.to_string()
    }
}

impl VM {
    pub fn new(runtime: Rc<Runtime>) -> Self {
        runtime.depth.set(runtime.depth.get() + 1);
        Self {
            runtime,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            handlers: Vec::new(),
            gc_counter: 0,
        }
    }

    fn toplevel_cref(&self) -> Rc<Cref> {
        Rc::new(Cref {
            class: self.runtime.builtins.object.clone(),
            parent: None,
        })
    }

    /// Run a compiled program with `self` = main
    pub fn run_function(&mut self, function: Rc<FunctionConstant>) -> NativeResult {
        if self.runtime.trace.get() {
            eprintln!(
                "[VM] run {} ({}, {} bytes)",
                function.name,
                function.file,
                function.chunk.code.len()
            );
        }
        let env = self.runtime.new_env(function.local_count, None);
        let base = self.frames.len();
        let cref = self.toplevel_cref();
        let main = self.runtime.main.clone();
        self.frames
            .push(CallFrame::new(function, self.stack.len(), env, main, cref));
        self.execute(base)
    }

    /// Wrap a compiled program in a proc without running it
    pub fn program_proc(&self, function: Rc<FunctionConstant>) -> Value {
        Value::Proc(Rc::new(Proc {
            body: ProcBody::Block {
                function,
                env: Rc::new(Env::new(0, None)),
                self_value: self.runtime.main.clone(),
                cref: self.toplevel_cref(),
                method: None,
                outer_block: Value::Nil,
            },
            is_lambda: false,
        }))
    }

    // ==================== Execution loop ====================

    fn execute(&mut self, base: usize) -> NativeResult {
        loop {
            match self.run(base) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if let Some(value) = self.unwind(error, base)? {
                        return Ok(value);
                    }
                }
            }
        }
    }

    fn run(&mut self, base: usize) -> NativeResult {
        loop {
            self.gc_counter += 1;
            if self.gc_counter >= GC_CHECK_INTERVAL || self.runtime.gc_requested.get() {
                self.gc_counter = 0;
                self.maybe_collect_garbage();
            }

            let opcode = OpCode::from(self.read_byte());
            match opcode {
                OpCode::Constant => {
                    let idx = self.read_u16() as usize;
                    let value = match &self.frame().function.chunk.constants[idx] {
                        Constant::Integer(n) => Value::Integer(*n),
                        Constant::Float(f) => Value::Float(*f),
                        Constant::String(bytes) => Value::string(bytes.clone()),
                        Constant::Symbol(name) => Value::Symbol(name.clone()),
                        Constant::Function(_) => Value::Nil,
                    };
                    self.push(value);
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let value = self.peek(0);
                    self.push(value);
                }
                OpCode::Pick => {
                    let distance = self.read_byte() as usize;
                    let value = self.peek(distance);
                    self.push(value);
                }
                OpCode::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                OpCode::Slide => {
                    let count = self.read_byte() as usize;
                    let top = self.pop();
                    let len = self.stack.len();
                    self.stack.truncate(len - count);
                    self.push(top);
                }

                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::PushSelf => {
                    let value = self.frame().self_value.clone();
                    self.push(value);
                }

                OpCode::GetLocal => {
                    let slot = self.read_u16() as usize;
                    let value = self.frame().env.slots.borrow().get(slot).cloned();
                    self.push(value.unwrap_or(Value::Nil));
                }
                OpCode::SetLocal => {
                    let slot = self.read_u16() as usize;
                    let value = self.peek(0);
                    if let Some(target) = self.frame().env.slots.borrow_mut().get_mut(slot) {
                        *target = value;
                    }
                }
                OpCode::GetUpvalue => {
                    let depth = self.read_byte() as usize;
                    let slot = self.read_u16() as usize;
                    let env = self.frame().env.ancestor(depth);
                    let value = env.and_then(|env| {
                        let value = env.slots.borrow().get(slot).cloned();
                        value
                    });
                    self.push(value.unwrap_or(Value::Nil));
                }
                OpCode::SetUpvalue => {
                    let depth = self.read_byte() as usize;
                    let slot = self.read_u16() as usize;
                    let value = self.peek(0);
                    if let Some(env) = self.frame().env.ancestor(depth) {
                        if let Some(target) = env.slots.borrow_mut().get_mut(slot) {
                            *target = value;
                        }
                    }
                }
                OpCode::GetIvar => {
                    let name = self.read_symbol();
                    let value = get_ivar(&self.frame().self_value, &name);
                    self.push(value);
                }
                OpCode::SetIvar => {
                    let name = self.read_symbol();
                    let value = self.peek(0);
                    let receiver = self.frame().self_value.clone();
                    self.set_ivar(&receiver, name, value)?;
                }
                OpCode::GetGlobal => {
                    let name = self.read_symbol();
                    let value = self.runtime.globals.borrow().get(&name).cloned();
                    self.push(value.unwrap_or(Value::Nil));
                }
                OpCode::SetGlobal => {
                    let name = self.read_symbol();
                    let value = self.peek(0);
                    self.runtime.globals.borrow_mut().insert(name, value);
                }
                OpCode::GetConst => {
                    let name = self.read_symbol();
                    let value = self.runtime.lookup_const(&self.frame().cref, &name);
                    match value {
                        Some(value) => self.push(value),
                        None => {
                            return Err(NativeError::Raise(
                                ErrorKind::NameError,
                                format!("uninitialized constant {}", name),
                            ))
                        }
                    }
                }
                OpCode::SetConst => {
                    let name = self.read_symbol();
                    let value = self.peek(0);
                    self.frame()
                        .cref
                        .class
                        .constants
                        .borrow_mut()
                        .insert(name, value);
                }
                OpCode::GetScopedConst => {
                    let name = self.read_symbol();
                    let scope = self.pop();
                    let Value::Class(class) = &scope else {
                        return Err(NativeError::type_error(format!(
                            "{} is not a class/module",
                            scope.inspect()
                        )));
                    };
                    match self.runtime.scoped_const(class, &name) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(NativeError::Raise(
                                ErrorKind::NameError,
                                format!("uninitialized constant {}::{}", class.name, name),
                            ))
                        }
                    }
                }

                OpCode::Add => self.binary_arith(ArithOp::Add, "+")?,
                OpCode::Sub => self.binary_arith(ArithOp::Sub, "-")?,
                OpCode::Mul => self.binary_arith(ArithOp::Mul, "*")?,
                OpCode::Div => self.binary_arith(ArithOp::Div, "/")?,
                OpCode::Mod => self.binary_arith(ArithOp::Mod, "%")?,
                OpCode::Less => self.comparison(|o| o == Ordering::Less, "<")?,
                OpCode::LessEqual => self.comparison(|o| o != Ordering::Greater, "<=")?,
                OpCode::Greater => self.comparison(|o| o == Ordering::Greater, ">")?,
                OpCode::GreaterEqual => self.comparison(|o| o != Ordering::Less, ">=")?,
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    match primitive_equal(&a, &b) {
                        Some(equal) => self.push(Value::Bool(equal)),
                        None => self.send_value(a, "==", &[b], None, 0)?,
                    }
                }
                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Integer(n) => match n.checked_neg() {
                            Some(n) => self.push(Value::Integer(n)),
                            None => {
                                return Err(NativeError::Raise(
                                    ErrorKind::RangeError,
                                    "integer overflow".to_string(),
                                ))
                            }
                        },
                        Value::Float(f) => self.push(Value::Float(-f)),
                        other => self.send_value(other, "-@", &[], None, 0)?,
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(!value.is_truthy()));
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if !self.pop().is_truthy() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_u16() as usize;
                    if self.pop().is_truthy() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                OpCode::BuildString => {
                    let count = self.read_u16() as usize;
                    let start = self.stack.len() - count;
                    let mut out = Vec::new();
                    for i in start..self.stack.len() {
                        let part = self.stack[i].clone();
                        match part {
                            Value::String(bytes) => out.extend_from_slice(&bytes.borrow()),
                            other => {
                                let text = self.call_sync(&other, "to_s", Vec::new())?;
                                match text {
                                    Value::String(bytes) => out.extend_from_slice(&bytes.borrow()),
                                    other => out.extend_from_slice(other.inspect().as_bytes()),
                                }
                            }
                        }
                    }
                    self.stack.truncate(start);
                    self.push(Value::string(out));
                }
                OpCode::BuildArray => {
                    let count = self.read_u16() as usize;
                    let items = self.stack.split_off(self.stack.len() - count);
                    let array = self.runtime.new_array(items);
                    self.push(array);
                }
                OpCode::ArrayPush => {
                    let value = self.pop();
                    if let Value::Array(items) = self.peek(0) {
                        items.borrow_mut().push(value);
                    }
                }
                OpCode::ArrayConcat => {
                    let value = self.pop();
                    let splatted = splat_values(&value);
                    if let Value::Array(items) = self.peek(0) {
                        items.borrow_mut().extend(splatted);
                    }
                }
                OpCode::BuildHash => {
                    let count = self.read_u16() as usize;
                    let items = self.stack.split_off(self.stack.len() - count * 2);
                    let mut hash = RHash::new();
                    let mut items = items.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        hash.insert(key, value);
                    }
                    let hash = self.runtime.new_hash(hash);
                    self.push(hash);
                }
                OpCode::BuildRange => {
                    let exclusive = self.read_byte() != 0;
                    let end = self.pop();
                    let start = self.pop();
                    match (&start, &end) {
                        (Value::Integer(a), Value::Integer(b)) => {
                            self.push(Value::Range(*a, *b, exclusive))
                        }
                        _ => return Err(NativeError::argument("bad value for range")),
                    }
                }
                OpCode::ExpandArray => {
                    let count = self.read_byte() as usize;
                    let value = self.pop();
                    let items = match &value {
                        Value::Array(items) => items.borrow().clone(),
                        Value::Nil => Vec::new(),
                        other => vec![other.clone()],
                    };
                    for i in 0..count {
                        self.push(items.get(i).cloned().unwrap_or(Value::Nil));
                    }
                }

                OpCode::Send => {
                    let name = self.read_symbol();
                    let argc = self.read_byte() as usize;
                    let flags = self.read_byte();
                    let block = if flags & send_flags::HAS_BLOCK != 0 {
                        Some(self.pop()).filter(|block| !block.is_nil())
                    } else {
                        None
                    };
                    let args = self.pop_args(argc, flags & send_flags::SPLAT != 0);
                    let receiver = self.pop();
                    self.send_value(receiver, &name, &args, block, flags)?;
                }
                OpCode::Super => {
                    let argc = self.read_byte() as usize;
                    let flags = self.read_byte();
                    let explicit_block = if flags & send_flags::HAS_BLOCK != 0 {
                        Some(self.pop())
                    } else {
                        None
                    };
                    let args = self.pop_args(argc, flags & send_flags::SPLAT != 0);
                    self.call_super(&args, explicit_block)?;
                }
                OpCode::Yield => {
                    let argc = self.read_byte() as usize;
                    let flags = self.read_byte();
                    let args = self.pop_args(argc, flags & send_flags::SPLAT != 0);
                    let block = self.frame().block.clone();
                    if block.is_nil() {
                        return Err(NativeError::Raise(
                            ErrorKind::LocalJumpError,
                            "no block given (yield)".to_string(),
                        ));
                    }
                    self.push_proc_call(&block, &args, None)?;
                }
                OpCode::BlockGiven => {
                    let given = !self.frame().block.is_nil();
                    self.push(Value::Bool(given));
                }
                OpCode::MakeBlock => {
                    let function = self.read_function()?;
                    let frame = self.frame();
                    self.runtime.capture_env(&frame.env);
                    let proc = Proc {
                        body: ProcBody::Block {
                            function,
                            env: frame.env.clone(),
                            self_value: frame.self_value.clone(),
                            cref: frame.cref.clone(),
                            method: frame.method.clone(),
                            outer_block: frame.block.clone(),
                        },
                        is_lambda: false,
                    };
                    self.push(Value::Proc(Rc::new(proc)));
                }
                OpCode::ToProc => {
                    let value = self.pop();
                    let proc = self.to_proc(value)?;
                    self.push(proc);
                }
                OpCode::ArgGiven => {
                    let index = self.read_byte() as usize;
                    let offset = self.read_u16() as usize;
                    if self.frame().argc > index {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Return => {
                    let value = self.pop();
                    if let Some(result) = self.return_from_frame(value, base) {
                        return Ok(result);
                    }
                }
                OpCode::BlockBreak => {
                    let value = self.pop();
                    let (is_lambda, proc_id) = (self.frame().is_lambda, self.frame().proc_id);
                    if is_lambda {
                        if let Some(result) = self.return_from_frame(value, base) {
                            return Ok(result);
                        }
                    } else if proc_id == 0 {
                        return Err(NativeError::Raise(
                            ErrorKind::LocalJumpError,
                            "break from proc-closure".to_string(),
                        ));
                    } else {
                        return Err(NativeError::Break(proc_id, value));
                    }
                }

                OpCode::DefMethod => {
                    let name = self.read_symbol();
                    let function = self.read_function()?;
                    let frame = self.frame();
                    let class = frame.cref.class.clone();
                    let method = Method::User {
                        function,
                        cref: frame.cref.clone(),
                    };
                    if frame.define_singleton {
                        class
                            .singleton_methods
                            .borrow_mut()
                            .insert(name.clone(), method);
                    } else {
                        class.methods.borrow_mut().insert(name.clone(), method);
                        let mut private = class.private_methods.borrow_mut();
                        if class.default_private.get() {
                            private.insert(name.clone());
                        } else {
                            private.remove(&name);
                        }
                    }
                    self.push(Value::Symbol(name));
                }
                OpCode::DefSingletonMethod => {
                    let name = self.read_symbol();
                    let function = self.read_function()?;
                    let target = self.pop();
                    let Value::Class(class) = &target else {
                        return Err(NativeError::type_error(format!(
                            "can't define singleton method for {}",
                            self.runtime.describe(&target)
                        )));
                    };
                    let method = Method::User {
                        function,
                        cref: self.frame().cref.clone(),
                    };
                    class
                        .singleton_methods
                        .borrow_mut()
                        .insert(name.clone(), method);
                    self.push(Value::Symbol(name));
                }
                OpCode::DefClass => {
                    let name = self.read_symbol();
                    let body = self.read_function()?;
                    let flags = self.read_byte();
                    self.define_class(&name, body, flags)?;
                }
                OpCode::SingletonClass => {
                    let body = self.read_function()?;
                    let target = self.pop();
                    let Value::Class(class) = &target else {
                        return Err(NativeError::type_error(format!(
                            "singleton class is not available for {}",
                            self.runtime.describe(&target)
                        )));
                    };
                    let cref = Rc::new(Cref {
                        class: class.clone(),
                        parent: Some(self.frame().cref.clone()),
                    });
                    let env = self.runtime.new_env(body.local_count, None);
                    let mut frame =
                        CallFrame::new(body, self.stack.len(), env, target.clone(), cref);
                    frame.define_singleton = true;
                    self.push_frame(frame)?;
                }

                OpCode::TryStart => {
                    let offset = self.read_u16() as usize;
                    let catch_ip = self.frame().ip + offset;
                    self.handlers.push(ExceptionHandler {
                        frame_index: self.frames.len() - 1,
                        stack_size: self.stack.len(),
                        catch_ip,
                    });
                }
                OpCode::TryEnd => {
                    self.handlers.pop();
                }
                OpCode::Throw => {
                    let exception = self.pop();
                    if self
                        .runtime
                        .is_kind_of(&exception, &self.runtime.builtins.exception)
                    {
                        return Err(NativeError::Exception(exception));
                    }
                    return Err(NativeError::type_error("exception class/object expected"));
                }
                OpCode::RescueMatch => {
                    let count = self.read_byte() as usize;
                    let classes = self.stack.split_off(self.stack.len() - count);
                    let exception = self.pop();
                    let matched = if classes.is_empty() {
                        self.runtime
                            .is_kind_of(&exception, &self.runtime.builtins.standard_error)
                    } else {
                        let mut matched = false;
                        for class in &classes {
                            let Value::Class(class) = class else {
                                return Err(NativeError::type_error(
                                    "class or module required for rescue clause",
                                ));
                            };
                            if self.runtime.is_kind_of(&exception, class) {
                                matched = true;
                                break;
                            }
                        }
                        matched
                    };
                    self.push(Value::Bool(matched));
                }
            }
        }
    }

    /// Pop the current frame; returns the value when the execution at `base` is complete
    fn return_from_frame(&mut self, value: Value, base: usize) -> Option<Value> {
        let frame = self.frames.pop()?;
        self.drop_handlers_above(self.frames.len());
        self.stack.truncate(frame.stack_base);
        let result = frame.result_override.unwrap_or(value);
        if self.frames.len() <= base {
            return Some(result);
        }
        self.push(result);
        None
    }

    fn drop_handlers_above(&mut self, frame_count: usize) {
        while self
            .handlers
            .last()
            .is_some_and(|handler| handler.frame_index >= frame_count)
        {
            self.handlers.pop();
        }
    }

    /// Route an error to a handler, a breaking frame, or out of this execution
    fn unwind(&mut self, error: NativeError, base: usize) -> Result<Option<Value>, NativeError> {
        let exception = match error {
            NativeError::Break(id, value) => return self.unwind_break(id, value, base),
            other => self.runtime.materialize(other),
        };
        self.runtime
            .set_backtrace_once(&exception, self.backtrace());

        let usable = self
            .handlers
            .last()
            .is_some_and(|h| h.frame_index >= base && h.frame_index < self.frames.len());
        if usable {
            if let Some(handler) = self.handlers.pop() {
                self.frames.truncate(handler.frame_index + 1);
                self.stack.truncate(handler.stack_size);
                self.push(exception);
                self.frame_mut().ip = handler.catch_ip;
                return Ok(None);
            }
        }

        self.abandon(base);
        Err(NativeError::Exception(exception))
    }

    fn unwind_break(
        &mut self,
        id: usize,
        value: Value,
        base: usize,
    ) -> Result<Option<Value>, NativeError> {
        let target = (base..self.frames.len())
            .rev()
            .find(|&i| block_identity(&self.frames[i].block) == id);
        let Some(index) = target else {
            self.abandon(base);
            return Err(NativeError::Break(id, value));
        };

        let stack_base = self.frames[index].stack_base;
        self.frames.truncate(index);
        self.stack.truncate(stack_base);
        self.drop_handlers_above(index);
        if self.frames.len() <= base {
            return Ok(Some(value));
        }
        self.push(value);
        Ok(None)
    }

    /// Discard everything this execution pushed
    fn abandon(&mut self, base: usize) {
        if let Some(frame) = self.frames.get(base) {
            self.stack.truncate(frame.stack_base);
        }
        self.frames.truncate(base);
        self.drop_handlers_above(base);
    }

    fn backtrace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                StackFrame::new(&frame.function.name, &frame.function.file, frame.line(), 0)
                    .to_string()
            })
            .collect()
    }

    // ==================== Calls ====================

    /// Dispatch a message; pushes either a frame or the result
    fn send_value(
        &mut self,
        receiver: Value,
        name: &str,
        args: &[Value],
        block: Option<Value>,
        flags: u8,
    ) -> Result<(), NativeError> {
        let Some(entry) = self.runtime.find_method(&receiver, name) else {
            return self.method_missing(receiver, name, args, block, flags);
        };
        if entry.private && flags & send_flags::FCALL == 0 {
            return Err(NativeError::Raise(
                ErrorKind::NoMethodError,
                format!(
                    "private method '{}' called for {}",
                    name,
                    self.runtime.describe(&receiver)
                ),
            ));
        }
        self.invoke(entry, receiver, args, block, flags)
    }

    fn method_missing(
        &mut self,
        receiver: Value,
        name: &str,
        args: &[Value],
        block: Option<Value>,
        flags: u8,
    ) -> Result<(), NativeError> {
        if let Some(entry) = self.runtime.find_method(&receiver, "method_missing") {
            if matches!(entry.method, Method::User { .. }) {
                let mut forwarded: Args = SmallVec::new();
                forwarded.push(Value::symbol(name));
                forwarded.extend(args.iter().cloned());
                return self.invoke(entry, receiver, &forwarded, block, send_flags::FCALL);
            }
        }

        let described = self.runtime.describe(&receiver);
        if flags & send_flags::VCALL != 0 {
            return Err(NativeError::Raise(
                ErrorKind::NameError,
                format!("undefined local variable or method '{}' for {}", name, described),
            ));
        }
        Err(NativeError::Raise(
            ErrorKind::NoMethodError,
            format!("undefined method '{}' for {}", name, described),
        ))
    }

    fn invoke(
        &mut self,
        entry: MethodEntry,
        receiver: Value,
        args: &[Value],
        block: Option<Value>,
        flags: u8,
    ) -> Result<(), NativeError> {
        let result_override = if flags & send_flags::ATTRASGN != 0 {
            args.last().cloned()
        } else {
            None
        };

        let result = match entry.method {
            Method::User { function, cref } => {
                let env = self.runtime.new_env(function.local_count, None);
                let argc = self.bind_arguments(&function, &env, args, block.clone(), true)?;
                let mut frame = CallFrame::new(function, self.stack.len(), env, receiver, cref);
                frame.block = block.unwrap_or(Value::Nil);
                frame.argc = argc;
                frame.method = Some(entry.info);
                frame.result_override = result_override;
                return self.push_frame(frame);
            }
            Method::Native(function) => self.call_native(block.as_ref(), |vm, block| {
                function(vm, &receiver, args, block)
            })?,
            Method::Host(host) => self.call_native(block.as_ref(), |vm, block| {
                host.call(vm, &receiver, args, block)
            })?,
            Method::AttrReader(ivar) => {
                if !args.is_empty() {
                    return Err(NativeError::argument(format!(
                        "wrong number of arguments (given {}, expected 0)",
                        args.len()
                    )));
                }
                get_ivar(&receiver, &ivar)
            }
            Method::AttrWriter(ivar) => {
                let [value] = args else {
                    return Err(NativeError::argument(format!(
                        "wrong number of arguments (given {}, expected 1)",
                        args.len()
                    )));
                };
                self.set_ivar(&receiver, ivar, value.clone())?;
                value.clone()
            }
        };
        self.push(result_override.unwrap_or(result));
        Ok(())
    }

    /// Run a native with the native depth raised; a break aimed at `block` ends here
    fn call_native<F>(&mut self, block: Option<&Value>, f: F) -> NativeResult
    where
        F: FnOnce(&mut dyn ValueCaller, Option<&Value>) -> NativeResult,
    {
        let depth = self.runtime.native_depth.get();
        if depth >= MAX_NATIVE_DEPTH {
            return Err(NativeError::Raise(
                ErrorKind::SystemStackError,
                "stack level too deep".to_string(),
            ));
        }
        self.runtime.native_depth.set(depth + 1);
        let result = f(self, block);
        self.runtime.native_depth.set(depth);

        match result {
            Err(NativeError::Break(id, value)) if block.is_some_and(|b| block_identity(b) == id) => {
                Ok(value)
            }
            other => other,
        }
    }

    fn call_super(&mut self, args: &[Value], explicit_block: Option<Value>) -> Result<(), NativeError> {
        let frame = self.frame();
        let Some(info) = frame.method.clone() else {
            return Err(NativeError::Raise(
                ErrorKind::RuntimeError,
                "super called outside of method".to_string(),
            ));
        };
        let receiver = frame.self_value.clone();
        let block = explicit_block.unwrap_or_else(|| frame.block.clone());
        let block = (!block.is_nil()).then_some(block);

        match self.runtime.find_super_method(&receiver, &info) {
            Some(entry) => self.invoke(entry, receiver, args, block, send_flags::FCALL),
            None => Err(NativeError::Raise(
                ErrorKind::NoMethodError,
                format!(
                    "super: no superclass method '{}' for {}",
                    info.name,
                    self.runtime.describe(&receiver)
                ),
            )),
        }
    }

    /// Start a proc; pushes either a frame or the result
    fn push_proc_call(
        &mut self,
        callee: &Value,
        args: &[Value],
        block_arg: Option<Value>,
    ) -> Result<(), NativeError> {
        let Value::Proc(proc) = callee else {
            return Err(NativeError::type_error(format!(
                "{} is not a proc",
                self.runtime.describe(callee)
            )));
        };
        match &proc.body {
            ProcBody::Block {
                function,
                env,
                self_value,
                cref,
                method,
                outer_block,
            } => {
                let block_env = self.runtime.new_env(function.local_count, Some(env.clone()));
                let argc =
                    self.bind_arguments(function, &block_env, args, block_arg, proc.is_lambda)?;
                let mut frame = CallFrame::new(
                    function.clone(),
                    self.stack.len(),
                    block_env,
                    self_value.clone(),
                    cref.clone(),
                );
                frame.block = outer_block.clone();
                frame.argc = argc;
                frame.method = method.clone();
                frame.proc_id = proc_identity(proc);
                frame.is_lambda = proc.is_lambda;
                self.push_frame(frame)
            }
            ProcBody::Symbol(name) => {
                let Some((receiver, rest)) = args.split_first() else {
                    return Err(NativeError::argument("no receiver given"));
                };
                let name = name.clone();
                self.send_value(receiver.clone(), &name, rest, block_arg, 0)
            }
        }
    }

    fn push_frame(&mut self, frame: CallFrame) -> Result<(), NativeError> {
        if self.frames.len() >= FRAMES_MAX {
            return Err(NativeError::Raise(
                ErrorKind::SystemStackError,
                "stack level too deep".to_string(),
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Fill parameter slots; returns the number of positional arguments passed.
    /// Methods and lambdas are strict about arity, blocks pad and truncate.
    fn bind_arguments(
        &self,
        function: &FunctionConstant,
        env: &Env,
        args: &[Value],
        block: Option<Value>,
        strict: bool,
    ) -> Result<usize, NativeError> {
        let positional = function.positional();
        let splatted: Vec<Value>;
        let mut args = args;
        if !strict && args.len() == 1 && (positional > 1 || (function.rest && positional > 0)) {
            if let Value::Array(items) = &args[0] {
                splatted = items.borrow().clone();
                args = &splatted;
            }
        }

        if strict && (args.len() < function.required || (!function.rest && args.len() > positional))
        {
            return Err(NativeError::argument(format!(
                "wrong number of arguments (given {}, expected {})",
                args.len(),
                expected_arity(function)
            )));
        }

        let rest = if function.rest {
            let extra = args.get(positional..).map(<[Value]>::to_vec).unwrap_or_default();
            Some(self.runtime.new_array(extra))
        } else {
            None
        };

        let mut slots = env.slots.borrow_mut();
        for (slot, arg) in slots.iter_mut().zip(args.iter().take(positional)) {
            *slot = arg.clone();
        }
        let mut next = positional;
        if let Some(rest) = rest {
            if let Some(slot) = slots.get_mut(next) {
                *slot = rest;
            }
            next += 1;
        }
        if function.block_param {
            if let Some(slot) = slots.get_mut(next) {
                *slot = block.unwrap_or(Value::Nil);
            }
        }
        Ok(args.len().min(positional))
    }

    fn pop_args(&mut self, argc: usize, splat: bool) -> Args {
        if splat {
            return match self.pop() {
                Value::Array(items) => items.borrow().iter().cloned().collect(),
                other => splat_values(&other).into_iter().collect(),
            };
        }
        let start = self.stack.len() - argc;
        self.stack.drain(start..).collect()
    }

    /// Call a method from inside an instruction and wait for its result
    fn call_sync(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> NativeResult {
        self.call_native(None, |vm, _| vm.call_method(receiver, name, args, None))
    }

    fn finish_call(&mut self, base: usize) -> NativeResult {
        if self.frames.len() > base {
            self.execute(base)
        } else {
            Ok(self.pop())
        }
    }

    fn to_proc(&mut self, value: Value) -> NativeResult {
        match value {
            Value::Proc(_) | Value::Nil => Ok(value),
            Value::Symbol(name) => Ok(Value::Proc(Rc::new(Proc {
                body: ProcBody::Symbol(name),
                is_lambda: true,
            }))),
            other => {
                let converted = self.call_sync(&other, "to_proc", Vec::new())?;
                if matches!(converted, Value::Proc(_)) {
                    Ok(converted)
                } else {
                    Err(NativeError::type_error(format!(
                        "wrong argument type {} (expected Proc)",
                        self.runtime.class_of(&other).name
                    )))
                }
            }
        }
    }

    // ==================== Definitions ====================

    fn define_class(
        &mut self,
        name: &str,
        body: Rc<FunctionConstant>,
        flags: u8,
    ) -> Result<(), NativeError> {
        let superclass = if flags & class_flags::HAS_SUPER != 0 {
            match self.pop() {
                Value::Class(class) if !class.is_module => Some(class),
                _ => return Err(NativeError::type_error("superclass must be a Class")),
            }
        } else {
            None
        };
        let scope = if flags & class_flags::SCOPED != 0 {
            match self.pop() {
                Value::Class(class) => class,
                other => {
                    return Err(NativeError::type_error(format!(
                        "{} is not a class/module",
                        other.inspect()
                    )))
                }
            }
        } else {
            self.frame().cref.class.clone()
        };

        let class = if flags & class_flags::MODULE != 0 {
            self.runtime.define_module(name, Some(&scope))?
        } else {
            self.runtime
                .define_class(name, superclass.as_ref(), Some(&scope))?
        };
        class.default_private.set(false);

        let cref = Rc::new(Cref {
            class: class.clone(),
            parent: Some(self.frame().cref.clone()),
        });
        let env = self.runtime.new_env(body.local_count, None);
        let frame = CallFrame::new(body, self.stack.len(), env, Value::Class(class), cref);
        self.push_frame(frame)
    }

    // ==================== Operators ====================

    fn binary_arith(&mut self, op: ArithOp, name: &str) -> Result<(), NativeError> {
        let b = self.pop();
        let a = self.pop();
        if let Some(result) = arith(op, &a, &b) {
            self.push(result?);
            return Ok(());
        }
        if let (ArithOp::Add, Value::String(x), Value::String(y)) = (op, &a, &b) {
            let mut joined = x.borrow().clone();
            joined.extend_from_slice(&y.borrow());
            self.push(Value::string(joined));
            return Ok(());
        }
        self.send_value(a, name, &[b], None, 0)
    }

    fn comparison(&mut self, test: fn(Ordering) -> bool, name: &str) -> Result<(), NativeError> {
        let b = self.pop();
        let a = self.pop();
        match compare_primitives(&a, &b) {
            Some(Some(ordering)) => self.push(Value::Bool(test(ordering))),
            // NaN on either side
            Some(None) => self.push(Value::Bool(false)),
            None => self.send_value(a, name, &[b], None, 0)?,
        }
        Ok(())
    }

    fn set_ivar(&self, receiver: &Value, name: Arc<str>, value: Value) -> Result<(), NativeError> {
        match receiver {
            Value::Object(object) => {
                object.borrow_mut().ivars.insert(name, value);
                Ok(())
            }
            Value::Class(class) => {
                class.ivars.borrow_mut().insert(name, value);
                Ok(())
            }
            other => Err(NativeError::Raise(
                ErrorKind::FrozenError,
                format!("can't modify frozen {}", self.runtime.class_of(other).name),
            )),
        }
    }

    // ==================== GC ====================

    fn maybe_collect_garbage(&mut self) {
        if !self.runtime.at_safe_point() {
            return;
        }
        let requested = self.runtime.gc_requested.get();
        if requested || self.runtime.gc.borrow().should_collect() {
            self.runtime.collect_garbage(self.roots());
        }
    }

    fn roots(&self) -> Vec<Root> {
        let mut roots: Vec<Root> = self.stack.iter().cloned().map(Root::Value).collect();
        for frame in &self.frames {
            roots.push(Root::Env(frame.env.clone()));
            roots.push(Root::Value(frame.self_value.clone()));
            roots.push(Root::Value(frame.block.clone()));
            roots.push(Root::Class(frame.cref.class.clone()));
            if let Some(value) = &frame.result_override {
                roots.push(Root::Value(value.clone()));
            }
        }
        roots
    }

    // ==================== Helper Methods ====================

    fn frame(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = frame.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_symbol(&mut self) -> Arc<str> {
        let idx = self.read_u16() as usize;
        match &self.frame().function.chunk.constants[idx] {
            Constant::Symbol(name) => name.clone(),
            _ => intern(""),
        }
    }

    fn read_function(&mut self) -> Result<Rc<FunctionConstant>, NativeError> {
        let idx = self.read_u16() as usize;
        match &self.frame().function.chunk.constants[idx] {
            Constant::Function(function) => Ok(function.clone()),
            _ => Err(NativeError::Raise(
                ErrorKind::RuntimeError,
                "malformed bytecode: expected a function constant".to_string(),
            )),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack
            .len()
            .checked_sub(1 + distance)
            .map(|i| self.stack[i].clone())
            .unwrap_or(Value::Nil)
    }
}

fn get_ivar(receiver: &Value, name: &str) -> Value {
    let value = match receiver {
        Value::Object(object) => object.borrow().ivars.get(name).cloned(),
        Value::Class(class) => class.ivars.borrow().get(name).cloned(),
        _ => None,
    };
    value.unwrap_or(Value::Nil)
}

/// `*value` in an argument or array literal
fn splat_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.borrow().clone(),
        Value::Nil => Vec::new(),
        Value::Range(start, end, exclusive) => {
            let end = if *exclusive { *end } else { end.saturating_add(1) };
            (*start..end).map(Value::Integer).collect()
        }
        Value::Hash(hash) => hash
            .borrow()
            .iter()
            .map(|(k, v)| Value::Array(Rc::new(RefCell::new(vec![k.clone(), v.clone()]))))
            .collect(),
        other => vec![other.clone()],
    }
}

impl ValueCaller for VM {
    fn call(&mut self, callee: &Value, args: Vec<Value>) -> NativeResult {
        let base = self.frames.len();
        self.push_proc_call(callee, &args, None)?;
        self.finish_call(base)
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> NativeResult {
        let base = self.frames.len();
        self.send_value(receiver.clone(), name, &args, block, send_flags::FCALL)?;
        self.finish_call(base)
    }

    fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }
}

impl Drop for VM {
    fn drop(&mut self) {
        self.runtime
            .depth
            .set(self.runtime.depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;

    fn eval(source: &str) -> (Rc<Runtime>, NativeResult) {
        let runtime = Runtime::new();
        let function = compile_source(source, "test.rb").unwrap();
        let result = VM::new(runtime.clone()).run_function(function);
        (runtime, result)
    }

    fn eval_inspect(source: &str) -> String {
        let (runtime, result) = eval(source);
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

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval_inspect("1 + 2 * 3"), "7");
        assert_eq!(eval_inspect("-7 / 2"), "-4");
        assert_eq!(eval_inspect("-7 % 3"), "2");
        assert_eq!(eval_inspect("2 ** 10"), "1024");
        assert_eq!(eval_inspect("1 + 2.5"), "3.5");
    }

    #[test]
    fn test_locals_and_blocks_share_environment() {
        assert_eq!(eval_inspect("sum = 0\n[1, 2, 3].each { |x| sum += x }\nsum"), "6");
    }

    #[test]
    fn test_method_definition_and_call() {
        let source = "def add(a, b = 10)\n  a + b\nend\n[add(1), add(1, 2)]";
        assert_eq!(eval_inspect(source), "[11, 3]");
    }

    #[test]
    fn test_wrong_arity_raises_argument_error() {
        let source = "def one(a)\n  a\nend\none(1, 2)";
        assert_eq!(
            eval_inspect(source),
            "ArgumentError: wrong number of arguments (given 2, expected 1)"
        );
    }

    #[test]
    fn test_classes_inheritance_and_super() {
        let source = r##"
class Animal
  attr_reader :name
  def initialize(name)
    @name = name
  end
  def speak
    "..."
  end
end
class Dog < Animal
  def speak
    super + " Woof from #{name}"
  end
end
Dog.new("Rex").speak
"##;
        assert_eq!(eval_inspect(source), "\"... Woof from Rex\"");
    }

    #[test]
    fn test_yield_and_break() {
        let source = "def twice\n  yield 1\n  yield 2\n  :done\nend\ntwice { |x| break x * 10 }";
        assert_eq!(eval_inspect(source), "10");
        assert_eq!(eval_inspect("[1, 2, 3, 4].each { |x| break x if x > 2 }"), "3");
    }

    #[test]
    fn test_rescue_matches_class_and_binds() {
        let source = r##"
begin
  1 / 0
rescue ArgumentError
  :wrong
rescue ZeroDivisionError => e
  e.message
end
"##;
        assert_eq!(eval_inspect(source), "\"divided by 0\"");
    }

    #[test]
    fn test_ensure_runs_and_reraises() {
        let source = r##"
$log = []
begin
  begin
    raise "boom"
  ensure
    $log << :ensured
  end
rescue => e
  $log << e.message
end
$log
"##;
        assert_eq!(eval_inspect(source), "[:ensured, \"boom\"]");
    }

    #[test]
    fn test_undefined_names() {
        assert_eq!(
            eval_inspect("nope"),
            "NameError: undefined local variable or method 'nope' for main:Object"
        );
        assert_eq!(
            eval_inspect("5.nope"),
            "NoMethodError: undefined method 'nope' for an instance of Integer"
        );
        assert_eq!(eval_inspect("Nope"), "NameError: uninitialized constant Nope");
    }

    #[test]
    fn test_attribute_assignment_returns_assigned_value() {
        let source = "class Box\n  def v=(x)\n    @v = x * 2\n    :ignored\n  end\nend\nb = Box.new\n(b.v = 5)";
        assert_eq!(eval_inspect(source), "5");
    }

    #[test]
    fn test_nested_constants() {
        let source = "module Outer\n  LIMIT = 3\n  class Inner\n    def limit\n      LIMIT\n    end\n  end\nend\n[Outer::Inner.new.limit, Outer::Inner.name]";
        assert_eq!(eval_inspect(source), "[3, \"Outer::Inner\"]");
    }

    #[test]
    fn test_unreachable_cycles_are_collected() {
        let source = "i = 0\nwhile i < 10\n  a = []\n  a << a\n  i += 1\nend\nGC.start\ni";
        let (runtime, result) = eval(source);
        assert!(result.is_ok());
        assert!(runtime.gc_stats().collections >= 1);
        assert!(runtime.gc_stats().cycles_broken >= 9);
        runtime.teardown();
    }
}
