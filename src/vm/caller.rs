use super::runtime::Runtime;
use super::value::Value;
use crate::error::ErrorKind;
use std::rc::Rc;

/// How a native method or host callback stops abnormally
#[derive(Debug, Clone)]
pub enum NativeError {
    /// Raise a new exception of the given class
    Raise(ErrorKind, String),
    /// Re-raise an existing exception object
    Exception(Value),
    /// `break` out of the block with the given proc identity
    Break(usize, Value),
}

impl NativeError {
    pub fn argument(message: impl Into<String>) -> Self {
        NativeError::Raise(ErrorKind::ArgumentError, message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        NativeError::Raise(ErrorKind::TypeError, message.into())
    }
}

impl From<String> for NativeError {
    fn from(message: String) -> Self {
        NativeError::Raise(ErrorKind::RuntimeError, message)
    }
}

pub type NativeResult = Result<Value, NativeError>;

/// Signature of builtin methods: (vm, self, args, block)
pub type NativeFn = fn(&mut dyn ValueCaller, &Value, &[Value], Option<&Value>) -> NativeResult;

/// Re-entry point into the interpreter for natives and host callbacks
pub trait ValueCaller {
    /// Invoke a proc
    fn call(&mut self, callee: &Value, args: Vec<Value>) -> NativeResult;

    /// Send a message, private methods included
    fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> NativeResult;

    fn runtime(&self) -> &Rc<Runtime>;
}

/// A method implemented by the embedding application
pub trait HostFunction {
    fn call(
        &self,
        vm: &mut dyn ValueCaller,
        self_value: &Value,
        args: &[Value],
        block: Option<&Value>,
    ) -> NativeResult;
}
