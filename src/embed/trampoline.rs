// Callback trampoline
// Bridges a VM method call into a host closure and its result back into the VM

use super::context::{CallbackFrame, Context, ContextInner};
use super::error::{Error, Result};
use super::value::Value;
use crate::error::ErrorKind;
use crate::vm::caller::{HostFunction, NativeError, NativeResult, ValueCaller};
use crate::vm::value::Value as RawValue;
use std::rc::{Rc, Weak};

/// Host function signature; the returned handle must come from the given Context
pub type HostFn = dyn for<'c> Fn(&'c Context) -> Result<Value<'c>>;

/// Pops the callback frame on every exit path, panics included
struct FrameGuard<'a> {
    ctx: &'a Context,
}

impl<'a> FrameGuard<'a> {
    fn push(ctx: &'a Context, frame: CallbackFrame) -> Self {
        ctx.inner.frames.borrow_mut().push(frame);
        Self { ctx }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.inner.frames.borrow_mut().pop();
    }
}

pub(crate) struct Trampoline {
    /// Weak: the runtime's method tables own the trampoline
    ctx: Weak<ContextInner>,
    name: String,
    function: Rc<HostFn>,
}

impl Trampoline {
    pub(crate) fn new(ctx: &Context, name: &str, function: Rc<HostFn>) -> Self {
        Self {
            ctx: Rc::downgrade(&ctx.inner),
            name: name.to_string(),
            function,
        }
    }
}

/// Raise a host error inside the VM, keeping the class of runtime errors
fn raise(error: Error) -> NativeError {
    match error {
        Error::Runtime { class, message, .. } => {
            NativeError::Raise(ErrorKind::from_class_name(&class), message)
        }
        other => NativeError::Raise(ErrorKind::RuntimeError, other.to_string()),
    }
}

impl HostFunction for Trampoline {
    fn call(
        &self,
        _vm: &mut dyn ValueCaller,
        self_value: &RawValue,
        args: &[RawValue],
        block: Option<&RawValue>,
    ) -> NativeResult {
        let Some(inner) = self.ctx.upgrade() else {
            return Err(NativeError::from(format!(
                "context for '{}' is closed",
                self.name
            )));
        };
        let ctx = Context::from_inner(inner);
        let frame = CallbackFrame {
            receiver: self_value.clone(),
            args: args.to_vec(),
            block: block.cloned(),
        };
        let _guard = FrameGuard::push(&ctx, frame);

        let outcome = match (self.function)(&ctx) {
            Ok(value) if !value.context().same_context(&ctx) => Err(NativeError::from(format!(
                "'{}' returned a value from a different context",
                self.name
            ))),
            Ok(value) => Ok(value.raw().clone()),
            Err(error) => Err(raise(error)),
        };
        outcome
    }
}
