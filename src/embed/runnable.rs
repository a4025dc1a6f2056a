// A compiled program waiting to run
// Runs at most once; the compiled chunk stays available for disassembly

use super::context::Context;
use super::convert::IntoArgs;
use super::error::{Error, Result};
use super::value::Value;
use crate::compiler::FunctionConstant;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnableState {
    Compiled,
    Executed,
}

pub struct Runnable<'ctx> {
    ctx: &'ctx Context,
    function: Rc<FunctionConstant>,
    state: RunnableState,
}

impl<'ctx> Runnable<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, function: Rc<FunctionConstant>) -> Self {
        Self {
            ctx,
            function,
            state: RunnableState::Compiled,
        }
    }

    pub fn state(&self) -> RunnableState {
        self.state
    }

    pub fn run(&mut self) -> Result<Value<'ctx>> {
        self.run_with_args(())
    }

    /// Run with `args` bound to `ARGV`
    pub fn run_with_args<A: IntoArgs>(&mut self, args: A) -> Result<Value<'ctx>> {
        if self.state == RunnableState::Executed {
            return Err(Error::state("program has already been run"));
        }
        self.state = RunnableState::Executed;
        self.ctx.execute(self.function.clone(), args)
    }

    pub fn disassemble(&self) -> String {
        self.function.chunk.disassemble(&self.function.name)
    }
}

impl std::fmt::Debug for Runnable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("name", &self.function.name)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_does_not_execute() {
        let ctx = Context::new();
        let mut program = ctx.parse("$ran = true\n40 + 2").unwrap();
        assert_eq!(program.state(), RunnableState::Compiled);
        assert!(ctx.get_global("ran").is_nil());
        assert_eq!(program.run().unwrap().to_int().unwrap(), 42);
        assert_eq!(program.state(), RunnableState::Executed);
        assert!(ctx.get_global("ran").to_bool().unwrap());
    }

    #[test]
    fn test_second_run_is_rejected() {
        let ctx = Context::new();
        let mut program = ctx.parse("1").unwrap();
        program.run().unwrap();
        assert!(matches!(program.run(), Err(Error::State(_))));
    }

    #[test]
    fn test_failed_run_still_counts() {
        let ctx = Context::new();
        let mut program = ctx.parse("raise \"nope\"").unwrap();
        let error = program.run().unwrap_err();
        assert_eq!(error.class_name(), Some("RuntimeError"));
        assert_eq!(program.state(), RunnableState::Executed);
        assert!(matches!(program.run(), Err(Error::State(_))));
    }

    #[test]
    fn test_disassemble_lists_instructions() {
        let ctx = Context::new();
        let program = ctx.parse("1 + 2").unwrap();
        let listing = program.disassemble();
        assert!(listing.starts_with("--- <main> ---"));
        assert!(!listing.trim().is_empty());
    }
}
