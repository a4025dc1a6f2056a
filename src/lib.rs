// Garnet
// An embeddable interpreter for a small Ruby-like language
//
// Host applications create a `Context`, load source into it, register
// modules backed by Rust closures and convert values in both directions.

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod embed;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use embed::{
    Config, Context, Error, FromValue, HostFn, HostValue, IntoArgs, IntoValue, Module, Result,
    Runnable, RunnableState, Value, ValueTag,
};
pub use vm::GcStats;

/// Interpreter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
