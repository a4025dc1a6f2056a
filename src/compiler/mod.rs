pub mod chunk;
#[allow(clippy::module_inception)]
pub mod compiler;
pub mod opcode;

pub use chunk::{Chunk, Constant, FunctionConstant};
pub use compiler::Compiler;
pub use opcode::{class_flags, send_flags, OpCode};

use crate::error::GarnetResult;
use crate::lexer::Scanner;
use crate::parser::Parser;
use std::rc::Rc;

/// Scan, parse and compile a source text into its top-level function
pub fn compile_source(source: &str, file: &str) -> GarnetResult<Rc<FunctionConstant>> {
    let tokens = Scanner::new(source, file).scan_tokens()?;
    let program = Parser::new(tokens, file, source).parse()?;
    Compiler::new(file, source).compile(&program)
}
