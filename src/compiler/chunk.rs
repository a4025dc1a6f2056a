// Garnet Bytecode Chunk
// Contains bytecode, constants, and debug information

use super::opcode::OpCode;
use crate::error::Span;
use std::fmt::Write;
use std::rc::Rc;
use std::sync::Arc;

/// Constant values stored in the constant pool
#[derive(Debug, Clone)]
pub enum Constant {
    Integer(i64),
    Float(f64),
    /// Pushed as a fresh string object on every evaluation
    String(Vec<u8>),
    /// Symbols, and the names of methods, variables and constants
    Symbol(Arc<str>),
    Function(Rc<FunctionConstant>),
}

/// A compiled method, block, class body or top-level program
#[derive(Debug, Clone)]
pub struct FunctionConstant {
    pub name: String,
    pub required: usize,
    pub optional: usize,
    pub rest: bool,
    pub block_param: bool,
    /// Environment size; parameters occupy the first slots
    pub local_count: usize,
    pub is_block: bool,
    pub chunk: Chunk,
    pub file: String,
}

impl FunctionConstant {
    /// Number of positional parameter slots (required + optional)
    pub fn positional(&self) -> usize {
        self.required + self.optional
    }

    /// Arity as reported by `Proc#arity`
    pub fn arity(&self) -> i64 {
        if self.optional > 0 || self.rest {
            -(self.required as i64) - 1
        } else {
            self.required as i64
        }
    }
}

/// A chunk of bytecode
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Span information for each byte for error reporting
    pub spans: Vec<Span>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a single byte to the chunk with span info
    pub fn write(&mut self, byte: u8, span: Span) {
        self.code.push(byte);
        self.spans.push(span);
    }

    /// Write an opcode to the chunk
    pub fn write_op(&mut self, op: OpCode, span: Span) {
        self.write(op as u8, span);
    }

    /// Write a u16 operand (big-endian)
    pub fn write_u16(&mut self, value: u16, span: Span) {
        self.write((value >> 8) as u8, span);
        self.write((value & 0xFF) as u8, span);
    }

    /// Add a constant and return its index
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Index of a symbol constant, reusing an existing entry
    pub fn symbol_constant(&mut self, name: &Arc<str>) -> usize {
        let existing = self.constants.iter().position(|c| match c {
            Constant::Symbol(s) => Arc::ptr_eq(s, name),
            _ => false,
        });
        existing.unwrap_or_else(|| self.add_constant(Constant::Symbol(name.clone())))
    }

    /// Get the current code offset
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Patch a jump instruction at the given offset
    pub fn patch_jump(&mut self, offset: usize) {
        let jump = self.code.len() - offset - 2;
        self.code[offset] = (jump >> 8) as u8;
        self.code[offset + 1] = (jump & 0xFF) as u8;
    }

    /// Read a u16 at the given offset
    pub fn read_u16(&self, offset: usize) -> u16 {
        ((self.code[offset] as u16) << 8) | (self.code[offset + 1] as u16)
    }

    /// Get span for instruction at offset
    pub fn get_span(&self, offset: usize) -> Span {
        if offset < self.spans.len() {
            self.spans[offset]
        } else {
            Span::default()
        }
    }

    /// Get line number for instruction at offset
    pub fn get_line(&self, offset: usize) -> usize {
        self.get_span(offset).start.line
    }

    /// Disassemble the chunk, nested functions included
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, name, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, name: &str, indent: usize) {
        let prefix = "  ".repeat(indent);
        let _ = writeln!(out, "{}--- {} ---", prefix, name);
        let _ = writeln!(
            out,
            "{}{} bytes, {} constants",
            prefix,
            self.code.len(),
            self.constants.len()
        );

        let mut offset = 0;
        while offset < self.code.len() {
            out.push_str(&prefix);
            offset = self.disassemble_instruction(out, offset);
        }

        for constant in &self.constants {
            if let Constant::Function(function) = constant {
                out.push('\n');
                function
                    .chunk
                    .disassemble_into(out, &function.name, indent + 1);
            }
        }
    }

    fn format_constant(&self, idx: usize) -> String {
        match self.constants.get(idx) {
            Some(Constant::Integer(n)) => n.to_string(),
            Some(Constant::Float(n)) => format!("{:?}", n),
            Some(Constant::String(s)) => format!("{:?}", String::from_utf8_lossy(s)),
            Some(Constant::Symbol(s)) => format!(":{}", s),
            Some(Constant::Function(f)) => format!("<fn {}>", f.name),
            None => format!("<bad constant {}>", idx),
        }
    }

    /// Disassemble a single instruction, returns the next offset
    pub fn disassemble_instruction(&self, out: &mut String, offset: usize) -> usize {
        let _ = write!(out, "{:04} ", offset);
        let line = self.get_line(offset);
        if offset > 0 && line == self.get_line(offset - 1) {
            out.push_str("   | ");
        } else {
            let _ = write!(out, "{:4} ", line);
        }

        let instruction = OpCode::from(self.code[offset]);
        let name = format!("{:?}", instruction).to_lowercase();
        let byte = |n: usize| self.code[offset + n];

        let operands = match instruction {
            OpCode::Constant
            | OpCode::GetIvar
            | OpCode::SetIvar
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetConst
            | OpCode::SetConst
            | OpCode::GetScopedConst
            | OpCode::MakeBlock
            | OpCode::SingletonClass => {
                self.format_constant(self.read_u16(offset + 1) as usize)
            }
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::BuildString
            | OpCode::BuildArray
            | OpCode::BuildHash => self.read_u16(offset + 1).to_string(),
            OpCode::GetUpvalue | OpCode::SetUpvalue => {
                format!("{}@{}", self.read_u16(offset + 2), byte(1))
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::TryStart => {
                let jump = self.read_u16(offset + 1) as usize;
                format!("-> {}", offset + 3 + jump)
            }
            OpCode::Loop => {
                let jump = self.read_u16(offset + 1) as usize;
                format!("-> {}", offset + 3 - jump)
            }
            OpCode::ArgGiven => {
                let jump = self.read_u16(offset + 2) as usize;
                format!("{} -> {}", byte(1), offset + 4 + jump)
            }
            OpCode::Send => format!(
                "{} argc={} flags={:#04x}",
                self.format_constant(self.read_u16(offset + 1) as usize),
                byte(3),
                byte(4)
            ),
            OpCode::Super | OpCode::Yield => {
                format!("argc={} flags={:#04x}", byte(1), byte(2))
            }
            OpCode::DefMethod | OpCode::DefSingletonMethod => format!(
                "{} {}",
                self.format_constant(self.read_u16(offset + 1) as usize),
                self.format_constant(self.read_u16(offset + 3) as usize)
            ),
            OpCode::DefClass => format!(
                "{} {} flags={:#04x}",
                self.format_constant(self.read_u16(offset + 1) as usize),
                self.format_constant(self.read_u16(offset + 3) as usize),
                byte(5)
            ),
            OpCode::Pick
            | OpCode::Slide
            | OpCode::BuildRange
            | OpCode::ExpandArray
            | OpCode::RescueMatch => byte(1).to_string(),
            _ => String::new(),
        };

        if operands.is_empty() {
            let _ = writeln!(out, "{}", name);
        } else {
            let _ = writeln!(out, "{:<18} {}", name, operands);
        }

        offset + 1 + instruction.operand_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_jump_measures_from_operand_end() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, Span::default());
        let at = chunk.current_offset();
        chunk.write_u16(0xFFFF, Span::default());
        chunk.write_op(OpCode::Nil, Span::default());
        chunk.write_op(OpCode::Pop, Span::default());
        chunk.patch_jump(at);
        assert_eq!(chunk.read_u16(at), 2);
    }

    #[test]
    fn test_symbol_constants_are_shared() {
        let mut chunk = Chunk::new();
        let name = crate::vm::interner::intern("puts");
        let a = chunk.symbol_constant(&name);
        let b = chunk.symbol_constant(&crate::vm::interner::intern("puts"));
        assert_eq!(a, b);
        assert_eq!(chunk.constants.len(), 1);
    }

    #[test]
    fn test_disassemble_lists_instructions() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Constant::Integer(42));
        chunk.write_op(OpCode::Constant, Span::single(1, 1, 0));
        chunk.write_u16(idx as u16, Span::single(1, 1, 0));
        chunk.write_op(OpCode::Return, Span::single(1, 1, 0));
        let text = chunk.disassemble("<main>");
        assert!(text.contains("--- <main> ---"));
        assert!(text.contains("constant"));
        assert!(text.contains("42"));
        assert!(text.contains("return"));
    }
}
