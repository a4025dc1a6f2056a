// Garnet Bytecode Instructions

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Constants and stack operations
    Constant, // Push constant onto stack
    Pop,      // Pop top of stack
    Dup,      // Duplicate top of stack
    Pick,     // Copy the value n slots below the top: [a, b] pick 1 -> [a, b, a]
    Swap,     // [a, b] -> [b, a]
    Slide,    // Drop n values below the top: [a, b, c] slide 2 -> [c]

    // Literals
    Nil,
    True,
    False,
    PushSelf,

    // Variables
    GetLocal,       // Slot in the current environment
    SetLocal,       // Store into slot, value stays on the stack
    GetUpvalue,     // (depth, slot) in an enclosing environment
    SetUpvalue,     // (depth, slot), value stays on the stack
    GetIvar,        // @name on self
    SetIvar,        // @name on self, value stays on the stack
    GetGlobal,      // $name
    SetGlobal,      // $name, value stays on the stack
    GetConst,       // Lexical constant lookup
    SetConst,       // Define constant in the lexical class
    GetScopedConst, // Scope::Name, scope popped from the stack

    // Arithmetic and comparison with numeric fast paths
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    Negate,
    Not,

    // Control flow
    Jump,        // Unconditional forward jump
    JumpIfFalse, // Pop and jump if falsy
    JumpIfTrue,  // Pop and jump if truthy
    Loop,        // Jump backward

    // Literals built from the stack
    BuildString, // Concatenate n values (to_s applied)
    BuildArray,  // Array from n values
    ArrayPush,   // [array, value] -> [array]
    ArrayConcat, // [array, value] -> [array], value splatted
    BuildHash,   // Hash from n key/value pairs
    BuildRange,  // [start, end] -> range, operand: exclusive flag
    ExpandArray, // Destructure the top value into n values

    // Calls
    Send,       // (name, argc, flags) stack: [receiver, args..., block?]
    Super,      // (argc, flags) call the overridden method
    Yield,      // (argc, flags) call the frame's block
    BlockGiven, // Push whether the frame has a block
    MakeBlock,  // Create a proc from a function constant over the current env
    ToProc,     // Convert `&value` into a block
    ArgGiven,   // (index, offset) jump if positional argument index was passed
    Return,     // Return from the current frame
    BlockBreak, // Break out of the method the current block was given to

    // Definitions
    DefMethod,          // (name, function) on the lexical class
    DefSingletonMethod, // (name, function) on the popped target
    DefClass,           // (name, body, flags) stack: [scope?, superclass?]
    SingletonClass,     // (body) run body against the popped target's singleton

    // Exception handling
    TryStart,    // Push handler (operand: rescue jump offset)
    TryEnd,      // Pop handler
    Throw,       // Raise the exception on the stack
    RescueMatch, // [exception, classes...] -> [matched?]
}

/// `Send` flags
pub mod send_flags {
    /// A block (or nil) sits above the arguments
    pub const HAS_BLOCK: u8 = 1;
    /// Receiverless call, private methods allowed
    pub const FCALL: u8 = 2;
    /// Bare identifier that could have been a local variable
    pub const VCALL: u8 = 4;
    /// Arguments were collected into a single array
    pub const SPLAT: u8 = 8;
    /// `recv.name = v`: the expression value is the last argument
    pub const ATTRASGN: u8 = 16;
}

/// `DefClass` flags
pub mod class_flags {
    pub const MODULE: u8 = 1;
    pub const HAS_SUPER: u8 = 2;
    pub const SCOPED: u8 = 4;
}

impl OpCode {
    /// Get the number of bytes this opcode reads as operands
    pub fn operand_count(&self) -> usize {
        match self {
            OpCode::Pick
            | OpCode::Slide
            | OpCode::BuildRange
            | OpCode::ExpandArray
            | OpCode::RescueMatch => 1,

            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetIvar
            | OpCode::SetIvar
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetConst
            | OpCode::SetConst
            | OpCode::GetScopedConst
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfTrue
            | OpCode::Loop
            | OpCode::BuildString
            | OpCode::BuildArray
            | OpCode::BuildHash
            | OpCode::Super
            | OpCode::Yield
            | OpCode::MakeBlock
            | OpCode::SingletonClass
            | OpCode::TryStart => 2,

            OpCode::GetUpvalue | OpCode::SetUpvalue | OpCode::ArgGiven => 3,

            OpCode::Send | OpCode::DefMethod | OpCode::DefSingletonMethod => 4,

            OpCode::DefClass => 5,

            _ => 0,
        }
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        debug_assert!(byte <= OpCode::RescueMatch as u8);
        // Bytes are only ever produced from OpCode values by the compiler
        unsafe { std::mem::transmute(byte) }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}
