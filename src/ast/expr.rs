use super::stmt::{Block, ClassDef, FunctionDef, RescueClause};
use crate::error::Span;
use crate::lexer::TokenKind;

/// Sequence of expressions; the value is the last one
pub type Body = Vec<Expr>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    Equal,
    CaseEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compare,

    Shl,
}

impl BinaryOp {
    pub fn from_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Plus | TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::Minus | TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::Star | TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::Slash | TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::Percent | TokenKind::PercentEqual => Some(BinaryOp::Mod),
            TokenKind::StarStar => Some(BinaryOp::Pow),
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::EqualEqualEqual => Some(BinaryOp::CaseEqual),
            TokenKind::BangEqual => Some(BinaryOp::NotEqual),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            TokenKind::Spaceship => Some(BinaryOp::Compare),
            TokenKind::LessLess => Some(BinaryOp::Shl),
            _ => None,
        }
    }

    /// Name of the method the operator dispatches to
    pub fn method_name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Equal => "==",
            BinaryOp::CaseEqual => "===",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Compare => "<=>",
            BinaryOp::Shl => "<<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `x op= value`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignOp {
    Binary(BinaryOp),
    Or,
    And,
}

#[derive(Debug, Clone)]
pub enum StringPart {
    Literal(Vec<u8>),
    Interpolation(Expr),
}

/// Places an assignment can write to
#[derive(Debug, Clone)]
pub enum Target {
    Local(String),
    InstanceVar(String),
    GlobalVar(String),
    Constant(String),
    Index { receiver: Box<Expr>, args: Vec<Expr> },
    Attribute { receiver: Box<Expr>, name: String },
}

/// Block attached to a call site
#[derive(Debug, Clone)]
pub enum BlockArg {
    Literal(Box<Block>),
    /// `&expr`
    Pass(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil {
        span: Span,
    },
    True {
        span: Span,
    },
    False {
        span: Span,
    },
    SelfRef {
        span: Span,
    },
    Integer {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    Str {
        value: Vec<u8>,
        span: Span,
    },
    Interpolated {
        parts: Vec<StringPart>,
        span: Span,
    },
    Symbol {
        name: String,
        span: Span,
    },
    Array {
        elements: Vec<Expr>,
        span: Span,
    },
    Hash {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        exclusive: bool,
        span: Span,
    },
    /// `*expr` inside argument lists and array literals
    Splat {
        expr: Box<Expr>,
        span: Span,
    },

    Local {
        name: String,
        span: Span,
    },
    InstanceVar {
        name: String,
        span: Span,
    },
    GlobalVar {
        name: String,
        span: Span,
    },
    Const {
        scope: Option<Box<Expr>>,
        name: String,
        span: Span,
    },

    Assign {
        target: Target,
        value: Box<Expr>,
        span: Span,
    },
    OpAssign {
        target: Target,
        op: AssignOp,
        value: Box<Expr>,
        span: Span,
    },
    MultiAssign {
        targets: Vec<Target>,
        value: Box<Expr>,
        span: Span,
    },

    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
        block: Option<BlockArg>,
        /// Bare identifier with no receiver and no arguments
        is_vcall: bool,
        span: Span,
    },
    Super {
        /// None for bare `super`, which forwards the current arguments
        args: Option<Vec<Expr>>,
        block: Option<BlockArg>,
        span: Span,
    },
    Yield {
        args: Vec<Expr>,
        span: Span,
    },
    BlockGiven {
        span: Span,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },

    If {
        condition: Box<Expr>,
        then_body: Body,
        else_body: Option<Body>,
        span: Span,
    },
    While {
        condition: Box<Expr>,
        body: Body,
        /// `until` loops run while the condition is falsy
        negate: bool,
        span: Span,
    },
    Case {
        subject: Option<Box<Expr>>,
        whens: Vec<(Vec<Expr>, Body)>,
        else_body: Option<Body>,
        span: Span,
    },
    Break {
        value: Option<Box<Expr>>,
        span: Span,
    },
    Next {
        value: Option<Box<Expr>>,
        span: Span,
    },
    Return {
        value: Option<Box<Expr>>,
        span: Span,
    },
    Begin {
        body: Body,
        rescues: Vec<RescueClause>,
        else_body: Option<Body>,
        ensure: Option<Body>,
        span: Span,
    },
    Sequence {
        body: Body,
        span: Span,
    },

    Def(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
    /// `class << target ... end`
    SingletonClass {
        target: Box<Expr>,
        body: Body,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Nil { span }
            | Expr::True { span }
            | Expr::False { span }
            | Expr::SelfRef { span }
            | Expr::Integer { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Interpolated { span, .. }
            | Expr::Symbol { span, .. }
            | Expr::Array { span, .. }
            | Expr::Hash { span, .. }
            | Expr::Range { span, .. }
            | Expr::Splat { span, .. }
            | Expr::Local { span, .. }
            | Expr::InstanceVar { span, .. }
            | Expr::GlobalVar { span, .. }
            | Expr::Const { span, .. }
            | Expr::Assign { span, .. }
            | Expr::OpAssign { span, .. }
            | Expr::MultiAssign { span, .. }
            | Expr::Call { span, .. }
            | Expr::Super { span, .. }
            | Expr::Yield { span, .. }
            | Expr::BlockGiven { span }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::If { span, .. }
            | Expr::While { span, .. }
            | Expr::Case { span, .. }
            | Expr::Break { span, .. }
            | Expr::Next { span, .. }
            | Expr::Return { span, .. }
            | Expr::Begin { span, .. }
            | Expr::Sequence { span, .. }
            | Expr::SingletonClass { span, .. } => *span,
            Expr::Def(def) => def.span,
            Expr::ClassDef(class) => class.span,
        }
    }
}
