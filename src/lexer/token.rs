// Garnet Token Definitions

use crate::error::Span;
use std::fmt;

/// All token types in Garnet
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Float(f64),
    /// String bodies are raw bytes; no transcoding happens anywhere
    String(Vec<u8>),
    /// Interpolated strings: "a#{x}b#{y}c" ->
    /// StringStart("a"), tokens for x, StringPart("b"), tokens for y, StringEnd("c")
    StringStart(Vec<u8>),
    StringPart(Vec<u8>),
    StringEnd(Vec<u8>),
    Symbol(String),
    /// `name:` inside hash literals and argument lists
    Label(String),

    // Names
    Identifier(String),
    Constant(String),
    InstanceVar(String),
    GlobalVar(String),

    // Keywords
    Def,
    End,
    If,
    Elsif,
    Else,
    Unless,
    While,
    Until,
    Do,
    Then,
    Return,
    Class,
    Module,
    SelfKeyword,
    Nil,
    True,
    False,
    AndKeyword, // and
    OrKeyword,  // or
    NotKeyword, // not
    Begin,
    Rescue,
    Ensure,
    Yield,
    Super,
    Break,
    Next,
    Case,
    When,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    StarStar,     // **
    Slash,        // /
    Percent,      // %
    Equal,        // =
    EqualEqual,   // ==
    EqualEqualEqual, // ===
    Bang,         // !
    BangEqual,    // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Spaceship,    // <=>
    LessLess,     // <<
    And,          // &&
    Or,           // ||

    // Compound Assignment
    PlusEqual,    // +=
    MinusEqual,   // -=
    StarEqual,    // *=
    SlashEqual,   // /=
    PercentEqual, // %=
    OrEqual,      // ||=
    AndEqual,     // &&=

    // Delimiters
    LeftParen,    // (
    RightParen,   // )
    LeftBrace,    // {
    RightBrace,   // }
    LeftBracket,  // [
    RightBracket, // ]
    Comma,        // ,
    Dot,          // .
    DotDot,       // ..
    DotDotDot,    // ...
    ColonColon,   // ::
    Semicolon,    // ;
    Colon,        // :
    Question,     // ?
    Pipe,         // |
    Ampersand,    // &
    Arrow,        // =>

    Newline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::String(s) => write!(f, "\"{}\"", String::from_utf8_lossy(s)),
            TokenKind::StringStart(s) => write!(f, "\"{}#{{", String::from_utf8_lossy(s)),
            TokenKind::StringPart(s) => write!(f, "}}{}#{{", String::from_utf8_lossy(s)),
            TokenKind::StringEnd(s) => write!(f, "}}{}\"", String::from_utf8_lossy(s)),
            TokenKind::Symbol(s) => write!(f, ":{}", s),
            TokenKind::Label(s) => write!(f, "{}:", s),
            TokenKind::Identifier(s) | TokenKind::Constant(s) => write!(f, "{}", s),
            TokenKind::InstanceVar(s) => write!(f, "{}", s),
            TokenKind::GlobalVar(s) => write!(f, "${}", s),
            TokenKind::Def => write!(f, "def"),
            TokenKind::End => write!(f, "end"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Elsif => write!(f, "elsif"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::Unless => write!(f, "unless"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Until => write!(f, "until"),
            TokenKind::Do => write!(f, "do"),
            TokenKind::Then => write!(f, "then"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::Class => write!(f, "class"),
            TokenKind::Module => write!(f, "module"),
            TokenKind::SelfKeyword => write!(f, "self"),
            TokenKind::Nil => write!(f, "nil"),
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::AndKeyword => write!(f, "and"),
            TokenKind::OrKeyword => write!(f, "or"),
            TokenKind::NotKeyword => write!(f, "not"),
            TokenKind::Begin => write!(f, "begin"),
            TokenKind::Rescue => write!(f, "rescue"),
            TokenKind::Ensure => write!(f, "ensure"),
            TokenKind::Yield => write!(f, "yield"),
            TokenKind::Super => write!(f, "super"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Next => write!(f, "next"),
            TokenKind::Case => write!(f, "case"),
            TokenKind::When => write!(f, "when"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::StarStar => write!(f, "**"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::EqualEqualEqual => write!(f, "==="),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::Spaceship => write!(f, "<=>"),
            TokenKind::LessLess => write!(f, "<<"),
            TokenKind::And => write!(f, "&&"),
            TokenKind::Or => write!(f, "||"),
            TokenKind::PlusEqual => write!(f, "+="),
            TokenKind::MinusEqual => write!(f, "-="),
            TokenKind::StarEqual => write!(f, "*="),
            TokenKind::SlashEqual => write!(f, "/="),
            TokenKind::PercentEqual => write!(f, "%="),
            TokenKind::OrEqual => write!(f, "||="),
            TokenKind::AndEqual => write!(f, "&&="),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::DotDot => write!(f, ".."),
            TokenKind::DotDotDot => write!(f, "..."),
            TokenKind::ColonColon => write!(f, "::"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Question => write!(f, "?"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::Arrow => write!(f, "=>"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "end-of-input"),
        }
    }
}

/// A token with its kind and position information
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
    /// Whitespace came right before this token
    pub spaced: bool,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
            spaced: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Tokens after which a line break cannot end the expression
    pub fn continues_line(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::StarStar
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Equal
                | TokenKind::EqualEqual
                | TokenKind::EqualEqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::Spaceship
                | TokenKind::LessLess
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::AndKeyword
                | TokenKind::OrKeyword
                | TokenKind::NotKeyword
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PercentEqual
                | TokenKind::OrEqual
                | TokenKind::AndEqual
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::ColonColon
                | TokenKind::Arrow
                | TokenKind::Question
                | TokenKind::Colon
                | TokenKind::Newline
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
