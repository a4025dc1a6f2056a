use super::expr::{Body, Expr};
use crate::error::Span;

/// Parameter list shared by methods and blocks
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub required: Vec<String>,
    pub optional: Vec<(String, Expr)>,
    pub rest: Option<String>,
    pub block: Option<String>,
}

impl Params {
    /// Parameter names in slot order
    pub fn names(&self) -> Vec<String> {
        let mut names = self.required.clone();
        names.extend(self.optional.iter().map(|(name, _)| name.clone()));
        if let Some(rest) = &self.rest {
            names.push(rest.clone());
        }
        if let Some(block) = &self.block {
            names.push(block.clone());
        }
        names
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub params: Params,
    pub body: Body,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    /// `def self.name` / `def obj.name`
    pub singleton: Option<Expr>,
    pub params: Params,
    pub body: Body,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Module,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub kind: ClassKind,
    pub name: String,
    /// `class Outer::Name`
    pub scope: Option<Expr>,
    pub superclass: Option<Expr>,
    pub body: Body,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RescueClause {
    /// Empty means StandardError
    pub classes: Vec<Expr>,
    pub variable: Option<String>,
    pub body: Body,
    pub span: Span,
}

/// A parsed compilation unit
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Body,
}
