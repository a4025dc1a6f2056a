// Garnet Parser
// Recursive descent parser that converts tokens into an AST

use crate::ast::*;
use crate::error::{GarnetError, GarnetResult, Span};
use crate::lexer::{Token, TokenKind};
use rustc_hash::FxHashSet;

/// Names assigned so far in one lexical scope; decides `foo` (local) vs `foo` (call)
struct LocalScope {
    names: FxHashSet<String>,
    is_block: bool,
}

/// Recursive descent parser for Garnet
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
    scopes: Vec<LocalScope>,
    /// While > 0, `do` belongs to an enclosing construct (`while x do`, command args)
    no_do: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
            scopes: vec![LocalScope {
                names: FxHashSet::default(),
                is_block: false,
            }],
            no_do: 0,
        }
    }

    /// Parse the entire program
    pub fn parse(&mut self) -> GarnetResult<Program> {
        let body = self.statements(&[])?;
        if !self.is_at_end() {
            return Err(self.unexpected());
        }
        Ok(Program { body })
    }

    // ==================== Statements ====================

    fn statements(&mut self, terminators: &[TokenKind]) -> GarnetResult<Body> {
        let mut body = Vec::new();
        loop {
            self.skip_terminators();
            if self.is_at_end() || self.check_any(terminators) {
                break;
            }
            body.push(self.statement()?);
            if !self.is_at_end() && !self.check_any(terminators) && !self.check_terminator() {
                return Err(self.unexpected());
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> GarnetResult<Expr> {
        let mut expr = if self.is_multi_assign_start() {
            self.multi_assign()?
        } else {
            self.expression_statement()?
        };

        // Statement modifiers
        loop {
            let span = expr.span();
            if self.match_token(&TokenKind::If) {
                let condition = self.expression_statement()?;
                expr = Expr::If {
                    condition: Box::new(condition),
                    then_body: vec![expr],
                    else_body: None,
                    span,
                };
            } else if self.match_token(&TokenKind::Unless) {
                let condition = self.expression_statement()?;
                expr = Expr::If {
                    condition: Box::new(condition),
                    then_body: Vec::new(),
                    else_body: Some(vec![expr]),
                    span,
                };
            } else if self.check(&TokenKind::While) || self.check(&TokenKind::Until) {
                let negate = self.advance().kind == TokenKind::Until;
                let condition = self.expression_statement()?;
                expr = Expr::While {
                    condition: Box::new(condition),
                    body: vec![expr],
                    negate,
                    span,
                };
            } else if self.match_token(&TokenKind::Rescue) {
                let fallback = self.expression_statement()?;
                expr = Expr::Begin {
                    body: vec![expr],
                    rescues: vec![RescueClause {
                        classes: Vec::new(),
                        variable: None,
                        body: vec![fallback],
                        span,
                    }],
                    else_body: None,
                    ensure: None,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// `not`, `and`, `or`
    fn expression_statement(&mut self) -> GarnetResult<Expr> {
        let mut expr = self.not_expression()?;

        loop {
            let op = if self.match_token(&TokenKind::AndKeyword) {
                LogicalOp::And
            } else if self.match_token(&TokenKind::OrKeyword) {
                LogicalOp::Or
            } else {
                break;
            };
            self.skip_newlines();
            let right = self.not_expression()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn not_expression(&mut self) -> GarnetResult<Expr> {
        if self.check(&TokenKind::NotKeyword) {
            let span = self.advance().span;
            let operand = self.not_expression()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.expression()
    }

    // ==================== Assignment ====================

    fn expression(&mut self) -> GarnetResult<Expr> {
        let expr = self.ternary()?;

        if self.check(&TokenKind::Equal) {
            let span = expr.span();
            let target = self.to_target(expr)?;
            self.advance();
            self.skip_newlines();
            if let Target::Local(name) = &target {
                self.declare(name);
            }
            let value = self.expression()?;
            return Ok(Expr::Assign {
                target,
                value: Box::new(value),
                span,
            });
        }

        if let Some(op) = self.match_assign_op() {
            let span = expr.span();
            let target = self.to_target(expr)?;
            self.skip_newlines();
            if let Target::Local(name) = &target {
                self.declare(name);
            }
            let value = self.expression()?;
            return Ok(Expr::OpAssign {
                target,
                op,
                value: Box::new(value),
                span,
            });
        }

        Ok(expr)
    }

    fn match_assign_op(&mut self) -> Option<AssignOp> {
        let op = match &self.peek().kind {
            TokenKind::OrEqual => AssignOp::Or,
            TokenKind::AndEqual => AssignOp::And,
            kind @ (TokenKind::PlusEqual
            | TokenKind::MinusEqual
            | TokenKind::StarEqual
            | TokenKind::SlashEqual
            | TokenKind::PercentEqual) => AssignOp::Binary(BinaryOp::from_token(kind)?),
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn to_target(&self, expr: Expr) -> GarnetResult<Target> {
        match expr {
            Expr::Local { name, .. } => Ok(Target::Local(name)),
            Expr::Call {
                receiver: None,
                name,
                is_vcall: true,
                ..
            } => Ok(Target::Local(name)),
            Expr::InstanceVar { name, .. } => Ok(Target::InstanceVar(name)),
            Expr::GlobalVar { name, .. } => Ok(Target::GlobalVar(name)),
            Expr::Const {
                scope: None, name, ..
            } => Ok(Target::Constant(name)),
            Expr::Call {
                receiver: Some(receiver),
                name,
                args,
                block: None,
                ..
            } if name == "[]" => Ok(Target::Index { receiver, args }),
            Expr::Call {
                receiver: Some(receiver),
                name,
                args,
                block: None,
                ..
            } if args.is_empty() && !name.ends_with('?') && !name.ends_with('!') => {
                Ok(Target::Attribute { receiver, name })
            }
            other => Err(GarnetError::syntax_error(
                "Invalid assignment target",
                other.span(),
                &self.file,
            )
            .with_source(&self.source)
            .with_help("Only variables, constants, attributes and index expressions can be assigned")),
        }
    }

    /// `a, b = ...`
    fn is_multi_assign_start(&self) -> bool {
        let mut idx = self.current;
        let mut names = 0;
        loop {
            match self.tokens.get(idx).map(|t| &t.kind) {
                Some(TokenKind::Identifier(_))
                | Some(TokenKind::InstanceVar(_))
                | Some(TokenKind::GlobalVar(_)) => {
                    names += 1;
                    idx += 1;
                }
                _ => return false,
            }
            match self.tokens.get(idx).map(|t| &t.kind) {
                Some(TokenKind::Comma) => idx += 1,
                Some(TokenKind::Equal) => return names > 1,
                _ => return false,
            }
        }
    }

    fn multi_assign(&mut self) -> GarnetResult<Expr> {
        let span = self.peek().span;
        let mut targets = Vec::new();
        loop {
            let token = self.advance().clone();
            let target = match token.kind {
                TokenKind::Identifier(name) => {
                    self.declare(&name);
                    Target::Local(name)
                }
                TokenKind::InstanceVar(name) => Target::InstanceVar(name),
                TokenKind::GlobalVar(name) => Target::GlobalVar(name),
                _ => return Err(self.error_at(&token, "Invalid assignment target")),
            };
            targets.push(target);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::Equal, "Expected '=' in multiple assignment")?;
        self.skip_newlines();

        let first = self.splat_or_expression()?;
        let value = if self.check(&TokenKind::Comma) {
            let mut elements = vec![first];
            while self.match_token(&TokenKind::Comma) {
                self.skip_newlines();
                elements.push(self.splat_or_expression()?);
            }
            Expr::Array { elements, span }
        } else {
            first
        };

        Ok(Expr::MultiAssign {
            targets,
            value: Box::new(value),
            span,
        })
    }

    // ==================== Operators ====================

    fn ternary(&mut self) -> GarnetResult<Expr> {
        let condition = self.range()?;

        if self.match_token(&TokenKind::Question) {
            self.skip_newlines();
            let then_branch = self.ternary()?;
            self.skip_newlines();
            self.consume(&TokenKind::Colon, "Expected ':' in conditional expression")?;
            self.skip_newlines();
            let else_branch = self.ternary()?;
            let span = condition.span().to(else_branch.span());
            return Ok(Expr::If {
                condition: Box::new(condition),
                then_body: vec![then_branch],
                else_body: Some(vec![else_branch]),
                span,
            });
        }

        Ok(condition)
    }

    fn range(&mut self) -> GarnetResult<Expr> {
        let start = self.or()?;

        if self.check(&TokenKind::DotDot) || self.check(&TokenKind::DotDotDot) {
            let exclusive = self.advance().kind == TokenKind::DotDotDot;
            let end = self.or()?;
            let span = start.span().to(end.span());
            return Ok(Expr::Range {
                start: Box::new(start),
                end: Box::new(end),
                exclusive,
                span,
            });
        }

        Ok(start)
    }

    fn or(&mut self) -> GarnetResult<Expr> {
        let mut expr = self.and()?;

        while self.match_token(&TokenKind::Or) {
            self.skip_newlines();
            let right = self.and()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> GarnetResult<Expr> {
        let mut expr = self.equality()?;

        while self.match_token(&TokenKind::And) {
            self.skip_newlines();
            let right = self.equality()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> GarnetResult<Expr> {
        self.binary_level(
            &[
                TokenKind::EqualEqual,
                TokenKind::EqualEqualEqual,
                TokenKind::BangEqual,
                TokenKind::Spaceship,
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> GarnetResult<Expr> {
        self.binary_level(
            &[
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> GarnetResult<Expr> {
        self.binary_level(&[TokenKind::LessLess], Self::additive)
    }

    fn additive(&mut self) -> GarnetResult<Expr> {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> GarnetResult<Expr> {
        self.binary_level(
            &[TokenKind::Star, TokenKind::Slash, TokenKind::Percent],
            Self::unary_minus,
        )
    }

    fn binary_level(
        &mut self,
        operators: &[TokenKind],
        next: fn(&mut Self) -> GarnetResult<Expr>,
    ) -> GarnetResult<Expr> {
        let mut expr = next(self)?;

        while self.check_any(operators) {
            let op_token = self.advance().clone();
            let op = BinaryOp::from_token(&op_token.kind)
                .ok_or_else(|| self.error_at(&op_token, "Unknown operator"))?;
            self.skip_newlines();
            let right = next(self)?;
            let span = expr.span().to(right.span());
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn unary_minus(&mut self) -> GarnetResult<Expr> {
        if self.check(&TokenKind::Minus) {
            let span = self.advance().span;
            let operand = self.unary_minus()?;
            return Ok(match operand {
                Expr::Integer { value, .. } => Expr::Integer {
                    value: value.wrapping_neg(),
                    span,
                },
                Expr::Float { value, .. } => Expr::Float {
                    value: -value,
                    span,
                },
                other => Expr::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(other),
                    span,
                },
            });
        }
        self.power()
    }

    fn power(&mut self) -> GarnetResult<Expr> {
        let base = self.unary()?;

        if self.match_token(&TokenKind::StarStar) {
            self.skip_newlines();
            // Right associative
            let exponent = self.unary_minus()?;
            let span = base.span().to(exponent.span());
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
                span,
            });
        }

        Ok(base)
    }

    fn unary(&mut self) -> GarnetResult<Expr> {
        if self.check(&TokenKind::Bang) {
            let span = self.advance().span;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.postfix()
    }

    // ==================== Calls ====================

    fn postfix(&mut self) -> GarnetResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                self.skip_newlines();
                let token = self.advance().clone();
                let name = match token.kind {
                    TokenKind::Identifier(name) | TokenKind::Constant(name) => name,
                    _ => return Err(self.error_at(&token, "Expected method name after '.'")),
                };
                expr = self.call_rest(Some(Box::new(expr)), name, token.span)?;
            } else if self.check(&TokenKind::ColonColon) {
                self.advance();
                let token = self.advance().clone();
                match token.kind {
                    TokenKind::Constant(name) if !self.check_call_paren() => {
                        expr = Expr::Const {
                            scope: Some(Box::new(expr)),
                            name,
                            span: token.span,
                        };
                    }
                    TokenKind::Constant(name) | TokenKind::Identifier(name) => {
                        expr = self.call_rest(Some(Box::new(expr)), name, token.span)?;
                    }
                    _ => return Err(self.error_at(&token, "Expected constant name after '::'")),
                }
            } else if self.check(&TokenKind::LeftBracket) && !self.peek().spaced {
                let span = self.advance().span;
                let (args, _) = self.argument_list(&TokenKind::RightBracket)?;
                self.consume(&TokenKind::RightBracket, "Expected ']' after index")?;
                expr = Expr::Call {
                    receiver: Some(Box::new(expr)),
                    name: "[]".to_string(),
                    args,
                    block: None,
                    is_vcall: false,
                    span,
                };
            } else if self.check(&TokenKind::LeftBrace) && Self::accepts_block(&expr) {
                let block = self.brace_block()?;
                if let Expr::Call {
                    block: slot,
                    is_vcall,
                    ..
                } = &mut expr
                {
                    *slot = Some(BlockArg::Literal(block));
                    *is_vcall = false;
                }
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn accepts_block(expr: &Expr) -> bool {
        matches!(expr, Expr::Call { block: None, .. })
    }

    /// Arguments and block following a method name
    fn call_rest(
        &mut self,
        receiver: Option<Box<Expr>>,
        name: String,
        span: Span,
    ) -> GarnetResult<Expr> {
        let mut args = Vec::new();
        let mut block = None;
        let mut has_args = false;

        if self.check_call_paren() {
            self.advance();
            let (parsed, pass) = self.paren_arguments()?;
            args = parsed;
            block = pass;
            has_args = true;
        } else if self.can_start_command_arg() {
            let (parsed, pass) = self.command_arguments()?;
            args = parsed;
            block = pass;
            has_args = true;
        }

        if block.is_none() && self.no_do == 0 && self.check(&TokenKind::Do) {
            block = Some(BlockArg::Literal(self.do_block()?));
        }

        let is_vcall = receiver.is_none() && !has_args && block.is_none();
        Ok(Expr::Call {
            receiver,
            name,
            args,
            block,
            is_vcall,
            span,
        })
    }

    fn check_call_paren(&self) -> bool {
        self.check(&TokenKind::LeftParen) && !self.peek().spaced
    }

    /// Whether the next token starts an argument of a parenthesis-free call
    fn can_start_command_arg(&self) -> bool {
        let token = self.peek();
        if !token.spaced {
            return false;
        }
        let next_unspaced = self
            .tokens
            .get(self.current + 1)
            .map_or(false, |t| !t.spaced);
        match token.kind {
            TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::String(_)
            | TokenKind::StringStart(_)
            | TokenKind::Symbol(_)
            | TokenKind::Label(_)
            | TokenKind::Identifier(_)
            | TokenKind::Constant(_)
            | TokenKind::InstanceVar(_)
            | TokenKind::GlobalVar(_)
            | TokenKind::Nil
            | TokenKind::True
            | TokenKind::False
            | TokenKind::SelfKeyword
            | TokenKind::LeftBracket
            | TokenKind::LeftParen
            | TokenKind::Bang => true,
            TokenKind::Minus | TokenKind::Star | TokenKind::Ampersand | TokenKind::ColonColon => {
                next_unspaced
            }
            _ => false,
        }
    }

    fn paren_arguments(&mut self) -> GarnetResult<(Vec<Expr>, Option<BlockArg>)> {
        let saved = std::mem::replace(&mut self.no_do, 0);
        let result = self.argument_list(&TokenKind::RightParen);
        self.no_do = saved;
        let result = result?;
        self.consume(&TokenKind::RightParen, "Expected ')' after arguments")?;
        Ok(result)
    }

    fn command_arguments(&mut self) -> GarnetResult<(Vec<Expr>, Option<BlockArg>)> {
        self.no_do += 1;
        let result = self.argument_list(&TokenKind::Newline);
        self.no_do -= 1;
        result
    }

    /// Comma separated arguments; trailing `key: value` pairs become one hash
    fn argument_list(
        &mut self,
        closing: &TokenKind,
    ) -> GarnetResult<(Vec<Expr>, Option<BlockArg>)> {
        let mut args = Vec::new();
        let mut hash_entries: Vec<(Expr, Expr)> = Vec::new();
        let mut hash_span = None;
        let mut block = None;

        if self.check(closing) {
            return Ok((args, block));
        }

        loop {
            if let TokenKind::Label(name) = &self.peek().kind {
                let name = name.clone();
                let span = self.advance().span;
                hash_span.get_or_insert(span);
                let value = self.expression()?;
                hash_entries.push((Expr::Symbol { name, span }, value));
            } else if self.match_token(&TokenKind::Ampersand) {
                let expr = self.expression()?;
                block = Some(BlockArg::Pass(Box::new(expr)));
                break;
            } else {
                let expr = self.splat_or_expression()?;
                if self.match_token(&TokenKind::Arrow) {
                    hash_span.get_or_insert(expr.span());
                    let value = self.expression()?;
                    hash_entries.push((expr, value));
                } else {
                    if !hash_entries.is_empty() {
                        return Err(self.error("Positional argument after keyword arguments"));
                    }
                    args.push(expr);
                }
            }

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }

        if let Some(span) = hash_span {
            args.push(Expr::Hash {
                entries: hash_entries,
                span,
            });
        }

        Ok((args, block))
    }

    fn splat_or_expression(&mut self) -> GarnetResult<Expr> {
        if self.check(&TokenKind::Star) {
            let span = self.advance().span;
            let expr = self.ternary()?;
            return Ok(Expr::Splat {
                expr: Box::new(expr),
                span,
            });
        }
        self.expression()
    }

    // ==================== Blocks ====================

    fn brace_block(&mut self) -> GarnetResult<Box<Block>> {
        let span = self.advance().span;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.push_scope(true);

        let result = (|| -> GarnetResult<Box<Block>> {
            let params = self.block_params()?;
            let body = self.statements(&[TokenKind::RightBrace])?;
            self.consume(&TokenKind::RightBrace, "Expected '}' to close block")?;
            Ok(Box::new(Block { params, body, span }))
        })();

        self.pop_scope();
        self.no_do = saved;
        result
    }

    fn do_block(&mut self) -> GarnetResult<Box<Block>> {
        let span = self.advance().span;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.push_scope(true);

        let result = (|| -> GarnetResult<Box<Block>> {
            let params = self.block_params()?;
            let body = self.body_with_rescue(span)?;
            self.consume(&TokenKind::End, "Expected 'end' to close 'do' block")?;
            Ok(Box::new(Block { params, body, span }))
        })();

        self.pop_scope();
        self.no_do = saved;
        result
    }

    fn block_params(&mut self) -> GarnetResult<Params> {
        if self.match_token(&TokenKind::Or) {
            return Ok(Params::default());
        }
        if !self.match_token(&TokenKind::Pipe) {
            return Ok(Params::default());
        }
        let params = self.parameter_list(&TokenKind::Pipe)?;
        self.consume(&TokenKind::Pipe, "Expected '|' after block parameters")?;
        Ok(params)
    }

    fn parameter_list(&mut self, closing: &TokenKind) -> GarnetResult<Params> {
        let mut params = Params::default();
        if self.check(closing) {
            return Ok(params);
        }

        loop {
            let token = self.advance().clone();
            match token.kind {
                TokenKind::Star => {
                    let name = self.consume_identifier("Expected name after '*'")?;
                    self.declare(&name);
                    params.rest = Some(name);
                }
                TokenKind::Ampersand => {
                    let name = self.consume_identifier("Expected name after '&'")?;
                    self.declare(&name);
                    params.block = Some(name);
                }
                TokenKind::Identifier(ref name) => {
                    let name = name.clone();
                    self.declare(&name);
                    if self.match_token(&TokenKind::Equal) {
                        let default = self.ternary()?;
                        params.optional.push((name, default));
                    } else {
                        if !params.optional.is_empty() || params.rest.is_some() {
                            return Err(self
                                .error_at(&token, "Required parameter after optional parameters")
                                .with_help("Move required parameters before optional ones"));
                        }
                        params.required.push(name);
                    }
                }
                TokenKind::Label(_) => {
                    return Err(self.error_at(&token, "Keyword parameters are not supported"));
                }
                _ => return Err(self.error_at(&token, "Expected parameter name")),
            }

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        Ok(params)
    }

    // ==================== Primary ====================

    fn primary(&mut self) -> GarnetResult<Expr> {
        if self.is_at_end() {
            return Err(self.unexpected());
        }
        let token = self.advance().clone();
        let span = token.span;

        match token.kind {
            TokenKind::Integer(value) => Ok(Expr::Integer { value, span }),
            TokenKind::Float(value) => Ok(Expr::Float { value, span }),
            TokenKind::String(value) => Ok(Expr::Str { value, span }),
            TokenKind::StringStart(first) => self.interpolated(first, span),
            TokenKind::Symbol(name) => Ok(Expr::Symbol { name, span }),
            TokenKind::Nil => Ok(Expr::Nil { span }),
            TokenKind::True => Ok(Expr::True { span }),
            TokenKind::False => Ok(Expr::False { span }),
            TokenKind::SelfKeyword => Ok(Expr::SelfRef { span }),
            TokenKind::InstanceVar(name) => Ok(Expr::InstanceVar { name, span }),
            TokenKind::GlobalVar(name) => Ok(Expr::GlobalVar { name, span }),
            TokenKind::Constant(name) => {
                if self.check_call_paren() {
                    self.call_rest(None, name, span)
                } else {
                    Ok(Expr::Const {
                        scope: None,
                        name,
                        span,
                    })
                }
            }
            TokenKind::ColonColon => {
                let name = match self.advance().kind.clone() {
                    TokenKind::Constant(name) => name,
                    _ => return Err(self.error_at(&token, "Expected constant name after '::'")),
                };
                Ok(Expr::Const {
                    scope: Some(Box::new(Expr::Const {
                        scope: None,
                        name: "Object".to_string(),
                        span,
                    })),
                    name,
                    span,
                })
            }
            TokenKind::Identifier(name) => self.identifier(name, span),

            TokenKind::LeftParen => {
                let saved = std::mem::replace(&mut self.no_do, 0);
                let body = self.statements(&[TokenKind::RightParen]);
                self.no_do = saved;
                let mut body = body?;
                self.consume(&TokenKind::RightParen, "Expected ')' after expression")?;
                Ok(match body.len() {
                    0 => Expr::Nil { span },
                    1 => body.remove(0),
                    _ => Expr::Sequence { body, span },
                })
            }
            TokenKind::LeftBracket => {
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    elements.push(self.splat_or_expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(&TokenKind::RightBracket, "Expected ']' after array elements")?;
                Ok(Expr::Array { elements, span })
            }
            TokenKind::LeftBrace => self.hash_literal(span),

            TokenKind::If => {
                let expr = self.if_tail(span)?;
                self.consume(&TokenKind::End, "Expected 'end' to close 'if'")?;
                Ok(expr)
            }
            TokenKind::Unless => {
                let condition = self.expression_statement()?;
                self.match_token(&TokenKind::Then);
                let then_body = self.statements(&[TokenKind::Else, TokenKind::End])?;
                let else_body = if self.match_token(&TokenKind::Else) {
                    Some(self.statements(&[TokenKind::End])?)
                } else {
                    None
                };
                self.consume(&TokenKind::End, "Expected 'end' to close 'unless'")?;
                Ok(Expr::If {
                    condition: Box::new(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(condition),
                        span,
                    }),
                    then_body,
                    else_body,
                    span,
                })
            }
            TokenKind::While | TokenKind::Until => {
                let negate = token.kind == TokenKind::Until;
                self.no_do += 1;
                let condition = self.expression_statement();
                self.no_do -= 1;
                let condition = condition?;
                self.match_token(&TokenKind::Do);
                let body = self.statements(&[TokenKind::End])?;
                self.consume(&TokenKind::End, "Expected 'end' to close loop")?;
                Ok(Expr::While {
                    condition: Box::new(condition),
                    body,
                    negate,
                    span,
                })
            }
            TokenKind::Case => self.case_expression(span),

            TokenKind::Def => self.def_expression(span),
            TokenKind::Class => self.class_expression(span),
            TokenKind::Module => self.module_expression(span),
            TokenKind::Begin => {
                let body = self.body_with_rescue(span)?;
                self.consume(&TokenKind::End, "Expected 'end' to close 'begin'")?;
                Ok(Expr::Sequence { body, span })
            }

            TokenKind::Return => {
                let value = self.optional_value()?;
                Ok(Expr::Return { value, span })
            }
            TokenKind::Break => {
                let value = self.optional_value()?;
                Ok(Expr::Break { value, span })
            }
            TokenKind::Next => {
                let value = self.optional_value()?;
                Ok(Expr::Next { value, span })
            }
            TokenKind::Yield => {
                let args = if self.check_call_paren() {
                    self.advance();
                    self.paren_arguments()?.0
                } else if self.can_start_command_arg() {
                    self.command_arguments()?.0
                } else {
                    Vec::new()
                };
                Ok(Expr::Yield { args, span })
            }
            TokenKind::Super => {
                let (args, mut block) = if self.check_call_paren() {
                    self.advance();
                    let (args, block) = self.paren_arguments()?;
                    (Some(args), block)
                } else if self.can_start_command_arg() {
                    let (args, block) = self.command_arguments()?;
                    (Some(args), block)
                } else {
                    (None, None)
                };
                if block.is_none() {
                    if self.check(&TokenKind::LeftBrace) {
                        block = Some(BlockArg::Literal(self.brace_block()?));
                    } else if self.no_do == 0 && self.check(&TokenKind::Do) {
                        block = Some(BlockArg::Literal(self.do_block()?));
                    }
                }
                Ok(Expr::Super { args, block, span })
            }

            _ => {
                self.current -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn identifier(&mut self, name: String, span: Span) -> GarnetResult<Expr> {
        if name == "block_given?" {
            if self.check_call_paren() {
                self.advance();
                self.consume(&TokenKind::RightParen, "Expected ')' after 'block_given?('")?;
            }
            return Ok(Expr::BlockGiven { span });
        }

        if self.is_local(&name) && !self.check_call_paren() {
            return Ok(Expr::Local { name, span });
        }

        self.call_rest(None, name, span)
    }

    fn optional_value(&mut self) -> GarnetResult<Option<Box<Expr>>> {
        if self.can_start_value() {
            Ok(Some(Box::new(self.expression()?)))
        } else {
            Ok(None)
        }
    }

    fn can_start_value(&self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::End
                | TokenKind::RightBrace
                | TokenKind::RightParen
                | TokenKind::If
                | TokenKind::Unless
                | TokenKind::While
                | TokenKind::Until
                | TokenKind::Rescue
                | TokenKind::Else
                | TokenKind::Elsif
                | TokenKind::When
                | TokenKind::Then
                | TokenKind::Do
                | TokenKind::AndKeyword
                | TokenKind::OrKeyword
        )
    }

    fn interpolated(&mut self, first: Vec<u8>, span: Span) -> GarnetResult<Expr> {
        let mut parts = vec![StringPart::Literal(first)];

        loop {
            if !matches!(
                self.peek().kind,
                TokenKind::StringPart(_) | TokenKind::StringEnd(_)
            ) {
                let saved = std::mem::replace(&mut self.no_do, 0);
                let expr = self.statement();
                self.no_do = saved;
                parts.push(StringPart::Interpolation(expr?));
            }

            match self.peek().kind.clone() {
                TokenKind::StringPart(text) => {
                    self.advance();
                    parts.push(StringPart::Literal(text));
                }
                TokenKind::StringEnd(text) => {
                    self.advance();
                    parts.push(StringPart::Literal(text));
                    break;
                }
                _ => {
                    return Err(self
                        .error("Unexpected token in string interpolation")
                        .with_help("Each '#{' must contain a single expression"));
                }
            }
        }

        Ok(Expr::Interpolated { parts, span })
    }

    fn hash_literal(&mut self, span: Span) -> GarnetResult<Expr> {
        let mut entries = Vec::new();
        self.skip_newlines();

        while !self.check(&TokenKind::RightBrace) {
            let key = if let TokenKind::Label(name) = &self.peek().kind {
                let name = name.clone();
                let key_span = self.advance().span;
                Expr::Symbol {
                    name,
                    span: key_span,
                }
            } else {
                let key = self.expression()?;
                self.skip_newlines();
                self.consume(&TokenKind::Arrow, "Expected '=>' after hash key")?;
                key
            };
            self.skip_newlines();
            let value = self.expression()?;
            entries.push((key, value));

            self.skip_newlines();
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }

        self.consume(&TokenKind::RightBrace, "Expected '}' after hash entries")?;
        Ok(Expr::Hash { entries, span })
    }

    fn if_tail(&mut self, span: Span) -> GarnetResult<Expr> {
        let condition = self.expression_statement()?;
        self.match_token(&TokenKind::Then);
        let then_body = self.statements(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End])?;

        let else_body = if self.check(&TokenKind::Elsif) {
            let elsif_span = self.advance().span;
            Some(vec![self.if_tail(elsif_span)?])
        } else if self.match_token(&TokenKind::Else) {
            Some(self.statements(&[TokenKind::End])?)
        } else {
            None
        };

        Ok(Expr::If {
            condition: Box::new(condition),
            then_body,
            else_body,
            span,
        })
    }

    fn case_expression(&mut self, span: Span) -> GarnetResult<Expr> {
        let subject = if self.check_terminator() {
            None
        } else {
            Some(Box::new(self.expression_statement()?))
        };
        self.skip_terminators();

        let mut whens = Vec::new();
        while self.match_token(&TokenKind::When) {
            let mut patterns = Vec::new();
            loop {
                patterns.push(self.splat_or_expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            self.match_token(&TokenKind::Then);
            let body = self.statements(&[TokenKind::When, TokenKind::Else, TokenKind::End])?;
            whens.push((patterns, body));
        }

        if whens.is_empty() {
            return Err(self.error("Expected 'when' after 'case'"));
        }

        let else_body = if self.match_token(&TokenKind::Else) {
            Some(self.statements(&[TokenKind::End])?)
        } else {
            None
        };
        self.consume(&TokenKind::End, "Expected 'end' to close 'case'")?;

        Ok(Expr::Case {
            subject,
            whens,
            else_body,
            span,
        })
    }

    /// Statements with optional `rescue`/`else`/`ensure` clauses, up to `end`
    fn body_with_rescue(&mut self, span: Span) -> GarnetResult<Body> {
        let body = self.statements(&[
            TokenKind::Rescue,
            TokenKind::Else,
            TokenKind::Ensure,
            TokenKind::End,
        ])?;

        let mut rescues = Vec::new();
        while self.check(&TokenKind::Rescue) {
            let rescue_span = self.advance().span;
            let mut classes = Vec::new();
            while !self.check_terminator()
                && !self.check(&TokenKind::Arrow)
                && !self.check(&TokenKind::Then)
            {
                classes.push(self.ternary()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            let variable = if self.match_token(&TokenKind::Arrow) {
                let name = self.consume_identifier("Expected variable name after '=>'")?;
                self.declare(&name);
                Some(name)
            } else {
                None
            };
            self.match_token(&TokenKind::Then);
            let clause_body = self.statements(&[
                TokenKind::Rescue,
                TokenKind::Else,
                TokenKind::Ensure,
                TokenKind::End,
            ])?;
            rescues.push(RescueClause {
                classes,
                variable,
                body: clause_body,
                span: rescue_span,
            });
        }

        let else_body = if self.match_token(&TokenKind::Else) {
            Some(self.statements(&[TokenKind::Ensure, TokenKind::End])?)
        } else {
            None
        };
        let ensure = if self.match_token(&TokenKind::Ensure) {
            Some(self.statements(&[TokenKind::End])?)
        } else {
            None
        };

        if rescues.is_empty() && else_body.is_none() && ensure.is_none() {
            return Ok(body);
        }

        Ok(vec![Expr::Begin {
            body,
            rescues,
            else_body,
            ensure,
            span,
        }])
    }

    // ==================== Definitions ====================

    fn def_expression(&mut self, span: Span) -> GarnetResult<Expr> {
        let mut singleton = None;
        if self.check(&TokenKind::SelfKeyword) && self.check_ahead(1, &TokenKind::Dot) {
            let self_span = self.advance().span;
            self.advance();
            singleton = Some(Expr::SelfRef { span: self_span });
        } else if matches!(self.peek().kind, TokenKind::Constant(_))
            && self.check_ahead(1, &TokenKind::Dot)
        {
            let token = self.advance().clone();
            self.advance();
            if let TokenKind::Constant(name) = token.kind {
                singleton = Some(Expr::Const {
                    scope: None,
                    name,
                    span: token.span,
                });
            }
        }

        let mut name = self.method_name()?;
        if self.check(&TokenKind::Equal)
            && !self.peek().spaced
            && self.check_ahead(1, &TokenKind::LeftParen)
            && !name.ends_with('=')
        {
            self.advance();
            name.push('=');
        }

        self.push_scope(false);
        let result = (|| -> GarnetResult<(Params, Body)> {
            let params = if self.check(&TokenKind::LeftParen) {
                self.advance();
                let params = self.parameter_list(&TokenKind::RightParen)?;
                self.consume(&TokenKind::RightParen, "Expected ')' after parameters")?;
                params
            } else if self.check_terminator() {
                Params::default()
            } else {
                self.parameter_list(&TokenKind::Newline)?
            };

            let body = self.body_with_rescue(span)?;
            self.consume(&TokenKind::End, "Expected 'end' to close method definition")?;
            Ok((params, body))
        })();
        self.pop_scope();
        let (params, body) = result?;

        Ok(Expr::Def(Box::new(FunctionDef {
            name,
            singleton,
            params,
            body,
            span,
        })))
    }

    fn method_name(&mut self) -> GarnetResult<String> {
        let token = self.advance().clone();
        let name = match token.kind {
            TokenKind::Identifier(name) | TokenKind::Constant(name) => name,
            TokenKind::LeftBracket => {
                self.consume(&TokenKind::RightBracket, "Expected ']' in method name")?;
                if self.check(&TokenKind::Equal) && !self.peek().spaced {
                    self.advance();
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::StarStar
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::EqualEqual
            | TokenKind::EqualEqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Spaceship
            | TokenKind::LessLess
            | TokenKind::Bang => token.kind.to_string(),
            // Keywords are valid method names after `def`
            TokenKind::Class
            | TokenKind::Module
            | TokenKind::End
            | TokenKind::Begin
            | TokenKind::Next
            | TokenKind::Then => token.kind.to_string(),
            _ => return Err(self.error_at(&token, "Expected method name after 'def'")),
        };
        Ok(name)
    }

    fn class_expression(&mut self, span: Span) -> GarnetResult<Expr> {
        if self.match_token(&TokenKind::LessLess) {
            let target = self.expression()?;
            self.push_scope(false);
            let body = self.statements(&[TokenKind::End]);
            self.pop_scope();
            let body = body?;
            self.consume(&TokenKind::End, "Expected 'end' to close 'class << self'")?;
            return Ok(Expr::SingletonClass {
                target: Box::new(target),
                body,
                span,
            });
        }

        let (scope, name) = self.definition_path("class")?;
        let superclass = if self.match_token(&TokenKind::Less) {
            Some(self.expression()?)
        } else {
            None
        };

        let body = self.definition_body("class")?;
        Ok(Expr::ClassDef(Box::new(ClassDef {
            kind: ClassKind::Class,
            name,
            scope,
            superclass,
            body,
            span,
        })))
    }

    fn module_expression(&mut self, span: Span) -> GarnetResult<Expr> {
        let (scope, name) = self.definition_path("module")?;
        let body = self.definition_body("module")?;
        Ok(Expr::ClassDef(Box::new(ClassDef {
            kind: ClassKind::Module,
            name,
            scope,
            superclass: None,
            body,
            span,
        })))
    }

    /// `Name` or `Outer::Inner::Name`
    fn definition_path(&mut self, keyword: &str) -> GarnetResult<(Option<Expr>, String)> {
        let token = self.advance().clone();
        let mut name = match token.kind {
            TokenKind::Constant(name) => name,
            _ => {
                return Err(self
                    .error_at(&token, &format!("Expected {} name", keyword))
                    .with_help(format!("{} names must start with an uppercase letter", keyword)))
            }
        };
        let mut scope: Option<Expr> = None;
        let mut span = token.span;

        while self.match_token(&TokenKind::ColonColon) {
            let next = self.advance().clone();
            let inner = match next.kind {
                TokenKind::Constant(inner) => inner,
                _ => return Err(self.error_at(&next, "Expected constant name after '::'")),
            };
            scope = Some(Expr::Const {
                scope: scope.map(Box::new),
                name,
                span,
            });
            name = inner;
            span = next.span;
        }

        Ok((scope, name))
    }

    fn definition_body(&mut self, keyword: &str) -> GarnetResult<Body> {
        self.push_scope(false);
        let body = self.statements(&[TokenKind::End]);
        self.pop_scope();
        let body = body?;
        self.consume(
            &TokenKind::End,
            &format!("Expected 'end' to close '{}'", keyword),
        )?;
        Ok(body)
    }

    // ==================== Scopes ====================

    fn push_scope(&mut self, is_block: bool) {
        self.scopes.push(LocalScope {
            names: FxHashSet::default(),
            is_block,
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.names.contains(name) {
                return true;
            }
            if !scope.is_block {
                break;
            }
        }
        false
    }

    // ==================== Token helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
            self.previous()
        } else {
            self.peek()
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.iter().any(|kind| self.check(kind))
    }

    /// Check token at offset n ahead (0 = current, 1 = next, etc)
    fn check_ahead(&self, n: usize, kind: &TokenKind) -> bool {
        let idx = self.current + n;
        if idx >= self.tokens.len() {
            return false;
        }
        std::mem::discriminant(&self.tokens[idx].kind) == std::mem::discriminant(kind)
    }

    fn check_terminator(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> GarnetResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> GarnetResult<String> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(message))
        }
    }

    fn unexpected(&self) -> GarnetError {
        let token = self.peek();
        self.error_at(token, &format!("syntax error, unexpected {}", token.kind))
    }

    fn error(&self, message: &str) -> GarnetError {
        let token = self.peek();
        let found = format!("{}, found {}", message, token.kind);
        self.error_at(token, &found)
    }

    fn error_at(&self, token: &Token, message: &str) -> GarnetError {
        GarnetError::syntax_error(message, token.span, &self.file).with_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> GarnetResult<Program> {
        let tokens = Scanner::new(source, "test.rb").scan_tokens()?;
        Parser::new(tokens, "test.rb", source).parse()
    }

    #[test]
    fn test_command_call_vs_local() {
        let program = parse("def concat(a, b)\n  a + b\nend\n\nconcat \"Hello\", \"World\"\n")
            .unwrap();
        assert_eq!(program.body.len(), 2);
        match &program.body[1] {
            Expr::Call {
                receiver: None,
                name,
                args,
                ..
            } => {
                assert_eq!(name, "concat");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_assigned_name_becomes_local() {
        let program = parse("x = 1\nx - 1").unwrap();
        assert!(matches!(
            &program.body[1],
            Expr::Binary {
                op: BinaryOp::Sub,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_name_with_spaced_minus_is_command() {
        let program = parse("puts -1").unwrap();
        match &program.body[0] {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "puts");
                assert!(matches!(args[0], Expr::Integer { value: -1, .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_brace_block_attaches_to_call() {
        let program = parse("ARGV.inject { |x,y| x+y }").unwrap();
        match &program.body[0] {
            Expr::Call {
                name,
                block: Some(BlockArg::Literal(block)),
                ..
            } => {
                assert_eq!(name, "inject");
                assert_eq!(block.params.required, vec!["x", "y"]);
            }
            other => panic!("expected call with block, got {:?}", other),
        }
    }

    #[test]
    fn test_do_block_goes_to_command_call() {
        let program = parse("foo bar do |x|\n x\nend").unwrap();
        match &program.body[0] {
            Expr::Call {
                name, args, block, ..
            } => {
                assert_eq!(name, "foo");
                assert_eq!(args.len(), 1);
                assert!(block.is_some());
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_modifiers_and_ternary() {
        let program = parse("x = 1 if true\ny = x > 0 ? :pos : :neg").unwrap();
        assert!(matches!(program.body[0], Expr::If { .. }));
        assert!(matches!(
            &program.body[1],
            Expr::Assign { value, .. } if matches!(**value, Expr::If { .. })
        ));
    }

    #[test]
    fn test_class_with_rescue_in_method() {
        let source = "class Foo < Bar\n  def go\n    risky\n  rescue ArgumentError => e\n    e\n  end\nend";
        let program = parse(source).unwrap();
        match &program.body[0] {
            Expr::ClassDef(class) => {
                assert_eq!(class.name, "Foo");
                assert!(class.superclass.is_some());
                match &class.body[0] {
                    Expr::Def(def) => assert!(matches!(def.body[0], Expr::Begin { .. })),
                    other => panic!("expected def, got {:?}", other),
                }
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_hash_and_keyword_args() {
        let program = parse("h = { \"a\" => 1, b: 2 }\nfoo(1, key: 3)").unwrap();
        assert!(matches!(
            &program.body[0],
            Expr::Assign { value, .. } if matches!(&**value, Expr::Hash { entries, .. } if entries.len() == 2)
        ));
        match &program.body[1] {
            Expr::Call { args, .. } => assert!(matches!(args[1], Expr::Hash { .. })),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_assign() {
        let program = parse("a, b = 1, 2").unwrap();
        assert!(matches!(
            &program.body[0],
            Expr::MultiAssign { targets, .. } if targets.len() == 2
        ));
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SyntaxError);
        assert!(err.message.contains("unexpected"), "{}", err.message);
    }

    #[test]
    fn test_parameter_kinds() {
        let program = parse("def f(a, b = 2, *rest, &blk)\n  a\nend").unwrap();
        let Expr::Def(def) = &program.body[0] else {
            panic!("expected def, got {:?}", program.body[0]);
        };
        assert_eq!(def.params.required, vec!["a"]);
        assert_eq!(def.params.optional.len(), 1);
        assert_eq!(def.params.optional[0].0, "b");
        assert_eq!(def.params.rest.as_deref(), Some("rest"));
        assert_eq!(def.params.block.as_deref(), Some("blk"));

        let err = parse("def g(a = 1, b)\nend").unwrap_err();
        assert!(err.message.contains("Required parameter"), "{}", err.message);
    }

    #[test]
    fn test_missing_end_is_error() {
        let err = parse("def foo\n  1\n").unwrap_err();
        assert!(err.message.contains("Expected 'end'"), "{}", err.message);
    }
}
