// Garnet Compiler
// Compiles AST to bytecode

use super::chunk::{Chunk, Constant, FunctionConstant};
use super::opcode::{class_flags, send_flags, OpCode};
use crate::ast::*;
use crate::error::{GarnetError, GarnetResult, Span};
use crate::vm::interner::intern;
use std::rc::Rc;

/// Jump targets of an enclosing `while`/`until`
struct LoopContext {
    start: usize,
    break_jumps: Vec<usize>,
    /// Open `begin` blocks when the loop started
    try_depth: usize,
}

/// Compiler state for one function body (method, block, class body or program)
struct FunctionScope {
    name: String,
    chunk: Chunk,
    /// Slot index = position; hidden temporaries have empty names
    locals: Vec<String>,
    is_block: bool,
    /// Parameters of a method body, forwarded by bare `super`
    params: Option<Params>,
    loops: Vec<LoopContext>,
    try_depth: usize,
}

impl FunctionScope {
    fn new(name: impl Into<String>, is_block: bool, params: Option<Params>) -> Self {
        Self {
            name: name.into(),
            chunk: Chunk::new(),
            locals: Vec::new(),
            is_block,
            params,
            loops: Vec::new(),
            try_depth: 0,
        }
    }
}

/// The Garnet bytecode compiler
pub struct Compiler {
    scope: FunctionScope,
    /// Scopes the current one is nested in, innermost last
    enclosing: Vec<FunctionScope>,
    file: String,
    source: String,
}

impl Compiler {
    pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            scope: FunctionScope::new("<main>", false, None),
            enclosing: Vec::new(),
            file: file.into(),
            source: source.into(),
        }
    }

    /// Compile a program into its top-level function
    pub fn compile(&mut self, program: &Program) -> GarnetResult<Rc<FunctionConstant>> {
        self.compile_body(&program.body, Span::default())?;
        self.emit_op(OpCode::Return, Span::default());
        let scope = std::mem::replace(&mut self.scope, FunctionScope::new("<main>", false, None));
        Ok(Rc::new(FunctionConstant {
            name: scope.name,
            required: 0,
            optional: 0,
            rest: false,
            block_param: false,
            local_count: scope.locals.len(),
            is_block: false,
            chunk: scope.chunk,
            file: self.file.clone(),
        }))
    }

    fn current_scope(&self) -> &FunctionScope {
        &self.scope
    }

    fn current_scope_mut(&mut self) -> &mut FunctionScope {
        &mut self.scope
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.scope.chunk
    }

    fn push_scope(&mut self, scope: FunctionScope) {
        let outer = std::mem::replace(&mut self.scope, scope);
        self.enclosing.push(outer);
    }

    fn pop_scope(&mut self) -> FunctionScope {
        let outer = self
            .enclosing
            .pop()
            .unwrap_or_else(|| FunctionScope::new("<main>", false, None));
        std::mem::replace(&mut self.scope, outer)
    }

    /// Innermost first
    fn scopes(&self) -> impl Iterator<Item = &FunctionScope> {
        std::iter::once(&self.scope).chain(self.enclosing.iter().rev())
    }

    fn error(&self, message: &str, span: Span) -> GarnetError {
        GarnetError::syntax_error(message, span, &self.file).with_source(&self.source)
    }

    // ==================== Bodies ====================

    /// Compile a sequence; leaves the last value (or nil) on the stack
    fn compile_body(&mut self, body: &[Expr], span: Span) -> GarnetResult<()> {
        if body.is_empty() {
            self.emit_op(OpCode::Nil, span);
            return Ok(());
        }
        for (i, expr) in body.iter().enumerate() {
            self.compile_expr(expr)?;
            if i + 1 < body.len() {
                self.emit_op(OpCode::Pop, expr.span());
            }
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: &str,
        params: &Params,
        body: &[Expr],
        is_block: bool,
        span: Span,
    ) -> GarnetResult<Rc<FunctionConstant>> {
        let method_params = if is_block { None } else { Some(params.clone()) };
        self.push_scope(FunctionScope::new(name, is_block, method_params));

        for param in params.names() {
            self.current_scope_mut().locals.push(param);
        }

        // Defaults run only for arguments the caller left out
        for (i, (param, default)) in params.optional.iter().enumerate() {
            let index = params.required.len() + i;
            if index > u8::MAX as usize {
                return Err(self.error("Too many parameters", span));
            }
            self.emit_op(OpCode::ArgGiven, default.span());
            self.current_chunk().write(index as u8, default.span());
            let skip = self.current_chunk().current_offset();
            self.emit_u16(0xFFFF, default.span());
            self.compile_expr(default)?;
            self.store_local(param, default.span())?;
            self.emit_op(OpCode::Pop, default.span());
            self.patch_jump(skip);
        }

        self.compile_body(body, span)?;
        self.emit_op(OpCode::Return, span);

        let scope = self.pop_scope();
        Ok(Rc::new(FunctionConstant {
            name: scope.name,
            required: params.required.len(),
            optional: params.optional.len(),
            rest: params.rest.is_some(),
            block_param: params.block.is_some(),
            local_count: scope.locals.len(),
            is_block,
            chunk: scope.chunk,
            file: self.file.clone(),
        }))
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> GarnetResult<()> {
        match expr {
            Expr::Nil { span } => self.emit_op(OpCode::Nil, *span),
            Expr::True { span } => self.emit_op(OpCode::True, *span),
            Expr::False { span } => self.emit_op(OpCode::False, *span),
            Expr::SelfRef { span } => self.emit_op(OpCode::PushSelf, *span),
            Expr::Integer { value, span } => {
                self.emit_constant(Constant::Integer(*value), *span)?
            }
            Expr::Float { value, span } => self.emit_constant(Constant::Float(*value), *span)?,
            Expr::Str { value, span } => {
                self.emit_constant(Constant::String(value.clone()), *span)?
            }
            Expr::Symbol { name, span } => {
                self.emit_constant(Constant::Symbol(intern(name)), *span)?
            }
            Expr::Interpolated { parts, span } => {
                let mut count = 0usize;
                for part in parts {
                    match part {
                        StringPart::Literal(text) if text.is_empty() => continue,
                        StringPart::Literal(text) => {
                            self.emit_constant(Constant::String(text.clone()), *span)?
                        }
                        StringPart::Interpolation(expr) => self.compile_expr(expr)?,
                    }
                    count += 1;
                }
                self.emit_op(OpCode::BuildString, *span);
                self.emit_u16(self.checked_u16(count, *span)?, *span);
            }
            Expr::Array { elements, span } => self.compile_array(elements, *span)?,
            Expr::Hash { entries, span } => {
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_op(OpCode::BuildHash, *span);
                self.emit_u16(self.checked_u16(entries.len(), *span)?, *span);
            }
            Expr::Range {
                start,
                end,
                exclusive,
                span,
            } => {
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.emit_op(OpCode::BuildRange, *span);
                self.current_chunk().write(*exclusive as u8, *span);
            }
            Expr::Splat { span, .. } => self.compile_array(std::slice::from_ref(expr), *span)?,

            Expr::Local { name, span } => self.load_local(name, *span)?,
            Expr::InstanceVar { name, span } => self.emit_named(OpCode::GetIvar, name, *span)?,
            Expr::GlobalVar { name, span } => self.emit_named(OpCode::GetGlobal, name, *span)?,
            Expr::Const { scope, name, span } => match scope {
                Some(scope) => {
                    self.compile_expr(scope)?;
                    self.emit_named(OpCode::GetScopedConst, name, *span)?;
                }
                None => self.emit_named(OpCode::GetConst, name, *span)?,
            },

            Expr::Assign {
                target,
                value,
                span,
            } => self.compile_assign(target, value, *span)?,
            Expr::OpAssign {
                target,
                op,
                value,
                span,
            } => self.compile_op_assign(target, *op, value, *span)?,
            Expr::MultiAssign {
                targets,
                value,
                span,
            } => {
                self.compile_expr(value)?;
                self.emit_op(OpCode::Dup, *span);
                if targets.len() > u8::MAX as usize {
                    return Err(self.error("Too many assignment targets", *span));
                }
                self.emit_op(OpCode::ExpandArray, *span);
                self.current_chunk().write(targets.len() as u8, *span);
                for target in targets.iter().rev() {
                    self.store_simple(target, *span)?;
                    self.emit_op(OpCode::Pop, *span);
                }
            }

            Expr::Call {
                receiver,
                name,
                args,
                block,
                is_vcall,
                span,
            } => self.compile_call(
                receiver.as_deref(),
                name,
                args,
                block.as_ref(),
                *is_vcall,
                *span,
            )?,
            Expr::Super { args, block, span } => self.compile_super(args.as_deref(), block.as_ref(), *span)?,
            Expr::Yield { args, span } => {
                let (argc, splat) = self.compile_args(args, *span)?;
                self.emit_op(OpCode::Yield, *span);
                self.current_chunk().write(argc, *span);
                let flags = if splat { send_flags::SPLAT } else { 0 };
                self.current_chunk().write(flags, *span);
            }
            Expr::BlockGiven { span } => self.emit_op(OpCode::BlockGiven, *span),

            Expr::Unary { op, operand, span } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Negate => self.emit_op(OpCode::Negate, *span),
                    UnaryOp::Not => self.emit_op(OpCode::Not, *span),
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_binary(*op, *span)?;
            }
            Expr::Logical {
                op,
                left,
                right,
                span,
            } => {
                self.compile_expr(left)?;
                self.emit_op(OpCode::Dup, *span);
                let jump = match op {
                    LogicalOp::And => self.emit_jump(OpCode::JumpIfFalse, *span),
                    LogicalOp::Or => self.emit_jump(OpCode::JumpIfTrue, *span),
                };
                self.emit_op(OpCode::Pop, *span);
                self.compile_expr(right)?;
                self.patch_jump(jump);
            }

            Expr::If {
                condition,
                then_body,
                else_body,
                span,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, *span);
                self.compile_body(then_body, *span)?;
                let end_jump = self.emit_jump(OpCode::Jump, *span);
                self.patch_jump(else_jump);
                match else_body {
                    Some(body) => self.compile_body(body, *span)?,
                    None => self.emit_op(OpCode::Nil, *span),
                }
                self.patch_jump(end_jump);
            }
            Expr::While {
                condition,
                body,
                negate,
                span,
            } => self.compile_while(condition, body, *negate, *span)?,
            Expr::Case {
                subject,
                whens,
                else_body,
                span,
            } => self.compile_case(subject.as_deref(), whens, else_body.as_deref(), *span)?,
            Expr::Break { value, span } => self.compile_break(value.as_deref(), *span)?,
            Expr::Next { value, span } => self.compile_next(value.as_deref(), *span)?,
            Expr::Return { value, span } => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_op(OpCode::Nil, *span),
                }
                self.emit_op(OpCode::Return, *span);
            }
            Expr::Begin {
                body,
                rescues,
                else_body,
                ensure,
                span,
            } => self.compile_begin(body, rescues, else_body.as_deref(), ensure.as_deref(), *span)?,
            Expr::Sequence { body, span } => self.compile_body(body, *span)?,

            Expr::Def(def) => self.compile_def(def)?,
            Expr::ClassDef(class) => self.compile_class(class)?,
            Expr::SingletonClass { target, body, span } => {
                self.compile_expr(target)?;
                let function =
                    self.compile_function("singleton class", &Params::default(), body, false, *span)?;
                let idx = self.make_constant(Constant::Function(function), *span)?;
                self.emit_op(OpCode::SingletonClass, *span);
                self.emit_u16(idx, *span);
            }
        }
        Ok(())
    }

    fn emit_binary(&mut self, op: BinaryOp, span: Span) -> GarnetResult<()> {
        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Less => OpCode::Less,
            BinaryOp::LessEqual => OpCode::LessEqual,
            BinaryOp::Greater => OpCode::Greater,
            BinaryOp::GreaterEqual => OpCode::GreaterEqual,
            BinaryOp::Equal => OpCode::Equal,
            BinaryOp::NotEqual => {
                self.emit_op(OpCode::Equal, span);
                self.emit_op(OpCode::Not, span);
                return Ok(());
            }
            BinaryOp::Pow | BinaryOp::CaseEqual | BinaryOp::Compare | BinaryOp::Shl => {
                return self.emit_send(op.method_name(), 1, 0, span);
            }
        };
        self.emit_op(opcode, span);
        Ok(())
    }

    fn compile_array(&mut self, elements: &[Expr], span: Span) -> GarnetResult<()> {
        if !elements.iter().any(|e| matches!(e, Expr::Splat { .. })) {
            for element in elements {
                self.compile_expr(element)?;
            }
            self.emit_op(OpCode::BuildArray, span);
            self.emit_u16(self.checked_u16(elements.len(), span)?, span);
            return Ok(());
        }

        self.emit_op(OpCode::BuildArray, span);
        self.emit_u16(0, span);
        for element in elements {
            match element {
                Expr::Splat { expr, span } => {
                    self.compile_expr(expr)?;
                    self.emit_op(OpCode::ArrayConcat, *span);
                }
                other => {
                    self.compile_expr(other)?;
                    self.emit_op(OpCode::ArrayPush, other.span());
                }
            }
        }
        Ok(())
    }

    // ==================== Variables ====================

    /// Find a local by walking out through enclosing blocks: (depth, slot)
    fn resolve_local(&self, name: &str) -> Option<(u8, u16)> {
        let mut depth = 0u8;
        for scope in self.scopes() {
            if let Some(slot) = scope.locals.iter().rposition(|local| local == name) {
                return Some((depth, slot as u16));
            }
            if !scope.is_block {
                break;
            }
            depth = depth.checked_add(1)?;
        }
        None
    }

    fn declare_local(&mut self, name: &str, span: Span) -> GarnetResult<u16> {
        let locals = &mut self.current_scope_mut().locals;
        locals.push(name.to_string());
        let slot = locals.len() - 1;
        self.checked_u16(slot, span)
    }

    fn load_local(&mut self, name: &str, span: Span) -> GarnetResult<()> {
        match self.resolve_local(name) {
            Some((0, slot)) => {
                self.emit_op(OpCode::GetLocal, span);
                self.emit_u16(slot, span);
            }
            Some((depth, slot)) => {
                self.emit_op(OpCode::GetUpvalue, span);
                self.current_chunk().write(depth, span);
                self.emit_u16(slot, span);
            }
            None => {
                let slot = self.declare_local(name, span)?;
                self.emit_op(OpCode::GetLocal, span);
                self.emit_u16(slot, span);
            }
        }
        Ok(())
    }

    /// Store the top of stack into a local; the value stays on the stack
    fn store_local(&mut self, name: &str, span: Span) -> GarnetResult<()> {
        match self.resolve_local(name) {
            Some((0, slot)) => {
                self.emit_op(OpCode::SetLocal, span);
                self.emit_u16(slot, span);
            }
            Some((depth, slot)) => {
                self.emit_op(OpCode::SetUpvalue, span);
                self.current_chunk().write(depth, span);
                self.emit_u16(slot, span);
            }
            None => {
                let slot = self.declare_local(name, span)?;
                self.emit_op(OpCode::SetLocal, span);
                self.emit_u16(slot, span);
            }
        }
        Ok(())
    }

    fn hidden_local(&mut self, span: Span) -> GarnetResult<u16> {
        self.declare_local("", span)
    }

    fn emit_get_slot(&mut self, slot: u16, span: Span) {
        self.emit_op(OpCode::GetLocal, span);
        self.emit_u16(slot, span);
    }

    fn emit_set_slot(&mut self, slot: u16, span: Span) {
        self.emit_op(OpCode::SetLocal, span);
        self.emit_u16(slot, span);
    }

    fn load_simple(&mut self, target: &Target, span: Span) -> GarnetResult<()> {
        match target {
            Target::Local(name) => self.load_local(name, span),
            Target::InstanceVar(name) => self.emit_named(OpCode::GetIvar, name, span),
            Target::GlobalVar(name) => self.emit_named(OpCode::GetGlobal, name, span),
            Target::Constant(name) => self.emit_named(OpCode::GetConst, name, span),
            Target::Index { .. } | Target::Attribute { .. } => {
                Err(self.error("Invalid assignment target", span))
            }
        }
    }

    /// Store into a variable-like target, value stays on the stack
    fn store_simple(&mut self, target: &Target, span: Span) -> GarnetResult<()> {
        match target {
            Target::Local(name) => self.store_local(name, span),
            Target::InstanceVar(name) => self.emit_named(OpCode::SetIvar, name, span),
            Target::GlobalVar(name) => self.emit_named(OpCode::SetGlobal, name, span),
            Target::Constant(name) => self.emit_named(OpCode::SetConst, name, span),
            Target::Index { .. } | Target::Attribute { .. } => {
                Err(self.error("Invalid assignment target", span))
            }
        }
    }

    fn compile_assign(&mut self, target: &Target, value: &Expr, span: Span) -> GarnetResult<()> {
        match target {
            Target::Index { receiver, args } => {
                self.compile_expr(receiver)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.compile_expr(value)?;
                let argc = self.checked_argc(args.len() + 1, span)?;
                self.emit_send("[]=", argc, send_flags::ATTRASGN, span)
            }
            Target::Attribute { receiver, name } => {
                self.compile_expr(receiver)?;
                self.compile_expr(value)?;
                self.emit_send(&format!("{}=", name), 1, send_flags::ATTRASGN, span)
            }
            simple => {
                self.compile_expr(value)?;
                self.store_simple(simple, span)
            }
        }
    }

    fn compile_op_assign(
        &mut self,
        target: &Target,
        op: AssignOp,
        value: &Expr,
        span: Span,
    ) -> GarnetResult<()> {
        let (setter, argc) = match target {
            Target::Index { receiver, args } => {
                // [recv, args...] twice, then read the current value
                self.compile_expr(receiver)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let n = self.checked_argc(args.len(), span)?;
                for _ in 0..=n {
                    self.emit_op(OpCode::Pick, span);
                    self.current_chunk().write(n, span);
                }
                self.emit_send("[]", n, 0, span)?;
                ("[]=".to_string(), n + 1)
            }
            Target::Attribute { receiver, name } => {
                self.compile_expr(receiver)?;
                self.emit_op(OpCode::Dup, span);
                self.emit_send(name, 0, 0, span)?;
                (format!("{}=", name), 1)
            }
            simple => {
                self.load_simple(simple, span)?;
                match op {
                    AssignOp::Binary(op) => {
                        self.compile_expr(value)?;
                        self.emit_binary(op, span)?;
                        self.store_simple(simple, span)?;
                    }
                    AssignOp::Or | AssignOp::And => {
                        self.emit_op(OpCode::Dup, span);
                        let keep = if op == AssignOp::Or {
                            self.emit_jump(OpCode::JumpIfTrue, span)
                        } else {
                            self.emit_jump(OpCode::JumpIfFalse, span)
                        };
                        self.emit_op(OpCode::Pop, span);
                        self.compile_expr(value)?;
                        self.store_simple(simple, span)?;
                        self.patch_jump(keep);
                    }
                }
                return Ok(());
            }
        };

        // Stack: [recv, args..., current]
        match op {
            AssignOp::Binary(op) => {
                self.compile_expr(value)?;
                self.emit_binary(op, span)?;
                self.emit_send(&setter, argc, send_flags::ATTRASGN, span)?;
            }
            AssignOp::Or | AssignOp::And => {
                self.emit_op(OpCode::Dup, span);
                let keep = if op == AssignOp::Or {
                    self.emit_jump(OpCode::JumpIfTrue, span)
                } else {
                    self.emit_jump(OpCode::JumpIfFalse, span)
                };
                self.emit_op(OpCode::Pop, span);
                self.compile_expr(value)?;
                self.emit_send(&setter, argc, send_flags::ATTRASGN, span)?;
                let end = self.emit_jump(OpCode::Jump, span);
                self.patch_jump(keep);
                self.emit_op(OpCode::Slide, span);
                self.current_chunk().write(argc, span);
                self.patch_jump(end);
            }
        }
        Ok(())
    }

    // ==================== Calls ====================

    fn compile_call(
        &mut self,
        receiver: Option<&Expr>,
        name: &str,
        args: &[Expr],
        block: Option<&BlockArg>,
        is_vcall: bool,
        span: Span,
    ) -> GarnetResult<()> {
        let mut flags = 0;
        match receiver {
            Some(receiver) => self.compile_expr(receiver)?,
            None => {
                self.emit_op(OpCode::PushSelf, span);
                flags |= send_flags::FCALL;
                if is_vcall {
                    flags |= send_flags::VCALL;
                }
            }
        }

        let (argc, splat) = self.compile_args(args, span)?;
        if splat {
            flags |= send_flags::SPLAT;
        }
        if let Some(block) = block {
            self.compile_block_arg(block, span)?;
            flags |= send_flags::HAS_BLOCK;
        }

        self.emit_send(name, argc, flags, span)
    }

    /// Push arguments; with any splat they are collected into one array
    fn compile_args(&mut self, args: &[Expr], span: Span) -> GarnetResult<(u8, bool)> {
        if args.iter().any(|a| matches!(a, Expr::Splat { .. })) {
            self.compile_array(args, span)?;
            return Ok((1, true));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        Ok((self.checked_argc(args.len(), span)?, false))
    }

    fn compile_block_arg(&mut self, block: &BlockArg, span: Span) -> GarnetResult<()> {
        match block {
            BlockArg::Literal(block) => {
                let name = format!("block in {}", self.enclosing_method_name());
                let function =
                    self.compile_function(&name, &block.params, &block.body, true, block.span)?;
                let idx = self.make_constant(Constant::Function(function), block.span)?;
                self.emit_op(OpCode::MakeBlock, block.span);
                self.emit_u16(idx, block.span);
            }
            BlockArg::Pass(expr) => {
                self.compile_expr(expr)?;
                self.emit_op(OpCode::ToProc, span);
            }
        }
        Ok(())
    }

    fn enclosing_method_name(&self) -> String {
        self.scopes()
            .find(|scope| !scope.is_block)
            .map(|scope| scope.name.clone())
            .unwrap_or_else(|| "<main>".to_string())
    }

    fn compile_super(
        &mut self,
        args: Option<&[Expr]>,
        block: Option<&BlockArg>,
        span: Span,
    ) -> GarnetResult<()> {
        let mut flags = 0;
        let (argc, splat) = match args {
            Some(args) => self.compile_args(args, span)?,
            None => {
                // Bare `super` passes the method's parameters along as they are now
                let params = self
                    .scopes()
                    .find(|scope| !scope.is_block)
                    .and_then(|scope| scope.params.clone())
                    .unwrap_or_default();
                let mut forwarded: Vec<Expr> = params
                    .required
                    .iter()
                    .chain(params.optional.iter().map(|(name, _)| name))
                    .map(|name| Expr::Local {
                        name: name.clone(),
                        span,
                    })
                    .collect();
                if let Some(rest) = &params.rest {
                    forwarded.push(Expr::Splat {
                        expr: Box::new(Expr::Local {
                            name: rest.clone(),
                            span,
                        }),
                        span,
                    });
                }
                self.compile_args(&forwarded, span)?
            }
        };
        if splat {
            flags |= send_flags::SPLAT;
        }
        if let Some(block) = block {
            self.compile_block_arg(block, span)?;
            flags |= send_flags::HAS_BLOCK;
        }
        self.emit_op(OpCode::Super, span);
        self.current_chunk().write(argc, span);
        self.current_chunk().write(flags, span);
        Ok(())
    }

    fn emit_send(&mut self, name: &str, argc: u8, flags: u8, span: Span) -> GarnetResult<()> {
        let idx = self.name_constant(name, span)?;
        self.emit_op(OpCode::Send, span);
        self.emit_u16(idx, span);
        self.current_chunk().write(argc, span);
        self.current_chunk().write(flags, span);
        Ok(())
    }

    // ==================== Control Flow ====================

    fn compile_while(
        &mut self,
        condition: &Expr,
        body: &[Expr],
        negate: bool,
        span: Span,
    ) -> GarnetResult<()> {
        let start = self.current_chunk().current_offset();
        let try_depth = self.current_scope().try_depth;
        self.current_scope_mut().loops.push(LoopContext {
            start,
            break_jumps: Vec::new(),
            try_depth,
        });

        self.compile_expr(condition)?;
        let exit = if negate {
            self.emit_jump(OpCode::JumpIfTrue, span)
        } else {
            self.emit_jump(OpCode::JumpIfFalse, span)
        };
        self.compile_body(body, span)?;
        self.emit_op(OpCode::Pop, span);
        self.emit_loop(start, span);

        self.patch_jump(exit);
        self.emit_op(OpCode::Nil, span);

        if let Some(context) = self.current_scope_mut().loops.pop() {
            for jump in context.break_jumps {
                self.patch_jump(jump);
            }
        }
        Ok(())
    }

    fn compile_break(&mut self, value: Option<&Expr>, span: Span) -> GarnetResult<()> {
        match value {
            Some(value) => self.compile_expr(value)?,
            None => self.emit_op(OpCode::Nil, span),
        }

        if let Some(loop_try_depth) = self.current_scope().loops.last().map(|l| l.try_depth) {
            self.close_tries(loop_try_depth, span);
            let jump = self.emit_jump(OpCode::Jump, span);
            if let Some(context) = self.current_scope_mut().loops.last_mut() {
                context.break_jumps.push(jump);
            }
            return Ok(());
        }

        if self.current_scope().is_block {
            self.emit_op(OpCode::BlockBreak, span);
            return Ok(());
        }

        Err(self.error("Invalid break", span))
    }

    fn compile_next(&mut self, value: Option<&Expr>, span: Span) -> GarnetResult<()> {
        if let Some((start, loop_try_depth)) = self
            .current_scope()
            .loops
            .last()
            .map(|l| (l.start, l.try_depth))
        {
            self.close_tries(loop_try_depth, span);
            self.emit_loop(start, span);
            return Ok(());
        }

        if self.current_scope().is_block {
            match value {
                Some(value) => self.compile_expr(value)?,
                None => self.emit_op(OpCode::Nil, span),
            }
            self.emit_op(OpCode::Return, span);
            return Ok(());
        }

        Err(self.error("Invalid next", span))
    }

    /// Pop the handlers of `begin` blocks opened inside the loop
    fn close_tries(&mut self, loop_try_depth: usize, span: Span) {
        let open = self.current_scope().try_depth - loop_try_depth;
        for _ in 0..open {
            self.emit_op(OpCode::TryEnd, span);
        }
    }

    fn compile_case(
        &mut self,
        subject: Option<&Expr>,
        whens: &[(Vec<Expr>, Body)],
        else_body: Option<&[Expr]>,
        span: Span,
    ) -> GarnetResult<()> {
        let subject_slot = match subject {
            Some(subject) => {
                self.compile_expr(subject)?;
                let slot = self.hidden_local(span)?;
                self.emit_set_slot(slot, span);
                self.emit_op(OpCode::Pop, span);
                Some(slot)
            }
            None => None,
        };

        let mut end_jumps = Vec::new();
        for (patterns, body) in whens {
            let mut body_jumps = Vec::new();
            for pattern in patterns {
                let pattern_span = pattern.span();
                match (pattern, subject_slot) {
                    (Expr::Splat { expr, .. }, Some(slot)) => {
                        self.compile_expr(expr)?;
                        self.emit_get_slot(slot, pattern_span);
                        self.emit_send("include?", 1, 0, pattern_span)?;
                    }
                    (pattern, Some(slot)) => {
                        self.compile_expr(pattern)?;
                        self.emit_get_slot(slot, pattern_span);
                        self.emit_send("===", 1, 0, pattern_span)?;
                    }
                    (pattern, None) => self.compile_expr(pattern)?,
                }
                body_jumps.push(self.emit_jump(OpCode::JumpIfTrue, pattern_span));
            }
            let next_when = self.emit_jump(OpCode::Jump, span);
            for jump in body_jumps {
                self.patch_jump(jump);
            }
            self.compile_body(body, span)?;
            end_jumps.push(self.emit_jump(OpCode::Jump, span));
            self.patch_jump(next_when);
        }

        match else_body {
            Some(body) => self.compile_body(body, span)?,
            None => self.emit_op(OpCode::Nil, span),
        }
        for jump in end_jumps {
            self.patch_jump(jump);
        }
        Ok(())
    }

    fn compile_begin(
        &mut self,
        body: &[Expr],
        rescues: &[RescueClause],
        else_body: Option<&[Expr]>,
        ensure: Option<&[Expr]>,
        span: Span,
    ) -> GarnetResult<()> {
        let ensure = match ensure {
            Some(ensure) => ensure,
            None => return self.compile_rescue(body, rescues, else_body, span),
        };

        let handler = self.emit_jump(OpCode::TryStart, span);
        self.current_scope_mut().try_depth += 1;
        let result = self.compile_rescue(body, rescues, else_body, span);
        self.current_scope_mut().try_depth -= 1;
        result?;
        self.emit_op(OpCode::TryEnd, span);

        // Normal exit runs the ensure body and keeps the begin value
        self.compile_body(ensure, span)?;
        self.emit_op(OpCode::Pop, span);
        let end = self.emit_jump(OpCode::Jump, span);

        // Exceptional exit: the exception is on the stack
        self.patch_jump(handler);
        self.compile_body(ensure, span)?;
        self.emit_op(OpCode::Pop, span);
        self.emit_op(OpCode::Throw, span);

        self.patch_jump(end);
        Ok(())
    }

    fn compile_rescue(
        &mut self,
        body: &[Expr],
        rescues: &[RescueClause],
        else_body: Option<&[Expr]>,
        span: Span,
    ) -> GarnetResult<()> {
        if rescues.is_empty() {
            self.compile_body(body, span)?;
            if let Some(else_body) = else_body {
                self.emit_op(OpCode::Pop, span);
                self.compile_body(else_body, span)?;
            }
            return Ok(());
        }

        let handler = self.emit_jump(OpCode::TryStart, span);
        self.current_scope_mut().try_depth += 1;
        let result = self.compile_body(body, span);
        self.current_scope_mut().try_depth -= 1;
        result?;
        self.emit_op(OpCode::TryEnd, span);
        if let Some(else_body) = else_body {
            self.emit_op(OpCode::Pop, span);
            self.compile_body(else_body, span)?;
        }
        let mut end_jumps = vec![self.emit_jump(OpCode::Jump, span)];

        self.patch_jump(handler);
        let exception = self.hidden_local(span)?;
        self.emit_set_slot(exception, span);
        self.emit_op(OpCode::Pop, span);

        for clause in rescues {
            self.emit_get_slot(exception, clause.span);
            for class in &clause.classes {
                self.compile_expr(class)?;
            }
            if clause.classes.len() > u8::MAX as usize {
                return Err(self.error("Too many exception classes", clause.span));
            }
            self.emit_op(OpCode::RescueMatch, clause.span);
            self.current_chunk()
                .write(clause.classes.len() as u8, clause.span);
            let next_clause = self.emit_jump(OpCode::JumpIfFalse, clause.span);

            if let Some(variable) = &clause.variable {
                self.emit_get_slot(exception, clause.span);
                self.store_local(variable, clause.span)?;
                self.emit_op(OpCode::Pop, clause.span);
            }
            self.compile_body(&clause.body, clause.span)?;
            end_jumps.push(self.emit_jump(OpCode::Jump, clause.span));
            self.patch_jump(next_clause);
        }

        // Nothing matched
        self.emit_get_slot(exception, span);
        self.emit_op(OpCode::Throw, span);

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        Ok(())
    }

    // ==================== Definitions ====================

    fn compile_def(&mut self, def: &FunctionDef) -> GarnetResult<()> {
        let function = self.compile_function(&def.name, &def.params, &def.body, false, def.span)?;
        let function_idx = self.make_constant(Constant::Function(function), def.span)?;
        let name_idx = self.name_constant(&def.name, def.span)?;

        let op = match &def.singleton {
            Some(target) => {
                self.compile_expr(target)?;
                OpCode::DefSingletonMethod
            }
            None => OpCode::DefMethod,
        };
        self.emit_op(op, def.span);
        self.emit_u16(name_idx, def.span);
        self.emit_u16(function_idx, def.span);
        Ok(())
    }

    fn compile_class(&mut self, class: &ClassDef) -> GarnetResult<()> {
        let span = class.span;
        let mut flags = 0;
        if class.kind == ClassKind::Module {
            flags |= class_flags::MODULE;
        }
        if let Some(scope) = &class.scope {
            self.compile_expr(scope)?;
            flags |= class_flags::SCOPED;
        }
        if let Some(superclass) = &class.superclass {
            self.compile_expr(superclass)?;
            flags |= class_flags::HAS_SUPER;
        }

        let label = match class.kind {
            ClassKind::Class => format!("<class:{}>", class.name),
            ClassKind::Module => format!("<module:{}>", class.name),
        };
        let body = self.compile_function(&label, &Params::default(), &class.body, false, span)?;
        let body_idx = self.make_constant(Constant::Function(body), span)?;
        let name_idx = self.name_constant(&class.name, span)?;

        self.emit_op(OpCode::DefClass, span);
        self.emit_u16(name_idx, span);
        self.emit_u16(body_idx, span);
        self.current_chunk().write(flags, span);
        Ok(())
    }

    // ==================== Emit helpers ====================

    fn emit_op(&mut self, op: OpCode, span: Span) {
        self.current_chunk().write_op(op, span);
    }

    fn emit_u16(&mut self, value: u16, span: Span) {
        self.current_chunk().write_u16(value, span);
    }

    fn emit_jump(&mut self, op: OpCode, span: Span) -> usize {
        self.emit_op(op, span);
        self.emit_u16(0xFFFF, span);
        self.current_chunk().current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        self.current_chunk().patch_jump(offset);
    }

    fn emit_loop(&mut self, loop_start: usize, span: Span) {
        self.emit_op(OpCode::Loop, span);
        let offset = self.current_chunk().current_offset() - loop_start + 2;
        self.emit_u16(offset as u16, span);
    }

    fn make_constant(&mut self, constant: Constant, span: Span) -> GarnetResult<u16> {
        let idx = self.current_chunk().add_constant(constant);
        self.checked_u16(idx, span)
    }

    fn emit_constant(&mut self, constant: Constant, span: Span) -> GarnetResult<()> {
        let idx = self.make_constant(constant, span)?;
        self.emit_op(OpCode::Constant, span);
        self.emit_u16(idx, span);
        Ok(())
    }

    fn name_constant(&mut self, name: &str, span: Span) -> GarnetResult<u16> {
        let idx = self.current_chunk().symbol_constant(&intern(name));
        self.checked_u16(idx, span)
    }

    fn emit_named(&mut self, op: OpCode, name: &str, span: Span) -> GarnetResult<()> {
        let idx = self.name_constant(name, span)?;
        self.emit_op(op, span);
        self.emit_u16(idx, span);
        Ok(())
    }

    fn checked_u16(&self, value: usize, span: Span) -> GarnetResult<u16> {
        u16::try_from(value).map_err(|_| self.error("Function too large to compile", span))
    }

    fn checked_argc(&self, value: usize, span: Span) -> GarnetResult<u8> {
        u8::try_from(value).map_err(|_| self.error("Too many arguments", span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn compile(source: &str) -> GarnetResult<Rc<FunctionConstant>> {
        let tokens = Scanner::new(source, "test.rb").scan_tokens()?;
        let program = Parser::new(tokens, "test.rb", source).parse()?;
        Compiler::new("test.rb", source).compile(&program)
    }

    #[test]
    fn test_arithmetic_uses_fast_ops() {
        let function = compile("1 + 2").unwrap();
        let code = &function.chunk.code;
        assert!(code.contains(&(OpCode::Add as u8)));
        assert_eq!(code.last(), Some(&(OpCode::Return as u8)));
    }

    #[test]
    fn test_block_reads_outer_local_through_upvalue() {
        let function = compile("x = 1\n[1].each { |y| x + y }").unwrap();
        let block = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) if f.is_block => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(block.required, 1);
        assert!(block.chunk.code.contains(&(OpCode::GetUpvalue as u8)));
    }

    #[test]
    fn test_method_parameters_fill_first_slots() {
        let function = compile("def f(a, b = 2, *rest, &blk)\n  c = a\nend").unwrap();
        let method = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(method.required, 1);
        assert_eq!(method.optional, 1);
        assert!(method.rest);
        assert!(method.block_param);
        assert_eq!(method.local_count, 5);
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        let err = compile("break").unwrap_err();
        assert!(err.message.contains("Invalid break"));
    }

    #[test]
    fn test_disassembly_includes_nested_functions() {
        let function = compile("def hello\n  puts 'hi'\nend").unwrap();
        let text = function.chunk.disassemble("<main>");
        assert!(text.contains("defmethod"));
        assert!(text.contains("--- hello ---"));
    }
}
