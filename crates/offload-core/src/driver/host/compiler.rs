//! Front-end for the OpenCL C subset the host device executes.
//!
//! Names are resolved to frame slots and parameter indices while parsing,
//! so the executor never looks anything up by string.

use super::lexer::{LexError, Token, lex};
use std::{collections::HashMap, fmt, fmt::Write as _, ops::Range, sync::Arc};

const SOURCE_NAME: &str = "<program source>";

/// Deepest bracket, unary or statement nesting the parser accepts.
const MAX_NESTING: usize = 256;

/// Tallest expression tree the parser builds; bounds the executor's recursion.
const MAX_EXPR_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarType {
    Int,
    UInt,
    Size,
}

impl ScalarType {
    /// Argument size in bytes, as `clSetKernelArg` sees it.
    pub fn size(self) -> usize {
        match self {
            ScalarType::Int | ScalarType::UInt => 4,
            ScalarType::Size => 8,
        }
    }

    /// Truncate a computed value to this type's range.
    pub fn wrap(self, v: i64) -> i64 {
        match self {
            ScalarType::Int => v as i32 as i64,
            ScalarType::UInt => v as u32 as i64,
            ScalarType::Size => v,
        }
    }

    /// Operand type after the usual arithmetic conversions.
    pub fn common(self, other: ScalarType) -> ScalarType {
        match (self, other) {
            (ScalarType::Size, _) | (_, ScalarType::Size) => ScalarType::Size,
            (ScalarType::UInt, _) | (_, ScalarType::UInt) => ScalarType::UInt,
            _ => ScalarType::Int,
        }
    }

    /// Type of an integer literal. Values past the 32-bit range fall back
    /// to `size_t`, there being no `long` on this device.
    fn literal(v: i64, unsigned: bool) -> ScalarType {
        match unsigned {
            false if i32::try_from(v).is_ok() => ScalarType::Int,
            true if u32::try_from(v).is_ok() => ScalarType::UInt,
            _ => ScalarType::Size,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Size => "size_t",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Scalar { ty: ScalarType, slot: usize },
    Pointer { elem: ScalarType, read_only: bool },
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn from_token(tok: &Token) -> Option<(BinOp, u8)> {
        Some(match tok {
            Token::OrOr => (BinOp::Or, 1),
            Token::AndAnd => (BinOp::And, 2),
            Token::Pipe => (BinOp::BitOr, 3),
            Token::Caret => (BinOp::BitXor, 4),
            Token::Amp => (BinOp::BitAnd, 5),
            Token::EqEq => (BinOp::Eq, 6),
            Token::NotEq => (BinOp::Ne, 6),
            Token::Lt => (BinOp::Lt, 7),
            Token::Gt => (BinOp::Gt, 7),
            Token::Le => (BinOp::Le, 7),
            Token::Ge => (BinOp::Ge, 7),
            Token::Shl => (BinOp::Shl, 8),
            Token::Shr => (BinOp::Shr, 8),
            Token::Plus => (BinOp::Add, 9),
            Token::Minus => (BinOp::Sub, 9),
            Token::Star => (BinOp::Mul, 10),
            Token::Slash => (BinOp::Div, 10),
            Token::Percent => (BinOp::Rem, 10),
            _ => return None,
        })
    }

    /// Comparisons and logical operators yield `int` whatever their operands.
    pub fn yields_truth(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::And | BinOp::Or
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(i64, ScalarType),
    Var {
        slot: usize,
        ty: ScalarType,
    },
    Load {
        param: usize,
        elem: ScalarType,
        index: Box<Expr>,
    },
    GlobalId(Box<Expr>),
    GlobalSize(Box<Expr>),
    Cast(ScalarType, Box<Expr>),
    /// Operator, operand type, operand.
    Unary(UnOp, ScalarType, Box<Expr>),
    /// Operator, the type both operands convert to (the left operand's for
    /// shifts), operands.
    Binary(BinOp, ScalarType, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Type of the produced value.
    pub fn ty(&self) -> ScalarType {
        match self {
            Expr::Const(_, ty) | Expr::Var { ty, .. } | Expr::Cast(ty, _) => *ty,
            Expr::Load { elem, .. } => *elem,
            Expr::GlobalId(_) | Expr::GlobalSize(_) => ScalarType::Size,
            Expr::Unary(UnOp::Not, ..) => ScalarType::Int,
            Expr::Unary(_, ty, _) => *ty,
            Expr::Binary(op, ..) if op.yields_truth() => ScalarType::Int,
            Expr::Binary(_, ty, ..) => *ty,
        }
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let ty = match op {
            BinOp::Shl | BinOp::Shr => lhs.ty(),
            _ => lhs.ty().common(rhs.ty()),
        };
        Expr::Binary(op, ty, Box::new(lhs), Box::new(rhs))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Assign {
        slot: usize,
        ty: ScalarType,
        value: Expr,
    },
    Store {
        param: usize,
        elem: ScalarType,
        index: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Return,
}

#[derive(Debug)]
pub(crate) struct KernelDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Number of scalar slots (scalar params first, then locals).
    pub frame_size: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Module {
    pub kernels: Vec<Arc<KernelDef>>,
}

impl Module {
    pub fn kernel(&self, name: &str) -> Option<&Arc<KernelDef>> {
        self.kernels.iter().find(|k| k.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub(crate) struct Diagnostic {
    pub severity: Severity,
    pub offset: usize,
    pub message: String,
}

impl Diagnostic {
    fn error(offset: usize, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, offset, message: message.into() }
    }
}

pub(crate) struct CompileOutput {
    /// `None` when at least one error was reported.
    pub module: Option<Module>,
    pub log: String,
}

pub(crate) fn compile(source: &str) -> CompileOutput {
    let (module, diags) = match lex(source) {
        Ok(tokens) => {
            let mut parser = Parser::new(tokens, source.len());
            match parser.program() {
                Ok(module) => (Some(module), parser.diags),
                Err(fatal) => {
                    parser.diags.push(fatal);
                    (None, parser.diags)
                }
            }
        }
        Err(LexError { span }) => {
            let bad = source.get(span.clone()).unwrap_or("?");
            (None, vec![Diagnostic::error(span.start, format!("unexpected character '{bad}'"))])
        }
    };

    let failed = diags.iter().any(|d| d.severity == Severity::Error);
    CompileOutput {
        module: if failed { None } else { module },
        log: render_log(source, &diags),
    }
}

fn render_log(source: &str, diags: &[Diagnostic]) -> String {
    let mut log = String::new();
    for d in diags {
        let (line, col) = line_col(source, d.offset);
        let kind = match d.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        let _ = writeln!(log, "{SOURCE_NAME}:{line}:{col}: {kind}: {}", d.message);
        if let Some(text) = source.lines().nth(line - 1) {
            let _ = writeln!(log, "{text}");
            let _ = writeln!(log, "{:>width$}", "^", width = col);
        }
    }
    let errors = diags.iter().filter(|d| d.severity == Severity::Error).count();
    if errors > 0 {
        let _ = writeln!(log, "{errors} error{} generated.", if errors == 1 { "" } else { "s" });
    }
    log
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let col = offset - before.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1) + 1;
    (line, col)
}

// ─── Parser ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Symbol {
    Var {
        slot: usize,
        ty: ScalarType,
        is_const: bool,
        param: Option<usize>,
    },
    Pointer {
        param: usize,
        elem: ScalarType,
        read_only: bool,
    },
}

type PResult<T> = Result<T, Diagnostic>;

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    eof: usize,
    diags: Vec<Diagnostic>,
    scopes: Vec<HashMap<String, Symbol>>,
    next_slot: usize,
    used_params: Vec<bool>,
    depth: usize,
    /// Height of the expression tree most recently parsed.
    height: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, Range<usize>)>, eof: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            eof,
            diags: Vec::new(),
            scopes: Vec::new(),
            next_slot: 0,
            used_params: Vec::new(),
            depth: 0,
            height: 0,
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(Diagnostic::error(
                self.offset(),
                format!("bracket nesting level exceeded maximum of {MAX_NESTING}"),
            ));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Account for one more tree level on top of `self.height`.
    fn grow(&mut self, at: usize) -> PResult<()> {
        self.height += 1;
        if self.height > MAX_EXPR_DEPTH {
            return Err(Diagnostic::error(
                at,
                format!("expression exceeds maximum depth of {MAX_EXPR_DEPTH}"),
            ));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.eof, |(_, s)| s.start)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Token, what: &str) -> PResult<()> {
        if self.eat(&want) {
            Ok(())
        } else {
            Err(Diagnostic::error(self.offset(), format!("expected {what}")))
        }
    }

    fn ident(&mut self, what: &str) -> PResult<(String, usize)> {
        let at = self.offset();
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok((name, at))
            }
            _ => Err(Diagnostic::error(at, format!("expected {what}"))),
        }
    }

    fn semantic(&mut self, offset: usize, message: impl Into<String>) {
        self.diags.push(Diagnostic::error(offset, message));
    }

    fn declare(&mut self, name: String, at: usize, sym: Symbol) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.contains_key(&name) {
            self.semantic(at, format!("redefinition of '{name}'"));
        } else {
            scope.insert(name, sym);
        }
    }

    fn lookup(&mut self, name: &str) -> Option<Symbol> {
        let sym = self.scopes.iter().rev().find_map(|s| s.get(name)).copied()?;
        let param = match sym {
            Symbol::Var { param, .. } => param,
            Symbol::Pointer { param, .. } => Some(param),
        };
        if let Some(p) = param {
            self.used_params[p] = true;
        }
        Some(sym)
    }

    fn program(&mut self) -> PResult<Module> {
        let mut module = Module::default();
        while self.peek().is_some() {
            let at = self.offset();
            let kernel = self.kernel()?;
            if module.kernel(&kernel.name).is_some() {
                self.semantic(at, format!("redefinition of kernel '{}'", kernel.name));
            } else {
                module.kernels.push(Arc::new(kernel));
            }
        }
        Ok(module)
    }

    fn kernel(&mut self) -> PResult<KernelDef> {
        if !self.eat(&Token::Kernel) {
            return Err(Diagnostic::error(
                self.offset(),
                "expected '__kernel' function definition",
            ));
        }
        if !self.eat(&Token::Void) {
            return Err(Diagnostic::error(
                self.offset(),
                "kernel functions must have void return type",
            ));
        }
        let (name, _) = self.ident("kernel name")?;

        self.scopes = vec![HashMap::new()];
        self.next_slot = 0;
        self.used_params.clear();

        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        let mut param_offsets = Vec::new();
        if self.peek() == Some(&Token::Void) && self.peek_at(1) == Some(&Token::RParen) {
            self.pos += 1;
        }
        if !self.eat(&Token::RParen) {
            loop {
                let at = self.offset();
                let param = self.param(params.len())?;
                param_offsets.push(at);
                params.push(param);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }

        let body = self.block()?;

        for (i, used) in self.used_params.clone().into_iter().enumerate() {
            if !used {
                self.diags.push(Diagnostic {
                    severity: Severity::Warning,
                    offset: param_offsets[i],
                    message: format!("unused parameter '{}'", params[i].name),
                });
            }
        }

        let frame_size = self.next_slot;
        self.scopes.clear();
        Ok(KernelDef { name, params, body, frame_size })
    }

    fn param(&mut self, index: usize) -> PResult<Param> {
        let mut space: Option<Token> = None;
        let mut is_const = false;
        loop {
            let at = self.offset();
            match self.peek() {
                Some(Token::Global) | Some(Token::Constant) => space = self.bump(),
                Some(Token::Local) => {
                    return Err(Diagnostic::error(
                        at,
                        "__local kernel arguments are not supported by this device",
                    ));
                }
                Some(Token::Private) | Some(Token::Restrict) => {
                    self.pos += 1;
                }
                Some(Token::Const) => {
                    self.pos += 1;
                    is_const = true;
                }
                _ => break,
            }
        }
        let ty_at = self.offset();
        let ty = self.scalar_type()?;
        let pointer = self.eat(&Token::Star);
        while matches!(self.peek(), Some(Token::Const) | Some(Token::Restrict)) {
            self.pos += 1;
        }
        let (name, at) = self.ident("parameter name")?;

        self.used_params.push(false);
        let (kind, sym) = if pointer {
            let read_only = is_const || space == Some(Token::Constant);
            if space.is_none() {
                self.semantic(
                    at,
                    "kernel pointer arguments must point to __global or __constant memory",
                );
            }
            if ty == ScalarType::Size {
                self.semantic(ty_at, "pointers to 'size_t' are not supported by this device");
            }
            (
                ParamKind::Pointer { elem: ty, read_only },
                Symbol::Pointer { param: index, elem: ty, read_only },
            )
        } else {
            if space.is_some() {
                self.semantic(at, "scalar kernel argument cannot have an address space qualifier");
            }
            let slot = self.next_slot;
            self.next_slot += 1;
            (
                ParamKind::Scalar { ty, slot },
                Symbol::Var { slot, ty, is_const, param: Some(index) },
            )
        };
        self.declare(name.clone(), at, sym);
        Ok(Param { name, kind })
    }

    fn scalar_type(&mut self) -> PResult<ScalarType> {
        let at = self.offset();
        match self.bump() {
            Some(Token::Int) => Ok(ScalarType::Int),
            Some(Token::UInt) => Ok(ScalarType::UInt),
            Some(Token::SizeT) => Ok(ScalarType::Size),
            Some(Token::Unsigned) => {
                self.eat(&Token::Int);
                Ok(ScalarType::UInt)
            }
            Some(Token::Void) => Err(Diagnostic::error(at, "'void' is not a valid value type here")),
            _ => Err(Diagnostic::error(at, "expected type name")),
        }
    }

    fn starts_type(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Int) | Some(Token::UInt) | Some(Token::Unsigned) | Some(Token::SizeT)
        )
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        self.scopes.push(HashMap::new());
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    break;
                }
                None => return Err(Diagnostic::error(self.eof, "expected '}'")),
                _ => stmts.extend(self.nested(Self::statement)?),
            }
        }
        self.scopes.pop();
        Ok(stmts)
    }

    fn statement(&mut self) -> PResult<Option<Stmt>> {
        let at = self.offset();
        match self.peek() {
            Some(Token::LBrace) => Ok(Some(Stmt::Block(self.block()?))),
            Some(Token::Semi) => {
                self.pos += 1;
                Ok(None)
            }
            Some(Token::Return) => {
                self.pos += 1;
                if !self.eat(&Token::Semi) {
                    return Err(Diagnostic::error(
                        self.offset(),
                        "void kernel should not return a value",
                    ));
                }
                Ok(Some(Stmt::Return))
            }
            Some(Token::If) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after 'if'")?;
                let cond = self.expr(1)?;
                self.expect(Token::RParen, "')'")?;
                let then = self.nested(Self::statement)?.unwrap_or(Stmt::Block(Vec::new()));
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.nested(Self::statement)?.unwrap_or(Stmt::Block(Vec::new()))))
                } else {
                    None
                };
                Ok(Some(Stmt::If { cond, then: Box::new(then), otherwise }))
            }
            Some(Token::Const) => self.declaration(),
            _ if self.starts_type() => self.declaration(),
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::LParen) => Err(
                Diagnostic::error(at, "function calls are not supported as statements"),
            ),
            Some(Token::Ident(_)) => self.assignment().map(Some),
            _ => Err(Diagnostic::error(at, "expected statement")),
        }
    }

    fn declaration(&mut self) -> PResult<Option<Stmt>> {
        let is_const = self.eat(&Token::Const);
        let ty = self.scalar_type()?;
        let mut inits = Vec::new();
        loop {
            if self.peek() == Some(&Token::Star) {
                return Err(Diagnostic::error(
                    self.offset(),
                    "pointer variables are not supported by this device",
                ));
            }
            let (name, at) = self.ident("variable name")?;
            let value = if self.eat(&Token::Assign) {
                Some(self.expr(1)?)
            } else {
                if is_const {
                    self.semantic(at, format!("default initialization of const variable '{name}'"));
                }
                None
            };
            let slot = self.next_slot;
            self.next_slot += 1;
            self.declare(name, at, Symbol::Var { slot, ty, is_const, param: None });
            if let Some(value) = value {
                inits.push(Stmt::Assign { slot, ty, value });
            }
            if self.eat(&Token::Semi) {
                break;
            }
            self.expect(Token::Comma, "';'")?;
        }
        Ok(match inits.len() {
            0 => None,
            1 => inits.pop(),
            _ => Some(Stmt::Block(inits)),
        })
    }

    fn assignment(&mut self) -> PResult<Stmt> {
        let (name, at) = self.ident("identifier")?;
        let target = self.lookup(&name);
        let index = if self.eat(&Token::LBracket) {
            let e = self.expr(1)?;
            self.expect(Token::RBracket, "']'")?;
            Some(e)
        } else {
            None
        };

        let op_at = self.offset();
        let op = match self.bump() {
            Some(Token::Assign) => None,
            Some(Token::AddAssign) => Some(BinOp::Add),
            Some(Token::SubAssign) => Some(BinOp::Sub),
            Some(Token::MulAssign) => Some(BinOp::Mul),
            _ => return Err(Diagnostic::error(op_at, "expected '=' in assignment")),
        };
        let rhs = self.expr(1)?;
        self.expect(Token::Semi, "';'")?;

        let stmt = match (target, index) {
            (None, _) => {
                self.semantic(at, format!("use of undeclared identifier '{name}'"));
                Stmt::Block(Vec::new())
            }
            (Some(Symbol::Pointer { param, elem, read_only }), Some(index)) => {
                if read_only {
                    self.semantic(at, format!("cannot assign to read-only memory '{name}'"));
                }
                let value = match op {
                    Some(op) => Expr::binary(
                        op,
                        Expr::Load { param, elem, index: Box::new(index.clone()) },
                        rhs,
                    ),
                    None => rhs,
                };
                Stmt::Store { param, elem, index, value }
            }
            (Some(Symbol::Pointer { .. }), None) => {
                self.semantic(at, format!("cannot assign to pointer argument '{name}'"));
                Stmt::Block(Vec::new())
            }
            (Some(Symbol::Var { .. }), Some(_)) => {
                self.semantic(at, "subscripted value is not a pointer");
                Stmt::Block(Vec::new())
            }
            (Some(Symbol::Var { slot, ty, is_const, .. }), None) => {
                if is_const {
                    self.semantic(at, format!("cannot assign to const variable '{name}'"));
                }
                let value = match op {
                    Some(op) => Expr::binary(op, Expr::Var { slot, ty }, rhs),
                    None => rhs,
                };
                Stmt::Assign { slot, ty, value }
            }
        };
        Ok(stmt)
    }

    /// Precedence climbing over C binary operators.
    fn expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.peek().and_then(BinOp::from_token) {
            if prec < min_prec {
                break;
            }
            let at = self.offset();
            self.pos += 1;
            let lhs_height = self.height;
            let rhs = self.expr(prec + 1)?;
            self.height = self.height.max(lhs_height);
            self.grow(at)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let at = self.offset();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Bang) => Some(UnOp::Not),
            Some(Token::Tilde) => Some(UnOp::BitNot),
            Some(Token::Plus) => {
                self.pos += 1;
                return self.nested(Self::unary);
            }
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.nested(Self::unary)?;
            self.grow(at)?;
            return Ok(Expr::Unary(op, operand.ty(), Box::new(operand)));
        }
        if self.peek() == Some(&Token::LParen)
            && matches!(
                self.peek_at(1),
                Some(Token::Int) | Some(Token::UInt) | Some(Token::Unsigned) | Some(Token::SizeT)
            )
        {
            self.pos += 1;
            let ty = self.scalar_type()?;
            self.expect(Token::RParen, "')' after cast type")?;
            let operand = self.nested(Self::unary)?;
            self.grow(at)?;
            return Ok(Expr::Cast(ty, Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> PResult<Expr> {
        let at = self.offset();
        self.height = 1;
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Const(n, ScalarType::literal(n, false))),
            Some(Token::UNumber(n)) => Ok(Expr::Const(n, ScalarType::literal(n, true))),
            Some(Token::LParen) => {
                let e = self.nested(|p| p.expr(1))?;
                self.expect(Token::RParen, "')'")?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let arg = self.nested(|p| p.expr(1))?;
                    self.expect(Token::RParen, "')'")?;
                    self.grow(at)?;
                    return Ok(match name.as_str() {
                        "get_global_id" => Expr::GlobalId(Box::new(arg)),
                        "get_global_size" => Expr::GlobalSize(Box::new(arg)),
                        _ => {
                            self.semantic(
                                at,
                                format!("implicit declaration of function '{name}' is invalid in OpenCL"),
                            );
                            Expr::Const(0, ScalarType::Int)
                        }
                    });
                }
                let sym = self.lookup(&name);
                if self.eat(&Token::LBracket) {
                    let index = self.nested(|p| p.expr(1))?;
                    self.expect(Token::RBracket, "']'")?;
                    self.grow(at)?;
                    return Ok(match sym {
                        Some(Symbol::Pointer { param, elem, .. }) => {
                            Expr::Load { param, elem, index: Box::new(index) }
                        }
                        Some(Symbol::Var { .. }) => {
                            self.semantic(at, "subscripted value is not a pointer");
                            Expr::Const(0, ScalarType::Int)
                        }
                        None => {
                            self.semantic(at, format!("use of undeclared identifier '{name}'"));
                            Expr::Const(0, ScalarType::Int)
                        }
                    });
                }
                Ok(match sym {
                    Some(Symbol::Var { slot, ty, .. }) => Expr::Var { slot, ty },
                    Some(Symbol::Pointer { .. }) => {
                        self.semantic(at, format!("pointer argument '{name}' used as a value"));
                        Expr::Const(0, ScalarType::Int)
                    }
                    None => {
                        self.semantic(at, format!("use of undeclared identifier '{name}'"));
                        Expr::Const(0, ScalarType::Int)
                    }
                })
            }
            _ => Err(Diagnostic::error(at, "expected expression")),
        }
    }
}
