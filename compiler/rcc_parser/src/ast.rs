//! Abstract syntax tree for the C subset
//!
//! Every expression node carries its computed type; implicit conversions are
//! explicit `Cast` nodes inserted during parsing, so later stages never infer
//! them.

use crate::scope::{ScopeId, Scopes};
use rcc_common::{Loc, Name};
use rcc_types::Type;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
    /// pointer + integer, scaled by the pointee size at lowering
    PtrAdd,
    /// pointer - integer
    PtrSub,
    /// pointer - pointer, divided by the pointee size at lowering
    PtrDiff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: Loc,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, loc: Loc) -> Self {
        Self { kind, ty, loc }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.kind, ExprKind::Fixnum(0))
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Fixnum(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Fixnum(i64),
    Flonum(f64),
    /// A pooled string literal; the bytes live in the `StringPool` under
    /// `label`, and the expression type is `char [len]` (NUL included).
    Str { label: Name },
    Var { name: Name, scope: ScopeId },
    Unary { op: UnaryOp, sub: Box<Expr> },
    Ref(Box<Expr>),
    Deref(Box<Expr>),
    Cast(Box<Expr>),
    Bin { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    /// Compound assignment; the left side is evaluated once.
    AssignWith { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Member access with the member index already resolved. `a->b` is
    /// normalized to `(*a).b` during parsing.
    Member { target: Box<Expr>, name: Name, index: usize },
    Funcall { func: Box<Expr>, args: Vec<Expr> },
    Comma { lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
}

/// Initializers as parsed; `Dot`/`Arr` designators are resolved against the
/// declared aggregate's layout into dense positional `Multi` entries (`None`
/// holes are zero-initialized) before the parser hands them on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    Single(Expr),
    Multi(Vec<Option<Initializer>>),
    Dot { name: Name, value: Box<Initializer> },
    Arr { index: i64, value: Box<Initializer> },
}

/// One local declaration with its (already normalized) initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalInit {
    pub name: Name,
    pub scope: ScopeId,
    pub init: Option<Initializer>,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    Block { scope: ScopeId, stmts: Vec<Stmt> },
    If { cond: Expr, then_stmt: Box<Stmt>, else_stmt: Option<Box<Stmt>> },
    Switch { value: Expr, body: Box<Stmt>, cases: Vec<i64>, has_default: bool },
    /// `case`/`default` act as block-structure markers inside a switch body.
    Case { value: i64 },
    Default,
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { pre: Option<Expr>, cond: Option<Expr>, post: Option<Expr>, body: Box<Stmt> },
    Break,
    Continue,
    Return { value: Option<Expr>, loc: Loc },
    Goto { label: Name, loc: Loc },
    Label { name: Name, stmt: Box<Stmt> },
    VarDecl { inits: Vec<LocalInit> },
    Asm { text: String },
}

/// A local variable's frame-relevant description, indexed by the `Local`
/// placement in `VarInfo`. Parameters come first (hidden return pointer
/// included when present).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: Name,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Name,
    pub ty: Type,
    /// Number of leading entries of `locals` that are parameters (the hidden
    /// return pointer counts as one).
    pub param_count: usize,
    pub ret_hidden: bool,
    pub vaargs: bool,
    pub is_static: bool,
    pub top_scope: ScopeId,
    pub locals: Vec<LocalVar>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    Defun(Function),
    /// Global variable declaration; the `VarInfo`s live in the global scope.
    VarDecl { names: Vec<Name> },
}

/// String literals pooled per translation unit, emitted into `.rodata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringLit {
    pub label: Name,
    /// Raw bytes, no trailing NUL; the declared array size adds it.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringPool {
    pub entries: Vec<StringLit>,
}

impl StringPool {
    pub fn find(&self, label: Name) -> Option<&StringLit> {
        self.entries.iter().find(|s| s.label == label)
    }
}

/// The parsed translation unit: declarations in source order plus the tables
/// the later stages need to interpret them.
#[derive(Debug, Serialize)]
pub struct Program {
    pub decls: Vec<Declaration>,
    pub scopes: Scopes,
    pub strings: StringPool,
    /// Globals synthesized for static locals, emitted after the declarations.
    pub static_globals: Vec<Name>,
}
