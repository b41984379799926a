pub mod names;

use la_arena::{Arena, Idx};
use smol_str::SmolStr;
use std::fmt;

pub use plume_lexer::Span;

// ── ID types ──────────────────────────────────────────────────────

pub type ExprId = Idx<Expr>;
pub type TypeExprId = Idx<TypeExpr>;

// ── Module ────────────────────────────────────────────────────────

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct Module {
    pub items: Vec<Item>,
    pub exprs: Arena<Expr>,
    pub type_exprs: Arena<TypeExpr>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            exprs: Arena::new(),
            type_exprs: Arena::new(),
        }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

// ── Top-level and block items ─────────────────────────────────────

/// One top-level item. Blocks reuse `Binding` and bare expressions;
/// classes may only appear at top level.
#[derive(Debug, Clone)]
pub enum Item {
    Binding(Binding),
    Class(ClassDecl),
    Expr(ExprId),
}

/// `val x[: T] = e` or `var x[: T] = e`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: SmolStr,
    pub name_span: Span,
    pub mutable: bool,
    pub type_ann: Option<TypeExprId>,
    pub value: ExprId,
    pub span: Span,
}

/// `class C(p: T, …) { member; … }`
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: SmolStr,
    pub name_span: Span,
    pub ctor_params: Vec<Param>,
    pub members: Vec<Binding>,
    pub span: Span,
}

/// Annotated parameter of a lambda or class constructor.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: SmolStr,
    pub name_span: Span,
    pub type_ann: TypeExprId,
    pub span: Span,
}

// ── Expressions ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    UnitLit,
    /// Variable reference.
    Ident(SmolStr),
    /// Array allocation: `[len]`.
    ArrayLit(ExprId),
    /// Member selection: `e.m`.
    Select {
        recv: ExprId,
        field: SmolStr,
        field_span: Span,
    },
    /// Application: `f(a, …)`. Also array indexing — the typer decides.
    Call { callee: ExprId, args: Vec<ExprId> },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
        op_span: Span,
    },
    Unary {
        op: UnOp,
        operand: ExprId,
        op_span: Span,
    },
    If {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    While { cond: ExprId, body: ExprId },
    /// `(x: T, …)[: R] => body`
    Lambda {
        params: Vec<Param>,
        ret_ann: Option<TypeExprId>,
        body: ExprId,
    },
    /// `{ item; …; tail }` — a recursive binding group with a trailing
    /// expression. `tail` is `None` when the last item is a binding.
    Block {
        items: Vec<BlockItem>,
        tail: Option<ExprId>,
    },
    New {
        class: SmolStr,
        class_span: Span,
        args: Vec<ExprId>,
    },
    /// `target = value`. The typer validates the target shape.
    Assign {
        target: ExprId,
        value: ExprId,
        eq_span: Span,
    },
}

#[derive(Debug, Clone)]
pub enum BlockItem {
    Binding(Binding),
    Expr(ExprId),
}

// ── Operators ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Neg,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::Neg => "-",
        }
    }
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ── Type expressions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// `Int`, `Float`, `Boolean`, `String`, `Unit`, or a class name.
    Named(SmolStr),
    /// `(T, …) => R`, `T => R`, `() => R`.
    Fn {
        params: Vec<TypeExprId>,
        ret: TypeExprId,
    },
    /// `Array[T]`.
    Array(TypeExprId),
}
