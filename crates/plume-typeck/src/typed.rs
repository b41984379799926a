use la_arena::{Arena, Idx};
use plume_ast::{BinOp, Span, UnOp};
use smol_str::SmolStr;

use crate::symbols::{Symbol, SymbolId};
use crate::types::Ty;

pub type TExprId = Idx<TExpr>;
pub type LocalId = Idx<TLocal>;
pub type LambdaId = Idx<TLambda>;
pub type ClassId = Idx<ClassInfo>;

// ── Program ──────────────────────────────────────────────────────

/// Output of the typer: arenas of typed nodes plus the top-level item
/// list and the resolved program entry. Every type in here is fully
/// instantiated — no unification variable survives the checker.
#[derive(Debug)]
pub struct TypedProgram {
    pub exprs: Arena<TExpr>,
    pub locals: Arena<TLocal>,
    pub lambdas: Arena<TLambda>,
    pub classes: Arena<ClassInfo>,
    pub symbols: Arena<Symbol>,
    pub top: Vec<TItem>,
    pub entry: Entry,
}

#[derive(Debug, Clone, Copy)]
pub enum TItem {
    Local(LocalId),
    Class(ClassId),
    Expr(TExprId),
}

/// How the emitted `main(void)` reaches the user's `main`.
#[derive(Debug, Clone, Copy)]
pub enum Entry {
    /// A top-level `main: () => Unit` binding.
    TopLevel(SymbolId),
    /// A top-level `class Main` with a `main: () => Unit` member.
    ClassMain { class: ClassId, member: usize },
}

// ── Expressions ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Ty,
    pub span: Span,
}

#[derive(Debug)]
pub enum TExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    UnitLit,
    Ident(SymbolId),
    /// `[len]` — array allocation.
    ArrayLit { len: TExprId },
    Select { recv: TExprId, field: SmolStr },
    /// Array element access; the node's type is `Ref(elem)`.
    Index { array: TExprId, index: TExprId },
    Apply { callee: TExprId, args: Vec<TExprId> },
    Binary { op: BinOp, lhs: TExprId, rhs: TExprId },
    Unary { op: UnOp, operand: TExprId },
    If {
        cond: TExprId,
        then_branch: TExprId,
        else_branch: TExprId,
    },
    While { cond: TExprId, body: TExprId },
    Lambda(LambdaId),
    Block {
        items: Vec<TBlockItem>,
        tail: Option<TExprId>,
    },
    New { class: ClassId, args: Vec<TExprId> },
    /// Assignment to a mutable symbol.
    AssignSym { sym: SymbolId, value: TExprId },
    /// Assignment through an l-value (array element or member select).
    AssignLv { target: TExprId, value: TExprId },
}

#[derive(Debug, Clone, Copy)]
pub enum TBlockItem {
    Local(LocalId),
    Expr(TExprId),
}

// ── Definitions ──────────────────────────────────────────────────

/// A typed `val`/`var` binding.
#[derive(Debug)]
pub struct TLocal {
    pub name: SmolStr,
    pub sym: SymbolId,
    pub mutable: bool,
    pub ty: Ty,
    pub value: TExprId,
    pub span: Span,
}

/// A typed lambda with its computed free names: symbols referenced in
/// the body that resolve outside the lambda's parameters and body-local
/// bindings.
#[derive(Debug)]
pub struct TLambda {
    /// Mangling hint — the binding or member name when the lambda is the
    /// right-hand side of one, `"fn"` otherwise.
    pub name_hint: SmolStr,
    pub params: Vec<(SymbolId, Ty)>,
    pub ret: Ty,
    pub body: TExprId,
    pub free: Vec<SymbolId>,
    pub span: Span,
}

// ── Classes ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ClassInfo {
    pub name: SmolStr,
    /// Constructor parameter symbols and their resolved types. Filled in
    /// during group pre-declaration so forward `new` expressions can
    /// check arity and argument types before the class body is typed.
    pub ctor_params: Vec<(SymbolId, Ty)>,
    pub members: Vec<MemberInfo>,
    /// `HasMember` predicates accumulated from selects on the class while
    /// it is still open; discharged when the class seals.
    pub pending: Vec<Predicate>,
    /// False while the class is being typed (its type is `ClassVar`),
    /// true once every member type is known and predicates discharged.
    pub sealed: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct MemberInfo {
    pub name: SmolStr,
    pub sym: SymbolId,
    pub mutable: bool,
    pub ty: Ty,
    pub value: Option<TExprId>,
    pub span: Span,
}

/// A required member discovered through a select on an open class.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub member: SmolStr,
    pub ty: Ty,
    pub span: Span,
}

impl ClassInfo {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}
