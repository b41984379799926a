//! Target-side AST: plain records for C types, expressions, statements
//! and top-level definitions. The emitter renders these to text.

use smol_str::SmolStr;

// ── Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Int,
    Double,
    Char,
    Bool,
    Void,
    Ptr(Box<CType>),
    /// A named struct, referred to through its typedef'd name.
    Struct(SmolStr),
    /// A typedef'd name (function-pointer aliases).
    Alias(SmolStr),
    /// A function type; only appears inside typedefs and casts.
    Fn(Vec<CType>, Box<CType>),
}

impl CType {
    pub fn ptr(self) -> CType {
        CType::Ptr(Box::new(self))
    }
}

// ── Expressions ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CExpr {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    Ident(SmolStr),
    Binary(CBinOp, Box<CExpr>, Box<CExpr>),
    Unary(CUnOp, Box<CExpr>),
    /// `base->field` when `arrow`, else `base.field`.
    Member {
        base: Box<CExpr>,
        field: SmolStr,
        arrow: bool,
    },
    Call(Box<CExpr>, Vec<CExpr>),
    Index(Box<CExpr>, Box<CExpr>),
    Cast(CType, Box<CExpr>),
    SizeOf(CType),
    Null,
}

impl CExpr {
    pub fn ident(name: impl Into<SmolStr>) -> CExpr {
        CExpr::Ident(name.into())
    }

    pub fn call(callee: CExpr, args: Vec<CExpr>) -> CExpr {
        CExpr::Call(Box::new(callee), args)
    }

    pub fn arrow(base: CExpr, field: impl Into<SmolStr>) -> CExpr {
        CExpr::Member {
            base: Box::new(base),
            field: field.into(),
            arrow: true,
        }
    }

    pub fn cast(ty: CType, expr: CExpr) -> CExpr {
        CExpr::Cast(ty, Box::new(expr))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl CBinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CBinOp::Add => "+",
            CBinOp::Sub => "-",
            CBinOp::Mul => "*",
            CBinOp::Div => "/",
            CBinOp::Mod => "%",
            CBinOp::Lt => "<",
            CBinOp::Le => "<=",
            CBinOp::Gt => ">",
            CBinOp::Ge => ">=",
            CBinOp::Eq => "==",
            CBinOp::Ne => "!=",
            CBinOp::And => "&&",
            CBinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CUnOp {
    Not,
    Neg,
    AddrOf,
}

impl CUnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CUnOp::Not => "!",
            CUnOp::Neg => "-",
            CUnOp::AddrOf => "&",
        }
    }
}

// ── Statements ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CStmt {
    Return(Option<CExpr>),
    If {
        cond: CExpr,
        then_branch: Vec<CStmt>,
        else_branch: Vec<CStmt>,
    },
    While { cond: CExpr, body: Vec<CStmt> },
    Break,
    Continue,
    VarDef {
        name: SmolStr,
        ty: CType,
        init: Option<CExpr>,
    },
    Assign(CExpr, CExpr),
    Expr(CExpr),
}

// ── Top-level definitions ────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CDef {
    Struct {
        name: SmolStr,
        fields: Vec<(SmolStr, CType)>,
    },
    TypeDef { name: SmolStr, ty: CType },
    Func(CFunc),
}

#[derive(Debug, Clone)]
pub struct CFunc {
    pub name: SmolStr,
    pub params: Vec<(SmolStr, CType)>,
    pub ret: CType,
    pub body: Vec<CStmt>,
}

/// A complete translation unit plus the headers the generated code
/// asked for along the way.
#[derive(Debug, Clone, Default)]
pub struct CUnit {
    pub defs: Vec<CDef>,
    pub need_stdio: bool,
    pub need_stdlib: bool,
    pub need_math: bool,
}
