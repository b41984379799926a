//! Code bundles: a C expression packaged with the prefix statements it
//! depends on. Every lowered expression produces one.

use plume_typeck::SymbolId;
use smol_str::SmolStr;

use crate::c_ast::{CExpr, CStmt};

#[derive(Debug, Clone)]
pub enum Bundle {
    /// An expression with no side prefix.
    Pure(CExpr),
    /// The prefix must execute before the expression is evaluated.
    Block(CExpr, Vec<CStmt>),
    /// A statement sequence with no result expression (Unit).
    PureBlock(Vec<CStmt>),
    /// Result is the named local; the prefix ends with its
    /// initialization.
    Variable(SmolStr, Vec<CStmt>),
    /// Result is a heap-allocated `closure *`.
    Closure { expr: CExpr, prefix: Vec<CStmt> },
    /// A non-capturing lifted function; result is the bare function
    /// identifier.
    SimpleFunc { name: SmolStr },
    /// Forward placeholder for a recursive binding. Carries only the
    /// symbol; block and expression are empty until the function is
    /// emitted.
    Rec(SymbolId),
}

impl Bundle {
    /// The bundle's result expression, if it has one.
    pub fn result(&self) -> Option<CExpr> {
        match self {
            Bundle::Pure(e) | Bundle::Block(e, _) | Bundle::Closure { expr: e, .. } => {
                Some(e.clone())
            }
            Bundle::Variable(name, _) => Some(CExpr::Ident(name.clone())),
            Bundle::SimpleFunc { name } => Some(CExpr::Ident(name.clone())),
            Bundle::PureBlock(_) | Bundle::Rec(_) => None,
        }
    }

    /// Lift the bundle into statement context: the prefix, followed by
    /// the result expression as an expression statement where evaluating
    /// it can have an effect.
    pub fn into_stmts(self) -> Vec<CStmt> {
        match self {
            Bundle::Pure(e) => vec![CStmt::Expr(e)],
            Bundle::Block(e, mut prefix) => {
                prefix.push(CStmt::Expr(e));
                prefix
            }
            Bundle::PureBlock(stmts) => stmts,
            Bundle::Variable(_, prefix) => prefix,
            Bundle::Closure { prefix, .. } => prefix,
            Bundle::SimpleFunc { .. } | Bundle::Rec(_) => Vec::new(),
        }
    }
}
