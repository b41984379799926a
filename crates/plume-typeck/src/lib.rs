mod checker;
mod error;
mod solver;
mod symbols;
mod typed;
mod types;

#[cfg(test)]
mod tests;

pub use checker::check;
pub use error::TypeError;
pub use solver::Solver;
pub use symbols::{Builtin, Dealias, Symbol, SymbolId, SymbolTable};
pub use typed::{
    ClassId, ClassInfo, Entry, LambdaId, LocalId, MemberInfo, Predicate, TBlockItem, TExpr,
    TExprId, TExprKind, TItem, TLambda, TLocal, TypedProgram,
};
pub use types::{show_ty, Ty, TyVar, TyVarId, VarPrefix};
