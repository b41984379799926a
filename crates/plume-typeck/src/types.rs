use la_arena::Arena;

use crate::symbols::{Symbol, SymbolId};
use crate::typed::{ClassId, ClassInfo};

// ── Types ────────────────────────────────────────────────────────

pub type TyVarId = u32;

/// Diagnostic prefix of a unification variable: `T` for variables minted
/// at expression positions, `X` for forward-declared recursive bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarPrefix {
    T,
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TyVar {
    pub id: TyVarId,
    pub prefix: VarPrefix,
}

impl TyVar {
    pub fn display(&self) -> String {
        match self.prefix {
            VarPrefix::T => format!("T{}", self.id),
            VarPrefix::X => format!("X{}", self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Str,
    Unit,
    Array(Box<Ty>),
    /// Function type: parameter types and return type.
    Lambda(Vec<Ty>, Box<Ty>),
    /// A fully-known (sealed) class.
    Class(ClassId),
    /// A class whose membership set is still being learned; its pending
    /// member predicates live on the `ClassInfo` node.
    ClassVar(ClassId),
    /// Unification variable.
    Var(TyVar),
    /// A type written as a bare identifier in source (a class name in an
    /// annotation); lazily resolved through the symbol's dealias slot.
    Sym(SymbolId),
    /// L-value wrapper: the node is addressable and its value type is the
    /// inner type. Never enters the solver.
    Ref(Box<Ty>),
}

impl Ty {
    /// Strip the l-value wrapper, if any.
    pub fn value_ty(&self) -> &Ty {
        match self {
            Ty::Ref(inner) => inner,
            other => other,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Ty::Ref(_))
    }

    /// Does the type contain any unification variable?
    pub fn has_var(&self) -> bool {
        match self {
            Ty::Var(_) => true,
            Ty::Array(elem) => elem.has_var(),
            Ty::Lambda(params, ret) => params.iter().any(Ty::has_var) || ret.has_var(),
            Ty::Ref(inner) => inner.has_var(),
            _ => false,
        }
    }
}

/// Render a type for diagnostics, resolving class and symbol names.
pub fn show_ty(ty: &Ty, symbols: &Arena<Symbol>, classes: &Arena<ClassInfo>) -> String {
    match ty {
        Ty::Int => "Int".to_string(),
        Ty::Float => "Float".to_string(),
        Ty::Bool => "Boolean".to_string(),
        Ty::Str => "String".to_string(),
        Ty::Unit => "Unit".to_string(),
        Ty::Array(elem) => format!("Array[{}]", show_ty(elem, symbols, classes)),
        Ty::Lambda(params, ret) => {
            let ret = show_ty(ret, symbols, classes);
            match params.as_slice() {
                [single] if !matches!(single, Ty::Lambda(..)) => {
                    format!("{} => {}", show_ty(single, symbols, classes), ret)
                }
                _ => {
                    let params: Vec<String> =
                        params.iter().map(|p| show_ty(p, symbols, classes)).collect();
                    format!("({}) => {}", params.join(", "), ret)
                }
            }
        }
        Ty::Class(id) | Ty::ClassVar(id) => classes[*id].name.to_string(),
        Ty::Var(v) => v.display(),
        Ty::Sym(id) => symbols[*id].name.to_string(),
        Ty::Ref(inner) => show_ty(inner, symbols, classes),
    }
}
