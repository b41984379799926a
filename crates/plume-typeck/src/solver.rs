use la_arena::Arena;
use plume_ast::Span;

use crate::error::TypeError;
use crate::symbols::{Dealias, Symbol};
use crate::typed::ClassInfo;
use crate::types::{show_ty, Ty, TyVar, TyVarId, VarPrefix};

/// One recorded equality between two types, with the originating span
/// and optional sub-spans for its two sides.
#[derive(Debug, Clone)]
struct Equation {
    lhs: Ty,
    rhs: Ty,
    span: Span,
    lhs_span: Option<Span>,
    rhs_span: Option<Span>,
}

/// Accumulates equality constraints and solves them by unification with
/// an occurs check, producing a substitution from variables to types.
#[derive(Debug, Default)]
pub struct Solver {
    /// Origin span of each variable, indexed by `TyVarId`.
    origins: Vec<Span>,
    /// The substitution: `subst[v]` is the binding of variable `v`.
    subst: Vec<Option<Ty>>,
    pending: Vec<Equation>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_var(&mut self, prefix: VarPrefix, origin: Span) -> Ty {
        let id = self.subst.len() as TyVarId;
        self.subst.push(None);
        self.origins.push(origin);
        Ty::Var(TyVar { id, prefix })
    }

    pub fn var_origin(&self, id: TyVarId) -> Span {
        self.origins[id as usize]
    }

    /// Record `lhs = rhs`. The l-value wrapper never enters the store.
    pub fn add_equality(
        &mut self,
        lhs: Ty,
        rhs: Ty,
        span: Span,
        lhs_span: Option<Span>,
        rhs_span: Option<Span>,
    ) {
        debug_assert!(!lhs.is_ref() && !rhs.is_ref(), "Ref in constraint store");
        self.pending.push(Equation {
            lhs,
            rhs,
            span,
            lhs_span,
            rhs_span,
        });
    }

    /// Apply the substitution built so far, leaving unresolved variables
    /// in place. Bare symbol types resolve through their dealias slot;
    /// class type variables collapse once their class is sealed.
    pub fn instantiate(
        &self,
        ty: &Ty,
        symbols: &Arena<Symbol>,
        classes: &Arena<ClassInfo>,
    ) -> Ty {
        match ty {
            Ty::Var(v) => match &self.subst[v.id as usize] {
                Some(bound) => self.instantiate(bound, symbols, classes),
                None => ty.clone(),
            },
            Ty::Sym(sid) => match &symbols[*sid].dealias {
                Dealias::Class(cid) => {
                    if classes[*cid].sealed {
                        Ty::Class(*cid)
                    } else {
                        Ty::ClassVar(*cid)
                    }
                }
                _ => ty.clone(),
            },
            Ty::ClassVar(cid) if classes[*cid].sealed => Ty::Class(*cid),
            Ty::Array(elem) => Ty::Array(Box::new(self.instantiate(elem, symbols, classes))),
            Ty::Lambda(params, ret) => Ty::Lambda(
                params
                    .iter()
                    .map(|p| self.instantiate(p, symbols, classes))
                    .collect(),
                Box::new(self.instantiate(ret, symbols, classes)),
            ),
            Ty::Ref(inner) => Ty::Ref(Box::new(self.instantiate(inner, symbols, classes))),
            _ => ty.clone(),
        }
    }

    /// Fully replace variables. `Err` carries the first still-open
    /// variable encountered.
    pub fn substitute(
        &self,
        ty: &Ty,
        symbols: &Arena<Symbol>,
        classes: &Arena<ClassInfo>,
    ) -> Result<Ty, TyVar> {
        let ty = self.instantiate(ty, symbols, classes);
        match &ty {
            Ty::Var(v) => Err(*v),
            Ty::Array(elem) => Ok(Ty::Array(Box::new(
                self.substitute(elem, symbols, classes)?,
            ))),
            Ty::Lambda(params, ret) => {
                let params = params
                    .iter()
                    .map(|p| self.substitute(p, symbols, classes))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Ty::Lambda(
                    params,
                    Box::new(self.substitute(ret, symbols, classes)?),
                ))
            }
            Ty::Ref(inner) => Ok(Ty::Ref(Box::new(
                self.substitute(inner, symbols, classes)?,
            ))),
            _ => Ok(ty),
        }
    }

    /// Unify every pending constraint, extending the substitution.
    pub fn solve(
        &mut self,
        symbols: &Arena<Symbol>,
        classes: &Arena<ClassInfo>,
    ) -> Result<(), TypeError> {
        while let Some(eq) = self.pending.pop() {
            self.unify(&eq.lhs, &eq.rhs, &eq, symbols, classes)?;
        }
        Ok(())
    }

    fn unify(
        &mut self,
        a: &Ty,
        b: &Ty,
        eq: &Equation,
        symbols: &Arena<Symbol>,
        classes: &Arena<ClassInfo>,
    ) -> Result<(), TypeError> {
        let a = self.instantiate(a, symbols, classes);
        let b = self.instantiate(b, symbols, classes);

        if a == b {
            return Ok(());
        }

        match (&a, &b) {
            (Ty::Var(v), other) | (other, Ty::Var(v)) => {
                if self.occurs_in(v.id, other, symbols, classes) {
                    return Err(self.mismatch(
                        format!(
                            "infinite type: {} = {}",
                            v.display(),
                            show_ty(other, symbols, classes)
                        ),
                        eq,
                    ));
                }
                self.subst[v.id as usize] = Some(other.clone());
                Ok(())
            }

            (Ty::Array(e1), Ty::Array(e2)) => self.unify(e1, e2, eq, symbols, classes),

            (Ty::Lambda(p1, r1), Ty::Lambda(p2, r2)) => {
                if p1.len() != p2.len() {
                    return Err(self.mismatch(
                        format!(
                            "function arity mismatch: {} vs {}",
                            show_ty(&a, symbols, classes),
                            show_ty(&b, symbols, classes)
                        ),
                        eq,
                    ));
                }
                for (x, y) in p1.iter().zip(p2.iter()) {
                    self.unify(x, y, eq, symbols, classes)?;
                }
                self.unify(r1, r2, eq, symbols, classes)
            }

            // Class equality is identity of the definition. Two open
            // class variables of the same class were equal above; the
            // open/sealed combination for one class cannot arise because
            // `instantiate` collapses sealed classes first.
            _ => Err(self.mismatch(
                format!(
                    "type mismatch: expected {}, got {}",
                    show_ty(&a, symbols, classes),
                    show_ty(&b, symbols, classes)
                ),
                eq,
            )),
        }
    }

    fn occurs_in(
        &self,
        var: TyVarId,
        ty: &Ty,
        symbols: &Arena<Symbol>,
        classes: &Arena<ClassInfo>,
    ) -> bool {
        let ty = self.instantiate(ty, symbols, classes);
        match &ty {
            Ty::Var(v) => v.id == var,
            Ty::Array(elem) => self.occurs_in(var, elem, symbols, classes),
            Ty::Lambda(params, ret) => {
                params.iter().any(|p| self.occurs_in(var, p, symbols, classes))
                    || self.occurs_in(var, ret, symbols, classes)
            }
            _ => false,
        }
    }

    fn mismatch(&self, message: String, eq: &Equation) -> TypeError {
        let mut err = TypeError::new(message, eq.span);
        if let Some(span) = eq.lhs_span {
            err = err.with_related(span);
        }
        if let Some(span) = eq.rhs_span {
            err = err.with_related(span);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(0, 0)
    }

    fn empty_tables() -> (Arena<Symbol>, Arena<ClassInfo>) {
        (Arena::new(), Arena::new())
    }

    #[test]
    fn binds_variable_to_ground() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let v = solver.fresh_var(VarPrefix::T, span());
        solver.add_equality(v.clone(), Ty::Int, span(), None, None);
        solver.solve(&symbols, &classes).unwrap();
        assert_eq!(solver.substitute(&v, &symbols, &classes), Ok(Ty::Int));
    }

    #[test]
    fn decomposes_lambda_structure() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let a = solver.fresh_var(VarPrefix::T, span());
        let b = solver.fresh_var(VarPrefix::X, span());
        solver.add_equality(
            Ty::Lambda(vec![a.clone()], Box::new(b.clone())),
            Ty::Lambda(vec![Ty::Int], Box::new(Ty::Bool)),
            span(),
            None,
            None,
        );
        solver.solve(&symbols, &classes).unwrap();
        assert_eq!(solver.substitute(&a, &symbols, &classes), Ok(Ty::Int));
        assert_eq!(solver.substitute(&b, &symbols, &classes), Ok(Ty::Bool));
    }

    #[test]
    fn ground_mismatch_fails() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        solver.add_equality(Ty::Int, Ty::Bool, span(), None, None);
        let err = solver.solve(&symbols, &classes).unwrap_err();
        assert!(err.message.contains("type mismatch"));
    }

    #[test]
    fn arity_mismatch_fails() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        solver.add_equality(
            Ty::Lambda(vec![Ty::Int], Box::new(Ty::Int)),
            Ty::Lambda(vec![Ty::Int, Ty::Int], Box::new(Ty::Int)),
            span(),
            None,
            None,
        );
        let err = solver.solve(&symbols, &classes).unwrap_err();
        assert!(err.message.contains("arity"));
    }

    #[test]
    fn occurs_check_rejects_infinite_type() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let v = solver.fresh_var(VarPrefix::T, span());
        solver.add_equality(
            v.clone(),
            Ty::Lambda(vec![v.clone()], Box::new(Ty::Int)),
            span(),
            None,
            None,
        );
        let err = solver.solve(&symbols, &classes).unwrap_err();
        assert!(err.message.contains("infinite type"));
    }

    #[test]
    fn transitive_bindings_resolve() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let a = solver.fresh_var(VarPrefix::T, span());
        let b = solver.fresh_var(VarPrefix::T, span());
        solver.add_equality(a.clone(), b.clone(), span(), None, None);
        solver.add_equality(b.clone(), Ty::Float, span(), None, None);
        solver.solve(&symbols, &classes).unwrap();
        assert_eq!(solver.substitute(&a, &symbols, &classes), Ok(Ty::Float));
    }

    #[test]
    fn substitute_reports_open_variable() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let v = solver.fresh_var(VarPrefix::X, Span::new(3, 7));
        let open = solver
            .substitute(&Ty::Array(Box::new(v)), &symbols, &classes)
            .unwrap_err();
        assert_eq!(open.prefix, VarPrefix::X);
        assert_eq!(solver.var_origin(open.id), Span::new(3, 7));
    }

    #[test]
    fn array_element_types_unify() {
        let (symbols, classes) = empty_tables();
        let mut solver = Solver::new();
        let v = solver.fresh_var(VarPrefix::T, span());
        solver.add_equality(
            Ty::Array(Box::new(v.clone())),
            Ty::Array(Box::new(Ty::Str)),
            span(),
            None,
            None,
        );
        solver.solve(&symbols, &classes).unwrap();
        assert_eq!(solver.substitute(&v, &symbols, &classes), Ok(Ty::Str));
    }
}
