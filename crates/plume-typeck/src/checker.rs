use la_arena::{Arena, Idx, RawIdx};
use plume_ast::{self as ast, BinOp, Span, UnOp};
use smol_str::SmolStr;

use crate::error::TypeError;
use crate::solver::Solver;
use crate::symbols::{Builtin, Dealias, SymbolId, SymbolTable};
use crate::typed::{
    ClassId, ClassInfo, Entry, LocalId, MemberInfo, Predicate, TBlockItem, TExpr, TExprId,
    TExprKind, TItem, TLambda, TLocal, TypedProgram,
};
use crate::types::{show_ty, Ty, VarPrefix};

/// Type-check a parsed module into a fully-instantiated typed program.
/// A single error aborts the pass.
pub fn check(module: &ast::Module) -> Result<TypedProgram, TypeError> {
    tracing::debug!(items = module.items.len(), "type checking module");
    let typer = Typer::new(module);
    let program = typer.run()?;
    tracing::debug!(
        exprs = program.exprs.len(),
        lambdas = program.lambdas.len(),
        classes = program.classes.len(),
        "type checking done"
    );
    Ok(program)
}

// ── Typer state ──────────────────────────────────────────────────

struct Typer<'a> {
    module: &'a ast::Module,
    symbols: SymbolTable,
    solver: Solver,
    exprs: Arena<TExpr>,
    locals: Arena<TLocal>,
    lambdas: Arena<TLambda>,
    classes: Arena<ClassInfo>,
    /// One frame per enclosing lambda, innermost last. Collects the free
    /// names of that lambda as identifiers resolve past its scope base.
    lambda_frames: Vec<LambdaFrame>,
    /// True while typing the definitions of a recursive group, false in
    /// tail expressions.
    recursive_mode: bool,
}

struct LambdaFrame {
    /// Index of the lambda's parameter scope frame; a symbol found in a
    /// shallower frame is free in this lambda.
    scope_base: usize,
    free: Vec<SymbolId>,
}

/// Arena watermark delimiting one typing frame: every node allocated at
/// or after the mark belongs to the frame and is visited by
/// force-instantiate.
#[derive(Debug, Clone, Copy, Default)]
struct Mark {
    exprs: u32,
    locals: u32,
    lambdas: u32,
    syms: u32,
    classes: u32,
}

/// A group item — top-level items and block items share the typing
/// protocol for recursive binding groups.
enum GItem<'m> {
    Binding(&'m ast::Binding),
    Class(&'m ast::ClassDecl),
    Expr(ast::ExprId),
}

enum GroupOut {
    Local(LocalId),
    Class(ClassId),
    Expr(TExprId),
}

enum PreDecl {
    Binding(SymbolId, Ty),
    Class(ClassId),
    None,
}

fn idx<T>(i: u32) -> Idx<T> {
    Idx::from_raw(RawIdx::from(i))
}

impl<'a> Typer<'a> {
    fn new(module: &'a ast::Module) -> Self {
        Self {
            module,
            symbols: SymbolTable::new(),
            solver: Solver::new(),
            exprs: Arena::new(),
            locals: Arena::new(),
            lambdas: Arena::new(),
            classes: Arena::new(),
            lambda_frames: Vec::new(),
            recursive_mode: false,
        }
    }

    fn run(mut self) -> Result<TypedProgram, TypeError> {
        for builtin in Builtin::ALL {
            self.symbols.add_symbol(
                SmolStr::new(builtin.name()),
                false,
                Span::new(0, 0),
                Dealias::Builtin(builtin),
            );
        }
        self.symbols.locate();

        let items: Vec<GItem<'a>> = self
            .module
            .items
            .iter()
            .map(|item| match item {
                ast::Item::Binding(b) => GItem::Binding(b),
                ast::Item::Class(c) => GItem::Class(c),
                ast::Item::Expr(e) => GItem::Expr(*e),
            })
            .collect();
        let (out, _) = self.type_group(&items, None, true)?;

        // Final sweep: everything must be instantiated by now.
        self.solver.solve(&self.symbols.arena, &self.classes)?;
        self.force_instantiate(Mark::default())?;

        let top: Vec<TItem> = out
            .into_iter()
            .map(|o| match o {
                GroupOut::Local(l) => TItem::Local(l),
                GroupOut::Class(c) => TItem::Class(c),
                GroupOut::Expr(e) => TItem::Expr(e),
            })
            .collect();
        let entry = self.resolve_entry(&top)?;

        Ok(TypedProgram {
            exprs: self.exprs,
            locals: self.locals,
            lambdas: self.lambdas,
            classes: self.classes,
            symbols: self.symbols.arena,
            top,
            entry,
        })
    }

    // ── Small helpers ────────────────────────────────────────────

    fn alloc(&mut self, kind: TExprKind, ty: Ty, span: Span) -> TExprId {
        self.exprs.alloc(TExpr { kind, ty, span })
    }

    fn instantiate(&self, ty: &Ty) -> Ty {
        self.solver.instantiate(ty, &self.symbols.arena, &self.classes)
    }

    fn substitute_ty(&self, ty: &Ty) -> Result<Ty, TypeError> {
        self.solver
            .substitute(ty, &self.symbols.arena, &self.classes)
            .map_err(|v| {
                TypeError::new(
                    format!("can not instantiate type variable {}", v.display()),
                    self.solver.var_origin(v.id),
                )
            })
    }

    fn show(&self, ty: &Ty) -> String {
        show_ty(ty, &self.symbols.arena, &self.classes)
    }

    fn add_eq(&mut self, lhs: Ty, rhs: Ty, span: Span, lhs_span: Option<Span>, rhs_span: Option<Span>) {
        self.solver.add_equality(lhs, rhs, span, lhs_span, rhs_span);
    }

    fn solve(&mut self) -> Result<(), TypeError> {
        self.solver.solve(&self.symbols.arena, &self.classes)
    }

    fn value_ty_of(&self, id: TExprId) -> Ty {
        self.exprs[id].ty.value_ty().clone()
    }

    fn mark(&self) -> Mark {
        Mark {
            exprs: self.exprs.len() as u32,
            locals: self.locals.len() as u32,
            lambdas: self.lambdas.len() as u32,
            syms: self.symbols.arena.len() as u32,
            classes: self.classes.len() as u32,
        }
    }

    /// Apply the final substitution to every node recorded since `mark`,
    /// failing on any type variable that is still open.
    fn force_instantiate(&mut self, mark: Mark) -> Result<(), TypeError> {
        for i in mark.exprs..self.exprs.len() as u32 {
            let id: TExprId = idx(i);
            let ty = self.exprs[id].ty.clone();
            self.exprs[id].ty = self.substitute_ty(&ty)?;
        }
        for i in mark.locals..self.locals.len() as u32 {
            let id: LocalId = idx(i);
            let ty = self.locals[id].ty.clone();
            self.locals[id].ty = self.substitute_ty(&ty)?;
        }
        for i in mark.lambdas..self.lambdas.len() as u32 {
            let id: crate::typed::LambdaId = idx(i);
            let params = self.lambdas[id].params.clone();
            let params = params
                .into_iter()
                .map(|(sym, ty)| Ok((sym, self.substitute_ty(&ty)?)))
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ret = self.substitute_ty(&self.lambdas[id].ret.clone())?;
            self.lambdas[id].params = params;
            self.lambdas[id].ret = ret;
        }
        for i in mark.syms..self.symbols.arena.len() as u32 {
            let id: SymbolId = idx(i);
            let dealias = self.symbols.sym(id).dealias.clone();
            match dealias {
                Dealias::Placeholder(ty) => {
                    let ty = self.substitute_ty(&ty)?;
                    self.symbols.sym_mut(id).dealias = Dealias::Placeholder(ty);
                }
                Dealias::Param(ty) => {
                    let ty = self.substitute_ty(&ty)?;
                    self.symbols.sym_mut(id).dealias = Dealias::Param(ty);
                }
                _ => {}
            }
        }
        for i in mark.classes..self.classes.len() as u32 {
            let id: ClassId = idx(i);
            if !self.classes[id].sealed {
                continue;
            }
            for m in 0..self.classes[id].members.len() {
                let ty = self.classes[id].members[m].ty.clone();
                self.classes[id].members[m].ty = self.substitute_ty(&ty)?;
            }
            for p in 0..self.classes[id].ctor_params.len() {
                let ty = self.classes[id].ctor_params[p].1.clone();
                self.classes[id].ctor_params[p].1 = self.substitute_ty(&ty)?;
            }
        }
        Ok(())
    }

    // ── Symbol resolution ────────────────────────────────────────

    /// Resolve a name in the current scope stack, recording it as a free
    /// name of every enclosing lambda whose scope it escapes.
    fn resolve_ident(&mut self, name: &str, span: Span) -> Result<SymbolId, TypeError> {
        let (sid, depth) = self
            .symbols
            .find_sym(name)
            .ok_or_else(|| TypeError::new(format!("unknown symbol `{}`", name), span))?;
        match self.symbols.sym(sid).dealias {
            Dealias::Builtin(_) | Dealias::Class(_) => {}
            _ => {
                for frame in &mut self.lambda_frames {
                    if depth < frame.scope_base && !frame.free.contains(&sid) {
                        frame.free.push(sid);
                    }
                }
            }
        }
        Ok(sid)
    }

    /// The dealiased symbol's value type (no `Ref` wrapper).
    fn sym_value_ty(&self, sid: SymbolId, span: Span) -> Result<Ty, TypeError> {
        let sym = self.symbols.sym(sid);
        match &sym.dealias {
            Dealias::Placeholder(ty) | Dealias::Param(ty) => Ok(ty.clone()),
            Dealias::Local(l) => Ok(self.locals[*l].ty.clone()),
            Dealias::Member { class, index } => {
                Ok(self.classes[*class].members[*index].ty.clone())
            }
            Dealias::Class(_) => Err(TypeError::new(
                format!("class `{}` used as a value", sym.name),
                span,
            )),
            Dealias::Builtin(b) => b.ty().ok_or_else(|| {
                TypeError::new("`printf` must be applied directly", span)
            }),
        }
    }

    // ── Type annotations ─────────────────────────────────────────

    fn resolve_type_expr(&mut self, id: ast::TypeExprId) -> Result<Ty, TypeError> {
        let module = self.module;
        let texpr = &module.type_exprs[id];
        match &texpr.kind {
            ast::TypeExprKind::Named(name) => match name.as_str() {
                "Int" => Ok(Ty::Int),
                "Float" => Ok(Ty::Float),
                "Boolean" => Ok(Ty::Bool),
                "String" => Ok(Ty::Str),
                "Unit" => Ok(Ty::Unit),
                other => {
                    let (sid, _) = self.symbols.find_sym(other).ok_or_else(|| {
                        TypeError::new(format!("unknown type `{}`", other), texpr.span)
                    })?;
                    match self.symbols.sym(sid).dealias {
                        Dealias::Class(_) => Ok(Ty::Sym(sid)),
                        _ => Err(TypeError::new(
                            format!("`{}` is not a type", other),
                            texpr.span,
                        )),
                    }
                }
            },
            ast::TypeExprKind::Fn { params, ret } => {
                let params = params
                    .iter()
                    .map(|&p| self.resolve_type_expr(p))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = self.resolve_type_expr(*ret)?;
                Ok(Ty::Lambda(params, Box::new(ret)))
            }
            ast::TypeExprKind::Array(elem) => {
                Ok(Ty::Array(Box::new(self.resolve_type_expr(*elem)?)))
            }
        }
    }

    // ── Recursive groups ─────────────────────────────────────────

    /// Type a recursive binding group: pre-declare every binding (and
    /// class) with a placeholder, type the definitions in order with
    /// recursive mode on, solve and force-instantiate the frame, then
    /// type the trailing expression.
    fn type_group(
        &mut self,
        items: &[GItem<'a>],
        tail: Option<ast::ExprId>,
        allow_classes: bool,
    ) -> Result<(Vec<GroupOut>, Option<TExprId>), TypeError> {
        self.symbols.locate();
        let mark = self.mark();

        // Wave 1: class symbols first so annotations can refer to them.
        let mut pre: Vec<PreDecl> = Vec::with_capacity(items.len());
        for item in items {
            pre.push(PreDecl::None);
            if let GItem::Class(c) = item {
                if !allow_classes {
                    return Err(TypeError::new(
                        "classes may only be declared at top level".to_string(),
                        c.span,
                    ));
                }
                if self.symbols.find_sym_here(&c.name).is_some() {
                    return Err(TypeError::new(
                        format!("duplicate definition of `{}`", c.name),
                        c.name_span,
                    ));
                }
                let cid = self.classes.alloc(ClassInfo {
                    name: c.name.clone(),
                    ctor_params: Vec::new(),
                    members: Vec::new(),
                    pending: Vec::new(),
                    sealed: false,
                    span: c.span,
                });
                self.symbols
                    .add_symbol(c.name.clone(), false, c.name_span, Dealias::Class(cid));
                let last = pre.len() - 1;
                pre[last] = PreDecl::Class(cid);
            }
        }

        // Wave 2: binding placeholders and constructor parameter symbols.
        for (i, item) in items.iter().enumerate() {
            match item {
                GItem::Binding(b) => {
                    if self.symbols.find_sym_here(&b.name).is_some() {
                        return Err(TypeError::new(
                            format!("duplicate definition of `{}`", b.name),
                            b.name_span,
                        ));
                    }
                    let ty = match b.type_ann {
                        Some(ann) => self.resolve_type_expr(ann)?,
                        None => self.solver.fresh_var(VarPrefix::X, b.name_span),
                    };
                    let sid = self.symbols.add_symbol(
                        b.name.clone(),
                        b.mutable,
                        b.name_span,
                        Dealias::Placeholder(ty.clone()),
                    );
                    pre[i] = PreDecl::Binding(sid, ty);
                }
                GItem::Class(c) => {
                    let cid = match pre[i] {
                        PreDecl::Class(cid) => cid,
                        _ => continue,
                    };
                    for p in &c.ctor_params {
                        let ty = self.resolve_type_expr(p.type_ann)?;
                        let sid = self.symbols.arena.alloc(crate::symbols::Symbol {
                            name: p.name.clone(),
                            mutable: false,
                            span: p.name_span,
                            dealias: Dealias::Param(ty.clone()),
                        });
                        self.classes[cid].ctor_params.push((sid, ty));
                    }
                }
                GItem::Expr(_) => {}
            }
        }

        // Type definitions in order, recursive mode on.
        let saved = std::mem::replace(&mut self.recursive_mode, true);
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item {
                GItem::Binding(b) => {
                    let (sid, placeholder) = match &pre[i] {
                        PreDecl::Binding(sid, ty) => (*sid, ty.clone()),
                        _ => continue,
                    };
                    let tvalue = self.type_expr(b.value)?;
                    if let TExprKind::Lambda(lid) = self.exprs[tvalue].kind {
                        self.lambdas[lid].name_hint = b.name.clone();
                    }
                    let vty = self.value_ty_of(tvalue);
                    let vspan = self.exprs[tvalue].span;
                    self.add_eq(
                        placeholder.clone(),
                        vty,
                        b.span,
                        Some(b.name_span),
                        Some(vspan),
                    );
                    let lid = self.locals.alloc(TLocal {
                        name: b.name.clone(),
                        sym: sid,
                        mutable: b.mutable,
                        ty: placeholder,
                        value: tvalue,
                        span: b.span,
                    });
                    self.symbols.sym_mut(sid).dealias = Dealias::Local(lid);
                    out.push(GroupOut::Local(lid));
                }
                GItem::Class(c) => {
                    let cid = match pre[i] {
                        PreDecl::Class(cid) => cid,
                        _ => continue,
                    };
                    self.type_class(c, cid)?;
                    out.push(GroupOut::Class(cid));
                }
                GItem::Expr(e) => {
                    let t = self.type_expr(*e)?;
                    out.push(GroupOut::Expr(t));
                }
            }
        }
        self.recursive_mode = saved;

        // Force-instantiate the whole frame.
        self.solve()?;
        self.force_instantiate(mark)?;

        // Trailing expression, outside recursive mode.
        let ttail = match tail {
            Some(e) => {
                let saved = std::mem::replace(&mut self.recursive_mode, false);
                let t = self.type_expr(e)?;
                self.recursive_mode = saved;
                Some(t)
            }
            None => None,
        };

        self.symbols.relocate();
        Ok((out, ttail))
    }

    // ── Classes ──────────────────────────────────────────────────

    fn type_class(&mut self, decl: &ast::ClassDecl, cid: ClassId) -> Result<(), TypeError> {
        self.symbols.locate();
        let mark = self.mark();

        let param_syms: Vec<SymbolId> = self.classes[cid]
            .ctor_params
            .iter()
            .map(|(sid, _)| *sid)
            .collect();
        for sid in param_syms {
            self.symbols.add_existing(sid);
        }

        // Pre-declare all members so bodies can forward-reference.
        for (i, m) in decl.members.iter().enumerate() {
            if self.symbols.find_sym_here(&m.name).is_some() {
                return Err(TypeError::new(
                    format!("duplicate member `{}`", m.name),
                    m.name_span,
                ));
            }
            let ty = match m.type_ann {
                Some(ann) => self.resolve_type_expr(ann)?,
                None => self.solver.fresh_var(VarPrefix::X, m.name_span),
            };
            let msym = self.symbols.add_symbol(
                m.name.clone(),
                m.mutable,
                m.name_span,
                Dealias::Member { class: cid, index: i },
            );
            self.classes[cid].members.push(MemberInfo {
                name: m.name.clone(),
                sym: msym,
                mutable: m.mutable,
                ty,
                value: None,
                span: m.span,
            });
        }

        // Type the member bodies.
        let saved = std::mem::replace(&mut self.recursive_mode, true);
        for (i, m) in decl.members.iter().enumerate() {
            let t = self.type_expr(m.value)?;
            if let TExprKind::Lambda(lid) = self.exprs[t].kind {
                self.lambdas[lid].name_hint = m.name.clone();
            }
            let vty = self.value_ty_of(t);
            let vspan = self.exprs[t].span;
            let mty = self.classes[cid].members[i].ty.clone();
            self.add_eq(mty, vty, m.span, Some(m.name_span), Some(vspan));
            self.classes[cid].members[i].value = Some(t);
        }
        self.recursive_mode = saved;

        self.solve()?;
        self.force_instantiate(mark)?;
        for i in 0..self.classes[cid].members.len() {
            let ty = self.classes[cid].members[i].ty.clone();
            self.classes[cid].members[i].ty = self.substitute_ty(&ty)?;
        }
        for i in 0..self.classes[cid].ctor_params.len() {
            let ty = self.classes[cid].ctor_params[i].1.clone();
            self.classes[cid].ctor_params[i].1 = self.substitute_ty(&ty)?;
        }

        // Discharge the predicates accumulated from selects on the open
        // class, then seal it.
        let pending = std::mem::take(&mut self.classes[cid].pending);
        for p in &pending {
            let index = self.classes[cid].member_index(&p.member).ok_or_else(|| {
                TypeError::new(
                    format!(
                        "value of class {} has no member {}",
                        self.classes[cid].name, p.member
                    ),
                    p.span,
                )
            })?;
            let mty = self.classes[cid].members[index].ty.clone();
            self.add_eq(mty, p.ty.clone(), p.span, None, None);
        }
        self.solve()?;
        self.classes[cid].sealed = true;

        // Strip residual class type variables from the frame.
        self.force_instantiate(mark)?;

        self.symbols.relocate();
        Ok(())
    }

    // ── Program entry ────────────────────────────────────────────

    fn resolve_entry(&self, top: &[TItem]) -> Result<Entry, TypeError> {
        let main_ty = Ty::Lambda(vec![], Box::new(Ty::Unit));
        for item in top {
            if let TItem::Local(lid) = item {
                let local = &self.locals[*lid];
                if local.name == "main" {
                    if local.ty != main_ty {
                        return Err(TypeError::new(
                            format!(
                                "main must have type () => Unit, found {}",
                                self.show(&local.ty)
                            ),
                            local.span,
                        ));
                    }
                    return Ok(Entry::TopLevel(local.sym));
                }
            }
        }
        for item in top {
            if let TItem::Class(cid) = item {
                let class = &self.classes[*cid];
                if class.name == "Main" {
                    if let Some(index) = class.member_index("main") {
                        let member = &class.members[index];
                        if member.ty != main_ty {
                            return Err(TypeError::new(
                                format!(
                                    "main must have type () => Unit, found {}",
                                    self.show(&member.ty)
                                ),
                                member.span,
                            ));
                        }
                        return Ok(Entry::ClassMain {
                            class: *cid,
                            member: index,
                        });
                    }
                }
            }
        }
        Err(TypeError::without_span(
            "program must declare a top-level main: () => Unit",
        ))
    }

    // ── Expressions ──────────────────────────────────────────────

    fn type_expr(&mut self, id: ast::ExprId) -> Result<TExprId, TypeError> {
        let module = self.module;
        let span = module.exprs[id].span;
        match &module.exprs[id].kind {
            ast::ExprKind::IntLit(n) => Ok(self.alloc(TExprKind::IntLit(*n), Ty::Int, span)),
            ast::ExprKind::FloatLit(x) => {
                Ok(self.alloc(TExprKind::FloatLit(*x), Ty::Float, span))
            }
            ast::ExprKind::BoolLit(b) => Ok(self.alloc(TExprKind::BoolLit(*b), Ty::Bool, span)),
            ast::ExprKind::StrLit(s) => {
                Ok(self.alloc(TExprKind::StrLit(s.clone()), Ty::Str, span))
            }
            ast::ExprKind::UnitLit => Ok(self.alloc(TExprKind::UnitLit, Ty::Unit, span)),

            ast::ExprKind::Ident(name) => {
                let sid = self.resolve_ident(name, span)?;
                let ty = self.sym_value_ty(sid, span)?;
                let ty = if self.symbols.sym(sid).mutable {
                    Ty::Ref(Box::new(ty))
                } else {
                    ty
                };
                Ok(self.alloc(TExprKind::Ident(sid), ty, span))
            }

            ast::ExprKind::ArrayLit(len) => {
                let tlen = self.type_expr(*len)?;
                let lty = self.value_ty_of(tlen);
                let lspan = self.exprs[tlen].span;
                self.add_eq(lty, Ty::Int, lspan, None, None);
                let elem = self.solver.fresh_var(VarPrefix::T, span);
                Ok(self.alloc(
                    TExprKind::ArrayLit { len: tlen },
                    Ty::Array(Box::new(elem)),
                    span,
                ))
            }

            ast::ExprKind::Select {
                recv,
                field,
                field_span,
            } => {
                let trecv = self.type_expr(*recv)?;
                let rty = self.value_ty_of(trecv);
                let rty = self.instantiate(&rty);
                match rty {
                    Ty::Class(cid) => {
                        let index =
                            self.classes[cid].member_index(field).ok_or_else(|| {
                                TypeError::new(
                                    format!(
                                        "value of class {} has no member {}",
                                        self.classes[cid].name, field
                                    ),
                                    *field_span,
                                )
                            })?;
                        let member = &self.classes[cid].members[index];
                        let ty = if member.mutable {
                            Ty::Ref(Box::new(member.ty.clone()))
                        } else {
                            member.ty.clone()
                        };
                        Ok(self.alloc(
                            TExprKind::Select {
                                recv: trecv,
                                field: field.clone(),
                            },
                            ty,
                            span,
                        ))
                    }
                    Ty::ClassVar(cid) => {
                        let v = self.solver.fresh_var(VarPrefix::T, *field_span);
                        self.classes[cid].pending.push(Predicate {
                            member: field.clone(),
                            ty: v.clone(),
                            span: *field_span,
                        });
                        Ok(self.alloc(
                            TExprKind::Select {
                                recv: trecv,
                                field: field.clone(),
                            },
                            v,
                            span,
                        ))
                    }
                    other => Err(TypeError::new(
                        format!("select on non-class value of type {}", self.show(&other)),
                        module.exprs[*recv].span,
                    )),
                }
            }

            ast::ExprKind::Call { callee, args } => self.type_call(*callee, args, span),

            ast::ExprKind::Binary {
                op,
                lhs,
                rhs,
                op_span,
            } => {
                let tl = self.type_expr(*lhs)?;
                let tr = self.type_expr(*rhs)?;
                let lt = self.instantiate(&self.value_ty_of(tl));
                let rt = self.instantiate(&self.value_ty_of(tr));
                let lspan = self.exprs[tl].span;
                let rspan = self.exprs[tr].span;
                let ty = self.binary_ty(*op, lt, rt, *op_span, lspan, rspan)?;
                Ok(self.alloc(
                    TExprKind::Binary {
                        op: *op,
                        lhs: tl,
                        rhs: tr,
                    },
                    ty,
                    span,
                ))
            }

            ast::ExprKind::Unary {
                op,
                operand,
                op_span,
            } => {
                let t = self.type_expr(*operand)?;
                let oty = self.instantiate(&self.value_ty_of(t));
                let ty = self.unary_ty(*op, oty, *op_span)?;
                Ok(self.alloc(TExprKind::Unary { op: *op, operand: t }, ty, span))
            }

            ast::ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let tc = self.type_expr(*cond)?;
                let cty = self.value_ty_of(tc);
                let cspan = self.exprs[tc].span;
                self.add_eq(cty, Ty::Bool, cspan, None, None);

                let tt = self.type_expr(*then_branch)?;
                let te = self.type_expr(*else_branch)?;
                let t1 = self.instantiate(&self.value_ty_of(tt));
                let t2 = self.instantiate(&self.value_ty_of(te));
                let tspan = self.exprs[tt].span;
                let espan = self.exprs[te].span;

                let ty = if !t1.has_var() && !t2.has_var() {
                    if t1 != t2 {
                        return Err(TypeError::new(
                            format!(
                                "branches of if have different types: {} and {}",
                                self.show(&t1),
                                self.show(&t2)
                            ),
                            span,
                        )
                        .with_related(tspan)
                        .with_related(espan));
                    }
                    t1
                } else {
                    let result = if t1.has_var() { t2.clone() } else { t1.clone() };
                    self.add_eq(t1, t2, span, Some(tspan), Some(espan));
                    result
                };
                Ok(self.alloc(
                    TExprKind::If {
                        cond: tc,
                        then_branch: tt,
                        else_branch: te,
                    },
                    ty,
                    span,
                ))
            }

            ast::ExprKind::While { cond, body } => {
                let tc = self.type_expr(*cond)?;
                let cty = self.value_ty_of(tc);
                let cspan = self.exprs[tc].span;
                self.add_eq(cty, Ty::Bool, cspan, None, None);
                let tb = self.type_expr(*body)?;
                Ok(self.alloc(TExprKind::While { cond: tc, body: tb }, Ty::Unit, span))
            }

            ast::ExprKind::Lambda {
                params,
                ret_ann,
                body,
            } => {
                self.symbols.locate();
                let base = self.symbols.depth() - 1;
                self.lambda_frames.push(LambdaFrame {
                    scope_base: base,
                    free: Vec::new(),
                });

                let mut tparams = Vec::new();
                for p in params {
                    if self.symbols.find_sym_here(&p.name).is_some() {
                        return Err(TypeError::new(
                            format!("duplicate parameter `{}`", p.name),
                            p.name_span,
                        ));
                    }
                    let ty = self.resolve_type_expr(p.type_ann)?;
                    let sid = self.symbols.add_symbol(
                        p.name.clone(),
                        false,
                        p.name_span,
                        Dealias::Param(ty.clone()),
                    );
                    tparams.push((sid, ty));
                }

                let tbody = self.type_expr(*body)?;
                let bty = self.value_ty_of(tbody);
                let ret = match ret_ann {
                    Some(ann) => {
                        let rty = self.resolve_type_expr(*ann)?;
                        let want = self.instantiate(&rty);
                        let got = self.instantiate(&bty);
                        if want != got {
                            return Err(TypeError::new(
                                format!(
                                    "lambda body has type {}, expected {}",
                                    self.show(&got),
                                    self.show(&want)
                                ),
                                self.exprs[tbody].span,
                            ));
                        }
                        want
                    }
                    None => bty,
                };

                let frame = self
                    .lambda_frames
                    .pop()
                    .expect("lambda frame pushed above");
                self.symbols.relocate();

                let param_tys: Vec<Ty> = tparams.iter().map(|(_, t)| t.clone()).collect();
                let lid = self.lambdas.alloc(TLambda {
                    name_hint: SmolStr::new("fn"),
                    params: tparams,
                    ret: ret.clone(),
                    body: tbody,
                    free: frame.free,
                    span,
                });
                Ok(self.alloc(
                    TExprKind::Lambda(lid),
                    Ty::Lambda(param_tys, Box::new(ret)),
                    span,
                ))
            }

            ast::ExprKind::Block { items, tail } => {
                let gitems: Vec<GItem<'a>> = items
                    .iter()
                    .map(|it| match it {
                        ast::BlockItem::Binding(b) => GItem::Binding(b),
                        ast::BlockItem::Expr(e) => GItem::Expr(*e),
                    })
                    .collect();
                let (out, ttail) = self.type_group(&gitems, *tail, false)?;
                let ty = match ttail {
                    Some(t) => self.value_ty_of(t),
                    None => Ty::Unit,
                };
                let titems = out
                    .into_iter()
                    .filter_map(|o| match o {
                        GroupOut::Local(l) => Some(TBlockItem::Local(l)),
                        GroupOut::Expr(e) => Some(TBlockItem::Expr(e)),
                        GroupOut::Class(_) => None,
                    })
                    .collect();
                Ok(self.alloc(
                    TExprKind::Block {
                        items: titems,
                        tail: ttail,
                    },
                    ty,
                    span,
                ))
            }

            ast::ExprKind::New {
                class,
                class_span,
                args,
            } => {
                let (sid, _) = self.symbols.find_sym(class).ok_or_else(|| {
                    TypeError::new(format!("unknown class `{}`", class), *class_span)
                })?;
                let cid = match self.symbols.sym(sid).dealias {
                    Dealias::Class(cid) => cid,
                    _ => {
                        return Err(TypeError::new(
                            format!("`{}` is not a class", class),
                            *class_span,
                        ))
                    }
                };
                let params: Vec<Ty> = self.classes[cid]
                    .ctor_params
                    .iter()
                    .map(|(_, t)| t.clone())
                    .collect();
                if args.len() != params.len() {
                    return Err(TypeError::new(
                        format!(
                            "constructor of class {} expects {} argument(s), found {}",
                            class,
                            params.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                let mut targs = Vec::with_capacity(args.len());
                for (arg, pty) in args.iter().zip(params) {
                    let t = self.type_expr(*arg)?;
                    let aty = self.value_ty_of(t);
                    let aspan = self.exprs[t].span;
                    self.add_eq(pty, aty, aspan, None, None);
                    targs.push(t);
                }
                let ty = if self.classes[cid].sealed {
                    Ty::Class(cid)
                } else {
                    Ty::ClassVar(cid)
                };
                Ok(self.alloc(TExprKind::New { class: cid, args: targs }, ty, span))
            }

            ast::ExprKind::Assign {
                target,
                value,
                eq_span,
            } => self.type_assign(*target, *value, *eq_span, span),
        }
    }

    // ── Application ──────────────────────────────────────────────

    fn type_call(
        &mut self,
        callee: ast::ExprId,
        args: &[ast::ExprId],
        span: Span,
    ) -> Result<TExprId, TypeError> {
        let module = self.module;

        // printf is variadic and typed by its own rule.
        if let ast::ExprKind::Ident(name) = &module.exprs[callee].kind {
            if let Some((sid, _)) = self.symbols.find_sym(name) {
                if matches!(self.symbols.sym(sid).dealias, Dealias::Builtin(Builtin::Printf)) {
                    return self.type_printf(sid, callee, args, span);
                }
            }
        }

        let tcallee = self.type_expr(callee)?;
        let cty = self.value_ty_of(tcallee);
        let fty = self.instantiate(&cty);
        let callee_span = self.exprs[tcallee].span;

        match fty {
            Ty::Array(elem) => {
                if args.len() != 1 {
                    return Err(TypeError::new(
                        format!("array index expects 1 argument, found {}", args.len()),
                        span,
                    ));
                }
                let tindex = self.type_expr(args[0])?;
                let ity = self.value_ty_of(tindex);
                let ispan = self.exprs[tindex].span;
                self.add_eq(ity, Ty::Int, ispan, None, None);
                Ok(self.alloc(
                    TExprKind::Index {
                        array: tcallee,
                        index: tindex,
                    },
                    Ty::Ref(elem),
                    span,
                ))
            }
            Ty::Lambda(params, ret) => {
                if args.len() != params.len() {
                    return Err(TypeError::new(
                        format!(
                            "expected {} argument(s), found {}",
                            params.len(),
                            args.len()
                        ),
                        span,
                    )
                    .with_related(callee_span));
                }
                let mut targs = Vec::with_capacity(args.len());
                for (arg, pty) in args.iter().zip(params) {
                    let t = self.type_expr(*arg)?;
                    let aty = self.value_ty_of(t);
                    let aspan = self.exprs[t].span;
                    self.add_eq(pty, aty, aspan, None, None);
                    targs.push(t);
                }
                Ok(self.alloc(
                    TExprKind::Apply {
                        callee: tcallee,
                        args: targs,
                    },
                    *ret,
                    span,
                ))
            }
            Ty::Var(_) => {
                let mut targs = Vec::with_capacity(args.len());
                let mut arg_tys = Vec::with_capacity(args.len());
                for arg in args {
                    let t = self.type_expr(*arg)?;
                    arg_tys.push(self.value_ty_of(t));
                    targs.push(t);
                }
                let result = self.solver.fresh_var(VarPrefix::X, span);
                self.add_eq(
                    fty,
                    Ty::Lambda(arg_tys, Box::new(result.clone())),
                    span,
                    Some(callee_span),
                    None,
                );
                Ok(self.alloc(
                    TExprKind::Apply {
                        callee: tcallee,
                        args: targs,
                    },
                    result,
                    span,
                ))
            }
            other => Err(TypeError::new(
                format!(
                    "expression of type {} can not be applied",
                    self.show(&other)
                ),
                callee_span,
            )),
        }
    }

    fn type_printf(
        &mut self,
        sid: SymbolId,
        callee: ast::ExprId,
        args: &[ast::ExprId],
        span: Span,
    ) -> Result<TExprId, TypeError> {
        let module = self.module;
        if args.is_empty() {
            return Err(TypeError::new("printf expects a format string", span));
        }
        let mut targs = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let t = self.type_expr(*arg)?;
            let ty = self.instantiate(&self.value_ty_of(t));
            let aspan = self.exprs[t].span;
            if i == 0 {
                if ty.has_var() {
                    self.add_eq(ty, Ty::Str, aspan, None, None);
                } else if ty != Ty::Str {
                    return Err(TypeError::new(
                        format!(
                            "first argument of printf must be a String, found {}",
                            self.show(&ty)
                        ),
                        aspan,
                    ));
                }
            } else if !matches!(ty, Ty::Int | Ty::Float | Ty::Bool | Ty::Str) {
                return Err(TypeError::new(
                    format!(
                        "printf argument must be a ground value, found {}",
                        self.show(&ty)
                    ),
                    aspan,
                ));
            }
            targs.push(t);
        }
        let callee_span = module.exprs[callee].span;
        let tcallee = self.alloc(TExprKind::Ident(sid), Ty::Unit, callee_span);
        Ok(self.alloc(
            TExprKind::Apply {
                callee: tcallee,
                args: targs,
            },
            Ty::Unit,
            span,
        ))
    }

    // ── Assignment ───────────────────────────────────────────────

    fn type_assign(
        &mut self,
        target: ast::ExprId,
        value: ast::ExprId,
        eq_span: Span,
        span: Span,
    ) -> Result<TExprId, TypeError> {
        let module = self.module;
        match &module.exprs[target].kind {
            ast::ExprKind::Ident(name) => {
                let target_span = module.exprs[target].span;
                let sid = self.resolve_ident(name, target_span)?;
                if !self.symbols.sym(sid).mutable {
                    return Err(TypeError::new(
                        format!("can not assign to immutable value `{}`", name),
                        eq_span,
                    ));
                }
                let tvalue = self.type_expr(value)?;
                let sty = self.sym_value_ty(sid, target_span)?;
                let vty = self.value_ty_of(tvalue);
                let vspan = self.exprs[tvalue].span;
                if self.recursive_mode {
                    self.add_eq(sty, vty, span, Some(target_span), Some(vspan));
                } else {
                    let want = self.instantiate(&sty);
                    let got = self.instantiate(&vty);
                    if want.has_var() || got.has_var() {
                        self.add_eq(want, got, span, Some(target_span), Some(vspan));
                    } else if want != got {
                        return Err(TypeError::new(
                            format!(
                                "can not assign {} to `{}` of type {}",
                                self.show(&got),
                                name,
                                self.show(&want)
                            ),
                            eq_span,
                        ));
                    }
                }
                Ok(self.alloc(
                    TExprKind::AssignSym {
                        sym: sid,
                        value: tvalue,
                    },
                    Ty::Unit,
                    span,
                ))
            }
            _ => {
                let ttarget = self.type_expr(target)?;
                let inner = match self.exprs[ttarget].ty.clone() {
                    Ty::Ref(inner) => *inner,
                    _ => {
                        return Err(TypeError::new(
                            "can not assign to this expression",
                            eq_span,
                        ))
                    }
                };
                let tvalue = self.type_expr(value)?;
                let vty = self.value_ty_of(tvalue);
                let vspan = self.exprs[tvalue].span;
                self.add_eq(inner, vty, span, None, Some(vspan));
                Ok(self.alloc(
                    TExprKind::AssignLv {
                        target: ttarget,
                        value: tvalue,
                    },
                    Ty::Unit,
                    span,
                ))
            }
        }
    }

    // ── Operators ────────────────────────────────────────────────

    fn binary_ty(
        &mut self,
        op: BinOp,
        lt: Ty,
        rt: Ty,
        op_span: Span,
        lhs_span: Span,
        rhs_span: Span,
    ) -> Result<Ty, TypeError> {
        // `==` / `!=` accept any same-type pair.
        if matches!(op, BinOp::Eq | BinOp::Ne) {
            let lv = lt.has_var();
            let rv = rt.has_var();
            if !lv && !rv {
                if lt == rt {
                    return Ok(Ty::Bool);
                }
                return Err(TypeError::new(
                    format!(
                        "operator `{}` can not be applied to {} and {}",
                        op,
                        self.show(&lt),
                        self.show(&rt)
                    ),
                    op_span,
                ));
            }
            if lv && rv {
                return Err(TypeError::new(
                    format!("ambiguous operands of `{}`", op),
                    op_span,
                ));
            }
            self.add_eq(lt, rt, op_span, Some(lhs_span), Some(rhs_span));
            return Ok(Ty::Bool);
        }

        for (a, b, out) in Self::binary_signatures(op) {
            if lt == a && rt == b {
                return Ok(out);
            }
            if lt == a && matches!(rt, Ty::Var(_)) {
                self.add_eq(rt.clone(), b, op_span, Some(rhs_span), None);
                return Ok(out);
            }
            if rt == b && matches!(lt, Ty::Var(_)) {
                self.add_eq(lt.clone(), a, op_span, Some(lhs_span), None);
                return Ok(out);
            }
        }
        Err(TypeError::new(
            format!(
                "operator `{}` can not be applied to {} and {}",
                op,
                self.show(&lt),
                self.show(&rt)
            ),
            op_span,
        ))
    }

    fn binary_signatures(op: BinOp) -> Vec<(Ty, Ty, Ty)> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow => vec![
                (Ty::Int, Ty::Int, Ty::Int),
                (Ty::Float, Ty::Float, Ty::Float),
            ],
            BinOp::Mod => vec![(Ty::Int, Ty::Int, Ty::Int)],
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => vec![
                (Ty::Int, Ty::Int, Ty::Bool),
                (Ty::Float, Ty::Float, Ty::Bool),
            ],
            BinOp::And | BinOp::Or => vec![(Ty::Bool, Ty::Bool, Ty::Bool)],
            BinOp::Eq | BinOp::Ne => Vec::new(),
        }
    }

    fn unary_ty(&mut self, op: UnOp, oty: Ty, op_span: Span) -> Result<Ty, TypeError> {
        match op {
            // `!` is non-ambiguous: it forces Boolean.
            UnOp::Not => match oty {
                Ty::Bool => Ok(Ty::Bool),
                Ty::Var(_) => {
                    self.add_eq(oty, Ty::Bool, op_span, None, None);
                    Ok(Ty::Bool)
                }
                other => Err(TypeError::new(
                    format!("operator `!` can not be applied to {}", self.show(&other)),
                    op_span,
                )),
            },
            // `-` requires an already-instantiated operand.
            UnOp::Neg => match oty {
                Ty::Int => Ok(Ty::Int),
                Ty::Float => Ok(Ty::Float),
                Ty::Var(_) => Err(TypeError::new(
                    "ambiguous operand of unary `-`".to_string(),
                    op_span,
                )),
                other => Err(TypeError::new(
                    format!("operator `-` can not be applied to {}", self.show(&other)),
                    op_span,
                )),
            },
        }
    }
}
