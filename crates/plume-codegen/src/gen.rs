//! The closure-converting code generator. Walks the typed tree producing
//! code bundles, lifting lambdas into top-level C functions with
//! synthesized environment structs, and lowering classes to structs with
//! constructor functions.

use std::collections::HashMap;

use la_arena::ArenaMap;
use plume_ast::names::NameGen;
use plume_ast::{BinOp, UnOp};
use plume_typeck::{
    Builtin, ClassId, Dealias, Entry, LambdaId, LocalId, SymbolId, TBlockItem, TExprId,
    TExprKind, TItem, Ty, TypedProgram,
};
use smol_str::SmolStr;

use crate::bundle::Bundle;
use crate::c_ast::{CBinOp, CDef, CExpr, CFunc, CStmt, CType, CUnOp, CUnit};
use crate::error::CodegenError;
use crate::stdlib::{self, Stdlib};

/// Lower a typed program to a C translation unit. Mangling is driven by
/// `names`; resetting it and generating the same program twice yields
/// identical output.
pub fn generate(program: &TypedProgram, names: &mut NameGen) -> Result<CUnit, CodegenError> {
    tracing::debug!(items = program.top.len(), "generating C");
    let mut gen = CodeGen::new(program, names);
    gen.assign_class_names();

    gen.ctx.push(GenFrame {
        env: None,
        self_expr: None,
    });
    let group = gen.lower_group(&program.top)?;

    let mut body = group.decls;
    body.extend(group.stmts);
    body.extend(gen.lower_entry()?);
    body.push(CStmt::Return(Some(CExpr::IntLit(0))));

    gen.defs.push(CDef::Func(CFunc {
        name: "main".into(),
        params: vec![],
        ret: CType::Int,
        body,
    }));

    tracing::debug!(defs = gen.defs.len(), "code generation done");
    Ok(CUnit {
        defs: gen.defs,
        need_stdio: gen.need_stdio,
        need_stdlib: gen.need_stdlib,
        need_math: gen.need_math,
    })
}

// ── Generator state ──────────────────────────────────────────────

/// How a symbol reads back in generated code.
#[derive(Debug, Clone)]
enum SymCode {
    /// A C local variable.
    Var(SmolStr),
    /// A lambda or constructor parameter.
    Param(SmolStr),
    /// A recursive `val`-lambda binding; references compile to direct
    /// uses of the lifted function with this name.
    Rec(SmolStr),
}

struct EnvInfo {
    /// Captured symbol → field name, in capture order.
    fields: Vec<(SymbolId, SmolStr)>,
}

impl EnvInfo {
    fn field_for(&self, sym: SymbolId) -> Option<&SmolStr> {
        self.fields.iter().find(|(s, _)| *s == sym).map(|(_, f)| f)
    }
}

/// One code-gen context frame per lifted function or constructor body.
struct GenFrame {
    /// The closure environment reachable through the `env` parameter.
    env: Option<EnvInfo>,
    /// How to reach `self` here, when lowering class internals.
    self_expr: Option<CExpr>,
}

struct GroupCode {
    decls: Vec<CStmt>,
    stmts: Vec<CStmt>,
}

struct CodeGen<'a> {
    program: &'a TypedProgram,
    names: &'a mut NameGen,
    defs: Vec<CDef>,
    stdlib: Stdlib,
    ctx: Vec<GenFrame>,
    sym_code: ArenaMap<SymbolId, SymCode>,
    /// C function type → emitted typedef name, for call-site casts.
    fn_aliases: HashMap<CType, SmolStr>,
    class_structs: ArenaMap<ClassId, SmolStr>,
    class_ctors: ArenaMap<ClassId, SmolStr>,
    need_stdio: bool,
    need_stdlib: bool,
    need_math: bool,
}

impl<'a> CodeGen<'a> {
    fn new(program: &'a TypedProgram, names: &'a mut NameGen) -> Self {
        Self {
            program,
            names,
            defs: Vec::new(),
            stdlib: Stdlib::default(),
            ctx: Vec::new(),
            sym_code: ArenaMap::default(),
            fn_aliases: HashMap::new(),
            class_structs: ArenaMap::default(),
            class_ctors: ArenaMap::default(),
            need_stdio: false,
            need_stdlib: false,
            need_math: false,
        }
    }

    fn frame(&self) -> &GenFrame {
        self.ctx.last().expect("context frame pushed at entry")
    }

    /// Fix struct and constructor names for every class up front so
    /// forward `new` expressions can refer to them.
    fn assign_class_names(&mut self) {
        for (cid, class) in self.program.classes.iter() {
            let s = self.names.fresh_c(&format!("{}_struct", class.name));
            let c = self.names.fresh_c(&format!("{}_new", class.name));
            self.class_structs.insert(cid, s);
            self.class_ctors.insert(cid, c);
        }
    }

    // ── Types ────────────────────────────────────────────────────

    fn cty(&mut self, ty: &Ty) -> Result<CType, CodegenError> {
        match ty {
            Ty::Int => Ok(CType::Int),
            Ty::Float => Ok(CType::Double),
            Ty::Bool => Ok(CType::Int),
            Ty::Str => Ok(CType::Char.ptr()),
            Ty::Unit => Ok(CType::Void),
            Ty::Array(elem) => Ok(self.cty(elem)?.ptr()),
            Ty::Lambda(..) => {
                self.stdlib.require_closure(&mut self.defs);
                Ok(CType::Struct(stdlib::CLOSURE.into()).ptr())
            }
            Ty::Class(cid) => Ok(CType::Struct(self.class_structs[*cid].clone()).ptr()),
            Ty::Ref(inner) => self.cty(inner),
            Ty::Var(_) | Ty::ClassVar(_) | Ty::Sym(_) => Err(CodegenError::new(
                "unsupported type in code generation",
            )),
        }
    }

    /// The typedef'd function-pointer type used to cast `closure->fun`
    /// at indirect call sites. The environment parameter is `void *`.
    fn fn_alias(&mut self, params: &[Ty], ret: &Ty) -> Result<SmolStr, CodegenError> {
        let mut ps = vec![CType::Void.ptr()];
        for p in params {
            ps.push(self.cty(p)?);
        }
        let key = CType::Fn(ps, Box::new(self.cty(ret)?));
        if let Some(name) = self.fn_aliases.get(&key) {
            return Ok(name.clone());
        }
        let name = self.names.fresh_c("fnty");
        self.defs.push(CDef::TypeDef {
            name: name.clone(),
            ty: key.clone(),
        });
        self.fn_aliases.insert(key, name.clone());
        Ok(name)
    }

    fn sym_ty(&self, sid: SymbolId) -> Result<Ty, CodegenError> {
        match &self.program.symbols[sid].dealias {
            Dealias::Placeholder(ty) | Dealias::Param(ty) => Ok(ty.clone()),
            Dealias::Local(l) => Ok(self.program.locals[*l].ty.clone()),
            Dealias::Member { class, index } => {
                Ok(self.program.classes[*class].members[*index].ty.clone())
            }
            Dealias::Class(_) | Dealias::Builtin(_) => Err(CodegenError::new(format!(
                "`{}` has no value type",
                self.program.symbols[sid].name
            ))),
        }
    }

    // ── Values from bundles ──────────────────────────────────────

    /// Force a bundle into (expression, prefix) form. Function-valued
    /// bundles materialize a `{fun, env}` closure here.
    fn value_of(&mut self, bundle: Bundle) -> Result<(CExpr, Vec<CStmt>), CodegenError> {
        match bundle {
            Bundle::Pure(e) => Ok((e, Vec::new())),
            Bundle::Block(e, prefix) => Ok((e, prefix)),
            // A Unit value read as an expression; the placeholder `0`
            // keeps degenerate programs compiling.
            Bundle::PureBlock(prefix) => Ok((CExpr::IntLit(0), prefix)),
            Bundle::Variable(name, prefix) => Ok((CExpr::Ident(name), prefix)),
            Bundle::Closure { expr, prefix } => Ok((expr, prefix)),
            Bundle::SimpleFunc { name } => Ok(self.closure_value(&name)),
            Bundle::Rec(sid) => match self.sym_code.get(sid).cloned() {
                Some(SymCode::Rec(fname)) => Ok(self.closure_value(&fname)),
                _ => Err(CodegenError::new(format!(
                    "code for `{}` has not been generated yet",
                    self.program.symbols[sid].name
                ))),
            },
        }
    }

    /// Allocate a `{fun, env}` closure around a bare function name with
    /// a null environment.
    fn closure_value(&mut self, fname: &str) -> (CExpr, Vec<CStmt>) {
        self.stdlib.require_closure(&mut self.defs);
        self.need_stdlib = true;
        let clo_ty = CType::Struct(stdlib::CLOSURE.into());
        let clo = self.names.fresh_c("clo");
        let stmts = vec![
            CStmt::VarDef {
                name: clo.clone(),
                ty: clo_ty.clone().ptr(),
                init: Some(CExpr::cast(
                    clo_ty.clone().ptr(),
                    CExpr::call(CExpr::ident("malloc"), vec![CExpr::SizeOf(clo_ty)]),
                )),
            },
            CStmt::Assign(
                CExpr::arrow(CExpr::Ident(clo.clone()), "fun"),
                CExpr::cast(CType::Void.ptr(), CExpr::ident(fname)),
            ),
            CStmt::Assign(CExpr::arrow(CExpr::Ident(clo.clone()), "env"), CExpr::Null),
        ];
        (CExpr::Ident(clo), stmts)
    }

    // ── Groups (top level and blocks) ────────────────────────────

    fn lower_group(&mut self, items: &[TItem]) -> Result<GroupCode, CodegenError> {
        // Pre-assign Rec placeholders: every immutable binding whose
        // body is a lambda gets its final C name now, so peer recursive
        // lambdas resolve to it before the function is emitted.
        for item in items {
            if let TItem::Local(lid) = item {
                let local = &self.program.locals[*lid];
                if !local.mutable
                    && matches!(self.program.exprs[local.value].kind, TExprKind::Lambda(_))
                {
                    let fname = self.names.fresh_c(&local.name);
                    self.sym_code.insert(local.sym, SymCode::Rec(fname));
                }
            }
        }

        let mut decls = Vec::new();
        let mut stmts = Vec::new();
        for item in items {
            match item {
                TItem::Local(lid) => self.lower_local(*lid, &mut decls, &mut stmts)?,
                TItem::Class(cid) => self.lower_class(*cid)?,
                TItem::Expr(e) => {
                    let b = self.lower_expr(*e)?;
                    stmts.extend(b.into_stmts());
                }
            }
        }
        Ok(GroupCode { decls, stmts })
    }

    fn lower_local(
        &mut self,
        lid: LocalId,
        decls: &mut Vec<CStmt>,
        stmts: &mut Vec<CStmt>,
    ) -> Result<(), CodegenError> {
        let local = &self.program.locals[lid];
        let sym = local.sym;
        let value = local.value;
        let name = local.name.clone();
        let ty = local.ty.clone();

        // Recursive lambda binding: emit the lifted function under the
        // pre-assigned name; the binding itself produces no statements
        // unless the lambda captures.
        if let Some(SymCode::Rec(fname)) = self.sym_code.get(sym).cloned() {
            let lam = match self.program.exprs[value].kind {
                TExprKind::Lambda(lam) => lam,
                _ => return Err(CodegenError::new("recursive binding is not a lambda")),
            };
            let bundle = self.lower_lambda(lam, Some(fname), None)?;
            match bundle {
                Bundle::SimpleFunc { .. } => {}
                Bundle::Closure { expr, prefix } => {
                    self.stdlib.require_closure(&mut self.defs);
                    let var = self.names.fresh_c(&name);
                    decls.push(CStmt::VarDef {
                        name: var.clone(),
                        ty: CType::Struct(stdlib::CLOSURE.into()).ptr(),
                        init: None,
                    });
                    stmts.extend(prefix);
                    stmts.push(CStmt::Assign(CExpr::Ident(var.clone()), expr));
                    self.sym_code.insert(sym, SymCode::Var(var));
                }
                _ => return Err(CodegenError::new("unexpected bundle for lambda binding")),
            }
            return Ok(());
        }

        // Ordinary binding: `T x; <prefix>; x = <body>;` with the
        // declaration hoisted to the top of the block.
        let bundle = self.lower_expr(value)?;
        let cty = match ty {
            Ty::Unit => CType::Int,
            other => self.cty(&other)?,
        };
        let var = self.names.fresh_c(&name);
        decls.push(CStmt::VarDef {
            name: var.clone(),
            ty: cty,
            init: None,
        });
        let (expr, prefix) = self.value_of(bundle)?;
        stmts.extend(prefix);
        stmts.push(CStmt::Assign(CExpr::Ident(var.clone()), expr));
        self.sym_code.insert(sym, SymCode::Var(var));
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────

    fn lower_expr(&mut self, id: TExprId) -> Result<Bundle, CodegenError> {
        let expr = &self.program.exprs[id];
        match &expr.kind {
            TExprKind::IntLit(n) => Ok(Bundle::Pure(CExpr::IntLit(*n))),
            TExprKind::FloatLit(x) => Ok(Bundle::Pure(CExpr::FloatLit(*x))),
            TExprKind::BoolLit(b) => Ok(Bundle::Pure(CExpr::IntLit(i64::from(*b)))),
            TExprKind::StrLit(s) => Ok(Bundle::Pure(CExpr::StrLit(s.clone()))),
            TExprKind::UnitLit => Ok(Bundle::PureBlock(Vec::new())),

            TExprKind::Ident(sid) => self.lower_ident(*sid),

            TExprKind::ArrayLit { len } => {
                let elem = match expr.ty.value_ty() {
                    Ty::Array(elem) => (**elem).clone(),
                    _ => return Err(CodegenError::new("array literal without array type")),
                };
                let b = self.lower_expr(*len)?;
                let (len_e, mut prefix) = self.value_of(b)?;
                let ety = self.cty(&elem)?;
                self.need_stdlib = true;
                let arr = self.names.fresh_c("arr");
                prefix.push(CStmt::VarDef {
                    name: arr.clone(),
                    ty: ety.clone().ptr(),
                    init: Some(CExpr::cast(
                        ety.clone().ptr(),
                        CExpr::call(
                            CExpr::ident("malloc"),
                            vec![CExpr::Binary(
                                CBinOp::Mul,
                                Box::new(len_e),
                                Box::new(CExpr::SizeOf(ety)),
                            )],
                        ),
                    )),
                });
                Ok(Bundle::Variable(arr, prefix))
            }

            TExprKind::Select { recv, field } => {
                let b = self.lower_expr(*recv)?;
                let (recv_e, prefix) = self.value_of(b)?;
                let e = CExpr::arrow(recv_e, field.clone());
                if prefix.is_empty() {
                    Ok(Bundle::Pure(e))
                } else {
                    Ok(Bundle::Block(e, prefix))
                }
            }

            TExprKind::Index { array, index } => {
                let ab = self.lower_expr(*array)?;
                let (ae, mut prefix) = self.value_of(ab)?;
                let ib = self.lower_expr(*index)?;
                let (ie, ipre) = self.value_of(ib)?;
                prefix.extend(ipre);
                let e = CExpr::Index(Box::new(ae), Box::new(ie));
                if prefix.is_empty() {
                    Ok(Bundle::Pure(e))
                } else {
                    Ok(Bundle::Block(e, prefix))
                }
            }

            TExprKind::Apply { callee, args } => self.lower_apply(id, *callee, args),

            TExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, *lhs, *rhs),

            TExprKind::Unary { op, operand } => {
                let b = self.lower_expr(*operand)?;
                let (e, prefix) = self.value_of(b)?;
                let cop = match op {
                    UnOp::Not => CUnOp::Not,
                    UnOp::Neg => CUnOp::Neg,
                };
                let e = CExpr::Unary(cop, Box::new(e));
                if prefix.is_empty() {
                    Ok(Bundle::Pure(e))
                } else {
                    Ok(Bundle::Block(e, prefix))
                }
            }

            TExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let result_ty = expr.ty.value_ty().clone();
                self.lower_if(*cond, *then_branch, *else_branch, &result_ty)
            }

            TExprKind::While { cond, body } => self.lower_while(*cond, *body),

            TExprKind::Lambda(lam) => self.lower_lambda(*lam, None, None),

            TExprKind::Block { items, tail } => {
                let result_ty = expr.ty.value_ty().clone();
                let items: Vec<TItem> = items
                    .iter()
                    .map(|it| match it {
                        TBlockItem::Local(l) => TItem::Local(*l),
                        TBlockItem::Expr(e) => TItem::Expr(*e),
                    })
                    .collect();
                let group = self.lower_group(&items)?;
                let mut stmts = group.decls;
                stmts.extend(group.stmts);
                match tail {
                    Some(t) => {
                        let b = self.lower_expr(*t)?;
                        if result_ty == Ty::Unit {
                            stmts.extend(b.into_stmts());
                            Ok(Bundle::PureBlock(stmts))
                        } else {
                            let (e, prefix) = self.value_of(b)?;
                            stmts.extend(prefix);
                            if stmts.is_empty() {
                                Ok(Bundle::Pure(e))
                            } else {
                                Ok(Bundle::Block(e, stmts))
                            }
                        }
                    }
                    None => Ok(Bundle::PureBlock(stmts)),
                }
            }

            TExprKind::New { class, args } => {
                let ctor = self.class_ctors[*class].clone();
                let mut prefix = Vec::new();
                let mut arg_exprs = Vec::new();
                for arg in args {
                    let b = self.lower_expr(*arg)?;
                    let (e, p) = self.value_of(b)?;
                    prefix.extend(p);
                    arg_exprs.push(e);
                }
                let call = CExpr::call(CExpr::Ident(ctor), arg_exprs);
                if prefix.is_empty() {
                    Ok(Bundle::Pure(call))
                } else {
                    Ok(Bundle::Block(call, prefix))
                }
            }

            TExprKind::AssignSym { sym, value } => {
                let vb = self.lower_expr(*value)?;
                let (ve, mut stmts) = self.value_of(vb)?;
                let target = self.lower_ident(*sym)?;
                let te = target.result().ok_or_else(|| {
                    CodegenError::new("assignment target has no generated l-value")
                })?;
                stmts.push(CStmt::Assign(te, ve));
                Ok(Bundle::PureBlock(stmts))
            }

            TExprKind::AssignLv { target, value } => {
                let tb = self.lower_expr(*target)?;
                let (te, mut stmts) = self.value_of(tb)?;
                let vb = self.lower_expr(*value)?;
                let (ve, vpre) = self.value_of(vb)?;
                stmts.extend(vpre);
                stmts.push(CStmt::Assign(te, ve));
                Ok(Bundle::PureBlock(stmts))
            }
        }
    }

    /// Identifier lookup order: the current closure environment, then
    /// the cached parameter or local variable, then class members
    /// through `self`.
    fn lower_ident(&mut self, sid: SymbolId) -> Result<Bundle, CodegenError> {
        if let Some(env) = &self.frame().env {
            if let Some(field) = env.field_for(sid) {
                return Ok(Bundle::Pure(CExpr::arrow(
                    CExpr::ident("env"),
                    field.clone(),
                )));
            }
        }
        match self.sym_code.get(sid) {
            Some(SymCode::Var(name)) | Some(SymCode::Param(name)) => {
                return Ok(Bundle::Pure(CExpr::Ident(name.clone())))
            }
            Some(SymCode::Rec(_)) => return Ok(Bundle::Rec(sid)),
            None => {}
        }
        match &self.program.symbols[sid].dealias {
            Dealias::Member { class, index } => {
                let member = &self.program.classes[*class].members[*index];
                let base = self.frame().self_expr.clone().ok_or_else(|| {
                    CodegenError::new(format!(
                        "member `{}` referenced outside its class",
                        member.name
                    ))
                })?;
                Ok(Bundle::Pure(CExpr::arrow(base, member.name.clone())))
            }
            Dealias::Builtin(b) => Err(CodegenError::new(format!(
                "builtin `{}` can only be called directly",
                b.name()
            ))),
            _ => Err(CodegenError::new(format!(
                "code for `{}` has not been generated yet",
                self.program.symbols[sid].name
            ))),
        }
    }

    // ── Application ──────────────────────────────────────────────

    fn lower_apply(
        &mut self,
        id: TExprId,
        callee: TExprId,
        args: &[TExprId],
    ) -> Result<Bundle, CodegenError> {
        let ret_ty = self.program.exprs[id].ty.value_ty().clone();

        if let TExprKind::Ident(sid) = self.program.exprs[callee].kind {
            if let Dealias::Builtin(b) = self.program.symbols[sid].dealias {
                return self.lower_builtin_call(b, args);
            }
        }

        let callee_ty = self.program.exprs[callee].ty.value_ty().clone();
        let cb = self.lower_expr(callee)?;

        let mut prefix = Vec::new();
        let call = match cb {
            // Direct call of a lifted function: the environment slot is
            // null — recursive bindings reach their peers by name.
            Bundle::Rec(sid) => {
                let fname = match self.sym_code.get(sid).cloned() {
                    Some(SymCode::Rec(fname)) => fname,
                    _ => {
                        return Err(CodegenError::new(format!(
                            "code for `{}` has not been generated yet",
                            self.program.symbols[sid].name
                        )))
                    }
                };
                let arg_exprs = self.lower_args(args, &mut prefix)?;
                self.need_stdlib = true;
                let mut all = vec![CExpr::Null];
                all.extend(arg_exprs);
                CExpr::call(CExpr::Ident(fname), all)
            }
            Bundle::SimpleFunc { name } => {
                let arg_exprs = self.lower_args(args, &mut prefix)?;
                self.need_stdlib = true;
                let mut all = vec![CExpr::Null];
                all.extend(arg_exprs);
                CExpr::call(CExpr::Ident(name), all)
            }
            other => {
                let (clo, cpre) = self.value_of(other)?;
                prefix.extend(cpre);
                // The closure expression is read twice (fun and env), so
                // anything but a bare identifier is bound to a temporary.
                let clo = match clo {
                    CExpr::Ident(_) => clo,
                    other => {
                        self.stdlib.require_closure(&mut self.defs);
                        let tmp = self.names.fresh_c("fn");
                        prefix.push(CStmt::VarDef {
                            name: tmp.clone(),
                            ty: CType::Struct(stdlib::CLOSURE.into()).ptr(),
                            init: Some(other),
                        });
                        CExpr::Ident(tmp)
                    }
                };
                let arg_exprs = self.lower_args(args, &mut prefix)?;
                let (params, ret) = match &callee_ty {
                    Ty::Lambda(params, ret) => (params.clone(), (**ret).clone()),
                    _ => return Err(CodegenError::new("indirect call on non-function type")),
                };
                let alias = self.fn_alias(&params, &ret)?;
                let fun = CExpr::cast(
                    CType::Alias(alias),
                    CExpr::arrow(clo.clone(), "fun"),
                );
                let mut all = vec![CExpr::arrow(clo, "env")];
                all.extend(arg_exprs);
                CExpr::call(fun, all)
            }
        };

        if ret_ty == Ty::Unit {
            prefix.push(CStmt::Expr(call));
            Ok(Bundle::PureBlock(prefix))
        } else if prefix.is_empty() {
            Ok(Bundle::Pure(call))
        } else {
            Ok(Bundle::Block(call, prefix))
        }
    }

    fn lower_args(
        &mut self,
        args: &[TExprId],
        prefix: &mut Vec<CStmt>,
    ) -> Result<Vec<CExpr>, CodegenError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            let b = self.lower_expr(*arg)?;
            let (e, p) = self.value_of(b)?;
            prefix.extend(p);
            out.push(e);
        }
        Ok(out)
    }

    fn lower_builtin_call(
        &mut self,
        builtin: Builtin,
        args: &[TExprId],
    ) -> Result<Bundle, CodegenError> {
        let mut prefix = Vec::new();
        let mut arg_exprs = Vec::new();
        for arg in args {
            let b = self.lower_expr(*arg)?;
            let (e, p) = self.value_of(b)?;
            prefix.extend(p);
            arg_exprs.push(e);
        }
        match builtin {
            Builtin::ReadInt => {
                self.stdlib.require_read_int(&mut self.defs);
                self.need_stdio = true;
                let call = CExpr::call(CExpr::ident(stdlib::READ_INT), vec![]);
                if prefix.is_empty() {
                    Ok(Bundle::Pure(call))
                } else {
                    Ok(Bundle::Block(call, prefix))
                }
            }
            Builtin::ReadFloat => {
                self.stdlib.require_read_float(&mut self.defs);
                self.need_stdio = true;
                let call = CExpr::call(CExpr::ident(stdlib::READ_FLOAT), vec![]);
                if prefix.is_empty() {
                    Ok(Bundle::Pure(call))
                } else {
                    Ok(Bundle::Block(call, prefix))
                }
            }
            Builtin::PrintlnInt | Builtin::PrintlnFloat => {
                self.need_stdio = true;
                let format = match builtin {
                    Builtin::PrintlnInt => "%d\n",
                    _ => "%f\n",
                };
                let mut all = vec![CExpr::StrLit(format.to_string())];
                all.extend(arg_exprs);
                prefix.push(CStmt::Expr(CExpr::call(CExpr::ident("printf"), all)));
                Ok(Bundle::PureBlock(prefix))
            }
            Builtin::Printf => {
                self.need_stdio = true;
                prefix.push(CStmt::Expr(CExpr::call(CExpr::ident("printf"), arg_exprs)));
                Ok(Bundle::PureBlock(prefix))
            }
        }
    }

    // ── Operators ────────────────────────────────────────────────

    fn lower_binary(&mut self, op: BinOp, lhs: TExprId, rhs: TExprId) -> Result<Bundle, CodegenError> {
        let operand_ty = self.program.exprs[lhs].ty.value_ty().clone();
        let lb = self.lower_expr(lhs)?;
        let (le, mut prefix) = self.value_of(lb)?;
        let rb = self.lower_expr(rhs)?;
        let (re, rpre) = self.value_of(rb)?;
        prefix.extend(rpre);

        // `^` lowers to a helper call rather than a C operator.
        let e = if op == BinOp::Pow {
            if operand_ty == Ty::Float {
                self.need_math = true;
                CExpr::call(CExpr::ident("pow"), vec![le, re])
            } else {
                self.stdlib.require_ipow(&mut self.defs);
                CExpr::call(CExpr::ident(stdlib::IPOW), vec![le, re])
            }
        } else {
            let cop = match op {
                BinOp::Add => CBinOp::Add,
                BinOp::Sub => CBinOp::Sub,
                BinOp::Mul => CBinOp::Mul,
                BinOp::Div => CBinOp::Div,
                BinOp::Mod => CBinOp::Mod,
                BinOp::Lt => CBinOp::Lt,
                BinOp::Le => CBinOp::Le,
                BinOp::Gt => CBinOp::Gt,
                BinOp::Ge => CBinOp::Ge,
                BinOp::Eq => CBinOp::Eq,
                BinOp::Ne => CBinOp::Ne,
                BinOp::And => CBinOp::And,
                BinOp::Or => CBinOp::Or,
                BinOp::Pow => unreachable!("`^` handled above"),
            };
            CExpr::Binary(cop, Box::new(le), Box::new(re))
        };
        if prefix.is_empty() {
            Ok(Bundle::Pure(e))
        } else {
            Ok(Bundle::Block(e, prefix))
        }
    }

    // ── Control flow ─────────────────────────────────────────────

    fn lower_if(
        &mut self,
        cond: TExprId,
        then_branch: TExprId,
        else_branch: TExprId,
        result_ty: &Ty,
    ) -> Result<Bundle, CodegenError> {
        let cb = self.lower_expr(cond)?;
        let (ce, mut prefix) = self.value_of(cb)?;
        let tb = self.lower_expr(then_branch)?;
        let eb = self.lower_expr(else_branch)?;

        if *result_ty == Ty::Unit {
            prefix.push(CStmt::If {
                cond: ce,
                then_branch: tb.into_stmts(),
                else_branch: eb.into_stmts(),
            });
            return Ok(Bundle::PureBlock(prefix));
        }

        let tmp = self.names.fresh_c("ifres");
        let tmp_ty = self.cty(result_ty)?;
        let (te, mut tstmts) = self.value_of(tb)?;
        tstmts.push(CStmt::Assign(CExpr::Ident(tmp.clone()), te));
        let (ee, mut estmts) = self.value_of(eb)?;
        estmts.push(CStmt::Assign(CExpr::Ident(tmp.clone()), ee));

        prefix.insert(
            0,
            CStmt::VarDef {
                name: tmp.clone(),
                ty: tmp_ty,
                init: None,
            },
        );
        prefix.push(CStmt::If {
            cond: ce,
            then_branch: tstmts,
            else_branch: estmts,
        });
        Ok(Bundle::Block(CExpr::Ident(tmp), prefix))
    }

    fn lower_while(&mut self, cond: TExprId, body: TExprId) -> Result<Bundle, CodegenError> {
        let cb = self.lower_expr(cond)?;
        let (ce, cpre) = self.value_of(cb)?;
        let body_stmts = self.lower_expr(body)?.into_stmts();

        let stmt = if cpre.is_empty() {
            CStmt::While {
                cond: ce,
                body: body_stmts,
            }
        } else {
            // The condition has its own prefix; re-evaluate it at the
            // top of every iteration.
            let mut loop_body = cpre;
            loop_body.push(CStmt::If {
                cond: CExpr::Unary(CUnOp::Not, Box::new(ce)),
                then_branch: vec![CStmt::Break],
                else_branch: vec![],
            });
            loop_body.extend(body_stmts);
            CStmt::While {
                cond: CExpr::IntLit(1),
                body: loop_body,
            }
        };
        Ok(Bundle::PureBlock(vec![stmt]))
    }

    // ── Lambda lowering (closure conversion) ─────────────────────

    /// Lift a lambda to a top-level C function. `rec_name` fixes the
    /// function name for recursive bindings; `method_class` is set when
    /// the lambda is a direct class member, which always injects `self`
    /// into its environment.
    fn lower_lambda(
        &mut self,
        lam_id: LambdaId,
        rec_name: Option<SmolStr>,
        method_class: Option<ClassId>,
    ) -> Result<Bundle, CodegenError> {
        let lam = &self.program.lambdas[lam_id];
        let params = lam.params.clone();
        let free = lam.free.clone();
        let ret = lam.ret.clone();
        let body = lam.body;
        let name_hint = lam.name_hint.clone();

        // Filter the free names: members route through `self`, builtins
        // and recursive function bindings resolve to direct references.
        let mut captured: Vec<SymbolId> = Vec::new();
        let mut member_class: Option<ClassId> = None;
        for sid in free {
            match self.program.symbols[sid].dealias {
                Dealias::Member { class, .. } => member_class = Some(class),
                Dealias::Builtin(_) | Dealias::Class(_) => {}
                _ => {
                    if matches!(self.sym_code.get(sid), Some(SymCode::Rec(_))) {
                        continue;
                    }
                    if !captured.contains(&sid) {
                        captured.push(sid);
                    }
                }
            }
        }
        let self_class = method_class.or(member_class);

        let fname = rec_name.unwrap_or_else(|| self.names.fresh_c(&name_hint));
        let ret_cty = self.cty(&ret)?;
        let mut cparams: Vec<(SmolStr, CType)> = Vec::new();
        let mut param_codes = Vec::new();
        for (sid, ty) in &params {
            let pn = self.names.fresh_c(&self.program.symbols[*sid].name);
            param_codes.push((*sid, pn.clone()));
            cparams.push((pn, self.cty(ty)?));
        }

        // Non-capturing case: a plain function, no environment struct.
        if captured.is_empty() && self_class.is_none() {
            let mut all_params = vec![(SmolStr::new("env"), CType::Void.ptr())];
            all_params.extend(cparams);
            self.ctx.push(GenFrame {
                env: None,
                self_expr: None,
            });
            for (sid, pn) in &param_codes {
                self.sym_code.insert(*sid, SymCode::Param(pn.clone()));
            }
            let fn_body = self.lower_fn_body(body, &ret)?;
            self.ctx.pop();
            self.defs.push(CDef::Func(CFunc {
                name: fname.clone(),
                params: all_params,
                ret: ret_cty,
                body: fn_body,
            }));
            return Ok(Bundle::SimpleFunc { name: fname });
        }

        // Environment struct: one field per captured name, plus `self`
        // when class members are reachable.
        let env_name = SmolStr::new(format!("{}_env", fname));
        let mut fields: Vec<(SmolStr, CType)> = Vec::new();
        let mut env_fields: Vec<(SymbolId, SmolStr)> = Vec::new();
        for &sid in &captured {
            let field = self.program.symbols[sid].name.clone();
            let fty = self.sym_ty(sid)?;
            fields.push((field.clone(), self.cty(&fty)?));
            env_fields.push((sid, field));
        }
        if let Some(cid) = self_class {
            fields.push((
                SmolStr::new("self"),
                CType::Struct(self.class_structs[cid].clone()).ptr(),
            ));
        }
        self.defs.push(CDef::Struct {
            name: env_name.clone(),
            fields,
        });

        let mut all_params = vec![(
            SmolStr::new("env"),
            CType::Struct(env_name.clone()).ptr(),
        )];
        all_params.extend(cparams);

        let self_expr = self_class
            .map(|_| CExpr::arrow(CExpr::ident("env"), "self"));
        self.ctx.push(GenFrame {
            env: Some(EnvInfo {
                fields: env_fields.clone(),
            }),
            self_expr,
        });
        for (sid, pn) in &param_codes {
            self.sym_code.insert(*sid, SymCode::Param(pn.clone()));
        }
        let fn_body = self.lower_fn_body(body, &ret)?;
        self.ctx.pop();
        self.defs.push(CDef::Func(CFunc {
            name: fname.clone(),
            params: all_params,
            ret: ret_cty,
            body: fn_body,
        }));

        // Use site: allocate the environment, store each captured
        // variable, then allocate the `{fun, env}` closure.
        self.stdlib.require_closure(&mut self.defs);
        self.need_stdlib = true;
        let env_ty = CType::Struct(env_name);
        let env_var = self.names.fresh_c("env");
        let mut prefix = vec![CStmt::VarDef {
            name: env_var.clone(),
            ty: env_ty.clone().ptr(),
            init: Some(CExpr::cast(
                env_ty.clone().ptr(),
                CExpr::call(CExpr::ident("malloc"), vec![CExpr::SizeOf(env_ty)]),
            )),
        }];
        for (sid, field) in &env_fields {
            let current = self.lower_ident(*sid)?;
            let (value, pre) = self.value_of(current)?;
            prefix.extend(pre);
            prefix.push(CStmt::Assign(
                CExpr::arrow(CExpr::Ident(env_var.clone()), field.clone()),
                value,
            ));
        }
        if self_class.is_some() {
            let base = self.frame().self_expr.clone().ok_or_else(|| {
                CodegenError::new("class method lowered outside a class context")
            })?;
            prefix.push(CStmt::Assign(
                CExpr::arrow(CExpr::Ident(env_var.clone()), "self"),
                base,
            ));
        }

        let clo_ty = CType::Struct(stdlib::CLOSURE.into());
        let clo = self.names.fresh_c("clo");
        prefix.push(CStmt::VarDef {
            name: clo.clone(),
            ty: clo_ty.clone().ptr(),
            init: Some(CExpr::cast(
                clo_ty.clone().ptr(),
                CExpr::call(CExpr::ident("malloc"), vec![CExpr::SizeOf(clo_ty)]),
            )),
        });
        prefix.push(CStmt::Assign(
            CExpr::arrow(CExpr::Ident(clo.clone()), "fun"),
            CExpr::cast(CType::Void.ptr(), CExpr::Ident(fname)),
        ));
        prefix.push(CStmt::Assign(
            CExpr::arrow(CExpr::Ident(clo.clone()), "env"),
            CExpr::cast(CType::Void.ptr(), CExpr::Ident(env_var)),
        ));
        Ok(Bundle::Closure {
            expr: CExpr::Ident(clo),
            prefix,
        })
    }

    fn lower_fn_body(&mut self, body: TExprId, ret: &Ty) -> Result<Vec<CStmt>, CodegenError> {
        let b = self.lower_expr(body)?;
        if *ret == Ty::Unit {
            Ok(b.into_stmts())
        } else {
            let (e, mut stmts) = self.value_of(b)?;
            stmts.push(CStmt::Return(Some(e)));
            Ok(stmts)
        }
    }

    // ── Class lowering ───────────────────────────────────────────

    fn lower_class(&mut self, cid: ClassId) -> Result<(), CodegenError> {
        let class = &self.program.classes[cid];
        let struct_name = self.class_structs[cid].clone();
        let ctor_name = self.class_ctors[cid].clone();
        let ctor_params = class.ctor_params.clone();
        let member_count = class.members.len();

        let mut fields = Vec::with_capacity(member_count);
        for m in &self.program.classes[cid].members {
            let name = m.name.clone();
            let ty = m.ty.clone();
            fields.push((name, ty));
        }
        let mut cfields = Vec::with_capacity(fields.len());
        for (name, ty) in fields {
            let cty = match ty {
                Ty::Unit => CType::Int,
                other => self.cty(&other)?,
            };
            cfields.push((name, cty));
        }
        self.defs.push(CDef::Struct {
            name: struct_name.clone(),
            fields: cfields,
        });

        // Constructor: malloc the struct, initialize each member slot in
        // order, return the pointer.
        let self_var = self.names.fresh_c("self");
        let mut params = Vec::with_capacity(ctor_params.len());
        for (sid, ty) in &ctor_params {
            let pn = self.names.fresh_c(&self.program.symbols[*sid].name);
            self.sym_code.insert(*sid, SymCode::Param(pn.clone()));
            params.push((pn, self.cty(ty)?));
        }

        self.ctx.push(GenFrame {
            env: None,
            self_expr: Some(CExpr::Ident(self_var.clone())),
        });

        let struct_ty = CType::Struct(struct_name.clone());
        self.need_stdlib = true;
        let mut body = vec![CStmt::VarDef {
            name: self_var.clone(),
            ty: struct_ty.clone().ptr(),
            init: Some(CExpr::cast(
                struct_ty.clone().ptr(),
                CExpr::call(CExpr::ident("malloc"), vec![CExpr::SizeOf(struct_ty.clone())]),
            )),
        }];

        for index in 0..member_count {
            let member = &self.program.classes[cid].members[index];
            let name = member.name.clone();
            let is_unit = member.ty == Ty::Unit;
            let value = member.value.ok_or_else(|| {
                CodegenError::new(format!("member `{}` has no typed body", name))
            })?;
            let bundle = match self.program.exprs[value].kind {
                TExprKind::Lambda(lam) => self.lower_lambda(lam, None, Some(cid))?,
                _ => self.lower_expr(value)?,
            };
            if is_unit {
                body.extend(bundle.into_stmts());
                continue;
            }
            let (e, prefix) = self.value_of(bundle)?;
            body.extend(prefix);
            body.push(CStmt::Assign(
                CExpr::arrow(CExpr::Ident(self_var.clone()), name),
                e,
            ));
        }
        body.push(CStmt::Return(Some(CExpr::Ident(self_var))));

        self.ctx.pop();
        self.defs.push(CDef::Func(CFunc {
            name: ctor_name,
            params,
            ret: CType::Struct(struct_name).ptr(),
            body,
        }));
        Ok(())
    }

    // ── Program entry ────────────────────────────────────────────

    /// The emitted `main(void)` calls the user's `main` closure once.
    fn lower_entry(&mut self) -> Result<Vec<CStmt>, CodegenError> {
        match self.program.entry {
            Entry::TopLevel(sym) => match self.sym_code.get(sym).cloned() {
                Some(SymCode::Rec(fname)) => {
                    self.need_stdlib = true;
                    Ok(vec![CStmt::Expr(CExpr::call(
                        CExpr::Ident(fname),
                        vec![CExpr::Null],
                    ))])
                }
                Some(SymCode::Var(var)) => {
                    let alias = self.fn_alias(&[], &Ty::Unit)?;
                    let clo = CExpr::Ident(var);
                    Ok(vec![CStmt::Expr(CExpr::call(
                        CExpr::cast(CType::Alias(alias), CExpr::arrow(clo.clone(), "fun")),
                        vec![CExpr::arrow(clo, "env")],
                    ))])
                }
                _ => Err(CodegenError::new("no code generated for main")),
            },
            Entry::ClassMain { class, member } => {
                let ctor = self.class_ctors[class].clone();
                let struct_name = self.class_structs[class].clone();
                let member_name = self.program.classes[class].members[member].name.clone();
                let obj = self.names.fresh_c("app");
                let alias = self.fn_alias(&[], &Ty::Unit)?;
                let clo = CExpr::arrow(CExpr::Ident(obj.clone()), member_name);
                Ok(vec![
                    CStmt::VarDef {
                        name: obj,
                        ty: CType::Struct(struct_name).ptr(),
                        init: Some(CExpr::call(CExpr::Ident(ctor), vec![])),
                    },
                    CStmt::Expr(CExpr::call(
                        CExpr::cast(CType::Alias(alias), CExpr::arrow(clo.clone(), "fun")),
                        vec![CExpr::arrow(clo, "env")],
                    )),
                ])
            }
        }
    }
}
