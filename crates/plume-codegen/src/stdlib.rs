//! Lazily emitted runtime stubs: the shared closure struct and the
//! small helpers the I/O primitives and `^` lower to.

use crate::c_ast::{CBinOp, CDef, CExpr, CFunc, CStmt, CType, CUnOp};

pub const CLOSURE: &str = "closure";
pub const READ_INT: &str = "plume_read_int";
pub const READ_FLOAT: &str = "plume_read_float";
pub const IPOW: &str = "plume_ipow";

/// Tracks which stubs have been emitted so each lands in the definition
/// stream exactly once.
#[derive(Debug, Default)]
pub struct Stdlib {
    closure: bool,
    read_int: bool,
    read_float: bool,
    ipow: bool,
}

impl Stdlib {
    /// `struct closure { void *fun; void *env; }` — the `{func, env}`
    /// pair every lambda value lowers to.
    pub fn require_closure(&mut self, defs: &mut Vec<CDef>) {
        if self.closure {
            return;
        }
        self.closure = true;
        defs.push(CDef::Struct {
            name: CLOSURE.into(),
            fields: vec![
                ("fun".into(), CType::Void.ptr()),
                ("env".into(), CType::Void.ptr()),
            ],
        });
    }

    pub fn require_read_int(&mut self, defs: &mut Vec<CDef>) {
        if self.read_int {
            return;
        }
        self.read_int = true;
        defs.push(CDef::Func(scanf_stub(READ_INT, CType::Int, "%d")));
    }

    pub fn require_read_float(&mut self, defs: &mut Vec<CDef>) {
        if self.read_float {
            return;
        }
        self.read_float = true;
        defs.push(CDef::Func(scanf_stub(READ_FLOAT, CType::Double, "%lf")));
    }

    /// Integer exponentiation by repeated multiplication.
    pub fn require_ipow(&mut self, defs: &mut Vec<CDef>) {
        if self.ipow {
            return;
        }
        self.ipow = true;
        let base = CExpr::ident("base");
        let exp = CExpr::ident("exp");
        let r = CExpr::ident("r");
        defs.push(CDef::Func(CFunc {
            name: IPOW.into(),
            params: vec![("base".into(), CType::Int), ("exp".into(), CType::Int)],
            ret: CType::Int,
            body: vec![
                CStmt::VarDef {
                    name: "r".into(),
                    ty: CType::Int,
                    init: Some(CExpr::IntLit(1)),
                },
                CStmt::While {
                    cond: CExpr::Binary(
                        CBinOp::Gt,
                        Box::new(exp.clone()),
                        Box::new(CExpr::IntLit(0)),
                    ),
                    body: vec![
                        CStmt::Assign(
                            r.clone(),
                            CExpr::Binary(CBinOp::Mul, Box::new(r.clone()), Box::new(base)),
                        ),
                        CStmt::Assign(
                            exp.clone(),
                            CExpr::Binary(
                                CBinOp::Sub,
                                Box::new(exp),
                                Box::new(CExpr::IntLit(1)),
                            ),
                        ),
                    ],
                },
                CStmt::Return(Some(r)),
            ],
        }));
    }
}

fn scanf_stub(name: &str, ty: CType, format: &str) -> CFunc {
    CFunc {
        name: name.into(),
        params: vec![],
        ret: ty.clone(),
        body: vec![
            CStmt::VarDef {
                name: "x".into(),
                ty,
                init: None,
            },
            CStmt::Expr(CExpr::call(
                CExpr::ident("scanf"),
                vec![
                    CExpr::StrLit(format.to_string()),
                    CExpr::Unary(CUnOp::AddrOf, Box::new(CExpr::ident("x"))),
                ],
            )),
            CStmt::Return(Some(CExpr::ident("x"))),
        ],
    }
}
