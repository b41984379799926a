//! Renders a `CUnit` to C source text. Layout: includes, forward struct
//! typedefs, struct bodies, function-pointer typedefs, prototypes, then
//! function definitions — so emission order inside the generator never
//! has to worry about declare-before-use.

use std::fmt::Write as _;

use crate::c_ast::{CDef, CExpr, CFunc, CStmt, CType, CUnit};

pub fn emit(unit: &CUnit) -> String {
    let mut out = String::new();

    if unit.need_stdio {
        out.push_str("#include <stdio.h>\n");
    }
    if unit.need_stdlib {
        out.push_str("#include <stdlib.h>\n");
    }
    if unit.need_math {
        out.push_str("#include <math.h>\n");
    }
    if unit.need_stdio || unit.need_stdlib || unit.need_math {
        out.push('\n');
    }

    let structs: Vec<_> = unit
        .defs
        .iter()
        .filter_map(|d| match d {
            CDef::Struct { name, fields } => Some((name, fields)),
            _ => None,
        })
        .collect();
    let typedefs: Vec<_> = unit
        .defs
        .iter()
        .filter_map(|d| match d {
            CDef::TypeDef { name, ty } => Some((name, ty)),
            _ => None,
        })
        .collect();
    let funcs: Vec<&CFunc> = unit
        .defs
        .iter()
        .filter_map(|d| match d {
            CDef::Func(f) => Some(f),
            _ => None,
        })
        .collect();

    for (name, _) in &structs {
        let _ = writeln!(out, "typedef struct {name} {name};");
    }
    if !structs.is_empty() {
        out.push('\n');
    }

    for (name, fields) in &structs {
        let _ = writeln!(out, "struct {name} {{");
        for (field, ty) in *fields {
            let _ = writeln!(out, "    {};", declare(ty, field));
        }
        out.push_str("};\n\n");
    }

    for (name, ty) in &typedefs {
        let _ = writeln!(out, "typedef {};", declare_typedef(ty, name));
    }
    if !typedefs.is_empty() {
        out.push('\n');
    }

    for f in &funcs {
        if f.name != "main" {
            let _ = writeln!(out, "{};", signature(f));
        }
    }
    if funcs.len() > 1 {
        out.push('\n');
    }

    for f in &funcs {
        let _ = writeln!(out, "{} {{", signature(f));
        for stmt in &f.body {
            emit_stmt(&mut out, stmt, 1);
        }
        out.push_str("}\n\n");
    }

    out
}

// ── Declarations ─────────────────────────────────────────────────

fn type_str(ty: &CType) -> String {
    match ty {
        CType::Int => "int".to_string(),
        CType::Double => "double".to_string(),
        CType::Char => "char".to_string(),
        CType::Bool => "bool".to_string(),
        CType::Void => "void".to_string(),
        CType::Ptr(inner) => {
            let inner = type_str(inner);
            if inner.ends_with('*') {
                format!("{}*", inner)
            } else {
                format!("{} *", inner)
            }
        }
        CType::Struct(name) | CType::Alias(name) => name.to_string(),
        CType::Fn(params, ret) => {
            // Only meaningful inside typedefs and casts.
            let params: Vec<String> = params.iter().map(type_str).collect();
            format!("{} (*)({})", type_str(ret), params.join(", "))
        }
    }
}

/// `int x`, `closure *f`, `double a[10]`-free — plain declarators only.
fn declare(ty: &CType, name: &str) -> String {
    let t = type_str(ty);
    if t.ends_with('*') {
        format!("{}{}", t, name)
    } else {
        format!("{} {}", t, name)
    }
}

/// The declarator inside `typedef …;` — function types become function
/// pointers named `name`.
fn declare_typedef(ty: &CType, name: &str) -> String {
    match ty {
        CType::Fn(params, ret) => {
            let params: Vec<String> = params.iter().map(type_str).collect();
            format!("{} (*{})({})", type_str(ret), name, params.join(", "))
        }
        other => declare(other, name),
    }
}

fn signature(f: &CFunc) -> String {
    let params = if f.params.is_empty() {
        "void".to_string()
    } else {
        f.params
            .iter()
            .map(|(name, ty)| declare(ty, name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{}({})", declare(&f.ret, &f.name), params)
}

// ── Statements ───────────────────────────────────────────────────

fn emit_stmt(out: &mut String, stmt: &CStmt, depth: usize) {
    let pad = "    ".repeat(depth);
    match stmt {
        CStmt::Return(None) => {
            let _ = writeln!(out, "{pad}return;");
        }
        CStmt::Return(Some(e)) => {
            let _ = writeln!(out, "{pad}return {};", expr(e));
        }
        CStmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let _ = writeln!(out, "{pad}if ({}) {{", expr(cond));
            for s in then_branch {
                emit_stmt(out, s, depth + 1);
            }
            if else_branch.is_empty() {
                let _ = writeln!(out, "{pad}}}");
            } else {
                let _ = writeln!(out, "{pad}}} else {{");
                for s in else_branch {
                    emit_stmt(out, s, depth + 1);
                }
                let _ = writeln!(out, "{pad}}}");
            }
        }
        CStmt::While { cond, body } => {
            let _ = writeln!(out, "{pad}while ({}) {{", expr(cond));
            for s in body {
                emit_stmt(out, s, depth + 1);
            }
            let _ = writeln!(out, "{pad}}}");
        }
        CStmt::Break => {
            let _ = writeln!(out, "{pad}break;");
        }
        CStmt::Continue => {
            let _ = writeln!(out, "{pad}continue;");
        }
        CStmt::VarDef { name, ty, init } => match init {
            Some(e) => {
                let _ = writeln!(out, "{pad}{} = {};", declare(ty, name), expr(e));
            }
            None => {
                let _ = writeln!(out, "{pad}{};", declare(ty, name));
            }
        },
        CStmt::Assign(lhs, rhs) => {
            let _ = writeln!(out, "{pad}{} = {};", expr(lhs), expr(rhs));
        }
        CStmt::Expr(e) => {
            let _ = writeln!(out, "{pad}{};", expr(e));
        }
    }
}

// ── Expressions ──────────────────────────────────────────────────

fn expr(e: &CExpr) -> String {
    match e {
        CExpr::IntLit(n) => n.to_string(),
        CExpr::FloatLit(x) => format!("{:?}", x),
        CExpr::StrLit(s) => format!("\"{}\"", escape(s)),
        CExpr::Ident(name) => name.to_string(),
        CExpr::Binary(op, lhs, rhs) => {
            format!("({} {} {})", expr(lhs), op.symbol(), expr(rhs))
        }
        CExpr::Unary(op, operand) => format!("{}{}", op.symbol(), atom(operand)),
        CExpr::Member { base, field, arrow } => {
            let sep = if *arrow { "->" } else { "." };
            format!("{}{}{}", atom(base), sep, field)
        }
        CExpr::Call(callee, args) => {
            let args: Vec<String> = args.iter().map(expr).collect();
            format!("{}({})", atom(callee), args.join(", "))
        }
        CExpr::Index(base, index) => format!("{}[{}]", atom(base), expr(index)),
        CExpr::Cast(ty, inner) => format!("(({}){})", type_str(ty), atom(inner)),
        CExpr::SizeOf(ty) => format!("sizeof({})", type_str(ty)),
        CExpr::Null => "NULL".to_string(),
    }
}

/// Wrap non-atomic operands in parentheses.
fn atom(e: &CExpr) -> String {
    match e {
        CExpr::IntLit(_)
        | CExpr::FloatLit(_)
        | CExpr::StrLit(_)
        | CExpr::Ident(_)
        | CExpr::Call(..)
        | CExpr::Member { .. }
        | CExpr::Index(..)
        | CExpr::Binary(..)
        | CExpr::Cast(..)
        | CExpr::Null => expr(e),
        CExpr::Unary(..) | CExpr::SizeOf(_) => format!("({})", expr(e)),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c_ast::{CBinOp, CUnOp};

    #[test]
    fn declarations_place_pointers_tightly() {
        assert_eq!(declare(&CType::Int, "x"), "int x");
        assert_eq!(declare(&CType::Char.ptr(), "s"), "char *s");
        assert_eq!(
            declare(&CType::Struct("closure".into()).ptr(), "f"),
            "closure *f"
        );
    }

    #[test]
    fn typedef_of_function_pointer() {
        let ty = CType::Fn(
            vec![CType::Void.ptr(), CType::Int],
            Box::new(CType::Int),
        );
        assert_eq!(declare_typedef(&ty, "fnty__0"), "int (*fnty__0)(void *, int)");
    }

    #[test]
    fn expressions_parenthesize() {
        let e = CExpr::Binary(
            CBinOp::Mul,
            Box::new(CExpr::ident("n")),
            Box::new(CExpr::Binary(
                CBinOp::Sub,
                Box::new(CExpr::ident("n")),
                Box::new(CExpr::IntLit(1)),
            )),
        );
        assert_eq!(expr(&e), "(n * (n - 1))");
        let neg = CExpr::Unary(CUnOp::Neg, Box::new(CExpr::ident("v")));
        assert_eq!(expr(&neg), "-v");
    }

    #[test]
    fn member_access_and_calls() {
        let e = CExpr::call(
            CExpr::cast(
                CType::Alias("fnty__1".into()),
                CExpr::arrow(CExpr::ident("c"), "fun"),
            ),
            vec![CExpr::arrow(CExpr::ident("c"), "env"), CExpr::IntLit(3)],
        );
        assert_eq!(expr(&e), "((fnty__1)c->fun)(c->env, 3)");
    }

    #[test]
    fn string_escapes() {
        assert_eq!(expr(&CExpr::StrLit("%d\n".into())), "\"%d\\n\"");
    }

    #[test]
    fn float_literals_keep_precision() {
        assert_eq!(expr(&CExpr::FloatLit(2.0)), "2.0");
        assert_eq!(expr(&CExpr::FloatLit(1e-5)), "1e-5");
    }

    #[test]
    fn unit_layout_orders_sections() {
        let unit = CUnit {
            defs: vec![
                CDef::Struct {
                    name: "closure".into(),
                    fields: vec![
                        ("fun".into(), CType::Void.ptr()),
                        ("env".into(), CType::Void.ptr()),
                    ],
                },
                CDef::Func(CFunc {
                    name: "main".into(),
                    params: vec![],
                    ret: CType::Int,
                    body: vec![CStmt::Return(Some(CExpr::IntLit(0)))],
                }),
            ],
            need_stdio: true,
            need_stdlib: false,
            need_math: false,
        };
        let text = emit(&unit);
        let stdio = text.find("#include <stdio.h>").unwrap();
        let fwd = text.find("typedef struct closure closure;").unwrap();
        let body = text.find("struct closure {").unwrap();
        let main = text.find("int main(void) {").unwrap();
        assert!(stdio < fwd && fwd < body && body < main);
    }
}
