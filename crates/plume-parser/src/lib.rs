use plume_ast::*;
use plume_lexer::{lex, Span, Token};
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.start, self.span.end, self.message)
    }
}

pub fn parse(source: &str) -> (Module, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(source);
    let mut parser = Parser::new(tokens);
    let mut errors: Vec<ParseError> = lex_errors
        .into_iter()
        .map(|span| ParseError {
            message: "unexpected character".into(),
            span,
        })
        .collect();
    parser.parse_module();
    errors.append(&mut parser.errors);
    (parser.module, errors)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    module: Module,
    errors: Vec<ParseError>,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self {
            tokens,
            pos: 0,
            module: Module::new(),
            errors: Vec::new(),
        }
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|(_, s)| Span::new(s.end, s.end))
                    .unwrap_or(Span::new(0, 0))
            })
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|(_, s)| *s)
            .unwrap_or(Span::new(0, 0))
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Option<Span> {
        if self.check(expected) {
            let (_, span) = self.advance();
            Some(span)
        } else {
            let span = self.peek_span();
            self.error(format!("expected {}, found {}", what, self.describe_peek()), span);
            None
        }
    }

    fn expect_ident(&mut self) -> Option<(SmolStr, Span)> {
        if let Some(Token::Ident(_)) = self.peek() {
            let (tok, span) = self.advance();
            if let Token::Ident(s) = tok {
                return Some((s, span));
            }
        }
        let span = self.peek_span();
        self.error(
            format!("expected identifier, found {}", self.describe_peek()),
            span,
        );
        None
    }

    fn describe_peek(&self) -> String {
        match self.peek() {
            Some(t) => format!("{:?}", t),
            None => "end of input".to_string(),
        }
    }

    fn error(&mut self, message: String, span: Span) {
        self.errors.push(ParseError { message, span });
    }

    /// Skip to the next `;` at bracket depth 0, or to a closing brace,
    /// without consuming the brace. Used to resynchronize after an error.
    fn recover_to_item_boundary(&mut self) {
        let mut depth = 0usize;
        while !self.at_end() {
            match self.peek() {
                Some(Token::LParen | Token::LBracket | Token::LBrace) => {
                    depth += 1;
                    self.advance();
                }
                Some(Token::RParen | Token::RBracket) => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                }
                Some(Token::RBrace) => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                }
                Some(Token::Semi) if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ── Allocators ────────────────────────────────────────────────

    fn alloc_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.module.exprs.alloc(Expr { kind, span })
    }

    fn alloc_type(&mut self, kind: TypeExprKind, span: Span) -> TypeExprId {
        self.module.type_exprs.alloc(TypeExpr { kind, span })
    }

    fn expr_span(&self, id: ExprId) -> Span {
        self.module.exprs[id].span
    }

    fn binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId, op_span: Span) -> ExprId {
        let span = self.expr_span(lhs).merge(self.expr_span(rhs));
        self.alloc_expr(ExprKind::Binary { op, lhs, rhs, op_span }, span)
    }

    // ── Module and items ──────────────────────────────────────────

    fn parse_module(&mut self) {
        while !self.at_end() {
            if self.eat(&Token::Semi) {
                continue;
            }
            match self.parse_item(true) {
                Some(item) => self.module.items.push(item),
                None => self.recover_to_item_boundary(),
            }
        }
    }

    /// One `val`/`var`/`class`/expression item. `top_level` gates classes.
    fn parse_item(&mut self, top_level: bool) -> Option<Item> {
        match self.peek() {
            Some(Token::Val) => self.parse_binding(false).map(Item::Binding),
            Some(Token::Var) => self.parse_binding(true).map(Item::Binding),
            Some(Token::Class) => {
                if !top_level {
                    let span = self.peek_span();
                    self.error("classes may only be declared at top level".into(), span);
                    return None;
                }
                self.parse_class().map(Item::Class)
            }
            _ => self.parse_expr().map(Item::Expr),
        }
    }

    fn parse_binding(&mut self, mutable: bool) -> Option<Binding> {
        let (_, kw_span) = self.advance();
        let (name, name_span) = self.expect_ident()?;
        let type_ann = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Token::Eq, "`=`")?;
        let value = self.parse_expr()?;
        let span = kw_span.merge(self.expr_span(value));
        Some(Binding {
            name,
            name_span,
            mutable,
            type_ann,
            value,
            span,
        })
    }

    fn parse_class(&mut self) -> Option<ClassDecl> {
        let (_, kw_span) = self.advance();
        let (name, name_span) = self.expect_ident()?;

        let mut ctor_params = Vec::new();
        if self.eat(&Token::LParen) {
            while !self.check(&Token::RParen) && !self.at_end() {
                ctor_params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "`)`")?;
        }

        self.expect(&Token::LBrace, "`{`")?;
        let mut members = Vec::new();
        while !self.check(&Token::RBrace) && !self.at_end() {
            if self.eat(&Token::Semi) {
                continue;
            }
            let mutable = match self.peek() {
                Some(Token::Val) => false,
                Some(Token::Var) => true,
                _ => {
                    let span = self.peek_span();
                    self.error("expected `val` or `var` member".into(), span);
                    self.recover_to_item_boundary();
                    continue;
                }
            };
            match self.parse_binding(mutable) {
                Some(b) => members.push(b),
                None => self.recover_to_item_boundary(),
            }
        }
        let end = self.expect(&Token::RBrace, "`}`")?;
        Some(ClassDecl {
            name,
            name_span,
            ctor_params,
            members,
            span: kw_span.merge(end),
        })
    }

    fn parse_param(&mut self) -> Option<Param> {
        let (name, name_span) = self.expect_ident()?;
        self.expect(&Token::Colon, "`:`")?;
        let type_ann = self.parse_type()?;
        let span = name_span.merge(self.module.type_exprs[type_ann].span);
        Some(Param {
            name,
            name_span,
            type_ann,
            span,
        })
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Option<ExprId> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::LParen) if self.lambda_ahead() => self.parse_lambda(),
            _ => self.parse_assign(),
        }
    }

    /// At a `(`, decide whether this starts a lambda by scanning to the
    /// matching `)` and looking for `=>` (or a `: Ret =>` ascription).
    fn lambda_ahead(&self) -> bool {
        debug_assert!(self.check(&Token::LParen));
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some(tok) = self.tokens.get(i).map(|(t, _)| t) {
            match tok {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|(t, _)| t),
                            Some(Token::FatArrow) | Some(Token::Colon)
                        );
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_lambda(&mut self) -> Option<ExprId> {
        let (_, open) = self.advance();
        let mut params = Vec::new();
        while !self.check(&Token::RParen) && !self.at_end() {
            params.push(self.parse_param()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "`)`")?;
        let ret_ann = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Token::FatArrow, "`=>`")?;
        let body = self.parse_expr()?;
        let span = open.merge(self.expr_span(body));
        Some(self.alloc_expr(
            ExprKind::Lambda {
                params,
                ret_ann,
                body,
            },
            span,
        ))
    }

    fn parse_if(&mut self) -> Option<ExprId> {
        let (_, kw_span) = self.advance();
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "`then`")?;
        let then_branch = self.parse_expr()?;
        self.expect(&Token::Else, "`else`")?;
        let else_branch = self.parse_expr()?;
        let span = kw_span.merge(self.expr_span(else_branch));
        Some(self.alloc_expr(
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    fn parse_while(&mut self) -> Option<ExprId> {
        let (_, kw_span) = self.advance();
        let cond = self.parse_expr()?;
        self.expect(&Token::Do, "`do`")?;
        let body = self.parse_expr()?;
        let span = kw_span.merge(self.expr_span(body));
        Some(self.alloc_expr(ExprKind::While { cond, body }, span))
    }

    fn parse_assign(&mut self) -> Option<ExprId> {
        let target = self.parse_or()?;
        if self.check(&Token::Eq) {
            let (_, eq_span) = self.advance();
            let value = self.parse_expr()?;
            let span = self.expr_span(target).merge(self.expr_span(value));
            return Some(self.alloc_expr(
                ExprKind::Assign {
                    target,
                    value,
                    eq_span,
                },
                span,
            ));
        }
        Some(target)
    }

    fn parse_or(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_and()?;
        while self.check(&Token::PipePipe) {
            let (_, op_span) = self.advance();
            let rhs = self.parse_and()?;
            lhs = self.binary(BinOp::Or, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_equality()?;
        while self.check(&Token::AmpAmp) {
            let (_, op_span) = self.advance();
            let rhs = self.parse_equality()?;
            lhs = self.binary(BinOp::And, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    fn parse_equality(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::BangEq) => BinOp::Ne,
                _ => break,
            };
            let (_, op_span) = self.advance();
            let rhs = self.parse_comparison()?;
            lhs = self.binary(op, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    fn parse_comparison(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            let (_, op_span) = self.advance();
            let rhs = self.parse_additive()?;
            lhs = self.binary(op, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let (_, op_span) = self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_pow()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            let (_, op_span) = self.advance();
            let rhs = self.parse_pow()?;
            lhs = self.binary(op, lhs, rhs, op_span);
        }
        Some(lhs)
    }

    /// `^` is right-associative.
    fn parse_pow(&mut self) -> Option<ExprId> {
        let lhs = self.parse_unary()?;
        if self.check(&Token::Caret) {
            let (_, op_span) = self.advance();
            let rhs = self.parse_pow()?;
            return Some(self.binary(BinOp::Pow, lhs, rhs, op_span));
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<ExprId> {
        let op = match self.peek() {
            Some(Token::Bang) => Some(UnOp::Not),
            Some(Token::Minus) => Some(UnOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            let (_, op_span) = self.advance();
            let operand = self.parse_unary()?;
            let span = op_span.merge(self.expr_span(operand));
            return Some(self.alloc_expr(
                ExprKind::Unary {
                    op,
                    operand,
                    op_span,
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&Token::LParen) {
                self.advance();
                let mut args = Vec::new();
                while !self.check(&Token::RParen) && !self.at_end() {
                    args.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                let close = self.expect(&Token::RParen, "`)`")?;
                let span = self.expr_span(expr).merge(close);
                expr = self.alloc_expr(ExprKind::Call { callee: expr, args }, span);
            } else if self.check(&Token::Dot) {
                self.advance();
                let (field, field_span) = self.expect_ident()?;
                let span = self.expr_span(expr).merge(field_span);
                expr = self.alloc_expr(
                    ExprKind::Select {
                        recv: expr,
                        field,
                        field_span,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<ExprId> {
        let span = self.peek_span();
        match self.peek() {
            Some(Token::Int(_)) => {
                let (tok, span) = self.advance();
                if let Token::Int(n) = tok {
                    Some(self.alloc_expr(ExprKind::IntLit(n), span))
                } else {
                    None
                }
            }
            Some(Token::Float(_)) => {
                let (tok, span) = self.advance();
                if let Token::Float(x) = tok {
                    Some(self.alloc_expr(ExprKind::FloatLit(x), span))
                } else {
                    None
                }
            }
            Some(Token::Str(_)) => {
                let (tok, span) = self.advance();
                if let Token::Str(s) = tok {
                    Some(self.alloc_expr(ExprKind::StrLit(s), span))
                } else {
                    None
                }
            }
            Some(Token::True) => {
                self.advance();
                Some(self.alloc_expr(ExprKind::BoolLit(true), span))
            }
            Some(Token::False) => {
                self.advance();
                Some(self.alloc_expr(ExprKind::BoolLit(false), span))
            }
            Some(Token::Ident(_)) => {
                let (tok, span) = self.advance();
                if let Token::Ident(name) = tok {
                    Some(self.alloc_expr(ExprKind::Ident(name), span))
                } else {
                    None
                }
            }
            Some(Token::New) => {
                let (_, kw_span) = self.advance();
                let (class, class_span) = self.expect_ident()?;
                self.expect(&Token::LParen, "`(`")?;
                let mut args = Vec::new();
                while !self.check(&Token::RParen) && !self.at_end() {
                    args.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                let close = self.expect(&Token::RParen, "`)`")?;
                Some(self.alloc_expr(
                    ExprKind::New {
                        class,
                        class_span,
                        args,
                    },
                    kw_span.merge(close),
                ))
            }
            Some(Token::LParen) => {
                let (_, open) = self.advance();
                if self.check(&Token::RParen) {
                    let (_, close) = self.advance();
                    return Some(self.alloc_expr(ExprKind::UnitLit, open.merge(close)));
                }
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Some(inner)
            }
            Some(Token::LBracket) => {
                let (_, open) = self.advance();
                let len = self.parse_expr()?;
                let close = self.expect(&Token::RBracket, "`]`")?;
                Some(self.alloc_expr(ExprKind::ArrayLit(len), open.merge(close)))
            }
            Some(Token::LBrace) => self.parse_block(),
            _ => {
                self.error(
                    format!("expected expression, found {}", self.describe_peek()),
                    span,
                );
                None
            }
        }
    }

    fn parse_block(&mut self) -> Option<ExprId> {
        let (_, open) = self.advance();
        let mut items: Vec<BlockItem> = Vec::new();
        while !self.check(&Token::RBrace) && !self.at_end() {
            if self.eat(&Token::Semi) {
                continue;
            }
            let item = match self.parse_item(false) {
                Some(Item::Binding(b)) => BlockItem::Binding(b),
                Some(Item::Expr(e)) => BlockItem::Expr(e),
                Some(Item::Class(_)) | None => {
                    self.recover_to_item_boundary();
                    continue;
                }
            };
            items.push(item);
            if !self.check(&Token::RBrace) && !self.eat(&Token::Semi) {
                let span = self.peek_span();
                self.error(
                    format!("expected `;` or `}}`, found {}", self.describe_peek()),
                    span,
                );
                self.recover_to_item_boundary();
            }
        }
        let close = self.expect(&Token::RBrace, "`}`").unwrap_or(self.prev_span());
        let tail = match items.last() {
            Some(BlockItem::Expr(_)) => {
                if let Some(BlockItem::Expr(e)) = items.pop() {
                    Some(e)
                } else {
                    None
                }
            }
            _ => None,
        };
        Some(self.alloc_expr(ExprKind::Block { items, tail }, open.merge(close)))
    }

    // ── Types ─────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Option<TypeExprId> {
        let span = self.peek_span();
        if self.check(&Token::LParen) {
            self.advance();
            let mut params = Vec::new();
            while !self.check(&Token::RParen) && !self.at_end() {
                params.push(self.parse_type()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            let close = self.expect(&Token::RParen, "`)`")?;
            if self.check(&Token::FatArrow) {
                self.advance();
                let ret = self.parse_type()?;
                let full = span.merge(self.module.type_exprs[ret].span);
                return Some(self.alloc_type(TypeExprKind::Fn { params, ret }, full));
            }
            if params.len() == 1 {
                return Some(params[0]);
            }
            self.error("expected `=>` after parenthesized type list".into(), close);
            return None;
        }

        let (name, name_span) = self.expect_ident()?;
        let base = if name == "Array" {
            self.expect(&Token::LBracket, "`[`")?;
            let elem = self.parse_type()?;
            let close = self.expect(&Token::RBracket, "`]`")?;
            self.alloc_type(TypeExprKind::Array(elem), name_span.merge(close))
        } else {
            self.alloc_type(TypeExprKind::Named(name), name_span)
        };

        if self.check(&Token::FatArrow) {
            self.advance();
            let ret = self.parse_type()?;
            let full = name_span.merge(self.module.type_exprs[ret].span);
            return Some(self.alloc_type(
                TypeExprKind::Fn {
                    params: vec![base],
                    ret,
                },
                full,
            ));
        }
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let (module, errors) = parse(source);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        module
    }

    fn item_binding(module: &Module, i: usize) -> &Binding {
        match &module.items[i] {
            Item::Binding(b) => b,
            other => panic!("expected binding, got {:?}", other),
        }
    }

    #[test]
    fn simple_binding() {
        let m = parse_ok("val x = 1");
        assert_eq!(m.items.len(), 1);
        let b = item_binding(&m, 0);
        assert_eq!(b.name, "x");
        assert!(!b.mutable);
        assert!(matches!(m.exprs[b.value].kind, ExprKind::IntLit(1)));
    }

    #[test]
    fn annotated_var() {
        let m = parse_ok("var count: Int = 0");
        let b = item_binding(&m, 0);
        assert!(b.mutable);
        assert!(b.type_ann.is_some());
    }

    #[test]
    fn lambda_with_params() {
        let m = parse_ok("val add = (x: Int, y: Int) => x + y");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Lambda { params, ret_ann, .. } => {
                assert_eq!(params.len(), 2);
                assert!(ret_ann.is_none());
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn zero_arg_lambda_vs_unit() {
        let m = parse_ok("val f = () => ()");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Lambda { params, body, .. } => {
                assert!(params.is_empty());
                assert!(matches!(m.exprs[*body].kind, ExprKind::UnitLit));
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn lambda_with_return_ascription() {
        let m = parse_ok("val f = (n: Int): Int => n");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Lambda { ret_ann, .. } => assert!(ret_ann.is_some()),
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn if_then_else_binds_looser_than_operators() {
        let m = parse_ok("val r = if n <= 1 then 1 else n * f(n - 1)");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::If { cond, else_branch, .. } => {
                assert!(matches!(
                    m.exprs[*cond].kind,
                    ExprKind::Binary { op: BinOp::Le, .. }
                ));
                assert!(matches!(
                    m.exprs[*else_branch].kind,
                    ExprKind::Binary { op: BinOp::Mul, .. }
                ));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let m = parse_ok("val r = 1 + 2 * 3");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Binary { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(
                    m.exprs[*rhs].kind,
                    ExprKind::Binary { op: BinOp::Mul, .. }
                ));
            }
            other => panic!("expected +, got {:?}", other),
        }
    }

    #[test]
    fn pow_is_right_associative() {
        let m = parse_ok("val r = a ^ b ^ c");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Binary { op: BinOp::Pow, rhs, .. } => {
                assert!(matches!(
                    m.exprs[*rhs].kind,
                    ExprKind::Binary { op: BinOp::Pow, .. }
                ));
            }
            other => panic!("expected ^, got {:?}", other),
        }
    }

    #[test]
    fn assignment_expression() {
        let m = parse_ok("x = x + 1");
        match &m.items[0] {
            Item::Expr(e) => assert!(matches!(m.exprs[*e].kind, ExprKind::Assign { .. })),
            other => panic!("expected expr item, got {:?}", other),
        }
    }

    #[test]
    fn block_with_tail() {
        let m = parse_ok("val r = { val x = 1; val y = 2; x + y }");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Block { items, tail } => {
                assert_eq!(items.len(), 2);
                assert!(tail.is_some());
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn block_without_tail() {
        let m = parse_ok("val r = { val x = 1 }");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Block { items, tail } => {
                assert_eq!(items.len(), 1);
                assert!(tail.is_none());
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn class_with_members() {
        let m = parse_ok(
            "class Main { val fact: Int => Int = (n: Int) => if n <= 1 then 1 else n * fact(n - 1); val main = () => printlnInt(fact(readInt())) }",
        );
        match &m.items[0] {
            Item::Class(c) => {
                assert_eq!(c.name, "Main");
                assert!(c.ctor_params.is_empty());
                assert_eq!(c.members.len(), 2);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn class_with_ctor_params() {
        let m = parse_ok("class Point(x: Int, y: Int) { val sum = x + y }");
        match &m.items[0] {
            Item::Class(c) => {
                assert_eq!(c.ctor_params.len(), 2);
                assert_eq!(c.members.len(), 1);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn new_select_and_call_chain() {
        let m = parse_ok("val r = new Counter(0).incr(1)");
        let b = item_binding(&m, 0);
        match &m.exprs[b.value].kind {
            ExprKind::Call { callee, .. } => {
                assert!(matches!(m.exprs[*callee].kind, ExprKind::Select { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn array_literal_and_index() {
        let m = parse_ok("val a = [10]; val x = a(0)");
        let a = item_binding(&m, 0);
        assert!(matches!(m.exprs[a.value].kind, ExprKind::ArrayLit(_)));
        let x = item_binding(&m, 1);
        assert!(matches!(m.exprs[x.value].kind, ExprKind::Call { .. }));
    }

    #[test]
    fn while_do() {
        let m = parse_ok("while x < 10 do x = x + 1");
        match &m.items[0] {
            Item::Expr(e) => assert!(matches!(m.exprs[*e].kind, ExprKind::While { .. })),
            other => panic!("expected expr item, got {:?}", other),
        }
    }

    #[test]
    fn function_type_annotations() {
        let m = parse_ok("val f: (Int, Int) => Int = (x: Int, y: Int) => x + y; val g: () => Unit = () => ()");
        assert!(item_binding(&m, 0).type_ann.is_some());
        assert!(item_binding(&m, 1).type_ann.is_some());
    }

    #[test]
    fn nested_function_type_is_right_associative() {
        let m = parse_ok("val f: Int => Int => Int = (x: Int) => (y: Int) => x + y");
        let b = item_binding(&m, 0);
        let ann = b.type_ann.unwrap();
        match &m.type_exprs[ann].kind {
            TypeExprKind::Fn { params, ret } => {
                assert_eq!(params.len(), 1);
                assert!(matches!(
                    m.type_exprs[*ret].kind,
                    TypeExprKind::Fn { .. }
                ));
            }
            other => panic!("expected fn type, got {:?}", other),
        }
    }

    #[test]
    fn classes_rejected_inside_blocks() {
        let (_, errors) = parse("val x = { class C { } ; 1 }");
        assert!(!errors.is_empty());
        assert!(errors[0].message.contains("top level"));
    }

    #[test]
    fn error_recovery_reports_multiple() {
        let (_, errors) = parse("val = 1; val ok = 2; val = 3");
        assert!(errors.len() >= 2);
    }

    #[test]
    fn missing_close_paren_reported() {
        let (_, errors) = parse("val x = f(1");
        assert!(!errors.is_empty());
    }
}
