use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned, TokenSpan};
use crate::token::{Keyword, Token, TokenKind, TokenValue};

type PResult<T> = Result<T, Diagnostic>;

/// Recursive-descent parser over the token sequence. The cursor is an
/// index into `tokens`; every production advances it past the tokens
/// it consumed. The first error aborts the parse.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> PResult<Spanned<Program>> {
        let mut var_decls = Vec::new();
        let mut fn_defs = Vec::new();
        while self.pos < self.tokens.len() {
            if self.at_keyword(Keyword::Def) {
                fn_defs.push(self.parse_fn_def()?);
            } else if self.at_keyword(Keyword::Var) {
                var_decls.push(self.parse_var_decl()?);
                self.expect_kind(TokenKind::Semi)?;
            } else {
                let t = &self.tokens[self.pos];
                return Err(Diagnostic::error(
                    format!("expected 'def' or 'var' at top level, found {}", t.describe()),
                    Span::point(t.index),
                )
                .with_help(
                    "a program is a sequence of `var name;` declarations and `def name(...) { ... }` definitions"
                        .to_string(),
                ));
            }
        }
        let span = TokenSpan::new(0, self.pos as u32);
        Ok(Spanned::new(Program { var_decls, fn_defs }, span))
    }

    fn parse_fn_def(&mut self) -> PResult<Spanned<FnDef>> {
        let start = self.mark();
        self.expect_keyword(Keyword::Def)?;
        let name = self.expect_word()?;
        self.expect_kind(TokenKind::LParen)?;
        let mut arg_decls = Vec::new();
        loop {
            if self.at_kind(TokenKind::RParen) {
                break;
            }
            if self.pos >= self.tokens.len() {
                return Err(self.unexpected_eot());
            }
            arg_decls.push(self.parse_var_decl()?);
            if self.at_kind(TokenKind::Comma) {
                self.pos += 1;
            }
        }
        self.expect_kind(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Spanned::new(
            FnDef {
                name,
                arg_decls,
                body,
            },
            self.span_from(start),
        ))
    }

    fn parse_var_decl(&mut self) -> PResult<Spanned<VarDecl>> {
        let start = self.mark();
        self.expect_keyword(Keyword::Var)?;
        let name = self.expect_word()?;
        Ok(Spanned::new(VarDecl { name }, self.span_from(start)))
    }

    fn parse_block(&mut self) -> PResult<Spanned<Block>> {
        let start = self.mark();
        self.expect_kind(TokenKind::LBrace)?;
        let mut var_decls = Vec::new();
        let mut stmts = Vec::new();
        loop {
            if self.at_kind(TokenKind::RBrace) {
                break;
            }
            if self.pos >= self.tokens.len() {
                return Err(self.unexpected_eot());
            }
            if self.at_keyword(Keyword::Var) {
                var_decls.push(self.parse_var_decl()?);
            } else {
                stmts.push(self.parse_stmt()?);
            }
            self.expect_kind(TokenKind::Semi)?;
        }
        self.expect_kind(TokenKind::RBrace)?;
        Ok(Spanned::new(Block { var_decls, stmts }, self.span_from(start)))
    }

    fn parse_stmt(&mut self) -> PResult<Spanned<Stmt>> {
        let start = self.mark();
        let t = self.peek()?.clone();
        let stmt = match (t.kind, t.keyword()) {
            (TokenKind::Keyword, Some(Keyword::While) | Some(Keyword::If)) => {
                Stmt::Compound(self.parse_compound_stmt()?)
            }
            (TokenKind::Keyword, Some(Keyword::Return)) => {
                Stmt::Simple(self.parse_simple_stmt()?)
            }
            (TokenKind::Keyword, _) => {
                return Err(Diagnostic::error(
                    format!(
                        "expected 'while', 'if' or 'return', found {}",
                        t.describe()
                    ),
                    Span::point(t.index),
                ));
            }
            (TokenKind::LBrace, _) => Stmt::Compound(self.parse_compound_stmt()?),
            _ => Stmt::Simple(self.parse_simple_stmt()?),
        };
        Ok(Spanned::new(stmt, self.span_from(start)))
    }

    fn parse_compound_stmt(&mut self) -> PResult<Spanned<CompoundStmt>> {
        let start = self.mark();
        let t = self.peek()?.clone();
        let stmt = match (t.kind, t.keyword()) {
            (TokenKind::Keyword, Some(Keyword::While)) => {
                CompoundStmt::While(self.parse_while_stmt()?)
            }
            (TokenKind::Keyword, Some(Keyword::If)) => CompoundStmt::If(self.parse_if_stmt()?),
            (TokenKind::LBrace, _) => CompoundStmt::Block(self.parse_block()?),
            _ => {
                return Err(Diagnostic::error(
                    format!("expected 'while', 'if' or a block, found {}", t.describe()),
                    Span::point(t.index),
                ));
            }
        };
        Ok(Spanned::new(stmt, self.span_from(start)))
    }

    fn parse_simple_stmt(&mut self) -> PResult<Spanned<SimpleStmt>> {
        let start = self.mark();
        let stmt = if self.at_kind(TokenKind::Keyword) {
            SimpleStmt::Return(self.parse_return_stmt()?)
        } else {
            SimpleStmt::Expr(self.parse_expr()?)
        };
        Ok(Spanned::new(stmt, self.span_from(start)))
    }

    fn parse_return_stmt(&mut self) -> PResult<Spanned<ReturnStmt>> {
        let start = self.mark();
        self.expect_keyword(Keyword::Return)?;
        let child = Box::new(self.parse_expr()?);
        Ok(Spanned::new(ReturnStmt { child }, self.span_from(start)))
    }

    fn parse_while_stmt(&mut self) -> PResult<Spanned<WhileStmt>> {
        let start = self.mark();
        self.expect_keyword(Keyword::While)?;
        self.expect_kind(TokenKind::LParen)?;
        let guard = self.parse_expr()?;
        self.expect_kind(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Spanned::new(WhileStmt { guard, body }, self.span_from(start)))
    }

    fn parse_if_stmt(&mut self) -> PResult<Spanned<IfStmt>> {
        let start = self.mark();
        self.expect_keyword(Keyword::If)?;
        self.expect_kind(TokenKind::LParen)?;
        let guard = self.parse_expr()?;
        self.expect_kind(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Spanned::new(IfStmt { guard, body }, self.span_from(start)))
    }

    fn parse_expr(&mut self) -> PResult<Spanned<Expr>> {
        let start = self.mark();
        let t = self.peek()?.clone();
        let expr = match t.kind {
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect_kind(TokenKind::RParen)?;
                Expr::Paren(Box::new(inner))
            }
            TokenKind::Word => match self.peek_at(1)?.kind {
                TokenKind::LParen => Expr::Call(self.parse_fn_call()?),
                TokenKind::Eq => Expr::Assign(self.parse_assign()?),
                _ => Expr::Var(self.parse_var()?),
            },
            TokenKind::Int => Expr::Lit(self.parse_lit()?),
            _ => {
                return Err(Diagnostic::error(
                    format!("expected expression, found {}", t.describe()),
                    Span::point(t.index),
                )
                .with_help(
                    "expressions are calls, assignments, variables, integer literals or parenthesized expressions"
                        .to_string(),
                ));
            }
        };
        Ok(Spanned::new(expr, self.span_from(start)))
    }

    fn parse_fn_call(&mut self) -> PResult<Spanned<FnCall>> {
        let start = self.mark();
        let t1 = self.peek_at(1)?.clone();
        let call = match t1.kind {
            TokenKind::LParen => FnCall::Default(self.parse_default_fn_call()?),
            TokenKind::Word => {
                let t = self.peek()?.clone();
                return Err(Diagnostic::error(
                    "infix function calls are not implemented".to_string(),
                    Span::point(t.index),
                )
                .with_help("write the call as `name(a, b)` instead".to_string()));
            }
            _ => {
                return Err(Diagnostic::error(
                    format!("expected '(' after function name, found {}", t1.describe()),
                    Span::point(t1.index),
                ));
            }
        };
        Ok(Spanned::new(call, self.span_from(start)))
    }

    fn parse_default_fn_call(&mut self) -> PResult<Spanned<DefaultFnCall>> {
        let start = self.mark();
        let name = self.expect_word()?;
        self.expect_kind(TokenKind::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.at_kind(TokenKind::RParen) {
                break;
            }
            if self.pos >= self.tokens.len() {
                return Err(self.unexpected_eot());
            }
            args.push(self.parse_expr()?);
            if self.at_kind(TokenKind::Comma) {
                self.pos += 1;
            }
        }
        self.expect_kind(TokenKind::RParen)?;
        Ok(Spanned::new(
            DefaultFnCall { name, args },
            self.span_from(start),
        ))
    }

    fn parse_assign(&mut self) -> PResult<Spanned<Assign>> {
        let start = self.mark();
        let name = self.expect_word()?;
        self.expect_kind(TokenKind::Eq)?;
        let expr = Box::new(self.parse_expr()?);
        Ok(Spanned::new(Assign { name, expr }, self.span_from(start)))
    }

    fn parse_var(&mut self) -> PResult<Spanned<Var>> {
        let start = self.mark();
        let name = self.expect_word()?;
        Ok(Spanned::new(Var { name }, self.span_from(start)))
    }

    fn parse_lit(&mut self) -> PResult<Spanned<Lit>> {
        let start = self.mark();
        let int_lit = self.parse_int_lit()?;
        Ok(Spanned::new(Lit::Int(int_lit), self.span_from(start)))
    }

    fn parse_int_lit(&mut self) -> PResult<Spanned<IntLit>> {
        let start = self.mark();
        let t = self.expect_kind(TokenKind::Int)?;
        let value = match t.value {
            Some(TokenValue::Int(v)) => v,
            _ => 0,
        };
        Ok(Spanned::new(IntLit { value }, self.span_from(start)))
    }

    // ─── Cursor helpers ────────────────────────────────────────────

    fn mark(&self) -> u32 {
        self.pos as u32
    }

    fn span_from(&self, start: u32) -> TokenSpan {
        TokenSpan::new(start, self.pos as u32)
    }

    fn peek(&self) -> PResult<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, d: usize) -> PResult<&Token> {
        self.tokens
            .get(self.pos + d)
            .ok_or_else(|| self.unexpected_eot())
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.tokens.get(self.pos).is_some_and(|t| t.kind == kind)
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        self.tokens
            .get(self.pos)
            .is_some_and(|t| t.keyword() == Some(kw))
    }

    fn expect_kind(&mut self, kind: TokenKind) -> PResult<Token> {
        let Some(t) = self.tokens.get(self.pos) else {
            return Err(self.unexpected_eot());
        };
        if t.kind != kind {
            return Err(Diagnostic::error(
                format!("expected {}, found {}", kind, t.describe()),
                Span::point(t.index),
            ));
        }
        self.pos += 1;
        Ok(self.tokens[self.pos - 1].clone())
    }

    fn expect_keyword(&mut self, kw: Keyword) -> PResult<Token> {
        let t = self.expect_kind(TokenKind::Keyword)?;
        if t.keyword() != Some(kw) {
            return Err(Diagnostic::error(
                format!("expected '{}', found {}", kw, t.describe()),
                Span::point(t.index),
            ));
        }
        Ok(t)
    }

    fn expect_word(&mut self) -> PResult<String> {
        let t = self.expect_kind(TokenKind::Word)?;
        match t.value {
            Some(TokenValue::Word(s)) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    fn unexpected_eot(&self) -> Diagnostic {
        let at = self.tokens.last().map(|t| t.index + 1).unwrap_or(0);
        Diagnostic::error("unexpected end of tokens".to_string(), Span::point(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Spanned<Program> {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty(), "lex errors: {:?}", diags);
        match Parser::new(tokens).parse_program() {
            Ok(p) => p,
            Err(d) => panic!("parse error: {}", d.message),
        }
    }

    fn parse_err(source: &str) -> Diagnostic {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty(), "lex errors: {:?}", diags);
        match Parser::new(tokens).parse_program() {
            Ok(_) => panic!("expected a parse error"),
            Err(d) => d,
        }
    }

    #[test]
    fn test_empty_program() {
        let p = parse("");
        assert!(p.node.var_decls.is_empty());
        assert!(p.node.fn_defs.is_empty());
    }

    #[test]
    fn test_empty_fn() {
        let p = parse("def main() { }");
        assert_eq!(p.node.fn_defs.len(), 1);
        let f = &p.node.fn_defs[0].node;
        assert_eq!(f.name, "main");
        assert!(f.arg_decls.is_empty());
        assert!(f.body.node.stmts.is_empty());
    }

    #[test]
    fn test_program_var_decls() {
        let p = parse("var a; var b; def main() { }");
        let names: Vec<&str> = p
            .node
            .var_decls
            .iter()
            .map(|v| v.node.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_fn_args() {
        let p = parse("def add_three(var a, var b, var c) { }");
        let f = &p.node.fn_defs[0].node;
        let names: Vec<&str> = f.arg_decls.iter().map(|a| a.node.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_block_decls_and_stmts_interleave() {
        let p = parse("def main() { var a; a = 1; var b; b = 2; }");
        let body = &p.node.fn_defs[0].node.body.node;
        assert_eq!(body.var_decls.len(), 2);
        assert_eq!(body.stmts.len(), 2);
    }

    #[test]
    fn test_call_with_args() {
        let p = parse("def main() { print_char(65); }");
        let body = &p.node.fn_defs[0].node.body.node;
        let Stmt::Simple(s) = &body.stmts[0].node else {
            panic!("expected simple stmt");
        };
        let SimpleStmt::Expr(e) = &s.node else {
            panic!("expected expr stmt");
        };
        let Expr::Call(c) = &e.node else {
            panic!("expected call");
        };
        let FnCall::Default(d) = &c.node else {
            panic!("expected default call");
        };
        assert_eq!(d.node.name, "print_char");
        assert_eq!(d.node.args.len(), 1);
    }

    #[test]
    fn test_assign_is_expr() {
        let p = parse("def main() { var n; n = 10; }");
        let body = &p.node.fn_defs[0].node.body.node;
        let Stmt::Simple(s) = &body.stmts[0].node else {
            panic!("expected simple stmt");
        };
        let SimpleStmt::Expr(e) = &s.node else {
            panic!("expected expr stmt");
        };
        let Expr::Assign(a) = &e.node else {
            panic!("expected assign");
        };
        assert_eq!(a.node.name, "n");
        assert!(matches!(a.node.expr.node, Expr::Lit(_)));
    }

    #[test]
    fn test_while_and_return() {
        let p = parse("def main() { var n; n = 10; while (n) { n = sub(n, 1); }; return n; }");
        let body = &p.node.fn_defs[0].node.body.node;
        assert_eq!(body.stmts.len(), 3);
        let Stmt::Compound(c) = &body.stmts[1].node else {
            panic!("expected compound stmt");
        };
        let CompoundStmt::While(w) = &c.node else {
            panic!("expected while");
        };
        assert!(matches!(w.node.guard.node, Expr::Var(_)));
        assert_eq!(w.node.body.node.stmts.len(), 1);
        let Stmt::Simple(s) = &body.stmts[2].node else {
            panic!("expected simple stmt");
        };
        assert!(matches!(s.node, SimpleStmt::Return(_)));
    }

    #[test]
    fn test_if_stmt() {
        let p = parse("def main() { if (1) { print_char(65); }; }");
        let body = &p.node.fn_defs[0].node.body.node;
        let Stmt::Compound(c) = &body.stmts[0].node else {
            panic!("expected compound stmt");
        };
        assert!(matches!(c.node, CompoundStmt::If(_)));
    }

    #[test]
    fn test_nested_block_stmt() {
        let p = parse("def main() { { var a; a = 1; }; }");
        let body = &p.node.fn_defs[0].node.body.node;
        let Stmt::Compound(c) = &body.stmts[0].node else {
            panic!("expected compound stmt");
        };
        let CompoundStmt::Block(b) = &c.node else {
            panic!("expected block");
        };
        assert_eq!(b.node.var_decls.len(), 1);
    }

    #[test]
    fn test_paren_preserved() {
        let p = parse("def main() { return (1); }");
        let body = &p.node.fn_defs[0].node.body.node;
        let Stmt::Simple(s) = &body.stmts[0].node else {
            panic!("expected simple stmt");
        };
        let SimpleStmt::Return(r) = &s.node else {
            panic!("expected return");
        };
        let Expr::Paren(inner) = &r.node.child.node else {
            panic!("expected paren wrapper, got {:?}", r.node.child.node);
        };
        assert!(matches!(inner.node, Expr::Lit(_)));
    }

    #[test]
    fn test_span_monotonicity() {
        let p = parse("def main() { var n; n = add(1, 2); while (n) { n = sub(n, 1); }; }");
        // Spot-check the containment invariant down one spine.
        let f = &p.node.fn_defs[0];
        assert!(p.span.start <= f.span.start && f.span.end <= p.span.end);
        let body = &f.node.body;
        assert!(f.span.start <= body.span.start && body.span.end <= f.span.end);
        for stmt in &body.node.stmts {
            assert!(body.span.start <= stmt.span.start && stmt.span.end <= body.span.end);
        }
    }

    #[test]
    fn test_totality_consumes_all_tokens() {
        let source = "var g; def main() { var n; n = (add(1, 2)); }";
        let (tokens, _) = Lexer::new(source).tokenize();
        let count = tokens.len();
        let p = Parser::new(tokens).parse_program().expect("should parse");
        assert_eq!(p.span.end as usize, count);
    }

    // --- Error path tests ---

    #[test]
    fn test_error_top_level() {
        let d = parse_err("42");
        assert!(d.message.contains("expected 'def' or 'var'"));
        assert!(d.help.is_some());
    }

    #[test]
    fn test_error_missing_semi() {
        let d = parse_err("def main() { var n }");
        assert!(
            d.message.contains("expected Semi"),
            "got: {}",
            d.message
        );
    }

    #[test]
    fn test_error_unexpected_eot() {
        let d = parse_err("def main() {");
        assert_eq!(d.message, "unexpected end of tokens");
    }

    #[test]
    fn test_error_unexpected_token_in_expr() {
        let d = parse_err("def main() { return ; }");
        assert!(
            d.message.contains("expected expression"),
            "got: {}",
            d.message
        );
        assert!(d.help.is_some());
    }

    #[test]
    fn test_error_stray_keyword_in_stmt() {
        let d = parse_err("def main() { var n; def; }");
        assert!(
            d.message.contains("expected 'while', 'if' or 'return'"),
            "got: {}",
            d.message
        );
    }

    #[test]
    fn test_error_shows_expected_and_found() {
        let d = parse_err("def main { }");
        assert!(
            d.message.contains("expected") && d.message.contains("found"),
            "got: {}",
            d.message
        );
    }
}
