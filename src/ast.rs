use crate::span::Spanned;

/// Root of a parsed source file: program-level variable declarations
/// and function definitions, in source order.
#[derive(Clone, Debug)]
pub struct Program {
    pub var_decls: Vec<Spanned<VarDecl>>,
    pub fn_defs: Vec<Spanned<FnDef>>,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct FnDef {
    pub name: String,
    pub arg_decls: Vec<Spanned<VarDecl>>,
    pub body: Spanned<Block>,
}

/// A braced sequence of declarations and statements. Declarations and
/// statements interleave freely; both are semicolon-terminated.
#[derive(Clone, Debug)]
pub struct Block {
    pub var_decls: Vec<Spanned<VarDecl>>,
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Compound(Spanned<CompoundStmt>),
    Simple(Spanned<SimpleStmt>),
}

#[derive(Clone, Debug)]
pub enum CompoundStmt {
    While(Spanned<WhileStmt>),
    If(Spanned<IfStmt>),
    Block(Spanned<Block>),
}

#[derive(Clone, Debug)]
pub enum SimpleStmt {
    Return(Spanned<ReturnStmt>),
    Expr(Spanned<Expr>),
}

#[derive(Clone, Debug)]
pub struct WhileStmt {
    pub guard: Spanned<Expr>,
    pub body: Spanned<Block>,
}

#[derive(Clone, Debug)]
pub struct IfStmt {
    pub guard: Spanned<Expr>,
    pub body: Spanned<Block>,
}

#[derive(Clone, Debug)]
pub struct ReturnStmt {
    pub child: Box<Spanned<Expr>>,
}

/// Expressions. `Paren` keeps explicit parenthesization visible to
/// later passes instead of collapsing it.
#[derive(Clone, Debug)]
pub enum Expr {
    Call(Spanned<FnCall>),
    Var(Spanned<Var>),
    Lit(Spanned<Lit>),
    Paren(Box<Spanned<Expr>>),
    Assign(Spanned<Assign>),
}

#[derive(Clone, Debug)]
pub enum FnCall {
    Default(Spanned<DefaultFnCall>),
    /// Recognized grammatically; has no lowering.
    Infix(Spanned<InfixFnCall>),
}

#[derive(Clone, Debug)]
pub struct DefaultFnCall {
    pub name: String,
    pub args: Vec<Spanned<Expr>>,
}

#[derive(Clone, Debug)]
pub struct InfixFnCall {
    pub name: String,
    pub arg_1: Box<Spanned<Expr>>,
    pub arg_2: Box<Spanned<Expr>>,
}

/// `name = expr`. Usable as an expression; its value is the RHS.
#[derive(Clone, Debug)]
pub struct Assign {
    pub name: String,
    pub expr: Box<Spanned<Expr>>,
}

#[derive(Clone, Debug)]
pub struct Var {
    pub name: String,
}

#[derive(Clone, Debug)]
pub enum Lit {
    Int(Spanned<IntLit>),
    /// No surface syntax produces this; codegen interns it into the
    /// initial memory image.
    Str(Spanned<StrLit>),
}

#[derive(Clone, Debug)]
pub struct IntLit {
    pub value: i32,
}

#[derive(Clone, Debug)]
pub struct StrLit {
    pub value: String,
}

// ─── Pretty printer ────────────────────────────────────────────────

/// Pretty-print a program, one node per line:
/// `SSS EEE  <indent>Label [fields]` where SSS/EEE are the node's
/// token span and indentation is two spaces per nesting level.
pub fn fmt_program(program: &Spanned<Program>) -> String {
    let mut p = Printer::default();
    p.program(program);
    p.out
}

#[derive(Default)]
struct Printer {
    out: String,
}

impl Printer {
    fn line<T>(&mut self, node: &Spanned<T>, lvl: usize, label: &str) {
        self.out.push_str(&format!(
            "{:03} {:03}  {}{}\n",
            node.span.start,
            node.span.end,
            "  ".repeat(lvl),
            label
        ));
    }

    fn program(&mut self, n: &Spanned<Program>) {
        self.line(n, 0, "Program");
        for v in &n.node.var_decls {
            self.var_decl(v, 1);
        }
        for f in &n.node.fn_defs {
            self.fn_def(f, 1);
        }
    }

    fn var_decl(&mut self, n: &Spanned<VarDecl>, lvl: usize) {
        self.line(n, lvl, &format!("VarDecl {}", n.node.name));
    }

    fn fn_def(&mut self, n: &Spanned<FnDef>, lvl: usize) {
        let args: Vec<&str> = n.node.arg_decls.iter().map(|a| a.node.name.as_str()).collect();
        self.line(n, lvl, &format!("FnDef {}({})", n.node.name, args.join(", ")));
        self.block(&n.node.body, lvl + 1);
    }

    fn block(&mut self, n: &Spanned<Block>, lvl: usize) {
        self.line(n, lvl, "Block");
        for v in &n.node.var_decls {
            self.var_decl(v, lvl + 1);
        }
        for s in &n.node.stmts {
            self.stmt(s, lvl + 1);
        }
    }

    fn stmt(&mut self, n: &Spanned<Stmt>, lvl: usize) {
        self.line(n, lvl, "Stmt");
        match &n.node {
            Stmt::Compound(c) => self.compound_stmt(c, lvl + 1),
            Stmt::Simple(s) => self.simple_stmt(s, lvl + 1),
        }
    }

    fn compound_stmt(&mut self, n: &Spanned<CompoundStmt>, lvl: usize) {
        self.line(n, lvl, "CompoundStmt");
        match &n.node {
            CompoundStmt::While(w) => {
                self.line(w, lvl + 1, "WhileStmt");
                self.expr(&w.node.guard, lvl + 2);
                self.block(&w.node.body, lvl + 2);
            }
            CompoundStmt::If(i) => {
                self.line(i, lvl + 1, "IfStmt");
                self.expr(&i.node.guard, lvl + 2);
                self.block(&i.node.body, lvl + 2);
            }
            CompoundStmt::Block(b) => self.block(b, lvl + 1),
        }
    }

    fn simple_stmt(&mut self, n: &Spanned<SimpleStmt>, lvl: usize) {
        self.line(n, lvl, "SimpleStmt");
        match &n.node {
            SimpleStmt::Return(r) => {
                self.line(r, lvl + 1, "ReturnStmt");
                self.expr(&r.node.child, lvl + 2);
            }
            SimpleStmt::Expr(e) => self.expr(e, lvl + 1),
        }
    }

    fn expr(&mut self, n: &Spanned<Expr>, lvl: usize) {
        self.line(n, lvl, "Expr");
        match &n.node {
            Expr::Call(c) => self.fn_call(c, lvl + 1),
            Expr::Var(v) => self.line(v, lvl + 1, &format!("Var {}", v.node.name)),
            Expr::Lit(l) => self.lit(l, lvl + 1),
            Expr::Paren(inner) => self.expr(inner, lvl + 1),
            Expr::Assign(a) => {
                self.line(a, lvl + 1, &format!("Assign {}", a.node.name));
                self.expr(&a.node.expr, lvl + 2);
            }
        }
    }

    fn fn_call(&mut self, n: &Spanned<FnCall>, lvl: usize) {
        self.line(n, lvl, "FnCall");
        match &n.node {
            FnCall::Default(d) => {
                self.line(d, lvl + 1, &format!("DefaultFnCall {}", d.node.name));
                for arg in &d.node.args {
                    self.expr(arg, lvl + 2);
                }
            }
            FnCall::Infix(i) => {
                self.line(i, lvl + 1, &format!("InfixFnCall {}", i.node.name));
                self.expr(&i.node.arg_1, lvl + 2);
                self.expr(&i.node.arg_2, lvl + 2);
            }
        }
    }

    fn lit(&mut self, n: &Spanned<Lit>, lvl: usize) {
        self.line(n, lvl, "Lit");
        match &n.node {
            Lit::Int(i) => self.line(i, lvl + 1, &format!("IntLit {}", i.node.value)),
            Lit::Str(s) => self.line(s, lvl + 1, &format!("StrLit {:?}", s.node.value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::TokenSpan;

    fn sp<T>(node: T, start: u32, end: u32) -> Spanned<T> {
        Spanned::new(node, TokenSpan::new(start, end))
    }

    #[test]
    fn test_fmt_minimal_program() {
        // def main() { }
        let body = sp(
            Block {
                var_decls: vec![],
                stmts: vec![],
            },
            4,
            6,
        );
        let fn_def = sp(
            FnDef {
                name: "main".to_string(),
                arg_decls: vec![],
                body,
            },
            0,
            6,
        );
        let program = sp(
            Program {
                var_decls: vec![],
                fn_defs: vec![fn_def],
            },
            0,
            6,
        );
        let out = fmt_program(&program);
        assert_eq!(
            out,
            "000 006  Program\n\
             000 006    FnDef main()\n\
             004 006      Block\n"
        );
    }

    #[test]
    fn test_fmt_lit_and_var() {
        let lit = sp(
            Expr::Lit(sp(Lit::Int(sp(IntLit { value: 65 }, 3, 4)), 3, 4)),
            3,
            4,
        );
        let out = {
            let mut p = Printer::default();
            p.expr(&lit, 0);
            p.out
        };
        assert_eq!(out, "003 004  Expr\n003 004    Lit\n003 004      IntLit 65\n");
    }
}
