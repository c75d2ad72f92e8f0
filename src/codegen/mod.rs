//! Instruction-stream generation: AST descent into a `Unit` of ops
//! with symbolic labels, plus the link step that resolves them and the
//! assembly of the initial memory image.

pub mod namespace;
pub mod unit;

use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::span::Spanned;
use crate::vm::{align, to_ptr, MWord, Vm, MEM_CAPACITY};

pub use namespace::Namespace;
pub use unit::{Unit, DUMMY_ADDR};

/// First byte address available to interned strings; address 0 is
/// reserved as NULL.
pub const STR_LIT_ADDR: MWord = to_ptr(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodegenError {
    UnknownTarget(String),
    UnknownIdent { name: String, available: String },
    DuplicateName(String),
    MemTooSmall { size: MWord, need: MWord },
    Unsupported(&'static str),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::UnknownTarget(name) => write!(f, "Unknown target_addr: {}", name),
            CodegenError::UnknownIdent { name, available } => {
                write!(f, "Unknown identifier: {}, available: {}", name, available)
            }
            CodegenError::DuplicateName(name) => write!(f, "Duplicate names: {}", name),
            CodegenError::MemTooSmall { size, need } => write!(
                f,
                "memory capacity {} is smaller than the {} byte static string region",
                size, need
            ),
            CodegenError::Unsupported(what) => write!(f, "{} have no lowering", what),
        }
    }
}

impl std::error::Error for CodegenError {}

/// Per-assembly state shared by all generated units: the byte size of
/// the current function's frame, and the string interning table for
/// the initial memory image.
#[derive(Debug)]
pub struct Context {
    /// Frame size of the function being lowered, in bytes: one slot
    /// for the saved return pc plus one per argument and local.
    pub stack_ptr_offset: MWord,
    str_addrs: HashMap<Vec<u8>, MWord>,
    str_addr_offset: MWord,
}

impl Context {
    pub fn new() -> Self {
        Self {
            stack_ptr_offset: 0,
            str_addrs: HashMap::new(),
            str_addr_offset: STR_LIT_ADDR,
        }
    }

    pub fn set_stack_ptr_offset(&mut self, offset: MWord) {
        self.stack_ptr_offset = offset;
    }

    /// Intern a string literal's UTF-8 bytes (NUL-terminated) at the
    /// next word-aligned address, returning its address. Interning is
    /// idempotent: the same string always gets the same address.
    pub fn str_lit(&mut self, string: &str) -> MWord {
        let bytes = string.as_bytes().to_vec();
        if let Some(&addr) = self.str_addrs.get(&bytes) {
            return addr;
        }
        let addr = self.str_addr_offset;
        self.str_addr_offset += align(bytes.len() as MWord + 1);
        self.str_addrs.insert(bytes, addr);
        addr
    }

    /// Build the initial memory image and the initial `vtos` (the
    /// first word-aligned address past the static string region).
    pub fn build_mem(&self, size: MWord) -> Result<(Vec<u8>, MWord), CodegenError> {
        if size <= self.str_addr_offset {
            return Err(CodegenError::MemTooSmall {
                size,
                need: self.str_addr_offset,
            });
        }
        let mut mem = vec![0u8; size as usize];
        for (bytes, &ptr) in &self.str_addrs {
            mem[ptr as usize..ptr as usize + bytes.len()].copy_from_slice(bytes);
        }
        Ok((mem, self.str_addr_offset))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to run: linked ops, initial memory image, and
/// the initial frame base.
pub struct Runnable {
    pub ops: Vec<crate::vm::Op>,
    pub mem: Vec<u8>,
    pub vtos: MWord,
}

impl Runnable {
    pub fn vm(&self) -> Vm {
        Vm::new(self.ops.clone(), self.mem.clone(), self.vtos)
    }
}

/// A linked program together with its interning context.
#[derive(Debug)]
pub struct Assembly {
    pub unit: Unit,
    ctx: Context,
}

impl Assembly {
    /// The `asm` listing.
    pub fn listing(&self) -> String {
        self.unit.to_string()
    }

    pub fn runnable(&self) -> Result<Runnable, CodegenError> {
        let (mem, vtos) = self.ctx.build_mem(MEM_CAPACITY)?;
        Ok(Runnable {
            ops: self.unit.ops.clone(),
            mem,
            vtos,
        })
    }
}

/// Generate, add builtins and the entry preamble, and link.
pub fn assemble(program: &Spanned<Program>) -> Result<Assembly, CodegenError> {
    let mut generator = Generator::new();
    let unit = generator.gen_program(program)?;
    let unit = unit.builtins().entrypoint().link()?;
    Ok(Assembly {
        unit,
        ctx: generator.ctx,
    })
}

/// AST-walking instruction generator.
pub struct Generator {
    ctx: Context,
    label_counter: u32,
}

impl Generator {
    pub fn new() -> Self {
        Self {
            ctx: Context::new(),
            label_counter: 0,
        }
    }

    pub fn gen_program(&mut self, n: &Spanned<Program>) -> Result<Unit, CodegenError> {
        let globals: HashMap<String, usize> = n
            .node
            .var_decls
            .iter()
            .enumerate()
            .map(|(idx, v)| (v.node.name.clone(), idx))
            .collect();
        let mut unit = Unit::new();
        for fn_def in &n.node.fn_defs {
            unit = unit.append(self.gen_fn_def(&fn_def.node, &globals)?);
        }
        Ok(unit)
    }

    fn gen_fn_def(
        &mut self,
        n: &FnDef,
        globals: &HashMap<String, usize>,
    ) -> Result<Unit, CodegenError> {
        let mut ns = Namespace::new(globals);
        ns.set_var_decls(&n.arg_decls)?;
        let frame = stack_required_fn(n) + to_ptr(1);
        self.ctx.set_stack_ptr_offset(frame);
        let body = self.gen_block(&n.body.node, &ns)?;
        Ok(Unit::new()
            .target_addr(&n.name)
            .v_incr(frame)
            .append(body)
            .v_decr(frame)
            .ret())
    }

    fn gen_block<'a>(&mut self, n: &Block, ns: &'a Namespace<'a>) -> Result<Unit, CodegenError> {
        let mut scope = ns.push_block();
        scope.set_var_decls(&n.var_decls)?;
        let mut unit = Unit::new();
        for stmt in &n.stmts {
            unit = unit.append(self.gen_stmt(&stmt.node, &scope)?);
        }
        Ok(unit)
    }

    fn gen_stmt<'a>(&mut self, n: &Stmt, ns: &'a Namespace<'a>) -> Result<Unit, CodegenError> {
        match n {
            Stmt::Compound(c) => self.gen_compound_stmt(&c.node, ns),
            Stmt::Simple(s) => self.gen_simple_stmt(&s.node, ns),
        }
    }

    fn gen_compound_stmt<'a>(
        &mut self,
        n: &CompoundStmt,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        match n {
            CompoundStmt::While(w) => self.gen_while_stmt(&w.node, ns),
            CompoundStmt::If(i) => self.gen_if_stmt(&i.node, ns),
            CompoundStmt::Block(b) => self.gen_block(&b.node, ns),
        }
    }

    fn gen_simple_stmt<'a>(
        &mut self,
        n: &SimpleStmt,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        match n {
            SimpleStmt::Return(r) => self.gen_return_stmt(&r.node, ns),
            // A statement expression's value is discarded.
            SimpleStmt::Expr(e) => Ok(self.gen_expr(&e.node, ns)?.pop()),
        }
    }

    fn gen_expr<'a>(&mut self, n: &Expr, ns: &'a Namespace<'a>) -> Result<Unit, CodegenError> {
        match n {
            Expr::Call(c) => self.gen_fn_call(&c.node, ns),
            Expr::Var(v) => Ok(Unit::new().v_load(ns.get_offset(&v.node.name, &self.ctx)?)),
            Expr::Lit(l) => self.gen_lit(&l.node),
            Expr::Paren(inner) => self.gen_expr(&inner.node, ns),
            Expr::Assign(a) => self.gen_assign(&a.node, ns),
        }
    }

    fn gen_fn_call<'a>(
        &mut self,
        n: &FnCall,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        match n {
            FnCall::Default(d) => self.gen_default_fn_call(&d.node, ns),
            FnCall::Infix(_) => Err(CodegenError::Unsupported("infix function calls")),
        }
    }

    /// Evaluate each argument and store it into the callee's slot at
    /// `to_ptr(i + 1)` above the current frame base, then call. `Call`
    /// saves the pc at offset 0 and the callee's prologue advances
    /// `vtos`, which makes slot `i + 1` the callee's argument `i`.
    fn gen_default_fn_call<'a>(
        &mut self,
        n: &DefaultFnCall,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        let mut unit = Unit::new();
        for (i, arg) in n.args.iter().enumerate() {
            unit = unit
                .append(self.gen_expr(&arg.node, ns)?)
                .v_store(to_ptr(i as MWord + 1));
        }
        Ok(unit.jmp_addr(&n.name).call(DUMMY_ADDR))
    }

    fn gen_assign<'a>(&mut self, n: &Assign, ns: &'a Namespace<'a>) -> Result<Unit, CodegenError> {
        let expr = self.gen_expr(&n.expr.node, ns)?;
        // Dup leaves a copy as the expression's value.
        Ok(Unit::new()
            .append(expr)
            .dup()
            .v_store(ns.get_offset(&n.name, &self.ctx)?))
    }

    fn gen_while_stmt<'a>(
        &mut self,
        n: &WhileStmt,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        let guard = self.gen_expr(&n.guard.node, ns)?;
        let body = self.gen_block(&n.body.node, ns)?;
        let guard_label = self.fresh_label("while_guard");
        let start_label = self.fresh_label("while_start");
        Ok(Unit::new()
            .jmp_addr(&guard_label)
            .jmp(DUMMY_ADDR)
            .target_addr(&start_label)
            .append(body)
            .target_addr(&guard_label)
            .append(guard)
            .jmp_addr(&start_label)
            .jmp_nz(DUMMY_ADDR))
    }

    fn gen_if_stmt<'a>(
        &mut self,
        n: &IfStmt,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        let guard = self.gen_expr(&n.guard.node, ns)?;
        let body = self.gen_block(&n.body.node, ns)?;
        let end_label = self.fresh_label("if_end");
        Ok(Unit::new()
            .append(guard)
            .jmp_addr(&end_label)
            .jmp_z(DUMMY_ADDR)
            .append(body)
            .target_addr(&end_label))
    }

    fn gen_return_stmt<'a>(
        &mut self,
        n: &ReturnStmt,
        ns: &'a Namespace<'a>,
    ) -> Result<Unit, CodegenError> {
        let expr = self.gen_expr(&n.child.node, ns)?;
        // The returned word is the sole value left for the caller.
        Ok(Unit::new()
            .append(expr)
            .v_decr(self.ctx.stack_ptr_offset)
            .ret())
    }

    fn gen_lit(&mut self, n: &Lit) -> Result<Unit, CodegenError> {
        match n {
            Lit::Int(i) => Ok(Unit::new().push(i.node.value)),
            Lit::Str(s) => {
                let ptr = self.ctx.str_lit(&s.node.value);
                Ok(Unit::new().push(ptr))
            }
        }
    }

    fn fresh_label(&mut self, stem: &str) -> String {
        let label = format!("__{}_{}", stem, self.label_counter);
        self.label_counter += 1;
        label
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Frame sizing ──────────────────────────────────────────────────

/// Bytes of frame a function needs beyond the saved-pc slot: one word
/// per argument plus whatever its body needs.
fn stack_required_fn(n: &FnDef) -> MWord {
    to_ptr(n.arg_decls.len() as MWord) + stack_required_block(&n.body.node)
}

/// A block needs a word per own declaration plus the deepest of its
/// child statements; siblings reuse the same slots.
fn stack_required_block(n: &Block) -> MWord {
    let deepest = n
        .stmts
        .iter()
        .map(|s| stack_required_stmt(&s.node))
        .max()
        .unwrap_or(0);
    to_ptr(n.var_decls.len() as MWord) + deepest
}

fn stack_required_stmt(n: &Stmt) -> MWord {
    match n {
        Stmt::Compound(c) => match &c.node {
            CompoundStmt::While(w) => stack_required_block(&w.node.body.node),
            CompoundStmt::If(i) => stack_required_block(&i.node.body.node),
            CompoundStmt::Block(b) => stack_required_block(&b.node),
        },
        Stmt::Simple(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::span::TokenSpan;
    use crate::vm::OpKind;

    fn parse(source: &str) -> Spanned<Program> {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty(), "lex errors: {:?}", diags);
        Parser::new(tokens).parse_program().expect("should parse")
    }

    fn asm(source: &str) -> Assembly {
        assemble(&parse(source)).expect("should assemble")
    }

    fn ops_of(assembly: &Assembly) -> Vec<(OpKind, MWord)> {
        assembly.unit.ops.iter().map(|o| (o.kind, o.arg)).collect()
    }

    #[test]
    fn test_empty_main_shape() {
        let a = asm("def main() { }");
        let ops = ops_of(&a);
        // Entry preamble, then main's prologue/epilogue.
        assert_eq!(ops[0].0, OpKind::Call);
        assert_eq!(ops[1].0, OpKind::Halt);
        let main = a.unit.target_addrs["main"];
        assert_eq!(ops[main], (OpKind::VIncr, to_ptr(1)));
        assert_eq!(ops[main + 1], (OpKind::VDecr, to_ptr(1)));
        assert_eq!(ops[main + 2].0, OpKind::Ret);
    }

    #[test]
    fn test_entry_call_links_to_main() {
        let a = asm("def main() { }");
        let main = a.unit.target_addrs["main"];
        assert_eq!(a.unit.ops[0].arg, main as MWord - 1);
    }

    #[test]
    fn test_link_correctness_for_every_pending_jump() {
        let a = asm("def main() { var n; n = 3; while (n) { n = sub(n, 1); }; if (n) { }; }");
        for (&addr, name) in &a.unit.jmp_addrs {
            let target = a.unit.target_addrs[name];
            assert_eq!(
                a.unit.ops[addr].arg,
                target as MWord - 1,
                "pending jump at {} to {}",
                addr,
                name
            );
        }
    }

    #[test]
    fn test_call_lowering() {
        // Arguments are evaluated in order and stored into the callee
        // slots; the call itself is linked to the add builtin.
        let a = asm("def main() { return add(2, 3); }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        assert_eq!(ops[main + 1], (OpKind::Push, 2));
        assert_eq!(ops[main + 2], (OpKind::VStore, to_ptr(1)));
        assert_eq!(ops[main + 3], (OpKind::Push, 3));
        assert_eq!(ops[main + 4], (OpKind::VStore, to_ptr(2)));
        assert_eq!(ops[main + 5].0, OpKind::Call);
        assert_eq!(
            ops[main + 5].1,
            a.unit.target_addrs["add"] as MWord - 1
        );
    }

    #[test]
    fn test_statement_expr_is_popped() {
        let a = asm("def main() { print_char(65); }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        // push arg, store, call, pop
        assert_eq!(ops[main + 1], (OpKind::Push, 65));
        assert_eq!(ops[main + 3].0, OpKind::Call);
        assert_eq!(ops[main + 4].0, OpKind::Pop);
    }

    #[test]
    fn test_var_offset_is_negative_after_prologue() {
        // One local in a zero-arg function: frame is 2 words, slot 0
        // sits one word above the old base, i.e. -4 from the new vtos.
        let a = asm("def main() { var n; n = 1; }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        assert_eq!(ops[main], (OpKind::VIncr, to_ptr(2)));
        assert_eq!(ops[main + 1], (OpKind::Push, 1));
        assert_eq!(ops[main + 2], (OpKind::Dup, 0));
        assert_eq!(ops[main + 3], (OpKind::VStore, -4));
    }

    #[test]
    fn test_args_then_locals_layout() {
        // Args occupy the bottom slots; block locals stack above them.
        let a = asm("def f(var a, var b) { var c; c = a; } def main() { }");
        let ops = ops_of(&a);
        let f = a.unit.target_addrs["f"];
        let frame = to_ptr(4); // saved pc + 2 args + 1 local
        assert_eq!(ops[f], (OpKind::VIncr, frame));
        // c = a: load a (slot 0), dup, store c (slot 2)
        assert_eq!(ops[f + 1], (OpKind::VLoad, to_ptr(1) - frame));
        assert_eq!(ops[f + 3], (OpKind::VStore, to_ptr(3) - frame));
    }

    #[test]
    fn test_while_lowering_shape() {
        let a = asm("def main() { var n; while (n) { }; }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        // jmp guard; (empty body); guard: load n; jmp_nz start
        assert_eq!(ops[main + 1].0, OpKind::Jmp);
        assert_eq!(ops[main + 2].0, OpKind::VLoad);
        assert_eq!(ops[main + 3].0, OpKind::JmpNZ);
        // The guard jump lands on the VLoad, the back edge on the
        // (empty) body start.
        assert_eq!(ops[main + 1].1 as usize, main + 2 - 1);
        assert_eq!(ops[main + 3].1 as usize, main + 2 - 1);
    }

    #[test]
    fn test_if_lowering_shape() {
        let a = asm("def main() { if (1) { print_char(65); }; }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        assert_eq!(ops[main + 1], (OpKind::Push, 1));
        assert_eq!(ops[main + 2].0, OpKind::JmpZ);
        // The end label sits right after the body.
        let end = a
            .unit
            .target_addrs
            .iter()
            .find(|(name, _)| name.starts_with("__if_end"))
            .map(|(_, &addr)| addr)
            .expect("if end label");
        assert_eq!(ops[main + 2].1 as usize, end - 1);
    }

    #[test]
    fn test_return_emits_epilogue_before_ret() {
        let a = asm("def main() { return 7; }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        assert_eq!(ops[main + 1], (OpKind::Push, 7));
        assert_eq!(ops[main + 2], (OpKind::VDecr, to_ptr(1)));
        assert_eq!(ops[main + 3].0, OpKind::Ret);
    }

    #[test]
    fn test_shadowing_uses_innermost_slot() {
        let a = asm("def main() { var n; { var n; n = 1; }; }");
        let ops = ops_of(&a);
        let main = a.unit.target_addrs["main"];
        let frame = to_ptr(3); // saved pc + outer n + inner n
        assert_eq!(ops[main], (OpKind::VIncr, frame));
        // The inner assignment targets slot 1, not slot 0.
        assert_eq!(ops[main + 3], (OpKind::VStore, to_ptr(2) - frame));
    }

    #[test]
    fn test_duplicate_names_in_scope() {
        let program = parse("def main(var a, var a) { }");
        let err = assemble(&program).unwrap_err();
        assert_eq!(err, CodegenError::DuplicateName("a".to_string()));
    }

    #[test]
    fn test_unknown_identifier() {
        let program = parse("def main() { var a; return b; }");
        let err = assemble(&program).unwrap_err();
        assert!(matches!(err, CodegenError::UnknownIdent { .. }));
        assert!(err.to_string().contains("Unknown identifier: b"));
    }

    #[test]
    fn test_unknown_call_target_at_link_time() {
        let program = parse("def main() { nope(); }");
        let err = assemble(&program).unwrap_err();
        assert_eq!(err.to_string(), "Unknown target_addr: nope");
    }

    // --- stack_required ---

    #[test]
    fn test_stack_required_siblings_share_slots() {
        let p = parse(
            "def main() { var a; { var b; var c; }; { var d; }; }",
        );
        let f = &p.node.fn_defs[0].node;
        // 1 own decl + max(2, 1) nested
        assert_eq!(stack_required_fn(f), to_ptr(3));
    }

    #[test]
    fn test_stack_required_counts_args() {
        let p = parse("def f(var a, var b) { var c; }");
        let f = &p.node.fn_defs[0].node;
        assert_eq!(stack_required_fn(f), to_ptr(3));
    }

    #[test]
    fn test_stack_required_nested_compound() {
        let p = parse("def f() { while (1) { var a; if (1) { var b; }; }; }");
        let f = &p.node.fn_defs[0].node;
        assert_eq!(stack_required_fn(f), to_ptr(2));
    }

    // --- Context: string interning and the memory image ---

    #[test]
    fn test_str_interning_is_aligned_and_deduplicated() {
        let mut ctx = Context::new();
        let a = ctx.str_lit("hi");
        let b = ctx.str_lit("hello");
        assert_eq!(a, STR_LIT_ADDR);
        // "hi\0" is 3 bytes, aligned up to 4.
        assert_eq!(b, STR_LIT_ADDR + to_ptr(1));
        assert_eq!(ctx.str_lit("hi"), a);
    }

    #[test]
    fn test_build_mem_places_strings_and_vtos() {
        let mut ctx = Context::new();
        let a = ctx.str_lit("AB");
        let (mem, vtos) = ctx.build_mem(MEM_CAPACITY).unwrap();
        assert_eq!(mem.len(), MEM_CAPACITY as usize);
        assert_eq!(&mem[a as usize..a as usize + 3], b"AB\0");
        // vtos starts right past the aligned string region.
        assert_eq!(vtos, STR_LIT_ADDR + to_ptr(1));
    }

    #[test]
    fn test_build_mem_too_small() {
        let mut ctx = Context::new();
        ctx.str_lit("a long enough string literal");
        let err = ctx.build_mem(to_ptr(2)).unwrap_err();
        assert!(matches!(err, CodegenError::MemTooSmall { .. }));
    }

    #[test]
    fn test_str_lit_lowering_pushes_address() {
        let mut generator = Generator::new();
        let lit = Lit::Str(Spanned::new(
            StrLit {
                value: "hi".to_string(),
            },
            TokenSpan::new(0, 0),
        ));
        let unit = generator.gen_lit(&lit).unwrap();
        assert_eq!(unit.ops.len(), 1);
        assert_eq!(unit.ops[0].kind, OpKind::Push);
        assert_eq!(unit.ops[0].arg, STR_LIT_ADDR);
    }
}
