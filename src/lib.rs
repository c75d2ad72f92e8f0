pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod vm;

use std::fmt;

use codegen::{Assembly, CodegenError};
use diagnostic::Diagnostic;
use lexer::Lexer;
use parser::Parser;
use span::Spanned;
use token::Token;

/// Scan a source string. A non-empty diagnostics list aborts the
/// pipeline.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Vec<Diagnostic>> {
    let (tokens, diags) = Lexer::new(source).tokenize();
    if diags.is_empty() {
        Ok(tokens)
    } else {
        Err(diags)
    }
}

/// Scan and parse a source string.
pub fn parse_source(source: &str) -> Result<Spanned<ast::Program>, Vec<Diagnostic>> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program().map_err(|diag| vec![diag])
}

/// Any error on the way from source text to a linked program.
#[derive(Debug)]
pub enum CompileError {
    /// Lexing or parsing failed; render these against the source.
    Source(Vec<Diagnostic>),
    Codegen(CodegenError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Source(diags) => match diags.first() {
                Some(d) => write!(f, "{}", d.message),
                None => write!(f, "invalid source"),
            },
            CompileError::Codegen(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Vec<Diagnostic>> for CompileError {
    fn from(diags: Vec<Diagnostic>) -> Self {
        CompileError::Source(diags)
    }
}

impl From<CodegenError> for CompileError {
    fn from(err: CodegenError) -> Self {
        CompileError::Codegen(err)
    }
}

/// Full front half of the pipeline: source → linked assembly.
pub fn compile(source: &str) -> Result<Assembly, CompileError> {
    let program = parse_source(source)?;
    Ok(codegen::assemble(&program)?)
}
