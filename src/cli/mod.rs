pub mod dbg;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use clap::Args;

use timber::codegen::Runnable;
use timber::diagnostic::render_diagnostics;
use timber::token::Token;
use timber::CompileError;

#[derive(Args)]
pub struct FileArgs {
    /// Input .tim source file
    pub file: PathBuf,
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read '{}': {}", path.display(), err);
            process::exit(1);
        }
    }
}

fn exit_with(err: CompileError, filename: &str, source: &str) -> ! {
    match err {
        CompileError::Source(diags) => render_diagnostics(&diags, filename, source),
        CompileError::Codegen(e) => eprintln!("error: {}", e),
    }
    process::exit(1);
}

/// Compile a file all the way to a runnable image, exiting on error.
pub(crate) fn compile_file(args: &FileArgs) -> Runnable {
    let filename = args.file.display().to_string();
    let source = read_source(&args.file);
    let assembly = match timber::compile(&source) {
        Ok(assembly) => assembly,
        Err(err) => exit_with(err, &filename, &source),
    };
    match assembly.runnable() {
        Ok(runnable) => runnable,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

pub fn cmd_lex(args: FileArgs) {
    let filename = args.file.display().to_string();
    let source = read_source(&args.file);
    match timber::tokenize(&source) {
        Ok(tokens) => println!("{}", Token::fmt_many(&tokens)),
        Err(diags) => {
            render_diagnostics(&diags, &filename, &source);
            process::exit(1);
        }
    }
}

pub fn cmd_ast(args: FileArgs) {
    let filename = args.file.display().to_string();
    let source = read_source(&args.file);
    match timber::parse_source(&source) {
        Ok(program) => print!("{}", timber::ast::fmt_program(&program)),
        Err(diags) => {
            render_diagnostics(&diags, &filename, &source);
            process::exit(1);
        }
    }
}

pub fn cmd_asm(args: FileArgs) {
    let filename = args.file.display().to_string();
    let source = read_source(&args.file);
    match timber::compile(&source) {
        Ok(assembly) => print!("{}", assembly.listing()),
        Err(err) => exit_with(err, &filename, &source),
    }
}

pub fn cmd_run(args: FileArgs) {
    let runnable = compile_file(&args);
    let mut vm = runnable.vm();
    if let Err(e) = vm.run() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(&vm.output);
    let _ = stdout.flush();
}
