mod cli;

use clap::{Parser, Subcommand};

use cli::FileArgs;

#[derive(Parser)]
#[command(
    name = "timber",
    version,
    about = "Timber compiler and virtual machine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the token stream of a source file
    Lex(FileArgs),
    /// Pretty-print the abstract syntax tree
    Ast(FileArgs),
    /// Emit the linked instruction listing
    Asm(FileArgs),
    /// Compile and execute until Halt
    Run(FileArgs),
    /// Step through execution with an interactive prompt
    Dbg(FileArgs),
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Lex(args) => cli::cmd_lex(args),
        Command::Ast(args) => cli::cmd_ast(args),
        Command::Asm(args) => cli::cmd_asm(args),
        Command::Run(args) => cli::cmd_run(args),
        Command::Dbg(args) => cli::dbg::cmd_dbg(args),
    }
}
