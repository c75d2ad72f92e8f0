use std::io::{BufRead, Write};
use std::process;

use timber::vm::to_ptr;

use super::{compile_file, FileArgs};

/// Step mode: before each op, print the value stack and the op about
/// to execute. An empty line steps; an integer `k` prints the word at
/// `mem[k * MWORD_SIZE]` and re-prompts.
pub fn cmd_dbg(args: FileArgs) {
    let runnable = compile_file(&args);
    let mut vm = runnable.vm();
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    while !vm.halted {
        let Some(&op) = vm.ops.get(vm.pc) else {
            eprintln!("error: invalid pc value: {}", vm.pc);
            process::exit(1);
        };
        let stack: Vec<String> = vm.stack.iter().map(|v| format!("{:3}", v)).collect();
        println!("    |{}", stack.join(" "));
        print!("{:03} {:<7} {:>3}      ", vm.pc, op.kind, op.arg);
        let _ = std::io::stdout().flush();

        loop {
            let line = match lines.next() {
                Some(Ok(line)) => line,
                // Stdin closed: run the rest non-interactively.
                _ => String::new(),
            };
            let input = line.trim();
            if input.is_empty() {
                break;
            }
            match input.parse::<i32>() {
                Ok(idx) => {
                    let ptr = to_ptr(idx);
                    match vm.load_word(ptr) {
                        Ok(val) => println!("mem[{}] = {}", ptr, val),
                        Err(e) => println!("error: {}", e),
                    }
                }
                Err(_) => println!("enter a word index to peek, or an empty line to step"),
            }
            print!("{:03} {:<7} {:>3}      ", vm.pc, op.kind, op.arg);
            let _ = std::io::stdout().flush();
        }

        if let Err(e) = vm.step() {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }

    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(&vm.output);
    let _ = stdout.flush();
}
