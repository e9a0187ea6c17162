use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::{env, fs, path::Path};

use tracing_subscriber::EnvFilter;

use cinder::bytecode::BytecodeProgram;
use cinder::bytecode::disasm::{print_program, print_stats};
use cinder::runtime::{Processor, ProcessorSettings, standard_externals};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    let stats = args.contains(&"--stats".to_string());
    let max_steps = flag_value(&args, "--max-steps");

    // first non-flag arguments are the command and the filename
    let mut positional = args
        .iter()
        .skip(1)
        .filter(|a| !a.starts_with('-'))
        .filter(|a| Some(a.as_str()) != max_steps.as_deref());
    let command = positional.next();
    let filename = positional.next();

    match (command.map(String::as_str), filename) {
        (Some("run"), Some(filename)) => {
            let program = load_program(filename);
            let mut settings = ProcessorSettings::default();
            if let Some(value) = &max_steps {
                match value.parse() {
                    Ok(n) => settings.max_steps = Some(n),
                    Err(_) => {
                        eprintln!("Error: --max-steps expects a number, got {}", value);
                        std::process::exit(1);
                    }
                }
            }
            run_program(program, settings);
        }
        (Some("dis"), Some(filename)) => {
            let program = load_program(filename);
            print_program(&program);
            if stats {
                print_stats(&program);
            }
        }
        _ => print_usage(),
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("cbc") {
        eprintln!("Error: expected a .cbc file, got {}", filename);
        std::process::exit(1);
    }
}

fn load_program(filename: &str) -> BytecodeProgram {
    ensure_extension(filename);
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };
    match BytecodeProgram::from_bytes(&bytes) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_program(program: BytecodeProgram, settings: ProcessorSettings) {
    let stdout = Rc::new(RefCell::new(io::stdout()));
    let stderr = Rc::new(RefCell::new(io::stderr()));
    let externals = standard_externals(stdout, stderr);

    let debug = program.debug.clone();
    let mut processor = Processor::new(program, externals, settings);
    match processor.run() {
        Ok(result) => {
            for block in result.heap.used_blocks() {
                tracing::warn!(address = block.address, size = block.size, "heap block leaked");
            }
            std::process::exit(result.exit_code);
        }
        Err(e) => {
            eprintln!("{}", e.describe(&debug));
            std::process::exit(if e.is_user_crash() { 2 } else { 1 });
        }
    }
}

fn print_usage() {
    println!("CINDER - bytecode runner");
    println!();
    println!("Usage:");
    println!("  cinder run <file.cbc>                 Run a compiled program");
    println!("  cinder run <file.cbc> --max-steps N   Stop after N instructions");
    println!("  cinder dis <file.cbc>                 Disassemble a compiled program");
    println!("  cinder dis <file.cbc> --stats         Also print opcode statistics");
    println!();
    println!("Set RUST_LOG=cinder=debug for processor tracing.");
}
