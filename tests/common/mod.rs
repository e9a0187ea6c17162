#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use cinder::bytecode::MemoryLayout;
use cinder::compiler::CompilerSettings;
use cinder::lang::{Block, Expression, Location, ParsedFile, ParsedProgram, Statement, TypeInstance};
use cinder::runtime::{ExternalFunctions, Processor, ProcessorSettings, standard_externals};

pub fn at(line: u32, column: u32) -> Location {
    Location::new("main.cin", line, column)
}

pub fn loc() -> Location {
    at(1, 1)
}

pub fn ty(name: &str) -> TypeInstance {
    TypeInstance::simple(name, loc())
}

pub fn int(n: i64) -> Expression {
    Expression::int(n, loc())
}

pub fn ident(name: &str) -> Expression {
    Expression::ident(name, loc())
}

pub fn block(statements: Vec<Statement>) -> Block {
    Block::new(statements, loc())
}

pub fn call(name: &str, args: Vec<Expression>) -> Expression {
    Expression::call(name, args, loc())
}

pub fn small_layout() -> MemoryLayout {
    MemoryLayout {
        heap_size: 1024,
        stack_size: 4096,
        pointer_size: 4,
    }
}

/// Compiles `file` against `externals` and loads it into a processor.
pub fn load(file: ParsedFile, externals: ExternalFunctions) -> Processor {
    let program = cinder::build(
        &ParsedProgram::single(file),
        &CompilerSettings::default(),
        &externals.infos(),
        small_layout(),
    )
    .unwrap_or_else(|e| panic!("build failed: {}", e));
    Processor::new(
        program,
        externals,
        ProcessorSettings {
            max_steps: Some(1_000_000),
            ..Default::default()
        },
    )
}

/// Loads `file` with the standard host functions writing to a buffer.
pub fn load_with_output(file: ParsedFile) -> (Processor, Rc<RefCell<Vec<u8>>>) {
    let out = Rc::new(RefCell::new(Vec::new()));
    let err = Rc::new(RefCell::new(Vec::new()));
    let externals = standard_externals(out.clone(), err);
    (load(file, externals), out)
}

pub fn output(buffer: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(buffer.borrow().clone()).unwrap()
}
