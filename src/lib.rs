//! Cinder: a statically typed, C-like language compiled to a register and
//! stack bytecode and executed on an embeddable processor.
//!
//! The pipeline is [`compiler::compile`] (parsed program to typed IR),
//! [`bytecode::generate`] (typed IR to instructions) and
//! [`runtime::Processor`] (execution). [`build`] chains the first two.

pub mod bytecode;
pub mod compiler;
pub mod lang;
pub mod numeric;
pub mod runtime;
pub mod types;

use thiserror::Error;

use bytecode::{BytecodeProgram, ExternalFunctionInfo, GenerateError, MemoryLayout};
use compiler::{CompileError, CompilerSettings};
use lang::ParsedProgram;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// Compiles and generates in one step. Warnings are dropped; call the
/// stages separately to inspect them.
pub fn build(
    program: &ParsedProgram,
    settings: &CompilerSettings,
    externals: &[ExternalFunctionInfo],
    layout: MemoryLayout,
) -> Result<BytecodeProgram, BuildError> {
    let mut result = compiler::compile(program, settings, externals)?;
    Ok(bytecode::generate(&mut result, layout)?)
}
