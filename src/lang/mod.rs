//! # Cinder syntax tree
//!
//! This module defines the parsed, untyped program the compiler consumes.
//! The tokenizer and parser live outside this crate; they hand over a
//! [`program::ParsedProgram`] built from these types.
//!
//! ## Conventions
//!
//! - Every node carries the [`location::Location`] it was parsed from.
//! - Type names are not resolved here: `i32`, `Pair<T>` and `var` are all
//!   [`node::TypeInstance::Simple`] until the compiler looks them up.

pub mod location;
pub mod node;
pub mod program;
pub mod value;

pub use location::{Location, Position};
pub use node::{BinaryOp, Block, Expression, Statement, TypeInstance, UnaryOp};
pub use program::{
    AliasDefinition, ConstantDefinition, ConstructorDefinition, FieldDefinition,
    FunctionDefinition, Parameter, ParsedFile, ParsedProgram, StructDefinition,
};
pub use value::Literal;
