//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and run strictly in order:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns functions with their
//!   locals and frame layout, calling into `ty` as nodes are built.
//! - `ty` defines the type constructors and the inference pass.
//! - `codegen` lowers the parsed functions into x86-64 Intel-syntax assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod ty;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into Intel-syntax assembly.
///
/// Nothing is returned for a failed compilation, so callers never see a
/// partially emitted program.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let program = parser::parse(tokens, source)?;
  codegen::generate(&program, source)
}
