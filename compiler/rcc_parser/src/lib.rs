//! Recursive-descent parser and semantic analysis for the rcc compiler
//!
//! Produces a typed AST plus the tables later stages need: scopes, the type
//! table, the string pool, and the interner. All semantic checking happens
//! here; the IR builder can assume a well-typed tree.

pub mod ast;
pub mod const_eval;
mod expr;
pub mod parser;
pub mod scope;

pub use ast::*;
pub use parser::{parse, Parser};
pub use scope::*;

use rcc_common::{Interner, LineTable};
use rcc_types::TypeTable;

/// Everything ambient in the original design (interner, line table, type
/// tables) bundled into one value threaded through the pipeline.
#[derive(Debug)]
pub struct Context {
    pub interner: Interner,
    pub lines: LineTable,
    pub types: TypeTable,
}
