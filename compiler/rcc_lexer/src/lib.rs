//! C tokenizer for the rcc compiler
//!
//! Produces tokens lazily with a single-slot putback, tracks source lines for
//! diagnostics, and understands preprocessor-style `# <n> "<file>"` line
//! directives.

pub mod lexer;
pub mod token;

pub use lexer::*;
pub use token::*;
