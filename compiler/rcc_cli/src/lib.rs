//! Library entry points for the rcc driver
//!
//! The pipeline for one translation unit: parse (+ sema) into a typed AST,
//! lower to IR per function, then emit assembly for the selected target.
//! Every stage returns a `CcResult`; the first error wins and nothing is
//! written to the sink.

pub use rcc_codegen::{Arch, Os, Target};

use rcc_common::CcResult;
use std::io;

/// Compile one translation unit to assembly text on `out`.
pub fn compile<W: io::Write>(
    source: &str,
    filename: &str,
    target: Target,
    out: &mut W,
) -> CcResult<()> {
    let (program, ctx) = rcc_parser::parse(source, filename)?;
    let funcs = rcc_ir::build_program(&program, &ctx)?;
    rcc_codegen::emit_program(&program, &ctx, &funcs, target, out)
}

/// Convenience wrapper used by tests and the driver: the assembly is built
/// in memory so a failing compilation produces no partial output.
pub fn compile_to_string(source: &str, filename: &str, target: Target) -> CcResult<String> {
    let mut buf = Vec::new();
    compile(source, filename, target, &mut buf)?;
    Ok(String::from_utf8(buf).expect("assembly output is ASCII"))
}

/// Serialize the typed AST as JSON (the `--dump-ast` flag).
pub fn dump_ast(source: &str, filename: &str) -> CcResult<String> {
    let (program, _ctx) = rcc_parser::parse(source, filename)?;
    serde_json::to_string_pretty(&program.decls)
        .map_err(|e| rcc_common::CcError::io_error(format!("cannot serialize AST: {}", e)))
}
