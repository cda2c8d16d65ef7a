//! Diagnostic rendering
//!
//! Every detected issue is an error and aborts the translation unit, so a
//! diagnostic here is a formatting concern: the driver renders the single
//! `CcError` it receives and exits nonzero.

use crate::error::CcError;
use std::fmt::Write;

/// Render an error in the `filename:line:col: error: message` format,
/// followed by the offending source line and a caret under the span start.
pub fn render(err: &CcError) -> String {
    let mut out = String::new();
    match err.loc() {
        Some(loc) => {
            let _ = writeln!(out, "{}: error: {}", loc, err.message());
            let _ = writeln!(out, "{}", loc.line_text);
            let col = loc.col.max(1) as usize;
            let _ = write!(out, "{}^", " ".repeat(col - 1));
        }
        None => {
            let _ = write!(out, "error: {}", err.message());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceLoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_location_line_and_caret() {
        let err = CcError::sema_error(
            "undefined variable: x",
            Some(SourceLoc {
                filename: "t.c".to_string(),
                lineno: 3,
                col: 10,
                line_text: "  return x;".to_string(),
            }),
        );
        assert_eq!(
            render(&err),
            "t.c:3:10: error: undefined variable: x\n  return x;\n         ^"
        );
    }

    #[test]
    fn renders_without_location() {
        let err = CcError::io_error("cannot open file");
        assert_eq!(render(&err), "error: cannot open file");
    }
}
