//! Source line tracking for diagnostics

use serde::{Deserialize, Serialize};
use std::fmt;

/// One physical source line. Every token on the line shares it by `LineId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub filename: String,
    pub lineno: u32,
    pub text: String,
}

impl Line {
    pub fn new(filename: impl Into<String>, lineno: u32, text: impl Into<String>) -> Self {
        Self { filename: filename.into(), lineno, text: text.into() }
    }
}

/// Index of a `Line` in the translation unit's `LineTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(u32);

/// All source lines of a translation unit, in lexing order.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LineTable {
    lines: Vec<Line>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line: Line) -> LineId {
        let id = LineId(self.lines.len() as u32);
        self.lines.push(line);
        id
    }

    pub fn get(&self, id: LineId) -> &Line {
        &self.lines[id.0 as usize]
    }
}

/// A position inside a line. Columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    pub line: LineId,
    pub col: u32,
}

impl Loc {
    pub fn new(line: LineId, col: u32) -> Self {
        Self { line, col }
    }
}

/// A self-contained source location, detached from the line table so it can
/// travel inside errors across crate boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub filename: String,
    pub lineno: u32,
    pub col: u32,
    pub line_text: String,
}

impl SourceLoc {
    pub fn resolve(lines: &LineTable, loc: Loc) -> Self {
        let line = lines.get(loc.line);
        Self {
            filename: line.filename.clone(),
            lineno: line.lineno,
            col: loc.col,
            line_text: line.text.clone(),
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.lineno, self.col)
    }
}
