//! Assembly text writer
//!
//! One instruction per line, tab-indented, operands comma-separated; labels
//! end with ':' in column 0. The arity helpers mirror how instructions are
//! actually formed, so emitter code reads like the instruction stream.

use rcc_common::{CcError, CcResult};
use std::io;

pub struct AsmWriter<'w> {
    out: &'w mut dyn io::Write,
    comment_prefix: &'static str,
}

impl<'w> AsmWriter<'w> {
    pub fn new(out: &'w mut impl io::Write, comment_prefix: &'static str) -> Self {
        Self { out, comment_prefix }
    }

    fn io(err: io::Error) -> CcError {
        CcError::io_error(format!("cannot write assembly output: {}", err))
    }

    pub fn raw(&mut self, line: &str) -> CcResult<()> {
        writeln!(self.out, "{}", line).map_err(Self::io)
    }

    pub fn blank(&mut self) -> CcResult<()> {
        writeln!(self.out).map_err(Self::io)
    }

    pub fn label(&mut self, label: &str) -> CcResult<()> {
        writeln!(self.out, "{}:", label).map_err(Self::io)
    }

    pub fn directive(&mut self, text: &str) -> CcResult<()> {
        writeln!(self.out, "\t{}", text).map_err(Self::io)
    }

    pub fn comment(&mut self, text: &str) -> CcResult<()> {
        writeln!(self.out, "{} {}", self.comment_prefix, text).map_err(Self::io)
    }

    pub fn op0(&mut self, op: &str) -> CcResult<()> {
        writeln!(self.out, "\t{}", op).map_err(Self::io)
    }

    pub fn op1(&mut self, op: &str, a: impl AsRef<str>) -> CcResult<()> {
        writeln!(self.out, "\t{}\t{}", op, a.as_ref()).map_err(Self::io)
    }

    pub fn op2(&mut self, op: &str, a: impl AsRef<str>, b: impl AsRef<str>) -> CcResult<()> {
        writeln!(self.out, "\t{}\t{}, {}", op, a.as_ref(), b.as_ref()).map_err(Self::io)
    }

    pub fn op3(
        &mut self,
        op: &str,
        a: impl AsRef<str>,
        b: impl AsRef<str>,
        c: impl AsRef<str>,
    ) -> CcResult<()> {
        writeln!(self.out, "\t{}\t{}, {}, {}", op, a.as_ref(), b.as_ref(), c.as_ref())
            .map_err(Self::io)
    }

    pub fn op4(
        &mut self,
        op: &str,
        a: impl AsRef<str>,
        b: impl AsRef<str>,
        c: impl AsRef<str>,
        d: impl AsRef<str>,
    ) -> CcResult<()> {
        writeln!(
            self.out,
            "\t{}\t{}, {}, {}, {}",
            op,
            a.as_ref(),
            b.as_ref(),
            c.as_ref(),
            d.as_ref()
        )
        .map_err(Self::io)
    }
}
