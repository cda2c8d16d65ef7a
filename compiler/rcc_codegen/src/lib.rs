//! Assembly emitters for the rcc compiler
//!
//! Two backends (x86-64, AArch64) share the data/initializer lowering and
//! the assembly writer. Register allocation runs here because the
//! allocatable sets are a property of the target.

pub mod aarch64;
pub mod asm;
pub mod data;
pub mod x64;

pub use asm::AsmWriter;

use rcc_common::CcResult;
use rcc_ir::FuncIr;
use rcc_parser::{Context, Declaration, Program};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    Aarch64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Macos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub arch: Arch,
    pub os: Os,
}

impl Target {
    pub fn parse(text: &str) -> Option<Target> {
        let (arch, os) = match text {
            "x86_64-linux" => (Arch::X64, Os::Linux),
            "x86_64-macos" | "x86_64-darwin" => (Arch::X64, Os::Macos),
            "aarch64-linux" => (Arch::Aarch64, Os::Linux),
            "aarch64-macos" | "aarch64-darwin" => (Arch::Aarch64, Os::Macos),
            _ => return None,
        };
        Some(Target { arch, os })
    }

    pub fn is_darwin(self) -> bool {
        self.os == Os::Macos
    }

    pub fn comment_prefix(self) -> &'static str {
        match self.arch {
            Arch::X64 => "#",
            Arch::Aarch64 => "//",
        }
    }

    /// Platform symbol mangling: identity on SysV, leading underscore on
    /// Darwin.
    pub fn mangle(self, name: &str) -> String {
        if self.is_darwin() {
            format!("_{}", name)
        } else {
            name.to_string()
        }
    }

    /// Assembler-local labels: `.L` prefixed on ELF, `L` on Mach-O.
    pub fn local_label(self, text: &str) -> String {
        if self.is_darwin() {
            text.strip_prefix('.').unwrap_or(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// `.align` takes a byte count on SysV x86; everywhere else a power of
    /// two via `.p2align`.
    pub fn align_directive(self, align: usize) -> String {
        if self.arch == Arch::X64 && !self.is_darwin() {
            format!(".align\t{}", align)
        } else {
            format!(".p2align\t{}", align.max(1).trailing_zeros())
        }
    }

    pub fn rodata_section(self) -> &'static str {
        if self.is_darwin() {
            ".section\t__DATA,__const"
        } else {
            ".section\t.rodata"
        }
    }
}

/// Emit the whole translation unit: functions in declaration order, then
/// globals, synthesized static-local globals, and the string pool.
pub fn emit_program<W: io::Write>(
    prog: &Program,
    ctx: &Context,
    funcs: &[FuncIr],
    target: Target,
    out: &mut W,
) -> CcResult<()> {
    let mut w = AsmWriter::new(out, target.comment_prefix());
    if target.arch == Arch::X64 {
        w.raw(".intel_syntax noprefix")?;
    }

    let cfg = match target.arch {
        Arch::X64 => x64::CONFIG,
        Arch::Aarch64 => aarch64::CONFIG,
    };

    for decl in &prog.decls {
        match decl {
            Declaration::Defun(func) => {
                let Some(fir) = funcs.iter().find(|f| f.name == func.name) else {
                    continue;
                };
                let ra = rcc_ir::allocate(fir, &cfg);
                log::debug!(
                    "emit {}: frame {} bytes",
                    ctx.interner.resolve(fir.name),
                    ra.frame_size
                );
                match target.arch {
                    Arch::X64 => x64::emit_defun(&mut w, ctx, fir, &ra, target)?,
                    Arch::Aarch64 => aarch64::emit_defun(&mut w, ctx, fir, &ra, target)?,
                }
            }
            Declaration::VarDecl { names } => {
                w.blank()?;
                for &name in names {
                    data::emit_varinfo(&mut w, ctx, prog, name, target)?;
                }
            }
        }
    }

    if !prog.static_globals.is_empty() {
        w.blank()?;
        for &name in &prog.static_globals {
            data::emit_varinfo(&mut w, ctx, prog, name, target)?;
        }
    }

    data::emit_string_pool(&mut w, ctx, prog, target)?;
    Ok(())
}
