//! rcc — a small C compiler
//!
//! Reads one preprocessed C source file and writes assembly for the selected
//! target. Diagnostics go to stderr; a failing compilation leaves no output
//! file behind.

use anyhow::{Context as _, Result};
use clap::Parser;
use rcc_cli::Target;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// The rcc C compiler
#[derive(Parser)]
#[command(name = "rcc")]
#[command(about = "A small C compiler targeting x86-64 and AArch64")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Input C source file (already preprocessed)
    input: PathBuf,

    /// Output assembly file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target: x86_64-linux, x86_64-macos, aarch64-linux, aarch64-macos
    #[arg(long, default_value = "x86_64-linux")]
    target: String,

    /// Dump the typed AST as JSON instead of compiling
    #[arg(long)]
    dump_ast: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let Some(target) = Target::parse(&cli.target) else {
        anyhow::bail!("unknown target: {}", cli.target);
    };

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;
    let filename = cli.input.display().to_string();

    if cli.dump_ast {
        match rcc_cli::dump_ast(&source, &filename) {
            Ok(json) => {
                println!("{}", json);
                return Ok(ExitCode::SUCCESS);
            }
            Err(err) => {
                eprintln!("{}", rcc_common::render(&err));
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    // Build in memory first so a failed compilation never leaves a partial
    // assembly file behind.
    match rcc_cli::compile_to_string(&source, &filename, target) {
        Ok(asm) => {
            match &cli.output {
                Some(path) => fs::write(path, asm)
                    .with_context(|| format!("cannot write {}", path.display()))?,
                None => {
                    let stdout = std::io::stdout();
                    let mut handle = stdout.lock();
                    handle.write_all(asm.as_bytes()).context("cannot write to stdout")?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{}", rcc_common::render(&err));
            Ok(ExitCode::FAILURE)
        }
    }
}
