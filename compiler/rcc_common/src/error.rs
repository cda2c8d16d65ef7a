//! Error handling utilities for the rcc compiler

use crate::source::SourceLoc;
use thiserror::Error;

/// The main error type for the rcc compiler. One variant per pipeline stage;
/// the first error aborts the translation unit.
#[derive(Error, Debug, Clone)]
pub enum CcError {
    #[error("{message}")]
    Lex { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    Parse { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    Sema { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    ConstEval { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    Ir { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    Emit { message: String, loc: Option<SourceLoc> },

    #[error("{message}")]
    Io { message: String },
}

/// Result type alias for rcc compiler operations
pub type CcResult<T> = Result<T, CcError>;

impl CcError {
    pub fn lex_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::Lex { message: message.into(), loc }
    }

    pub fn parse_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::Parse { message: message.into(), loc }
    }

    pub fn sema_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::Sema { message: message.into(), loc }
    }

    pub fn const_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::ConstEval { message: message.into(), loc }
    }

    pub fn ir_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::Ir { message: message.into(), loc }
    }

    pub fn emit_error(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self::Emit { message: message.into(), loc }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Lex { message, .. }
            | Self::Parse { message, .. }
            | Self::Sema { message, .. }
            | Self::ConstEval { message, .. }
            | Self::Ir { message, .. }
            | Self::Emit { message, .. }
            | Self::Io { message } => message,
        }
    }

    pub fn loc(&self) -> Option<&SourceLoc> {
        match self {
            Self::Lex { loc, .. }
            | Self::Parse { loc, .. }
            | Self::Sema { loc, .. }
            | Self::ConstEval { loc, .. }
            | Self::Ir { loc, .. }
            | Self::Emit { loc, .. } => loc.as_ref(),
            Self::Io { .. } => None,
        }
    }
}
