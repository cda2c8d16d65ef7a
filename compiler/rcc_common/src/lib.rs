//! Shared utilities and error types for the rcc compiler
//!
//! This crate provides common functionality used across all compiler stages:
//! - Interned identifiers
//! - Source line tracking
//! - Error types and the diagnostic renderer

pub mod diagnostics;
pub mod error;
pub mod intern;
pub mod source;

pub use diagnostics::*;
pub use error::*;
pub use intern::*;
pub use source::*;
