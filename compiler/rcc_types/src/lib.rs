//! C type representation for the rcc compiler
//!
//! Types are small owned trees; struct bodies live in a side table and are
//! compared by index identity so that forward references resolve once the
//! tag is completed.

pub mod table;
pub mod types;

pub use table::*;
pub use types::*;
