//! Utility modules: error types, source locations and the IR printer.

pub mod errors;
pub mod location;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use location::{SourceLocation, SourceMap, Span};
pub use pretty::{print_function, print_program, CodeFormatter};
