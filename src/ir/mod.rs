//! Intermediate representation for affine loop programs.
//!
//! - `expr`: affine expressions keyed by induction-variable identity
//! - `ops`: functions, blocks and the closed set of operations
//! - `interp`: a reference interpreter used to compare program behavior

pub mod expr;
pub mod interp;
pub mod ops;

pub use expr::{AffineExpr, IvId, SymbolId};
pub use interp::{ArrayBuffer, Interpreter, Memory};
pub use ops::*;
