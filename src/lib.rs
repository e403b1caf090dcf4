//! # Affine Interchange - Dependence-Checked Loop Interchange
//!
//! A loop interchange pass for affine loop nests:
//! - Loop nest collection over a structured affine IR
//! - Dependence direction vectors from a pluggable oracle
//! - Permutability checking of adjacent loop pairs
//! - In-place header exchange and a best-effort pass driver
//!
//! ## Architecture
//!
//! ```text
//! Source → Frontend → IR → Nest Collector → Permutability Checker → Interchange → Printer
//!                                                  ↑
//!                                          Dependence Oracle
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use affine_interchange::prelude::*;
//!
//! let source = r#"
//!     func transpose(A[N][M], B[M][N]) {
//!         for i = 0 to N {
//!             for j = 0 to M {
//!                 A[i][j] = B[j][i];
//!             }
//!         }
//!     }
//! "#;
//!
//! let mut program = affine_interchange::parse(source)?;
//! let pass = LoopInterchangePass::new(InterchangeOptions::default());
//! let report = pass.run_on_function(&mut program.functions[0])?;
//! println!("{}", affine_interchange::utils::print_program(&program));
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod frontend;
pub mod ir;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{
        collect, DependenceEdge, DependenceKind, DependenceOracle, Direction, DirectionVector, LoopNest,
        RecordedOracle, SubscriptOracle,
    };
    pub use crate::frontend::{parse, parse_function};
    pub use crate::ir::{AffineExpr, Function, IvId, Op, Program, StmtId};
    pub use crate::transform::{
        FunctionPass, Interchange, InterchangeOptions, Legality, LoopInterchangePass, PassPipeline, PassReport,
        PermutabilityChecker, SlotSelection,
    };
    pub use crate::utils::errors::*;
}

use anyhow::Result;

/// Main entry point for parsing source code.
pub fn parse(source: &str) -> Result<ir::Program> {
    frontend::parse(source)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
