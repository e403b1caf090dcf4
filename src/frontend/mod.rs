//! Frontend: lexer and parser for the loop-nest DSL.
//!
//! The parser produces IR functions directly; there is no separate AST.
//!
//! ## Language Overview
//!
//! ```text
//! func scale(N, M, A[N][M], B[M]) {
//!     for i = 0 to N {
//!         @ordered
//!         for j = 0 to M step 1 {
//!             A[i][j] += B[j] * 2;
//!         }
//!     }
//!     call barrier(A);
//!     region { A[0][0] = 1; }
//! }
//! ```
//!
//! Upper bounds are exclusive. Bounds and subscripts must be affine in the
//! enclosing loop variables and the function's symbols. `@ordered` (or
//! `@reduce`) marks a loop whose iterations must not be reordered; `call`
//! is an opaque side-effecting operation unless annotated `@pure`.

pub mod lexer;
pub mod parser;
pub mod token;

pub use crate::utils::errors::ParseError;
pub use lexer::Lexer;
pub use parser::{to_affine, Parser};
pub use token::{Token, TokenKind};

use crate::ir::ops::{Function, Program};
use crate::utils::errors::{Diagnostic, Error, LexerError};
use crate::utils::location::SourceMap;
use anyhow::{Context, Result};

/// Parse source code into a program.
pub fn parse(source: &str) -> Result<Program> {
    let lexer = Lexer::new(source);
    let mut parser = Parser::new(lexer)?;
    parser.parse_program()
}

/// Parse source code holding exactly one function.
pub fn parse_function(source: &str) -> Result<Function> {
    let mut program = parse(source)?;
    let count = program.functions.len();
    if count != 1 {
        anyhow::bail!("expected exactly one function, found {}", count);
    }
    program.functions.pop().context("expected exactly one function")
}

/// Turn a frontend failure into a diagnostic quoting the offending line.
///
/// Returns `None` when `err` did not come from the lexer or parser.
pub fn diagnose(err: &anyhow::Error, source: &str) -> Option<Diagnostic> {
    let err = if let Some(e) = err.downcast_ref::<ParseError>() {
        Error::from(e.clone())
    } else if let Some(e) = err.downcast_ref::<LexerError>() {
        Error::from(e.clone())
    } else {
        return None;
    };
    Some(err.to_diagnostic(Some(&SourceMap::new(source.to_string()))))
}
