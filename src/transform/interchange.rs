//! Loop interchange transformation.
//!
//! Interchange swaps two adjacent loops of a perfectly nested pair:
//!
//! ```text
//! for i = 0 to N {            for j = 0 to M {
//!   for j = 0 to M {    =>      for i = 0 to N {
//!     A[i][j] = B[j][i];          A[i][j] = B[j][i];
//!   }                           }
//! }                           }
//! ```
//!
//! Only the two headers move. Induction variables keep their identity, so
//! the body is re-homed under the new inner loop without any rewriting.

use crate::analysis::{DependenceOracle, LoopNest, SubscriptOracle};
use crate::ir::ops::{AffineFor, Function, Op};
use crate::transform::legality::{Legality, PermutabilityChecker, StructuralIssue};
use crate::utils::errors::InterchangeError;
use log::info;

/// Checked interchange of adjacent loops.
#[derive(Debug, Clone)]
pub struct Interchange<O = SubscriptOracle> {
    checker: PermutabilityChecker<O>,
}

impl Default for Interchange<SubscriptOracle> {
    fn default() -> Self {
        Self::new(SubscriptOracle)
    }
}

impl<O: DependenceOracle> Interchange<O> {
    /// Create a new interchange transformation using `oracle`.
    pub fn new(oracle: O) -> Self {
        Self { checker: PermutabilityChecker::new(oracle) }
    }

    pub fn with_strict_unknown(self, strict: bool) -> Self {
        Self { checker: self.checker.with_strict_unknown(strict) }
    }

    pub fn checker(&self) -> &PermutabilityChecker<O> {
        &self.checker
    }

    /// See [`PermutabilityChecker::check`].
    pub fn check(&self, func: &Function, nest: &LoopNest, slot: usize) -> Legality {
        self.checker.check(func, nest, slot)
    }

    /// Swap slots `slot` and `slot + 1` of `nest` in `func`.
    ///
    /// Re-checks legality first; on any failure neither `func` nor `nest`
    /// is modified. On success `nest` reflects the new order.
    pub fn apply(&self, func: &mut Function, nest: &mut LoopNest, slot: usize) -> Result<(), InterchangeError> {
        self.checker.check(func, nest, slot).into_result()?;

        let stale = || InterchangeError::StructuralUnsupported(StructuralIssue::StaleNest { slot });
        let outer = func.body.for_op_mut(&nest.slots()[slot].path).ok_or_else(stale)?;
        let AffineFor { header, body, span } = outer;
        match body.ops.as_mut_slice() {
            [Op::For(inner)] => {
                std::mem::swap(header, &mut inner.header);
                std::mem::swap(span, &mut inner.span);
            }
            _ => return Err(stale()),
        }
        nest.swap_headers(slot);

        info!(
            "interchanged loops '{}' and '{}' in '{}' (nest {})",
            func.iv_name(nest.slots()[slot + 1].header.iv),
            func.iv_name(nest.slots()[slot].header.iv),
            func.name,
            nest.describe(func)
        );
        Ok(())
    }
}
