//! Analyses feeding loop interchange.

pub mod access;
pub mod dependence;
pub mod nest;

pub use access::{block_accesses, loop_accesses, AccessKind, MemoryAccess};
pub use dependence::{
    banerjee_test, dependence_edges, gcd_test, DependenceEdge, DependenceKind, DependenceOracle,
    Direction, DirectionVector, RecordedOracle, SubscriptOracle,
};
pub use nest::{collect, innermost_loops, loop_nests, LoopNest, LoopNests, NestSlot};

use crate::ir::ops::Function;

/// Every dependence edge among the accesses of `nest`, with directions over
/// all of its loops.
pub fn nest_dependences<O: DependenceOracle + ?Sized>(
    func: &Function,
    nest: &LoopNest,
    oracle: &O,
) -> Vec<DependenceEdge> {
    func.body
        .for_op(&nest.outermost().path)
        .map(|outer| dependence_edges(oracle, &loop_accesses(outer, &[]), &nest.headers()))
        .unwrap_or_default()
}
