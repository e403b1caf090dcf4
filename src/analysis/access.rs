//! Memory access extraction.
//!
//! Every assignment contributes its array loads (left to right) followed by
//! its store, which is the order they execute in. Accesses inside opaque
//! regions are included; opaque ops themselves are not modeled as accesses.

use crate::ir::expr::{AffineExpr, IvId};
use crate::ir::ops::{AffineFor, ArrayRef, Block, Op, StmtId};
use crate::utils::location::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
}

/// One array access of one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccess {
    pub stmt: StmtId,
    pub array: String,
    pub indices: Vec<AffineExpr>,
    pub kind: AccessKind,
    /// Induction variables of all enclosing loops, outermost first
    pub enclosing: Vec<IvId>,
    /// Position in execution order among the collected accesses
    pub order: usize,
    pub span: Span,
}

impl MemoryAccess {
    pub fn is_write(&self) -> bool {
        self.kind == AccessKind::Write
    }

    /// Whether the loop over `iv` encloses this access.
    pub fn is_enclosed_by(&self, iv: IvId) -> bool {
        self.enclosing.contains(&iv)
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        };
        write!(f, "{} {} of {}", self.stmt, kind, self.array)
    }
}

struct Collector {
    accesses: Vec<MemoryAccess>,
    enclosing: Vec<IvId>,
}

impl Collector {
    fn push(&mut self, stmt: StmtId, r: &ArrayRef, kind: AccessKind, span: Span) {
        let order = self.accesses.len();
        self.accesses.push(MemoryAccess {
            stmt,
            array: r.array.clone(),
            indices: r.indices.clone(),
            kind,
            enclosing: self.enclosing.clone(),
            order,
            span,
        });
    }

    fn visit_block(&mut self, block: &Block) {
        for op in &block.ops {
            match op {
                Op::For(for_op) => self.visit_loop(for_op),
                Op::Assign(assign) => {
                    for load in assign.value.loads() {
                        self.push(assign.id, load, AccessKind::Read, assign.span);
                    }
                    self.push(assign.id, &assign.target, AccessKind::Write, assign.span);
                }
                Op::Opaque(opaque) => {
                    for region in &opaque.regions {
                        self.visit_block(region);
                    }
                }
            }
        }
    }

    fn visit_loop(&mut self, for_op: &AffineFor) {
        self.enclosing.push(for_op.header.iv);
        self.visit_block(&for_op.body);
        self.enclosing.pop();
    }
}

/// Accesses of a block whose enclosing loops are `outer`.
pub fn block_accesses(block: &Block, outer: &[IvId]) -> Vec<MemoryAccess> {
    let mut collector = Collector { accesses: Vec::new(), enclosing: outer.to_vec() };
    collector.visit_block(block);
    collector.accesses
}

/// Accesses of a loop (its own induction variable included in every
/// access's enclosing list) whose enclosing loops are `outer`.
pub fn loop_accesses(for_op: &AffineFor, outer: &[IvId]) -> Vec<MemoryAccess> {
    let mut collector = Collector { accesses: Vec::new(), enclosing: outer.to_vec() };
    collector.visit_loop(for_op);
    collector.accesses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{Assign, BinaryOp, ComputeExpr, Function, LoopHeader};

    #[test]
    fn test_execution_order() {
        // for i { A[i] = B[i] + A[i + 1]; }
        let mut func = Function::new("f");
        let i = func.add_iv("i");
        let at = |name: &str, c: i64| ArrayRef {
            array: name.to_string(),
            indices: vec![AffineExpr::iv(i).plus(c)],
        };
        let assign = Assign {
            id: StmtId(7),
            target: at("A", 0),
            value: ComputeExpr::binary(
                BinaryOp::Add,
                ComputeExpr::Load(at("B", 0)),
                ComputeExpr::Load(at("A", 1)),
            ),
            span: Span::dummy(),
        };
        let for_op = AffineFor::new(
            LoopHeader::new(i, AffineExpr::zero(), AffineExpr::constant(8)),
            Block::with_ops(vec![Op::Assign(assign)]),
        );

        let accesses = loop_accesses(&for_op, &[]);
        let summary: Vec<_> = accesses.iter().map(|a| (a.array.as_str(), a.kind, a.order)).collect();
        assert_eq!(
            summary,
            vec![("B", AccessKind::Read, 0), ("A", AccessKind::Read, 1), ("A", AccessKind::Write, 2)]
        );
        assert!(accesses.iter().all(|a| a.enclosing == vec![i] && a.stmt == StmtId(7)));
        assert!(accesses[2].is_write());
        assert_eq!(accesses[2].to_string(), "S7 write of A");

        let outer = func.add_iv("o");
        let nested = block_accesses(&for_op.body, &[outer, i]);
        assert!(nested.iter().all(|a| a.is_enclosed_by(outer) && a.is_enclosed_by(i)));
    }
}
