//! Loop nest discovery.
//!
//! A loop nest is the chain of loops enclosing an innermost loop (a loop
//! whose body, including the regions of opaque ops inside it, contains no
//! further loop), ordered outermost to innermost. Every innermost loop in a
//! body yields exactly one nest, so nests may share their outer loops.
//!
//! [`LoopNests`] produces nests lazily with an explicit stack, in post-order:
//! a nest is yielded once the innermost loop's body has been fully visited.

use crate::ir::expr::IvId;
use crate::ir::ops::{AffineFor, Block, Function, LoopHeader, Op, OpPath};
use crate::utils::location::Span;
use std::fmt;

/// One loop of a nest: where it lives and the header it had when observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestSlot {
    pub path: OpPath,
    pub header: LoopHeader,
    pub span: Span,
}

impl NestSlot {
    fn observe(path: OpPath, for_op: &AffineFor) -> Self {
        Self { path, header: for_op.header.clone(), span: for_op.span }
    }
}

/// Loops from outermost to innermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopNest {
    slots: Vec<NestSlot>,
}

impl LoopNest {
    /// The chain of loops enclosing (and including) the loop at `path`.
    pub fn enclosing(func: &Function, path: &OpPath) -> Option<Self> {
        let mut slots = Vec::new();
        let mut block = &func.body;
        for (depth, &(op_index, region)) in path.steps.iter().enumerate() {
            let op = block.ops.get(op_index)?;
            if let Op::For(for_op) = op {
                let prefix = OpPath { steps: path.steps[..depth].to_vec(), index: op_index };
                slots.push(NestSlot::observe(prefix, for_op));
            }
            block = op.regions().get(region)?;
        }
        match block.ops.get(path.index)? {
            Op::For(for_op) => slots.push(NestSlot::observe(path.clone(), for_op)),
            Op::Assign(_) | Op::Opaque(_) => return None,
        }
        Some(Self { slots })
    }

    /// Number of loops in the nest.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[NestSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&NestSlot> {
        self.slots.get(index)
    }

    /// Headers in nest order, as last observed.
    pub fn headers(&self) -> Vec<LoopHeader> {
        self.slots.iter().map(|s| s.header.clone()).collect()
    }

    pub fn ivs(&self) -> Vec<IvId> {
        self.slots.iter().map(|s| s.header.iv).collect()
    }

    pub fn outermost(&self) -> &NestSlot {
        &self.slots[0]
    }

    pub fn innermost(&self) -> &NestSlot {
        &self.slots[self.slots.len() - 1]
    }

    /// Re-read every header from the live IR. Returns `false` (leaving the
    /// nest untouched) if some path no longer names a loop.
    pub fn refresh(&mut self, func: &Function) -> bool {
        let mut headers = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            match func.body.for_op(&slot.path) {
                Some(for_op) => headers.push(for_op.header.clone()),
                None => return false,
            }
        }
        for (slot, header) in self.slots.iter_mut().zip(headers) {
            slot.header = header;
        }
        true
    }

    /// Exchange the observed headers of slots `i` and `i + 1`. Paths stay,
    /// since interchange swaps headers in place.
    pub(crate) fn swap_headers(&mut self, i: usize) {
        let (left, right) = self.slots.split_at_mut(i + 1);
        std::mem::swap(&mut left[i].header, &mut right[0].header);
        std::mem::swap(&mut left[i].span, &mut right[0].span);
    }

    /// Render as `i -> j -> k` with the function's names.
    pub fn describe(&self, func: &Function) -> String {
        self.slots
            .iter()
            .map(|s| func.iv_name(s.header.iv))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for LoopNest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nest[")?;
        for (k, slot) in self.slots.iter().enumerate() {
            if k > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%i{}@{}", slot.header.iv.0, slot.path)?;
        }
        write!(f, "]")
    }
}

enum Frame<'a> {
    /// Ops of a block still to visit.
    Region {
        block: &'a Block,
        owner: Option<OpPath>,
        region: usize,
        next: usize,
    },
    /// A loop whose body is being visited.
    Loop {
        path: OpPath,
        for_op: &'a AffineFor,
        has_inner: bool,
    },
}

/// Lazy post-order producer of loop nests over a block.
pub struct LoopNests<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> LoopNests<'a> {
    pub fn new(body: &'a Block) -> Self {
        Self {
            stack: vec![Frame::Region { block: body, owner: None, region: 0, next: 0 }],
        }
    }

    fn enter(&mut self, block: &'a Block, path: OpPath) {
        match &block.ops[path.index] {
            Op::For(for_op) => {
                self.stack.push(Frame::Loop { path: path.clone(), for_op, has_inner: false });
                self.stack.push(Frame::Region {
                    block: &for_op.body,
                    owner: Some(path),
                    region: 0,
                    next: 0,
                });
            }
            Op::Opaque(opaque) => {
                for (region, child) in opaque.regions.iter().enumerate().rev() {
                    self.stack.push(Frame::Region {
                        block: child,
                        owner: Some(path.clone()),
                        region,
                        next: 0,
                    });
                }
            }
            Op::Assign(_) => {}
        }
    }

    /// Pop a finished loop; returns its nest if it is innermost.
    fn finish_loop(&mut self) -> Option<LoopNest> {
        let (path, for_op, has_inner) = match self.stack.pop()? {
            Frame::Loop { path, for_op, has_inner } => (path, for_op, has_inner),
            Frame::Region { .. } => return None,
        };

        let nest = if has_inner {
            None
        } else {
            let mut slots: Vec<NestSlot> = self
                .stack
                .iter()
                .filter_map(|frame| match frame {
                    Frame::Loop { path, for_op, .. } => Some(NestSlot::observe(path.clone(), for_op)),
                    Frame::Region { .. } => None,
                })
                .collect();
            slots.push(NestSlot::observe(path, for_op));
            Some(LoopNest { slots })
        };

        if let Some(Frame::Loop { has_inner, .. }) = self
            .stack
            .iter_mut()
            .rev()
            .find(|frame| matches!(frame, Frame::Loop { .. }))
        {
            *has_inner = true;
        }
        nest
    }
}

impl Iterator for LoopNests<'_> {
    type Item = LoopNest;

    fn next(&mut self) -> Option<LoopNest> {
        loop {
            let step = match self.stack.last_mut()? {
                Frame::Region { block, owner, region, next } if *next < block.ops.len() => {
                    let index = *next;
                    *next += 1;
                    let path = match owner {
                        Some(owner) => owner.child(*region, index),
                        None => OpPath::root(index),
                    };
                    Step::Visit(*block, path)
                }
                Frame::Region { .. } => Step::LeaveRegion,
                Frame::Loop { .. } => Step::LeaveLoop,
            };
            match step {
                Step::Visit(block, path) => self.enter(block, path),
                Step::LeaveRegion => {
                    self.stack.pop();
                }
                Step::LeaveLoop => {
                    if let Some(nest) = self.finish_loop() {
                        return Some(nest);
                    }
                }
            }
        }
    }
}

enum Step<'a> {
    Visit(&'a Block, OpPath),
    LeaveRegion,
    LeaveLoop,
}

/// Lazily enumerate the loop nests of a block.
pub fn loop_nests(body: &Block) -> LoopNests<'_> {
    LoopNests::new(body)
}

/// Collect every loop nest of a block, in post-order.
pub fn collect(body: &Block) -> Vec<LoopNest> {
    loop_nests(body).collect()
}

/// Paths of all innermost loops, in post-order.
pub fn innermost_loops(body: &Block) -> Vec<OpPath> {
    loop_nests(body).map(|nest| nest.innermost().path.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::AffineExpr;
    use crate::ir::ops::{ArrayRef, Assign, ComputeExpr, OpaqueOp, StmtId};

    struct Builder {
        func: Function,
        next_stmt: u64,
    }

    impl Builder {
        fn new() -> Self {
            Self { func: Function::new("t"), next_stmt: 0 }
        }

        fn for_loop(&mut self, name: &str, body: Vec<Op>) -> Op {
            let iv = self.func.add_iv(name);
            let header = LoopHeader::new(iv, AffineExpr::zero(), AffineExpr::constant(4));
            Op::For(AffineFor::new(header, Block::with_ops(body)))
        }

        fn stmt(&mut self) -> Op {
            self.next_stmt += 1;
            Op::Assign(Assign {
                id: StmtId(self.next_stmt),
                target: ArrayRef { array: "A".into(), indices: vec![] },
                value: ComputeExpr::Int(1),
                span: Span::dummy(),
            })
        }
    }

    fn names(func: &Function, nests: &[LoopNest]) -> Vec<String> {
        nests.iter().map(|n| n.describe(func)).collect()
    }

    #[test]
    fn test_empty_body() {
        assert!(collect(&Block::new()).is_empty());
    }

    #[test]
    fn test_every_innermost_loop_is_recorded() {
        // for i { for j { s } ; for k { s } } ; for l { s }
        let mut b = Builder::new();
        let s1 = b.stmt();
        let j = b.for_loop("j", vec![s1]);
        let s2 = b.stmt();
        let k = b.for_loop("k", vec![s2]);
        let i = b.for_loop("i", vec![j, k]);
        let s3 = b.stmt();
        let l = b.for_loop("l", vec![s3]);
        b.func.body = Block::with_ops(vec![i, l]);

        let nests = collect(&b.func.body);
        assert_eq!(names(&b.func, &nests), vec!["i -> j", "i -> k", "l"]);
        assert_eq!(nests[1].innermost().path, OpPath::root(0).child(0, 1));
        assert_eq!(
            innermost_loops(&b.func.body),
            vec![OpPath::root(0).child(0, 0), OpPath::root(0).child(0, 1), OpPath::root(1)]
        );
    }

    #[test]
    fn test_descends_into_opaque_regions() {
        let mut b = Builder::new();
        let s = b.stmt();
        let j = b.for_loop("j", vec![s]);
        let region = Op::Opaque(OpaqueOp {
            name: "region".into(),
            operands: vec![],
            has_side_effects: false,
            regions: vec![Block::new(), Block::with_ops(vec![j])],
            span: Span::dummy(),
        });
        let i = b.for_loop("i", vec![region]);
        b.func.body = Block::with_ops(vec![i]);

        let nests = collect(&b.func.body);
        assert_eq!(names(&b.func, &nests), vec!["i -> j"]);
        let inner = &nests[0].innermost().path;
        assert_eq!(inner, &OpPath::root(0).child(0, 0).child(1, 0));
        assert!(b.func.body.for_op(inner).is_some());
    }

    #[test]
    fn test_is_lazy() {
        let mut b = Builder::new();
        let s1 = b.stmt();
        let s2 = b.stmt();
        let first = b.for_loop("i", vec![s1]);
        let second = b.for_loop("j", vec![s2]);
        b.func.body = Block::with_ops(vec![first, second]);

        let mut nests = loop_nests(&b.func.body);
        assert_eq!(nests.next().map(|n| n.describe(&b.func)), Some("i".to_string()));
        assert_eq!(nests.next().map(|n| n.describe(&b.func)), Some("j".to_string()));
        assert!(nests.next().is_none());
        assert!(nests.next().is_none());
    }

    #[test]
    fn test_enclosing_and_refresh() {
        let mut b = Builder::new();
        let s = b.stmt();
        let j = b.for_loop("j", vec![s]);
        let i = b.for_loop("i", vec![j]);
        b.func.body = Block::with_ops(vec![i]);

        let inner = OpPath::root(0).child(0, 0);
        let mut nest = LoopNest::enclosing(&b.func, &inner).unwrap();
        assert_eq!(nest, collect(&b.func.body)[0]);

        if let Some(for_op) = b.func.body.for_op_mut(&inner) {
            for_op.header.step = 2;
        }
        assert!(nest.refresh(&b.func));
        assert_eq!(nest.innermost().header.step, 2);

        b.func.body.ops.clear();
        assert!(!nest.refresh(&b.func));
        assert_eq!(nest.depth(), 2);
    }
}
