//! Permutability check for two adjacent loops of a nest.
//!
//! Swapping slots `i` and `i + 1` is legal when the pair is perfectly
//! nested, rectangular, free of ordering-sensitive effects, and no
//! dependence would point backward after the exchange. For a dependence
//! with components `(o, n)` at the two slots, the swapped pair `(n, o)`
//! must stay lexicographically non-negative:
//!
//! ```text
//!   illegal  <=>  n = '>'  or  (n in {'=', '*'} and o = '>')
//! ```

use crate::analysis::{dependence_edges, loop_accesses, DependenceEdge, DependenceOracle, Direction, LoopNest};
use crate::ir::ops::{AffineFor, Block, Function, Op};
use crate::utils::errors::InterchangeError;
use log::debug;
use std::fmt;

/// Shape problems that make a swap unsupported regardless of dependences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralIssue {
    /// The nest has no slot pair starting at `slot`
    SlotOutOfRange { slot: usize, depth: usize },
    /// The nest no longer matches the function body
    StaleNest { slot: usize },
    /// The outer loop's body holds something besides the inner loop
    ImperfectNest { outer: String },
    /// A bound of one loop mentions the other loop's variable
    NonRectangular { outer: String, inner: String },
    /// The loop carries an ordering-sensitive side effect
    OrderedLoop { iv: String },
    /// A side-effecting opaque op sits inside the pair
    OpaqueSideEffect { name: String },
}

impl fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralIssue::SlotOutOfRange { slot, depth } => {
                write!(f, "slot {} has no inner neighbor in a nest of depth {}", slot, depth)
            }
            StructuralIssue::StaleNest { slot } => {
                write!(f, "loop at slot {} no longer matches the function body", slot)
            }
            StructuralIssue::ImperfectNest { outer } => {
                write!(f, "body of loop '{}' is not a single loop", outer)
            }
            StructuralIssue::NonRectangular { outer, inner } => {
                write!(f, "bounds of loops '{}' and '{}' depend on each other", outer, inner)
            }
            StructuralIssue::OrderedLoop { iv } => write!(f, "loop '{}' is ordered", iv),
            StructuralIssue::OpaqueSideEffect { name } => {
                write!(f, "opaque operation '{}' has side effects", name)
            }
        }
    }
}

/// Why a swap was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IllegalReason {
    NoCandidate { depth: usize },
    Structural(StructuralIssue),
    Dependence(DependenceEdge),
}

impl fmt::Display for IllegalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IllegalReason::NoCandidate { depth } => write!(f, "nest has {} loop(s)", depth),
            IllegalReason::Structural(issue) => write!(f, "{}", issue),
            IllegalReason::Dependence(edge) => write!(f, "dependence {} would be reversed", edge),
        }
    }
}

impl From<IllegalReason> for InterchangeError {
    fn from(reason: IllegalReason) -> Self {
        match reason {
            IllegalReason::NoCandidate { depth } => InterchangeError::NoCandidate { depth },
            IllegalReason::Structural(issue) => InterchangeError::StructuralUnsupported(issue),
            IllegalReason::Dependence(edge) => InterchangeError::IllegalInterchange(edge),
        }
    }
}

/// Verdict of [`PermutabilityChecker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Legality {
    Legal,
    Illegal(IllegalReason),
}

impl Legality {
    pub fn is_legal(&self) -> bool {
        matches!(self, Legality::Legal)
    }

    pub fn reason(&self) -> Option<&IllegalReason> {
        match self {
            Legality::Legal => None,
            Legality::Illegal(reason) => Some(reason),
        }
    }

    /// `Ok(())` when legal, the matching error otherwise.
    pub fn into_result(self) -> Result<(), InterchangeError> {
        match self {
            Legality::Legal => Ok(()),
            Legality::Illegal(reason) => Err(reason.into()),
        }
    }
}

/// Whether a dependence with components `outer`, `inner` at the swapped
/// slots forbids the swap.
///
/// With `strict_unknown`, a pair is also rejected if expanding `*` could
/// produce `(<, >)` or `(>, <)`.
pub fn swap_reverses(outer: Direction, inner: Direction, strict_unknown: bool) -> bool {
    use Direction::*;
    let reversed = inner == Gt || (matches!(inner, Eq | Star) && outer == Gt);
    if reversed || !strict_unknown {
        return reversed;
    }
    (outer.may_be_lt() && inner.may_be_gt()) || (outer.may_be_gt() && inner.may_be_lt())
}

/// Decides whether two adjacent loops of a nest may be exchanged.
#[derive(Debug, Clone)]
pub struct PermutabilityChecker<O> {
    oracle: O,
    strict_unknown: bool,
}

impl<O: DependenceOracle> PermutabilityChecker<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle, strict_unknown: false }
    }

    pub fn with_strict_unknown(mut self, strict: bool) -> Self {
        self.strict_unknown = strict;
        self
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn strict_unknown(&self) -> bool {
        self.strict_unknown
    }

    /// Check whether slots `slot` and `slot + 1` of `nest` may be swapped.
    /// Reads `func` only.
    pub fn check(&self, func: &Function, nest: &LoopNest, slot: usize) -> Legality {
        let verdict = match self.check_inner(func, nest, slot) {
            Ok(()) => Legality::Legal,
            Err(reason) => Legality::Illegal(reason),
        };
        debug!(
            "interchange check for nest {} at slot {}: {}",
            nest.describe(func),
            slot,
            match verdict.reason() {
                None => "legal".to_string(),
                Some(reason) => format!("illegal, {}", reason),
            }
        );
        verdict
    }

    fn check_inner(&self, func: &Function, nest: &LoopNest, slot: usize) -> Result<(), IllegalReason> {
        let depth = nest.depth();
        if depth < 2 {
            return Err(IllegalReason::NoCandidate { depth });
        }
        if slot >= depth - 1 {
            return Err(structural(StructuralIssue::SlotOutOfRange { slot, depth }));
        }

        let (outer_slot, inner_slot) = (&nest.slots()[slot], &nest.slots()[slot + 1]);
        let outer = func
            .body
            .for_op(&outer_slot.path)
            .filter(|l| l.header == outer_slot.header)
            .ok_or_else(|| structural(StructuralIssue::StaleNest { slot }))?;
        let inner = func
            .body
            .for_op(&inner_slot.path)
            .filter(|l| l.header == inner_slot.header)
            .ok_or_else(|| structural(StructuralIssue::StaleNest { slot: slot + 1 }))?;

        let outer_name = func.iv_name(outer.header.iv).to_string();
        let inner_name = func.iv_name(inner.header.iv).to_string();

        if outer.sole_child_loop().is_none() || inner_slot.path != outer_slot.path.child(0, 0) {
            return Err(structural(StructuralIssue::ImperfectNest { outer: outer_name }));
        }
        if outer.header.bounds_reference(inner.header.iv) || inner.header.bounds_reference(outer.header.iv) {
            return Err(structural(StructuralIssue::NonRectangular { outer: outer_name, inner: inner_name }));
        }
        for (for_op, name) in [(outer, outer_name), (inner, inner_name)] {
            if for_op.header.ordered {
                return Err(structural(StructuralIssue::OrderedLoop { iv: name }));
            }
        }
        if let Some(name) = side_effecting_opaque(&inner.body) {
            return Err(structural(StructuralIssue::OpaqueSideEffect { name: name.to_string() }));
        }

        let ivs = nest.ivs();
        let accesses = loop_accesses(outer, &ivs[..slot]);
        let levels = nest.headers();
        for edge in dependence_edges(&self.oracle, &accesses, &levels) {
            let (o, n) = (edge.direction.get(slot), edge.direction.get(slot + 1));
            if swap_reverses(o, n, self.strict_unknown) {
                return Err(IllegalReason::Dependence(edge));
            }
        }
        Ok(())
    }
}

fn structural(issue: StructuralIssue) -> IllegalReason {
    IllegalReason::Structural(issue)
}

/// Name of the first side-effecting opaque op in `block`, searching nested
/// loops and regions.
fn side_effecting_opaque(block: &Block) -> Option<&str> {
    block.ops.iter().find_map(|op| match op {
        Op::For(AffineFor { body, .. }) => side_effecting_opaque(body),
        Op::Assign(_) => None,
        Op::Opaque(opaque) if opaque.has_side_effects => Some(opaque.name.as_str()),
        Op::Opaque(opaque) => opaque.regions.iter().find_map(side_effecting_opaque),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{collect, RecordedOracle, SubscriptOracle};
    use crate::ir::expr::AffineExpr;
    use crate::ir::ops::{ArrayRef, Assign, ComputeExpr, LoopHeader, OpaqueOp, StmtId};
    use crate::utils::location::Span;
    use Direction::*;

    #[test]
    fn test_pair_rule_table() {
        assert!(swap_reverses(Gt, Star, false));
        assert!(swap_reverses(Eq, Gt, false));
        assert!(swap_reverses(Lt, Gt, false));
        assert!(swap_reverses(Gt, Eq, false));
        assert!(!swap_reverses(Lt, Star, false));
        assert!(!swap_reverses(Eq, Lt, false));
        assert!(!swap_reverses(Eq, Eq, false));
        assert!(!swap_reverses(Star, Star, false));
        assert!(!swap_reverses(Gt, Lt, false));
    }

    #[test]
    fn test_strict_unknown() {
        assert!(swap_reverses(Star, Star, true));
        assert!(swap_reverses(Lt, Star, true));
        assert!(swap_reverses(Star, Lt, true));
        assert!(!swap_reverses(Eq, Star, true));
        assert!(!swap_reverses(Star, Eq, true));
        assert!(!swap_reverses(Lt, Lt, true));
    }

    /// `for i in [0, 4) { for j in [0, upper_j) { body } }`
    fn two_loops(body: Vec<Op>, inner_upper: impl FnOnce(&AffineExpr) -> AffineExpr) -> Function {
        let mut func = Function::new("t");
        let i = func.add_iv("i");
        let j = func.add_iv("j");
        let upper_j = inner_upper(&AffineExpr::iv(i));
        let inner = AffineFor::new(LoopHeader::new(j, AffineExpr::zero(), upper_j), Block::with_ops(body));
        let outer = AffineFor::new(
            LoopHeader::new(i, AffineExpr::zero(), AffineExpr::constant(4)),
            Block::with_ops(vec![Op::For(inner)]),
        );
        func.body = Block::with_ops(vec![Op::For(outer)]);
        func
    }

    fn touch() -> Op {
        Op::Assign(Assign {
            id: StmtId(0),
            target: ArrayRef { array: "A".into(), indices: vec![AffineExpr::zero()] },
            value: ComputeExpr::Load(ArrayRef { array: "A".into(), indices: vec![AffineExpr::zero()] }),
            span: Span::dummy(),
        })
    }

    #[test]
    fn test_recorded_vectors() {
        let func = two_loops(vec![touch()], |_| AffineExpr::constant(4));
        let nest = &collect(&func.body)[0];

        let backward = RecordedOracle::new().with_edge(StmtId(0), StmtId(0), vec![Gt, Star]);
        let verdict = PermutabilityChecker::new(backward).check(&func, nest, 0);
        assert!(matches!(verdict, Legality::Illegal(IllegalReason::Dependence(_))));

        let forward = RecordedOracle::new().with_edge(StmtId(0), StmtId(0), vec![Lt, Star]);
        assert_eq!(PermutabilityChecker::new(forward).check(&func, nest, 0), Legality::Legal);

        let none = RecordedOracle::new();
        assert!(PermutabilityChecker::new(none).check(&func, nest, 0).is_legal());
    }

    #[test]
    fn test_non_rectangular_ignores_dependences() {
        let func = two_loops(vec![touch()], |i| i.clone());
        let nest = &collect(&func.body)[0];
        let verdict = PermutabilityChecker::new(RecordedOracle::new()).check(&func, nest, 0);
        assert!(matches!(
            verdict,
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::NonRectangular { .. }))
        ));
    }

    #[test]
    fn test_structural_rejections() {
        let func = two_loops(vec![touch()], |_| AffineExpr::constant(4));
        let nest = collect(&func.body).remove(0);
        let checker = PermutabilityChecker::new(SubscriptOracle);

        let err = checker.check(&func, &nest, 1).into_result().unwrap_err();
        assert_eq!(
            err,
            InterchangeError::StructuralUnsupported(StructuralIssue::SlotOutOfRange { slot: 1, depth: 2 })
        );

        let mut ordered = func.clone();
        if let Some(l) = ordered.body.for_op_mut(&nest.innermost().path) {
            l.header.ordered = true;
        }
        let mut fresh = nest.clone();
        assert!(fresh.refresh(&ordered));
        assert!(matches!(
            checker.check(&ordered, &fresh, 0),
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::OrderedLoop { .. }))
        ));
        // The old snapshot no longer matches the modified body.
        assert!(matches!(
            checker.check(&ordered, &nest, 0),
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::StaleNest { slot: 1 }))
        ));

        let call = Op::Opaque(OpaqueOp {
            name: "print".into(),
            operands: vec![],
            has_side_effects: true,
            regions: vec![],
            span: Span::dummy(),
        });
        let effects = two_loops(vec![touch(), call], |_| AffineExpr::constant(4));
        let nest = &collect(&effects.body)[0];
        assert!(matches!(
            checker.check(&effects, nest, 0),
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::OpaqueSideEffect { .. }))
        ));
    }

    #[test]
    fn test_slot_at_usize_max() {
        let func = two_loops(vec![touch()], |_| AffineExpr::constant(4));
        let nest = &collect(&func.body)[0];
        let verdict = PermutabilityChecker::new(SubscriptOracle).check(&func, nest, usize::MAX);
        assert_eq!(
            verdict,
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::SlotOutOfRange {
                slot: usize::MAX,
                depth: 2
            }))
        );
    }

    #[test]
    fn test_imperfect_and_shallow() {
        let mut func = two_loops(vec![touch()], |_| AffineExpr::constant(4));
        let nest = collect(&func.body).remove(0);
        if let Some(outer) = func.body.for_op_mut(&nest.outermost().path) {
            outer.body.ops.push(touch());
        }
        let checker = PermutabilityChecker::new(SubscriptOracle);
        assert!(matches!(
            checker.check(&func, &nest, 0),
            Legality::Illegal(IllegalReason::Structural(StructuralIssue::ImperfectNest { .. }))
        ));

        let single = LoopNest::enclosing(&func, &nest.outermost().path).unwrap();
        assert_eq!(
            checker.check(&func, &single, 0),
            Legality::Illegal(IllegalReason::NoCandidate { depth: 1 })
        );
    }
}
