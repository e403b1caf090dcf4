//! Dependence analysis for affine array accesses.
//!
//! This module provides:
//! - Direction vectors over the loops of a nest
//! - The [`DependenceOracle`] interface consumed by the legality check
//! - [`SubscriptOracle`]: per-subscript GCD, range and uniform-distance tests
//! - [`RecordedOracle`]: answers from externally supplied vectors
//! - Flow/anti/output classification of the resulting edges

use crate::analysis::access::{AccessKind, MemoryAccess};
use crate::ir::expr::{AffineExpr, IvId};
use crate::ir::ops::{LoopHeader, StmtId};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// Read-after-write (true/flow dependence)
    Flow,
    /// Write-after-read (anti dependence)
    Anti,
    /// Write-after-write (output dependence)
    Output,
}

impl DependenceKind {
    /// Classify a dependence from its source and sink access kinds.
    /// Read/read pairs are not dependences.
    pub fn between(source: AccessKind, sink: AccessKind) -> Option<Self> {
        match (source, sink) {
            (AccessKind::Write, AccessKind::Read) => Some(DependenceKind::Flow),
            (AccessKind::Read, AccessKind::Write) => Some(DependenceKind::Anti),
            (AccessKind::Write, AccessKind::Write) => Some(DependenceKind::Output),
            (AccessKind::Read, AccessKind::Read) => None,
        }
    }

    /// Get short name for the dependence kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Flow => "RAW",
            DependenceKind::Anti => "WAR",
            DependenceKind::Output => "WAW",
        }
    }
}

impl fmt::Display for DependenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DependenceKind::Flow => "flow",
            DependenceKind::Anti => "anti",
            DependenceKind::Output => "output",
        };
        write!(f, "{} ({})", name, self.short_name())
    }
}

/// Direction of a dependence in one loop level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// < (forward dependence, positive distance)
    Lt,
    /// = (same iteration, zero distance)
    Eq,
    /// > (backward dependence, negative distance)
    Gt,
    /// * (unknown/any direction)
    Star,
}

impl Direction {
    /// Get the character representation.
    pub fn to_char(&self) -> char {
        match self {
            Direction::Lt => '<',
            Direction::Eq => '=',
            Direction::Gt => '>',
            Direction::Star => '*',
        }
    }

    /// Compute direction from a distance value (sink minus source).
    pub fn from_distance(dist: i64) -> Direction {
        match dist.cmp(&0) {
            std::cmp::Ordering::Less => Direction::Gt,
            std::cmp::Ordering::Equal => Direction::Eq,
            std::cmp::Ordering::Greater => Direction::Lt,
        }
    }

    /// Combine two directions (union).
    pub fn union(&self, other: &Direction) -> Direction {
        if self == other {
            *self
        } else {
            Direction::Star
        }
    }

    /// The same dependence seen from the sink.
    pub fn reversed(&self) -> Direction {
        match self {
            Direction::Lt => Direction::Gt,
            Direction::Gt => Direction::Lt,
            Direction::Eq => Direction::Eq,
            Direction::Star => Direction::Star,
        }
    }

    /// Whether the actual direction may be `<`.
    pub fn may_be_lt(&self) -> bool {
        matches!(self, Direction::Lt | Direction::Star)
    }

    /// Whether the actual direction may be `>`.
    pub fn may_be_gt(&self) -> bool {
        matches!(self, Direction::Gt | Direction::Star)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// One direction per loop of a nest, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DirectionVector(Vec<Direction>);

impl DirectionVector {
    pub fn new(components: Vec<Direction>) -> Self {
        Self(components)
    }

    /// `len` copies of `dir`.
    pub fn uniform(len: usize, dir: Direction) -> Self {
        Self(vec![dir; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Component at `level`; levels past the end are unknown.
    pub fn get(&self, level: usize) -> Direction {
        self.0.get(level).copied().unwrap_or(Direction::Star)
    }

    pub fn components(&self) -> &[Direction] {
        &self.0
    }

    /// Every component reversed.
    pub fn reversed(&self) -> Self {
        self.0.iter().map(Direction::reversed).collect()
    }

    /// The first component that is not `=`.
    pub fn leading(&self) -> Option<Direction> {
        self.0.iter().copied().find(|d| *d != Direction::Eq)
    }

    /// All components are `=`.
    pub fn is_loop_independent(&self) -> bool {
        self.leading().is_none()
    }

    /// Orient so the source instance executes first: a vector whose first
    /// non-`=` component is `>` describes the reverse dependence.
    pub fn normalized(self) -> Self {
        match self.leading() {
            Some(Direction::Gt) => self.reversed(),
            _ => self,
        }
    }
}

impl FromIterator<Direction> for DirectionVector {
    fn from_iter<T: IntoIterator<Item = Direction>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Direction>> for DirectionVector {
    fn from(components: Vec<Direction>) -> Self {
        Self(components)
    }
}

impl fmt::Display for DirectionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (k, d) in self.0.iter().enumerate() {
            if k > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

/// A dependence between two statements, with its direction over a nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependenceEdge {
    /// Statement of the earlier access
    pub source: StmtId,
    /// Statement of the later access
    pub sink: StmtId,
    /// Array involved in this dependence
    pub array: String,
    pub kind: DependenceKind,
    pub direction: DirectionVector,
}

impl fmt::Display for DependenceEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}] on {} dir={}",
            self.source, self.sink, self.kind, self.array, self.direction
        )
    }
}

/// Answers pairwise dependence queries.
///
/// `levels` are the headers of the nest being examined, outermost first;
/// the returned vector has one component per level. An answer of `None`
/// asserts that the two accesses never touch the same element, so an
/// implementation must only return `None` when it can prove independence.
pub trait DependenceOracle {
    fn query(&self, a: &MemoryAccess, b: &MemoryAccess, levels: &[LoopHeader]) -> Option<DirectionVector>;
}

impl<T: DependenceOracle + ?Sized> DependenceOracle for &T {
    fn query(&self, a: &MemoryAccess, b: &MemoryAccess, levels: &[LoopHeader]) -> Option<DirectionVector> {
        (**self).query(a, b, levels)
    }
}

impl<T: DependenceOracle + ?Sized> DependenceOracle for Box<T> {
    fn query(&self, a: &MemoryAccess, b: &MemoryAccess, levels: &[LoopHeader]) -> Option<DirectionVector> {
        (**self).query(a, b, levels)
    }
}

/// What one subscript dimension says about a pair of accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptTest {
    /// `iv` differs by exactly this much (sink minus source)
    Distance(IvId, i64),
    /// Dependence possible, no usable constraint
    Unknown,
}

/// Subscript-by-subscript dependence tester.
///
/// Each dimension yields an equation `e(I) = f(I')`. Independence is proven
/// by the GCD test, by constant subscripts that differ, or by the range of
/// constant loop bounds. Uniform subscripts (`c*i + k` on both sides) give
/// exact distances; every other level is `*`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptOracle;

impl SubscriptOracle {
    pub fn new() -> Self {
        Self
    }

    fn test_subscript(e: &AffineExpr, f: &AffineExpr, levels: &[LoopHeader]) -> Option<SubscriptTest> {
        if !e.same_symbols(f) {
            return Some(SubscriptTest::Unknown);
        }

        // sum(e_v * I_v) - sum(f_v * I'_v) + (e0 - f0) = 0
        let constant = match e.constant.checked_sub(f.constant) {
            Some(constant) => constant,
            None => return Some(SubscriptTest::Unknown),
        };
        let terms: Vec<(IvId, i64)> = e
            .iv_terms()
            .chain(f.iv_terms().map(|(iv, c)| (iv, -c)))
            .collect();
        if terms.is_empty() {
            return if constant == 0 { Some(SubscriptTest::Unknown) } else { None };
        }

        let coeffs: Vec<i64> = terms.iter().map(|&(_, c)| c).collect();
        let negated = match constant.checked_neg() {
            Some(negated) => negated,
            None => return Some(SubscriptTest::Unknown),
        };
        if !gcd_test(&coeffs, negated) {
            return None;
        }

        let src: Vec<(IvId, i64)> = e.iv_terms().collect();
        let dst: Vec<(IvId, i64)> = f.iv_terms().collect();
        if src.len() == 1 && src == dst {
            let (iv, c) = src[0];
            let dist = match constant.checked_div(c) {
                Some(dist) => dist,
                None => return Some(SubscriptTest::Unknown),
            };
            if let Some((lower, upper)) = constant_bounds(levels, iv) {
                // Iterations of one loop differ by at most upper - lower.
                if i128::from(dist).abs() > i128::from(upper) - i128::from(lower) {
                    return None;
                }
            }
            return Some(SubscriptTest::Distance(iv, dist));
        }

        let bounds: Option<Vec<(i64, i64)>> = terms.iter().map(|&(iv, _)| constant_bounds(levels, iv)).collect();
        if let Some(bounds) = bounds {
            if bounds.iter().any(|&(lower, upper)| upper < lower) {
                return None;
            }
            let lowers: Vec<i64> = bounds.iter().map(|b| b.0).collect();
            let uppers: Vec<i64> = bounds.iter().map(|b| b.1).collect();
            if !banerjee_test(&coeffs, constant, &lowers, &uppers) {
                return None;
            }
        }
        Some(SubscriptTest::Unknown)
    }
}

/// Inclusive constant range of `iv` if its loop is among `levels` and has
/// constant bounds.
fn constant_bounds(levels: &[LoopHeader], iv: IvId) -> Option<(i64, i64)> {
    let header = levels.iter().find(|h| h.iv == iv)?;
    let lower = header.lower.as_constant()?;
    let upper = header.upper.as_constant()?.checked_sub(1)?;
    Some((lower, upper))
}

impl DependenceOracle for SubscriptOracle {
    fn query(&self, a: &MemoryAccess, b: &MemoryAccess, levels: &[LoopHeader]) -> Option<DirectionVector> {
        if a.array != b.array || (!a.is_write() && !b.is_write()) {
            return None;
        }
        if a.indices.len() != b.indices.len() {
            return Some(DirectionVector::uniform(levels.len(), Direction::Star));
        }

        let mut distances: BTreeMap<IvId, i64> = BTreeMap::new();
        for (e, f) in a.indices.iter().zip(&b.indices) {
            match Self::test_subscript(e, f, levels)? {
                SubscriptTest::Distance(iv, dist) => match distances.get(&iv) {
                    Some(&prev) if prev != dist => return None,
                    Some(_) => {}
                    None => {
                        distances.insert(iv, dist);
                    }
                },
                SubscriptTest::Unknown => {}
            }
        }

        let direction: DirectionVector = levels
            .iter()
            .map(|h| {
                if !a.is_enclosed_by(h.iv) || !b.is_enclosed_by(h.iv) {
                    return Direction::Star;
                }
                distances
                    .get(&h.iv)
                    .map(|&d| Direction::from_distance(d))
                    .unwrap_or(Direction::Star)
            })
            .collect();

        // An access meets itself only in other iterations.
        if a.order == b.order && direction.is_loop_independent() {
            return None;
        }
        Some(direction.normalized())
    }
}

/// Oracle backed by vectors supplied from elsewhere, keyed by
/// (source statement, sink statement). Vectors are returned exactly as
/// recorded, for either argument order.
#[derive(Debug, Clone, Default)]
pub struct RecordedOracle {
    edges: HashMap<(StmtId, StmtId), DirectionVector>,
}

impl RecordedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: StmtId, sink: StmtId, direction: impl Into<DirectionVector>) {
        self.edges.insert((source, sink), direction.into());
    }

    /// Builder-style [`record`](Self::record).
    pub fn with_edge(mut self, source: StmtId, sink: StmtId, direction: impl Into<DirectionVector>) -> Self {
        self.record(source, sink, direction);
        self
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl DependenceOracle for RecordedOracle {
    fn query(&self, a: &MemoryAccess, b: &MemoryAccess, _levels: &[LoopHeader]) -> Option<DirectionVector> {
        self.edges
            .get(&(a.stmt, b.stmt))
            .or_else(|| self.edges.get(&(b.stmt, a.stmt)))
            .cloned()
    }
}

/// Query `oracle` for every same-array pair of `accesses` that involves a
/// write, in execution order. A write is also paired with itself, which
/// exposes dependences between its own iterations.
pub fn dependence_edges<O: DependenceOracle + ?Sized>(
    oracle: &O,
    accesses: &[MemoryAccess],
    levels: &[LoopHeader],
) -> Vec<DependenceEdge> {
    let mut edges = Vec::new();
    for (x, a) in accesses.iter().enumerate() {
        for b in &accesses[x..] {
            if a.array != b.array {
                continue;
            }
            let kind = match DependenceKind::between(a.kind, b.kind) {
                Some(kind) => kind,
                None => continue,
            };
            if let Some(direction) = oracle.query(a, b, levels) {
                let edge = DependenceEdge {
                    source: a.stmt,
                    sink: b.stmt,
                    array: a.array.clone(),
                    kind,
                    direction,
                };
                trace!("dependence {}", edge);
                edges.push(edge);
            }
        }
    }
    edges
}

/// GCD test: returns `true` if `sum(coeffs[k] * x_k) = constant` may have an
/// integer solution.
pub fn gcd_test(coeffs: &[i64], constant: i64) -> bool {
    use num_integer::Integer;
    let g = coeffs.iter().fold(0i64, |acc, &c| acc.gcd(&c));
    if g == 0 {
        constant == 0
    } else {
        constant % g == 0
    }
}

/// Banerjee bounds test: returns `true` if `constant + sum(coeffs[k] * x_k)`
/// can be zero with each `x_k` in `[lower_bounds[k], upper_bounds[k]]`.
pub fn banerjee_test(coeffs: &[i64], constant: i64, lower_bounds: &[i64], upper_bounds: &[i64]) -> bool {
    let mut min_val = constant as i128;
    let mut max_val = constant as i128;

    for (k, &c) in coeffs.iter().enumerate() {
        let (lb, ub) = match (lower_bounds.get(k), upper_bounds.get(k)) {
            (Some(&lb), Some(&ub)) => (lb as i128, ub as i128),
            _ => return true,
        };
        let c = c as i128;
        if c > 0 {
            min_val += c * lb;
            max_val += c * ub;
        } else {
            min_val += c * ub;
            max_val += c * lb;
        }
    }

    min_val <= 0 && max_val >= 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::Function;
    use crate::utils::location::Span;
    use Direction::*;

    #[test]
    fn test_gcd_test() {
        assert!(!gcd_test(&[2, -2], 1));
        assert!(gcd_test(&[2, -2], 0));
        assert!(gcd_test(&[3, -6], 9));
        assert!(!gcd_test(&[3, -6], 10));
        assert!(gcd_test(&[], 0));
        assert!(!gcd_test(&[], 4));
    }

    #[test]
    fn test_banerjee() {
        assert!(banerjee_test(&[1, -1], 0, &[0, 0], &[9, 9]));
        assert!(!banerjee_test(&[1, -1], 20, &[0, 0], &[9, 9]));
        assert!(banerjee_test(&[1, -1], 20, &[0], &[9]));
    }

    #[test]
    fn test_direction_from_distance() {
        assert_eq!(Direction::from_distance(1), Lt);
        assert_eq!(Direction::from_distance(0), Eq);
        assert_eq!(Direction::from_distance(-1), Gt);
    }

    #[test]
    fn test_direction_union() {
        assert_eq!(Lt.union(&Lt), Lt);
        assert_eq!(Lt.union(&Eq), Star);
        assert_eq!(Gt.union(&Star), Star);
    }

    #[test]
    fn test_vector_normalization() {
        let v = DirectionVector::new(vec![Eq, Gt, Lt]);
        assert_eq!(v.clone().normalized(), DirectionVector::new(vec![Eq, Lt, Gt]));
        let v = DirectionVector::new(vec![Star, Gt]);
        assert_eq!(v.clone().normalized(), v);
        assert!(DirectionVector::new(vec![Eq, Eq]).is_loop_independent());
        assert_eq!(DirectionVector::new(vec![Lt, Star]).to_string(), "(<, *)");
        assert_eq!(DirectionVector::new(vec![Lt]).get(3), Star);
    }

    struct Nest {
        func: Function,
        levels: Vec<LoopHeader>,
    }

    /// Two loops `i in [0, ni)`, `j in [0, nj)`; `None` extents are symbolic.
    fn nest(ni: Option<i64>, nj: Option<i64>) -> Nest {
        let mut func = Function::new("t");
        let n = func.add_symbol("N");
        let mut levels = Vec::new();
        for (name, extent) in [("i", ni), ("j", nj)] {
            let iv = func.add_iv(name);
            let upper = extent.map(AffineExpr::constant).unwrap_or_else(|| AffineExpr::symbol(n));
            levels.push(LoopHeader::new(iv, AffineExpr::zero(), upper));
        }
        Nest { func, levels }
    }

    fn access(nest: &Nest, order: usize, kind: AccessKind, indices: Vec<AffineExpr>) -> MemoryAccess {
        MemoryAccess {
            stmt: StmtId(0),
            array: "A".into(),
            indices,
            kind,
            enclosing: nest.levels.iter().map(|h| h.iv).collect(),
            order,
            span: Span::dummy(),
        }
    }

    fn iv(nest: &Nest, level: usize) -> AffineExpr {
        AffineExpr::iv(nest.levels[level].iv)
    }

    #[test]
    fn test_uniform_distance_is_normalized() {
        // A[i + 1] = A[i] + ...
        let t = nest(None, None);
        let read = access(&t, 0, AccessKind::Read, vec![iv(&t, 0)]);
        let write = access(&t, 1, AccessKind::Write, vec![iv(&t, 0).plus(1)]);
        let v = SubscriptOracle.query(&read, &write, &t.levels);
        assert_eq!(v, Some(DirectionVector::new(vec![Lt, Star])));
    }

    #[test]
    fn test_inner_carried_dependence() {
        // A[i][j] = A[i][j - 1] + 1
        let t = nest(None, None);
        let read = access(&t, 0, AccessKind::Read, vec![iv(&t, 0), iv(&t, 1).plus(-1)]);
        let write = access(&t, 1, AccessKind::Write, vec![iv(&t, 0), iv(&t, 1)]);
        let v = SubscriptOracle.query(&read, &write, &t.levels);
        assert_eq!(v, Some(DirectionVector::new(vec![Eq, Lt])));
        assert_eq!(SubscriptOracle.query(&write, &write, &t.levels), None);
    }

    #[test]
    fn test_mixed_ivs_are_unknown() {
        // A[j] = A[j] + A[i]
        let t = nest(None, None);
        let read = access(&t, 1, AccessKind::Read, vec![iv(&t, 0)]);
        let write = access(&t, 2, AccessKind::Write, vec![iv(&t, 1)]);
        let v = SubscriptOracle.query(&read, &write, &t.levels);
        assert_eq!(v, Some(DirectionVector::new(vec![Star, Star])));
        let v = SubscriptOracle.query(&write, &write, &t.levels);
        assert_eq!(v, Some(DirectionVector::new(vec![Star, Eq])));
    }

    #[test]
    fn test_independence_proofs() {
        let t = nest(Some(8), Some(8));
        // GCD: A[2i] vs A[2i + 1]
        let w = access(&t, 1, AccessKind::Write, vec![iv(&t, 0) * 2]);
        let r = access(&t, 0, AccessKind::Read, vec![iv(&t, 0) * 2 + AffineExpr::constant(1)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), None);

        // Range: A[i] vs A[i + 10] with i in [0, 8)
        let w = access(&t, 1, AccessKind::Write, vec![iv(&t, 0)]);
        let r = access(&t, 0, AccessKind::Read, vec![iv(&t, 0).plus(10)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), None);

        // Banerjee: A[i] vs A[j + 20]
        let r = access(&t, 0, AccessKind::Read, vec![iv(&t, 1).plus(20)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), None);

        // Constants: A[0] vs A[1]
        let w = access(&t, 1, AccessKind::Write, vec![AffineExpr::constant(0)]);
        let r = access(&t, 0, AccessKind::Read, vec![AffineExpr::constant(1)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), None);

        // Reads never depend on reads
        let r2 = access(&t, 2, AccessKind::Read, vec![AffineExpr::constant(1)]);
        assert_eq!(SubscriptOracle.query(&r, &r2, &t.levels), None);
    }

    #[test]
    fn test_extreme_constants_do_not_overflow() {
        let mut func = Function::new("t");
        let i = func.add_iv("i");
        let levels = vec![LoopHeader::new(i, AffineExpr::constant(i64::MIN), AffineExpr::constant(i64::MAX))];
        let t = Nest { func, levels };

        // Constant difference does not fit in i64: no usable distance.
        let w = access(&t, 1, AccessKind::Write, vec![AffineExpr::iv(i).plus(i64::MAX)]);
        let r = access(&t, 0, AccessKind::Read, vec![AffineExpr::iv(i).plus(-2)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), Some(DirectionVector::new(vec![Star])));

        // Distance within a loop spanning the whole i64 range.
        let w = access(&t, 1, AccessKind::Write, vec![AffineExpr::iv(i)]);
        let r = access(&t, 0, AccessKind::Read, vec![AffineExpr::iv(i).plus(-1)]);
        assert_eq!(SubscriptOracle.query(&r, &w, &t.levels), Some(DirectionVector::new(vec![Lt])));

        // An empty loop whose upper bound is i64::MIN has no constant range.
        let empty = vec![LoopHeader::new(i, AffineExpr::constant(0), AffineExpr::constant(i64::MIN))];
        assert_eq!(constant_bounds(&empty, i), None);
    }

    #[test]
    fn test_recorded_oracle() {
        let t = nest(None, None);
        let oracle = RecordedOracle::new().with_edge(StmtId(0), StmtId(0), vec![Gt, Star]);
        let r = access(&t, 0, AccessKind::Read, vec![]);
        let w = access(&t, 1, AccessKind::Write, vec![]);
        assert_eq!(oracle.query(&r, &w, &t.levels), Some(DirectionVector::new(vec![Gt, Star])));

        let edges = dependence_edges(&oracle, &[r, w], &t.levels);
        let kinds: Vec<_> = edges.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![DependenceKind::Anti, DependenceKind::Output]);
        assert_eq!(edges[0].to_string(), "S0 -> S0 [anti (WAR)] on A dir=(>, *)");
    }
}
