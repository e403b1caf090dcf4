//! Structured affine IR: functions, blocks and operations.
//!
//! A function body is a tree of [`Block`]s. Each block holds an ordered list
//! of [`Op`]s, and ops may own nested regions (blocks). Only three kinds of
//! op exist, so every walk over the IR is an exhaustive `match`:
//!
//! - [`Op::For`]: an affine loop with a header and one body region
//! - [`Op::Assign`]: an array store `A[f(i)] = expr`
//! - [`Op::Opaque`]: anything else, possibly with regions and side effects

use crate::ir::expr::{AffineExpr, IvId, SymbolId};
use crate::utils::location::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for an assignment statement within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub u64);

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A collection of functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

/// A declared array with extents that are affine in the symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDecl {
    pub name: String,
    pub extents: Vec<AffineExpr>,
}

impl ArrayDecl {
    pub fn rank(&self) -> usize {
        self.extents.len()
    }
}

/// A function: name tables plus a body block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Symbol names, indexed by [`SymbolId`]
    pub symbols: Vec<String>,
    pub arrays: Vec<ArrayDecl>,
    /// Induction variable names, indexed by [`IvId`]
    pub ivs: Vec<String>,
    pub body: Block,
    pub span: Span,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
            arrays: Vec::new(),
            ivs: Vec::new(),
            body: Block::new(),
            span: Span::dummy(),
        }
    }

    /// Declare a symbol, returning the existing id if already declared.
    pub fn add_symbol(&mut self, name: impl Into<String>) -> SymbolId {
        let name = name.into();
        if let Some(pos) = self.symbols.iter().position(|s| *s == name) {
            return SymbolId(pos as u32);
        }
        self.symbols.push(name);
        SymbolId((self.symbols.len() - 1) as u32)
    }

    /// Allocate a fresh induction variable. Names may repeat; identities
    /// never do.
    pub fn add_iv(&mut self, name: impl Into<String>) -> IvId {
        self.ivs.push(name.into());
        IvId((self.ivs.len() - 1) as u32)
    }

    pub fn symbol_id(&self, name: &str) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|s| s == name)
            .map(|p| SymbolId(p as u32))
    }

    pub fn array(&self, name: &str) -> Option<&ArrayDecl> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// Display name of an induction variable.
    pub fn iv_name(&self, iv: IvId) -> &str {
        self.ivs.get(iv.index()).map(String::as_str).unwrap_or("?")
    }

    /// Render an affine expression with this function's names.
    pub fn show(&self, expr: &AffineExpr) -> String {
        expr.display(&self.ivs, &self.symbols).to_string()
    }
}

/// An ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub ops: Vec<Op>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ops(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn block_at(&self, steps: &[(usize, usize)]) -> Option<&Block> {
        let mut block = self;
        for &(op, region) in steps {
            block = block.ops.get(op)?.regions().get(region)?;
        }
        Some(block)
    }

    fn block_at_mut(&mut self, steps: &[(usize, usize)]) -> Option<&mut Block> {
        let mut block = self;
        for &(op, region) in steps {
            block = block.ops.get_mut(op)?.regions_mut().get_mut(region)?;
        }
        Some(block)
    }

    /// Resolve a path relative to this block.
    pub fn op(&self, path: &OpPath) -> Option<&Op> {
        self.block_at(&path.steps)?.ops.get(path.index)
    }

    pub fn op_mut(&mut self, path: &OpPath) -> Option<&mut Op> {
        self.block_at_mut(&path.steps)?.ops.get_mut(path.index)
    }

    /// Resolve a path that must name a loop.
    pub fn for_op(&self, path: &OpPath) -> Option<&AffineFor> {
        match self.op(path)? {
            Op::For(for_op) => Some(for_op),
            Op::Assign(_) | Op::Opaque(_) => None,
        }
    }

    pub fn for_op_mut(&mut self, path: &OpPath) -> Option<&mut AffineFor> {
        match self.op_mut(path)? {
            Op::For(for_op) => Some(for_op),
            Op::Assign(_) | Op::Opaque(_) => None,
        }
    }
}

/// The closed set of operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    For(AffineFor),
    Assign(Assign),
    Opaque(OpaqueOp),
}

impl Op {
    /// Nested regions, in order.
    pub fn regions(&self) -> &[Block] {
        match self {
            Op::For(for_op) => std::slice::from_ref(&for_op.body),
            Op::Assign(_) => &[],
            Op::Opaque(op) => &op.regions,
        }
    }

    pub fn regions_mut(&mut self) -> &mut [Block] {
        match self {
            Op::For(for_op) => std::slice::from_mut(&mut for_op.body),
            Op::Assign(_) => &mut [],
            Op::Opaque(op) => &mut op.regions,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Op::For(for_op) => for_op.span,
            Op::Assign(assign) => assign.span,
            Op::Opaque(op) => op.span,
        }
    }
}

/// Header of an affine loop: `for iv = lower to upper step step`.
///
/// The upper bound is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopHeader {
    pub iv: IvId,
    pub lower: AffineExpr,
    pub upper: AffineExpr,
    pub step: i64,
    /// The loop carries an ordering-sensitive side effect (e.g. a serial
    /// reduction) and its iterations must not be reordered.
    pub ordered: bool,
}

impl LoopHeader {
    pub fn new(iv: IvId, lower: AffineExpr, upper: AffineExpr) -> Self {
        Self { iv, lower, upper, step: 1, ordered: false }
    }

    /// Whether either bound mentions `iv`.
    pub fn bounds_reference(&self, iv: IvId) -> bool {
        self.lower.references(iv) || self.upper.references(iv)
    }
}

/// An affine loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineFor {
    pub header: LoopHeader,
    pub body: Block,
    pub span: Span,
}

impl AffineFor {
    pub fn new(header: LoopHeader, body: Block) -> Self {
        Self { header, body, span: Span::dummy() }
    }

    /// The single loop making up this loop's body, if the body is exactly
    /// one loop and nothing else.
    pub fn sole_child_loop(&self) -> Option<&AffineFor> {
        match self.body.ops.as_slice() {
            [Op::For(inner)] => Some(inner),
            _ => None,
        }
    }

    pub fn sole_child_loop_mut(&mut self) -> Option<&mut AffineFor> {
        match self.body.ops.as_mut_slice() {
            [Op::For(inner)] => Some(inner),
            _ => None,
        }
    }
}

/// An array element reference `A[e0][e1]...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRef {
    pub array: String,
    pub indices: Vec<AffineExpr>,
}

/// An array store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assign {
    pub id: StmtId,
    pub target: ArrayRef,
    pub value: ComputeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    /// Binding strength used by the printer.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 2,
        }
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeExpr {
    Int(i64),
    Iv(IvId),
    Symbol(SymbolId),
    Load(ArrayRef),
    Binary {
        op: BinaryOp,
        lhs: Box<ComputeExpr>,
        rhs: Box<ComputeExpr>,
    },
    Neg(Box<ComputeExpr>),
}

impl ComputeExpr {
    pub fn binary(op: BinaryOp, lhs: ComputeExpr, rhs: ComputeExpr) -> Self {
        ComputeExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    /// Array loads in left-to-right evaluation order.
    pub fn loads(&self) -> Vec<&ArrayRef> {
        let mut out = Vec::new();
        self.collect_loads(&mut out);
        out
    }

    fn collect_loads<'a>(&'a self, out: &mut Vec<&'a ArrayRef>) {
        match self {
            ComputeExpr::Int(_) | ComputeExpr::Iv(_) | ComputeExpr::Symbol(_) => {}
            ComputeExpr::Load(r) => out.push(r),
            ComputeExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_loads(out);
                rhs.collect_loads(out);
            }
            ComputeExpr::Neg(inner) => inner.collect_loads(out),
        }
    }
}

/// Any construct the loop passes do not understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueOp {
    pub name: String,
    /// Array operands, for display only
    pub operands: Vec<String>,
    pub has_side_effects: bool,
    pub regions: Vec<Block>,
    pub span: Span,
}

/// Positional address of an op inside a function body.
///
/// `steps` descends through `(op index, region index)` pairs to the block
/// holding the op; `index` is the op's position in that block. Interchange
/// exchanges loop headers in place, so paths stay valid across it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpPath {
    pub steps: Vec<(usize, usize)>,
    pub index: usize,
}

impl OpPath {
    /// Path of a top-level op.
    pub fn root(index: usize) -> Self {
        Self { steps: Vec::new(), index }
    }

    /// Path of op `index` in region `region` of the op at `self`.
    pub fn child(&self, region: usize, index: usize) -> Self {
        let mut steps = self.steps.clone();
        steps.push((self.index, region));
        Self { steps, index }
    }

    /// Number of enclosing ops.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

impl fmt::Display for OpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (op, region) in &self.steps {
            write!(f, "{}.{}/", op, region)?;
        }
        write!(f, "{}", self.index)
    }
}
