//! Pass driver and registry.
//!
//! [`LoopInterchangePass`] walks a function's loop nests and attempts one
//! interchange per nest. Refusals are recorded and logged, never fatal.
//! Passes are found by name through a process-wide [`PassRegistry`] that is
//! populated by an explicit, idempotent [`register_passes`] call.

use crate::analysis::{collect, DependenceOracle, LoopNest, SubscriptOracle};
use crate::ir::ops::{Function, OpPath, Program};
use crate::transform::interchange::Interchange;
use crate::transform::legality::StructuralIssue;
use crate::utils::errors::{Diagnostic, InterchangeError};
use crate::utils::location::Span;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Registered name of the interchange pass.
pub const INTERCHANGE_PASS_NAME: &str = "affine-loop-interchange";
const INTERCHANGE_PASS_DESCRIPTION: &str = "Interchange loops";

/// A transformation run over one function at a time.
pub trait FunctionPass {
    /// Get pass name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run over `func`, possibly mutating it.
    fn run_on_function(&self, func: &mut Function) -> Result<PassReport>;
}

/// Which adjacent pair of a nest to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotSelection {
    /// Slots 0 and 1
    #[default]
    Outermost,
    /// Slots n and n + 1
    Fixed(usize),
    /// The first legal pair, scanning outermost first
    FirstLegal,
}

/// Configuration for [`LoopInterchangePass`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterchangeOptions {
    /// Which pair to try in each nest
    pub slot: SlotSelection,
    /// Reject pairs whose unknown directions could hide a reversal
    pub strict_unknown: bool,
}

impl InterchangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = SlotSelection::Fixed(slot);
        self
    }

    pub fn first_legal(mut self) -> Self {
        self.slot = SlotSelection::FirstLegal;
        self
    }

    pub fn strict_unknown(mut self, strict: bool) -> Self {
        self.strict_unknown = strict;
        self
    }

    /// Candidate slots for a nest of `depth` loops.
    fn candidates(&self, depth: usize) -> Vec<usize> {
        match self.slot {
            SlotSelection::Outermost => vec![0],
            SlotSelection::Fixed(slot) => vec![slot],
            SlotSelection::FirstLegal => (0..depth.saturating_sub(1)).collect(),
        }
    }
}

/// A performed interchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedInterchange {
    /// Nest before the swap, e.g. `i -> j -> k`
    pub nest: String,
    pub slot: usize,
    /// Loop moved inward
    pub outer: String,
    /// Loop moved outward
    pub inner: String,
    pub span: Span,
}

/// A candidate that was not interchanged.
#[derive(Debug, Clone)]
pub struct SkippedCandidate {
    pub nest: String,
    pub slot: usize,
    pub error: InterchangeError,
    pub diagnostic: Diagnostic,
}

/// Outcome of running a pass over one function.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub function: String,
    pub nests_seen: usize,
    pub applied: Vec<AppliedInterchange>,
    pub skipped: Vec<SkippedCandidate>,
}

impl PassReport {
    pub fn new(function: impl Into<String>) -> Self {
        Self { function: function.into(), ..Self::default() }
    }

    /// Whether the function was modified.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function '{}': {} nest(s), {} interchanged, {} skipped",
            self.function,
            self.nests_seen,
            self.applied.len(),
            self.skipped.len()
        )?;
        for applied in &self.applied {
            writeln!(
                f,
                "  interchanged '{}' and '{}' at slot {} of nest {}",
                applied.outer, applied.inner, applied.slot, applied.nest
            )?;
        }
        for skipped in &self.skipped {
            writeln!(f, "  [{}] {}", skipped.error.class(), skipped.diagnostic)?;
        }
        Ok(())
    }
}

/// Best-effort loop interchange over every nest of a function.
#[derive(Debug, Clone)]
pub struct LoopInterchangePass<O = SubscriptOracle> {
    options: InterchangeOptions,
    interchange: Interchange<O>,
}

impl LoopInterchangePass<SubscriptOracle> {
    /// Create the pass with the built-in subscript oracle.
    pub fn new(options: InterchangeOptions) -> Self {
        Self::with_oracle(SubscriptOracle, options)
    }
}

impl Default for LoopInterchangePass<SubscriptOracle> {
    fn default() -> Self {
        Self::new(InterchangeOptions::default())
    }
}

impl<O: DependenceOracle> LoopInterchangePass<O> {
    pub fn with_oracle(oracle: O, options: InterchangeOptions) -> Self {
        let interchange = Interchange::new(oracle).with_strict_unknown(options.strict_unknown);
        Self { options, interchange }
    }

    pub fn options(&self) -> &InterchangeOptions {
        &self.options
    }

    fn skip(&self, report: &mut PassReport, func: &Function, nest: &LoopNest, slot: usize, error: InterchangeError) {
        let described = nest.describe(func);
        let span = nest.slot(slot).map(|s| s.span).unwrap_or_else(Span::dummy);
        let diagnostic = Diagnostic::warning(format!(
            "loop interchange skipped for nest {} at slot {}",
            described, slot
        ))
        .with_span(span)
        .with_note(error.to_string());

        match error {
            InterchangeError::NoCandidate { .. } => debug!("{}", diagnostic),
            _ => warn!("{}", diagnostic),
        }
        report.skipped.push(SkippedCandidate { nest: described, slot, error, diagnostic });
    }

    /// Try the configured candidates of one nest; returns the swapped slot.
    fn run_on_nest(
        &self,
        func: &mut Function,
        nest: &mut LoopNest,
        done: &HashSet<OpPath>,
        report: &mut PassReport,
    ) -> Option<usize> {
        if nest.depth() < 2 {
            let error = InterchangeError::NoCandidate { depth: nest.depth() };
            self.skip(report, func, nest, 0, error);
            return None;
        }

        for slot in self.options.candidates(nest.depth()) {
            let touched = [Some(slot), slot.checked_add(1)]
                .into_iter()
                .flatten()
                .any(|k| nest.slot(k).map_or(false, |s| done.contains(&s.path)));
            if touched {
                debug!("loop at slot {} of nest {} was already interchanged", slot, nest.describe(func));
                continue;
            }
            let before = nest.describe(func);
            match self.interchange.apply(func, nest, slot) {
                Ok(()) => {
                    let slots = nest.slots();
                    report.applied.push(AppliedInterchange {
                        nest: before,
                        slot,
                        outer: func.iv_name(slots[slot + 1].header.iv).to_string(),
                        inner: func.iv_name(slots[slot].header.iv).to_string(),
                        span: slots[slot].span,
                    });
                    return Some(slot);
                }
                Err(error) => self.skip(report, func, nest, slot, error),
            }
        }
        None
    }
}

impl<O: DependenceOracle> FunctionPass for LoopInterchangePass<O> {
    fn name(&self) -> &str {
        INTERCHANGE_PASS_NAME
    }

    fn description(&self) -> &str {
        INTERCHANGE_PASS_DESCRIPTION
    }

    fn run_on_function(&self, func: &mut Function) -> Result<PassReport> {
        let nests = collect(&func.body);
        debug!("found {} loop nest(s) in '{}'", nests.len(), func.name);

        let mut report = PassReport::new(func.name.clone());
        report.nests_seen = nests.len();

        // Nests can share loops; a pair swapped once must not be swapped back.
        let mut done: HashSet<OpPath> = HashSet::new();
        for mut nest in nests {
            if !nest.refresh(func) {
                let error = InterchangeError::StructuralUnsupported(StructuralIssue::StaleNest { slot: 0 });
                self.skip(&mut report, func, &nest, 0, error);
                continue;
            }
            if let Some(slot) = self.run_on_nest(func, &mut nest, &done, &mut report) {
                done.insert(nest.slots()[slot].path.clone());
                done.insert(nest.slots()[slot + 1].path.clone());
            }
        }

        info!(
            "{}: {} interchange(s) applied in '{}', {} candidate(s) skipped",
            INTERCHANGE_PASS_NAME,
            report.applied.len(),
            func.name,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Boxed pass as stored by the registry and pipelines.
pub type BoxedPass = Box<dyn FunctionPass + Send + Sync>;

/// Builds a pass with default options.
pub type PassFactory = fn() -> BoxedPass;

/// A registry entry.
#[derive(Debug, Clone, Copy)]
pub struct PassInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub factory: PassFactory,
}

/// Passes by name.
#[derive(Debug, Default)]
pub struct PassRegistry {
    passes: BTreeMap<&'static str, PassInfo>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `info` unless its name is taken. Returns whether it was added.
    pub fn register(&mut self, info: PassInfo) -> bool {
        if self.passes.contains_key(info.name) {
            return false;
        }
        self.passes.insert(info.name, info);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PassInfo> {
        self.passes.get(name)
    }

    pub fn create(&self, name: &str) -> Option<BoxedPass> {
        self.get(name).map(|info| (info.factory)())
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Entries ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &PassInfo> {
        self.passes.values()
    }
}

static REGISTRY: Lazy<RwLock<PassRegistry>> = Lazy::new(|| RwLock::new(PassRegistry::new()));

fn interchange_factory() -> BoxedPass {
    Box::new(LoopInterchangePass::default())
}

/// Register this crate's passes in the process-wide registry. Safe to call
/// any number of times.
pub fn register_passes() -> Result<()> {
    let mut registry = REGISTRY
        .write()
        .map_err(|_| anyhow!("pass registry lock is poisoned"))?;
    if registry.register(PassInfo {
        name: INTERCHANGE_PASS_NAME,
        description: INTERCHANGE_PASS_DESCRIPTION,
        factory: interchange_factory,
    }) {
        debug!("registered pass '{}'", INTERCHANGE_PASS_NAME);
    }
    Ok(())
}

/// `(name, description)` of every registered pass.
pub fn registered_passes() -> Result<Vec<(&'static str, &'static str)>> {
    let registry = REGISTRY
        .read()
        .map_err(|_| anyhow!("pass registry lock is poisoned"))?;
    Ok(registry.iter().map(|info| (info.name, info.description)).collect())
}

/// Build a registered pass by name.
pub fn create_pass(name: &str) -> Result<BoxedPass> {
    let registry = REGISTRY
        .read()
        .map_err(|_| anyhow!("pass registry lock is poisoned"))?;
    match registry.create(name) {
        Some(pass) => Ok(pass),
        None => bail!("unknown pass '{}'", name),
    }
}

/// An ordered list of passes run over every function of a program.
#[derive(Default)]
pub struct PassPipeline {
    passes: Vec<BoxedPass>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from registered pass names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut pipeline = Self::new();
        for name in names {
            pipeline.add(create_pass(name.as_ref())?);
        }
        Ok(pipeline)
    }

    pub fn add(&mut self, pass: BoxedPass) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run every pass over every function, in order.
    pub fn run(&self, program: &mut Program) -> Result<Vec<PassReport>> {
        let mut reports = Vec::new();
        for func in &mut program.functions {
            for pass in &self.passes {
                let report = pass
                    .run_on_function(func)
                    .with_context(|| format!("pass '{}' failed on function '{}'", pass.name(), func.name))?;
                reports.push(report);
            }
        }
        Ok(reports)
    }
}
