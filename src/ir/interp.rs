//! Reference interpreter.
//!
//! Executes a [`Function`] for concrete symbol values over a flat
//! row-major [`Memory`]. Used to check that a transformed function has the
//! same observable memory effects as the original.

use crate::ir::ops::{Assign, BinaryOp, Block, ComputeExpr, Function, Op};
use crate::utils::errors::ExecError;
use std::collections::BTreeMap;

/// Storage for one array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayBuffer {
    pub extents: Vec<i64>,
    pub data: Vec<i64>,
}

impl ArrayBuffer {
    fn zeroed(extents: Vec<i64>) -> Self {
        let len = extents.iter().map(|&e| e as usize).product();
        Self { extents, data: vec![0; len] }
    }

    /// Row-major offset of `index`, or `None` when out of bounds.
    pub fn offset(&self, index: &[i64]) -> Option<usize> {
        if index.len() != self.extents.len() {
            return None;
        }
        let mut offset = 0usize;
        for (&i, &extent) in index.iter().zip(&self.extents) {
            if i < 0 || i >= extent {
                return None;
            }
            offset = offset * extent as usize + i as usize;
        }
        Some(offset)
    }

    pub fn get(&self, index: &[i64]) -> Option<i64> {
        self.offset(index).map(|o| self.data[o])
    }
}

/// All arrays of a function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Memory {
    arrays: BTreeMap<String, ArrayBuffer>,
}

impl Memory {
    /// Allocate zero-filled arrays for every declaration of `func`.
    pub fn allocate(func: &Function, symbol_values: &[i64]) -> Result<Self, ExecError> {
        let mut arrays = BTreeMap::new();
        for decl in &func.arrays {
            let mut extents = Vec::with_capacity(decl.extents.len());
            for extent in &decl.extents {
                let value = extent.evaluate(&[], symbol_values);
                if value < 0 {
                    return Err(ExecError::NegativeExtent { array: decl.name.clone(), extent: value });
                }
                extents.push(value);
            }
            arrays.insert(decl.name.clone(), ArrayBuffer::zeroed(extents));
        }
        Ok(Self { arrays })
    }

    /// Overwrite every element with `init(array, flat offset)`.
    pub fn fill(&mut self, mut init: impl FnMut(&str, usize) -> i64) {
        for (name, buffer) in self.arrays.iter_mut() {
            for (k, slot) in buffer.data.iter_mut().enumerate() {
                *slot = init(name, k);
            }
        }
    }

    pub fn array(&self, name: &str) -> Option<&ArrayBuffer> {
        self.arrays.get(name)
    }

    pub fn arrays(&self) -> impl Iterator<Item = (&str, &ArrayBuffer)> {
        self.arrays.iter().map(|(n, b)| (n.as_str(), b))
    }

    fn locate(&self, array: &str, index: &[i64]) -> Result<usize, ExecError> {
        let buffer = self
            .arrays
            .get(array)
            .ok_or_else(|| ExecError::UnknownArray(array.to_string()))?;
        if index.len() != buffer.extents.len() {
            return Err(ExecError::RankMismatch {
                array: array.to_string(),
                expected: buffer.extents.len(),
                found: index.len(),
            });
        }
        buffer.offset(index).ok_or_else(|| ExecError::OutOfBounds {
            array: array.to_string(),
            index: index.to_vec(),
            extents: buffer.extents.clone(),
        })
    }

    pub fn load(&self, array: &str, index: &[i64]) -> Result<i64, ExecError> {
        let offset = self.locate(array, index)?;
        Ok(self.arrays[array].data[offset])
    }

    pub fn store(&mut self, array: &str, index: &[i64], value: i64) -> Result<(), ExecError> {
        let offset = self.locate(array, index)?;
        if let Some(buffer) = self.arrays.get_mut(array) {
            buffer.data[offset] = value;
        }
        Ok(())
    }
}

/// Tree-walking interpreter over one function.
pub struct Interpreter<'f> {
    func: &'f Function,
    symbols: Vec<i64>,
    ivs: Vec<i64>,
    /// Number of assignments executed so far
    pub steps: u64,
}

impl<'f> Interpreter<'f> {
    /// Bind every symbol of `func` by name.
    pub fn new(func: &'f Function, bindings: &[(&str, i64)]) -> Result<Self, ExecError> {
        let mut symbols = Vec::with_capacity(func.symbols.len());
        for name in &func.symbols {
            let value = bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|&(_, v)| v)
                .ok_or_else(|| ExecError::UnboundSymbol(name.clone()))?;
            symbols.push(value);
        }
        Ok(Self { func, symbols, ivs: vec![0; func.ivs.len()], steps: 0 })
    }

    pub fn symbol_values(&self) -> &[i64] {
        &self.symbols
    }

    /// Allocate memory for the bound symbols.
    pub fn allocate(&self) -> Result<Memory, ExecError> {
        Memory::allocate(self.func, &self.symbols)
    }

    /// Execute the function body against `memory`.
    pub fn run(&mut self, memory: &mut Memory) -> Result<(), ExecError> {
        let func = self.func;
        self.exec_block(&func.body, memory)
    }

    fn exec_block(&mut self, block: &Block, memory: &mut Memory) -> Result<(), ExecError> {
        for op in &block.ops {
            match op {
                Op::For(for_op) => {
                    let header = &for_op.header;
                    if header.step <= 0 {
                        return Err(ExecError::NonPositiveStep {
                            iv: self.func.iv_name(header.iv).to_string(),
                            step: header.step,
                        });
                    }
                    let lower = header.lower.evaluate(&self.ivs, &self.symbols);
                    let upper = header.upper.evaluate(&self.ivs, &self.symbols);
                    let mut value = lower;
                    while value < upper {
                        self.ivs[header.iv.index()] = value;
                        self.exec_block(&for_op.body, memory)?;
                        value = value.saturating_add(header.step);
                    }
                }
                Op::Assign(assign) => self.exec_assign(assign, memory)?,
                Op::Opaque(opaque) => {
                    for region in &opaque.regions {
                        self.exec_block(region, memory)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn exec_assign(&mut self, assign: &Assign, memory: &mut Memory) -> Result<(), ExecError> {
        let value = self.eval(&assign.value, memory)?;
        let index: Vec<i64> = assign
            .target
            .indices
            .iter()
            .map(|e| e.evaluate(&self.ivs, &self.symbols))
            .collect();
        memory.store(&assign.target.array, &index, value)?;
        self.steps += 1;
        Ok(())
    }

    fn eval(&self, expr: &ComputeExpr, memory: &Memory) -> Result<i64, ExecError> {
        Ok(match expr {
            ComputeExpr::Int(v) => *v,
            ComputeExpr::Iv(iv) => self.ivs.get(iv.index()).copied().unwrap_or(0),
            ComputeExpr::Symbol(sym) => self.symbols.get(sym.index()).copied().unwrap_or(0),
            ComputeExpr::Load(r) => {
                let index: Vec<i64> = r
                    .indices
                    .iter()
                    .map(|e| e.evaluate(&self.ivs, &self.symbols))
                    .collect();
                memory.load(&r.array, &index)?
            }
            ComputeExpr::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs, memory)?;
                let b = self.eval(rhs, memory)?;
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div | BinaryOp::Mod if b == 0 => return Err(ExecError::DivisionByZero),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Mod => a.wrapping_rem(b),
                }
            }
            ComputeExpr::Neg(inner) => self.eval(inner, memory)?.wrapping_neg(),
        })
    }
}

/// Allocate memory, seed it with `init` and run `func` to completion.
pub fn execute(
    func: &Function,
    bindings: &[(&str, i64)],
    init: impl FnMut(&str, usize) -> i64,
) -> Result<Memory, ExecError> {
    let mut interp = Interpreter::new(func, bindings)?;
    let mut memory = interp.allocate()?;
    memory.fill(init);
    interp.run(&mut memory)?;
    Ok(memory)
}
