//! Affine expressions over induction variables and symbols.
//!
//! An affine expression is a linear combination of induction variables and
//! compile-time symbols plus a constant:
//! `aff = c0 + a1*i1 + ... + b1*N + ...`
//!
//! Terms are keyed by the *identity* of the variable, not by its position
//! in a loop nest. Interchange moves loops between slots, so positional
//! coefficients would have to be rewritten; identity-keyed ones stay valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Identity of an induction variable within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IvId(pub u32);

impl IvId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a compile-time symbol (e.g. `N`) within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An affine expression: `constant + Σ ivs[v]*v + Σ symbols[s]*s`.
///
/// Zero coefficients are never stored, so structural equality is
/// semantic equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    ivs: BTreeMap<IvId, i64>,
    symbols: BTreeMap<SymbolId, i64>,
}

impl AffineExpr {
    /// The zero expression.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A constant expression.
    pub fn constant(value: i64) -> Self {
        Self { constant: value, ..Self::default() }
    }

    /// A single induction variable.
    pub fn iv(iv: IvId) -> Self {
        let mut expr = Self::zero();
        expr.add_iv_term(iv, 1);
        expr
    }

    /// A single symbol.
    pub fn symbol(sym: SymbolId) -> Self {
        let mut expr = Self::zero();
        expr.add_symbol_term(sym, 1);
        expr
    }

    /// Add `coeff * iv` to the expression.
    pub fn add_iv_term(&mut self, iv: IvId, coeff: i64) {
        let entry = self.ivs.entry(iv).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.ivs.remove(&iv);
        }
    }

    /// Add `coeff * sym` to the expression.
    pub fn add_symbol_term(&mut self, sym: SymbolId, coeff: i64) {
        let entry = self.symbols.entry(sym).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.symbols.remove(&sym);
        }
    }

    /// Builder-style `self + c`.
    pub fn plus(mut self, c: i64) -> Self {
        self.constant += c;
        self
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.ivs.is_empty() && self.symbols.is_empty()
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// Coefficient of an induction variable (0 if absent).
    pub fn coeff(&self, iv: IvId) -> i64 {
        self.ivs.get(&iv).copied().unwrap_or(0)
    }

    /// Coefficient of a symbol (0 if absent).
    pub fn symbol_coeff(&self, sym: SymbolId) -> i64 {
        self.symbols.get(&sym).copied().unwrap_or(0)
    }

    /// Whether the expression mentions `iv`.
    pub fn references(&self, iv: IvId) -> bool {
        self.ivs.contains_key(&iv)
    }

    /// Non-zero induction variable terms, ordered by identity.
    pub fn iv_terms(&self) -> impl Iterator<Item = (IvId, i64)> + '_ {
        self.ivs.iter().map(|(&iv, &c)| (iv, c))
    }

    /// Non-zero symbol terms, ordered by identity.
    pub fn symbol_terms(&self) -> impl Iterator<Item = (SymbolId, i64)> + '_ {
        self.symbols.iter().map(|(&s, &c)| (s, c))
    }

    /// Same symbolic part (symbol terms) as `other`.
    pub fn same_symbols(&self, other: &AffineExpr) -> bool {
        self.symbols == other.symbols
    }

    /// Multiply every term by `factor`.
    pub fn scale(&self, factor: i64) -> Self {
        let mut result = Self::constant(self.constant * factor);
        for (iv, c) in self.iv_terms() {
            result.add_iv_term(iv, c * factor);
        }
        for (sym, c) in self.symbol_terms() {
            result.add_symbol_term(sym, c * factor);
        }
        result
    }

    /// Evaluate with concrete values. `iv_values` is indexed by [`IvId`],
    /// `symbol_values` by [`SymbolId`]; missing entries read as zero.
    pub fn evaluate(&self, iv_values: &[i64], symbol_values: &[i64]) -> i64 {
        let mut result = self.constant;
        for (iv, c) in self.iv_terms() {
            let v = iv_values.get(iv.index()).copied().unwrap_or(0);
            result = result.wrapping_add(c.wrapping_mul(v));
        }
        for (sym, c) in self.symbol_terms() {
            let v = symbol_values.get(sym.index()).copied().unwrap_or(0);
            result = result.wrapping_add(c.wrapping_mul(v));
        }
        result
    }

    /// Render with the given induction variable and symbol names.
    pub fn display<'a>(&'a self, iv_names: &'a [String], symbol_names: &'a [String]) -> AffineDisplay<'a> {
        AffineDisplay { expr: self, iv_names, symbol_names }
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.constant += other.constant;
        for (iv, c) in other.iv_terms() {
            self.add_iv_term(iv, c);
        }
        for (sym, c) in other.symbol_terms() {
            self.add_symbol_term(sym, c);
        }
        self
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + (-other)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl Mul<i64> for AffineExpr {
    type Output = Self;

    fn mul(self, factor: i64) -> Self {
        self.scale(factor)
    }
}

/// Display adaptor returned by [`AffineExpr::display`].
pub struct AffineDisplay<'a> {
    expr: &'a AffineExpr,
    iv_names: &'a [String],
    symbol_names: &'a [String],
}

impl fmt::Display for AffineDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms: Vec<(i64, String)> = Vec::new();
        for (iv, c) in self.expr.iv_terms() {
            let name = self
                .iv_names
                .get(iv.index())
                .cloned()
                .unwrap_or_else(|| format!("%i{}", iv.0));
            terms.push((c, name));
        }
        for (sym, c) in self.expr.symbol_terms() {
            let name = self
                .symbol_names
                .get(sym.index())
                .cloned()
                .unwrap_or_else(|| format!("%s{}", sym.0));
            terms.push((c, name));
        }

        let mut first = true;
        for (c, name) in terms {
            let magnitude = c.abs();
            if first {
                if c < 0 {
                    write!(f, "-")?;
                }
            } else if c < 0 {
                write!(f, " - ")?;
            } else {
                write!(f, " + ")?;
            }
            if magnitude == 1 {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}*{}", magnitude, name)?;
            }
            first = false;
        }

        let k = self.expr.constant;
        if first {
            write!(f, "{}", k)
        } else if k > 0 {
            write!(f, " + {}", k)
        } else if k < 0 {
            write!(f, " - {}", k.unsigned_abs())
        } else {
            Ok(())
        }
    }
}
