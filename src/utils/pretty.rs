//! Pretty printing of IR functions back into DSL source.
//!
//! The output re-parses to an equivalent function, so printing is also how
//! the CLI emits transformed code.

use crate::ir::expr::{AffineExpr, IvId};
use crate::ir::ops::{ArrayRef, Block, ComputeExpr, Function, Op, Program};
use std::collections::HashSet;
use std::fmt;

/// A simple code formatter with indentation tracking.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Formatter indenting by four spaces.
    pub fn default_indent() -> Self {
        Self::new("    ")
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
            } else {
                if self.at_line_start {
                    for _ in 0..self.indent_level {
                        self.output.push_str(&self.indent_str);
                    }
                    self.at_line_start = false;
                }
                self.output.push(c);
            }
        }
    }

    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Write `header {`, the indented body, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        f(self);
        self.dedent();
        self.writeln("}");
    }

    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Render a function as DSL source.
///
/// Scalar symbols are listed before arrays so that re-parsing assigns
/// symbols the same ids. Loop variables keep their source names unless the
/// name is already bound where the loop opens (by an enclosing loop, a
/// symbol or an array); those get a numbered name like `i_1`, so the
/// printout binds every reference to the same loop as the IR does.
pub fn print_function(func: &Function) -> String {
    let mut params: Vec<String> = func.symbols.clone();
    for array in &func.arrays {
        let extents: String = array.extents.iter().map(|e| format!("[{}]", func.show(e))).collect();
        params.push(format!("{}{}", array.name, extents));
    }

    let printer = Printer { func, ivs: loop_names(func) };
    let mut out = CodeFormatter::default_indent();
    out.block(&format!("func {}({})", func.name, format_list(&params, ", ")), |out| {
        printer.block(&func.body, out);
    });
    out.finish()
}

/// Render every function of a program, separated by blank lines.
pub fn print_program(program: &Program) -> String {
    program
        .functions
        .iter()
        .map(print_function)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a value expression with source names, parenthesizing only where
/// precedence or left associativity requires it.
pub fn show_compute(func: &Function, expr: &ComputeExpr) -> String {
    Printer { func, ivs: func.ivs.clone() }.compute(expr)
}

/// Printed name of every induction variable, indexed by [`IvId`].
///
/// [`IvId`]: crate::ir::IvId
fn loop_names(func: &Function) -> Vec<String> {
    let globals: HashSet<&str> = func
        .symbols
        .iter()
        .map(String::as_str)
        .chain(func.arrays.iter().map(|a| a.name.as_str()))
        .collect();
    let mut names = func.ivs.clone();
    name_loops(&func.body, &globals, &mut Vec::new(), &mut names);
    names
}

fn name_loops(block: &Block, globals: &HashSet<&str>, scope: &mut Vec<String>, names: &mut [String]) {
    for op in &block.ops {
        match op {
            Op::For(for_op) => {
                let index = for_op.header.iv.index();
                let base = match names.get(index) {
                    Some(base) => base.clone(),
                    None => continue,
                };
                let mut name = base.clone();
                let mut suffix = 1;
                while globals.contains(name.as_str()) || scope.contains(&name) {
                    name = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                names[index] = name.clone();
                scope.push(name);
                name_loops(&for_op.body, globals, scope, names);
                scope.pop();
            }
            Op::Assign(_) => {}
            Op::Opaque(opaque) => {
                for region in &opaque.regions {
                    name_loops(region, globals, scope, names);
                }
            }
        }
    }
}

struct Printer<'f> {
    func: &'f Function,
    ivs: Vec<String>,
}

impl Printer<'_> {
    fn iv(&self, iv: IvId) -> &str {
        self.ivs.get(iv.index()).map(String::as_str).unwrap_or("?")
    }

    fn affine(&self, expr: &AffineExpr) -> String {
        expr.display(&self.ivs, &self.func.symbols).to_string()
    }

    fn block(&self, block: &Block, out: &mut CodeFormatter) {
        for op in &block.ops {
            self.op(op, out);
        }
    }

    fn op(&self, op: &Op, out: &mut CodeFormatter) {
        match op {
            Op::For(for_op) => {
                let header = &for_op.header;
                if header.ordered {
                    out.writeln("@ordered");
                }
                let mut line = format!(
                    "for {} = {} to {}",
                    self.iv(header.iv),
                    self.affine(&header.lower),
                    self.affine(&header.upper)
                );
                if header.step != 1 {
                    line.push_str(&format!(" step {}", header.step));
                }
                out.block(&line, |out| self.block(&for_op.body, out));
            }
            Op::Assign(assign) => {
                let line = format!("{} = {};", self.array_ref(&assign.target), self.compute(&assign.value));
                out.writeln(&line);
            }
            Op::Opaque(opaque) => {
                let region_sugar = opaque.name == "region"
                    && !opaque.has_side_effects
                    && opaque.operands.is_empty()
                    && opaque.regions.len() == 1;
                if region_sugar {
                    out.block("region", |out| self.block(&opaque.regions[0], out));
                    return;
                }
                if !opaque.has_side_effects {
                    out.writeln("@pure");
                }
                let call = format!("call {}({})", opaque.name, format_list(&opaque.operands, ", "));
                if opaque.regions.is_empty() {
                    out.writeln(&format!("{};", call));
                    return;
                }
                out.write(&call);
                for region in &opaque.regions {
                    out.writeln(" {");
                    out.indent();
                    self.block(region, out);
                    out.dedent();
                    out.write("}");
                }
                out.writeln("");
            }
        }
    }

    fn array_ref(&self, r: &ArrayRef) -> String {
        let indices: String = r.indices.iter().map(|e| format!("[{}]", self.affine(e))).collect();
        format!("{}{}", r.array, indices)
    }

    fn compute(&self, expr: &ComputeExpr) -> String {
        match expr {
            ComputeExpr::Int(v) => v.to_string(),
            ComputeExpr::Iv(iv) => self.iv(*iv).to_string(),
            ComputeExpr::Symbol(sym) => self
                .func
                .symbols
                .get(sym.index())
                .cloned()
                .unwrap_or_else(|| format!("%s{}", sym.0)),
            ComputeExpr::Load(r) => self.array_ref(r),
            ComputeExpr::Neg(inner) => match inner.as_ref() {
                ComputeExpr::Binary { .. } | ComputeExpr::Neg(_) | ComputeExpr::Int(_) => {
                    format!("-({})", self.compute(inner))
                }
                _ => format!("-{}", self.compute(inner)),
            },
            ComputeExpr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let left = match lhs.as_ref() {
                    ComputeExpr::Binary { op: l, .. } if l.precedence() < prec => {
                        format!("({})", self.compute(lhs))
                    }
                    _ => self.compute(lhs),
                };
                let right = match rhs.as_ref() {
                    ComputeExpr::Binary { op: r, .. } if r.precedence() <= prec => {
                        format!("({})", self.compute(rhs))
                    }
                    _ => self.compute(rhs),
                };
                format!("{} {} {}", left, op.symbol(), right)
            }
        }
    }
}
