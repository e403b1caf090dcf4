//! Parser for the loop-nest DSL.
//!
//! A recursive descent parser that builds IR functions directly. Names are
//! resolved while parsing: loop variables are scoped to their loop body and
//! shadow symbols, symbols are declared by scalar parameters or implicitly
//! by array extents, and arrays must be declared as parameters.

use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::expr::{AffineExpr, IvId};
use crate::ir::ops::{
    AffineFor, ArrayDecl, ArrayRef, Assign, BinaryOp, Block, ComputeExpr, Function, LoopHeader, Op, OpaqueOp,
    Program, StmtId,
};
use crate::utils::errors::{ParseError, ParseErrorKind};
use crate::utils::location::Span;
use anyhow::Result;
use log::debug;
use std::collections::HashSet;

/// A parser for the loop-nest DSL.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    state: FunctionState,
}

/// Per-function name resolution state.
#[derive(Default)]
struct FunctionState {
    func: Option<Function>,
    /// Loop variables in scope, innermost last
    scope: Vec<(String, IvId)>,
    next_stmt: u64,
    /// Declare unknown names as symbols instead of rejecting them
    implicit_symbols: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Annotation {
    Ordered,
    Pure,
}

impl<'a> Parser<'a> {
    pub fn new(mut lexer: Lexer<'a>) -> Result<Self> {
        let first_token = lexer.next_token()?;
        Ok(Self {
            lexer,
            current: first_token.clone(),
            previous: first_token,
            state: FunctionState::default(),
        })
    }

    /// Parse a complete program: a sequence of functions.
    pub fn parse_program(&mut self) -> Result<Program> {
        let mut program = Program::new();
        while !self.is_at_end() {
            let start = self.current.span;
            let func = self.parse_function()?;
            if program.function(&func.name).is_some() {
                return Err(self
                    .error_at(
                        ParseErrorKind::DuplicateDefinition,
                        format!("Function '{}' defined twice", func.name),
                        start,
                    )
                    .into());
            }
            program.functions.push(func);
        }
        Ok(program)
    }

    /// Parse a single `func name(params) { ... }`.
    pub fn parse_function(&mut self) -> Result<Function> {
        let start = self.current.span;
        self.consume(TokenKind::Func, "Expected 'func'")?;
        let name = self.consume_identifier("Expected function name")?;

        self.state = FunctionState {
            func: Some(Function::new(name)),
            ..FunctionState::default()
        };
        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        self.parse_parameters()?;
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;
        let body = self.parse_block()?;

        let mut func = match self.state.func.take() {
            Some(func) => func,
            None => return Err(self.error(ParseErrorKind::ExpectedStatement, "Function state lost").into()),
        };
        func.body = body;
        func.span = start.merge(&self.previous.span);
        debug!(
            "parsed function '{}' ({} symbols, {} arrays, {} statements)",
            func.name,
            func.symbols.len(),
            func.arrays.len(),
            self.state.next_stmt
        );
        Ok(func)
    }

    /// `N, A[N][M], ...`. Unknown names inside extents become symbols.
    fn parse_parameters(&mut self) -> Result<()> {
        let mut declared = HashSet::new();
        if self.check(TokenKind::RightParen) {
            return Ok(());
        }
        loop {
            let span = self.current.span;
            let name = self.consume_identifier("Expected parameter name")?;
            if !declared.insert(name.clone()) {
                return Err(self
                    .error_at(
                        ParseErrorKind::DuplicateDefinition,
                        format!("Parameter '{}' declared twice", name),
                        span,
                    )
                    .into());
            }

            if self.check(TokenKind::LeftBracket) {
                let mut extents = Vec::new();
                while self.match_token(TokenKind::LeftBracket)? {
                    let (expr, span) = self.parse_extent()?;
                    extents.push(self.affine(&expr, span)?);
                    self.consume(TokenKind::RightBracket, "Expected ']' after array extent")?;
                }
                self.func_mut()?.arrays.push(ArrayDecl { name, extents });
            } else {
                self.func_mut()?.add_symbol(name);
            }

            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        Ok(())
    }

    /// An array extent. Unknown names in it are declared as symbols.
    fn parse_extent(&mut self) -> Result<(ComputeExpr, Span)> {
        let start = self.current.span;
        self.state.implicit_symbols = true;
        let expr = self.parse_expression();
        self.state.implicit_symbols = false;
        Ok((expr?, start.merge(&self.previous.span)))
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.consume(TokenKind::LeftBrace, "Expected '{'")?;
        let mut block = Block::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            block.ops.push(self.parse_statement()?);
        }
        self.consume(TokenKind::RightBrace, "Expected '}'")?;
        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<Op> {
        let start = self.current.span;
        let annotations = self.parse_annotations()?;

        match self.current.kind {
            TokenKind::For => {
                if let Some(span) = Self::misplaced(&annotations, Annotation::Pure) {
                    return Err(self
                        .error_at(ParseErrorKind::UnknownAnnotation, "'@pure' does not apply to loops", span)
                        .into());
                }
                let ordered = annotations.iter().any(|(a, _)| *a == Annotation::Ordered);
                self.parse_for_statement(start, ordered)
            }
            TokenKind::Call => {
                if let Some(span) = Self::misplaced(&annotations, Annotation::Ordered) {
                    return Err(self
                        .error_at(ParseErrorKind::UnknownAnnotation, "'@ordered' only applies to loops", span)
                        .into());
                }
                let pure = annotations.iter().any(|(a, _)| *a == Annotation::Pure);
                self.parse_call_statement(start, pure)
            }
            _ if !annotations.is_empty() => Err(self
                .error_at(
                    ParseErrorKind::UnknownAnnotation,
                    "Annotations apply only to loops and calls",
                    annotations[0].1,
                )
                .into()),
            TokenKind::Region => self.parse_region_statement(start),
            TokenKind::Identifier => self.parse_assignment(start),
            _ => Err(self.error(ParseErrorKind::ExpectedStatement, "Expected statement").into()),
        }
    }

    fn misplaced(annotations: &[(Annotation, Span)], which: Annotation) -> Option<Span> {
        annotations.iter().find(|(a, _)| *a == which).map(|(_, span)| *span)
    }

    /// `@ordered`, `@reduce` (loops) and `@pure` (calls).
    fn parse_annotations(&mut self) -> Result<Vec<(Annotation, Span)>> {
        let mut annotations = Vec::new();
        while self.check(TokenKind::At) {
            let start = self.current.span;
            self.advance()?;
            let name = self.consume_identifier("Expected annotation name")?;
            let span = start.merge(&self.previous.span);
            let annotation = match name.as_str() {
                "ordered" | "reduce" => Annotation::Ordered,
                "pure" => Annotation::Pure,
                _ => {
                    return Err(self
                        .error_at(
                            ParseErrorKind::UnknownAnnotation,
                            format!("Unknown annotation '@{}'", name),
                            span,
                        )
                        .into())
                }
            };
            annotations.push((annotation, span));
        }
        Ok(annotations)
    }

    /// `for i = lower to upper [step s] { ... }`
    fn parse_for_statement(&mut self, start: Span, ordered: bool) -> Result<Op> {
        self.consume(TokenKind::For, "Expected 'for'")?;
        let iv_name = self.consume_identifier("Expected loop variable")?;
        self.consume(TokenKind::Equal, "Expected '=' after loop variable")?;

        let lower = self.parse_affine()?;
        self.consume(TokenKind::To, "Expected 'to' after lower bound")?;
        let upper = self.parse_affine()?;

        let step = if self.match_token(TokenKind::Step)? {
            let step_start = self.current.span;
            let step = self.parse_affine()?;
            let span = step_start.merge(&self.previous.span);
            match step.as_constant() {
                Some(s) if s > 0 => s,
                _ => {
                    return Err(self
                        .error_at(ParseErrorKind::InvalidStep, "Loop step must be a positive constant", span)
                        .into())
                }
            }
        } else {
            1
        };
        let header_span = start.merge(&self.previous.span);

        let iv = self.func_mut()?.add_iv(iv_name.clone());
        self.state.scope.push((iv_name, iv));
        let body = self.parse_block();
        self.state.scope.pop();
        let body = body?;

        let header = LoopHeader { iv, lower, upper, step, ordered };
        Ok(Op::For(AffineFor { header, body, span: header_span }))
    }

    /// `call name(A, B);` or `call name(A) { ... } { ... }`
    fn parse_call_statement(&mut self, start: Span, pure: bool) -> Result<Op> {
        self.consume(TokenKind::Call, "Expected 'call'")?;
        let name = self.consume_identifier("Expected callee name")?;
        self.consume(TokenKind::LeftParen, "Expected '(' after callee name")?;
        let mut operands = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let span = self.current.span;
                let operand = self.consume_identifier("Expected array operand")?;
                if !self.is_array(&operand)? {
                    return Err(self
                        .error_at(
                            ParseErrorKind::UndefinedName,
                            format!("Undefined array '{}'", operand),
                            span,
                        )
                        .into());
                }
                operands.push(operand);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after operands")?;

        let mut regions = Vec::new();
        if self.check(TokenKind::LeftBrace) {
            while self.check(TokenKind::LeftBrace) {
                regions.push(self.parse_block()?);
            }
        } else {
            self.consume(TokenKind::Semicolon, "Expected ';' after call")?;
        }

        Ok(Op::Opaque(OpaqueOp {
            name,
            operands,
            has_side_effects: !pure,
            regions,
            span: start.merge(&self.previous.span),
        }))
    }

    /// `region { ... }`: a side-effect free opaque op with one region.
    fn parse_region_statement(&mut self, start: Span) -> Result<Op> {
        self.consume(TokenKind::Region, "Expected 'region'")?;
        let body = self.parse_block()?;
        Ok(Op::Opaque(OpaqueOp {
            name: "region".to_string(),
            operands: Vec::new(),
            has_side_effects: false,
            regions: vec![body],
            span: start.merge(&self.previous.span),
        }))
    }

    /// `A[...] = e;`, with `+=`, `-=` and `*=` desugared to a load-modify-store.
    fn parse_assignment(&mut self, start: Span) -> Result<Op> {
        let name_span = self.current.span;
        let array = self.consume_identifier("Expected assignment target")?;
        if !self.is_array(&array)? {
            return Err(self
                .error_at(ParseErrorKind::UndefinedName, format!("Undefined array '{}'", array), name_span)
                .into());
        }
        if !self.check(TokenKind::LeftBracket) {
            return Err(self.error(ParseErrorKind::ExpectedToken, "Expected '[' after array name").into());
        }
        let target = self.parse_subscripts(array)?;

        let op = match self.current.kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            _ => return Err(self.error(ParseErrorKind::ExpectedToken, "Expected assignment operator").into()),
        };
        self.advance()?;
        let rhs = self.parse_expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after assignment")?;

        let value = match op {
            Some(op) => ComputeExpr::binary(op, ComputeExpr::Load(target.clone()), rhs),
            None => rhs,
        };
        let id = StmtId(self.state.next_stmt);
        self.state.next_stmt += 1;
        Ok(Op::Assign(Assign { id, target, value, span: start.merge(&self.previous.span) }))
    }

    fn parse_subscripts(&mut self, array: String) -> Result<ArrayRef> {
        let mut indices = Vec::new();
        while self.match_token(TokenKind::LeftBracket)? {
            let start = self.current.span;
            let expr = self.parse_expression()?;
            let span = start.merge(&self.previous.span);
            indices.push(self.affine(&expr, span)?);
            self.consume(TokenKind::RightBracket, "Expected ']' after subscript")?;
        }
        Ok(ArrayRef { array, indices })
    }

    fn parse_affine(&mut self) -> Result<AffineExpr> {
        let start = self.current.span;
        let expr = self.parse_expression()?;
        let span = start.merge(&self.previous.span);
        self.affine(&expr, span)
    }

    fn affine(&self, expr: &ComputeExpr, span: Span) -> Result<AffineExpr> {
        match to_affine(expr) {
            Some(affine) => Ok(affine),
            None => Err(self
                .error_at(
                    ParseErrorKind::NonAffine,
                    "Expression is not affine in loop variables and symbols",
                    span,
                )
                .into()),
        }
    }

    // Expression parsing with precedence climbing
    fn parse_expression(&mut self) -> Result<ComputeExpr> {
        self.parse_additive_expr()
    }

    fn parse_additive_expr(&mut self) -> Result<ComputeExpr> {
        let mut left = self.parse_multiplicative_expr()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative_expr()?;
            left = ComputeExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<ComputeExpr> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary_expr()?;
            left = ComputeExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<ComputeExpr> {
        if self.match_token(TokenKind::Minus)? {
            let operand = self.parse_unary_expr()?;
            return Ok(match operand {
                ComputeExpr::Int(v) => ComputeExpr::Int(v.wrapping_neg()),
                other => ComputeExpr::Neg(Box::new(other)),
            });
        }
        self.parse_primary_expr()
    }

    fn parse_primary_expr(&mut self) -> Result<ComputeExpr> {
        let span = self.current.span;
        match self.current.kind {
            TokenKind::Integer => {
                let value: i64 = match self.current.lexeme.parse() {
                    Ok(value) => value,
                    Err(_) => return Err(self.error(ParseErrorKind::ExpectedExpression, "Invalid integer").into()),
                };
                self.advance()?;
                Ok(ComputeExpr::Int(value))
            }
            TokenKind::Identifier => {
                let name = self.current.lexeme.clone();
                self.advance()?;
                if self.check(TokenKind::LeftBracket) {
                    if !self.is_array(&name)? {
                        return Err(self
                            .error_at(ParseErrorKind::UndefinedName, format!("Undefined array '{}'", name), span)
                            .into());
                    }
                    return Ok(ComputeExpr::Load(self.parse_subscripts(name)?));
                }
                if let Some(iv) = self.lookup_iv(&name) {
                    return Ok(ComputeExpr::Iv(iv));
                }
                let symbol = self.func()?.symbol_id(&name);
                match symbol {
                    Some(sym) => Ok(ComputeExpr::Symbol(sym)),
                    None if self.state.implicit_symbols => Ok(ComputeExpr::Symbol(self.func_mut()?.add_symbol(name))),
                    None => Err(self
                        .error_at(ParseErrorKind::UndefinedName, format!("Undefined name '{}'", name), span)
                        .into()),
                }
            }
            TokenKind::LeftParen => {
                self.advance()?;
                let inner = self.parse_expression()?;
                self.consume(TokenKind::RightParen, "Expected ')'")?;
                Ok(inner)
            }
            _ => Err(self.error(ParseErrorKind::ExpectedExpression, "Expected expression").into()),
        }
    }

    // Name resolution helpers
    fn func(&self) -> Result<&Function> {
        match self.state.func.as_ref() {
            Some(func) => Ok(func),
            None => Err(self.error(ParseErrorKind::ExpectedStatement, "Statement outside of a function").into()),
        }
    }

    fn func_mut(&mut self) -> Result<&mut Function> {
        let err = self.error(ParseErrorKind::ExpectedStatement, "Statement outside of a function");
        self.state.func.as_mut().ok_or_else(|| err.into())
    }

    fn lookup_iv(&self, name: &str) -> Option<IvId> {
        self.state.scope.iter().rev().find(|(n, _)| n == name).map(|(_, iv)| *iv)
    }

    fn is_array(&self, name: &str) -> Result<bool> {
        Ok(self.func()?.array(name).is_some())
    }

    // Token helpers
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Result<&Token> {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token()?);
        Ok(&self.previous)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(ParseErrorKind::ExpectedToken, format!("{}, expected {}", message, kind)).into())
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<String> {
        if self.check(TokenKind::Identifier) {
            let name = self.current.lexeme.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error(ParseErrorKind::ExpectedIdentifier, message).into())
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// An error at the current token.
    fn error(&self, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        self.error_at(kind, message, self.current.span)
    }

    fn error_at(&self, kind: ParseErrorKind, message: impl Into<String>, span: Span) -> ParseError {
        ParseError {
            message: message.into(),
            span,
            kind,
            found: Some(self.current.to_string()),
        }
    }
}

/// Fold a parsed expression into affine form, if it is one.
///
/// Products need a constant factor; division and remainder fold only
/// between nonzero constants.
pub fn to_affine(expr: &ComputeExpr) -> Option<AffineExpr> {
    match expr {
        ComputeExpr::Int(v) => Some(AffineExpr::constant(*v)),
        ComputeExpr::Iv(iv) => Some(AffineExpr::iv(*iv)),
        ComputeExpr::Symbol(sym) => Some(AffineExpr::symbol(*sym)),
        ComputeExpr::Load(_) => None,
        ComputeExpr::Neg(inner) => Some(-to_affine(inner)?),
        ComputeExpr::Binary { op, lhs, rhs } => {
            let (l, r) = (to_affine(lhs)?, to_affine(rhs)?);
            match op {
                BinaryOp::Add => Some(l + r),
                BinaryOp::Sub => Some(l - r),
                BinaryOp::Mul => match (l.as_constant(), r.as_constant()) {
                    (Some(c), _) => Some(r * c),
                    (_, Some(c)) => Some(l * c),
                    _ => None,
                },
                BinaryOp::Div | BinaryOp::Mod => {
                    let (a, b) = (l.as_constant()?, r.as_constant()?);
                    if b == 0 {
                        return None;
                    }
                    Some(AffineExpr::constant(if *op == BinaryOp::Div {
                        a.wrapping_div(b)
                    } else {
                        a.wrapping_rem(b)
                    }))
                }
            }
        }
    }
}
