//! Lexer for the loop-nest DSL.
//!
//! Tokens are produced on demand for the parser. Whitespace, `//` line
//! comments and nestable `/* */` comments separate tokens and are dropped.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::errors::{LexerError, LexerErrorKind};
use crate::utils::location::{SourceLocation, Span};
use unicode_xid::UnicodeXID;

/// Scans tokens from a source string.
pub struct Lexer<'a> {
    source: &'a str,
    /// Location of the next unread character
    pos: SourceLocation,
    /// Start of the token being scanned
    token_start: SourceLocation,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: SourceLocation::start(),
            token_start: SourceLocation::start(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos.offset += c.len_utf8();
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().map_or(false, &pred) {
            self.bump();
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.bump_while(char::is_whitespace);
            match (self.peek(), self.peek_second()) {
                (Some('/'), Some('/')) => self.bump_while(|c| c != '\n'),
                (Some('/'), Some('*')) => self.skip_block_comment(),
                _ => return,
            }
        }
    }

    /// An unterminated comment runs to the end of input.
    fn skip_block_comment(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match (c, self.peek()) {
                ('/', Some('*')) => {
                    self.bump();
                    depth += 1;
                }
                ('*', Some('/')) => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    fn span(&self) -> Span {
        Span::new(self.token_start, self.pos)
    }

    fn token(&self, kind: TokenKind) -> Token {
        let lexeme = &self.source[self.token_start.offset..self.pos.offset];
        Token::new(kind, self.span(), lexeme.to_string())
    }

    fn error(&self, kind: LexerErrorKind, message: String) -> LexerError {
        LexerError { message, span: self.span(), kind }
    }

    /// `plain`, or `compound` when an `=` follows.
    fn with_equal(&mut self, plain: TokenKind, compound: TokenKind) -> TokenKind {
        if self.peek() == Some('=') {
            self.bump();
            compound
        } else {
            plain
        }
    }

    /// Scan the next token; `Eof` is returned at the end and every time after.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_trivia();
        self.token_start = self.pos;
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(self.token(TokenKind::Eof)),
        };

        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '@' => TokenKind::At,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Equal,
            '+' => self.with_equal(TokenKind::Plus, TokenKind::PlusEqual),
            '-' => self.with_equal(TokenKind::Minus, TokenKind::MinusEqual),
            '*' => self.with_equal(TokenKind::Star, TokenKind::StarEqual),
            c if c.is_ascii_digit() => {
                self.bump_while(|c| c.is_ascii_digit());
                let token = self.token(TokenKind::Integer);
                // Literals must fit in an i64.
                if token.lexeme.parse::<i64>().is_err() {
                    let message = format!("Integer literal '{}' out of range", token.lexeme);
                    return Err(self.error(LexerErrorKind::InvalidNumber, message));
                }
                return Ok(token);
            }
            c if c == '_' || c.is_xid_start() => {
                self.bump_while(|c| c == '_' || c.is_xid_continue());
                let word = &self.source[self.token_start.offset..self.pos.offset];
                TokenKind::keyword(word).unwrap_or(TokenKind::Identifier)
            }
            c => {
                let message = format!("Unexpected character: '{}'", c);
                return Err(self.error(LexerErrorKind::UnexpectedChar, message));
            }
        };
        Ok(self.token(kind))
    }

    /// Lex the whole input. The last token is `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = vec![self.next_token()?];
        while tokens.last().map_or(false, |t| !t.is_eof()) {
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }
}
