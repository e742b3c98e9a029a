// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Hand-written recursive descent parser for rate and termination
//! expressions.
//!
//! Precedence, lowest to highest: ternary (`c ? a : b` and
//! `if c then a else b`), `||`, `&&`, `== !=`, `< <= > >=`, `+ -`,
//! `* / %`, unary `- + !`, then calls and atoms.

use crate::ast::{BinaryOp, Expr0, Loc, UnaryOp, UntypedBuiltinFn};
use crate::common::{EquationError, ErrorCode};
use crate::token::{Lexer, Spanned, Token};


/// TokenKind discriminant for efficient peek comparisons without payload matching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    If,
    Then,
    Else,
    Eq,
    Neq,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Question,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Ident,
    Num,
    Str,
}

impl<'a> From<&Token<'a>> for TokenKind {
    fn from(token: &Token<'a>) -> Self {
        match token {
            Token::If => TokenKind::If,
            Token::Then => TokenKind::Then,
            Token::Else => TokenKind::Else,
            Token::Eq => TokenKind::Eq,
            Token::Neq => TokenKind::Neq,
            Token::Not => TokenKind::Not,
            Token::Lt => TokenKind::Lt,
            Token::Lte => TokenKind::Lte,
            Token::Gt => TokenKind::Gt,
            Token::Gte => TokenKind::Gte,
            Token::And => TokenKind::And,
            Token::Or => TokenKind::Or,
            Token::Plus => TokenKind::Plus,
            Token::Minus => TokenKind::Minus,
            Token::Mul => TokenKind::Mul,
            Token::Div => TokenKind::Div,
            Token::Mod => TokenKind::Mod,
            Token::Question => TokenKind::Question,
            Token::Colon => TokenKind::Colon,
            Token::LParen => TokenKind::LParen,
            Token::RParen => TokenKind::RParen,
            Token::LBracket => TokenKind::LBracket,
            Token::RBracket => TokenKind::RBracket,
            Token::Comma => TokenKind::Comma,
            Token::Ident(_) => TokenKind::Ident,
            Token::Num(_) => TokenKind::Num,
            Token::Str(_) => TokenKind::Str,
        }
    }
}

/// Parser state holding tokenized input
struct Parser<'input> {
    tokens: Vec<Spanned<Token<'input>>>,
    pos: usize,
}

impl<'input> Parser<'input> {
    /// Create a new parser from a lexer, collecting all tokens up front.
    /// Returns an error if the lexer produces any errors.
    fn new(lexer: Lexer<'input>) -> Result<Self, EquationError> {
        let tokens = lexer.collect::<Result<Vec<_>, _>>()?;
        Ok(Parser { tokens, pos: 0 })
    }

    /// Peek at the current token without consuming it
    fn peek(&self) -> Option<&Spanned<Token<'input>>> {
        self.tokens.get(self.pos)
    }

    /// Peek at the kind of the current token
    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|(_, tok, _)| TokenKind::from(tok))
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens
            .get(self.pos + offset)
            .map(|(_, tok, _)| TokenKind::from(tok))
    }

    /// Advance to the next token and return a copy of the consumed token
    fn advance(&mut self) -> Option<Spanned<Token<'input>>> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume the current token, which the caller has already peeked.
    fn bump(&mut self) -> Result<Spanned<Token<'input>>, EquationError> {
        match self.advance() {
            Some(tok) => Ok(tok),
            None => Err(self.eof_error()),
        }
    }

    /// Expect the current token to match the expected kind, returning an error if not
    fn expect(&mut self, expected: TokenKind) -> Result<Spanned<Token<'input>>, EquationError> {
        if self.peek_kind() == Some(expected) {
            self.bump()
        } else if let Some((start, _, end)) = self.peek() {
            Err(EquationError {
                start: *start as u16,
                end: *end as u16,
                code: ErrorCode::UnrecognizedToken,
            })
        } else {
            Err(self.eof_error())
        }
    }

    fn eof_error(&self) -> EquationError {
        let pos = self.eof_position();
        EquationError {
            start: pos as u16,
            end: (pos + 1) as u16,
            code: ErrorCode::UnrecognizedEof,
        }
    }

    /// Get the position for EOF errors
    fn eof_position(&self) -> usize {
        if let Some((_, _, end)) = self.tokens.last() {
            *end
        } else {
            0
        }
    }

    /// Check if we've consumed all tokens
    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Parse an equation from the token stream.
    /// Returns Ok(None) for empty input or comment-only input.
    fn parse_equation(&mut self) -> Result<Option<Expr0>, EquationError> {
        if self.is_at_end() {
            return Ok(None);
        }

        let expr = self.parse_expr()?;

        // Check for extra tokens after the expression
        if let Some((start, _, end)) = self.peek() {
            return Err(EquationError {
                start: *start as u16,
                end: *end as u16,
                code: ErrorCode::ExtraToken,
            });
        }

        Ok(Some(expr))
    }

    /// Parse a top-level expression (includes both conditional forms)
    fn parse_expr(&mut self) -> Result<Expr0, EquationError> {
        if self.peek_kind() == Some(TokenKind::If) {
            self.parse_if()
        } else {
            self.parse_ternary()
        }
    }

    /// Parse if-then-else expression
    fn parse_if(&mut self) -> Result<Expr0, EquationError> {
        let (lpos, _, _) = self.expect(TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then)?;
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Else)?;
        let else_expr = self.parse_expr()?;
        let rpos = else_expr.get_loc().end as usize;
        Ok(Expr0::If(
            Box::new(cond),
            Box::new(then_expr),
            Box::new(else_expr),
            Loc::new(lpos, rpos),
        ))
    }

    /// Parse `cond ? a : b`; right associative, so `a ? b : c ? d : e`
    /// groups as `a ? b : (c ? d : e)`
    fn parse_ternary(&mut self) -> Result<Expr0, EquationError> {
        let cond = self.parse_or()?;
        if self.peek_kind() != Some(TokenKind::Question) {
            return Ok(cond);
        }
        self.bump()?;
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let else_expr = self.parse_expr()?;
        let loc = cond.get_loc().union(&else_expr.get_loc());
        Ok(Expr0::If(
            Box::new(cond),
            Box::new(then_expr),
            Box::new(else_expr),
            loc,
        ))
    }

    /// Parse left-associative binary operators at one precedence level.
    fn parse_binary<F>(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        mut next: F,
    ) -> Result<Expr0, EquationError>
    where
        F: FnMut(&mut Self) -> Result<Expr0, EquationError>,
    {
        let mut left = next(self)?;

        while let Some(kind) = self.peek_kind() {
            let op = match ops.iter().find(|(k, _)| *k == kind) {
                Some((_, op)) => *op,
                None => break,
            };
            self.bump()?;
            let right = next(self)?;
            let loc = left.get_loc().union(&right.get_loc());
            left = Expr0::Op2(op, Box::new(left), Box::new(right), loc);
        }

        Ok(left)
    }

    /// Parse `||` - lowest precedence binary op
    fn parse_or(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(&[(TokenKind::Or, BinaryOp::Or)], Self::parse_and)
    }

    /// Parse `&&`
    fn parse_and(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(&[(TokenKind::And, BinaryOp::And)], Self::parse_equality)
    }

    /// Parse equality operators (==, !=)
    fn parse_equality(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(
            &[(TokenKind::Eq, BinaryOp::Eq), (TokenKind::Neq, BinaryOp::Neq)],
            Self::parse_comparison,
        )
    }

    /// Parse comparison operators (<, <=, >, >=)
    fn parse_comparison(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Lte, BinaryOp::Lte),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Gte, BinaryOp::Gte),
            ],
            Self::parse_additive,
        )
    }

    /// Parse additive operators (+, -)
    fn parse_additive(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::parse_multiplicative,
        )
    }

    /// Parse multiplicative operators (*, /, %)
    fn parse_multiplicative(&mut self) -> Result<Expr0, EquationError> {
        self.parse_binary(
            &[
                (TokenKind::Mul, BinaryOp::Mul),
                (TokenKind::Div, BinaryOp::Div),
                (TokenKind::Mod, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    /// Parse unary operators (+, -, !)
    fn parse_unary(&mut self) -> Result<Expr0, EquationError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Plus) => UnaryOp::Positive,
            Some(TokenKind::Minus) => UnaryOp::Negative,
            Some(TokenKind::Not) => UnaryOp::Not,
            _ => return self.parse_app(),
        };
        let (lpos, _, _) = self.bump()?;
        let operand = self.parse_unary()?;
        let rpos = operand.get_loc().end as usize;
        Ok(Expr0::Op1(op, Box::new(operand), Loc::new(lpos, rpos)))
    }

    /// Parse function application: id(args)
    fn parse_app(&mut self) -> Result<Expr0, EquationError> {
        if self.peek_kind() == Some(TokenKind::Ident)
            && self.peek_kind_at(1) == Some(TokenKind::LParen)
        {
            let (lpos, tok, _) = self.bump()?;
            let name = match tok {
                Token::Ident(s) => s.to_lowercase(),
                _ => unreachable!(),
            };

            self.bump()?; // consume '('
            let args = self.parse_comma_separated_exprs(TokenKind::RParen)?;
            let (_, _, rpos) = self.expect(TokenKind::RParen)?;

            return Ok(Expr0::App(
                UntypedBuiltinFn(name, args),
                Loc::new(lpos, rpos),
            ));
        }

        self.parse_atom()
    }

    /// Parse an atomic expression (number, string, identifier, list,
    /// parenthesized expression)
    fn parse_atom(&mut self) -> Result<Expr0, EquationError> {
        let (lpos, tok, rpos) = match self.peek() {
            Some(tok) => *tok,
            None => return Err(self.eof_error()),
        };
        match tok {
            Token::Num(s) => {
                self.bump()?;
                match s.parse::<f64>() {
                    Ok(n) => Ok(Expr0::Const(s.to_string(), n, Loc::new(lpos, rpos))),
                    Err(_) => Err(EquationError {
                        start: lpos as u16,
                        end: rpos as u16,
                        code: ErrorCode::ExpectedNumber,
                    }),
                }
            }
            Token::Str(s) => {
                self.bump()?;
                Ok(Expr0::Str(s.to_string(), Loc::new(lpos, rpos)))
            }
            Token::Ident(s) => {
                self.bump()?;
                Ok(Expr0::Var(s.to_string(), Loc::new(lpos, rpos)))
            }
            Token::LParen => {
                self.bump()?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.bump()?;
                let elements = self.parse_comma_separated_exprs(TokenKind::RBracket)?;
                let (_, _, rpos) = self.expect(TokenKind::RBracket)?;
                Ok(Expr0::List(elements, Loc::new(lpos, rpos)))
            }
            _ => Err(EquationError {
                start: lpos as u16,
                end: rpos as u16,
                code: ErrorCode::UnrecognizedToken,
            }),
        }
    }

    /// Parse comma-separated expressions up to (but not including) the
    /// closing token, for function arguments and list elements
    fn parse_comma_separated_exprs(
        &mut self,
        close: TokenKind,
    ) -> Result<Vec<Expr0>, EquationError> {
        let mut exprs = Vec::new();

        // Handle empty list
        if self.peek_kind() == Some(close) {
            return Ok(exprs);
        }

        exprs.push(self.parse_expr()?);

        while self.peek_kind() == Some(TokenKind::Comma) {
            self.bump()?; // consume ','

            // Handle trailing comma
            if self.peek_kind() == Some(close) {
                break;
            }

            exprs.push(self.parse_expr()?);
        }

        Ok(exprs)
    }
}

/// Parse an expression string into an AST.
///
/// Returns:
/// - `Ok(Some(expr))` for valid expressions
/// - `Ok(None)` for empty or comment-only input
/// - `Err(error)` for parse errors
pub fn parse(input: &str) -> Result<Option<Expr0>, Vec<EquationError>> {
    let lexer = Lexer::new(input);
    let mut parser = match Parser::new(lexer) {
        Ok(p) => p,
        Err(e) => return Err(vec![e]),
    };

    parser.parse_equation().map_err(|e| vec![e])
}
