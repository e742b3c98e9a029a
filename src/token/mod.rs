// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

// derived from both the LALRPOP whitespace tokenizer, and LALRPOP's
// internal tokenizer

use std::str::CharIndices;

use lazy_static::lazy_static;
use regex::Regex;
use unicode_xid::UnicodeXID;

use self::Token::*;
use crate::common::ErrorCode::*;
use crate::common::{EquationError, ErrorCode};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'input> {
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
    Ident(&'input str),
    Num(&'input str),
    // contents between the quotes
    Str(&'input str),
}

fn error<T>(code: ErrorCode, start: usize, end: usize) -> Result<T, EquationError> {
    Err(EquationError {
        start: start as u16,
        end: end as u16,
        code,
    })
}

pub type Spanned<T> = (usize, T, usize);

pub struct Lexer<'input> {
    text: &'input str,
    chars: CharIndices<'input>,
    lookahead: Option<(usize, char)>,
}

const KEYWORDS: &[(&str, Token<'static>)] = &[("if", If), ("then", Then), ("else", Else)];

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        let mut t = Lexer {
            text: input,
            chars: input.char_indices(),
            lookahead: None,
        };
        t.bump();
        t
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.bump_n(1)
    }

    fn bump_n(&mut self, n: usize) -> Option<(usize, char)> {
        debug_assert!(n > 0);
        self.lookahead = self.chars.nth(n - 1);
        self.lookahead
    }

    fn word(&mut self, idx0: usize) -> Spanned<&'input str> {
        // eat the first character, which may be a '$'
        self.bump();
        match self.take_while(is_identifier_continue) {
            Some(end) => (idx0, &self.text[idx0..end], end),
            None => (idx0, &self.text[idx0..], self.text.len()),
        }
    }

    fn take_while<F>(&mut self, mut keep_going: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        self.take_until(|c| !keep_going(c))
    }

    fn take_until<F>(&mut self, mut terminate: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        loop {
            match self.lookahead {
                None => {
                    return None;
                }
                Some((idx1, c)) => {
                    if terminate(c) {
                        return Some(idx1);
                    } else {
                        self.bump();
                    }
                }
            }
        }
    }

    fn identifierish(&mut self, idx0: usize) -> Spanned<Token<'input>> {
        let (start, word, end) = self.word(idx0);
        let lower_word = word.to_lowercase();

        // keywords are matched case-insensitively, anything else is an
        // identifier resolved later against the model
        let tok = KEYWORDS
            .iter()
            .filter(|&&(w, _)| w == lower_word)
            .map(|(_, t)| *t)
            .next()
            .unwrap_or(Ident(word));

        (start, tok, end)
    }

    fn number(&mut self, idx0: usize) -> Spanned<Token<'input>> {
        lazy_static! {
            static ref NUMBER_RE: Regex = Regex::new(r"^\d*(\.\d*)?([eE][-+]?\d+)?").unwrap();
        }

        // is_number_start guarantees at least one char matches
        let len = NUMBER_RE
            .find(&self.text[idx0..])
            .map(|m| m.end())
            .unwrap_or(1)
            .max(1);

        let n_chars = self.text[idx0..idx0 + len].chars().count();
        self.bump_n(n_chars);

        let end = idx0 + len;
        (idx0, Num(&self.text[idx0..end]), end)
    }

    fn string(&mut self, idx0: usize) -> Result<Spanned<Token<'input>>, EquationError> {
        // eat the opening '"'
        self.bump();

        match self.take_until(|c| c == '"') {
            Some(idx1) => {
                // eat the trailing '"'
                self.bump();
                Ok((idx0, Str(&self.text[idx0 + 1..idx1]), idx1 + 1))
            }
            None => error(UnclosedQuotedString, idx0, self.text.len()),
        }
    }

    fn line_comment(&mut self) {
        self.take_until(|c| c == '\n');
    }

    #[allow(clippy::unnecessary_wraps)]
    fn consume(
        &mut self,
        i: usize,
        tok: Token<'input>,
        len: usize,
    ) -> Option<Result<Spanned<Token<'input>>, EquationError>> {
        self.bump();
        Some(Ok((i, tok, i + len)))
    }

    /// `==`, `===`, `!=` and `!==` all collapse into a single token; the
    /// first `=` has already been consumed by the caller.
    fn equality(
        &mut self,
        i: usize,
        tok: Token<'input>,
    ) -> Option<Result<Spanned<Token<'input>>, EquationError>> {
        match self.bump() {
            Some((_, '=')) => self.consume(i, tok, 3),
            // we've already bumped, don't consume
            _ => Some(Ok((i, tok, i + 2))),
        }
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<Spanned<Token<'input>>, EquationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            return match self.lookahead {
                Some((i, '/')) => {
                    match self.bump() {
                        Some((_, '/')) => {
                            self.line_comment();
                            continue;
                        }
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Div, i + 1))),
                    }
                }
                Some((i, '=')) => {
                    match self.bump() {
                        Some((_, '=')) => self.equality(i, Eq),
                        // assignment has no meaning inside an expression
                        _ => Some(error(InvalidToken, i, i + 1)),
                    }
                }
                Some((i, '!')) => {
                    match self.bump() {
                        Some((_, '=')) => self.equality(i, Neq),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Not, i + 1))),
                    }
                }
                Some((i, '<')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Lte, 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Lt, i + 1))),
                    }
                }
                Some((i, '>')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Gte, 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Gt, i + 1))),
                    }
                }
                Some((i, '&')) => {
                    match self.bump() {
                        Some((_, '&')) => self.consume(i, And, 2),
                        // we've already bumped, don't consume
                        _ => Some(error(UnrecognizedToken, i, i + 1)),
                    }
                }
                Some((i, '|')) => {
                    match self.bump() {
                        Some((_, '|')) => self.consume(i, Or, 2),
                        // we've already bumped, don't consume
                        _ => Some(error(UnrecognizedToken, i, i + 1)),
                    }
                }
                Some((i, '-')) => self.consume(i, Minus, 1),
                Some((i, '+')) => self.consume(i, Plus, 1),
                Some((i, '*')) => self.consume(i, Mul, 1),
                Some((i, '%')) => self.consume(i, Mod, 1),
                Some((i, '?')) => self.consume(i, Question, 1),
                Some((i, ':')) => self.consume(i, Colon, 1),
                Some((i, '(')) => self.consume(i, LParen, 1),
                Some((i, ')')) => self.consume(i, RParen, 1),
                Some((i, '[')) => self.consume(i, LBracket, 1),
                Some((i, ']')) => self.consume(i, RBracket, 1),
                Some((i, ',')) => self.consume(i, Comma, 1),
                Some((i, '"')) => Some(self.string(i)),
                Some((i, c)) if is_identifier_start(c) => Some(Ok(self.identifierish(i))),
                Some((i, c)) if is_number_start(c) => Some(Ok(self.number(i))),
                Some((_, c)) if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                Some((i, _)) => {
                    self.bump(); // eat whatever is killing us
                    let end = match self.lookahead {
                        Some((end, _)) => end,
                        None => self.text.len(),
                    };
                    Some(error(UnrecognizedToken, i, end))
                }
                None => None,
            };
        }
    }
}

fn is_number_start(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

fn is_identifier_start(c: char) -> bool {
    UnicodeXID::is_xid_start(c) || c == '_' || c == '$'
}

fn is_identifier_continue(c: char) -> bool {
    UnicodeXID::is_xid_continue(c)
}
