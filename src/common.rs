// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DoesNotExist, // the named entity doesn't exist
    InvalidToken,
    UnrecognizedEof,
    UnrecognizedToken,
    ExtraToken,
    UnclosedQuotedString,
    ExpectedNumber,
    EmptyEquation,
    UnknownBuiltin,
    BadBuiltinArgs,
    BadTable,
    UnknownIdentifier,
    StringInNumericContext,
    ListInNumericContext,
    StatefulInConstant,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            DoesNotExist => "does_not_exist",
            InvalidToken => "invalid_token",
            UnrecognizedEof => "unrecognized_eof",
            UnrecognizedToken => "unrecognized_token",
            ExtraToken => "extra_token",
            UnclosedQuotedString => "unclosed_quoted_string",
            ExpectedNumber => "expected_number",
            EmptyEquation => "empty_equation",
            UnknownBuiltin => "unknown_builtin",
            BadBuiltinArgs => "bad_builtin_args",
            BadTable => "bad_table",
            UnknownIdentifier => "unknown_identifier",
            StringInNumericContext => "string_in_numeric_context",
            ListInNumericContext => "list_in_numeric_context",
            StatefulInConstant => "stateful_in_constant",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

/// EquationError is a problem with a single expression, located by the
/// byte range of the offending text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EquationError {
    pub start: u16,
    pub end: u16,
    pub code: ErrorCode,
}

impl fmt::Display for EquationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.code)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Model,
    Simulation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }

    /// Lift a positioned expression error into a model-level error,
    /// carrying the offending text in the details.
    pub fn from_equation(err: &EquationError, text: &str) -> Self {
        let start = (err.start as usize).min(text.len());
        let end = (err.end as usize).clamp(start, text.len());
        let fragment = text.get(start..end).unwrap_or("");
        Error {
            kind: ErrorKind::Parse,
            code: err.code,
            details: Some(format!("'{text}' at {}:{} ('{fragment}')", err.start, err.end)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Model => "ModelError",
            ErrorKind::Simulation => "SimulationError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Model, ErrorCode::Generic, Some(err.to_string()))
    }
}

pub type Result<T> = result::Result<T, Error>;
pub type EquationResult<T> = result::Result<T, EquationError>;

#[macro_export]
macro_rules! eqn_err(
    ($code:tt, $start:expr, $end:expr) => {{
        use $crate::common::{EquationError, ErrorCode};
        Err(EquationError{ start: $start, end: $end, code: ErrorCode::$code})
    }}
);

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Model,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! sim_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Simulation,
            ErrorCode::$code,
            Some($str),
        ))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Simulation, ErrorCode::$code, None))
    }};
}

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Simulation,
        ErrorCode::UnknownIdentifier,
        Some("Populaton".to_owned()),
    );
    assert_eq!("SimulationError{unknown_identifier: Populaton}", format!("{err}"));

    let err = Error::new(ErrorKind::Model, ErrorCode::BadTable, None);
    assert_eq!("ModelError{bad_table}", format!("{err}"));
}

#[test]
fn test_error_from_equation() {
    let eqn_err = EquationError {
        start: 4,
        end: 5,
        code: ErrorCode::UnrecognizedToken,
    };
    let err = Error::from_equation(&eqn_err, "a + ) b");
    assert_eq!(ErrorKind::Parse, err.kind);
    assert_eq!(ErrorCode::UnrecognizedToken, err.code);
    assert_eq!(Some("'a + ) b' at 4:5 (')')".to_owned()), err.details);

    // out-of-range spans never panic
    let eqn_err = EquationError {
        start: 10,
        end: 12,
        code: ErrorCode::UnrecognizedEof,
    };
    let err = Error::from_equation(&eqn_err, "a +");
    assert_eq!(Some("'a +' at 10:12 ('')".to_owned()), err.details);
}
