// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::lookup::LookupTable;

/// Index of a stateful call site's slot in the model's delay arena.
/// Assigned once when the owning expression is compiled.
pub type DelayId = usize;

/// Names that resolve before constants and stocks.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum Global {
    Time,
    Dt,
    Step,
    Pi,
    E,
}

impl Global {
    pub fn from_ident(ident: &str) -> Option<Global> {
        let global = match ident {
            "TIME" | "$time" => Global::Time,
            "dt" => Global::Dt,
            "$step" => Global::Step,
            "PI" => Global::Pi,
            "E" => Global::E,
            _ => return None,
        };
        Some(global)
    }
}

/// The table argument of a LOOKUP call: either the name of a `lookup`
/// block, resolved when evaluated, or an inline list of points folded
/// at compile time.
#[derive(PartialEq, Clone, Debug)]
pub enum TableRef {
    Named(String),
    Inline(LookupTable),
}

#[derive(PartialEq, Clone, Debug)]
pub enum BuiltinFn<Expr> {
    Abs(Box<Expr>),
    Ceil(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Floor(Box<Expr>),
    Log(Box<Expr>),
    Max(Vec<Expr>),
    Min(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Round(Box<Expr>),
    Sin(Box<Expr>),
    Sqrt(Box<Expr>),
    Tan(Box<Expr>),
    // stateful model functions
    Smooth(Box<Expr>, Box<Expr>, DelayId),
    Delay(Box<Expr>, Box<Expr>, DelayId),
    DelayGradual(Box<Expr>, Box<Expr>, DelayId),
    Lookup(Box<Expr>, TableRef),
    Lookup2d(Box<Expr>, Box<Expr>, String),
}

impl<Expr> BuiltinFn<Expr> {
    pub fn name(&self) -> &'static str {
        use BuiltinFn::*;
        match self {
            Abs(_) => "abs",
            Ceil(_) => "ceil",
            Cos(_) => "cos",
            Exp(_) => "exp",
            Floor(_) => "floor",
            Log(_) => "log",
            Max(_) => "max",
            Min(_) => "min",
            Pow(_, _) => "pow",
            Round(_) => "round",
            Sin(_) => "sin",
            Sqrt(_) => "sqrt",
            Tan(_) => "tan",
            Smooth(_, _, _) => "smooth",
            Delay(_, _, _) => "delay",
            DelayGradual(_, _, _) => "delay_gradual",
            Lookup(_, _) => "lookup",
            Lookup2d(_, _, _) => "lookup2d",
        }
    }
}

/// Rounds half-way cases toward positive infinity, so `round(-2.5)` is
/// `-2` and `round(2.5)` is `3`.
pub(crate) fn round_half_up(n: f64) -> f64 {
    let floor = n.floor();
    if n - floor >= 0.5 { floor + 1.0 } else { floor }
}

#[test]
fn test_global_names() {
    assert_eq!(Some(Global::Time), Global::from_ident("TIME"));
    assert_eq!(Some(Global::Time), Global::from_ident("$time"));
    assert_eq!(Some(Global::Step), Global::from_ident("$step"));
    assert_eq!(Some(Global::Dt), Global::from_ident("dt"));
    assert_eq!(None, Global::from_ident("time"));
    assert_eq!(None, Global::from_ident("Population"));
}

#[test]
fn test_round_half_up() {
    assert_eq!(3.0, round_half_up(2.5));
    assert_eq!(-2.0, round_half_up(-2.5));
    assert_eq!(2.0, round_half_up(2.4999));
    assert_eq!(-3.0, round_half_up(-2.6));
    assert_eq!(0.0, round_half_up(0.0));
}
