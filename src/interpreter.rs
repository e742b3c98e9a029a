// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use float_cmp::approx_eq;
use tracing::warn;

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::{BuiltinFn, DelayId, Global, TableRef, round_half_up};
use crate::common::Result;
use crate::compiler::Expr;
use crate::delay::{self, DelayState};
use crate::lookup::{LookupTable, LookupTable2D};
use crate::model::Stock;
use crate::sim_err;

/// Zero and NaN are false; every other number is true, however small.
pub(crate) fn is_truthy(n: f64) -> bool {
    let is_false = approx_eq!(f64, n, 0.0, ulps = 4) || n.is_nan();
    !is_false
}

fn bool_to_f64(b: bool) -> f64 {
    b as i8 as f64
}

/// Evaluates compiled expressions against a borrowed view of one
/// model's state.
///
/// Names resolve in layers: globals were already split out by the
/// compiler, then constants, then live stock values.  When `delays` is
/// `None` the evaluator is in constant mode and stateful calls fail.
pub struct Evaluator<'a> {
    pub(crate) time: f64,
    pub(crate) dt: f64,
    pub(crate) step_count: u64,
    pub(crate) constants: &'a HashMap<String, f64>,
    pub(crate) stocks: &'a [Stock],
    pub(crate) stock_index: &'a HashMap<String, usize>,
    pub(crate) lookups: &'a HashMap<String, LookupTable>,
    pub(crate) lookups_2d: &'a HashMap<String, LookupTable2D>,
    pub(crate) delays: Option<&'a mut [Option<DelayState>]>,
}

impl Evaluator<'_> {
    pub fn eval(&mut self, expr: &Expr) -> Result<f64> {
        match expr {
            Expr::Const(n, _) => Ok(*n),
            Expr::Str(s, _) => sim_err!(StringInNumericContext, s.clone()),
            Expr::Global(global, _) => Ok(self.global(*global)),
            Expr::Var(id, _) => self.var(id),
            Expr::App(builtin, _) => self.apply(builtin),
            Expr::Op1(op, r, _) => {
                let r = self.eval(r)?;
                let result = match op {
                    UnaryOp::Positive => r,
                    UnaryOp::Negative => -r,
                    UnaryOp::Not => bool_to_f64(!is_truthy(r)),
                };
                Ok(result)
            }
            Expr::Op2(BinaryOp::And, l, r, _) => {
                // short circuit, so stateful calls on the right only
                // advance when they are reached
                if !is_truthy(self.eval(l)?) {
                    return Ok(0.0);
                }
                Ok(bool_to_f64(is_truthy(self.eval(r)?)))
            }
            Expr::Op2(BinaryOp::Or, l, r, _) => {
                if is_truthy(self.eval(l)?) {
                    return Ok(1.0);
                }
                Ok(bool_to_f64(is_truthy(self.eval(r)?)))
            }
            Expr::Op2(op, l, r, _) => {
                let l = self.eval(l)?;
                let r = self.eval(r)?;
                let result = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Mod => l % r,
                    BinaryOp::Gt => bool_to_f64(l > r),
                    BinaryOp::Gte => bool_to_f64(l >= r),
                    BinaryOp::Lt => bool_to_f64(l < r),
                    BinaryOp::Lte => bool_to_f64(l <= r),
                    // equal to within a few ulps, with no absolute slack
                    // near zero
                    BinaryOp::Eq => bool_to_f64(approx_eq!(f64, l, r, ulps = 4)),
                    BinaryOp::Neq => bool_to_f64(!approx_eq!(f64, l, r, ulps = 4)),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                };
                Ok(result)
            }
            Expr::If(cond, t, f, _) => {
                if is_truthy(self.eval(cond)?) {
                    self.eval(t)
                } else {
                    self.eval(f)
                }
            }
        }
    }

    fn global(&self, global: Global) -> f64 {
        match global {
            Global::Time => self.time,
            Global::Dt => self.dt,
            Global::Step => self.step_count as f64,
            Global::Pi => std::f64::consts::PI,
            Global::E => std::f64::consts::E,
        }
    }

    fn var(&self, id: &str) -> Result<f64> {
        if let Some(value) = self.constants.get(id) {
            return Ok(*value);
        }
        match self.stock_index.get(id).and_then(|&i| self.stocks.get(i)) {
            Some(stock) => Ok(stock.value),
            None => sim_err!(UnknownIdentifier, id.to_owned()),
        }
    }

    fn delay_slot(&mut self, name: &str, id: DelayId) -> Result<&mut DelayState> {
        let delays = match self.delays.as_deref_mut() {
            Some(delays) => delays,
            None => return sim_err!(StatefulInConstant, name.to_owned()),
        };
        match delays.get_mut(id) {
            Some(slot) => Ok(slot.get_or_insert_with(DelayState::default)),
            None => sim_err!(DoesNotExist, format!("delay slot {id} for {name}")),
        }
    }

    fn apply(&mut self, builtin: &BuiltinFn<Expr>) -> Result<f64> {
        let name = builtin.name();
        let result = match builtin {
            BuiltinFn::Abs(a) => self.eval(a)?.abs(),
            BuiltinFn::Ceil(a) => self.eval(a)?.ceil(),
            BuiltinFn::Cos(a) => self.eval(a)?.cos(),
            BuiltinFn::Exp(a) => self.eval(a)?.exp(),
            BuiltinFn::Floor(a) => self.eval(a)?.floor(),
            BuiltinFn::Log(a) => self.eval(a)?.ln(),
            BuiltinFn::Round(a) => round_half_up(self.eval(a)?),
            BuiltinFn::Sin(a) => self.eval(a)?.sin(),
            BuiltinFn::Sqrt(a) => self.eval(a)?.sqrt(),
            BuiltinFn::Tan(a) => self.eval(a)?.tan(),
            BuiltinFn::Max(args) => self.fold(args, f64::NEG_INFINITY, f64::max)?,
            BuiltinFn::Min(args) => self.fold(args, f64::INFINITY, f64::min)?,
            BuiltinFn::Pow(a, b) => {
                let a = self.eval(a)?;
                let b = self.eval(b)?;
                a.powf(b)
            }
            BuiltinFn::Smooth(input, time_constant, id) => {
                let input = self.eval(input)?;
                let time_constant = self.eval(time_constant)?;
                let (time, dt) = (self.time, self.dt);
                let state = self.delay_slot(name, *id)?;
                delay::smooth(state, time, dt, input, time_constant)
            }
            BuiltinFn::Delay(input, delay_time, id) => {
                let input = self.eval(input)?;
                let delay_time = self.eval(delay_time)?;
                let time = self.time;
                let state = self.delay_slot(name, *id)?;
                delay::delay(state, time, input, delay_time)
            }
            BuiltinFn::DelayGradual(input, delay_time, id) => {
                let input = self.eval(input)?;
                let delay_time = self.eval(delay_time)?;
                let time = self.time;
                let state = self.delay_slot(name, *id)?;
                delay::delay_gradual(state, time, input, delay_time)
            }
            BuiltinFn::Lookup(input, table) => {
                let input = self.eval(input)?;
                match table {
                    TableRef::Inline(table) => table.lookup(input),
                    TableRef::Named(table_name) => match self.lookups.get(table_name) {
                        Some(table) => table.lookup(input),
                        None => {
                            warn!(table = %table_name, "unknown lookup table, using 0");
                            0.0
                        }
                    },
                }
            }
            BuiltinFn::Lookup2d(x, y, table_name) => {
                let x = self.eval(x)?;
                let y = self.eval(y)?;
                match self.lookups_2d.get(table_name) {
                    Some(table) => table.lookup(x, y),
                    None => {
                        warn!(table = %table_name, "unknown 2D lookup table, using 0");
                        0.0
                    }
                }
            }
        };
        Ok(result)
    }

    /// Variadic min/max.  Any NaN argument makes the result NaN.
    fn fold(&mut self, args: &[Expr], init: f64, f: fn(f64, f64) -> f64) -> Result<f64> {
        let mut acc = init;
        for arg in args {
            let v = self.eval(arg)?;
            acc = if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                f(acc, v)
            };
        }
        Ok(acc)
    }
}
