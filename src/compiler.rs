// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Lowering of parsed expressions into the form the interpreter runs.
//!
//! Compilation resolves every call against the builtin table, checks
//! arities, turns global names into `Expr::Global`, folds inline lookup
//! tables and hands each stateful call its own delay arena slot.  Plain
//! identifiers stay names: they are looked up against constants and
//! stocks each time the expression is evaluated.

use crate::ast::{BinaryOp, Expr0, Loc, UnaryOp, UntypedBuiltinFn};
use crate::builtins::{BuiltinFn, DelayId, Global, TableRef};
use crate::common::{EquationError, EquationResult, Error, ErrorCode, ErrorKind, Result};
use crate::eqn_err;
use crate::lookup::LookupTable;
use crate::parser::parse;

#[derive(PartialEq, Clone, Debug)]
pub enum Expr {
    Const(f64, Loc),
    Str(String, Loc),
    Global(Global, Loc),
    Var(String, Loc),
    App(BuiltinFn<Expr>, Loc),
    Op1(UnaryOp, Box<Expr>, Loc),
    Op2(BinaryOp, Box<Expr>, Box<Expr>, Loc),
    If(Box<Expr>, Box<Expr>, Box<Expr>, Loc),
}

impl Expr {
    pub fn get_loc(&self) -> Loc {
        match self {
            Expr::Const(_, loc) => *loc,
            Expr::Str(_, loc) => *loc,
            Expr::Global(_, loc) => *loc,
            Expr::Var(_, loc) => *loc,
            Expr::App(_, loc) => *loc,
            Expr::Op1(_, _, loc) => *loc,
            Expr::Op2(_, _, _, loc) => *loc,
            Expr::If(_, _, _, loc) => *loc,
        }
    }

    fn collect_delay_ids(&self, ids: &mut Vec<DelayId>) {
        match self {
            Expr::Const(_, _) | Expr::Str(_, _) | Expr::Global(_, _) | Expr::Var(_, _) => {}
            Expr::App(builtin, _) => {
                use BuiltinFn::*;
                match builtin {
                    Abs(a) | Ceil(a) | Cos(a) | Exp(a) | Floor(a) | Log(a) | Round(a)
                    | Sin(a) | Sqrt(a) | Tan(a) | Lookup(a, _) => a.collect_delay_ids(ids),
                    Max(args) | Min(args) => {
                        args.iter().for_each(|arg| arg.collect_delay_ids(ids));
                    }
                    Pow(a, b) | Lookup2d(a, b, _) => {
                        a.collect_delay_ids(ids);
                        b.collect_delay_ids(ids);
                    }
                    Smooth(a, b, id) | Delay(a, b, id) | DelayGradual(a, b, id) => {
                        ids.push(*id);
                        a.collect_delay_ids(ids);
                        b.collect_delay_ids(ids);
                    }
                }
            }
            Expr::Op1(_, r, _) => r.collect_delay_ids(ids),
            Expr::Op2(_, l, r, _) => {
                l.collect_delay_ids(ids);
                r.collect_delay_ids(ids);
            }
            Expr::If(cond, t, f, _) => {
                cond.collect_delay_ids(ids);
                t.collect_delay_ids(ids);
                f.collect_delay_ids(ids);
            }
        }
    }
}

/// An expression compiled for one model, along with the text it was
/// compiled from.
#[derive(PartialEq, Clone, Debug)]
pub struct CompiledExpr {
    text: String,
    expr: Expr,
}

impl CompiledExpr {
    /// The stand-in for an expression that failed to compile: it always
    /// evaluates to 0, which is never truthy.
    pub fn fallback(text: &str) -> Self {
        CompiledExpr {
            text: text.to_owned(),
            expr: Expr::Const(0.0, Loc::default()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Delay arena slots owned by stateful calls in this expression, in
    /// source order.
    pub fn delay_ids(&self) -> Vec<DelayId> {
        let mut ids = vec![];
        self.expr.collect_delay_ids(&mut ids);
        ids
    }
}

/// Compile `text`, numbering stateful call sites from `next_delay_id`.
/// On success `next_delay_id` has been advanced past every slot the
/// expression claimed.
pub fn compile(text: &str, next_delay_id: &mut DelayId) -> Result<CompiledExpr> {
    let ast = match parse(text) {
        Ok(Some(ast)) => ast,
        Ok(None) => {
            return Err(Error::new(
                ErrorKind::Parse,
                ErrorCode::EmptyEquation,
                Some(format!("'{text}'")),
            ));
        }
        Err(errs) => {
            // the parser stops at its first error
            let err = errs.first().cloned().unwrap_or(EquationError {
                start: 0,
                end: 0,
                code: ErrorCode::Generic,
            });
            return Err(Error::from_equation(&err, text));
        }
    };

    let mut compiler = Compiler {
        next_delay_id: *next_delay_id,
    };
    let expr = compiler
        .lower(ast)
        .map_err(|err| Error::from_equation(&err, text))?;
    *next_delay_id = compiler.next_delay_id;

    Ok(CompiledExpr {
        text: text.to_owned(),
        expr,
    })
}

struct Compiler {
    next_delay_id: DelayId,
}

impl Compiler {
    fn alloc_delay(&mut self) -> DelayId {
        let id = self.next_delay_id;
        self.next_delay_id += 1;
        id
    }

    fn lower(&mut self, expr: Expr0) -> EquationResult<Expr> {
        let expr = match expr {
            Expr0::Const(_, n, loc) => Expr::Const(n, loc),
            Expr0::Str(s, loc) => Expr::Str(s, loc),
            Expr0::Var(id, loc) => match Global::from_ident(&id) {
                Some(global) => Expr::Global(global, loc),
                None => Expr::Var(id, loc),
            },
            Expr0::App(UntypedBuiltinFn(func, args), loc) => {
                Expr::App(self.lower_builtin(&func, args, loc)?, loc)
            }
            Expr0::List(_, loc) => {
                return eqn_err!(ListInNumericContext, loc.start, loc.end);
            }
            Expr0::Op1(op, r, loc) => Expr::Op1(op, Box::new(self.lower(*r)?), loc),
            Expr0::Op2(op, l, r, loc) => {
                let l = self.lower(*l)?;
                let r = self.lower(*r)?;
                Expr::Op2(op, Box::new(l), Box::new(r), loc)
            }
            Expr0::If(cond, t, f, loc) => {
                let cond = self.lower(*cond)?;
                let t = self.lower(*t)?;
                let f = self.lower(*f)?;
                Expr::If(Box::new(cond), Box::new(t), Box::new(f), loc)
            }
        };
        Ok(expr)
    }

    fn lower_builtin(
        &mut self,
        func: &str,
        mut args: Vec<Expr0>,
        loc: Loc,
    ) -> EquationResult<BuiltinFn<Expr>> {
        macro_rules! check_arity {
            ($builtin_fn:tt, 1) => {{
                if args.len() != 1 {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                let a = self.lower(args.remove(0))?;
                BuiltinFn::$builtin_fn(Box::new(a))
            }};
            ($builtin_fn:tt, 2) => {{
                if args.len() != 2 {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                let b = args.remove(1);
                let a = self.lower(args.remove(0))?;
                let b = self.lower(b)?;
                BuiltinFn::$builtin_fn(Box::new(a), Box::new(b))
            }};
            ($builtin_fn:tt, stateful) => {{
                if args.len() != 2 {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                // the outer call claims its slot before any nested ones
                let id = self.alloc_delay();
                let b = args.remove(1);
                let a = self.lower(args.remove(0))?;
                let b = self.lower(b)?;
                BuiltinFn::$builtin_fn(Box::new(a), Box::new(b), id)
            }};
            ($builtin_fn:tt, variadic) => {{
                if args.is_empty() {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                let args: EquationResult<Vec<Expr>> =
                    args.into_iter().map(|arg| self.lower(arg)).collect();
                BuiltinFn::$builtin_fn(args?)
            }};
        }

        let builtin = match func {
            "abs" => check_arity!(Abs, 1),
            "ceil" => check_arity!(Ceil, 1),
            "cos" => check_arity!(Cos, 1),
            "exp" => check_arity!(Exp, 1),
            "floor" => check_arity!(Floor, 1),
            "log" => check_arity!(Log, 1),
            "round" => check_arity!(Round, 1),
            "sin" => check_arity!(Sin, 1),
            "sqrt" => check_arity!(Sqrt, 1),
            "tan" => check_arity!(Tan, 1),
            "max" => check_arity!(Max, variadic),
            "min" => check_arity!(Min, variadic),
            "pow" => check_arity!(Pow, 2),
            "smooth" => check_arity!(Smooth, stateful),
            "delay" => check_arity!(Delay, stateful),
            "delay_gradual" => check_arity!(DelayGradual, stateful),
            "lookup" => {
                if args.len() != 2 {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                let table = table_ref(args.remove(1))?;
                let input = self.lower(args.remove(0))?;
                BuiltinFn::Lookup(Box::new(input), table)
            }
            "lookup2d" => {
                if args.len() != 3 {
                    return eqn_err!(BadBuiltinArgs, loc.start, loc.end);
                }

                let table = table_name(args.remove(2))?;
                let y = args.remove(1);
                let x = self.lower(args.remove(0))?;
                let y = self.lower(y)?;
                BuiltinFn::Lookup2d(Box::new(x), Box::new(y), table)
            }
            _ => return eqn_err!(UnknownBuiltin, loc.start, loc.end),
        };

        Ok(builtin)
    }
}

fn table_name(expr: Expr0) -> EquationResult<String> {
    match expr {
        Expr0::Var(name, _) | Expr0::Str(name, _) => Ok(name),
        other => {
            let loc = other.get_loc();
            eqn_err!(BadTable, loc.start, loc.end)
        }
    }
}

fn table_ref(expr: Expr0) -> EquationResult<TableRef> {
    match expr {
        Expr0::List(rows, _) => {
            let points: EquationResult<Vec<(f64, f64)>> = rows.into_iter().map(table_row).collect();
            Ok(TableRef::Inline(LookupTable::new(&points?)))
        }
        other => Ok(TableRef::Named(table_name(other)?)),
    }
}

fn table_row(row: Expr0) -> EquationResult<(f64, f64)> {
    let loc = row.get_loc();
    match row {
        Expr0::List(mut pair, _) if pair.len() == 2 => {
            let y = literal(pair.remove(1))?;
            let x = literal(pair.remove(0))?;
            Ok((x, y))
        }
        _ => eqn_err!(BadTable, loc.start, loc.end),
    }
}

/// A numeric literal, optionally signed.
fn literal(expr: Expr0) -> EquationResult<f64> {
    match expr {
        Expr0::Const(_, n, _) => Ok(n),
        Expr0::Op1(UnaryOp::Negative, inner, _) => Ok(-literal(*inner)?),
        Expr0::Op1(UnaryOp::Positive, inner, _) => literal(*inner),
        other => {
            let loc = other.get_loc();
            eqn_err!(BadTable, loc.start, loc.end)
        }
    }
}
