// Copyright 2020 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;

/// Loc describes a location in an equation by the starting point and ending point.
/// Equations are strings typed by humans for a single variable -- u16 is long enough.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Hash)]
pub struct Loc {
    pub start: u16,
    pub end: u16,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl Loc {
    pub fn new(start: usize, end: usize) -> Self {
        Loc {
            start: start as u16,
            end: end as u16,
        }
    }

    /// union takes a second Loc and returns the inclusive range from the
    /// start of the earlier token to the end of the later token.
    pub fn union(&self, rhs: &Self) -> Self {
        Loc {
            start: self.start.min(rhs.start),
            end: self.end.max(rhs.end),
        }
    }
}

/// A call to a function that hasn't been checked against the builtin
/// table yet: the lowercased function name and its arguments.
#[derive(PartialEq, Clone, Debug)]
pub struct UntypedBuiltinFn<Expr>(pub String, pub Vec<Expr>);

/// Expr0 represents a parsed expression, before any calls to builtin
/// functions have been checked/resolved.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr0 {
    Const(String, f64, Loc),
    Str(String, Loc),
    Var(String, Loc),
    App(UntypedBuiltinFn<Expr0>, Loc),
    List(Vec<Expr0>, Loc),
    Op1(UnaryOp, Box<Expr0>, Loc),
    Op2(BinaryOp, Box<Expr0>, Box<Expr0>, Loc),
    If(Box<Expr0>, Box<Expr0>, Box<Expr0>, Loc),
}

impl Expr0 {
    pub(crate) fn get_loc(&self) -> Loc {
        match self {
            Expr0::Const(_, _, loc) => *loc,
            Expr0::Str(_, loc) => *loc,
            Expr0::Var(_, loc) => *loc,
            Expr0::App(_, loc) => *loc,
            Expr0::List(_, loc) => *loc,
            Expr0::Op1(_, _, loc) => *loc,
            Expr0::Op2(_, _, _, loc) => *loc,
            Expr0::If(_, _, _, loc) => *loc,
        }
    }

    #[cfg(test)]
    pub(crate) fn strip_loc(self) -> Self {
        let loc = Loc::default();
        match self {
            Expr0::Const(s, n, _loc) => Expr0::Const(s, n, loc),
            Expr0::Str(s, _loc) => Expr0::Str(s, loc),
            Expr0::Var(v, _loc) => Expr0::Var(v, loc),
            Expr0::App(UntypedBuiltinFn(builtin, args), _loc) => Expr0::App(
                UntypedBuiltinFn(
                    builtin,
                    args.into_iter().map(|arg| arg.strip_loc()).collect(),
                ),
                loc,
            ),
            Expr0::List(elements, _loc) => {
                Expr0::List(elements.into_iter().map(|e| e.strip_loc()).collect(), loc)
            }
            Expr0::Op1(op, r, _loc) => Expr0::Op1(op, Box::new(r.strip_loc()), loc),
            Expr0::Op2(op, l, r, _loc) => {
                Expr0::Op2(op, Box::new(l.strip_loc()), Box::new(r.strip_loc()), loc)
            }
            Expr0::If(cond, t, f, _loc) => Expr0::If(
                Box::new(cond.strip_loc()),
                Box::new(t.strip_loc()),
                Box::new(f.strip_loc()),
                loc,
            ),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    And,
    Or,
}

impl BinaryOp {
    fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Gte => ">=",
            BinaryOp::Lte => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
}

pub trait Visitor<T> {
    fn walk(&mut self, e: &Expr0) -> T;
}

struct PrintVisitor {}

impl Visitor<String> for PrintVisitor {
    fn walk(&mut self, expr: &Expr0) -> String {
        match expr {
            Expr0::Const(s, _, _) => s.clone(),
            Expr0::Str(s, _) => format!("\"{s}\""),
            Expr0::Var(id, _) => id.clone(),
            Expr0::App(UntypedBuiltinFn(func, args), _) => {
                let args: Vec<String> = args.iter().map(|e| self.walk(e)).collect();
                format!("{}({})", func, args.join(", "))
            }
            Expr0::List(elements, _) => {
                let elements: Vec<String> = elements.iter().map(|e| self.walk(e)).collect();
                format!("[{}]", elements.join(", "))
            }
            Expr0::Op1(op, l, _) => {
                let l = self.walk(l);
                let op: &str = match op {
                    UnaryOp::Positive => "+",
                    UnaryOp::Negative => "-",
                    UnaryOp::Not => "!",
                };
                format!("{op}{l}")
            }
            Expr0::Op2(op, l, r, _) => {
                let l = self.walk(l);
                let r = self.walk(r);
                format!("({} {} {})", l, op.as_str(), r)
            }
            Expr0::If(cond, t, f, _) => {
                let cond = self.walk(cond);
                let t = self.walk(t);
                let f = self.walk(f);
                format!("({cond} ? {t} : {f})")
            }
        }
    }
}

/// print_eqn renders an expression fully parenthesized, which makes
/// the parsed precedence visible.
pub fn print_eqn(expr: &Expr0) -> String {
    let mut visitor = PrintVisitor {};
    visitor.walk(expr)
}

#[test]
fn test_loc_basics() {
    let a = Loc { start: 3, end: 7 };
    assert_eq!(a, Loc::new(3, 7));

    let b = Loc { start: 4, end: 11 };
    assert_eq!(Loc::new(3, 11), a.union(&b));

    let c = Loc { start: 1, end: 5 };
    assert_eq!(Loc::new(1, 7), a.union(&c));
}

#[test]
fn test_print_eqn() {
    let var = |id: &str| Box::new(Expr0::Var(id.to_owned(), Loc::default()));
    assert_eq!(
        "(a + b)",
        print_eqn(&Expr0::Op2(BinaryOp::Add, var("a"), var("b"), Loc::default()))
    );
    assert_eq!(
        "-a",
        print_eqn(&Expr0::Op1(UnaryOp::Negative, var("a"), Loc::default()))
    );
    assert_eq!(
        "!a",
        print_eqn(&Expr0::Op1(UnaryOp::Not, var("a"), Loc::default()))
    );
    assert_eq!(
        "4.7",
        print_eqn(&Expr0::Const("4.7".to_string(), 4.7, Loc::default()))
    );
    assert_eq!(
        "(c ? a : b)",
        print_eqn(&Expr0::If(var("c"), var("a"), var("b"), Loc::default()))
    );
    assert_eq!(
        "lookup(a, Prices)",
        print_eqn(&Expr0::App(
            UntypedBuiltinFn(
                "lookup".to_string(),
                vec![
                    Expr0::Var("a".to_string(), Loc::default()),
                    Expr0::Var("Prices".to_string(), Loc::default()),
                ]
            ),
            Loc::default()
        ))
    );
}
