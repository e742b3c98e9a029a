// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The simulation engine.
//!
//! A `Model` owns every piece of simulation state.  `step` advances it
//! with a two-phase Euler update: every flow's rate is computed from the
//! same pre-step stock values before any stock is changed, so the order
//! flows were declared in never biases the result.

use std::collections::HashMap;
use std::mem;

use tracing::{debug, instrument, trace, warn};

use crate::builtins::DelayId;
use crate::common::Result;
use crate::compiler::{self, CompiledExpr};
use crate::delay::DelayState;
use crate::interpreter::{Evaluator, is_truthy};
use crate::lookup::{LookupTable, LookupTable2D};
use crate::model_err;
use crate::results::{Columns, DEFAULT_HISTORY_CAPACITY, History, Snapshot};

#[derive(PartialEq, Clone, Debug)]
pub struct Stock {
    pub name: String,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub units: Option<String>,
}

impl Stock {
    pub fn new(name: &str, value: f64) -> Self {
        Stock {
            name: name.to_owned(),
            value,
            min: None,
            max: None,
            units: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_units(mut self, units: Option<String>) -> Self {
        self.units = units;
        self
    }

    /// Pull the value back inside `[min, max]`.  The lower bound is
    /// applied first, so an inverted pair of bounds settles on `max`.  A
    /// NaN value is unordered, so a bounded stock replaces it with the
    /// bound; an unbounded one keeps it.
    pub fn clamp(&mut self) {
        if let Some(min) = self.min {
            if self.value < min || self.value.is_nan() {
                self.value = min;
            }
        }
        if let Some(max) = self.max {
            if self.value > max || self.value.is_nan() {
                self.value = max;
            }
        }
    }
}

/// One side of a flow.  `External` is an unmodeled infinite source or
/// sink: nothing is debited or credited on that side.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Endpoint {
    Stock(usize),
    External,
}

#[derive(PartialEq, Clone, Debug)]
pub enum Rate {
    Const(f64),
    Expr(CompiledExpr),
}

#[derive(PartialEq, Clone, Debug)]
pub struct Flow {
    pub name: String,
    pub from: Endpoint,
    pub to: Endpoint,
    pub rate: Rate,
    pub units: Option<String>,
}

impl Flow {
    /// The rate expression as written, if the rate isn't a plain number.
    pub fn rate_text(&self) -> Option<&str> {
        match &self.rate {
            Rate::Const(_) => None,
            Rate::Expr(expr) => Some(expr.text()),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum GraphKind {
    #[default]
    Line,
    Area,
}

/// A chart requested by the model source.  The engine only stores it;
/// rendering is up to whoever reads it back.
#[derive(PartialEq, Clone, Debug)]
pub struct GraphConfig {
    pub name: String,
    pub title: String,
    pub variables: Vec<String>,
    pub kind: GraphKind,
    pub y_axis_label: Option<String>,
    pub color: Option<String>,
}

#[derive(PartialEq, Clone, Debug)]
pub enum Event {
    Stepped {
        time: f64,
        step_count: u64,
        terminated: bool,
    },
    Reset,
}

/// Notified after every step that advanced the model and after every
/// reset.
pub trait Observer {
    fn notify(&mut self, model: &Model, event: &Event);
}

impl<F> Observer for F
where
    F: FnMut(&Model, &Event),
{
    fn notify(&mut self, model: &Model, event: &Event) {
        self(model, event)
    }
}

pub struct Model {
    stocks: Vec<Stock>,
    stock_index: HashMap<String, usize>,
    initial_values: Vec<f64>,
    flows: Vec<Flow>,
    constants: HashMap<String, f64>,
    lookups: HashMap<String, LookupTable>,
    lookups_2d: HashMap<String, LookupTable2D>,
    graphs: Vec<GraphConfig>,
    termination: Option<CompiledExpr>,
    delays: Vec<Option<DelayState>>,
    history: History,
    time: f64,
    dt: f64,
    step_count: u64,
    terminated: bool,
    observers: Vec<Box<dyn Observer>>,
}

impl Default for Model {
    fn default() -> Self {
        Model::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Model::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Model {
            stocks: vec![],
            stock_index: HashMap::new(),
            initial_values: vec![],
            flows: vec![],
            constants: HashMap::new(),
            lookups: HashMap::new(),
            lookups_2d: HashMap::new(),
            graphs: vec![],
            termination: None,
            delays: vec![],
            history: History::new(capacity),
            time: 0.0,
            dt: 1.0,
            step_count: 0,
            terminated: false,
            observers: vec![],
        }
    }

    /// Add a stock, remembering its value as the one `reset` restores.  A
    /// stock with the same name as an existing one replaces it in place.
    pub fn add_stock(&mut self, stock: Stock) {
        match self.stock_index.get(&stock.name) {
            Some(&i) => {
                self.initial_values[i] = stock.value;
                self.stocks[i] = stock;
            }
            None => {
                self.stock_index
                    .insert(stock.name.clone(), self.stocks.len());
                self.initial_values.push(stock.value);
                self.stocks.push(stock);
            }
        }
    }

    pub fn add_constant(&mut self, name: &str, value: f64) {
        self.constants.insert(name.to_owned(), value);
    }

    pub fn add_lookup_table(&mut self, name: &str, table: LookupTable) {
        self.lookups.insert(name.to_owned(), table);
    }

    pub fn add_lookup_table_2d(&mut self, name: &str, table: LookupTable2D) {
        self.lookups_2d.insert(name.to_owned(), table);
    }

    pub fn add_graph(&mut self, graph: GraphConfig) {
        self.graphs.push(graph);
    }

    /// Compile `text` for this model, claiming delay slots for its
    /// stateful calls.
    pub fn try_compile(&mut self, text: &str) -> Result<CompiledExpr> {
        let mut next: DelayId = self.delays.len();
        let expr = compiler::compile(text, &mut next)?;
        self.delays.resize(next, None);
        Ok(expr)
    }

    /// Like `try_compile`, but an expression that fails to compile is
    /// logged and replaced with the constant 0.
    pub fn compile(&mut self, text: &str) -> CompiledExpr {
        match self.try_compile(text) {
            Ok(expr) => expr,
            Err(err) => {
                warn!(expr = text, error = %err, "failed to compile expression, using 0");
                CompiledExpr::fallback(text)
            }
        }
    }

    /// Resolve a flow endpoint by stock name.  `source`, `sink` and
    /// names that aren't stocks are all external.
    pub fn endpoint(&self, name: &str) -> Endpoint {
        match name {
            "source" | "sink" => Endpoint::External,
            _ => match self.stock_index.get(name) {
                Some(&i) => Endpoint::Stock(i),
                None => {
                    warn!(stock = name, "flow endpoint is not a stock, treating as external");
                    Endpoint::External
                }
            },
        }
    }

    /// Add a flow.  A flow with the same name as an existing one replaces
    /// it in place.
    pub fn add_flow(
        &mut self,
        name: &str,
        from: Endpoint,
        to: Endpoint,
        rate: Rate,
        units: Option<String>,
    ) {
        let flow = Flow {
            name: name.to_owned(),
            from,
            to,
            rate,
            units,
        };
        match self.flows.iter().position(|f| f.name == name) {
            Some(i) => self.flows[i] = flow,
            None => self.flows.push(flow),
        }
    }

    pub fn set_termination_condition(&mut self, text: &str) {
        self.termination = Some(self.compile(text));
    }

    pub fn clear_termination_condition(&mut self) {
        self.termination = None;
    }

    /// Evaluate `text` as a constant expression: globals, constants and
    /// lookup tables are visible, stocks and stateful calls are not.
    pub fn eval_constant(&self, text: &str) -> Result<f64> {
        let mut next: DelayId = 0;
        let expr = compiler::compile(text, &mut next)?;
        let no_stocks = HashMap::new();
        let mut evaluator = Evaluator {
            time: self.time,
            dt: self.dt,
            step_count: self.step_count,
            constants: &self.constants,
            stocks: &[],
            stock_index: &no_stocks,
            lookups: &self.lookups,
            lookups_2d: &self.lookups_2d,
            delays: None,
        };
        evaluator.eval(expr.expr())
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Append a snapshot of the current stock values to the history.
    pub fn record_snapshot(&mut self) {
        self.history.push(Snapshot {
            time: self.time,
            values: self.stocks.iter().map(|s| s.value).collect(),
        });
    }

    fn evaluator<'a>(
        &'a self,
        dt: f64,
        delays: &'a mut [Option<DelayState>],
    ) -> Evaluator<'a> {
        Evaluator {
            time: self.time,
            dt,
            step_count: self.step_count,
            constants: &self.constants,
            stocks: &self.stocks,
            stock_index: &self.stock_index,
            lookups: &self.lookups,
            lookups_2d: &self.lookups_2d,
            delays: Some(delays),
        }
    }

    /// Advance the model by `dt`.  Does nothing once terminated.
    #[instrument(level = "trace", skip(self), fields(time = self.time))]
    pub fn step(&mut self, dt: f64) {
        if self.terminated {
            trace!("model is terminated, ignoring step");
            return;
        }
        self.dt = dt;

        let mut delays = mem::take(&mut self.delays);

        // every rate sees the same pre-step state
        let amounts: Vec<f64> = {
            let mut evaluator = self.evaluator(dt, &mut delays);
            self.flows
                .iter()
                .map(|flow| {
                    let amount = eval_rate(&mut evaluator, flow) * dt;
                    if amount.is_finite() {
                        amount
                    } else {
                        warn!(flow = %flow.name, amount, "flow amount is not finite, using 0");
                        0.0
                    }
                })
                .collect()
        };

        for (flow, amount) in self.flows.iter().zip(amounts) {
            if let Endpoint::Stock(i) = flow.from {
                if let Some(stock) = self.stocks.get_mut(i) {
                    stock.value -= amount;
                }
            }
            if let Endpoint::Stock(i) = flow.to {
                if let Some(stock) = self.stocks.get_mut(i) {
                    stock.value += amount;
                }
            }
        }

        for stock in self.stocks.iter_mut() {
            stock.clamp();
        }

        self.time += dt;
        self.step_count += 1;
        self.record_snapshot();

        if let Some(condition) = &self.termination {
            let mut evaluator = self.evaluator(dt, &mut delays);
            if eval_termination(&mut evaluator, condition) {
                debug!(time = self.time, step_count = self.step_count, "termination condition met");
                self.terminated = true;
            }
        }

        self.delays = delays;

        self.notify(Event::Stepped {
            time: self.time,
            step_count: self.step_count,
            terminated: self.terminated,
        });
    }

    /// Take up to `steps` steps of size `dt`, stopping early on
    /// termination.
    pub fn run(&mut self, steps: usize, dt: f64) {
        self.run_until_terminated(steps, dt);
    }

    /// Like `run`, returning the number of steps that advanced the model.
    pub fn run_until_terminated(&mut self, max_steps: usize, dt: f64) -> usize {
        let mut taken = 0;
        while taken < max_steps && !self.terminated {
            self.step(dt);
            taken += 1;
        }
        taken
    }

    /// Return to the state right after the model was built: initial stock
    /// values, time and step count zeroed, no history beyond one fresh
    /// snapshot, and every delay slot emptied.
    pub fn reset(&mut self) {
        for (stock, initial) in self.stocks.iter_mut().zip(self.initial_values.iter()) {
            stock.value = *initial;
        }
        self.time = 0.0;
        self.dt = 1.0;
        self.step_count = 0;
        self.terminated = false;
        self.history.clear();
        for slot in self.delays.iter_mut() {
            *slot = None;
        }
        self.record_snapshot();
        debug!(stocks = self.stocks.len(), "model reset");

        self.notify(Event::Reset);
    }

    /// The current rate of every flow, in `flows()` order.  Stateful calls
    /// run against a scratch copy of their state, so this doesn't disturb
    /// the simulation.
    pub fn flow_rates(&self) -> Vec<f64> {
        let mut scratch = self.delays.clone();
        let mut evaluator = self.evaluator(self.dt, &mut scratch);
        self.flows
            .iter()
            .map(|flow| eval_rate(&mut evaluator, flow))
            .collect()
    }

    fn notify(&mut self, event: Event) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = mem::take(&mut self.observers);
        for observer in observers.iter_mut() {
            observer.notify(self, &event);
        }
        self.observers = observers;
    }

    pub fn stocks(&self) -> &[Stock] {
        &self.stocks
    }

    pub fn stock(&self, name: &str) -> Option<&Stock> {
        self.stock_index.get(name).map(|&i| &self.stocks[i])
    }

    pub fn stock_value(&self, name: &str) -> Option<f64> {
        self.stock(name).map(|s| s.value)
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn constants(&self) -> &HashMap<String, f64> {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    pub fn lookup_tables(&self) -> &HashMap<String, LookupTable> {
        &self.lookups
    }

    pub fn lookup_tables_2d(&self) -> &HashMap<String, LookupTable2D> {
        &self.lookups_2d
    }

    pub fn graphs(&self) -> &[GraphConfig] {
        &self.graphs
    }

    pub fn graph(&self, name: &str) -> Option<&GraphConfig> {
        self.graphs.iter().find(|g| g.name == name)
    }

    /// History columns for the variables of `graph`, or for every stock
    /// when no graph is named.  Graph variables that aren't stocks are
    /// skipped.
    pub fn columns(&self, graph: Option<&str>) -> Result<Columns<'_>> {
        let names: Vec<&str> = match graph {
            Some(name) => match self.graph(name) {
                Some(graph) => graph.variables.iter().map(String::as_str).collect(),
                None => return model_err!(DoesNotExist, format!("graph '{name}'")),
            },
            None => self.stocks.iter().map(|s| s.name.as_str()).collect(),
        };

        let mut columns = Columns {
            names: Vec::with_capacity(names.len()),
            indexes: Vec::with_capacity(names.len()),
        };
        for name in names {
            match self.stock_index.get(name) {
                Some(&i) => {
                    columns.names.push(name);
                    columns.indexes.push(i);
                }
                None => warn!(variable = name, "graph variable isn't a stock, skipping it"),
            }
        }
        Ok(columns)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// The `dt` of the most recent step; 1 before the first.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn termination_text(&self) -> Option<&str> {
        self.termination.as_ref().map(|t| t.text())
    }

    /// Delay arena contents, indexed by `DelayId`.  `None` marks a slot
    /// whose call hasn't been evaluated since the last reset.
    pub fn delay_slots(&self) -> &[Option<DelayState>] {
        &self.delays
    }
}

fn eval_rate(evaluator: &mut Evaluator<'_>, flow: &Flow) -> f64 {
    match &flow.rate {
        Rate::Const(rate) => *rate,
        Rate::Expr(expr) => match evaluator.eval(expr.expr()) {
            Ok(rate) if rate.is_finite() => rate,
            Ok(rate) => {
                warn!(flow = %flow.name, expr = expr.text(), rate, "rate is not finite, using 0");
                0.0
            }
            Err(err) => {
                warn!(flow = %flow.name, expr = expr.text(), error = %err, "rate evaluation failed, using 0");
                0.0
            }
        },
    }
}

fn eval_termination(evaluator: &mut Evaluator<'_>, condition: &CompiledExpr) -> bool {
    match evaluator.eval(condition.expr()) {
        Ok(value) => is_truthy(value),
        Err(err) => {
            warn!(expr = condition.text(), error = %err, "termination evaluation failed, treating as false");
            false
        }
    }
}
