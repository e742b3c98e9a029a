// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs;

use float_cmp::approx_eq;

use stockflow::results::{self, Snapshot};
use stockflow::{Declaration, Endpoint, Model, Stock, build_model, parse_declarations, parse_model};

fn load(name: &str) -> String {
    let path = format!("{}/test/{}", env!("CARGO_MANIFEST_DIR"), name);
    fs::read_to_string(&path).unwrap_or_else(|err| panic!("failed to read {path}: {err}"))
}

fn value(model: &Model, name: &str) -> f64 {
    model
        .stock_value(name)
        .unwrap_or_else(|| panic!("no stock named {name}"))
}

#[test]
fn population_first_step() {
    let mut model = parse_model(&load("population.model"));
    assert_eq!(2, model.stocks().len());
    assert_eq!(3, model.flows().len());
    assert_eq!(Some(0.02), model.constant("BIRTH_RATE"));

    model.step(1.0);
    assert!(approx_eq!(f64, 101.0, value(&model, "Population"), ulps = 4));
    assert!(approx_eq!(f64, 90.0, value(&model, "Resources"), ulps = 4));
    assert_eq!(1.0, model.time());
    assert_eq!(1, model.step_count());
}

#[test]
fn population_famine_lags_one_step() {
    let mut model = parse_model(&load("population.model"));

    let mut famine_steps = 0;
    let mut first_famine_step = None;
    for step in 0..20 {
        if model.is_terminated() {
            break;
        }
        let population = value(&model, "Population");
        let resources = value(&model, "Resources");
        let famine = if resources < 50.0 { 0.25 } else { 0.0 };

        model.step(1.0);

        let expected = (population + population * 0.02 - population * (0.01 + famine)).max(0.0);
        let actual = value(&model, "Population");
        assert!(
            approx_eq!(f64, expected, actual, epsilon = 1e-9),
            "step {step}: expected {expected}, got {actual}"
        );

        // the jump shows up on the step after the crossing
        let crossed = value(&model, "Resources") < 50.0;
        if crossed && first_famine_step.is_none() {
            first_famine_step = Some(step);
        }
        if famine > 0.0 {
            famine_steps += 1;
            assert!(first_famine_step.is_some_and(|first| first < step));
        }
    }
    assert!(first_famine_step.is_some());
    assert!(famine_steps > 0);
}

#[test]
fn population_runs_until_terminated() {
    let mut model = parse_model(&load("population.model"));
    let taken = model.run_until_terminated(1000, 1.0);
    assert!(model.is_terminated());
    assert!(taken < 1000);
    assert!(value(&model, "Population") < 10.0);
    assert!(value(&model, "Resources") >= 0.0);

    let frozen = model.history().last().cloned();
    model.run(10, 1.0);
    assert_eq!(frozen.as_ref(), model.history().last());
    assert_eq!(taken as u64, model.step_count());
}

#[test]
fn reset_matches_fresh_parse() {
    let source = "
stock Input {
  initial: 0
}
stock Output {
  initial: 0
}
flow Fill {
  from: source
  to: Input
  rate: TIME < 4 ? 5 : 0
}
flow Drain {
  from: source
  to: Output
  rate: DELAY(Input, 3) + SMOOTH(Input, 2) - DELAY_GRADUAL(Input, 1.5)
}
";
    let mut model = parse_model(source);
    model.run(7, 0.25);
    model.reset();
    model.run(30, 0.5);
    let replayed: Vec<Snapshot> = model.history().iter().cloned().collect();

    let mut fresh = parse_model(source);
    fresh.run(30, 0.5);
    let expected: Vec<Snapshot> = fresh.history().iter().cloned().collect();

    assert_eq!(expected, replayed);
}

#[test]
fn batched_runs_match_single_steps() {
    let source = load("population.model");

    let mut stepped = parse_model(&source);
    for _ in 0..40 {
        stepped.step(0.5);
    }

    let mut batched = parse_model(&source);
    for batch in [7, 13, 1, 19] {
        batched.run(batch, 0.5);
    }

    let stepped: Vec<Snapshot> = stepped.history().iter().cloned().collect();
    let batched: Vec<Snapshot> = batched.history().iter().cloned().collect();
    assert_eq!(stepped, batched);
}

#[test]
fn names_resolve_whole() {
    let mut model = parse_model(
        "
stock Rate {
  initial: 7
}
stock BirthRate {
  initial: 0.5
}
stock Counter {
  initial: 0
}
flow Tally {
  from: source
  to: Counter
  rate: BirthRate * 2 + Rate
}
",
    );
    assert_eq!(vec![8.0], model.flow_rates());
    model.step(1.0);
    assert_eq!(Some(8.0), model.stock_value("Counter"));
}

#[test]
fn delay_occurrences_are_independent() {
    let mut model = parse_model(
        "
stock Fast {
  initial: 0
}
stock Slow {
  initial: 0
}
stock Out {
  initial: 0
}
flow FillFast {
  from: source
  to: Fast
  rate: 10
}
flow FillSlow {
  from: source
  to: Slow
  rate: 1
}
flow Lagged {
  from: source
  to: Out
  rate: DELAY(Fast, 2) + DELAY(Slow, 2)
}
",
    );
    model.run(10, 1.0);
    let slots = model.delay_slots();
    assert_eq!(2, slots.len());
    assert!(slots.iter().all(|slot| slot.is_some()));
    assert_ne!(slots[0], slots[1]);
}

#[test]
fn unknown_identifiers_fall_back_to_zero() {
    let mut model = parse_model(
        "
stock S {
  initial: 1
}
flow Grow {
  from: source
  to: S
  rate: Populaton * 0.1
}
terminate {
  when: Nonexistent > 0
}
",
    );
    model.run(5, 1.0);
    assert_eq!(Some(1.0), model.stock_value("S"));
    assert_eq!(5, model.step_count());
    assert!(!model.is_terminated());
}

#[test]
fn lookups_extrapolate_flat() {
    let model = parse_model(
        "
lookup Ramp {
  [0, 0]
  [10, 10]
}
stock Low {
  initial: LOOKUP(-5, Ramp)
}
stock Mid {
  initial: LOOKUP(5, Ramp)
}
stock High {
  initial: LOOKUP(15, Ramp)
}
stock Missing {
  initial: 3 + LOOKUP(5, Nope)
}
",
    );
    assert_eq!(Some(0.0), model.stock_value("Low"));
    assert_eq!(Some(5.0), model.stock_value("Mid"));
    assert_eq!(Some(10.0), model.stock_value("High"));
    assert_eq!(Some(3.0), model.stock_value("Missing"));
}

#[test]
fn lookup_2d_from_source() {
    let mut model = parse_model(
        "
lookup2d Yield {
  [0, 0]: 0
  [10, 0]: 10
  [0, 10]: 20
  [10, 10]: 30
}
stock Harvest {
  initial: 0
}
flow Reap {
  from: source
  to: Harvest
  rate: LOOKUP2D(5, 5, Yield)
}
",
    );
    model.step(1.0);
    assert_eq!(Some(15.0), model.stock_value("Harvest"));
}

#[test]
fn build_on_existing_model() {
    let declarations = parse_declarations(&load("population.model"));
    assert!(matches!(
        declarations.first(),
        Some(Declaration::Const { name, .. }) if name == "BIRTH_RATE"
    ));

    let mut base = Model::with_history_capacity(5);
    base.add_stock(Stock::new("Extra", 1.0));
    let mut model = build_model(base, &declarations);
    assert_eq!(3, model.stocks().len());
    assert_eq!(Endpoint::Stock(1), model.flow("Births").map(|f| f.to).unwrap());

    model.run(20, 1.0);
    assert!(model.history().len() <= 5);
}

#[test]
fn graph_columns_to_tsv() {
    let mut model = parse_model(&load("population.model"));
    model.step(1.0);

    let graph = model.graph("Overview").unwrap();
    assert_eq!("Population and resources", graph.title);
    let columns = model.columns(Some("Overview")).unwrap();
    assert_eq!(vec![0, 1], columns.indexes);

    let mut out = vec![];
    results::write_tsv(&mut out, &columns, model.history()).unwrap();
    assert_eq!(
        "time\tPopulation\tResources\n0\t100\t100\n1\t101\t90\n",
        String::from_utf8(out).unwrap()
    );
}
