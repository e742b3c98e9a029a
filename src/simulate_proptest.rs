// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Property-based tests for stepping: stocks stay inside their bounds,
//! and how steps are batched never changes the trajectory.

use proptest::prelude::*;

use crate::builder::parse_model;
use crate::model::Model;
use crate::results::Snapshot;

#[derive(Clone, Debug)]
struct StockSpec {
    initial: f64,
    min: Option<f64>,
    span: Option<f64>,
}

#[derive(Clone, Debug)]
struct FlowSpec {
    from: Option<usize>,
    to: Option<usize>,
    rate: String,
}

fn small_f64() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        (-500i32..500).prop_map(|x| x as f64),
        (-100i32..100).prop_map(|x| x as f64 / 4.0),
    ]
}

fn stock_strategy() -> impl Strategy<Value = StockSpec> {
    (
        small_f64(),
        proptest::option::of(small_f64()),
        proptest::option::of(0i32..200),
    )
        .prop_map(|(initial, min, span)| StockSpec {
            initial,
            min,
            span: span.map(|s| s as f64),
        })
}

fn rate_strategy(stocks: usize) -> impl Strategy<Value = String> {
    prop_oneof![
        small_f64().prop_map(|n| format!("{n}")),
        (0..stocks, 1i32..50).prop_map(|(i, k)| format!("S{i} * {}", k as f64 / 100.0)),
        (0..stocks, 0..stocks).prop_map(|(a, b)| format!("S{a} > S{b} ? 3 : -2")),
        (0..stocks, 1i32..5).prop_map(|(i, d)| format!("DELAY(S{i}, {d}) * 0.1")),
        (0..stocks, 1i32..5).prop_map(|(i, d)| format!("SMOOTH(S{i}, {d}) - TIME")),
    ]
}

fn flow_strategy(stocks: usize) -> impl Strategy<Value = FlowSpec> {
    (
        proptest::option::of(0..stocks),
        proptest::option::of(0..stocks),
        rate_strategy(stocks),
    )
        .prop_map(|(from, to, rate)| FlowSpec { from, to, rate })
}

fn model_strategy() -> impl Strategy<Value = String> {
    (1usize..5)
        .prop_flat_map(|n| {
            (
                proptest::collection::vec(stock_strategy(), n),
                proptest::collection::vec(flow_strategy(n), 0..6),
            )
        })
        .prop_map(|(stocks, flows)| source(&stocks, &flows))
}

fn source(stocks: &[StockSpec], flows: &[FlowSpec]) -> String {
    let mut text = String::new();
    for (i, stock) in stocks.iter().enumerate() {
        text.push_str(&format!("stock S{i} {{\n  initial: {}\n", stock.initial));
        if let Some(min) = stock.min {
            text.push_str(&format!("  min: {min}\n"));
        }
        if let Some(span) = stock.span {
            let max = stock.min.unwrap_or(0.0) + span;
            text.push_str(&format!("  max: {max}\n"));
        }
        text.push_str("}\n");
    }
    let endpoint = |side: Option<usize>, external: &str| match side {
        Some(i) => format!("S{i}"),
        None => external.to_owned(),
    };
    for (i, flow) in flows.iter().enumerate() {
        text.push_str(&format!(
            "flow F{i} {{\n  from: {}\n  to: {}\n  rate: {}\n}}\n",
            endpoint(flow.from, "source"),
            endpoint(flow.to, "sink"),
            flow.rate
        ));
    }
    text
}

fn snapshots(model: &Model) -> Vec<Snapshot> {
    model.history().iter().cloned().collect()
}

proptest! {
    #[test]
    fn stocks_stay_within_bounds(source in model_strategy(), steps in 1usize..30) {
        let mut model = parse_model(&source);
        for _ in 0..steps {
            model.step(0.5);
            for stock in model.stocks() {
                if let Some(min) = stock.min {
                    prop_assert!(stock.value >= min, "{} = {} < {}", stock.name, stock.value, min);
                }
                if let Some(max) = stock.max {
                    prop_assert!(stock.value <= max, "{} = {} > {}", stock.name, stock.value, max);
                }
            }
        }
    }

    #[test]
    fn batching_does_not_change_results(
        source in model_strategy(),
        batches in proptest::collection::vec(0usize..8, 1..6),
    ) {
        let total: usize = batches.iter().sum();

        let mut stepped = parse_model(&source);
        for _ in 0..total {
            stepped.step(1.0);
        }

        let mut batched = parse_model(&source);
        for batch in batches {
            batched.run(batch, 1.0);
        }

        prop_assert_eq!(stepped.step_count(), batched.step_count());
        prop_assert_eq!(snapshots(&stepped), snapshots(&batched));
    }
}

proptest! {
    #[test]
    fn reset_replays_like_a_fresh_model(
        source in model_strategy(),
        warmup in 0usize..15,
        steps in 1usize..20,
    ) {
        let mut model = parse_model(&source);
        model.run(warmup, 0.5);
        model.reset();
        model.run(steps, 1.0);

        let mut fresh = parse_model(&source);
        fresh.run(steps, 1.0);

        prop_assert_eq!(snapshots(&fresh), snapshots(&model));
    }
}
