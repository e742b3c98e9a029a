// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use tracing::{debug, warn};

use crate::dsl::{Declaration, Properties, PropertyValue, parse_declarations};
use crate::lookup::{LookupTable, LookupTable2D};
use crate::model::{Endpoint, GraphConfig, GraphKind, Model, Rate, Stock};

/// Parse model source and build a ready-to-run model from it.
pub fn parse_model(text: &str) -> Model {
    build_model(Model::new(), &parse_declarations(text))
}

/// Populate `model` from declarations.
///
/// Lookup tables go in first so constants can use them.  Constants,
/// stocks and graphs follow in source order, so a constant only sees the
/// constants declared before it.  Flows and the termination condition
/// come last, once every stock they might name exists.  The built model
/// has recorded its initial snapshot.
pub fn build_model(mut model: Model, declarations: &[Declaration]) -> Model {
    for declaration in declarations {
        match declaration {
            Declaration::Lookup { name, points } => {
                model.add_lookup_table(name, LookupTable::new(points));
            }
            Declaration::Lookup2d { name, points } => {
                model.add_lookup_table_2d(name, LookupTable2D::new(name, points));
            }
            _ => {}
        }
    }

    for declaration in declarations {
        match declaration {
            Declaration::Const { name, value } => {
                let value = constant_value(&model, name, value).unwrap_or(0.0);
                model.add_constant(name, value);
            }
            Declaration::Stock { name, properties } => {
                let stock = build_stock(&model, name, properties);
                model.add_stock(stock);
            }
            Declaration::Graph { name, properties } => {
                model.add_graph(build_graph(name, properties));
            }
            _ => {}
        }
    }

    let mut termination: Option<String> = None;
    for declaration in declarations {
        match declaration {
            Declaration::Flow { name, properties } => add_flow(&mut model, name, properties),
            Declaration::Terminate { properties } => {
                if let Some(when) = termination_text(properties) {
                    termination = Some(when);
                }
            }
            _ => {}
        }
    }
    if let Some(when) = termination {
        model.set_termination_condition(&when);
    }

    model.record_snapshot();
    debug!(
        stocks = model.stocks().len(),
        flows = model.flows().len(),
        constants = model.constants().len(),
        "model built"
    );

    model
}

/// A number as written, or the value of a constant expression.  Failures
/// are logged and yield `None`.
fn constant_value(model: &Model, name: &str, value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::Num(n) => Some(*n),
        PropertyValue::Str(text) | PropertyValue::Expr(text) => match model.eval_constant(text) {
            Ok(n) => Some(n),
            Err(err) => {
                warn!(name, expr = %text, error = %err, "constant expression failed");
                None
            }
        },
    }
}

fn build_stock(model: &Model, name: &str, properties: &Properties) -> Stock {
    let property = |key: &str| {
        properties
            .get(key)
            .and_then(|value| constant_value(model, name, value))
    };

    let initial = property("initial").unwrap_or(0.0);
    Stock::new(name, initial)
        .with_bounds(property("min"), property("max"))
        .with_units(properties.get("units").map(PropertyValue::text))
}

fn build_graph(name: &str, properties: &Properties) -> GraphConfig {
    let text = |key: &str| properties.get(key).map(PropertyValue::text);

    let variables = text("variables")
        .map(|vars| {
            vars.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let kind = match text("type").as_deref() {
        Some("area") => GraphKind::Area,
        _ => GraphKind::Line,
    };

    GraphConfig {
        name: name.to_owned(),
        title: text("title")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| name.to_owned()),
        variables,
        kind,
        y_axis_label: text("yAxisLabel"),
        color: text("color"),
    }
}

fn add_flow(model: &mut Model, name: &str, properties: &Properties) {
    let endpoint = |model: &Model, key: &str| match properties.get(key) {
        Some(value) => model.endpoint(&value.text()),
        None => Endpoint::External,
    };
    let from = endpoint(model, "from");
    let to = endpoint(model, "to");

    let rate = match properties.get("rate") {
        Some(PropertyValue::Num(n)) => Rate::Const(*n),
        Some(PropertyValue::Str(text)) | Some(PropertyValue::Expr(text)) => {
            Rate::Expr(model.compile(text))
        }
        None => Rate::Const(0.0),
    };

    let units = properties.get("units").map(PropertyValue::text);
    model.add_flow(name, from, to, rate, units);
}

/// The `when` of a terminate block, unless it's missing or trivially
/// false.
fn termination_text(properties: &Properties) -> Option<String> {
    match properties.get("when")? {
        PropertyValue::Num(n) if *n == 0.0 || n.is_nan() => None,
        value => Some(value.text()).filter(|t| !t.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_resolve_in_order() {
        let model = parse_model(
            "
const A = 2
const B = A * 3 + max(1, 4)
const C = D + 1
const D = 5
const E2 = sqrt(B + 6)
const BAD = A +
",
        );
        assert_eq!(Some(2.0), model.constant("A"));
        assert_eq!(Some(10.0), model.constant("B"));
        // D isn't declared yet when C is resolved
        assert_eq!(Some(0.0), model.constant("C"));
        assert_eq!(Some(5.0), model.constant("D"));
        assert_eq!(Some(4.0), model.constant("E2"));
        assert_eq!(Some(0.0), model.constant("BAD"));
    }

    #[test]
    fn test_constants_cannot_read_stocks() {
        let model = parse_model(
            "
stock S {
  initial: 10
}
const K = S * 2
",
        );
        assert_eq!(Some(0.0), model.constant("K"));
    }

    #[test]
    fn test_stock_properties() {
        let model = parse_model(
            r#"
const START = 40
lookup Scale {
  [0, 0]
  [1, 2]
}
stock A {
  initial: START * 2
  min: 0
  max: START + 60
  units: "widgets"
}
stock B {
  min: Missing
}
stock C {
  initial: LOOKUP(0.5, Scale)
}
"#,
        );
        let a = model.stock("A").unwrap();
        assert_eq!(80.0, a.value);
        assert_eq!(Some(0.0), a.min);
        assert_eq!(Some(100.0), a.max);
        assert_eq!(Some("widgets".to_owned()), a.units);

        let b = model.stock("B").unwrap();
        assert_eq!(0.0, b.value);
        assert_eq!(None, b.min);

        assert_eq!(Some(1.0), model.stock_value("C"));
    }

    #[test]
    fn test_flows_resolve_after_all_stocks() {
        let model = parse_model(
            "
flow Transfer {
  from: Early
  to: Late
  rate: 5
}
flow Leak {
  from: Early
  to: Nowhere
  rate: \"Early * 0.1\"
}
flow Idle {
}
stock Early {
  initial: 10
}
stock Late {
  initial: 0
}
",
        );
        let transfer = model.flow("Transfer").unwrap();
        assert_eq!(Endpoint::Stock(0), transfer.from);
        assert_eq!(Endpoint::Stock(1), transfer.to);
        assert_eq!(Rate::Const(5.0), transfer.rate);

        let leak = model.flow("Leak").unwrap();
        assert_eq!(Endpoint::External, leak.to);
        assert_eq!(Some("Early * 0.1"), leak.rate_text());

        let idle = model.flow("Idle").unwrap();
        assert_eq!(Endpoint::External, idle.from);
        assert_eq!(Endpoint::External, idle.to);
        assert_eq!(Rate::Const(0.0), idle.rate);

        assert_eq!(vec![5.0, 1.0, 0.0], model.flow_rates());
    }

    #[test]
    fn test_last_terminate_wins() {
        let model = parse_model(
            "
terminate {
  when: TIME > 5
}
terminate {
  when: TIME > 10
}
terminate {
  units: \"none\"
}
",
        );
        assert_eq!(Some("TIME > 10"), model.termination_text());

        let model = parse_model("terminate {\n  when: 0\n}\n");
        assert_eq!(None, model.termination_text());
    }

    #[test]
    fn test_graphs() {
        let model = parse_model(
            r##"
graph Main {
  variables: Population, Resources,
  type: area
  yAxisLabel: "count"
  color: "#ff0000"
}
graph Plain {
}
"##,
        );
        assert_eq!(
            &[
                GraphConfig {
                    name: "Main".to_owned(),
                    title: "Main".to_owned(),
                    variables: vec!["Population".to_owned(), "Resources".to_owned()],
                    kind: GraphKind::Area,
                    y_axis_label: Some("count".to_owned()),
                    color: Some("#ff0000".to_owned()),
                },
                GraphConfig {
                    name: "Plain".to_owned(),
                    title: "Plain".to_owned(),
                    variables: vec![],
                    kind: GraphKind::Line,
                    y_axis_label: None,
                    color: None,
                },
            ],
            model.graphs()
        );
    }

    #[test]
    fn test_initial_snapshot() {
        let model = parse_model("stock S {\n  initial: 3\n}\n");
        assert_eq!(1, model.history().len());
        assert_eq!(Some(3.0), model.history().first().and_then(|s| s.value(0)));
        assert_eq!(0.0, model.time());
    }
}
