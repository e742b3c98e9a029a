// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The line-oriented block parser for model source.
//!
//! Source is read one trimmed line at a time.  A line like `stock Name {`
//! opens a block, `}` closes it, and lines in between assign properties
//! (`key: value`) or, in lookup blocks, add sample points.  `const NAME =
//! expr` lines may appear anywhere.  Nothing here evaluates expressions,
//! and nothing here fails: lines that don't fit are skipped.

use std::collections::BTreeMap;
use std::mem;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(PartialEq, Clone, Debug, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Str(String),
    Num(f64),
    Expr(String),
}

impl PropertyValue {
    /// Classify the text to the right of a `key:` or `const NAME =`.
    pub fn classify(value: &str) -> Self {
        let value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            PropertyValue::Str(value[1..value.len() - 1].to_owned())
        } else if let Some(n) = parse_number(value) {
            PropertyValue::Num(n)
        } else {
            PropertyValue::Expr(value.to_owned())
        }
    }

    /// The value as source text: strings unquoted, numbers formatted.
    pub fn text(&self) -> String {
        match self {
            PropertyValue::Str(s) | PropertyValue::Expr(s) => s.clone(),
            PropertyValue::Num(n) => format!("{n}"),
        }
    }
}

/// Block properties by key; a repeated key keeps its last value.
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(PartialEq, Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Declaration {
    Const {
        name: String,
        value: PropertyValue,
    },
    Stock {
        name: String,
        properties: Properties,
    },
    Flow {
        name: String,
        properties: Properties,
    },
    Terminate {
        properties: Properties,
    },
    Graph {
        name: String,
        properties: Properties,
    },
    Lookup {
        name: String,
        points: Vec<(f64, f64)>,
    },
    Lookup2d {
        name: String,
        points: Vec<(f64, f64, f64)>,
    },
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum Block {
    Stock,
    Flow,
    Terminate,
    Graph,
    Lookup,
    Lookup2d,
}

lazy_static! {
    static ref CONST_RE: Regex = Regex::new(r"^const\s+(\w+)\s*=\s*(.+)").unwrap();
    static ref BLOCK_RE: Regex =
        Regex::new(r"^(stock|flow|graph|lookup|lookup2d)\s+(\w+)\s*\{").unwrap();
    static ref POINT_RE: Regex = Regex::new(r"\[([^,]+),\s*([^\]]+)\]").unwrap();
    static ref POINT_2D_RE: Regex = Regex::new(r"\[([^,]+),\s*([^\]]+)\]:\s*(.+)").unwrap();
    static ref DECIMAL_RE: Regex =
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();
    static ref FLOAT_PREFIX_RE: Regex =
        Regex::new(r"^[+-]?(Infinity|(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?)").unwrap();
}

/// Parse a whole numeric literal.  Accepts decimal and exponent forms,
/// `Infinity`, and `0x`/`0o`/`0b` integers; blank text reads as 0.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0.0);
    }
    match text {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    if DECIMAL_RE.is_match(text) {
        return text.parse::<f64>().ok();
    }

    let radix = match text.get(..2) {
        Some("0x") | Some("0X") => 16,
        Some("0o") | Some("0O") => 8,
        Some("0b") | Some("0B") => 2,
        _ => return None,
    };
    u64::from_str_radix(&text[2..], radix).ok().map(|n| n as f64)
}

/// Parse the longest numeric prefix of `text`, ignoring whatever
/// follows it, as lookup points are read.
fn parse_float_prefix(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let m = FLOAT_PREFIX_RE.find(text)?;
    let prefix = m.as_str();
    match prefix.trim_start_matches(['+', '-']) {
        "Infinity" if prefix.starts_with('-') => Some(f64::NEG_INFINITY),
        "Infinity" => Some(f64::INFINITY),
        _ => prefix.parse::<f64>().ok(),
    }
}

#[derive(Default)]
struct BlockParser {
    declarations: Vec<Declaration>,
    block: Option<Block>,
    name: String,
    properties: Properties,
    points: Vec<(f64, f64)>,
    points_2d: Vec<(f64, f64, f64)>,
}

impl BlockParser {
    fn open(&mut self, block: Block, name: &str) {
        if let Some(open) = self.block {
            debug!(block = ?open, name = %self.name, "unclosed block discarded");
        }
        self.block = Some(block);
        self.name = name.to_owned();
        self.properties.clear();
        self.points.clear();
        self.points_2d.clear();
    }

    fn close(&mut self) {
        let block = match self.block.take() {
            Some(block) => block,
            None => return,
        };
        let name = mem::take(&mut self.name);
        let properties = mem::take(&mut self.properties);
        debug!(block = ?block, name = %name, "block closed");

        let declaration = match block {
            Block::Stock => Declaration::Stock { name, properties },
            Block::Flow => Declaration::Flow { name, properties },
            Block::Terminate => Declaration::Terminate { properties },
            Block::Graph => Declaration::Graph { name, properties },
            Block::Lookup => Declaration::Lookup {
                name,
                points: mem::take(&mut self.points),
            },
            Block::Lookup2d => Declaration::Lookup2d {
                name,
                points: mem::take(&mut self.points_2d),
            },
        };
        self.declarations.push(declaration);
    }

    fn line(&mut self, line: &str) {
        if line.is_empty() || line.starts_with("//") {
            return;
        }

        if line.starts_with("const ") {
            match CONST_RE.captures(line) {
                Some(caps) => self.declarations.push(Declaration::Const {
                    name: caps[1].to_owned(),
                    value: PropertyValue::classify(&caps[2]),
                }),
                None => trace!(line, "malformed const skipped"),
            }
            return;
        }

        let keyword = line.split_whitespace().next().unwrap_or("");
        if matches!(keyword, "stock" | "flow" | "graph" | "lookup" | "lookup2d")
            && line.len() > keyword.len()
        {
            match BLOCK_RE.captures(line) {
                Some(caps) => {
                    let block = match &caps[1] {
                        "stock" => Block::Stock,
                        "flow" => Block::Flow,
                        "graph" => Block::Graph,
                        "lookup" => Block::Lookup,
                        _ => Block::Lookup2d,
                    };
                    self.open(block, &caps[2]);
                }
                None => trace!(line, "block header without '{{' skipped"),
            }
            return;
        }

        if line.starts_with("terminate {") {
            self.open(Block::Terminate, "");
            return;
        }

        match self.block {
            Some(Block::Lookup) if line.starts_with('[') => {
                let point = POINT_RE.captures(line).and_then(|caps| {
                    Some((parse_float_prefix(&caps[1])?, parse_float_prefix(&caps[2])?))
                });
                match point {
                    Some(point) => self.points.push(point),
                    None => trace!(line, "non-numeric lookup point skipped"),
                }
                return;
            }
            Some(Block::Lookup2d) if line.starts_with('[') => {
                let point = POINT_2D_RE.captures(line).and_then(|caps| {
                    Some((
                        parse_float_prefix(&caps[1])?,
                        parse_float_prefix(&caps[2])?,
                        parse_float_prefix(&caps[3])?,
                    ))
                });
                match point {
                    Some(point) => self.points_2d.push(point),
                    None => trace!(line, "non-numeric lookup2d point skipped"),
                }
                return;
            }
            Some(_) => {
                if let Some((key, value)) = line.split_once(':') {
                    self.properties
                        .insert(key.trim().to_owned(), PropertyValue::classify(value));
                    return;
                }
            }
            None => {}
        }

        if line == "}" {
            self.close();
        } else {
            trace!(line, "unrecognized line skipped");
        }
    }
}

/// Split model source into declarations, in source order.
pub fn parse_declarations(text: &str) -> Vec<Declaration> {
    let mut parser = BlockParser::default();
    for line in text.lines() {
        parser.line(line.trim());
    }
    if let Some(block) = parser.block {
        debug!(block = ?block, name = %parser.name, "unclosed block at end of input discarded");
    }
    parser.declarations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn num(n: f64) -> PropertyValue {
        PropertyValue::Num(n)
    }

    fn expr(s: &str) -> PropertyValue {
        PropertyValue::Expr(s.to_owned())
    }

    fn string(s: &str) -> PropertyValue {
        PropertyValue::Str(s.to_owned())
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(Some(12.0), parse_number("12"));
        assert_eq!(Some(0.5), parse_number(".5"));
        assert_eq!(Some(5.0), parse_number("5."));
        assert_eq!(Some(-2000.0), parse_number("-2e3"));
        assert_eq!(Some(3.0), parse_number("+3"));
        assert_eq!(Some(0.0), parse_number(""));
        assert_eq!(Some(f64::INFINITY), parse_number("Infinity"));
        assert_eq!(Some(f64::NEG_INFINITY), parse_number("-Infinity"));
        assert_eq!(Some(255.0), parse_number("0xff"));
        assert_eq!(Some(5.0), parse_number("0b101"));
        assert_eq!(None, parse_number("1_000"));
        assert_eq!(None, parse_number("Population * 2"));
        assert_eq!(None, parse_number("infinity"));
        assert_eq!(None, parse_number("-0x10"));
        assert_eq!(None, parse_number("."));
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(Some(3.0), parse_float_prefix(" 3abc"));
        assert_eq!(Some(-1.5), parse_float_prefix("-1.5]"));
        assert_eq!(Some(f64::NEG_INFINITY), parse_float_prefix("-Infinity"));
        assert_eq!(None, parse_float_prefix("abc"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(string("people"), PropertyValue::classify(" \"people\" "));
        assert_eq!(num(100.0), PropertyValue::classify("100"));
        assert_eq!(expr("Population * 0.02"), PropertyValue::classify("Population * 0.02"));
        assert_eq!(expr("\""), PropertyValue::classify("\""));
        assert_eq!("0.25", num(0.25).text());
        assert_eq!("people", string("people").text());
    }

    #[test]
    fn test_blocks() {
        let source = r#"
// population model
const GROWTH = 0.02
const START = GROWTH * 5000

stock Population {
  initial: 100
  min: 0
  units: "people"
}

flow Births {
  from: source
  to: Population
  rate: Population * GROWTH
}

terminate {
  when: Population > 1000
}

graph Overview {
  title: "Overview"
  variables: Population, Resources
  type: area
}
"#;
        let declarations = parse_declarations(source);
        assert_eq!(
            vec![
                Declaration::Const {
                    name: "GROWTH".to_owned(),
                    value: num(0.02),
                },
                Declaration::Const {
                    name: "START".to_owned(),
                    value: expr("GROWTH * 5000"),
                },
                Declaration::Stock {
                    name: "Population".to_owned(),
                    properties: props(&[
                        ("initial", num(100.0)),
                        ("min", num(0.0)),
                        ("units", string("people")),
                    ]),
                },
                Declaration::Flow {
                    name: "Births".to_owned(),
                    properties: props(&[
                        ("from", expr("source")),
                        ("to", expr("Population")),
                        ("rate", expr("Population * GROWTH")),
                    ]),
                },
                Declaration::Terminate {
                    properties: props(&[("when", expr("Population > 1000"))]),
                },
                Declaration::Graph {
                    name: "Overview".to_owned(),
                    properties: props(&[
                        ("title", string("Overview")),
                        ("variables", expr("Population, Resources")),
                        ("type", expr("area")),
                    ]),
                },
            ],
            declarations
        );
    }

    #[test]
    fn test_lookup_blocks() {
        let source = "
lookup Demand {
  [0, 10]
  [5, 20]
  [x, 3]
  [10,15]
}
lookup2d Grid {
  [0, 0]: 1
  [0, 1]: 2
  [1, 0]: nope
  [1, 1]: 4
}
";
        assert_eq!(
            vec![
                Declaration::Lookup {
                    name: "Demand".to_owned(),
                    points: vec![(0.0, 10.0), (5.0, 20.0), (10.0, 15.0)],
                },
                Declaration::Lookup2d {
                    name: "Grid".to_owned(),
                    points: vec![(0.0, 0.0, 1.0), (0.0, 1.0, 2.0), (1.0, 1.0, 4.0)],
                },
            ],
            parse_declarations(source)
        );
    }

    #[test]
    fn test_lenient_lines() {
        let source = "
stock Broken
  initial: 5
}
stock A {
  initial: 1
  initial: 2
  this line is junk
}
rate: 3
flow F {
  from: A
stock B {
  initial: 7
}
stock C {
";
        assert_eq!(
            vec![
                Declaration::Stock {
                    name: "A".to_owned(),
                    properties: props(&[("initial", num(2.0))]),
                },
                Declaration::Stock {
                    name: "B".to_owned(),
                    properties: props(&[("initial", num(7.0))]),
                },
            ],
            parse_declarations(source)
        );
    }

    #[test]
    fn test_property_values_with_colons() {
        let declarations = parse_declarations(
            "terminate {\n  when: Resources < 10 ? 1 : 0\n}\nconst X = 3 // trailing\n",
        );
        assert_eq!(
            Declaration::Terminate {
                properties: props(&[("when", expr("Resources < 10 ? 1 : 0"))]),
            },
            declarations[0]
        );
        assert_eq!(
            Declaration::Const {
                name: "X".to_owned(),
                value: expr("3 // trailing"),
            },
            declarations[1]
        );
    }

    #[test]
    fn test_declarations_serialize() {
        let declarations = parse_declarations("stock S {\n initial: 4\n}\n");
        let json = serde_json::to_value(&declarations).unwrap();
        assert_eq!(
            serde_json::json!([{
                "kind": "stock",
                "name": "S",
                "properties": {"initial": {"type": "num", "value": 4.0}},
            }]),
            json
        );
    }
}
