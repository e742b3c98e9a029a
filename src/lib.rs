// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod ast;
pub mod builder;
pub mod builtins;
pub mod common;
pub mod compiler;
pub mod delay;
pub mod dsl;
pub mod interpreter;
pub mod lookup;
pub mod model;
pub mod parser;
pub mod results;
mod token;

pub use self::builder::{build_model, parse_model};
pub use self::common::{Error, ErrorCode, ErrorKind, Result};
pub use self::compiler::{CompiledExpr, compile};
pub use self::dsl::{Declaration, PropertyValue, parse_declarations};
pub use self::lookup::{LookupTable, LookupTable2D};
pub use self::model::{Endpoint, Event, Flow, GraphConfig, GraphKind, Model, Observer, Rate, Stock};
pub use self::results::{History, Snapshot, Specs};

#[cfg(test)]
mod simulate_proptest;
