// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::VecDeque;
use std::collections::vec_deque;
use std::io::Write;

use serde_json::{Map, Value};

use crate::common::{Error, ErrorCode, ErrorKind, Result};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// How a caller wants a model run: a fixed `dt` for every step and the
/// number of steps to take.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Specs {
    pub dt: f64,
    pub steps: usize,
}

impl Default for Specs {
    fn default() -> Self {
        Specs {
            dt: 1.0,
            steps: 100,
        }
    }
}

/// Stock values at one point in time, in stock declaration order.
/// Stocks added after the snapshot was taken are absent from it.
#[derive(PartialEq, Clone, Debug)]
pub struct Snapshot {
    pub time: f64,
    pub values: Vec<f64>,
}

impl Snapshot {
    pub fn value(&self, stock: usize) -> Option<f64> {
        self.values.get(stock).copied()
    }
}

/// Bounded record of snapshots; once full, the oldest is evicted for
/// every new one.
#[derive(PartialEq, Clone, Debug)]
pub struct History {
    capacity: usize,
    snapshots: VecDeque<Snapshot>,
}

impl Default for History {
    fn default() -> Self {
        History::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        History {
            capacity,
            snapshots: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        while self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn first(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    /// The values of one stock over the retained history; NaN where a
    /// snapshot predates the stock.
    pub fn series(&self, stock: usize) -> Vec<f64> {
        self.snapshots
            .iter()
            .map(|s| s.value(stock).unwrap_or(f64::NAN))
            .collect()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Snapshot;
    type IntoIter = vec_deque::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A column selection over a history: which stocks to print and
/// under what names.
pub struct Columns<'a> {
    pub names: Vec<&'a str>,
    pub indexes: Vec<usize>,
}

fn output_err(err: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Model, ErrorCode::Generic, Some(err.to_string()))
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => String::new(),
    }
}

/// Write `history` as delimited text with a `time` column first.
pub fn write_delimited<W: Write>(
    out: W,
    delimiter: u8,
    columns: &Columns<'_>,
    history: &History,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(out);

    let header = std::iter::once("time").chain(columns.names.iter().copied());
    writer.write_record(header).map_err(output_err)?;

    for snapshot in history {
        let row = std::iter::once(format!("{}", snapshot.time)).chain(
            columns
                .indexes
                .iter()
                .map(|&i| format_value(snapshot.value(i))),
        );
        writer.write_record(row).map_err(output_err)?;
    }

    writer.flush().map_err(Error::from)
}

pub fn write_tsv<W: Write>(out: W, columns: &Columns<'_>, history: &History) -> Result<()> {
    write_delimited(out, b'\t', columns, history)
}

pub fn write_csv<W: Write>(out: W, columns: &Columns<'_>, history: &History) -> Result<()> {
    write_delimited(out, b',', columns, history)
}

/// Write `history` as a JSON array with one object per snapshot.  NaN and
/// infinite values become `null`.
pub fn write_json<W: Write>(out: W, columns: &Columns<'_>, history: &History) -> Result<()> {
    let rows: Vec<Value> = history
        .iter()
        .map(|snapshot| {
            let mut row = Map::new();
            row.insert("time".to_owned(), Value::from(snapshot.time));
            for (name, &i) in columns.names.iter().zip(columns.indexes.iter()) {
                let value = snapshot.value(i).map(Value::from).unwrap_or(Value::Null);
                row.insert((*name).to_owned(), value);
            }
            Value::Object(row)
        })
        .collect();

    serde_json::to_writer_pretty(out, &rows).map_err(output_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(time: f64, values: &[f64]) -> Snapshot {
        Snapshot {
            time,
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_specs_default() {
        let specs = Specs::default();
        assert_eq!(1.0, specs.dt);
        assert_eq!(100, specs.steps);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(snapshot(i as f64, &[i as f64 * 10.0]));
        }
        assert_eq!(3, history.len());
        assert_eq!(Some(2.0), history.first().map(|s| s.time));
        assert_eq!(Some(4.0), history.last().map(|s| s.time));
        assert_eq!(vec![20.0, 30.0, 40.0], history.series(0));

        history.clear();
        assert!(history.is_empty());
        assert_eq!(3, history.capacity());
    }

    #[test]
    fn test_history_default_capacity() {
        let mut history = History::default();
        for i in 0..1500 {
            history.push(snapshot(i as f64, &[]));
        }
        assert_eq!(DEFAULT_HISTORY_CAPACITY, history.len());
        assert_eq!(Some(500.0), history.first().map(|s| s.time));
    }

    #[test]
    fn test_series_with_late_stock() {
        let mut history = History::new(10);
        history.push(snapshot(0.0, &[1.0]));
        history.push(snapshot(1.0, &[2.0, 5.0]));
        let series = history.series(1);
        assert!(series[0].is_nan());
        assert_eq!(5.0, series[1]);
    }

    #[test]
    fn test_write_tsv_and_csv() {
        let mut history = History::new(10);
        history.push(snapshot(0.0, &[100.0, 100.0]));
        history.push(snapshot(1.0, &[101.0, 90.0]));
        let columns = Columns {
            names: vec!["Resources", "Population"],
            indexes: vec![1, 0],
        };

        let mut out = vec![];
        write_tsv(&mut out, &columns, &history).unwrap();
        assert_eq!(
            "time\tResources\tPopulation\n0\t100\t100\n1\t90\t101\n",
            String::from_utf8(out).unwrap()
        );

        let mut out = vec![];
        write_csv(&mut out, &columns, &history).unwrap();
        assert_eq!(
            "time,Resources,Population\n0,100,100\n1,90,101\n",
            String::from_utf8(out).unwrap()
        );
    }

    #[test]
    fn test_write_json() {
        let mut history = History::new(10);
        history.push(snapshot(0.5, &[3.0, f64::NAN]));
        let columns = Columns {
            names: vec!["A", "B"],
            indexes: vec![0, 1],
        };

        let mut out = vec![];
        write_json(&mut out, &columns, &history).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(serde_json::json!([{"time": 0.5, "A": 3.0, "B": null}]), parsed);
    }
}
