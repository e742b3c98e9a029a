// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::BTreeSet;

use float_cmp::approx_eq;
use ordered_float::OrderedFloat;
use tracing::warn;

/// A 1D graphical function: piecewise-linear over `(x, y)` points kept
/// sorted by `x`, flat outside the table's domain.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct LookupTable {
    data: Vec<(f64, f64)>,
}

impl LookupTable {
    pub fn new(points: &[(f64, f64)]) -> Self {
        let mut data: Vec<(f64, f64)> = points
            .iter()
            .filter(|(x, y)| !x.is_nan() && !y.is_nan())
            .copied()
            .collect();
        // stable, so duplicate x values keep their declaration order
        data.sort_by_key(|(x, _)| OrderedFloat(*x));
        LookupTable { data }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn lookup(&self, index: f64) -> f64 {
        let table = &self.data;
        if table.is_empty() {
            return 0.0;
        }

        if index.is_nan() {
            // things get wonky below if we try to binary search for NaN
            return f64::NAN;
        }

        // check if index is below the start of the table
        {
            let (x, y) = table[0];
            if index < x {
                return y;
            }
        }

        let size = table.len();
        {
            let (x, y) = table[size - 1];
            if index > x {
                return y;
            }
        }
        // binary search seems to be the most appropriate choice here.
        let mut low = 0;
        let mut high = size;
        while low < high {
            let mid = low + (high - low) / 2;
            if table[mid].0 < index {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let i = low;
        if i == 0 || approx_eq!(f64, table[i].0, index) {
            table[i].1
        } else {
            // slope = deltaY/deltaX
            let slope = (table[i].1 - table[i - 1].1) / (table[i].0 - table[i - 1].0);
            // y = m*x + b
            (index - table[i - 1].0) * slope + table[i - 1].1
        }
    }
}

/// A 2D graphical function over the grid formed by the distinct x and y
/// coordinates of its `(x, y, z)` samples.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct LookupTable2D {
    xs: Vec<f64>,
    ys: Vec<f64>,
    // row-major by x: z at (xs[i], ys[j]) is grid[i * ys.len() + j]
    grid: Vec<f64>,
    points: Vec<(f64, f64, f64)>,
}

impl LookupTable2D {
    pub fn new(name: &str, points: &[(f64, f64, f64)]) -> Self {
        let points: Vec<(f64, f64, f64)> = points
            .iter()
            .filter(|(x, y, z)| !x.is_nan() && !y.is_nan() && !z.is_nan())
            .copied()
            .collect();

        let xs: BTreeSet<OrderedFloat<f64>> = points.iter().map(|p| OrderedFloat(p.0)).collect();
        let ys: BTreeSet<OrderedFloat<f64>> = points.iter().map(|p| OrderedFloat(p.1)).collect();
        let xs: Vec<f64> = xs.into_iter().map(|x| x.0).collect();
        let ys: Vec<f64> = ys.into_iter().map(|y| y.0).collect();

        let mut grid: Vec<Option<f64>> = vec![None; xs.len() * ys.len()];
        for &(x, y, z) in points.iter() {
            // both searches succeed: every coordinate came from `points`
            let i = xs.partition_point(|&v| v < x);
            let j = ys.partition_point(|&v| v < y);
            grid[i * ys.len() + j] = Some(z);
        }

        let missing = grid.iter().filter(|z| z.is_none()).count();
        if missing > 0 {
            warn!(
                table = name,
                missing, "lookup2d grid is incomplete, missing points read as 0"
            );
        }

        LookupTable2D {
            xs,
            ys,
            grid: grid.into_iter().map(|z| z.unwrap_or(0.0)).collect(),
            points,
        }
    }

    pub fn points(&self) -> &[(f64, f64, f64)] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    fn at(&self, i: usize, j: usize) -> f64 {
        self.grid[i * self.ys.len() + j]
    }

    pub fn lookup(&self, x: f64, y: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if x.is_nan() || y.is_nan() {
            return f64::NAN;
        }

        let (x0, x1, tx) = segment(&self.xs, x);
        let (y0, y1, ty) = segment(&self.ys, y);

        let low = self.at(x0, y0) * (1.0 - tx) + self.at(x1, y0) * tx;
        let high = self.at(x0, y1) * (1.0 - tx) + self.at(x1, y1) * tx;

        low * (1.0 - ty) + high * ty
    }
}

/// Clamp `v` to the axis bounds and find the bracketing pair of grid
/// indices along with the interpolation weight of the upper one.  A
/// single-coordinate axis has zero span, so it always has weight 0.
fn segment(axis: &[f64], v: f64) -> (usize, usize, f64) {
    let len = axis.len();
    if len < 2 {
        return (0, 0, 0.0);
    }
    let v = v.clamp(axis[0], axis[len - 1]);
    let i = axis.partition_point(|&a| a <= v);
    let (lo, hi) = if i >= len { (len - 2, len - 1) } else { (i - 1, i) };
    let t = (v - axis[lo]) / (axis[hi] - axis[lo]);
    (lo, hi, t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_interpolates_and_extrapolates_flat() {
        let table = LookupTable::new(&[(0.0, 0.0), (10.0, 10.0)]);
        assert_eq!(5.0, table.lookup(5.0));
        assert_eq!(0.0, table.lookup(-5.0));
        assert_eq!(10.0, table.lookup(15.0));
        assert_eq!(0.0, table.lookup(0.0));
        assert_eq!(10.0, table.lookup(10.0));
    }

    #[test]
    fn test_lookup_sorts_points() {
        let table = LookupTable::new(&[(10.0, 1.0), (0.0, 3.0), (5.0, 2.0)]);
        assert_eq!(&[(0.0, 3.0), (5.0, 2.0), (10.0, 1.0)], table.points());
        assert!(approx_eq!(f64, 2.5, table.lookup(2.5)));
        assert!(approx_eq!(f64, 1.2, table.lookup(9.0)));
    }

    #[test]
    fn test_lookup_edge_cases() {
        let empty = LookupTable::new(&[]);
        assert_eq!(0.0, empty.lookup(3.0));

        let single = LookupTable::new(&[(2.0, 7.0)]);
        assert_eq!(7.0, single.lookup(-1.0));
        assert_eq!(7.0, single.lookup(2.0));
        assert_eq!(7.0, single.lookup(100.0));

        let table = LookupTable::new(&[(0.0, 0.0), (1.0, 1.0)]);
        assert!(table.lookup(f64::NAN).is_nan());
    }

    #[test]
    fn test_lookup2d_bilinear() {
        let table = LookupTable2D::new(
            "grid",
            &[
                (0.0, 0.0, 0.0),
                (10.0, 0.0, 10.0),
                (0.0, 10.0, 20.0),
                (10.0, 10.0, 30.0),
            ],
        );
        assert_eq!(0.0, table.lookup(0.0, 0.0));
        assert_eq!(30.0, table.lookup(10.0, 10.0));
        assert_eq!(15.0, table.lookup(5.0, 5.0));
        assert_eq!(5.0, table.lookup(5.0, 0.0));
        assert_eq!(10.0, table.lookup(0.0, 5.0));
        // each axis is clamped independently
        assert_eq!(20.0, table.lookup(-3.0, 50.0));
        assert_eq!(25.0, table.lookup(50.0, 7.5));
    }

    #[test]
    fn test_lookup2d_degenerate_axis() {
        // a single y coordinate: plain linear interpolation along x
        let table = LookupTable2D::new("line", &[(0.0, 1.0, 0.0), (4.0, 1.0, 8.0)]);
        assert_eq!(4.0, table.lookup(2.0, 1.0));
        assert_eq!(4.0, table.lookup(2.0, -100.0));
        assert_eq!(8.0, table.lookup(9.0, 3.0));

        let empty = LookupTable2D::new("empty", &[]);
        assert_eq!(0.0, empty.lookup(1.0, 1.0));
    }

    #[test]
    fn test_lookup2d_uneven_grid() {
        let table = LookupTable2D::new(
            "uneven",
            &[
                (0.0, 0.0, 0.0),
                (1.0, 0.0, 1.0),
                (3.0, 0.0, 3.0),
                (0.0, 2.0, 0.0),
                (1.0, 2.0, 1.0),
                (3.0, 2.0, 3.0),
            ],
        );
        assert_eq!(2.0, table.lookup(2.0, 1.0));
        assert_eq!(0.5, table.lookup(0.5, 2.0));
    }
}
