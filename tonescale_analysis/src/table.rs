/// `;` separated dump of a histogram, one row per bin.
use std::fmt;

use crate::histogram::BinnedDistribution;

pub const HEADER: &str = "center;count;cumulative;derivative;second_derivative";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    pub center: f64,
    pub count: f64,
    pub cumulative: f64,
    /// `v[i] - v[i-1]`
    pub derivative: f64,
    /// `v[i-1] - 2 v[i] + v[i+1]`
    pub second_derivative: f64,
}

/// Rows derived from any binned distribution. Neighbours wrap around on circular shapes and
/// count as zero outside of bounded ones.
pub struct HistogramTable<'a, D: BinnedDistribution + ?Sized> {
    distribution: &'a D,
}

impl<'a, D: BinnedDistribution + ?Sized> HistogramTable<'a, D> {
    pub fn new(distribution: &'a D) -> Self {
        Self { distribution }
    }

    pub fn rows(&self) -> Vec<TableRow> {
        let shape = self.distribution.shape();
        let values = self.distribution.bin_values();
        let n = values.len();
        let neighbour = |i: isize| -> f64 {
            if (0..n as isize).contains(&i) {
                values[i as usize]
            } else if shape.wraps() {
                values[i.rem_euclid(n as isize) as usize]
            } else {
                0.0
            }
        };

        let mut cumulative = 0.0;
        (0..n)
            .map(|i| {
                let v = values[i];
                let prev = neighbour(i as isize - 1);
                let next = neighbour(i as isize + 1);
                cumulative += v;
                TableRow {
                    center: shape.bin_center(i),
                    count: v,
                    cumulative,
                    derivative: v - prev,
                    second_derivative: prev - 2.0 * v + next,
                }
            })
            .collect()
    }
}

impl<D: BinnedDistribution + ?Sized> fmt::Display for HistogramTable<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{HEADER}")?;
        for row in self.rows() {
            writeln!(
                f,
                "{};{};{};{};{}",
                row.center, row.count, row.cumulative, row.derivative, row.second_derivative
            )?;
        }
        Ok(())
    }
}
