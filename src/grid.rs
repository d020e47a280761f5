// Copyright 2023 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Kinetic energy grids and bin resolution.
//!
//! Two ways to find the bin `i` such that `E_i ≤ E < E_{i+1}`:
//!
//! - [`LogGrid::bin_index`]: O(1) for grids equally spaced in ln(E)
//! - [`find_lower_bin_index`]: binary search over an explicit, possibly strided, knot sequence
//!
//! Both clamp to `[0, N-2]` so queries outside the grid resolve to the boundary bin.

use crate::TableError;
use itertools::Itertools;
use std::cmp::Ordering;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Relative tolerance on ln(E_i) when checking that a grid is log-spaced
pub const LOG_SPACING_TOLERANCE: f64 = 1e-8;

/// Header of a grid equally spaced in ln(E)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogGrid {
    /// Number of knots, N
    len: usize,
    /// ln(E_0)
    log_min: f64,
    /// 1/[ln(E_{N-1}/E_0)/(N-1)]
    inv_log_delta: f64,
}

impl LogGrid {
    /// Grid from header values as stored in a packed data block.
    ///
    /// # Panics
    /// Panics if `len < 2`
    pub fn new(len: usize, log_min: f64, inv_log_delta: f64) -> Self {
        assert!(len >= 2, "a grid needs at least 2 knots");
        Self {
            len,
            log_min,
            inv_log_delta,
        }
    }

    /// Header read back from a validated data block; no checks in release builds
    #[inline(always)]
    pub(crate) fn from_raw(len: usize, log_min: f64, inv_log_delta: f64) -> Self {
        debug_assert!(len >= 2);
        Self {
            len,
            log_min,
            inv_log_delta,
        }
    }

    /// Derive the header from explicit knots and check that they are strictly
    /// increasing and equally spaced in ln(E).
    pub fn from_knots(knots: &[f64]) -> Result<Self, TableError> {
        Self::from_knots_named("energy grid", knots)
    }

    pub(crate) fn from_knots_named(table: &'static str, knots: &[f64]) -> Result<Self, TableError> {
        check_increasing(table, knots)?;
        let n = knots.len();
        let log_min = knots[0].ln();
        let log_max = knots[n - 1].ln();
        let inv_log_delta = (n - 1) as f64 / (log_max - log_min);
        let log_delta = (log_max - log_min) / (n - 1) as f64;
        let tolerance = LOG_SPACING_TOLERANCE * log_min.abs().max(log_max.abs()).max(1.0);
        if let Some(index) = knots
            .iter()
            .enumerate()
            .position(|(i, e)| (e.ln() - (log_min + i as f64 * log_delta)).abs() > tolerance)
        {
            return Err(TableError::NotLogSpaced { table, index });
        }
        Ok(Self {
            len: n,
            log_min,
            inv_log_delta,
        })
    }

    /// True if stored header values agree with this grid within [`LOG_SPACING_TOLERANCE`]
    pub(crate) fn matches_header(&self, log_min: f64, inv_log_delta: f64) -> bool {
        let log_scale = self.log_min.abs().max(1.0);
        (log_min - self.log_min).abs() <= LOG_SPACING_TOLERANCE * log_scale
            && (inv_log_delta - self.inv_log_delta).abs()
                <= LOG_SPACING_TOLERANCE * self.inv_log_delta.abs()
    }

    /// Number of knots
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a grid has at least two knots
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// ln(E_0)
    #[inline]
    pub fn log_min(&self) -> f64 {
        self.log_min
    }

    /// Inverse of the ln(E) spacing
    #[inline]
    pub fn inv_log_delta(&self) -> f64 {
        self.inv_log_delta
    }

    /// Bin index for kinetic energy `ekin`
    #[inline]
    pub fn bin_index(&self, ekin: f64) -> usize {
        self.bin_index_from_log(ekin.ln())
    }

    /// Bin index when ln(E) is already at hand.
    ///
    /// NaN and energies below E_0 give bin 0; energies at or above E_{N-1} give N-2.
    #[inline]
    pub fn bin_index_from_log(&self, log_ekin: f64) -> usize {
        let t = (log_ekin - self.log_min) * self.inv_log_delta;
        // float-to-int casts saturate, NaN becomes 0
        (t.max(0.0) as usize).min(self.len - 2)
    }
}

/// Finds the lower bin index in an ordered, increasing knot sequence such that
/// `x[i] <= x < x[i+1]`.
///
/// The `num` knots are read from `data[0], data[step], data[2*step], ...` so knots
/// embedded in interleaved records can be searched in place. The result is
/// clamped to `[0, num-2]`.
pub fn find_lower_bin_index(data: &[f64], num: usize, x: f64, step: usize) -> usize {
    debug_assert!(num >= 2 && step >= 1);
    debug_assert!(data.len() > (num - 1) * step);
    if x.is_nan() || x < data[0] {
        return 0;
    }
    // knot(lower) <= x, and x < knot(upper) unless upper is still the last knot
    let mut lower = 0;
    let mut upper = num - 1;
    while upper - lower > 1 {
        let mid = (lower + upper) / 2;
        if x < data[mid * step] {
            upper = mid;
        } else {
            lower = mid;
        }
    }
    lower
}

/// Returns an error if `knots` has fewer than two entries or is not strictly increasing
pub(crate) fn check_increasing(table: &'static str, knots: &[f64]) -> Result<(), TableError> {
    if knots.len() < 2 {
        return Err(TableError::TooFewKnots {
            table,
            count: knots.len(),
        });
    }
    match knots
        .iter()
        .tuple_windows()
        .position(|(a, b)| b.partial_cmp(a) != Some(Ordering::Greater))
    {
        Some(i) => Err(TableError::NonIncreasingGrid {
            table,
            index: i + 1,
        }),
        None => Ok(()),
    }
}

/// Configuration for generating a log-spaced kinetic energy grid.
///
/// Energies are in MeV. The default covers 1 keV – 100 TeV with 7 bins per decade.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct GridConfig {
    /// Number of knots (default: 78)
    pub n_points: usize,
    /// Lowest kinetic energy (default: 1 keV)
    pub e_min: f64,
    /// Highest kinetic energy (default: 100 TeV)
    pub e_max: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n_points: 78,
            e_min: 1.0e-3,
            e_max: 1.0e8,
        }
    }
}

impl GridConfig {
    /// 20 bins per decade over the default range
    pub fn high_resolution() -> Self {
        Self {
            n_points: 221,
            ..Default::default()
        }
    }

    /// Set the number of knots
    pub fn with_n_points(mut self, n_points: usize) -> Self {
        self.n_points = n_points;
        self
    }

    /// Set the energy range
    pub fn with_range(mut self, e_min: f64, e_max: f64) -> Self {
        self.e_min = e_min;
        self.e_max = e_max;
        self
    }

    /// Generate the knots.
    ///
    /// The first and last knots are exactly `e_min` and `e_max`.
    ///
    /// # Panics
    /// Panics if `n_points < 2` or the range is not positive and increasing
    pub fn knots(&self) -> Vec<f64> {
        assert!(self.n_points >= 2, "Need at least 2 grid points");
        assert!(
            self.e_min > 0.0 && self.e_min < self.e_max,
            "Need 0 < e_min < e_max"
        );
        let n = self.n_points;
        let log_min = self.e_min.ln();
        let log_delta = (self.e_max.ln() - log_min) / (n - 1) as f64;
        (0..n)
            .map(|i| match i {
                0 => self.e_min,
                i if i == n - 1 => self.e_max,
                i => (log_min + i as f64 * log_delta).exp(),
            })
            .collect()
    }
}
