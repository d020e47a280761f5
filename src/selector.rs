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

//! Target element selection from tabulated cumulative contributions.
//!
//! For a material with `Q` elements, each knot is a record of length `Q`:
//! ```text
//! E_i, P(0, E_i), P(1, E_i), ..., P(Q-2, E_i)
//! ```
//! where `P(j, E)` is the normalised cumulative contribution of elements `0..=j`
//! to the macroscopic cross section. `P(Q-1, E) = 1` is implicit and not stored.

use crate::grid::LogGrid;

/// Interpolation weight of the upper record, clamped to `[0, 1]`
#[inline(always)]
fn upper_weight(records: &[f64], q: usize, ekin: f64, idx: usize) -> f64 {
    let e_lo = records[idx * q];
    let e_hi = records[(idx + 1) * q];
    num::clamp((ekin - e_lo) / (e_hi - e_lo), 0.0, 1.0)
}

/// Linearly interpolated cumulative contribution `P(j, E)` in bin `idx`.
///
/// Returns exactly 1 for `j = Q-1`.
#[inline]
pub fn cumulative_at(records: &[f64], q: usize, ekin: f64, idx: usize, j: usize) -> f64 {
    debug_assert!(j < q);
    if j == q - 1 {
        return 1.0;
    }
    let w = upper_weight(records, q, ekin, idx);
    let lo = records[idx * q + 1 + j];
    let hi = records[(idx + 1) * q + 1 + j];
    lo + w * (hi - lo)
}

/// Samples an element index in `[0, Q-1]`.
///
/// Returns the smallest `j` with `urnd < P(j, E)`, or `Q-1` when no stored
/// cumulative value exceeds `urnd`. `records` holds the knot records of one
/// couple and `grid` its private energy grid.
#[inline]
pub fn sample_element(records: &[f64], q: usize, grid: &LogGrid, ekin: f64, urnd: f64) -> usize {
    debug_assert!(q >= 2);
    debug_assert_eq!(records.len(), q * grid.len());
    let idx = grid.bin_index(ekin);
    let w = upper_weight(records, q, ekin, idx);
    let lo = &records[idx * q + 1..(idx + 1) * q];
    let hi = &records[(idx + 1) * q + 1..(idx + 2) * q];
    lo.iter()
        .zip(hi)
        .position(|(p_lo, p_hi)| urnd < p_lo + w * (p_hi - p_lo))
        .unwrap_or(q - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Three elements over E = 1, 10, 100
    fn records() -> (Vec<f64>, LogGrid) {
        let records = vec![
            1.0, 0.2, 0.5, //
            10.0, 0.4, 0.7, //
            100.0, 0.6, 0.9,
        ];
        let grid = LogGrid::from_knots(&[1.0, 10.0, 100.0]).unwrap();
        (records, grid)
    }

    #[test]
    fn test_cumulative_exact_at_knots() {
        let (records, _) = records();
        assert_eq!(cumulative_at(&records, 3, 1.0, 0, 0), 0.2);
        assert_eq!(cumulative_at(&records, 3, 1.0, 0, 1), 0.5);
        assert_eq!(cumulative_at(&records, 3, 10.0, 0, 0), 0.4);
        assert_eq!(cumulative_at(&records, 3, 10.0, 1, 1), 0.7);
        assert_eq!(cumulative_at(&records, 3, 55.0, 1, 2), 1.0);
        assert_relative_eq!(cumulative_at(&records, 3, 55.0, 1, 0), 0.5, epsilon = 1e-14);
    }

    #[test]
    fn test_sample_element() {
        let (records, grid) = records();
        // at E = 55: P = [0.5, 0.8, 1]
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.0), 0);
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.49), 0);
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.51), 1);
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.79), 1);
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.81), 2);
        assert_eq!(sample_element(&records, 3, &grid, 55.0, 0.999), 2);
    }

    #[test]
    fn test_sample_outside_grid() {
        let (records, grid) = records();
        // below E_0 the first record is used, above E_{K-1} the last
        assert_eq!(sample_element(&records, 3, &grid, 0.1, 0.19), 0);
        assert_eq!(sample_element(&records, 3, &grid, 0.1, 0.21), 1);
        assert_eq!(sample_element(&records, 3, &grid, 1.0e6, 0.59), 0);
        assert_eq!(sample_element(&records, 3, &grid, 1.0e6, 0.95), 2);
    }

    #[test]
    fn test_sample_always_in_range() {
        let (records, grid) = records();
        let mut rng = StdRng::seed_from_u64(1);
        let mut counts = [0usize; 3];
        for _ in 0..10_000 {
            let ekin = rng.random_range(0.01..1.0e4);
            let j = sample_element(&records, 3, &grid, ekin, rng.random::<f64>());
            assert!(j < 3);
            counts[j] += 1;
        }
        assert!(counts.iter().all(|c| *c > 0));
    }

    #[test]
    fn test_two_elements() {
        let records = vec![1.0, 0.25, 2.0, 0.75];
        let grid = LogGrid::from_knots(&[1.0, 2.0]).unwrap();
        assert_eq!(sample_element(&records, 2, &grid, 1.5, 0.49), 0);
        assert_eq!(sample_element(&records, 2, &grid, 1.5, 0.51), 1);
    }
}
