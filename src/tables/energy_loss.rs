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

//! Restricted energy loss: range, dE/dx and inverse range.
//!
//! All couples share one log-spaced kinetic energy grid of `N` knots. Per couple,
//! `5N` values are stored back to back in a single buffer:
//! ```text
//! offset imc·5N        R_0, R_0'', R_1, R_1'', ..., R_{N-1}, R_{N-1}''
//! offset imc·5N + 2N   dEdx_0, dEdx_0'', ..., dEdx_{N-1}, dEdx_{N-1}''
//! offset imc·5N + 4N   S_0, S_1, ..., S_{N-1}
//! ```
//! where `S_i` are the second derivatives of the inverse range E(R). The inverse
//! range values themselves are the energy grid, with the range values as knots.

use crate::error::try_buffer;
use crate::grid::{check_increasing, find_lower_bin_index, LogGrid};
use crate::spline::{second_derivatives, spline_pairs, spline_separate};
use crate::{EnergyLoss, TableError};
use std::cmp::Ordering;
use std::fmt::{self, Debug};

const TABLE: &str = "energy loss";

/// Number of stored values per knot and couple
pub const VALUES_PER_KNOT: usize = 5;

/// Range and dE/dx values of one couple over the shared energy grid
#[derive(Clone, Debug, PartialEq)]
pub struct EnergyLossCurves {
    pub range: Vec<f64>,
    pub dedx: Vec<f64>,
}

impl EnergyLossCurves {
    pub fn new(range: Vec<f64>, dedx: Vec<f64>) -> Self {
        Self { range, dedx }
    }
}

/// Energy-loss table in the interleaved layout
#[derive(Clone, PartialEq)]
pub struct EnergyLossTable {
    num_mat_cuts: usize,
    grid: LogGrid,
    energy_grid: Vec<f64>,
    data: Vec<f64>,
}

impl EnergyLossTable {
    /// Take ownership of a packed buffer produced by a table builder.
    ///
    /// Checks the shared grid, the total length `num_mat_cuts × 5N`, and that range
    /// values increase with energy for every couple.
    pub fn new(energy_grid: Vec<f64>, num_mat_cuts: usize, data: Vec<f64>) -> Result<Self, TableError> {
        let grid = LogGrid::from_knots_named(TABLE, &energy_grid)?;
        let n = grid.len();
        let expected = num_mat_cuts * VALUES_PER_KNOT * n;
        if data.len() != expected {
            return Err(TableError::LengthMismatch {
                table: TABLE,
                expected,
                actual: data.len(),
            });
        }
        for imc in 0..num_mat_cuts {
            let ranges = &data[imc * VALUES_PER_KNOT * n..][..2 * n];
            let increases = |i: &usize| {
                ranges[2 * i].partial_cmp(&ranges[2 * (i - 1)]) == Some(Ordering::Greater)
            };
            if let Some(i) = (1..n).find(|i| !increases(i)) {
                return Err(TableError::InconsistentBlock {
                    table: TABLE,
                    imc,
                    reason: format!("range value {i} does not increase"),
                });
            }
        }
        Ok(Self {
            num_mat_cuts,
            grid,
            energy_grid,
            data,
        })
    }

    /// Pack range and dE/dx curves, computing all second derivatives.
    ///
    /// `curves[imc]` holds the values of couple `imc` at each knot of `energy_grid`.
    pub fn from_curves(energy_grid: Vec<f64>, curves: &[EnergyLossCurves]) -> Result<Self, TableError> {
        let n = energy_grid.len();
        check_increasing(TABLE, &energy_grid)?;
        let mut data = try_buffer(TABLE, curves.len() * VALUES_PER_KNOT * n)?;
        for (imc, curve) in curves.iter().enumerate() {
            for values in [&curve.range, &curve.dedx] {
                if values.len() != n {
                    return Err(TableError::LengthMismatch {
                        table: TABLE,
                        expected: n,
                        actual: values.len(),
                    });
                }
            }
            check_increasing(TABLE, &curve.range).map_err(|_| TableError::InconsistentBlock {
                table: TABLE,
                imc,
                reason: "range must increase strictly with energy".to_string(),
            })?;
            let range_sd = second_derivatives(&energy_grid, &curve.range);
            let dedx_sd = second_derivatives(&energy_grid, &curve.dedx);
            let inv_range_sd = second_derivatives(&curve.range, &energy_grid);
            data.extend(curve.range.iter().zip(&range_sd).flat_map(|(y, s)| [*y, *s]));
            data.extend(curve.dedx.iter().zip(&dedx_sd).flat_map(|(y, s)| [*y, *s]));
            data.extend_from_slice(&inv_range_sd);
        }
        log::debug!(
            "packed energy loss table: {} couples × {} knots",
            curves.len(),
            n
        );
        Self::new(energy_grid, curves.len(), data)
    }

    /// Number of material-cut couples
    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.num_mat_cuts
    }

    /// The shared log-spaced grid header
    #[inline]
    pub fn grid(&self) -> &LogGrid {
        &self.grid
    }

    /// Kinetic energy knots, E_0..E_{N-1}
    #[inline]
    pub fn energy_grid(&self) -> &[f64] {
        &self.energy_grid
    }

    /// The packed buffer for all couples
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline(always)]
    fn couple(&self, imc: usize) -> &[f64] {
        let stride = VALUES_PER_KNOT * self.grid.len();
        &self.data[imc * stride..(imc + 1) * stride]
    }

    /// Interleaved range values and second derivatives of couple `imc` (2N values)
    #[inline]
    pub fn range_data(&self, imc: usize) -> &[f64] {
        &self.couple(imc)[..2 * self.grid.len()]
    }

    /// Interleaved dE/dx values and second derivatives of couple `imc` (2N values)
    #[inline]
    pub fn dedx_data(&self, imc: usize) -> &[f64] {
        let n = self.grid.len();
        &self.couple(imc)[2 * n..4 * n]
    }

    /// Inverse-range second derivatives of couple `imc` (N values)
    #[inline]
    pub fn inv_range_sd(&self, imc: usize) -> &[f64] {
        &self.couple(imc)[4 * self.grid.len()..]
    }

    /// Range and dE/dx, sharing one bin search
    #[inline]
    pub fn energy_loss(&self, imc: usize, ekin: f64) -> EnergyLoss {
        debug_assert!(imc < self.num_mat_cuts);
        let i = self.grid.bin_index(ekin);
        let couple = self.couple(imc);
        let n = self.grid.len();
        EnergyLoss {
            range: spline_pairs(&self.energy_grid, &couple[..2 * n], ekin, i),
            dedx: spline_pairs(&self.energy_grid, &couple[2 * n..4 * n], ekin, i),
        }
    }

    /// Kinetic energy at which the restricted range equals `range`.
    ///
    /// The range knots are searched in place within the interleaved record.
    #[inline]
    pub fn inverse_range(&self, imc: usize, range: f64) -> f64 {
        debug_assert!(imc < self.num_mat_cuts);
        let n = self.grid.len();
        let couple = self.couple(imc);
        let ranges = &couple[..2 * n];
        let i = find_lower_bin_index(ranges, n, range, 2);
        spline_separate(ranges, 2, &self.energy_grid, &couple[4 * n..], range, i)
    }

    /// Heap memory held by the table
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<f64>() * (self.energy_grid.len() + self.data.len())
    }
}

impl Debug for EnergyLossTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyLossTable")
            .field("num_mat_cuts", &self.num_mat_cuts)
            .field("n_knots", &self.grid.len())
            .field(
                "energy_range",
                &(self.energy_grid[0], self.energy_grid[self.grid.len() - 1]),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::fixtures;
    use approx::assert_relative_eq;

    /// One couple over [1, 10, 100] with range [2, 4, 8] and zero curvature
    fn linear_table() -> EnergyLossTable {
        let data = vec![
            2.0, 0.0, 4.0, 0.0, 8.0, 0.0, // range
            3.0, 0.0, 2.0, 0.0, 1.5, 0.0, // dE/dx
            0.0, 0.0, 0.0, // inverse range
        ];
        EnergyLossTable::new(vec![1.0, 10.0, 100.0], 1, data).unwrap()
    }

    #[test]
    fn test_exact_at_knot() {
        let table = linear_table();
        let eloss = table.energy_loss(0, 10.0);
        assert_eq!(eloss.range, 4.0);
        assert_eq!(eloss.dedx, 2.0);
        assert_eq!(table.energy_loss(0, 1.0).range, 2.0);
        assert_eq!(table.energy_loss(0, 100.0).range, 8.0);
    }

    #[test]
    fn test_geometric_midpoint_is_linear() {
        let table = linear_table();
        let ekin = 10.0_f64.sqrt();
        let range = table.energy_loss(0, ekin).range;
        assert!(range > 2.0 && range < 4.0);
        assert_relative_eq!(range, 2.0 + 2.0 * (ekin - 1.0) / 9.0, epsilon = 1e-14);
    }

    #[test]
    fn test_flat_outside_grid() {
        let table = linear_table();
        assert_eq!(table.energy_loss(0, 0.01).range, 2.0);
        assert_eq!(table.energy_loss(0, 1.0e5).range, 8.0);
        assert_eq!(table.energy_loss(0, 1.0e5).dedx, 1.5);
    }

    #[test]
    fn test_offsets() {
        let table = fixtures::energy_loss_table(3);
        let n = table.grid().len();
        assert_eq!(table.data().len(), 3 * 5 * n);
        assert_eq!(table.range_data(2).len(), 2 * n);
        assert_eq!(table.dedx_data(2).len(), 2 * n);
        assert_eq!(table.inv_range_sd(2).len(), n);
        assert_eq!(table.range_data(1)[0], table.data()[5 * n]);
        assert_eq!(table.dedx_data(1)[0], table.data()[5 * n + 2 * n]);
        assert_eq!(table.inv_range_sd(1)[0], table.data()[5 * n + 4 * n]);
    }

    #[test]
    fn test_inverse_range() {
        let table = fixtures::energy_loss_table(2);
        let grid = table.energy_grid().to_vec();
        for imc in 0..2 {
            // exact at knots
            for (i, e) in grid.iter().enumerate() {
                let range = table.range_data(imc)[2 * i];
                assert_eq!(table.inverse_range(imc, range), *e);
            }
            // round trip between knots
            for e in [0.0123, 1.7, 420.0, 3.3e5] {
                let range = table.energy_loss(imc, e).range;
                assert_relative_eq!(table.inverse_range(imc, range), e, max_relative = 1e-2);
            }
        }
    }

    #[test]
    fn test_realistic_accuracy() {
        let table = fixtures::energy_loss_table(1);
        for e in [0.005, 0.37, 12.0, 9.1e3, 2.2e6] {
            assert_relative_eq!(
                table.energy_loss(0, e).range,
                0.5 * f64::powf(e, 1.6),
                max_relative = 1e-3
            );
        }
    }

    #[test]
    fn test_invalid_length() {
        let err = EnergyLossTable::new(vec![1.0, 10.0, 100.0], 2, vec![0.0; 15]).unwrap_err();
        assert!(matches!(
            err,
            TableError::LengthMismatch {
                expected: 30,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_non_increasing_range() {
        let curves = [EnergyLossCurves::new(vec![1.0, 1.0, 2.0], vec![1.0; 3])];
        let err = EnergyLossTable::from_curves(vec![1.0, 10.0, 100.0], &curves).unwrap_err();
        assert!(matches!(err, TableError::InconsistentBlock { imc: 0, .. }));
    }

    #[test]
    fn test_not_log_spaced() {
        let err = EnergyLossTable::new(vec![1.0, 2.0, 100.0], 0, vec![]).unwrap_err();
        assert!(matches!(err, TableError::NotLogSpaced { .. }));
    }
}
