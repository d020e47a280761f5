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

//! Restricted macroscopic cross sections for ionisation and bremsstrahlung.
//!
//! The cross sections vanish below the production threshold, which differs between
//! couples, so every couple carries its own grid. Per couple two self-describing
//! blocks follow each other, ionisation first:
//! ```text
//! [0] M   [1] argmax   [2] max Σ   [3] ln(E_0)   [4] 1/Δln(E)
//! [5 ..5+3M]  E_0, Σ_0, Σ_0'', E_1, Σ_1, Σ_1'', ..., E_{M-1}, Σ_{M-1}, Σ_{M-1}''
//! ```
//! `start_index[imc]` points at the ionisation block; the bremsstrahlung block
//! starts at `start_index[imc] + 5 + 3M`.

use crate::error::try_buffer;
use crate::grid::LogGrid;
use crate::spline::{second_derivatives, spline_triples};
use crate::{Interaction, TableError};
use itertools::Itertools;
use std::fmt::{self, Debug};

const TABLE: &str = "macroscopic cross section";

/// Header values preceding the knots of a block
pub const HEADER_LEN: usize = 5;

/// Values stored per knot: E, Σ, Σ''
pub const VALUES_PER_KNOT: usize = 3;

/// Decoded block header
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MacXSecHeader {
    /// Number of knots, M
    pub num_data: usize,
    /// Knot index of the largest cross section
    pub arg_max: usize,
    /// Largest tabulated cross section
    pub max_value: f64,
    /// The block's private energy grid
    pub grid: LogGrid,
}

/// One packed block (one couple, one interaction), ready to be written into a table
#[derive(Clone, Debug, PartialEq)]
pub struct MacXSecBlock {
    values: Vec<f64>,
}

impl MacXSecBlock {
    /// Pack cross sections `values` tabulated at the log-spaced `energies`
    pub fn from_values(energies: &[f64], values: &[f64]) -> Result<Self, TableError> {
        let grid = LogGrid::from_knots_named(TABLE, energies)?;
        if values.len() != energies.len() {
            return Err(TableError::LengthMismatch {
                table: TABLE,
                expected: energies.len(),
                actual: values.len(),
            });
        }
        let m = energies.len();
        let sd = second_derivatives(energies, values);
        let arg_max = values
            .iter()
            .position_max_by(|a, b| a.total_cmp(b))
            .unwrap_or_default();
        let mut packed = try_buffer(TABLE, HEADER_LEN + VALUES_PER_KNOT * m)?;
        packed.extend([
            m as f64,
            arg_max as f64,
            values[arg_max],
            grid.log_min(),
            grid.inv_log_delta(),
        ]);
        packed.extend(
            energies
                .iter()
                .zip(values)
                .zip(&sd)
                .flat_map(|((e, v), s)| [*e, *v, *s]),
        );
        Ok(Self { values: packed })
    }

    /// Packed length, 5 + 3M
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The packed values
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Macroscopic cross-section table in the interleaved layout
#[derive(Clone, PartialEq)]
pub struct MacXSecTable {
    start_index: Vec<usize>,
    data: Vec<f64>,
}

impl MacXSecTable {
    /// Take ownership of a packed buffer and its per-couple start indices.
    ///
    /// Blocks must be stored couple after couple without gaps, so that the total
    /// length equals `Σ_imc (5 + 3M_ioni) + (5 + 3M_brem)`.
    pub fn new(start_index: Vec<usize>, data: Vec<f64>) -> Result<Self, TableError> {
        let mut offset = 0;
        for (imc, start) in start_index.iter().enumerate() {
            if *start != offset {
                return Err(TableError::InconsistentBlock {
                    table: TABLE,
                    imc,
                    reason: format!("starts at {start}, previous data end at {offset}"),
                });
            }
            offset += validate_block(&data, offset, imc)?;
            offset += validate_block(&data, offset, imc)?;
        }
        if offset != data.len() {
            return Err(TableError::LengthMismatch {
                table: TABLE,
                expected: offset,
                actual: data.len(),
            });
        }
        Ok(Self { start_index, data })
    }

    /// Concatenate `(ionisation, bremsstrahlung)` blocks, one pair per couple
    pub fn from_blocks(blocks: &[(MacXSecBlock, MacXSecBlock)]) -> Result<Self, TableError> {
        let total = blocks.iter().map(|(ioni, brem)| ioni.len() + brem.len()).sum();
        let mut data = try_buffer(TABLE, total)?;
        let mut start_index = try_buffer(TABLE, blocks.len())?;
        for (ioni, brem) in blocks {
            start_index.push(data.len());
            data.extend_from_slice(ioni.as_slice());
            data.extend_from_slice(brem.as_slice());
        }
        log::debug!(
            "packed macroscopic cross sections: {} couples, {} values",
            blocks.len(),
            total
        );
        Self::new(start_index, data)
    }

    /// Number of material-cut couples
    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.start_index.len()
    }

    /// Start of the ionisation block of each couple
    #[inline]
    pub fn start_indices(&self) -> &[usize] {
        &self.start_index
    }

    /// The packed buffer for all couples
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Start of the block for `interaction` of couple `imc`
    #[inline]
    pub fn block_start(&self, imc: usize, interaction: Interaction) -> usize {
        let ioni = self.start_index[imc];
        match interaction {
            Interaction::Ionisation => ioni,
            Interaction::Bremsstrahlung => {
                ioni + HEADER_LEN + VALUES_PER_KNOT * self.data[ioni] as usize
            }
        }
    }

    /// The complete block, header included
    #[inline]
    pub fn block(&self, imc: usize, interaction: Interaction) -> &[f64] {
        let start = self.block_start(imc, interaction);
        let m = self.data[start] as usize;
        &self.data[start..start + HEADER_LEN + VALUES_PER_KNOT * m]
    }

    /// Decoded header of a block
    pub fn header(&self, imc: usize, interaction: Interaction) -> MacXSecHeader {
        let block = self.block(imc, interaction);
        MacXSecHeader {
            num_data: block[0] as usize,
            arg_max: block[1] as usize,
            max_value: block[2],
            grid: LogGrid::from_raw(block[0] as usize, block[3], block[4]),
        }
    }

    /// Restricted macroscopic cross section of couple `imc` at `ekin`
    #[inline]
    pub fn mac_xsec(&self, imc: usize, interaction: Interaction, ekin: f64) -> f64 {
        let block = self.block(imc, interaction);
        let grid = LogGrid::from_raw(block[0] as usize, block[3], block[4]);
        spline_triples(&block[HEADER_LEN..], ekin, grid.bin_index(ekin))
    }

    /// Heap memory held by the table
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<f64>() * self.data.len()
            + std::mem::size_of::<usize>() * self.start_index.len()
    }
}

/// Checks one block starting at `start` and returns its length
fn validate_block(data: &[f64], start: usize, imc: usize) -> Result<usize, TableError> {
    let inconsistent = |reason: String| TableError::InconsistentBlock {
        table: TABLE,
        imc,
        reason,
    };
    let header = data
        .get(start..start + HEADER_LEN)
        .ok_or_else(|| inconsistent(format!("header at {start} exceeds the buffer")))?;
    let m = header[0];
    if m.fract() != 0.0 || m < 2.0 {
        return Err(inconsistent(format!("invalid knot count {m}")));
    }
    let available = (data.len() - start - HEADER_LEN) / VALUES_PER_KNOT;
    if m > available as f64 {
        return Err(inconsistent(format!("{m} knots exceed the buffer")));
    }
    let m = m as usize;
    let arg_max = header[1];
    if arg_max.fract() != 0.0 || arg_max < 0.0 || arg_max as usize >= m {
        return Err(inconsistent(format!("invalid argmax {arg_max}")));
    }
    let len = HEADER_LEN + VALUES_PER_KNOT * m;
    let knots = &data[start + HEADER_LEN..start + len];
    let energies = knots.iter().step_by(VALUES_PER_KNOT).copied().collect_vec();
    let grid = LogGrid::from_knots_named(TABLE, &energies)?;
    if !grid.matches_header(header[3], header[4]) {
        return Err(inconsistent(format!(
            "grid header ({}, {}) does not match the knots ({}, {})",
            header[3],
            header[4],
            grid.log_min(),
            grid.inv_log_delta()
        )));
    }
    let max_value = knots[VALUES_PER_KNOT * arg_max as usize + 1];
    if header[2] != max_value {
        return Err(inconsistent(format!(
            "stored maximum {} differs from the value {max_value} at knot {arg_max}",
            header[2]
        )));
    }
    Ok(len)
}

impl Debug for MacXSecTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacXSecTable")
            .field("num_mat_cuts", &self.num_mat_cuts())
            .field("num_data", &self.data.len())
            .finish()
    }
}
