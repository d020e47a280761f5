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

//! Target element selectors, one table per interaction model.
//!
//! Couples whose material has more than one element store a block
//! ```text
//! [0] K   [1] Q   [2] ln(E_0)   [3] 1/Δln(E)
//! [4 ..4+KQ]  E_0, P(0,E_0), ..., P(Q-2,E_0), ..., E_{K-1}, P(0,E_{K-1}), ..., P(Q-2,E_{K-1})
//! ```
//! Single-element couples store nothing and have no start index: selection is
//! trivial and never touches the data.

use crate::error::try_buffer;
use crate::grid::LogGrid;
use crate::selector::sample_element;
use crate::TableError;
use itertools::Itertools;
use std::fmt::{self, Debug};

const TABLE: &str = "element selector";

/// Header values preceding the knot records of a block
pub const HEADER_LEN: usize = 4;

/// One packed selector block for a multi-element couple
#[derive(Clone, Debug, PartialEq)]
pub struct ElementSelectorBlock {
    values: Vec<f64>,
}

impl ElementSelectorBlock {
    /// Pack cumulative contributions tabulated at the log-spaced `energies`.
    ///
    /// `cumulative[i]` holds `P(0, E_i), ..., P(Q-2, E_i)`: non-decreasing values
    /// in `[0, 1]`. The last element's value, 1, is implied.
    pub fn from_values(energies: &[f64], cumulative: &[Vec<f64>]) -> Result<Self, TableError> {
        let grid = LogGrid::from_knots_named(TABLE, energies)?;
        if cumulative.len() != energies.len() {
            return Err(TableError::LengthMismatch {
                table: TABLE,
                expected: energies.len(),
                actual: cumulative.len(),
            });
        }
        let q = cumulative.first().map_or(0, Vec::len) + 1;
        if q < 2 {
            return Err(TableError::LengthMismatch {
                table: TABLE,
                expected: 1,
                actual: 0,
            });
        }
        for row in cumulative {
            if row.len() != q - 1 {
                return Err(TableError::LengthMismatch {
                    table: TABLE,
                    expected: q - 1,
                    actual: row.len(),
                });
            }
        }
        let k = energies.len();
        let mut values = try_buffer(TABLE, HEADER_LEN + k * q)?;
        values.extend([k as f64, q as f64, grid.log_min(), grid.inv_log_delta()]);
        for (e, row) in energies.iter().zip(cumulative) {
            values.push(*e);
            values.extend_from_slice(row);
        }
        Ok(Self { values })
    }

    /// Packed length, 4 + KQ
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

/// Element selector table of one interaction model in the interleaved layout
#[derive(Clone, PartialEq)]
pub struct ElementSelectorTable {
    start_index: Vec<Option<usize>>,
    data: Vec<f64>,
}

impl ElementSelectorTable {
    /// Take ownership of a packed buffer and its per-couple start indices.
    ///
    /// `None` marks a single-element couple. Blocks of multi-element couples are
    /// stored in couple order without gaps.
    pub fn new(start_index: Vec<Option<usize>>, data: Vec<f64>) -> Result<Self, TableError> {
        let mut offset = 0;
        for (imc, start) in start_index.iter().enumerate() {
            let Some(start) = *start else { continue };
            if start != offset {
                return Err(TableError::InconsistentBlock {
                    table: TABLE,
                    imc,
                    reason: format!("starts at {start}, previous data end at {offset}"),
                });
            }
            offset += validate_block(&data, start, imc)?;
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

    /// Table for `num_mat_cuts` couples that all consist of a single element
    pub fn single_element(num_mat_cuts: usize) -> Self {
        Self {
            start_index: vec![None; num_mat_cuts],
            data: Vec::new(),
        }
    }

    /// Concatenate blocks, one entry per couple (`None` for single-element couples)
    pub fn from_blocks(blocks: &[Option<ElementSelectorBlock>]) -> Result<Self, TableError> {
        let total = blocks.iter().flatten().map(ElementSelectorBlock::len).sum();
        let mut data = try_buffer(TABLE, total)?;
        let mut start_index = try_buffer(TABLE, blocks.len())?;
        for block in blocks {
            start_index.push(block.as_ref().map(|block| {
                let start = data.len();
                data.extend_from_slice(block.as_slice());
                start
            }));
        }
        Self::new(start_index, data)
    }

    /// Number of material-cut couples
    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.start_index.len()
    }

    /// Start of the block of couple `imc`; `None` for single-element couples
    #[inline]
    pub fn start_index(&self, imc: usize) -> Option<usize> {
        self.start_index[imc]
    }

    /// All start indices
    #[inline]
    pub fn start_indices(&self) -> &[Option<usize>] {
        &self.start_index
    }

    /// The packed buffer
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Complete block of couple `imc`, header included
    #[inline]
    pub fn block(&self, imc: usize) -> Option<&[f64]> {
        self.start_index[imc].map(|start| {
            let k = self.data[start] as usize;
            let q = self.data[start + 1] as usize;
            &self.data[start..start + HEADER_LEN + k * q]
        })
    }

    /// Number of elements, Q, in the material of couple `imc`
    #[inline]
    pub fn num_elements(&self, imc: usize) -> usize {
        self.start_index[imc].map_or(1, |start| self.data[start + 1] as usize)
    }

    /// Samples the target element index for couple `imc`.
    ///
    /// Single-element couples always give 0.
    #[inline]
    pub fn select(&self, imc: usize, ekin: f64, urnd: f64) -> usize {
        let Some(start) = self.start_index[imc] else {
            return 0;
        };
        let block = &self.data[start..];
        let k = block[0] as usize;
        let q = block[1] as usize;
        let grid = LogGrid::from_raw(k, block[2], block[3]);
        sample_element(&block[HEADER_LEN..HEADER_LEN + k * q], q, &grid, ekin, urnd)
    }

    /// Heap memory held by the table
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<f64>() * self.data.len()
            + std::mem::size_of::<Option<usize>>() * self.start_index.len()
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
    let (k, q) = (header[0], header[1]);
    if k.fract() != 0.0 || k < 2.0 {
        return Err(inconsistent(format!("invalid knot count {k}")));
    }
    if q.fract() != 0.0 || q < 2.0 {
        return Err(inconsistent(format!("invalid element count {q}")));
    }
    let available = data.len() - start - HEADER_LEN;
    // float-to-int casts saturate, so oversized counts fail the bound below
    let (k, q) = (k as usize, q as usize);
    let len = k
        .checked_mul(q)
        .filter(|records| *records <= available)
        .ok_or_else(|| inconsistent(format!("{k} records of {q} exceed the buffer")))?
        + HEADER_LEN;
    let records = &data[start + HEADER_LEN..start + len];
    let energies = records.iter().step_by(q).copied().collect_vec();
    let grid = LogGrid::from_knots_named(TABLE, &energies)?;
    if !grid.matches_header(header[2], header[3]) {
        return Err(inconsistent(format!(
            "grid header ({}, {}) does not match the knots ({}, {})",
            header[2],
            header[3],
            grid.log_min(),
            grid.inv_log_delta()
        )));
    }
    Ok(len)
}

impl Debug for ElementSelectorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementSelectorTable")
            .field("num_mat_cuts", &self.num_mat_cuts())
            .field(
                "multi_element_couples",
                &self.start_index.iter().flatten().count(),
            )
            .field("num_data", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::fixtures;
    use crate::ElementSelectorModel;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_block_layout() {
        let block = ElementSelectorBlock::from_values(
            &[1.0, 10.0],
            &[vec![0.1, 0.3], vec![0.2, 0.6]],
        )
        .unwrap();
        assert_eq!(block.len(), 4 + 2 * 3);
        let v = block.as_slice();
        assert_eq!(&v[..2], &[2.0, 3.0]);
        assert_eq!(&v[4..], &[1.0, 0.1, 0.3, 10.0, 0.2, 0.6]);
    }

    #[test]
    fn test_single_element_sentinel() {
        // couple 1 is a pure element
        let table = ElementSelectorTable::from_blocks(&[
            Some(fixtures::selector_block(3, 0.01)),
            None,
            Some(fixtures::selector_block(2, 0.1)),
        ])
        .unwrap();
        assert_eq!(table.start_index(1), None);
        assert_eq!(table.num_elements(1), 1);
        assert!(table.block(1).is_none());
        for u in [0.0, 0.3, 0.999] {
            assert_eq!(table.select(1, 5.0, u), 0);
        }
        assert_eq!(table.num_elements(0), 3);
        assert_eq!(table.num_elements(2), 2);
        assert_eq!(table.start_index(2), Some(table.block(0).unwrap().len()));
    }

    #[test]
    fn test_all_single_element() {
        let table = ElementSelectorTable::single_element(4);
        assert!(table.data().is_empty());
        assert!((0..4).all(|imc| table.select(imc, 1.0, 0.5) == 0));
    }

    #[test]
    fn test_select_in_range() {
        let data = fixtures::electron_data(5);
        let mut rng = StdRng::seed_from_u64(3);
        for model in ElementSelectorModel::ALL {
            let table = data.element_selector(model);
            for _ in 0..2000 {
                let imc = rng.random_range(0..5);
                let ekin = rng.random_range(-1.0..10.0_f64).exp();
                let j = table.select(imc, ekin, rng.random());
                assert!(j < table.num_elements(imc));
            }
        }
    }

    #[test]
    fn test_overlap_is_rejected() {
        let block = fixtures::selector_block(2, 0.1);
        let data = block.as_slice().to_vec();
        let err = ElementSelectorTable::new(vec![Some(0), Some(0)], data).unwrap_err();
        assert!(matches!(err, TableError::InconsistentBlock { imc: 1, .. }));
    }

    #[test]
    fn test_grid_header_mismatch_is_rejected() {
        let block = ElementSelectorBlock::from_values(
            &[1.0, 10.0, 100.0],
            &[vec![0.2], vec![0.4], vec![0.6]],
        )
        .unwrap();
        assert!(ElementSelectorTable::new(vec![Some(0)], block.as_slice().to_vec()).is_ok());
        for (position, factor) in [(2, 0.5), (3, 2.0)] {
            let mut data = block.as_slice().to_vec();
            data[position] = data[position] * factor + 0.1;
            let err = ElementSelectorTable::new(vec![Some(0)], data).unwrap_err();
            assert!(matches!(err, TableError::InconsistentBlock { imc: 0, .. }));
        }
    }

    #[test]
    fn test_uneven_knots_are_rejected() {
        let data = vec![
            3.0, 2.0, 0.0, 2.0 / 100.0_f64.ln(), //
            1.0, 0.5, //
            90.0, 0.5, //
            100.0, 0.5,
        ];
        let err = ElementSelectorTable::new(vec![None, Some(0)], data).unwrap_err();
        assert!(matches!(err, TableError::NotLogSpaced { index: 1, .. }));
    }

    #[test]
    fn test_huge_count_is_rejected() {
        for position in [0, 1] {
            let mut data = fixtures::selector_block(3, 0.1).as_slice().to_vec();
            data[position] = 1.0e19;
            let err = ElementSelectorTable::new(vec![Some(0)], data).unwrap_err();
            assert!(matches!(err, TableError::InconsistentBlock { imc: 0, .. }));
        }
    }

    #[test]
    fn test_missing_elements() {
        let err = ElementSelectorBlock::from_values(&[1.0, 10.0], &[vec![], vec![]]).unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { .. }));
    }
}
