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

//! ## Field-split layout
//!
//! Structure-of-arrays mirror of [`ElectronData`] for wide parallel execution.
//! Each logical field of the interleaved layout lives in its own array, so
//! neighbouring lanes evaluating neighbouring couples read neighbouring memory.
//! Per-couple offsets and counts are 32-bit, as expected by accelerator kernels.
//!
//! The transform copies every value; the result owns all of its storage and
//! outlives the canonical tables it was built from.

use crate::error::{try_buffer, try_copy};
use crate::grid::{find_lower_bin_index, LogGrid};
use crate::selector::sample_element;
use crate::spline::{cubic_spline_x4, spline_separate, KnotX4};
use crate::tables::layout::{ELEMENT_SELECTOR_HEADER_LEN, MAC_XSEC_HEADER_LEN};
use crate::tables::{
    ElectronData, ElementSelectorTable, EnergyLossTable, MacXSecHeader, MacXSecTable,
};
use crate::{ElectronTables, ElementSelectorModel, EnergyLoss, Interaction, TableError};
use std::fmt::{self, Debug};
use wide::f64x4;

/// `data_start` of couples without selector data
pub const NO_DATA: i32 = -1;

/// Narrows an offset or count to a 32-bit index
fn index32<T: TryFrom<usize>>(table: &'static str, value: usize) -> Result<T, TableError> {
    T::try_from(value).map_err(|_| TableError::IndexOverflow { table, value })
}

// ============================================================================
// Energy loss
// ============================================================================

/// Energy-loss table with one array per field.
///
/// Every array holds `N` values per couple; couple `imc` starts at `imc·N`.
#[derive(Clone, PartialEq)]
pub struct EnergyLossSplit {
    grid: LogGrid,
    energy_grid: Vec<f64>,
    range: Vec<f64>,
    range_sd: Vec<f64>,
    dedx: Vec<f64>,
    dedx_sd: Vec<f64>,
    inv_range_sd: Vec<f64>,
}

impl EnergyLossSplit {
    const TABLE: &'static str = "split energy loss";

    /// Create SoA layout from the interleaved table
    pub fn from_canonical(table: &EnergyLossTable) -> Result<Self, TableError> {
        let n = table.grid().len();
        let len = n * table.num_mat_cuts();
        let mut range = try_buffer(Self::TABLE, len)?;
        let mut range_sd = try_buffer(Self::TABLE, len)?;
        let mut dedx = try_buffer(Self::TABLE, len)?;
        let mut dedx_sd = try_buffer(Self::TABLE, len)?;
        let mut inv_range_sd = try_buffer(Self::TABLE, len)?;

        for imc in 0..table.num_mat_cuts() {
            for pair in table.range_data(imc).chunks_exact(2) {
                range.push(pair[0]);
                range_sd.push(pair[1]);
            }
            for pair in table.dedx_data(imc).chunks_exact(2) {
                dedx.push(pair[0]);
                dedx_sd.push(pair[1]);
            }
            inv_range_sd.extend_from_slice(table.inv_range_sd(imc));
        }

        Ok(Self {
            grid: *table.grid(),
            energy_grid: try_copy(Self::TABLE, table.energy_grid())?,
            range,
            range_sd,
            dedx,
            dedx_sd,
            inv_range_sd,
        })
    }

    /// Number of material-cut couples
    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.range.len() / self.grid.len()
    }

    /// The shared log-spaced grid header
    #[inline]
    pub fn grid(&self) -> &LogGrid {
        &self.grid
    }

    #[inline]
    pub fn energy_grid(&self) -> &[f64] {
        &self.energy_grid
    }

    /// Range values of all couples
    #[inline]
    pub fn range(&self) -> &[f64] {
        &self.range
    }

    #[inline]
    pub fn range_sd(&self) -> &[f64] {
        &self.range_sd
    }

    /// dE/dx values of all couples
    #[inline]
    pub fn dedx(&self) -> &[f64] {
        &self.dedx
    }

    #[inline]
    pub fn dedx_sd(&self) -> &[f64] {
        &self.dedx_sd
    }

    #[inline]
    pub fn inv_range_sd(&self) -> &[f64] {
        &self.inv_range_sd
    }

    #[inline(always)]
    fn couple<'a>(&self, field: &'a [f64], imc: usize) -> &'a [f64] {
        let n = self.grid.len();
        &field[imc * n..(imc + 1) * n]
    }

    /// Range and dE/dx, sharing one bin index
    #[inline]
    pub fn energy_loss(&self, imc: usize, ekin: f64) -> EnergyLoss {
        let i = self.grid.bin_index(ekin);
        EnergyLoss {
            range: spline_separate(
                &self.energy_grid,
                1,
                self.couple(&self.range, imc),
                self.couple(&self.range_sd, imc),
                ekin,
                i,
            ),
            dedx: spline_separate(
                &self.energy_grid,
                1,
                self.couple(&self.dedx, imc),
                self.couple(&self.dedx_sd, imc),
                ekin,
                i,
            ),
        }
    }

    /// Kinetic energy at which the restricted range equals `range`
    #[inline]
    pub fn inverse_range(&self, imc: usize, range: f64) -> f64 {
        let ranges = self.couple(&self.range, imc);
        let i = find_lower_bin_index(ranges, self.grid.len(), range, 1);
        spline_separate(
            ranges,
            1,
            &self.energy_grid,
            self.couple(&self.inv_range_sd, imc),
            range,
            i,
        )
    }

    /// Evaluate range and dE/dx for four (couple, energy) lanes using SIMD (f64x4).
    ///
    /// Returns `(range, dedx)`; each lane equals the scalar [`Self::energy_loss`].
    #[inline]
    pub fn energy_loss_x4(&self, imc: [usize; 4], ekin: f64x4) -> (f64x4, f64x4) {
        let n = self.grid.len();
        let e: [f64; 4] = ekin.into();
        let idx = e.map(|e| self.grid.bin_index(e));
        let lanes = |f: &dyn Fn(usize) -> f64| f64x4::from([f(0), f(1), f(2), f(3)]);

        let x_lo = lanes(&|l| self.energy_grid[idx[l]]);
        let x_hi = lanes(&|l| self.energy_grid[idx[l] + 1]);
        let knots = |y: &[f64], sd: &[f64]| {
            let at = |l: usize, offset: usize| imc[l] * n + idx[l] + offset;
            (
                KnotX4 {
                    x: x_lo,
                    y: lanes(&|l| y[at(l, 0)]),
                    sd: lanes(&|l| sd[at(l, 0)]),
                },
                KnotX4 {
                    x: x_hi,
                    y: lanes(&|l| y[at(l, 1)]),
                    sd: lanes(&|l| sd[at(l, 1)]),
                },
            )
        };
        let (lo, hi) = knots(&self.range, &self.range_sd);
        let range = cubic_spline_x4(lo, hi, ekin);
        let (lo, hi) = knots(&self.dedx, &self.dedx_sd);
        let dedx = cubic_spline_x4(lo, hi, ekin);
        (range, dedx)
    }

    /// Evaluate a batch of lanes, four at a time with scalar fallback for the remainder
    pub fn energy_loss_batch(&self, imc: &[usize], ekin: &[f64], out: &mut [EnergyLoss]) {
        debug_assert_eq!(imc.len(), ekin.len());
        debug_assert_eq!(imc.len(), out.len());
        let chunks = imc.len() / 4;
        for c in 0..chunks {
            let base = c * 4;
            let couples = [imc[base], imc[base + 1], imc[base + 2], imc[base + 3]];
            let energies = f64x4::from([ekin[base], ekin[base + 1], ekin[base + 2], ekin[base + 3]]);
            let (range, dedx) = self.energy_loss_x4(couples, energies);
            let range: [f64; 4] = range.into();
            let dedx: [f64; 4] = dedx.into();
            for l in 0..4 {
                out[base + l] = EnergyLoss {
                    range: range[l],
                    dedx: dedx[l],
                };
            }
        }
        for i in (chunks * 4)..imc.len() {
            out[i] = self.energy_loss(imc[i], ekin[i]);
        }
    }

    /// Get memory usage in bytes.
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<f64>()
            * (self.energy_grid.len()
                + self.range.len()
                + self.range_sd.len()
                + self.dedx.len()
                + self.dedx_sd.len()
                + self.inv_range_sd.len())
    }
}

impl Debug for EnergyLossSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyLossSplit")
            .field("num_mat_cuts", &self.num_mat_cuts())
            .field("n_knots", &self.grid.len())
            .field("memory_bytes", &self.memory_bytes())
            .finish()
    }
}

// ============================================================================
// Macroscopic cross sections
// ============================================================================

/// Cross sections of one interaction with one array per field.
///
/// Couple `imc` owns knots `data_start[imc]..data_start[imc] + num_data[imc]` of
/// `energy`, `value` and `sd`, and `aux[4·imc..4·imc + 4] = (argmax, max, ln(E_0), 1/Δln(E))`.
#[derive(Clone, PartialEq)]
pub struct MacXSecSplit {
    data_start: Vec<u32>,
    num_data: Vec<u32>,
    aux: Vec<f64>,
    energy: Vec<f64>,
    value: Vec<f64>,
    sd: Vec<f64>,
}

impl MacXSecSplit {
    const TABLE: &'static str = "split macroscopic cross section";

    /// Pull the `interaction` blocks out of the interleaved table
    pub fn from_canonical(table: &MacXSecTable, interaction: Interaction) -> Result<Self, TableError> {
        let nmc = table.num_mat_cuts();
        let total: usize = (0..nmc)
            .map(|imc| table.header(imc, interaction).num_data)
            .sum();
        let mut data_start = try_buffer(Self::TABLE, nmc)?;
        let mut num_data = try_buffer(Self::TABLE, nmc)?;
        let mut aux = try_buffer(Self::TABLE, 4 * nmc)?;
        let mut energy = try_buffer(Self::TABLE, total)?;
        let mut value = try_buffer(Self::TABLE, total)?;
        let mut sd = try_buffer(Self::TABLE, total)?;

        for imc in 0..nmc {
            let header = table.header(imc, interaction);
            data_start.push(index32(Self::TABLE, energy.len())?);
            num_data.push(index32(Self::TABLE, header.num_data)?);
            aux.extend([
                header.arg_max as f64,
                header.max_value,
                header.grid.log_min(),
                header.grid.inv_log_delta(),
            ]);
            for knot in table.block(imc, interaction)[MAC_XSEC_HEADER_LEN..].chunks_exact(3) {
                energy.push(knot[0]);
                value.push(knot[1]);
                sd.push(knot[2]);
            }
        }

        Ok(Self {
            data_start,
            num_data,
            aux,
            energy,
            value,
            sd,
        })
    }

    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.data_start.len()
    }

    /// First knot of each couple
    #[inline]
    pub fn data_start(&self) -> &[u32] {
        &self.data_start
    }

    /// Number of knots of each couple
    #[inline]
    pub fn num_data(&self) -> &[u32] {
        &self.num_data
    }

    /// Four header values per couple
    #[inline]
    pub fn aux(&self) -> &[f64] {
        &self.aux
    }

    #[inline]
    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    #[inline]
    pub fn value(&self) -> &[f64] {
        &self.value
    }

    #[inline]
    pub fn sd(&self) -> &[f64] {
        &self.sd
    }

    /// Header of couple `imc`, as in the interleaved layout
    pub fn header(&self, imc: usize) -> MacXSecHeader {
        let aux = &self.aux[4 * imc..4 * imc + 4];
        let num_data = self.num_data[imc] as usize;
        MacXSecHeader {
            num_data,
            arg_max: aux[0] as usize,
            max_value: aux[1],
            grid: LogGrid::from_raw(num_data, aux[2], aux[3]),
        }
    }

    /// Restricted macroscopic cross section of couple `imc` at `ekin`
    #[inline]
    pub fn mac_xsec(&self, imc: usize, ekin: f64) -> f64 {
        let start = self.data_start[imc] as usize;
        let m = self.num_data[imc] as usize;
        let grid = LogGrid::from_raw(m, self.aux[4 * imc + 2], self.aux[4 * imc + 3]);
        let knots = start..start + m;
        spline_separate(
            &self.energy[knots.clone()],
            1,
            &self.value[knots.clone()],
            &self.sd[knots],
            ekin,
            grid.bin_index(ekin),
        )
    }

    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<u32>() * (self.data_start.len() + self.num_data.len())
            + std::mem::size_of::<f64>()
                * (self.aux.len() + self.energy.len() + self.value.len() + self.sd.len())
    }
}

impl Debug for MacXSecSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacXSecSplit")
            .field("num_mat_cuts", &self.num_mat_cuts())
            .field("num_knots", &self.energy.len())
            .finish()
    }
}

// ============================================================================
// Element selectors
// ============================================================================

/// Element selector of one model with the block headers moved into side arrays.
///
/// `data` holds only the knot records; `aux[2·imc..2·imc + 2] = (ln(E_0), 1/Δln(E))`.
/// Single-element couples have `data_start = NO_DATA`, no records, and one element.
#[derive(Clone, PartialEq)]
pub struct ElementSelectorSplit {
    data_start: Vec<i32>,
    num_data: Vec<u32>,
    num_elements: Vec<u32>,
    aux: Vec<f64>,
    data: Vec<f64>,
}

impl ElementSelectorSplit {
    const TABLE: &'static str = "split element selector";

    /// Strip the block headers of the interleaved table
    pub fn from_canonical(table: &ElementSelectorTable) -> Result<Self, TableError> {
        let nmc = table.num_mat_cuts();
        let num_blocks = table.start_indices().iter().flatten().count();
        let total = table.data().len() - ELEMENT_SELECTOR_HEADER_LEN * num_blocks;
        let mut data_start = try_buffer(Self::TABLE, nmc)?;
        let mut num_data = try_buffer(Self::TABLE, nmc)?;
        let mut num_elements = try_buffer(Self::TABLE, nmc)?;
        let mut aux = try_buffer(Self::TABLE, 2 * nmc)?;
        let mut data = try_buffer(Self::TABLE, total)?;

        for imc in 0..nmc {
            match table.block(imc) {
                Some(block) => {
                    data_start.push(index32(Self::TABLE, data.len())?);
                    num_data.push(index32(Self::TABLE, block[0] as usize)?);
                    num_elements.push(index32(Self::TABLE, block[1] as usize)?);
                    aux.extend([block[2], block[3]]);
                    data.extend_from_slice(&block[ELEMENT_SELECTOR_HEADER_LEN..]);
                }
                None => {
                    data_start.push(NO_DATA);
                    num_data.push(0);
                    num_elements.push(1);
                    aux.extend([0.0, 0.0]);
                }
            }
        }

        Ok(Self {
            data_start,
            num_data,
            num_elements,
            aux,
            data,
        })
    }

    #[inline]
    pub fn num_mat_cuts(&self) -> usize {
        self.data_start.len()
    }

    /// First record value of each couple, [`NO_DATA`] for single-element couples
    #[inline]
    pub fn data_start(&self) -> &[i32] {
        &self.data_start
    }

    /// Number of energy knots, K, of each couple
    #[inline]
    pub fn num_data(&self) -> &[u32] {
        &self.num_data
    }

    /// Number of elements, Q, of each couple
    #[inline]
    pub fn num_elements(&self) -> &[u32] {
        &self.num_elements
    }

    #[inline]
    pub fn aux(&self) -> &[f64] {
        &self.aux
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Samples the target element index for couple `imc`
    #[inline]
    pub fn select(&self, imc: usize, ekin: f64, urnd: f64) -> usize {
        let Ok(start) = usize::try_from(self.data_start[imc]) else {
            return 0;
        };
        let k = self.num_data[imc] as usize;
        let q = self.num_elements[imc] as usize;
        let grid = LogGrid::from_raw(k, self.aux[2 * imc], self.aux[2 * imc + 1]);
        sample_element(&self.data[start..start + k * q], q, &grid, ekin, urnd)
    }

    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<i32>() * self.data_start.len()
            + std::mem::size_of::<u32>() * (self.num_data.len() + self.num_elements.len())
            + std::mem::size_of::<f64>() * (self.aux.len() + self.data.len())
    }
}

impl Debug for ElementSelectorSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementSelectorSplit")
            .field("num_mat_cuts", &self.num_mat_cuts())
            .field(
                "multi_element_couples",
                &self.data_start.iter().filter(|s| **s != NO_DATA).count(),
            )
            .field("num_data", &self.data.len())
            .finish()
    }
}

// ============================================================================
// All tables
// ============================================================================

/// Field-split copy of all e⁻/e⁺ tables
#[derive(Clone, PartialEq)]
pub struct ElectronDataSplit {
    num_mat_cuts: usize,
    energy_loss: EnergyLossSplit,
    mac_xsec: [MacXSecSplit; 2],
    element_selectors: [ElementSelectorSplit; 3],
}

impl ElectronDataSplit {
    /// Copy frozen canonical tables into the field-split layout.
    ///
    /// Fails only if a buffer cannot be allocated or an offset does not fit 32 bits.
    pub fn from_canonical(data: &ElectronData) -> Result<Self, TableError> {
        let energy_loss = EnergyLossSplit::from_canonical(data.energy_loss_table())?;
        let [ioni, brem] =
            Interaction::ALL.map(|i| MacXSecSplit::from_canonical(data.mac_xsec_table(), i));
        let [sel_ioni, sel_brem_sb, sel_brem_rb] = ElementSelectorModel::ALL
            .map(|model| ElementSelectorSplit::from_canonical(data.element_selector(model)));
        let split = Self {
            num_mat_cuts: data.num_mat_cuts(),
            energy_loss,
            mac_xsec: [ioni?, brem?],
            element_selectors: [sel_ioni?, sel_brem_sb?, sel_brem_rb?],
        };
        log::debug!(
            "field-split copy of {} couples: {} bytes (interleaved: {} bytes)",
            split.num_mat_cuts,
            split.memory_bytes(),
            data.memory_bytes()
        );
        Ok(split)
    }

    #[inline]
    pub fn energy_loss_table(&self) -> &EnergyLossSplit {
        &self.energy_loss
    }

    #[inline]
    pub fn mac_xsec_table(&self, interaction: Interaction) -> &MacXSecSplit {
        &self.mac_xsec[interaction.index()]
    }

    #[inline]
    pub fn element_selector(&self, model: ElementSelectorModel) -> &ElementSelectorSplit {
        &self.element_selectors[model.index()]
    }

    /// Heap memory held by all arrays
    pub fn memory_bytes(&self) -> usize {
        self.energy_loss.memory_bytes()
            + self.mac_xsec.iter().map(MacXSecSplit::memory_bytes).sum::<usize>()
            + self
                .element_selectors
                .iter()
                .map(ElementSelectorSplit::memory_bytes)
                .sum::<usize>()
    }
}

impl ElectronTables for ElectronDataSplit {
    #[inline]
    fn num_mat_cuts(&self) -> usize {
        self.num_mat_cuts
    }

    #[inline]
    fn energy_loss(&self, imc: usize, ekin: f64) -> EnergyLoss {
        self.energy_loss.energy_loss(imc, ekin)
    }

    #[inline]
    fn inverse_range(&self, imc: usize, range: f64) -> f64 {
        self.energy_loss.inverse_range(imc, range)
    }

    #[inline]
    fn mac_xsec(&self, imc: usize, interaction: Interaction, ekin: f64) -> f64 {
        self.mac_xsec[interaction.index()].mac_xsec(imc, ekin)
    }

    #[inline]
    fn select_target_element(
        &self,
        imc: usize,
        model: ElementSelectorModel,
        ekin: f64,
        urnd: f64,
    ) -> usize {
        self.element_selectors[model.index()].select(imc, ekin, urnd)
    }
}

impl Debug for ElectronDataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectronDataSplit")
            .field("num_mat_cuts", &self.num_mat_cuts)
            .field("energy_loss", &self.energy_loss)
            .field("memory_bytes", &self.memory_bytes())
            .finish()
    }
}
