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

//! ## Canonical table layout
//!
//! The interleaved representation: each table family is one contiguous owned
//! buffer plus small per-couple index arrays, arranged so that everything one
//! interpolation needs is adjacent in memory.
//!
//! Tables are assembled during a single-threaded build phase through an
//! [`ElectronDataBuilder`] and then frozen into an immutable [`ElectronData`]
//! that can be shared between any number of readers.

use crate::{ElectronTables, ElementSelectorModel, EnergyLoss, Interaction, TableError};
use std::fmt::{self, Debug};

mod element_selector;
mod energy_loss;
#[cfg(test)]
pub(crate) mod fixtures;
mod mac_xsec;

pub use self::element_selector::{ElementSelectorBlock, ElementSelectorTable};
pub use self::energy_loss::{EnergyLossCurves, EnergyLossTable};
pub use self::mac_xsec::{MacXSecBlock, MacXSecHeader, MacXSecTable};

/// Offsets and header sizes of the packed formats
pub mod layout {
    pub use super::element_selector::HEADER_LEN as ELEMENT_SELECTOR_HEADER_LEN;
    pub use super::energy_loss::VALUES_PER_KNOT as ENERGY_LOSS_VALUES_PER_KNOT;
    pub use super::mac_xsec::{
        HEADER_LEN as MAC_XSEC_HEADER_LEN, VALUES_PER_KNOT as MAC_XSEC_VALUES_PER_KNOT,
    };
}

/// Frozen e⁻/e⁺ tables in the interleaved layout.
///
/// Immutable once built; share it with `Arc` between reader threads.
#[derive(Clone, PartialEq)]
pub struct ElectronData {
    num_mat_cuts: usize,
    energy_loss: EnergyLossTable,
    mac_xsec: MacXSecTable,
    element_selectors: [ElementSelectorTable; 3],
}

impl ElectronData {
    /// Energy-loss table
    #[inline]
    pub fn energy_loss_table(&self) -> &EnergyLossTable {
        &self.energy_loss
    }

    /// Macroscopic cross-section table
    #[inline]
    pub fn mac_xsec_table(&self) -> &MacXSecTable {
        &self.mac_xsec
    }

    /// Element selector table of `model`
    #[inline]
    pub fn element_selector(&self, model: ElementSelectorModel) -> &ElementSelectorTable {
        &self.element_selectors[model.index()]
    }

    /// Heap memory held by all tables
    pub fn memory_bytes(&self) -> usize {
        self.energy_loss.memory_bytes()
            + self.mac_xsec.memory_bytes()
            + self
                .element_selectors
                .iter()
                .map(ElementSelectorTable::memory_bytes)
                .sum::<usize>()
    }
}

impl ElectronTables for ElectronData {
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
        self.mac_xsec.mac_xsec(imc, interaction, ekin)
    }

    #[inline]
    fn select_target_element(
        &self,
        imc: usize,
        model: ElementSelectorModel,
        ekin: f64,
        urnd: f64,
    ) -> usize {
        self.element_selector(model).select(imc, ekin, urnd)
    }
}

impl Debug for ElectronData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectronData")
            .field("num_mat_cuts", &self.num_mat_cuts)
            .field("energy_loss", &self.energy_loss)
            .field("mac_xsec", &self.mac_xsec)
            .field("memory_bytes", &self.memory_bytes())
            .finish()
    }
}

/// Mutable build-phase handle.
///
/// Starts empty; an external table builder assigns each table, then
/// [`ElectronDataBuilder::freeze`] checks that everything is consistent and hands
/// out the immutable [`ElectronData`].
#[derive(Clone, Debug, Default)]
pub struct ElectronDataBuilder {
    num_mat_cuts: Option<usize>,
    energy_loss: Option<EnergyLossTable>,
    mac_xsec: Option<MacXSecTable>,
    element_selectors: [Option<ElementSelectorTable>; 3],
}

impl ElectronDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing has been assigned yet
    pub fn is_empty(&self) -> bool {
        self.num_mat_cuts.is_none()
            && self.energy_loss.is_none()
            && self.mac_xsec.is_none()
            && self.element_selectors.iter().all(Option::is_none)
    }

    /// Fix the number of couples; otherwise taken from the energy-loss table
    pub fn set_num_mat_cuts(&mut self, num_mat_cuts: usize) -> &mut Self {
        self.num_mat_cuts = Some(num_mat_cuts);
        self
    }

    pub fn set_energy_loss(&mut self, table: EnergyLossTable) -> &mut Self {
        self.energy_loss = Some(table);
        self
    }

    pub fn set_mac_xsec(&mut self, table: MacXSecTable) -> &mut Self {
        self.mac_xsec = Some(table);
        self
    }

    pub fn set_element_selector(
        &mut self,
        model: ElementSelectorModel,
        table: ElementSelectorTable,
    ) -> &mut Self {
        self.element_selectors[model.index()] = Some(table);
        self
    }

    /// End the build phase.
    ///
    /// Fails if a table is missing or if any per-couple array does not have
    /// exactly `num_mat_cuts` entries.
    pub fn freeze(self) -> Result<ElectronData, TableError> {
        let energy_loss = self
            .energy_loss
            .ok_or(TableError::MissingTable("energy loss"))?;
        let mac_xsec = self
            .mac_xsec
            .ok_or(TableError::MissingTable("macroscopic cross section"))?;
        let [ioni, brem_sb, brem_rb] = self.element_selectors;
        let element_selectors = [
            ioni.ok_or(TableError::MissingTable("ionisation element selector"))?,
            brem_sb.ok_or(TableError::MissingTable(
                "Seltzer-Berger bremsstrahlung element selector",
            ))?,
            brem_rb.ok_or(TableError::MissingTable(
                "relativistic bremsstrahlung element selector",
            ))?,
        ];
        let num_mat_cuts = self.num_mat_cuts.unwrap_or(energy_loss.num_mat_cuts());

        let check = |table: &'static str, actual: usize| {
            if actual == num_mat_cuts {
                Ok(())
            } else {
                Err(TableError::CoupleCountMismatch {
                    table,
                    expected: num_mat_cuts,
                    actual,
                })
            }
        };
        check("energy loss", energy_loss.num_mat_cuts())?;
        check("macroscopic cross section", mac_xsec.num_mat_cuts())?;
        for table in &element_selectors {
            check("element selector", table.num_mat_cuts())?;
        }

        let data = ElectronData {
            num_mat_cuts,
            energy_loss,
            mac_xsec,
            element_selectors,
        };
        log::info!(
            "electron data frozen: {} material-cut couples, {} bytes",
            num_mat_cuts,
            data.memory_bytes()
        );
        Ok(data)
    }
}
