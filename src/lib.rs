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

//! # HepEm tables
//!
//! Run-time storage and interpolation of the tabulated e⁻/e⁺ physics data used in
//! condensed-history particle transport: restricted energy loss (range, dE/dx,
//! inverse range), restricted macroscopic cross sections for ionisation and
//! bremsstrahlung, and target element selectors.
//!
//! All tables are indexed by a *material-cut couple* index `imc ∈ 0..num_mat_cuts`
//! and come in two memory representations:
//!
//! - the canonical, interleaved layout ([`ElectronData`]) where everything needed for
//!   one interpolation sits in one or two cache lines;
//! - a field-split layout ([`ElectronDataSplit`]) for wide parallel execution where
//!   neighbouring lanes read neighbouring memory.
//!
//! Both implement [`ElectronTables`], so a stepping engine can be written once
//! against the trait and the layout picked at deploy time through [`Backend`].
//!
//! ```
//! use hepem_tables::tables::{EnergyLossCurves, EnergyLossTable};
//!
//! let grid = vec![1.0, 10.0, 100.0];
//! let curves = EnergyLossCurves::new(vec![2.0, 4.0, 8.0], vec![3.0, 2.0, 1.5]);
//! let eloss = EnergyLossTable::from_curves(grid, &[curves]).unwrap();
//! assert_eq!(eloss.energy_loss(0, 10.0).range, 4.0);
//! ```

#[cfg(test)]
extern crate approx;

use dyn_clone::DynClone;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub mod error;
pub mod grid;
pub mod lifecycle;
pub mod selector;
pub mod spline;
pub mod split;
pub mod tables;

pub use error::TableError;
pub use grid::{GridConfig, LogGrid};
pub use lifecycle::{ElectronDataSlot, SplitSlot};
pub use split::ElectronDataSplit;
pub use tables::{ElectronData, ElectronDataBuilder};

/// Interactions with a restricted macroscopic cross section table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Interaction {
    /// Møller (e⁻) or Bhabha (e⁺) ionisation
    Ionisation,
    /// Bremsstrahlung photon emission
    Bremsstrahlung,
}

impl Interaction {
    /// All interactions, in storage order
    pub const ALL: [Interaction; 2] = [Self::Ionisation, Self::Bremsstrahlung];

    /// Position of the interaction in per-interaction arrays
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Ionisation => 0,
            Self::Bremsstrahlung => 1,
        }
    }
}

/// Interaction models that carry their own target element selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum ElementSelectorModel {
    /// Møller-Bhabha ionisation
    Ioni,
    /// Seltzer-Berger bremsstrahlung (low energy)
    BremSB,
    /// Relativistic bremsstrahlung (high energy)
    BremRB,
}

impl ElementSelectorModel {
    /// All models, in storage order
    pub const ALL: [ElementSelectorModel; 3] = [Self::Ioni, Self::BremSB, Self::BremRB];

    /// Position of the model in per-model arrays
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Ioni => 0,
            Self::BremSB => 1,
            Self::BremRB => 2,
        }
    }
}

/// Restricted range and stopping power at one kinetic energy
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct EnergyLoss {
    /// Restricted range
    pub range: f64,
    /// Restricted stopping power, dE/dx
    pub dedx: f64,
}

/// Read-only lookup contract used by the stepping engine.
///
/// Implementations are frozen after construction and can be queried from any
/// number of threads at once. Energies outside a tabulated grid are clamped to
/// the nearest knot value; no lookup ever fails.
pub trait ElectronTables: DynClone + Debug + Send + Sync {
    /// Number of material-cut couples covered by the tables
    fn num_mat_cuts(&self) -> usize;

    /// Restricted range and dE/dx for couple `imc` at kinetic energy `ekin`
    fn energy_loss(&self, imc: usize, ekin: f64) -> EnergyLoss;

    /// Restricted range only
    fn range(&self, imc: usize, ekin: f64) -> f64 {
        self.energy_loss(imc, ekin).range
    }

    /// Restricted stopping power only
    fn dedx(&self, imc: usize, ekin: f64) -> f64 {
        self.energy_loss(imc, ekin).dedx
    }

    /// Kinetic energy that corresponds to the restricted `range`
    fn inverse_range(&self, imc: usize, range: f64) -> f64;

    /// Restricted macroscopic cross section, Σ
    fn mac_xsec(&self, imc: usize, interaction: Interaction, ekin: f64) -> f64;

    /// Samples the index of the target element using the uniform random number `urnd ∈ [0,1)`
    fn select_target_element(
        &self,
        imc: usize,
        model: ElementSelectorModel,
        ekin: f64,
        urnd: f64,
    ) -> usize;
}

dyn_clone::clone_trait_object!(ElectronTables);

/// Memory representation used to answer lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Backend {
    /// Interleaved, cache-line oriented single buffers (scalar/vector CPU execution)
    #[default]
    Interleaved,
    /// One array per field (wide parallel or accelerator execution)
    FieldSplit,
}

impl Backend {
    /// Wrap frozen tables in the selected representation.
    ///
    /// The field-split backend is an independent copy; `data` is dropped afterwards.
    pub fn build(self, data: ElectronData) -> Result<Box<dyn ElectronTables>, TableError> {
        match self {
            Self::Interleaved => Ok(Box::new(data)),
            Self::FieldSplit => Ok(Box::new(ElectronDataSplit::from_canonical(&data)?)),
        }
    }
}
