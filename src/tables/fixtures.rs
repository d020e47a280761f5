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

//! Smooth synthetic tables shared by the unit tests

use super::*;
use crate::grid::GridConfig;

/// Couple made of a single element in every selector table
pub(crate) const SINGLE_ELEMENT_COUPLE: usize = 1;

/// Production cut of couple `imc`, MeV
fn cut(imc: usize) -> f64 {
    0.01 * (1.0 + imc as f64)
}

/// Power-law range and dE/dx curves over the default grid
pub(crate) fn energy_loss_table(num_mat_cuts: usize) -> EnergyLossTable {
    let grid = GridConfig::default().knots();
    let curves: Vec<_> = (0..num_mat_cuts)
        .map(|imc| {
            let density = 1.0 + imc as f64;
            let range = grid.iter().map(|e| 0.5 * e.powf(1.6) / density).collect();
            let dedx = grid
                .iter()
                .map(|e| density * (2.0 / e.powf(0.6) + 0.01 * e.ln().max(0.0)))
                .collect();
            EnergyLossCurves::new(range, dedx)
        })
        .collect();
    EnergyLossTable::from_curves(grid, &curves).unwrap()
}

/// Cross sections that start at the threshold, peak, and fall off slowly.
///
/// Grid sizes differ between couples and interactions.
pub(crate) fn mac_xsec_table(num_mat_cuts: usize) -> MacXSecTable {
    let blocks: Vec<_> = (0..num_mat_cuts)
        .map(|imc| {
            let density = 1.0 + imc as f64;
            let tcut = cut(imc);
            let ioni_grid = GridConfig::default()
                .with_range(2.0 * tcut, 1.0e8)
                .with_n_points(40 + 3 * imc)
                .knots();
            let ioni: Vec<f64> = ioni_grid
                .iter()
                .map(|e| density * (e / (2.0 * tcut)).ln() / (1.0 + 0.1 * e).sqrt())
                .collect();
            let brem_grid = GridConfig::default()
                .with_range(tcut, 1.0e8)
                .with_n_points(55 - 2 * imc)
                .knots();
            let brem: Vec<f64> = brem_grid
                .iter()
                .map(|e| density * (1.0 + 0.05 * (e / tcut).ln()))
                .collect();
            (
                MacXSecBlock::from_values(&ioni_grid, &ioni).unwrap(),
                MacXSecBlock::from_values(&brem_grid, &brem).unwrap(),
            )
        })
        .collect();
    MacXSecTable::from_blocks(&blocks).unwrap()
}

/// Selector block with `q` elements over `[e_min, 100 TeV]`.
///
/// Element weights drift with energy so the cumulative values are not constant.
pub(crate) fn selector_block(q: usize, e_min: f64) -> ElementSelectorBlock {
    let energies = GridConfig::default()
        .with_range(e_min, 1.0e8)
        .with_n_points(30)
        .knots();
    let cumulative: Vec<Vec<f64>> = energies
        .iter()
        .map(|e| {
            let weights: Vec<f64> = (0..q)
                .map(|j| (1.0 + j as f64) * (1.0 + 0.02 * j as f64 * (e / e_min).ln()))
                .collect();
            let total: f64 = weights.iter().sum();
            weights
                .iter()
                .take(q - 1)
                .scan(0.0, |acc, w| {
                    *acc += w / total;
                    Some(*acc)
                })
                .collect()
        })
        .collect();
    ElementSelectorBlock::from_values(&energies, &cumulative).unwrap()
}

/// Selector table of `model`; [`SINGLE_ELEMENT_COUPLE`] has no block
pub(crate) fn element_selector_table(
    model: ElementSelectorModel,
    num_mat_cuts: usize,
) -> ElementSelectorTable {
    let e_min = match model {
        ElementSelectorModel::Ioni => 0.02,
        ElementSelectorModel::BremSB => 0.01,
        ElementSelectorModel::BremRB => 1.0e3,
    };
    let blocks: Vec<_> = (0..num_mat_cuts)
        .map(|imc| {
            (imc != SINGLE_ELEMENT_COUPLE)
                .then(|| selector_block(2 + (imc + model.index()) % 3, e_min))
        })
        .collect();
    ElementSelectorTable::from_blocks(&blocks).unwrap()
}

/// Builder with every table assigned
pub(crate) fn builder(num_mat_cuts: usize) -> ElectronDataBuilder {
    let mut builder = ElectronDataBuilder::new();
    builder
        .set_energy_loss(energy_loss_table(num_mat_cuts))
        .set_mac_xsec(mac_xsec_table(num_mat_cuts));
    for model in ElementSelectorModel::ALL {
        builder.set_element_selector(model, element_selector_table(model, num_mat_cuts));
    }
    builder
}

/// Complete frozen tables
pub(crate) fn electron_data(num_mat_cuts: usize) -> ElectronData {
    builder(num_mat_cuts).freeze().unwrap()
}
