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

//! Builds tables for two toy materials and queries them through either backend.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example table_lookup -- split
//! ```

use anyhow::{bail, Context, Result};
use hepem_tables::tables::{
    ElementSelectorBlock, ElementSelectorTable, EnergyLossCurves, EnergyLossTable, MacXSecBlock,
    MacXSecTable,
};
use hepem_tables::{
    Backend, ElectronDataBuilder, ElectronDataSlot, ElectronTables, ElementSelectorModel, GridConfig,
    Interaction,
};

/// (name, density relative to water, production cut in MeV, element mass fractions)
const MATERIALS: [(&str, f64, f64, &[f64]); 2] = [
    ("water", 1.0, 0.35, &[0.11, 0.89]),
    ("lead", 11.35, 0.1, &[1.0]),
];

fn fill(builder: &mut ElectronDataBuilder) -> Result<()> {
    let grid = GridConfig::default().knots();
    let curves: Vec<_> = MATERIALS
        .iter()
        .map(|(_, density, _, _)| {
            let range = grid.iter().map(|e| 0.4 * e.powf(1.7) / density).collect();
            let dedx = grid.iter().map(|e| density * 2.0 / e.powf(0.7)).collect();
            EnergyLossCurves::new(range, dedx)
        })
        .collect();
    builder.set_energy_loss(EnergyLossTable::from_curves(grid, &curves)?);

    let mut xsec = Vec::new();
    for (_, density, cut, _) in MATERIALS {
        let ioni_grid = GridConfig::default().with_range(2.0 * cut, 1.0e8).knots();
        let ioni: Vec<f64> = ioni_grid
            .iter()
            .map(|e| density * (1.0 - 2.0 * cut / e))
            .collect();
        let brem_grid = GridConfig::default().with_range(cut, 1.0e8).knots();
        let brem: Vec<f64> = brem_grid
            .iter()
            .map(|e| density * 0.1 * (e / cut).ln())
            .collect();
        xsec.push((
            MacXSecBlock::from_values(&ioni_grid, &ioni)?,
            MacXSecBlock::from_values(&brem_grid, &brem)?,
        ));
    }
    builder.set_mac_xsec(MacXSecTable::from_blocks(&xsec)?);

    for model in ElementSelectorModel::ALL {
        let blocks = MATERIALS
            .iter()
            .map(|(_, _, cut, fractions)| -> Result<Option<ElementSelectorBlock>> {
                if fractions.len() < 2 {
                    return Ok(None);
                }
                let energies = GridConfig::default().with_range(*cut, 1.0e8).knots();
                let cumulative = vec![fractions[..fractions.len() - 1].to_vec(); energies.len()];
                Ok(Some(ElementSelectorBlock::from_values(&energies, &cumulative)?))
            })
            .collect::<Result<Vec<_>>>()?;
        builder.set_element_selector(model, ElementSelectorTable::from_blocks(&blocks)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let backend = match std::env::args().nth(1).as_deref() {
        None | Some("interleaved") => Backend::Interleaved,
        Some("split") => Backend::FieldSplit,
        Some(other) => bail!("unknown backend '{other}', expected 'interleaved' or 'split'"),
    };

    let mut slot = ElectronDataSlot::new();
    fill(slot.allocate())?;
    let data = slot.freeze().context("incomplete electron tables")?;
    let tables = backend.build((*data).clone())?;
    log::info!("using {backend:?} backend: {tables:?}");

    for (imc, (name, ..)) in MATERIALS.iter().enumerate() {
        for ekin in [0.01, 1.0, 100.0] {
            let eloss = tables.energy_loss(imc, ekin);
            println!(
                "{name:>6} E = {ekin:>7.2} MeV: range = {:.4e}, dE/dx = {:.4e}, E(range) = {:.4e}, \
                 Σ_ioni = {:.4e}, Σ_brem = {:.4e}, element = {}",
                eloss.range,
                eloss.dedx,
                tables.inverse_range(imc, eloss.range),
                tables.mac_xsec(imc, Interaction::Ionisation, ekin),
                tables.mac_xsec(imc, Interaction::Bremsstrahlung, ekin),
                tables.select_target_element(imc, ElementSelectorModel::BremSB, ekin, 0.5),
            );
        }
    }
    slot.free();
    Ok(())
}
