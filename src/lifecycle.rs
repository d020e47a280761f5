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

//! Ownership slots for the host tables and their field-split mirror.
//!
//! A slot is either null or owns exactly one generation of tables. Re-allocating
//! releases the previous generation first, and freeing a null slot does nothing.
//! Mutation happens during setup and takes `&mut self`; frozen tables are handed
//! out as `Arc`s and stay alive for as long as any reader holds one.

use crate::split::ElectronDataSplit;
use crate::tables::{ElectronData, ElectronDataBuilder};
use crate::TableError;
use std::sync::Arc;

/// Owner of the canonical tables.
///
/// Holds a builder during the build phase or the frozen tables afterwards, never both.
#[derive(Debug, Default)]
pub struct ElectronDataSlot {
    builder: Option<Box<ElectronDataBuilder>>,
    data: Option<Arc<ElectronData>>,
    generation: u64,
}

impl ElectronDataSlot {
    /// A null slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Release whatever the slot holds and start a fresh, empty build.
    pub fn allocate(&mut self) -> &mut ElectronDataBuilder {
        self.free();
        self.generation += 1;
        log::debug!("allocated electron data, generation {}", self.generation);
        self.builder.insert(Box::default())
    }

    /// The builder, while the slot is in its build phase
    pub fn builder_mut(&mut self) -> Option<&mut ElectronDataBuilder> {
        self.builder.as_deref_mut()
    }

    /// End the build phase.
    ///
    /// On failure the partly built tables are released and the slot is left null.
    /// Freezing an already frozen slot returns the existing tables.
    pub fn freeze(&mut self) -> Result<Arc<ElectronData>, TableError> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        let builder = self
            .builder
            .take()
            .ok_or(TableError::MissingTable("electron data"))?;
        match builder.freeze() {
            Ok(data) => Ok(self.data.insert(Arc::new(data)).clone()),
            Err(err) => {
                log::warn!("discarding electron data, generation {}: {err}", self.generation);
                Err(err)
            }
        }
    }

    /// Shared handle to the frozen tables
    pub fn get(&self) -> Option<Arc<ElectronData>> {
        self.data.clone()
    }

    /// Release the tables; a no-op on a null slot
    pub fn free(&mut self) {
        if !self.is_null() {
            log::debug!("freeing electron data, generation {}", self.generation);
        }
        self.builder = None;
        self.data = None;
    }

    /// True if the slot holds nothing
    pub fn is_null(&self) -> bool {
        self.builder.is_none() && self.data.is_none()
    }

    /// True once the tables are frozen
    pub fn is_frozen(&self) -> bool {
        self.data.is_some()
    }

    /// Counts allocations made through this slot
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owner of the field-split mirror of a host slot
#[derive(Debug, Default)]
pub struct SplitSlot {
    data: Option<Arc<ElectronDataSplit>>,
}

impl SplitSlot {
    /// A null slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the current mirror, then rebuild it from the frozen `host` tables.
    ///
    /// A null or still-building host leaves the mirror null.
    pub fn transform(&mut self, host: &ElectronDataSlot) -> Result<(), TableError> {
        self.free();
        let Some(data) = host.get() else {
            log::debug!("host electron data is not frozen; split mirror stays null");
            return Ok(());
        };
        self.data = Some(Arc::new(ElectronDataSplit::from_canonical(&data)?));
        log::info!(
            "transformed electron data, generation {}, to the field-split layout",
            host.generation()
        );
        Ok(())
    }

    /// Shared handle to the mirror
    pub fn get(&self) -> Option<Arc<ElectronDataSplit>> {
        self.data.clone()
    }

    /// Release the mirror; a no-op on a null slot
    pub fn free(&mut self) {
        if self.data.take().is_some() {
            log::debug!("freed field-split electron data");
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }
}
