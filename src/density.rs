// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Material density table.
//!
//! Text format, one material per line:
//!
//! ```text
//! # id  density(g/cm^3)  name
//! 1     7.8295           steel
//! 2     2.7              aluminium 6061
//! ```
//!
//! Densities are stored internally in g/mm³.

use crate::error::{QaError, QaResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Material identifier carried by each region
pub type MaterialId = i32;

/// g/cm³ to g/mm³
pub const GRAMS_PER_CC_TO_MM3: f64 = 0.001;

/// One row of the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityEntry {
    /// g/mm³
    pub density: f64,
    pub name: String,
}

/// Lookup table from material id to density
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DensityTable {
    entries: BTreeMap<MaterialId, DensityEntry>,
}

impl DensityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text format. Malformed lines are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let id = fields.next().and_then(|f| f.parse::<MaterialId>().ok());
            let density = fields.next().and_then(|f| f.parse::<f64>().ok());
            let name = fields.collect::<Vec<_>>().join(" ");

            match (id, density) {
                (Some(id), Some(g_cc)) if id >= 0 && g_cc >= 0.0 => {
                    table.insert(id, g_cc * GRAMS_PER_CC_TO_MM3, name);
                }
                _ => warn!(line = line_no + 1, text = raw, "Skipping malformed density line"),
            }
        }

        debug!(materials = table.len(), "Parsed density table");
        table
    }

    /// Read and parse a density file
    pub fn load(path: impl AsRef<Path>) -> QaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QaError::density_source(path, e.to_string()))?;
        Ok(Self::parse(&text))
    }

    /// Insert or replace a material; `density` is in g/mm³
    pub fn insert(&mut self, id: MaterialId, density: f64, name: impl Into<String>) {
        self.entries.insert(
            id,
            DensityEntry {
                density,
                name: name.into(),
            },
        );
    }

    pub fn density(&self, id: MaterialId) -> Option<f64> {
        self.entries.get(&id).map(|e| e.density)
    }

    pub fn name(&self, id: MaterialId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    /// Next defined material id strictly after `after`, or the first one when `None`
    pub fn next_material_id(&self, after: Option<MaterialId>) -> Option<MaterialId> {
        match after {
            None => self.entries.keys().next().copied(),
            Some(id) => self
                .entries
                .range((std::ops::Bound::Excluded(id), std::ops::Bound::Unbounded))
                .next()
                .map(|(k, _)| *k),
        }
    }

    /// Largest density in the table, walking it id by id
    pub fn max_density(&self) -> Option<f64> {
        let mut max: Option<f64> = None;
        let mut cursor = self.next_material_id(None);
        while let Some(id) = cursor {
            if let Some(d) = self.density(id) {
                max = Some(max.map_or(d, |m| m.max(d)));
            }
            cursor = self.next_material_id(Some(id));
        }
        max
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &DensityEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }
}

/// Where a run gets its densities from
#[derive(Debug, Clone, Default)]
pub enum DensitySource {
    /// External file in the text format
    File(PathBuf),
    /// Table supplied by the caller, e.g. one stored alongside the geometry
    Table(DensityTable),
    /// No table; every region uses the default density
    #[default]
    None,
}

impl DensitySource {
    /// Resolve into a table.
    ///
    /// An explicit file that cannot be read is a setup error. An empty or
    /// absent table is returned as empty so the caller can fall back to the
    /// default density.
    pub fn resolve(&self) -> QaResult<DensityTable> {
        match self {
            DensitySource::File(path) => DensityTable::load(path),
            DensitySource::Table(table) => Ok(table.clone()),
            DensitySource::None => Ok(DensityTable::new()),
        }
    }
}
