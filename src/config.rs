// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Analysis configuration

use crate::density::DensitySource;
use crate::error::{QaError, QaResult};
use crate::units::ReportUnits;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default lower limit on grid spacing, mm
pub const DEFAULT_SPACING_FLOOR: f64 = 0.005;

/// Default density used when a material has no table entry, g/mm³ (1 g/cm³)
pub const DEFAULT_DENSITY: f64 = 0.001;

/// Config file picked up by [`AnalysisConfig::load`]
pub const CONFIG_FILE: &str = "polyframe-qa.toml";

bitflags::bitflags! {
    /// Enabled analyses and anomaly checks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct AnalysisFlags: u32 {
        const VOLUME = 1;
        const MASS = 1 << 1;
        const OVERLAPS = 1 << 2;
        const ADJACENT_AIR = 1 << 3;
        const GAPS = 1 << 4;
        const EXPOSED_AIR = 1 << 5;
        const BOX = 1 << 6;
        const CENTROID = 1 << 7;
        const MOMENTS = 1 << 8;
        const PLOT_OVERLAPS = 1 << 9;
        const SURFACE_AREA = 1 << 10;
        const FIRST_AIR = 1 << 11;
        const LAST_AIR = 1 << 12;
        const UNCONFINED_AIR = 1 << 13;

        /// Everything the `A` letter turns on
        const ALL = Self::ADJACENT_AIR.bits()
            | Self::BOX.bits()
            | Self::CENTROID.bits()
            | Self::EXPOSED_AIR.bits()
            | Self::GAPS.bits()
            | Self::MOMENTS.bits()
            | Self::OVERLAPS.bits()
            | Self::VOLUME.bits()
            | Self::MASS.bits();
    }
}

impl AnalysisFlags {
    const LETTERS: &'static [(char, AnalysisFlags)] = &[
        ('A', Self::ALL),
        ('a', Self::ADJACENT_AIR),
        ('b', Self::BOX),
        ('c', Self::CENTROID),
        ('e', Self::EXPOSED_AIR),
        ('f', Self::FIRST_AIR),
        ('g', Self::GAPS),
        ('l', Self::LAST_AIR),
        ('m', Self::MOMENTS),
        ('o', Self::OVERLAPS),
        ('p', Self::PLOT_OVERLAPS),
        ('s', Self::SURFACE_AREA),
        ('u', Self::UNCONFINED_AIR),
        ('v', Self::VOLUME),
        ('w', Self::MASS),
    ];

    /// Parse letters such as `"vwo"`; `A` selects the common set
    pub fn from_letters(letters: &str) -> QaResult<Self> {
        let mut flags = Self::empty();
        for c in letters.chars().filter(|c| !c.is_whitespace()) {
            let (_, flag) = Self::LETTERS
                .iter()
                .find(|(l, _)| *l == c)
                .ok_or_else(|| QaError::invalid_config(format!("unknown analysis letter '{c}'")))?;
            flags.insert(*flag);
        }
        Ok(flags)
    }

    pub fn to_letters(self) -> String {
        Self::LETTERS
            .iter()
            .skip(1)
            .filter(|(_, f)| self.contains(*f))
            .map(|(l, _)| *l)
            .collect()
    }

    /// Apply implied dependencies: moments need centroids, centroids need mass,
    /// plotting overlaps needs overlap detection.
    pub fn normalized(self) -> Self {
        let mut flags = self;
        if flags.contains(Self::MOMENTS) {
            flags.insert(Self::CENTROID);
        }
        if flags.contains(Self::CENTROID) {
            flags.insert(Self::MASS);
        }
        if flags.contains(Self::PLOT_OVERLAPS) {
            flags.insert(Self::OVERLAPS);
        }
        flags
    }

    /// Metrics that take part in the convergence test
    pub fn has_metrics(self) -> bool {
        self.intersects(Self::VOLUME | Self::MASS | Self::SURFACE_AREA)
    }

    /// Checks that only make sense when air regions are kept
    pub fn needs_air(self) -> bool {
        self.intersects(
            Self::EXPOSED_AIR
                | Self::ADJACENT_AIR
                | Self::FIRST_AIR
                | Self::LAST_AIR
                | Self::UNCONFINED_AIR,
        )
    }
}

impl fmt::Display for AnalysisFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_letters())
    }
}

impl TryFrom<String> for AnalysisFlags {
    type Error = QaError;

    fn try_from(value: String) -> QaResult<Self> {
        Self::from_letters(&value)
    }
}

impl From<AnalysisFlags> for String {
    fn from(flags: AnalysisFlags) -> Self {
        flags.to_letters()
    }
}

/// Sampling grid settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Initial spacing in mm; derived from the model when unset
    pub spacing: Option<f64>,
    /// Refinement stops once spacing reaches this value
    pub spacing_floor: f64,
    /// Cell width / cell height for single-view grids
    pub aspect: f64,
    /// Grid resolution as an alternative to an explicit spacing
    pub pixels: Option<[u32; 2]>,
    /// Minimum number of samples along each model axis
    pub samples_per_axis: f64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            spacing: None,
            spacing_floor: DEFAULT_SPACING_FLOOR,
            aspect: 1.0,
            pixels: None,
            samples_per_axis: 2.0,
        }
    }
}

/// A single fixed view instead of the orthogonal triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleView {
    /// Degrees
    pub azimuth: f64,
    /// Degrees
    pub elevation: f64,
    /// Width of the view in mm; bounding-sphere diameter when unset
    pub view_size: Option<f64>,
    /// Centre of the image plane; model centre when unset
    pub eye_point: Option<[f64; 3]>,
    /// View orientation quaternion `[w, x, y, z]`, overriding azimuth/elevation
    pub orientation: Option<[f64; 4]>,
}

impl Default for SingleView {
    fn default() -> Self {
        Self {
            azimuth: 35.0,
            elevation: 25.0,
            view_size: None,
            eye_point: None,
            orientation: None,
        }
    }
}

/// Tolerance overrides; unset values are derived from the model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// mm
    pub overlap: f64,
    /// mm³
    pub volume: Option<f64>,
    /// g
    pub mass: Option<f64>,
    /// mm²
    pub surface_area: Option<f64>,
}

/// Density settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensitySettings {
    /// Density file; the caller-supplied table is used when unset
    pub file: Option<PathBuf>,
    /// g/mm³
    pub default_density: f64,
    /// Ignore material ids and use `default_density` everywhere
    pub use_default: bool,
}

impl Default for DensitySettings {
    fn default() -> Self {
        Self {
            file: None,
            default_density: DEFAULT_DENSITY,
            use_default: false,
        }
    }
}

/// Complete configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub analyses: AnalysisFlags,
    pub grid: GridSettings,
    /// Number of views; at most 3 for orthogonal grids
    pub views: usize,
    pub single_view: Option<SingleView>,
    /// Seed for the random surface-area view directions
    pub seed: Option<u64>,
    /// Worker threads; all available cores when unset
    pub cpus: Option<usize>,
    /// Regions hit fewer times than this are reported
    pub required_hits: usize,
    pub quiet_missed: bool,
    pub per_region: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Keep air regions in the ray partitions
    pub use_air: bool,
    pub density: DensitySettings,
    pub tolerances: Tolerances,
    /// Top-level objects; derived from region names when empty
    pub objects: Vec<String>,
    /// Prefix for per-class plot files
    pub plot_prefix: Option<PathBuf>,
    pub units: ReportUnits,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analyses: AnalysisFlags::VOLUME
                | AnalysisFlags::OVERLAPS
                | AnalysisFlags::MASS
                | AnalysisFlags::EXPOSED_AIR
                | AnalysisFlags::ADJACENT_AIR
                | AnalysisFlags::GAPS
                | AnalysisFlags::CENTROID
                | AnalysisFlags::MOMENTS,
            grid: GridSettings::default(),
            views: 3,
            single_view: None,
            seed: None,
            cpus: None,
            required_hits: 1,
            quiet_missed: false,
            per_region: false,
            verbose: false,
            debug: false,
            use_air: true,
            density: DensitySettings::default(),
            tolerances: Tolerances::default(),
            objects: Vec::new(),
            plot_prefix: None,
            units: ReportUnits::default(),
        }
    }
}

impl AnalysisConfig {
    /// Config running only the given analyses, everything else default
    pub fn with_analyses(analyses: AnalysisFlags) -> Self {
        Self {
            analyses,
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: AnalysisConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load `polyframe-qa.toml` if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };

        if let Ok(cpus) = std::env::var("POLYFRAME_QA_CPUS") {
            config.cpus = cpus.parse().ok();
        }

        if let Ok(file) = std::env::var("POLYFRAME_QA_DENSITY_FILE") {
            config.density.file = Some(PathBuf::from(file));
        }

        if let Ok(seed) = std::env::var("POLYFRAME_QA_SEED") {
            config.seed = seed.parse().ok();
        }

        if let Ok(verbose) = std::env::var("POLYFRAME_QA_VERBOSE") {
            config.verbose = verbose.parse().unwrap_or(false);
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Worker count after defaulting
    pub fn cpu_count(&self) -> usize {
        self.cpus.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Density source named by this config, if any
    pub fn density_source(&self) -> DensitySource {
        match &self.density.file {
            Some(path) => DensitySource::File(path.clone()),
            None => DensitySource::None,
        }
    }

    /// Reject values that cannot describe a run
    pub fn validate(&self) -> QaResult<()> {
        let grid = &self.grid;
        if let Some(spacing) = grid.spacing {
            if !(spacing > 0.0 && spacing.is_finite()) {
                return Err(QaError::invalid_config(format!("grid spacing {spacing}")));
            }
        }
        if !(grid.spacing_floor > 0.0 && grid.spacing_floor.is_finite()) {
            return Err(QaError::invalid_config(format!(
                "grid spacing floor {}",
                grid.spacing_floor
            )));
        }
        if !(grid.aspect > 0.0 && grid.aspect.is_finite()) {
            return Err(QaError::invalid_config(format!("aspect {}", grid.aspect)));
        }
        if !(grid.samples_per_axis >= 1.0) {
            return Err(QaError::invalid_config(format!(
                "samples per axis {}",
                grid.samples_per_axis
            )));
        }
        if let Some([w, h]) = grid.pixels {
            if w == 0 || h == 0 {
                return Err(QaError::invalid_config("grid pixels must be non-zero"));
            }
        }
        if self.views == 0 {
            return Err(QaError::invalid_config("at least one view is required"));
        }
        let orthogonal = self.single_view.is_none()
            && !self.analyses.contains(AnalysisFlags::SURFACE_AREA);
        if orthogonal && self.views > 3 {
            return Err(QaError::invalid_config(format!(
                "{} orthogonal views requested, at most 3 exist",
                self.views
            )));
        }
        if self.cpus == Some(0) {
            return Err(QaError::invalid_config("cpu count must be at least 1"));
        }
        if self.tolerances.overlap < 0.0 {
            return Err(QaError::invalid_config("overlap tolerance must not be negative"));
        }
        if !self.use_air && self.analyses.needs_air() {
            return Err(QaError::AirDiscarded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_letters() {
        let flags = AnalysisFlags::from_letters("vwo").unwrap();
        assert!(flags.contains(AnalysisFlags::VOLUME));
        assert!(flags.contains(AnalysisFlags::MASS));
        assert!(flags.contains(AnalysisFlags::OVERLAPS));
        assert!(!flags.contains(AnalysisFlags::GAPS));
        assert_eq!(flags.to_letters(), "ovw");

        assert!(AnalysisFlags::from_letters("A").unwrap().contains(AnalysisFlags::MOMENTS));
        assert!(AnalysisFlags::from_letters("vz").is_err());
    }

    #[test]
    fn test_flags_serialize_as_letters() {
        let flags = AnalysisFlags::VOLUME | AnalysisFlags::GAPS | AnalysisFlags::MASS;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, "\"gvw\"");

        let back: AnalysisFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
        assert_eq!(back.to_string(), "gvw");

        assert!(serde_json::from_str::<AnalysisFlags>("\"vq\"").is_err());
        assert!(AnalysisFlags::ALL.contains(AnalysisFlags::MASS | AnalysisFlags::OVERLAPS));
        assert!(!AnalysisFlags::ALL.intersects(AnalysisFlags::SURFACE_AREA));
    }

    #[test]
    fn test_flag_normalization() {
        let flags = AnalysisFlags::MOMENTS.normalized();
        assert!(flags.contains(AnalysisFlags::CENTROID | AnalysisFlags::MASS));
        assert!(!AnalysisFlags::GAPS.normalized().has_metrics());
        assert!(AnalysisFlags::SURFACE_AREA.has_metrics());
    }

    #[test]
    fn test_validate() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let mut config = AnalysisConfig::default();
        config.views = 4;
        assert!(config.validate().is_err());
        config.analyses.insert(AnalysisFlags::SURFACE_AREA);
        assert!(config.validate().is_ok());

        let mut config = AnalysisConfig::default();
        config.use_air = false;
        assert!(matches!(config.validate(), Err(QaError::AirDiscarded)));

        let mut config = AnalysisConfig::default();
        config.grid.aspect = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AnalysisConfig::with_analyses(AnalysisFlags::VOLUME | AnalysisFlags::GAPS);
        config.grid.spacing = Some(0.5);
        config.tolerances.overlap = 0.1;
        config.objects = vec!["body".to_string()];

        let file = tempfile::NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
