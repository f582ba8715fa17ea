// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Plot files for anomaly and volume segments.
//!
//! Each class goes to `<prefix><class>.plot`, a line-oriented text file:
//!
//! ```text
//! color 255 255 0
//! line 0.5 0.25 1 0.5 0.25 1.2
//! ```
//!
//! A `color` record applies to every following `line` until the next one.

use crate::analysis::AnomalyKind;
use crate::config::AnalysisFlags;
use crate::error::{QaError, QaResult};
use nalgebra::Point3;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Category of plotted segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotClass {
    Overlaps,
    Gaps,
    AdjacentAir,
    ExposedAir,
    Volume,
}

impl PlotClass {
    pub const ALL: [PlotClass; 5] = [
        PlotClass::Overlaps,
        PlotClass::Gaps,
        PlotClass::AdjacentAir,
        PlotClass::ExposedAir,
        PlotClass::Volume,
    ];

    pub fn stem(self) -> &'static str {
        match self {
            PlotClass::Overlaps => "overlaps",
            PlotClass::Gaps => "gaps",
            PlotClass::AdjacentAir => "adj_air",
            PlotClass::ExposedAir => "exp_air",
            PlotClass::Volume => "volume",
        }
    }

    pub fn color(self) -> [u8; 3] {
        match self {
            PlotClass::Overlaps => [255, 255, 0],
            PlotClass::Gaps => [128, 192, 255],
            PlotClass::AdjacentAir => [128, 255, 192],
            PlotClass::ExposedAir => [255, 128, 255],
            PlotClass::Volume => VOLUME_EVEN,
        }
    }

    pub fn for_kind(kind: AnomalyKind) -> Option<Self> {
        match kind {
            AnomalyKind::Overlap => Some(PlotClass::Overlaps),
            AnomalyKind::Gap => Some(PlotClass::Gaps),
            AnomalyKind::AdjacentAir => Some(PlotClass::AdjacentAir),
            AnomalyKind::ExposedAir => Some(PlotClass::ExposedAir),
            _ => None,
        }
    }

    fn flag(self) -> AnalysisFlags {
        match self {
            PlotClass::Overlaps => AnalysisFlags::OVERLAPS,
            PlotClass::Gaps => AnalysisFlags::GAPS,
            PlotClass::AdjacentAir => AnalysisFlags::ADJACENT_AIR,
            PlotClass::ExposedAir => AnalysisFlags::EXPOSED_AIR,
            PlotClass::Volume => AnalysisFlags::VOLUME,
        }
    }

    /// Classes that have something to plot under `flags`
    pub fn enabled(flags: AnalysisFlags) -> Vec<PlotClass> {
        Self::ALL
            .into_iter()
            .filter(|c| flags.contains(c.flag()))
            .collect()
    }

    /// `<prefix><stem>.plot`
    pub fn path(self, prefix: &Path) -> PathBuf {
        let mut name = OsString::from(prefix.as_os_str());
        name.push(self.stem());
        name.push(".plot");
        PathBuf::from(name)
    }
}

/// Volume segments alternate colour by lattice row
pub const VOLUME_EVEN: [u8; 3] = [64, 200, 64];
pub const VOLUME_ODD: [u8; 3] = [200, 64, 64];

struct PlotFile {
    class: PlotClass,
    path: PathBuf,
    out: BufWriter<File>,
    color: Option<[u8; 3]>,
    segments: u64,
}

/// Open plot files, one per enabled class
pub struct PlotWriter {
    files: Vec<PlotFile>,
}

impl std::fmt::Debug for PlotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.files.iter().map(|p| &p.path))
            .finish()
    }
}

impl PlotWriter {
    pub fn create(prefix: &Path, classes: &[PlotClass]) -> QaResult<Self> {
        let mut files = Vec::with_capacity(classes.len());
        for class in classes {
            let path = class.path(prefix);
            let file = File::create(&path).map_err(|e| QaError::io(&path, e))?;
            files.push(PlotFile {
                class: *class,
                path,
                out: BufWriter::new(file),
                color: None,
                segments: 0,
            });
        }
        Ok(Self { files })
    }

    /// Append one segment; classes without an open file are ignored
    pub fn segment(
        &mut self,
        class: PlotClass,
        color: [u8; 3],
        start: &Point3<f64>,
        end: &Point3<f64>,
    ) -> std::io::Result<()> {
        let Some(file) = self.files.iter_mut().find(|f| f.class == class) else {
            return Ok(());
        };
        if file.color != Some(color) {
            writeln!(file.out, "color {} {} {}", color[0], color[1], color[2])?;
            file.color = Some(color);
        }
        writeln!(
            file.out,
            "line {} {} {} {} {} {}",
            start.x, start.y, start.z, end.x, end.y, end.z
        )?;
        file.segments += 1;
        Ok(())
    }

    pub fn segment_count(&self, class: PlotClass) -> u64 {
        self.files
            .iter()
            .find(|f| f.class == class)
            .map_or(0, |f| f.segments)
    }

    /// Flush everything and return the written paths
    pub fn finish(self) -> QaResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(self.files.len());
        for mut file in self.files {
            file.out.flush().map_err(|e| QaError::io(&file.path, e))?;
            paths.push(file.path);
        }
        Ok(paths)
    }
}

/// One parsed plot segment
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSegment {
    pub color: [u8; 3],
    pub start: Point3<f64>,
    pub end: Point3<f64>,
}

/// Read a plot file back
pub fn read_plot(path: impl AsRef<Path>) -> QaResult<Vec<PlotSegment>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| QaError::io(path, e))?;
    let what = path.display().to_string();

    let mut color = [255, 255, 255];
    let mut segments = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            None => continue,
            Some("color") => {
                let values: Vec<u8> = fields
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|e| QaError::parse(&what, format!("line {}: {e}", number + 1)))?;
                let [r, g, b] = values[..] else {
                    return Err(QaError::parse(&what, format!("line {}: bad color", number + 1)));
                };
                color = [r, g, b];
            }
            Some("line") => {
                let values: Vec<f64> = fields
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|e| QaError::parse(&what, format!("line {}: {e}", number + 1)))?;
                let [x1, y1, z1, x2, y2, z2] = values[..] else {
                    return Err(QaError::parse(&what, format!("line {}: bad segment", number + 1)));
                };
                segments.push(PlotSegment {
                    color,
                    start: Point3::new(x1, y1, z1),
                    end: Point3::new(x2, y2, z2),
                });
            }
            Some(other) => {
                return Err(QaError::parse(
                    &what,
                    format!("line {}: unknown record '{other}'", number + 1),
                ))
            }
        }
    }
    Ok(segments)
}
