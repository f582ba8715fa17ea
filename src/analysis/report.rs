// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Final results of an analysis run

use super::anomaly::{AnomalyKind, AnomalyLists};
use super::state::{mean, Accumulators, Estimates, ResolvedTolerances, RunState, Target};
use crate::config::AnalysisFlags;
use crate::error::{QaError, QaResult};
use crate::geometry::BoundingBox;
use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Point3};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A metric estimated once per view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub per_view: Vec<f64>,
}

impl Estimate {
    pub fn from_views(values: &[f64]) -> Self {
        Self {
            average: mean(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            per_view: values.to_vec(),
        }
    }

    pub fn spread(&self) -> f64 {
        if self.per_view.is_empty() {
            0.0
        } else {
            self.max - self.min
        }
    }
}

/// Results for the whole model or one object
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub volume: Option<Estimate>,
    pub mass: Option<Estimate>,
    pub surface_area: Option<Estimate>,
    pub centroid: Option<[f64; 3]>,
    /// About the centroid
    pub inertia: Option<[[f64; 3]; 3]>,
    pub inertia_about_origin: Option<[[f64; 3]; 3]>,
}

impl TargetReport {
    fn new(
        name: &str,
        stats: &Accumulators,
        target: Target,
        estimates: &Estimates,
        flags: AnalysisFlags,
    ) -> Self {
        let pick = |flag, values: &[f64]| flags.contains(flag).then(|| Estimate::from_views(values));
        let moments = flags.contains(AnalysisFlags::MOMENTS);
        Self {
            name: name.to_string(),
            volume: pick(AnalysisFlags::VOLUME, &estimates.volume),
            mass: pick(AnalysisFlags::MASS, &estimates.mass),
            surface_area: pick(AnalysisFlags::SURFACE_AREA, &estimates.surface_area),
            centroid: flags
                .contains(AnalysisFlags::CENTROID)
                .then(|| stats.centroid(target).map(point_array))
                .flatten(),
            inertia: moments
                .then(|| stats.inertia(target).map(matrix_rows))
                .flatten(),
            inertia_about_origin: moments.then(|| matrix_rows(stats.inertia_about_origin(target))),
        }
    }

    pub fn centroid_point(&self) -> Option<Point3<f64>> {
        self.centroid.map(|[x, y, z]| Point3::new(x, y, z))
    }

    pub fn inertia_matrix(&self) -> Option<Matrix3<f64>> {
        self.inertia.map(matrix_from_rows)
    }

    pub fn inertia_about_origin_matrix(&self) -> Option<Matrix3<f64>> {
        self.inertia_about_origin.map(matrix_from_rows)
    }
}

/// Per-region results
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub name: String,
    pub object: Option<String>,
    pub hits: u64,
    pub volume: Option<Estimate>,
    pub mass: Option<Estimate>,
    pub surface_area: Option<Estimate>,
}

/// One deduplicated region pair of an anomaly list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub first: String,
    pub second: Option<String>,
    pub count: u64,
    pub max_distance: f64,
    pub location: [f64; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub kind: AnomalyKind,
    pub entries: Vec<PairReport>,
}

/// A region hit fewer times than required
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedRegion {
    pub name: String,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSummary {
    pub index: usize,
    pub direction: [f64; 3],
    pub area: f64,
    pub shots: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxReport {
    pub bbox: BoundingBox,
    /// Cross-section areas seen along x, y and z
    pub axis_areas: [f64; 3],
}

/// Run bookkeeping the controller hands to the report
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rounds: usize,
    pub final_spacing: f64,
    pub converged: bool,
    pub aborted: bool,
    pub seed: Option<u64>,
    pub elapsed_ms: u64,
    pub directions: Vec<[f64; 3]>,
    pub missed: Vec<MissedRegion>,
    pub plot_files: Vec<PathBuf>,
}

/// Everything one analysis produced
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub timestamp: DateTime<Utc>,
    pub analyses: AnalysisFlags,
    /// Metric tolerances were met before the spacing floor
    pub converged: bool,
    pub aborted: bool,
    pub rounds: usize,
    pub final_spacing: f64,
    pub spacing_floor: f64,
    pub elapsed_ms: u64,
    pub seed: Option<u64>,
    pub tolerances: ResolvedTolerances,
    pub views: Vec<ViewSummary>,
    pub bounding_box: Option<BoxReport>,
    pub total: TargetReport,
    pub objects: Vec<TargetReport>,
    pub regions: Vec<RegionReport>,
    pub anomalies: Vec<AnomalyReport>,
    pub overlap_segments: Vec<[[f64; 3]; 2]>,
    pub missed: Vec<MissedRegion>,
    pub log: Vec<LogEntry>,
    pub plot_files: Vec<PathBuf>,
}

impl AnalysisReport {
    pub(crate) fn assemble(
        state: &RunState,
        stats: &Accumulators,
        lists: &AnomalyLists,
        log: Vec<LogEntry>,
        overlap_segments: &[[Point3<f64>; 2]],
        summary: RunSummary,
        per_region: bool,
    ) -> Self {
        let flags = state.flags;
        let name_of = |id: usize| state.region(id).name.clone();

        let anomalies = AnomalyKind::enabled(flags)
            .map(|kind| AnomalyReport {
                kind,
                entries: lists
                    .get(kind)
                    .sorted()
                    .into_iter()
                    .map(|((a, b), entry)| PairReport {
                        first: name_of(a),
                        second: b.map(name_of),
                        count: entry.count,
                        max_distance: entry.max_distance,
                        location: point_array(entry.location),
                    })
                    .collect(),
            })
            .collect();

        let regions = if per_region {
            stats
                .regions
                .iter()
                .enumerate()
                .filter(|(id, _)| state.keeps(*id))
                .map(|(_, r)| RegionReport {
                    name: r.name.clone(),
                    object: r.object.map(|o| stats.objects[o].name.clone()),
                    hits: r.hits,
                    volume: flags
                        .contains(AnalysisFlags::VOLUME)
                        .then(|| Estimate::from_views(&r.estimates.volume)),
                    mass: flags
                        .contains(AnalysisFlags::MASS)
                        .then(|| Estimate::from_views(&r.estimates.mass)),
                    surface_area: flags
                        .contains(AnalysisFlags::SURFACE_AREA)
                        .then(|| Estimate::from_views(&r.estimates.surface_area)),
                })
                .collect()
        } else {
            Vec::new()
        };

        let views = summary
            .directions
            .iter()
            .enumerate()
            .map(|(index, direction)| ViewSummary {
                index,
                direction: *direction,
                area: stats.area[index],
                shots: stats.shots[index],
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            analyses: flags,
            converged: summary.converged,
            aborted: summary.aborted,
            rounds: summary.rounds,
            final_spacing: summary.final_spacing,
            spacing_floor: state.spacing_floor,
            elapsed_ms: summary.elapsed_ms,
            seed: summary.seed,
            tolerances: state.tolerances,
            views,
            bounding_box: flags.contains(AnalysisFlags::BOX).then(|| BoxReport {
                bbox: state.bbox,
                axis_areas: state.bbox.axis_areas(),
            }),
            total: TargetReport::new("total", stats, Target::Total, &stats.total_estimates, flags),
            objects: stats
                .objects
                .iter()
                .enumerate()
                .map(|(i, o)| TargetReport::new(&o.name, stats, Target::Object(i), &o.estimates, flags))
                .collect(),
            regions,
            anomalies,
            overlap_segments: overlap_segments
                .iter()
                .map(|[a, b]| [point_array(*a), point_array(*b)])
                .collect(),
            missed: summary.missed,
            log,
            plot_files: summary.plot_files,
        }
    }

    pub fn object(&self, name: &str) -> Option<&TargetReport> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn region(&self, name: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Entries of one anomaly list, empty when the check was off
    pub fn anomalies(&self, kind: AnomalyKind) -> &[PairReport] {
        self.anomalies
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_json(&self) -> QaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| QaError::parse("report", e.to_string()))
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> QaResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| QaError::io(path, e))
    }
}

fn point_array(p: Point3<f64>) -> [f64; 3] {
    [p.x, p.y, p.z]
}

fn matrix_rows(m: Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn matrix_from_rows(rows: [[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_estimate_from_views() {
        let estimate = Estimate::from_views(&[1.0, 1.2, 0.8]);
        assert_relative_eq!(estimate.average, 1.0);
        assert_relative_eq!(estimate.spread(), 0.4, epsilon = 1e-12);
        assert_eq!(estimate.per_view.len(), 3);

        assert_eq!(Estimate::from_views(&[]).spread(), 0.0);
    }

    #[test]
    fn test_matrix_rows_round_trip() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_eq!(matrix_from_rows(matrix_rows(m)), m);
        assert_eq!(matrix_rows(m)[1], [4.0, 5.0, 6.0]);
    }
}
