// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe QA
//!
//! Estimates volume, mass, surface area, centroid and inertia of a model by
//! shooting parallel ray grids through it, refining the grids until the
//! estimates from different view directions agree. The same rays find
//! overlaps, gaps and misplaced air regions.
//!
//! Geometry is reached through the [`RayKernel`] trait; [`Scene`] is a small
//! kernel over analytic primitives.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod density;
pub mod error;
pub mod geometry;
pub mod kernel;
pub mod plot;
pub mod sampling;
pub mod units;
pub mod utils;

pub use analysis::{AnalysisReport, AnomalyEvent, AnomalyKind, ConvergenceController, EventLog};
pub use config::{AnalysisConfig, AnalysisFlags};
pub use density::{DensitySource, DensityTable};
pub use error::{QaError, QaResult};
pub use geometry::{BoundingBox, Primitive, Scene};
pub use kernel::{RayHandler, RayKernel, RegionInfo};

/// Run an analysis with no anomaly handlers beyond what `config` needs.
///
/// Every enabled anomaly kind is collected by one [`EventLog`], returned
/// alongside the report.
pub fn analyze(
    kernel: &dyn RayKernel,
    config: AnalysisConfig,
) -> QaResult<(AnalysisReport, std::sync::Arc<EventLog>)> {
    let events = EventLog::new();
    let report = ConvergenceController::new(kernel, config)
        .on_all(events.clone())
        .run()?;
    Ok((report, events))
}
