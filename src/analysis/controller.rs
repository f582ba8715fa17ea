// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Round-by-round refinement until the estimates agree across views.
//!
//! Setup builds the run. Each round shoots every view's grid, then the
//! terminate check compares the per-view estimates against the tolerances.
//! A run that continues halves the spacing, and the next grids only hold the
//! lattice points the coarser grids did not shoot. Sums that carry a cell
//! area (surface, moments, products) are quartered so old and new samples
//! weigh the same.

use super::anomaly::{AnomalyCallbacks, AnomalyHandler, AnomalyKind};
use super::hit::ViewContext;
use super::report::{AnalysisReport, LogEntry, MissedRegion, RunSummary};
use super::state::{lock, spread, AbortHandle, ResolvedTolerances, RunInputs, RunState};
use super::worker::WorkerPool;
use crate::config::{AnalysisConfig, AnalysisFlags, SingleView};
use crate::density::{DensitySource, DensityTable};
use crate::error::{QaError, QaResult};
use crate::geometry::BoundingBox;
use crate::kernel::RayKernel;
use crate::plot::{PlotClass, PlotWriter};
use crate::sampling::{SamplingGrid, ViewFrame};
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Phases after setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ShootRound,
    TerminateCheck,
    Done,
}

/// Working set of a run between setup and the report
struct Run {
    state: RunState,
    pool: WorkerPool,
    grids: Vec<SamplingGrid>,
    spacing: f64,
    round: usize,
    converged: bool,
    seed: Option<u64>,
}

/// Drives an analysis from setup to report
pub struct ConvergenceController<'k> {
    kernel: &'k dyn RayKernel,
    config: AnalysisConfig,
    density: Option<DensitySource>,
    callbacks: AnomalyCallbacks,
    abort: AbortHandle,
    progress: Option<ProgressBar>,
}

impl<'k> ConvergenceController<'k> {
    pub fn new(kernel: &'k dyn RayKernel, config: AnalysisConfig) -> Self {
        Self {
            kernel,
            config,
            density: None,
            callbacks: AnomalyCallbacks::new(),
            abort: AbortHandle::new(),
            progress: None,
        }
    }

    /// Use this density source instead of the configured file
    pub fn with_density_source(mut self, source: DensitySource) -> Self {
        self.density = Some(source);
        self
    }

    pub fn with_density_table(self, table: DensityTable) -> Self {
        self.with_density_source(DensitySource::Table(table))
    }

    /// Handler for one anomaly kind
    pub fn on(mut self, kind: AnomalyKind, handler: Arc<dyn AnomalyHandler>) -> Self {
        self.callbacks.register(kind, handler);
        self
    }

    /// Handler for every anomaly kind
    pub fn on_all(mut self, handler: Arc<dyn AnomalyHandler>) -> Self {
        self.callbacks.register_all(handler);
        self
    }

    pub fn with_callbacks(mut self, callbacks: AnomalyCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Ticked once per shot view
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle that stops the run from another thread
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn run(self) -> QaResult<AnalysisReport> {
        let started = Instant::now();
        let mut run = self.setup()?;

        let mut phase = Phase::ShootRound;
        while phase != Phase::Done {
            phase = match phase {
                Phase::ShootRound => {
                    self.shoot_round(&mut run);
                    if run.state.is_aborted() {
                        Phase::Done
                    } else {
                        Phase::TerminateCheck
                    }
                }
                Phase::TerminateCheck => {
                    if self.terminate_check(&mut run) {
                        Phase::Done
                    } else {
                        Phase::ShootRound
                    }
                }
                Phase::Done => Phase::Done,
            };
        }

        self.finish(run, started)
    }

    fn setup(&self) -> QaResult<Run> {
        let config = &self.config;
        config.validate()?;
        let flags = config.analyses.normalized();

        let regions = self.kernel.regions().to_vec();
        if regions.is_empty() {
            return Err(QaError::no_geometry("the kernel has no regions"));
        }
        let bbox = self
            .kernel
            .bounds()
            .ok_or_else(|| QaError::no_geometry("the kernel reports no bounds"))?;
        if !bbox.is_valid() {
            return Err(QaError::EmptyBoundingBox);
        }

        self.callbacks.validate(flags)?;

        let spacing = self.initial_spacing(&bbox);
        let (densities, use_default_density) = self.load_densities(flags)?;
        let tolerances = self.resolve_tolerances(&bbox, &densities, use_default_density);
        let (frames, seed) = self.frames(flags, &bbox, spacing)?;

        let plot = match &config.plot_prefix {
            Some(prefix) => Some(PlotWriter::create(prefix, &PlotClass::enabled(flags))?),
            None => None,
        };

        let cpus = config.cpu_count();
        let state = RunState::new(RunInputs {
            flags,
            tolerances,
            spacing_floor: config.grid.spacing_floor,
            cpus,
            required_hits: config.required_hits,
            use_air: config.use_air,
            densities,
            use_default_density,
            default_density: config.density.default_density,
            regions,
            objects: config.objects.clone(),
            bbox,
            area: frames.iter().map(ViewFrame::area).collect(),
            callbacks: self.callbacks.clone(),
            abort: self.abort.clone(),
            plot,
            plot_tick: spacing * 0.25,
        });

        if !(0..state.regions().len()).any(|r| state.is_included(r)) {
            return Err(QaError::no_geometry(format!(
                "no region belongs to {}",
                config.objects.join(", ")
            )));
        }

        info!(
            analyses = %flags,
            spacing,
            floor = config.grid.spacing_floor,
            views = frames.len(),
            cpus,
            objects = state.object_names().len(),
            "analysis setup"
        );
        debug!(?tolerances, ?bbox, "resolved tolerances");

        Ok(Run {
            pool: WorkerPool::new(cpus)?,
            grids: frames
                .into_iter()
                .map(|frame| SamplingGrid::new(frame, spacing))
                .collect(),
            state,
            spacing,
            round: 0,
            converged: false,
            seed,
        })
    }

    /// Explicit spacing, else from pixel counts, else derived from the
    /// smallest model extent so every axis gets a few samples.
    fn initial_spacing(&self, bbox: &BoundingBox) -> f64 {
        let grid = &self.config.grid;
        let span = bbox.size();

        if let Some(spacing) = grid.spacing {
            return spacing;
        }

        if let Some([w, h]) = grid.pixels {
            return match &self.config.single_view {
                Some(view) => {
                    let width = view
                        .view_size
                        .unwrap_or(2.0 * bbox.bounding_radius() * grid.aspect.max(1.0));
                    width / f64::from(w)
                }
                None => span.max() / f64::from(w.max(h)),
            };
        }

        let min_span = span.min();
        let mut spacing = grid.spacing_floor;
        while spacing < min_span {
            spacing *= 2.0;
        }
        spacing = (spacing * 0.25).max(grid.spacing_floor);

        for axis in 0..3 {
            if span[axis] < spacing * grid.samples_per_axis {
                spacing = span[axis] / grid.samples_per_axis;
            }
        }
        spacing
    }

    /// Densities for a mass run, falling back to the default density when
    /// there is no table to use
    fn load_densities(&self, flags: AnalysisFlags) -> QaResult<(DensityTable, bool)> {
        let settings = &self.config.density;
        if !flags.contains(AnalysisFlags::MASS) {
            return Ok((DensityTable::new(), false));
        }
        if settings.use_default {
            info!(density = settings.default_density, "using the default density for every region");
            return Ok((DensityTable::new(), true));
        }

        let source = self
            .density
            .clone()
            .unwrap_or_else(|| self.config.density_source());
        let table = source.resolve()?;
        if table.is_empty() {
            warn!(
                density = settings.default_density,
                "no density table, every region uses the default density"
            );
            return Ok((table, true));
        }
        debug!(materials = table.len(), "density table loaded");
        Ok((table, false))
    }

    fn resolve_tolerances(
        &self,
        bbox: &BoundingBox,
        densities: &DensityTable,
        use_default: bool,
    ) -> ResolvedTolerances {
        let given = &self.config.tolerances;
        let default_density = self.config.density.default_density;
        let max_density = if use_default {
            default_density
        } else {
            densities.max_density().unwrap_or(default_density)
        };

        ResolvedTolerances {
            overlap: given.overlap,
            volume: given.volume.unwrap_or(bbox.volume() * 0.001),
            mass: given.mass.unwrap_or(bbox.volume() * 0.1 * max_density),
            surface_area: given.surface_area.unwrap_or(bbox.surface_area() * 0.01),
        }
    }

    /// View frames for the run and the seed used for random directions
    fn frames(
        &self,
        flags: AnalysisFlags,
        bbox: &BoundingBox,
        spacing: f64,
    ) -> QaResult<(Vec<ViewFrame>, Option<u64>)> {
        let config = &self.config;
        let aspect = config.grid.aspect;

        if flags.contains(AnalysisFlags::SURFACE_AREA) {
            let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
            let mut rng = StdRng::seed_from_u64(seed);
            let base = config.single_view.clone().unwrap_or_default();
            let frames = (0..config.views)
                .map(|_| {
                    // uniform over the sphere of directions
                    let view = SingleView {
                        azimuth: rng.gen_range(0.0..360.0),
                        elevation: rng.gen_range(-1.0f64..1.0).asin().to_degrees(),
                        eye_point: None,
                        orientation: None,
                        ..base.clone()
                    };
                    ViewFrame::oriented(bbox, &view, aspect, spacing)
                })
                .collect::<QaResult<Vec<_>>>()?;
            info!(seed, views = frames.len(), "random view directions");
            return Ok((frames, Some(seed)));
        }

        if let Some(view) = &config.single_view {
            return Ok((vec![ViewFrame::oriented(bbox, view, aspect, spacing)?], None));
        }

        let frames = (0..config.views.min(3))
            .map(|axis| ViewFrame::orthogonal(bbox, axis))
            .collect();
        Ok((frames, None))
    }

    fn shoot_round(&self, run: &mut Run) {
        run.round += 1;
        let started = Instant::now();
        if let Some(pb) = &self.progress {
            pb.set_message(format!("round {} spacing {:.4}", run.round, run.spacing));
        }

        let mut rays = 0;
        for (view, grid) in run.grids.iter().enumerate() {
            if run.state.is_aborted() {
                break;
            }
            let ctx = ViewContext::new(view, grid);
            run.pool.run_view(self.kernel, &run.state, grid, &ctx);
            lock(&run.state.stats).fold_view(view);
            rays += grid.total();
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        info!(
            round = run.round,
            spacing = run.spacing,
            rays,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "round complete"
        );
    }

    /// Compare per-view estimates and decide whether to stop. Continuing
    /// refines the grids for the next round.
    fn terminate_check(&self, run: &mut Run) -> bool {
        let state = &run.state;
        let flags = state.flags;
        let tol = state.tolerances;

        let converged = {
            let mut stats = lock(&state.stats);
            stats.store_estimates();

            let mut converged = true;
            for object in &stats.objects {
                let checks = [
                    (AnalysisFlags::VOLUME, "volume", &object.estimates.volume, tol.volume),
                    (AnalysisFlags::MASS, "mass", &object.estimates.mass, tol.mass),
                    (
                        AnalysisFlags::SURFACE_AREA,
                        "surface area",
                        &object.estimates.surface_area,
                        tol.surface_area,
                    ),
                ];
                for (flag, metric, values, tolerance) in checks {
                    if !flags.contains(flag) {
                        continue;
                    }
                    let disagreement = spread(values);
                    if disagreement > tolerance {
                        converged = false;
                        debug!(object = %object.name, metric, disagreement, tolerance, "views disagree");
                    }
                }
            }

            if flags.contains(AnalysisFlags::SURFACE_AREA) {
                stats.quarter_surface();
            }
            converged
        };
        run.converged = converged;

        if run.spacing <= state.spacing_floor {
            if flags.has_metrics() && !converged {
                warn!(
                    spacing = run.spacing,
                    floor = state.spacing_floor,
                    "spacing floor reached before the views agreed"
                );
            } else {
                info!(spacing = run.spacing, "spacing floor reached");
            }
            return true;
        }

        // anomaly checks run to the floor unless something turns up, and
        // hold metric runs back even once the views agree
        if AnomalyKind::enabled(flags).next().is_some() {
            if lock(&state.diagnostics).lists.any(flags) {
                info!(round = run.round, "anomaly found, stopping");
                return true;
            }
        } else if !flags.has_metrics() || (converged && self.all_hit(state)) {
            return true;
        }

        lock(&state.stats).quarter_inertia();
        run.spacing *= 0.5;
        run.grids = run.grids.iter().map(SamplingGrid::refined).collect();
        debug!(spacing = run.spacing, "refining");
        false
    }

    /// Every kept region has been hit the required number of times
    fn all_hit(&self, state: &RunState) -> bool {
        let stats = lock(&state.stats);
        let mut all_hit = true;
        for (id, region) in stats.regions.iter().enumerate() {
            if state.keeps(id) && (region.hits as usize) < state.required_hits {
                debug!(region = %region.name, hits = region.hits, "region needs more hits");
                all_hit = false;
            }
        }
        all_hit
    }

    fn finish(&self, run: Run, started: Instant) -> QaResult<AnalysisReport> {
        let state = &run.state;
        let aborted = state.is_aborted();
        if aborted {
            warn!(round = run.round, "analysis aborted, results are partial");
        }

        let stats = {
            let mut stats = lock(&state.stats);
            if aborted {
                stats.store_estimates();
            }
            stats.clone()
        };

        let (lists, log, overlap_segments, plot) = {
            let mut diag = lock(&state.diagnostics);
            let log: Vec<LogEntry> = diag
                .log_entries()
                .map(|(message, count)| LogEntry {
                    message: message.to_string(),
                    count,
                })
                .collect();
            (
                diag.lists.clone(),
                log,
                std::mem::take(&mut diag.overlap_segments),
                diag.plot.take(),
            )
        };

        let overlaps = lists.get(AnomalyKind::Overlap);
        let mut missed = Vec::new();
        for (id, region) in stats.regions.iter().enumerate() {
            if !state.keeps(id) || region.hits as usize >= state.required_hits {
                continue;
            }
            if region.hits == 0 {
                // lost every interval it shared with another region
                if overlaps.contains_region(id) || self.config.quiet_missed {
                    continue;
                }
                warn!(region = %region.name, "region was never hit");
            } else {
                warn!(
                    region = %region.name,
                    hits = region.hits,
                    required = state.required_hits,
                    "region hit too few times"
                );
            }
            missed.push(MissedRegion {
                name: region.name.clone(),
                hits: region.hits,
            });
        }

        for entry in &log {
            debug!(count = entry.count, "{}", entry.message);
        }

        let plot_files = match plot {
            Some(writer) => writer.finish().unwrap_or_else(|e| {
                warn!(error = %e, "plot files incomplete");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let directions = run
            .grids
            .iter()
            .map(|g| {
                let d = g.frame().dir;
                [d.x, d.y, d.z]
            })
            .collect();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            rounds = run.round,
            spacing = run.spacing,
            converged = run.converged,
            elapsed_ms,
            "analysis finished"
        );
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        Ok(AnalysisReport::assemble(
            state,
            &stats,
            &lists,
            log,
            &overlap_segments,
            RunSummary {
                rounds: run.round,
                final_spacing: run.spacing,
                converged: run.converged || !state.flags.has_metrics(),
                aborted,
                seed: run.seed,
                elapsed_ms,
                directions,
                missed,
                plot_files,
            },
            self.config.per_region,
        ))
    }
}
