// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Shared state of one analysis run.
//!
//! Workers never touch the accumulators ray by ray. Each claimed slice is
//! summed into a private [`SliceTally`] that is deposited under the stats
//! lock; the controller folds deposits in slice order after the view's
//! barrier, so sums do not depend on thread scheduling.

use super::anomaly::{AnomalyCallbacks, AnomalyEvent, AnomalyLists};
use crate::config::AnalysisFlags;
use crate::density::DensityTable;
use crate::geometry::BoundingBox;
use crate::kernel::{Ray, RegionId, RegionInfo};
use crate::plot::{PlotClass, PlotWriter};
use ahash::AHashMap;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Lock that survives a panicked holder; the data is plain sums
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative cancellation flag shared with the workers
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tolerances after defaults have been filled in
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedTolerances {
    pub overlap: f64,
    pub volume: f64,
    pub mass: f64,
    pub surface_area: f64,
}

/// Accumulated sums for one target in one view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewStats {
    /// Partition length
    pub len: f64,
    /// Length times density times los fraction
    pub len_density: f64,
    pub surface: f64,
    pub torque: Vector3<f64>,
    pub moi: Vector3<f64>,
    pub poi: Vector3<f64>,
    /// Cell mass that went into `moi` and `poi`
    pub inertia_mass: f64,
}

impl Default for ViewStats {
    fn default() -> Self {
        Self {
            len: 0.0,
            len_density: 0.0,
            surface: 0.0,
            torque: Vector3::zeros(),
            moi: Vector3::zeros(),
            poi: Vector3::zeros(),
            inertia_mass: 0.0,
        }
    }
}

impl AddAssign<&ViewStats> for ViewStats {
    fn add_assign(&mut self, rhs: &ViewStats) {
        self.len += rhs.len;
        self.len_density += rhs.len_density;
        self.surface += rhs.surface;
        self.torque += rhs.torque;
        self.moi += rhs.moi;
        self.poi += rhs.poi;
        self.inertia_mass += rhs.inertia_mass;
    }
}

impl ViewStats {
    fn quarter_surface(&mut self) {
        self.surface *= 0.25;
    }

    fn quarter_inertia(&mut self) {
        self.moi *= 0.25;
        self.poi *= 0.25;
        self.inertia_mass *= 0.25;
    }
}

/// Per-view estimates recorded at the last convergence check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Estimates {
    pub volume: Vec<f64>,
    pub mass: Vec<f64>,
    pub surface_area: Vec<f64>,
}

/// Statistics for one top-level object
#[derive(Debug, Clone)]
pub struct ObjectStats {
    pub name: String,
    pub views: Vec<ViewStats>,
    pub estimates: Estimates,
}

/// Statistics for one region
#[derive(Debug, Clone)]
pub struct RegionStats {
    pub name: String,
    pub object: Option<usize>,
    pub hits: u64,
    pub views: Vec<ViewStats>,
    pub estimates: Estimates,
}

/// What a derived quantity is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Total,
    Object(usize),
    Region(RegionId),
}

/// Sums for one claimed slice of one view
#[derive(Debug, Clone, Default)]
pub struct SliceTally {
    pub shots: u64,
    pub total: ViewStats,
    pub objects: AHashMap<usize, ViewStats>,
    /// Sums and partition count per region
    pub regions: AHashMap<RegionId, (ViewStats, u64)>,
}

impl SliceTally {
    pub fn add(&mut self, region: RegionId, object: Option<usize>, delta: &ViewStats) {
        self.total += delta;
        if let Some(object) = object {
            *self.objects.entry(object).or_default() += delta;
        }
        let entry = self.regions.entry(region).or_default();
        entry.0 += delta;
        entry.1 += 1;
    }
}

/// Every accumulator of the run, guarded by the stats lock
#[derive(Debug, Clone)]
pub struct Accumulators {
    /// Cross-section area per view
    pub area: Vec<f64>,
    pub shots: Vec<u64>,
    pub total: Vec<ViewStats>,
    pub total_estimates: Estimates,
    pub objects: Vec<ObjectStats>,
    pub regions: Vec<RegionStats>,
    pending: Vec<(usize, SliceTally)>,
}

impl Accumulators {
    pub fn new(
        area: Vec<f64>,
        object_names: &[String],
        regions: &[RegionInfo],
        region_object: &[Option<usize>],
    ) -> Self {
        let views = area.len();
        Self {
            shots: vec![0; views],
            total: vec![ViewStats::default(); views],
            total_estimates: Estimates::default(),
            objects: object_names
                .iter()
                .map(|name| ObjectStats {
                    name: name.clone(),
                    views: vec![ViewStats::default(); views],
                    estimates: Estimates::default(),
                })
                .collect(),
            regions: regions
                .iter()
                .zip(region_object)
                .map(|(info, object)| RegionStats {
                    name: info.name.clone(),
                    object: *object,
                    hits: 0,
                    views: vec![ViewStats::default(); views],
                    estimates: Estimates::default(),
                })
                .collect(),
            area,
            pending: Vec::new(),
        }
    }

    pub fn deposit(&mut self, slice: usize, tally: SliceTally) {
        self.pending.push((slice, tally));
    }

    /// Fold deposited tallies into `view` in slice order
    pub fn fold_view(&mut self, view: usize) {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|(slice, _)| *slice);
        for (_, tally) in pending {
            self.shots[view] += tally.shots;
            self.total[view] += &tally.total;
            for (object, stats) in &tally.objects {
                self.objects[*object].views[view] += stats;
            }
            for (region, (stats, hits)) in &tally.regions {
                let entry = &mut self.regions[*region];
                entry.views[view] += stats;
                entry.hits += hits;
            }
        }
    }

    pub fn views(&self, target: Target) -> &[ViewStats] {
        match target {
            Target::Total => &self.total,
            Target::Object(i) => &self.objects[i].views,
            Target::Region(i) => &self.regions[i].views,
        }
    }

    /// Scale a per-ray sum to an area estimate
    fn scaled(&self, view: usize, value: f64) -> f64 {
        match self.shots[view] {
            0 => 0.0,
            shots => value * self.area[view] / shots as f64,
        }
    }

    pub fn volume_estimates(&self, target: Target) -> Vec<f64> {
        self.views(target)
            .iter()
            .enumerate()
            .map(|(v, s)| self.scaled(v, s.len))
            .collect()
    }

    pub fn mass_estimates(&self, target: Target) -> Vec<f64> {
        self.views(target)
            .iter()
            .enumerate()
            .map(|(v, s)| self.scaled(v, s.len_density))
            .collect()
    }

    /// The surface accumulator already carries cell areas
    pub fn surface_estimates(&self, target: Target) -> Vec<f64> {
        self.views(target).iter().map(|s| s.surface).collect()
    }

    /// Mass-weighted centre, `None` when the target has no mass
    pub fn centroid(&self, target: Target) -> Option<Point3<f64>> {
        let masses = self.mass_estimates(target);
        let avg_mass = mean(&masses);
        if !(avg_mass.abs() > f64::EPSILON) {
            return None;
        }
        let views = self.views(target);
        let mut sum = Vector3::zeros();
        for (v, stats) in views.iter().enumerate() {
            if self.shots[v] > 0 {
                sum += stats.torque * (self.area[v] / self.shots[v] as f64);
            }
        }
        Some(Point3::from(sum / views.len() as f64 / avg_mass))
    }

    /// Factor taking a view's moment sums onto that view's mass estimate.
    ///
    /// Moment cells carry the lattice cell area while mass is scaled by
    /// `area / shots`; the two differ on orthogonal grids.
    fn inertia_scale(&self, view: usize, stats: &ViewStats) -> f64 {
        if stats.inertia_mass > 0.0 {
            self.scaled(view, stats.len_density) / stats.inertia_mass
        } else {
            0.0
        }
    }

    /// View-averaged inertia tensor about the model origin
    pub fn inertia_about_origin(&self, target: Target) -> Matrix3<f64> {
        let views = self.views(target);
        let n = views.len().max(1) as f64;
        let (moi, poi) = views.iter().enumerate().fold(
            (Vector3::zeros(), Vector3::zeros()),
            |(m, p), (v, s)| {
                let k = self.inertia_scale(v, s);
                (m + s.moi * k, p + s.poi * k)
            },
        );
        let (moi, poi) = (moi / n, poi / n);
        Matrix3::new(
            moi.x, poi.x, poi.y, //
            poi.x, moi.y, poi.z, //
            poi.y, poi.z, moi.z,
        )
    }

    /// Inertia tensor about the centroid by the parallel-axis theorem
    pub fn inertia(&self, target: Target) -> Option<Matrix3<f64>> {
        let c = self.centroid(target)?.coords;
        let mass = mean(&self.mass_estimates(target));
        let shift = (Matrix3::identity() * c.norm_squared() - c * c.transpose()) * mass;
        Some(self.inertia_about_origin(target) - shift)
    }

    /// Record per-view estimates for every target
    pub fn store_estimates(&mut self) {
        let snapshot = |acc: &Self, target| Estimates {
            volume: acc.volume_estimates(target),
            mass: acc.mass_estimates(target),
            surface_area: acc.surface_estimates(target),
        };
        self.total_estimates = snapshot(self, Target::Total);
        for i in 0..self.objects.len() {
            self.objects[i].estimates = snapshot(self, Target::Object(i));
        }
        for i in 0..self.regions.len() {
            self.regions[i].estimates = snapshot(self, Target::Region(i));
        }
    }

    fn each_view_mut(&mut self, mut f: impl FnMut(&mut ViewStats)) {
        self.total.iter_mut().for_each(&mut f);
        for object in &mut self.objects {
            object.views.iter_mut().for_each(&mut f);
        }
        for region in &mut self.regions {
            region.views.iter_mut().for_each(&mut f);
        }
    }

    /// Rescale surface sums for a lattice of quarter-size cells
    pub fn quarter_surface(&mut self) {
        self.each_view_mut(ViewStats::quarter_surface);
    }

    /// Rescale moment and product sums for a lattice of quarter-size cells
    pub fn quarter_inertia(&mut self) {
        self.each_view_mut(ViewStats::quarter_inertia);
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// max - min
pub fn spread(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}

/// Everything guarded by the diagnostics lock
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub lists: AnomalyLists,
    pub plot: Option<PlotWriter>,
    /// Overlap segments kept in memory for display
    pub overlap_segments: Vec<[Point3<f64>; 2]>,
    log: BTreeMap<String, u64>,
}

impl Diagnostics {
    /// Messages are counted rather than repeated
    pub fn log(&mut self, message: String) {
        *self.log.entry(message).or_insert(0) += 1;
    }

    pub fn log_entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.log.iter().map(|(m, c)| (m.as_str(), *c))
    }

    fn plot(&mut self, class: PlotClass, color: [u8; 3], a: &Point3<f64>, b: &Point3<f64>) {
        let Some(writer) = self.plot.as_mut() else {
            return;
        };
        if let Err(e) = writer.segment(class, color, a, b) {
            warn!(error = %e, class = class.stem(), "plot output disabled");
            self.plot = None;
        }
    }
}

/// Map regions onto top-level objects.
///
/// A region belongs to an object when its name, without a leading `/`, is
/// the object name or starts with it followed by `/`. With no requested
/// objects, the first path component of each region name is its object.
pub fn map_objects(
    regions: &[RegionInfo],
    requested: &[String],
) -> (Vec<String>, Vec<Option<usize>>) {
    let strip = |name: &str| name.trim_start_matches('/').to_string();

    if requested.is_empty() {
        let mut names: Vec<String> = Vec::new();
        let mapping = regions
            .iter()
            .map(|r| {
                let name = strip(&r.name);
                let top = name.split('/').next().unwrap_or_default().to_string();
                match names.iter().position(|n| *n == top) {
                    Some(i) => Some(i),
                    None => {
                        names.push(top);
                        Some(names.len() - 1)
                    }
                }
            })
            .collect();
        return (names, mapping);
    }

    let names: Vec<String> = requested.iter().map(|n| strip(n)).collect();
    let mapping = regions
        .iter()
        .map(|r| {
            let name = strip(&r.name);
            names.iter().position(|object| {
                name == *object
                    || name
                        .strip_prefix(object.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        })
        .collect();
    (names, mapping)
}

/// Inputs for building a [`RunState`]
pub struct RunInputs {
    pub flags: AnalysisFlags,
    pub tolerances: ResolvedTolerances,
    pub spacing_floor: f64,
    pub cpus: usize,
    pub required_hits: usize,
    pub use_air: bool,
    pub densities: DensityTable,
    pub use_default_density: bool,
    pub default_density: f64,
    pub regions: Vec<RegionInfo>,
    pub objects: Vec<String>,
    pub bbox: BoundingBox,
    pub area: Vec<f64>,
    pub callbacks: AnomalyCallbacks,
    pub abort: AbortHandle,
    pub plot: Option<PlotWriter>,
    /// Length of the tick plotted for point-like anomalies
    pub plot_tick: f64,
}

/// State shared by the controller and the workers for one run
#[derive(Debug)]
pub struct RunState {
    pub flags: AnalysisFlags,
    pub tolerances: ResolvedTolerances,
    pub spacing_floor: f64,
    pub cpus: usize,
    pub required_hits: usize,
    pub use_air: bool,
    pub bbox: BoundingBox,
    densities: DensityTable,
    use_default_density: bool,
    default_density: f64,
    regions: Vec<RegionInfo>,
    region_object: Vec<Option<usize>>,
    object_names: Vec<String>,
    callbacks: AnomalyCallbacks,
    abort: AbortHandle,
    plot_tick: f64,
    pub stats: Mutex<Accumulators>,
    pub diagnostics: Mutex<Diagnostics>,
}

impl RunState {
    pub fn new(inputs: RunInputs) -> Self {
        let (object_names, region_object) = map_objects(&inputs.regions, &inputs.objects);
        let stats = Accumulators::new(inputs.area, &object_names, &inputs.regions, &region_object);
        Self {
            flags: inputs.flags,
            tolerances: inputs.tolerances,
            spacing_floor: inputs.spacing_floor,
            cpus: inputs.cpus,
            required_hits: inputs.required_hits,
            use_air: inputs.use_air,
            bbox: inputs.bbox,
            densities: inputs.densities,
            use_default_density: inputs.use_default_density,
            default_density: inputs.default_density,
            regions: inputs.regions,
            region_object,
            object_names,
            callbacks: inputs.callbacks,
            abort: inputs.abort,
            plot_tick: inputs.plot_tick,
            stats: Mutex::new(stats),
            diagnostics: Mutex::new(Diagnostics {
                plot: inputs.plot,
                ..Diagnostics::default()
            }),
        }
    }

    pub fn region(&self, id: RegionId) -> &RegionInfo {
        &self.regions[id]
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    pub fn object_names(&self) -> &[String] {
        &self.object_names
    }

    pub fn object_of(&self, region: RegionId) -> Option<usize> {
        self.region_object.get(region).copied().flatten()
    }

    /// Regions outside the requested objects take no part in the run
    pub fn is_included(&self, region: RegionId) -> bool {
        self.object_of(region).is_some()
    }

    /// Keep a partition of this region at all
    pub fn keeps(&self, region: RegionId) -> bool {
        self.is_included(region) && (self.use_air || !self.regions[region].is_air())
    }

    /// Density in g/mm³, `None` when the material has no entry
    pub fn density_of(&self, region: RegionId) -> Option<f64> {
        if self.use_default_density {
            return Some(self.default_density);
        }
        self.densities.density(self.regions[region].material_id)
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn deposit(&self, slice: usize, tally: SliceTally) {
        lock(&self.stats).deposit(slice, tally);
    }

    /// Record a per-ray data problem in the deduplicated log
    pub fn log(&self, message: String) {
        lock(&self.diagnostics).log(message);
    }

    /// List, plot, then hand the event to its handler outside the lock
    pub fn report_anomaly(&self, ray: &Ray, event: AnomalyEvent) {
        {
            let mut diag = lock(&self.diagnostics);
            diag.lists.record(&event);
            let (start, mut end) = event.segment();
            if let AnomalyEvent::AdjacentAir { at, .. } = &event {
                end = *at + ray.dir * self.plot_tick;
            }
            if matches!(event, AnomalyEvent::Overlap { .. })
                && self.flags.contains(AnalysisFlags::PLOT_OVERLAPS)
            {
                diag.overlap_segments.push([start, end]);
            }
            if let Some(class) = PlotClass::for_kind(event.kind()) {
                diag.plot(class, class.color(), &start, &end);
            }
        }
        self.callbacks.dispatch(&event);
    }

    pub fn plot_volume(&self, color: [u8; 3], start: &Point3<f64>, end: &Point3<f64>) {
        let mut diag = lock(&self.diagnostics);
        if diag.plot.is_some() {
            diag.plot(PlotClass::Volume, color, start, end);
        }
    }
}
