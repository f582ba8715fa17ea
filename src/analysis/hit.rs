// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-ray accumulation of partition data and anomaly detection

use super::anomaly::AnomalyEvent;
use super::state::{RunState, SliceTally, ViewStats};
use crate::config::AnalysisFlags;
use crate::kernel::{Hit, Partition, Ray, RegionId};
use crate::plot::{VOLUME_EVEN, VOLUME_ODD};
use crate::sampling::SamplingGrid;
use nalgebra::{Point3, Vector3};

/// Hits closer to grazing than this add no surface area
const GRAZING_COS: f64 = 1.0e-3;

/// Lines of sight below this percentage are reported
const BAD_LOS: f64 = 1.0;

/// What a hit processor needs to know about the view being shot
#[derive(Debug, Clone)]
pub struct ViewContext {
    pub view: usize,
    pub dir: Vector3<f64>,
    pub sampled_axis: usize,
    /// Cell edge along each model axis; the sampled axis entry is zero
    pub cell_edges: Vector3<f64>,
    /// Cross-section of one moment cell
    pub moment_cell_area: f64,
    /// Area of one lattice cell in the image plane
    pub lattice_cell_area: f64,
}

impl ViewContext {
    pub fn new(view: usize, grid: &SamplingGrid) -> Self {
        let frame = grid.frame();
        let spacing = grid.spacing();
        let cell_edges = frame.cell_edges(spacing);
        let [w, h] = frame.cell(spacing);
        let moment_cell_area = (0..3)
            .filter(|a| *a != frame.sampled_axis)
            .map(|a| cell_edges[a])
            .product();

        Self {
            view,
            dir: frame.dir,
            sampled_axis: frame.sampled_axis,
            cell_edges,
            moment_cell_area,
            lattice_cell_area: w * h,
        }
    }
}

/// Turns the partitions of one ray into accumulator deltas and anomaly events
pub struct HitProcessor<'a> {
    state: &'a RunState,
    ctx: &'a ViewContext,
}

/// Exit of the previous partition on the ray
struct PreviousExit {
    region: RegionId,
    dist: f64,
    point: Point3<f64>,
    air_code: i32,
}

impl<'a> HitProcessor<'a> {
    pub fn new(state: &'a RunState, ctx: &'a ViewContext) -> Self {
        Self { state, ctx }
    }

    /// Process the ordered partitions of one ray into `tally`.
    ///
    /// `row` is the lattice row of the ray and only picks the plot colour.
    pub fn process(&self, ray: &Ray, partitions: &[Partition], row: u32, tally: &mut SliceTally) {
        let flags = self.state.flags;
        let tolerance = self.state.tolerances.overlap;
        let last_index = partitions.len().saturating_sub(1);
        let mut previous: Option<PreviousExit> = None;

        for (index, part) in partitions.iter().enumerate() {
            let info = self.state.region(part.region);
            let in_point = ray.at(part.in_hit.dist);
            let out_point = ray.at(part.out_hit.dist);
            let gap = previous.as_ref().map(|p| part.in_hit.dist - p.dist);

            if info.is_air() {
                let region = part.region;
                if flags.contains(AnalysisFlags::EXPOSED_AIR)
                    && (index == 0 || gap.is_some_and(|g| g > tolerance))
                {
                    self.emit(
                        ray,
                        AnomalyEvent::ExposedAir {
                            region,
                            start: in_point,
                            end: out_point,
                        },
                    );
                }
                if flags.contains(AnalysisFlags::FIRST_AIR) && index == 0 {
                    self.emit(
                        ray,
                        AnomalyEvent::FirstAir {
                            region,
                            start: in_point,
                            end: out_point,
                        },
                    );
                }
                if flags.contains(AnalysisFlags::LAST_AIR) && index == last_index {
                    self.emit(
                        ray,
                        AnomalyEvent::LastAir {
                            region,
                            start: in_point,
                            end: out_point,
                        },
                    );
                }
                if flags.contains(AnalysisFlags::UNCONFINED_AIR) && index != 0 && index != last_index
                {
                    self.emit(
                        ray,
                        AnomalyEvent::UnconfinedAir {
                            region,
                            start: in_point,
                            end: out_point,
                        },
                    );
                }
            }

            if let Some(prev) = &previous {
                let distance = part.in_hit.dist - prev.dist;
                if flags.contains(AnalysisFlags::GAPS) && distance > tolerance {
                    self.emit(
                        ray,
                        AnomalyEvent::Gap {
                            region: part.region,
                            previous: prev.region,
                            start: prev.point,
                            end: in_point,
                            distance,
                        },
                    );
                }
                if flags.contains(AnalysisFlags::ADJACENT_AIR)
                    && prev.air_code != 0
                    && info.air_code != 0
                    && info.air_code != prev.air_code
                {
                    self.emit(
                        ray,
                        AnomalyEvent::AdjacentAir {
                            region: part.region,
                            previous: prev.region,
                            at: in_point,
                        },
                    );
                }
            }

            let delta = self.measure(part, &in_point, &out_point, row);
            tally.add(part.region, self.state.object_of(part.region), &delta);

            previous = Some(PreviousExit {
                region: part.region,
                dist: part.out_hit.dist,
                point: out_point,
                air_code: info.air_code,
            });
        }

        // air running out the back of the model
        if let (Some(last), Some(prev)) = (partitions.last(), &previous) {
            if flags.contains(AnalysisFlags::EXPOSED_AIR) && prev.air_code != 0 {
                self.emit(
                    ray,
                    AnomalyEvent::ExposedAir {
                        region: last.region,
                        start: prev.point,
                        end: prev.point,
                    },
                );
            }
        }
    }

    fn emit(&self, ray: &Ray, event: AnomalyEvent) {
        self.state.report_anomaly(ray, event);
    }

    /// Accumulator delta for one partition
    fn measure(
        &self,
        part: &Partition,
        in_point: &Point3<f64>,
        out_point: &Point3<f64>,
        row: u32,
    ) -> ViewStats {
        let flags = self.state.flags;
        let info = self.state.region(part.region);
        let len = part.length();
        let mut delta = ViewStats::default();

        if flags.contains(AnalysisFlags::VOLUME) {
            delta.len = len;
            let color = if row % 2 == 0 { VOLUME_EVEN } else { VOLUME_ODD };
            self.state.plot_volume(color, in_point, out_point);
        }

        if flags.contains(AnalysisFlags::MASS) {
            if info.los < BAD_LOS {
                self.state
                    .log(format!("region {} has bad line-of-sight {}", info.name, info.los));
            }
            match self.state.density_of(part.region) {
                Some(density) => {
                    let thickness = len * info.los * 0.01;
                    let val = density * thickness;
                    delta.len_density = val;

                    let mid = Point3::from((in_point.coords + out_point.coords) * 0.5);
                    if flags.contains(AnalysisFlags::CENTROID) {
                        delta.torque = mid.coords * val;
                    }
                    if flags.contains(AnalysisFlags::MOMENTS) {
                        self.add_moments(&mut delta, &mid, thickness, val);
                    }
                }
                None => self.state.log(format!(
                    "material {} used by {} has no density",
                    info.material_id, info.name
                )),
            }
        }

        if flags.contains(AnalysisFlags::SURFACE_AREA) {
            delta.surface = self.surface(&part.in_hit) + self.surface(&part.out_hit);
        }

        delta
    }

    /// Box moments of one cell plus its offset from the origin
    fn add_moments(&self, delta: &mut ViewStats, mid: &Point3<f64>, thickness: f64, val: f64) {
        let mut edges = self.ctx.cell_edges;
        edges[self.ctx.sampled_axis] = thickness;
        let sq = edges.component_mul(&edges);
        let c = mid.coords;
        let m = val * self.ctx.moment_cell_area;

        delta.moi += Vector3::new(
            m / 12.0 * (sq.y + sq.z) + m * (c.y * c.y + c.z * c.z),
            m / 12.0 * (sq.x + sq.z) + m * (c.x * c.x + c.z * c.z),
            m / 12.0 * (sq.x + sq.y) + m * (c.x * c.x + c.y * c.y),
        );
        delta.poi -= Vector3::new(m * c.x * c.y, m * c.x * c.z, m * c.y * c.z);
        delta.inertia_mass += m;
    }

    fn surface(&self, hit: &Hit) -> f64 {
        let cos = hit.normal.dot(&self.ctx.dir).abs();
        if cos < GRAZING_COS {
            0.0
        } else {
            self.ctx.lattice_cell_area / cos
        }
    }
}
