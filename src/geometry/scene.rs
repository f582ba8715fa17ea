// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Reference ray kernel over analytic primitives.
//!
//! Regions may overlap freely. Along each ray the region intervals are cut
//! into elementary segments at every boundary. Two regions sharing a run of
//! back-to-back segments are arbitrated once for the whole run through
//! [`RayHandler::on_overlap`], and neighbouring segments won by the same
//! region are merged back into a single partition.

use super::{BoundingBox, Primitive};
use crate::density::MaterialId;
use crate::error::{QaError, QaResult};
use crate::kernel::{
    Hit, OverlapClaim, OverlapInterval, Partition, Ray, RayHandler, RayKernel, RegionId,
    RegionInfo,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Boundaries closer than this are the same boundary
const BOUNDARY_EPS: f64 = 1.0e-9;

/// One region as written in a scene file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRegion {
    pub name: String,
    #[serde(default)]
    pub material_id: MaterialId,
    #[serde(default = "full_los")]
    pub los: f64,
    #[serde(default)]
    pub air_code: i32,
    pub shape: Primitive,
}

fn full_los() -> f64 {
    100.0
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SceneFile {
    #[serde(default, rename = "region")]
    regions: Vec<SceneRegion>,
}

/// A set of possibly overlapping primitive regions
#[derive(Debug, Clone, Default)]
pub struct Scene {
    regions: Vec<RegionInfo>,
    shapes: Vec<Primitive>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML scene made of `[[region]]` tables
    pub fn from_toml(text: &str) -> QaResult<Self> {
        let file: SceneFile =
            toml::from_str(text).map_err(|e| QaError::parse("scene", e.to_string()))?;

        let mut scene = Self::new();
        for region in file.regions {
            scene.push(
                RegionInfo {
                    name: region.name,
                    material_id: region.material_id,
                    los: region.los,
                    air_code: region.air_code,
                },
                region.shape,
            );
        }
        Ok(scene)
    }

    pub fn load(path: impl AsRef<Path>) -> QaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| QaError::io(path, e))?;
        Self::from_toml(&text)
    }

    /// Serialize back into the `[[region]]` form
    pub fn to_toml(&self) -> QaResult<String> {
        let file = SceneFile {
            regions: self
                .regions
                .iter()
                .zip(&self.shapes)
                .map(|(info, shape)| SceneRegion {
                    name: info.name.clone(),
                    material_id: info.material_id,
                    los: info.los,
                    air_code: info.air_code,
                    shape: shape.clone(),
                })
                .collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| QaError::parse("scene", e.to_string()))
    }

    pub fn push(&mut self, info: RegionInfo, shape: Primitive) -> RegionId {
        self.regions.push(info);
        self.shapes.push(shape);
        self.regions.len() - 1
    }

    /// Add a solid region with full line of sight
    pub fn add_solid(&mut self, name: &str, material_id: MaterialId, shape: Primitive) -> RegionId {
        self.push(
            RegionInfo {
                name: name.to_string(),
                material_id,
                los: 100.0,
                air_code: 0,
            },
            shape,
        )
    }

    /// Add an air region
    pub fn add_air(&mut self, name: &str, air_code: i32, shape: Primitive) -> RegionId {
        self.push(
            RegionInfo {
                name: name.to_string(),
                material_id: 0,
                los: 100.0,
                air_code,
            },
            shape,
        )
    }

    pub fn shape(&self, id: RegionId) -> Option<&Primitive> {
        self.shapes.get(id)
    }

    /// Copy of the scene moved by `offset`
    pub fn translated(&self, offset: &Vector3<f64>) -> Self {
        Self {
            regions: self.regions.clone(),
            shapes: self.shapes.iter().map(|s| s.translated(offset)).collect(),
        }
    }
}

/// One region's crossing of the ray
struct Span {
    region: RegionId,
    enter: Hit,
    exit: Hit,
}

impl Span {
    fn covers(&self, t: f64) -> bool {
        self.enter.dist < t && t < self.exit.dist
    }
}

/// Elementary segment between neighbouring cuts, claimants in entry order
struct Cell<'a> {
    index: usize,
    start: f64,
    end: f64,
    claimants: Vec<&'a Span>,
}

impl Cell<'_> {
    fn holds(&self, region: RegionId) -> bool {
        self.claimants.iter().any(|s| s.region == region)
    }

    /// `next` follows directly and both cells are claimed by `a` and `b`
    fn runs_into(&self, next: &Self, a: RegionId, b: RegionId) -> bool {
        self.index + 1 == next.index && [self, next].iter().all(|c| c.holds(a) && c.holds(b))
    }
}

/// Bounds of the run of back-to-back cells around `pos` that both regions claim
fn shared_run(cells: &[Cell], pos: usize, a: RegionId, b: RegionId) -> (usize, usize) {
    let mut lo = pos;
    while lo > 0 && cells[lo - 1].runs_into(&cells[lo], a, b) {
        lo -= 1;
    }
    let mut hi = pos;
    while hi + 1 < cells.len() && cells[hi].runs_into(&cells[hi + 1], a, b) {
        hi += 1;
    }
    (lo, hi)
}

impl RayKernel for Scene {
    fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    fn bounds(&self) -> Option<BoundingBox> {
        if self.shapes.is_empty() {
            return None;
        }
        Some(
            self.shapes
                .iter()
                .fold(BoundingBox::empty(), |acc, s| acc.union(&s.bounds())),
        )
    }

    fn shoot(&self, ray: &Ray, handler: &mut dyn RayHandler) -> bool {
        let spans: Vec<Span> = self
            .shapes
            .iter()
            .enumerate()
            .filter_map(|(region, shape)| {
                shape
                    .intersect(ray)
                    .map(|(enter, exit)| Span { region, enter, exit })
            })
            .collect();

        if spans.is_empty() {
            handler.on_miss(ray);
            return false;
        }

        let mut cuts: Vec<f64> = spans
            .iter()
            .flat_map(|s| [s.enter.dist, s.exit.dist])
            .collect();
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|b, a| (*b - *a).abs() < BOUNDARY_EPS);

        let cells: Vec<Cell> = cuts
            .windows(2)
            .enumerate()
            .filter_map(|(index, pair)| {
                let mid = 0.5 * (pair[0] + pair[1]);
                let mut claimants: Vec<&Span> = spans.iter().filter(|s| s.covers(mid)).collect();
                if claimants.is_empty() {
                    return None;
                }
                claimants.sort_by(|x, y| {
                    x.enter
                        .dist
                        .total_cmp(&y.enter.dist)
                        .then(x.region.cmp(&y.region))
                });
                Some(Cell {
                    index,
                    start: pair[0],
                    end: pair[1],
                    claimants,
                })
            })
            .collect();

        // one decision per region pair and run of contiguous shared cells
        let mut claims: Vec<((RegionId, RegionId, usize), OverlapClaim)> = Vec::new();
        let mut partitions: Vec<Partition> = Vec::new();
        let mut last_cut: Option<usize> = None;

        for (pos, cell) in cells.iter().enumerate() {
            let mut winner = cell.claimants[0].region;
            for other in &cell.claimants[1..] {
                let (lo, hi) = shared_run(&cells, pos, winner, other.region);
                let key = (winner, other.region, lo);
                let claim = match claims.iter().find(|(k, _)| *k == key) {
                    Some((_, claim)) => *claim,
                    None => {
                        let overlap = OverlapInterval {
                            first: winner,
                            second: other.region,
                            in_dist: cells[lo].start,
                            out_dist: cells[hi].end,
                        };
                        let claim = handler.on_overlap(ray, &overlap);
                        claims.push((key, claim));
                        claim
                    }
                };
                if claim == OverlapClaim::Second {
                    winner = other.region;
                }
            }

            let (a, b) = (cell.start, cell.end);
            let contiguous = last_cut == Some(cell.index);
            match partitions.last_mut() {
                Some(prev) if contiguous && prev.region == winner => {
                    prev.out_hit = boundary_hit(&spans, b, winner, ray, false);
                }
                _ => partitions.push(Partition {
                    region: winner,
                    in_hit: boundary_hit(&spans, a, winner, ray, true),
                    out_hit: boundary_hit(&spans, b, winner, ray, false),
                }),
            }
            last_cut = Some(cell.index + 1);
        }

        if partitions.is_empty() {
            handler.on_miss(ray);
            return false;
        }

        handler.on_hit(ray, &partitions);
        true
    }
}

/// Hit record for a partition boundary at `dist`.
///
/// Uses the winning region's own surface when it lies there, otherwise the
/// surface of whichever region bounds the segment.
fn boundary_hit(spans: &[Span], dist: f64, winner: RegionId, ray: &Ray, entering: bool) -> Hit {
    let near = |t: f64| (t - dist).abs() < BOUNDARY_EPS;
    let own = spans.iter().find(|s| s.region == winner).and_then(|s| {
        let hit = if entering { s.enter } else { s.exit };
        near(hit.dist).then_some(hit)
    });

    let normal = own
        .map(|h| h.normal)
        .or_else(|| {
            spans.iter().find_map(|s| {
                if near(s.enter.dist) {
                    Some(s.enter.normal)
                } else if near(s.exit.dist) {
                    Some(s.exit.normal)
                } else {
                    None
                }
            })
        })
        .unwrap_or(if entering { -ray.dir } else { ray.dir });

    Hit { dist, normal }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[derive(Default)]
    struct Recorder {
        partitions: Vec<Partition>,
        overlaps: Vec<OverlapInterval>,
        missed: bool,
        claim: Option<OverlapClaim>,
    }

    impl RayHandler for Recorder {
        fn on_hit(&mut self, _ray: &Ray, partitions: &[Partition]) -> bool {
            self.partitions = partitions.to_vec();
            true
        }

        fn on_miss(&mut self, _ray: &Ray) {
            self.missed = true;
        }

        fn on_overlap(&mut self, _ray: &Ray, overlap: &OverlapInterval) -> OverlapClaim {
            self.overlaps.push(*overlap);
            self.claim.unwrap_or(OverlapClaim::First)
        }
    }

    fn two_boxes(gap: f64) -> Scene {
        let mut scene = Scene::new();
        scene.add_solid(
            "a/left",
            1,
            Primitive::cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
        );
        scene.add_solid(
            "a/right",
            1,
            Primitive::cuboid(Point3::new(1.0 + gap, 0.0, 0.0), Point3::new(2.0 + gap, 1.0, 1.0)),
        );
        scene
    }

    #[test]
    fn test_disjoint_regions_give_ordered_partitions() {
        let scene = two_boxes(0.5);
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::x());
        let mut rec = Recorder::default();
        assert!(scene.shoot(&ray, &mut rec));

        assert_eq!(rec.partitions.len(), 2);
        assert_eq!(rec.partitions[0].region, 0);
        assert_eq!(rec.partitions[1].region, 1);
        assert!((rec.partitions[1].in_hit.dist - 2.5).abs() < 1e-12);
        assert!(rec.overlaps.is_empty());
    }

    #[test]
    fn test_overlap_is_arbitrated_and_merged() {
        let scene = two_boxes(-0.25);
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::x());

        let mut rec = Recorder::default();
        scene.shoot(&ray, &mut rec);
        assert_eq!(rec.overlaps.len(), 1);
        assert!((rec.overlaps[0].depth() - 0.25).abs() < 1e-12);
        assert_eq!(rec.partitions.len(), 2);
        assert!((rec.partitions[0].out_hit.dist - 2.0).abs() < 1e-12);
        assert!((rec.partitions[1].in_hit.dist - 2.0).abs() < 1e-12);

        let mut rec = Recorder {
            claim: Some(OverlapClaim::Second),
            ..Default::default()
        };
        scene.shoot(&ray, &mut rec);
        assert!((rec.partitions[0].out_hit.dist - 1.75).abs() < 1e-12);
        assert!((rec.partitions[1].in_hit.dist - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_overlap_split_by_third_region_is_arbitrated_once() {
        let mut scene = two_boxes(-0.25);
        scene.add_solid(
            "a/bolt",
            1,
            Primitive::cuboid(Point3::new(0.9, 0.4, 0.4), Point3::new(1.2, 0.6, 0.6)),
        );
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::x());

        let mut rec = Recorder::default();
        scene.shoot(&ray, &mut rec);

        // left/right, left/bolt and right/bolt, each over its full extent
        assert_eq!(rec.overlaps.len(), 3);
        let pair = |a, b| {
            rec.overlaps
                .iter()
                .find(|o| o.first == a && o.second == b)
                .unwrap_or_else(|| panic!("no overlap between {a} and {b}"))
        };
        assert!((pair(0, 1).in_dist - 1.75).abs() < 1e-12);
        assert!((pair(0, 1).depth() - 0.25).abs() < 1e-12);
        assert!((pair(0, 2).depth() - 0.1).abs() < 1e-12);
        assert!((pair(1, 2).depth() - 0.3).abs() < 1e-12);

        assert_eq!(rec.partitions.len(), 2);
        assert!((rec.partitions[0].out_hit.dist - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_miss_and_bounds() {
        let scene = two_boxes(0.0);
        let ray = Ray::new(Point3::new(-1.0, 5.0, 0.5), Vector3::x());
        let mut rec = Recorder::default();
        assert!(!scene.shoot(&ray, &mut rec));
        assert!(rec.missed);

        let bounds = scene.bounds().unwrap();
        assert_eq!(bounds.max, Point3::new(2.0, 1.0, 1.0));
        assert!(Scene::new().bounds().is_none());
    }

    #[test]
    fn test_toml_scene() {
        let text = r#"
            [[region]]
            name = "tank/shell"
            material_id = 2
            shape = { type = "sphere", center = [0.0, 0.0, 0.0], r = 3.0 }

            [[region]]
            name = "tank/air"
            air_code = 1
            shape = { type = "cube", min = [-1.0, -1.0, -1.0], max = [1.0, 1.0, 1.0] }
        "#;
        let scene = Scene::from_toml(text).unwrap();
        assert_eq!(scene.regions().len(), 2);
        assert_eq!(scene.regions()[0].material_id, 2);
        assert_eq!(scene.regions()[0].los, 100.0);
        assert!(scene.regions()[1].is_air());

        let again = Scene::from_toml(&scene.to_toml().unwrap()).unwrap();
        assert_eq!(again.regions(), scene.regions());
        assert!(Scene::from_toml("[[region]]\nname = 3").is_err());
    }
}
