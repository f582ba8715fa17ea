// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Ray-intersection kernel contract.
//!
//! The analysis engine never intersects geometry itself. It hands rays to a
//! [`RayKernel`], which reports the ordered partitions along each ray back
//! through a [`RayHandler`] on the calling thread.

use crate::density::MaterialId;
use crate::geometry::BoundingBox;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Index into [`RayKernel::regions`]
pub type RegionId = usize;

/// A ray with unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub dir: Vector3<f64>,
}

impl Ray {
    pub fn new(origin: Point3<f64>, dir: Vector3<f64>) -> Self {
        Self {
            origin,
            dir: dir.normalize(),
        }
    }

    pub fn at(&self, dist: f64) -> Point3<f64> {
        self.origin + self.dir * dist
    }
}

/// One surface crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Distance along the ray
    pub dist: f64,
    /// Outward geometric normal at the crossing
    pub normal: Vector3<f64>,
}

/// One enter/exit pair on a single region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partition {
    pub region: RegionId,
    pub in_hit: Hit,
    pub out_hit: Hit,
}

impl Partition {
    pub fn length(&self) -> f64 {
        self.out_hit.dist - self.in_hit.dist
    }
}

/// Per-region attributes the kernel tags partitions with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Full path name; the first component names the owning object
    pub name: String,
    pub material_id: MaterialId,
    /// Line-of-sight thickness percentage
    #[serde(default = "default_los")]
    pub los: f64,
    /// Non-zero marks an air region
    #[serde(default)]
    pub air_code: i32,
}

fn default_los() -> f64 {
    100.0
}

impl RegionInfo {
    pub fn is_air(&self) -> bool {
        self.air_code != 0
    }
}

/// Interval claimed by two regions at once
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapInterval {
    pub first: RegionId,
    pub second: RegionId,
    pub in_dist: f64,
    pub out_dist: f64,
}

impl OverlapInterval {
    pub fn depth(&self) -> f64 {
        self.out_dist - self.in_dist
    }
}

/// Which claimant keeps an overlapped interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapClaim {
    First,
    Second,
}

/// Receives the kernel's results for one ray
pub trait RayHandler {
    /// Ordered partitions along the ray. Returning `false` tells the kernel
    /// the handler is finished with the ray.
    fn on_hit(&mut self, ray: &Ray, partitions: &[Partition]) -> bool;

    /// The ray hit nothing
    fn on_miss(&mut self, ray: &Ray);

    /// Two regions claim the same interval; called before `on_hit`
    fn on_overlap(&mut self, ray: &Ray, overlap: &OverlapInterval) -> OverlapClaim;
}

/// Something that can intersect rays with a set of regions
pub trait RayKernel: Sync {
    fn regions(&self) -> &[RegionInfo];

    /// Model bounds, `None` when there is no geometry
    fn bounds(&self) -> Option<BoundingBox>;

    /// Fire one ray synchronously; returns whether anything was hit
    fn shoot(&self, ray: &Ray, handler: &mut dyn RayHandler) -> bool;
}
