// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Analytic primitives with exact ray intervals

use super::BoundingBox;
use crate::kernel::{Hit, Ray};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Directions closer to parallel than this are treated as parallel
const PARALLEL_EPS: f64 = 1.0e-12;

/// Geometric primitives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Primitive {
    Cube { min: Point3<f64>, max: Point3<f64> },
    Sphere { center: Point3<f64>, r: f64 },
    /// Z-aligned, standing on `base`
    Cylinder { base: Point3<f64>, h: f64, r: f64 },
}

impl Primitive {
    pub fn cube(size: Vector3<f64>, center: bool) -> Self {
        let min = if center {
            Point3::from(-size * 0.5)
        } else {
            Point3::origin()
        };
        Self::Cube {
            min,
            max: min + size,
        }
    }

    pub fn cuboid(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self::Cube { min, max }
    }

    pub fn sphere(center: Point3<f64>, r: f64) -> Self {
        Self::Sphere { center, r }
    }

    pub fn cylinder(base: Point3<f64>, h: f64, r: f64) -> Self {
        Self::Cylinder { base, h, r }
    }

    pub fn bounds(&self) -> BoundingBox {
        match self {
            Self::Cube { min, max } => BoundingBox::new(*min, *max),
            Self::Sphere { center, r } => {
                let ext = Vector3::repeat(*r);
                BoundingBox::new(center - ext, center + ext)
            }
            Self::Cylinder { base, h, r } => BoundingBox::new(
                base - Vector3::new(*r, *r, 0.0),
                base + Vector3::new(*r, *r, *h),
            ),
        }
    }

    /// Exact volume, used by tests and reports
    pub fn volume(&self) -> f64 {
        match self {
            Self::Cube { min, max } => BoundingBox::new(*min, *max).volume(),
            Self::Sphere { r, .. } => 4.0 / 3.0 * std::f64::consts::PI * r.powi(3),
            Self::Cylinder { h, r, .. } => std::f64::consts::PI * r * r * h,
        }
    }

    /// Exact surface area
    pub fn surface_area(&self) -> f64 {
        match self {
            Self::Cube { min, max } => BoundingBox::new(*min, *max).surface_area(),
            Self::Sphere { r, .. } => 4.0 * std::f64::consts::PI * r * r,
            Self::Cylinder { h, r, .. } => 2.0 * std::f64::consts::PI * r * (r + h),
        }
    }

    pub fn translated(&self, offset: &Vector3<f64>) -> Self {
        match self {
            Self::Cube { min, max } => Self::Cube {
                min: min + offset,
                max: max + offset,
            },
            Self::Sphere { center, r } => Self::Sphere {
                center: center + offset,
                r: *r,
            },
            Self::Cylinder { base, h, r } => Self::Cylinder {
                base: base + offset,
                h: *h,
                r: *r,
            },
        }
    }

    /// Entry and exit crossings of the ray, clipped to `t >= 0`
    pub fn intersect(&self, ray: &Ray) -> Option<(Hit, Hit)> {
        let (t_in, n_in, t_out, n_out) = match self {
            Self::Cube { min, max } => slab_interval(ray, min, max, [true; 3])?,
            Self::Sphere { center, r } => sphere_interval(ray, center, *r)?,
            Self::Cylinder { base, h, r } => cylinder_interval(ray, base, *h, *r)?,
        };

        if t_out <= 0.0 || t_out <= t_in {
            return None;
        }

        let (t_in, n_in) = if t_in < 0.0 { (0.0, -ray.dir) } else { (t_in, n_in) };
        Some((
            Hit {
                dist: t_in,
                normal: n_in,
            },
            Hit {
                dist: t_out,
                normal: n_out,
            },
        ))
    }
}

type Interval = (f64, Vector3<f64>, f64, Vector3<f64>);

/// Slab test over the selected axes, tracking which face bounds each end
fn slab_interval(
    ray: &Ray,
    min: &Point3<f64>,
    max: &Point3<f64>,
    axes: [bool; 3],
) -> Option<Interval> {
    let mut t_in = f64::NEG_INFINITY;
    let mut t_out = f64::INFINITY;
    let mut n_in = -ray.dir;
    let mut n_out = ray.dir;

    for axis in (0..3).filter(|a| axes[*a]) {
        let o = ray.origin[axis];
        let d = ray.dir[axis];

        if d.abs() < PARALLEL_EPS {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }

        let (near, far) = if d > 0.0 {
            (min[axis], max[axis])
        } else {
            (max[axis], min[axis])
        };
        let t0 = (near - o) / d;
        let t1 = (far - o) / d;
        let mut normal = Vector3::zeros();
        normal[axis] = d.signum();

        if t0 > t_in {
            t_in = t0;
            n_in = -normal;
        }
        if t1 < t_out {
            t_out = t1;
            n_out = normal;
        }
    }

    (t_in < t_out).then_some((t_in, n_in, t_out, n_out))
}

fn sphere_interval(ray: &Ray, center: &Point3<f64>, r: f64) -> Option<Interval> {
    let oc = ray.origin - center;
    let b = oc.dot(&ray.dir);
    let c = oc.norm_squared() - r * r;
    let disc = b * b - c;
    if disc <= 0.0 {
        return None;
    }

    let root = disc.sqrt();
    let (t0, t1) = (-b - root, -b + root);
    let n0 = (ray.at(t0) - center) / r;
    let n1 = (ray.at(t1) - center) / r;
    Some((t0, n0, t1, n1))
}

fn cylinder_interval(ray: &Ray, base: &Point3<f64>, h: f64, r: f64) -> Option<Interval> {
    // Caps bound the z range
    let top = base + Vector3::new(0.0, 0.0, h);
    let (mut t_in, mut n_in, mut t_out, mut n_out) = slab_interval(ray, base, &top, [false, false, true])?;

    let ox = ray.origin.x - base.x;
    let oy = ray.origin.y - base.y;
    let (dx, dy) = (ray.dir.x, ray.dir.y);
    let a = dx * dx + dy * dy;

    if a < PARALLEL_EPS {
        if ox * ox + oy * oy >= r * r {
            return None;
        }
        return Some((t_in, n_in, t_out, n_out));
    }

    let b = ox * dx + oy * dy;
    let c = ox * ox + oy * oy - r * r;
    let disc = b * b - a * c;
    if disc <= 0.0 {
        return None;
    }

    let root = disc.sqrt();
    let s0 = (-b - root) / a;
    let s1 = (-b + root) / a;
    let radial = |t: f64| {
        let p = ray.at(t);
        Vector3::new(p.x - base.x, p.y - base.y, 0.0) / r
    };

    if s0 > t_in {
        t_in = s0;
        n_in = radial(s0);
    }
    if s1 < t_out {
        t_out = s1;
        n_out = radial(s1);
    }

    (t_in < t_out).then_some((t_in, n_in, t_out, n_out))
}
