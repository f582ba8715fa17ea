// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! View geometry: where a lattice sits and which way its rays point

use crate::config::SingleView;
use crate::error::{QaError, QaResult};
use crate::geometry::BoundingBox;
use crate::utils::math::{dominant_axis, plane_basis, view_orientation};
use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};
use std::ops::Range;

/// Index ranges of lattice points along the two grid axes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lattice {
    pub cols: Range<u32>,
    pub rows: Range<u32>,
}

impl Lattice {
    pub fn point_count(&self) -> usize {
        self.cols.len() * self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Placement {
    /// Rays along +axis from the bounding box minimum
    Orthogonal { axis: usize, span: Vector3<f64> },
    /// Image plane of fixed extent, snapped to whole cells at the first spacing
    Oriented { extent: [f64; 2] },
}

/// Placement and direction of one view's lattice
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFrame {
    /// World position of lattice index (0, 0)
    pub origin: Point3<f64>,
    pub u_dir: Vector3<f64>,
    pub v_dir: Vector3<f64>,
    pub dir: Vector3<f64>,
    /// Cell width / cell height
    pub aspect: f64,
    /// Model axis whose cell edge is the partition length in moment terms
    pub sampled_axis: usize,
    /// Orthogonal views keep u/v on model axes
    pub axes: Option<[usize; 2]>,
    placement: Placement,
}

impl ViewFrame {
    /// View `axis` of the orthogonal triple: rays along +axis, lattice on
    /// u = (axis+1)%3 and v = (axis+2)%3.
    pub fn orthogonal(bbox: &BoundingBox, axis: usize) -> Self {
        let u = (axis + 1) % 3;
        let v = (axis + 2) % 3;
        let span = bbox.size();

        let mut origin = bbox.min;
        // start outside the model so nothing begins exactly at t = 0
        origin[axis] -= span[axis] * 0.01 + 1.0;

        Self {
            origin,
            u_dir: unit_axis(u),
            v_dir: unit_axis(v),
            dir: unit_axis(axis),
            aspect: 1.0,
            sampled_axis: axis,
            axes: Some([u, v]),
            placement: Placement::Orthogonal { axis, span },
        }
    }

    /// Arbitrary view.
    ///
    /// Without an explicit size the image covers the bounding-sphere
    /// diameter, widened by the aspect when the aspect exceeds 1. The extent
    /// is rounded up to whole cells of the initial spacing so every later
    /// lattice nests inside the first.
    pub fn oriented(
        bbox: &BoundingBox,
        view: &SingleView,
        aspect: f64,
        initial_spacing: f64,
    ) -> QaResult<Self> {
        let orientation = match view.orientation {
            Some([w, x, y, z]) => UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
            None => view_orientation(view.azimuth, view.elevation),
        };
        let (right, up) = plane_basis(&orientation);
        let eye = orientation * Vector3::z();
        let dir = -eye.normalize();

        let radius = bbox.bounding_radius();
        let width = match view.view_size {
            Some(size) => size,
            None => 2.0 * radius * aspect.max(1.0),
        };
        if !(width > 0.0 && width.is_finite()) {
            return Err(QaError::InvalidViewSize(width));
        }
        let height = width / aspect;

        let cell_w = initial_spacing;
        let cell_h = initial_spacing / aspect;
        let extent = [
            (width / cell_w).ceil().max(1.0) * cell_w,
            (height / cell_h).ceil().max(1.0) * cell_h,
        ];

        let center = match view.eye_point {
            Some([x, y, z]) => Point3::new(x, y, z),
            None => bbox.center() - dir * (radius + 1.0),
        };
        let origin = center - right.into_inner() * (extent[0] * 0.5) - up.into_inner() * (extent[1] * 0.5);

        Ok(Self {
            origin,
            u_dir: right.into_inner(),
            v_dir: up.into_inner(),
            dir,
            aspect,
            sampled_axis: dominant_axis(&dir),
            axes: None,
            placement: Placement::Oriented { extent },
        })
    }

    /// Cell width and height at a spacing
    pub fn cell(&self, spacing: f64) -> [f64; 2] {
        [spacing, spacing / self.aspect]
    }

    /// Area of the sampled cross-section, constant across rounds
    pub fn area(&self) -> f64 {
        match &self.placement {
            Placement::Orthogonal { axis, span } => {
                span[(axis + 1) % 3] * span[(axis + 2) % 3]
            }
            Placement::Oriented { extent } => extent[0] * extent[1],
        }
    }

    /// Lattice indices shot at a spacing.
    ///
    /// Orthogonal: `floor(span/spacing) - 1` points per axis, starting one
    /// spacing in from the box edge. Oriented: whole cells across the extent.
    pub fn lattice(&self, spacing: f64) -> Lattice {
        match &self.placement {
            Placement::Orthogonal { axis, span } => {
                let steps = |a: usize| (span[a] / spacing).floor().max(0.0) as u32;
                Lattice {
                    cols: 1..steps((axis + 1) % 3).max(1),
                    rows: 1..steps((axis + 2) % 3).max(1),
                }
            }
            Placement::Oriented { extent } => {
                let [w, h] = self.cell(spacing);
                Lattice {
                    cols: 0..(extent[0] / w).round() as u32,
                    rows: 0..(extent[1] / h).round() as u32,
                }
            }
        }
    }

    /// Model-axis cell edges used by the moment terms: `span/steps` along the
    /// two lattice axes for orthogonal views, the cell itself otherwise. The
    /// sampled axis entry is left at zero for the caller to fill.
    pub fn cell_edges(&self, spacing: f64) -> Vector3<f64> {
        let mut edges = Vector3::zeros();
        match &self.placement {
            Placement::Orthogonal { axis, span } => {
                for a in [(axis + 1) % 3, (axis + 2) % 3] {
                    let steps = (span[a] / spacing).floor().max(1.0);
                    edges[a] = span[a] / steps;
                }
            }
            Placement::Oriented { .. } => {
                let [w, h] = self.cell(spacing);
                let others: Vec<usize> = (0..3).filter(|a| *a != self.sampled_axis).collect();
                edges[others[0]] = w;
                edges[others[1]] = h;
            }
        }
        edges
    }
}

fn unit_axis(axis: usize) -> Vector3<f64> {
    let mut v = Vector3::zeros();
    v[axis] = 1.0;
    v
}
