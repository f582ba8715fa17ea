// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Math utilities

use nalgebra::{Unit, UnitQuaternion, Vector3};

/// Unit vector pointing from the model towards an eye at the given
/// azimuth and elevation (degrees).
pub fn eye_direction(azimuth: f64, elevation: f64) -> Vector3<f64> {
    let (az, el) = (azimuth.to_radians(), elevation.to_radians());
    Vector3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin())
}

/// Rotation mapping view space (x right, y up, z towards the eye) into
/// model space, keeping model +Z up where possible.
pub fn view_orientation(azimuth: f64, elevation: f64) -> UnitQuaternion<f64> {
    let eye = eye_direction(azimuth, elevation);
    let up = if eye.z.abs() > 1.0 - 1.0e-9 {
        Vector3::x()
    } else {
        Vector3::z()
    };
    // face_towards maps +z onto the given direction
    UnitQuaternion::face_towards(&eye, &up)
}

/// The (right, up) pair spanning the image plane of a view orientation
pub fn plane_basis(orientation: &UnitQuaternion<f64>) -> (Unit<Vector3<f64>>, Unit<Vector3<f64>>) {
    let right = Unit::new_normalize(orientation * Vector3::x());
    let up = Unit::new_normalize(orientation * Vector3::y());
    (right, up)
}

/// Index of the coordinate axis most closely aligned with `dir`
pub fn dominant_axis(dir: &Vector3<f64>) -> usize {
    let a = dir.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}
