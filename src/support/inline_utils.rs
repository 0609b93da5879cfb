// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::*;
use rand::prelude::*;

/// Unit vector along `m`, `+x` when `m` is degenerate.
pub fn normalize_or_x(m: Vector3<f64>) -> Vector3<f64> {
    let norm = m.norm();
    if norm < 1e-12 {
        return Vector3::x();
    }
    m / norm
}

pub fn uniform_in_cube<R: Rng>(rng: &mut R, half_width: f64) -> Vector3<f64> {
    if half_width <= 0.0 {
        return Vector3::zeros();
    }
    Vector3::new(
        rng.gen_range(-half_width..=half_width),
        rng.gen_range(-half_width..=half_width),
        rng.gen_range(-half_width..=half_width),
    )
}

/// Uniform sample on the unit sphere (Archimedes: uniform height, uniform azimuth).
pub fn uniform_on_sphere<R: Rng>(rng: &mut R) -> Vector3<f64> {
    let z: f64 = rng.gen_range(-1.0..=1.0);
    let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vector3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Coefficients of the `order`-th forward difference, `[-1, 3, -3, 1]` for order 3.
pub fn forward_difference_stencil(order: usize) -> Vec<f64> {
    let mut c = vec![1.0];
    for _ in 0..order {
        let mut next = vec![0.0; c.len() + 1];
        for (k, v) in c.iter().enumerate() {
            next[k] -= v;
            next[k + 1] += v;
        }
        c = next;
    }
    c
}

pub fn all_finite(x: &[f64]) -> bool {
    x.iter().all(|v| v.is_finite())
}
