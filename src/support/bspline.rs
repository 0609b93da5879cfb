// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::*;
use superslice::*;

use crate::types::State;

/// Clamped uniform knot vector: `deg + 1` copies of each end, `num_pol` equal intervals in between.
pub fn clamped_uniform_knots(deg: usize, num_pol: usize, t_min: f64, t_max: f64) -> Vec<f64> {
    let m = num_pol + 2 * deg;
    let delta_t = (t_max - t_min) / num_pol as f64;
    let mut knots = Vec::with_capacity(m + 1);
    for _ in 0..=deg {
        knots.push(t_min);
    }
    for i in 1..num_pol {
        knots.push(t_min + i as f64 * delta_t);
    }
    for _ in 0..=deg {
        knots.push(t_max);
    }
    knots
}

#[inline]
fn ratio(num: f64, den: f64) -> f64 {
    if den.abs() < 1e-12 { 0.0 } else { num / den }
}

/// Factor in front of `q_{i+1} - q_i` in the i-th velocity control point.
#[inline]
pub fn vel_coeff(knots: &[f64], deg: usize, i: usize) -> f64 {
    ratio(deg as f64, knots[i + deg + 1] - knots[i + 1])
}

/// Factor in front of `v_{i+1} - v_i` in the i-th acceleration control point.
#[inline]
pub fn accel_coeff(knots: &[f64], deg: usize, i: usize) -> f64 {
    ratio(deg as f64 - 1.0, knots[i + deg + 1] - knots[i + 2])
}

/// `q_0, q_1, q_2` reproducing position, velocity and acceleration of `state` at `t_min`.
pub fn start_control_points(state: &State, knots: &[f64], deg: usize) -> [Vector3<f64>; 3] {
    let p = deg as f64;
    let q0 = state.pos;
    let q1 = q0 + state.vel * (knots[deg + 1] - knots[1]) / p;
    let v1 = state.vel + state.accel * (knots[deg + 1] - knots[2]) / (p - 1.0);
    let q2 = q1 + v1 * (knots[deg + 2] - knots[2]) / p;
    [q0, q1, q2]
}

/// `q_{N-2}, q_{N-1}, q_N` reproducing `state` at `t_max`. `n` is the index of the last control point.
pub fn end_control_points(state: &State, knots: &[f64], deg: usize, n: usize) -> [Vector3<f64>; 3] {
    let p = deg as f64;
    let q_n = state.pos;
    let q_nm1 = q_n - state.vel * (knots[n + deg] - knots[n]) / p;
    let v_nm2 = state.vel - state.accel * (knots[n + deg - 1] - knots[n]) / (p - 1.0);
    let q_nm2 = q_nm1 - v_nm2 * (knots[n + deg - 1] - knots[n - 1]) / p;
    [q_nm2, q_nm1, q_n]
}

#[derive(Debug, Clone, PartialEq)]
pub struct BSpline {
    deg: usize,
    knots: Vec<f64>,
    cps: Vec<Vector3<f64>>,
}

impl BSpline {
    /// `knots.len()` must be `cps.len() + deg + 1`.
    pub fn new(deg: usize, knots: Vec<f64>, cps: Vec<Vector3<f64>>) -> Self {
        debug_assert_eq!(knots.len(), cps.len() + deg + 1);
        Self { deg, knots, cps }
    }

    pub fn degree(&self) -> usize { self.deg }
    pub fn knots(&self) -> &[f64] { &self.knots }
    pub fn control_points(&self) -> &[Vector3<f64>] { &self.cps }

    pub fn t_min(&self) -> f64 { self.knots[self.deg] }
    pub fn t_max(&self) -> f64 { self.knots[self.cps.len()] }

    fn span(&self, t: f64) -> usize {
        let idx = self.knots.upper_bound_by(|k| k.partial_cmp(&t).unwrap_or(std::cmp::Ordering::Less));
        idx.saturating_sub(1).clamp(self.deg, self.cps.len() - 1)
    }

    /// de Boor evaluation. `t` is clamped to the valid range.
    pub fn eval(&self, t: f64) -> Vector3<f64> {
        if self.cps.is_empty() {
            return Vector3::zeros();
        }
        let t = t.clamp(self.t_min(), self.t_max());
        let p = self.deg;
        let k = self.span(t);
        let mut d: Vec<Vector3<f64>> = (0..=p).map(|j| self.cps[j + k - p]).collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let lo = self.knots[j + k - p];
                let hi = self.knots[j + 1 + k - r];
                let alpha = ratio(t - lo, hi - lo);
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }
        d[p]
    }

    /// Hodograph: a spline of one degree less on the inner knots.
    pub fn derivative(&self) -> BSpline {
        if self.deg == 0 || self.cps.len() < 2 {
            return BSpline { deg: self.deg, knots: self.knots.clone(), cps: vec![Vector3::zeros(); self.cps.len()] };
        }
        let cps = (0..self.cps.len() - 1)
            .map(|i| (self.cps[i + 1] - self.cps[i]) * vel_coeff(&self.knots, self.deg, i))
            .collect();
        BSpline { deg: self.deg - 1, knots: self.knots[1..self.knots.len() - 1].to_vec(), cps }
    }
}
