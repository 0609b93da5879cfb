// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use super::bspline::*;
use crate::types::State;
use nalgebra::*;

/// Position spline together with its first three hodographs.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pos: BSpline,
    vel: BSpline,
    accel: BSpline,
    jerk: BSpline,
}

impl Trajectory {
    pub fn new(deg: usize, knots: Vec<f64>, cps: Vec<Vector3<f64>>) -> Self {
        let pos = BSpline::new(deg, knots, cps);
        let vel = pos.derivative();
        let accel = vel.derivative();
        let jerk = if deg >= 3 {
            accel.derivative()
        } else {
            BSpline::new(accel.degree(), accel.knots().to_vec(), vec![Vector3::zeros(); accel.control_points().len()])
        };
        Self { pos, vel, accel, jerk }
    }

    pub fn t_min(&self) -> f64 { self.pos.t_min() }
    pub fn t_max(&self) -> f64 { self.pos.t_max() }
    pub fn duration(&self) -> f64 { self.t_max() - self.t_min() }

    pub fn eval(&self, t: f64) -> State {
        State {
            pos: self.pos.eval(t),
            vel: self.vel.eval(t),
            accel: self.accel.eval(t),
            jerk: self.jerk.eval(t),
        }
    }

    /// Samples every `dc` seconds from `t_min`, always including `t_max`.
    pub fn discretize(&self, dc: f64) -> Vec<State> {
        let (t0, t1) = (self.t_min(), self.t_max());
        if !(dc > 0.0) || self.duration() <= 0.0 {
            return vec![self.eval(t0)];
        }
        let count = (self.duration() / dc).floor() as usize;
        let mut ret: Vec<State> = (0..=count).map(|i| self.eval(t0 + i as f64 * dc)).collect();
        if t0 + count as f64 * dc < t1 - 1e-9 {
            ret.push(self.eval(t1));
        }
        ret
    }

    /// Largest per-axis magnitude of velocity and acceleration over the samples of `discretize(dc)`.
    pub fn peak_dynamics(&self, dc: f64) -> (Vector3<f64>, Vector3<f64>) {
        let mut v = Vector3::zeros();
        let mut a = Vector3::zeros();
        for s in self.discretize(dc) {
            v = v.sup(&s.vel.abs());
            a = a.sup(&s.accel.abs());
        }
        (v, a)
    }
}
