// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::Vector3;

use crate::error::ConfigError;

/// Index arithmetic between control points / normals and the flat decision vector.
///
/// The flat vector holds the decision control points `q_{i_min}..=q_{i_max}` (3 scalars each)
/// followed by the normals of every (obstacle, segment) pair (3 scalars each, plane
/// `ip = obstacle * num_pol + segment`). Boundary control points never appear in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplineLayout {
    deg: usize,
    num_pol: usize,
    num_obst: usize,
    force_final_state: bool,
    n: usize,
    i_min: usize,
    i_max: usize,
}

impl SplineLayout {
    pub fn new(deg: usize, num_pol: usize, num_obst: usize, force_final_state: bool) -> Result<Self, ConfigError> {
        if !(2..=5).contains(&deg) {
            return Err(ConfigError::UnsupportedDegree(deg));
        }
        if num_pol == 0 {
            return Err(ConfigError::NoSegments);
        }
        // M = num_pol + 2p knots intervals, N = M - p - 1
        let n = num_pol + deg - 1;
        let i_min = 3;
        let i_max = if force_final_state { n as isize - 3 } else { n as isize };
        if i_max < i_min as isize {
            return Err(ConfigError::NoDecisionControlPoints { num_pol, deg });
        }
        Ok(Self { deg, num_pol, num_obst, force_final_state, n, i_min, i_max: i_max as usize })
    }

    pub fn degree(&self) -> usize { self.deg }
    pub fn num_segments(&self) -> usize { self.num_pol }
    pub fn num_obstacles(&self) -> usize { self.num_obst }
    pub fn force_final_state(&self) -> bool { self.force_final_state }
    /// Index of the last control point.
    pub fn last_cp(&self) -> usize { self.n }
    pub fn num_control_points(&self) -> usize { self.n + 1 }
    pub fn first_decision_cp(&self) -> usize { self.i_min }
    pub fn last_decision_cp(&self) -> usize { self.i_max }

    pub fn num_decision_cps(&self) -> usize { self.i_max - self.i_min + 1 }
    pub fn num_normals(&self) -> usize { self.num_obst * self.num_pol }
    pub fn num_variables(&self) -> usize { 3 * (self.num_decision_cps() + self.num_normals()) }

    pub fn is_decision_cp(&self, i: usize) -> bool {
        (self.i_min..=self.i_max).contains(&i)
    }

    pub fn plane_index(&self, obstacle: usize, segment: usize) -> usize {
        obstacle * self.num_pol + segment
    }

    /// Offset of the first coordinate of decision control point `i`.
    pub fn index_of_cp(&self, i: usize) -> usize {
        debug_assert!(self.is_decision_cp(i), "control point {i} is not a decision variable");
        3 * (i - self.i_min)
    }

    /// Offset of the first coordinate of normal `ip`.
    pub fn index_of_normal(&self, ip: usize) -> usize {
        debug_assert!(ip < self.num_normals());
        3 * (self.num_decision_cps() + ip)
    }

    /// Inverse of `index_of_cp`/`index_of_normal`: which variable owns a flat offset.
    pub fn variable_at(&self, offset: usize) -> Option<Variable> {
        if offset >= self.num_variables() {
            return None;
        }
        let slot = offset / 3;
        let axis = offset % 3;
        if slot < self.num_decision_cps() {
            Some(Variable::ControlPoint { i: slot + self.i_min, axis })
        } else {
            Some(Variable::Normal { ip: slot - self.num_decision_cps(), axis })
        }
    }

    /// Writes the decision slots of `x` into `q` (boundary entries untouched) and all normals into `n`.
    pub fn x_to_qn(&self, x: &[f64], q: &mut [Vector3<f64>], n: &mut Vec<Vector3<f64>>) {
        debug_assert_eq!(x.len(), self.num_variables());
        debug_assert_eq!(q.len(), self.num_control_points());
        for i in self.i_min..=self.i_max {
            let k = self.index_of_cp(i);
            q[i] = Vector3::new(x[k], x[k + 1], x[k + 2]);
        }
        n.clear();
        n.extend((0..self.num_normals()).map(|ip| {
            let k = self.index_of_normal(ip);
            Vector3::new(x[k], x[k + 1], x[k + 2])
        }));
    }

    pub fn qn_to_x(&self, q: &[Vector3<f64>], n: &[Vector3<f64>]) -> Vec<f64> {
        debug_assert_eq!(q.len(), self.num_control_points());
        debug_assert_eq!(n.len(), self.num_normals());
        let mut x = vec![0.0; self.num_variables()];
        for i in self.i_min..=self.i_max {
            let k = self.index_of_cp(i);
            x[k..k + 3].copy_from_slice(q[i].as_slice());
        }
        for (ip, normal) in n.iter().enumerate() {
            let k = self.index_of_normal(ip);
            x[k..k + 3].copy_from_slice(normal.as_slice());
        }
        x
    }

    /// Control points governing segment `s`.
    pub fn segment_cps(&self, s: usize) -> std::ops::RangeInclusive<usize> {
        s..=s + self.deg
    }

    /// Velocity control points `v_i` that depend on at least one decision control point.
    pub fn vel_cp_range(&self) -> std::ops::RangeInclusive<usize> {
        (self.i_min - 1)..=self.i_max.min(self.n - 1)
    }

    /// Acceleration control points `a_i` that depend on at least one decision control point.
    pub fn accel_cp_range(&self) -> std::ops::RangeInclusive<usize> {
        (self.i_min - 2)..=self.i_max.min(self.n - 2)
    }

    pub fn num_constraints(&self) -> usize {
        let vel = 6 * self.vel_cp_range().count();
        let accel = 6 * self.accel_cp_range().count();
        let corridor = self.num_pol * self.num_obst * (self.deg + 1);
        let unit = 2 * self.num_normals();
        vel + accel + corridor + unit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    ControlPoint { i: usize, axis: usize },
    Normal { ip: usize, axis: usize },
}
