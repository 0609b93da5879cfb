// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::*;
use std::fmt;

use crate::backend::{ max_violation, NlpProblem };
use crate::error::ConfigError;
use crate::layout::SplineLayout;
use crate::support::bspline::*;
use crate::support::inline_utils::forward_difference_stencil;
use crate::types::{ ConvexHullsOfCurves, Hyperplane, State };

/// Everything that changes between two optimize() calls.
#[derive(Debug, Clone)]
pub struct ProblemInputs {
    pub initial_state: State,
    pub final_state: State,
    pub hulls: ConvexHullsOfCurves,
    pub t_min: f64,
    pub t_max: f64,
    pub v_max: Vector3<f64>,
    pub a_max: Vector3<f64>,
}

/// Weights and margins of the program, taken from `OptimizerParams`.
#[derive(Debug, Clone, Copy)]
pub struct CostTerms {
    pub weight: f64,
    pub final_weight: f64,
    pub separation_margin: f64,
    pub epsilon_tol_constraints: f64,
}

/// What a row of the residual vector stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Velocity { cp: usize, axis: usize, upper: bool },
    Acceleration { cp: usize, axis: usize, upper: bool },
    Corridor { segment: usize, obstacle: usize, cp: usize },
    UnitNormal { plane: usize, upper: bool },
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |upper: bool| if upper { "max" } else { "min" };
        match *self {
            Self::Velocity { cp, axis, upper } => write!(f, "velocity v_{cp}[{axis}] {}", bound(upper)),
            Self::Acceleration { cp, axis, upper } => write!(f, "acceleration a_{cp}[{axis}] {}", bound(upper)),
            Self::Corridor { segment, obstacle, cp } => write!(f, "corridor segment {segment} obstacle {obstacle} q_{cp}"),
            Self::UnitNormal { plane, upper } => write!(f, "unit normal n_{plane} {}", bound(upper)),
        }
    }
}

/// Row-wise writer into a dense Jacobian. Only slots of decision variables are ever touched.
pub struct GradRows<'a> {
    jac: &'a mut DMatrix<f64>,
}

impl<'a> GradRows<'a> {
    /// Zeroes the whole matrix before handing out the writer.
    pub fn new(jac: &'a mut DMatrix<f64>) -> Self {
        jac.fill(0.0);
        Self { jac }
    }

    /// Constraint `r` depends on the three coordinates of the variable at `var_gindex`.
    pub fn same_constraint_diff_variables(&mut self, r: usize, var_gindex: usize, tmp: &Vector3<f64>) {
        for k in 0..3 {
            self.jac[(r, var_gindex + k)] = tmp[k];
        }
    }

    /// Constraints `r..r + 3` each depend on one coordinate of the variable at `var_gindex`.
    pub fn diff_constraints_diff_variables(&mut self, r: usize, var_gindex: usize, tmp: &Vector3<f64>) {
        for k in 0..3 {
            self.jac[(r + k, var_gindex + k)] = tmp[k];
        }
    }

    pub fn assign_value(&mut self, r: usize, var_gindex: usize, value: f64) {
        self.jac[(r, var_gindex)] = value;
    }
}

/// Objective and constraints of the separating-plane trajectory program.
#[derive(Debug, Clone)]
pub struct Evaluator {
    layout: SplineLayout,
    knots: Vec<f64>,
    q_boundary: Vec<Vector3<f64>>,
    hulls: ConvexHullsOfCurves,
    v_max: Vector3<f64>,
    a_max: Vector3<f64>,
    final_pos: Vector3<f64>,
    terms: CostTerms,
    stencil: Vec<f64>,
    kinds: Vec<ConstraintKind>,
}

impl Evaluator {
    pub fn new(layout: SplineLayout, inputs: &ProblemInputs, terms: CostTerms) -> Result<Self, ConfigError> {
        if !(inputs.t_min.is_finite() && inputs.t_max.is_finite()) || inputs.t_max <= inputs.t_min {
            return Err(ConfigError::InvalidTimeBounds { t_min: inputs.t_min, t_max: inputs.t_max });
        }
        for (name, limit) in [("v_max", inputs.v_max), ("a_max", inputs.a_max)] {
            if let Some(bad) = limit.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(ConfigError::InvalidParameter { name, value: *bad });
            }
        }
        for (name, state) in [("initial_state", &inputs.initial_state), ("final_state", &inputs.final_state)] {
            if let Some(bad) = state.pos.iter().chain(state.vel.iter()).chain(state.accel.iter()).find(|v| !v.is_finite()) {
                return Err(ConfigError::InvalidParameter { name, value: *bad });
            }
        }
        if inputs.hulls.len() != layout.num_obstacles() {
            return Err(ConfigError::ObstacleCountMismatch { expected: layout.num_obstacles(), got: inputs.hulls.len() });
        }
        for (obstacle, per_segment) in inputs.hulls.iter().enumerate() {
            if per_segment.len() != layout.num_segments() {
                return Err(ConfigError::SegmentCountMismatch { obstacle, expected: layout.num_segments(), got: per_segment.len() });
            }
            if let Some(segment) = per_segment.iter().position(|h| h.vertices.is_empty()) {
                return Err(ConfigError::EmptyHull { obstacle, segment });
            }
            if let Some(bad) = per_segment.iter().flat_map(|h| h.vertices.iter()).flat_map(|v| v.iter()).find(|c| !c.is_finite()) {
                return Err(ConfigError::InvalidParameter { name: "hulls", value: *bad });
            }
        }

        let deg = layout.degree();
        let n = layout.last_cp();
        let knots = clamped_uniform_knots(deg, layout.num_segments(), inputs.t_min, inputs.t_max);

        // Decision entries are placeholders until a flat vector is unpacked over them.
        let [q0, q1, q2] = start_control_points(&inputs.initial_state, &knots, deg);
        let mut q_boundary = vec![inputs.final_state.pos; n + 1];
        if layout.force_final_state() {
            q_boundary[n - 2..].copy_from_slice(&end_control_points(&inputs.final_state, &knots, deg, n));
        }
        q_boundary[..3].copy_from_slice(&[q0, q1, q2]);

        let mut ret = Self {
            layout,
            knots,
            q_boundary,
            hulls: inputs.hulls.clone(),
            v_max: inputs.v_max,
            a_max: inputs.a_max,
            final_pos: inputs.final_state.pos,
            terms,
            stencil: forward_difference_stencil(deg),
            kinds: Vec::new(),
        };
        ret.kinds = ret.constraint_kinds();
        debug_assert_eq!(ret.kinds.len(), layout.num_constraints());
        Ok(ret)
    }

    pub fn layout(&self) -> &SplineLayout { &self.layout }
    pub fn knots(&self) -> &[f64] { &self.knots }
    pub fn hulls(&self) -> &ConvexHullsOfCurves { &self.hulls }
    pub fn tolerance(&self) -> f64 { self.terms.epsilon_tol_constraints }
    pub fn kinds(&self) -> &[ConstraintKind] { &self.kinds }

    /// Full control point vector with the boundary entries filled in and placeholders elsewhere.
    pub fn boundary_control_points(&self) -> &[Vector3<f64>] { &self.q_boundary }

    fn constraint_kinds(&self) -> Vec<ConstraintKind> {
        let mut kinds = Vec::with_capacity(self.layout.num_constraints());
        for cp in self.layout.vel_cp_range() {
            for upper in [true, false] {
                kinds.extend((0..3).map(|axis| ConstraintKind::Velocity { cp, axis, upper }));
            }
        }
        for cp in self.layout.accel_cp_range() {
            for upper in [true, false] {
                kinds.extend((0..3).map(|axis| ConstraintKind::Acceleration { cp, axis, upper }));
            }
        }
        for segment in 0..self.layout.num_segments() {
            for obstacle in 0..self.layout.num_obstacles() {
                kinds.extend(self.layout.segment_cps(segment).map(|cp| ConstraintKind::Corridor { segment, obstacle, cp }));
            }
        }
        for plane in 0..self.layout.num_normals() {
            kinds.push(ConstraintKind::UnitNormal { plane, upper: true });
            kinds.push(ConstraintKind::UnitNormal { plane, upper: false });
        }
        kinds
    }

    /// Unpacks a flat vector into full control points and normals.
    pub fn unpack(&self, x: &[f64]) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        let mut q = self.q_boundary.clone();
        let mut n = Vec::with_capacity(self.layout.num_normals());
        self.layout.x_to_qn(x, &mut q, &mut n);
        (q, n)
    }

    pub fn compute_objective(&self, q: &[Vector3<f64>], mut grad: Option<&mut [f64]>) -> f64 {
        let layout = &self.layout;
        let deg = layout.degree();
        let w = self.terms.weight;
        if let Some(g) = grad.as_deref_mut() {
            g.fill(0.0);
        }

        let mut cost = 0.0;
        for i in 0..=layout.last_cp() - deg {
            let diff: Vector3<f64> = self.stencil.iter().enumerate().map(|(k, c)| q[i + k] * *c).sum();
            cost += w * diff.norm_squared();
            if let Some(g) = grad.as_deref_mut() {
                for (k, c) in self.stencil.iter().enumerate() {
                    if layout.is_decision_cp(i + k) {
                        let idx = layout.index_of_cp(i + k);
                        let d = diff * (2.0 * w * c);
                        for a in 0..3 {
                            g[idx + a] += d[a];
                        }
                    }
                }
            }
        }

        if !layout.force_final_state() {
            let n = layout.last_cp();
            let err = q[n] - self.final_pos;
            cost += self.terms.final_weight * err.norm_squared();
            if let Some(g) = grad.as_deref_mut() {
                let idx = layout.index_of_cp(n);
                for a in 0..3 {
                    g[idx + a] += 2.0 * self.terms.final_weight * err[a];
                }
            }
        }
        cost
    }

    /// Fills `constraints` in the order velocity, acceleration, corridor, unit normal.
    pub fn compute_constraints(&self, q: &[Vector3<f64>], n: &[Vector3<f64>], constraints: &mut [f64], mut grad: Option<GradRows>) {
        let layout = &self.layout;
        let deg = layout.degree();
        let mut r = 0;

        for i in layout.vel_cp_range() {
            let c1 = vel_coeff(&self.knots, deg, i);
            let v = (q[i + 1] - q[i]) * c1;
            for k in 0..3 {
                constraints[r + k] = v[k] - self.v_max[k];
                constraints[r + 3 + k] = -v[k] - self.v_max[k];
            }
            if let Some(g) = grad.as_mut() {
                let c = Vector3::repeat(c1);
                if layout.is_decision_cp(i) {
                    g.diff_constraints_diff_variables(r, layout.index_of_cp(i), &-c);
                    g.diff_constraints_diff_variables(r + 3, layout.index_of_cp(i), &c);
                }
                if layout.is_decision_cp(i + 1) {
                    g.diff_constraints_diff_variables(r, layout.index_of_cp(i + 1), &c);
                    g.diff_constraints_diff_variables(r + 3, layout.index_of_cp(i + 1), &-c);
                }
            }
            r += 6;
        }

        for i in layout.accel_cp_range() {
            let c1 = vel_coeff(&self.knots, deg, i);
            let c2 = vel_coeff(&self.knots, deg, i + 1);
            let c3 = accel_coeff(&self.knots, deg, i);
            let v_i = (q[i + 1] - q[i]) * c1;
            let v_ip1 = (q[i + 2] - q[i + 1]) * c2;
            let a = (v_ip1 - v_i) * c3;
            for k in 0..3 {
                constraints[r + k] = a[k] - self.a_max[k];
                constraints[r + 3 + k] = -a[k] - self.a_max[k];
            }
            if let Some(g) = grad.as_mut() {
                for (j, coeff) in [(i, c3 * c1), (i + 1, -c3 * (c1 + c2)), (i + 2, c3 * c2)] {
                    if layout.is_decision_cp(j) {
                        let idx = layout.index_of_cp(j);
                        for k in 0..3 {
                            g.assign_value(r + k, idx + k, coeff);
                            g.assign_value(r + 3 + k, idx + k, -coeff);
                        }
                    }
                }
            }
            r += 6;
        }

        for s in 0..layout.num_segments() {
            for o in 0..layout.num_obstacles() {
                let ip = layout.plane_index(o, s);
                let (d_min, vertex) = self.hulls[o][s].support_min(&n[ip]);
                for j in layout.segment_cps(s) {
                    constraints[r] = n[ip].dot(&q[j]) - d_min + self.terms.separation_margin;
                    if let Some(g) = grad.as_mut() {
                        g.same_constraint_diff_variables(r, layout.index_of_normal(ip), &(q[j] - vertex));
                        if layout.is_decision_cp(j) {
                            g.same_constraint_diff_variables(r, layout.index_of_cp(j), &n[ip]);
                        }
                    }
                    r += 1;
                }
            }
        }

        for (ip, normal) in n.iter().enumerate() {
            let sq = normal.norm_squared();
            constraints[r] = sq - 1.0;
            constraints[r + 1] = 1.0 - sq;
            if let Some(g) = grad.as_mut() {
                let idx = layout.index_of_normal(ip);
                g.same_constraint_diff_variables(r, idx, &(normal * 2.0));
                g.same_constraint_diff_variables(r + 1, idx, &(normal * -2.0));
            }
            r += 2;
        }
        debug_assert_eq!(r, constraints.len());
    }

    pub fn residuals_of(&self, x: &[f64]) -> DVector<f64> {
        let (q, n) = self.unpack(x);
        let mut g = DVector::zeros(self.layout.num_constraints());
        self.compute_constraints(&q, &n, g.as_mut_slice(), None);
        g
    }

    pub fn num_infeasible(&self, x: &[f64]) -> usize {
        let tol = self.tolerance();
        self.residuals_of(x).iter().filter(|g| !(**g <= tol)).count()
    }

    /// Every residual within `epsilon_tol_constraints` of zero or below.
    pub fn is_feasible(&self, x: &[f64]) -> bool {
        self.num_infeasible(x) == 0
    }

    pub fn max_violation(&self, x: &[f64]) -> f64 {
        max_violation(&self.residuals_of(x))
    }

    pub fn infeasible_constraints(&self, x: &[f64]) -> Vec<(ConstraintKind, f64)> {
        let tol = self.tolerance();
        self.residuals_of(x).iter().zip(&self.kinds)
            .filter(|(g, _)| !(**g <= tol))
            .map(|(g, k)| (*k, *g))
            .collect()
    }

    pub fn log_infeasible_constraints(&self, x: &[f64]) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        for (kind, value) in self.infeasible_constraints(x) {
            log::debug!("infeasible: {kind} = {value:.6}");
        }
    }

    /// The planes `n . x + d = 0` the normals define, anchored at the foot of the origin.
    /// Each normal points from the trajectory towards its obstacle.
    pub fn separating_planes(&self, n: &[Vector3<f64>]) -> Vec<Hyperplane> {
        let mut planes = Vec::with_capacity(n.len());
        for o in 0..self.layout.num_obstacles() {
            for s in 0..self.layout.num_segments() {
                let normal = n[self.layout.plane_index(o, s)];
                let (d_min, _) = self.hulls[o][s].support_min(&normal);
                let sq = normal.norm_squared();
                let point = if sq > 1e-12 { normal * (d_min / sq) } else { Vector3::zeros() };
                planes.push(Hyperplane::new(point, normal));
            }
        }
        planes
    }
}

impl NlpProblem for Evaluator {
    fn num_variables(&self) -> usize { self.layout.num_variables() }
    fn num_constraints(&self) -> usize { self.layout.num_constraints() }

    fn evaluate(&self, x: &[f64]) -> (f64, DVector<f64>) {
        let (q, _) = self.unpack(x);
        let mut grad = DVector::zeros(self.num_variables());
        let cost = self.compute_objective(&q, Some(grad.as_mut_slice()));
        (cost, grad)
    }

    fn constraints(&self, x: &[f64]) -> (DVector<f64>, DMatrix<f64>) {
        let (q, n) = self.unpack(x);
        let mut g = DVector::zeros(self.num_constraints());
        let mut jac = DMatrix::zeros(self.num_constraints(), self.num_variables());
        self.compute_constraints(&q, &n, g.as_mut_slice(), Some(GradRows::new(&mut jac)));
        (g, jac)
    }

    fn cost(&self, x: &[f64]) -> f64 {
        let (q, _) = self.unpack(x);
        self.compute_objective(&q, None)
    }

    fn residuals(&self, x: &[f64]) -> DVector<f64> {
        self.residuals_of(x)
    }
}
