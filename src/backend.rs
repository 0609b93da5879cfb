// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use argmin::{ core::{ CostFunction, Error, Executor, Gradient, State }, solver::linesearch::*, solver::linesearch::condition::ArmijoCondition };
use argmin::solver::{ conjugategradient::{ beta::PolakRibiere, NonlinearConjugateGradient }, gradientdescent::SteepestDescent, quasinewton::LBFGS };
use nalgebra::*;
use std::time::Instant;

use crate::error::BackendError;
use crate::params::{ BackendParams, LocalAlgorithm };
use crate::support::inline_utils::all_finite;

/// Objective and inequality constraints `g(x) <= 0` of a smooth nonlinear program.
pub trait NlpProblem {
    fn num_variables(&self) -> usize;
    fn num_constraints(&self) -> usize;

    /// Cost and dense gradient.
    fn evaluate(&self, x: &[f64]) -> (f64, DVector<f64>);
    /// Residuals and dense Jacobian (`num_constraints` x `num_variables`).
    fn constraints(&self, x: &[f64]) -> (DVector<f64>, DMatrix<f64>);

    fn cost(&self, x: &[f64]) -> f64 { self.evaluate(x).0 }
    fn residuals(&self, x: &[f64]) -> DVector<f64> { self.constraints(x).0 }
}

#[derive(Debug, Clone)]
pub struct LocalSolution {
    pub x: Vec<f64>,
    pub cost: f64,
    /// `max(0, max_i g_i(x))`
    pub max_violation: f64,
    pub outer_iters: usize,
    pub inner_iters: u64,
}

pub fn max_violation(g: &DVector<f64>) -> f64 {
    g.iter().fold(0.0, |acc: f64, v| acc.max(*v))
}

/// Powell-Hestenes-Rockafellar augmented Lagrangian for one fixed multiplier/penalty pair.
struct Subproblem<'a, P: NlpProblem> {
    problem: &'a P,
    lambda: &'a DVector<f64>,
    mu: f64,
}

impl<'a, P: NlpProblem> Subproblem<'a, P> {
    fn shifted(&self, g: &DVector<f64>) -> DVector<f64> {
        g.zip_map(self.lambda, |gi, li| (li + self.mu * gi).max(0.0))
    }
}

impl<'a, P: NlpProblem> CostFunction for Subproblem<'a, P> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        if !all_finite(x) {
            return Err(Error::msg("non-finite param"));
        }
        let f = self.problem.cost(x);
        let g = self.problem.residuals(x);
        let s = self.shifted(&g);
        let penalty = (s.norm_squared() - self.lambda.norm_squared()) / (2.0 * self.mu);
        let ret = f + penalty;
        if !ret.is_finite() {
            return Err(Error::msg("non-finite cost"));
        }
        Ok(ret)
    }
}

impl<'a, P: NlpProblem> Gradient for Subproblem<'a, P> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        if !all_finite(x) {
            return Err(Error::msg("non-finite param"));
        }
        let (_, grad_f) = self.problem.evaluate(x);
        let (g, jac) = self.problem.constraints(x);
        let grad = grad_f + jac.tr_mul(&self.shifted(&g));
        if !all_finite(grad.as_slice()) {
            return Err(Error::msg("non-finite gradient"));
        }
        Ok(grad.as_slice().to_vec())
    }
}

fn solver_error(e: Error) -> BackendError {
    BackendError::Solver(e.to_string())
}

/// Local constrained solver: multiplier updates outside, an argmin solver inside.
#[derive(Debug, Clone)]
pub struct AugmentedLagrangian {
    params: BackendParams,
    feasibility_tol: f64,
}

impl AugmentedLagrangian {
    pub fn new(params: BackendParams, feasibility_tol: f64) -> Self {
        Self { params, feasibility_tol }
    }

    pub fn algorithm(&self) -> LocalAlgorithm { self.params.algorithm }

    fn minimize<P: NlpProblem>(&self, sub: Subproblem<'_, P>, x0: Vec<f64>) -> Result<(Vec<f64>, u64), BackendError> {
        let max_iters = self.params.max_inner_iters;
        let linesearch = BacktrackingLineSearch::new(ArmijoCondition::new(1e-4).map_err(solver_error)?).rho(0.5).map_err(solver_error)?;

        let fallback = x0.clone();
        let (best, iters) = match self.params.algorithm {
            LocalAlgorithm::Lbfgs => {
                let solver = LBFGS::new(linesearch, self.params.lbfgs_memory)
                    .with_tolerance_grad(self.params.tolerance_grad).map_err(solver_error)?;
                let res = Executor::new(sub, solver)
                    .configure(|state| state.param(x0).max_iters(max_iters))
                    .run().map_err(solver_error)?;
                (res.state().best_param.clone(), res.state().get_iter())
            },
            LocalAlgorithm::ConjugateGradient => {
                let solver = NonlinearConjugateGradient::new(linesearch, PolakRibiere::new())
                    .restart_iters(10)
                    .restart_orthogonality(0.1);
                let res = Executor::new(sub, solver)
                    .configure(|state| state.param(x0).max_iters(max_iters))
                    .run().map_err(solver_error)?;
                (res.state().best_param.clone(), res.state().get_iter())
            },
            LocalAlgorithm::SteepestDescent => {
                let solver = SteepestDescent::new(linesearch);
                let res = Executor::new(sub, solver)
                    .configure(|state| state.param(x0).max_iters(max_iters))
                    .run().map_err(solver_error)?;
                (res.state().best_param.clone(), res.state().get_iter())
            },
        };
        match best {
            Some(x) => Ok((x, iters)),
            None => {
                log::warn!("{:?}: best_param is None, keeping the start point", self.params.algorithm);
                Ok((fallback, iters))
            }
        }
    }

    /// Runs until the iterate is feasible and stationary, `max_outer_iters` is hit or `deadline` passes.
    /// The deadline is only checked between sub-problems, `None` means no deadline. Every outer iterate is passed to `on_iterate`.
    pub fn solve<P, F>(&self, problem: &P, x0: Vec<f64>, deadline: Option<Instant>, mut on_iterate: F) -> Result<LocalSolution, BackendError>
    where P: NlpProblem, F: FnMut(&[f64]) {
        if x0.len() != problem.num_variables() {
            return Err(BackendError::Solver(format!("initial guess has {} entries, expected {}", x0.len(), problem.num_variables())));
        }
        if !all_finite(&x0) {
            return Err(BackendError::NonFinite("initial guess"));
        }

        let mut lambda = DVector::from_element(problem.num_constraints(), 0.0);
        let mut mu = self.params.penalty_init;
        let mut x = x0;
        let mut prev_violation = f64::INFINITY;
        let mut inner_iters = 0;
        let mut outer_iters = 0;
        let mut violation = f64::INFINITY;

        for _ in 0..self.params.max_outer_iters.max(1) {
            outer_iters += 1;
            let (x_new, iters) = self.minimize(Subproblem { problem, lambda: &lambda, mu }, x.clone())?;
            inner_iters += iters;

            let g = problem.residuals(&x_new);
            if !all_finite(g.as_slice()) {
                return Err(BackendError::NonFinite("constraints"));
            }
            on_iterate(&x_new);

            let step = x_new.iter().zip(&x).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
            x = x_new;
            violation = max_violation(&g);

            for (li, gi) in lambda.iter_mut().zip(g.iter()) {
                *li = (*li + mu * gi).max(0.0);
            }
            if violation > 0.25 * prev_violation {
                mu = (mu * self.params.penalty_growth).min(self.params.penalty_max);
            }
            prev_violation = violation;

            if violation <= self.feasibility_tol && step < 1e-6 {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::debug!("local time slice exhausted after {outer_iters} outer iterations");
                break;
            }
        }

        let cost = problem.cost(&x);
        if !cost.is_finite() {
            return Err(BackendError::NonFinite("cost"));
        }
        Ok(LocalSolution { x, cost, max_violation: violation, outer_iters, inner_iters })
    }
}
