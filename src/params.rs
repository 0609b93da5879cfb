// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use serde::{ Deserialize, Serialize };
use std::str::FromStr;

use crate::error::ConfigError;

/// Unconstrained solver used for the augmented-Lagrangian sub-problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalAlgorithm {
    #[default]
    Lbfgs,
    ConjugateGradient,
    SteepestDescent,
}

impl FromStr for LocalAlgorithm {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lbfgs" | "l-bfgs" => Ok(Self::Lbfgs),
            "cg" | "conjugate_gradient" | "nlcg" => Ok(Self::ConjugateGradient),
            "steepest" | "steepest_descent" | "gd" => Ok(Self::SteepestDescent),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_owned())),
        }
    }
}

/// Tuning of the augmented-Lagrangian loop around the local algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendParams {
    pub algorithm: LocalAlgorithm,
    /// Outer (multiplier update) iterations per restart.
    pub max_outer_iters: usize,
    /// argmin iterations per sub-problem.
    pub max_inner_iters: u64,
    pub penalty_init: f64,
    pub penalty_growth: f64,
    pub penalty_max: f64,
    pub lbfgs_memory: usize,
    pub tolerance_grad: f64,
}

impl Default for BackendParams {
    fn default() -> Self {
        Self {
            algorithm: LocalAlgorithm::Lbfgs,
            max_outer_iters: 15,
            max_inner_iters: 100,
            penalty_init: 10.0,
            penalty_growth: 10.0,
            penalty_max: 1e8,
            lbfgs_memory: 10,
            tolerance_grad: 1e-8,
        }
    }
}

fn default_final_weight() -> f64 { 10000.0 }
fn default_max_runtime() -> f64 { 2.0 }
fn default_local_time_slice() -> f64 { 0.5 }
fn default_stall_restarts() -> usize { 3 }
fn default_convergence_tol() -> f64 { 1e-3 }
fn default_random_guess_radius() -> f64 { 1.0 }
fn default_restart_jitter() -> f64 { 0.3 }
fn default_true() -> bool { true }

/// Per-instance optimizer configuration. Fixed for the lifetime of a `TrajectoryOptimizer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParams {
    pub num_pol: usize,
    pub deg_pol: usize,
    pub num_obst: usize,
    /// Scale of the smoothness term.
    pub weight: f64,
    /// Slack allowed on every constraint before a candidate counts as infeasible.
    /// Has no default value.
    pub epsilon_tol_constraints: f64,
    #[serde(default = "default_true")]
    pub force_final_state: bool,
    /// Scale of the terminal position term, only used when `force_final_state` is off.
    #[serde(default = "default_final_weight")]
    pub final_weight: f64,
    /// Clearance demanded between control points and obstacles along each separating normal.
    #[serde(default)]
    pub separation_margin: f64,
    #[serde(default = "default_max_runtime")]
    pub max_runtime: f64,
    /// Upper bound on the wall-clock time of a single restart.
    #[serde(default = "default_local_time_slice")]
    pub local_time_slice: f64,
    #[serde(default)]
    pub max_restarts: Option<usize>,
    #[serde(default = "default_stall_restarts")]
    pub stall_restarts: usize,
    /// Relative improvement below which a restart counts as stalled.
    #[serde(default = "default_convergence_tol")]
    pub convergence_tol: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_random_guess_radius")]
    pub random_guess_radius: f64,
    /// Noise added to path and polyhedra guesses on every restart after the first.
    #[serde(default = "default_restart_jitter")]
    pub restart_jitter: f64,
    #[serde(default)]
    pub backend: BackendParams,
}

impl OptimizerParams {
    pub fn new(num_pol: usize, deg_pol: usize, num_obst: usize, weight: f64, epsilon_tol_constraints: f64, force_final_state: bool, solver: &str) -> Result<Self, ConfigError> {
        let backend = BackendParams { algorithm: solver.parse()?, ..Default::default() };
        let ret = Self {
            num_pol,
            deg_pol,
            num_obst,
            weight,
            epsilon_tol_constraints,
            force_final_state,
            final_weight: default_final_weight(),
            separation_margin: 0.0,
            max_runtime: default_max_runtime(),
            local_time_slice: default_local_time_slice(),
            max_restarts: None,
            stall_restarts: default_stall_restarts(),
            convergence_tol: default_convergence_tol(),
            seed: 0,
            random_guess_radius: default_random_guess_radius(),
            restart_jitter: default_restart_jitter(),
            backend,
        };
        ret.validate()?;
        Ok(ret)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("weight", self.weight),
            ("epsilon_tol_constraints", self.epsilon_tol_constraints),
            ("final_weight", self.final_weight),
            ("separation_margin", self.separation_margin),
            ("convergence_tol", self.convergence_tol),
            ("random_guess_radius", self.random_guess_radius),
            ("restart_jitter", self.restart_jitter),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidParameter { name, value });
            }
        }
        let positive = [
            ("max_runtime", self.max_runtime),
            ("local_time_slice", self.local_time_slice),
            ("backend.penalty_init", self.backend.penalty_init),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidParameter { name, value });
            }
        }
        if self.backend.penalty_growth < 1.0 {
            return Err(ConfigError::InvalidParameter { name: "backend.penalty_growth", value: self.backend.penalty_growth });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names() {
        assert_eq!("LBFGS".parse::<LocalAlgorithm>(), Ok(LocalAlgorithm::Lbfgs));
        assert_eq!("cg".parse::<LocalAlgorithm>(), Ok(LocalAlgorithm::ConjugateGradient));
        assert_eq!("steepest".parse::<LocalAlgorithm>(), Ok(LocalAlgorithm::SteepestDescent));
        assert!(matches!("LD_MMA".parse::<LocalAlgorithm>(), Err(ConfigError::UnknownAlgorithm(_))));
    }

    #[test]
    fn rejects_negative_tolerance() {
        let err = OptimizerParams::new(6, 3, 1, 1.0, -1e-3, true, "lbfgs").unwrap_err();
        assert_eq!(err, ConfigError::InvalidParameter { name: "epsilon_tol_constraints", value: -1e-3 });
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{ "num_pol": 7, "deg_pol": 3, "num_obst": 2, "weight": 1.0, "epsilon_tol_constraints": 0.001 }"#;
        let params: OptimizerParams = serde_json::from_str(json).unwrap();
        assert!(params.force_final_state);
        assert_eq!(params.max_runtime, 2.0);
        assert_eq!(params.backend.algorithm, LocalAlgorithm::Lbfgs);
        assert_eq!(params.max_restarts, None);
    }
}
