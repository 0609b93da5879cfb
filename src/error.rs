// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use thiserror::Error;

/// Problem setup that can never be optimized. Raised before the first restart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unsupported polynomial degree {0} (expected 2..=5)")]
    UnsupportedDegree(usize),
    #[error("at least one segment is required")]
    NoSegments,
    #[error("no decision control points: {num_pol} segments of degree {deg} leave nothing to optimize")]
    NoDecisionControlPoints { num_pol: usize, deg: usize },
    #[error("expected hulls for {expected} obstacles, got {got}")]
    ObstacleCountMismatch { expected: usize, got: usize },
    #[error("obstacle {obstacle}: expected {expected} hulls (one per segment), got {got}")]
    SegmentCountMismatch { obstacle: usize, expected: usize, got: usize },
    #[error("hull of obstacle {obstacle}, segment {segment} has no vertices")]
    EmptyHull { obstacle: usize, segment: usize },
    #[error("invalid time bounds: t_min {t_min}, t_max {t_max}")]
    InvalidTimeBounds { t_min: f64, t_max: f64 },
    #[error("invalid parameter `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("unknown local algorithm `{0}`")]
    UnknownAlgorithm(String),
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error("empty guess source: {0}")]
    EmptyGuess(&'static str),
}

/// Numerical failure of one local solve. The restart is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("local solver failed: {0}")]
    Solver(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no feasible trajectory within {budget_s:.3}s ({restarts} restarts, {backend_failures} backend failures)")]
    InfeasibleWithinBudget { budget_s: f64, restarts: usize, backend_failures: usize },
}
