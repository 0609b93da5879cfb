// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

mod support {
    pub mod bspline;
    pub mod ndspline;
    pub(crate) mod inline_utils;
}
pub mod backend;
pub mod error;
pub mod evaluator;
pub mod guess;
pub mod layout;
pub mod params;
pub mod types;

pub use support::{ bspline::BSpline, ndspline::Trajectory };
pub use error::{ BackendError, ConfigError, OptimizeError };
pub use guess::GuessSource;
pub use params::{ BackendParams, LocalAlgorithm, OptimizerParams };
pub use types::*;

use nalgebra::*;
use rand::prelude::*;
use std::fmt;
use std::time::{ Duration, Instant };

use backend::{ AugmentedLagrangian, NlpProblem };
use evaluator::{ CostTerms, Evaluator, ProblemInputs };
use guess::GuessGenerator;
use layout::SplineLayout;

/// Where the optimizer currently is. `optimize()` walks `Configuring -> RestartLoop -> {Converged, TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Configuring,
    RestartLoop,
    Converged,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The best cost stopped improving across consecutive restarts.
    Stalled,
    TimeBudget,
    RestartLimit,
}

impl Termination {
    pub fn result_code(&self, feasible: bool) -> &'static str {
        match (self, feasible) {
            (Self::Stalled, _) => "converged: cost stalled across restarts",
            (Self::TimeBudget, true) => "converged: time budget reached with a feasible solution",
            (Self::TimeBudget, false) => "failure: time budget reached without a feasible solution",
            (Self::RestartLimit, true) => "converged: restart limit reached with a feasible solution",
            (Self::RestartLimit, false) => "failure: restart limit reached without a feasible solution",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stalled => write!(f, "stalled"),
            Self::TimeBudget => write!(f, "time budget"),
            Self::RestartLimit => write!(f, "restart limit"),
        }
    }
}

/// Best feasible candidate of one optimize() call. Replaced as a whole, never edited.
#[derive(Debug, Clone)]
struct BestFeasible {
    x: Vec<f64>,
    cost: f64,
    found_at: Duration,
    restart: usize,
}

impl BestFeasible {
    /// Strictly lower cost wins, ties keep the earlier one.
    fn offer(best: &mut Option<BestFeasible>, candidate: BestFeasible) -> bool {
        match best {
            Some(b) if candidate.cost >= b.cost => false,
            _ => {
                *best = Some(candidate);
                true
            }
        }
    }
}

/// Samples per `Solution` above which `dc` is rejected.
const MAX_SAMPLES: f64 = 1e6;

/// One local solve. Returns the cheapest feasible outer iterate next to the local solution.
/// A failed solve yields no candidate at all, even if earlier iterates were feasible.
fn solve_restart<P, F>(backend: &AugmentedLagrangian, problem: &P, x0: Vec<f64>, deadline: Option<Instant>, start: Instant, restart: usize, is_feasible: F)
    -> Result<(backend::LocalSolution, Option<BestFeasible>), BackendError>
where P: NlpProblem, F: Fn(&[f64]) -> bool {
    let mut candidate = None;
    let local = backend.solve(problem, x0, deadline, |x| {
        if is_feasible(x) {
            BestFeasible::offer(&mut candidate, BestFeasible { x: x.to_vec(), cost: problem.cost(x), found_at: start.elapsed(), restart });
        }
    })?;
    Ok((local, candidate))
}

/// Result of a successful optimize() call.
#[derive(Debug, Clone)]
pub struct Solution {
    /// All control points, boundary ones included.
    pub control_points: Vec<Vector3<f64>>,
    /// `normals[obstacle * num_pol + segment]`
    pub normals: Vec<Vector3<f64>>,
    pub planes: Vec<Hyperplane>,
    pub knots: Vec<f64>,
    pub cost: f64,
    pub time_to_first_feasible: Duration,
    pub elapsed: Duration,
    pub restarts: usize,
    /// Restart that produced the returned solution.
    pub best_restart: usize,
    pub backend_failures: usize,
    pub termination: Termination,
    pub trajectory: Trajectory,
    /// `trajectory` sampled every `dc` seconds.
    pub samples: Vec<State>,
}

impl Solution {
    pub fn result_code(&self) -> &'static str {
        self.termination.result_code(true)
    }
}

pub struct TrajectoryOptimizer {
    params: OptimizerParams,
    layout: SplineLayout,
    backend: AugmentedLagrangian,

    initial_state: Option<State>,
    final_state: Option<State>,
    hulls: Option<ConvexHullsOfCurves>,
    t_bounds: Option<(f64, f64)>,
    limits: Option<(Vector3<f64>, Vector3<f64>)>,
    dc: f64,

    phase: Phase,
    last_termination: Option<(Termination, bool)>,
    progress_cb: Option<Box<dyn Fn(f64) + Send + Sync>>,
}

impl TrajectoryOptimizer {
    pub fn new(params: OptimizerParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let layout = SplineLayout::new(params.deg_pol, params.num_pol, params.num_obst, params.force_final_state)?;
        let backend = AugmentedLagrangian::new(params.backend.clone(), params.epsilon_tol_constraints);
        log::debug!("{} decision control points, {} normals, {} variables, {} constraints",
            layout.num_decision_cps(), layout.num_normals(), layout.num_variables(), layout.num_constraints());
        Ok(Self {
            params,
            layout,
            backend,
            initial_state: None,
            final_state: None,
            hulls: None,
            t_bounds: None,
            limits: None,
            dc: 0.01,
            phase: Phase::Idle,
            last_termination: None,
            progress_cb: None,
        })
    }

    pub fn params(&self) -> &OptimizerParams { &self.params }
    pub fn layout(&self) -> &SplineLayout { &self.layout }
    pub fn phase(&self) -> Phase { self.phase }

    pub fn set_init_and_final_states(&mut self, initial: State, final_state: State) {
        self.initial_state = Some(initial);
        self.final_state = Some(final_state);
    }

    /// `hulls[obstacle][segment]`, one hull per segment for every obstacle.
    pub fn set_hulls(&mut self, hulls: ConvexHullsOfCurves) {
        self.hulls = Some(hulls);
    }

    pub fn set_t_min_and_t_max(&mut self, t_min: f64, t_max: f64) {
        self.t_bounds = Some((t_min, t_max));
    }

    /// Same bound on every axis.
    pub fn set_max_values(&mut self, v_max: f64, a_max: f64) {
        self.limits = Some((Vector3::repeat(v_max), Vector3::repeat(a_max)));
    }

    pub fn set_max_values_per_axis(&mut self, v_max: Vector3<f64>, a_max: Vector3<f64>) {
        self.limits = Some((v_max, a_max));
    }

    /// Sampling step of `Solution::samples`.
    pub fn set_dc(&mut self, dc: f64) {
        self.dc = dc;
    }

    pub fn set_max_runtime(&mut self, seconds: f64) {
        self.params.max_runtime = seconds;
    }

    /// Called after every restart with the fraction of the time budget used so far.
    pub fn set_progress_cb<F: Fn(f64) + Send + Sync + 'static>(&mut self, cb: F) {
        self.progress_cb = Some(Box::new(cb));
    }

    /// Human-readable outcome of the last optimize() call.
    pub fn result_code(&self) -> &'static str {
        match self.last_termination {
            Some((t, feasible)) => t.result_code(feasible),
            None => "not run",
        }
    }

    fn problem_inputs(&self) -> Result<ProblemInputs, ConfigError> {
        let (t_min, t_max) = self.t_bounds.ok_or(ConfigError::MissingInput("time bounds"))?;
        let (v_max, a_max) = self.limits.ok_or(ConfigError::MissingInput("velocity/acceleration limits"))?;
        Ok(ProblemInputs {
            initial_state: self.initial_state.ok_or(ConfigError::MissingInput("initial state"))?,
            final_state: self.final_state.ok_or(ConfigError::MissingInput("final state"))?,
            hulls: self.hulls.clone().ok_or(ConfigError::MissingInput("hulls"))?,
            t_min,
            t_max,
            v_max,
            a_max,
        })
    }

    fn configure(&self, guess: &GuessSource) -> Result<(Evaluator, ProblemInputs), ConfigError> {
        self.params.validate()?;
        guess.validate()?;
        let inputs = self.problem_inputs()?;
        if !(self.dc.is_finite() && self.dc > 0.0) || (inputs.t_max - inputs.t_min) / self.dc > MAX_SAMPLES {
            return Err(ConfigError::InvalidParameter { name: "dc", value: self.dc });
        }
        let terms = CostTerms {
            weight: self.params.weight,
            final_weight: self.params.final_weight,
            separation_margin: self.params.separation_margin,
            epsilon_tol_constraints: self.params.epsilon_tol_constraints,
        };
        let ev = Evaluator::new(self.layout, &inputs, terms)?;
        Ok((ev, inputs))
    }

    /// Runs restarts until the time budget, the restart limit or convergence, and returns the best feasible trajectory.
    ///
    /// Blocks for up to `max_runtime` seconds (plus the overrun of the last local solve).
    pub fn optimize(&mut self, guess: &GuessSource) -> Result<Solution, OptimizeError> {
        self.phase = Phase::Configuring;
        let (ev, inputs) = match self.configure(guess) {
            Ok(v) => v,
            Err(e) => {
                self.phase = Phase::Idle;
                return Err(e.into());
            }
        };

        let params = &self.params;
        // Budgets too large for a Duration mean no limit.
        let budget = Duration::try_from_secs_f64(params.max_runtime).unwrap_or(Duration::MAX);
        let slice = Duration::try_from_secs_f64(params.local_time_slice).unwrap_or(Duration::MAX);
        let generator = GuessGenerator::new(&ev, inputs.initial_state.pos, inputs.final_state.pos, params.random_guess_radius, params.restart_jitter);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let start = Instant::now();
        let deadline = start.checked_add(budget);
        let mut best: Option<BestFeasible> = None;
        let mut first_feasible: Option<Duration> = None;
        let mut restarts = 0;
        let mut backend_failures = 0;
        let mut stalled = 0;

        self.phase = Phase::RestartLoop;
        log::debug!("optimize: {} guess, {:?}, budget {:.3}s", guess.name(), self.backend.algorithm(), params.max_runtime);

        let termination = loop {
            if start.elapsed() >= budget {
                break Termination::TimeBudget;
            }
            if params.max_restarts.is_some_and(|m| restarts >= m) {
                break Termination::RestartLimit;
            }

            let x0 = generator.generate(guess, restarts, &mut rng);
            let prev_cost = best.as_ref().map(|b| b.cost);
            let slice_deadline = match (Instant::now().checked_add(slice), deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let restart = restarts;

            let result = solve_restart(&self.backend, &ev, x0, slice_deadline, start, restart, |x| ev.is_feasible(x));
            restarts += 1;

            match result {
                Ok((local, candidate)) => {
                    log::debug!("restart {restart}: cost {:.6}, violation {:.2e}, {} outer / {} inner iterations",
                        local.cost, local.max_violation, local.outer_iters, local.inner_iters);
                    if !ev.is_feasible(&local.x) {
                        ev.log_infeasible_constraints(&local.x);
                    }
                    if let Some(c) = candidate {
                        first_feasible.get_or_insert(c.found_at);
                        BestFeasible::offer(&mut best, c);
                    }
                },
                Err(e) => {
                    backend_failures += 1;
                    log::warn!("restart {restart} discarded: {e}");
                }
            }

            if let Some(ref cb) = self.progress_cb {
                cb((start.elapsed().as_secs_f64() / params.max_runtime).min(1.0));
            }

            if let Some(b) = &best {
                let improved = match prev_cost {
                    Some(prev) => prev - b.cost > params.convergence_tol * prev.abs().max(1e-9),
                    None => true,
                };
                stalled = if improved { 0 } else { stalled + 1 };
                if stalled >= params.stall_restarts.max(1) {
                    break Termination::Stalled;
                }
            }
        };
        let elapsed = start.elapsed();

        self.last_termination = Some((termination, best.is_some()));
        let Some(best) = best else {
            self.phase = Phase::TimedOut;
            log::warn!("no feasible trajectory after {restarts} restarts ({backend_failures} backend failures, {:.3}s)", elapsed.as_secs_f64());
            return Err(OptimizeError::InfeasibleWithinBudget { budget_s: self.params.max_runtime, restarts, backend_failures });
        };
        self.phase = Phase::Converged;

        let (control_points, normals) = ev.unpack(&best.x);
        let trajectory = Trajectory::new(self.layout.degree(), ev.knots().to_vec(), control_points.clone());
        let samples = trajectory.discretize(self.dc);
        log::info!("{}: cost {:.6} from restart {} of {restarts}, first feasible after {:.1}ms, total {:.1}ms",
            termination.result_code(true), best.cost, best.restart, first_feasible.unwrap_or(best.found_at).as_secs_f64() * 1000.0, elapsed.as_secs_f64() * 1000.0);

        Ok(Solution {
            planes: ev.separating_planes(&normals),
            knots: ev.knots().to_vec(),
            control_points,
            normals,
            cost: best.cost,
            time_to_first_feasible: first_feasible.unwrap_or(best.found_at),
            elapsed,
            restarts,
            best_restart: best.restart,
            backend_failures,
            termination,
            trajectory,
            samples,
        })
    }
}
