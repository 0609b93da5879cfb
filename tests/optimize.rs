// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use approx::assert_relative_eq;
use nalgebra::Vector3;
use rs_trajopt::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn obstacle_box() -> ConvexHull {
    ConvexHull::from_box(Vector3::new(2.5, -0.5, -1.0), Vector3::new(3.5, 3.0, 1.0))
}

/// Start at the origin, goal 6 m along x, a wall crossing the straight line.
fn avoidance(params: OptimizerParams) -> TrajectoryOptimizer {
    let num_pol = params.num_pol;
    let mut opt = TrajectoryOptimizer::new(params).unwrap();
    opt.set_init_and_final_states(State::at_rest(Vector3::zeros()), State::at_rest(Vector3::new(6.0, 0.0, 0.0)));
    opt.set_hulls(vec![vec![obstacle_box(); num_pol]]);
    opt.set_t_min_and_t_max(0.0, 6.0);
    opt.set_max_values(4.0, 6.0);
    opt.set_dc(0.05);
    opt
}

fn avoidance_params() -> OptimizerParams {
    let mut params = OptimizerParams::new(8, 3, 1, 1.0, 1e-3, true, "lbfgs").unwrap();
    params.separation_margin = 0.05;
    params.max_runtime = 30.0;
    params.local_time_slice = 10.0;
    params
}

fn detour() -> GuessSource {
    GuessSource::FromPath(vec![Vector3::zeros(), Vector3::new(3.0, -1.5, 0.0), Vector3::new(6.0, 0.0, 0.0)])
}

fn strictly_inside_box(p: &Vector3<f64>) -> bool {
    let eps = 1e-2;
    p.x > 2.5 + eps && p.x < 3.5 - eps && p.y > -0.5 + eps && p.y < 3.0 - eps && p.z > -1.0 + eps && p.z < 1.0 - eps
}

#[test]
fn trivial_scenario_converges_early() {
    let mut params = OptimizerParams::new(6, 3, 1, 1.0, 1e-3, true, "lbfgs").unwrap();
    params.max_runtime = 5.0;
    params.max_restarts = Some(20);
    params.seed = 3;
    let mut opt = TrajectoryOptimizer::new(params).unwrap();
    let p = Vector3::new(1.0, 2.0, 0.5);
    opt.set_init_and_final_states(State::at_rest(p), State::at_rest(p));
    opt.set_hulls(vec![vec![ConvexHull::from_box(Vector3::new(50.0, 50.0, 50.0), Vector3::new(51.0, 51.0, 51.0)); 6]]);
    opt.set_t_min_and_t_max(0.0, 2.0);
    opt.set_max_values(10.0, 20.0);

    let sol = opt.optimize(&GuessSource::Random).unwrap();
    assert_eq!(opt.phase(), Phase::Converged);
    assert_ne!(sol.termination, Termination::TimeBudget);
    assert!(sol.elapsed < Duration::from_secs(5));
    assert!(sol.cost < 1e-4, "cost {}", sol.cost);
    assert!(sol.time_to_first_feasible <= sol.elapsed);
    for s in &sol.samples {
        assert_relative_eq!(s.pos, p, epsilon = 1e-2);
    }
}

#[test]
fn degenerate_corridor_times_out() {
    let mut params = OptimizerParams::new(6, 3, 1, 1.0, 1e-3, true, "lbfgs").unwrap();
    params.max_runtime = 0.3;
    let mut opt = TrajectoryOptimizer::new(params).unwrap();
    opt.set_init_and_final_states(State::at_rest(Vector3::zeros()), State::at_rest(Vector3::new(4.0, 0.0, 0.0)));
    // the start position is inside the obstacle
    opt.set_hulls(vec![vec![ConvexHull::from_box(Vector3::repeat(-1.0), Vector3::repeat(1.0)); 6]]);
    opt.set_t_min_and_t_max(0.0, 4.0);
    opt.set_max_values(5.0, 10.0);

    match opt.optimize(&GuessSource::Random) {
        Err(OptimizeError::InfeasibleWithinBudget { budget_s, restarts, .. }) => {
            assert_eq!(budget_s, 0.3);
            assert!(restarts >= 1);
        },
        other => panic!("expected InfeasibleWithinBudget, got {other:?}"),
    }
    assert_eq!(opt.phase(), Phase::TimedOut);
    assert!(opt.result_code().starts_with("failure"));
}

#[test]
fn avoids_the_obstacle() {
    let mut params = avoidance_params();
    params.max_restarts = Some(3);
    let mut opt = avoidance(params);
    let sol = opt.optimize(&detour()).unwrap();

    let first = sol.samples.first().unwrap();
    let last = sol.samples.last().unwrap();
    assert_relative_eq!(first.pos, Vector3::zeros(), epsilon = 1e-9);
    assert_relative_eq!(last.pos, Vector3::new(6.0, 0.0, 0.0), epsilon = 1e-9);
    assert_relative_eq!(last.vel, Vector3::zeros(), epsilon = 1e-9);

    for s in &sol.samples {
        assert!(!strictly_inside_box(&s.pos), "sample {:?} collides", s.pos);
    }
    let (v, a) = sol.trajectory.peak_dynamics(0.01);
    assert!(v.max() <= 4.0 + 1e-2, "peak velocity {v:?}");
    assert!(a.max() <= 6.0 + 1e-2, "peak acceleration {a:?}");

    for plane in &sol.planes {
        assert_relative_eq!(plane.normal.norm(), 1.0, epsilon = 1e-2);
    }
}

#[test]
fn polyhedra_guess_avoids_the_obstacle() {
    let mut params = avoidance_params();
    params.max_restarts = Some(3);
    let mut opt = avoidance(params);
    let corridor = vec![
        Polyhedron::from_box(Vector3::new(-1.0, -3.0, -1.0), Vector3::new(2.6, 0.4, 1.0)),
        Polyhedron::from_box(Vector3::new(2.0, -3.0, -1.0), Vector3::new(4.0, -0.6, 1.0)),
        Polyhedron::from_box(Vector3::new(3.4, -3.0, -1.0), Vector3::new(7.0, 0.4, 1.0)),
    ];
    let sol = opt.optimize(&GuessSource::FromPolyhedra(corridor)).unwrap();
    for s in &sol.samples {
        assert!(!strictly_inside_box(&s.pos), "sample {:?} collides", s.pos);
    }
}

#[test]
fn fixed_seed_is_deterministic() {
    let run = || {
        let mut params = avoidance_params();
        params.max_restarts = Some(3);
        params.seed = 11;
        avoidance(params).optimize(&GuessSource::Random).map(|s| (s.cost, s.best_restart))
    };
    let a = run();
    let b = run();
    match (a, b) {
        (Ok((ca, ra)), Ok((cb, rb))) => {
            assert_relative_eq!(ca, cb, max_relative = 1e-9);
            assert_eq!(ra, rb);
        },
        (Err(ea), Err(eb)) => assert_eq!(ea, eb),
        (a, b) => panic!("runs disagree: {a:?} vs {b:?}"),
    }
}

#[test]
fn more_restarts_never_increase_cost() {
    let run = |max_restarts| {
        let mut params = avoidance_params();
        params.max_restarts = Some(max_restarts);
        params.stall_restarts = 100;
        params.seed = 5;
        avoidance(params).optimize(&detour()).unwrap()
    };
    let short = run(2);
    let long = run(4);
    assert_eq!(short.restarts, 2);
    assert_eq!(long.restarts, 4);
    assert!(long.cost <= short.cost + 1e-12, "{} > {}", long.cost, short.cost);
}

#[test]
fn optimizer_is_reusable() {
    let mut params = avoidance_params();
    params.max_restarts = Some(2);
    let mut opt = avoidance(params);
    let a = opt.optimize(&detour()).unwrap();
    opt.set_init_and_final_states(State::at_rest(Vector3::new(0.0, -1.0, 0.0)), State::at_rest(Vector3::new(6.0, -1.0, 0.0)));
    let b = opt.optimize(&detour()).unwrap();
    assert_relative_eq!(a.control_points[0], Vector3::zeros());
    assert_relative_eq!(b.control_points[0], Vector3::new(0.0, -1.0, 0.0));
}

#[test]
fn configuration_errors_fail_fast() {
    assert!(matches!(OptimizerParams::new(8, 3, 1, 1.0, 1e-3, true, "LD_MMA"), Err(ConfigError::UnknownAlgorithm(_))));
    assert_eq!(TrajectoryOptimizer::new(OptimizerParams::new(2, 3, 1, 1.0, 1e-3, true, "lbfgs").unwrap()).err(),
        Some(ConfigError::NoDecisionControlPoints { num_pol: 2, deg: 3 }));

    let mut opt = avoidance(avoidance_params());
    opt.set_hulls(vec![vec![obstacle_box(); 7]]);
    let err = opt.optimize(&detour()).unwrap_err();
    assert_eq!(err, OptimizeError::Config(ConfigError::SegmentCountMismatch { obstacle: 0, expected: 8, got: 7 }));

    opt.set_hulls(vec![]);
    let err = opt.optimize(&detour()).unwrap_err();
    assert_eq!(err, OptimizeError::Config(ConfigError::ObstacleCountMismatch { expected: 1, got: 0 }));

    opt.set_hulls(vec![vec![obstacle_box(); 8]]);
    let err = opt.optimize(&GuessSource::FromPath(vec![])).unwrap_err();
    assert!(matches!(err, OptimizeError::Config(ConfigError::EmptyGuess(_))));
    assert_eq!(opt.phase(), Phase::Idle);
}

#[test]
fn huge_budgets_mean_no_limit() {
    let mut params = avoidance_params();
    params.max_restarts = Some(1);
    params.local_time_slice = 1e20;
    let mut opt = avoidance(params);
    opt.set_max_runtime(1e20);
    let sol = opt.optimize(&detour()).unwrap();
    assert_eq!(sol.restarts, 1);
    assert_eq!(sol.termination, Termination::RestartLimit);
}

#[test]
fn backend_failures_degrade_to_infeasible() {
    let mut params = avoidance_params();
    params.max_restarts = Some(3);
    let mut opt = avoidance(params);
    // constraint residuals overflow the penalty term at every start point
    opt.set_hulls(vec![vec![ConvexHull::from_box(Vector3::repeat(-1e200), Vector3::repeat(1e200)); 8]]);

    let err = opt.optimize(&detour()).unwrap_err();
    assert_eq!(err, OptimizeError::InfeasibleWithinBudget { budget_s: 30.0, restarts: 3, backend_failures: 3 });
    assert_eq!(opt.phase(), Phase::TimedOut);
    assert!(opt.result_code().starts_with("failure"));
}

#[test]
fn identical_restarts_stall() {
    let mut params = OptimizerParams::new(6, 3, 1, 1.0, 1e-3, true, "lbfgs").unwrap();
    params.max_runtime = 30.0;
    params.max_restarts = Some(20);
    params.stall_restarts = 2;
    params.restart_jitter = 0.0;
    let mut opt = TrajectoryOptimizer::new(params).unwrap();
    let p = Vector3::new(1.0, 2.0, 0.5);
    opt.set_init_and_final_states(State::at_rest(p), State::at_rest(p));
    opt.set_hulls(vec![vec![ConvexHull::from_box(Vector3::new(50.0, 50.0, 50.0), Vector3::new(51.0, 51.0, 51.0)); 6]]);
    opt.set_t_min_and_t_max(0.0, 2.0);
    opt.set_max_values(10.0, 20.0);

    let sol = opt.optimize(&GuessSource::FromPath(vec![p])).unwrap();
    assert_eq!(sol.termination, Termination::Stalled);
    assert_eq!(sol.restarts, 3);
    assert_eq!(sol.best_restart, 0);
    assert_eq!(opt.phase(), Phase::Converged);
}

#[test]
fn progress_is_reported_after_each_restart() {
    let mut params = avoidance_params();
    params.max_restarts = Some(3);
    params.stall_restarts = 100;
    let mut opt = avoidance(params);
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    opt.set_progress_cb(move |p| sink.lock().unwrap().push(p));

    let sol = opt.optimize(&detour()).unwrap();
    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), sol.restarts);
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)), "{progress:?}");
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
}
