use nalgebra::Vector3;
use rayon::prelude::*;
use rs_trajopt::*;
use serde::Deserialize;
use std::fmt::Write;

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum GuessSpec {
    Path(Vec<Vector3<f64>>),
    Polyhedra(Vec<Polyhedron>),
    Random,
}

#[derive(Deserialize)]
struct Scenario {
    params: OptimizerParams,
    initial_state: State,
    final_state: State,
    hulls: ConvexHullsOfCurves,
    t_min: f64,
    t_max: f64,
    v_max: f64,
    a_max: f64,
    #[serde(default = "default_dc")]
    dc: f64,
    guess: GuessSpec,
}
fn default_dc() -> f64 { 0.05 }

fn run(path: &str) -> Result<(f64, Solution), String> {
    let data = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let sc: Scenario = serde_json::from_str(&data).map_err(|e| e.to_string())?;

    let mut opt = TrajectoryOptimizer::new(sc.params).map_err(|e| e.to_string())?;
    opt.set_init_and_final_states(sc.initial_state, sc.final_state);
    opt.set_hulls(sc.hulls);
    opt.set_t_min_and_t_max(sc.t_min, sc.t_max);
    opt.set_max_values(sc.v_max, sc.a_max);
    opt.set_dc(sc.dc);

    let guess = match sc.guess {
        GuessSpec::Path(p) => GuessSource::FromPath(p),
        GuessSpec::Polyhedra(p) => GuessSource::FromPolyhedra(p),
        GuessSpec::Random => GuessSource::Random,
    };
    let sol = opt.optimize(&guess).map_err(|e| e.to_string())?;
    Ok((sc.dc, sol))
}

fn main() {
    let verbose = std::env::args().any(|a| a == "-v");
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}: {}", record.level(), record.target(), message)))
        .level(log::LevelFilter::Info)
        .level_for("rs_trajopt", if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .chain(std::io::stdout())
        .apply()
        .unwrap();

    let files: Vec<String> = walkdir::WalkDir::new("test_data/").into_iter().flatten()
        .map(|entry| entry.path().to_string_lossy().to_string())
        .filter(|path| path.ends_with(".json"))
        .collect();

    let results: Vec<(String, Result<(f64, Solution), String>)> = files.par_iter().map(|path| (path.clone(), run(path))).collect();

    let mut out = String::from("scenario,t,px,py,pz,vx,vy,vz,ax,ay,az\n");
    for (path, result) in results {
        println!("{path}:");
        match result {
            Ok((dc, sol)) => {
                println!("  {}", sol.result_code());
                println!("  cost {:.6}, first feasible {:.1}ms, total {:.1}ms, {} restarts ({} failed)",
                    sol.cost, sol.time_to_first_feasible.as_secs_f64() * 1000.0, sol.elapsed.as_secs_f64() * 1000.0, sol.restarts, sol.backend_failures);
                for (i, s) in sol.samples.iter().enumerate() {
                    let t = (sol.trajectory.t_min() + i as f64 * dc).min(sol.trajectory.t_max());
                    let _ = writeln!(out, "{path},{t},{},{},{},{},{},{},{},{},{}",
                        s.pos.x, s.pos.y, s.pos.z, s.vel.x, s.vel.y, s.vel.z, s.accel.x, s.accel.y, s.accel.z);
                }
            },
            Err(e) => println!("  error: {e}"),
        }
    }
    std::fs::write("dbg.csv", out).unwrap();
}
