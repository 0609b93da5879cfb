// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::*;
use rand::prelude::*;

use crate::error::ConfigError;
use crate::evaluator::Evaluator;
use crate::support::inline_utils::*;
use crate::types::Polyhedron;

const NORMAL_RETRIES: usize = 16;

/// Where the initial decision vector of every restart comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum GuessSource {
    /// Coarse collision-free polyline, usually from a discrete path search.
    FromPath(Vec<Vector3<f64>>),
    /// Free-space polyhedra along the path, in flight order.
    FromPolyhedra(Vec<Polyhedron>),
    Random,
}

impl GuessSource {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::FromPath(p) if p.is_empty() => Err(ConfigError::EmptyGuess("path has no waypoints")),
            Self::FromPolyhedra(p) if p.is_empty() => Err(ConfigError::EmptyGuess("no polyhedra")),
            Self::FromPolyhedra(p) if p.iter().any(|poly| poly.faces.is_empty()) => Err(ConfigError::EmptyGuess("polyhedron without faces")),
            _ => Ok(())
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FromPath(_) => "path",
            Self::FromPolyhedra(_) => "polyhedra",
            Self::Random => "random",
        }
    }
}

/// Point at arc-length fraction `f` (`0..=1`) along `path`.
pub fn point_at_fraction(path: &[Vector3<f64>], f: f64) -> Vector3<f64> {
    let Some(first) = path.first() else { return Vector3::zeros(); };
    let total: f64 = path.windows(2).map(|w| (w[1] - w[0]).norm()).sum();
    if total < 1e-12 {
        return *first;
    }
    let mut remaining = f.clamp(0.0, 1.0) * total;
    for w in path.windows(2) {
        let len = (w[1] - w[0]).norm();
        if remaining <= len && len > 0.0 {
            return w[0] + (w[1] - w[0]) * (remaining / len);
        }
        remaining -= len;
    }
    path[path.len() - 1]
}

pub struct GuessGenerator<'a> {
    ev: &'a Evaluator,
    start: Vector3<f64>,
    goal: Vector3<f64>,
    radius: f64,
    jitter: f64,
}

impl<'a> GuessGenerator<'a> {
    pub fn new(ev: &'a Evaluator, start: Vector3<f64>, goal: Vector3<f64>, radius: f64, jitter: f64) -> Self {
        Self { ev, start, goal, radius, jitter }
    }

    /// Flat decision vector for restart number `restart`. Restart 0 uses `source` as given.
    pub fn generate<R: Rng>(&self, source: &GuessSource, restart: usize, rng: &mut R) -> Vec<f64> {
        let layout = self.ev.layout();
        let mut q = self.ev.boundary_control_points().to_vec();
        let n = match source {
            GuessSource::FromPath(path) => {
                self.fill_from_path(&mut q, path);
                self.perturb_cps(&mut q, restart, rng);
                self.normals_from_cps(&q)
            },
            GuessSource::FromPolyhedra(polys) => {
                let mut path = Vec::with_capacity(polys.len() + 2);
                path.push(self.start);
                path.extend(polys.iter().map(|p| p.centroid()));
                path.push(self.goal);
                self.fill_from_path(&mut q, &path);
                self.perturb_cps(&mut q, restart, rng);
                let mut n = self.normals_from_polyhedra(&q, polys);
                if restart > 0 {
                    for normal in n.iter_mut() {
                        *normal = normalize_or_x(*normal + uniform_in_cube(rng, self.jitter));
                    }
                }
                n
            },
            GuessSource::Random => {
                let last = layout.last_cp() as f64;
                for i in layout.first_decision_cp()..=layout.last_decision_cp() {
                    let base = self.start + (self.goal - self.start) * (i as f64 / last);
                    q[i] = base + uniform_in_cube(rng, self.radius);
                }
                self.random_normals(&q, rng)
            },
        };
        layout.qn_to_x(&q, &n)
    }

    fn fill_from_path(&self, q: &mut [Vector3<f64>], path: &[Vector3<f64>]) {
        let layout = self.ev.layout();
        let last = layout.last_cp() as f64;
        for i in layout.first_decision_cp()..=layout.last_decision_cp() {
            q[i] = point_at_fraction(path, i as f64 / last);
        }
    }

    fn perturb_cps<R: Rng>(&self, q: &mut [Vector3<f64>], restart: usize, rng: &mut R) {
        if restart == 0 {
            return;
        }
        let layout = self.ev.layout();
        for i in layout.first_decision_cp()..=layout.last_decision_cp() {
            q[i] += uniform_in_cube(rng, self.jitter);
        }
    }

    fn segment_mean(&self, q: &[Vector3<f64>], s: usize) -> Vector3<f64> {
        let cps = self.ev.layout().segment_cps(s);
        let count = cps.clone().count() as f64;
        cps.map(|j| q[j]).sum::<Vector3<f64>>() / count
    }

    /// Unit directions from each segment towards its obstacle hull.
    pub fn normals_from_cps(&self, q: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let layout = self.ev.layout();
        let mut n = vec![Vector3::x(); layout.num_normals()];
        for o in 0..layout.num_obstacles() {
            for s in 0..layout.num_segments() {
                let centroid = self.ev.hulls()[o][s].centroid();
                n[layout.plane_index(o, s)] = normalize_or_x(centroid - self.segment_mean(q, s));
            }
        }
        n
    }

    /// Per (obstacle, segment), the outward face normal of the segment's polyhedron that has the obstacle furthest outside.
    fn normals_from_polyhedra(&self, q: &[Vector3<f64>], polys: &[Polyhedron]) -> Vec<Vector3<f64>> {
        let layout = self.ev.layout();
        let mut n = self.normals_from_cps(q);
        for s in 0..layout.num_segments() {
            let poly = &polys[(s * polys.len() / layout.num_segments()).min(polys.len() - 1)];
            for o in 0..layout.num_obstacles() {
                let centroid = self.ev.hulls()[o][s].centroid();
                let dominant = poly.faces.iter()
                    .filter(|f| f.normal.norm() > 1e-12)
                    .max_by(|a, b| a.signed_dist(&centroid).total_cmp(&b.signed_dist(&centroid)));
                if let Some(face) = dominant {
                    n[layout.plane_index(o, s)] = normalize_or_x(face.normal);
                }
            }
        }
        n
    }

    fn random_normals<R: Rng>(&self, q: &[Vector3<f64>], rng: &mut R) -> Vec<Vector3<f64>> {
        let layout = self.ev.layout();
        let mut n = vec![Vector3::x(); layout.num_normals()];
        for o in 0..layout.num_obstacles() {
            for s in 0..layout.num_segments() {
                let towards = self.ev.hulls()[o][s].centroid() - self.segment_mean(q, s);
                let mut sample = uniform_on_sphere(rng);
                for _ in 0..NORMAL_RETRIES {
                    if sample.dot(&towards) > 0.0 {
                        break;
                    }
                    sample = uniform_on_sphere(rng);
                }
                if sample.dot(&towards) < 0.0 {
                    sample = -sample;
                }
                n[layout.plane_index(o, s)] = sample;
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NlpProblem;
    use crate::evaluator::{ CostTerms, ProblemInputs };
    use crate::layout::SplineLayout;
    use crate::types::{ ConvexHull, State };
    use approx::assert_relative_eq;

    fn evaluator() -> Evaluator {
        let layout = SplineLayout::new(3, 6, 1, true).unwrap();
        let hull = ConvexHull::from_box(Vector3::new(1.0, 1.0, -1.0), Vector3::new(2.0, 2.0, 1.0));
        let inputs = ProblemInputs {
            initial_state: State::at_rest(Vector3::zeros()),
            final_state: State::at_rest(Vector3::new(3.0, 0.0, 0.0)),
            hulls: vec![vec![hull; 6]],
            t_min: 0.0,
            t_max: 3.0,
            v_max: Vector3::repeat(5.0),
            a_max: Vector3::repeat(10.0),
        };
        let terms = CostTerms { weight: 1.0, final_weight: 1.0, separation_margin: 0.0, epsilon_tol_constraints: 1e-3 };
        Evaluator::new(layout, &inputs, terms).unwrap()
    }

    fn generator(ev: &Evaluator) -> GuessGenerator<'_> {
        GuessGenerator::new(ev, Vector3::zeros(), Vector3::new(3.0, 0.0, 0.0), 1.0, 0.3)
    }

    #[test]
    fn arc_length_fractions() {
        let path = [Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 3.0, 0.0)];
        assert_relative_eq!(point_at_fraction(&path, 0.0), Vector3::zeros());
        assert_relative_eq!(point_at_fraction(&path, 0.25), Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(point_at_fraction(&path, 0.5), Vector3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(point_at_fraction(&path, 1.0), Vector3::new(1.0, 3.0, 0.0));
        assert_relative_eq!(point_at_fraction(&path[..1], 0.7), Vector3::zeros());
    }

    #[test]
    fn empty_sources_are_rejected() {
        assert!(GuessSource::FromPath(vec![]).validate().is_err());
        assert!(GuessSource::FromPolyhedra(vec![]).validate().is_err());
        assert!(GuessSource::FromPolyhedra(vec![Polyhedron::default()]).validate().is_err());
        assert!(GuessSource::Random.validate().is_ok());
    }

    #[test]
    fn path_guess_is_structurally_valid() {
        let ev = evaluator();
        let mut rng = StdRng::seed_from_u64(1);
        let source = GuessSource::FromPath(vec![Vector3::zeros(), Vector3::new(3.0, 0.0, 0.0)]);
        let x = generator(&ev).generate(&source, 0, &mut rng);
        assert_eq!(x.len(), ev.num_variables());
        let (q, n) = ev.unpack(&x);
        assert_eq!(&q[..3], &ev.boundary_control_points()[..3]);
        assert_relative_eq!(q[3], Vector3::new(3.0 * 3.0 / 8.0, 0.0, 0.0), epsilon = 1e-12);
        for normal in &n {
            assert_relative_eq!(normal.norm(), 1.0, epsilon = 1e-12);
            assert!(normal.y > 0.0);
        }
    }

    #[test]
    fn polyhedra_guess_uses_dominant_face() {
        let ev = evaluator();
        let mut rng = StdRng::seed_from_u64(1);
        let corridor = Polyhedron::from_box(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(4.0, 0.5, 1.0));
        let x = generator(&ev).generate(&GuessSource::FromPolyhedra(vec![corridor]), 0, &mut rng);
        let (_, n) = ev.unpack(&x);
        for normal in &n {
            assert_relative_eq!(*normal, Vector3::y());
        }
    }

    #[test]
    fn random_normals_face_their_obstacle() {
        let ev = evaluator();
        let gen = generator(&ev);
        let mut rng = StdRng::seed_from_u64(42);
        for restart in 0..5 {
            let x = gen.generate(&GuessSource::Random, restart, &mut rng);
            let (q, n) = ev.unpack(&x);
            for s in 0..6 {
                let towards = ev.hulls()[0][s].centroid() - gen.segment_mean(&q, s);
                assert!(n[s].dot(&towards) >= 0.0);
                assert_relative_eq!(n[s].norm(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn restarts_are_seeded() {
        let ev = evaluator();
        let gen = generator(&ev);
        let source = GuessSource::FromPath(vec![Vector3::zeros(), Vector3::new(3.0, 0.0, 0.0)]);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..3).map(|r| gen.generate(&source, r, &mut rng)).collect::<Vec<_>>()
        };
        let a = run(5);
        assert_eq!(a, run(5));
        assert_ne!(a[0], a[1]);
        assert_ne!(a[1], run(6)[1]);
    }
}
