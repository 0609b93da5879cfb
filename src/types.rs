// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright © 2021-2022 Vladimir Pinchuk (https://github.com/VladimirP1)
// Ported to Rust by Adrian <adrian.eddy at gmail>

use nalgebra::Vector3;
use serde::{ Deserialize, Serialize };

/// Position, velocity and acceleration at one instant. `jerk` is only filled when sampling a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub accel: Vector3<f64>,
    #[serde(default)]
    pub jerk: Vector3<f64>,
}

impl State {
    pub fn new(pos: Vector3<f64>, vel: Vector3<f64>, accel: Vector3<f64>) -> Self {
        Self { pos, vel, accel, jerk: Vector3::zeros() }
    }
    pub fn at_rest(pos: Vector3<f64>) -> Self {
        Self::new(pos, Vector3::zeros(), Vector3::zeros())
    }
}

/// Convex hull of the volume an obstacle sweeps during one trajectory segment, as a vertex set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConvexHull {
    pub vertices: Vec<Vector3<f64>>,
}

impl ConvexHull {
    pub fn new(vertices: Vec<Vector3<f64>>) -> Self { Self { vertices } }

    /// Axis aligned box, handy for tests and scenario files.
    pub fn from_box(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8 {
            vertices.push(Vector3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            ));
        }
        Self::new(vertices)
    }

    pub fn centroid(&self) -> Vector3<f64> {
        if self.vertices.is_empty() {
            return Vector3::zeros();
        }
        self.vertices.iter().sum::<Vector3<f64>>() / self.vertices.len() as f64
    }

    /// Smallest projection of the hull onto `n` and the vertex that attains it (first one on ties).
    pub fn support_min(&self, n: &Vector3<f64>) -> (f64, Vector3<f64>) {
        let mut best = (f64::INFINITY, Vector3::zeros());
        for v in &self.vertices {
            let d = n.dot(v);
            if d < best.0 {
                best = (d, *v);
            }
        }
        best
    }
}

/// `hulls[obstacle][segment]`
pub type ConvexHullsOfCurves = Vec<Vec<ConvexHull>>;

/// Plane through `point` with normal `normal`. In a polyhedron the normal points outwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperplane {
    pub point: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl Hyperplane {
    pub fn new(point: Vector3<f64>, normal: Vector3<f64>) -> Self { Self { point, normal } }

    pub fn signed_dist(&self, p: &Vector3<f64>) -> f64 {
        let norm = self.normal.norm();
        if norm < 1e-12 { return 0.0; }
        self.normal.dot(&(p - self.point)) / norm
    }
}

/// Convex region given as the intersection of the inner sides of its faces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polyhedron {
    pub faces: Vec<Hyperplane>,
}

impl Polyhedron {
    pub fn new(faces: Vec<Hyperplane>) -> Self { Self { faces } }

    pub fn from_box(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        let mut faces = Vec::with_capacity(6);
        for k in 0..3 {
            let mut e = Vector3::zeros();
            e[k] = 1.0;
            faces.push(Hyperplane::new(max, e));
            faces.push(Hyperplane::new(min, -e));
        }
        Self::new(faces)
    }

    /// Mean of the face anchor points. Only an approximation of the true centroid, used to seed paths.
    pub fn centroid(&self) -> Vector3<f64> {
        if self.faces.is_empty() {
            return Vector3::zeros();
        }
        self.faces.iter().map(|f| f.point).sum::<Vector3<f64>>() / self.faces.len() as f64
    }
}
