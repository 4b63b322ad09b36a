//! # Core Data Structures
//!
//! This module defines the fundamental data types used throughout the library:
//!
//! - **Vector2**: 2D position/velocity/direction vector with arithmetic operations
//! - **Line**: a directed line bounding a half-plane in velocity space
//! - **ObstacleVertex**: one vertex of a static polygonal obstacle boundary
//! - **AgentDefaults**: per-simulation default agent parameters

use std::ops::{Add, Mul, Neg, Sub};

/// Geometric tolerance shared by the whole crate. Parallel-line tests,
/// already-covered tests and the relaxation fallback all compare against this.
pub const EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    pub fn dot(self, other: Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// 2D cross product (determinant of the 2x2 matrix with `self` and
    /// `other` as columns). Positive when `other` is to the left of `self`.
    pub fn det(self, other: Vector2) -> f32 {
        self.x * other.y - self.y * other.x
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    pub fn normalize(self) -> Vector2 {
        let len = self.length();
        if len > 0.0 {
            Vector2 {
                x: self.x / len,
                y: self.y / len,
            }
        } else {
            Vector2::ZERO
        }
    }

    /// Counter-clockwise perpendicular: (x, y) -> (-y, x).
    pub fn perpendicular(self) -> Vector2 {
        Vector2 {
            x: -self.y,
            y: self.x,
        }
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, other: Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, other: Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Neg for Vector2 {
    type Output = Vector2;

    fn neg(self) -> Vector2 {
        Vector2 {
            x: -self.x,
            y: -self.y,
        }
    }
}

/// A directed line through `point` along `direction`.
///
/// As a half-plane constraint in velocity space, the feasible side is the
/// left of the line: `{ v : det(direction, point - v) <= 0 }`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub point: Vector2,
    pub direction: Vector2,
}

impl Line {
    pub fn new(point: Vector2, direction: Vector2) -> Self {
        Line { point, direction }
    }

    /// Signed violation of the half-plane by `velocity`; positive means
    /// `velocity` is on the infeasible (right) side.
    pub fn violation(&self, velocity: Vector2) -> f32 {
        self.direction.det(self.point - velocity)
    }
}

/// One vertex of a static obstacle boundary, stored in an index-based arena.
///
/// Vertices of a polygon form a cycle through `next`/`prev`; a bare segment
/// is two mutually linked vertices. `unit_dir` points toward the `next`
/// vertex and is meaningless when `next` is absent.
#[derive(Debug, Clone)]
pub struct ObstacleVertex {
    pub point: Vector2,
    /// Unit direction from this vertex to the next one.
    pub unit_dir: Vector2,
    /// Whether tangent legs can be constructed around this vertex.
    pub is_convex: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub id: usize,
}

/// Default kinematic parameters applied to agents added without explicit
/// overrides. Passed to the simulator at construction; there is no global
/// configuration state.
#[derive(Debug, Clone, Copy)]
pub struct AgentDefaults {
    pub neighbor_dist: f32,
    pub max_neighbors: usize,
    pub time_horizon: f32,
    pub time_horizon_obst: f32,
    pub radius: f32,
    pub max_speed: f32,
}

/// Signed area test: positive when `c` is to the left of the directed line
/// from `a` through `b`.
pub fn left_of(a: Vector2, b: Vector2, c: Vector2) -> f32 {
    (a - c).det(b - a)
}

/// Squared distance from point `c` to the segment from `a` to `b`.
pub fn dist_sq_point_segment(a: Vector2, b: Vector2, c: Vector2) -> f32 {
    let r = (c - a).dot(b - a) / (b - a).length_sq();

    if r < 0.0 {
        (c - a).length_sq()
    } else if r > 1.0 {
        (c - b).length_sq()
    } else {
        (c - (a + (b - a) * r)).length_sq()
    }
}
