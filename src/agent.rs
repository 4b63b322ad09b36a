//! # Agent
//!
//! A single simulated agent: kinematic state, per-tick neighbor buffers, and
//! the ORCA velocity computation. Each tick the agent collects nearby
//! obstacle edges and agents, converts them into half-plane constraints in
//! velocity space, and solves for the feasible velocity closest to its
//! preferred velocity (see [`crate::linear_program`]).
//!
//! Neighboring agents are captured as [`AgentSnapshot`] copies taken at
//! collection time, so every agent's solve in a tick reads the same
//! prior-tick state regardless of update order.

use log::debug;
use ordered_float::OrderedFloat;

use crate::kd_tree::KdTree;
use crate::linear_program::{solve_2d, solve_3d, Objective};
use crate::structs::{dist_sq_point_segment, Line, ObstacleVertex, Vector2, EPSILON};

/// Copy of another agent's kinematic state at neighbor-collection time.
#[derive(Debug, Clone, Copy)]
pub struct AgentSnapshot {
    pub id: usize,
    pub position: Vector2,
    pub velocity: Vector2,
    pub radius: f32,
}

/// Which part of a velocity-obstacle boundary the current velocity projects
/// onto. Decides which half-plane constraint an obstacle edge contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NearestBoundary {
    /// Cutoff circle around the left (first) endpoint.
    LeftCircle,
    /// Cutoff circle around the right (second) endpoint.
    RightCircle,
    /// Straight cutoff segment between the endpoint circles.
    CutoffLine,
    LeftLeg,
    RightLeg,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: usize,
    pub position: Vector2,
    pub velocity: Vector2,
    pub pref_velocity: Vector2,
    /// Output of the latest solve; committed to `velocity` by [`Agent::update`].
    pub new_velocity: Vector2,
    pub radius: f32,
    pub max_speed: f32,
    pub neighbor_dist: f32,
    pub max_neighbors: usize,
    pub time_horizon: f32,
    pub time_horizon_obst: f32,
    /// Nearby agents, sorted by squared distance, at most `max_neighbors`.
    pub agent_neighbors: Vec<(OrderedFloat<f32>, AgentSnapshot)>,
    /// Nearby obstacle edges (first-vertex arena indices), sorted by squared
    /// distance from the agent to the edge segment.
    pub obstacle_neighbors: Vec<(OrderedFloat<f32>, usize)>,
    /// Constraint lines of the latest solve, obstacle lines first.
    pub orca_lines: Vec<Line>,
}

impl Agent {
    pub fn new(
        id: usize,
        position: Vector2,
        velocity: Vector2,
        neighbor_dist: f32,
        max_neighbors: usize,
        time_horizon: f32,
        time_horizon_obst: f32,
        radius: f32,
        max_speed: f32,
    ) -> Self {
        Agent {
            id,
            position,
            velocity,
            pref_velocity: Vector2::ZERO,
            new_velocity: Vector2::ZERO,
            radius,
            max_speed,
            neighbor_dist,
            max_neighbors,
            time_horizon,
            time_horizon_obst,
            agent_neighbors: Vec::new(),
            obstacle_neighbors: Vec::new(),
            orca_lines: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            radius: self.radius,
        }
    }

    /// Refills both neighbor buffers from the spatial index. The obstacle
    /// query range covers everything reachable within the obstacle time
    /// horizon at full speed; the agent query range is `neighbor_dist`.
    pub fn compute_neighbors(&mut self, tree: &KdTree, obstacles: &[ObstacleVertex]) {
        self.obstacle_neighbors.clear();
        let range_sq = {
            let range = self.time_horizon_obst * self.max_speed + self.radius;
            range * range
        };
        tree.query_obstacle_neighbors(self, obstacles, range_sq);

        self.agent_neighbors.clear();
        if self.max_neighbors > 0 {
            let range_sq = self.neighbor_dist * self.neighbor_dist;
            tree.query_agent_neighbors(self, range_sq);
        }
    }

    /// Inserts `other` into the bounded agent-neighbor buffer, keeping it
    /// sorted by squared distance. When the buffer is full the farthest entry
    /// is evicted and the returned query range shrinks to the new farthest
    /// distance.
    pub fn insert_agent_neighbor(&mut self, other: &AgentSnapshot, range_sq: f32) -> f32 {
        if other.id == self.id || self.max_neighbors == 0 {
            return range_sq;
        }

        let dist_sq = (self.position - other.position).length_sq();
        if dist_sq >= range_sq {
            return range_sq;
        }

        if self.agent_neighbors.len() < self.max_neighbors {
            self.agent_neighbors.push((OrderedFloat(dist_sq), *other));
        }

        let mut i = self.agent_neighbors.len() - 1;
        while i != 0 && dist_sq < self.agent_neighbors[i - 1].0.into_inner() {
            self.agent_neighbors[i] = self.agent_neighbors[i - 1];
            i -= 1;
        }
        self.agent_neighbors[i] = (OrderedFloat(dist_sq), *other);

        if self.agent_neighbors.len() == self.max_neighbors {
            // Furthest kept neighbor bounds the remaining search.
            self.agent_neighbors[self.max_neighbors - 1].0.into_inner()
        } else {
            range_sq
        }
    }

    /// Inserts the obstacle edge starting at arena index `vertex` into the
    /// obstacle-neighbor buffer, sorted by distance to the edge segment.
    /// Vertices without a successor carry no edge and are skipped.
    pub fn insert_obstacle_neighbor(
        &mut self,
        vertex: usize,
        obstacles: &[ObstacleVertex],
        range_sq: f32,
    ) {
        let Some(next) = obstacles[vertex].next else {
            return;
        };

        let dist_sq =
            dist_sq_point_segment(obstacles[vertex].point, obstacles[next].point, self.position);
        if dist_sq >= range_sq {
            return;
        }

        self.obstacle_neighbors.push((OrderedFloat(dist_sq), vertex));

        let mut i = self.obstacle_neighbors.len() - 1;
        while i != 0 && dist_sq < self.obstacle_neighbors[i - 1].0.into_inner() {
            self.obstacle_neighbors[i] = self.obstacle_neighbors[i - 1];
            i -= 1;
        }
        self.obstacle_neighbors[i] = (OrderedFloat(dist_sq), vertex);
    }

    /// Builds the ORCA constraint lines for the current neighbor buffers and
    /// solves for `new_velocity`. Obstacle lines are built first and stay
    /// hard in the relaxation fallback; agent lines split responsibility
    /// evenly between the two agents.
    pub fn compute_new_velocity(&mut self, obstacles: &[ObstacleVertex], delta_time: f32) {
        self.orca_lines.clear();

        let inv_time_horizon_obst = 1.0 / self.time_horizon_obst;
        let radius_sq = self.radius * self.radius;

        for k in 0..self.obstacle_neighbors.len() {
            let mut i1 = self.obstacle_neighbors[k].1;
            let Some(mut i2) = obstacles[i1].next else {
                continue;
            };

            let relative_position1 = obstacles[i1].point - self.position;
            let relative_position2 = obstacles[i2].point - self.position;

            // Skip this edge if its velocity obstacle is already fully
            // covered by previously built obstacle lines.
            let already_covered = self.orca_lines.iter().any(|line| {
                (relative_position1 * inv_time_horizon_obst - line.point).det(line.direction)
                    - inv_time_horizon_obst * self.radius
                    >= -EPSILON
                    && (relative_position2 * inv_time_horizon_obst - line.point)
                        .det(line.direction)
                        - inv_time_horizon_obst * self.radius
                        >= -EPSILON
            });
            if already_covered {
                continue;
            }

            let dist_sq1 = relative_position1.length_sq();
            let dist_sq2 = relative_position2.length_sq();

            let obstacle_vector = obstacles[i2].point - obstacles[i1].point;
            let s = -relative_position1.dot(obstacle_vector) / obstacle_vector.length_sq();
            let dist_sq_line = (-relative_position1 - obstacle_vector * s).length_sq();

            // Collision with the edge or one of its endpoints: push a
            // constraint through the origin that drives the agent off.
            if s < 0.0 && dist_sq1 <= radius_sq {
                if obstacles[i1].is_convex {
                    self.orca_lines.push(Line::new(
                        Vector2::ZERO,
                        relative_position1.perpendicular().normalize(),
                    ));
                }
                continue;
            } else if s > 1.0 && dist_sq2 <= radius_sq {
                // The right endpoint is handled by the next edge unless the
                // agent is outside that edge's half-plane.
                if obstacles[i2].is_convex
                    && relative_position2.det(obstacles[i2].unit_dir) >= 0.0
                {
                    self.orca_lines.push(Line::new(
                        Vector2::ZERO,
                        relative_position2.perpendicular().normalize(),
                    ));
                }
                continue;
            } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
                self.orca_lines
                    .push(Line::new(Vector2::ZERO, -obstacles[i1].unit_dir));
                continue;
            }

            // No collision: construct the velocity obstacle's legs. When the
            // agent sees the edge from beyond an endpoint, the obstacle
            // collapses to that single (convex) vertex.
            let mut left_leg_direction;
            let mut right_leg_direction;

            if s < 0.0 && dist_sq_line <= radius_sq {
                if !obstacles[i1].is_convex {
                    continue;
                }
                i2 = i1;

                let leg1 = (dist_sq1 - radius_sq).sqrt();
                left_leg_direction = Vector2::new(
                    relative_position1.x * leg1 - relative_position1.y * self.radius,
                    relative_position1.x * self.radius + relative_position1.y * leg1,
                ) * (1.0 / dist_sq1);
                right_leg_direction = Vector2::new(
                    relative_position1.x * leg1 + relative_position1.y * self.radius,
                    -relative_position1.x * self.radius + relative_position1.y * leg1,
                ) * (1.0 / dist_sq1);
            } else if s > 1.0 && dist_sq_line <= radius_sq {
                if !obstacles[i2].is_convex {
                    continue;
                }
                i1 = i2;

                let leg2 = (dist_sq2 - radius_sq).sqrt();
                left_leg_direction = Vector2::new(
                    relative_position2.x * leg2 - relative_position2.y * self.radius,
                    relative_position2.x * self.radius + relative_position2.y * leg2,
                ) * (1.0 / dist_sq2);
                right_leg_direction = Vector2::new(
                    relative_position2.x * leg2 + relative_position2.y * self.radius,
                    -relative_position2.x * self.radius + relative_position2.y * leg2,
                ) * (1.0 / dist_sq2);
            } else {
                if obstacles[i1].is_convex {
                    let leg1 = (dist_sq1 - radius_sq).sqrt();
                    left_leg_direction = Vector2::new(
                        relative_position1.x * leg1 - relative_position1.y * self.radius,
                        relative_position1.x * self.radius + relative_position1.y * leg1,
                    ) * (1.0 / dist_sq1);
                } else {
                    // Non-convex left vertex: the leg degenerates to the edge.
                    left_leg_direction = -obstacles[i1].unit_dir;
                }

                if obstacles[i2].is_convex {
                    let leg2 = (dist_sq2 - radius_sq).sqrt();
                    right_leg_direction = Vector2::new(
                        relative_position2.x * leg2 + relative_position2.y * self.radius,
                        -relative_position2.x * self.radius + relative_position2.y * leg2,
                    ) * (1.0 / dist_sq2);
                } else {
                    right_leg_direction = obstacles[i1].unit_dir;
                }
            }

            // Legs may never cut into neighboring edges. A leg pointing into
            // the polygon interior is replaced by the neighboring edge's
            // direction and marked foreign; foreign legs contribute no
            // constraint of their own.
            let Some(prev) = obstacles[i1].prev else {
                continue;
            };

            let mut is_left_leg_foreign = false;
            let mut is_right_leg_foreign = false;

            let left_neighbor_dir = -obstacles[prev].unit_dir;
            if obstacles[i1].is_convex && left_leg_direction.det(left_neighbor_dir) >= 0.0 {
                left_leg_direction = left_neighbor_dir;
                is_left_leg_foreign = true;
            }

            let right_neighbor_dir = obstacles[i2].unit_dir;
            if obstacles[i2].is_convex && right_leg_direction.det(right_neighbor_dir) <= 0.0 {
                right_leg_direction = right_neighbor_dir;
                is_right_leg_foreign = true;
            }

            let collapsed = i1 == i2;
            let left_cutoff = (obstacles[i1].point - self.position) * inv_time_horizon_obst;
            let right_cutoff = (obstacles[i2].point - self.position) * inv_time_horizon_obst;
            let cutoff_vec = right_cutoff - left_cutoff;

            // Project the current velocity onto the velocity obstacle.
            let t = if collapsed {
                0.5
            } else {
                (self.velocity - left_cutoff).dot(cutoff_vec) / cutoff_vec.length_sq()
            };
            let t_left = (self.velocity - left_cutoff).dot(left_leg_direction);
            let t_right = (self.velocity - right_cutoff).dot(right_leg_direction);

            let boundary = if (t < 0.0 && t_left < 0.0)
                || (collapsed && t_left < 0.0 && t_right < 0.0)
            {
                NearestBoundary::LeftCircle
            } else if t > 1.0 && t_right < 0.0 {
                NearestBoundary::RightCircle
            } else {
                let dist_sq_cutoff = if !(0.0..=1.0).contains(&t) || collapsed {
                    f32::INFINITY
                } else {
                    (self.velocity - (left_cutoff + cutoff_vec * t)).length_sq()
                };
                let dist_sq_left = if t_left < 0.0 {
                    f32::INFINITY
                } else {
                    (self.velocity - (left_cutoff + left_leg_direction * t_left)).length_sq()
                };
                let dist_sq_right = if t_right < 0.0 {
                    f32::INFINITY
                } else {
                    (self.velocity - (right_cutoff + right_leg_direction * t_right)).length_sq()
                };

                if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
                    NearestBoundary::CutoffLine
                } else if dist_sq_left <= dist_sq_right {
                    NearestBoundary::LeftLeg
                } else {
                    NearestBoundary::RightLeg
                }
            };

            let cutoff_radius = self.radius * inv_time_horizon_obst;
            match boundary {
                NearestBoundary::LeftCircle => {
                    let unit_w = (self.velocity - left_cutoff).normalize();
                    self.orca_lines.push(Line::new(
                        left_cutoff + unit_w * cutoff_radius,
                        Vector2::new(unit_w.y, -unit_w.x),
                    ));
                }
                NearestBoundary::RightCircle => {
                    let unit_w = (self.velocity - right_cutoff).normalize();
                    self.orca_lines.push(Line::new(
                        right_cutoff + unit_w * cutoff_radius,
                        Vector2::new(unit_w.y, -unit_w.x),
                    ));
                }
                NearestBoundary::CutoffLine => {
                    let direction = -obstacles[i1].unit_dir;
                    self.orca_lines.push(Line::new(
                        left_cutoff + direction.perpendicular() * cutoff_radius,
                        direction,
                    ));
                }
                NearestBoundary::LeftLeg => {
                    if is_left_leg_foreign {
                        continue;
                    }
                    self.orca_lines.push(Line::new(
                        left_cutoff + left_leg_direction.perpendicular() * cutoff_radius,
                        left_leg_direction,
                    ));
                }
                NearestBoundary::RightLeg => {
                    if is_right_leg_foreign {
                        continue;
                    }
                    let direction = -right_leg_direction;
                    self.orca_lines.push(Line::new(
                        right_cutoff + direction.perpendicular() * cutoff_radius,
                        direction,
                    ));
                }
            }
        }

        let num_obstacle_lines = self.orca_lines.len();

        let inv_time_horizon = 1.0 / self.time_horizon;
        for k in 0..self.agent_neighbors.len() {
            let other = self.agent_neighbors[k].1;

            let relative_position = other.position - self.position;
            let relative_velocity = self.velocity - other.velocity;
            let dist_sq = relative_position.length_sq();
            let combined_radius = self.radius + other.radius;
            let combined_radius_sq = combined_radius * combined_radius;

            let direction;
            let u;

            if dist_sq > combined_radius_sq {
                // Not colliding: truncated cone with horizon 1/time_horizon.
                let w = relative_velocity - relative_position * inv_time_horizon;
                let w_length_sq = w.length_sq();
                let dot_product = w.dot(relative_position);

                if dot_product < 0.0
                    && dot_product * dot_product > combined_radius_sq * w_length_sq
                {
                    // Project on the cutoff circle.
                    let w_length = w_length_sq.sqrt();
                    let unit_w = w * (1.0 / w_length);

                    direction = Vector2::new(unit_w.y, -unit_w.x);
                    u = unit_w * (combined_radius * inv_time_horizon - w_length);
                } else {
                    // Project on the nearer leg.
                    let leg = (dist_sq - combined_radius_sq).sqrt();

                    if relative_position.det(w) > 0.0 {
                        direction = Vector2::new(
                            relative_position.x * leg - relative_position.y * combined_radius,
                            relative_position.x * combined_radius + relative_position.y * leg,
                        ) * (1.0 / dist_sq);
                    } else {
                        direction = Vector2::new(
                            relative_position.x * leg + relative_position.y * combined_radius,
                            -relative_position.x * combined_radius + relative_position.y * leg,
                        ) * (-1.0 / dist_sq);
                    }

                    u = direction * relative_velocity.dot(direction) - relative_velocity;
                }
            } else {
                // Already overlapping: resolve within a single time step.
                let inv_time_step = 1.0 / delta_time;
                let w = relative_velocity - relative_position * inv_time_step;
                let w_length = w.length();

                let unit_w = if w_length > EPSILON {
                    w * (1.0 / w_length)
                } else if relative_position.length_sq() > EPSILON * EPSILON {
                    // Coincident velocities: push straight away from the other
                    // agent's center.
                    -relative_position.normalize()
                } else {
                    Vector2::new(1.0, 0.0)
                };

                direction = Vector2::new(unit_w.y, -unit_w.x);
                u = unit_w * (combined_radius * inv_time_step - w_length);
            }

            // Each agent takes half the responsibility for avoidance.
            self.orca_lines
                .push(Line::new(self.velocity + u * 0.5, direction));
        }

        let objective = Objective::Point(self.pref_velocity);
        let (candidate, fail) = solve_2d(&self.orca_lines, self.max_speed, &objective);
        self.new_velocity = candidate;

        if fail < self.orca_lines.len() {
            debug!(
                "agent {}: {} constraints infeasible at index {}, relaxing",
                self.id,
                self.orca_lines.len(),
                fail
            );
            solve_3d(
                &self.orca_lines,
                num_obstacle_lines,
                fail,
                self.max_speed,
                &mut self.new_velocity,
            );
        }
    }

    /// Commits the solved velocity and advances the position by explicit
    /// Euler integration. With `move_agents` false only the velocity changes.
    pub fn update(&mut self, delta_time: f32, move_agents: bool) {
        self.velocity = self.new_velocity;
        if move_agents {
            self.position = self.position + self.velocity * delta_time;
        }
    }
}
