//! # Simulator
//!
//! Owning front-end for a crowd of agents and a set of static polygonal
//! obstacles. Holds the obstacle-vertex arena and the spatial index, and
//! drives the two-phase tick: first every agent collects neighbors and
//! solves for a new velocity against prior-tick state, then every agent
//! commits its velocity and integrates its position.

use log::{debug, trace};

use crate::agent::Agent;
use crate::kd_tree::KdTree;
use crate::structs::{left_of, AgentDefaults, ObstacleVertex, Vector2};

pub struct Simulator {
    agents: Vec<Agent>,
    obstacles: Vec<ObstacleVertex>,
    kd_tree: KdTree,
    defaults: AgentDefaults,
}

impl Simulator {
    /// Creates an empty simulation. `defaults` supplies the parameters for
    /// agents added through [`Simulator::add_agent`].
    pub fn new(defaults: AgentDefaults) -> Self {
        Simulator {
            agents: Vec::new(),
            obstacles: Vec::new(),
            kd_tree: KdTree::new(),
            defaults,
        }
    }

    /// Adds an agent with the simulation defaults and zero velocity.
    /// Returns its index.
    pub fn add_agent(&mut self, position: Vector2) -> usize {
        self.add_agent_with(position, Vector2::ZERO, self.defaults)
    }

    /// Adds an agent with explicit parameters. Returns its index.
    pub fn add_agent_with(
        &mut self,
        position: Vector2,
        velocity: Vector2,
        params: AgentDefaults,
    ) -> usize {
        let id = self.agents.len();
        self.agents.push(Agent::new(
            id,
            position,
            velocity,
            params.neighbor_dist,
            params.max_neighbors,
            params.time_horizon,
            params.time_horizon_obst,
            params.radius,
            params.max_speed,
        ));
        id
    }

    /// Adds a polygonal obstacle and returns the arena index of its first
    /// vertex, or `None` for fewer than two vertices. Vertices are listed
    /// counterclockwise for a solid polygon; a two-vertex obstacle is an open
    /// wall blocking from both sides. The spatial index only sees the new
    /// obstacle after the next [`Simulator::process_obstacles`].
    pub fn add_obstacle(&mut self, vertices: &[Vector2]) -> Option<usize> {
        let n = vertices.len();
        if n < 2 {
            return None;
        }

        let first = self.obstacles.len();

        for i in 0..n {
            let idx = self.obstacles.len();
            let next_point = vertices[(i + 1) % n];

            let is_convex = if n == 2 {
                true
            } else {
                let prev_point = vertices[if i == 0 { n - 1 } else { i - 1 }];
                left_of(prev_point, vertices[i], next_point) >= 0.0
            };

            self.obstacles.push(ObstacleVertex {
                point: vertices[i],
                unit_dir: (next_point - vertices[i]).normalize(),
                is_convex,
                prev: if i != 0 { Some(idx - 1) } else { None },
                next: if i == n - 1 { Some(first) } else { None },
                id: idx,
            });

            if i != 0 {
                self.obstacles[idx - 1].next = Some(idx);
            }
        }
        self.obstacles[first].prev = Some(self.obstacles.len() - 1);

        debug!("added obstacle with {n} vertices at arena index {first}");
        Some(first)
    }

    /// Rebuilds the obstacle spatial index. Must be called after adding
    /// obstacles and before the next step; splitting may append vertices to
    /// the arena.
    pub fn process_obstacles(&mut self) {
        self.kd_tree.build_obstacle_tree(&mut self.obstacles);
        debug!(
            "processed obstacles, arena holds {} vertices",
            self.obstacles.len()
        );
    }

    /// Advances the simulation by `delta_time`. All neighbor queries and
    /// velocity solves read the state from before the call; positions only
    /// move afterwards, and only when `move_agents` is set.
    pub fn do_step(&mut self, delta_time: f32, move_agents: bool) {
        trace!(
            "step dt={delta_time} agents={} move={move_agents}",
            self.agents.len()
        );
        self.kd_tree.build_agent_tree(&self.agents);

        let Simulator {
            agents,
            obstacles,
            kd_tree,
            ..
        } = self;

        for agent in agents.iter_mut() {
            agent.compute_neighbors(kd_tree, obstacles);
            agent.compute_new_velocity(obstacles, delta_time);
        }
        for agent in agents.iter_mut() {
            agent.update(delta_time, move_agents);
        }
    }

    /// Whether a disk of the given radius can move from `start` to `end`
    /// without crossing any processed obstacle.
    pub fn query_visibility(&self, start: Vector2, end: Vector2, radius: f32) -> bool {
        self.kd_tree
            .query_visibility(start, end, radius, &self.obstacles)
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn num_obstacle_vertices(&self) -> usize {
        self.obstacles.len()
    }

    pub fn agent(&self, index: usize) -> &Agent {
        &self.agents[index]
    }

    pub fn agent_mut(&mut self, index: usize) -> &mut Agent {
        &mut self.agents[index]
    }

    pub fn obstacle_vertex(&self, index: usize) -> &ObstacleVertex {
        &self.obstacles[index]
    }

    pub fn agent_position(&self, index: usize) -> Vector2 {
        self.agents[index].position
    }

    pub fn agent_velocity(&self, index: usize) -> Vector2 {
        self.agents[index].velocity
    }

    pub fn set_agent_position(&mut self, index: usize, position: Vector2) {
        self.agents[index].position = position;
    }

    pub fn set_agent_velocity(&mut self, index: usize, velocity: Vector2) {
        self.agents[index].velocity = velocity;
    }

    pub fn set_agent_pref_velocity(&mut self, index: usize, pref_velocity: Vector2) {
        self.agents[index].pref_velocity = pref_velocity;
    }
}
