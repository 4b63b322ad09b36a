//! # Avoidance Core
//!
//! A multi-agent local collision avoidance library built on ORCA (Optimal
//! Reciprocal Collision Avoidance). Agents move through a shared 2D world
//! with static polygonal obstacles; every simulation step each agent turns
//! its nearby obstacles and agents into half-plane constraints in velocity
//! space and picks the feasible velocity closest to its preferred one.
//!
//! ## Modules
//!
//! - **structs**: vectors, constraint lines, obstacle vertices, defaults.
//! - **linear_program**: the three-tier incremental solver over constraint
//!   lines, with a relaxation fallback for infeasible crowds.
//! - **agent**: neighbor collection and the ORCA constraint construction.
//! - **kd_tree**: spatial index over agents and obstacle edges.
//! - **simulator**: owning front-end driving the two-phase step.
//!
//! ## Usage
//!
//! ```no_run
//! use avoidance_core::{AgentDefaults, Simulator, Vector2};
//!
//! let mut sim = Simulator::new(AgentDefaults {
//!     neighbor_dist: 15.0,
//!     max_neighbors: 10,
//!     time_horizon: 5.0,
//!     time_horizon_obst: 2.0,
//!     radius: 0.5,
//!     max_speed: 2.0,
//! });
//!
//! let a = sim.add_agent(Vector2::new(-5.0, 0.0));
//! let b = sim.add_agent(Vector2::new(5.0, 0.0));
//! sim.add_obstacle(&[Vector2::new(-1.0, 2.0), Vector2::new(1.0, 2.0)]);
//! sim.process_obstacles();
//!
//! for _ in 0..100 {
//!     sim.set_agent_pref_velocity(a, Vector2::new(1.0, 0.0));
//!     sim.set_agent_pref_velocity(b, Vector2::new(-1.0, 0.0));
//!     sim.do_step(0.1, true);
//! }
//! ```

pub mod agent;
pub mod kd_tree;
pub mod linear_program;
pub mod simulator;
pub mod structs;

pub use agent::{Agent, AgentSnapshot};
pub use kd_tree::KdTree;
pub use linear_program::Objective;
pub use simulator::Simulator;
pub use structs::{AgentDefaults, Line, ObstacleVertex, Vector2};
