//! # Spatial Index
//!
//! Two structures behind one type: a balanced k-d tree over agent positions,
//! rebuilt from snapshots every tick, and a BSP tree over directed obstacle
//! edges, built once after the obstacle set changes. Neighbor queries descend
//! the nearer child first so the shrinking query range can prune the other
//! branch.

use crate::agent::{Agent, AgentSnapshot};
use crate::structs::{left_of, ObstacleVertex, Vector2, EPSILON};

const MAX_LEAF_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct AgentTreeNode {
    begin: usize,
    end: usize,
    left: usize,
    right: usize,
    min_x: f32,
    max_x: f32,
    min_y: f32,
    max_y: f32,
}

#[derive(Debug)]
struct ObstacleTreeNode {
    /// Arena index of the first vertex of this node's edge.
    vertex: usize,
    left: Option<Box<ObstacleTreeNode>>,
    right: Option<Box<ObstacleTreeNode>>,
}

#[derive(Debug, Default)]
pub struct KdTree {
    snapshots: Vec<AgentSnapshot>,
    agent_tree: Vec<AgentTreeNode>,
    obstacle_tree: Option<Box<ObstacleTreeNode>>,
}

impl KdTree {
    pub fn new() -> Self {
        KdTree::default()
    }

    /// Rebuilds the agent tree from per-tick snapshots of the given agents.
    /// Internal nodes split the longer axis of their bounding box at its
    /// midpoint; a flat array of `2n - 1` nodes holds the whole tree.
    pub fn build_agent_tree(&mut self, agents: &[Agent]) {
        self.snapshots = agents.iter().map(Agent::snapshot).collect();
        let n = self.snapshots.len();
        self.agent_tree = vec![AgentTreeNode::default(); if n > 0 { 2 * n - 1 } else { 0 }];
        if n > 0 {
            self.build_agent_tree_recursive(0, n, 0);
        }
    }

    fn build_agent_tree_recursive(&mut self, begin: usize, end: usize, node: usize) {
        let mut min_x = self.snapshots[begin].position.x;
        let mut max_x = min_x;
        let mut min_y = self.snapshots[begin].position.y;
        let mut max_y = min_y;

        for snapshot in &self.snapshots[begin + 1..end] {
            min_x = min_x.min(snapshot.position.x);
            max_x = max_x.max(snapshot.position.x);
            min_y = min_y.min(snapshot.position.y);
            max_y = max_y.max(snapshot.position.y);
        }

        self.agent_tree[node] = AgentTreeNode {
            begin,
            end,
            left: 0,
            right: 0,
            min_x,
            max_x,
            min_y,
            max_y,
        };

        if end - begin <= MAX_LEAF_SIZE {
            return;
        }

        let is_vertical = max_x - min_x > max_y - min_y;
        let split_value = if is_vertical {
            0.5 * (max_x + min_x)
        } else {
            0.5 * (max_y + min_y)
        };
        let coord = |s: &AgentSnapshot| if is_vertical { s.position.x } else { s.position.y };

        // In-place partition around the split value.
        let mut left = begin;
        let mut right = end;
        while left < right {
            while left < right && coord(&self.snapshots[left]) < split_value {
                left += 1;
            }
            while right > left && coord(&self.snapshots[right - 1]) >= split_value {
                right -= 1;
            }
            if left < right {
                self.snapshots.swap(left, right - 1);
                left += 1;
                right -= 1;
            }
        }

        if left == begin {
            // Degenerate split (all points on one side): force progress.
            left += 1;
        }

        let left_node = node + 1;
        let right_node = node + 2 * (left - begin);
        self.agent_tree[node].left = left_node;
        self.agent_tree[node].right = right_node;

        self.build_agent_tree_recursive(begin, left, left_node);
        self.build_agent_tree_recursive(left, end, right_node);
    }

    /// Feeds every snapshot within `range_sq` of `agent` to its bounded
    /// neighbor buffer, honoring the range shrink reported by the buffer.
    pub fn query_agent_neighbors(&self, agent: &mut Agent, range_sq: f32) {
        if !self.agent_tree.is_empty() {
            self.query_agent_tree_recursive(agent, range_sq, 0);
        }
    }

    fn query_agent_tree_recursive(&self, agent: &mut Agent, mut range_sq: f32, node: usize) -> f32 {
        let tree_node = self.agent_tree[node];

        if tree_node.end - tree_node.begin <= MAX_LEAF_SIZE {
            for snapshot in &self.snapshots[tree_node.begin..tree_node.end] {
                range_sq = agent.insert_agent_neighbor(snapshot, range_sq);
            }
            return range_sq;
        }

        let dist_sq_to = |n: &AgentTreeNode| {
            let dx = (n.min_x - agent.position.x).max(0.0) + (agent.position.x - n.max_x).max(0.0);
            let dy = (n.min_y - agent.position.y).max(0.0) + (agent.position.y - n.max_y).max(0.0);
            dx * dx + dy * dy
        };
        let dist_sq_left = dist_sq_to(&self.agent_tree[tree_node.left]);
        let dist_sq_right = dist_sq_to(&self.agent_tree[tree_node.right]);

        // Nearer child first; the range may shrink enough to skip the other.
        let (near_dist, near, far_dist, far) = if dist_sq_left < dist_sq_right {
            (dist_sq_left, tree_node.left, dist_sq_right, tree_node.right)
        } else {
            (dist_sq_right, tree_node.right, dist_sq_left, tree_node.left)
        };

        if near_dist < range_sq {
            range_sq = self.query_agent_tree_recursive(agent, range_sq, near);
            if far_dist < range_sq {
                range_sq = self.query_agent_tree_recursive(agent, range_sq, far);
            }
        }

        range_sq
    }

    /// Rebuilds the obstacle BSP tree. Edges straddling a split line are cut
    /// in two; the split vertex is appended to the arena, marked convex, and
    /// linked in place of the original edge.
    pub fn build_obstacle_tree(&mut self, obstacles: &mut Vec<ObstacleVertex>) {
        let indices: Vec<usize> = (0..obstacles.len()).collect();
        self.obstacle_tree = Self::build_obstacle_tree_recursive(obstacles, indices);
    }

    fn build_obstacle_tree_recursive(
        obstacles: &mut Vec<ObstacleVertex>,
        indices: Vec<usize>,
    ) -> Option<Box<ObstacleTreeNode>> {
        if indices.is_empty() {
            return None;
        }

        let count = indices.len();

        // Pick the edge whose line splits the remaining edges most evenly,
        // preferring splits that cut fewer edges in two.
        let mut optimal_split = 0;
        let mut min_left = count;
        let mut min_right = count;

        for (i_pos, &i_idx) in indices.iter().enumerate() {
            let Some(i_next) = obstacles[i_idx].next else {
                continue;
            };
            let pi1 = obstacles[i_idx].point;
            let pi2 = obstacles[i_next].point;

            let mut left_size = 0usize;
            let mut right_size = 0usize;

            for (j_pos, &j_idx) in indices.iter().enumerate() {
                if i_pos == j_pos {
                    continue;
                }
                let Some(j_next) = obstacles[j_idx].next else {
                    continue;
                };
                let j1_left = left_of(pi1, pi2, obstacles[j_idx].point);
                let j2_left = left_of(pi1, pi2, obstacles[j_next].point);

                if j1_left >= -EPSILON && j2_left >= -EPSILON {
                    left_size += 1;
                } else if j1_left <= EPSILON && j2_left <= EPSILON {
                    right_size += 1;
                } else {
                    left_size += 1;
                    right_size += 1;
                }

                if (left_size.max(right_size), left_size.min(right_size))
                    >= (min_left.max(min_right), min_left.min(min_right))
                {
                    break;
                }
            }

            if (left_size.max(right_size), left_size.min(right_size))
                < (min_left.max(min_right), min_left.min(min_right))
            {
                min_left = left_size;
                min_right = right_size;
                optimal_split = i_pos;
            }
        }

        let i_idx = indices[optimal_split];
        let mut left_indices = Vec::with_capacity(min_left);
        let mut right_indices = Vec::with_capacity(min_right);

        if let Some(i_next) = obstacles[i_idx].next {
            let pi1 = obstacles[i_idx].point;
            let pi2 = obstacles[i_next].point;

            for (j_pos, &j_idx) in indices.iter().enumerate() {
                if j_pos == optimal_split {
                    continue;
                }
                let Some(j_next) = obstacles[j_idx].next else {
                    continue;
                };
                let pj1 = obstacles[j_idx].point;
                let pj2 = obstacles[j_next].point;
                let j1_left = left_of(pi1, pi2, pj1);
                let j2_left = left_of(pi1, pi2, pj2);

                if j1_left >= -EPSILON && j2_left >= -EPSILON {
                    left_indices.push(j_idx);
                } else if j1_left <= EPSILON && j2_left <= EPSILON {
                    right_indices.push(j_idx);
                } else {
                    // Edge j straddles the split line; cut it at the crossing.
                    let t = (pi2 - pi1).det(pj1 - pi1) / (pi2 - pi1).det(pj1 - pj2);
                    let split_point = pj1 + (pj2 - pj1) * t;

                    let new_idx = obstacles.len();
                    let unit_dir = obstacles[j_idx].unit_dir;
                    obstacles.push(ObstacleVertex {
                        point: split_point,
                        unit_dir,
                        is_convex: true,
                        prev: Some(j_idx),
                        next: Some(j_next),
                        id: new_idx,
                    });
                    obstacles[j_idx].next = Some(new_idx);
                    obstacles[j_next].prev = Some(new_idx);

                    if j1_left > 0.0 {
                        left_indices.push(j_idx);
                        right_indices.push(new_idx);
                    } else {
                        right_indices.push(j_idx);
                        left_indices.push(new_idx);
                    }
                }
            }
        }

        Some(Box::new(ObstacleTreeNode {
            vertex: i_idx,
            left: Self::build_obstacle_tree_recursive(obstacles, left_indices),
            right: Self::build_obstacle_tree_recursive(obstacles, right_indices),
        }))
    }

    /// Feeds every obstacle edge within `range_sq` whose right side faces the
    /// agent to its obstacle-neighbor buffer.
    pub fn query_obstacle_neighbors(
        &self,
        agent: &mut Agent,
        obstacles: &[ObstacleVertex],
        range_sq: f32,
    ) {
        Self::query_obstacle_tree_recursive(agent, obstacles, range_sq, &self.obstacle_tree);
    }

    fn query_obstacle_tree_recursive(
        agent: &mut Agent,
        obstacles: &[ObstacleVertex],
        range_sq: f32,
        node: &Option<Box<ObstacleTreeNode>>,
    ) {
        let Some(node) = node else {
            return;
        };
        let i1 = node.vertex;
        let Some(i2) = obstacles[i1].next else {
            return;
        };
        let p1 = obstacles[i1].point;
        let p2 = obstacles[i2].point;

        let agent_left_of_line = left_of(p1, p2, agent.position);
        let (near, far) = if agent_left_of_line >= 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        Self::query_obstacle_tree_recursive(agent, obstacles, range_sq, near);

        let dist_sq_line = agent_left_of_line * agent_left_of_line / (p2 - p1).length_sq();
        if dist_sq_line < range_sq {
            if agent_left_of_line < 0.0 {
                // Only edges whose right side faces the agent constrain it.
                agent.insert_obstacle_neighbor(i1, obstacles, range_sq);
            }
            Self::query_obstacle_tree_recursive(agent, obstacles, range_sq, far);
        }
    }

    /// Whether a disk of the given radius can travel from `start` to `end`
    /// without crossing an obstacle edge.
    pub fn query_visibility(
        &self,
        start: Vector2,
        end: Vector2,
        radius: f32,
        obstacles: &[ObstacleVertex],
    ) -> bool {
        Self::query_visibility_recursive(start, end, radius, obstacles, &self.obstacle_tree)
    }

    fn query_visibility_recursive(
        q1: Vector2,
        q2: Vector2,
        radius: f32,
        obstacles: &[ObstacleVertex],
        node: &Option<Box<ObstacleTreeNode>>,
    ) -> bool {
        let Some(node) = node else {
            return true;
        };
        let i1 = node.vertex;
        let Some(i2) = obstacles[i1].next else {
            return false;
        };
        let p1 = obstacles[i1].point;
        let p2 = obstacles[i2].point;

        let q1_left = left_of(p1, p2, q1);
        let q2_left = left_of(p1, p2, q2);
        let inv_length = 1.0 / (p2 - p1).length_sq();
        let radius_sq = radius * radius;

        if q1_left >= 0.0 && q2_left >= 0.0 {
            Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.left)
                && ((q1_left * q1_left * inv_length >= radius_sq
                    && q2_left * q2_left * inv_length >= radius_sq)
                    || Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.right))
        } else if q1_left <= 0.0 && q2_left <= 0.0 {
            Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.right)
                && ((q1_left * q1_left * inv_length >= radius_sq
                    && q2_left * q2_left * inv_length >= radius_sq)
                    || Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.left))
        } else if q1_left >= 0.0 && q2_left <= 0.0 {
            // The segment crosses from left to right: visible through the
            // edge's line only if both subtrees agree.
            Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.left)
                && Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.right)
        } else {
            let p1_left = left_of(q1, q2, p1);
            let p2_left = left_of(q1, q2, p2);
            let inv_length_q = 1.0 / (q2 - q1).length_sq();

            p1_left * p2_left >= 0.0
                && p1_left * p1_left * inv_length_q > radius_sq
                && p2_left * p2_left * inv_length_q > radius_sq
                && Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.left)
                && Self::query_visibility_recursive(q1, q2, radius, obstacles, &node.right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_agent(id: usize, x: f32, y: f32) -> Agent {
        Agent::new(
            id,
            Vector2::new(x, y),
            Vector2::ZERO,
            4.0,
            5,
            5.0,
            2.0,
            0.3,
            2.0,
        )
    }

    /// Deterministic scatter without ties, enough agents to force inner nodes.
    fn scattered_agents(count: usize) -> Vec<Agent> {
        let mut state: u32 = 12345;
        let mut next = || {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as f32 / 65536.0
        };
        (0..count)
            .map(|id| make_agent(id, next() * 20.0 - 10.0, next() * 20.0 - 10.0))
            .collect()
    }

    #[test]
    fn test_agent_tree_matches_brute_force() {
        let agents = scattered_agents(40);
        let mut tree = KdTree::new();
        tree.build_agent_tree(&agents);

        for probe in [0usize, 13, 39] {
            let mut agent = agents[probe].clone();
            let range_sq = agent.neighbor_dist * agent.neighbor_dist;
            tree.query_agent_neighbors(&mut agent, range_sq);

            let mut expected: Vec<(f32, usize)> = agents
                .iter()
                .filter(|a| a.id != probe)
                .map(|a| ((a.position - agent.position).length_sq(), a.id))
                .filter(|&(d, _)| d < range_sq)
                .collect();
            expected.sort_by(|a, b| a.0.total_cmp(&b.0));
            expected.truncate(agent.max_neighbors);

            let got: Vec<usize> = agent.agent_neighbors.iter().map(|(_, s)| s.id).collect();
            let want: Vec<usize> = expected.iter().map(|&(_, id)| id).collect();
            assert_eq!(got, want, "tree query disagrees with brute force for agent {probe}");
        }
    }

    #[test]
    fn test_agent_tree_empty_and_single() {
        let mut tree = KdTree::new();
        tree.build_agent_tree(&[]);
        let mut lonely = make_agent(0, 0.0, 0.0);
        tree.query_agent_neighbors(&mut lonely, 100.0);
        assert!(lonely.agent_neighbors.is_empty());

        let agents = vec![make_agent(0, 0.0, 0.0)];
        tree.build_agent_tree(&agents);
        let mut agent = agents[0].clone();
        tree.query_agent_neighbors(&mut agent, 100.0);
        assert!(agent.agent_neighbors.is_empty(), "an agent never neighbors itself");
    }

    fn segment_arena(a: Vector2, b: Vector2) -> Vec<ObstacleVertex> {
        vec![
            ObstacleVertex {
                point: a,
                unit_dir: (b - a).normalize(),
                is_convex: true,
                prev: Some(1),
                next: Some(1),
                id: 0,
            },
            ObstacleVertex {
                point: b,
                unit_dir: (a - b).normalize(),
                is_convex: true,
                prev: Some(0),
                next: Some(0),
                id: 0,
            },
        ]
    }

    #[test]
    fn test_obstacle_query_only_facing_edges() {
        let mut obstacles = segment_arena(Vector2::new(-2.0, 1.0), Vector2::new(2.0, 1.0));
        let mut tree = KdTree::new();
        tree.build_obstacle_tree(&mut obstacles);

        // Agent below the wall: only the forward edge (index 0) faces it.
        let mut below = make_agent(0, 0.0, 0.0);
        tree.query_obstacle_neighbors(&mut below, &obstacles, 100.0);
        let edges: Vec<usize> = below.obstacle_neighbors.iter().map(|&(_, v)| v).collect();
        assert_eq!(edges, vec![0]);

        // Agent above the wall: only the reversed edge faces it.
        let mut above = make_agent(1, 0.0, 2.0);
        tree.query_obstacle_neighbors(&mut above, &obstacles, 100.0);
        let edges: Vec<usize> = above.obstacle_neighbors.iter().map(|&(_, v)| v).collect();
        assert_eq!(edges, vec![1]);
    }

    #[test]
    fn test_obstacle_query_respects_range() {
        let mut obstacles = segment_arena(Vector2::new(-2.0, 10.0), Vector2::new(2.0, 10.0));
        let mut tree = KdTree::new();
        tree.build_obstacle_tree(&mut obstacles);

        let mut agent = make_agent(0, 0.0, 0.0);
        tree.query_obstacle_neighbors(&mut agent, &obstacles, 4.0);
        assert!(agent.obstacle_neighbors.is_empty(), "wall is outside the query range");
    }

    #[test]
    fn test_query_visibility_blocked_and_clear() {
        let mut obstacles = segment_arena(Vector2::new(-1.0, 0.0), Vector2::new(1.0, 0.0));
        let mut tree = KdTree::new();
        tree.build_obstacle_tree(&mut obstacles);

        let below = Vector2::new(0.0, -2.0);
        let above = Vector2::new(0.0, 2.0);
        assert!(
            !tree.query_visibility(below, above, 0.0, &obstacles),
            "segment crossing the wall is blocked"
        );

        let side_a = Vector2::new(3.0, -2.0);
        let side_b = Vector2::new(3.0, 2.0);
        assert!(
            tree.query_visibility(side_a, side_b, 0.0, &obstacles),
            "segment passing beside the wall is clear"
        );

        // With a fat disk the side passage closes.
        assert!(
            !tree.query_visibility(side_a, side_b, 2.5, &obstacles),
            "wide disk no longer fits past the wall"
        );
    }

    #[test]
    fn test_obstacle_tree_empty() {
        let mut obstacles = Vec::new();
        let mut tree = KdTree::new();
        tree.build_obstacle_tree(&mut obstacles);

        let mut agent = make_agent(0, 0.0, 0.0);
        tree.query_obstacle_neighbors(&mut agent, &obstacles, 100.0);
        assert!(agent.obstacle_neighbors.is_empty());
        assert!(tree.query_visibility(Vector2::ZERO, Vector2::new(1.0, 1.0), 0.5, &obstacles));
    }
}
