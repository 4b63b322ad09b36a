//! # Incremental Linear Program Solver
//!
//! Given an ordered set of half-plane constraints in velocity space (see
//! [`Line`]), finds the velocity inside their intersection and the max-speed
//! disk that is closest to a preferred velocity. Three cooperating routines:
//!
//! - [`solve_along_line`]: clips one constraint line against the disk and all
//!   earlier constraints, picking the best point on the remaining interval.
//! - [`solve_2d`]: incremental scan over all constraints; re-solves on the
//!   boundary of each violated constraint. Reports the index of the first
//!   unsatisfiable constraint, or the constraint count when fully feasible.
//! - [`solve_3d`]: relaxation fallback for infeasible sets. Minimizes the
//!   maximum violation of the agent-derived constraints while keeping the
//!   obstacle-derived constraints hard.
//!
//! Infeasibility is signaled by return values and handled by escalating to
//! the next tier; it is never an error.

use crate::structs::{Line, Vector2, EPSILON};

/// Optimization objective for the solver.
///
/// `Point` minimizes the distance to the given velocity; `Direction`
/// maximizes progress along the given unit direction.
#[derive(Debug, Clone, Copy)]
pub enum Objective {
    Point(Vector2),
    Direction(Vector2),
}

/// Solves the sub-problem restricted to constraint line `index`: intersects
/// the line with the disk of the given `radius` and with every earlier
/// constraint, then picks the best point on the surviving interval.
///
/// Returns `None` when the line misses the disk entirely or the interval
/// collapses, i.e. the sub-problem is infeasible.
pub fn solve_along_line(
    lines: &[Line],
    index: usize,
    radius: f32,
    objective: &Objective,
) -> Option<Vector2> {
    let line = &lines[index];
    let dot_product = line.point.dot(line.direction);
    let discriminant = dot_product * dot_product + radius * radius - line.point.length_sq();

    if discriminant < 0.0 {
        // The max-speed disk fully cuts off this constraint line.
        return None;
    }

    let sqrt_discriminant = discriminant.sqrt();
    let mut t_left = -dot_product - sqrt_discriminant;
    let mut t_right = -dot_product + sqrt_discriminant;

    for prev in &lines[..index] {
        let denominator = line.direction.det(prev.direction);
        let numerator = prev.direction.det(line.point - prev.point);

        if denominator.abs() <= EPSILON {
            // This line and the earlier one are (almost) parallel.
            if numerator < 0.0 {
                return None;
            }
            continue;
        }

        let t = numerator / denominator;

        if denominator >= 0.0 {
            // The earlier line bounds this line on the right.
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return None;
        }
    }

    let t = match objective {
        Objective::Direction(opt_dir) => {
            if opt_dir.dot(line.direction) > 0.0 {
                t_right
            } else {
                t_left
            }
        }
        Objective::Point(opt_velocity) => line
            .direction
            .dot(*opt_velocity - line.point)
            .clamp(t_left, t_right),
    };

    Some(line.point + line.direction * t)
}

/// Incremental 2D solver. Seeds the candidate from the objective (clamped to
/// the disk in point mode, scaled to the disk boundary in direction mode) and
/// scans the constraints in order, re-solving on the boundary of each
/// violated constraint.
///
/// Returns the candidate together with the index of the first constraint
/// whose sub-problem was infeasible; an index equal to `lines.len()` means
/// every constraint is satisfied. On failure the candidate is the last one
/// that satisfied all earlier constraints.
pub fn solve_2d(lines: &[Line], radius: f32, objective: &Objective) -> (Vector2, usize) {
    let mut result = match objective {
        // The optimization direction is of unit length in this mode.
        Objective::Direction(opt_dir) => *opt_dir * radius,
        Objective::Point(opt_velocity) => {
            if opt_velocity.length_sq() > radius * radius {
                opt_velocity.normalize() * radius
            } else {
                *opt_velocity
            }
        }
    };

    for (i, line) in lines.iter().enumerate() {
        if line.violation(result) > 0.0 {
            // The candidate violates constraint i; re-solve on its boundary.
            match solve_along_line(lines, i, radius, objective) {
                Some(new_result) => result = new_result,
                None => return (result, i),
            }
        }
    }

    (result, lines.len())
}

/// Relaxation fallback for infeasible constraint sets, starting at the first
/// failing constraint `begin`.
///
/// The first `num_obstacle_lines` constraints are obstacle-derived and stay
/// hard; each later agent-derived constraint may be violated, and the solver
/// walks the violated constraints in order, each time re-optimizing along the
/// violated line's direction against the earlier constraints projected onto
/// it. The maximum violation of the processed constraints never increases.
///
/// A failing sub-solve here is a floating-point artifact: the candidate is by
/// construction already feasible for the sub-problem, so the previous
/// candidate is silently kept.
pub fn solve_3d(
    lines: &[Line],
    num_obstacle_lines: usize,
    begin: usize,
    radius: f32,
    result: &mut Vector2,
) {
    let mut distance = 0.0;

    for i in begin..lines.len() {
        let line = &lines[i];
        if line.violation(*result) <= distance {
            continue;
        }

        // Obstacle constraints are never relaxed.
        let mut proj_lines: Vec<Line> = lines[..num_obstacle_lines].to_vec();

        for other in &lines[num_obstacle_lines..i] {
            let determinant = line.direction.det(other.direction);

            let point = if determinant.abs() <= EPSILON {
                if line.direction.dot(other.direction) > 0.0 {
                    // Parallel and same direction: already subsumed by line i.
                    continue;
                }
                // Parallel and opposing: project through the midpoint.
                (line.point + other.point) * 0.5
            } else {
                let t = other.direction.det(line.point - other.point) / determinant;
                line.point + line.direction * t
            };

            proj_lines.push(Line::new(
                point,
                (other.direction - line.direction).normalize(),
            ));
        }

        let objective = Objective::Direction(line.direction.perpendicular());
        let (candidate, fail) = solve_2d(&proj_lines, radius, &objective);
        if fail >= proj_lines.len() {
            *result = candidate;
        }

        distance = line.violation(*result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(px: f32, py: f32, dx: f32, dy: f32) -> Line {
        Line::new(Vector2::new(px, py), Vector2::new(dx, dy))
    }

    // ==================== solve_along_line ====================

    #[test]
    fn test_solve_along_line_no_priors_closest_point() {
        // Horizontal line at y = 1 inside a disk of radius 2; the closest
        // point to the objective must be clamped to the disk intersection.
        let lines = vec![line(0.0, 1.0, 1.0, 0.0)];

        let inside = solve_along_line(&lines, 0, 2.0, &Objective::Point(Vector2::new(0.5, 3.0)))
            .expect("line intersects the disk");
        assert_relative_eq!(inside.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(inside.y, 1.0, epsilon = 1e-5);

        let clamped = solve_along_line(&lines, 0, 2.0, &Objective::Point(Vector2::new(3.0, 3.0)))
            .expect("line intersects the disk");
        assert_relative_eq!(clamped.x, 3.0_f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(clamped.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_solve_along_line_misses_disk() {
        let lines = vec![line(0.0, 5.0, 1.0, 0.0)];
        let result = solve_along_line(&lines, 0, 2.0, &Objective::Point(Vector2::ZERO));
        assert!(result.is_none(), "line outside the disk is infeasible");
    }

    #[test]
    fn test_solve_along_line_direction_mode_extremes() {
        let lines = vec![line(0.0, 0.0, 1.0, 0.0)];

        let right = solve_along_line(&lines, 0, 2.0, &Objective::Direction(Vector2::new(1.0, 0.0)))
            .expect("feasible");
        assert_relative_eq!(right.x, 2.0, epsilon = 1e-5);

        let left = solve_along_line(&lines, 0, 2.0, &Objective::Direction(Vector2::new(-1.0, 0.0)))
            .expect("feasible");
        assert_relative_eq!(left.x, -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_solve_along_line_clipped_by_prior() {
        // Prior constraint x >= 0.5 (direction -y through (0.5, 0)) clips
        // the target line y = 1 from the left.
        let lines = vec![line(0.5, 0.0, 0.0, -1.0), line(0.0, 1.0, 1.0, 0.0)];
        let result = solve_along_line(&lines, 1, 2.0, &Objective::Point(Vector2::new(-1.0, 1.0)))
            .expect("feasible");
        assert_relative_eq!(result.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(result.y, 1.0, epsilon = 1e-5);
    }

    // ==================== solve_2d ====================

    #[test]
    fn test_solve_2d_no_constraints_returns_seed() {
        let pref = Vector2::new(0.7, -0.2);
        let (result, fail) = solve_2d(&[], 2.0, &Objective::Point(pref));
        assert_eq!(fail, 0, "zero lines are trivially feasible");
        assert_eq!(result, pref, "unconstrained point optimum is the seed");
    }

    #[test]
    fn test_solve_2d_no_constraints_clamps_to_max_speed() {
        let pref = Vector2::new(5.0, 0.0);
        let (result, fail) = solve_2d(&[], 1.0, &Objective::Point(pref));
        assert_eq!(fail, 0);
        assert_relative_eq!(result.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_solve_2d_single_constraint() {
        // Feasible side of the constraint is y >= 1.
        let lines = vec![line(0.0, 1.0, 1.0, 0.0)];
        let (result, fail) = solve_2d(&lines, 2.0, &Objective::Point(Vector2::new(0.5, 0.0)));
        assert_eq!(fail, lines.len(), "single satisfiable constraint");
        assert_relative_eq!(result.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(result.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_solve_2d_satisfied_constraint_keeps_seed() {
        let lines = vec![line(0.0, -1.0, 1.0, 0.0)];
        let pref = Vector2::new(0.3, 0.3);
        let (result, fail) = solve_2d(&lines, 2.0, &Objective::Point(pref));
        assert_eq!(fail, lines.len());
        assert_eq!(result, pref, "non-violated constraint leaves the seed unchanged");
    }

    #[test]
    fn test_solve_2d_contradictory_parallel_fails() {
        // y >= 1 and y <= -1 have an empty intersection.
        let lines = vec![line(0.0, 1.0, 1.0, 0.0), line(0.0, -1.0, -1.0, 0.0)];
        let (_, fail) = solve_2d(&lines, 2.0, &Objective::Point(Vector2::ZERO));
        assert!(fail < lines.len(), "contradiction must report a failing index");
        assert_eq!(fail, 1, "the second constraint is the first unsatisfiable one");
    }

    // ==================== solve_3d ====================

    #[test]
    fn test_solve_3d_balances_contradictory_pair() {
        let lines = vec![line(0.0, 1.0, 1.0, 0.0), line(0.0, -1.0, -1.0, 0.0)];
        let (mut result, fail) = solve_2d(&lines, 2.0, &Objective::Point(Vector2::ZERO));
        assert_eq!(fail, 1);

        solve_3d(&lines, 0, fail, 2.0, &mut result);

        // The max violation of { 1 - y, 1 + y } is minimized at y = 0, where
        // both constraints are violated by exactly 1.
        assert_relative_eq!(result.y, 0.0, epsilon = 1e-4);
        let v0 = lines[0].violation(result);
        let v1 = lines[1].violation(result);
        assert_relative_eq!(v0, v1, epsilon = 1e-4);
        assert!(v0 <= 1.0 + 1e-4, "violation must not exceed the optimum");
    }

    #[test]
    fn test_solve_3d_keeps_hard_obstacle_constraint() {
        // First line is obstacle-derived (hard), the next two contradict.
        let lines = vec![
            line(-0.5, 0.0, 0.0, 1.0), // x <= -0.5, hard
            line(0.0, 1.0, 1.0, 0.0),  // y >= 1
            line(0.0, -1.0, -1.0, 0.0), // y <= -1
        ];
        let (mut result, fail) = solve_2d(&lines, 2.0, &Objective::Point(Vector2::ZERO));
        assert!(fail < lines.len());

        solve_3d(&lines, 1, fail, 2.0, &mut result);

        assert!(
            lines[0].violation(result) <= 1e-4,
            "obstacle constraint stays satisfied, got violation {}",
            lines[0].violation(result)
        );
    }
}
