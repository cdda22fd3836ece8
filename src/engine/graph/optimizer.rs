//! Built-in pose-graph solver using Levenberg-Marquardt.
//!
//! Minimizes the weighted constraint error
//!
//! ```text
//! F(x) = Σ e(xi, xj, zij)^T · Ωij · e(xi, xj, zij)
//! ```
//!
//! where the residual is the SE(3) tangent vector of `zij⁻¹ · xi⁻¹ · xj` and
//! `Ωij` is the information matrix (inverse covariance). Each iteration
//! builds the dense normal equations `H·Δx = -b` with numerically
//! differentiated Jacobians, applies adaptive damping, and solves by
//! Cholesky decomposition. Gauge freedom is removed by the pinned node(s).

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Matrix6, Vector6};

use super::solver::Solver;
use crate::core::math::{apply_tangent, orthogonalize, tangent_of};
use crate::core::types::{Covariance, NodeId, Transform};

/// Configuration for the built-in solver.
#[derive(Debug, Clone)]
pub struct GraphOptimizerConfig {
    /// Maximum number of iterations per `compute` call.
    pub max_iterations: u32,

    /// Convergence threshold on the relative error change.
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping factor.
    pub damping_factor: f64,

    /// Damping ceiling; exceeding it counts as divergence.
    pub max_damping: f64,
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-6,
            damping_factor: 1e-3,
            max_damping: 1e10,
        }
    }
}

/// Summary of the most recent `compute` call.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationRun {
    /// Iterations performed.
    pub iterations: u32,

    /// Chi-squared error before the first iteration.
    pub initial_error: f64,

    /// Chi-squared error at termination.
    pub final_error: f64,

    /// Whether the run converged.
    pub converged: bool,
}

struct SolverNode {
    id: NodeId,
    pose: Transform,
    fixed: bool,
}

struct SolverConstraint {
    source: usize,
    target: usize,
    measurement: Transform,
    information: Matrix6<f64>,
}

/// Levenberg-Marquardt pose-graph solver.
#[derive(Default)]
pub struct GraphOptimizer {
    config: GraphOptimizerConfig,
    nodes: Vec<SolverNode>,
    index: HashMap<NodeId, usize>,
    constraints: Vec<SolverConstraint>,
    last_run: Option<OptimizationRun>,
}

impl GraphOptimizer {
    /// Create a solver with the given configuration.
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            constraints: Vec::new(),
            last_run: None,
        }
    }

    /// Summary of the most recent `compute` call, if any.
    pub fn last_run(&self) -> Option<&OptimizationRun> {
        self.last_run.as_ref()
    }

    /// Residual of one constraint in SE(3) tangent coordinates.
    fn residual(xi: &Transform, xj: &Transform, measurement: &Transform) -> Vector6<f64> {
        tangent_of(&(measurement.inverse() * (xi.inverse() * xj)))
    }

    fn chi_squared(&self) -> f64 {
        let mut chi2 = 0.0;
        for c in &self.constraints {
            let e = Self::residual(
                &self.nodes[c.source].pose,
                &self.nodes[c.target].pose,
                &c.measurement,
            );
            chi2 += (e.transpose() * c.information * e)[0];
        }
        chi2
    }

    /// Numeric Jacobians of the residual w.r.t. both endpoint poses.
    fn jacobians(
        xi: &Transform,
        xj: &Transform,
        measurement: &Transform,
    ) -> (Matrix6<f64>, Matrix6<f64>) {
        const EPS: f64 = 1e-6;

        let mut ji = Matrix6::zeros();
        let mut jj = Matrix6::zeros();

        for k in 0..6 {
            let mut delta = Vector6::zeros();
            delta[k] = EPS;

            let plus = Self::residual(&apply_tangent(xi, &delta), xj, measurement);
            delta[k] = -EPS;
            let minus = Self::residual(&apply_tangent(xi, &delta), xj, measurement);
            ji.set_column(k, &((plus - minus) / (2.0 * EPS)));

            delta[k] = EPS;
            let plus = Self::residual(xi, &apply_tangent(xj, &delta), measurement);
            delta[k] = -EPS;
            let minus = Self::residual(xi, &apply_tangent(xj, &delta), measurement);
            jj.set_column(k, &((plus - minus) / (2.0 * EPS)));
        }

        (ji, jj)
    }

    /// Build the normal equations `H` and `b = Σ Jᵀ·Ω·e`.
    fn build_linear_system(&self, dim: usize) -> (DMatrix<f64>, DVector<f64>) {
        let mut h = DMatrix::zeros(dim, dim);
        let mut b = DVector::zeros(dim);

        for c in &self.constraints {
            let xi = &self.nodes[c.source].pose;
            let xj = &self.nodes[c.target].pose;

            let e = Self::residual(xi, xj, &c.measurement);
            let (ji, jj) = Self::jacobians(xi, xj, &c.measurement);

            let w_ji = c.information * ji;
            let w_jj = c.information * jj;

            let h_ii = ji.transpose() * w_ji;
            let h_ij = ji.transpose() * w_jj;
            let h_jj = jj.transpose() * w_jj;

            let base_i = c.source * 6;
            let base_j = c.target * 6;

            for r in 0..6 {
                for col in 0..6 {
                    h[(base_i + r, base_i + col)] += h_ii[(r, col)];
                    h[(base_i + r, base_j + col)] += h_ij[(r, col)];
                    h[(base_j + r, base_i + col)] += h_ij[(col, r)];
                    h[(base_j + r, base_j + col)] += h_jj[(r, col)];
                }
            }

            let b_i = ji.transpose() * c.information * e;
            let b_j = jj.transpose() * c.information * e;
            for r in 0..6 {
                b[base_i + r] += b_i[r];
                b[base_j + r] += b_j[r];
            }
        }

        // Pinned nodes anchor the gauge.
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.fixed {
                for k in 0..6 {
                    h[(idx * 6 + k, idx * 6 + k)] += 1e12;
                }
            }
        }

        (h, b)
    }

    fn finish(
        &mut self,
        iterations: u32,
        initial_error: f64,
        final_error: f64,
        converged: bool,
    ) -> bool {
        self.last_run = Some(OptimizationRun {
            iterations,
            initial_error,
            final_error,
            converged,
        });
        converged
    }

    fn apply_update(&mut self, dx: &DVector<f64>) {
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if node.fixed {
                continue;
            }
            let delta = Vector6::from_iterator(dx.rows(idx * 6, 6).iter().copied());
            node.pose = orthogonalize(&apply_tangent(&node.pose, &delta));
        }
    }
}

impl Solver for GraphOptimizer {
    fn add_node(&mut self, id: NodeId, pose: Transform) {
        if self.index.contains_key(&id) {
            log::warn!("Solver already knows node {}, ignoring", id);
            return;
        }
        self.index.insert(id, self.nodes.len());
        self.nodes.push(SolverNode {
            id,
            pose,
            fixed: false,
        });
    }

    fn add_constraint(
        &mut self,
        source: NodeId,
        target: NodeId,
        transform: &Transform,
        covariance: &Covariance,
    ) {
        let (source, target) = match (self.index.get(&source), self.index.get(&target)) {
            (Some(&s), Some(&t)) => (s, t),
            _ => {
                log::warn!(
                    "Constraint {} -> {} references unknown node, ignoring",
                    source,
                    target
                );
                return;
            }
        };

        let information = match covariance.try_inverse() {
            Some(inv) => inv,
            None => {
                log::warn!("Constraint covariance is singular, falling back to identity weight");
                Matrix6::identity()
            }
        };

        self.constraints.push(SolverConstraint {
            source,
            target,
            measurement: *transform,
            information,
        });
    }

    fn set_fixed(&mut self, id: NodeId) {
        match self.index.get(&id) {
            Some(&idx) => self.nodes[idx].fixed = true,
            None => log::warn!("Cannot pin unknown node {}", id),
        }
    }

    fn compute(&mut self) -> bool {
        if self.constraints.is_empty() {
            self.last_run = Some(OptimizationRun {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
                converged: true,
            });
            return true;
        }

        let dim = self.nodes.len() * 6;
        let initial_error = self.chi_squared();
        let mut current_error = initial_error;
        let mut lambda = self.config.damping_factor;
        let mut iterations = 0u32;

        for _ in 0..self.config.max_iterations {
            iterations += 1;

            let (h, b) = self.build_linear_system(dim);

            let mut h_damped = h;
            for i in 0..dim {
                let d = h_damped[(i, i)];
                h_damped[(i, i)] = d + lambda * d.max(1.0);
            }

            let dx = match h_damped.cholesky() {
                Some(chol) => -chol.solve(&b),
                None => return self.finish(iterations, initial_error, current_error, false),
            };

            let snapshot: Vec<Transform> = self.nodes.iter().map(|n| n.pose).collect();
            self.apply_update(&dx);
            let new_error = self.chi_squared();

            if new_error > current_error * 1.1 {
                // Step made things worse: revert and raise damping.
                for (node, pose) in self.nodes.iter_mut().zip(snapshot) {
                    node.pose = pose;
                }
                lambda *= 10.0;
                if lambda > self.config.max_damping {
                    return self.finish(iterations, initial_error, current_error, false);
                }
                continue;
            }

            lambda = (lambda * 0.1).max(1e-10);

            let relative_change = (current_error - new_error).abs() / current_error.max(1e-10);
            current_error = new_error;

            if relative_change < self.config.convergence_threshold {
                return self.finish(iterations, initial_error, current_error, true);
            }
        }

        self.finish(iterations, initial_error, current_error, false)
    }

    fn corrections(&self) -> Vec<(NodeId, Transform)> {
        self.nodes.iter().map(|n| (n.id, n.pose)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Translation3};

    fn translation(x: f64, y: f64, z: f64) -> Transform {
        Transform::from_parts(Translation3::new(x, y, z), Rotation3::identity())
    }

    #[test]
    fn test_empty_solver_computes() {
        let mut solver = GraphOptimizer::new(GraphOptimizerConfig::default());
        assert!(solver.compute());
        assert!(solver.corrections().is_empty());
    }

    #[test]
    fn test_consistent_chain_stays_put() {
        let mut solver = GraphOptimizer::new(GraphOptimizerConfig::default());
        solver.add_node(0, translation(0.0, 0.0, 0.0));
        solver.add_node(1, translation(1.0, 0.0, 0.0));
        solver.add_node(2, translation(2.0, 0.0, 0.0));
        solver.set_fixed(0);

        let step = translation(1.0, 0.0, 0.0);
        let cov = Covariance::identity();
        solver.add_constraint(0, 1, &step, &cov);
        solver.add_constraint(1, 2, &step, &cov);

        assert!(solver.compute());
        let run = solver.last_run().unwrap();
        assert!(run.final_error < 1e-9, "error {}", run.final_error);

        let corrections = solver.corrections();
        let (_, pose2) = corrections.iter().find(|(id, _)| *id == 2).unwrap();
        assert!((pose2.translation.vector.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_loop_closure_reduces_error() {
        let mut solver = GraphOptimizer::new(GraphOptimizerConfig::default());

        // Square trajectory whose last node has drifted.
        solver.add_node(0, translation(0.0, 0.0, 0.0));
        solver.add_node(1, translation(1.0, 0.0, 0.0));
        solver.add_node(2, translation(1.0, 1.0, 0.0));
        solver.add_node(3, translation(0.15, 1.1, 0.0));
        solver.set_fixed(0);

        let cov = Covariance::identity();
        solver.add_constraint(0, 1, &translation(1.0, 0.0, 0.0), &cov);
        solver.add_constraint(1, 2, &translation(0.0, 1.0, 0.0), &cov);
        solver.add_constraint(2, 3, &translation(-1.0, 0.0, 0.0), &cov);
        solver.add_constraint(3, 0, &translation(0.0, -1.0, 0.0), &cov);

        assert!(solver.compute());
        let run = solver.last_run().unwrap();
        assert!(run.final_error < run.initial_error);
        assert!(run.initial_error > 1e-3);

        // The drifted node is pulled back toward the consistent corner.
        let corrections = solver.corrections();
        let (_, pose3) = corrections.iter().find(|(id, _)| *id == 3).unwrap();
        assert!((pose3.translation.vector.x - 0.0).abs() < 0.1);
        assert!((pose3.translation.vector.y - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_pinned_node_never_moves() {
        let mut solver = GraphOptimizer::new(GraphOptimizerConfig::default());
        solver.add_node(0, translation(0.0, 0.0, 0.0));
        solver.add_node(1, translation(0.8, 0.1, 0.0));
        solver.set_fixed(0);

        solver.add_constraint(0, 1, &translation(1.0, 0.0, 0.0), &Covariance::identity());

        assert!(solver.compute());
        let corrections = solver.corrections();
        let (_, anchor) = corrections.iter().find(|(id, _)| *id == 0).unwrap();
        assert!(anchor.translation.vector.norm() < 1e-9);
    }

    #[test]
    fn test_constraint_with_unknown_node_is_ignored() {
        let mut solver = GraphOptimizer::new(GraphOptimizerConfig::default());
        solver.add_node(0, Transform::identity());
        solver.add_constraint(0, 99, &Transform::identity(), &Covariance::identity());

        assert!(solver.compute());
    }
}
