//! Pluggable non-linear solver interface.

use crate::core::types::{Covariance, NodeId, Transform};

/// Back-end interface for pose-graph optimization.
//
// The mapper feeds nodes and constraints incrementally as they enter the
// graph, pins exactly one gauge-anchor node, and reads corrections back
// after a successful `compute`.
pub trait Solver {
    /// Register a node with its initial pose estimate.
    fn add_node(&mut self, id: NodeId, pose: Transform);

    /// Register a relative-pose constraint between two known nodes.
    fn add_constraint(
        &mut self,
        source: NodeId,
        target: NodeId,
        transform: &Transform,
        covariance: &Covariance,
    );

    /// Pin a node, fixing the gauge freedom of the optimization.
    fn set_fixed(&mut self, id: NodeId);

    /// Run the optimization.
    ///
    /// Returns false on divergence or solve failure; the solver's internal
    /// estimates must then remain at the last accepted state.
    fn compute(&mut self) -> bool;

    /// Optimized pose per node id, valid after a successful [`compute`](Solver::compute).
    fn corrections(&self) -> Vec<(NodeId, Transform)>;
}
