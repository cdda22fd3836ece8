//! Pose graph data structure.
//!
//! Nodes are historical robot poses tagged with the measurement captured
//! there; edges are relative-pose constraints with covariance. The graph
//! owns both by value; everything else refers to nodes by id.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{Covariance, Measurement, NodeId, Transform};
use crate::error::{Error, Result};

/// Category of a pose-graph constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeLabel {
    /// Sequential registration constraint between consecutive nodes.
    Sequential,
    /// Constraint derived from raw odometry.
    Odometry,
    /// Non-sequential registration constraint (loop closure).
    LoopClosure,
}

impl EdgeLabel {
    /// Short tag used in logs and graph exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeLabel::Sequential => "seq",
            EdgeLabel::Odometry => "odom",
            EdgeLabel::LoopClosure => "match",
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the pose graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique node identifier, assigned by the graph.
    pub id: NodeId,

    /// The measurement captured at this pose; owned for the node's lifetime.
    pub measurement: Measurement,

    /// Raw odometric pose at capture time.
    pub odometric_pose: Transform,

    /// Current best estimate of the pose in the map frame.
    ///
    /// Mutated only by initial insertion and solver write-back.
    pub corrected_pose: Transform,
}

impl Node {
    /// Name of the robot that captured this node's measurement.
    pub fn robot_name(&self) -> &str {
        &self.measurement.robot_name
    }

    /// Name of the sensor that produced this node's measurement.
    pub fn sensor_name(&self) -> &str {
        &self.measurement.sensor_name
    }
}

/// A directed constraint between two nodes.
///
/// Never mutated after insertion; multiple edges between the same ordered
/// pair are permitted.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node id.
    pub source: NodeId,

    /// Target node id.
    pub target: NodeId,

    /// Measured pose of the target in the source's frame.
    pub transform: Transform,

    /// 6x6 covariance of the measurement.
    pub covariance: Covariance,

    /// Name of the sensor (or synthetic source) that produced the constraint.
    pub sensor: String,

    /// Constraint category.
    pub label: EdgeLabel,
}

impl Edge {
    /// The endpoint opposite to `id`, if `id` is an endpoint at all.
    pub fn other_endpoint(&self, id: NodeId) -> Option<NodeId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Typed container of nodes and edges.
#[derive(Debug, Default)]
pub struct PoseGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_node_id: NodeId,
    node_index: HashMap<NodeId, usize>,
}

impl PoseGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, taking ownership of its measurement.
    ///
    /// Returns the assigned id; ids are strictly increasing in insertion
    /// order and never reused.
    pub fn add_node(
        &mut self,
        measurement: Measurement,
        odometric_pose: Transform,
        corrected_pose: Transform,
    ) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;

        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(Node {
            id,
            measurement,
            odometric_pose,
            corrected_pose,
        });

        id
    }

    /// Insert an edge.
    ///
    /// Fails if either endpoint is unknown or the edge is a self-loop.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if edge.source == edge.target {
            return Err(Error::SelfLoop(edge.source));
        }
        if !self.node_index.contains_key(&edge.source) {
            return Err(Error::UnknownNode(edge.source));
        }
        if !self.node_index.contains_key(&edge.target) {
            return Err(Error::UnknownNode(edge.target));
        }

        self.edges.push(edge);
        Ok(())
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// Overwrite a node's corrected pose (solver write-back).
    ///
    /// Returns false if the id is unknown.
    pub fn set_corrected_pose(&mut self, id: NodeId, pose: Transform) -> bool {
        match self.node_index.get(&id) {
            Some(&idx) => {
                self.nodes[idx].corrected_pose = pose;
                true
            }
            None => false,
        }
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges incident to a node, in either direction.
    pub fn edges_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(move |e| e.source == id || e.target == id)
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
