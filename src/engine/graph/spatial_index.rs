//! Spatial index over node positions.
//!
//! A k-d tree over the translation components of corrected poses, used to
//! propose loop-closure candidates. The index is a snapshot: later node
//! additions or pose corrections do not update it, so callers rebuild before
//! querying.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector3;

use super::pose_graph::Node;
use crate::core::types::NodeId;

/// Rebuildable k-d tree over node translations.
///
/// Distances are computed in single precision.
pub struct SpatialIndex {
    tree: KdTree<f32, 3>,
    size: usize,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            tree: KdTree::new(),
            size: 0,
        }
    }

    /// Destructively rebuild the index from the given nodes.
    ///
    /// Callers typically pre-filter the nodes by sensor name.
    pub fn build<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node>) {
        self.tree = KdTree::new();
        self.size = 0;
        for node in nodes {
            let t = &node.corrected_pose.translation.vector;
            self.tree
                .add(&[t.x as f32, t.y as f32, t.z as f32], node.id);
            self.size += 1;
        }
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if the index holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Ids of all indexed nodes within `radius` of `point`.
    ///
    /// Result order is unspecified. An unbuilt or empty index returns an
    /// empty vector.
    pub fn radius_search(&self, point: &Vector3<f64>, radius: f64) -> Vec<NodeId> {
        if self.size == 0 {
            return Vec::new();
        }

        let query = [point.x as f32, point.y as f32, point.z as f32];
        let radius_sq = (radius * radius) as f32;
        self.tree
            .within_unsorted::<SquaredEuclidean>(&query, radius_sq)
            .into_iter()
            .map(|neighbor| neighbor.item)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Measurement, MeasurementData, PointCloud3D, Transform};
    use crate::engine::graph::PoseGraph;
    use nalgebra::Translation3;

    fn add_node_at(graph: &mut PoseGraph, id: u64, x: f64, y: f64) -> NodeId {
        let m = Measurement::new(
            id,
            id * 1000,
            "robot",
            "lidar",
            MeasurementData::PointCloud(PointCloud3D::new()),
        );
        let pose = Transform::from_parts(
            Translation3::new(x, y, 0.0),
            nalgebra::Rotation3::identity(),
        );
        graph.add_node(m, pose, pose)
    }

    #[test]
    fn test_unbuilt_index_returns_empty() {
        let index = SpatialIndex::new();
        let hits = index.radius_search(&Vector3::new(0.0, 0.0, 0.0), 10.0);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_query_finds_own_position() {
        let mut graph = PoseGraph::new();
        let id = add_node_at(&mut graph, 1, 2.0, 3.0);

        let mut index = SpatialIndex::new();
        index.build(graph.nodes());

        let hits = index.radius_search(&Vector3::new(2.0, 3.0, 0.0), 0.5);
        assert!(hits.contains(&id));
    }

    #[test]
    fn test_radius_filters_distant_nodes() {
        let mut graph = PoseGraph::new();
        let near = add_node_at(&mut graph, 1, 0.5, 0.0);
        let far = add_node_at(&mut graph, 2, 10.0, 0.0);

        let mut index = SpatialIndex::new();
        index.build(graph.nodes());

        let hits = index.radius_search(&Vector3::new(0.0, 0.0, 0.0), 1.0);
        assert!(hits.contains(&near));
        assert!(!hits.contains(&far));
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut graph = PoseGraph::new();
        add_node_at(&mut graph, 1, 0.0, 0.0);

        let mut index = SpatialIndex::new();
        index.build(graph.nodes());
        assert_eq!(index.len(), 1);

        let second = add_node_at(&mut graph, 2, 0.2, 0.0);
        index.build(graph.nodes());
        assert_eq!(index.len(), 2);

        let hits = index.radius_search(&Vector3::new(0.0, 0.0, 0.0), 1.0);
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&second));
    }
}
