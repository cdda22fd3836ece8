//! Graphviz export of the pose graph.
//!
//! Debug output for visual inspection only; not part of any durability
//! contract.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::engine::graph::PoseGraph;
use crate::error::Result;

/// Write the graph in dot format.
///
/// Nodes carry their id and `robot:sensor` origin; edges carry their label
/// and producing sensor.
pub fn write_dot(graph: &PoseGraph, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "digraph pose_graph {{")?;
    for node in graph.nodes() {
        let t = &node.corrected_pose.translation.vector;
        writeln!(
            out,
            "  n{} [label=\"{} ({}:{})\\n({:.2}, {:.2}, {:.2})\"];",
            node.id,
            node.id,
            node.robot_name(),
            node.sensor_name(),
            t.x,
            t.y,
            t.z
        )?;
    }
    for edge in graph.edges() {
        writeln!(
            out,
            "  n{} -> n{} [label=\"{} ({})\"];",
            edge.source, edge.target, edge.label, edge.sensor
        )?;
    }
    writeln!(out, "}}")?;

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Covariance, Measurement, MeasurementData, PointCloud3D, Transform};
    use crate::engine::graph::{Edge, EdgeLabel};

    #[test]
    fn test_write_dot_lists_nodes_and_edges() {
        let mut graph = PoseGraph::new();
        let a = graph.add_node(
            Measurement::new(
                1,
                0,
                "robot",
                "lidar",
                MeasurementData::PointCloud(PointCloud3D::new()),
            ),
            Transform::identity(),
            Transform::identity(),
        );
        let b = graph.add_node(
            Measurement::new(
                2,
                1000,
                "robot",
                "lidar",
                MeasurementData::PointCloud(PointCloud3D::new()),
            ),
            Transform::identity(),
            Transform::identity(),
        );
        graph
            .add_edge(Edge {
                source: a,
                target: b,
                transform: Transform::identity(),
                covariance: Covariance::identity(),
                sensor: "lidar".into(),
                label: EdgeLabel::Sequential,
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.dot");
        write_dot(&graph, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("digraph pose_graph {"));
        assert!(contents.contains("n0 -> n1"));
        assert!(contents.contains("seq (lidar)"));
        assert!(contents.trim_end().ends_with('}'));
    }
}
