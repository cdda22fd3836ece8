//! Pose-graph controller.
//!
//! The mapper ingests sensor readings, decides which become graph nodes,
//! drives registration against the previous node and against spatial
//! neighbors, feeds the solver incrementally, and writes optimized poses
//! back onto the graph.
//!
//! All operations run on the caller's thread; registration and optimization
//! may block for as long as the underlying backends take.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::math::{compose_clean, orthogonalize, rotation_angle, translation_norm};
use crate::core::types::{Covariance, Measurement, NodeId, Transform};
use crate::engine::graph::{Edge, EdgeLabel, Node, PoseGraph, Solver, SpatialIndex};
use crate::error::{Error, Result};
use crate::sensors::{Odometry, RegistrationError, Sensor};

/// Mapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Radius for candidate neighbor search, in meters.
    pub neighbor_radius: f64,

    /// Distance-gate threshold on translation, in meters.
    pub min_translation: f64,

    /// Distance-gate threshold on rotation angle, in radians.
    pub min_rotation: f64,

    /// Also insert explicit odometry edges.
    pub add_odometry_edges: bool,

    /// Cap on new loop-closure edges per reading.
    pub max_neighbor_links: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            neighbor_radius: 1.0,
            min_translation: 0.5,
            min_rotation: 0.1,
            add_odometry_edges: false,
            max_neighbor_links: 5,
        }
    }
}

/// Online pose-graph SLAM back-end.
///
/// Owns the graph, the sensor registry, and the spatial index; consumes the
/// odometry source and solver through trait objects. At most one mutating
/// call may be in progress at a time.
pub struct Mapper {
    config: MapperConfig,
    graph: PoseGraph,
    sensors: HashMap<String, Box<dyn Sensor>>,
    odometry: Option<Box<dyn Odometry>>,
    solver: Option<Box<dyn Solver>>,
    index: SpatialIndex,
    first_node: Option<NodeId>,
    last_node: Option<NodeId>,
    last_odometric_pose: Transform,
    current_pose: Transform,
}

impl Mapper {
    /// Create a mapper with the given configuration.
    pub fn new(config: MapperConfig) -> Self {
        Self {
            config,
            graph: PoseGraph::new(),
            sensors: HashMap::new(),
            odometry: None,
            solver: None,
            index: SpatialIndex::new(),
            first_node: None,
            last_node: None,
            last_odometric_pose: Transform::identity(),
            current_pose: Transform::identity(),
        }
    }

    /// Register a registration sensor under its unique name.
    pub fn register_sensor(&mut self, sensor: Box<dyn Sensor>) -> Result<()> {
        let name = sensor.name().to_string();
        match self.sensors.entry(name.clone()) {
            Entry::Occupied(_) => {
                error!("Sensor with name '{}' already exists!", name);
                Err(Error::DuplicateSensor(name))
            }
            Entry::Vacant(slot) => {
                slot.insert(sensor);
                Ok(())
            }
        }
    }

    /// Configure the odometry source.
    pub fn set_odometry(&mut self, odometry: Box<dyn Odometry>) {
        self.odometry = Some(odometry);
    }

    /// Configure the optimization back-end.
    pub fn set_solver(&mut self, solver: Box<dyn Solver>) {
        self.solver = Some(solver);
    }

    /// The pose graph built so far.
    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    /// Running best estimate of the robot pose in the map frame.
    pub fn current_pose(&self) -> Transform {
        self.current_pose
    }

    /// Id of the most recent node inserted from a local reading.
    pub fn last_node(&self) -> Option<NodeId> {
        self.last_node
    }

    /// Ingest a sensor reading.
    ///
    /// Returns `Ok(true)` when a node was added, `Ok(false)` when the
    /// reading was suppressed (distance gate, or registration failure with
    /// no odometry fallback). Fatal per-reading conditions (unknown sensor,
    /// odometry failure, incompatible measurement) are errors. A rejected
    /// reading leaves the graph untouched.
    pub fn add_reading(&mut self, m: Measurement) -> Result<bool> {
        let sensor = match self.sensors.get(&m.sensor_name) {
            Some(sensor) => sensor,
            None => {
                error!("Sensor '{}' has not been registered!", m.sensor_name);
                return Err(Error::UnknownSensor(m.sensor_name.clone()));
            }
        };
        debug!("Add reading from sensor '{}'.", sensor.name());

        let odometry = match &self.odometry {
            Some(source) => match source.odometric_pose(m.timestamp_us) {
                Ok(pose) => Some(pose),
                Err(err) => {
                    error!("Could not get odometry data: {}", err);
                    return Err(Error::Odometry(err));
                }
            },
            None => None,
        };

        // The very first reading is accepted unconditionally and pinned.
        let last_id = match self.last_node {
            Some(id) => id,
            None => {
                let odometric_pose = odometry.unwrap_or_else(Transform::identity);
                let id = Self::add_vertex(
                    &mut self.graph,
                    &mut self.solver,
                    &mut self.first_node,
                    m,
                    odometric_pose,
                    self.current_pose,
                );
                self.last_node = Some(id);
                self.last_odometric_pose = odometric_pose;
                info!("Added first node to the graph.");
                return Ok(true);
            }
        };
        let last_corrected = self
            .graph
            .node(last_id)
            .ok_or(Error::UnknownNode(last_id))?
            .corrected_pose;

        // Odometric delta gates node creation and seeds the provisional pose.
        let mut delta = Transform::identity();
        if let Some(odometry_pose) = odometry {
            delta = orthogonalize(&(self.last_odometric_pose.inverse() * odometry_pose));
            if !self.check_min_distance(&delta) {
                return Ok(false);
            }
            self.current_pose = last_corrected * delta;
        }

        // Sequential registration against the last node.
        let guess = last_corrected.inverse() * self.current_pose;
        let registration = {
            let last = self.graph.node(last_id).ok_or(Error::UnknownNode(last_id))?;
            sensor.calculate_transform(&last.measurement, &m, &guess)
        };

        let odometry_node_wanted = self.config.add_odometry_edges && odometry.is_some();
        let odometric_pose = odometry.unwrap_or_else(Transform::identity);

        let new_id = match registration {
            Ok(constraint) => {
                let refined = compose_clean(&last_corrected, &constraint.transform);
                let id = if odometry_node_wanted {
                    // The node sits at the odometric estimate; the sequential
                    // edge still carries the registration result.
                    let id = Self::add_vertex(
                        &mut self.graph,
                        &mut self.solver,
                        &mut self.first_node,
                        m,
                        odometric_pose,
                        orthogonalize(&self.current_pose),
                    );
                    Self::insert_edge(
                        &mut self.graph,
                        &mut self.solver,
                        last_id,
                        id,
                        delta,
                        Covariance::identity(),
                        "Odometry",
                        EdgeLabel::Odometry,
                    )?;
                    id
                } else {
                    if !self.check_min_distance(&constraint.transform) {
                        return Ok(false);
                    }
                    Self::add_vertex(
                        &mut self.graph,
                        &mut self.solver,
                        &mut self.first_node,
                        m,
                        odometric_pose,
                        refined,
                    )
                };
                Self::insert_edge(
                    &mut self.graph,
                    &mut self.solver,
                    last_id,
                    id,
                    constraint.transform,
                    constraint.covariance,
                    sensor.name(),
                    EdgeLabel::Sequential,
                )?;
                self.current_pose = refined;
                id
            }
            Err(RegistrationError::NoMatch) => {
                if odometry_node_wanted {
                    // Keep the odometry-only node and edge.
                    let id = Self::add_vertex(
                        &mut self.graph,
                        &mut self.solver,
                        &mut self.first_node,
                        m,
                        odometric_pose,
                        orthogonalize(&self.current_pose),
                    );
                    Self::insert_edge(
                        &mut self.graph,
                        &mut self.solver,
                        last_id,
                        id,
                        delta,
                        Covariance::identity(),
                        "Odometry",
                        EdgeLabel::Odometry,
                    )?;
                    id
                } else {
                    warn!("Measurement could not be matched and no odometry edge is available!");
                    return Ok(false);
                }
            }
            Err(err) => return Err(Error::Registration(err)),
        };

        // Loop-closure candidates from the same sensor's neighborhood.
        Self::link_to_neighbors(
            &mut self.graph,
            &mut self.index,
            &mut self.solver,
            sensor.as_ref(),
            self.config.neighbor_radius,
            self.config.max_neighbor_links,
            new_id,
        );

        self.last_node = Some(new_id);
        self.last_odometric_pose = odometric_pose;
        Ok(true)
    }

    /// Insert a reading whose absolute pose is already known.
    ///
    /// The node enters the graph at the supplied pose and is linked to
    /// spatial neighbors when its sensor is registered. Neither `last_node`
    /// nor the current pose estimate is touched.
    pub fn add_external_reading(&mut self, m: Measurement, pose: Transform) -> NodeId {
        debug!("Add external reading from {}:{}.", m.robot_name, m.sensor_name);
        let sensor_name = m.sensor_name.clone();

        let id = Self::add_vertex(
            &mut self.graph,
            &mut self.solver,
            &mut self.first_node,
            m,
            pose,
            pose,
        );

        if let Some(sensor) = self.sensors.get(&sensor_name) {
            Self::link_to_neighbors(
                &mut self.graph,
                &mut self.index,
                &mut self.solver,
                sensor.as_ref(),
                self.config.neighbor_radius,
                self.config.max_neighbor_links,
                id,
            );
        }
        id
    }

    /// Run the solver and write corrections back onto the graph.
    ///
    /// Returns `Ok(false)` when the solver fails to converge; node poses are
    /// then left untouched.
    pub fn optimize(&mut self) -> Result<bool> {
        // Nodes and constraints are fed to the solver at insertion time, so
        // the solver already knows the whole graph here.
        let corrections = match &mut self.solver {
            Some(solver) => {
                if !solver.compute() {
                    return Ok(false);
                }
                solver.corrections()
            }
            None => {
                error!("A solver must be set before optimize() is called!");
                return Err(Error::NoSolver);
            }
        };

        for (id, pose) in corrections {
            if !self.graph.set_corrected_pose(id, pose) {
                warn!("Solver returned a correction for unknown node {}.", id);
            }
        }

        if let Some(last_id) = self.last_node {
            if let Some(node) = self.graph.node(last_id) {
                self.current_pose = node.corrected_pose;
            }
        }
        Ok(true)
    }

    /// All nodes whose measurement came from the named sensor.
    pub fn vertices_from_sensor(&self, sensor: &str) -> Vec<&Node> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| n.sensor_name() == sensor)
            .collect()
    }

    /// All edges produced by the named sensor.
    pub fn edges_from_sensor(&self, sensor: &str) -> Vec<&Edge> {
        self.graph
            .edges()
            .iter()
            .filter(|e| e.sensor == sensor)
            .collect()
    }

    /// Write the graph in Graphviz dot format for inspection.
    pub fn write_graph_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        info!("Writing graph to file '{}'.", path.as_ref().display());
        crate::io::graphviz::write_dot(&self.graph, path)
    }

    /// True when the transform clears either distance-gate threshold.
    fn check_min_distance(&self, t: &Transform) -> bool {
        let translation = translation_norm(t);
        let rotation = rotation_angle(t);
        debug!("Translation: {} / Rotation: {}", translation, rotation);
        translation >= self.config.min_translation || rotation >= self.config.min_rotation
    }

    /// Insert a node, feed it to the solver, and pin the very first one.
    fn add_vertex(
        graph: &mut PoseGraph,
        solver: &mut Option<Box<dyn Solver>>,
        first_node: &mut Option<NodeId>,
        measurement: Measurement,
        odometric_pose: Transform,
        corrected_pose: Transform,
    ) -> NodeId {
        let robot = measurement.robot_name.clone();
        let sensor = measurement.sensor_name.clone();
        let id = graph.add_node(measurement, odometric_pose, corrected_pose);
        info!("Created node {} (from {}:{}).", id, robot, sensor);

        if let Some(solver) = solver {
            solver.add_node(id, corrected_pose);
        }
        if first_node.is_none() {
            *first_node = Some(id);
            if let Some(solver) = solver {
                solver.set_fixed(id);
            }
        }
        id
    }

    /// Insert an edge and feed the constraint to the solver.
    #[allow(clippy::too_many_arguments)]
    fn insert_edge(
        graph: &mut PoseGraph,
        solver: &mut Option<Box<dyn Solver>>,
        source: NodeId,
        target: NodeId,
        transform: Transform,
        covariance: Covariance,
        sensor: &str,
        label: EdgeLabel,
    ) -> Result<()> {
        graph.add_edge(Edge {
            source,
            target,
            transform,
            covariance,
            sensor: sensor.to_string(),
            label,
        })?;
        info!(
            "Created '{}' edge from node {} to node {} (from {}).",
            label, source, target, sensor
        );

        if let Some(solver) = solver {
            solver.add_constraint(source, target, &transform, &covariance);
        }
        Ok(())
    }

    /// Attempt loop-closure edges to spatial neighbors of `vertex`.
    ///
    /// Rebuilds the index over this sensor's nodes, skips the vertex itself
    /// and anything already linked to it by this sensor, and registers up to
    /// `max_links` candidates.
    fn link_to_neighbors(
        graph: &mut PoseGraph,
        index: &mut SpatialIndex,
        solver: &mut Option<Box<dyn Solver>>,
        sensor: &dyn Sensor,
        radius: f64,
        max_links: usize,
        vertex: NodeId,
    ) {
        index.build(
            graph
                .nodes()
                .iter()
                .filter(|n| n.sensor_name() == sensor.name()),
        );

        let vertex_pose = match graph.node(vertex) {
            Some(node) => node.corrected_pose,
            None => return,
        };

        let mut linked: HashSet<NodeId> = HashSet::new();
        linked.insert(vertex);
        for edge in graph.edges_of(vertex) {
            if edge.sensor == sensor.name() {
                if let Some(other) = edge.other_endpoint(vertex) {
                    linked.insert(other);
                }
            } else {
                debug!("Ignoring edge from '{}' while linking neighbors.", edge.sensor);
            }
        }

        let neighbors = index.radius_search(&vertex_pose.translation.vector, radius);
        debug!("Neighbor search found {} nodes nearby.", neighbors.len());

        let mut added = 0;
        for candidate in neighbors {
            if added >= max_links {
                break;
            }
            if linked.contains(&candidate) {
                continue;
            }

            let constraint = {
                let cand = match graph.node(candidate) {
                    Some(node) => node,
                    None => continue,
                };
                let target = match graph.node(vertex) {
                    Some(node) => node,
                    None => return,
                };
                let guess = cand.corrected_pose.inverse() * target.corrected_pose;
                sensor.calculate_transform(&cand.measurement, &target.measurement, &guess)
            };

            match constraint {
                Ok(c) => {
                    if let Err(err) = Self::insert_edge(
                        graph,
                        solver,
                        candidate,
                        vertex,
                        c.transform,
                        c.covariance,
                        sensor.name(),
                        EdgeLabel::LoopClosure,
                    ) {
                        warn!("Could not insert neighbor edge: {}", err);
                        continue;
                    }
                    added += 1;
                }
                Err(RegistrationError::NoMatch) => continue,
                Err(RegistrationError::BadMeasurementType { .. }) => {
                    warn!(
                        "Skipping neighbor {} with incompatible measurement.",
                        candidate
                    );
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MeasurementData, PointCloud3D};
    use crate::sensors::Constraint;
    use nalgebra::{Rotation3, Translation3, Vector3};

    struct StaticSensor {
        name: String,
        result: std::result::Result<Transform, RegistrationError>,
    }

    impl Sensor for StaticSensor {
        fn name(&self) -> &str {
            &self.name
        }

        fn calculate_transform(
            &self,
            _source: &Measurement,
            _target: &Measurement,
            _guess: &Transform,
        ) -> std::result::Result<Constraint, RegistrationError> {
            self.result
                .clone()
                .map(Constraint::with_identity_covariance)
        }
    }

    fn measurement(id: u64, sensor: &str) -> Measurement {
        Measurement::new(
            id,
            id * 1_000_000,
            "robot",
            sensor,
            MeasurementData::PointCloud(PointCloud3D::new()),
        )
    }

    fn translation(x: f64) -> Transform {
        Transform::from_parts(Translation3::new(x, 0.0, 0.0), Rotation3::identity())
    }

    #[test]
    fn test_unknown_sensor_is_error() {
        let mut mapper = Mapper::new(MapperConfig::default());
        let result = mapper.add_reading(measurement(1, "ghost"));
        assert!(matches!(result, Err(Error::UnknownSensor(_))));
        assert!(mapper.graph().is_empty());
    }

    #[test]
    fn test_duplicate_sensor_is_error() {
        let mut mapper = Mapper::new(MapperConfig::default());
        mapper
            .register_sensor(Box::new(StaticSensor {
                name: "lidar".into(),
                result: Ok(Transform::identity()),
            }))
            .unwrap();

        let result = mapper.register_sensor(Box::new(StaticSensor {
            name: "lidar".into(),
            result: Ok(Transform::identity()),
        }));
        assert!(matches!(result, Err(Error::DuplicateSensor(_))));
    }

    #[test]
    fn test_distance_gate_suppresses_small_motion() {
        let mut mapper = Mapper::new(MapperConfig::default());
        mapper
            .register_sensor(Box::new(StaticSensor {
                name: "lidar".into(),
                result: Ok(translation(0.01)),
            }))
            .unwrap();

        assert!(mapper.add_reading(measurement(1, "lidar")).unwrap());
        assert!(!mapper.add_reading(measurement(2, "lidar")).unwrap());
        assert_eq!(mapper.graph().num_nodes(), 1);
        assert_eq!(mapper.graph().num_edges(), 0);
    }

    #[test]
    fn test_rotation_alone_clears_gate() {
        let mut mapper = Mapper::new(MapperConfig::default());
        let spin = Transform::from_parts(
            Translation3::identity(),
            Rotation3::from_scaled_axis(Vector3::z() * 0.5),
        );
        mapper
            .register_sensor(Box::new(StaticSensor {
                name: "lidar".into(),
                result: Ok(spin),
            }))
            .unwrap();

        assert!(mapper.add_reading(measurement(1, "lidar")).unwrap());
        assert!(mapper.add_reading(measurement(2, "lidar")).unwrap());
        assert_eq!(mapper.graph().num_nodes(), 2);
    }

    #[test]
    fn test_no_match_without_odometry_rejects() {
        let mut mapper = Mapper::new(MapperConfig::default());
        mapper
            .register_sensor(Box::new(StaticSensor {
                name: "lidar".into(),
                result: Err(RegistrationError::NoMatch),
            }))
            .unwrap();

        assert!(mapper.add_reading(measurement(1, "lidar")).unwrap());
        assert!(!mapper.add_reading(measurement(2, "lidar")).unwrap());
        assert_eq!(mapper.graph().num_nodes(), 1);
    }

    #[test]
    fn test_optimize_without_solver_fails() {
        let mut mapper = Mapper::new(MapperConfig::default());
        assert!(matches!(mapper.optimize(), Err(Error::NoSolver)));
    }
}
