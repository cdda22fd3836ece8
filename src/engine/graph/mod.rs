//! Pose graph, spatial index, and optimization back-ends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      POSE GRAPH                             │
//! │                                                             │
//! │    Nodes: historical robot poses + their measurements       │
//! │    Edges: relative constraints with 6x6 covariance          │
//! │                                                             │
//! │    [N0] ──seq──▶ [N1] ──seq──▶ [N2] ──seq──▶ [N3]           │
//! │     ▲                                          │            │
//! │     └────────────── match ─────────────────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SOLVER                                │
//! │                                                             │
//! │    Minimize: Σ ||error(edge)||² weighted by information     │
//! │    Gauge: the pinned first node anchors the map frame       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PoseGraph`]: node/edge store with id lookup and incidence queries
//! - [`SpatialIndex`]: rebuildable k-d tree proposing loop-closure candidates
//! - [`Solver`]: pluggable optimization back-end interface
//! - [`GraphOptimizer`]: built-in Levenberg-Marquardt implementation

mod optimizer;
mod pose_graph;
mod solver;
mod spatial_index;

pub use optimizer::{GraphOptimizer, GraphOptimizerConfig, OptimizationRun};
pub use pose_graph::{Edge, EdgeLabel, Node, PoseGraph};
pub use solver::Solver;
pub use spatial_index::SpatialIndex;
