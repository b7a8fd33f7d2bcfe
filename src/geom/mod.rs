pub mod core;
pub mod diagnostics;
pub mod energy;
pub mod linsolve;
pub mod mesh;
pub mod metrics;
pub mod optimizer;
pub mod scaffold;
pub mod triangulation;

pub use core::{BBox, Point2, Point3, Tolerance, Transform, Vec2, Vec3};
pub use diagnostics::{MeshDiagnostics, check_mesh};
pub use energy::{EnergyTerm, SymmetricDirichlet, WeightedEnergy};
pub use linsolve::{DenseSolver, LinSysSolver, SparseSolver};
pub use mesh::{CohesiveEdge, TriMesh};
pub use metrics::{EngineMetrics, EngineTimingReport, TimingBucket};
pub use optimizer::{Optimizer, OptimizerConfig, SolveOutcome};
pub use scaffold::Scaffold;
pub use triangulation::delaunay_triangles;
