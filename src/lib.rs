#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! `uvgami`: automatic UV-parameterization engine.
//!
//! A mesh chart is optimized under symmetric Dirichlet distortion by a
//! projected-Newton inner loop (`geom::optimizer`), while an outer loop
//! (`engine`) periodically proposes boundary-split, interior-split and
//! merge topology operations and adjusts a dual variable trading distortion
//! against seam length. `io` handles mesh loading/writing and the Tutte/cut
//! preprocessing a raw input mesh needs before optimization can start.

pub mod cli;
pub mod engine;
pub mod error;
pub mod geom;
pub mod io;

pub use engine::{Engine, EngineConfig, EngineOutcome, ControlHandle};
pub use error::{ExitCode, UvgamiError};
pub use geom::core::{BBox, Point2, Point3, Vec2, Vec3};
pub use geom::energy::{EnergyTerm, SymmetricDirichlet, WeightedEnergy};
pub use geom::linsolve::{DenseSolver, LinSysSolver, SparseSolver};
pub use geom::mesh::{CohesiveEdge, TriMesh};
pub use geom::optimizer::{Optimizer, OptimizerConfig, SolveOutcome};
pub use geom::scaffold::Scaffold;

/// Installs `env_logger` once, reading level from `RUST_LOG` (default
/// `info`). Safe to call more than once; later calls are no-ops.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logger() {
    let _ = env_logger::try_init();
}

#[cfg(target_arch = "wasm32")]
pub fn init_logger() {}
