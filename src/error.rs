//! Crate-wide error taxonomy and process exit codes.
//!
//! Mirrors the error-handling design in `SPEC_FULL.md` §7: per-iteration
//! numerical trouble is resolved locally (step reduction, oscillation
//! rollback) and never surfaces as an `Err`. Only input and factorization
//! failures propagate out of the core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UvgamiError {
    #[error("mesh format not recognized: {0}")]
    UnknownMeshFormat(String),

    #[error("failed to load mesh: {0}")]
    FailedToLoadMesh(String),

    #[error("input mesh has non-manifold vertices")]
    NonManifoldVertices,

    #[error("input mesh has non-manifold edges")]
    NonManifoldEdges,

    #[error("initial UV is not locally injective (negative-area triangle present)")]
    InvalidUv,

    #[error("triangle inversion encountered where none was expected")]
    ElementInversion,

    #[error("linear system pattern has not been analyzed")]
    PatternNotAnalyzed,

    #[error("sparse Hessian factorization failed: {0}")]
    FactorizationFailure(String),

    #[error("topology operation precondition violated: {0}")]
    InvalidTopologyOp(String),

    #[error("no feasible merge candidate available")]
    NoFeasibleMergeAvailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit codes, matching `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    UnknownMeshFormat = 1,
    FailedToLoadMesh = 2,
    NonManifoldVertices = 3,
    NonManifoldEdges = 4,
    InvalidUv = 5,
    ElementInversion = 6,
}

impl From<&UvgamiError> for ExitCode {
    fn from(e: &UvgamiError) -> Self {
        match e {
            UvgamiError::UnknownMeshFormat(_) => Self::UnknownMeshFormat,
            UvgamiError::FailedToLoadMesh(_) | UvgamiError::Io(_) => Self::FailedToLoadMesh,
            UvgamiError::NonManifoldVertices => Self::NonManifoldVertices,
            UvgamiError::NonManifoldEdges => Self::NonManifoldEdges,
            UvgamiError::InvalidUv => Self::InvalidUv,
            UvgamiError::ElementInversion => Self::ElementInversion,
            // Factorization failure and internal topology-op errors are fatal
            // but aren't part of the named exit code table; surface them
            // under the closest matching code rather than inventing a new one.
            UvgamiError::PatternNotAnalyzed
            | UvgamiError::FactorizationFailure(_)
            | UvgamiError::InvalidTopologyOp(_)
            | UvgamiError::NoFeasibleMergeAvailable => Self::ElementInversion,
        }
    }
}
