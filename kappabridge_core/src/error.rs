//! Error types for the coupling core.

use crate::types::{CompartmentId, NodeHandle};
use kappabridge_env::{BackendErrorKind, GatewayError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while initializing or stepping a coupling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CouplingError {
    /// The reaction-network definition could not be loaded
    #[error("Error in definition file {}: {}", .path.display(), .message)]
    DefinitionLoad {
        path: PathBuf,
        kind: BackendErrorKind,
        message: String,
    },

    /// A field compartment has no stochastic instance behind it
    #[error("No simulation instance for compartment {0}")]
    MissingCompartment(CompartmentId),

    /// A species is bound to a different compartment set than the first one
    #[error(
        "Species '{}' does not share the compartments of '{}' ({} missing, {} extra)",
        .species, .reference, .missing.len(), .extra.len()
    )]
    CompartmentMismatch {
        species: String,
        reference: String,
        missing: Vec<CompartmentId>,
        extra: Vec<CompartmentId>,
    },

    /// The field knows no such species in the region
    #[error("Species '{species}' is not defined in region '{region}'")]
    UnknownSpecies { species: String, region: String },

    /// Unit conversion needs a positive compartment volume
    #[error("Invalid compartment volume: {0}")]
    InvalidVolume(f64),

    /// Field handle does not address a node
    #[error("Invalid field handle: {0:?}")]
    InvalidHandle(NodeHandle),

    /// A step was requested before the initialize hook ran
    #[error("Coupling stepped before initialization")]
    NotInitialized,

    /// The shared driver state was poisoned by a panicking hook
    #[error("Driver state poisoned")]
    DriverPoisoned,

    /// Configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other gateway failure (observable lookup, transport, ...)
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl CouplingError {
    /// Wraps a failed `load_definition` call.
    ///
    /// Keeps the engine's category and bare message instead of its
    /// formatted text.
    pub fn definition_load(path: &Path, err: &GatewayError) -> Self {
        Self::DefinitionLoad {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.message(),
        }
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
