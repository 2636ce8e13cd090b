//! The continuous engine's concentration field, as seen by a coupling.

use crate::error::CouplingError;
use crate::types::{CompartmentId, NodeHandle};

/// One (species, region) node of the continuous field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    /// Handle used to read/write this node's concentration
    pub handle: NodeHandle,

    /// Spatial compartment the node lives in
    pub compartment: CompartmentId,

    /// Node volume in the field's native spatial units (µm³ for cable models)
    pub volume: f64,
}

/// Registry of species concentrations on a spatial mesh.
///
/// Implemented by the continuous (reaction-diffusion) engine. The coupling
/// only enumerates nodes and overwrites concentrations; it never integrates.
pub trait ConcentrationField {
    /// Enumerates the nodes of `species` in `region`, in the engine's own order.
    ///
    /// # Returns
    /// * `Ok(nodes)` - possibly empty
    /// * `Err(CouplingError::UnknownSpecies)` - species not declared in region
    fn nodes(&self, species: &str, region: &str) -> Result<Vec<FieldNode>, CouplingError>;

    /// Reads a node's concentration.
    fn concentration(&self, handle: NodeHandle) -> Result<f64, CouplingError>;

    /// Overwrites a node's concentration.
    fn set_concentration(&mut self, handle: NodeHandle, value: f64) -> Result<(), CouplingError>;
}
