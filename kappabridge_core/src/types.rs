//! Identity types shared by the coupling engines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One discretized spatial sub-volume of a coupled region.
///
/// Identifies segment `segment` of the linear section `section`. Used as the
/// registry key on the stochastic side and as the lookup key on the field
/// side, so it must stay stable for the whole coupling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompartmentId {
    /// Name of the section the segment belongs to
    pub section: String,

    /// Segment index along the section (0-based)
    pub segment: u32,
}

impl CompartmentId {
    /// Creates a compartment id.
    pub fn new(section: impl Into<String>, segment: u32) -> Self {
        Self {
            section: section.into(),
            segment,
        }
    }
}

impl std::fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.section, self.segment)
    }
}

/// Unique identifier for a coupling session.
///
/// Several couplings may share one gateway; the id tags their log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouplingId(pub Uuid);

impl CouplingId {
    /// Creates a new random CouplingId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CouplingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CouplingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell couplings apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque handle to one mutable concentration value of the continuous field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle(pub usize);

/// A chemical species tracked by a coupling.
///
/// `name` must match an observable declared in the reaction-network
/// definition; it is also the species name on the field side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpeciesDescriptor {
    pub name: String,
}

impl SpeciesDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<&str> for SpeciesDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
