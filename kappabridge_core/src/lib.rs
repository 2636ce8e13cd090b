//! KappaBridge Core - Coupling a Continuous Field to Stochastic Kinetics
//!
//! A coupling binds one region of a reaction-diffusion field to a set of
//! stochastic simulation instances, one per spatial compartment:
//! 1. **Mapping**: which compartments the coupled species occupy
//! 2. **Registry**: one loaded, initialized instance per compartment
//! 3. **Synchronization**: advance every instance by `dt`, then write each
//!    observable back into the field (converted by the unit policy)
//! 4. **Lifecycle**: explicit register / unregister against the field
//!    engine's step supervisor

pub mod config;
pub mod driver;
pub mod error;
pub mod field;
pub mod lifecycle;
pub mod mapper;
pub mod registry;
pub mod types;
pub mod units;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use config::CouplingConfig;
pub use driver::{DriverStats, SyncDriver};
pub use error::CouplingError;
pub use field::{ConcentrationField, FieldNode};
pub use lifecycle::{
    BlockSupervisor, CallbackSet, Coupling, Registration, RegistrationId, StepSupervisor,
};
pub use mapper::{map_compartments, validate_bindings};
pub use registry::{InstanceRecord, InstanceRegistry};
pub use types::{CompartmentId, CouplingId, NodeHandle, SpeciesDescriptor};
pub use units::{UnitConversion, MOLECULES_PER_UM3_MM};
