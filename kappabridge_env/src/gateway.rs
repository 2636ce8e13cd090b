//! Gateway and instance traits for the stochastic engine.

use crate::error::GatewayError;
use crate::types::{InstanceId, InstanceSpec};
use std::path::Path;

/// Handle to a stochastic-simulation engine.
///
/// The gateway is the only way to obtain instances. It is constructed once by
/// the orchestrator and shared (`Arc<G>`) by every coupling that needs it.
///
/// # Implementations
///
/// - **Production**: `RpcGateway` - JSON lines over TCP to a remote engine
/// - **Simulation**: `SimGateway` - in-process seeded Gillespie engine
///
/// # Blocking
///
/// Every call blocks until the engine has answered. Couplings rely on this:
/// a concentration write never happens before the matching advance finished.
pub trait EngineGateway: Send + Sync + 'static {
    /// Instance type produced by this gateway.
    type Instance: StochasticInstance;

    /// Creates a new, empty instance.
    ///
    /// The instance has no definition loaded and is not initialized.
    fn create_instance(&self, spec: &InstanceSpec) -> Result<Self::Instance, GatewayError>;
}

/// A single live stochastic simulation.
///
/// # Lifecycle
///
/// ```text
/// create_instance -> load_definition -> initialize -> advance* -> destroy
///                                                     observe*
/// ```
pub trait StochasticInstance: Send + 'static {
    /// Gateway-assigned identity.
    fn id(&self) -> InstanceId;

    /// Loads a reaction-network definition file.
    ///
    /// # Returns
    /// * `Err(GatewayError::Backend)` - unreadable file or malformed definition
    fn load_definition(&mut self, path: &Path) -> Result<(), GatewayError>;

    /// Builds the initial molecular state from the loaded definition.
    fn initialize(&mut self) -> Result<(), GatewayError>;

    /// Advances the simulation clock by `dt` (in the instance's time unit).
    ///
    /// # Arguments
    /// * `dt` - Time delta
    /// * `report_progress` - Ask the engine to emit its own progress output
    fn advance(&mut self, dt: f64, report_progress: bool) -> Result<(), GatewayError>;

    /// Returns the current value of a declared observable.
    fn observe(&self, name: &str) -> Result<f64, GatewayError>;

    /// Returns the instance clock, in the instance's time unit.
    fn current_time(&self) -> Result<f64, GatewayError>;

    /// Releases the instance on the engine side.
    fn destroy(self) -> Result<(), GatewayError>
    where
        Self: Sized;
}
