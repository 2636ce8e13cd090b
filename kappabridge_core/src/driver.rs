//! Synchronization Driver - the per-step exchange between the two engines.
//!
//! # Step protocol
//!
//! ```text
//! supervisor ──fixed_step(dt)──► SyncDriver
//!                                   │ 1. advance_all(dt)   (blocks until every instance is done)
//!                                   │ 2. for species × node:
//!                                   │       count = observe(species, compartment)
//!                                   │       conc  = conversion(count, volume)
//!                                   ▼       field[node] = conc
//! ```
//!
//! After a step returns, every coupled (species, compartment) concentration
//! reflects the stochastic state at `t + dt`.

use crate::config::CouplingConfig;
use crate::error::CouplingError;
use crate::field::{ConcentrationField, FieldNode};
use crate::mapper::validate_bindings;
use crate::registry::InstanceRegistry;
use crate::types::CouplingId;
use kappabridge_env::EngineGateway;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing what a driver has done so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverStats {
    /// Fixed steps completed
    pub steps: u64,

    /// Sum of step sizes, in the continuous engine's time unit
    pub advanced_time: f64,

    /// Concentration writes into the field
    pub writes: u64,
}

/// Nodes of one species, resolved at initialization.
#[derive(Debug, Clone)]
struct SpeciesBinding {
    name: String,
    nodes: Vec<FieldNode>,
}

/// Drives one coupling: builds the registry at initialize, then advances and
/// writes back on every fixed step.
///
/// This is the only component that writes field concentrations on the
/// coupling's behalf.
pub struct SyncDriver<G: EngineGateway> {
    id: CouplingId,
    gateway: Arc<G>,
    config: CouplingConfig,
    registry: Option<InstanceRegistry<G::Instance>>,
    bindings: Vec<SpeciesBinding>,
    stats: DriverStats,
}

impl<G: EngineGateway> SyncDriver<G> {
    /// Creates an idle driver. No instance exists until `on_initialize`.
    pub fn new(gateway: Arc<G>, config: CouplingConfig) -> Result<Self, CouplingError> {
        config.validate()?;
        Ok(Self {
            id: CouplingId::new(),
            gateway,
            config,
            registry: None,
            bindings: Vec::new(),
            stats: DriverStats::default(),
        })
    }

    /// Initialize hook: validates bindings, builds the registry and writes the
    /// initial stochastic state into the field.
    ///
    /// A second call (re-initialization of the continuous engine) tears the
    /// previous registry down first; instances are never reused.
    pub fn on_initialize(&mut self, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        let compartments = validate_bindings(field, &self.config.species, &self.config.region)?;

        if let Some(previous) = self.registry.take() {
            info!("[{}] Re-initializing, dropping {} instance(s)", self.id, previous.len());
            previous.teardown()?;
        }

        let mut bindings = Vec::with_capacity(self.config.species.len());
        for species in &self.config.species {
            bindings.push(SpeciesBinding {
                name: species.name.clone(),
                nodes: field.nodes(&species.name, &self.config.region)?,
            });
        }

        if compartments.is_empty() {
            warn!(
                "[{}] Region '{}' has no nodes; coupling is a no-op",
                self.id, self.config.region
            );
        }

        let registry = InstanceRegistry::initialize(self.gateway.as_ref(), &self.config, &compartments)?;
        info!(
            "[{}] Initialized {} compartment(s) x {} species in '{}'",
            self.id,
            registry.len(),
            bindings.len(),
            self.config.region
        );

        self.registry = Some(registry);
        self.bindings = bindings;
        self.stats = DriverStats::default();
        if let Err(err) = self.write_back(field) {
            warn!("[{}] Initial write failed, destroying instances: {}", self.id, err);
            if let Err(teardown_err) = self.teardown() {
                warn!("[{}] Teardown after failed initialize: {}", self.id, teardown_err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Fixed-step hook: advance every instance by `dt`, then write each
    /// observable back into the field.
    pub fn on_fixed_step(&mut self, dt: f64, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        let registry = self.registry.as_mut().ok_or(CouplingError::NotInitialized)?;
        registry.advance_all(dt)?;

        self.stats.steps += 1;
        self.stats.advanced_time += dt;
        debug!("[{}] Step {} (dt={})", self.id, self.stats.steps, dt);

        self.write_back(field)
    }

    fn write_back(&mut self, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        let registry = self.registry.as_ref().ok_or(CouplingError::NotInitialized)?;

        for binding in &self.bindings {
            for node in &binding.nodes {
                let count = registry.observe(&binding.name, &node.compartment)?;
                let value = self.config.conversion.to_concentration(count, node.volume)?;
                field.set_concentration(node.handle, value)?;
                self.stats.writes += 1;
            }
        }
        Ok(())
    }

    /// Tears the registry down. Safe to call when nothing is initialized.
    pub fn teardown(&mut self) -> Result<(), CouplingError> {
        self.bindings.clear();
        match self.registry.take() {
            Some(registry) => registry.teardown(),
            None => Ok(()),
        }
    }

    /// Coupling identity (for logs).
    pub fn id(&self) -> CouplingId {
        self.id
    }

    /// Configuration this driver was built from.
    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    /// Registry, once initialized.
    pub fn registry(&self) -> Option<&InstanceRegistry<G::Instance>> {
        self.registry.as_ref()
    }

    /// Activity counters since the last initialization.
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }
}
