//! Simulation Instance Registry - one stochastic instance per compartment.

use crate::config::CouplingConfig;
use crate::error::CouplingError;
use crate::types::CompartmentId;
use kappabridge_env::{EngineGateway, InstanceSpec, StochasticInstance};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A live instance bound to one compartment.
pub struct InstanceRecord<I> {
    compartment: CompartmentId,
    instance: I,
    loaded: bool,
    initialized: bool,
}

impl<I: StochasticInstance> InstanceRecord<I> {
    /// Compartment this instance simulates.
    pub fn compartment(&self) -> &CompartmentId {
        &self.compartment
    }

    /// The underlying instance.
    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// Definition file was loaded successfully.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// `initialize` completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Maps compartment identity to a loaded, initialized stochastic instance.
///
/// A registry only exists fully built: `initialize` either returns one record
/// per distinct compartment, each loaded and initialized, or fails and
/// destroys whatever it had created.
pub struct InstanceRegistry<I: StochasticInstance> {
    records: Vec<InstanceRecord<I>>,
    index: HashMap<CompartmentId, usize>,
    definition_path: PathBuf,
    report_progress: bool,
}

impl<I: StochasticInstance> InstanceRegistry<I> {
    /// Creates, loads and initializes one instance per compartment.
    ///
    /// # Arguments
    /// * `gateway` - Engine handing out instances
    /// * `config` - Supplies definition path, time unit, seed and output target
    /// * `compartments` - Canonical compartment list (duplicates are created once)
    ///
    /// # Errors
    /// * `CouplingError::DefinitionLoad` - any compartment failed to load the file
    /// * `CouplingError::Gateway` - creation or initialization failed
    pub fn initialize<G>(
        gateway: &G,
        config: &CouplingConfig,
        compartments: &[CompartmentId],
    ) -> Result<Self, CouplingError>
    where
        G: EngineGateway<Instance = I>,
    {
        let spec = config.instance_spec();
        let mut registry = Self {
            records: Vec::with_capacity(compartments.len()),
            index: HashMap::with_capacity(compartments.len()),
            definition_path: config.definition_path.clone(),
            report_progress: config.report_progress,
        };

        for compartment in compartments {
            if registry.index.contains_key(compartment) {
                continue;
            }
            if let Err(err) = registry.create_record(gateway, &spec, compartment.clone()) {
                warn!(
                    "Initialization failed at {}; discarding {} instance(s)",
                    compartment,
                    registry.records.len()
                );
                registry.discard();
                return Err(err);
            }
        }

        info!(
            "Registry ready: {} instance(s) from {}",
            registry.records.len(),
            registry.definition_path.display()
        );
        Ok(registry)
    }

    fn create_record<G>(
        &mut self,
        gateway: &G,
        spec: &InstanceSpec,
        compartment: CompartmentId,
    ) -> Result<(), CouplingError>
    where
        G: EngineGateway<Instance = I>,
    {
        let instance = gateway.create_instance(spec)?;
        debug!("Created {} for {}", instance.id(), compartment);

        let mut record = InstanceRecord {
            compartment,
            instance,
            loaded: false,
            initialized: false,
        };

        if let Err(err) = record.instance.load_definition(&self.definition_path) {
            release(record.instance);
            return Err(CouplingError::definition_load(&self.definition_path, &err));
        }
        record.loaded = true;

        if let Err(err) = record.instance.initialize() {
            release(record.instance);
            return Err(err.into());
        }
        record.initialized = true;

        self.index
            .insert(record.compartment.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// Destroys every record, logging (not returning) failures.
    fn discard(&mut self) {
        self.index.clear();
        for record in self.records.drain(..) {
            release(record.instance);
        }
    }

    /// Advances every instance by `dt` in the instance time unit.
    ///
    /// Instances are causally independent, so no order is implied. The first
    /// failure aborts the sweep and is returned.
    pub fn advance_all(&mut self, dt: f64) -> Result<(), CouplingError> {
        for record in &mut self.records {
            record.instance.advance(dt, self.report_progress)?;
        }
        Ok(())
    }

    /// Reads observable `species` from the instance bound to `compartment`.
    pub fn observe(&self, species: &str, compartment: &CompartmentId) -> Result<f64, CouplingError> {
        let record = self.record(compartment)?;
        Ok(record.instance.observe(species)?)
    }

    /// Clock of the instance bound to `compartment`.
    pub fn current_time(&self, compartment: &CompartmentId) -> Result<f64, CouplingError> {
        let record = self.record(compartment)?;
        Ok(record.instance.current_time()?)
    }

    fn record(&self, compartment: &CompartmentId) -> Result<&InstanceRecord<I>, CouplingError> {
        self.index
            .get(compartment)
            .map(|&i| &self.records[i])
            .ok_or_else(|| CouplingError::MissingCompartment(compartment.clone()))
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the coupling spans no compartments.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in creation order.
    pub fn records(&self) -> impl Iterator<Item = &InstanceRecord<I>> {
        self.records.iter()
    }

    /// Compartments in creation order.
    pub fn compartments(&self) -> impl Iterator<Item = &CompartmentId> {
        self.records.iter().map(|r| &r.compartment)
    }

    /// Definition file every instance was loaded from.
    pub fn definition_path(&self) -> &Path {
        &self.definition_path
    }

    /// Destroys every instance.
    ///
    /// All instances are attempted; the first failure is returned.
    pub fn teardown(mut self) -> Result<(), CouplingError> {
        self.index.clear();
        let mut first_err = None;
        let count = self.records.len();

        for record in self.records.drain(..) {
            let id = record.instance.id();
            if let Err(err) = record.instance.destroy() {
                warn!("Failed to destroy {}: {}", id, err);
                first_err.get_or_insert(err);
            }
        }

        info!("Registry torn down ({} instance(s))", count);
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

fn release<I: StochasticInstance>(instance: I) {
    let id = instance.id();
    if let Err(err) = instance.destroy() {
        warn!("Failed to destroy {}: {}", id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockGateway;
    use crate::units::UnitConversion;
    use kappabridge_env::{BackendErrorKind, GatewayError, TimeUnit};
    use std::sync::atomic::Ordering;

    fn config() -> CouplingConfig {
        CouplingConfig::new("cyt", "/models/ab.ka", UnitConversion::Identity)
            .unwrap()
            .with_species(["A", "AB"])
            .with_seed(5)
    }

    fn compartments(n: u32) -> Vec<CompartmentId> {
        (0..n).map(|i| CompartmentId::new("dend", i)).collect()
    }

    #[test]
    fn test_one_record_per_compartment() {
        let gateway = MockGateway::new(&[("A", 1.0), ("AB", 2.0)]);
        let registry = InstanceRegistry::initialize(&gateway, &config(), &compartments(3)).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.records().all(|r| r.is_loaded() && r.is_initialized()));
        assert_eq!(gateway.live(), 3);

        let first = registry.records().next().unwrap();
        assert_eq!(first.instance().spec.seed, Some(5));
        assert_eq!(first.instance().spec.time_unit, TimeUnit::Milliseconds);
    }

    #[test]
    fn test_duplicate_compartments_created_once() {
        let gateway = MockGateway::new(&[("A", 1.0)]);
        let mut comps = compartments(2);
        comps.push(CompartmentId::new("dend", 0));

        let registry = InstanceRegistry::initialize(&gateway, &config(), &comps).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_compartment_list() {
        let gateway = MockGateway::new(&[("A", 1.0)]);
        let mut registry = InstanceRegistry::initialize(&gateway, &config(), &[]).unwrap();
        assert!(registry.is_empty());
        assert!(registry.advance_all(1.0).is_ok());
    }

    #[test]
    fn test_load_failure_is_atomic() {
        let gateway = MockGateway::new(&[("A", 1.0)]).failing_on_load(2);
        let result = InstanceRegistry::initialize(&gateway, &config(), &compartments(4));

        match result {
            Err(CouplingError::DefinitionLoad { path, kind, message }) => {
                assert_eq!(path, PathBuf::from("/models/ab.ka"));
                assert_eq!(kind, BackendErrorKind::Syntax);
                assert!(message.starts_with("line 1"));
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("initialize should fail"),
        }
        // Three created (third failed to load), all released
        assert_eq!(gateway.counters.created.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.live(), 0);
    }

    #[test]
    fn test_advance_and_observe() {
        let gateway = MockGateway::new(&[("A", 1.0), ("AB", 2.0)]);
        let mut registry = InstanceRegistry::initialize(&gateway, &config(), &compartments(2)).unwrap();

        registry.advance_all(5.0).unwrap();
        let c0 = CompartmentId::new("dend", 0);
        assert_eq!(registry.observe("AB", &c0).unwrap(), 10.0);
        assert_eq!(registry.current_time(&c0).unwrap(), 5.0);
        assert_eq!(gateway.counters.advances.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observe_is_idempotent() {
        let gateway = MockGateway::new(&[("A", 3.0)]);
        let mut registry = InstanceRegistry::initialize(&gateway, &config(), &compartments(1)).unwrap();
        registry.advance_all(2.0).unwrap();

        let c0 = CompartmentId::new("dend", 0);
        let first = registry.observe("A", &c0).unwrap();
        let second = registry.observe("A", &c0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_observe_errors() {
        let gateway = MockGateway::new(&[("A", 1.0)]);
        let registry = InstanceRegistry::initialize(&gateway, &config(), &compartments(1)).unwrap();

        let missing = CompartmentId::new("soma", 0);
        assert_eq!(
            registry.observe("A", &missing),
            Err(CouplingError::MissingCompartment(missing.clone()))
        );
        assert_eq!(
            registry.observe("Q", &CompartmentId::new("dend", 0)),
            Err(CouplingError::Gateway(GatewayError::UnknownObservable("Q".into())))
        );
    }

    #[test]
    fn test_teardown_destroys_all() {
        let gateway = MockGateway::new(&[("A", 1.0)]);
        let registry = InstanceRegistry::initialize(&gateway, &config(), &compartments(3)).unwrap();
        registry.teardown().unwrap();
        assert_eq!(gateway.live(), 0);
    }
}
