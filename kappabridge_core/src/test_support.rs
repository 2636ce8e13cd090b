//! In-memory gateway and field doubles for unit tests.

use crate::error::CouplingError;
use crate::field::{ConcentrationField, FieldNode};
use crate::types::{CompartmentId, NodeHandle};
use kappabridge_env::{
    BackendErrorKind, EngineGateway, GatewayError, InstanceId, InstanceSpec, StochasticInstance,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between a `MockGateway` and its instances.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub loads: AtomicUsize,
    pub advances: AtomicUsize,
}

/// Gateway whose instances count `rate * clock` molecules per observable.
pub struct MockGateway {
    next_id: AtomicU64,
    pub counters: Arc<MockCounters>,
    observables: Vec<(String, f64)>,
    fail_on_load: Option<usize>,
}

impl MockGateway {
    pub fn new(observables: &[(&str, f64)]) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            counters: Arc::new(MockCounters::default()),
            observables: observables
                .iter()
                .map(|(n, r)| (n.to_string(), *r))
                .collect(),
            fail_on_load: None,
        }
    }

    /// Makes the n-th `load_definition` call (0-based) fail with a syntax error.
    pub fn failing_on_load(mut self, n: usize) -> Self {
        self.fail_on_load = Some(n);
        self
    }

    pub fn live(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst) - self.counters.destroyed.load(Ordering::SeqCst)
    }
}

impl EngineGateway for MockGateway {
    type Instance = MockInstance;

    fn create_instance(&self, spec: &InstanceSpec) -> Result<MockInstance, GatewayError> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockInstance {
            id: InstanceId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            spec: spec.clone(),
            counters: Arc::clone(&self.counters),
            observables: self.observables.iter().cloned().collect(),
            fail_on_load: self.fail_on_load,
            loaded: false,
            initialized: false,
            clock: 0.0,
        })
    }
}

pub struct MockInstance {
    id: InstanceId,
    pub spec: InstanceSpec,
    counters: Arc<MockCounters>,
    observables: HashMap<String, f64>,
    fail_on_load: Option<usize>,
    loaded: bool,
    initialized: bool,
    clock: f64,
}

impl StochasticInstance for MockInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn load_definition(&mut self, path: &Path) -> Result<(), GatewayError> {
        let n = self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if Some(n) == self.fail_on_load {
            return Err(GatewayError::backend(
                BackendErrorKind::Syntax,
                format!("line 1: cannot parse {}", path.display()),
            ));
        }
        self.loaded = true;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), GatewayError> {
        if !self.loaded {
            return Err(GatewayError::InvalidState("no definition loaded".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn advance(&mut self, dt: f64, _report_progress: bool) -> Result<(), GatewayError> {
        if !self.initialized {
            return Err(GatewayError::InvalidState("not initialized".into()));
        }
        self.counters.advances.fetch_add(1, Ordering::SeqCst);
        self.clock += dt;
        Ok(())
    }

    fn observe(&self, name: &str) -> Result<f64, GatewayError> {
        self.observables
            .get(name)
            .map(|rate| (rate * self.clock).floor())
            .ok_or_else(|| GatewayError::UnknownObservable(name.to_string()))
    }

    fn current_time(&self) -> Result<f64, GatewayError> {
        Ok(self.clock)
    }

    fn destroy(self) -> Result<(), GatewayError> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockNode {
    species: String,
    region: String,
    compartment: CompartmentId,
    volume: f64,
    concentration: f64,
}

/// Flat list of field nodes keyed by (species, region).
#[derive(Default)]
pub struct MockField {
    declared: HashSet<(String, String)>,
    nodes: Vec<MockNode>,
}

impl MockField {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node per segment of `section` for every species.
    pub fn linear(region: &str, section: &str, species: &[&str], nseg: u32, volume: f64) -> Self {
        let mut field = Self::new();
        for name in species {
            field.declare(name, region);
            for seg in 0..nseg {
                field.add_node(name, region, CompartmentId::new(section, seg), volume);
            }
        }
        field
    }

    pub fn declare(&mut self, species: &str, region: &str) {
        self.declared.insert((species.to_string(), region.to_string()));
    }

    pub fn add_node(&mut self, species: &str, region: &str, compartment: CompartmentId, volume: f64) {
        self.declare(species, region);
        self.nodes.push(MockNode {
            species: species.to_string(),
            region: region.to_string(),
            compartment,
            volume,
            concentration: 0.0,
        });
    }

    pub fn value(&self, species: &str, compartment: &CompartmentId) -> Option<f64> {
        self.nodes
            .iter()
            .find(|n| n.species == species && &n.compartment == compartment)
            .map(|n| n.concentration)
    }
}

impl ConcentrationField for MockField {
    fn nodes(&self, species: &str, region: &str) -> Result<Vec<FieldNode>, CouplingError> {
        if !self.declared.contains(&(species.to_string(), region.to_string())) {
            return Err(CouplingError::UnknownSpecies {
                species: species.to_string(),
                region: region.to_string(),
            });
        }
        Ok(self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.species == species && n.region == region)
            .map(|(i, n)| FieldNode {
                handle: NodeHandle(i),
                compartment: n.compartment.clone(),
                volume: n.volume,
            })
            .collect())
    }

    fn concentration(&self, handle: NodeHandle) -> Result<f64, CouplingError> {
        self.nodes
            .get(handle.0)
            .map(|n| n.concentration)
            .ok_or(CouplingError::InvalidHandle(handle))
    }

    fn set_concentration(&mut self, handle: NodeHandle, value: f64) -> Result<(), CouplingError> {
        let node = self
            .nodes
            .get_mut(handle.0)
            .ok_or(CouplingError::InvalidHandle(handle))?;
        node.concentration = value;
        Ok(())
    }
}
