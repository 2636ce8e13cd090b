//! Lifecycle Controller - installing a coupling into the continuous engine.
//!
//! The continuous engine's time-stepping supervisor exposes a fixed set of
//! optional hook slots. A coupling fills `initialize` and `fixed_step` and
//! leaves the rest empty.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌───────────────────────────┐
//! │ BlockSupervisor              │        │ Coupling                  │
//! │  [RegistrationId → Callbacks]│◄──reg──│  Arc<Mutex<SyncDriver>>   │
//! │   initialize(field) ─────────┼───────►│   on_initialize(field)    │
//! │   fixed_step(dt, field) ─────┼───────►│   on_fixed_step(dt,field) │
//! └──────────────────────────────┘        └───────────────────────────┘
//! ```
//!
//! The supervisor holds clones of the driver handle, so dropping the
//! `Coupling` does not remove its hooks. Removal is an explicit
//! `Registration::unregister` call.

use crate::config::CouplingConfig;
use crate::driver::{DriverStats, SyncDriver};
use crate::error::CouplingError;
use crate::field::ConcentrationField;
use crate::types::CouplingId;
use kappabridge_env::EngineGateway;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Hook run once when the engine sets up its data structures.
pub type SetupHook = Box<dyn FnMut() -> Result<(), CouplingError> + Send>;

/// Hook that needs the field (initialize, current, conductance).
pub type FieldHook = Box<dyn FnMut(&mut dyn ConcentrationField) -> Result<(), CouplingError> + Send>;

/// Hook run after every fixed integration step of size `dt`.
pub type StepHook =
    Box<dyn FnMut(f64, &mut dyn ConcentrationField) -> Result<(), CouplingError> + Send>;

/// Variable-step: given its offset into the global state vector, returns how
/// many states the hook owner contributes.
pub type OdeCountHook = Box<dyn FnMut(usize) -> usize + Send>;

/// Variable-step: fills a state-sized slice (reinit writes `y`, tolerance writes `atol`).
pub type OdeStateHook = Box<dyn FnMut(&mut [f64]) + Send>;

/// Variable-step right-hand side: `(t, y, ydot)`.
pub type OdeRhsHook = Box<dyn FnMut(f64, &[f64], &mut [f64]) + Send>;

/// Variable-step linear solve: `(dt, t, b, y)`, solves in place into `b`.
pub type OdeSolveHook = Box<dyn FnMut(f64, f64, &mut [f64], &[f64]) + Send>;

/// Variable-step Jacobian refresh: `(dt, t, ydot, y)`.
pub type OdeJacobianHook = Box<dyn FnMut(f64, f64, &[f64], &[f64]) + Send>;

/// Named optional hooks, one field per supervisor slot.
#[derive(Default)]
pub struct CallbackSet {
    pub setup: Option<SetupHook>,
    pub initialize: Option<FieldHook>,
    pub current: Option<FieldHook>,
    pub conductance: Option<FieldHook>,
    pub fixed_step: Option<StepHook>,
    pub ode_count: Option<OdeCountHook>,
    pub ode_reinit: Option<OdeStateHook>,
    pub ode_rhs: Option<OdeRhsHook>,
    pub ode_solve: Option<OdeSolveHook>,
    pub ode_jacobian: Option<OdeJacobianHook>,
    pub ode_abs_tolerance: Option<OdeStateHook>,
}

impl CallbackSet {
    /// Creates an empty set (every slot absent).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initialize hook.
    pub fn with_initialize<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut dyn ConcentrationField) -> Result<(), CouplingError> + Send + 'static,
    {
        self.initialize = Some(Box::new(hook));
        self
    }

    /// Sets the fixed-step hook.
    pub fn with_fixed_step<F>(mut self, hook: F) -> Self
    where
        F: FnMut(f64, &mut dyn ConcentrationField) -> Result<(), CouplingError> + Send + 'static,
    {
        self.fixed_step = Some(Box::new(hook));
        self
    }

    /// Names of the populated slots, in slot order.
    pub fn populated(&self) -> Vec<&'static str> {
        let slots = [
            ("setup", self.setup.is_some()),
            ("initialize", self.initialize.is_some()),
            ("current", self.current.is_some()),
            ("conductance", self.conductance.is_some()),
            ("fixed_step", self.fixed_step.is_some()),
            ("ode_count", self.ode_count.is_some()),
            ("ode_reinit", self.ode_reinit.is_some()),
            ("ode_rhs", self.ode_rhs.is_some()),
            ("ode_solve", self.ode_solve.is_some()),
            ("ode_jacobian", self.ode_jacobian.is_some()),
            ("ode_abs_tolerance", self.ode_abs_tolerance.is_some()),
        ];
        slots
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| name)
            .collect()
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("populated", &self.populated())
            .finish()
    }
}

/// Handle for a callback set installed in a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// The continuous engine's hook registry.
pub trait StepSupervisor {
    /// Installs a callback set; hooks run in registration order.
    fn register(&mut self, callbacks: CallbackSet) -> RegistrationId;

    /// Removes a callback set. Returns false if it was not installed.
    fn unregister(&mut self, id: RegistrationId) -> bool;

    /// True while the set is installed.
    fn is_registered(&self, id: RegistrationId) -> bool;
}

/// Ordered list of callback sets with one dispatch method per slot.
///
/// Absent hooks are skipped. The first hook error aborts the dispatch and
/// is returned to the engine, which halts the run.
#[derive(Debug, Default)]
pub struct BlockSupervisor {
    entries: Vec<(RegistrationId, CallbackSet)>,
    next_id: u64,
}

impl BlockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of installed callback sets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn setup(&mut self) -> Result<(), CouplingError> {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.setup.as_mut() {
                hook()?;
            }
        }
        Ok(())
    }

    pub fn initialize(&mut self, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.initialize.as_mut() {
                hook(field)?;
            }
        }
        Ok(())
    }

    pub fn current(&mut self, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.current.as_mut() {
                hook(field)?;
            }
        }
        Ok(())
    }

    pub fn conductance(&mut self, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.conductance.as_mut() {
                hook(field)?;
            }
        }
        Ok(())
    }

    pub fn fixed_step(&mut self, dt: f64, field: &mut dyn ConcentrationField) -> Result<(), CouplingError> {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.fixed_step.as_mut() {
                hook(dt, field)?;
            }
        }
        Ok(())
    }

    /// Total number of extra ODE states, starting at `offset`.
    pub fn ode_count(&mut self, offset: usize) -> usize {
        let mut total = 0;
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_count.as_mut() {
                total += hook(offset + total);
            }
        }
        total
    }

    pub fn ode_reinit(&mut self, y: &mut [f64]) {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_reinit.as_mut() {
                hook(y);
            }
        }
    }

    pub fn ode_rhs(&mut self, t: f64, y: &[f64], ydot: &mut [f64]) {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_rhs.as_mut() {
                hook(t, y, ydot);
            }
        }
    }

    pub fn ode_solve(&mut self, dt: f64, t: f64, b: &mut [f64], y: &[f64]) {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_solve.as_mut() {
                hook(dt, t, b, y);
            }
        }
    }

    pub fn ode_jacobian(&mut self, dt: f64, t: f64, ydot: &[f64], y: &[f64]) {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_jacobian.as_mut() {
                hook(dt, t, ydot, y);
            }
        }
    }

    pub fn ode_abs_tolerance(&mut self, atol: &mut [f64]) {
        for (_, set) in &mut self.entries {
            if let Some(hook) = set.ode_abs_tolerance.as_mut() {
                hook(atol);
            }
        }
    }
}

impl StepSupervisor for BlockSupervisor {
    fn register(&mut self, callbacks: CallbackSet) -> RegistrationId {
        let id = RegistrationId(self.next_id);
        self.next_id += 1;
        debug!("Registering {:?} as {:?}", callbacks, id);
        self.entries.push((id, callbacks));
        id
    }

    fn unregister(&mut self, id: RegistrationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        before != self.entries.len()
    }

    fn is_registered(&self, id: RegistrationId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// Proof that a coupling's hooks are installed in a supervisor.
///
/// Must be released with `unregister`; dropping it while still active leaves
/// the hooks installed and logs a warning.
#[derive(Debug)]
pub struct Registration {
    id: RegistrationId,
    coupling: CouplingId,
    active: bool,
}

impl Registration {
    /// Removes the hooks. Returns true if this call removed them; calling it
    /// again is a no-op that returns false.
    pub fn unregister<S: StepSupervisor + ?Sized>(&mut self, supervisor: &mut S) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        let removed = supervisor.unregister(self.id);
        info!("[{}] Unregistered from supervisor", self.coupling);
        removed
    }

    /// True until `unregister` is called.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Supervisor-side id.
    pub fn id(&self) -> RegistrationId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.active {
            warn!(
                "[{}] Registration dropped while still installed; hooks keep running",
                self.coupling
            );
        }
    }
}

/// A coupling between a field region and per-compartment stochastic instances.
pub struct Coupling<G: EngineGateway> {
    id: CouplingId,
    driver: Arc<Mutex<SyncDriver<G>>>,
}

impl<G: EngineGateway> Coupling<G> {
    /// Builds the coupling. No instance is created until the supervisor's
    /// initialize phase runs.
    pub fn new(gateway: Arc<G>, config: CouplingConfig) -> Result<Self, CouplingError> {
        let driver = SyncDriver::new(gateway, config)?;
        Ok(Self {
            id: driver.id(),
            driver: Arc::new(Mutex::new(driver)),
        })
    }

    /// Builds the coupling and registers it right away, which is the order the
    /// engine needs (hooks in place before its initialize phase).
    pub fn attach<S: StepSupervisor + ?Sized>(
        gateway: Arc<G>,
        config: CouplingConfig,
        supervisor: &mut S,
    ) -> Result<(Self, Registration), CouplingError> {
        let coupling = Self::new(gateway, config)?;
        let registration = coupling.register(supervisor);
        Ok((coupling, registration))
    }

    /// Hooks for this coupling: `initialize` and `fixed_step` only.
    pub fn callbacks(&self) -> CallbackSet {
        let init_driver = Arc::clone(&self.driver);
        let step_driver = Arc::clone(&self.driver);

        CallbackSet::new()
            .with_initialize(move |field| lock(&init_driver)?.on_initialize(field))
            .with_fixed_step(move |dt, field| lock(&step_driver)?.on_fixed_step(dt, field))
    }

    /// Installs the hooks into `supervisor`.
    pub fn register<S: StepSupervisor + ?Sized>(&self, supervisor: &mut S) -> Registration {
        let id = supervisor.register(self.callbacks());
        info!("[{}] Registered with supervisor as {:?}", self.id, id);
        Registration {
            id,
            coupling: self.id,
            active: true,
        }
    }

    /// Reads driver state.
    pub fn with_driver<R>(&self, f: impl FnOnce(&SyncDriver<G>) -> R) -> Result<R, CouplingError> {
        let guard = lock(&self.driver)?;
        Ok(f(&*guard))
    }

    /// Activity counters.
    pub fn stats(&self) -> Result<DriverStats, CouplingError> {
        self.with_driver(|d| d.stats().clone())
    }

    /// Destroys all stochastic instances. Call after `Registration::unregister`.
    pub fn teardown(&self) -> Result<(), CouplingError> {
        lock(&self.driver)?.teardown()
    }

    pub fn id(&self) -> CouplingId {
        self.id
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, CouplingError> {
    mutex.lock().map_err(|_| CouplingError::DriverPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockField, MockGateway};
    use crate::types::CompartmentId;
    use crate::units::UnitConversion;
    use std::sync::atomic::Ordering;

    fn config() -> CouplingConfig {
        CouplingConfig::new("cyt", "/models/ab.ka", UnitConversion::Identity)
            .unwrap()
            .with_species(["A"])
    }

    #[test]
    fn test_coupling_populates_only_two_slots() {
        let gateway = Arc::new(MockGateway::new(&[("A", 1.0)]));
        let coupling = Coupling::new(gateway, config()).unwrap();
        assert_eq!(coupling.callbacks().populated(), vec!["initialize", "fixed_step"]);
    }

    #[test]
    fn test_empty_slots_are_noops() {
        let mut supervisor = BlockSupervisor::new();
        supervisor.register(CallbackSet::new());
        let mut field = MockField::new();

        assert!(supervisor.setup().is_ok());
        assert!(supervisor.current(&mut field).is_ok());
        assert!(supervisor.fixed_step(0.1, &mut field).is_ok());
        assert_eq!(supervisor.ode_count(0), 0);
    }

    #[test]
    fn test_ode_count_offsets_accumulate() {
        let mut supervisor = BlockSupervisor::new();
        let mut set_a = CallbackSet::new();
        set_a.ode_count = Some(Box::new(|offset| {
            assert_eq!(offset, 10);
            3
        }));
        let mut set_b = CallbackSet::new();
        set_b.ode_count = Some(Box::new(|offset| {
            assert_eq!(offset, 13);
            2
        }));
        supervisor.register(set_a);
        supervisor.register(set_b);

        assert_eq!(supervisor.ode_count(10), 5);
    }

    #[test]
    fn test_unregister_stops_stepping() {
        let gateway = Arc::new(MockGateway::new(&[("A", 1.0)]));
        let mut supervisor = BlockSupervisor::new();
        let mut field = MockField::linear("cyt", "dend", &["A"], 2, 1.0);

        let (coupling, mut registration) =
            Coupling::attach(gateway.clone(), config(), &mut supervisor).unwrap();

        supervisor.initialize(&mut field).unwrap();
        supervisor.fixed_step(1.0, &mut field).unwrap();
        assert_eq!(gateway.counters.advances.load(Ordering::SeqCst), 2);

        assert!(registration.unregister(&mut supervisor));
        assert!(!registration.is_active());
        assert!(supervisor.is_empty());

        supervisor.fixed_step(1.0, &mut field).unwrap();
        assert_eq!(gateway.counters.advances.load(Ordering::SeqCst), 2);
        assert_eq!(coupling.stats().unwrap().steps, 1);

        // Second unregister is a no-op
        assert!(!registration.unregister(&mut supervisor));

        coupling.teardown().unwrap();
        assert_eq!(gateway.live(), 0);
    }

    #[test]
    fn test_hook_error_halts_dispatch() {
        let gateway = Arc::new(MockGateway::new(&[("A", 1.0)]));
        let mut supervisor = BlockSupervisor::new();
        let mut field = MockField::linear("cyt", "dend", &["A"], 1, 1.0);
        let (_coupling, mut registration) =
            Coupling::attach(gateway, config(), &mut supervisor).unwrap();

        // Stepping before initialize propagates out of the supervisor
        assert_eq!(
            supervisor.fixed_step(1.0, &mut field),
            Err(CouplingError::NotInitialized)
        );
        registration.unregister(&mut supervisor);
    }

    #[test]
    fn test_two_couplings_share_one_gateway() {
        let gateway = Arc::new(MockGateway::new(&[("A", 2.0)]));
        let mut supervisor = BlockSupervisor::new();
        let mut field = MockField::linear("cyt", "dend", &["A"], 2, 1.0);
        field.add_node("A", "er", CompartmentId::new("dend", 0), 1.0);

        let er_config = CouplingConfig::new("er", "/models/ab.ka", UnitConversion::Identity)
            .unwrap()
            .with_species(["A"]);

        let (cyt, mut reg_cyt) = Coupling::attach(gateway.clone(), config(), &mut supervisor).unwrap();
        let (er, mut reg_er) = Coupling::attach(gateway.clone(), er_config, &mut supervisor).unwrap();
        assert_ne!(cyt.id(), er.id());

        supervisor.initialize(&mut field).unwrap();
        assert_eq!(gateway.live(), 3);

        supervisor.fixed_step(1.0, &mut field).unwrap();
        reg_er.unregister(&mut supervisor);
        supervisor.fixed_step(1.0, &mut field).unwrap();

        assert_eq!(cyt.stats().unwrap().steps, 2);
        assert_eq!(er.stats().unwrap().steps, 1);

        reg_cyt.unregister(&mut supervisor);
        cyt.teardown().unwrap();
        er.teardown().unwrap();
        assert_eq!(gateway.live(), 0);
    }
}
