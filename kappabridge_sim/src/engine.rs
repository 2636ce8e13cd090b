//! Fixed-step continuous engine driving a `BlockSupervisor`.
//!
//! # Step order
//!
//! ```text
//! finitialize:  t = 0, reset field, setup hooks, initialize hooks, sample
//! fadvance:     current hooks, conductance hooks, own diffusion,
//!               t += dt, fixed_step hooks, sample
//! ```

use crate::cable::CableModel;
use crate::error::SimError;
use crate::recorder::TraceRecorder;
use kappabridge_core::{BlockSupervisor, StepSupervisor};
use tracing::{debug, info};

/// The continuous side of a coupled run.
pub struct FixedStepEngine {
    model: CableModel,
    supervisor: BlockSupervisor,
    recorder: TraceRecorder,
    dt: f64,
    t: f64,
    steps: u64,
    initialized: bool,
}

impl FixedStepEngine {
    /// Creates an engine with step `dt` (ms).
    pub fn new(model: CableModel, dt: f64) -> Result<Self, SimError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimError::invalid_model(format!("time step {} must be positive", dt)));
        }
        Ok(Self {
            model,
            supervisor: BlockSupervisor::new(),
            recorder: TraceRecorder::new(),
            dt,
            t: 0.0,
            steps: 0,
            initialized: false,
        })
    }

    /// Sets the trace recorder.
    pub fn with_recorder(mut self, recorder: TraceRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Hook registry couplings install themselves into.
    pub fn supervisor(&mut self) -> &mut dyn StepSupervisor {
        &mut self.supervisor
    }

    /// Resets time and field, then runs setup and initialize hooks.
    pub fn finitialize(&mut self) -> Result<(), SimError> {
        self.t = 0.0;
        self.steps = 0;
        self.initialized = false;
        self.model.reset();
        self.recorder.clear();

        self.supervisor.setup()?;
        self.supervisor.initialize(&mut self.model)?;

        self.initialized = true;
        self.recorder.sample(self.t, &self.model);
        info!(
            "finitialize: {} hook set(s), dt={}ms",
            self.supervisor.len(),
            self.dt
        );
        Ok(())
    }

    /// One fixed step.
    pub fn fadvance(&mut self) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        self.supervisor.current(&mut self.model)?;
        self.supervisor.conductance(&mut self.model)?;
        self.model.diffuse(self.dt);

        self.t += self.dt;
        self.steps += 1;
        self.supervisor.fixed_step(self.dt, &mut self.model)?;

        self.recorder.sample(self.t, &self.model);
        Ok(())
    }

    /// Steps until `t_stop` (ms). A hook error halts the run at that step.
    pub fn continuerun(&mut self, t_stop: f64) -> Result<u64, SimError> {
        let start = self.steps;
        while self.t + self.dt / 2.0 < t_stop {
            self.fadvance()?;
        }
        debug!("continuerun reached t={}ms after {} step(s)", self.t, self.steps - start);
        Ok(self.steps - start)
    }

    /// Current time, ms.
    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn model(&self) -> &CableModel {
        &self.model
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cable::Section;
    use kappabridge_core::{CallbackSet, CompartmentId, ConcentrationField, CouplingError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn model() -> CableModel {
        let mut model = CableModel::new();
        model.add_section(Section::new("dend", 2, 10.0, 1.0)).unwrap();
        model.add_region("cyt", &["dend"]).unwrap();
        model.add_species("A", "cyt", 1.0, 0.0).unwrap();
        model
    }

    #[test]
    fn test_rejects_bad_dt() {
        assert!(FixedStepEngine::new(model(), 0.0).is_err());
        assert!(FixedStepEngine::new(model(), f64::NAN).is_err());
    }

    #[test]
    fn test_requires_finitialize() {
        let mut engine = FixedStepEngine::new(model(), 0.5).unwrap();
        assert_eq!(engine.fadvance(), Err(SimError::NotInitialized));
    }

    #[test]
    fn test_continuerun_counts_steps_and_calls_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut engine = FixedStepEngine::new(model(), 0.25)
            .unwrap()
            .with_recorder(TraceRecorder::new().watch("A", "cyt", CompartmentId::new("dend", 1)));

        engine.supervisor().register(CallbackSet::new().with_fixed_step(move |dt, field| {
            seen.fetch_add(1, Ordering::SeqCst);
            let nodes = field.nodes("A", "cyt")?;
            let c = field.concentration(nodes[1].handle)?;
            field.set_concentration(nodes[1].handle, c + dt)
        }));

        engine.finitialize().unwrap();
        assert_eq!(engine.continuerun(1.0).unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(engine.t(), 1.0);

        let trace = engine.recorder().trace("A", &CompartmentId::new("dend", 1)).unwrap();
        assert_eq!(trace.samples.len(), 5);
        assert_eq!(trace.last(), Some(2.0));
        assert!(trace.is_non_decreasing());
    }

    #[test]
    fn test_hook_error_halts_run() {
        let mut engine = FixedStepEngine::new(model(), 1.0).unwrap();
        engine.supervisor().register(CallbackSet::new().with_fixed_step(|_, field| {
            field.nodes("missing", "cyt").map(|_| ())
        }));
        engine.finitialize().unwrap();

        let err = engine.continuerun(5.0).unwrap_err();
        assert!(matches!(
            err,
            SimError::Coupling(CouplingError::UnknownSpecies { .. })
        ));
        assert_eq!(engine.steps(), 1);
    }
}
