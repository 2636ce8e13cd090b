//! Scenario runner - executes coupled continuous/stochastic runs.

use crate::cable::{CableModel, Section};
use crate::engine::FixedStepEngine;
use crate::error::SimError;
use crate::gateway::SimGateway;
use crate::recorder::TraceRecorder;
use crate::scenarios::ScenarioId;
use crate::server::spawn_server;

use kappabridge_core::{
    CompartmentId, ConcentrationField, Coupling, CouplingConfig, CouplingError, DriverStats,
    UnitConversion,
};
use kappabridge_env::{EngineGateway, RpcGateway, TimeUnit};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Built-in A + B -> AB definition.
pub const AB_MODEL: &str = include_str!("../models/ab.ka");

/// Region every scenario couples.
pub const REGION: &str = "cyt";

/// Species every scenario couples.
pub const SPECIES: [&str; 3] = ["A", "B", "AB"];

static MODEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes definition text to a fresh file in the temp directory.
pub fn write_model(text: &str, tag: &str) -> Result<PathBuf, SimError> {
    let n = MODEL_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "kappabridge-{}-{}-{}.ka",
        tag,
        std::process::id(),
        n
    ));
    std::fs::write(&path, text)
        .map_err(|e| SimError::invalid_model(format!("cannot write {}: {}", path.display(), e)))?;
    Ok(path)
}

/// One 30 µm × 1 µm dendrite with `nseg` segments, region `cyt` holding A, B, AB.
pub fn dendrite(nseg: u32) -> Result<CableModel, SimError> {
    let mut model = CableModel::new();
    model.add_section(Section::new("dend", nseg, 30.0, 1.0))?;
    model.add_region(REGION, &["dend"])?;
    for species in SPECIES {
        model.add_species(species, REGION, 0.0, 0.0)?;
    }
    Ok(model)
}

/// State of one compartment at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub compartment: CompartmentId,

    /// Observable count reported by the instance
    pub count: f64,

    /// Instance clock, in its own time unit
    pub clock: f64,

    /// Field node volume, µm³
    pub volume: f64,

    /// Field concentration at that node
    pub field_value: f64,
}

/// Everything a coupled run produced.
#[derive(Debug, Clone)]
pub struct CoupledRun {
    pub observations: Vec<Observation>,
    pub traces: TraceRecorder,
    pub stats: DriverStats,
    pub steps: u64,
    pub final_time: f64,
}

/// Runs one coupling from `finitialize` to `duration` ms and tears it down.
///
/// `watch` names the observable whose trace and final counts are collected.
pub fn run_coupled<G: EngineGateway>(
    gateway: Arc<G>,
    config: CouplingConfig,
    model: CableModel,
    dt: f64,
    duration: f64,
    watch: &str,
) -> Result<CoupledRun, SimError> {
    let region = config.region.clone();
    let nodes = model.nodes(watch, &region)?;
    let recorder = nodes.iter().fold(TraceRecorder::new(), |rec, node| {
        rec.watch(watch, &region, node.compartment.clone())
    });
    let mut engine = FixedStepEngine::new(model, dt)?.with_recorder(recorder);

    let (coupling, mut registration) = Coupling::attach(gateway, config, engine.supervisor())?;

    let outcome = engine
        .finitialize()
        .and_then(|_| engine.continuerun(duration))
        .and_then(|_| collect(&coupling, &engine, watch, &region));

    registration.unregister(engine.supervisor());
    let teardown = coupling.teardown();

    let observations = outcome?;
    teardown?;

    Ok(CoupledRun {
        observations,
        traces: engine.recorder().clone(),
        stats: coupling.stats()?,
        steps: engine.steps(),
        final_time: engine.t(),
    })
}

fn collect<G: EngineGateway>(
    coupling: &Coupling<G>,
    engine: &FixedStepEngine,
    watch: &str,
    region: &str,
) -> Result<Vec<Observation>, SimError> {
    let nodes = engine.model().nodes(watch, region)?;
    let observed = coupling.with_driver(|driver| {
        let registry = driver.registry().ok_or(CouplingError::NotInitialized)?;
        nodes
            .iter()
            .map(|node| {
                Ok((
                    registry.observe(watch, &node.compartment)?,
                    registry.current_time(&node.compartment)?,
                ))
            })
            .collect::<Result<Vec<_>, CouplingError>>()
    })??;

    nodes
        .iter()
        .zip(observed)
        .map(|(node, (count, clock))| -> Result<Observation, SimError> {
            Ok(Observation {
                compartment: node.compartment.clone(),
                count,
                clock,
                volume: node.volume,
                field_value: engine.model().concentration(node.handle)?,
            })
        })
        .collect()
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Fixed steps executed by the continuous engine
    pub total_steps: u64,

    /// Final continuous-engine time in ms
    pub final_time_ms: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Compartments (= stochastic instances) coupled
    pub compartments: usize,

    /// Concentration writes performed by the driver
    pub field_writes: u64,

    /// Sum of the watched observable over all compartments at the end
    pub final_total: f64,
}

/// Runs coupled scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Segments on the dendrite
    nseg: u32,

    /// Continuous-engine step, ms
    dt_ms: f64,

    /// Run length, ms
    duration_ms: f64,

    /// Definition file; the built-in model when absent
    definition: Option<PathBuf>,

    /// Convert counts to mM (false: write raw counts)
    convert: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            nseg: 3,
            dt_ms: 1.0,
            duration_ms: 100.0,
            definition: None,
            convert: true,
        }
    }

    /// Sets the number of segments.
    pub fn with_nseg(mut self, nseg: u32) -> Self {
        self.nseg = nseg;
        self
    }

    /// Sets the step size.
    pub fn with_dt(mut self, dt_ms: f64) -> Self {
        self.dt_ms = dt_ms;
        self
    }

    /// Sets the run length.
    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Uses a definition file instead of the built-in model.
    pub fn with_definition(mut self, path: impl Into<PathBuf>) -> Self {
        self.definition = Some(path.into());
        self
    }

    /// Enables or disables molar conversion.
    pub fn with_conversion(mut self, convert: bool) -> Self {
        self.convert = convert;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let outcome = match scenario {
            ScenarioId::AbBinding => self.run_ab_binding(),
            ScenarioId::BadDefinition => self.run_bad_definition(),
            ScenarioId::UnregisterMidway => self.run_unregister_midway(),
            ScenarioId::RpcRoundtrip => self.run_rpc_roundtrip(),
        };

        outcome.unwrap_or_else(|err| ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_steps: 0,
            final_time_ms: 0.0,
            failure_reason: Some(err.to_string()),
            metrics: ScenarioMetrics::default(),
        })
    }

    fn conversion(&self) -> UnitConversion {
        if self.convert {
            UnitConversion::molar()
        } else {
            UnitConversion::Identity
        }
    }

    fn definition_path(&self) -> Result<PathBuf, SimError> {
        match &self.definition {
            Some(path) => Ok(path.clone()),
            None => write_model(AB_MODEL, "ab"),
        }
    }

    fn config(&self, definition: &Path) -> Result<CouplingConfig, SimError> {
        Ok(CouplingConfig::new(REGION, definition, self.conversion())?
            .with_species(SPECIES)
            .with_seed(self.seed)
            .with_time_unit(TimeUnit::Milliseconds))
    }

    fn result(&self, scenario: ScenarioId, run: &CoupledRun, failure: Option<String>) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            total_steps: run.steps,
            final_time_ms: run.final_time,
            failure_reason: failure,
            metrics: ScenarioMetrics {
                compartments: run.observations.len(),
                field_writes: run.stats.writes,
                final_total: run.observations.iter().map(|o| o.count).sum(),
            },
        }
    }

    /// KB-001: AbBinding - every segment runs its own A + B -> AB instance.
    ///
    /// **Assertion**: per compartment, the AB field trace never decreases and
    /// its final value equals the converted final count.
    fn run_ab_binding(&self) -> Result<ScenarioResult, SimError> {
        info!("KB-001: AbBinding - {} segment(s), {}ms", self.nseg, self.duration_ms);

        let definition = self.definition_path()?;
        let gateway = SimGateway::shared(self.seed);
        let run = run_coupled(
            Arc::clone(&gateway),
            self.config(&definition)?,
            dendrite(self.nseg)?,
            self.dt_ms,
            self.duration_ms,
            "AB",
        )?;

        let failure = check_binding(&run, self.conversion())
            .or_else(|| {
                let live = gateway.live_instances();
                (live != 0).then(|| format!("{} instance(s) leaked after teardown", live))
            });
        Ok(self.result(ScenarioId::AbBinding, &run, failure))
    }

    /// KB-002: BadDefinition - a syntax error must abort `finitialize`.
    fn run_bad_definition(&self) -> Result<ScenarioResult, SimError> {
        info!("KB-002: BadDefinition");

        let definition = write_model("%agent: A()\n%obs: 'A' |A()|\nA() -> A()\n", "bad")?;
        let gateway = SimGateway::shared(self.seed);
        let mut engine = FixedStepEngine::new(dendrite(self.nseg)?, self.dt_ms)?;
        let config = CouplingConfig::new(REGION, &definition, self.conversion())?
            .with_species(["A"])
            .with_seed(self.seed);
        let (coupling, mut registration) =
            Coupling::attach(Arc::clone(&gateway), config, engine.supervisor())?;

        let outcome = engine.finitialize();
        registration.unregister(engine.supervisor());
        coupling.teardown()?;

        let failure = match outcome {
            Err(SimError::Coupling(CouplingError::DefinitionLoad { path, .. })) if path == definition => {
                info!("  rejected as expected: {}", path.display());
                None
            }
            Err(other) => Some(format!("unexpected error: {}", other)),
            Ok(()) => Some("finitialize accepted a malformed definition".to_string()),
        }
        .or_else(|| {
            let live = gateway.live_instances();
            (live != 0).then(|| format!("{} instance(s) leaked after failed initialize", live))
        });

        Ok(ScenarioResult {
            scenario: ScenarioId::BadDefinition,
            seed: self.seed,
            passed: failure.is_none(),
            total_steps: engine.steps(),
            final_time_ms: engine.t(),
            failure_reason: failure,
            metrics: ScenarioMetrics::default(),
        })
    }

    /// KB-003: UnregisterMidway - hooks removed at t/2.
    ///
    /// **Assertion**: instance clocks stay at t/2 while the field reaches t.
    fn run_unregister_midway(&self) -> Result<ScenarioResult, SimError> {
        info!("KB-003: UnregisterMidway");

        let definition = self.definition_path()?;
        let gateway = SimGateway::shared(self.seed);
        let mut engine = FixedStepEngine::new(dendrite(self.nseg)?, self.dt_ms)?;
        let (coupling, mut registration) =
            Coupling::attach(Arc::clone(&gateway), self.config(&definition)?, engine.supervisor())?;

        let half = self.duration_ms / 2.0;
        let outcome = engine
            .finitialize()
            .and_then(|_| engine.continuerun(half))
            .and_then(|_| {
                registration.unregister(engine.supervisor());
                let before = instance_clocks(&coupling)?;
                engine.continuerun(self.duration_ms)?;
                let after = instance_clocks(&coupling)?;
                Ok((before, after))
            });

        registration.unregister(engine.supervisor());
        let stats = coupling.stats()?;
        coupling.teardown()?;
        let (before, after) = outcome?;

        let failure = if before != after {
            Some(format!("instances advanced after unregister: {:?} -> {:?}", before, after))
        } else if after.iter().any(|&t| (t - engine.t()).abs() < self.dt_ms / 2.0) {
            Some("instances kept pace with the field after unregister".to_string())
        } else {
            None
        };

        Ok(ScenarioResult {
            scenario: ScenarioId::UnregisterMidway,
            seed: self.seed,
            passed: failure.is_none(),
            total_steps: engine.steps(),
            final_time_ms: engine.t(),
            failure_reason: failure,
            metrics: ScenarioMetrics {
                compartments: before.len(),
                field_writes: stats.writes,
                final_total: 0.0,
            },
        })
    }

    /// KB-004: RpcRoundtrip - the remote gateway must reproduce local counts.
    fn run_rpc_roundtrip(&self) -> Result<ScenarioResult, SimError> {
        info!("KB-004: RpcRoundtrip");

        let definition = self.definition_path()?;
        let server = spawn_server("127.0.0.1:0", SimGateway::shared(self.seed))?;
        let remote = Arc::new(RpcGateway::connect(&server.addr().to_string())?);

        let remote_run = run_coupled(
            remote,
            self.config(&definition)?,
            dendrite(self.nseg)?,
            self.dt_ms,
            self.duration_ms,
            "AB",
        );
        if let Err(e) = server.shutdown() {
            warn!("Server shutdown failed: {}", e);
        }
        let remote_run = remote_run?;

        let local_run = run_coupled(
            SimGateway::shared(self.seed),
            self.config(&definition)?,
            dendrite(self.nseg)?,
            self.dt_ms,
            self.duration_ms,
            "AB",
        )?;

        let remote_counts: Vec<f64> = remote_run.observations.iter().map(|o| o.count).collect();
        let local_counts: Vec<f64> = local_run.observations.iter().map(|o| o.count).collect();
        let failure = (remote_counts != local_counts)
            .then(|| format!("remote {:?} != local {:?}", remote_counts, local_counts))
            .or_else(|| check_binding(&remote_run, self.conversion()));

        Ok(self.result(ScenarioId::RpcRoundtrip, &remote_run, failure))
    }
}

/// Non-decreasing field traces and final field value = converted count.
fn check_binding(run: &CoupledRun, conversion: UnitConversion) -> Option<String> {
    for obs in &run.observations {
        let trace = match run.traces.trace("AB", &obs.compartment) {
            Some(trace) => trace,
            None => return Some(format!("no trace for {}", obs.compartment)),
        };
        if !trace.is_non_decreasing() {
            return Some(format!("AB decreased in {}", obs.compartment));
        }
        let expected = match conversion.to_concentration(obs.count, obs.volume) {
            Ok(value) => value,
            Err(e) => return Some(e.to_string()),
        };
        if (obs.field_value - expected).abs() > expected.abs() * 1e-12 {
            return Some(format!(
                "{}: field {} != expected {}",
                obs.compartment, obs.field_value, expected
            ));
        }
        debug!("  {} AB={} conc={:.3e}", obs.compartment, obs.count, obs.field_value);
    }
    None
}

fn instance_clocks<G: EngineGateway>(coupling: &Coupling<G>) -> Result<Vec<f64>, SimError> {
    Ok(coupling.with_driver(|driver| {
        let registry = driver.registry().ok_or(CouplingError::NotInitialized)?;
        registry
            .compartments()
            .map(|c| registry.current_time(c))
            .collect::<Result<Vec<_>, CouplingError>>()
    })??)
}
