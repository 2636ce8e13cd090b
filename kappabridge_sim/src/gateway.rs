//! In-process stochastic engine implementing the gateway traits.

use crate::definition::ReactionNetwork;
use crate::gillespie::SsaState;
use kappabridge_env::{
    BackendErrorKind, EngineGateway, GatewayError, InstanceId, InstanceSpec, StochasticInstance,
    TimeUnit,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out seeded Gillespie instances.
///
/// Instance seeds, in order of precedence:
/// - `InstanceSpec::seed` when given (every such instance shares it)
/// - derived from the gateway seed and instance id when `deterministic`
/// - OS entropy otherwise
pub struct SimGateway {
    seed: u64,
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl SimGateway {
    /// Creates a gateway whose unseeded deterministic instances derive from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            next_id: AtomicU64::new(1),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates an Arc-wrapped gateway for sharing between couplings.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Instances created and not yet destroyed.
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn instance_rng(&self, id: InstanceId, spec: &InstanceSpec) -> ChaCha8Rng {
        match (spec.seed, spec.deterministic) {
            (Some(seed), _) => ChaCha8Rng::seed_from_u64(seed),
            (None, true) => {
                let derived = self.seed.wrapping_mul(0x9e3779b97f4a7c15) ^ id.as_u64();
                ChaCha8Rng::seed_from_u64(derived)
            }
            (None, false) => ChaCha8Rng::from_entropy(),
        }
    }
}

impl EngineGateway for SimGateway {
    type Instance = SimInstance;

    fn create_instance(&self, spec: &InstanceSpec) -> Result<SimInstance, GatewayError> {
        let id = InstanceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let output = match &spec.output {
            Some(path) => Some(ProgressLog::open(path)?),
            None => None,
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        debug!("Created {} (unit={}, seed={:?})", id, spec.time_unit, spec.seed);

        Ok(SimInstance {
            id,
            time_unit: spec.time_unit,
            rng: Some(self.instance_rng(id, spec)),
            phase: Phase::Empty,
            clock: 0.0,
            output,
            live: Arc::clone(&self.live),
        })
    }
}

enum Phase {
    Empty,
    Loaded(ReactionNetwork),
    Running(SsaState),
}

/// Appends progress lines to a redirected output file.
struct ProgressLog {
    path: PathBuf,
    file: File,
}

impl ProgressLog {
    fn open(path: &Path) -> Result<Self, GatewayError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                GatewayError::backend(
                    BackendErrorKind::Io,
                    format!("cannot open output {}: {}", path.display(), e),
                )
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn line(&mut self, text: &str) -> Result<(), GatewayError> {
        writeln!(self.file, "{}", text).map_err(|e| {
            GatewayError::backend(
                BackendErrorKind::Io,
                format!("cannot write {}: {}", self.path.display(), e),
            )
        })
    }
}

/// One stochastic trajectory; clock in its `TimeUnit`.
pub struct SimInstance {
    id: InstanceId,
    time_unit: TimeUnit,
    rng: Option<ChaCha8Rng>,
    phase: Phase,
    clock: f64,
    output: Option<ProgressLog>,
    live: Arc<AtomicUsize>,
}

impl SimInstance {
    fn running(&self) -> Result<&SsaState, GatewayError> {
        match &self.phase {
            Phase::Running(state) => Ok(state),
            _ => Err(GatewayError::InvalidState(format!("{} is not initialized", self.id))),
        }
    }

    /// Molecule counts per agent (empty before `initialize`).
    pub fn counts(&self) -> &[u64] {
        match &self.phase {
            Phase::Running(state) => state.counts(),
            _ => &[],
        }
    }
}

impl StochasticInstance for SimInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn load_definition(&mut self, path: &Path) -> Result<(), GatewayError> {
        if matches!(self.phase, Phase::Running(_)) {
            return Err(GatewayError::InvalidState(format!(
                "{} already initialized; cannot load {}",
                self.id,
                path.display()
            )));
        }
        let network = ReactionNetwork::load(path)?;
        info!(
            "{} loaded {} ({} agents, {} rules)",
            self.id,
            path.display(),
            network.agents().len(),
            network.rules().len()
        );
        self.phase = Phase::Loaded(network);
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), GatewayError> {
        let network = match std::mem::replace(&mut self.phase, Phase::Empty) {
            Phase::Loaded(network) => network,
            other => {
                self.phase = other;
                return Err(GatewayError::InvalidState(format!(
                    "{} needs exactly one load before initialize",
                    self.id
                )));
            }
        };
        let rng = self
            .rng
            .take()
            .ok_or_else(|| GatewayError::InvalidState(format!("{} already initialized", self.id)))?;
        self.phase = Phase::Running(SsaState::new(network, rng));
        self.clock = 0.0;
        Ok(())
    }

    fn advance(&mut self, dt: f64, report_progress: bool) -> Result<(), GatewayError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(GatewayError::InvalidState(format!("invalid step {}", dt)));
        }
        let state = match &mut self.phase {
            Phase::Running(state) => state,
            _ => return Err(GatewayError::InvalidState(format!("{} is not initialized", self.id))),
        };

        self.clock += dt;
        state.run_until(self.time_unit.to_seconds(self.clock));

        if report_progress {
            let line = format!(
                "{} t={}{} events={}",
                self.id,
                self.clock,
                self.time_unit.label(),
                state.events()
            );
            match self.output.as_mut() {
                Some(log) => log.line(&line)?,
                None => info!("{}", line),
            }
        }
        Ok(())
    }

    fn observe(&self, name: &str) -> Result<f64, GatewayError> {
        self.running()?
            .observe(name)
            .map(|count| count as f64)
            .ok_or_else(|| GatewayError::UnknownObservable(name.to_string()))
    }

    fn current_time(&self) -> Result<f64, GatewayError> {
        self.running()?;
        Ok(self.clock)
    }

    fn destroy(self) -> Result<(), GatewayError> {
        debug!("Destroyed {}", self.id);
        Ok(())
    }
}

impl Drop for SimInstance {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
