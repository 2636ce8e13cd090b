//! Common types for the stochastic engine gateway.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a live stochastic-simulation instance.
///
/// Allocated by the gateway; unique for the lifetime of the gateway, so
/// several couplings sharing one gateway never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Returns the raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kappa#{}", self.0)
    }
}

/// Time unit an instance interprets `advance` deltas and reports its clock in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "s")]
    Seconds,
    #[default]
    #[serde(alias = "ms")]
    Milliseconds,
    #[serde(alias = "us")]
    Microseconds,
}

impl TimeUnit {
    /// Number of seconds in one unit.
    pub fn seconds_per_unit(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Microseconds => 1e-6,
        }
    }

    /// Converts a value in this unit to seconds.
    pub fn to_seconds(&self, value: f64) -> f64 {
        value * self.seconds_per_unit()
    }

    /// Converts a value in seconds to this unit.
    pub fn from_seconds(&self, seconds: f64) -> f64 {
        seconds / self.seconds_per_unit()
    }

    /// Short label ("s", "ms", "us").
    pub fn label(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Microseconds => "us",
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(TimeUnit::Seconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "us" | "µs" | "microseconds" => Ok(TimeUnit::Microseconds),
            _ => Err(format!("Unknown time unit: {}", s)),
        }
    }
}

/// Parameters for creating a new stochastic-simulation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Unit of `advance` deltas and of the reported clock
    pub time_unit: TimeUnit,

    /// Request reproducible behaviour from the engine
    pub deterministic: bool,

    /// Optional RNG seed (engine picks one when absent)
    pub seed: Option<u64>,

    /// Where the engine should send its own progress output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl InstanceSpec {
    /// Creates a deterministic spec with no seed and inherited output.
    pub fn new(time_unit: TimeUnit) -> Self {
        Self {
            time_unit,
            deterministic: true,
            seed: None,
            output: None,
        }
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the output-redirection target.
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }
}

/// Category of a failure reported by the engine behind the gateway.
///
/// Carried structurally instead of being embedded in a formatted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Malformed definition text
    Syntax,
    /// Well-formed definition that refers to undeclared things
    Semantic,
    /// Definition file could not be read
    Io,
    /// Operation not valid in the instance's current state
    IllegalState,
    /// Observable name not declared by the loaded definition
    UnknownObservable,
    /// Instance id not known to the engine
    UnknownInstance,
    /// Call channel failure (connection refused or closed)
    Transport,
    /// Request/response framing or serialization failure
    Protocol,
    /// Call did not complete in time
    Timeout,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendErrorKind::Syntax => "syntax",
            BackendErrorKind::Semantic => "semantic",
            BackendErrorKind::Io => "io",
            BackendErrorKind::IllegalState => "illegal state",
            BackendErrorKind::UnknownObservable => "unknown observable",
            BackendErrorKind::UnknownInstance => "unknown instance",
            BackendErrorKind::Transport => "transport",
            BackendErrorKind::Protocol => "protocol",
            BackendErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}
