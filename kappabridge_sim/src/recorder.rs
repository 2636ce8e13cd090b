//! In-memory concentration traces.

use crate::cable::CableModel;
use kappabridge_core::CompartmentId;
use serde::Serialize;

/// One watched (species, region, compartment) series.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub species: String,
    pub region: String,
    pub compartment: CompartmentId,

    /// (t, concentration) samples in recording order
    pub samples: Vec<(f64, f64)>,
}

impl Trace {
    /// Last sampled value.
    pub fn last(&self) -> Option<f64> {
        self.samples.last().map(|&(_, v)| v)
    }

    /// True if no sample is smaller than the one before it.
    pub fn is_non_decreasing(&self) -> bool {
        self.samples.windows(2).all(|w| w[1].1 >= w[0].1)
    }
}

/// Samples watched nodes after initialization and after every step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceRecorder {
    traces: Vec<Trace>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a series to record.
    pub fn watch(mut self, species: &str, region: &str, compartment: CompartmentId) -> Self {
        self.traces.push(Trace {
            species: species.to_string(),
            region: region.to_string(),
            compartment,
            samples: Vec::new(),
        });
        self
    }

    /// Drops all samples, keeping the watch list.
    pub fn clear(&mut self) {
        for trace in &mut self.traces {
            trace.samples.clear();
        }
    }

    /// Records the current value of every watched node. Unknown nodes are skipped.
    pub fn sample(&mut self, t: f64, model: &CableModel) {
        for trace in &mut self.traces {
            if let Some(value) = model.value(&trace.species, &trace.region, &trace.compartment) {
                trace.samples.push((t, value));
            }
        }
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// Trace for one series, if watched.
    pub fn trace(&self, species: &str, compartment: &CompartmentId) -> Option<&Trace> {
        self.traces
            .iter()
            .find(|t| t.species == species && &t.compartment == compartment)
    }
}
