//! Cable-geometry concentration field.
//!
//! Sections are unbranched cylinders split into `nseg` equal segments. A
//! species declared on a region gets one node per segment of every section
//! in that region; node volume is `π (diam/2)² · length / nseg` in µm³.

use crate::error::SimError;
use kappabridge_core::{CompartmentId, ConcentrationField, CouplingError, FieldNode, NodeHandle};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Largest explicit diffusion number `D·dt/dx²` per substep.
const MAX_DIFFUSION_NUMBER: f64 = 0.4;

/// An unbranched cylinder.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,

    /// Number of segments
    pub nseg: u32,

    /// Length in µm
    pub length: f64,

    /// Diameter in µm
    pub diam: f64,
}

impl Section {
    pub fn new(name: impl Into<String>, nseg: u32, length: f64, diam: f64) -> Self {
        Self {
            name: name.into(),
            nseg,
            length,
            diam,
        }
    }

    /// Volume of one segment, µm³.
    pub fn segment_volume(&self) -> f64 {
        PI * (self.diam / 2.0).powi(2) * self.length / self.nseg as f64
    }

    fn segment_length(&self) -> f64 {
        self.length / self.nseg as f64
    }
}

/// A species living on a region.
#[derive(Debug, Clone)]
struct SpeciesEntry {
    name: String,
    region: String,

    /// Initial concentration, mM
    initial: f64,

    /// Diffusion coefficient, µm²/ms
    diffusion: f64,

    /// Node index ranges per section, in section order
    runs: Vec<(usize, std::ops::Range<usize>)>,
}

#[derive(Debug, Clone)]
struct Node {
    compartment: CompartmentId,
    volume: f64,
    concentration: f64,
}

/// Sections, regions and per-segment species concentrations.
#[derive(Debug, Clone, Default)]
pub struct CableModel {
    sections: Vec<Section>,
    regions: HashMap<String, Vec<usize>>,
    species: Vec<SpeciesEntry>,
    nodes: Vec<Node>,
}

impl CableModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a section. Names must be unique; geometry must be positive.
    pub fn add_section(&mut self, section: Section) -> Result<&mut Self, SimError> {
        if section.nseg == 0 || !(section.length > 0.0) || !(section.diam > 0.0) {
            return Err(SimError::invalid_model(format!(
                "section {} needs nseg > 0 and positive length/diam",
                section.name
            )));
        }
        if self.section_index(&section.name).is_some() {
            return Err(SimError::invalid_model(format!("section {} defined twice", section.name)));
        }
        self.sections.push(section);
        Ok(self)
    }

    /// Declares a region spanning the named sections.
    pub fn add_region(&mut self, name: &str, sections: &[&str]) -> Result<&mut Self, SimError> {
        let indices = sections
            .iter()
            .map(|s| {
                self.section_index(s)
                    .ok_or_else(|| SimError::invalid_model(format!("region {} names unknown section {}", name, s)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.regions.insert(name.to_string(), indices);
        Ok(self)
    }

    /// Declares a species on a region with an initial concentration (mM)
    /// and diffusion coefficient (µm²/ms).
    pub fn add_species(
        &mut self,
        name: &str,
        region: &str,
        initial: f64,
        diffusion: f64,
    ) -> Result<&mut Self, SimError> {
        if self.entry(name, region).is_some() {
            return Err(SimError::invalid_model(format!("species {} already on {}", name, region)));
        }
        let sections = self
            .regions
            .get(region)
            .ok_or_else(|| SimError::invalid_model(format!("unknown region {}", region)))?;

        let mut runs = Vec::with_capacity(sections.len());
        for &s in sections {
            let section = &self.sections[s];
            let start = self.nodes.len();
            for seg in 0..section.nseg {
                self.nodes.push(Node {
                    compartment: CompartmentId::new(section.name.clone(), seg),
                    volume: section.segment_volume(),
                    concentration: initial,
                });
            }
            runs.push((s, start..self.nodes.len()));
        }

        self.species.push(SpeciesEntry {
            name: name.to_string(),
            region: region.to_string(),
            initial,
            diffusion,
            runs,
        });
        Ok(self)
    }

    fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    fn entry(&self, species: &str, region: &str) -> Option<&SpeciesEntry> {
        self.species
            .iter()
            .find(|e| e.name == species && e.region == region)
    }

    /// Restores every node to its species' initial concentration.
    pub fn reset(&mut self) {
        for entry in &self.species {
            for (_, run) in &entry.runs {
                for node in &mut self.nodes[run.clone()] {
                    node.concentration = entry.initial;
                }
            }
        }
    }

    /// Explicit-Euler axial diffusion with no-flux section ends, subcycled so
    /// each substep stays below `MAX_DIFFUSION_NUMBER`.
    pub fn diffuse(&mut self, dt: f64) {
        let mut scratch = Vec::new();
        for entry in &self.species {
            if entry.diffusion <= 0.0 {
                continue;
            }
            for (s, run) in &entry.runs {
                let section = &self.sections[*s];
                if section.nseg < 2 {
                    continue;
                }
                let dx = section.segment_length();
                let number = entry.diffusion * dt / (dx * dx);
                let substeps = (number / MAX_DIFFUSION_NUMBER).ceil().max(1.0) as usize;
                let r = number / substeps as f64;

                let nodes = &mut self.nodes[run.clone()];
                for _ in 0..substeps {
                    scratch.clear();
                    scratch.extend(nodes.iter().map(|n| n.concentration));
                    let last = scratch.len() - 1;
                    for (i, node) in nodes.iter_mut().enumerate() {
                        let left = scratch[i.saturating_sub(1)];
                        let right = scratch[(i + 1).min(last)];
                        node.concentration += r * (left - 2.0 * scratch[i] + right);
                    }
                }
            }
        }
    }

    /// Concentration of `species` on `region` at `compartment`.
    pub fn value(&self, species: &str, region: &str, compartment: &CompartmentId) -> Option<f64> {
        let entry = self.entry(species, region)?;
        entry
            .runs
            .iter()
            .flat_map(|(_, run)| self.nodes[run.clone()].iter())
            .find(|n| &n.compartment == compartment)
            .map(|n| n.concentration)
    }

    /// Total amount of `species` on `region`, in mM·µm³.
    pub fn total_amount(&self, species: &str, region: &str) -> Option<f64> {
        let entry = self.entry(species, region)?;
        Some(
            entry
                .runs
                .iter()
                .flat_map(|(_, run)| self.nodes[run.clone()].iter())
                .map(|n| n.concentration * n.volume)
                .sum(),
        )
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

impl ConcentrationField for CableModel {
    fn nodes(&self, species: &str, region: &str) -> Result<Vec<FieldNode>, CouplingError> {
        let entry = self
            .entry(species, region)
            .ok_or_else(|| CouplingError::UnknownSpecies {
                species: species.to_string(),
                region: region.to_string(),
            })?;

        Ok(entry
            .runs
            .iter()
            .flat_map(|(_, run)| run.clone())
            .map(|i| FieldNode {
                handle: NodeHandle(i),
                compartment: self.nodes[i].compartment.clone(),
                volume: self.nodes[i].volume,
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
