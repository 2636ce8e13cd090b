//! Coupling configuration.

use crate::error::CouplingError;
use crate::types::SpeciesDescriptor;
use crate::units::UnitConversion;
use kappabridge_env::{InstanceSpec, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Configuration for one coupling between a field region and a set of
/// stochastic instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Region of the continuous field under coupling
    pub region: String,

    /// Species to synchronize (each must be an observable in the definition)
    pub species: Vec<SpeciesDescriptor>,

    /// Reaction-network definition file, absolute once resolved
    pub definition_path: PathBuf,

    /// Time unit the stochastic instances run in (default: ms)
    #[serde(default)]
    pub time_unit: TimeUnit,

    /// Optional RNG seed shared by every instance
    #[serde(default)]
    pub seed: Option<u64>,

    /// Optional redirection target for the engine's own output
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Count → concentration policy
    pub conversion: UnitConversion,

    /// Ask the engine for reproducible instances (default: true)
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,

    /// Forwarded to every `advance` call (default: false)
    #[serde(default)]
    pub report_progress: bool,
}

fn default_deterministic() -> bool {
    true
}

impl CouplingConfig {
    /// Creates a configuration, resolving `definition` against the current
    /// working directory.
    pub fn new(
        region: impl Into<String>,
        definition: impl AsRef<Path>,
        conversion: UnitConversion,
    ) -> Result<Self, CouplingError> {
        Ok(Self {
            region: region.into(),
            species: Vec::new(),
            definition_path: resolve_path(definition.as_ref())?,
            time_unit: TimeUnit::default(),
            seed: None,
            output: None,
            conversion,
            deterministic: true,
            report_progress: false,
        })
    }

    /// Parses a JSON configuration and resolves its relative paths.
    pub fn from_json(text: &str) -> Result<Self, CouplingError> {
        let mut config: CouplingConfig = serde_json::from_str(text)
            .map_err(|e| CouplingError::config(format!("invalid coupling config: {}", e)))?;
        config.resolve_paths()?;
        Ok(config)
    }

    /// Adds species by name.
    pub fn with_species<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.species
            .extend(names.into_iter().map(SpeciesDescriptor::new));
        self
    }

    /// Sets the instance time unit.
    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    /// Sets the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Redirects engine output to a file.
    pub fn with_output(mut self, path: impl AsRef<Path>) -> Result<Self, CouplingError> {
        self.output = Some(resolve_path(path.as_ref())?);
        Ok(self)
    }

    /// Sets the progress-report flag forwarded to `advance`.
    pub fn with_progress(mut self, report: bool) -> Self {
        self.report_progress = report;
        self
    }

    /// Sets the determinism flag passed at instance creation.
    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Makes relative paths absolute against the current working directory.
    pub fn resolve_paths(&mut self) -> Result<(), CouplingError> {
        self.definition_path = resolve_path(&self.definition_path)?;
        if let Some(output) = self.output.take() {
            self.output = Some(resolve_path(&output)?);
        }
        Ok(())
    }

    /// Checks the configuration is usable before any instance is created.
    pub fn validate(&self) -> Result<(), CouplingError> {
        if self.region.is_empty() {
            return Err(CouplingError::config("region name is empty"));
        }
        if self.species.is_empty() {
            return Err(CouplingError::config("no species to couple"));
        }
        let mut seen = HashSet::new();
        for species in &self.species {
            if species.name.is_empty() {
                return Err(CouplingError::config("species name is empty"));
            }
            if !seen.insert(species.name.as_str()) {
                return Err(CouplingError::config(format!(
                    "species '{}' listed twice",
                    species.name
                )));
            }
        }
        self.conversion.check()?;
        if !self.definition_path.is_absolute() {
            return Err(CouplingError::config(format!(
                "definition path {} is not resolved",
                self.definition_path.display()
            )));
        }
        Ok(())
    }

    /// Instance creation parameters derived from this configuration.
    pub fn instance_spec(&self) -> InstanceSpec {
        InstanceSpec {
            time_unit: self.time_unit,
            deterministic: self.deterministic,
            seed: self.seed,
            output: self.output.clone(),
        }
    }
}

fn resolve_path(path: &Path) -> Result<PathBuf, CouplingError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| CouplingError::config(format!("cannot resolve {}: {}", path.display(), e)))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_definition_is_resolved() {
        let config = CouplingConfig::new("cyt", "ab.ka", UnitConversion::molar()).unwrap();
        assert!(config.definition_path.is_absolute());
        assert!(config.definition_path.ends_with("ab.ka"));
        assert_eq!(config.time_unit, TimeUnit::Milliseconds);
        assert!(config.deterministic);
    }

    #[test]
    fn test_builder_and_spec() {
        let config = CouplingConfig::new("cyt", "/models/ab.ka", UnitConversion::Identity)
            .unwrap()
            .with_species(["A", "B", "AB"])
            .with_seed(11)
            .with_time_unit(TimeUnit::Seconds);

        assert_eq!(config.species.len(), 3);
        assert!(config.validate().is_ok());

        let spec = config.instance_spec();
        assert_eq!(spec.seed, Some(11));
        assert_eq!(spec.time_unit, TimeUnit::Seconds);
        assert!(spec.deterministic);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let config = CouplingConfig::new("cyt", "/m.ka", UnitConversion::Identity).unwrap();
        assert!(config.validate().is_err());

        let config = config.with_species(["A", "A"]);
        assert!(matches!(config.validate(), Err(CouplingError::Config(_))));
    }

    #[test]
    fn test_from_json_defaults() {
        let text = r#"{
            "region": "cyt",
            "species": [{"name": "A"}, {"name": "AB"}],
            "definition_path": "models/ab.ka",
            "time_unit": "ms",
            "conversion": {"policy": "identity"}
        }"#;
        let config = CouplingConfig::from_json(text).unwrap();
        assert!(config.definition_path.is_absolute());
        assert!(config.deterministic);
        assert!(!config.report_progress);
        assert_eq!(config.seed, None);
        assert!(config.conversion.is_identity());
    }

    #[test]
    fn test_from_json_requires_conversion() {
        let text = r#"{"region": "cyt", "species": [], "definition_path": "/m.ka"}"#;
        assert!(CouplingConfig::from_json(text).is_err());
    }

    #[test]
    fn test_from_json_rejects_zero_molar_constant() {
        let text = r#"{
            "region": "cyt",
            "species": [{"name": "A"}],
            "definition_path": "/m.ka",
            "conversion": {"policy": "molar", "molecules_per_volume_conc": 0.0}
        }"#;
        assert!(matches!(
            CouplingConfig::from_json(text),
            Err(CouplingError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite_constant() {
        let mut config = CouplingConfig::new("cyt", "/m.ka", UnitConversion::molar())
            .unwrap()
            .with_species(["A"]);
        config.conversion = UnitConversion::Molar {
            molecules_per_volume_conc: f64::NAN,
        };
        assert!(matches!(config.validate(), Err(CouplingError::Config(_))));
    }
}
