//! Unit Conversion Policy - molecule counts to field concentrations.

use crate::error::CouplingError;
use serde::{Deserialize, Serialize};

/// Molecules per µm³ at 1 mM (Avogadro's number scaled for µm³ and mM).
///
/// `1 mM * 1 µm³ = 1e-3 mol/L * 1e-15 L = 1e-18 mol ≈ 602_214 molecules`.
pub const MOLECULES_PER_UM3_MM: f64 = 602_214.076;

/// How a stochastic count becomes a field concentration.
///
/// Chosen explicitly per coupling: the two engines may or may not have been
/// parameterized in the same units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnitConversion {
    /// Count is written unchanged
    Identity,

    /// `concentration = count / (volume * molecules_per_volume_conc)`
    Molar { molecules_per_volume_conc: f64 },
}

impl UnitConversion {
    /// Molar conversion for µm³ volumes and mM concentrations.
    pub fn molar() -> Self {
        UnitConversion::Molar {
            molecules_per_volume_conc: MOLECULES_PER_UM3_MM,
        }
    }

    /// Molar conversion with a custom scaled Avogadro constant.
    pub fn molar_with(molecules_per_volume_conc: f64) -> Result<Self, CouplingError> {
        let policy = UnitConversion::Molar {
            molecules_per_volume_conc,
        };
        policy.check()?;
        Ok(policy)
    }

    /// Rejects a molar constant that is not finite and positive.
    pub fn check(&self) -> Result<(), CouplingError> {
        match self {
            UnitConversion::Identity => Ok(()),
            UnitConversion::Molar {
                molecules_per_volume_conc,
            } => {
                if molecules_per_volume_conc.is_finite() && *molecules_per_volume_conc > 0.0 {
                    Ok(())
                } else {
                    Err(CouplingError::config(format!(
                        "conversion constant must be positive, got {}",
                        molecules_per_volume_conc
                    )))
                }
            }
        }
    }

    /// True when counts pass through unchanged.
    pub fn is_identity(&self) -> bool {
        matches!(self, UnitConversion::Identity)
    }

    /// Converts a molecule count in a compartment of `volume` to a concentration.
    pub fn to_concentration(&self, count: f64, volume: f64) -> Result<f64, CouplingError> {
        match self {
            UnitConversion::Identity => Ok(count),
            UnitConversion::Molar {
                molecules_per_volume_conc,
            } => {
                if !(volume.is_finite() && volume > 0.0) {
                    return Err(CouplingError::InvalidVolume(volume));
                }
                Ok(count / (volume * molecules_per_volume_conc))
            }
        }
    }

    /// Inverse of `to_concentration`.
    pub fn to_count(&self, concentration: f64, volume: f64) -> Result<f64, CouplingError> {
        match self {
            UnitConversion::Identity => Ok(concentration),
            UnitConversion::Molar {
                molecules_per_volume_conc,
            } => {
                if !(volume.is_finite() && volume > 0.0) {
                    return Err(CouplingError::InvalidVolume(volume));
                }
                Ok(concentration * volume * molecules_per_volume_conc)
            }
        }
    }
}

/// Wire form of `UnitConversion`; deserialized values pass through `molar_with`.
#[derive(Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
enum RawConversion {
    Identity,
    Molar { molecules_per_volume_conc: f64 },
}

impl<'de> Deserialize<'de> for UnitConversion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawConversion::deserialize(deserializer)?;
        UnitConversion::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<RawConversion> for UnitConversion {
    type Error = CouplingError;

    fn try_from(raw: RawConversion) -> Result<Self, Self::Error> {
        match raw {
            RawConversion::Identity => Ok(UnitConversion::Identity),
            RawConversion::Molar {
                molecules_per_volume_conc,
            } => UnitConversion::molar_with(molecules_per_volume_conc),
        }
    }
}
