//! Coupled-run scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// KB-001: A + B -> AB across every segment, field tracks AB
    AbBinding,

    /// KB-002: Malformed definition fails initialize without leaking instances
    BadDefinition,

    /// KB-003: Unregister half-way; instances stop advancing
    UnregisterMidway,

    /// KB-004: Same run through the TCP gateway matches the in-process one
    RpcRoundtrip,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::AbBinding,
            ScenarioId::BadDefinition,
            ScenarioId::UnregisterMidway,
            ScenarioId::RpcRoundtrip,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::AbBinding => "ab_binding",
            ScenarioId::BadDefinition => "bad_definition",
            ScenarioId::UnregisterMidway => "unregister_midway",
            ScenarioId::RpcRoundtrip => "rpc_roundtrip",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::AbBinding => "Per-segment A + B -> AB, AB concentration non-decreasing and equal to count/(vol*K)",
            ScenarioId::BadDefinition => "Syntax error in the definition surfaces as DefinitionLoad naming the file",
            ScenarioId::UnregisterMidway => "Unregister at t/2; instance clocks freeze while the field keeps stepping",
            ScenarioId::RpcRoundtrip => "RpcGateway over TCP reproduces the in-process counts for the same seed",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ab_binding" | "abbinding" | "kb-001" => Ok(ScenarioId::AbBinding),
            "bad_definition" | "baddefinition" | "kb-002" => Ok(ScenarioId::BadDefinition),
            "unregister_midway" | "unregistermidway" | "kb-003" => Ok(ScenarioId::UnregisterMidway),
            "rpc_roundtrip" | "rpcroundtrip" | "kb-004" => Ok(ScenarioId::RpcRoundtrip),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
