//! Harness errors.

use kappabridge_core::CouplingError;
use kappabridge_env::GatewayError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// Geometry or species declaration is unusable
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// `fadvance`/`continuerun` before `finitialize`
    #[error("Engine not initialized; call finitialize first")]
    NotInitialized,

    /// A registered hook failed; the run halts
    #[error(transparent)]
    Coupling(#[from] CouplingError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Server error: {0}")]
    Server(String),
}

impl SimError {
    pub fn invalid_model(msg: impl Into<String>) -> Self {
        Self::InvalidModel(msg.into())
    }
}
