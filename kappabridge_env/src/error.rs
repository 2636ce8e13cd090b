//! Error types for the stochastic engine gateway.

use crate::types::{BackendErrorKind, InstanceId};
use thiserror::Error;

/// Errors surfaced by a gateway or one of its instances.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The engine rejected the call (bad definition text, bad state, ...)
    #[error("Engine error ({kind}): {message}")]
    Backend {
        kind: BackendErrorKind,
        message: String,
    },

    /// Observable name is not declared by the loaded definition
    #[error("Unknown observable: {0}")]
    UnknownObservable(String),

    /// The engine has no instance with this id
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),

    /// Call issued in the wrong lifecycle phase (e.g. advance before initialize)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Call channel failed (connection refused, closed, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request/response framing or serialization failed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Call did not complete in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl GatewayError {
    /// Creates a backend error.
    pub fn backend(kind: BackendErrorKind, msg: impl Into<String>) -> Self {
        Self::Backend {
            kind,
            message: msg.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a protocol error.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Structured category of this error.
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            GatewayError::Backend { kind, .. } => *kind,
            GatewayError::UnknownObservable(_) => BackendErrorKind::UnknownObservable,
            GatewayError::UnknownInstance(_) => BackendErrorKind::UnknownInstance,
            GatewayError::InvalidState(_) => BackendErrorKind::IllegalState,
            GatewayError::Transport(_) => BackendErrorKind::Transport,
            GatewayError::Protocol(_) => BackendErrorKind::Protocol,
            GatewayError::Timeout(_) => BackendErrorKind::Timeout,
        }
    }

    /// The engine's own message, without any category prefix.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Backend { message, .. } => message.clone(),
            GatewayError::UnknownObservable(name) => format!("no observable named '{}'", name),
            GatewayError::UnknownInstance(id) => format!("no instance {}", id),
            GatewayError::InvalidState(msg)
            | GatewayError::Transport(msg)
            | GatewayError::Protocol(msg) => msg.clone(),
            GatewayError::Timeout(ms) => format!("no reply after {}ms", ms),
        }
    }
}
