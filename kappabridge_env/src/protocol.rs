//! Wire protocol between `RpcGateway` and a remote engine server.
//!
//! One JSON document per line, in both directions:
//!
//! ```text
//! client                                              server
//!   |-- {"id":1,"call":{"method":"observe",...}} ------>|
//!   |<----------- {"id":1,"outcome":{"ok":{"value":3.0}}}|
//! ```
//!
//! Responses are matched to requests by `id`; the client issues one call at a
//! time per connection.

use crate::error::GatewayError;
use crate::types::{BackendErrorKind, InstanceId, InstanceSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A gateway operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    CreateInstance(InstanceSpec),
    LoadDefinition { instance: InstanceId, path: PathBuf },
    Initialize { instance: InstanceId },
    Advance { instance: InstanceId, dt: f64, report_progress: bool },
    Observe { instance: InstanceId, name: String },
    CurrentTime { instance: InstanceId },
    Destroy { instance: InstanceId },
}

impl Call {
    /// Short method name for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Call::CreateInstance(_) => "create_instance",
            Call::LoadDefinition { .. } => "load_definition",
            Call::Initialize { .. } => "initialize",
            Call::Advance { .. } => "advance",
            Call::Observe { .. } => "observe",
            Call::CurrentTime { .. } => "current_time",
            Call::Destroy { .. } => "destroy",
        }
    }
}

/// A request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

/// Successful call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Instance(InstanceId),
    Value(f64),
    Done,
}

/// Failed call result, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl From<&GatewayError> for RemoteError {
    fn from(err: &GatewayError) -> Self {
        // Variant payloads travel bare so the client can rebuild the variant.
        let message = match err {
            GatewayError::UnknownObservable(name) => name.clone(),
            GatewayError::UnknownInstance(id) => id.as_u64().to_string(),
            GatewayError::Timeout(ms) => ms.to_string(),
            other => other.message(),
        };
        Self {
            kind: err.kind(),
            message,
        }
    }
}

impl From<RemoteError> for GatewayError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            BackendErrorKind::UnknownObservable => GatewayError::UnknownObservable(err.message),
            BackendErrorKind::IllegalState => GatewayError::InvalidState(err.message),
            BackendErrorKind::Transport => GatewayError::Transport(err.message),
            BackendErrorKind::Protocol => GatewayError::Protocol(err.message),
            BackendErrorKind::UnknownInstance => match err.message.parse() {
                Ok(id) => GatewayError::UnknownInstance(InstanceId(id)),
                Err(_) => GatewayError::backend(BackendErrorKind::UnknownInstance, err.message),
            },
            BackendErrorKind::Timeout => match err.message.parse() {
                Ok(ms) => GatewayError::Timeout(ms),
                Err(_) => GatewayError::Transport(err.message),
            },
            kind => GatewayError::Backend {
                kind,
                message: err.message,
            },
        }
    }
}

/// Outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Reply),
    Err(RemoteError),
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
}

impl Response {
    /// Builds a response from a local call result.
    pub fn from_result(id: u64, result: Result<Reply, GatewayError>) -> Self {
        let outcome = match result {
            Ok(reply) => Outcome::Ok(reply),
            Err(err) => Outcome::Err(RemoteError::from(&err)),
        };
        Self { id, outcome }
    }

    /// Converts the outcome back into a local result.
    pub fn into_result(self) -> Result<Reply, GatewayError> {
        match self.outcome {
            Outcome::Ok(reply) => Ok(reply),
            Outcome::Err(err) => Err(err.into()),
        }
    }
}

/// Encodes a message as one protocol line (including the trailing newline).
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, GatewayError> {
    let mut line = serde_json::to_string(msg).map_err(GatewayError::protocol)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one protocol line.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, GatewayError> {
    serde_json::from_str(line.trim_end()).map_err(GatewayError::protocol)
}
