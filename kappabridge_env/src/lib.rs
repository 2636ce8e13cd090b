//! kappabridge Engine Gateway Abstraction
//!
//! This crate describes the stochastic-kinetics engine as seen from a coupling:
//! a gateway that hands out simulation instances, and the instances
//! themselves. The same coupling code runs against a **Remote** engine
//! (`RpcGateway`, JSON lines over TCP) or an **In-process** deterministic one
//! (`SimGateway` in `kappabridge_sim`).
//!
//! # Core Concept: Explicit Gateway Handles
//!
//! There is no process-wide engine. The orchestrator builds one gateway and
//! passes it to each coupling; instance ids are unique per gateway, so any
//! number of couplings can share it.
//!
//! # Example
//!
//! ```ignore
//! use kappabridge_env::{EngineGateway, InstanceSpec, StochasticInstance, TimeUnit};
//!
//! fn run<G: EngineGateway>(gateway: &G) -> Result<f64, GatewayError> {
//!     let mut sim = gateway.create_instance(&InstanceSpec::new(TimeUnit::Milliseconds))?;
//!     sim.load_definition(Path::new("ab.ka"))?;
//!     sim.initialize()?;
//!     sim.advance(1.0, false)?;
//!     sim.observe("AB")
//! }
//! ```

mod error;
mod gateway;
pub mod protocol;
mod tokio_impl;
mod types;

pub use error::GatewayError;
pub use gateway::{EngineGateway, StochasticInstance};
pub use tokio_impl::{RpcGateway, RpcInstance, DEFAULT_CALL_TIMEOUT};
pub use types::{BackendErrorKind, InstanceId, InstanceSpec, TimeUnit};
