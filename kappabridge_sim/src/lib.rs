//! KappaBridge Deterministic Simulation Harness
//!
//! A controlled environment where a coupling runs end to end without any
//! external engine:
//! - **Stochastic side**: `SimGateway`, a seeded Gillespie engine reading a
//!   Kappa subset, usable in-process or served over TCP (`spawn_server`)
//! - **Continuous side**: `CableModel` + `FixedStepEngine`, a cable-geometry
//!   field stepped at fixed `dt` with a `BlockSupervisor` for hooks
//! - **Randomness**: all entropy derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ FixedStepEngine                                            │
//! │   CableModel (ConcentrationField)   BlockSupervisor        │
//! │        ▲  set_concentration              │ fixed_step(dt)  │
//! └────────┼─────────────────────────────────┼─────────────────┘
//!          │                                 ▼
//!     ┌────┴──────────────── Coupling (kappabridge_core) ──────┐
//!     │ SyncDriver → InstanceRegistry → one instance/segment   │
//!     └───────────────────────────┬────────────────────────────┘
//!                                 ▼
//!              SimGateway (in-process) │ RpcGateway → serve_gateway
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use kappabridge_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_nseg(3).run(ScenarioId::AbBinding);
//! assert!(result.passed);
//! ```

mod cable;
mod definition;
mod engine;
mod error;
mod gateway;
mod gillespie;
mod recorder;
mod runner;
pub mod scenarios;
mod server;

pub use cable::{CableModel, Section};
pub use definition::{DefinitionError, Observable, ReactionNetwork, Rule};
pub use engine::FixedStepEngine;
pub use error::SimError;
pub use gateway::{SimGateway, SimInstance};
pub use gillespie::SsaState;
pub use recorder::{Trace, TraceRecorder};
pub use runner::{
    dendrite, run_coupled, write_model, CoupledRun, Observation, ScenarioMetrics, ScenarioResult,
    ScenarioRunner, AB_MODEL, REGION, SPECIES,
};
pub use server::{serve_gateway, spawn_server, ServerHandle, Session};
