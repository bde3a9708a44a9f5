//! Deploys and wires the lending protocol, recording every address in a
//! resumable per-network ledger.

#[macro_use]
extern crate lazy_static;

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod constants;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod keys;
pub mod mock;
pub mod orchestrator;
pub mod pipelines;
pub mod solidity;
pub mod steps;
pub mod verifier;

pub use errors::{DeployError, VerificationError};
pub use executor::{DeployWarning, DeployedComponent, VerificationStatus};
pub use orchestrator::{Orchestrator, Pipeline, RunReport, RunState, StepStatus};
