//! Semblance core — the decision-making half of the action plane.
//!
//! The core holds the user's data and keys and decides *what* to
//! attempt; everything it attempts goes to the gateway over IPC as a
//! signed request. This crate wires policy, approval patterns, the
//! request signer, the witness generator, and the inheritance executor
//! into one orchestrator.

#![forbid(unsafe_code)]

pub mod config;
pub mod orchestrator;
pub mod signer;

pub use config::CoreConfig;
pub use orchestrator::{
    ApprovalProvider, AutoApprove, ExecutionReport, IntentOutcome, Orchestrator, OrchestratorOptions,
};
pub use signer::RequestSigner;

use semblance_inherit::InheritError;
use semblance_ipc::IpcError;
use semblance_witness::WitnessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),

    #[error("inheritance error: {0}")]
    Inherit(#[from] InheritError),

    #[error("witness error: {0}")]
    Witness(#[from] WitnessError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
