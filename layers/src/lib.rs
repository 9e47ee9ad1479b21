//! Protocol Stack Layers Library
//!
//! This crate implements the upper physical layer substrate of the GNodeB:
//! buffer pools, uplink request handling, notifier adapters and the facade that
//! ties them together.

pub mod phy;

use common::executors::ExecutorError;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}
