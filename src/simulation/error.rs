//! Simulation error types.

use thiserror::Error;

use super::config::ConfigError;
use super::traffic_light::SignalError;
use super::types::{IntersectionId, LaneId};
use crate::oracle::OracleError;

/// Errors raised while building or driving a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid grid topology: {rows} rows x {cols} cols (both must be at least 1)")]
    InvalidTopology { rows: u32, cols: u32 },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("signal contract violated at intersection {intersection}: {source}")]
    Signal {
        intersection: IntersectionId,
        #[source]
        source: SignalError,
    },

    #[error("lane {0:?} not found")]
    LaneNotFound(LaneId),

    #[error("lane {0:?} is not an inbound boundary lane")]
    NotASpawnLane(LaneId),

    #[error("intersection {0} not found")]
    IntersectionNotFound(IntersectionId),

    #[error("oracle setup failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("async runtime could not be started: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Shorthand result type for the simulation modules.
pub type SimResult<T> = Result<T, SimError>;
