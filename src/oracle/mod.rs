//! External decision oracles
//!
//! An oracle answers "which group should hold the green at this
//! intersection?" from outside the engine: a trained policy evaluated
//! locally, or a language model behind an HTTP endpoint. Every backend is
//! asynchronous and used through [`Oracle`]; the simulation bounds each call
//! with a deadline and falls back to a local strategy on failure.

mod llm;
mod policy;

use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::simulation::config::{OracleEngine, OracleParams};
use crate::simulation::strategy::{ApproachState, IntersectionObservation};
use crate::simulation::traffic_light::Phase;
use crate::simulation::types::IntersectionId;

pub use llm::{
    parse_reply, render_prompt, LlmClient, LlmOracle, LlmReply, OllamaClient, OpenAiClient,
    ReplyAction,
};
pub use policy::{observation_vector, LinearPolicy, PhasePolicy, PolicyAction, PolicyOracle, OBSERVATION_LEN};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unusable reply: {0}")]
    InvalidReply(String),

    #[error("policy failure: {0}")]
    Policy(String),
}

/// State of one intersection sent to an oracle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub tick: u64,
    pub intersection: IntersectionId,
    /// Indexed by `Approach::index()`
    pub approaches: [ApproachState; 4],
    pub phase: Phase,
    pub ticks_in_phase: u32,
}

impl OracleRequest {
    pub fn from_observation(tick: u64, observation: &IntersectionObservation) -> Self {
        Self {
            tick,
            intersection: observation.id,
            approaches: observation.approaches,
            phase: observation.phase,
            ticks_in_phase: observation.ticks_in_phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleResponse {
    /// Keep whatever group holds the green now
    NoChange,
    /// Give the green to the group of this phase
    Phase(Phase),
}

pub type OracleFuture = Pin<Box<dyn Future<Output = Result<OracleResponse, OracleError>> + Send>>;

pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    fn query(&self, request: OracleRequest) -> OracleFuture;
}

/// Build the backend named by `params.engine`
pub fn build_oracle(params: &OracleParams) -> Result<Arc<dyn Oracle>, OracleError> {
    let timeout = Duration::from_millis(params.timeout_ms);
    Ok(match params.engine {
        OracleEngine::Policy => {
            let policy = LinearPolicy::load(Path::new(&params.model))?;
            Arc::new(PolicyOracle::new(policy))
        }
        OracleEngine::Ollama => {
            let client = OllamaClient::new(params.endpoint.as_deref(), &params.model, timeout);
            Arc::new(LlmOracle::new(client))
        }
        OracleEngine::OpenAi => {
            let client = OpenAiClient::from_env(params.endpoint.as_deref(), &params.model, timeout)?;
            Arc::new(LlmOracle::new(client))
        }
    })
}
