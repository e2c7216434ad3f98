//! Trained-policy inference
//!
//! A policy maps a fixed observation vector to one of three actions. The
//! training pipeline lives elsewhere; this side only loads the exported
//! artifact and evaluates it.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{Oracle, OracleError, OracleFuture, OracleRequest, OracleResponse};
use crate::simulation::strategy::ApproachState;
use crate::simulation::traffic_light::Phase;
use crate::simulation::types::{Approach, Axis};

/// Observation layout:
/// `[ns_vehicles, ew_vehicles, ns_queue, ew_queue, ns_green, ew_green, yellow, time_in_phase]`
pub const OBSERVATION_LEN: usize = 8;

/// Counts and the phase timer are capped so every feature stays in `[0, 10]`
const FEATURE_CAP: f32 = 10.0;
const TICKS_PER_TIME_UNIT: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Maintain,
    NsGreen,
    EwGreen,
}

impl PolicyAction {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PolicyAction::Maintain),
            1 => Some(PolicyAction::NsGreen),
            2 => Some(PolicyAction::EwGreen),
            _ => None,
        }
    }

    fn into_response(self) -> OracleResponse {
        match self {
            PolicyAction::Maintain => OracleResponse::NoChange,
            PolicyAction::NsGreen => OracleResponse::Phase(Phase::NsGreen),
            PolicyAction::EwGreen => OracleResponse::Phase(Phase::EwGreen),
        }
    }
}

/// Inference contract of a trained policy
pub trait PhasePolicy: Send + Sync + 'static {
    fn act(&self, observation: &[f32; OBSERVATION_LEN]) -> Result<PolicyAction, OracleError>;
}

pub fn observation_vector(request: &OracleRequest) -> [f32; OBSERVATION_LEN] {
    let flag = |on: bool| if on { 1.0 } else { 0.0 };
    [
        axis_total(request, Axis::NorthSouth, |a| a.vehicle_count),
        axis_total(request, Axis::EastWest, |a| a.vehicle_count),
        axis_total(request, Axis::NorthSouth, |a| a.queue_length),
        axis_total(request, Axis::EastWest, |a| a.queue_length),
        flag(request.phase == Phase::NsGreen),
        flag(request.phase == Phase::EwGreen),
        flag(request.phase.is_yellow()),
        (request.ticks_in_phase as f32 / TICKS_PER_TIME_UNIT).min(FEATURE_CAP),
    ]
}

fn axis_total(request: &OracleRequest, axis: Axis, field: impl Fn(&ApproachState) -> usize) -> f32 {
    let total: usize = Approach::ALL
        .iter()
        .filter(|a| a.axis() == axis)
        .map(|a| field(&request.approaches[a.index()]))
        .sum();
    (total as f32).min(FEATURE_CAP)
}

/// Linear scoring policy: `argmax(W x + b)` over the three actions
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearPolicy {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearPolicy {
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self, OracleError> {
        let policy = Self { weights, bias };
        policy.validate()?;
        Ok(policy)
    }

    /// Load an exported policy artifact (`{"weights": [[..8]; 3], "bias": [..3]}`)
    pub fn load(path: &Path) -> Result<Self, OracleError> {
        let text = fs::read_to_string(path)
            .map_err(|e| OracleError::Policy(format!("reading {}: {e}", path.display())))?;
        let policy: LinearPolicy = serde_json::from_str(&text)
            .map_err(|e| OracleError::Policy(format!("parsing {}: {e}", path.display())))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), OracleError> {
        if self.weights.len() != 3 || self.bias.len() != 3 {
            return Err(OracleError::Policy(format!(
                "expected 3 action rows, got {} weight rows and {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != OBSERVATION_LEN) {
            return Err(OracleError::Policy(format!(
                "weight row has {} entries, expected {OBSERVATION_LEN}",
                row.len()
            )));
        }
        Ok(())
    }
}

impl PhasePolicy for LinearPolicy {
    fn act(&self, observation: &[f32; OBSERVATION_LEN]) -> Result<PolicyAction, OracleError> {
        let mut best: Option<(usize, f32)> = None;
        for (index, (row, bias)) in self.weights.iter().zip(&self.bias).enumerate() {
            let score: f32 = row.iter().zip(observation).map(|(w, x)| w * x).sum::<f32>() + bias;
            if !score.is_finite() {
                return Err(OracleError::Policy(format!("non-finite score for action {index}")));
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((index, score)),
            }
        }
        best.and_then(|(index, _)| PolicyAction::from_index(index))
            .ok_or_else(|| OracleError::Policy("policy has no actions".to_string()))
    }
}

/// Serves a [`PhasePolicy`] through the oracle interface. Inference runs on
/// the runtime's blocking pool.
pub struct PolicyOracle<P: PhasePolicy> {
    policy: Arc<P>,
}

impl<P: PhasePolicy> PolicyOracle<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl<P: PhasePolicy> Oracle for PolicyOracle<P> {
    fn name(&self) -> &str {
        "policy"
    }

    fn query(&self, request: OracleRequest) -> OracleFuture {
        let policy = Arc::clone(&self.policy);
        let observation = observation_vector(&request);
        Box::pin(async move {
            let action = tokio::task::spawn_blocking(move || policy.act(&observation))
                .await
                .map_err(|e| OracleError::Policy(format!("inference task failed: {e}")))??;
            Ok(action.into_response())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::IntersectionId;

    fn request(phase: Phase, ew_queue: usize) -> OracleRequest {
        let mut approaches = [ApproachState::default(); 4];
        approaches[Approach::West.index()] = ApproachState {
            queue_length: ew_queue,
            vehicle_count: ew_queue,
            density: ew_queue as f32 * 10.0,
        };
        OracleRequest {
            tick: 10,
            intersection: IntersectionId(0, 0),
            approaches,
            phase,
            ticks_in_phase: 120,
        }
    }

    /// Prefers EW green once three or more vehicles queue there
    fn queue_policy() -> LinearPolicy {
        let mut ew = vec![0.0; OBSERVATION_LEN];
        ew[3] = 1.0;
        let idle = vec![0.0; OBSERVATION_LEN];
        LinearPolicy::new(vec![idle.clone(), idle, ew], vec![2.5, 0.0, 0.0]).unwrap()
    }

    #[test]
    fn observation_layout() {
        let obs = observation_vector(&request(Phase::NsGreen, 14));
        assert_eq!(obs, [0.0, 10.0, 0.0, 10.0, 1.0, 0.0, 0.0, 10.0]);
    }

    #[test]
    fn argmax_picks_action() {
        let policy = queue_policy();
        let quiet = observation_vector(&request(Phase::NsGreen, 1));
        let busy = observation_vector(&request(Phase::NsGreen, 4));
        assert_eq!(policy.act(&quiet).unwrap(), PolicyAction::Maintain);
        assert_eq!(policy.act(&busy).unwrap(), PolicyAction::EwGreen);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(matches!(
            LinearPolicy::new(vec![vec![0.0; 3]; 3], vec![0.0; 3]),
            Err(OracleError::Policy(_))
        ));
        assert!(LinearPolicy::new(vec![vec![0.0; OBSERVATION_LEN]; 2], vec![0.0; 2]).is_err());
    }

    #[test]
    fn oracle_runs_inference_on_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let oracle = PolicyOracle::new(queue_policy());
        let answer = runtime.block_on(oracle.query(request(Phase::NsGreen, 5))).unwrap();
        assert_eq!(answer, OracleResponse::Phase(Phase::EwGreen));
    }
}
