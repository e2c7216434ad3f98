//! Phase-scheduling strategies
//!
//! A strategy looks at one intersection per call and proposes either to keep
//! the current green or to end it. Proposals go through the traffic-light
//! controller, which may refuse them; strategies never set phases directly.
//! One instance serves every intersection and keeps any per-intersection
//! memory itself.

mod adaptive;
mod external;
mod fixed_time;
mod wave_green;

use serde::Serialize;
use std::sync::Arc;

use super::config::{HeuristicConfig, SignalTiming};
use super::error::SimResult;
use super::metrics::OracleStats;
use super::road_network::RoadNetwork;
use super::traffic_light::Phase;
use super::types::{Approach, Axis, IntersectionId};
use crate::oracle::{build_oracle, Oracle};

pub use adaptive::{AdaptiveDensity, AdaptiveSimple};
pub use external::ExternalOracleStrategy;
pub use fixed_time::FixedTime;
pub use wave_green::WaveGreen;

/// Traffic conditions on one approach
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ApproachState {
    /// Vehicles below the moving threshold
    pub queue_length: usize,
    pub vehicle_count: usize,
    /// Vehicles per kilometre of approach lane
    pub density: f32,
}

/// What a strategy sees of one intersection at the end of a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionObservation {
    pub id: IntersectionId,
    /// Indexed by `Approach::index()`
    pub approaches: [ApproachState; 4],
    pub phase: Phase,
    pub ticks_in_phase: u32,
}

impl IntersectionObservation {
    pub fn approach(&self, approach: Approach) -> &ApproachState {
        &self.approaches[approach.index()]
    }

    fn on_axis(&self, axis: Axis) -> impl Iterator<Item = &ApproachState> + '_ {
        Approach::ALL
            .into_iter()
            .filter(move |a| a.axis() == axis)
            .map(move |a| self.approach(a))
    }

    /// Summed density of the two approaches of `axis`
    pub fn density(&self, axis: Axis) -> f32 {
        self.on_axis(axis).map(|a| a.density).sum()
    }

    pub fn queue_length(&self, axis: Axis) -> usize {
        self.on_axis(axis).map(|a| a.queue_length).sum()
    }

    pub fn vehicle_count(&self, axis: Axis) -> usize {
        self.on_axis(axis).map(|a| a.vehicle_count).sum()
    }

    pub fn total_queue(&self) -> usize {
        self.approaches.iter().map(|a| a.queue_length).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionContext {
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    Hold,
    Switch,
}

pub trait PhaseStrategy {
    fn name(&self) -> &str;

    fn decide(&mut self, ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision;

    /// Query statistics, for strategies backed by an oracle
    fn oracle_stats(&self) -> Option<OracleStats> {
        None
    }
}

/// Everything a strategy may need at construction time
pub struct StrategyContext<'a> {
    pub network: &'a RoadNetwork,
    pub target_speed: f32,
    pub tick_seconds: f32,
    pub signal: SignalTiming,
    /// Overrides the oracle that the configuration would build
    pub oracle: Option<Arc<dyn Oracle>>,
}

/// Instantiate the configured strategy once, at startup
pub fn build_strategy(
    config: &HeuristicConfig,
    ctx: &StrategyContext<'_>,
) -> SimResult<Box<dyn PhaseStrategy>> {
    Ok(match config {
        HeuristicConfig::FixedTime(params) => Box::new(FixedTime::new(*params)),
        HeuristicConfig::AdaptiveSimple(params) => Box::new(AdaptiveSimple::new(*params)),
        HeuristicConfig::AdaptiveDensity(params) => Box::new(AdaptiveDensity::new(params.clone())),
        HeuristicConfig::WaveGreen(params) => Box::new(WaveGreen::new(
            *params,
            ctx.network,
            ctx.target_speed,
            ctx.tick_seconds,
            ctx.signal.yellow_ticks,
        )?),
        HeuristicConfig::ExternalOracle(params) => {
            let oracle = match &ctx.oracle {
                Some(oracle) => Arc::clone(oracle),
                None => build_oracle(params)?,
            };
            let fallback_ctx = StrategyContext {
                oracle: None,
                ..*ctx
            };
            let fallback = build_strategy(&params.fallback, &fallback_ctx)?;
            Box::new(ExternalOracleStrategy::new(params, oracle, fallback)?)
        }
    })
}

#[cfg(test)]
pub(crate) fn observation(
    phase: Phase,
    ticks_in_phase: u32,
    ns_density: f32,
    ew_density: f32,
) -> IntersectionObservation {
    let state = |density: f32| ApproachState {
        queue_length: (density / 10.0) as usize,
        vehicle_count: (density / 10.0) as usize,
        density,
    };
    let mut approaches = [ApproachState::default(); 4];
    approaches[Approach::North.index()] = state(ns_density);
    approaches[Approach::East.index()] = state(ew_density);
    IntersectionObservation {
        id: IntersectionId(0, 0),
        approaches,
        phase,
        ticks_in_phase,
    }
}
