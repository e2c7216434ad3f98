//! Signalized intersection

use super::config::SignalTiming;
use super::road_network::RoadNetwork;
use super::error::SimResult;
use super::traffic_light::{Phase, PhaseTransition, Signal, TrafficLightController};
use super::types::{Approach, Heading, IntersectionId, LaneId, Position};

/// An intersection of the grid and the light that governs it
#[derive(Debug, Clone)]
pub struct SimIntersection {
    pub id: IntersectionId,
    pub position: Position,
    /// Incoming lanes, indexed by `Approach::index()`
    pub approaches: [LaneId; 4],
    /// Outgoing lanes, indexed by `Heading::index()`
    pub exits: [LaneId; 4],
    pub controller: TrafficLightController,
}

impl SimIntersection {
    pub fn new(network: &RoadNetwork, id: IntersectionId, timing: SignalTiming) -> SimResult<Self> {
        let mut exits = [LaneId(0); 4];
        for heading in Heading::ALL {
            exits[heading.index()] = network.exit_lane(id, heading)?;
        }
        Ok(Self {
            id,
            position: network.intersection_position(id),
            approaches: network.approach_lanes(id)?,
            exits,
            controller: TrafficLightController::new(timing),
        })
    }

    pub fn approach_lane(&self, approach: Approach) -> LaneId {
        self.approaches[approach.index()]
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    pub fn signal_for(&self, heading: Heading) -> Signal {
        self.controller.signal_for(heading)
    }

    /// Advance the light by one tick, reporting an automatic yellow expiry
    pub fn tick(&mut self, tick: u64) -> Option<PhaseTransition> {
        self.controller
            .tick()
            .map(|(from, to, ticks_in_phase)| PhaseTransition {
                tick,
                intersection: self.id,
                from,
                to,
                ticks_in_phase,
            })
    }
}
