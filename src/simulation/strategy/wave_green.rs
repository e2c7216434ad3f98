//! Coordinated green wave
//!
//! All intersections run the same cycle `wave + yellow + cross + yellow`,
//! shifted by the travel time from the start of their row (or column) at the
//! target speed. A vehicle moving with the wave therefore reaches every
//! intersection at the same point of the local cycle.

use std::collections::BTreeMap;

use super::{DecisionContext, IntersectionObservation, PhaseDecision, PhaseStrategy};
use crate::simulation::config::WaveGreenParams;
use crate::simulation::error::SimResult;
use crate::simulation::road_network::RoadNetwork;
use crate::simulation::types::{Axis, Heading, IntersectionId};

#[derive(Debug, Clone)]
pub struct WaveGreen {
    axis: Axis,
    wave_green: u64,
    yellow: u64,
    cycle: u64,
    offsets: BTreeMap<IntersectionId, u64>,
}

impl WaveGreen {
    pub fn new(
        params: WaveGreenParams,
        network: &RoadNetwork,
        target_speed: f32,
        tick_seconds: f32,
        yellow_ticks: u32,
    ) -> SimResult<Self> {
        let wave_green = u64::from(params.wave_green_ticks);
        let yellow = u64::from(yellow_ticks);
        let cycle = wave_green + u64::from(params.cross_green_ticks) + 2 * yellow;
        let heading = wave_heading(params.axis, params.forward);
        let metres_per_tick = target_speed * tick_seconds;

        let mut offsets = BTreeMap::new();
        for id in network.intersections() {
            let distance = network.distance_along_axis(id, heading)?;
            let ticks = (distance / metres_per_tick).round() as u64;
            offsets.insert(id, ticks % cycle);
        }

        Ok(Self {
            axis: params.axis,
            wave_green,
            yellow,
            cycle,
            offsets,
        })
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn offset_for(&self, id: IntersectionId) -> Option<u64> {
        self.offsets.get(&id).copied()
    }

    /// Position of `tick` inside the local cycle of `id`
    pub fn local_time(&self, id: IntersectionId, tick: u64) -> u64 {
        let offset = self.offset_for(id).unwrap_or(0);
        (tick % self.cycle + self.cycle - offset) % self.cycle
    }

    fn wave_window(&self, tau: u64) -> bool {
        tau >= self.cycle - self.yellow || tau < self.wave_green
    }

    fn cross_window(&self, tau: u64) -> bool {
        tau >= self.wave_green && tau < self.cycle - self.yellow
    }
}

fn wave_heading(axis: Axis, forward: bool) -> Heading {
    match (axis, forward) {
        (Axis::EastWest, true) => Heading::Eastbound,
        (Axis::EastWest, false) => Heading::Westbound,
        (Axis::NorthSouth, true) => Heading::Southbound,
        (Axis::NorthSouth, false) => Heading::Northbound,
    }
}

impl PhaseStrategy for WaveGreen {
    fn name(&self) -> &str {
        "wave_green"
    }

    fn decide(&mut self, ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision {
        if !observation.phase.is_green() {
            return PhaseDecision::Hold;
        }
        let tau = self.local_time(observation.id, ctx.tick);
        let in_window = if observation.phase.axis() == self.axis {
            self.wave_window(tau)
        } else {
            self.cross_window(tau)
        };
        if in_window {
            PhaseDecision::Hold
        } else {
            PhaseDecision::Switch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::NetworkParams;
    use crate::simulation::strategy::observation;
    use crate::simulation::traffic_light::Phase;

    fn strategy() -> WaveGreen {
        let network = RoadNetwork::new_grid(
            1,
            3,
            &NetworkParams {
                spacing_m: 200.0,
                boundary_lane_m: 200.0,
            },
        )
        .unwrap();
        let params = WaveGreenParams {
            axis: Axis::EastWest,
            forward: true,
            wave_green_ticks: 30,
            cross_green_ticks: 20,
        };
        WaveGreen::new(params, &network, 10.0, 1.0, 5).unwrap()
    }

    #[test]
    fn offsets_follow_travel_time() {
        let wave = strategy();
        assert_eq!(wave.cycle(), 60);
        assert_eq!(wave.offset_for(IntersectionId(0, 0)), Some(0));
        assert_eq!(wave.offset_for(IntersectionId(0, 1)), Some(20));
        assert_eq!(wave.offset_for(IntersectionId(0, 2)), Some(40));
        assert_eq!(wave.local_time(IntersectionId(0, 1), 214), 14);
    }

    #[test]
    fn holds_inside_windows() {
        let mut wave = strategy();
        let ew = observation(Phase::EwGreen, 20, 0.0, 0.0);
        let ns = observation(Phase::NsGreen, 20, 0.0, 0.0);
        assert_eq!(wave.decide(&DecisionContext { tick: 10 }, &ew), PhaseDecision::Hold);
        assert_eq!(wave.decide(&DecisionContext { tick: 30 }, &ew), PhaseDecision::Switch);
        assert_eq!(wave.decide(&DecisionContext { tick: 40 }, &ns), PhaseDecision::Hold);
        assert_eq!(wave.decide(&DecisionContext { tick: 55 }, &ns), PhaseDecision::Switch);
        assert_eq!(wave.decide(&DecisionContext { tick: 57 }, &ew), PhaseDecision::Hold);
    }
}
