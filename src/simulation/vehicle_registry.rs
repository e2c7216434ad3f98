//! Vehicle arena and per-lane ordering
//!
//! Vehicles live in a `Vec` indexed by [`VehicleId`] and are never removed,
//! so ids stay stable for trip records. Each lane keeps its occupants in a
//! `BTreeMap` keyed by position: the first entry is the tail, the last entry
//! is the head closest to the stop line.

use log::trace;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::ops::Bound;

use super::config::VehicleParams;
use super::error::{SimError, SimResult};
use super::road_network::RoadNetwork;
use super::traffic_light::Signal;
use super::types::{Heading, IntersectionId, LaneId, VehicleId, STOP_LINE_CLEARANCE};
use super::vehicle::{safe_speed, Vehicle, CLAMP_TOLERANCE};

/// What happened during one kinematic pass
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Vehicles that moved through an intersection
    pub crossings: Vec<(VehicleId, IntersectionId)>,
    pub exits: Vec<VehicleId>,
    pub clamps: u64,
}

#[derive(Debug, Default)]
pub struct VehicleRegistry {
    vehicles: Vec<Vehicle>,
    lanes: Vec<BTreeMap<OrderedFloat<f32>, VehicleId>>,
    in_system: usize,
    exited: usize,
    dropped_spawns: u64,
    clamps: u64,
}

impl VehicleRegistry {
    pub fn new(lane_count: usize) -> Self {
        Self {
            lanes: vec![BTreeMap::new(); lane_count],
            ..Self::default()
        }
    }

    fn occupants(&self, lane: LaneId) -> SimResult<&BTreeMap<OrderedFloat<f32>, VehicleId>> {
        self.lanes.get(lane.0).ok_or(SimError::LaneNotFound(lane))
    }

    /// Position of the rearmost vehicle on `lane`
    pub fn tail_position(&self, lane: LaneId) -> Option<f32> {
        self.lanes
            .get(lane.0)?
            .first_key_value()
            .map(|(pos, _)| pos.into_inner())
    }

    /// Occupants of `lane`, tail first
    pub fn lane_vehicles(&self, lane: LaneId) -> impl Iterator<Item = &Vehicle> + '_ {
        self.lanes
            .get(lane.0)
            .into_iter()
            .flat_map(|map| map.values())
            .map(move |id| &self.vehicles[id.0])
    }

    pub fn vehicle_count(&self, lane: LaneId) -> usize {
        self.lanes.get(lane.0).map_or(0, BTreeMap::len)
    }

    /// Vehicles on `lane` slower than `moving_threshold`
    pub fn queue_length(&self, lane: LaneId, moving_threshold: f32) -> usize {
        self.lane_vehicles(lane)
            .filter(|v| v.velocity < moving_threshold)
            .count()
    }

    /// The vehicle directly ahead of `position` on `lane`
    pub fn leader_of(&self, lane: LaneId, position: f32) -> Option<&Vehicle> {
        let key = OrderedFloat(position);
        self.lanes
            .get(lane.0)?
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, id)| &self.vehicles[id.0])
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id.0)
    }

    /// Every vehicle ever spawned, in id order
    pub fn all(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn active(&self) -> impl Iterator<Item = &Vehicle> + '_ {
        self.vehicles.iter().filter(|v| v.is_active())
    }

    pub fn spawned(&self) -> usize {
        self.vehicles.len()
    }

    pub fn exited(&self) -> usize {
        self.exited
    }

    pub fn in_system(&self) -> usize {
        self.in_system
    }

    pub fn dropped_spawns(&self) -> u64 {
        self.dropped_spawns
    }

    pub fn clamps(&self) -> u64 {
        self.clamps
    }

    /// Place a vehicle at the entry of `lane`. Returns `None` and counts a
    /// dropped spawn when the entry zone is still occupied.
    pub fn spawn(
        &mut self,
        lane: LaneId,
        desired_speed: f32,
        params: &VehicleParams,
        dt: f32,
        tick: u64,
    ) -> SimResult<Option<VehicleId>> {
        let tail = self.occupants(lane)?.first_key_value().map(|(p, _)| p.into_inner());
        if let Some(tail) = tail {
            if tail < params.min_gap_m {
                self.dropped_spawns += 1;
                return Ok(None);
            }
        }

        let id = VehicleId(self.vehicles.len());
        let mut vehicle = Vehicle::new(id, lane, desired_speed, params, tick);
        if let Some(tail) = tail {
            let room = tail - params.min_gap_m;
            vehicle.velocity = desired_speed.min(safe_speed(room, params.max_decel, dt));
        }
        self.vehicles.push(vehicle);
        self.lanes[lane.0].insert(OrderedFloat(0.0), id);
        self.in_system += 1;
        Ok(Some(id))
    }

    /// One kinematic pass over every lane, downstream lanes first and within
    /// a lane head first. `signal` reports what the light at an intersection
    /// shows to a heading, as it stood at the end of the previous tick.
    pub fn advance<F>(
        &mut self,
        network: &RoadNetwork,
        params: &VehicleParams,
        dt: f32,
        tick: u64,
        signal: F,
    ) -> SimResult<StepOutcome>
    where
        F: Fn(IntersectionId, Heading) -> Signal,
    {
        let mut outcome = StepOutcome::default();

        for &lane_id in network.processing_order() {
            let lane = network.lane(lane_id)?;
            let head_first: Vec<VehicleId> = self.lanes[lane_id.0].values().rev().copied().collect();
            let mut leader: Option<f32> = None;

            for id in head_first {
                let (position, velocity) = {
                    let v = &self.vehicles[id.0];
                    (v.position, v.velocity)
                };

                let mut limit = match leader {
                    Some(ahead) => ahead - params.min_gap_m,
                    None => self.head_limit(network, lane_id, position, velocity, params, dt, &signal)?,
                };
                if limit - position > params.sensing_range_m {
                    limit = f32::INFINITY;
                }

                self.lanes[lane_id.0].remove(&OrderedFloat(position));
                let vehicle = &mut self.vehicles[id.0];
                let was_moving = velocity >= params.moving_threshold;
                if vehicle.advance(limit, dt) {
                    outcome.clamps += 1;
                }

                if vehicle.position < lane.length {
                    let in_entry_zone =
                        lane.entry_side().is_some() && vehicle.position < params.min_gap_m;
                    vehicle.settle(was_moving, false, in_entry_zone, params.moving_threshold);
                    self.lanes[lane_id.0].insert(OrderedFloat(vehicle.position), id);
                    leader = Some(vehicle.position);
                    continue;
                }

                leader = None;
                match (lane.controlled_by(), network.next_lane(lane_id)) {
                    (Some(intersection), Some(next)) => {
                        vehicle.position -= lane.length;
                        vehicle.lane = next;
                        vehicle.settle(was_moving, true, false, params.moving_threshold);
                        trace!("{id:?} crossed {intersection} onto {next:?}");
                        self.lanes[next.0].insert(OrderedFloat(vehicle.position), id);
                        outcome.crossings.push((id, intersection));
                    }
                    _ => {
                        vehicle.exit(tick);
                        self.in_system -= 1;
                        self.exited += 1;
                        outcome.exits.push(id);
                    }
                }
            }
        }

        self.clamps += outcome.clamps;
        Ok(outcome)
    }

    /// Obstacle for the vehicle nearest the end of `lane`
    #[allow(clippy::too_many_arguments)]
    fn head_limit<F>(
        &self,
        network: &RoadNetwork,
        lane_id: LaneId,
        position: f32,
        velocity: f32,
        params: &VehicleParams,
        dt: f32,
        signal: &F,
    ) -> SimResult<f32>
    where
        F: Fn(IntersectionId, Heading) -> Signal,
    {
        let lane = network.lane(lane_id)?;
        let Some(intersection) = lane.controlled_by() else {
            return Ok(f32::INFINITY);
        };

        let stop_line = lane.length - STOP_LINE_CLEARANCE;
        let must_stop = match signal(intersection, lane.heading) {
            Signal::Green => false,
            Signal::Red => true,
            // Past the point where a comfortable stop is possible the vehicle clears.
            // A vehicle braking for the line sits exactly on its stopping distance.
            Signal::Yellow => {
                stop_line - position + CLAMP_TOLERANCE
                    >= velocity * dt + velocity * velocity / (2.0 * params.max_decel)
            }
        };
        if must_stop {
            return Ok(stop_line);
        }

        let downstream_tail = network
            .next_lane(lane_id)
            .and_then(|next| self.tail_position(next));
        Ok(match downstream_tail {
            Some(tail) => lane.length + tail - params.min_gap_m,
            None => f32::INFINITY,
        })
    }
}
