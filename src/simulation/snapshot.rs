//! Read-only world snapshots for renderers and other observers

use serde::Serialize;

use super::traffic_light::Phase;
use super::types::{Heading, IntersectionId, LaneId, VehicleId};
use super::vehicle::VehicleState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub lane: LaneId,
    pub heading: Heading,
    pub position_m: f32,
    pub x: f32,
    pub y: f32,
    pub velocity: f32,
    pub state: VehicleState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionSnapshot {
    pub id: IntersectionId,
    pub phase: Phase,
    pub ticks_in_phase: u32,
    /// Queue length per approach, in `Approach::ALL` order
    pub queues: [usize; 4],
}

/// State of the world at a tick boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot>,
    pub intersections: Vec<IntersectionSnapshot>,
}
