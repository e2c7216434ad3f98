//! Vehicle state and single-vehicle kinematics
//!
//! A vehicle only knows its own dynamics. Which obstacle it has to respect
//! (leader, stop line or the tail of the next lane) is decided by the
//! registry, which hands the resulting limit to [`Vehicle::advance`].

use serde::Serialize;

use super::config::VehicleParams;
use super::types::{LaneId, VehicleId};

/// Lifecycle of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleState {
    /// Still inside the entry zone of its spawn lane
    Entering,
    Traveling,
    /// Below the moving threshold
    Queued,
    /// Just moved onto the lane past an intersection
    Crossing,
    Exited,
}

/// Overshoot below this is float noise, not a missed braking point
pub(crate) const CLAMP_TOLERANCE: f32 = 1e-3;

/// Highest speed from which a vehicle covering one more tick at that speed
/// can still stop within `room` at `max_decel`, i.e. the root of
/// `v*dt + v^2/(2b) = room`, written in a cancellation-free form.
pub fn safe_speed(room: f32, max_decel: f32, dt: f32) -> f32 {
    if !room.is_finite() {
        return f32::INFINITY;
    }
    let bdt = max_decel * dt;
    2.0 * max_decel * room / (bdt + (bdt * bdt + 2.0 * max_decel * room).sqrt())
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub lane: LaneId,
    /// Front of the vehicle, metres from the start of `lane`
    pub position: f32,
    pub velocity: f32,
    pub desired_speed: f32,
    pub max_accel: f32,
    pub max_decel: f32,
    pub state: VehicleState,
    pub spawn_tick: u64,
    pub exit_tick: Option<u64>,
    pub wait_ticks: u64,
    pub stops: u32,
    pub distance_m: f32,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        lane: LaneId,
        desired_speed: f32,
        params: &VehicleParams,
        spawn_tick: u64,
    ) -> Self {
        Self {
            id,
            lane,
            position: 0.0,
            velocity: desired_speed,
            desired_speed,
            max_accel: params.max_accel,
            max_decel: params.max_decel,
            state: VehicleState::Entering,
            spawn_tick,
            exit_tick: None,
            wait_ticks: 0,
            stops: 0,
            distance_m: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != VehicleState::Exited
    }

    /// Move for one tick without passing `limit` (a position on the current
    /// lane, `f32::INFINITY` when nothing is in range), then pick the speed for
    /// the next tick. Returns true when the displacement had to be clamped.
    pub fn advance(&mut self, limit: f32, dt: f32) -> bool {
        let room = (limit - self.position).max(0.0);
        let mut displacement = self.velocity * dt;
        let mut clamped = false;
        if displacement > room {
            clamped = displacement - room > CLAMP_TOLERANCE;
            displacement = room;
            self.velocity = room / dt;
        }
        self.position += displacement;
        self.distance_m += displacement;

        let room = (limit - self.position).max(0.0);
        let target = self
            .desired_speed
            .min(safe_speed(room, self.max_decel, dt))
            .min(room / dt);
        let accel = ((target - self.velocity) / dt).clamp(-self.max_decel, self.max_accel);
        self.velocity = (self.velocity + accel * dt).clamp(0.0, self.desired_speed);
        clamped
    }

    /// Settle the lifecycle state and wait counters after a kinematic step
    pub fn settle(&mut self, was_moving: bool, crossed: bool, in_entry_zone: bool, moving_threshold: f32) {
        let stopped = self.velocity < moving_threshold;
        if stopped && was_moving {
            self.stops += 1;
        }
        self.state = if crossed {
            VehicleState::Crossing
        } else if stopped {
            VehicleState::Queued
        } else if in_entry_zone {
            VehicleState::Entering
        } else {
            VehicleState::Traveling
        };
        if stopped && matches!(self.state, VehicleState::Queued | VehicleState::Crossing) {
            self.wait_ticks += 1;
        }
    }

    pub fn exit(&mut self, tick: u64) {
        self.state = VehicleState::Exited;
        self.exit_tick = Some(tick);
        self.velocity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(speed: f32) -> Vehicle {
        Vehicle::new(VehicleId(0), LaneId(0), speed, &VehicleParams::default(), 0)
    }

    #[test]
    fn free_road_keeps_desired_speed() {
        let mut v = vehicle(10.0);
        assert!(!v.advance(f32::INFINITY, 1.0));
        assert_eq!(v.position, 10.0);
        assert_eq!(v.velocity, 10.0);
    }

    #[test]
    fn never_passes_the_limit() {
        let mut v = vehicle(12.0);
        v.position = 90.0;
        let clamped = v.advance(95.0, 1.0);
        assert!(clamped);
        assert!(v.position <= 95.0 + 1e-4);
        for _ in 0..10 {
            v.advance(95.0, 1.0);
            assert!(v.position <= 95.0 + 1e-4);
        }
        assert!(v.velocity < 0.5);
    }

    #[test]
    fn brakes_smoothly_from_far_away() {
        let mut v = vehicle(10.0);
        let mut clamps = 0;
        for _ in 0..30 {
            if v.advance(80.0, 1.0) {
                clamps += 1;
            }
        }
        assert_eq!(clamps, 0);
        assert!((80.0 - v.position) < 0.5);
    }

    #[test]
    fn safe_speed_stops_in_room() {
        let v = safe_speed(20.0, 4.5, 1.0);
        assert!((v + v * v / 9.0 - 20.0).abs() < 1e-3);
        assert_eq!(safe_speed(0.0, 4.5, 1.0), 0.0);
    }

    #[test]
    fn stop_transition_counted_once() {
        let mut v = vehicle(10.0);
        v.velocity = 0.0;
        v.settle(true, false, false, 0.5);
        v.settle(false, false, false, 0.5);
        assert_eq!(v.stops, 1);
        assert_eq!(v.wait_ticks, 2);
        assert_eq!(v.state, VehicleState::Queued);
    }
}
