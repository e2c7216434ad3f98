//! Traffic-light state machine
//!
//! Each intersection owns one controller cycling
//! `NsGreen -> NsYellow -> EwGreen -> EwYellow -> NsGreen`. Strategies can only
//! *request* a switch; the controller enforces the minimum green and yellow
//! durations and is the sole authority over the phase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::SignalTiming;
use super::types::{Axis, Heading, IntersectionId};

/// Signal phase of an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NsGreen,
    NsYellow,
    EwGreen,
    EwYellow,
}

impl Phase {
    /// Cyclic successor
    pub fn next(&self) -> Phase {
        match self {
            Phase::NsGreen => Phase::NsYellow,
            Phase::NsYellow => Phase::EwGreen,
            Phase::EwGreen => Phase::EwYellow,
            Phase::EwYellow => Phase::NsGreen,
        }
    }

    /// The group holding right-of-way; during yellow, the group that is clearing
    pub fn axis(&self) -> Axis {
        match self {
            Phase::NsGreen | Phase::NsYellow => Axis::NorthSouth,
            Phase::EwGreen | Phase::EwYellow => Axis::EastWest,
        }
    }

    pub fn is_green(&self) -> bool {
        matches!(self, Phase::NsGreen | Phase::EwGreen)
    }

    pub fn is_yellow(&self) -> bool {
        !self.is_green()
    }

    pub fn green_for(axis: Axis) -> Phase {
        match axis {
            Axis::NorthSouth => Phase::NsGreen,
            Axis::EastWest => Phase::EwGreen,
        }
    }
}

/// Right-of-way answer for one heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Green,
    Yellow,
    Red,
}

/// Why a switch request was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRejected {
    MinimumNotReached { ticks_in_phase: u32, min_green_ticks: u32 },
    YellowInProgress,
}

/// Contract violations on the explicit transition API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("phase skip: {from:?} cannot go directly to {to:?}")]
    PhaseSkip { from: Phase, to: Phase },

    #[error("{phase:?} held {ticks_in_phase} ticks, needs {required}")]
    MinimumNotReached {
        phase: Phase,
        ticks_in_phase: u32,
        required: u32,
    },
}

/// One applied phase change, as recorded in the world's transition log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub tick: u64,
    pub intersection: IntersectionId,
    pub from: Phase,
    pub to: Phase,
    /// How long `from` had been active when it ended
    pub ticks_in_phase: u32,
}

#[derive(Debug, Clone)]
pub struct TrafficLightController {
    phase: Phase,
    ticks_in_phase: u32,
    timing: SignalTiming,
}

impl TrafficLightController {
    pub fn new(timing: SignalTiming) -> Self {
        Self {
            phase: Phase::NsGreen,
            ticks_in_phase: 0,
            timing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ticks_in_phase(&self) -> u32 {
        self.ticks_in_phase
    }

    /// Advance the phase timer; an expired yellow moves on to the opposing
    /// green. Returns `(from, to, ticks_in_phase)` when that happens.
    pub fn tick(&mut self) -> Option<(Phase, Phase, u32)> {
        self.ticks_in_phase += 1;
        if self.phase.is_yellow() && self.ticks_in_phase >= self.timing.yellow_ticks {
            let from = self.phase;
            let held = self.ticks_in_phase;
            self.phase = from.next();
            self.ticks_in_phase = 0;
            return Some((from, self.phase, held));
        }
        None
    }

    /// Ask to end the current green. Rejections leave the controller untouched.
    pub fn request_switch(&mut self) -> Result<(Phase, Phase, u32), SwitchRejected> {
        if self.phase.is_yellow() {
            return Err(SwitchRejected::YellowInProgress);
        }
        if self.ticks_in_phase < self.timing.min_green_ticks {
            return Err(SwitchRejected::MinimumNotReached {
                ticks_in_phase: self.ticks_in_phase,
                min_green_ticks: self.timing.min_green_ticks,
            });
        }
        let from = self.phase;
        let held = self.ticks_in_phase;
        self.phase = from.next();
        self.ticks_in_phase = 0;
        Ok((from, self.phase, held))
    }

    /// Explicit transition. Anything other than the cyclic successor, or
    /// leaving a phase before its minimum, is a contract violation.
    pub fn transition_to(&mut self, target: Phase) -> Result<(Phase, Phase, u32), SignalError> {
        if target != self.phase.next() {
            return Err(SignalError::PhaseSkip {
                from: self.phase,
                to: target,
            });
        }
        let required = if self.phase.is_green() {
            self.timing.min_green_ticks
        } else {
            self.timing.yellow_ticks
        };
        if self.ticks_in_phase < required {
            return Err(SignalError::MinimumNotReached {
                phase: self.phase,
                ticks_in_phase: self.ticks_in_phase,
                required,
            });
        }
        let from = self.phase;
        let held = self.ticks_in_phase;
        self.phase = target;
        self.ticks_in_phase = 0;
        Ok((from, target, held))
    }

    /// Signal shown to traffic travelling with `heading`
    pub fn signal_for(&self, heading: Heading) -> Signal {
        if heading.axis() != self.phase.axis() {
            Signal::Red
        } else if self.phase.is_green() {
            Signal::Green
        } else {
            Signal::Yellow
        }
    }

    /// True when `heading` may enter the intersection unconditionally
    pub fn grants(&self, heading: Heading) -> bool {
        self.signal_for(heading) == Signal::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> SignalTiming {
        SignalTiming {
            min_green_ticks: 3,
            yellow_ticks: 2,
        }
    }

    #[test]
    fn switch_rejected_before_minimum() {
        let mut light = TrafficLightController::new(timing());
        light.tick();
        assert!(matches!(
            light.request_switch(),
            Err(SwitchRejected::MinimumNotReached { ticks_in_phase: 1, .. })
        ));
        assert_eq!(light.phase(), Phase::NsGreen);
        assert_eq!(light.ticks_in_phase(), 1);
    }

    #[test]
    fn full_cycle() {
        let mut light = TrafficLightController::new(timing());
        for _ in 0..3 {
            assert!(light.tick().is_none());
        }
        assert_eq!(light.request_switch(), Ok((Phase::NsGreen, Phase::NsYellow, 3)));
        assert_eq!(light.request_switch(), Err(SwitchRejected::YellowInProgress));
        assert!(light.tick().is_none());
        assert_eq!(light.tick(), Some((Phase::NsYellow, Phase::EwGreen, 2)));
        assert!(light.grants(Heading::Eastbound));
        assert_eq!(light.signal_for(Heading::Northbound), Signal::Red);
    }

    #[test]
    fn phase_skip_is_rejected() {
        let mut light = TrafficLightController::new(timing());
        for _ in 0..5 {
            light.tick();
        }
        assert_eq!(
            light.transition_to(Phase::EwGreen),
            Err(SignalError::PhaseSkip {
                from: Phase::NsGreen,
                to: Phase::EwGreen
            })
        );
        assert_eq!(light.phase(), Phase::NsGreen);
        assert!(light.transition_to(Phase::NsYellow).is_ok());
        assert!(matches!(
            light.transition_to(Phase::EwGreen),
            Err(SignalError::MinimumNotReached { .. })
        ));
    }
}
