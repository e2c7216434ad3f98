use super::{DecisionContext, IntersectionObservation, PhaseDecision, PhaseStrategy};
use crate::simulation::config::FixedTimeParams;

/// Ends every green after the same number of ticks, ignoring traffic
#[derive(Debug, Clone)]
pub struct FixedTime {
    green_ticks: u32,
}

impl FixedTime {
    pub fn new(params: FixedTimeParams) -> Self {
        Self {
            green_ticks: params.green_ticks,
        }
    }
}

impl PhaseStrategy for FixedTime {
    fn name(&self) -> &str {
        "fixed_time"
    }

    fn decide(&mut self, _ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision {
        if observation.phase.is_green() && observation.ticks_in_phase >= self.green_ticks {
            PhaseDecision::Switch
        } else {
            PhaseDecision::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::strategy::observation;
    use crate::simulation::traffic_light::Phase;

    #[test]
    fn switches_on_schedule() {
        let mut strategy = FixedTime::new(FixedTimeParams { green_ticks: 30 });
        let ctx = DecisionContext { tick: 0 };
        let early = observation(Phase::EwGreen, 29, 0.0, 500.0);
        let due = observation(Phase::EwGreen, 30, 0.0, 0.0);
        assert_eq!(strategy.decide(&ctx, &early), PhaseDecision::Hold);
        assert_eq!(strategy.decide(&ctx, &due), PhaseDecision::Switch);
    }
}
