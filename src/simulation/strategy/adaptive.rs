//! Density-driven strategies

use std::collections::BTreeMap;

use super::{DecisionContext, IntersectionObservation, PhaseDecision, PhaseStrategy};
use crate::simulation::config::{AdaptiveDensityParams, AdaptiveSimpleParams};
use crate::simulation::traffic_light::Phase;
use crate::simulation::types::IntersectionId;

/// Gives the green to whichever group is clearly denser
#[derive(Debug, Clone)]
pub struct AdaptiveSimple {
    params: AdaptiveSimpleParams,
}

impl AdaptiveSimple {
    pub fn new(params: AdaptiveSimpleParams) -> Self {
        Self { params }
    }
}

impl PhaseStrategy for AdaptiveSimple {
    fn name(&self) -> &str {
        "adaptive_simple"
    }

    fn decide(&mut self, _ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision {
        if !observation.phase.is_green() || observation.ticks_in_phase < self.params.min_green_ticks {
            return PhaseDecision::Hold;
        }
        let green = observation.phase.axis();
        let waiting = green.opposite();

        if observation.density(waiting) > observation.density(green) * self.params.dominance_ratio {
            return PhaseDecision::Switch;
        }
        if observation.ticks_in_phase >= self.params.max_green_ticks
            && observation.vehicle_count(waiting) > 0
        {
            return PhaseDecision::Switch;
        }
        PhaseDecision::Hold
    }
}

#[derive(Debug, Clone, Copy)]
struct GreenTarget {
    phase: Phase,
    ticks: u32,
    evaluated_at: u64,
}

/// Sizes each green from the density of the group holding it
#[derive(Debug, Clone)]
pub struct AdaptiveDensity {
    params: AdaptiveDensityParams,
    targets: BTreeMap<IntersectionId, GreenTarget>,
}

impl AdaptiveDensity {
    pub fn new(params: AdaptiveDensityParams) -> Self {
        Self {
            params,
            targets: BTreeMap::new(),
        }
    }

    /// Green length for a group currently carrying `density` veh/km
    pub fn green_ticks_for(&self, density: f32) -> u32 {
        let bucket = self
            .params
            .thresholds
            .iter()
            .filter(|threshold| density >= **threshold)
            .count();
        let extension = self.params.extensions.get(bucket).copied().unwrap_or(0);
        self.params.base_green_ticks + extension
    }
}

impl PhaseStrategy for AdaptiveDensity {
    fn name(&self) -> &str {
        "adaptive_density"
    }

    fn decide(&mut self, ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision {
        if !observation.phase.is_green() {
            return PhaseDecision::Hold;
        }

        let interval = u64::from(self.params.evaluation_interval_ticks);
        let stale = match self.targets.get(&observation.id) {
            Some(target) => {
                target.phase != observation.phase || ctx.tick >= target.evaluated_at + interval
            }
            None => true,
        };
        if stale {
            let ticks = self.green_ticks_for(observation.density(observation.phase.axis()));
            self.targets.insert(
                observation.id,
                GreenTarget {
                    phase: observation.phase,
                    ticks,
                    evaluated_at: ctx.tick,
                },
            );
        }

        match self.targets.get(&observation.id) {
            Some(target) if observation.ticks_in_phase >= target.ticks => PhaseDecision::Switch,
            _ => PhaseDecision::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::strategy::observation;

    #[test]
    fn simple_switches_to_dominant_side() {
        let mut strategy = AdaptiveSimple::new(AdaptiveSimpleParams {
            min_green_ticks: 10,
            max_green_ticks: 60,
            dominance_ratio: 1.5,
        });
        let ctx = DecisionContext { tick: 100 };
        // EW heavier, but minimum not served yet
        assert_eq!(
            strategy.decide(&ctx, &observation(Phase::NsGreen, 5, 10.0, 40.0)),
            PhaseDecision::Hold
        );
        assert_eq!(
            strategy.decide(&ctx, &observation(Phase::NsGreen, 12, 10.0, 40.0)),
            PhaseDecision::Switch
        );
        // Not dominant enough
        assert_eq!(
            strategy.decide(&ctx, &observation(Phase::NsGreen, 12, 30.0, 40.0)),
            PhaseDecision::Hold
        );
        // Cap reached with demand waiting
        assert_eq!(
            strategy.decide(&ctx, &observation(Phase::NsGreen, 60, 30.0, 40.0)),
            PhaseDecision::Switch
        );
        // Cap reached, nobody waiting
        assert_eq!(
            strategy.decide(&ctx, &observation(Phase::NsGreen, 60, 30.0, 0.0)),
            PhaseDecision::Hold
        );
    }

    #[test]
    fn density_buckets_extend_green() {
        let strategy = AdaptiveDensity::new(AdaptiveDensityParams {
            base_green_ticks: 15,
            thresholds: vec![20.0, 50.0],
            extensions: vec![0, 10, 25],
            evaluation_interval_ticks: 10,
        });
        assert_eq!(strategy.green_ticks_for(5.0), 15);
        assert_eq!(strategy.green_ticks_for(20.0), 25);
        assert_eq!(strategy.green_ticks_for(80.0), 40);
    }

    #[test]
    fn density_target_cached_between_evaluations() {
        let mut strategy = AdaptiveDensity::new(AdaptiveDensityParams {
            base_green_ticks: 15,
            thresholds: vec![20.0],
            extensions: vec![0, 20],
            evaluation_interval_ticks: 50,
        });
        // Heavy NS traffic sets a 35-tick target
        let heavy = observation(Phase::NsGreen, 1, 60.0, 0.0);
        assert_eq!(strategy.decide(&DecisionContext { tick: 1 }, &heavy), PhaseDecision::Hold);
        // Traffic dropped, but the cached target still applies
        let light = observation(Phase::NsGreen, 20, 0.0, 0.0);
        assert_eq!(strategy.decide(&DecisionContext { tick: 20 }, &light), PhaseDecision::Hold);
        // After the interval the bucket is re-evaluated
        let light = observation(Phase::NsGreen, 51, 0.0, 0.0);
        assert_eq!(strategy.decide(&DecisionContext { tick: 51 }, &light), PhaseDecision::Switch);
    }
}
