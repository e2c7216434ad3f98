//! Delegation to an external decision oracle
//!
//! Queries run on a private single-threaded tokio runtime and are bounded by
//! a deadline, so the simulation never waits longer than the configured
//! timeout. A late answer is dropped together with its future.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

use super::{DecisionContext, IntersectionObservation, PhaseDecision, PhaseStrategy};
use crate::oracle::{Oracle, OracleError, OracleRequest, OracleResponse};
use crate::simulation::config::OracleParams;
use crate::simulation::error::SimResult;
use crate::simulation::metrics::OracleStats;
use crate::simulation::traffic_light::Phase;
use crate::simulation::types::IntersectionId;

#[derive(Debug, Clone, Copy)]
struct CachedTarget {
    /// Green the oracle asked for
    phase: Phase,
    answered_at: u64,
}

pub struct ExternalOracleStrategy {
    name: String,
    oracle: Arc<dyn Oracle>,
    runtime: Option<Runtime>,
    timeout: Duration,
    query_interval: u64,
    cache_ttl: u64,
    fallback: Box<dyn PhaseStrategy>,
    cache: BTreeMap<IntersectionId, CachedTarget>,
    stats: OracleStats,
    failing: bool,
}

impl ExternalOracleStrategy {
    pub fn new(
        params: &OracleParams,
        oracle: Arc<dyn Oracle>,
        fallback: Box<dyn PhaseStrategy>,
    ) -> SimResult<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self {
            name: format!("external_oracle({})", oracle.name()),
            oracle,
            runtime: Some(runtime),
            timeout: Duration::from_millis(params.timeout_ms),
            query_interval: u64::from(params.query_interval_ticks),
            cache_ttl: params.cache_ttl_ticks,
            fallback,
            cache: BTreeMap::new(),
            stats: OracleStats::default(),
            failing: false,
        })
    }

    fn query(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let Some(runtime) = &self.runtime else {
            return Err(OracleError::Unavailable("runtime shut down".to_string()));
        };
        let future = self.oracle.query(request);
        let timeout = self.timeout;
        // The deadline timer must be created inside the runtime
        match runtime.block_on(async move { tokio::time::timeout(timeout, future).await }) {
            Ok(answer) => answer,
            Err(_) => Err(OracleError::Timeout(self.timeout)),
        }
    }

    fn record_failure(&mut self, id: IntersectionId, tick: u64, error: &OracleError) {
        match error {
            OracleError::Timeout(_) => self.stats.timeouts += 1,
            _ => self.stats.failures += 1,
        }
        if !self.failing {
            warn!("Oracle {} failed at tick {tick} for {id}: {error}", self.oracle.name());
        } else {
            debug!("Oracle failure at tick {tick} for {id}: {error}");
        }
        self.failing = true;
    }
}

impl PhaseStrategy for ExternalOracleStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&mut self, ctx: &DecisionContext, observation: &IntersectionObservation) -> PhaseDecision {
        // Keeps the fallback's own state in step with a standalone run
        let fallback_decision = self.fallback.decide(ctx, observation);

        if ctx.tick % self.query_interval == 0 {
            self.stats.queries += 1;
            match self.query(OracleRequest::from_observation(ctx.tick, observation)) {
                Ok(response) => {
                    self.stats.successes += 1;
                    if self.failing {
                        debug!("Oracle {} recovered at tick {}", self.oracle.name(), ctx.tick);
                    }
                    self.failing = false;
                    let phase = match response {
                        OracleResponse::NoChange => observation.phase,
                        OracleResponse::Phase(phase) => phase,
                    };
                    // A yellow target means "let this group clear"
                    let phase = if phase.is_green() { phase } else { phase.next() };
                    self.cache.insert(
                        observation.id,
                        CachedTarget {
                            phase,
                            answered_at: ctx.tick,
                        },
                    );
                }
                Err(error) => self.record_failure(observation.id, ctx.tick, &error),
            }
        }

        let cached = self
            .cache
            .get(&observation.id)
            .filter(|target| ctx.tick - target.answered_at <= self.cache_ttl)
            .copied();

        match cached {
            Some(target) => {
                let wants_other_group = target.phase.axis() != observation.phase.axis();
                let decision = if observation.phase.is_green() && wants_other_group {
                    PhaseDecision::Switch
                } else {
                    PhaseDecision::Hold
                };
                debug!(
                    "Tick {}: {} oracle target {:?} -> {:?}",
                    ctx.tick, observation.id, target.phase, decision
                );
                decision
            }
            None => {
                self.stats.fallbacks += 1;
                fallback_decision
            }
        }
    }

    fn oracle_stats(&self) -> Option<OracleStats> {
        Some(self.stats)
    }
}

impl Drop for ExternalOracleStrategy {
    fn drop(&mut self) {
        // Abandoned blocking inference must not hold up shutdown
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleFuture;
    use crate::simulation::config::{FixedTimeParams, HeuristicConfig};
    use crate::simulation::strategy::{observation, FixedTime};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Answers EW green on the first call, then fails forever
    struct OneShot {
        calls: AtomicU64,
    }

    impl Oracle for OneShot {
        fn name(&self) -> &str {
            "one_shot"
        }

        fn query(&self, _request: OracleRequest) -> OracleFuture {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call == 0 {
                    Ok(OracleResponse::Phase(Phase::EwGreen))
                } else {
                    Err(OracleError::Unavailable("offline".to_string()))
                }
            })
        }
    }

    fn strategy(cache_ttl_ticks: u64) -> ExternalOracleStrategy {
        let params = OracleParams {
            cache_ttl_ticks,
            fallback: Box::new(HeuristicConfig::FixedTime(FixedTimeParams { green_ticks: 30 })),
            ..OracleParams::default()
        };
        let fallback = Box::new(FixedTime::new(FixedTimeParams { green_ticks: 30 }));
        let oracle = Arc::new(OneShot {
            calls: AtomicU64::new(0),
        });
        ExternalOracleStrategy::new(&params, oracle, fallback).unwrap()
    }

    #[test]
    fn cached_answer_reused_until_stale() {
        let mut strategy = strategy(5);
        let obs = observation(Phase::NsGreen, 12, 0.0, 0.0);

        // Fresh answer: switch towards EW even though fixed time would hold
        assert_eq!(strategy.decide(&DecisionContext { tick: 1 }, &obs), PhaseDecision::Switch);
        // Oracle now fails, cache still young
        assert_eq!(strategy.decide(&DecisionContext { tick: 6 }, &obs), PhaseDecision::Switch);
        // Cache expired, fixed time holds at 12 ticks
        assert_eq!(strategy.decide(&DecisionContext { tick: 7 }, &obs), PhaseDecision::Hold);

        let stats = strategy.oracle_stats().unwrap();
        assert_eq!(stats.queries, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.fallbacks, 1);
    }

    #[test]
    fn cached_target_is_idempotent() {
        let mut strategy = strategy(100);
        let ns = observation(Phase::NsGreen, 12, 0.0, 0.0);
        let ew = observation(Phase::EwGreen, 3, 0.0, 0.0);
        assert_eq!(strategy.decide(&DecisionContext { tick: 1 }, &ns), PhaseDecision::Switch);
        // Once EW holds the green, the same target keeps it there
        assert_eq!(strategy.decide(&DecisionContext { tick: 8 }, &ew), PhaseDecision::Hold);
        assert_eq!(strategy.decide(&DecisionContext { tick: 9 }, &ew), PhaseDecision::Hold);
    }
}
