//! Simulation world
//!
//! [`SimWorld`] owns the road network, the signalized intersections, the
//! vehicle registry and the active strategy, and advances them together one
//! tick at a time. A tick runs in a fixed order:
//!
//! 1. boundary lanes draw their spawns from the seeded generator
//! 2. vehicles move against the signals as they stood after the previous tick
//! 3. crossings and exits are recorded
//! 4. every light advances its timer (yellow phases may expire)
//! 5. the strategy sees each intersection and may request a switch
//! 6. queue lengths are sampled

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use super::config::SimConfig;
use super::error::{SimError, SimResult};
use super::intersection::SimIntersection;
use super::metrics::{MetricsRecorder, ReportHeader, SimulationReport};
use super::road_network::{opposite, RoadNetwork};
use super::snapshot::{IntersectionSnapshot, VehicleSnapshot, WorldSnapshot};
use super::strategy::{
    build_strategy, ApproachState, DecisionContext, IntersectionObservation, PhaseDecision,
    PhaseStrategy, StrategyContext,
};
use super::traffic_light::{Phase, PhaseTransition, Signal};
use super::types::{Approach, Heading, IntersectionId, LaneId, VehicleId};
use super::vehicle_registry::VehicleRegistry;
use crate::oracle::Oracle;

const METRES_PER_KM: f32 = 1000.0;

pub struct SimWorld {
    config: SimConfig,
    network: RoadNetwork,
    intersections: BTreeMap<IntersectionId, SimIntersection>,
    registry: VehicleRegistry,
    strategy: Box<dyn PhaseStrategy>,
    metrics: MetricsRecorder,
    rng: StdRng,
    clock: u64,
    phase_log: Vec<PhaseTransition>,
    /// Inbound boundary lanes on enabled sides, in lane id order
    spawn_lanes: Vec<LaneId>,
    observations: Vec<IntersectionObservation>,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> SimResult<Self> {
        Self::build(config, None)
    }

    /// Build a world whose external-oracle strategy talks to `oracle` instead
    /// of the backend named in the configuration
    pub fn with_oracle(config: SimConfig, oracle: Arc<dyn Oracle>) -> SimResult<Self> {
        Self::build(config, Some(oracle))
    }

    fn build(config: SimConfig, oracle: Option<Arc<dyn Oracle>>) -> SimResult<Self> {
        config.validate()?;
        let network = RoadNetwork::new_grid(config.rows, config.cols, &config.network)?;

        let mut intersections = BTreeMap::new();
        for id in network.intersections() {
            intersections.insert(id, SimIntersection::new(&network, id, config.signal)?);
        }

        let strategy = build_strategy(
            &config.heuristic,
            &StrategyContext {
                network: &network,
                target_speed: config.vehicle.target_speed,
                tick_seconds: config.tick_seconds,
                signal: config.signal,
                oracle,
            },
        )?;

        let mut spawn_lanes: Vec<LaneId> = Approach::ALL
            .into_iter()
            .filter(|&side| config.spawn_edges.allows(side))
            .flat_map(|side| network.inbound_boundary_lanes_on(side))
            .collect();
        spawn_lanes.sort();

        info!(
            "Built {}x{} grid: {} intersections, {} lanes, {} spawn lanes, strategy {}",
            config.rows,
            config.cols,
            network.intersection_count(),
            network.lane_count(),
            spawn_lanes.len(),
            strategy.name()
        );

        let mut world = Self {
            rng: StdRng::seed_from_u64(config.seed),
            registry: VehicleRegistry::new(network.lane_count()),
            metrics: MetricsRecorder::new(intersections.keys().copied()),
            config,
            network,
            intersections,
            strategy,
            clock: 0,
            phase_log: Vec::new(),
            spawn_lanes,
            observations: Vec::new(),
        };
        world.observations = world.observe()?;
        Ok(world)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    pub fn intersection(&self, id: IntersectionId) -> SimResult<&SimIntersection> {
        self.intersections
            .get(&id)
            .ok_or(SimError::IntersectionNotFound(id))
    }

    pub fn intersections(&self) -> impl Iterator<Item = &SimIntersection> + '_ {
        self.intersections.values()
    }

    /// Number of ticks completed so far
    pub fn current_tick(&self) -> u64 {
        self.clock
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Every phase change so far, in the order it happened
    pub fn phase_log(&self) -> &[PhaseTransition] {
        &self.phase_log
    }

    /// Observations taken at the end of the last tick
    pub fn observations(&self) -> &[IntersectionObservation] {
        &self.observations
    }

    pub fn spawn_lanes(&self) -> &[LaneId] {
        &self.spawn_lanes
    }

    /// Advance the whole world by one tick
    pub fn tick(&mut self) -> SimResult<()> {
        self.clock += 1;
        let tick = self.clock;

        self.spawn_vehicles()?;

        let intersections = &self.intersections;
        let outcome = self.registry.advance(
            &self.network,
            &self.config.vehicle,
            self.config.tick_seconds,
            tick,
            |id, heading| {
                intersections
                    .get(&id)
                    .map_or(Signal::Red, |intersection| intersection.signal_for(heading))
            },
        )?;
        for &(_, intersection) in &outcome.crossings {
            self.metrics.record_crossing(intersection);
        }
        for &id in &outcome.exits {
            if let Some(vehicle) = self.registry.vehicle(id) {
                self.metrics.record_exit(vehicle);
            }
        }

        for intersection in self.intersections.values_mut() {
            if let Some(transition) = intersection.tick(tick) {
                debug!(
                    "{} {:?} -> {:?} after {} ticks",
                    transition.intersection, transition.from, transition.to, transition.ticks_in_phase
                );
                self.metrics.record_transition(&transition);
                self.phase_log.push(transition);
            }
        }

        self.observations = self.observe()?;
        let ctx = DecisionContext { tick };
        for observation in &self.observations {
            if self.strategy.decide(&ctx, observation) == PhaseDecision::Hold {
                continue;
            }
            let intersection = self
                .intersections
                .get_mut(&observation.id)
                .ok_or(SimError::IntersectionNotFound(observation.id))?;
            match intersection.controller.request_switch() {
                Ok((from, to, ticks_in_phase)) => {
                    let transition = PhaseTransition {
                        tick,
                        intersection: observation.id,
                        from,
                        to,
                        ticks_in_phase,
                    };
                    debug!(
                        "{} switch {:?} -> {:?} after {} ticks",
                        observation.id, from, to, ticks_in_phase
                    );
                    self.metrics.record_transition(&transition);
                    self.phase_log.push(transition);
                }
                Err(rejected) => debug!("{} switch request rejected: {:?}", observation.id, rejected),
            }
        }

        self.metrics.sample(&self.observations);
        Ok(())
    }

    pub fn run_for(&mut self, ticks: u64) -> SimResult<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Run until the configured duration is reached and report
    pub fn run(&mut self) -> SimResult<SimulationReport> {
        let remaining = self.config.duration_ticks.saturating_sub(self.clock);
        self.run_for(remaining)?;
        Ok(self.report())
    }

    fn spawn_vehicles(&mut self) -> SimResult<()> {
        let params = &self.config.vehicle;
        for &lane in &self.spawn_lanes {
            if !self.rng.random_bool(self.config.spawn_probability) {
                continue;
            }
            let desired_speed = if params.speed_jitter > 0.0 {
                let factor: f32 = self.rng.random_range(-1.0..=1.0);
                params.target_speed * (1.0 + params.speed_jitter * factor)
            } else {
                params.target_speed
            };
            self.registry
                .spawn(lane, desired_speed, params, self.config.tick_seconds, self.clock)?;
        }
        Ok(())
    }

    /// Place one vehicle at the entry of an inbound boundary lane, between
    /// ticks. Returns `None` when the entry zone is occupied.
    pub fn inject_vehicle(&mut self, lane: LaneId) -> SimResult<Option<VehicleId>> {
        if self.network.lane(lane)?.entry_side().is_none() {
            return Err(SimError::NotASpawnLane(lane));
        }
        self.registry.spawn(
            lane,
            self.config.vehicle.target_speed,
            &self.config.vehicle,
            self.config.tick_seconds,
            self.clock,
        )
    }

    /// Force the light at `id` into `target`. Only the cyclic successor is
    /// accepted, and only once the current phase has met its minimum.
    pub fn request_transition(&mut self, id: IntersectionId, target: Phase) -> SimResult<()> {
        let intersection = self
            .intersections
            .get_mut(&id)
            .ok_or(SimError::IntersectionNotFound(id))?;
        let (from, to, ticks_in_phase) = intersection
            .controller
            .transition_to(target)
            .map_err(|source| SimError::Signal {
                intersection: id,
                source,
            })?;
        let transition = PhaseTransition {
            tick: self.clock,
            intersection: id,
            from,
            to,
            ticks_in_phase,
        };
        self.metrics.record_transition(&transition);
        self.phase_log.push(transition);
        Ok(())
    }

    fn observe_intersection(&self, intersection: &SimIntersection) -> SimResult<IntersectionObservation> {
        let threshold = self.config.vehicle.moving_threshold;
        let mut approaches = [ApproachState::default(); 4];
        for approach in Approach::ALL {
            let lane_id = intersection.approach_lane(approach);
            let lane = self.network.lane(lane_id)?;
            let vehicle_count = self.registry.vehicle_count(lane_id);
            approaches[approach.index()] = ApproachState {
                queue_length: self.registry.queue_length(lane_id, threshold),
                vehicle_count,
                density: vehicle_count as f32 / (lane.length / METRES_PER_KM),
            };
        }
        Ok(IntersectionObservation {
            id: intersection.id,
            approaches,
            phase: intersection.phase(),
            ticks_in_phase: intersection.controller.ticks_in_phase(),
        })
    }

    /// Current state of every intersection, row-major
    pub fn observe(&self) -> SimResult<Vec<IntersectionObservation>> {
        self.intersections
            .values()
            .map(|intersection| self.observe_intersection(intersection))
            .collect()
    }

    pub fn snapshot(&self) -> SimResult<WorldSnapshot> {
        let mut vehicles = Vec::with_capacity(self.registry.in_system());
        for vehicle in self.registry.active() {
            let lane = self.network.lane(vehicle.lane)?;
            let point = lane.point_at(vehicle.position);
            vehicles.push(VehicleSnapshot {
                id: vehicle.id,
                lane: vehicle.lane,
                heading: lane.heading,
                position_m: vehicle.position,
                x: point.x,
                y: point.y,
                velocity: vehicle.velocity,
                state: vehicle.state,
            });
        }

        let intersections = self
            .observe()?
            .into_iter()
            .map(|observation| IntersectionSnapshot {
                id: observation.id,
                phase: observation.phase,
                ticks_in_phase: observation.ticks_in_phase,
                queues: observation.approaches.map(|a| a.queue_length),
            })
            .collect();

        Ok(WorldSnapshot {
            tick: self.clock,
            vehicles,
            intersections,
        })
    }

    pub fn report(&self) -> SimulationReport {
        let header = ReportHeader {
            heuristic: self.config.heuristic.name().to_string(),
            rows: self.config.rows,
            cols: self.config.cols,
            duration_ticks: self.clock,
            seed: self.config.seed,
        };
        self.metrics.report(
            header,
            &self.registry,
            self.strategy.oracle_stats(),
            self.config.detailed_report,
        )
    }

    /// Vehicles on the two lanes joining `id` to its neighbour in `heading`
    fn link_load(&self, id: IntersectionId, heading: Heading) -> usize {
        let Some(neighbor) = self.network.neighbor(id, heading) else {
            return 0;
        };
        let load = |from: IntersectionId, heading: Heading| {
            self.network
                .exit_lane(from, heading)
                .map_or(0, |lane| self.registry.vehicle_count(lane))
        };
        load(id, heading) + load(neighbor, opposite(heading))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Traffic Simulation Summary ===");
        let _ = writeln!(
            out,
            "Tick: {} ({:.1}s simulated)",
            self.clock,
            self.clock as f32 * self.config.tick_seconds
        );
        let _ = writeln!(
            out,
            "Grid: {}x{}, lanes: {}, strategy: {}",
            self.network.rows(),
            self.network.cols(),
            self.network.lane_count(),
            self.strategy.name()
        );
        let _ = writeln!(
            out,
            "Vehicles: spawned={}, exited={}, in system={}, dropped spawns={}",
            self.registry.spawned(),
            self.registry.exited(),
            self.registry.in_system(),
            self.registry.dropped_spawns()
        );

        let _ = writeln!(out, "--- Intersections ---");
        for observation in &self.observations {
            let queues = observation.approaches.map(|a| a.queue_length);
            let _ = writeln!(
                out,
                "  {}: {:?} for {} ticks, queued N/S/E/W = {}/{}/{}/{}",
                observation.id,
                observation.phase,
                observation.ticks_in_phase,
                queues[0],
                queues[1],
                queues[2],
                queues[3]
            );
        }

        if let Some(stats) = self.strategy.oracle_stats() {
            let _ = writeln!(out, "--- Oracle ---");
            let _ = writeln!(
                out,
                "  queries={}, successes={}, timeouts={}, failures={}, fallbacks={}",
                stats.queries, stats.successes, stats.timeouts, stats.failures, stats.fallbacks
            );
        }
        out
    }

    /// ASCII view of the grid: one letter per signal, vehicle counts on the links
    pub fn render_map(&self) -> String {
        const CELL: usize = 7;
        let symbol = |phase: Phase| match phase {
            Phase::NsGreen => 'N',
            Phase::NsYellow => 'n',
            Phase::EwGreen => 'E',
            Phase::EwYellow => 'e',
        };

        let (rows, cols) = (self.network.rows(), self.network.cols());
        let mut out = String::new();
        let _ = writeln!(out, "=== Signal Map (tick {}) ===", self.clock);
        let _ = writeln!(
            out,
            "Legend: N/n = north-south green/yellow, E/e = east-west green/yellow, numbers = vehicles on a link"
        );
        for row in 0..rows {
            let mut line = String::new();
            for col in 0..cols {
                let id = IntersectionId(row, col);
                line.push(self.intersections.get(&id).map_or('?', |i| symbol(i.phase())));
                if col + 1 < cols {
                    let _ = write!(line, " -{:>2}- ", self.link_load(id, Heading::Eastbound));
                }
            }
            let _ = writeln!(out, "{}", line.trim_end());

            if row + 1 < rows {
                let bars: String = (0..cols).map(|_| format!("{:<width$}", "|", width = CELL)).collect();
                let counts: String = (0..cols)
                    .map(|col| {
                        let load = self.link_load(IntersectionId(row, col), Heading::Southbound);
                        format!("{:<width$}", load, width = CELL)
                    })
                    .collect();
                let _ = writeln!(out, "{}", bars.trim_end());
                let _ = writeln!(out, "{}", counts.trim_end());
                let _ = writeln!(out, "{}", bars.trim_end());
            }
        }
        out
    }

    /// Stdout is reserved for the report, so the console views go to stderr
    pub fn print_summary(&self) {
        eprint!("{}", self.summary());
    }

    pub fn draw_map(&self) {
        eprint!("{}", self.render_map());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::{FixedTimeParams, HeuristicConfig};

    fn quiet_config(rows: u32, cols: u32) -> SimConfig {
        SimConfig {
            rows,
            cols,
            spawn_probability: 0.0,
            heuristic: HeuristicConfig::FixedTime(FixedTimeParams { green_ticks: 30 }),
            ..SimConfig::default()
        }
    }

    #[test]
    fn map_shows_every_signal() {
        let world = SimWorld::new(quiet_config(2, 3)).unwrap();
        let map = world.render_map();
        assert_eq!(map.matches('N').count(), 6 + 1);
        assert!(map.contains("N - 0- N - 0- N"));
    }

    #[test]
    fn inject_rejects_interior_lanes() {
        let mut world = SimWorld::new(quiet_config(1, 2)).unwrap();
        let interior = world
            .network()
            .exit_lane(IntersectionId(0, 0), Heading::Eastbound)
            .unwrap();
        assert!(matches!(
            world.inject_vehicle(interior),
            Err(SimError::NotASpawnLane(lane)) if lane == interior
        ));
    }

    #[test]
    fn forced_skip_is_rejected() {
        let mut world = SimWorld::new(quiet_config(1, 1)).unwrap();
        world.run_for(12).unwrap();
        let err = world
            .request_transition(IntersectionId(0, 0), Phase::EwGreen)
            .unwrap_err();
        assert!(matches!(err, SimError::Signal { .. }));
        world
            .request_transition(IntersectionId(0, 0), Phase::NsYellow)
            .unwrap();
        assert_eq!(world.phase_log().len(), 1);
    }
}
