//! Performance metrics
//!
//! The recorder accumulates per-intersection queue samples and finished
//! trips while the simulation runs, and folds them into a serializable
//! [`SimulationReport`] at the end.

use serde::Serialize;
use std::collections::BTreeMap;

use super::strategy::IntersectionObservation;
use super::traffic_light::PhaseTransition;
use super::types::{IntersectionId, VehicleId};
use super::vehicle::Vehicle;
use super::vehicle_registry::VehicleRegistry;

/// Counters kept by an oracle-backed strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OracleStats {
    pub queries: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub failures: u64,
    /// Decisions taken by the fallback strategy
    pub fallbacks: u64,
}

/// One finished journey through the grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRecord {
    pub vehicle: VehicleId,
    pub entry_tick: u64,
    pub exit_tick: u64,
    pub travel_ticks: u64,
    pub wait_ticks: u64,
    pub stops: u32,
    pub distance_m: f32,
}

#[derive(Debug, Clone, Default)]
struct IntersectionTally {
    queue_sum: u64,
    max_queue: usize,
    samples: u64,
    vehicles_crossed: u64,
    phase_switches: u64,
}

/// Identification of a run, copied verbatim into the report
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub heuristic: String,
    pub rows: u32,
    pub cols: u32,
    pub duration_ticks: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSize {
    pub rows: u32,
    pub cols: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionReport {
    pub id: IntersectionId,
    pub mean_queue_length: f64,
    pub max_queue_length: usize,
    pub vehicles_crossed: u64,
    pub phase_switches: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub heuristic: String,
    pub grid: GridSize,
    pub duration_ticks: u64,
    pub seed: u64,
    pub vehicles_spawned: usize,
    pub vehicles_exited: usize,
    pub vehicles_in_system: usize,
    pub dropped_spawns: u64,
    pub kinematic_clamps: u64,
    pub mean_wait_ticks: f64,
    pub mean_travel_ticks: f64,
    pub mean_stops: f64,
    /// Exited vehicles per tick
    pub throughput: f64,
    pub mean_queue_length: f64,
    pub intersections: Vec<IntersectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle: Option<OracleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trips: Option<Vec<TripRecord>>,
}

impl SimulationReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    intersections: BTreeMap<IntersectionId, IntersectionTally>,
    trips: Vec<TripRecord>,
}

impl MetricsRecorder {
    pub fn new(intersections: impl IntoIterator<Item = IntersectionId>) -> Self {
        Self {
            intersections: intersections
                .into_iter()
                .map(|id| (id, IntersectionTally::default()))
                .collect(),
            trips: Vec::new(),
        }
    }

    /// Fold one end-of-tick observation per intersection into the queue statistics
    pub fn sample(&mut self, observations: &[IntersectionObservation]) {
        for observation in observations {
            let queue = observation.total_queue();
            let tally = self.intersections.entry(observation.id).or_default();
            tally.queue_sum += queue as u64;
            tally.max_queue = tally.max_queue.max(queue);
            tally.samples += 1;
        }
    }

    pub fn record_crossing(&mut self, intersection: IntersectionId) {
        self.intersections.entry(intersection).or_default().vehicles_crossed += 1;
    }

    pub fn record_transition(&mut self, transition: &PhaseTransition) {
        self.intersections
            .entry(transition.intersection)
            .or_default()
            .phase_switches += 1;
    }

    /// Finalize the trip of a vehicle that left the grid
    pub fn record_exit(&mut self, vehicle: &Vehicle) {
        let Some(exit_tick) = vehicle.exit_tick else {
            return;
        };
        self.trips.push(TripRecord {
            vehicle: vehicle.id,
            entry_tick: vehicle.spawn_tick,
            exit_tick,
            travel_ticks: exit_tick - vehicle.spawn_tick,
            wait_ticks: vehicle.wait_ticks,
            stops: vehicle.stops,
            distance_m: vehicle.distance_m,
        });
    }

    pub fn trips(&self) -> &[TripRecord] {
        &self.trips
    }

    pub fn report(
        &self,
        header: ReportHeader,
        registry: &VehicleRegistry,
        oracle: Option<OracleStats>,
        detailed: bool,
    ) -> SimulationReport {
        let exited = self.trips.len();
        let mean = |total: f64| if exited == 0 { 0.0 } else { total / exited as f64 };
        let mean_wait_ticks = mean(self.trips.iter().map(|t| t.wait_ticks as f64).sum());
        let mean_travel_ticks = mean(self.trips.iter().map(|t| t.travel_ticks as f64).sum());
        let mean_stops = mean(self.trips.iter().map(|t| f64::from(t.stops)).sum());

        let intersections: Vec<IntersectionReport> = self
            .intersections
            .iter()
            .map(|(id, tally)| IntersectionReport {
                id: *id,
                mean_queue_length: ratio(tally.queue_sum, tally.samples),
                max_queue_length: tally.max_queue,
                vehicles_crossed: tally.vehicles_crossed,
                phase_switches: tally.phase_switches,
            })
            .collect();
        let queue_sum = self.intersections.values().map(|t| t.queue_sum).sum();
        let samples = self.intersections.values().map(|t| t.samples).sum();

        SimulationReport {
            heuristic: header.heuristic,
            grid: GridSize {
                rows: header.rows,
                cols: header.cols,
            },
            duration_ticks: header.duration_ticks,
            seed: header.seed,
            vehicles_spawned: registry.spawned(),
            vehicles_exited: registry.exited(),
            vehicles_in_system: registry.in_system(),
            dropped_spawns: registry.dropped_spawns(),
            kinematic_clamps: registry.clamps(),
            mean_wait_ticks,
            mean_travel_ticks,
            mean_stops,
            throughput: ratio(registry.exited() as u64, header.duration_ticks),
            mean_queue_length: ratio(queue_sum, samples),
            intersections,
            oracle,
            trips: detailed.then(|| self.trips.clone()),
        }
    }
}

fn ratio(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::VehicleParams;
    use crate::simulation::strategy::ApproachState;
    use crate::simulation::traffic_light::Phase;
    use crate::simulation::types::{Approach, LaneId};

    #[test]
    fn empty_run_reports_zero_means() {
        let recorder = MetricsRecorder::new([IntersectionId(0, 0)]);
        let registry = VehicleRegistry::new(4);
        let header = ReportHeader {
            heuristic: "fixed_time".to_string(),
            rows: 1,
            cols: 1,
            duration_ticks: 0,
            seed: 1,
        };
        let report = recorder.report(header, &registry, None, false);
        assert_eq!(report.mean_wait_ticks, 0.0);
        assert_eq!(report.throughput, 0.0);
        assert_eq!(report.intersections.len(), 1);
        let json = report.to_json().unwrap();
        assert!(!json.contains("\"oracle\""));
        assert!(!json.contains("\"trips\""));
    }

    #[test]
    fn queue_samples_average_per_tick() {
        let id = IntersectionId(0, 0);
        let mut recorder = MetricsRecorder::new([id]);
        let observe = |north: usize, west: usize| {
            let mut approaches = [ApproachState::default(); 4];
            approaches[Approach::North.index()].queue_length = north;
            approaches[Approach::West.index()].queue_length = west;
            IntersectionObservation {
                id,
                approaches,
                phase: Phase::NsGreen,
                ticks_in_phase: 0,
            }
        };
        recorder.sample(&[observe(1, 2)]);
        recorder.sample(&[observe(0, 0)]);
        recorder.sample(&[observe(4, 2)]);

        let header = ReportHeader {
            heuristic: "fixed_time".to_string(),
            rows: 1,
            cols: 1,
            duration_ticks: 3,
            seed: 1,
        };
        let report = recorder.report(header, &VehicleRegistry::new(4), None, false);
        assert_eq!(report.intersections[0].max_queue_length, 6);
        assert_eq!(report.intersections[0].mean_queue_length, 3.0);
        assert_eq!(report.mean_queue_length, 3.0);
    }

    #[test]
    fn exit_becomes_trip() {
        let mut recorder = MetricsRecorder::default();
        let mut vehicle = Vehicle::new(VehicleId(3), LaneId(0), 10.0, &VehicleParams::default(), 5);
        vehicle.wait_ticks = 4;
        vehicle.stops = 1;
        vehicle.exit(25);
        recorder.record_exit(&vehicle);
        assert_eq!(recorder.trips()[0].travel_ticks, 20);
        assert_eq!(recorder.trips()[0].wait_ticks, 4);
    }
}
