//! Simulation configuration
//!
//! A single immutable value handed to [`SimWorld`](super::SimWorld) at
//! construction. It can be deserialized from JSON; every field has a default
//! so partial files are accepted. Defaults are only convenient starting
//! points for the headless runner, tests declare the values they rely on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Approach, Axis};

/// Configuration validation failure
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("an external oracle cannot use another external oracle as its fallback")]
    NestedOracle,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Top-level simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub rows: u32,
    pub cols: u32,
    pub duration_ticks: u64,
    pub seed: u64,
    /// Simulated seconds per tick
    pub tick_seconds: f32,
    /// Bernoulli spawn probability per inbound boundary lane per tick
    pub spawn_probability: f64,
    pub spawn_edges: SpawnEdges,
    pub network: NetworkParams,
    pub vehicle: VehicleParams,
    pub signal: SignalTiming,
    pub heuristic: HeuristicConfig,
    /// Include per-vehicle trip records in the report
    pub detailed_report: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            duration_ticks: 600,
            seed: 42,
            tick_seconds: 1.0,
            spawn_probability: 0.1,
            spawn_edges: SpawnEdges::default(),
            network: NetworkParams::default(),
            vehicle: VehicleParams::default(),
            signal: SignalTiming::default(),
            heuristic: HeuristicConfig::default(),
            detailed_report: false,
        }
    }
}

/// Boundary sides that generate traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnEdges {
    pub north: bool,
    pub south: bool,
    pub east: bool,
    pub west: bool,
}

impl Default for SpawnEdges {
    fn default() -> Self {
        Self {
            north: true,
            south: true,
            east: true,
            west: true,
        }
    }
}

impl SpawnEdges {
    pub fn allows(&self, side: Approach) -> bool {
        match side {
            Approach::North => self.north,
            Approach::South => self.south,
            Approach::East => self.east,
            Approach::West => self.west,
        }
    }
}

/// Road network geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    /// Distance between adjacent intersections (metres)
    pub spacing_m: f32,
    /// Length of the boundary lanes feeding into / out of the grid (metres)
    pub boundary_lane_m: f32,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            spacing_m: 100.0,
            boundary_lane_m: 100.0,
        }
    }
}

/// Vehicle dynamics shared by every spawned vehicle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    pub length_m: f32,
    /// Minimum front-to-front headway between consecutive vehicles
    pub min_gap_m: f32,
    /// m/s^2
    pub max_accel: f32,
    /// m/s^2, positive
    pub max_decel: f32,
    /// Desired cruising speed, m/s
    pub target_speed: f32,
    /// Relative spread of individual desired speeds, in [0, 1)
    pub speed_jitter: f32,
    pub sensing_range_m: f32,
    /// Below this speed a vehicle counts as stopped
    pub moving_threshold: f32,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            length_m: 4.5,
            min_gap_m: 7.5,
            max_accel: 2.0,
            max_decel: 4.5,
            target_speed: 12.0,
            speed_jitter: 0.1,
            sensing_range_m: 120.0,
            moving_threshold: 0.5,
        }
    }
}

impl VehicleParams {
    /// Highest desired speed any vehicle can draw
    pub fn top_speed(&self) -> f32 {
        self.target_speed * (1.0 + self.speed_jitter)
    }
}

/// Safety minimums enforced by every traffic-light controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTiming {
    pub min_green_ticks: u32,
    pub yellow_ticks: u32,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self {
            min_green_ticks: 10,
            yellow_ticks: 5,
        }
    }
}

/// Active phase-scheduling heuristic and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeuristicConfig {
    FixedTime(FixedTimeParams),
    AdaptiveSimple(AdaptiveSimpleParams),
    AdaptiveDensity(AdaptiveDensityParams),
    WaveGreen(WaveGreenParams),
    ExternalOracle(OracleParams),
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        HeuristicConfig::FixedTime(FixedTimeParams::default())
    }
}

impl HeuristicConfig {
    pub fn name(&self) -> &'static str {
        match self {
            HeuristicConfig::FixedTime(_) => "fixed_time",
            HeuristicConfig::AdaptiveSimple(_) => "adaptive_simple",
            HeuristicConfig::AdaptiveDensity(_) => "adaptive_density",
            HeuristicConfig::WaveGreen(_) => "wave_green",
            HeuristicConfig::ExternalOracle(_) => "external_oracle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedTimeParams {
    /// Green duration of each phase group before a switch is requested
    pub green_ticks: u32,
}

impl Default for FixedTimeParams {
    fn default() -> Self {
        Self { green_ticks: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSimpleParams {
    pub min_green_ticks: u32,
    /// Longest a heavier side keeps green while the other side has demand
    pub max_green_ticks: u32,
    /// The waiting side must exceed the green side's density by this factor
    pub dominance_ratio: f32,
}

impl Default for AdaptiveSimpleParams {
    fn default() -> Self {
        Self {
            min_green_ticks: 15,
            max_green_ticks: 60,
            dominance_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveDensityParams {
    pub base_green_ticks: u32,
    /// Ascending density thresholds (vehicles per km) separating the buckets
    pub thresholds: Vec<f32>,
    /// Green extension per bucket, one more entry than `thresholds`
    pub extensions: Vec<u32>,
    pub evaluation_interval_ticks: u32,
}

impl Default for AdaptiveDensityParams {
    fn default() -> Self {
        Self {
            base_green_ticks: 15,
            thresholds: vec![20.0, 50.0],
            extensions: vec![0, 15, 30],
            evaluation_interval_ticks: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveGreenParams {
    /// Axis along which the green wave travels
    pub axis: Axis,
    /// Travel direction on `axis` is towards increasing row/col when true
    pub forward: bool,
    pub wave_green_ticks: u32,
    pub cross_green_ticks: u32,
}

impl Default for WaveGreenParams {
    fn default() -> Self {
        Self {
            axis: Axis::EastWest,
            forward: true,
            wave_green_ticks: 30,
            cross_green_ticks: 20,
        }
    }
}

/// External decision source backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleEngine {
    /// Trained policy artifact evaluated locally
    Policy,
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleParams {
    pub engine: OracleEngine,
    /// Policy artifact path or language-model name
    pub model: String,
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub query_interval_ticks: u32,
    /// How long a successful answer may be reused when the oracle fails
    pub cache_ttl_ticks: u64,
    pub fallback: Box<HeuristicConfig>,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            engine: OracleEngine::Policy,
            model: String::new(),
            endpoint: None,
            timeout_ms: 50,
            query_interval_ticks: 1,
            cache_ttl_ticks: 60,
            fallback: Box::new(HeuristicConfig::default()),
        }
    }
}

impl SimConfig {
    /// Check every value the engine relies on. Grid dimensions are checked
    /// by the road network itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_seconds.is_finite() && self.tick_seconds > 0.0) {
            return Err(invalid("tick_seconds", "must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.spawn_probability) {
            return Err(invalid("spawn_probability", "must lie in [0, 1]"));
        }
        if self.network.spacing_m <= 0.0 || self.network.boundary_lane_m <= 0.0 {
            return Err(invalid("network", "lane lengths must be positive"));
        }

        let v = &self.vehicle;
        if v.length_m <= 0.0 {
            return Err(invalid("vehicle.length_m", "must be positive"));
        }
        if v.min_gap_m < v.length_m {
            return Err(invalid(
                "vehicle.min_gap_m",
                format!("must be at least the vehicle length ({})", v.length_m),
            ));
        }
        if v.max_accel <= 0.0 || v.max_decel <= 0.0 {
            return Err(invalid("vehicle", "acceleration bounds must be positive"));
        }
        if v.target_speed <= 0.0 {
            return Err(invalid("vehicle.target_speed", "must be positive"));
        }
        if !(0.0..1.0).contains(&v.speed_jitter) {
            return Err(invalid("vehicle.speed_jitter", "must lie in [0, 1)"));
        }
        if v.moving_threshold < 0.0 || v.moving_threshold >= v.target_speed * (1.0 - v.speed_jitter) {
            return Err(invalid(
                "vehicle.moving_threshold",
                "must be non-negative and below the slowest desired speed",
            ));
        }
        let top = v.top_speed();
        let needed = top * self.tick_seconds + top * top / (2.0 * v.max_decel) + v.min_gap_m;
        if v.sensing_range_m < needed {
            return Err(invalid(
                "vehicle.sensing_range_m",
                format!("must cover one tick of travel plus braking distance ({needed:.1} m)"),
            ));
        }
        let shortest_lane = self.network.spacing_m.min(self.network.boundary_lane_m);
        if shortest_lane < v.min_gap_m * 2.0 {
            return Err(invalid(
                "network",
                "lanes must be at least twice the minimum gap long",
            ));
        }
        // One tick of travel at top speed must never carry a vehicle past a whole lane
        let reach = top * self.tick_seconds + v.min_gap_m;
        if reach >= shortest_lane {
            return Err(invalid(
                "network",
                format!("lanes must be longer than one tick of travel plus the minimum gap ({reach:.1} m)"),
            ));
        }

        if self.signal.min_green_ticks == 0 || self.signal.yellow_ticks == 0 {
            return Err(invalid("signal", "minimum green and yellow must be at least one tick"));
        }

        validate_heuristic(&self.heuristic, false)
    }
}

fn validate_heuristic(heuristic: &HeuristicConfig, nested: bool) -> Result<(), ConfigError> {
    match heuristic {
        HeuristicConfig::FixedTime(p) => {
            if p.green_ticks == 0 {
                return Err(invalid("fixed_time.green_ticks", "must be at least one tick"));
            }
        }
        HeuristicConfig::AdaptiveSimple(p) => {
            if p.min_green_ticks > p.max_green_ticks {
                return Err(invalid(
                    "adaptive_simple",
                    "min_green_ticks must not exceed max_green_ticks",
                ));
            }
            if !(p.dominance_ratio >= 1.0) {
                return Err(invalid("adaptive_simple.dominance_ratio", "must be at least 1"));
            }
        }
        HeuristicConfig::AdaptiveDensity(p) => {
            if p.extensions.len() != p.thresholds.len() + 1 {
                return Err(invalid(
                    "adaptive_density.extensions",
                    "needs exactly one entry more than thresholds",
                ));
            }
            if p.thresholds.windows(2).any(|w| !(w[0] < w[1])) {
                return Err(invalid("adaptive_density.thresholds", "must be strictly ascending"));
            }
            if p.evaluation_interval_ticks == 0 {
                return Err(invalid(
                    "adaptive_density.evaluation_interval_ticks",
                    "must be at least one tick",
                ));
            }
        }
        HeuristicConfig::WaveGreen(p) => {
            if p.wave_green_ticks == 0 || p.cross_green_ticks == 0 {
                return Err(invalid("wave_green", "green windows must be at least one tick"));
            }
        }
        HeuristicConfig::ExternalOracle(p) => {
            if nested {
                return Err(ConfigError::NestedOracle);
            }
            if p.timeout_ms == 0 {
                return Err(invalid("external_oracle.timeout_ms", "must be at least 1 ms"));
            }
            if p.query_interval_ticks == 0 {
                return Err(invalid(
                    "external_oracle.query_interval_ticks",
                    "must be at least one tick",
                ));
            }
            validate_heuristic(&p.fallback, true)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn gap_shorter_than_vehicle_is_rejected() {
        let mut config = SimConfig::default();
        config.vehicle.min_gap_m = 3.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "vehicle.min_gap_m", .. })
        ));
    }

    #[test]
    fn lane_shorter_than_one_tick_of_travel_is_rejected() {
        let mut config = SimConfig::default();
        config.tick_seconds = 3.0;
        config.network = NetworkParams {
            spacing_m: 15.0,
            boundary_lane_m: 15.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "network", .. })
        ));

        config.tick_seconds = 0.5;
        config.network.spacing_m = 30.0;
        config.network.boundary_lane_m = 30.0;
        config.vehicle.sensing_range_m = 120.0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn oracle_cannot_fall_back_to_oracle() {
        let mut config = SimConfig::default();
        config.heuristic = HeuristicConfig::ExternalOracle(OracleParams {
            fallback: Box::new(HeuristicConfig::ExternalOracle(OracleParams::default())),
            ..OracleParams::default()
        });
        assert_eq!(config.validate(), Err(ConfigError::NestedOracle));
    }

    #[test]
    fn density_buckets_must_match_thresholds() {
        let mut config = SimConfig::default();
        config.heuristic = HeuristicConfig::AdaptiveDensity(AdaptiveDensityParams {
            thresholds: vec![10.0],
            extensions: vec![0, 5, 10],
            ..AdaptiveDensityParams::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{ "rows": 3, "heuristic": { "kind": "wave_green", "wave_green_ticks": 25 } }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.rows, 3);
        assert_eq!(config.cols, 2);
        match config.heuristic {
            HeuristicConfig::WaveGreen(p) => {
                assert_eq!(p.wave_green_ticks, 25);
                assert_eq!(p.cross_green_ticks, 20);
            }
            other => panic!("unexpected heuristic {other:?}"),
        }
    }
}
