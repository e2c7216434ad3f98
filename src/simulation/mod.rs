//! Signalized grid traffic engine
//!
//! Everything needed to run a simulation without any renderer attached:
//! the road grid, vehicle kinematics, traffic-light controllers, the phase
//! strategies and the metrics they are judged by. Drive it through
//! [`SimWorld`].

pub mod config;
pub mod error;
pub mod intersection;
pub mod metrics;
pub mod road_network;
pub mod snapshot;
pub mod strategy;
pub mod traffic_light;
pub mod types;
pub mod vehicle;
pub mod vehicle_registry;
mod world;

pub use config::{
    AdaptiveDensityParams, AdaptiveSimpleParams, ConfigError, FixedTimeParams, HeuristicConfig,
    NetworkParams, OracleEngine, OracleParams, SignalTiming, SimConfig, SpawnEdges, VehicleParams,
    WaveGreenParams,
};
pub use error::{SimError, SimResult};
pub use intersection::SimIntersection;
pub use metrics::{IntersectionReport, OracleStats, SimulationReport, TripRecord};
pub use road_network::{Lane, RoadNetwork};
pub use snapshot::{IntersectionSnapshot, VehicleSnapshot, WorldSnapshot};
pub use strategy::{
    ApproachState, DecisionContext, IntersectionObservation, PhaseDecision, PhaseStrategy,
};
pub use traffic_light::{Phase, PhaseTransition, Signal, SignalError, SwitchRejected, TrafficLightController};
pub use types::{Approach, Axis, Heading, IntersectionId, LaneId, Position, VehicleId};
pub use vehicle::{Vehicle, VehicleState};
pub use vehicle_registry::VehicleRegistry;
pub use world::SimWorld;
