//! Signalized Grid Traffic Simulator
//!
//! A deterministic traffic engine for comparing traffic-light scheduling
//! strategies on a grid of intersections, with optional delegation of phase
//! decisions to an external oracle (trained policy or language model).

pub mod oracle;
pub mod simulation;
