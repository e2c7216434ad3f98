//! Core types for the traffic simulation
//!
//! Identifiers, directions and small geometry helpers shared by every
//! other simulation module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid coordinate of an intersection: (row, col), row 0 is the north edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntersectionId(pub u32, pub u32);

impl IntersectionId {
    pub fn row(&self) -> u32 {
        self.0
    }

    pub fn col(&self) -> u32 {
        self.1
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// A wrapper type for lane IDs (index into the network's lane table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneId(pub usize);

/// A wrapper type for vehicle IDs (stable index into the registry arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub usize);

/// Direction of travel along a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heading {
    Northbound,
    Southbound,
    Eastbound,
    Westbound,
}

impl Heading {
    pub const ALL: [Heading; 4] = [
        Heading::Northbound,
        Heading::Southbound,
        Heading::Eastbound,
        Heading::Westbound,
    ];

    pub fn axis(&self) -> Axis {
        match self {
            Heading::Northbound | Heading::Southbound => Axis::NorthSouth,
            Heading::Eastbound | Heading::Westbound => Axis::EastWest,
        }
    }

    /// The side of an intersection a vehicle with this heading arrives from
    pub fn approach(&self) -> Approach {
        match self {
            Heading::Northbound => Approach::South,
            Heading::Southbound => Approach::North,
            Heading::Eastbound => Approach::West,
            Heading::Westbound => Approach::East,
        }
    }

    /// Unit step in (row, col) grid coordinates
    pub fn grid_step(&self) -> (i64, i64) {
        match self {
            Heading::Northbound => (-1, 0),
            Heading::Southbound => (1, 0),
            Heading::Eastbound => (0, 1),
            Heading::Westbound => (0, -1),
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// One of the four sides feeding into an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    North,
    South,
    East,
    West,
}

impl Approach {
    pub const ALL: [Approach; 4] = [Approach::North, Approach::South, Approach::East, Approach::West];

    pub fn axis(&self) -> Axis {
        match self {
            Approach::North | Approach::South => Axis::NorthSouth,
            Approach::East | Approach::West => Axis::EastWest,
        }
    }

    /// Heading of the traffic that arrives through this approach
    pub fn inbound_heading(&self) -> Heading {
        match self {
            Approach::North => Heading::Southbound,
            Approach::South => Heading::Northbound,
            Approach::East => Heading::Westbound,
            Approach::West => Heading::Eastbound,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// The two conflicting approach groups of an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    NorthSouth,
    EastWest,
}

impl Axis {
    pub fn opposite(&self) -> Axis {
        match self {
            Axis::NorthSouth => Axis::EastWest,
            Axis::EastWest => Axis::NorthSouth,
        }
    }
}

/// A 2D position in the simulation plane (metres, y grows southward)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Distance kept between a stopped head vehicle and its stop line
pub const STOP_LINE_CLEARANCE: f32 = 0.5;
