//! Road network graph
//!
//! A rectangular grid of intersections joined by one-way lanes, stored as a
//! petgraph directed graph. Nodes are intersections and boundary points,
//! edges are lanes. The topology is fixed once built.

use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;

use super::config::NetworkParams;
use super::error::{SimError, SimResult};
use super::types::{Approach, Heading, IntersectionId, LaneId, Position};

/// A node of the road graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkNode {
    Intersection(IntersectionId),
    /// Point outside the grid on `side`, next to the intersection it serves
    Boundary { side: Approach, serves: IntersectionId },
}

/// Where a lane starts or ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneEnd {
    Intersection(IntersectionId),
    /// Grid edge on the given compass side
    Boundary(Approach),
}

/// A directed lane segment
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    pub heading: Heading,
    pub length: f32,
    pub start: Position,
    pub end: Position,
    pub from: LaneEnd,
    pub to: LaneEnd,
}

impl Lane {
    /// World coordinates of a point `distance` metres along the lane
    pub fn point_at(&self, distance: f32) -> Position {
        let t = (distance / self.length).clamp(0.0, 1.0);
        self.start.lerp(&self.end, t)
    }

    /// Intersection whose signal governs the end of this lane
    pub fn controlled_by(&self) -> Option<IntersectionId> {
        match self.to {
            LaneEnd::Intersection(id) => Some(id),
            LaneEnd::Boundary(_) => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.to, LaneEnd::Boundary(_))
    }

    /// Boundary side this lane enters from, if it is a spawn lane
    pub fn entry_side(&self) -> Option<Approach> {
        match self.from {
            LaneEnd::Boundary(side) => Some(side),
            LaneEnd::Intersection(_) => None,
        }
    }
}

/// Lane slots of one intersection
#[derive(Debug, Clone, Copy)]
struct Slots {
    /// Indexed by `Approach::index()`
    approaches: [LaneId; 4],
    /// Indexed by `Heading::index()`
    exits: [LaneId; 4],
}

#[derive(Debug)]
pub struct RoadNetwork {
    rows: u32,
    cols: u32,
    spacing: f32,
    graph: DiGraph<NetworkNode, LaneId>,
    node_of: BTreeMap<IntersectionId, NodeIndex>,
    lanes: Vec<Lane>,
    slots: BTreeMap<IntersectionId, Slots>,
    inbound: Vec<LaneId>,
    processing_order: Vec<LaneId>,
}

impl RoadNetwork {
    /// Build a `rows` x `cols` grid. Every adjacent pair gets one lane per
    /// direction; every edge intersection gets an inbound and an outbound
    /// boundary lane per side it touches.
    pub fn new_grid(rows: u32, cols: u32, params: &NetworkParams) -> SimResult<Self> {
        if rows < 1 || cols < 1 {
            return Err(SimError::InvalidTopology { rows, cols });
        }

        let mut graph = DiGraph::new();
        let mut node_of = BTreeMap::new();
        let ids: Vec<IntersectionId> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| IntersectionId(r, c)))
            .collect();
        for id in &ids {
            node_of.insert(*id, graph.add_node(NetworkNode::Intersection(*id)));
        }

        let mut network = Self {
            rows,
            cols,
            spacing: params.spacing_m,
            graph,
            node_of,
            lanes: Vec::new(),
            slots: BTreeMap::new(),
            inbound: Vec::new(),
            processing_order: Vec::new(),
        };

        let mut approaches: BTreeMap<IntersectionId, [Option<LaneId>; 4]> = BTreeMap::new();
        let mut exits: BTreeMap<IntersectionId, [Option<LaneId>; 4]> = BTreeMap::new();

        // Every lane leaving an intersection: internal lanes and outbound boundary lanes
        for id in &ids {
            for heading in Heading::ALL {
                let from_node = network.node_of[id];
                let start = network.intersection_position(*id);
                let (to, to_node, end, length) = match network.neighbor(*id, heading) {
                    Some(next) => (
                        LaneEnd::Intersection(next),
                        network.node_of[&next],
                        network.intersection_position(next),
                        params.spacing_m,
                    ),
                    None => {
                        let side = heading_side(heading);
                        let node = network
                            .graph
                            .add_node(NetworkNode::Boundary { side, serves: *id });
                        (
                            LaneEnd::Boundary(side),
                            node,
                            offset(start, heading, params.boundary_lane_m),
                            params.boundary_lane_m,
                        )
                    }
                };
                let lane = network.add_lane(
                    heading,
                    length,
                    start,
                    end,
                    LaneEnd::Intersection(*id),
                    to,
                    from_node,
                    to_node,
                );
                exits.entry(*id).or_insert([None; 4])[heading.index()] = Some(lane);
                if let LaneEnd::Intersection(next) = to {
                    approaches.entry(next).or_insert([None; 4])[heading.approach().index()] =
                        Some(lane);
                }
            }
        }

        // Inbound boundary lanes feeding the edge intersections
        for id in &ids {
            for approach in Approach::ALL {
                let heading = approach.inbound_heading();
                let upstream = opposite(heading);
                if network.neighbor(*id, upstream).is_some() {
                    continue;
                }
                let end = network.intersection_position(*id);
                let start = offset(end, upstream, params.boundary_lane_m);
                let from_node = network
                    .graph
                    .add_node(NetworkNode::Boundary { side: approach, serves: *id });
                let to_node = network.node_of[id];
                let lane = network.add_lane(
                    heading,
                    params.boundary_lane_m,
                    start,
                    end,
                    LaneEnd::Boundary(approach),
                    LaneEnd::Intersection(*id),
                    from_node,
                    to_node,
                );
                approaches.entry(*id).or_insert([None; 4])[approach.index()] = Some(lane);
                network.inbound.push(lane);
            }
        }

        for id in &ids {
            let slots = Slots {
                approaches: wired(approaches.get(id), *id)?,
                exits: wired(exits.get(id), *id)?,
            };
            network.slots.insert(*id, slots);
        }

        network.processing_order = network.compute_processing_order();
        Ok(network)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_lane(
        &mut self,
        heading: Heading,
        length: f32,
        start: Position,
        end: Position,
        from: LaneEnd,
        to: LaneEnd,
        from_node: NodeIndex,
        to_node: NodeIndex,
    ) -> LaneId {
        let id = LaneId(self.lanes.len());
        self.lanes.push(Lane {
            id,
            heading,
            length,
            start,
            end,
            from,
            to,
        });
        self.graph.add_edge(from_node, to_node, id);
        id
    }

    /// Downstream lanes first, so a head vehicle always sees an updated tail
    fn compute_processing_order(&self) -> Vec<LaneId> {
        let mut keyed: Vec<(usize, LaneId)> = self
            .lanes
            .iter()
            .map(|lane| {
                let mut hops = 0;
                let mut current = lane.id;
                while let Some(next) = self.next_lane(current) {
                    hops += 1;
                    current = next;
                }
                (hops, lane.id)
            })
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn intersection_position(&self, id: IntersectionId) -> Position {
        Position::new(id.col() as f32 * self.spacing, id.row() as f32 * self.spacing)
    }

    pub fn contains(&self, id: IntersectionId) -> bool {
        id.row() < self.rows && id.col() < self.cols
    }

    /// Adjacent intersection in the direction of `heading`
    pub fn neighbor(&self, id: IntersectionId, heading: Heading) -> Option<IntersectionId> {
        let (dr, dc) = heading.grid_step();
        let r = id.row() as i64 + dr;
        let c = id.col() as i64 + dc;
        if r < 0 || c < 0 || r >= self.rows as i64 || c >= self.cols as i64 {
            return None;
        }
        Some(IntersectionId(r as u32, c as u32))
    }

    /// Lane arriving at `id` through `approach`
    pub fn approach_lane(&self, id: IntersectionId, approach: Approach) -> SimResult<LaneId> {
        self.slots
            .get(&id)
            .map(|s| s.approaches[approach.index()])
            .ok_or(SimError::IntersectionNotFound(id))
    }

    /// Lane leaving `id` with `heading`
    pub fn exit_lane(&self, id: IntersectionId, heading: Heading) -> SimResult<LaneId> {
        self.slots
            .get(&id)
            .map(|s| s.exits[heading.index()])
            .ok_or(SimError::IntersectionNotFound(id))
    }

    /// All four approach lanes of `id`, indexed by `Approach::index()`
    pub fn approach_lanes(&self, id: IntersectionId) -> SimResult<[LaneId; 4]> {
        self.slots
            .get(&id)
            .map(|s| s.approaches)
            .ok_or(SimError::IntersectionNotFound(id))
    }

    /// Intersections in row-major order
    pub fn intersections(&self) -> impl Iterator<Item = IntersectionId> + '_ {
        self.slots.keys().copied()
    }

    pub fn intersection_count(&self) -> usize {
        self.slots.len()
    }

    pub fn lane(&self, id: LaneId) -> SimResult<&Lane> {
        self.lanes.get(id.0).ok_or(SimError::LaneNotFound(id))
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Straight-through continuation of `lane`, `None` for outbound boundary lanes
    pub fn next_lane(&self, lane: LaneId) -> Option<LaneId> {
        let lane = self.lanes.get(lane.0)?;
        let id = lane.controlled_by()?;
        self.slots.get(&id).map(|s| s.exits[lane.heading.index()])
    }

    /// Spawn lanes in id order
    pub fn inbound_boundary_lanes(&self) -> &[LaneId] {
        &self.inbound
    }

    /// Spawn lanes entering from `side`, in id order
    pub fn inbound_boundary_lanes_on(&self, side: Approach) -> Vec<LaneId> {
        self.inbound_boundary_lanes()
            .iter()
            .copied()
            .filter(|id| self.lanes[id.0].entry_side() == Some(side))
            .collect()
    }

    pub fn processing_order(&self) -> &[LaneId] {
        &self.processing_order
    }

    /// Path length travelling with `heading` from the first intersection of
    /// `id`'s row or column up to `id`
    pub fn distance_along_axis(&self, id: IntersectionId, heading: Heading) -> SimResult<f32> {
        if !self.contains(id) {
            return Err(SimError::IntersectionNotFound(id));
        }
        let mut origin = id;
        while let Some(prev) = self.neighbor(origin, opposite(heading)) {
            origin = prev;
        }
        if origin == id {
            return Ok(0.0);
        }
        let start = self.node_of[&origin];
        let goal = self.node_of[&id];
        let costs = dijkstra(&self.graph, start, Some(goal), |edge| {
            let lane = &self.lanes[edge.weight().0];
            if lane.heading == heading {
                lane.length
            } else {
                // Detours never beat the straight path along a grid line
                lane.length * 4.0
            }
        });
        costs
            .get(&goal)
            .copied()
            .ok_or(SimError::IntersectionNotFound(id))
    }
}

pub fn opposite(heading: Heading) -> Heading {
    match heading {
        Heading::Northbound => Heading::Southbound,
        Heading::Southbound => Heading::Northbound,
        Heading::Eastbound => Heading::Westbound,
        Heading::Westbound => Heading::Eastbound,
    }
}

/// Grid side a vehicle leaves through when travelling with `heading`
fn heading_side(heading: Heading) -> Approach {
    match heading {
        Heading::Northbound => Approach::North,
        Heading::Southbound => Approach::South,
        Heading::Eastbound => Approach::East,
        Heading::Westbound => Approach::West,
    }
}

fn wired(slots: Option<&[Option<LaneId>; 4]>, id: IntersectionId) -> SimResult<[LaneId; 4]> {
    let slots = slots.ok_or(SimError::IntersectionNotFound(id))?;
    let mut out = [LaneId(0); 4];
    for (dst, src) in out.iter_mut().zip(slots) {
        *dst = src.ok_or(SimError::IntersectionNotFound(id))?;
    }
    Ok(out)
}

fn offset(from: Position, heading: Heading, distance: f32) -> Position {
    let (dr, dc) = heading.grid_step();
    Position::new(from.x + dc as f32 * distance, from.y + dr as f32 * distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NetworkParams {
        NetworkParams {
            spacing_m: 100.0,
            boundary_lane_m: 50.0,
        }
    }

    #[test]
    fn lane_counts() {
        let net = RoadNetwork::new_grid(2, 3, &params()).unwrap();
        // internal: 2 * (rows*(cols-1) + cols*(rows-1)) = 2 * (4 + 3) = 14
        // boundary: 2 * 2 * (rows + cols) = 20
        assert_eq!(net.lane_count(), 34);
        assert_eq!(net.inbound_boundary_lanes().len(), 10);
        assert_eq!(net.inbound_boundary_lanes_on(Approach::West).len(), 2);
        assert_eq!(net.inbound_boundary_lanes_on(Approach::North).len(), 3);
        assert_eq!((net.rows(), net.cols()), (2, 3));
        assert_eq!(net.intersection_count(), 6);
    }

    #[test]
    fn chain_follows_heading() {
        let net = RoadNetwork::new_grid(1, 3, &params()).unwrap();
        let entry = net.approach_lane(IntersectionId(0, 0), Approach::West).unwrap();
        let mut lane = entry;
        let mut hops = 0;
        while let Some(next) = net.next_lane(lane) {
            assert_eq!(net.lane(next).unwrap().heading, Heading::Eastbound);
            lane = next;
            hops += 1;
        }
        assert_eq!(hops, 3);
        assert!(net.lane(lane).unwrap().is_exit());
    }

    #[test]
    fn processing_order_is_downstream_first() {
        let net = RoadNetwork::new_grid(2, 2, &params()).unwrap();
        let order = net.processing_order();
        let rank = |id: LaneId| order.iter().position(|l| *l == id).unwrap();
        for lane in net.lanes() {
            if let Some(next) = net.next_lane(lane.id) {
                assert!(rank(next) < rank(lane.id));
            }
        }
    }

    #[test]
    fn axis_distance() {
        let net = RoadNetwork::new_grid(2, 3, &params()).unwrap();
        let d = net
            .distance_along_axis(IntersectionId(1, 2), Heading::Eastbound)
            .unwrap();
        assert_eq!(d, 200.0);
        let d = net
            .distance_along_axis(IntersectionId(1, 2), Heading::Westbound)
            .unwrap();
        assert_eq!(d, 0.0);
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert!(matches!(
            RoadNetwork::new_grid(0, 3, &params()),
            Err(SimError::InvalidTopology { rows: 0, cols: 3 })
        ));
    }
}
