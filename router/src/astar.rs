use crate::congestion::{CongestionModifiers, congestion_penalty};
use maze_common::db::board::{RoutingRestriction, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType, route_dir};
use maze_common::error::RouteError;
use maze_common::geom::coord::GridCoord;
use maze_common::grid::cell::cell_flags;
use maze_common::grid::map::RouteMap;
use maze_common::util::config::RouterConfig;
use priority_queue::PriorityQueue;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::time::{Duration, Instant};

/// The 18-cell successor set: 4 cardinal, 4 diagonal, 8 knight, 2 vertical.
const NEIGHBOR_DELTAS: [(i32, i32, i32); 18] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (1, 1, 0),
    (1, -1, 0),
    (-1, 1, 0),
    (-1, -1, 0),
    (1, 2, 0),
    (1, -2, 0),
    (-1, 2, 0),
    (-1, -2, 0),
    (2, 1, 0),
    (2, -1, 0),
    (-2, 1, 0),
    (-2, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

// Fixed-point cost units (x100): geometric lengths of the lateral moves.
const CARDINAL_UNITS: f64 = 100.0;
const DIAGONAL_UNITS: f64 = 141.0;
const KNIGHT_UNITS: f64 = 224.0;
// Admissible per-cell lower bound: knight moves advance 2.236 cells for 224.
const HEURISTIC_UNITS: f64 = 99.0;

pub struct PathFinderOptions<'a> {
    pub record_explored: bool,
    pub record_elapsed: bool,
    pub use_dijkstra: bool,
    pub restriction: Option<&'a RoutingRestriction>,
    pub disable_random_costs: bool,
    pub recognize_self_congestion: bool,
    /// Diff-pair family of the routed net; their deposits are ignored.
    pub exempt_paths: &'a [PathId],
    pub shuffle_seed: u64,
    pub modifiers: CongestionModifiers,
}

impl Default for PathFinderOptions<'_> {
    fn default() -> Self {
        Self {
            record_explored: false,
            record_elapsed: false,
            use_dijkstra: false,
            restriction: None,
            disable_random_costs: false,
            recognize_self_congestion: true,
            exempt_paths: &[],
            shuffle_seed: 0,
            modifiers: CongestionModifiers::none(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PathResult {
    /// Total g-cost; 0 means no path was found (or a trivial one).
    pub cost: u64,
    /// Full cell sequence including both terminals; empty when not found.
    pub coords: Vec<GridCoord>,
    /// Cells popped from the open set.
    pub explored: u32,
    /// Present when `record_explored` was requested.
    pub explored_cells: Vec<GridCoord>,
    pub elapsed: Option<Duration>,
}

impl PathResult {
    pub fn found(&self) -> bool {
        !self.coords.is_empty()
    }
}

/// Per-thread weighted-graph searcher. Scratch vectors span the whole grid,
/// are allocated once and reset in O(1) by epoch tag; clone one per rayon
/// worker via `map_with`.
#[derive(Clone)]
pub struct PathFinder {
    g_cost: Vec<u64>,
    h_cost: Vec<u64>,
    parent: Vec<u32>,
    visited_tag: Vec<u32>,
    closed_tag: Vec<u32>,
    current_tag: u32,
    open: PriorityQueue<u32, Reverse<u64>>,
    capacity: usize,
    neighbor_order: [u8; NEIGHBOR_DELTAS.len()],
}

impl Default for PathFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathFinder {
    pub fn new() -> Self {
        Self {
            g_cost: Vec::new(),
            h_cost: Vec::new(),
            parent: Vec::new(),
            visited_tag: Vec::new(),
            closed_tag: Vec::new(),
            current_tag: 0,
            open: PriorityQueue::new(),
            capacity: 0,
            neighbor_order: std::array::from_fn(|i| i as u8),
        }
    }

    fn ensure_capacity(&mut self, size: usize) {
        if size > self.capacity {
            self.capacity = size;
            self.g_cost.resize(size, u64::MAX);
            self.h_cost.resize(size, 0);
            self.parent.resize(size, u32::MAX);
            self.visited_tag.resize(size, 0);
            self.closed_tag.resize(size, 0);
        }
    }

    fn next_epoch(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.closed_tag.fill(0);
            self.current_tag = 1;
        }
        self.open.clear();
    }

    /// Weighted A* (or Dijkstra) over the 18-neighborhood.
    ///
    /// Recoverable failures (illegal endpoints, exhausted open set) return a
    /// cost-0 result; only cost overflow is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn find_path(
        &mut self,
        map: &RouteMap,
        rules: &DesignRuleTable,
        subsets: &SubsetMap,
        cfg: &RouterConfig,
        path: PathId,
        path_name: &str,
        start: GridCoord,
        end: GridCoord,
        start_swap_zone: u16,
        opts: &PathFinderOptions,
    ) -> Result<PathResult, RouteError> {
        let timer = opts.record_elapsed.then(Instant::now);

        if let Some(reason) = self.endpoint_violation(map, rules, subsets, path, start, end) {
            log::warn!(
                "path {} ({}): endpoints ({},{},{}) -> ({},{},{}) rejected: {}",
                path.index(),
                path_name,
                start.x,
                start.y,
                start.z,
                end.x,
                end.y,
                end.z,
                reason
            );
            return Ok(PathResult {
                elapsed: timer.map(|t| t.elapsed()),
                ..PathResult::default()
            });
        }

        if start == end {
            return Ok(PathResult {
                cost: 0,
                coords: vec![start],
                explored: 0,
                explored_cells: Vec::new(),
                elapsed: timer.map(|t| t.elapsed()),
            });
        }

        let grid_size =
            (map.width() as usize) * (map.height() as usize) * (map.layers() as usize);
        self.ensure_capacity(grid_size);
        self.next_epoch();

        // Re-shuffling the successor order each call breaks cost ties
        // differently across iterations; the seed is the path's previous
        // iteration cost.
        let mut rng = StdRng::seed_from_u64(opts.shuffle_seed);
        self.neighbor_order.shuffle(&mut rng);

        let modifiers = if opts.disable_random_costs {
            CongestionModifiers::none()
        } else {
            opts.modifiers
        };

        let cardinal_cost = (CARDINAL_UNITS * cfg.trace_cost_multiplier).round() as u64;
        let diagonal_cost = (DIAGONAL_UNITS * cfg.trace_cost_multiplier).round() as u64;
        let knight_cost = (KNIGHT_UNITS * cfg.trace_cost_multiplier).round() as u64;

        let start_idx = map.index(start) as u32;
        let end_idx = map.index(end) as u32;
        self.g_cost[start_idx as usize] = 0;
        self.parent[start_idx as usize] = u32::MAX;
        self.visited_tag[start_idx as usize] = self.current_tag;
        let h0 = self.heuristic(map, rules, subsets, cfg, path, start, end, opts.use_dijkstra);
        self.open.push(start_idx, Reverse(h0));

        let mut explored: u32 = 0;
        let mut explored_cells = Vec::new();

        while let Some((idx, _)) = self.open.pop() {
            let current = map.coord_of(idx as usize);
            self.closed_tag[idx as usize] = self.current_tag;
            explored += 1;
            if opts.record_explored {
                explored_cells.push(current);
            }

            if idx == end_idx {
                let coords = self.reconstruct(map, idx);
                return Ok(PathResult {
                    cost: self.g_cost[idx as usize],
                    coords,
                    explored,
                    explored_cells,
                    elapsed: timer.map(|t| t.elapsed()),
                });
            }

            let g_current = self.g_cost[idx as usize];
            let neighbor_order = self.neighbor_order;

            for order in neighbor_order {
                let delta = NEIGHBOR_DELTAS[order as usize];
                let Some(next) =
                    self.step_allowed(map, rules, subsets, path, current, delta, end, start_swap_zone, opts)
                else {
                    continue;
                };

                let shape = match delta.2 {
                    0 => ShapeType::Trace,
                    1 => ShapeType::ViaUp,
                    _ => ShapeType::ViaDown,
                };
                let step_cost = match (delta.0.abs() + delta.1.abs(), delta.2) {
                    (_, 1) | (_, -1) => cfg.via_cost,
                    (1, _) => cardinal_cost,
                    (2, _) => diagonal_cost,
                    _ => knight_cost,
                };

                let next_zone = map.design_rule_zone(next);
                let next_subset = subsets.subset_for(path, next_zone);
                let penalty = congestion_penalty(
                    map.cell(next),
                    path,
                    next_subset,
                    shape,
                    opts.recognize_self_congestion,
                    &modifiers,
                    opts.exempt_paths,
                );

                let increment =
                    step_cost
                        .checked_add(penalty)
                        .ok_or(RouteError::CostOverflow {
                            path: path.index(),
                            cell: next,
                            base: step_cost,
                            increment: penalty,
                        })?;
                let g_next = g_current
                    .checked_add(increment)
                    .ok_or(RouteError::CostOverflow {
                        path: path.index(),
                        cell: next,
                        base: g_current,
                        increment,
                    })?;

                let next_idx = map.index(next) as u32;
                if self.closed_tag[next_idx as usize] == self.current_tag {
                    continue;
                }

                let first_visit = self.visited_tag[next_idx as usize] != self.current_tag;
                if first_visit || g_next < self.g_cost[next_idx as usize] {
                    if first_visit {
                        self.h_cost[next_idx as usize] = self
                            .heuristic(map, rules, subsets, cfg, path, next, end, opts.use_dijkstra);
                    }
                    self.visited_tag[next_idx as usize] = self.current_tag;
                    self.g_cost[next_idx as usize] = g_next;
                    self.parent[next_idx as usize] = idx;

                    let f_next = g_next
                        .checked_add(self.h_cost[next_idx as usize])
                        .ok_or(RouteError::CostOverflow {
                            path: path.index(),
                            cell: next,
                            base: g_next,
                            increment: self.h_cost[next_idx as usize],
                        })?;
                    // Decrease-key through the queue's internal slot table.
                    self.open.push_increase(next_idx, Reverse(f_next));
                }
            }
        }

        let elapsed = timer.map(|t| t.elapsed());
        log::info!(
            "path {} ({}): open set exhausted after exploring {} cells{}",
            path.index(),
            path_name,
            explored,
            elapsed
                .map(|e| format!(" in {:.1?}", e))
                .unwrap_or_default()
        );
        Ok(PathResult {
            cost: 0,
            coords: Vec::new(),
            explored,
            explored_cells,
            elapsed,
        })
    }

    fn endpoint_violation(
        &self,
        map: &RouteMap,
        rules: &DesignRuleTable,
        subsets: &SubsetMap,
        path: PathId,
        start: GridCoord,
        end: GridCoord,
    ) -> Option<&'static str> {
        if !map.contains(start) || !map.contains(end) {
            return Some("terminal outside the map");
        }
        for c in [start, end] {
            if map.is_trace_barrier(c) {
                return Some("terminal inside a trace barrier");
            }
            let subset = subsets.subset_for(path, map.design_rule_zone(c));
            if map.is_inside_barrier_for_shape(c, subset, ShapeType::Trace) {
                return Some("terminal inside a barrier-proximity zone");
            }
            if rules.route_directions(map.design_rule_zone(c), subset) == route_dir::NONE {
                return Some("allowed route direction is NONE at a terminal");
            }
        }

        let start_subset = subsets.subset_for(path, map.design_rule_zone(start));
        if map.is_inside_pinswap_proximity_for_shape(start, start_subset, ShapeType::Trace)
            && map.in_pinswap_zone(start) == 0
        {
            return Some("start terminal inside a pin-swap proximity zone");
        }
        let end_subset = subsets.subset_for(path, map.design_rule_zone(end));
        if map.is_inside_pinswap_proximity_for_shape(end, end_subset, ShapeType::Trace)
            && map.in_pinswap_zone(end) == 0
            && !self.start_touches_swap_zone(map, start)
        {
            return Some("end terminal inside a pin-swap proximity zone");
        }
        None
    }

    fn start_touches_swap_zone(&self, map: &RouteMap, start: GridCoord) -> bool {
        if map.in_pinswap_zone(start) != 0 {
            return true;
        }
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let x = start.x as i32 + dx;
                let y = start.y as i32 + dy;
                if !map.is_outside_map(x, y, start.z as i32)
                    && map.in_pinswap_zone(GridCoord::new(x as u32, y as u32, start.z)) != 0
                {
                    return true;
                }
            }
        }
        false
    }

    #[inline]
    fn lateral_walkable(
        &self,
        map: &RouteMap,
        subsets: &SubsetMap,
        path: PathId,
        coord: GridCoord,
    ) -> bool {
        if map.is_trace_barrier(coord) {
            return false;
        }
        let subset = subsets.subset_for(path, map.design_rule_zone(coord));
        !map.is_inside_barrier_for_shape(coord, subset, ShapeType::Trace)
    }

    /// Full legality gate for one candidate step; returns the target cell
    /// when the step is permitted.
    #[allow(clippy::too_many_arguments)]
    fn step_allowed(
        &self,
        map: &RouteMap,
        rules: &DesignRuleTable,
        subsets: &SubsetMap,
        path: PathId,
        from: GridCoord,
        delta: (i32, i32, i32),
        end: GridCoord,
        start_swap_zone: u16,
        opts: &PathFinderOptions,
    ) -> Option<GridCoord> {
        let (dx, dy, dz) = delta;
        let x = from.x as i32 + dx;
        let y = from.y as i32 + dy;
        let z = from.z as i32 + dz;
        if map.is_outside_map(x, y, z) {
            return None;
        }
        let to = GridCoord::new(x as u32, y as u32, z as u8);

        if map.is_trace_barrier(to) {
            return None;
        }
        let from_zone = map.design_rule_zone(from);
        let to_zone = map.design_rule_zone(to);
        let from_subset = subsets.subset_for(path, from_zone);
        let to_subset = subsets.subset_for(path, to_zone);

        if map.is_inside_barrier_for_shape(to, to_subset, ShapeType::Trace) {
            return None;
        }

        let from_swap = map.in_pinswap_zone(from);
        let to_swap = map.in_pinswap_zone(to);

        // Pin-swap proximity keeps outside nets away unless the step comes
        // from inside the zone itself.
        if map.is_inside_pinswap_proximity_for_shape(to, to_subset, ShapeType::Trace)
            && from_swap == 0
            && to_swap == 0
        {
            return None;
        }

        if dz != 0 {
            let (up_end, down_end) = if dz > 0 { (from, to) } else { (to, from) };
            if map.cell(up_end).has_flag(cell_flags::VIA_UP_BARRIER)
                || map.cell(down_end).has_flag(cell_flags::VIA_DOWN_BARRIER)
            {
                return None;
            }
            let up_subset = subsets.subset_for(path, map.design_rule_zone(up_end));
            let down_subset = subsets.subset_for(path, map.design_rule_zone(down_end));
            if map.is_inside_barrier_for_shape(up_end, up_subset, ShapeType::ViaUp)
                || map.is_inside_barrier_for_shape(down_end, down_subset, ShapeType::ViaDown)
            {
                return None;
            }
        }

        // Paths interface with swap zones axis-aligned only.
        if (from_swap != 0 || to_swap != 0) && dx.abs() + dy.abs() + dz.abs() != 1 {
            return None;
        }
        // A path may only enter the swap zone it started in.
        if to_swap != 0 && to_swap != start_swap_zone {
            return None;
        }

        let combined = rules.route_directions(from_zone, from_subset)
            & rules.route_directions(to_zone, to_subset);
        let required = route_dir::required_bit(dx, dy, dz);
        if combined & required == 0 {
            let near_target = (to.x as i32 - end.x as i32).abs() <= 1
                && (to.y as i32 - end.y as i32).abs() <= 1
                && (to.z as i32 - end.z as i32).abs() <= 1;
            let exempt = route_dir::is_x_routing_only(combined)
                && (near_target || from_swap != 0 || to_swap != 0);
            if !exempt {
                return None;
            }
        }

        // Diagonal and knight moves need both bridging corner cells open.
        let ax = dx.abs();
        let ay = dy.abs();
        if dz == 0 && ax + ay > 1 {
            let (c1, c2) = if ax == 1 && ay == 1 {
                ((from.x as i32 + dx, from.y as i32), (from.x as i32, from.y as i32 + dy))
            } else if ax == 1 {
                // (1, 2): step through the column first.
                (
                    (from.x as i32, from.y as i32 + dy.signum()),
                    (from.x as i32 + dx, from.y as i32 + dy.signum()),
                )
            } else {
                // (2, 1): step through the row first.
                (
                    (from.x as i32 + dx.signum(), from.y as i32),
                    (from.x as i32 + dx.signum(), from.y as i32 + dy),
                )
            };
            for (cx, cy) in [c1, c2] {
                if map.is_outside_map(cx, cy, from.z as i32) {
                    return None;
                }
                let corner = GridCoord::new(cx as u32, cy as u32, from.z);
                if !self.lateral_walkable(map, subsets, path, corner) {
                    return None;
                }
            }
        }

        if let Some(restriction) = opts.restriction {
            if !restriction.allows(to, dz == 0) {
                return None;
            }
        }

        Some(to)
    }

    /// Lower bound on the remaining cost, consistent with the move set and
    /// the route-direction mask at the cell; zero in Dijkstra mode.
    #[allow(clippy::too_many_arguments)]
    fn heuristic(
        &self,
        map: &RouteMap,
        rules: &DesignRuleTable,
        subsets: &SubsetMap,
        cfg: &RouterConfig,
        path: PathId,
        from: GridCoord,
        end: GridCoord,
        use_dijkstra: bool,
    ) -> u64 {
        if use_dijkstra {
            return 0;
        }
        let dx = (from.x as i64 - end.x as i64).abs() as f64;
        let dy = (from.y as i64 - end.y as i64).abs() as f64;
        let dz = (from.z as i64 - end.z as i64).unsigned_abs();

        let lateral = if dx == 0.0 && dy == 0.0 {
            0
        } else {
            let zone = map.design_rule_zone(from);
            let mask = rules.route_directions(zone, subsets.subset_for(path, zone));
            // Without diagonal or knight moves the Manhattan bound is tight;
            // otherwise the Euclidean bound must absorb their discounts.
            if mask & (route_dir::DIAGONAL | route_dir::KNIGHT) == 0 {
                ((dx + dy) * CARDINAL_UNITS * cfg.trace_cost_multiplier).floor() as u64
            } else {
                ((dx * dx + dy * dy).sqrt() * HEURISTIC_UNITS * cfg.trace_cost_multiplier).floor()
                    as u64
            }
        };
        lateral + dz * cfg.via_cost
    }

    fn reconstruct(&self, map: &RouteMap, end_idx: u32) -> Vec<GridCoord> {
        let mut coords = Vec::new();
        let mut idx = end_idx;
        loop {
            coords.push(map.coord_of(idx as usize));
            let parent = self.parent[idx as usize];
            if parent == u32::MAX {
                break;
            }
            idx = parent;
        }
        coords.reverse();
        coords
    }
}
