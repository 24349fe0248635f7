use crate::congestion::{CONGESTION_RADIUS_SLACK_CELLS, DRC_CONGESTION_BONUS};
use crate::metrics::{DrcRecord, RoutingMetrics};
use maze_common::db::board::{Board, MapState, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::error::RouteError;
use maze_common::geom::coord::{GridCoord, PathPoint};
use maze_common::grid::cell::{ONE_TRAVERSAL, cell_flags};
use maze_common::grid::map::{RouteMap, disk_offsets};
use rayon::prelude::*;

/// Pseudo-net relationships needed for DRC exemptions, separated from
/// `Board` so the evaluator can borrow it next to a mutable map.
#[derive(Clone, Debug)]
pub struct PathKinds {
    is_pseudo: Vec<bool>,
    members: Vec<Option<(PathId, PathId)>>,
}

impl PathKinds {
    pub fn from_board(board: &Board) -> Self {
        let num_paths = board.num_paths();
        let mut is_pseudo = vec![false; num_paths];
        let mut members = vec![None; num_paths];
        for p in board.num_nets()..num_paths {
            let pseudo = PathId::new(p);
            is_pseudo[p] = true;
            members[p] = Some(board.pseudo_pair(pseudo));
        }
        Self { is_pseudo, members }
    }

    pub fn is_pseudo(&self, path: PathId) -> bool {
        self.is_pseudo[path.index()]
    }

    fn pseudo_member(&self, pseudo: PathId, other: PathId) -> bool {
        match self.members[pseudo.index()] {
            Some((a, b)) => a == other || b == other,
            None => false,
        }
    }

    /// DRC exemptions: a net against itself, and a pseudo-net against its
    /// own diff-pair members (in either order).
    pub fn exempt(&self, a: PathId, b: PathId) -> bool {
        a == b || self.pseudo_member(a, b) || self.pseudo_member(b, a)
    }
}

/// The path-finder's sparse centerline expanded so that every physical cell
/// the conductor occupies is enumerated. Lateral jumps (diagonal, knight)
/// get bridge cells inserted, except where the local line width is at least
/// two cells wide and the finder's own cells already cover the footprint.
pub fn build_contiguous_paths(
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    state: &MapState,
    map: &RouteMap,
    paths: &[Vec<PathPoint>],
) -> Vec<Vec<(GridCoord, ShapeType)>> {
    paths
        .iter()
        .enumerate()
        .map(|(p, points)| {
            let path = PathId::new(p);
            let mut out: Vec<(GridCoord, ShapeType)> = Vec::with_capacity(points.len() * 2 + 1);
            if points.is_empty() {
                return out;
            }
            let start = state.start_cells[p];
            out.push((start, ShapeType::Trace));

            let mut prev = start;
            for point in points {
                let c = point.coord;
                let dz = prev.dz(c);
                if dz != 0 {
                    let shape = if dz > 0 { ShapeType::ViaUp } else { ShapeType::ViaDown };
                    out.push((c, shape));
                } else {
                    let zone = map.design_rule_zone(prev);
                    let wide = rules.rule(zone, subsets.subset_for(path, zone)).line_width >= 2.0;
                    if !wide {
                        for bridge in bridge_cells(prev, c) {
                            out.push((bridge, ShapeType::Trace));
                        }
                    }
                    out.push((c, ShapeType::Trace));
                }
                prev = c;
            }
            out
        })
        .collect()
}

/// Cells that make a lateral jump physically contiguous.
fn bridge_cells(from: GridCoord, to: GridCoord) -> Vec<GridCoord> {
    let dx = from.dx(to);
    let dy = from.dy(to);
    let (ax, ay) = (dx.abs(), dy.abs());
    let z = from.z;

    if ax + ay <= 1 {
        Vec::new()
    } else if ax == 1 && ay == 1 {
        vec![GridCoord::new((from.x as i32 + dx) as u32, from.y, z)]
    } else if ax == 1 && ay == 2 {
        let my = (from.y as i32 + dy.signum()) as u32;
        vec![
            GridCoord::new(from.x, my, z),
            GridCoord::new((from.x as i32 + dx) as u32, my, z),
        ]
    } else if ax == 2 && ay == 1 {
        let mx = (from.x as i32 + dx.signum()) as u32;
        vec![
            GridCoord::new(mx, from.y, z),
            GridCoord::new(mx, (from.y as i32 + dy) as u32, z),
        ]
    } else {
        // Not a legal jump; leave it to the gap filler.
        Vec::new()
    }
}

/// Marks every contiguous cell with its (path, shape) centerline entry, the
/// rendering fill flags, and the NEAR_A_NET halo that bounds the DRC scan.
pub fn mark_path_centers(
    map: &mut RouteMap,
    kinds: &PathKinds,
    contiguous: &[Vec<(GridCoord, ShapeType)>],
) -> Result<(), RouteError> {
    for (p, cells) in contiguous.iter().enumerate() {
        let path = PathId::new(p);
        let pseudo = kinds.is_pseudo(path);
        for &(coord, shape) in cells {
            if !map.cell_mut(coord).add_path_center(path, shape) {
                return Err(RouteError::TooManyTraversingShapes {
                    path: p,
                    cell: coord,
                });
            }
            let cell = map.cell_mut(coord);
            let fill = match (pseudo, shape) {
                (false, ShapeType::Trace) => cell_flags::METAL_FILL,
                (false, ShapeType::ViaUp) => cell_flags::VIA_ABOVE_FILL,
                (false, ShapeType::ViaDown) => cell_flags::VIA_BELOW_FILL,
                (true, ShapeType::Trace) => cell_flags::PSEUDO_METAL_FILL,
                (true, ShapeType::ViaUp) => cell_flags::PSEUDO_VIA_ABOVE_FILL,
                (true, ShapeType::ViaDown) => cell_flags::PSEUDO_VIA_BELOW_FILL,
            };
            cell.set_flag(fill);
        }

        for &(coord, _) in cells {
            let radius = map.max_interaction_radius_on_layer(coord.z) + CONGESTION_RADIUS_SLACK_CELLS;
            for (dx, dy) in disk_offsets(radius) {
                let x = coord.x as i32 + dx;
                let y = coord.y as i32 + dy;
                if !map.is_outside_map(x, y, coord.z as i32) {
                    map.cell_mut(GridCoord::new(x as u32, y as u32, coord.z))
                        .set_flag(cell_flags::NEAR_A_NET);
                }
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct PairHit {
    cell: GridCoord,
    a: PathId,
    shape_a: ShapeType,
    b: PathId,
    shape_b: ShapeType,
}

#[derive(Clone, Copy)]
struct Deposit {
    cell: GridCoord,
    path: PathId,
    subset: u8,
    shape: ShapeType,
    amount: u32,
}

#[derive(Default)]
struct RowAccum {
    pairs: Vec<PairHit>,
    deposits: Vec<Deposit>,
}

/// Scans the marked grid for DRC cells and congestion interactions.
///
/// Rows of each layer are scanned in parallel against the read-only map;
/// the crossing matrix is updated atomically in-scan, and all per-cell
/// writes (flags, counts, deposits) are applied serially per layer from the
/// merged per-row accumulators. Returns the total number of DRC cells.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    map: &mut RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    kinds: &PathKinds,
    paths: &[Vec<PathPoint>],
    layer_pairs: &[Vec<(u8, ShapeType)>],
    metrics: &mut RoutingMetrics,
    add_congestion: bool,
) -> Result<u64, RouteError> {
    metrics.begin_evaluation();

    // Per-path geometry counters straight from the sparse paths.
    for (p, points) in paths.iter().enumerate() {
        let mut lateral = 0u32;
        let mut vias = 0u32;
        let mut prev: Option<GridCoord> = None;
        for point in points {
            if let Some(prev) = prev {
                if prev.dz(point.coord) == 0 {
                    lateral += 1;
                } else {
                    vias += 1;
                }
            }
            prev = Some(point.coord);
        }
        metrics.lateral_lengths[p] = lateral;
        metrics.via_counts[p] = vias;
    }

    // DRC-pressure scaling for evaluator deposits: paths that keep failing
    // deposit more, up to double.
    let traversal_weight: Vec<u32> = (0..metrics.num_paths)
        .map(|p| {
            let drc_fraction = 1.0 - metrics.f_path(PathId::new(p));
            (ONE_TRAVERSAL as f64 * (1.0 + drc_fraction)).round() as u32
        })
        .collect();

    let mut total_drc_cells: u64 = 0;

    for z in 0..map.layers() {
        let radius = map.max_interaction_radius_on_layer(z);
        if radius <= 0.0 {
            continue;
        }
        let offsets = disk_offsets(radius + CONGESTION_RADIUS_SLACK_CELLS);
        let metrics_ref = &*metrics;
        let map_ref = &*map;

        let accums: Vec<RowAccum> = (0..map_ref.height())
            .into_par_iter()
            .map(|y| {
                scan_row(
                    map_ref,
                    rules,
                    subsets,
                    kinds,
                    metrics_ref,
                    &offsets,
                    &traversal_weight,
                    layer_pairs,
                    add_congestion,
                    y,
                    z,
                )
            })
            .collect();

        // Serial merge: counters, flags and congestion deposits.
        for accum in accums {
            for hit in &accum.pairs {
                total_drc_cells += 1;
                metrics.path_drc_cells[hit.a.index()] += 1;
                metrics.path_drc_cells[hit.b.index()] += 1;
                metrics.path_drc_categories[hit.a.index()].add(hit.shape_a, hit.shape_b);
                metrics.path_drc_categories[hit.b.index()].add(hit.shape_a, hit.shape_b);
                metrics.layer_drc_categories[z as usize].add(hit.shape_a, hit.shape_b);
                metrics.record_drc(DrcRecord {
                    cell: hit.cell,
                    path_a: hit.a,
                    shape_a: hit.shape_a,
                    path_b: hit.b,
                    shape_b: hit.shape_b,
                });

                let cell = map.cell_mut(hit.cell);
                cell.set_flag(cell_flags::DRC);
                if hit.shape_a == ShapeType::ViaUp || hit.shape_b == ShapeType::ViaUp {
                    cell.set_flag(cell_flags::VIA_ABOVE_DRC);
                }

                if add_congestion {
                    // A small fixed bonus keyed so that each participant
                    // feels the other's presence here next iteration.
                    let zone = map.design_rule_zone(hit.cell);
                    let subset_a = subsets.subset_for(hit.a, zone);
                    let subset_b = subsets.subset_for(hit.b, zone);
                    map.cell_mut(hit.cell).add_congestion(
                        hit.b,
                        subset_a,
                        hit.shape_a,
                        DRC_CONGESTION_BONUS,
                    );
                    map.cell_mut(hit.cell).add_congestion(
                        hit.a,
                        subset_b,
                        hit.shape_b,
                        DRC_CONGESTION_BONUS,
                    );
                }
            }

            if add_congestion {
                for d in &accum.deposits {
                    map.cell_mut(d.cell)
                        .add_congestion(d.path, d.subset, d.shape, d.amount);
                }
            }
        }
    }

    Ok(total_drc_cells)
}

#[allow(clippy::too_many_arguments)]
fn scan_row(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    kinds: &PathKinds,
    metrics: &RoutingMetrics,
    offsets: &[(i32, i32)],
    traversal_weight: &[u32],
    layer_pairs: &[Vec<(u8, ShapeType)>],
    add_congestion: bool,
    y: u32,
    z: u8,
) -> RowAccum {
    let mut accum = RowAccum::default();
    let pairs_on_layer = &layer_pairs[z as usize];

    let mut candidates: Vec<(PathId, ShapeType, u8, i64)> = Vec::new();
    let mut seen_pairs: Vec<(PathId, ShapeType, PathId, ShapeType)> = Vec::new();
    let mut seen_deposits: Vec<(PathId, u8, ShapeType)> = Vec::new();

    for x in 0..map.width() {
        let here = GridCoord::new(x, y, z);
        let cell = map.cell(here);
        if !cell.has_flag(cell_flags::NEAR_A_NET) {
            continue;
        }

        // Gather every centerline entry within the interaction radius.
        candidates.clear();
        for &(dx, dy) in offsets {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if map.is_outside_map(nx, ny, z as i32) {
                continue;
            }
            let ncoord = GridCoord::new(nx as u32, ny as u32, z);
            let ncell = map.cell(ncoord);
            if ncell.path_centers.is_empty() {
                continue;
            }
            let nzone = ncell.zone;
            let dist_sq = (dx * dx + dy * dy) as i64;
            for center in &ncell.path_centers {
                candidates.push((center.path, center.shape, nzone, dist_sq));
            }
        }
        if candidates.is_empty() {
            continue;
        }

        let zone_here = cell.zone;
        seen_pairs.clear();

        // DRC: this cell hosts A's centerline; B's centerline lies within
        // the DRC radius of (A, B)'s shape pair.
        for a_center in &cell.path_centers {
            let a = a_center.path;
            let shape_a = a_center.shape;
            let m = DesignRuleTable::subset_shape_index(subsets.subset_for(a, zone_here), shape_a);

            for &(b, shape_b, zone_b, dist_sq) in &candidates {
                if kinds.exempt(a, b) {
                    continue;
                }
                let n = DesignRuleTable::subset_shape_index(subsets.subset_for(b, zone_b), shape_b);
                if (dist_sq as f64) > rules.drc_radius_sq(zone_here, m, zone_b, n) {
                    continue;
                }

                // One DRC cell per unique unordered (A-shape, B-shape) pair.
                let key = if (a, shape_a as u8) <= (b, shape_b as u8) {
                    (a, shape_a, b, shape_b)
                } else {
                    (b, shape_b, a, shape_a)
                };
                if seen_pairs.contains(&key) {
                    continue;
                }
                seen_pairs.push(key);

                metrics.add_crossing(a, b);
                accum.pairs.push(PairHit {
                    cell: here,
                    a: key.0,
                    shape_a: key.1,
                    b: key.2,
                    shape_b: key.3,
                });
            }
        }

        // Congestion: every interacting net deposits its traversal value
        // here, keyed by each (subset, shape) a visitor could bring.
        if add_congestion {
            seen_deposits.clear();
            for &(f_subset, f_shape) in pairs_on_layer {
                let m = DesignRuleTable::subset_shape_index(f_subset, f_shape);
                for &(b, shape_b, zone_b, dist_sq) in &candidates {
                    if kinds.is_pseudo(b) {
                        continue;
                    }
                    let n =
                        DesignRuleTable::subset_shape_index(subsets.subset_for(b, zone_b), shape_b);
                    if (dist_sq as f64) > rules.cong_radius_sq(zone_here, m, zone_b, n) {
                        continue;
                    }
                    if seen_deposits.contains(&(b, f_subset, f_shape)) {
                        continue;
                    }
                    seen_deposits.push((b, f_subset, f_shape));
                    accum.deposits.push(Deposit {
                        cell: here,
                        path: b,
                        subset: f_subset,
                        shape: f_shape,
                        amount: traversal_weight[b.index()],
                    });
                }
            }
        }
    }
    accum
}
