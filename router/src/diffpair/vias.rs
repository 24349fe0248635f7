use maze_common::db::board::{MapState, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::geom::coord::{GridCoord, PathPoint, Vector2d};
use maze_common::grid::map::RouteMap;

/// A contiguous vertical run within one path. `start_segment` is the index
/// of the last cell on the entry layer (-1 for the start terminal),
/// `end_segment` the last cell of the run, both into the full sequence
/// (start terminal at index -1, routed segments from 0).
#[derive(Clone, Copy, Debug)]
pub struct ViaStack {
    pub path: PathId,
    pub start_segment: isize,
    pub end_segment: isize,
    pub start_coord: GridCoord,
    pub end_coord: GridCoord,
    pub end_shape: ShapeType,
    pub is_vertical: bool,
    pub error: bool,
}

impl ViaStack {
    pub fn not_found(path: PathId) -> Self {
        Self {
            path,
            start_segment: -1,
            end_segment: -1,
            start_coord: GridCoord::new(0, 0, 0),
            end_coord: GridCoord::new(0, 0, 0),
            end_shape: ShapeType::Trace,
            is_vertical: false,
            error: true,
        }
    }

    pub fn low_layer(&self) -> u8 {
        self.start_coord.z.min(self.end_coord.z)
    }

    pub fn high_layer(&self) -> u8 {
        self.start_coord.z.max(self.end_coord.z)
    }
}

/// Finds every via stack in a full sequence (start terminal + segments):
/// maximal runs of vertical steps spanning at least two layers.
pub fn find_via_stacks(path: PathId, seq: &[GridCoord]) -> Vec<ViaStack> {
    let mut stacks = Vec::new();
    let mut i = 1;
    while i < seq.len() {
        if seq[i].z == seq[i - 1].z {
            i += 1;
            continue;
        }
        let first = i;
        let mut last = i;
        while last + 1 < seq.len()
            && seq[last + 1].z != seq[last].z
            && seq[last + 1].same_column(seq[last])
        {
            last += 1;
        }
        let start_coord = seq[first - 1];
        let end_coord = seq[last];
        let going_up = end_coord.z > start_coord.z;
        stacks.push(ViaStack {
            path,
            // Sequence index 0 is the start terminal: segment index is
            // offset by one.
            start_segment: first as isize - 2,
            end_segment: last as isize - 1,
            start_coord,
            end_coord,
            end_shape: if going_up {
                ShapeType::ViaUp
            } else {
                ShapeType::ViaDown
            },
            is_vertical: seq[first - 1..=last]
                .windows(2)
                .all(|w| w[0].same_column(w[1])),
            error: false,
        });
        i = last + 1;
    }
    stacks
}

/// Locates the layer transition in a path closest in (x, y) to a reference
/// point, with three escalating fallbacks: both layers must match, then
/// only the start layer, then only the end layer. Rip-ups can leave
/// diff-pair vias partially intact; the escalation covers those cases.
pub fn find_nearby_layer_transition(
    path: PathId,
    seq: &[GridCoord],
    start_layer: u8,
    end_layer: u8,
    x: u32,
    y: u32,
    require_vertical: bool,
) -> ViaStack {
    let reference = GridCoord::new(x, y, start_layer);
    let stacks: Vec<ViaStack> = find_via_stacks(path, seq)
        .into_iter()
        .filter(|s| !require_vertical || s.is_vertical)
        .collect();

    let matchers: [&dyn Fn(&ViaStack) -> bool; 3] = [
        &|s: &ViaStack| s.start_coord.z == start_layer && s.end_coord.z == end_layer,
        &|s: &ViaStack| s.start_coord.z == start_layer,
        &|s: &ViaStack| s.end_coord.z == end_layer,
    ];

    for matcher in matchers {
        let best = stacks
            .iter()
            .filter(|s| matcher(s))
            .min_by(|a, b| {
                let da = a.start_coord.lateral_dist_sq(reference);
                let db = b.start_coord.lateral_dist_sq(reference);
                da.cmp(&db)
            });
        if let Some(stack) = best {
            return *stack;
        }
    }
    ViaStack::not_found(path)
}

/// Direction of travel through a via: from the pseudo-path cell half a via
/// pitch behind the stack to the cell half a pitch past it, stopping early
/// at terminals and pin-swap boundaries.
pub fn via_travel_direction(
    map: &RouteMap,
    seq: &[GridCoord],
    first_idx: usize,
    last_idx: usize,
    reach: f64,
) -> Vector2d {
    let via_xy = seq[first_idx];

    let mut back = seq[first_idx.saturating_sub(1)];
    let mut i = first_idx;
    while i > 0 {
        i -= 1;
        let c = seq[i];
        back = c;
        if c.lateral_distance(via_xy) >= reach {
            break;
        }
        if map.contains(c) && map.in_pinswap_zone(c) != 0 {
            break;
        }
    }

    let mut ahead = seq[(last_idx + 1).min(seq.len() - 1)];
    let mut j = last_idx;
    while j + 1 < seq.len() {
        j += 1;
        let c = seq[j];
        ahead = c;
        if c.lateral_distance(via_xy) >= reach {
            break;
        }
    }

    Vector2d::unit_between(back, ahead)
}

/// Half the ideal diff-pair via pitch at a zone: vias are wider than
/// traces, so the pitch is at least one via diameter plus spacing.
pub fn via_half_pitch(
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    path: PathId,
    zone: u8,
) -> f64 {
    let rule = rules.rule(zone, subsets.subset_for(path, zone));
    let via_pitch = rule.via_up_diameter.max(rule.via_down_diameter) + rule.spacing;
    (rule.diff_pair_pitch.max(via_pitch)) / 2.0
}

/// Synthesizes paired via stacks in both shoulder paths for every pseudo
/// via, placed half a via pitch to each side along the perpendicular of the
/// travel direction. Vias over the pseudo terminals and vias born in
/// pin-swap zones are skipped.
#[allow(clippy::too_many_arguments)]
pub fn create_diff_pair_vias(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    state: &MapState,
    pseudo: PathId,
    pseudo_seq: &[GridCoord],
    path_1: &mut Vec<PathPoint>,
    path_2: &mut Vec<PathPoint>,
) {
    let pseudo_start = state.start_cells[pseudo.index()];
    let pseudo_end = state.end_cells[pseudo.index()];

    for stack in find_via_stacks(pseudo, pseudo_seq) {
        if !stack.is_vertical {
            continue;
        }
        let via_xy = stack.start_coord;
        if map.contains(via_xy) && map.in_pinswap_zone(via_xy) != 0 {
            continue;
        }
        // A via directly above or below a terminal needs no shoulder vias;
        // the terminal connection handles the transition.
        if via_xy.same_column(pseudo_start) || via_xy.same_column(pseudo_end) {
            continue;
        }

        let zone = map.design_rule_zone(via_xy);
        let half = via_half_pitch(rules, subsets, stack.path, zone);
        let first_idx = (stack.start_segment + 1) as usize + 1;
        let last_idx = (stack.end_segment + 1) as usize;
        let direction = via_travel_direction(map, pseudo_seq, first_idx - 1, last_idx, half);
        let direction = if direction.is_zero() {
            Vector2d::new(1.0, 0.0)
        } else {
            direction
        };
        let perp = direction.perpendicular();

        for (side, points) in [(1.0, &mut *path_1), (-1.0, &mut *path_2)] {
            let vx = (via_xy.x as f64 + side * perp.x * half).round() as i64;
            let vy = (via_xy.y as f64 + side * perp.y * half).round() as i64;
            if vx < 0 || vy < 0 || map.is_outside_map(vx as i32, vy as i32, via_xy.z as i32) {
                continue;
            }
            let (vx, vy) = (vx as u32, vy as u32);

            // A via column blocked anywhere along its span is dropped; the
            // gap filler will find its own transition.
            let (lo, hi) = (stack.low_layer(), stack.high_layer());
            let blocked = (lo..=hi).any(|z| {
                let c = GridCoord::new(vx, vy, z);
                map.is_trace_barrier(c) || {
                    let subset = subsets.subset_for(stack.path, map.design_rule_zone(c));
                    map.is_inside_barrier_for_shape(c, subset, ShapeType::Trace)
                }
            });
            if blocked {
                continue;
            }

            let insert_at = via_insertion_index(points, stack.start_coord.z, vx, vy);
            let mut cells = Vec::new();
            let (z0, z1) = (stack.start_coord.z, stack.end_coord.z);
            if z1 >= z0 {
                for z in z0..=z1 {
                    cells.push(PathPoint::new(GridCoord::new(vx, vy, z)));
                }
            } else {
                for z in (z1..=z0).rev() {
                    cells.push(PathPoint::new(GridCoord::new(vx, vy, z)));
                }
            }
            points.splice(insert_at..insert_at, cells);
        }
    }
}

/// Where to splice a shoulder via: right after the entry-layer point
/// nearest the via column, or at the end when the layer has no points yet.
fn via_insertion_index(points: &[PathPoint], entry_layer: u8, vx: u32, vy: u32) -> usize {
    let reference = GridCoord::new(vx, vy, entry_layer);
    let mut best: Option<(usize, i64)> = None;
    for (i, p) in points.iter().enumerate() {
        if p.coord.z != entry_layer {
            continue;
        }
        let d = p.coord.lateral_dist_sq(reference);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    match best {
        Some((i, _)) => i + 1,
        None => points.len(),
    }
}
