use crate::astar::{PathFinder, PathFinderOptions};
use crate::diffpair::vias::find_nearby_layer_transition;
use maze_common::db::board::{RoutingRestriction, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::error::RouteError;
use maze_common::geom::coord::{GridCoord, PathPoint, is_legal_delta};
use maze_common::grid::map::RouteMap;
use maze_common::util::config::RouterConfig;

/// Gaps at most this long (squared) on one layer go to the closed-form
/// heuristic; everything else goes to the path-finder.
const SHORT_GAP_SQ: i64 = 25;

/// Safety margin multiplied onto the gap-fill routing radius.
const GAP_RADIUS_MARGIN: f64 = 1.25;

/// Walks a shoulder path and repairs every illegal inter-segment jump left
/// behind by pruning: short same-layer gaps through the step heuristic,
/// longer ones through the path-finder under a routing restriction centered
/// on the gap's pseudo-via (when one exists) or its midpoint.
#[allow(clippy::too_many_arguments)]
pub fn fill_gaps(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    cfg: &RouterConfig,
    path: PathId,
    start: GridCoord,
    points: &mut Vec<PathPoint>,
    pseudo_seq: Option<&[GridCoord]>,
    exempt: &[PathId],
    finder: &mut PathFinder,
) -> Result<(), RouteError> {
    let mut prev = start;
    let mut i = 0;
    while i < points.len() {
        let cur = points[i].coord;
        if cur != prev && !is_legal_delta(prev, cur) {
            let inserted = fill_one_gap(
                map, rules, subsets, cfg, path, prev, cur, pseudo_seq, exempt, finder,
            )?;
            let count = inserted.len();
            points.splice(i..i, inserted.into_iter().map(PathPoint::new));
            i += count;
        }
        prev = cur;
        i += 1;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn fill_one_gap(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    cfg: &RouterConfig,
    path: PathId,
    from: GridCoord,
    to: GridCoord,
    pseudo_seq: Option<&[GridCoord]>,
    exempt: &[PathId],
    finder: &mut PathFinder,
) -> Result<Vec<GridCoord>, RouteError> {
    if from.dz(to) == 0 && from.lateral_dist_sq(to) <= SHORT_GAP_SQ {
        if let Some(cells) = find_short_path_heuristically(map, subsets, path, from, to) {
            return Ok(cells);
        }
        log::warn!(
            "path {}: short-gap heuristic failed between ({},{},{}) and ({},{},{}), \
             falling back to the path-finder",
            path.index(),
            from.x,
            from.y,
            from.z,
            to.x,
            to.y,
            to.z
        );
    }

    let restriction = gap_routing_restriction(map, path, from, to, pseudo_seq);
    let base_radii = restriction.allowed_radii.clone();
    let mut restriction = restriction;
    let mut multiplier = 1u32;

    loop {
        for (r, base) in restriction.allowed_radii.iter_mut().zip(&base_radii) {
            *r = base * GAP_RADIUS_MARGIN * multiplier as f64;
            if *r > map.diagonal() {
                return Err(RouteError::GapRadiusExceeded {
                    path: path.index(),
                    radius: *r,
                    diagonal: map.diagonal(),
                    from,
                    to,
                });
            }
        }

        let opts = PathFinderOptions {
            restriction: Some(&restriction),
            disable_random_costs: true,
            recognize_self_congestion: false,
            exempt_paths: exempt,
            ..PathFinderOptions::default()
        };
        let result = finder.find_path(
            map,
            rules,
            subsets,
            cfg,
            path,
            "gap-fill",
            from,
            to,
            0,
            &opts,
        )?;
        if result.found() {
            let mut cells = result.coords;
            // The gap endpoints already exist in the path.
            cells.remove(0);
            cells.pop();
            return Ok(cells);
        }
        multiplier += 1;
    }
}

/// Routing restriction for one gap. Single-layer gaps center on the
/// midpoint with half the gap length as radius; multi-layer gaps center on
/// the nearest matching pseudo-via when the pseudo path provides one.
fn gap_routing_restriction(
    map: &RouteMap,
    path: PathId,
    from: GridCoord,
    to: GridCoord,
    pseudo_seq: Option<&[GridCoord]>,
) -> RoutingRestriction {
    let mut restriction = RoutingRestriction::unrestricted(map.layers());
    restriction.enabled = true;
    restriction.allowed_layers = vec![false; map.layers() as usize];
    let (low, high) = (from.z.min(to.z), from.z.max(to.z));
    for z in low..=high {
        restriction.allowed_layers[z as usize] = true;
    }

    if from.z == to.z {
        // Segments inside a pin-swap zone must not steer routing outside
        // the zone; anchor on the stable end instead.
        if map.contains(from) && map.in_pinswap_zone(from) != 0 {
            restriction.center_x = to.x;
            restriction.center_y = to.y;
            restriction.allowed_radii[from.z as usize] = from.lateral_distance(to) + 1.0;
        } else {
            restriction.center_x = (from.x + to.x) / 2;
            restriction.center_y = (from.y + to.y) / 2;
            restriction.allowed_radii[from.z as usize] = 0.5 * from.lateral_distance(to) + 1.0;
        }
        return restriction;
    }

    let midpoint = GridCoord::new((from.x + to.x) / 2, (from.y + to.y) / 2, to.z);
    let center = pseudo_seq
        .map(|seq| find_nearby_layer_transition(path, seq, from.z, to.z, midpoint.x, midpoint.y, false))
        .filter(|stack| !stack.error)
        .map(|stack| stack.end_coord)
        .unwrap_or(midpoint);

    restriction.center_x = center.x;
    restriction.center_y = center.y;
    let center_flat = GridCoord::new(center.x, center.y, from.z);
    let radius = from
        .lateral_distance(center_flat)
        .max(to.lateral_distance(center_flat))
        + 4.0;
    for z in low..=high {
        restriction.allowed_radii[z as usize] = radius;
    }
    restriction
}

/// Closed-form gap stepper for same-layer gaps of squared length <= 25:
/// inserts at most three intermediate cells, greedily choosing the legal
/// move that brings the head closest to the far end while staying walkable.
pub fn find_short_path_heuristically(
    map: &RouteMap,
    subsets: &SubsetMap,
    path: PathId,
    from: GridCoord,
    to: GridCoord,
) -> Option<Vec<GridCoord>> {
    const LATERAL_STEPS: [(i32, i32); 16] = [
        (1, 0),
        (-1, 0),
        (0, 1),
        (0, -1),
        (1, 1),
        (1, -1),
        (-1, 1),
        (-1, -1),
        (1, 2),
        (1, -2),
        (-1, 2),
        (-1, -2),
        (2, 1),
        (2, -1),
        (-2, 1),
        (-2, -1),
    ];

    if from.z != to.z || from.lateral_dist_sq(to) > SHORT_GAP_SQ {
        return None;
    }

    let walkable = |c: GridCoord| {
        !map.is_trace_barrier(c) && {
            let subset = subsets.subset_for(path, map.design_rule_zone(c));
            !map.is_inside_barrier_for_shape(c, subset, ShapeType::Trace)
        }
    };

    let mut inserted = Vec::new();
    let mut head = from;
    for _ in 0..3 {
        if is_legal_delta(head, to) {
            return Some(inserted);
        }

        let mut candidates: Vec<(i64, GridCoord)> = Vec::new();
        for (dx, dy) in LATERAL_STEPS {
            let x = head.x as i32 + dx;
            let y = head.y as i32 + dy;
            if map.is_outside_map(x, y, head.z as i32) {
                continue;
            }
            let c = GridCoord::new(x as u32, y as u32, head.z);
            if !walkable(c) {
                continue;
            }
            let remaining = c.lateral_dist_sq(to);
            if remaining < head.lateral_dist_sq(to) {
                candidates.push((remaining, c));
            }
        }
        // Prefer the step that lands adjacent to the target outright.
        candidates.sort_by_key(|(remaining, c)| (!is_legal_delta(*c, to), *remaining));
        let Some(&(_, step)) = candidates.first() else {
            return None;
        };
        inserted.push(step);
        head = step;
    }

    if is_legal_delta(head, to) {
        Some(inserted)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{Board, NetDef};
    use maze_common::db::rules::uniform_rules;
    use maze_common::grid::cell::cell_flags;

    fn simple_board(w: u32, h: u32, layers: u8) -> Board {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(w, h, layers);
        map.finalize(&rules);
        Board::new(
            map,
            rules,
            vec![NetDef {
                name: "n0".to_string(),
                start: GridCoord::new(1, 1, 0),
                end: GridCoord::new(w - 2, h - 2, 0),
                subsets: Vec::new(),
            }],
            Vec::new(),
        )
    }

    #[test]
    fn short_gaps_close_with_at_most_three_cells() {
        let board = simple_board(20, 20, 1);
        for (from, to) in [
            (GridCoord::new(5, 5, 0), GridCoord::new(10, 5, 0)),
            (GridCoord::new(5, 5, 0), GridCoord::new(8, 9, 0)),
            (GridCoord::new(5, 5, 0), GridCoord::new(5, 10, 0)),
            (GridCoord::new(5, 5, 0), GridCoord::new(9, 8, 0)),
        ] {
            let cells =
                find_short_path_heuristically(&board.map, &board.subsets, PathId::new(0), from, to)
                    .unwrap_or_else(|| panic!("no fill for {:?} -> {:?}", from, to));
            assert!(cells.len() <= 3, "{:?} -> {:?} used {} cells", from, to, cells.len());

            let mut prev = from;
            for &c in &cells {
                assert!(is_legal_delta(prev, c));
                prev = c;
            }
            assert!(is_legal_delta(prev, to));
        }
    }

    #[test]
    fn heuristic_rejects_long_or_vertical_gaps() {
        let board = simple_board(20, 20, 2);
        assert!(
            find_short_path_heuristically(
                &board.map,
                &board.subsets,
                PathId::new(0),
                GridCoord::new(1, 1, 0),
                GridCoord::new(9, 1, 0)
            )
            .is_none()
        );
        assert!(
            find_short_path_heuristically(
                &board.map,
                &board.subsets,
                PathId::new(0),
                GridCoord::new(1, 1, 0),
                GridCoord::new(3, 1, 1)
            )
            .is_none()
        );
    }

    #[test]
    fn fill_gaps_repairs_a_pruned_path() {
        let board = simple_board(24, 10, 1);
        let cfg = RouterConfig::default();
        let start = GridCoord::new(1, 5, 0);
        // A hole from x=2 to x=14 left by pruning.
        let mut points = vec![
            PathPoint::new(GridCoord::new(2, 5, 0)),
            PathPoint::new(GridCoord::new(14, 5, 0)),
            PathPoint::new(GridCoord::new(15, 5, 0)),
        ];

        fill_gaps(
            &board.map,
            &board.rules,
            &board.subsets,
            &cfg,
            PathId::new(0),
            start,
            &mut points,
            None,
            &[],
            &mut PathFinder::new(),
        )
        .unwrap();

        let mut prev = start;
        for p in &points {
            assert!(
                is_legal_delta(prev, p.coord),
                "illegal delta {:?} -> {:?}",
                prev,
                p.coord
            );
            prev = p.coord;
        }
        assert_eq!(prev, GridCoord::new(15, 5, 0));
    }

    #[test]
    fn multi_layer_gaps_route_through_the_finder() {
        let board = simple_board(16, 16, 2);
        let cfg = RouterConfig::default();
        let start = GridCoord::new(2, 8, 0);
        let mut points = vec![
            PathPoint::new(GridCoord::new(3, 8, 0)),
            PathPoint::new(GridCoord::new(10, 8, 1)),
        ];

        fill_gaps(
            &board.map,
            &board.rules,
            &board.subsets,
            &cfg,
            PathId::new(0),
            start,
            &mut points,
            None,
            &[],
            &mut PathFinder::new(),
        )
        .unwrap();

        let mut prev = start;
        for p in &points {
            assert!(is_legal_delta(prev, p.coord));
            prev = p.coord;
        }
    }

    #[test]
    fn sealed_gap_reports_radius_exhaustion() {
        let mut board = simple_board(16, 8, 1);
        // Wall the map into two halves with no opening.
        for y in 0..8u32 {
            board
                .map
                .cell_mut(GridCoord::new(8, y, 0))
                .set_flag(cell_flags::TRACE_BARRIER);
        }
        let rules = uniform_rules(1.0, 1.0, 1.0);
        board.map.finalize(&rules);

        let cfg = RouterConfig::default();
        let start = GridCoord::new(1, 4, 0);
        let mut points = vec![
            PathPoint::new(GridCoord::new(2, 4, 0)),
            PathPoint::new(GridCoord::new(14, 4, 0)),
        ];

        let err = fill_gaps(
            &board.map,
            &board.rules,
            &board.subsets,
            &cfg,
            PathId::new(0),
            start,
            &mut points,
            None,
            &[],
            &mut PathFinder::new(),
        );
        assert!(matches!(err, Err(RouteError::GapRadiusExceeded { .. })));
    }
}
