use maze_common::db::board::SubsetMap;
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::geom::coord::{GridCoord, PathPoint, Vector2d};
use maze_common::grid::map::RouteMap;

/// Minimum shoulder offset when a rule set carries no diff-pair pitch.
const MIN_HALF_PITCH: f64 = 1.0;

pub fn half_pitch(rules: &DesignRuleTable, subsets: &SubsetMap, path: PathId, zone: u8) -> f64 {
    let pitch = rules.rule(zone, subsets.subset_for(path, zone)).diff_pair_pitch;
    (pitch / 2.0).max(MIN_HALF_PITCH)
}

/// Generates the two preliminary shoulder paths beside a routed pseudo-net.
///
/// Every lateral pseudo segment (terminals and via stacks excluded) emits
/// one candidate point per shoulder, offset perpendicular to the local
/// travel direction by half the diff-pair pitch. The first member net takes
/// the left shoulder, matching the user's netlist ordering. Each shoulder
/// ends with its net's own end terminal as a non-prunable anchor.
#[allow(clippy::too_many_arguments)]
pub fn create_shoulder_points(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    members: (PathId, PathId),
    pseudo_seq: &[GridCoord],
    end_1: GridCoord,
    end_2: GridCoord,
) -> (Vec<PathPoint>, Vec<PathPoint>) {
    let mut path_1 = Vec::with_capacity(pseudo_seq.len() + 2);
    let mut path_2 = Vec::with_capacity(pseudo_seq.len() + 2);
    let (n1, n2) = members;

    for i in 0..pseudo_seq.len() {
        let here = pseudo_seq[i];
        // Terminals get dedicated handling downstream.
        if i == 0 || i + 1 == pseudo_seq.len() {
            continue;
        }
        // Via-stack segments produce paired vias, not shoulder points.
        if pseudo_seq[i - 1].z != here.z || pseudo_seq[i + 1].z != here.z {
            continue;
        }

        let direction = Vector2d::unit_between(pseudo_seq[i - 1], pseudo_seq[i + 1]);
        let direction = if direction.is_zero() {
            Vector2d::unit_between(pseudo_seq[i - 1], here)
        } else {
            direction
        };
        if direction.is_zero() {
            continue;
        }
        let perp = direction.perpendicular();

        let zone = map.design_rule_zone(here);
        let half = half_pitch(rules, subsets, n1, zone);

        for (side, net, out) in [(1.0, n1, &mut path_1), (-1.0, n2, &mut path_2)] {
            let x = (here.x as f64 + side * perp.x * half).round() as i64;
            let y = (here.y as f64 + side * perp.y * half).round() as i64;
            if x < 0 || y < 0 || map.is_outside_map(x as i32, y as i32, here.z as i32) {
                continue;
            }
            let candidate = GridCoord::new(x as u32, y as u32, here.z);
            // Candidates inside barriers would make their gaps unfillable;
            // drop them and let the gap filler route around.
            let subset = subsets.subset_for(net, map.design_rule_zone(candidate));
            if map.is_trace_barrier(candidate)
                || map.is_inside_barrier_for_shape(candidate, subset, ShapeType::Trace)
            {
                continue;
            }
            out.push(PathPoint::new(candidate));
        }
    }

    path_1.push(PathPoint::anchored(end_1));
    path_2.push(PathPoint::anchored(end_2));
    (path_1, path_2)
}

/// Removes points that duplicate their predecessor (the start terminal
/// included), shortening the path in place.
pub fn delete_duplicate_points(start: GridCoord, points: &mut Vec<PathPoint>) {
    let mut prev = start;
    points.retain(|p| {
        let duplicate = p.coord == prev;
        if !duplicate {
            prev = p.coord;
        }
        !duplicate
    });
}

/// For a path that originates inside a pin-swap zone, moves the logical
/// start terminal to the last segment still inside the zone and drops the
/// in-zone prefix. Returns true when the path changed.
pub fn update_swap_zone_start_terms(
    map: &RouteMap,
    start: &mut GridCoord,
    points: &mut Vec<PathPoint>,
) -> bool {
    if !map.contains(*start) || map.in_pinswap_zone(*start) == 0 {
        return false;
    }

    let mut prev = *start;
    for i in 0..points.len() {
        let c = points[i].coord;
        if !map.contains(c) || map.in_pinswap_zone(c) == 0 {
            let changed = prev != *start || i > 0;
            *start = prev;
            points.drain(0..i);
            return changed;
        }
        prev = c;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{Board, DiffPairDef, NetDef};
    use maze_common::db::rules::{SubsetRule, ZoneRules, route_dir, uniform_rules};

    fn pitched_rules(pitch: f64) -> DesignRuleTable {
        DesignRuleTable::new(vec![ZoneRules {
            name: "default".to_string(),
            subsets: vec![SubsetRule {
                name: "signal".to_string(),
                line_width: 1.0,
                via_up_diameter: 1.0,
                via_down_diameter: 1.0,
                spacing: 1.0,
                route_directions: route_dir::ANY,
                diff_pair_pitch: pitch,
            }],
        }])
    }

    fn pair_board(pitch: f64) -> Board {
        let rules = pitched_rules(pitch);
        let mut map = RouteMap::new(30, 30, 1);
        map.finalize(&rules);
        Board::new(
            map,
            rules,
            vec![
                NetDef {
                    name: "dp_p".to_string(),
                    start: GridCoord::new(2, 13, 0),
                    end: GridCoord::new(27, 13, 0),
                    subsets: Vec::new(),
                },
                NetDef {
                    name: "dp_n".to_string(),
                    start: GridCoord::new(2, 17, 0),
                    end: GridCoord::new(27, 17, 0),
                    subsets: Vec::new(),
                },
            ],
            vec![DiffPairDef {
                net_1: 0,
                net_2: 1,
                pn_swappable: false,
            }],
        )
    }

    #[test]
    fn shoulders_sit_half_a_pitch_to_each_side() {
        let board = pair_board(4.0);
        // Straight pseudo centerline along y = 15.
        let pseudo_seq: Vec<GridCoord> =
            (2..=27).map(|x| GridCoord::new(x, 15, 0)).collect();

        let (p1, p2) = create_shoulder_points(
            &board.map,
            &board.rules,
            &board.subsets,
            (PathId::new(0), PathId::new(1)),
            &pseudo_seq,
            GridCoord::new(27, 13, 0),
            GridCoord::new(27, 17, 0),
        );

        // Interior points only; terminal anchor at the end.
        assert!(p1.last().unwrap().flag);
        assert!(p2.last().unwrap().flag);

        // Travel east: the left shoulder (+90 degrees) sits at larger y.
        for p in &p1[..p1.len() - 1] {
            assert_eq!(p.coord.y, 17, "left shoulder off-pitch at {:?}", p.coord);
        }
        for p in &p2[..p2.len() - 1] {
            assert_eq!(p.coord.y, 13, "right shoulder off-pitch at {:?}", p.coord);
        }
        // Separation equals the pitch across the middle.
        assert_eq!(p1.len(), p2.len());
        for (a, b) in p1.iter().zip(&p2).take(p1.len() - 1) {
            assert_eq!(a.coord.dy(b.coord).abs(), 4);
        }
    }

    #[test]
    fn via_stack_segments_emit_no_shoulder_points() {
        let board = pair_board(4.0);
        let pseudo_seq = vec![
            GridCoord::new(2, 15, 0),
            GridCoord::new(3, 15, 0),
            GridCoord::new(3, 15, 0),
            GridCoord::new(4, 15, 0),
        ];
        // A degenerate stack: the duplicate coordinate never emits points
        // off the map, and interior lateral points are still produced.
        let (p1, _) = create_shoulder_points(
            &board.map,
            &board.rules,
            &board.subsets,
            (PathId::new(0), PathId::new(1)),
            &pseudo_seq,
            GridCoord::new(27, 13, 0),
            GridCoord::new(27, 17, 0),
        );
        assert!(!p1.is_empty());
    }

    #[test]
    fn duplicate_elimination_shrinks_runs() {
        let start = GridCoord::new(1, 1, 0);
        let mut points = vec![
            PathPoint::new(GridCoord::new(1, 1, 0)),
            PathPoint::new(GridCoord::new(2, 1, 0)),
            PathPoint::new(GridCoord::new(2, 1, 0)),
            PathPoint::new(GridCoord::new(2, 1, 0)),
            PathPoint::new(GridCoord::new(3, 1, 0)),
        ];
        delete_duplicate_points(start, &mut points);
        assert_eq!(
            points.iter().map(|p| p.coord).collect::<Vec<_>>(),
            vec![GridCoord::new(2, 1, 0), GridCoord::new(3, 1, 0)]
        );
    }

    #[test]
    fn swap_zone_start_moves_to_zone_exit() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(12, 4, 1);
        for x in 0..4u32 {
            map.cell_mut(GridCoord::new(x, 1, 0)).swap_zone = 3;
        }
        map.finalize(&rules);

        let mut start = GridCoord::new(0, 1, 0);
        let mut points: Vec<PathPoint> = (1..8)
            .map(|x| PathPoint::new(GridCoord::new(x, 1, 0)))
            .collect();

        assert!(update_swap_zone_start_terms(&map, &mut start, &mut points));
        // Last in-zone cell is x = 3; segments up to it are dropped.
        assert_eq!(start, GridCoord::new(3, 1, 0));
        assert_eq!(points[0].coord, GridCoord::new(4, 1, 0));
    }

    #[test]
    fn swap_zone_update_ignores_paths_outside_zones() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(8, 4, 1);
        map.finalize(&rules);
        let mut start = GridCoord::new(0, 1, 0);
        let mut points = vec![PathPoint::new(GridCoord::new(1, 1, 0))];
        assert!(!update_swap_zone_start_terms(&map, &mut start, &mut points));
        assert_eq!(start, GridCoord::new(0, 1, 0));
        assert_eq!(points.len(), 1);
    }
}
