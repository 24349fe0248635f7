use crate::diffpair::shoulder::half_pitch;
use crate::diffpair::vias::{find_via_stacks, via_half_pitch, via_travel_direction};
use crate::diffpair::{full_sequence, vias};
use maze_common::db::board::{MapState, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::geom::coord::{GridCoord, PathPoint, Vector2d};
use maze_common::grid::map::RouteMap;

/// Slack added to the DR-boundary prune radius.
const BOUNDARY_PRUNE_SLACK: f64 = 1.0;

/// Deletes shoulder segments that the later passes must rebuild: segments
/// crowding the pseudo-vias, the terminals, and design-rule boundaries
/// crossed by the partner path. Flagged anchor segments survive, and a via
/// stack that loses any segment loses all of them.
#[allow(clippy::too_many_arguments)]
pub fn delete_selected_segments(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    state: &MapState,
    pseudo: PathId,
    members: (PathId, PathId),
    pseudo_seq: &[GridCoord],
    path_1: &mut Vec<PathPoint>,
    path_2: &mut Vec<PathPoint>,
) {
    let (n1, n2) = members;
    let mut marks_1 = vec![false; path_1.len()];
    let mut marks_2 = vec![false; path_2.len()];

    mark_near_pseudo_vias(
        map, rules, subsets, pseudo, pseudo_seq, n1, path_1, &mut marks_1,
    );
    mark_near_pseudo_vias(
        map, rules, subsets, pseudo, pseudo_seq, n2, path_2, &mut marks_2,
    );

    mark_near_terminals(
        map, rules, subsets, state, pseudo, members, n1, path_1, &mut marks_1,
    );
    mark_near_terminals(
        map, rules, subsets, state, pseudo, members, n2, path_2, &mut marks_2,
    );

    mark_near_rule_boundaries(map, rules, subsets, n1, path_1, n2, path_2, &mut marks_1);
    mark_near_rule_boundaries(map, rules, subsets, n2, path_2, n1, path_1, &mut marks_2);

    mark_partial_via_stacks(state, n1, path_1, &mut marks_1);
    mark_partial_via_stacks(state, n2, path_2, &mut marks_2);

    apply_marks(path_1, &marks_1);
    apply_marks(path_2, &marks_2);
}

fn apply_marks(points: &mut Vec<PathPoint>, marks: &[bool]) {
    let mut i = 0;
    points.retain(|p| {
        let keep = p.flag || !marks[i];
        i += 1;
        keep
    });
}

/// Largest congestion radius between a shoulder trace cell and any shape of
/// a via column in the given zone.
fn max_cong_radius_to_via(
    rules: &DesignRuleTable,
    seg_zone: u8,
    seg_subset: u8,
    via_zone: u8,
    via_subset: u8,
) -> f64 {
    let m = DesignRuleTable::subset_shape_index(seg_subset, ShapeType::Trace);
    let mut max = 0.0f64;
    for shape in [ShapeType::ViaUp, ShapeType::ViaDown] {
        let n = DesignRuleTable::subset_shape_index(via_subset, shape);
        max = max.max(rules.cong_radius(seg_zone, m, via_zone, n));
    }
    max
}

/// Marks shoulder segments inside the keep-out of each pseudo-via: within
/// cong_radius + R_dpv * |cos(theta)| of the via column, where theta is the
/// angle between the diff-pair via axis and the segment's bearing from the
/// via. The cosine term stretches the keep-out along the axis on which the
/// paired vias sit.
#[allow(clippy::too_many_arguments)]
fn mark_near_pseudo_vias(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    pseudo: PathId,
    pseudo_seq: &[GridCoord],
    member: PathId,
    points: &[PathPoint],
    marks: &mut [bool],
) {
    for stack in find_via_stacks(pseudo, pseudo_seq) {
        if !stack.is_vertical {
            continue;
        }
        let via_xy = stack.start_coord;
        if map.contains(via_xy) && map.in_pinswap_zone(via_xy) != 0 {
            continue;
        }
        let via_zone = map.design_rule_zone(via_xy);
        let via_subset = subsets.subset_for(pseudo, via_zone);
        let r_dpv = via_half_pitch(rules, subsets, pseudo, via_zone);

        let first_idx = (stack.start_segment + 2) as usize;
        let last_idx = (stack.end_segment + 1) as usize;
        let travel = via_travel_direction(map, pseudo_seq, first_idx - 1, last_idx, r_dpv);
        let axis = if travel.is_zero() {
            Vector2d::new(1.0, 0.0)
        } else {
            travel.perpendicular()
        };

        let (low, high) = (stack.low_layer(), stack.high_layer());
        for (i, p) in points.iter().enumerate() {
            if p.flag || p.coord.z < low || p.coord.z > high {
                continue;
            }
            let seg_zone = map.design_rule_zone(p.coord);
            let seg_subset = subsets.subset_for(member, seg_zone);
            let cong = max_cong_radius_to_via(rules, seg_zone, seg_subset, via_zone, via_subset);
            let cos = axis.abs_cosine_to(via_xy, p.coord);
            let radius = cong + r_dpv * cos;
            if p.coord.lateral_distance(via_xy) <= radius {
                marks[i] = true;
            }
        }
    }
}

/// Marks shoulder segments crowding either end of the pair: within
/// cong_radius + 2 * R_dpt * |cos(theta)| of the pseudo terminal, theta
/// measured against the terminal-pair axis.
#[allow(clippy::too_many_arguments)]
fn mark_near_terminals(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    state: &MapState,
    pseudo: PathId,
    members: (PathId, PathId),
    member: PathId,
    points: &[PathPoint],
    marks: &mut [bool],
) {
    let (n1, _) = members;
    let ends = [
        (
            state.start_cells[pseudo.index()],
            state.start_cells[n1.index()],
        ),
        (state.end_cells[pseudo.index()], state.end_cells[n1.index()]),
    ];

    for (pseudo_term, member_term) in ends {
        if !map.contains(pseudo_term) {
            continue;
        }
        let term_zone = map.design_rule_zone(pseudo_term);
        let r_dpt = half_pitch(rules, subsets, member, term_zone);
        let axis = Vector2d::unit_between(pseudo_term, member_term);
        let axis = if axis.is_zero() {
            Vector2d::new(0.0, 1.0)
        } else {
            axis
        };

        let m = DesignRuleTable::subset_shape_index(
            subsets.subset_for(member, term_zone),
            ShapeType::Trace,
        );
        for (i, p) in points.iter().enumerate() {
            if p.flag || p.coord.z != pseudo_term.z {
                continue;
            }
            let seg_zone = map.design_rule_zone(p.coord);
            let n = DesignRuleTable::subset_shape_index(
                subsets.subset_for(member, seg_zone),
                ShapeType::Trace,
            );
            let cong = rules.cong_radius(seg_zone, n, term_zone, m);
            let cos = axis.abs_cosine_to(pseudo_term, p.coord);
            let radius = cong + 2.0 * r_dpt * cos;
            if p.coord.lateral_distance(pseudo_term) <= radius {
                marks[i] = true;
            }
        }
    }
}

/// Marks this path's segments near the points where the partner path
/// crosses a design-rule boundary, within the larger of the two zones'
/// congestion radii plus one cell.
#[allow(clippy::too_many_arguments)]
fn mark_near_rule_boundaries(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    member: PathId,
    points: &[PathPoint],
    partner: PathId,
    partner_points: &[PathPoint],
    marks: &mut [bool],
) {
    for pair in partner_points.windows(2) {
        let (a, b) = (pair[0].coord, pair[1].coord);
        if a.z != b.z || !map.contains(a) || !map.contains(b) {
            continue;
        }
        let zone_a = map.design_rule_zone(a);
        let zone_b = map.design_rule_zone(b);
        if zone_a == zone_b {
            continue;
        }

        let m_a = DesignRuleTable::subset_shape_index(
            subsets.subset_for(member, zone_a),
            ShapeType::Trace,
        );
        let n_a = DesignRuleTable::subset_shape_index(
            subsets.subset_for(partner, zone_a),
            ShapeType::Trace,
        );
        let m_b = DesignRuleTable::subset_shape_index(
            subsets.subset_for(member, zone_b),
            ShapeType::Trace,
        );
        let n_b = DesignRuleTable::subset_shape_index(
            subsets.subset_for(partner, zone_b),
            ShapeType::Trace,
        );
        let radius = rules
            .cong_radius(zone_a, m_a, zone_a, n_a)
            .max(rules.cong_radius(zone_b, m_b, zone_b, n_b))
            + BOUNDARY_PRUNE_SLACK;

        for (i, p) in points.iter().enumerate() {
            if p.flag || p.coord.z != b.z {
                continue;
            }
            if p.coord.lateral_distance(b) <= radius {
                marks[i] = true;
            }
        }
    }
}

/// A via stack missing any segment is useless; flag the remainder so the
/// gap filler rebuilds the whole transition.
fn mark_partial_via_stacks(
    state: &MapState,
    member: PathId,
    points: &[PathPoint],
    marks: &mut [bool],
) {
    let seq = full_sequence(state.start_cells[member.index()], points);
    for stack in vias::find_via_stacks(member, &seq) {
        // The stack includes its entry-layer cell.
        let first = stack.start_segment.max(0) as usize;
        let last = stack.end_segment as usize;
        if first > last || last >= points.len() {
            continue;
        }
        if (first..=last).any(|i| marks[i]) {
            for (i, mark) in marks.iter_mut().enumerate().take(last + 1).skip(first) {
                if !points[i].flag {
                    *mark = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{Board, DiffPairDef, NetDef};
    use maze_common::db::rules::{SubsetRule, ZoneRules, route_dir};

    fn pair_board() -> (Board, MapState) {
        let rules = DesignRuleTable::new(vec![ZoneRules {
            name: "default".to_string(),
            subsets: vec![SubsetRule {
                name: "signal".to_string(),
                line_width: 1.0,
                via_up_diameter: 1.0,
                via_down_diameter: 1.0,
                spacing: 1.0,
                route_directions: route_dir::ANY,
                diff_pair_pitch: 4.0,
            }],
        }]);
        let mut map = RouteMap::new(40, 40, 2);
        map.finalize(&rules);
        let board = Board::new(
            map,
            rules,
            vec![
                NetDef {
                    name: "dp_p".to_string(),
                    start: GridCoord::new(2, 18, 0),
                    end: GridCoord::new(37, 18, 0),
                    subsets: Vec::new(),
                },
                NetDef {
                    name: "dp_n".to_string(),
                    start: GridCoord::new(2, 22, 0),
                    end: GridCoord::new(37, 22, 0),
                    subsets: Vec::new(),
                },
            ],
            vec![DiffPairDef {
                net_1: 0,
                net_2: 1,
                pn_swappable: false,
            }],
        );
        let state = MapState::new(&board);
        (board, state)
    }

    #[test]
    fn segments_near_a_pseudo_via_are_pruned() {
        let (board, state) = pair_board();
        // Pseudo path east along y=20 with a via climb at x=20.
        let mut pseudo_seq: Vec<GridCoord> =
            (2..=20).map(|x| GridCoord::new(x, 20, 0)).collect();
        pseudo_seq.push(GridCoord::new(20, 20, 1));
        pseudo_seq.extend((21..=37).map(|x| GridCoord::new(x, 20, 1)));

        let mut p1: Vec<PathPoint> = (3..=37)
            .map(|x| PathPoint::new(GridCoord::new(x, 18, 0)))
            .collect();
        let before = p1.len();
        let mut p2: Vec<PathPoint> = (3..=37)
            .map(|x| PathPoint::new(GridCoord::new(x, 22, 0)))
            .collect();

        delete_selected_segments(
            &board.map,
            &board.rules,
            &board.subsets,
            &state,
            PathId::new(2),
            (PathId::new(0), PathId::new(1)),
            &pseudo_seq,
            &mut p1,
            &mut p2,
        );

        assert!(p1.len() < before);
        // Cells right beside the via column are gone.
        assert!(
            !p1.iter()
                .any(|p| (p.coord.x as i32 - 20).abs() <= 2 && p.coord.y == 18)
        );
        // Far-away cells survive.
        assert!(p1.iter().any(|p| p.coord.x == 10));
    }

    #[test]
    fn flagged_anchor_segments_survive_pruning() {
        let (board, state) = pair_board();
        let pseudo_seq: Vec<GridCoord> = (2..=37).map(|x| GridCoord::new(x, 20, 0)).collect();

        // An anchored point sitting right next to the start terminal, which
        // terminal pruning would otherwise remove.
        let mut p1 = vec![
            PathPoint::anchored(GridCoord::new(3, 18, 0)),
            PathPoint::new(GridCoord::new(4, 18, 0)),
        ];
        let mut p2 = vec![PathPoint::new(GridCoord::new(4, 22, 0))];

        delete_selected_segments(
            &board.map,
            &board.rules,
            &board.subsets,
            &state,
            PathId::new(2),
            (PathId::new(0), PathId::new(1)),
            &pseudo_seq,
            &mut p1,
            &mut p2,
        );

        assert!(p1.iter().any(|p| p.flag && p.coord == GridCoord::new(3, 18, 0)));
    }

    #[test]
    fn partial_via_stacks_are_pruned_whole() {
        let (_, state) = pair_board();
        let points = vec![
            PathPoint::new(GridCoord::new(5, 18, 0)),
            PathPoint::new(GridCoord::new(5, 18, 1)),
            PathPoint::new(GridCoord::new(6, 18, 1)),
        ];
        // Only the first via segment is marked; the stack completes itself.
        let mut marks = vec![true, false, false];
        mark_partial_via_stacks(&state, PathId::new(0), &points, &mut marks);
        assert_eq!(marks, vec![true, true, false]);
    }
}
