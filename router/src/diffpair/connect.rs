use crate::astar::{PathFinder, PathFinderOptions};
use crate::diffpair::full_sequence;
use crate::diffpair::vias::find_via_stacks;
use maze_common::db::board::SubsetMap;
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::error::RouteError;
use maze_common::geom::coord::{GridCoord, PathPoint};
use maze_common::grid::map::RouteMap;
use maze_common::util::config::RouterConfig;

/// Structural anchor along a shoulder path: a terminal or a via stack.
/// `entry_seg`/`exit_seg` are segment indices (-1 = start terminal).
#[derive(Clone, Copy, Debug)]
struct Anchor {
    entry_coord: GridCoord,
    entry_seg: isize,
    exit_coord: GridCoord,
    exit_seg: isize,
}

fn anchors(path: PathId, start: GridCoord, points: &[PathPoint]) -> Vec<Anchor> {
    let mut list = vec![Anchor {
        entry_coord: start,
        entry_seg: -1,
        exit_coord: start,
        exit_seg: -1,
    }];
    let seq = full_sequence(start, points);
    for stack in find_via_stacks(path, &seq) {
        list.push(Anchor {
            entry_coord: stack.start_coord,
            entry_seg: stack.start_segment,
            exit_coord: stack.end_coord,
            exit_seg: stack.end_segment,
        });
    }
    if let Some(last) = points.last() {
        list.push(Anchor {
            entry_coord: last.coord,
            entry_seg: points.len() as isize - 1,
            exit_coord: last.coord,
            exit_seg: points.len() as isize - 1,
        });
    }
    list
}

/// Cells of the trace section between two consecutive anchors, endpoints
/// included.
fn section_cells(points: &[PathPoint], from: &Anchor, to: &Anchor) -> Vec<GridCoord> {
    let mut cells = vec![from.exit_coord];
    let begin = (from.exit_seg + 1).max(0) as usize;
    let end = to.entry_seg.max(0) as usize;
    for p in points.iter().take(end.min(points.len())).skip(begin) {
        cells.push(p.coord);
    }
    if to.entry_seg >= 0 && (to.entry_seg as usize) < points.len() {
        cells.push(points[to.entry_seg as usize].coord);
    }
    cells
}

/// Intra-pair trace violations between two candidate sections.
fn intra_pair_drcs(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    members: (PathId, PathId),
    sec_1: &[GridCoord],
    sec_2: &[GridCoord],
) -> usize {
    let (n1, n2) = members;
    let mut count = 0;
    for &c1 in sec_1 {
        if !map.contains(c1) {
            continue;
        }
        let zone_1 = map.design_rule_zone(c1);
        let m = DesignRuleTable::subset_shape_index(subsets.subset_for(n1, zone_1), ShapeType::Trace);
        for &c2 in sec_2 {
            if c1.z != c2.z || !map.contains(c2) {
                continue;
            }
            let zone_2 = map.design_rule_zone(c2);
            let n =
                DesignRuleTable::subset_shape_index(subsets.subset_for(n2, zone_2), ShapeType::Trace);
            if (c1.lateral_dist_sq(c2) as f64) <= rules.drc_radius_sq(zone_1, m, zone_2, n) {
                count += 1;
                break;
            }
        }
    }
    count
}

struct SubRoute {
    cells: Vec<GridCoord>,
    cost: u64,
}

/// Routes between two anchor cells on an extracted sub-map and translates
/// the result back into board coordinates.
#[allow(clippy::too_many_arguments)]
fn route_on_submap(
    sub: &RouteMap,
    origin: GridCoord,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    cfg: &RouterConfig,
    path: PathId,
    exempt: &[PathId],
    from: GridCoord,
    to: GridCoord,
) -> Result<Option<SubRoute>, RouteError> {
    let translate = |c: GridCoord| GridCoord::new(c.x - origin.x, c.y - origin.y, c.z);
    let restore = |c: GridCoord| GridCoord::new(c.x + origin.x, c.y + origin.y, c.z);

    let mut finder = PathFinder::new();
    let opts = PathFinderOptions {
        disable_random_costs: true,
        recognize_self_congestion: false,
        exempt_paths: exempt,
        ..PathFinderOptions::default()
    };
    let result = finder.find_path(
        sub,
        rules,
        subsets,
        cfg,
        path,
        "connection",
        translate(from),
        translate(to),
        0,
        &opts,
    )?;
    if !result.found() {
        return Ok(None);
    }
    Ok(Some(SubRoute {
        cells: result.coords.into_iter().map(restore).collect(),
        cost: result.cost,
    }))
}

fn replace_section(points: &mut Vec<PathPoint>, from: &Anchor, to: &Anchor, route: &[GridCoord]) {
    let begin = (from.exit_seg + 1).max(0) as usize;
    let end = to.entry_seg.max(0) as usize;
    let interior: Vec<PathPoint> = route[1..route.len().saturating_sub(1)]
        .iter()
        .map(|&c| PathPoint::new(c))
        .collect();
    points.splice(begin..end.min(points.len()), interior);
}

/// Optimizes the trace sections between consecutive structural anchors of
/// the two shoulder paths on small extracted sub-maps. Each section pair is
/// rerouted and kept when it beats the current geometry (fewer intra-pair
/// violations, then shorter). For P/N-swappable pairs the first connection
/// additionally tries the swapped start-terminal assignment; the spec's
/// per-connection partial swap stays future work.
#[allow(clippy::too_many_arguments)]
pub fn optimize_connections(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    cfg: &RouterConfig,
    members: (PathId, PathId),
    pn_swappable: bool,
    exempt: &[PathId],
    start_1: &mut GridCoord,
    start_2: &mut GridCoord,
    path_1: &mut Vec<PathPoint>,
    path_2: &mut Vec<PathPoint>,
    terms_swapped: &mut bool,
) -> Result<(), RouteError> {
    let (n1, n2) = members;
    let mut k = 0usize;

    loop {
        let anchors_1 = anchors(n1, *start_1, path_1);
        let anchors_2 = anchors(n2, *start_2, path_2);
        if anchors_1.len() != anchors_2.len() {
            log::warn!(
                "diff pair {}/{}: unbalanced via structure ({} vs {} anchors), \
                 skipping connection optimization",
                n1.index(),
                n2.index(),
                anchors_1.len() - 2,
                anchors_2.len() - 2
            );
            return Ok(());
        }
        if k + 1 >= anchors_1.len() {
            return Ok(());
        }

        let (from_1, to_1) = (anchors_1[k], anchors_1[k + 1]);
        let (from_2, to_2) = (anchors_2[k], anchors_2[k + 1]);

        let cur_sec_1 = section_cells(path_1, &from_1, &to_1);
        let cur_sec_2 = section_cells(path_2, &from_2, &to_2);
        let cur_drcs = intra_pair_drcs(map, rules, subsets, members, &cur_sec_1, &cur_sec_2);
        let cur_len = cur_sec_1.len() + cur_sec_2.len();

        // A window covering all four connection endpoints.
        let xs = [
            from_1.exit_coord.x,
            to_1.entry_coord.x,
            from_2.exit_coord.x,
            to_2.entry_coord.x,
        ];
        let ys = [
            from_1.exit_coord.y,
            to_1.entry_coord.y,
            from_2.exit_coord.y,
            to_2.entry_coord.y,
        ];
        let min = GridCoord::new(*xs.iter().min().unwrap(), *ys.iter().min().unwrap(), 0);
        let max = GridCoord::new(*xs.iter().max().unwrap(), *ys.iter().max().unwrap(), 0);
        let margin = rules.max_interaction_radius().ceil() as u32 + 2;
        let (sub, origin) = map.extract_submap(min, max, margin);

        let straight_1 = route_on_submap(
            &sub, origin, rules, subsets, cfg, n1, exempt, from_1.exit_coord, to_1.entry_coord,
        )?;
        let straight_2 = route_on_submap(
            &sub, origin, rules, subsets, cfg, n2, exempt, from_2.exit_coord, to_2.entry_coord,
        )?;

        let straight = match (straight_1, straight_2) {
            (Some(a), Some(b)) => {
                let drcs = intra_pair_drcs(map, rules, subsets, members, &a.cells, &b.cells);
                Some((a, b, drcs))
            }
            _ => None,
        };

        // Global P/N decision at the terminal connection only.
        if k == 0 && pn_swappable {
            let crossed_1 = route_on_submap(
                &sub, origin, rules, subsets, cfg, n1, exempt, from_2.exit_coord, to_1.entry_coord,
            )?;
            let crossed_2 = route_on_submap(
                &sub, origin, rules, subsets, cfg, n2, exempt, from_1.exit_coord, to_2.entry_coord,
            )?;
            if let (Some(c1), Some(c2)) = (crossed_1, crossed_2) {
                let crossed_drcs =
                    intra_pair_drcs(map, rules, subsets, members, &c1.cells, &c2.cells);
                let crossed_cost = c1.cost + c2.cost;
                let straight_metrics = straight
                    .as_ref()
                    .map(|(a, b, d)| (*d, a.cost + b.cost))
                    .unwrap_or((usize::MAX, u64::MAX));

                if (crossed_drcs, crossed_cost) < straight_metrics {
                    std::mem::swap(start_1, start_2);
                    *terms_swapped = !*terms_swapped;
                    let new_from_1 = Anchor {
                        entry_coord: *start_1,
                        entry_seg: -1,
                        exit_coord: *start_1,
                        exit_seg: -1,
                    };
                    let new_from_2 = Anchor {
                        entry_coord: *start_2,
                        entry_seg: -1,
                        exit_coord: *start_2,
                        exit_seg: -1,
                    };
                    replace_section(path_1, &new_from_1, &to_1, &c1.cells);
                    replace_section(path_2, &new_from_2, &to_2, &c2.cells);
                    log::info!(
                        "diff pair {}/{}: swapped P/N start terminals (DRCs {} -> {})",
                        n1.index(),
                        n2.index(),
                        straight_metrics.0.min(cur_drcs),
                        crossed_drcs
                    );
                    k += 1;
                    continue;
                }
            }
        }

        if let Some((a, b, drcs)) = straight {
            let new_len = a.cells.len() + b.cells.len();
            if drcs < cur_drcs || (drcs == cur_drcs && new_len < cur_len) {
                replace_section(path_1, &from_1, &to_1, &a.cells);
                replace_section(path_2, &from_2, &to_2, &b.cells);
            }
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{Board, DiffPairDef, NetDef};
    use maze_common::db::rules::uniform_rules;

    fn pair_board() -> Board {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(30, 30, 2);
        map.finalize(&rules);
        Board::new(
            map,
            rules,
            vec![
                NetDef {
                    name: "dp_p".to_string(),
                    start: GridCoord::new(2, 10, 0),
                    end: GridCoord::new(27, 10, 0),
                    subsets: Vec::new(),
                },
                NetDef {
                    name: "dp_n".to_string(),
                    start: GridCoord::new(2, 14, 0),
                    end: GridCoord::new(27, 14, 0),
                    subsets: Vec::new(),
                },
            ],
            vec![DiffPairDef {
                net_1: 0,
                net_2: 1,
                pn_swappable: true,
            }],
        )
    }

    #[test]
    fn anchor_lists_cover_terminals_and_vias() {
        let start = GridCoord::new(2, 10, 0);
        let points = vec![
            PathPoint::new(GridCoord::new(3, 10, 0)),
            PathPoint::new(GridCoord::new(4, 10, 0)),
            PathPoint::new(GridCoord::new(4, 10, 1)),
            PathPoint::new(GridCoord::new(5, 10, 1)),
        ];
        let list = anchors(PathId::new(0), start, &points);
        // Start terminal, one via stack, end terminal.
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].exit_seg, -1);
        assert_eq!(list[1].entry_coord, GridCoord::new(4, 10, 0));
        assert_eq!(list[1].exit_coord, GridCoord::new(4, 10, 1));
        assert_eq!(list[2].entry_seg, 3);
    }

    #[test]
    fn crossed_sections_get_untangled_by_the_pn_swap() {
        let board = pair_board();
        let cfg = RouterConfig::default();

        // Deliberately crossed starts: path 1 begins at net 2's terminal
        // row and vice versa, so the straight assignment is the crossed one.
        let mut start_1 = GridCoord::new(2, 14, 0);
        let mut start_2 = GridCoord::new(2, 10, 0);
        let mut path_1: Vec<PathPoint> = (3..=27)
            .map(|x| PathPoint::new(GridCoord::new(x, 10, 0)))
            .collect();
        let mut path_2: Vec<PathPoint> = (3..=27)
            .map(|x| PathPoint::new(GridCoord::new(x, 14, 0)))
            .collect();
        let mut swapped = false;

        optimize_connections(
            &board.map,
            &board.rules,
            &board.subsets,
            &cfg,
            (PathId::new(0), PathId::new(1)),
            true,
            &[],
            &mut start_1,
            &mut start_2,
            &mut path_1,
            &mut path_2,
            &mut swapped,
        )
        .unwrap();

        assert!(swapped);
        assert_eq!(start_1, GridCoord::new(2, 10, 0));
        assert_eq!(start_2, GridCoord::new(2, 14, 0));
    }

    #[test]
    fn clean_straight_sections_are_left_alone() {
        let board = pair_board();
        let cfg = RouterConfig::default();

        let mut start_1 = GridCoord::new(2, 10, 0);
        let mut start_2 = GridCoord::new(2, 14, 0);
        let mut path_1: Vec<PathPoint> = (3..=27)
            .map(|x| PathPoint::new(GridCoord::new(x, 10, 0)))
            .collect();
        let mut path_2: Vec<PathPoint> = (3..=27)
            .map(|x| PathPoint::new(GridCoord::new(x, 14, 0)))
            .collect();
        let before_1 = path_1.clone();
        let mut swapped = false;

        optimize_connections(
            &board.map,
            &board.rules,
            &board.subsets,
            &cfg,
            (PathId::new(0), PathId::new(1)),
            true,
            &[],
            &mut start_1,
            &mut start_2,
            &mut path_1,
            &mut path_2,
            &mut swapped,
        )
        .unwrap();

        assert!(!swapped);
        assert_eq!(path_1, before_1);
    }
}
