pub mod connect;
pub mod gaps;
pub mod prune;
pub mod shoulder;
pub mod vias;

use crate::astar::PathFinder;
use maze_common::db::board::{MapState, SubsetMap};
use maze_common::db::indices::PathId;
use maze_common::db::rules::DesignRuleTable;
use maze_common::error::RouteError;
use maze_common::geom::coord::{GridCoord, PathPoint};
use maze_common::grid::map::RouteMap;
use maze_common::util::config::RouterConfig;

/// Result of expanding one pseudo-net into its two shoulder conductors.
/// Produced on a worker thread; the driver applies the path and terminal
/// updates serially.
pub struct DiffPairOutcome {
    pub pseudo: PathId,
    pub path_1: Vec<PathPoint>,
    pub path_2: Vec<PathPoint>,
    pub start_1: GridCoord,
    pub start_2: GridCoord,
    pub terms_swapped: bool,
}

/// Runs the full diff-pair post-processing pipeline for one routed
/// pseudo-net: shoulder points, paired vias, pruning, gap filling and
/// connection optimization, with duplicate elimination after each mutating
/// pass.
#[allow(clippy::too_many_arguments)]
pub fn synthesize(
    map: &RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    cfg: &RouterConfig,
    state: &MapState,
    pseudo: PathId,
    members: (PathId, PathId),
    pn_swappable: bool,
    pseudo_points: &[PathPoint],
    terms_swapped: bool,
    finder: &mut PathFinder,
) -> Result<DiffPairOutcome, RouteError> {
    let (n1, n2) = members;
    let pseudo_seq = full_sequence(state.start_cells[pseudo.index()], pseudo_points);
    // The pair never treats its own family's deposits as congestion.
    let family = [pseudo, n1, n2];

    let mut start_1 = state.start_cells[n1.index()];
    let mut start_2 = state.start_cells[n2.index()];
    let end_1 = state.end_cells[n1.index()];
    let end_2 = state.end_cells[n2.index()];

    let (mut path_1, mut path_2) = shoulder::create_shoulder_points(
        map, rules, subsets, members, &pseudo_seq, end_1, end_2,
    );
    shoulder::delete_duplicate_points(start_1, &mut path_1);
    shoulder::delete_duplicate_points(start_2, &mut path_2);

    vias::create_diff_pair_vias(
        map, rules, subsets, state, pseudo, &pseudo_seq, &mut path_1, &mut path_2,
    );
    shoulder::delete_duplicate_points(start_1, &mut path_1);
    shoulder::delete_duplicate_points(start_2, &mut path_2);

    prune::delete_selected_segments(
        map, rules, subsets, state, pseudo, members, &pseudo_seq, &mut path_1, &mut path_2,
    );
    shoulder::delete_duplicate_points(start_1, &mut path_1);
    shoulder::delete_duplicate_points(start_2, &mut path_2);

    // Paths born inside a pin-swap zone anchor to the last in-zone segment,
    // which keeps the pair geometry stable at the pads.
    shoulder::update_swap_zone_start_terms(map, &mut start_1, &mut path_1);
    shoulder::update_swap_zone_start_terms(map, &mut start_2, &mut path_2);

    gaps::fill_gaps(
        map, rules, subsets, cfg, n1, start_1, &mut path_1, Some(&pseudo_seq), &family, finder,
    )?;
    gaps::fill_gaps(
        map, rules, subsets, cfg, n2, start_2, &mut path_2, Some(&pseudo_seq), &family, finder,
    )?;
    shoulder::delete_duplicate_points(start_1, &mut path_1);
    shoulder::delete_duplicate_points(start_2, &mut path_2);

    let mut swapped = terms_swapped;
    connect::optimize_connections(
        map,
        rules,
        subsets,
        cfg,
        (n1, n2),
        pn_swappable,
        &family,
        &mut start_1,
        &mut start_2,
        &mut path_1,
        &mut path_2,
        &mut swapped,
    )?;
    shoulder::delete_duplicate_points(start_1, &mut path_1);
    shoulder::delete_duplicate_points(start_2, &mut path_2);

    Ok(DiffPairOutcome {
        pseudo,
        path_1,
        path_2,
        start_1,
        start_2,
        terms_swapped: swapped,
    })
}

/// Start terminal plus the routed segments, the working view used by every
/// pass in this module.
pub fn full_sequence(start: GridCoord, points: &[PathPoint]) -> Vec<GridCoord> {
    let mut seq = Vec::with_capacity(points.len() + 1);
    seq.push(start);
    seq.extend(points.iter().map(|p| p.coord));
    seq
}
