use crate::astar::{PathFinder, PathFinderOptions};
use crate::congestion::{self, CongestionModifiers};
use crate::diffpair::{self, DiffPairOutcome, shoulder};
use crate::evaluate::{PathKinds, build_contiguous_paths, evaluate, mark_path_centers};
use crate::metrics::RoutingMetrics;
use maze_common::db::board::{Board, MapState};
use maze_common::db::indices::PathId;
use maze_common::error::RouteError;
use maze_common::geom::coord::PathPoint;
use maze_common::grid::cell::{ONE_TRAVERSAL, cell_flags};
use maze_common::util::config::RouterConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::time::Instant;

/// Final state of a routing run: the per-path cell sequences (start
/// terminals live in `state.start_cells`), the accumulated metrics, and
/// whether the last iteration was violation-free.
pub struct RouteOutcome {
    pub paths: Vec<Vec<PathPoint>>,
    pub state: MapState,
    pub metrics: RoutingMetrics,
    pub drc_free: bool,
}

/// Routes every net on the board with iterative congestion feedback until
/// the layout is violation-free, a cost plateau is reached, or the
/// iteration cap runs out.
pub fn route(board: &mut Board, cfg: &RouterConfig) -> Result<RouteOutcome, RouteError> {
    let threads = if cfg.parallel_processing {
        cfg.num_threads
    } else {
        1
    };
    if threads > 0 {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| run_iterations(board, cfg)),
            Err(e) => {
                log::warn!("thread pool setup failed ({}), using the default pool", e);
                run_iterations(board, cfg)
            }
        }
    } else {
        run_iterations(board, cfg)
    }
}

fn run_iterations(board: &mut Board, cfg: &RouterConfig) -> Result<RouteOutcome, RouteError> {
    let num_paths = board.num_paths();
    let num_nets = board.num_nets();

    let mut state = MapState::new(board);
    let kinds = PathKinds::from_board(board);
    let layer_pairs = congestion::subset_shapes_in_use(&board.map, &board.subsets);
    let mut metrics = RoutingMetrics::new(
        num_paths,
        board.map.layers(),
        cfg.max_recorded_drcs,
        cfg.num_iterations_to_reequilibrate,
    );
    let mut paths: Vec<Vec<PathPoint>> = vec![Vec::new(); num_paths];

    // Diff-pair members are produced by the synthesizer, never routed
    // directly.
    let routable: Vec<PathId> = (0..num_paths)
        .map(PathId::new)
        .filter(|&p| !board.is_diff_pair_member(p))
        .collect();
    let pseudo_ids: Vec<PathId> = (num_nets..num_paths).map(PathId::new).collect();
    let names: Vec<String> = (0..num_paths)
        .map(|p| board.path_name(PathId::new(p)))
        .collect();
    // A pseudo-net ignores its members' deposits and vice versa.
    let exempts: Vec<Vec<PathId>> = (0..num_paths)
        .map(|p| {
            let path = PathId::new(p);
            if board.is_pseudo(path) {
                let (n1, n2) = board.pseudo_pair(path);
                vec![n1, n2]
            } else if let Some(pseudo) = board.pseudo_for(path) {
                let (n1, n2) = board.pseudo_pair(pseudo);
                vec![pseudo, if n1 == path { n2 } else { n1 }]
            } else {
                Vec::new()
            }
        })
        .collect();

    log::info!(
        "Routing {} nets ({} diff pairs) on {}x{}x{}",
        num_nets,
        board.num_pseudo_nets(),
        board.map.width(),
        board.map.height(),
        board.map.layers()
    );

    let mut drc_free_streak = 0usize;

    for iteration in 0..cfg.max_iterations {
        let iter_start = Instant::now();
        state.current_iteration = iteration as u32;
        metrics.iteration = iteration as u32;

        board.map.reset_transients();
        if iteration > 0 {
            congestion::evaporate(&mut board.map, cfg.congestion_evaporation_rate);
        }
        for p in 0..num_paths {
            congestion::deposit_around_terminals(
                &mut board.map,
                &board.rules,
                &board.subsets,
                PathId::new(p),
                state.start_cells[p],
                state.end_cells[p],
                &layer_pairs,
            );
        }

        // Phase 1: route every directly-routable net. Threads own disjoint
        // nets and carry their own full-grid search scratch.
        let f_map = metrics.f_map();
        let jobs: Vec<(PathId, u64, CongestionModifiers)> = routable
            .iter()
            .map(|&p| {
                let modifiers = CongestionModifiers {
                    mode: metrics.randomize[p.index()],
                    f_map,
                    f_path: metrics.f_path(p),
                };
                (p, metrics.path_costs[p.index()], modifiers)
            })
            .collect();

        let map_ref = &board.map;
        let rules = &board.rules;
        let subsets = &board.subsets;
        let results: Vec<Result<(PathId, crate::astar::PathResult), RouteError>> = jobs
            .par_iter()
            .map_with(PathFinder::new(), |finder, &(p, seed, modifiers)| {
                let opts = PathFinderOptions {
                    record_explored: true,
                    record_elapsed: true,
                    shuffle_seed: seed,
                    modifiers,
                    recognize_self_congestion: false,
                    exempt_paths: &exempts[p.index()],
                    ..PathFinderOptions::default()
                };
                finder
                    .find_path(
                        map_ref,
                        rules,
                        subsets,
                        cfg,
                        p,
                        &names[p.index()],
                        state.start_cells[p.index()],
                        state.end_cells[p.index()],
                        state.start_swap_zone[p.index()],
                        &opts,
                    )
                    .map(|r| (p, r))
            })
            .collect();

        for result in results {
            let (p, r) = result?;
            metrics.explored_cells += r.explored as u64;
            for c in &r.explored_cells {
                board.map.cell_mut(*c).set_flag(cell_flags::EXPLORED);
            }
            metrics.path_costs[p.index()] = r.cost;
            paths[p.index()] = if r.coords.len() > 1 {
                r.coords[1..].iter().map(|&c| PathPoint::new(c)).collect()
            } else {
                Vec::new()
            };
        }

        // Pin-swap reinterpretation before the synthesizer consumes the
        // pseudo geometry.
        for &p in &routable {
            shoulder::update_swap_zone_start_terms(
                &board.map,
                &mut state.start_cells[p.index()],
                &mut paths[p.index()],
            );
        }

        // Phase 2: expand each pseudo-net into its two shoulder conductors.
        let board_ref = &*board;
        let state_ref = &state;
        let paths_ref = &paths;
        let outcomes: Vec<Result<DiffPairOutcome, RouteError>> = pseudo_ids
            .par_iter()
            .map_with(PathFinder::new(), |finder, &pseudo| {
                diffpair::synthesize(
                    &board_ref.map,
                    &board_ref.rules,
                    &board_ref.subsets,
                    cfg,
                    state_ref,
                    pseudo,
                    board_ref.pseudo_pair(pseudo),
                    board_ref.pn_swappable(pseudo),
                    &paths_ref[pseudo.index()],
                    state_ref.diff_pair_terms_swapped[pseudo.index() - num_nets],
                    finder,
                )
            })
            .collect();

        for outcome in outcomes {
            let o = outcome?;
            let (n1, n2) = board.pseudo_pair(o.pseudo);
            paths[n1.index()] = o.path_1;
            paths[n2.index()] = o.path_2;
            state.start_cells[n1.index()] = o.start_1;
            state.start_cells[n2.index()] = o.start_2;
            state.diff_pair_terms_swapped[o.pseudo.index() - num_nets] = o.terms_swapped;
        }

        // Phase 3: mark the layout and evaluate routability.
        let contiguous =
            build_contiguous_paths(&board.rules, &board.subsets, &state, &board.map, &paths);
        mark_path_centers(&mut board.map, &kinds, &contiguous)?;

        // Pseudo centerlines deposit directly; their shoulders inherit the
        // corridor for the next iteration.
        for &pseudo in &pseudo_ids {
            congestion::deposit_around_path(
                &mut board.map,
                &board.rules,
                &board.subsets,
                pseudo,
                &contiguous[pseudo.index()],
                &layer_pairs,
                ONE_TRAVERSAL,
            );
        }

        let total_drcs = evaluate(
            &mut board.map,
            &board.rules,
            &board.subsets,
            &kinds,
            &paths,
            &layer_pairs,
            &mut metrics,
            true,
        )?;

        let nonpseudo_cost: u64 = (0..num_nets).map(|p| metrics.path_costs[p]).sum();
        metrics.finish_iteration(nonpseudo_cost);

        let mut rng = StdRng::seed_from_u64(nonpseudo_cost ^ iteration as u64);
        if metrics.update_randomization(&mut rng) {
            log::info!("Iter {}: re-rolled per-net congestion randomization", iteration);
        }

        log::info!(
            "Iter {}: DRC cells: {}, cost: {}, time: {}ms",
            iteration,
            total_drcs,
            nonpseudo_cost,
            iter_start.elapsed().as_millis()
        );

        if total_drcs == 0 {
            drc_free_streak += 1;
            if drc_free_streak >= cfg.violation_free_threshold {
                log::info!("Converged at iter {}: violation-free layout", iteration);
                break;
            }
        } else {
            drc_free_streak = 0;
        }

        if metrics.plateau_detected() {
            log::info!("Cost plateau detected at iter {}, stopping", iteration);
            break;
        }
    }

    Ok(RouteOutcome {
        paths,
        state,
        metrics,
        drc_free: drc_free_streak > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{DiffPairDef, NetDef};
    use maze_common::db::rules::{DesignRuleTable, SubsetRule, ZoneRules, route_dir, uniform_rules};
    use maze_common::geom::coord::{GridCoord, is_legal_delta};
    use maze_common::grid::map::RouteMap;

    fn small_cfg() -> RouterConfig {
        RouterConfig {
            max_iterations: 30,
            ..RouterConfig::default()
        }
    }

    fn assert_path_invariants(board: &Board, outcome: &RouteOutcome, p: usize) {
        let path = &outcome.paths[p];
        assert!(!path.is_empty(), "path {} not routed", p);
        let mut prev = outcome.state.start_cells[p];
        for point in path {
            assert!(
                is_legal_delta(prev, point.coord) || point.flag,
                "path {}: illegal delta {:?} -> {:?}",
                p,
                prev,
                point.coord
            );
            assert!(
                !board.map.is_trace_barrier(point.coord),
                "path {} crosses a barrier at {:?}",
                p,
                point.coord
            );
            prev = point.coord;
        }
        assert_eq!(
            prev, outcome.state.end_cells[p],
            "path {} does not reach its terminal",
            p
        );
    }

    #[test]
    fn crossing_nets_converge_on_two_layers() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(20, 20, 2);
        map.finalize(&rules);
        let mut board = Board::new(
            map,
            rules,
            vec![
                NetDef {
                    name: "a".to_string(),
                    start: GridCoord::new(2, 2, 0),
                    end: GridCoord::new(17, 17, 0),
                    subsets: Vec::new(),
                },
                NetDef {
                    name: "b".to_string(),
                    start: GridCoord::new(2, 17, 0),
                    end: GridCoord::new(17, 2, 0),
                    subsets: Vec::new(),
                },
            ],
            Vec::new(),
        );

        let outcome = route(&mut board, &small_cfg()).unwrap();
        assert_path_invariants(&board, &outcome, 0);
        assert_path_invariants(&board, &outcome, 1);
    }

    #[test]
    fn diff_pair_shoulders_track_the_pseudo_centerline() {
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
        let mut map = RouteMap::new(30, 30, 1);
        map.finalize(&rules);
        let mut board = Board::new(
            map,
            rules,
            vec![
                NetDef {
                    name: "dp_p".to_string(),
                    start: GridCoord::new(2, 17, 0),
                    end: GridCoord::new(27, 17, 0),
                    subsets: Vec::new(),
                },
                NetDef {
                    name: "dp_n".to_string(),
                    start: GridCoord::new(2, 13, 0),
                    end: GridCoord::new(27, 13, 0),
                    subsets: Vec::new(),
                },
            ],
            vec![DiffPairDef {
                net_1: 0,
                net_2: 1,
                pn_swappable: false,
            }],
        );

        let outcome = route(&mut board, &small_cfg()).unwrap();
        assert_path_invariants(&board, &outcome, 0);
        assert_path_invariants(&board, &outcome, 1);

        // Equal lengths, to within the terminal hookups.
        let (len_1, len_2) = (outcome.paths[0].len(), outcome.paths[1].len());
        assert!(
            len_1.abs_diff(len_2) <= 2,
            "shoulder lengths diverge: {} vs {}",
            len_1,
            len_2
        );

        // The pair runs at exactly the 4-cell pitch across the middle.
        for x in 12..=18u32 {
            let y_1 = outcome.paths[0]
                .iter()
                .find(|p| p.coord.x == x)
                .map(|p| p.coord.y);
            let y_2 = outcome.paths[1]
                .iter()
                .find(|p| p.coord.x == x)
                .map(|p| p.coord.y);
            if let (Some(y_1), Some(y_2)) = (y_1, y_2) {
                assert_eq!(
                    y_1.abs_diff(y_2),
                    4,
                    "pitch broken at x={}: y {} vs {}",
                    x,
                    y_1,
                    y_2
                );
            }
        }

        // The members must be violation-free against each other.
        assert_eq!(outcome.metrics.path_drc_cells[0], 0);
        assert_eq!(outcome.metrics.path_drc_cells[1], 0);

        // No adjacent duplicate coordinates anywhere.
        for p in 0..2 {
            for pair in outcome.paths[p].windows(2) {
                assert_ne!(pair[0].coord, pair[1].coord);
            }
        }
    }

    #[test]
    fn single_net_on_empty_board_is_immediately_clean() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(10, 10, 1);
        map.finalize(&rules);
        let mut board = Board::new(
            map,
            rules,
            vec![NetDef {
                name: "n".to_string(),
                start: GridCoord::new(1, 1, 0),
                end: GridCoord::new(5, 1, 0),
                subsets: Vec::new(),
            }],
            Vec::new(),
        );

        let outcome = route(&mut board, &small_cfg()).unwrap();
        assert!(outcome.drc_free);
        assert_path_invariants(&board, &outcome, 0);
        // 4 east steps after the start terminal.
        assert_eq!(outcome.paths[0].len(), 4);
        assert_eq!(outcome.metrics.path_costs[0], 400);
    }
}
