use crate::metrics::Randomize;
use maze_common::db::board::SubsetMap;
use maze_common::db::indices::PathId;
use maze_common::db::rules::{DesignRuleTable, ShapeType};
use maze_common::geom::coord::GridCoord;
use maze_common::grid::cell::{Cell, ONE_TRAVERSAL};
use maze_common::grid::map::{RouteMap, disk_offsets};

/// Anti-rounding slack added to every congestion-deposit radius. The source
/// treats this as a tunable.
pub const CONGESTION_RADIUS_SLACK_CELLS: f64 = 1.0;

/// Deposited on every DRC cell to nudge future routes away from it.
pub const DRC_CONGESTION_BONUS: u32 = ONE_TRAVERSAL / 10;

/// Deposited around each terminal to keep other nets from crowding pads.
pub const TERMINAL_CONGESTION: u32 = ONE_TRAVERSAL;

/// Per-path congestion-cost scaling for one path-finder call, derived from
/// the randomization assignment and the recent DRC-free fractions.
#[derive(Clone, Copy, Debug)]
pub struct CongestionModifiers {
    pub mode: Randomize,
    pub f_map: f64,
    pub f_path: f64,
}

impl CongestionModifiers {
    pub fn none() -> Self {
        Self {
            mode: Randomize::None,
            f_map: 0.0,
            f_path: 0.0,
        }
    }

    pub fn factor(&self) -> f64 {
        let shape = (1.0 - 0.2 * self.f_map) * (1.0 - self.f_path);
        match self.mode {
            Randomize::None => 1.0,
            Randomize::Decrease => 1.0 - 0.98 * shape,
            Randomize::Increase => 1.0 + 4.0 * shape,
        }
    }
}

/// Congestion penalty a (subset, shape) visitor pays at a cell, with the
/// per-path randomization factor applied. `exempt` carries the visitor's
/// diff-pair family (pseudo-net and members), whose deposits are never an
/// obstacle to each other.
#[inline]
pub fn congestion_penalty(
    cell: &Cell,
    path: PathId,
    subset: u8,
    shape: ShapeType,
    recognize_self: bool,
    modifiers: &CongestionModifiers,
    exempt: &[PathId],
) -> u64 {
    let mut raw: u64 = 0;
    for entry in &cell.congestion {
        if entry.subset != subset || entry.shape != shape {
            continue;
        }
        if !recognize_self && entry.path == path {
            continue;
        }
        if exempt.contains(&entry.path) {
            continue;
        }
        raw += entry.amount as u64;
    }
    if raw == 0 {
        return 0;
    }
    (raw as f64 * modifiers.factor()).round() as u64
}

/// (subset, shape) pairs some net could legally occupy on each layer,
/// the fan-out set for congestion deposits.
pub fn subset_shapes_in_use(map: &RouteMap, subsets: &SubsetMap) -> Vec<Vec<(u8, ShapeType)>> {
    let mut zones_per_layer: Vec<Vec<u8>> = vec![Vec::new(); map.layers() as usize];
    for idx in 0..map.num_cells() {
        let coord = map.coord_of(idx);
        let zone = map.cells()[idx].zone;
        let layer = &mut zones_per_layer[coord.z as usize];
        if !layer.contains(&zone) {
            layer.push(zone);
        }
    }

    zones_per_layer
        .into_iter()
        .map(|zones| {
            let mut pairs: Vec<(u8, ShapeType)> = Vec::new();
            for p in 0..subsets.num_paths() {
                for &zone in &zones {
                    let subset = subsets.subset_for(PathId::new(p), zone);
                    for shape in ShapeType::ALL {
                        if !pairs.contains(&(subset, shape)) {
                            pairs.push((subset, shape));
                        }
                    }
                }
            }
            pairs
        })
        .collect()
}

/// Deposits congestion in a disk around one centerline cell: every foreign
/// (subset, shape) in use on the layer receives `delta` at the center,
/// tapering linearly to half at its interaction radius.
fn deposit_around_cell(
    map: &mut RouteMap,
    rules: &DesignRuleTable,
    path: PathId,
    center: GridCoord,
    own_subset: u8,
    own_shape: ShapeType,
    layer_pairs: &[(u8, ShapeType)],
    delta: u32,
    offsets: &[(i32, i32)],
) {
    let own_zone = map.design_rule_zone(center);
    let own_idx = DesignRuleTable::subset_shape_index(own_subset, own_shape);

    for &(dx, dy) in offsets {
        let x = center.x as i32 + dx;
        let y = center.y as i32 + dy;
        if map.is_outside_map(x, y, center.z as i32) {
            continue;
        }
        let target = GridCoord::new(x as u32, y as u32, center.z);
        let target_zone = map.design_rule_zone(target);
        let dist = ((dx * dx + dy * dy) as f64).sqrt();

        for &(f_subset, f_shape) in layer_pairs {
            let f_idx = DesignRuleTable::subset_shape_index(f_subset, f_shape);
            let radius = rules.cong_radius(target_zone, f_idx, own_zone, own_idx);
            if radius <= 0.0 || dist > radius + CONGESTION_RADIUS_SLACK_CELLS {
                continue;
            }
            let taper = 1.0 - 0.5 * (dist / radius).min(1.0);
            let amount = (delta as f64 * taper).round() as u32;
            if amount > 0 {
                map.cell_mut(target)
                    .add_congestion(path, f_subset, f_shape, amount);
            }
        }
    }
}

/// Deposits congestion along a full contiguous centerline.
pub fn deposit_around_path(
    map: &mut RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    path: PathId,
    contiguous: &[(GridCoord, ShapeType)],
    layer_pairs: &[Vec<(u8, ShapeType)>],
    delta: u32,
) {
    let offsets = disk_offsets(rules.max_interaction_radius() + CONGESTION_RADIUS_SLACK_CELLS);
    for &(coord, shape) in contiguous {
        let zone = map.design_rule_zone(coord);
        let subset = subsets.subset_for(path, zone);
        deposit_around_cell(
            map,
            rules,
            path,
            coord,
            subset,
            shape,
            &layer_pairs[coord.z as usize],
            delta,
            &offsets,
        );
    }
}

/// Deposits one traversal of congestion around both terminals of a path.
pub fn deposit_around_terminals(
    map: &mut RouteMap,
    rules: &DesignRuleTable,
    subsets: &SubsetMap,
    path: PathId,
    start: GridCoord,
    end: GridCoord,
    layer_pairs: &[Vec<(u8, ShapeType)>],
) {
    let offsets = disk_offsets(rules.max_interaction_radius() + CONGESTION_RADIUS_SLACK_CELLS);
    for terminal in [start, end] {
        if !map.contains(terminal) {
            continue;
        }
        let zone = map.design_rule_zone(terminal);
        let subset = subsets.subset_for(path, zone);
        deposit_around_cell(
            map,
            rules,
            path,
            terminal,
            subset,
            ShapeType::Trace,
            &layer_pairs[terminal.z as usize],
            TERMINAL_CONGESTION,
            &offsets,
        );
    }
}

/// Decays all congestion amounts, dropping entries that reach zero. Runs at
/// the top of every iteration so stale deposits fade instead of pinning the
/// map forever.
pub fn evaporate(map: &mut RouteMap, rate: f64) {
    let rate = rate.clamp(0.0, 1.0);
    for cell in map.cells_mut() {
        for entry in &mut cell.congestion {
            entry.amount = (entry.amount as f64 * rate) as u32;
        }
        cell.congestion.retain(|e| e.amount > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maze_common::db::board::{Board, NetDef};
    use maze_common::db::rules::uniform_rules;

    fn one_net_board(w: u32, h: u32, layers: u8) -> Board {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(w, h, layers);
        map.finalize(&rules);
        Board::new(
            map,
            rules,
            vec![NetDef {
                name: "n0".to_string(),
                start: GridCoord::new(1, 1, 0),
                end: GridCoord::new(w - 2, 1, 0),
                subsets: Vec::new(),
            }],
            Vec::new(),
        )
    }

    #[test]
    fn deposit_tapers_from_center_to_radius() {
        let mut board = one_net_board(20, 20, 1);
        let path = PathId::new(0);
        let pairs = subset_shapes_in_use(&board.map, &board.subsets);
        let center = GridCoord::new(10, 10, 0);

        deposit_around_path(
            &mut board.map,
            &board.rules,
            &board.subsets,
            path,
            &[(center, ShapeType::Trace)],
            &pairs,
            ONE_TRAVERSAL,
        );

        let probe = PathId::new(9);
        let at_center = board
            .map
            .cell(center)
            .congestion_for(0, ShapeType::Trace, probe, true);
        let near = board
            .map
            .cell(GridCoord::new(11, 10, 0))
            .congestion_for(0, ShapeType::Trace, probe, true);
        let far = board
            .map
            .cell(GridCoord::new(10, 17, 0))
            .congestion_for(0, ShapeType::Trace, probe, true);

        assert_eq!(at_center, ONE_TRAVERSAL as u64);
        assert!(near > 0 && near < at_center);
        assert_eq!(far, 0);
    }

    #[test]
    fn repeated_deposits_accumulate() {
        let mut board = one_net_board(20, 20, 1);
        let path = PathId::new(0);
        let pairs = subset_shapes_in_use(&board.map, &board.subsets);
        let center = GridCoord::new(10, 10, 0);
        let segs = [(center, ShapeType::Trace)];

        deposit_around_path(&mut board.map, &board.rules, &board.subsets, path, &segs, &pairs, 300);
        let probe = PathId::new(9);
        let once = board
            .map
            .cell(center)
            .congestion_for(0, ShapeType::Trace, probe, true);
        deposit_around_path(&mut board.map, &board.rules, &board.subsets, path, &segs, &pairs, 300);
        let twice = board
            .map
            .cell(center)
            .congestion_for(0, ShapeType::Trace, probe, true);
        assert_eq!(twice, 2 * once);
    }

    #[test]
    fn evaporation_decays_and_drops_entries() {
        let mut map = RouteMap::new(4, 4, 1);
        let c = GridCoord::new(1, 1, 0);
        map.cell_mut(c)
            .add_congestion(PathId::new(0), 0, ShapeType::Trace, 100);
        map.cell_mut(c)
            .add_congestion(PathId::new(1), 0, ShapeType::Trace, 1);

        evaporate(&mut map, 0.9);
        assert_eq!(
            map.cell(c)
                .congestion_for(0, ShapeType::Trace, PathId::new(0), true),
            90
        );
        // The 1-unit entry decayed to zero and was dropped.
        assert_eq!(map.cell(c).congestion.len(), 1);
    }

    #[test]
    fn randomization_factors_match_the_scaling_rules() {
        let base = CongestionModifiers::none();
        assert!((base.factor() - 1.0).abs() < 1e-12);

        let dec = CongestionModifiers {
            mode: Randomize::Decrease,
            f_map: 0.0,
            f_path: 0.0,
        };
        assert!((dec.factor() - 0.02).abs() < 1e-12);

        let inc = CongestionModifiers {
            mode: Randomize::Increase,
            f_map: 0.5,
            f_path: 0.5,
        };
        // 1 + 4 * (1 - 0.1) * 0.5 = 2.8
        assert!((inc.factor() - 2.8).abs() < 1e-12);
    }

    #[test]
    fn terminal_deposit_lands_on_both_pads() {
        let mut board = one_net_board(20, 20, 1);
        let pairs = subset_shapes_in_use(&board.map, &board.subsets);
        let (start, end) = (board.nets[0].start, board.nets[0].end);

        deposit_around_terminals(
            &mut board.map,
            &board.rules,
            &board.subsets,
            PathId::new(0),
            start,
            end,
            &pairs,
        );

        let probe = PathId::new(9);
        for t in [start, end] {
            assert!(
                board
                    .map
                    .cell(t)
                    .congestion_for(0, ShapeType::Trace, probe, true)
                    > 0
            );
        }
    }
}
