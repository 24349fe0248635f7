use crate::db::rules::{DesignRuleTable, ShapeType};
use crate::geom::coord::GridCoord;
use crate::grid::cell::{Cell, cell_flags};

/// The 3-D routing grid: a flat vector of cells indexed x + W*(y + H*z).
///
/// Barriers, zones, swap zones and the proximity masks are painted once by
/// the board builder and are read-only afterwards; only the per-iteration
/// transients change during routing.
pub struct RouteMap {
    width: u32,
    height: u32,
    layers: u8,
    cells: Vec<Cell>,
    layer_interaction_radius: Vec<f64>,
}

impl RouteMap {
    pub fn new(width: u32, height: u32, layers: u8) -> Self {
        let size = (width as usize) * (height as usize) * (layers as usize);
        if size > 500_000_000 {
            log::warn!(
                "Allocating large RouteMap: {} cells. Ensure sufficient RAM.",
                size
            );
        }
        Self {
            width,
            height,
            layers,
            cells: vec![Cell::default(); size],
            layer_interaction_radius: vec![0.0; layers as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn layers(&self) -> u8 {
        self.layers
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn diagonal(&self) -> f64 {
        ((self.width as f64).powi(2) + (self.height as f64).powi(2)).sqrt()
    }

    #[inline(always)]
    pub fn index(&self, coord: GridCoord) -> usize {
        (coord.z as usize) * (self.width as usize) * (self.height as usize)
            + (coord.y as usize) * (self.width as usize)
            + (coord.x as usize)
    }

    #[inline(always)]
    pub fn coord_of(&self, idx: usize) -> GridCoord {
        let plane = (self.width as usize) * (self.height as usize);
        let z = idx / plane;
        let rem = idx % plane;
        GridCoord::new(
            (rem % self.width as usize) as u32,
            (rem / self.width as usize) as u32,
            z as u8,
        )
    }

    #[inline(always)]
    pub fn cell(&self, coord: GridCoord) -> &Cell {
        &self.cells[self.index(coord)]
    }

    #[inline(always)]
    pub fn cell_mut(&mut self, coord: GridCoord) -> &mut Cell {
        let idx = self.index(coord);
        &mut self.cells[idx]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    #[inline(always)]
    pub fn is_outside_map(&self, x: i32, y: i32, z: i32) -> bool {
        x < 0
            || y < 0
            || z < 0
            || x >= self.width as i32
            || y >= self.height as i32
            || z >= self.layers as i32
    }

    #[inline(always)]
    pub fn contains(&self, coord: GridCoord) -> bool {
        coord.x < self.width && coord.y < self.height && coord.z < self.layers
    }

    #[inline(always)]
    pub fn design_rule_zone(&self, coord: GridCoord) -> u8 {
        self.cell(coord).zone
    }

    #[inline(always)]
    pub fn is_trace_barrier(&self, coord: GridCoord) -> bool {
        self.cell(coord).has_flag(cell_flags::TRACE_BARRIER)
    }

    /// Barrier-proximity test for a (subset, shape): a single bit probe on
    /// the precomputed 64-bit mask. This is the hot gate inside neighbor
    /// expansion.
    #[inline(always)]
    pub fn is_inside_barrier_for_shape(&self, coord: GridCoord, subset: u8, shape: ShapeType) -> bool {
        let bit = DesignRuleTable::subset_shape_index(subset, shape);
        self.cell(coord).forbidden_proximity_barrier & (1u64 << bit) != 0
    }

    #[inline(always)]
    pub fn is_inside_pinswap_proximity_for_shape(
        &self,
        coord: GridCoord,
        subset: u8,
        shape: ShapeType,
    ) -> bool {
        let bit = DesignRuleTable::subset_shape_index(subset, shape);
        self.cell(coord).forbidden_proximity_swap & (1u64 << bit) != 0
    }

    /// Pin-swap zone id at the cell, 0 when outside any zone.
    #[inline(always)]
    pub fn in_pinswap_zone(&self, coord: GridCoord) -> u16 {
        self.cell(coord).swap_zone
    }

    pub fn max_interaction_radius_on_layer(&self, layer: u8) -> f64 {
        self.layer_interaction_radius[layer as usize]
    }

    /// Clears per-iteration transient flags and centerline markers on every
    /// cell; congestion, barriers, zones and proximity masks survive.
    pub fn reset_transients(&mut self) {
        for cell in &mut self.cells {
            cell.reset_transients();
        }
    }

    /// Paints the barrier / pin-swap proximity masks and the per-layer
    /// interaction radii. Call once after zones, barriers and swap zones are
    /// in place; the parser contract expects these masks precomputed before
    /// routing starts.
    pub fn finalize(&mut self, rules: &DesignRuleTable) {
        self.paint_proximity_masks(rules);

        for z in 0..self.layers {
            let mut zones: Vec<u8> = Vec::new();
            for y in 0..self.height {
                for x in 0..self.width {
                    let zone = self.cell(GridCoord::new(x, y, z)).zone;
                    if !zones.contains(&zone) {
                        zones.push(zone);
                    }
                }
            }
            self.layer_interaction_radius[z as usize] =
                rules.max_interaction_radius_between(&zones);
        }
    }

    fn paint_proximity_masks(&mut self, rules: &DesignRuleTable) {
        let mut barrier_cells: Vec<GridCoord> = Vec::new();
        let mut swap_cells: Vec<GridCoord> = Vec::new();
        for idx in 0..self.cells.len() {
            let coord = self.coord_of(idx);
            if self.cells[idx].has_flag(cell_flags::TRACE_BARRIER) {
                barrier_cells.push(coord);
            }
            if self.cells[idx].swap_zone != 0 {
                swap_cells.push(coord);
            }
        }

        for source in barrier_cells {
            self.paint_mask_around(rules, source, false);
        }
        for source in swap_cells {
            self.paint_mask_around(rules, source, true);
        }
    }

    fn paint_mask_around(&mut self, rules: &DesignRuleTable, source: GridCoord, swap: bool) {
        let zone = self.cell(source).zone;
        let source_swap = self.cell(source).swap_zone;
        let num_subsets = rules.zones[zone as usize].subsets.len();

        for subset in 0..num_subsets {
            for shape in ShapeType::ALL {
                let rule = rules.rule(zone, subset as u8);
                let radius = rule.radius(shape) + rule.spacing;
                let r = radius.ceil() as i32;
                let radius_sq = radius * radius;
                let bit = 1u64 << DesignRuleTable::subset_shape_index(subset as u8, shape);

                for dy in -r..=r {
                    for dx in -r..=r {
                        if (dx * dx + dy * dy) as f64 > radius_sq {
                            continue;
                        }
                        let x = source.x as i32 + dx;
                        let y = source.y as i32 + dy;
                        if self.is_outside_map(x, y, source.z as i32) {
                            continue;
                        }
                        let target = GridCoord::new(x as u32, y as u32, source.z);
                        let cell = self.cell_mut(target);
                        if swap {
                            // Cells inside the zone itself stay routable.
                            if cell.swap_zone != source_swap {
                                cell.forbidden_proximity_swap |= bit;
                            }
                        } else {
                            cell.forbidden_proximity_barrier |= bit;
                        }
                    }
                }
            }
        }
    }

    /// Clones a lateral window (all layers) into a standalone map for
    /// sub-map routing. Returns the map and the window origin; sub-map
    /// coordinates are original coordinates minus the origin.
    pub fn extract_submap(&self, min: GridCoord, max: GridCoord, margin: u32) -> (RouteMap, GridCoord) {
        let min_x = min.x.saturating_sub(margin);
        let min_y = min.y.saturating_sub(margin);
        let max_x = (max.x + margin).min(self.width - 1);
        let max_y = (max.y + margin).min(self.height - 1);

        let mut sub = RouteMap::new(max_x - min_x + 1, max_y - min_y + 1, self.layers);
        for z in 0..self.layers {
            for y in min_y..=max_y {
                for x in min_x..=max_x {
                    let src = GridCoord::new(x, y, z);
                    let dst = GridCoord::new(x - min_x, y - min_y, z);
                    *sub.cell_mut(dst) = self.cell(src).clone();
                }
            }
        }
        sub.layer_interaction_radius = self.layer_interaction_radius.clone();
        (sub, GridCoord::new(min_x, min_y, 0))
    }
}

/// Lateral offsets covering a disk of the given radius, cached by scan loops.
pub fn disk_offsets(radius: f64) -> Vec<(i32, i32)> {
    let r = radius.ceil() as i32;
    let radius_sq = radius * radius;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx * dx + dy * dy) as f64 <= radius_sq {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rules::uniform_rules;

    #[test]
    fn index_round_trips() {
        let map = RouteMap::new(7, 5, 3);
        for z in 0..3u8 {
            for y in 0..5u32 {
                for x in 0..7u32 {
                    let c = GridCoord::new(x, y, z);
                    assert_eq!(map.coord_of(map.index(c)), c);
                }
            }
        }
    }

    #[test]
    fn bounds_checks() {
        let map = RouteMap::new(10, 10, 2);
        assert!(!map.is_outside_map(0, 0, 0));
        assert!(!map.is_outside_map(9, 9, 1));
        assert!(map.is_outside_map(-1, 0, 0));
        assert!(map.is_outside_map(10, 0, 0));
        assert!(map.is_outside_map(0, 0, 2));
    }

    #[test]
    fn proximity_mask_painted_around_barriers() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(10, 10, 1);
        map.cell_mut(GridCoord::new(5, 5, 0))
            .set_flag(cell_flags::TRACE_BARRIER);
        map.finalize(&rules);

        // radius = 0.5 + 1.0 spacing: adjacent cardinals blocked for traces.
        assert!(map.is_inside_barrier_for_shape(GridCoord::new(5, 5, 0), 0, ShapeType::Trace));
        assert!(map.is_inside_barrier_for_shape(GridCoord::new(6, 5, 0), 0, ShapeType::Trace));
        assert!(!map.is_inside_barrier_for_shape(GridCoord::new(8, 5, 0), 0, ShapeType::Trace));
    }

    #[test]
    fn swap_zone_interior_is_not_proximity_blocked() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(10, 10, 1);
        for x in 2..5u32 {
            map.cell_mut(GridCoord::new(x, 2, 0)).swap_zone = 1;
        }
        map.finalize(&rules);

        assert_eq!(map.in_pinswap_zone(GridCoord::new(3, 2, 0)), 1);
        assert!(!map.is_inside_pinswap_proximity_for_shape(
            GridCoord::new(3, 2, 0),
            0,
            ShapeType::Trace
        ));
        assert!(map.is_inside_pinswap_proximity_for_shape(
            GridCoord::new(3, 3, 0),
            0,
            ShapeType::Trace
        ));
    }

    #[test]
    fn submap_extraction_translates_cells() {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let mut map = RouteMap::new(20, 20, 2);
        map.cell_mut(GridCoord::new(10, 10, 1)).zone = 0;
        map.cell_mut(GridCoord::new(10, 10, 1))
            .set_flag(cell_flags::TRACE_BARRIER);
        map.finalize(&rules);

        let (sub, origin) =
            map.extract_submap(GridCoord::new(8, 8, 0), GridCoord::new(12, 12, 0), 2);
        assert_eq!(origin, GridCoord::new(6, 6, 0));
        assert_eq!(sub.width(), 9);
        assert_eq!(sub.height(), 9);
        assert_eq!(sub.layers(), 2);
        assert!(sub.is_trace_barrier(GridCoord::new(4, 4, 1)));
    }

    #[test]
    fn disk_offsets_cover_the_radius() {
        let offsets = disk_offsets(1.0);
        assert_eq!(offsets.len(), 5); // center + 4 cardinals
        let offsets = disk_offsets(1.5);
        assert_eq!(offsets.len(), 9); // 3x3 block
    }
}
