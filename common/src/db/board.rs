use crate::db::indices::PathId;
use crate::db::rules::{DesignRuleTable, ZoneRules};
use crate::geom::coord::GridCoord;
use crate::grid::cell::cell_flags;
use crate::grid::map::RouteMap;
use serde::{Deserialize, Serialize};

/// One user net: a start/end terminal pair plus its design-rule subset per
/// zone (empty means subset 0 everywhere).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetDef {
    pub name: String,
    #[serde(default)]
    pub subsets: Vec<u8>,
    pub start: GridCoord,
    pub end: GridCoord,
}

/// Two user nets routed as one diff pair. During the main pass the pair is
/// represented by a pseudo-net whose terminals sit midway between the two
/// members' terminals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffPairDef {
    pub net_1: usize,
    pub net_2: usize,
    #[serde(default)]
    pub pn_swappable: bool,
}

/// Axis-aligned region on one layer, the unit of the board description.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub z: u8,
}

impl Region {
    pub fn cells(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let (x0, x1) = (self.x0.min(self.x1), self.x0.max(self.x1));
        let (y0, y1) = (self.y0.min(self.y1), self.y0.max(self.y1));
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| GridCoord::new(x, y, self.z)))
    }
}

/// Serializable board description: what the external parser hands to the
/// core. The generator writes these; `build()` produces the live `Board`.
// Inline-array fields stay ahead of the array-of-table fields so the TOML
// serializer never has to emit a bare key after a table header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardSpec {
    pub width: u32,
    pub height: u32,
    pub layers: u8,
    #[serde(default)]
    pub zone_regions: Vec<(Region, u8)>,
    #[serde(default)]
    pub swap_zone_regions: Vec<(Region, u16)>,
    pub zones: Vec<ZoneRules>,
    #[serde(default)]
    pub barrier_regions: Vec<Region>,
    pub nets: Vec<NetDef>,
    #[serde(default)]
    pub diff_pairs: Vec<DiffPairDef>,
}

impl BoardSpec {
    pub fn build(self) -> Board {
        let rules = DesignRuleTable::new(self.zones);
        let mut map = RouteMap::new(self.width, self.height, self.layers);

        for (region, zone) in &self.zone_regions {
            for coord in region.cells() {
                map.cell_mut(coord).zone = *zone;
            }
        }
        for region in &self.barrier_regions {
            for coord in region.cells() {
                map.cell_mut(coord).set_flag(cell_flags::TRACE_BARRIER);
            }
        }
        for (region, id) in &self.swap_zone_regions {
            for coord in region.cells() {
                map.cell_mut(coord).swap_zone = *id;
            }
        }
        map.finalize(&rules);

        Board::new(map, rules, self.nets, self.diff_pairs)
    }
}

/// Per-path, per-zone design-rule subset assignment. Split out of `Board`
/// so callers can borrow it alongside a mutable `RouteMap`.
#[derive(Clone, Debug)]
pub struct SubsetMap {
    per_path: Vec<Vec<u8>>,
}

impl SubsetMap {
    #[inline(always)]
    pub fn subset_for(&self, path: PathId, zone: u8) -> u8 {
        self.per_path[path.index()][zone as usize]
    }

    pub fn num_paths(&self) -> usize {
        self.per_path.len()
    }
}

/// The populated routing problem: grid, rules, netlist and the pseudo-net
/// bookkeeping. Path ids 0..num_nets are user nets; ids num_nets.. are the
/// pseudo-nets, one per diff pair.
pub struct Board {
    pub map: RouteMap,
    pub rules: DesignRuleTable,
    pub nets: Vec<NetDef>,
    pub diff_pairs: Vec<DiffPairDef>,
    pub subsets: SubsetMap,
    member_to_pseudo: Vec<Option<PathId>>,
}

impl Board {
    pub fn new(
        map: RouteMap,
        rules: DesignRuleTable,
        nets: Vec<NetDef>,
        diff_pairs: Vec<DiffPairDef>,
    ) -> Self {
        let num_nets = nets.len();
        let num_paths = num_nets + diff_pairs.len();
        let num_zones = rules.num_zones();

        let mut member_to_pseudo = vec![None; num_nets];
        for (i, pair) in diff_pairs.iter().enumerate() {
            let pseudo = PathId::new(num_nets + i);
            member_to_pseudo[pair.net_1] = Some(pseudo);
            member_to_pseudo[pair.net_2] = Some(pseudo);
        }

        let mut subset_map = Vec::with_capacity(num_paths);
        for net in &nets {
            let mut per_zone = vec![0u8; num_zones];
            for (zone, subset) in net.subsets.iter().enumerate().take(num_zones) {
                per_zone[zone] = *subset;
            }
            subset_map.push(per_zone);
        }
        for pair in &diff_pairs {
            // Pseudo-nets inherit the first member's subsets.
            subset_map.push(subset_map[pair.net_1].clone());
        }

        Self {
            map,
            rules,
            nets,
            diff_pairs,
            subsets: SubsetMap {
                per_path: subset_map,
            },
            member_to_pseudo,
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn num_pseudo_nets(&self) -> usize {
        self.diff_pairs.len()
    }

    pub fn num_paths(&self) -> usize {
        self.nets.len() + self.diff_pairs.len()
    }

    #[inline(always)]
    pub fn is_pseudo(&self, path: PathId) -> bool {
        path.index() >= self.nets.len()
    }

    #[inline(always)]
    pub fn is_diff_pair_member(&self, path: PathId) -> bool {
        path.index() < self.nets.len() && self.member_to_pseudo[path.index()].is_some()
    }

    /// Pseudo-net owning a member net, if any.
    pub fn pseudo_for(&self, path: PathId) -> Option<PathId> {
        if path.index() < self.nets.len() {
            self.member_to_pseudo[path.index()]
        } else {
            None
        }
    }

    /// The two member nets of a pseudo-net, in user netlist order.
    pub fn pseudo_pair(&self, pseudo: PathId) -> (PathId, PathId) {
        let pair = &self.diff_pairs[pseudo.index() - self.nets.len()];
        (PathId::new(pair.net_1), PathId::new(pair.net_2))
    }

    pub fn pn_swappable(&self, pseudo: PathId) -> bool {
        self.diff_pairs[pseudo.index() - self.nets.len()].pn_swappable
    }

    #[inline(always)]
    pub fn subset_for(&self, path: PathId, zone: u8) -> u8 {
        self.subsets.subset_for(path, zone)
    }

    /// User terminals; pseudo-net terminals sit midway between the pair's
    /// member terminals.
    pub fn terminals(&self, path: PathId) -> (GridCoord, GridCoord) {
        if let Some(net) = self.nets.get(path.index()) {
            return (net.start, net.end);
        }
        let (n1, n2) = self.pseudo_pair(path);
        let (s1, e1) = (self.nets[n1.index()].start, self.nets[n1.index()].end);
        let (s2, e2) = (self.nets[n2.index()].start, self.nets[n2.index()].end);
        (midpoint(s1, s2), midpoint(e1, e2))
    }

    pub fn path_name(&self, path: PathId) -> String {
        if let Some(net) = self.nets.get(path.index()) {
            net.name.clone()
        } else {
            let (n1, n2) = self.pseudo_pair(path);
            format!(
                "pseudo({}/{})",
                self.nets[n1.index()].name,
                self.nets[n2.index()].name
            )
        }
    }
}

fn midpoint(a: GridCoord, b: GridCoord) -> GridCoord {
    GridCoord::new((a.x + b.x) / 2, (a.y + b.y) / 2, a.z.min(b.z))
}

/// Mutable per-run routing state: effective terminals (pin-swap
/// reinterpretation and P/N swapping move them), the swap zone each path
/// starts in, and the current iteration.
pub struct MapState {
    pub start_cells: Vec<GridCoord>,
    pub end_cells: Vec<GridCoord>,
    pub start_swap_zone: Vec<u16>,
    pub diff_pair_terms_swapped: Vec<bool>,
    pub current_iteration: u32,
}

impl MapState {
    pub fn new(board: &Board) -> Self {
        let num_paths = board.num_paths();
        let mut start_cells = Vec::with_capacity(num_paths);
        let mut end_cells = Vec::with_capacity(num_paths);
        let mut start_swap_zone = Vec::with_capacity(num_paths);

        for p in 0..num_paths {
            let (start, end) = board.terminals(PathId::new(p));
            start_swap_zone.push(if board.map.contains(start) {
                board.map.in_pinswap_zone(start)
            } else {
                0
            });
            start_cells.push(start);
            end_cells.push(end);
        }

        Self {
            start_cells,
            end_cells,
            start_swap_zone,
            diff_pair_terms_swapped: vec![false; board.num_pseudo_nets()],
            current_iteration: 0,
        }
    }
}

/// Optional per-layer search-bounding disk honored by the path-finder.
#[derive(Clone, Debug)]
pub struct RoutingRestriction {
    pub enabled: bool,
    pub center_x: u32,
    pub center_y: u32,
    pub allowed_layers: Vec<bool>,
    pub allowed_radii: Vec<f64>,
}

impl RoutingRestriction {
    pub fn unrestricted(layers: u8) -> Self {
        Self {
            enabled: false,
            center_x: 0,
            center_y: 0,
            allowed_layers: vec![true; layers as usize],
            allowed_radii: vec![0.0; layers as usize],
        }
    }

    /// Whether a cell is reachable under this restriction. The radius only
    /// constrains lateral movement; with radius 0 a layer is allowed
    /// everywhere (vertical escapes stay possible).
    pub fn allows(&self, coord: GridCoord, lateral_move: bool) -> bool {
        if !self.enabled {
            return true;
        }
        if !self.allowed_layers[coord.z as usize] {
            return false;
        }
        let radius = self.allowed_radii[coord.z as usize];
        if !lateral_move || radius <= 0.0 {
            return true;
        }
        let dx = coord.x as f64 - self.center_x as f64;
        let dy = coord.y as f64 - self.center_y as f64;
        dx * dx + dy * dy <= radius * radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rules::uniform_rules;

    fn board_with_pair() -> Board {
        let rules = uniform_rules(1.0, 1.0, 1.0);
        let map = RouteMap::new(30, 30, 1);
        let nets = vec![
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
            NetDef {
                name: "single".to_string(),
                start: GridCoord::new(0, 0, 0),
                end: GridCoord::new(5, 5, 0),
                subsets: Vec::new(),
            },
        ];
        let pairs = vec![DiffPairDef {
            net_1: 0,
            net_2: 1,
            pn_swappable: true,
        }];
        Board::new(map, rules, nets, pairs)
    }

    #[test]
    fn pseudo_terminals_are_member_midpoints() {
        let board = board_with_pair();
        let pseudo = PathId::new(3);
        assert!(board.is_pseudo(pseudo));
        let (start, end) = board.terminals(pseudo);
        assert_eq!(start, GridCoord::new(2, 15, 0));
        assert_eq!(end, GridCoord::new(27, 15, 0));
    }

    #[test]
    fn member_and_pseudo_lookup() {
        let board = board_with_pair();
        let pseudo = PathId::new(3);
        assert_eq!(board.pseudo_for(PathId::new(0)), Some(pseudo));
        assert_eq!(board.pseudo_for(PathId::new(1)), Some(pseudo));
        assert_eq!(board.pseudo_for(PathId::new(2)), None);
        assert_eq!(board.pseudo_pair(pseudo), (PathId::new(0), PathId::new(1)));
        assert!(board.is_diff_pair_member(PathId::new(0)));
        assert!(!board.is_diff_pair_member(PathId::new(2)));
    }

    #[test]
    fn restriction_gates_layers_and_radius() {
        let mut r = RoutingRestriction::unrestricted(2);
        assert!(r.allows(GridCoord::new(50, 50, 1), true));

        r.enabled = true;
        r.center_x = 10;
        r.center_y = 10;
        r.allowed_layers = vec![true, false];
        r.allowed_radii = vec![5.0, 0.0];

        assert!(r.allows(GridCoord::new(13, 10, 0), true));
        assert!(!r.allows(GridCoord::new(16, 10, 0), true));
        // Vertical moves ignore the radius.
        assert!(r.allows(GridCoord::new(16, 10, 0), false));
        assert!(!r.allows(GridCoord::new(10, 10, 1), false));
    }
}
