use serde::{Deserialize, Serialize};

pub const NUM_SHAPE_TYPES: usize = 3;

/// Shape categories a net can occupy in a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShapeType {
    Trace = 0,
    ViaUp = 1,
    ViaDown = 2,
}

impl ShapeType {
    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        match i {
            0 => ShapeType::Trace,
            1 => ShapeType::ViaUp,
            _ => ShapeType::ViaDown,
        }
    }

    #[inline(always)]
    pub fn is_via(self) -> bool {
        !matches!(self, ShapeType::Trace)
    }

    pub const ALL: [ShapeType; NUM_SHAPE_TYPES] =
        [ShapeType::Trace, ShapeType::ViaUp, ShapeType::ViaDown];
}

/// Allowed route-direction bits. Masks at both ends of a step must permit
/// the step's direction.
pub mod route_dir {
    pub const NONE: u16 = 0;
    pub const NORTH: u16 = 1 << 0;
    pub const SOUTH: u16 = 1 << 1;
    pub const EAST: u16 = 1 << 2;
    pub const WEST: u16 = 1 << 3;
    pub const NORTH_EAST: u16 = 1 << 4;
    pub const NORTH_WEST: u16 = 1 << 5;
    pub const SOUTH_EAST: u16 = 1 << 6;
    pub const SOUTH_WEST: u16 = 1 << 7;
    pub const KNIGHT: u16 = 1 << 8;
    pub const UP: u16 = 1 << 9;
    pub const DOWN: u16 = 1 << 10;

    pub const CARDINAL: u16 = NORTH | SOUTH | EAST | WEST;
    pub const DIAGONAL: u16 = NORTH_EAST | NORTH_WEST | SOUTH_EAST | SOUTH_WEST;
    pub const LATERAL: u16 = CARDINAL | DIAGONAL | KNIGHT;
    pub const VERTICAL: u16 = UP | DOWN;
    pub const MANHATTAN: u16 = CARDINAL | VERTICAL;
    pub const X_ROUTING: u16 = DIAGONAL | VERTICAL;
    pub const ANY: u16 = LATERAL | VERTICAL;

    /// The bit a step with delta (dx, dy, dz) needs in the combined mask.
    pub fn required_bit(dx: i32, dy: i32, dz: i32) -> u16 {
        if dz > 0 {
            return UP;
        }
        if dz < 0 {
            return DOWN;
        }
        let ax = dx.abs();
        let ay = dy.abs();
        if ax + ay == 1 {
            if dx > 0 {
                EAST
            } else if dx < 0 {
                WEST
            } else if dy > 0 {
                NORTH
            } else {
                SOUTH
            }
        } else if ax == 1 && ay == 1 {
            match (dx > 0, dy > 0) {
                (true, true) => NORTH_EAST,
                (false, true) => NORTH_WEST,
                (true, false) => SOUTH_EAST,
                (false, false) => SOUTH_WEST,
            }
        } else {
            KNIGHT
        }
    }

    /// True when the only lateral movement a mask permits is diagonal
    /// ("X routing"), which earns a special exemption near targets and
    /// pin-swap zones.
    pub fn is_x_routing_only(mask: u16) -> bool {
        let lateral = mask & LATERAL;
        lateral != NONE && lateral == mask & DIAGONAL
    }
}

fn default_route_directions() -> u16 {
    route_dir::ANY
}

/// Design rules for one subset within a zone. All length values are in
/// cell units; the parser is responsible for the micron conversion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubsetRule {
    pub name: String,
    pub line_width: f64,
    pub via_up_diameter: f64,
    pub via_down_diameter: f64,
    pub spacing: f64,
    #[serde(default = "default_route_directions")]
    pub route_directions: u16,
    /// Center-to-center diff-pair pitch, 0 for non-diff-pair subsets.
    #[serde(default)]
    pub diff_pair_pitch: f64,
}

impl SubsetRule {
    #[inline]
    pub fn radius(&self, shape: ShapeType) -> f64 {
        match shape {
            ShapeType::Trace => self.line_width / 2.0,
            ShapeType::ViaUp => self.via_up_diameter / 2.0,
            ShapeType::ViaDown => self.via_down_diameter / 2.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneRules {
    pub name: String,
    pub subsets: Vec<SubsetRule>,
}

/// Precomputed interaction tables between every (zone, subset, shape) pair.
///
/// `drc_radius[i][m][j][n]` is the distance from the center of shape n (in
/// zone j) within which the center of shape m (in zone i) is a violation:
/// radius_n + spacing. `cong_radius` adds radius_m on top, giving the range
/// within which shape m should feel congestion from shape n. Squared copies
/// avoid sqrt in the scan loops. Tables are flat with precomputed strides.
pub struct DesignRuleTable {
    pub zones: Vec<ZoneRules>,
    max_subsets: usize,
    subset_shapes: usize,
    drc_radius: Vec<f32>,
    drc_radius_sq: Vec<f32>,
    cong_radius: Vec<f32>,
    cong_radius_sq: Vec<f32>,
    foreign_subset: Vec<u8>,
    max_radius: f64,
}

impl DesignRuleTable {
    pub fn new(zones: Vec<ZoneRules>) -> Self {
        let max_subsets = zones.iter().map(|z| z.subsets.len()).max().unwrap_or(1);
        let subset_shapes = max_subsets * NUM_SHAPE_TYPES;
        let nz = zones.len();
        let table_len = nz * subset_shapes * nz * subset_shapes;

        let mut t = Self {
            zones,
            max_subsets,
            subset_shapes,
            drc_radius: vec![0.0; table_len],
            drc_radius_sq: vec![0.0; table_len],
            cong_radius: vec![0.0; table_len],
            cong_radius_sq: vec![0.0; table_len],
            foreign_subset: vec![0; nz * subset_shapes * nz],
            max_radius: 0.0,
        };
        t.build_matrices();
        t
    }

    fn build_matrices(&mut self) {
        let nz = self.zones.len();
        let mut max_radius = 0.0f64;

        for zi in 0..nz {
            for si in 0..self.zones[zi].subsets.len() {
                for shape_i in ShapeType::ALL {
                    let m = Self::subset_shape_index(si as u8, shape_i);
                    for zj in 0..nz {
                        // Subset translation: prefer the same-named subset in
                        // the target zone, fall back to a clamped index.
                        let name = &self.zones[zi].subsets[si].name;
                        let translated = self.zones[zj]
                            .subsets
                            .iter()
                            .position(|s| &s.name == name)
                            .unwrap_or_else(|| si.min(self.zones[zj].subsets.len() - 1));
                        self.foreign_subset[(zi * self.subset_shapes + m) * nz + zj] =
                            translated as u8;

                        for sj in 0..self.zones[zj].subsets.len() {
                            for shape_j in ShapeType::ALL {
                                let n = Self::subset_shape_index(sj as u8, shape_j);
                                let r1 = self.zones[zi].subsets[si].radius(shape_i);
                                let r2 = self.zones[zj].subsets[sj].radius(shape_j);
                                let spacing = self.zones[zi].subsets[si]
                                    .spacing
                                    .max(self.zones[zj].subsets[sj].spacing);

                                let drc = r2 + spacing;
                                let cong = r1 + spacing + r2;
                                let idx = self.idx4(zi as u8, m, zj as u8, n);
                                self.drc_radius[idx] = drc as f32;
                                self.drc_radius_sq[idx] = (drc * drc) as f32;
                                self.cong_radius[idx] = cong as f32;
                                self.cong_radius_sq[idx] = (cong * cong) as f32;
                                max_radius = max_radius.max(cong);
                            }
                        }
                    }
                }
            }
        }
        self.max_radius = max_radius;
    }

    #[inline(always)]
    pub fn subset_shape_index(subset: u8, shape: ShapeType) -> usize {
        subset as usize * NUM_SHAPE_TYPES + shape.index()
    }

    #[inline(always)]
    fn idx4(&self, z1: u8, m: usize, z2: u8, n: usize) -> usize {
        ((z1 as usize * self.subset_shapes + m) * self.zones.len() + z2 as usize)
            * self.subset_shapes
            + n
    }

    #[inline(always)]
    pub fn drc_radius(&self, z1: u8, m: usize, z2: u8, n: usize) -> f64 {
        self.drc_radius[self.idx4(z1, m, z2, n)] as f64
    }

    #[inline(always)]
    pub fn drc_radius_sq(&self, z1: u8, m: usize, z2: u8, n: usize) -> f64 {
        self.drc_radius_sq[self.idx4(z1, m, z2, n)] as f64
    }

    #[inline(always)]
    pub fn cong_radius(&self, z1: u8, m: usize, z2: u8, n: usize) -> f64 {
        self.cong_radius[self.idx4(z1, m, z2, n)] as f64
    }

    #[inline(always)]
    pub fn cong_radius_sq(&self, z1: u8, m: usize, z2: u8, n: usize) -> f64 {
        self.cong_radius_sq[self.idx4(z1, m, z2, n)] as f64
    }

    /// Subset in `target_zone` that carries the same net behavior as the
    /// subset encoded in `m` within `source_zone`.
    #[inline(always)]
    pub fn foreign_subset(&self, source_zone: u8, m: usize, target_zone: u8) -> u8 {
        self.foreign_subset
            [(source_zone as usize * self.subset_shapes + m) * self.zones.len() + target_zone as usize]
    }

    #[inline(always)]
    pub fn rule(&self, zone: u8, subset: u8) -> &SubsetRule {
        &self.zones[zone as usize].subsets[subset as usize]
    }

    #[inline(always)]
    pub fn route_directions(&self, zone: u8, subset: u8) -> u16 {
        self.rule(zone, subset).route_directions
    }

    pub fn num_zones(&self) -> usize {
        self.zones.len()
    }

    pub fn max_subsets(&self) -> usize {
        self.max_subsets
    }

    pub fn subset_shapes(&self) -> usize {
        self.subset_shapes
    }

    /// Largest congestion radius over all interactions, the upper bound on
    /// every neighborhood scan.
    pub fn max_interaction_radius(&self) -> f64 {
        self.max_radius
    }

    /// Largest congestion radius restricted to interactions between the
    /// given zones (used for the per-layer scan bound).
    pub fn max_interaction_radius_between(&self, zones: &[u8]) -> f64 {
        let mut max = 0.0f64;
        for &zi in zones {
            for &zj in zones {
                for m in 0..self.zones[zi as usize].subsets.len() * NUM_SHAPE_TYPES {
                    for n in 0..self.zones[zj as usize].subsets.len() * NUM_SHAPE_TYPES {
                        max = max.max(self.cong_radius(zi, m, zj, n));
                    }
                }
            }
        }
        max
    }
}

/// Uniform single-zone rule set, the common case for simple boards and the
/// unit-test fixtures.
pub fn uniform_rules(line_width: f64, via_diameter: f64, spacing: f64) -> DesignRuleTable {
    DesignRuleTable::new(vec![ZoneRules {
        name: "default".to_string(),
        subsets: vec![SubsetRule {
            name: "signal".to_string(),
            line_width,
            via_up_diameter: via_diameter,
            via_down_diameter: via_diameter,
            spacing,
            route_directions: route_dir::ANY,
            diff_pair_pitch: 0.0,
        }],
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_zone_table() -> DesignRuleTable {
        let narrow = SubsetRule {
            name: "signal".to_string(),
            line_width: 1.0,
            via_up_diameter: 2.0,
            via_down_diameter: 2.0,
            spacing: 1.0,
            route_directions: route_dir::ANY,
            diff_pair_pitch: 0.0,
        };
        let wide = SubsetRule {
            name: "signal".to_string(),
            line_width: 3.0,
            via_up_diameter: 4.0,
            via_down_diameter: 4.0,
            spacing: 2.0,
            route_directions: route_dir::MANHATTAN,
            diff_pair_pitch: 0.0,
        };
        DesignRuleTable::new(vec![
            ZoneRules {
                name: "fine".to_string(),
                subsets: vec![narrow],
            },
            ZoneRules {
                name: "coarse".to_string(),
                subsets: vec![wide],
            },
        ])
    }

    #[test]
    fn radii_follow_the_matrix_formulas() {
        let t = two_zone_table();
        let m = DesignRuleTable::subset_shape_index(0, ShapeType::Trace);
        let n = DesignRuleTable::subset_shape_index(0, ShapeType::Trace);

        // DRC radius = radius_2 + max spacing: 1.5 + 2.0 across zones.
        assert!((t.drc_radius(0, m, 1, n) - 3.5).abs() < 1e-6);
        // Congestion radius adds radius_1: 0.5 + 2.0 + 1.5.
        assert!((t.cong_radius(0, m, 1, n) - 4.0).abs() < 1e-6);
        assert!((t.drc_radius_sq(0, m, 1, n) - 3.5 * 3.5).abs() < 1e-4);
        assert!((t.cong_radius_sq(0, m, 1, n) - 16.0).abs() < 1e-4);
    }

    #[test]
    fn via_radii_differ_from_trace_radii() {
        let t = two_zone_table();
        let trace = DesignRuleTable::subset_shape_index(0, ShapeType::Trace);
        let via = DesignRuleTable::subset_shape_index(0, ShapeType::ViaUp);
        assert!(t.drc_radius(0, trace, 0, via) > t.drc_radius(0, trace, 0, trace));
    }

    #[test]
    fn foreign_subset_matches_by_name() {
        let t = two_zone_table();
        let m = DesignRuleTable::subset_shape_index(0, ShapeType::Trace);
        assert_eq!(t.foreign_subset(0, m, 1), 0);
        assert_eq!(t.foreign_subset(1, m, 0), 0);
    }

    #[test]
    fn required_bits_cover_the_move_set() {
        use route_dir::*;
        assert_eq!(required_bit(1, 0, 0), EAST);
        assert_eq!(required_bit(-1, 0, 0), WEST);
        assert_eq!(required_bit(0, 1, 0), NORTH);
        assert_eq!(required_bit(0, -1, 0), SOUTH);
        assert_eq!(required_bit(1, 1, 0), NORTH_EAST);
        assert_eq!(required_bit(-1, -1, 0), SOUTH_WEST);
        assert_eq!(required_bit(2, 1, 0), KNIGHT);
        assert_eq!(required_bit(1, -2, 0), KNIGHT);
        assert_eq!(required_bit(0, 0, 1), UP);
        assert_eq!(required_bit(0, 0, -1), DOWN);
    }

    #[test]
    fn x_routing_detection() {
        use route_dir::*;
        assert!(is_x_routing_only(X_ROUTING));
        assert!(is_x_routing_only(DIAGONAL));
        assert!(!is_x_routing_only(ANY));
        assert!(!is_x_routing_only(MANHATTAN));
        assert!(!is_x_routing_only(NONE));
    }

    #[test]
    fn max_interaction_radius_is_the_table_max() {
        let t = two_zone_table();
        let global = t.max_interaction_radius();
        let via = DesignRuleTable::subset_shape_index(0, ShapeType::ViaUp);
        // Largest interaction: coarse via vs coarse via = 2 + 2 + 2.
        assert!((global - 6.0).abs() < 1e-6);
        assert!((t.cong_radius(1, via, 1, via) - 6.0).abs() < 1e-6);
        assert!(t.max_interaction_radius_between(&[0]) < global);
    }
}
