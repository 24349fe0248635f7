use crate::db::board::{BoardSpec, DiffPairDef, NetDef, Region};
use crate::db::rules::{SubsetRule, ZoneRules, route_dir};
use crate::geom::coord::GridCoord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Synthesizes a random routable board: one uniform rule zone, a sprinkling
/// of rectangular barriers, and terminal pairs kept clear of the barriers.
/// Diff pairs are emitted as adjacent net pairs at the rule pitch.
pub fn generate_random_board(
    width: u32,
    height: u32,
    layers: u8,
    num_nets: usize,
    num_diff_pairs: usize,
    barrier_fraction: f64,
    seed: u64,
) -> BoardSpec {
    let mut rng = StdRng::seed_from_u64(seed);

    let fraction = barrier_fraction.clamp(0.0, 0.4);
    log::info!(
        "Generating board: {}x{}x{}, {} nets, {} diff pairs, {:.0}% barrier",
        width,
        height,
        layers,
        num_nets,
        num_diff_pairs,
        fraction * 100.0
    );

    let pitch = 4.0;
    let zones = vec![ZoneRules {
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
    }];

    let mut barrier_regions = Vec::new();
    let target_cells = (width as f64 * height as f64 * fraction) as u64;
    let mut placed: u64 = 0;
    while placed < target_cells {
        let w = rng.gen_range(1..=(width / 8).max(2));
        let h = rng.gen_range(1..=(height / 8).max(2));
        let x0 = rng.gen_range(0..width.saturating_sub(w).max(1));
        let y0 = rng.gen_range(0..height.saturating_sub(h).max(1));
        let z = rng.gen_range(0..layers);
        barrier_regions.push(Region {
            x0,
            y0,
            x1: x0 + w - 1,
            y1: y0 + h - 1,
            z,
        });
        placed += (w as u64) * (h as u64);
    }

    let clear_of_barriers = |c: GridCoord, regions: &[Region]| {
        regions.iter().all(|r| {
            c.z != r.z
                || c.x + 3 < r.x0
                || c.x > r.x1 + 3
                || c.y + 3 < r.y0
                || c.y > r.y1 + 3
        })
    };

    let sample_terminal = |rng: &mut StdRng, regions: &[Region]| {
        for _ in 0..1000 {
            let c = GridCoord::new(
                rng.gen_range(3..width - 3),
                rng.gen_range(3..height - 3),
                rng.gen_range(0..layers),
            );
            if clear_of_barriers(c, regions) {
                return c;
            }
        }
        GridCoord::new(3, 3, 0)
    };

    let mut nets = Vec::new();
    let mut diff_pairs = Vec::new();

    for i in 0..num_diff_pairs {
        let start = sample_terminal(&mut rng, &barrier_regions);
        let end = sample_terminal(&mut rng, &barrier_regions);
        let off = (pitch / 2.0).round() as u32;
        let clamp_y = |y: u32, d: i64| -> u32 {
            (y as i64 + d).clamp(0, height as i64 - 1) as u32
        };
        for (suffix, side) in [("p", -(off as i64)), ("n", off as i64)] {
            nets.push(NetDef {
                name: format!("dp{}_{}", i, suffix),
                start: GridCoord::new(start.x, clamp_y(start.y, side), start.z),
                end: GridCoord::new(end.x, clamp_y(end.y, side), end.z),
                subsets: Vec::new(),
            });
        }
        diff_pairs.push(DiffPairDef {
            net_1: nets.len() - 2,
            net_2: nets.len() - 1,
            pn_swappable: rng.gen_bool(0.5),
        });
    }

    for i in 0..num_nets {
        let start = sample_terminal(&mut rng, &barrier_regions);
        let mut end = sample_terminal(&mut rng, &barrier_regions);
        while end == start {
            end = sample_terminal(&mut rng, &barrier_regions);
        }
        nets.push(NetDef {
            name: format!("net_{}", i),
            start,
            end,
            subsets: Vec::new(),
        });
    }

    BoardSpec {
        width,
        height,
        layers,
        zones,
        zone_regions: Vec::new(),
        barrier_regions,
        swap_zone_regions: Vec::new(),
        nets,
        diff_pairs,
    }
}
