use maze_common::db::indices::PathId;
use maze_common::db::rules::ShapeType;
use maze_common::geom::coord::GridCoord;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default window for recent-DRC fractions, the "re-equilibration"
/// horizon; configurable via `num_iterations_to_reequilibrate`.
pub const N_REEQ: usize = 10;

/// Plateau window over the non-pseudo cost history.
pub const PLATEAU_WINDOW: usize = 10;
const PLATEAU_STD_FRACTION: f64 = 0.01;
const PLATEAU_SLOPE_FRACTION: f64 = 0.01;

/// A path qualifies for cost randomization once this fraction of the recent
/// window had DRCs.
pub const RANDOMIZATION_ELIGIBILITY_FRACTION: f64 = 0.4;

/// Congestion-cost randomization assigned to a path for the next iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Randomize {
    None,
    Increase,
    Decrease,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrcCategories {
    pub trace_trace: u32,
    pub via_via: u32,
    pub trace_via: u32,
}

impl DrcCategories {
    pub fn total(&self) -> u32 {
        self.trace_trace + self.via_via + self.trace_via
    }

    pub fn add(&mut self, shape_a: ShapeType, shape_b: ShapeType) {
        match (shape_a.is_via(), shape_b.is_via()) {
            (false, false) => self.trace_trace += 1,
            (true, true) => self.via_via += 1,
            _ => self.trace_via += 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DrcRecord {
    pub cell: GridCoord,
    pub path_a: PathId,
    pub shape_a: ShapeType,
    pub path_b: PathId,
    pub shape_b: ShapeType,
}

/// Per-run routing metrics: per-path and per-layer DRC counts, the symmetric
/// crossing matrix, recent-history ring buffers, plateau state and the
/// per-path randomization assignment.
pub struct RoutingMetrics {
    pub num_paths: usize,
    pub iteration: u32,
    /// Cost each path reported in the previous iteration; seeds the
    /// neighbor-shuffle of the next one.
    pub path_costs: Vec<u64>,
    pub lateral_lengths: Vec<u32>,
    pub via_counts: Vec<u32>,
    pub path_drc_cells: Vec<u32>,
    pub path_drc_categories: Vec<DrcCategories>,
    pub layer_drc_categories: Vec<DrcCategories>,
    pub randomize: Vec<Randomize>,
    pub nonpseudo_cost_history: Vec<u64>,
    pub recorded_drcs: Vec<DrcRecord>,
    pub last_algorithm_change: u32,
    pub explored_cells: u64,

    recent_path_drc: Vec<Vec<u32>>,
    recent_total_drc: Vec<u64>,
    recent_filled: usize,
    n_reeq: usize,
    crossing: Vec<AtomicU32>,
    max_recorded_drcs: usize,
}

impl RoutingMetrics {
    pub fn new(num_paths: usize, layers: u8, max_recorded_drcs: usize, n_reeq: usize) -> Self {
        let n_reeq = n_reeq.max(1);
        let mut crossing = Vec::with_capacity(num_paths * num_paths);
        crossing.resize_with(num_paths * num_paths, || AtomicU32::new(0));
        Self {
            num_paths,
            iteration: 0,
            path_costs: vec![0; num_paths],
            lateral_lengths: vec![0; num_paths],
            via_counts: vec![0; num_paths],
            path_drc_cells: vec![0; num_paths],
            path_drc_categories: vec![DrcCategories::default(); num_paths],
            layer_drc_categories: vec![DrcCategories::default(); layers as usize],
            randomize: vec![Randomize::None; num_paths],
            nonpseudo_cost_history: Vec::new(),
            recorded_drcs: Vec::new(),
            last_algorithm_change: 0,
            explored_cells: 0,
            recent_path_drc: vec![vec![0; n_reeq]; num_paths],
            recent_total_drc: vec![0; n_reeq],
            recent_filled: 0,
            n_reeq,
            crossing,
            max_recorded_drcs,
        }
    }

    /// Clears the per-evaluation counters so that evaluating an unchanged
    /// routing twice yields identical results.
    pub fn begin_evaluation(&mut self) {
        self.path_drc_cells.fill(0);
        for c in &mut self.path_drc_categories {
            *c = DrcCategories::default();
        }
        for c in &mut self.layer_drc_categories {
            *c = DrcCategories::default();
        }
        self.recorded_drcs.clear();
        for c in &self.crossing {
            c.store(0, Ordering::Relaxed);
        }
    }

    /// Symmetric crossing-matrix update, safe from parallel scan threads.
    pub fn add_crossing(&self, a: PathId, b: PathId) {
        self.crossing[a.index() * self.num_paths + b.index()].fetch_add(1, Ordering::Relaxed);
        self.crossing[b.index() * self.num_paths + a.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn crossing(&self, a: PathId, b: PathId) -> u32 {
        self.crossing[a.index() * self.num_paths + b.index()].load(Ordering::Relaxed)
    }

    pub fn record_drc(&mut self, record: DrcRecord) {
        if self.recorded_drcs.len() < self.max_recorded_drcs {
            self.recorded_drcs.push(record);
        }
    }

    /// Pushes this iteration's DRC totals into the recent-history ring
    /// buffers and the cost history used for plateau detection.
    pub fn finish_iteration(&mut self, nonpseudo_cost: u64) {
        let slot = (self.iteration as usize) % self.n_reeq;
        let mut total: u64 = 0;
        for p in 0..self.num_paths {
            self.recent_path_drc[p][slot] = self.path_drc_cells[p];
            total += self.path_drc_cells[p] as u64;
        }
        self.recent_total_drc[slot] = total;
        self.recent_filled = (self.recent_filled + 1).min(self.n_reeq);
        self.nonpseudo_cost_history.push(nonpseudo_cost);
    }

    /// Fraction of recent iterations with a DRC-free map.
    pub fn f_map(&self) -> f64 {
        if self.recent_filled == 0 {
            return 0.0;
        }
        let free = (0..self.recent_filled)
            .filter(|&i| self.recent_total_drc[i] == 0)
            .count();
        free as f64 / self.recent_filled as f64
    }

    /// Fraction of recent iterations in which this path was DRC-free.
    pub fn f_path(&self, path: PathId) -> f64 {
        if self.recent_filled == 0 {
            return 0.0;
        }
        let free = (0..self.recent_filled)
            .filter(|&i| self.recent_path_drc[path.index()][i] == 0)
            .count();
        free as f64 / self.recent_filled as f64
    }

    fn eligible_for_randomization(&self, path: PathId) -> bool {
        if self.recent_filled == 0 {
            return false;
        }
        let with_drcs = (0..self.recent_filled)
            .filter(|&i| self.recent_path_drc[path.index()][i] > 0)
            .count();
        with_drcs as f64 >= RANDOMIZATION_ELIGIBILITY_FRACTION * self.recent_filled as f64
    }

    pub fn plateau_detected(&self) -> bool {
        plateau(&self.nonpseudo_cost_history)
    }

    /// Re-rolls the per-path randomization assignment when the trigger
    /// conditions hold. Returns true when any path changed.
    pub fn update_randomization<R: Rng>(&mut self, rng: &mut R) -> bool {
        let num_paths_with_drcs = self.path_drc_cells.iter().filter(|&&d| d > 0).count();

        let min_iterations = 20.0 * (self.num_paths.max(2) as f64).log10();
        if num_paths_with_drcs <= 1
            || (self.iteration as f64) <= min_iterations
            || (self.iteration - self.last_algorithm_change) < (3 * self.n_reeq as u32) / 2
        {
            return false;
        }

        let eligible: Vec<PathId> = (0..self.num_paths)
            .map(PathId::new)
            .filter(|&p| self.eligible_for_randomization(p))
            .collect();
        let chosen = roll_randomization(rng, &eligible, num_paths_with_drcs);

        self.randomize.fill(Randomize::None);
        let changed = !chosen.is_empty();
        for (path, mode) in chosen {
            self.randomize[path.index()] = mode;
        }
        if changed {
            self.last_algorithm_change = self.iteration;
        }
        changed
    }
}

/// One iteration of the randomization dice: each eligible path is chosen
/// with probability 1/num_paths_with_drcs (the denominator is deliberately
/// the recent-DRC path count, not the total net count) and assigned
/// Increase or Decrease with equal probability.
pub fn roll_randomization<R: Rng>(
    rng: &mut R,
    eligible: &[PathId],
    num_paths_with_drcs: usize,
) -> Vec<(PathId, Randomize)> {
    let p = 1.0 / num_paths_with_drcs.max(1) as f64;
    let mut chosen = Vec::new();
    for &path in eligible {
        if rng.gen_bool(p.min(1.0)) {
            let mode = if rng.gen_bool(0.5) {
                Randomize::Increase
            } else {
                Randomize::Decrease
            };
            chosen.push((path, mode));
        }
    }
    chosen
}

/// Plateau when both the standard deviation and the least-squares slope of
/// the trailing window are near zero relative to the window mean.
pub fn plateau(history: &[u64]) -> bool {
    if history.len() < PLATEAU_WINDOW {
        return false;
    }
    let window = &history[history.len() - PLATEAU_WINDOW..];
    let n = window.len() as f64;
    let mean = window.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return true;
    }

    let variance = window
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let stddev = variance.sqrt();

    let x_mean = (n - 1.0) / 2.0;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (i, &v) in window.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (v as f64 - mean);
        var_x += dx * dx;
    }
    let slope = cov / var_x;

    stddev <= PLATEAU_STD_FRACTION * mean && slope.abs() <= PLATEAU_SLOPE_FRACTION * mean
}
