use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Physical cell pitch; scales micron reporting only, routing is in
    /// cell units throughout.
    #[serde(default = "default_cell_size_um")]
    pub cell_size_um: f64,
    #[serde(default = "default_trace_cost_multiplier")]
    pub trace_cost_multiplier: f64,
    /// Fixed-point cost of one up/down layer change.
    #[serde(default = "default_via_cost")]
    pub via_cost: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Window for recent-DRC fractions (N_REEQ).
    #[serde(default = "default_num_iterations_to_reequilibrate")]
    pub num_iterations_to_reequilibrate: usize,
    #[serde(default = "default_max_recorded_drcs")]
    pub max_recorded_drcs: usize,
    #[serde(default = "default_max_printed_drcs")]
    pub max_printed_drcs: usize,
    #[serde(default = "default_parallel_processing")]
    pub parallel_processing: bool,
    /// 0 lets the thread pool size itself from hardware concurrency.
    #[serde(default)]
    pub num_threads: usize,
    #[serde(default = "default_congestion_evaporation_rate")]
    pub congestion_evaporation_rate: f64,
    /// Consecutive DRC-free iterations before declaring success.
    #[serde(default = "default_violation_free_threshold")]
    pub violation_free_threshold: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cell_size_um: default_cell_size_um(),
            trace_cost_multiplier: default_trace_cost_multiplier(),
            via_cost: default_via_cost(),
            max_iterations: default_max_iterations(),
            num_iterations_to_reequilibrate: default_num_iterations_to_reequilibrate(),
            max_recorded_drcs: default_max_recorded_drcs(),
            max_printed_drcs: default_max_printed_drcs(),
            parallel_processing: default_parallel_processing(),
            num_threads: 0,
            congestion_evaporation_rate: default_congestion_evaporation_rate(),
            violation_free_threshold: default_violation_free_threshold(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_png_prefix")]
    pub png_prefix: String,
    #[serde(default = "default_draw_layers")]
    pub draw_layers: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            png_prefix: default_png_prefix(),
            draw_layers: default_draw_layers(),
        }
    }
}

fn default_cell_size_um() -> f64 {
    10.0
}

fn default_trace_cost_multiplier() -> f64 {
    1.0
}

fn default_via_cost() -> u64 {
    500
}

fn default_max_iterations() -> usize {
    200
}

fn default_num_iterations_to_reequilibrate() -> usize {
    10
}

fn default_max_recorded_drcs() -> usize {
    1000
}

fn default_max_printed_drcs() -> usize {
    20
}

fn default_parallel_processing() -> bool {
    true
}

fn default_congestion_evaporation_rate() -> f64 {
    0.90
}

fn default_violation_free_threshold() -> usize {
    2
}

fn default_png_prefix() -> String {
    "output/routed".to_string()
}

fn default_draw_layers() -> bool {
    true
}
