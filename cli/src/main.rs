use clap::{Parser, Subcommand};
use maze_common::db::board::BoardSpec;
use maze_common::db::indices::PathId;
use maze_common::util::config::Config;
use maze_common::util::profiler::ScopedTimer;
use maze_common::util::{generator, logger, visualization};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a board description and report routability.
    Route {
        #[arg(long, default_value = "inputs/board.toml")]
        board: String,
    },
    /// Generate a random routable board description.
    Generate {
        #[arg(long, default_value_t = 64)]
        width: u32,
        #[arg(long, default_value_t = 64)]
        height: u32,
        #[arg(long, default_value_t = 2)]
        layers: u8,
        #[arg(long, default_value_t = 10)]
        nets: usize,
        #[arg(long, default_value_t = 1)]
        diff_pairs: usize,
        #[arg(long, default_value_t = 0.05)]
        barrier_fraction: f64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value = "inputs/board.toml")]
        output: String,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    match args.command {
        Commands::Generate {
            width,
            height,
            layers,
            nets,
            diff_pairs,
            barrier_fraction,
            seed,
            output,
        } => {
            prepare_output_dir(&output)?;
            let spec = generator::generate_random_board(
                width,
                height,
                layers,
                nets,
                diff_pairs,
                barrier_fraction,
                seed,
            );
            std::fs::write(&output, toml::to_string(&spec)?)?;
            log::info!("Generated: {}", output);
        }
        Commands::Route { board } => {
            if !Path::new(&board).exists() {
                return Err(anyhow::anyhow!(
                    "Board file missing: '{}'. Did you run 'generate'?",
                    board
                ));
            }
            run_routing(&config, &board)?;
        }
    }

    Ok(())
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            log::info!("Creating output directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn run_routing(config: &Config, board_path: &str) -> anyhow::Result<()> {
    log::info!("Parsing board: {}", board_path);
    let spec_str = std::fs::read_to_string(board_path)?;
    let spec: BoardSpec = toml::from_str(&spec_str)
        .map_err(|e| anyhow::anyhow!("Invalid board syntax in '{}': {}", board_path, e))?;
    let mut board = spec.build();

    let outcome = {
        let _timer = ScopedTimer::new("routing");
        maze_router::route(&mut board, &config.router)
            .map_err(|e| anyhow::anyhow!("routing failed: {}", e))?
    };

    let cell_um = config.router.cell_size_um;
    log::info!(
        "Routed {} nets in {} iterations ({})",
        board.num_nets(),
        outcome.metrics.iteration + 1,
        if outcome.drc_free {
            "violation-free"
        } else {
            "violations remain"
        }
    );
    for p in 0..board.num_nets() {
        let path = PathId::new(p);
        if board.is_diff_pair_member(path) || !outcome.paths[p].is_empty() {
            log::info!(
                "  {}: length {:.1} um, {} vias, {} DRC cells",
                board.path_name(path),
                outcome.metrics.lateral_lengths[p] as f64 * cell_um,
                outcome.metrics.via_counts[p],
                outcome.metrics.path_drc_cells[p]
            );
        } else {
            log::warn!("  {}: NOT ROUTED", board.path_name(path));
        }
    }

    let printed = outcome
        .metrics
        .recorded_drcs
        .iter()
        .take(config.router.max_printed_drcs);
    for drc in printed {
        log::warn!(
            "DRC at ({},{},{}): {} vs {}",
            drc.cell.x,
            drc.cell.y,
            drc.cell.z,
            board.path_name(drc.path_a),
            board.path_name(drc.path_b)
        );
    }

    if config.output.draw_layers {
        prepare_output_dir(&format!("{}_layer0.png", config.output.png_prefix))?;
        log::info!("Generating routed visualization...");
        visualization::draw_routed_layers(
            &board.map,
            &outcome.paths,
            &outcome.state.start_cells,
            &config.output.png_prefix,
        );
    }

    Ok(())
}
