use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use traffic_signal_sim::simulation::{
    AdaptiveDensityParams, AdaptiveSimpleParams, FixedTimeParams, HeuristicConfig, OracleEngine,
    OracleParams, SimConfig, SimWorld, SimulationReport, WaveGreenParams,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HeuristicArg {
    #[value(name = "fixed-time")]
    FixedTime,
    #[value(name = "adaptive-simple")]
    AdaptiveSimple,
    #[value(name = "adaptive-density")]
    AdaptiveDensity,
    #[value(name = "wave-green")]
    WaveGreen,
    #[value(name = "external-oracle")]
    ExternalOracle,
}

impl HeuristicArg {
    fn matches(self, config: &HeuristicConfig) -> bool {
        matches!(
            (self, config),
            (HeuristicArg::FixedTime, HeuristicConfig::FixedTime(_))
                | (HeuristicArg::AdaptiveSimple, HeuristicConfig::AdaptiveSimple(_))
                | (HeuristicArg::AdaptiveDensity, HeuristicConfig::AdaptiveDensity(_))
                | (HeuristicArg::WaveGreen, HeuristicConfig::WaveGreen(_))
                | (HeuristicArg::ExternalOracle, HeuristicConfig::ExternalOracle(_))
        )
    }

    fn default_config(self) -> HeuristicConfig {
        match self {
            HeuristicArg::FixedTime => HeuristicConfig::FixedTime(FixedTimeParams::default()),
            HeuristicArg::AdaptiveSimple => {
                HeuristicConfig::AdaptiveSimple(AdaptiveSimpleParams::default())
            }
            HeuristicArg::AdaptiveDensity => {
                HeuristicConfig::AdaptiveDensity(AdaptiveDensityParams::default())
            }
            HeuristicArg::WaveGreen => HeuristicConfig::WaveGreen(WaveGreenParams::default()),
            HeuristicArg::ExternalOracle => HeuristicConfig::ExternalOracle(OracleParams::default()),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OracleEngineArg {
    #[value(name = "policy")]
    Policy,
    #[value(name = "ollama")]
    Ollama,
    #[value(name = "openai")]
    OpenAi,
}

impl OracleEngineArg {
    fn to_engine(self) -> OracleEngine {
        match self {
            OracleEngineArg::Policy => OracleEngine::Policy,
            OracleEngineArg::Ollama => OracleEngine::Ollama,
            OracleEngineArg::OpenAi => OracleEngine::OpenAi,
        }
    }
}

#[derive(Parser)]
#[command(name = "traffic_signal_sim")]
#[command(about = "Headless signalized grid traffic simulation")]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Phase-scheduling strategy
    #[arg(long, value_enum)]
    heuristic: Option<HeuristicArg>,

    /// Number of ticks to simulate
    #[arg(long)]
    ticks: Option<u64>,

    #[arg(long)]
    rows: Option<u32>,

    #[arg(long)]
    cols: Option<u32>,

    /// Seed of the spawn generator
    #[arg(long)]
    seed: Option<u64>,

    /// Spawn probability per boundary lane per tick
    #[arg(long)]
    spawn_rate: Option<f64>,

    /// Green duration of the fixed-time strategy (also used as a fallback)
    #[arg(long)]
    green: Option<u32>,

    #[arg(long)]
    yellow: Option<u32>,

    #[arg(long)]
    min_green: Option<u32>,

    #[arg(long, value_enum)]
    oracle_engine: Option<OracleEngineArg>,

    /// Model name for language-model engines, artifact path for the policy engine
    #[arg(long)]
    oracle_model: Option<String>,

    #[arg(long)]
    oracle_endpoint: Option<String>,

    #[arg(long)]
    oracle_timeout_ms: Option<u64>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Include every finished trip in the report
    #[arg(long)]
    detailed: bool,

    /// Print the signal map every N ticks (0 disables)
    #[arg(long, default_value = "0")]
    print_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    let mut world = SimWorld::new(config).context("Failed to build the simulation")?;
    let report = run_headless(&mut world, cli.print_every)?;

    let json = report.to_json().context("Failed to serialize the report")?;
    match &cli.report {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<SimConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn build_config(cli: &Cli) -> Result<SimConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SimConfig::default(),
    };

    if let Some(ticks) = cli.ticks {
        config.duration_ticks = ticks;
    }
    if let Some(rows) = cli.rows {
        config.rows = rows;
    }
    if let Some(cols) = cli.cols {
        config.cols = cols;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(rate) = cli.spawn_rate {
        config.spawn_probability = rate;
    }
    if let Some(yellow) = cli.yellow {
        config.signal.yellow_ticks = yellow;
    }
    if let Some(min_green) = cli.min_green {
        config.signal.min_green_ticks = min_green;
    }
    if cli.detailed {
        config.detailed_report = true;
    }

    if let Some(heuristic) = cli.heuristic {
        if !heuristic.matches(&config.heuristic) {
            config.heuristic = heuristic.default_config();
        }
    }
    if let Some(green) = cli.green {
        set_fixed_green(&mut config.heuristic, green);
    }
    if let HeuristicConfig::ExternalOracle(params) = &mut config.heuristic {
        if let Some(engine) = cli.oracle_engine {
            params.engine = engine.to_engine();
        }
        if let Some(model) = &cli.oracle_model {
            params.model = model.clone();
        }
        if let Some(endpoint) = &cli.oracle_endpoint {
            params.endpoint = Some(endpoint.clone());
        }
        if let Some(timeout) = cli.oracle_timeout_ms {
            params.timeout_ms = timeout;
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Apply `--green` to the fixed-time strategy, directly or as an oracle fallback
fn set_fixed_green(heuristic: &mut HeuristicConfig, green: u32) {
    match heuristic {
        HeuristicConfig::FixedTime(params) => params.green_ticks = green,
        HeuristicConfig::ExternalOracle(params) => set_fixed_green(&mut params.fallback, green),
        _ => {}
    }
}

/// Run the simulation in headless mode (no renderer)
fn run_headless(world: &mut SimWorld, print_every: u64) -> Result<SimulationReport> {
    let duration = world.config().duration_ticks;
    info!(
        "Running {} ticks of {:.2}s with strategy {}",
        duration,
        world.config().tick_seconds,
        world.strategy_name()
    );

    while world.current_tick() < duration {
        world.tick().context("Simulation tick failed")?;
        if print_every > 0 && world.current_tick() % print_every == 0 {
            info!(
                "Tick {}: {} vehicles in system, {} exited",
                world.current_tick(),
                world.registry().in_system(),
                world.registry().exited()
            );
            world.draw_map();
        }
    }

    let report = world.report();
    if print_every > 0 {
        world.print_summary();
    }
    log_summary(&report);
    Ok(report)
}

fn log_summary(report: &SimulationReport) {
    info!("=== SIMULATION COMPLETE ===");
    info!("Heuristic: {}", report.heuristic);
    info!("Ticks: {}", report.duration_ticks);
    info!("Vehicles spawned: {}", report.vehicles_spawned);
    info!("Vehicles exited: {}", report.vehicles_exited);
    info!("Vehicles in system: {}", report.vehicles_in_system);
    info!("Dropped spawns: {}", report.dropped_spawns);
    info!("Mean wait: {:.2} ticks", report.mean_wait_ticks);
    info!("Mean travel time: {:.2} ticks", report.mean_travel_ticks);
    info!("Throughput: {:.3} vehicles/tick", report.throughput);
    info!(
        "Exit rate: {:.1}%",
        if report.vehicles_spawned > 0 {
            report.vehicles_exited as f64 / report.vehicles_spawned as f64 * 100.0
        } else {
            0.0
        }
    );
    if let Some(oracle) = &report.oracle {
        info!(
            "Oracle: {} queries, {} timeouts, {} failures, {} fallbacks",
            oracle.queries, oracle.timeouts, oracle.failures, oracle.fallbacks
        );
    }
}
