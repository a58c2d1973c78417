//! weather-etl CLI - Resumable weather data pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use weather_etl::pipeline::execution_plan;
use weather_etl::{Config, Pipeline, RunMode, StepRegistry};

#[derive(Parser)]
#[command(name = "weather-etl")]
#[command(version)]
#[command(about = "Resumable weather ETL: extract, transform, quality-check, analyze, load")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline, resuming from the last checkpoint
    Run {
        /// Discard existing progress and run every step
        #[arg(long)]
        restart: bool,
    },

    /// Show the run in progress and per-step checkpoints
    Status,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(debug: bool) -> Result<()> {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# weather-etl configuration file

[paths]
# All other paths are relative to root; ${VAR} is expanded from the environment
root = "data"
input_dir = "input"
input_file = "weather.json"
output_dir = "output"
state_dir = "state"
checkpoint_dir = "checkpoints"
metrics_dir = "metrics"

[steps]
execution_order = ["extract", "transform", "dq_checks", "analyze", "load"]
save_metadata = true

# A step not listed depends on the step before it
[steps.dependencies]
transform = ["extract"]
dq_checks = ["transform"]
analyze = ["dq_checks"]
load = ["analyze"]

[transform]
max_workers = 4

[cleanup]
# Keep metadata history after a successful run
retain_history = false

[lock]
# Refuse to take over a lock left by a crashed process
strict = false
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;

            let mut registry = StepRegistry::weather();
            registry.configure(&config.steps)?;
            let plan = execution_plan(&config.steps.execution_order, |step| {
                registry.dependencies_of(step)
            })?;

            info!("Configuration is valid");
            info!("  Steps: {}", plan.join(" -> "));
            info!("  Input: {}", config.paths.input_file().display());
            info!("  Output: {}", config.paths.output_dir().display());
            info!("  Transform workers: {}", config.transform.max_workers);
        }

        Commands::Status => {
            let config = load_config(&cli.config)?;
            let pipeline = Pipeline::new(config, StepRegistry::weather())?;
            print!("{}", pipeline.status()?);
        }

        Commands::Run { restart } => {
            let config = load_config(&cli.config)?;
            let output_dir = config.paths.output_dir();
            let mode = if restart { RunMode::Restart } else { RunMode::Resume };

            let mut pipeline = Pipeline::new(config, StepRegistry::weather())?;
            info!("Steps: {}", pipeline.plan().join(" -> "));

            let report = pipeline.run(mode).await.map_err(|e| {
                let context = if e.is_durability_failure() {
                    "Pipeline state could not be persisted"
                } else {
                    "Pipeline failed"
                };
                anyhow::Error::new(e).context(context)
            })?;

            println!("\n=== Pipeline {} ===", report.phase);
            println!("Run:       {}", report.run_id);
            println!("Executed:  {}", display_steps(&report.executed));
            println!("Skipped:   {}", display_steps(&report.skipped));
            println!("Runtime:   {:.2}s", report.runtime_secs);
            println!("Output:    {}", output_dir.display());
        }
    }

    Ok(())
}

fn display_steps(steps: &[String]) -> String {
    if steps.is_empty() {
        "-".to_string()
    } else {
        steps.join(", ")
    }
}
