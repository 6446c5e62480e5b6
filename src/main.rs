//! GPS Heatmap
//!
//! CLI commands:
//! - render: Merge InfluxDB + GPX points and write a heatmap page
//! - entities: List entities with location history
//! - files: List available GPX files
//! - stats: Print the sampling distribution without rendering

mod config;
mod influx;
mod logging;
mod merge;
mod pipeline;
mod point;
mod render;
mod track;
mod weight;
mod window;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::window::{MAX_MONTHS, MIN_MONTHS};

#[derive(Parser)]
#[command(name = "gps_heatmap")]
#[command(about = "Density heatmap of GPS history from InfluxDB and GPX files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the settings file (JSON or YAML)
    #[arg(short, long, global = true, default_value = ".conf.json")]
    config: PathBuf,

    /// Directory for rotating log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the heatmap page
    Render {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Output HTML file
        #[arg(short, long, default_value = "heatmap.html")]
        output: PathBuf,

        /// Also export the weighted points as CSV
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// List entities with location history in the window
    Entities {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// List GPX files
    Files {
        /// Directory holding GPX files
        #[arg(long, default_value = "gpx")]
        gpx_dir: PathBuf,
    },

    /// Print per-month and per-hour sampling statistics
    Stats {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[derive(Args, Clone)]
struct WindowArgs {
    /// Months to display
    #[arg(short, long, default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(MIN_MONTHS as i64..=MAX_MONTHS as i64))]
    months: u32,

    /// HomeAssistant domain to filter on
    #[arg(long, default_value = "person")]
    domain: String,
}

#[derive(Args, Clone)]
struct SelectionArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Entity to load (defaults to the first one found)
    #[arg(short, long)]
    entity: Option<String>,

    /// Directory holding GPX files
    #[arg(long, default_value = "gpx")]
    gpx_dir: PathBuf,

    /// GPX file to use, or "all"
    #[arg(long, default_value = track::ALL_FILES)]
    gpx: String,
}

impl From<SelectionArgs> for pipeline::Selection {
    fn from(args: SelectionArgs) -> Self {
        Self {
            months: args.window.months,
            domain: args.window.domain,
            entity: args.entity,
            gpx_dir: args.gpx_dir,
            gpx: args.gpx,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = logging::init_logging(&cli.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", cli.log_dir))?;
    tracing::info!("GPS heatmap starting up");

    match cli.command {
        Commands::Render {
            selection,
            output,
            export,
        } => {
            let config = load_config(&cli.config)?;
            let result = pipeline::run(&config, &selection.into()).await?;

            let title = format!("GPS heatmap - {}", result.entity);
            render::write_map(&output, &result.points, &title)?;
            if let Some(path) = export {
                render::export_csv(&path, &result.points)?;
            }

            for ((year, month), count) in weight::monthly_counts(&result.points) {
                tracing::debug!("{year}-{month:02}: {count} points");
            }
            println!(
                "Wrote {} points for {} since {} to {}",
                result.points.len(),
                result.entity,
                result.window.start.format("%Y-%m-%d"),
                output.display()
            );
        }

        Commands::Entities { window: args } => {
            let config = load_config(&cli.config)?;
            let time_window = window::TimeWindow::ending_now(args.months)?;
            let client = influx::InfluxClient::new(&config.influxdb)?;
            let entities = client
                .discover_entities(&args.domain, &time_window)
                .await
                .context("Failed to list entities from InfluxDB")?;

            println!("Entities with '{}' history ({}):", args.domain, entities.len());
            for entity in entities {
                println!("  - {}", entity);
            }
        }

        Commands::Files { gpx_dir } => {
            let files = track::discover_files(&gpx_dir)?;
            println!("GPX files in {} ({}):", gpx_dir.display(), files.len());
            for file in files {
                println!("  - {}", file.display());
            }
        }

        Commands::Stats { selection } => {
            let config = load_config(&cli.config)?;
            let result = pipeline::run(&config, &selection.into()).await?;
            print_stats(&result);
        }
    }

    Ok(())
}

/// Load settings, then apply .env overrides
fn load_config(path: &Path) -> anyhow::Result<config::Config> {
    tracing::info!("Loading config from {:?}", path);
    let config = config::Config::load(path)
        .and_then(|c| c.with_secrets(config::Secrets::load()))
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    tracing::debug!("InfluxDB at {} (bucket {})", config.influxdb.url, config.influxdb.database);
    Ok(config)
}

/// Monthly distribution as a text bar chart, then hour bucket spread
fn print_stats(result: &pipeline::PipelineOutput) {
    let months = weight::monthly_counts(&result.points);
    let widest = months.values().copied().max().unwrap_or(1).max(1);

    println!(
        "{} points for {} since {}",
        result.points.len(),
        result.entity,
        result.window.start.format("%Y-%m-%d")
    );
    println!();
    for ((year, month), count) in &months {
        let bar = "#".repeat((count * 50).div_ceil(widest));
        println!("  {year}-{month:02} {count:>8} {bar}");
    }

    if let Some((min, max)) = result.counts.spread() {
        println!();
        println!(
            "  {} hour buckets, {} to {} points per bucket",
            result.counts.len(),
            min,
            max
        );
    }
}
