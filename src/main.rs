use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use disaster_trade::config::PipelineConfig;
use disaster_trade::logging::{self, DataSource, LogLevel};
use disaster_trade::pipeline::{Pipeline, RunSummary};
use disaster_trade::verify;

#[derive(Debug, Parser)]
#[command(name = "disaster_trade")]
#[command(about = "Panel pipeline estimating the effect of natural disasters on exports")]
struct Cli {
    #[arg(long, global = true, default_value = "pipeline.toml")]
    config: PathBuf,

    /// Overrides `log_level` from the configuration file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every step in order
    Run {
        #[arg(long, default_value_t = false)]
        force_refresh: bool,
        #[arg(long, default_value_t = false)]
        fetch_missing: bool,
    },
    /// Step 1: load (and optionally download) export data
    Exports {
        #[arg(long, default_value_t = false)]
        clear_cache: bool,
        #[arg(long, default_value_t = false)]
        fetch_missing: bool,
    },
    /// Step 2: build the country-year disaster panels
    Disasters {
        #[arg(long, default_value_t = false)]
        clear_cache: bool,
    },
    /// Step 3: write the econometric and country datasets
    Panel,
    /// Step 4: estimate the result tables
    Analyze,
    /// Check the produced datasets and tables
    Verify,
    /// Inspect or empty the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    List,
    Clear,
}

fn print_run_summary(summary: &RunSummary, config: &PipelineConfig) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("PIPELINE SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    for step in &summary.steps {
        let mark = if step.succeeded() { "✓" } else { "✗" };
        print!("  {} {:<10} {:>7.1}s", mark, step.name, step.duration.as_secs_f64());
        if let Some(error) = &step.error {
            print!("  {}", error);
        }
        println!();
    }
    println!();
    println!("Duration: {:.1}s", summary.duration.as_secs_f64());
    println!("Datasets: {}", config.datasets_dir.display());
    println!("Results:  {}", config.results_dir.display());
    println!("Tables:   {}", config.tables_dir.display());
    let files = summary.generated_files();
    if !files.is_empty() {
        println!("Generated files:");
        for file in files {
            println!("  {}", file.display());
        }
    }
    println!(
        "Steps: {}/{} successful ({:.0}%)",
        summary.successful_steps(),
        summary.steps.len(),
        summary.success_rate() * 100.0
    );
    println!("═══════════════════════════════════════════════════════════");
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (config, source) = PipelineConfig::load(&cli.config, cli.log_level.as_deref())
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let level: LogLevel = match config.min_log_level() {
        Ok(level) => level,
        Err(e) => bail!(e),
    };
    logging::init_logger(level, config.log_file.as_deref(), false);
    source.log();
    config.log_summary();
    config
        .ensure_directories()
        .context("failed to create output directories")?;

    let pipeline = Pipeline::new(config);
    match cli.command {
        Command::Run {
            force_refresh,
            fetch_missing,
        } => {
            let summary = pipeline.run(force_refresh, fetch_missing);
            print_run_summary(&summary, pipeline.config());
            if !summary.succeeded() {
                bail!(
                    "pipeline failed: {}/{} steps succeeded",
                    summary.successful_steps(),
                    summary.steps.len()
                );
            }
        }
        Command::Exports {
            clear_cache,
            fetch_missing,
        } => {
            let exports = pipeline.collect_exports(clear_cache, fetch_missing)?;
            logging::info(
                DataSource::Exports,
                None,
                &format!("{} periods cached", exports.periods.len()),
            );
        }
        Command::Disasters { clear_cache } => {
            let datasets = pipeline.collect_disasters(clear_cache)?;
            logging::info(
                DataSource::Panel,
                None,
                &format!("{} disaster datasets ready", datasets.len()),
            );
        }
        Command::Panel => {
            for path in pipeline.build_panels()? {
                println!("{}", path.display());
            }
        }
        Command::Analyze => {
            for path in pipeline.analyze()? {
                println!("{}", path.display());
            }
        }
        Command::Verify => {
            let (report, path) = pipeline.verify()?;
            verify::print_summary(&report);
            println!("Report: {}", path.display());
        }
        Command::Cache { action } => match action {
            CacheAction::List => {
                let entries = pipeline.list_cache()?;
                if entries.is_empty() {
                    println!("cache {} is empty", pipeline.cache().dir().display());
                }
                for entry in entries {
                    let created = entry
                        .created_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("{:<40} {:>12} bytes  {}", entry.key, entry.size_bytes, created);
                }
            }
            CacheAction::Clear => {
                let removed = pipeline.clear_cache()?;
                println!("{} cache entries removed", removed);
            }
        },
    }
    Ok(())
}
