use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use duty_sweep::config::{Settings, SweepOverrides};
use duty_sweep::experiment::{self, Procedure, RunOptions};
use duty_sweep::scpi::Session;

#[derive(Parser)]
#[command(name = "duty-sweep")]
#[command(about = "Duty-cycle sweeps of a PWM current source with CSV logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected VISA instruments
    List {
        /// VISA resource expression
        #[arg(long, default_value = "?*INSTR")]
        filter: String,
    },

    /// Run a measurement procedure
    Run {
        procedure: Procedure,

        /// TOML bench configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// CSV file to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// First duty cycle in percent
        #[arg(long)]
        start: Option<u8>,

        /// Last duty cycle in percent (inclusive)
        #[arg(long)]
        end: Option<u8>,

        /// Readings averaged per duty cycle
        #[arg(long)]
        samples: Option<usize>,

        /// Do not wait for Enter before sweeping the PWM controller
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List { filter } => list(&filter),
        Commands::Run {
            procedure,
            config,
            output,
            start,
            end,
            samples,
            yes,
        } => {
            let settings = match &config {
                Some(path) => Settings::load(path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => Settings::default(),
            };
            let options = RunOptions {
                output,
                sweep: SweepOverrides {
                    start,
                    end,
                    samples,
                    ..Default::default()
                },
                confirm: !yes,
            };

            info!("running {:?}", procedure);
            let report = experiment::run(procedure, &settings, &options)
                .with_context(|| format!("{:?} failed", procedure))?;
            println!(
                "Measurement complete: {} rows saved to {}",
                report.rows,
                report.output.display()
            );
            Ok(())
        }
    }
}

fn list(filter: &str) -> Result<()> {
    let mut session = Session::new(Duration::from_secs(1));
    let resources = session
        .list(filter)
        .context("failed to list VISA resources")?;
    if resources.is_empty() {
        println!("No instruments found");
    }
    for resource in resources {
        println!("{}", resource);
    }
    Ok(())
}
