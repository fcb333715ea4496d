mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stellacap", about = "Automated capture, calibration and plate solving")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or save the default configuration
    Config(commands::config::ConfigArgs),
    /// Build master bias, darks and flat from raw batches
    Masters(commands::masters::MastersArgs),
    /// Calibrate a FITS frame with the loaded masters
    Calibrate(commands::calibrate::CalibrateArgs),
    /// Plate-solve an image with PlateSolve2
    Solve(commands::solve::SolveArgs),
    /// Run the capture-and-solve loop against simulated devices
    Run(commands::run::RunArgs),
    /// Show FITS header or master directory contents
    Info(commands::info::InfoArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        // The capture loop reports per-cycle progress at info.
        let default = match cli.command {
            Commands::Run(_) => "info",
            _ => "warn",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Masters(args) => commands::masters::run(args),
        Commands::Calibrate(args) => commands::calibrate::run(args),
        Commands::Solve(args) => commands::solve::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Info(args) => commands::info::run(args),
    }
}
