use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stellacap_core::solve::{PlateSolve2, PlateSolver, SolveHint};

use crate::summary::print_solve;

#[derive(Args)]
pub struct SolveArgs {
    /// Image to solve (FITS, PNG or TIFF)
    pub image: PathBuf,

    /// Approximate right ascension in degrees
    #[arg(long, requires = "dec")]
    pub ra: Option<f64>,

    /// Approximate declination in degrees
    #[arg(long, requires = "ra")]
    pub dec: Option<f64>,

    /// TOML config file (the [solver] and [optics] tables are used)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &SolveArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let mut hint = SolveHint::from_optics(&config.optics);
    if let (Some(ra), Some(dec)) = (args.ra, args.dec) {
        hint = hint.at(ra, dec);
    }

    println!("Solving {}", args.image.display());
    println!(
        "  Field:  {:.4}° x {:.4}°",
        hint.fov_width_deg, hint.fov_height_deg
    );

    let mut solver = PlateSolve2::new(config.solver);
    let result = solver
        .solve(&args.image, &hint)
        .with_context(|| format!("Plate solve of {} failed", args.image.display()))?;
    print_solve(&result);
    Ok(())
}
