use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stellacap_core::calibration::CalibrationApplier;
use stellacap_core::io::fits::write_fits;
use stellacap_core::io::header::header_from_metadata;

use crate::summary::{print_calibration, print_store_summary};

#[derive(Args)]
pub struct CalibrateArgs {
    /// Input FITS frame
    pub file: PathBuf,

    /// Output FITS path (default: <input>_calibrated.fits)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// TOML config file (the [calibration] table is used)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding master frames
    #[arg(long)]
    pub masters: Option<PathBuf>,
}

pub fn run(args: &CalibrateArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref())?.calibration;
    if let Some(ref dir) = args.masters {
        config.master_dir = dir.clone();
    }

    let applier = CalibrationApplier::from_config(&config)
        .with_context(|| format!("Failed to load masters from {}", config.master_dir.display()))?;
    print_store_summary(&applier.store().summary());

    let outcome = applier
        .apply_file(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    print_calibration(&outcome.details);

    let output = args.output.clone().unwrap_or_else(|| {
        let stem = args
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".into());
        args.file.with_file_name(format!("{stem}_calibrated.fits"))
    });
    let header = header_from_metadata(&outcome.frame.metadata);
    write_fits(&output, &outcome.frame.data, &header)?;

    let status = outcome.status();
    println!("{}", status.message);
    println!("Saved to {}", output.display());
    Ok(())
}
