use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use stellacap_core::calibration::MasterFrameBuilder;
use stellacap_core::stack::RejectionMethod;

use crate::progress::BarReporter;
use crate::summary::print_masters_summary;

#[derive(Clone, ValueEnum)]
pub enum RejectionArg {
    SigmaClip,
    Minmax,
    Mean,
}

impl From<&RejectionArg> for RejectionMethod {
    fn from(arg: &RejectionArg) -> Self {
        match arg {
            RejectionArg::SigmaClip => RejectionMethod::SigmaClip,
            RejectionArg::Minmax => RejectionMethod::MinMax,
            RejectionArg::Mean => RejectionMethod::Mean,
        }
    }
}

#[derive(Args)]
pub struct MastersArgs {
    /// TOML config file (the [masters] table is used)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding exp_<seconds>s/ dark batches
    #[arg(long)]
    pub dark_dir: Option<PathBuf>,

    /// Directory holding raw flat frames
    #[arg(long)]
    pub flat_dir: Option<PathBuf>,

    /// Output directory for master frames
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Outlier rejection method
    #[arg(long, value_enum)]
    pub method: Option<RejectionArg>,

    /// Sigma threshold for sigma-clip rejection
    #[arg(long)]
    pub sigma: Option<f32>,
}

pub fn run(args: &MastersArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref())?.masters;
    if let Some(ref dir) = args.dark_dir {
        config.dark_dir = dir.clone();
    }
    if let Some(ref dir) = args.flat_dir {
        config.flat_dir = dir.clone();
    }
    if let Some(ref dir) = args.output {
        config.output_dir = dir.clone();
    }
    if let Some(ref method) = args.method {
        config.rejection = method.into();
    }
    if let Some(sigma) = args.sigma {
        config.sigma_threshold = sigma;
    }

    println!("Building master frames");
    println!("  Darks:   {}", config.dark_dir.display());
    println!("  Flats:   {}", config.flat_dir.display());
    println!("  Output:  {}", config.output_dir.display());
    println!("  Method:  {}", config.rejection);
    println!();

    let builder = MasterFrameBuilder::new(config);
    let reporter = BarReporter::new();
    let status = builder.build_all(&reporter);

    if let Some(ref summary) = status.data {
        print_masters_summary(summary);
    }
    if !status.is_ok() {
        bail!("{}", status.message);
    }
    println!("{}", status.message);
    Ok(())
}
