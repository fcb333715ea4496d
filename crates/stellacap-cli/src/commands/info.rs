use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use stellacap_core::calibration::ReferenceStore;
use stellacap_core::io::fits::read_fits_header;

use crate::summary::print_store_summary;

#[derive(Args)]
pub struct InfoArgs {
    /// FITS file, or a directory of master frames
    pub path: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    if args.path.is_dir() {
        let store = ReferenceStore::load(&args.path)?;
        if store.is_empty() {
            println!("No master frames in {}", args.path.display());
        } else {
            print_store_summary(&store.summary());
        }
        return Ok(());
    }

    let header = read_fits_header(&args.path)?;
    println!("File:        {}", args.path.display());
    if let (Some(w), Some(h)) = (header.get_i64("NAXIS1"), header.get_i64("NAXIS2")) {
        println!("Dimensions:  {}x{}", w, h);
    }
    if let Some(planes) = header.get_i64("NAXIS3") {
        println!("Planes:      {}", planes);
    }
    println!();
    for (key, value) in header.iter() {
        println!("{:<10}= {}", key, value);
    }
    Ok(())
}
