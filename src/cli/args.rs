//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the crop command
#[derive(Args, Debug)]
pub struct CropArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Library directory the result is saved into
    #[arg(short, long)]
    pub library: Option<PathBuf>,

    /// Directory for the intermediate encode
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Output the save report in JSON format
    #[arg(long)]
    pub json: bool,
}
