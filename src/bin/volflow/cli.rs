use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use volflow::signal::Standardize;
use volflow::{ConnectivityKind, CovarianceEstimator, ImageDim, ReductionStrategy};

#[derive(Parser)]
#[command(
    name = "volflow",
    version,
    about = "Atlas-based conversion between fMRI volumes, connectivity matrices and gradient maps",
    long_about = "Compute functional connectivity matrices from 4D fMRI volumes over an atlas \
                  parcellation, or project per-region gradients back into volume space."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Functional connectivity matrix from 4D fMRI volumes
    Conn(ConnArgs),
    /// Gradient maps in volume space from a regions x components table
    Grad2vol(Grad2volArgs),
}

#[derive(Args)]
pub struct ConnArgs {
    /// Atlas image (3D integer labels, .nii or .nii.gz)
    #[arg(long)]
    pub atlas: PathBuf,

    /// 4D fMRI volumes in the atlas' voxel space
    #[arg(long, required = true, num_args = 1..)]
    pub volumes: Vec<PathBuf>,

    /// Confound tables (CSV/TSV), one per volume
    #[arg(long, num_args = 1..)]
    pub confounds: Option<Vec<PathBuf>>,

    /// Region names ("index,name" rows or one name per line)
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Brain mask image; voxels outside are ignored
    #[arg(long)]
    pub mask: Option<PathBuf>,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Connectivity kind (correlation, partial_correlation, tangent, covariance, precision)
    #[arg(long)]
    pub kind: Option<ConnectivityKind>,

    /// Covariance estimator (ledoit_wolf, empirical)
    #[arg(long)]
    pub estimator: Option<CovarianceEstimator>,

    /// Region reduction (mean, median, sum, minimum, maximum, standard_deviation, variance)
    #[arg(long)]
    pub strategy: Option<ReductionStrategy>,

    /// Signal standardization (none, zscore, zscore_sample, psc)
    #[arg(long)]
    pub standardize: Option<Standardize>,

    /// Label value treated as background
    #[arg(long, allow_hyphen_values = true)]
    pub background: Option<i64>,

    /// Remove linear trends before confound regression
    #[arg(long)]
    pub detrend: bool,

    /// Output the lower triangle as a single row
    #[arg(long)]
    pub vectorize: bool,

    /// Drop the diagonal when vectorizing
    #[arg(long, requires = "vectorize")]
    pub discard_diagonal: bool,

    /// Output file (.csv/.tsv for a matrix, anything else for JSON; stdout if omitted)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Compact JSON output
    #[arg(long)]
    pub compact: bool,
}

#[derive(Args)]
pub struct Grad2volArgs {
    /// Atlas image the gradients were computed on
    #[arg(long)]
    pub atlas: PathBuf,

    /// Gradient table (CSV/TSV), regions x components
    #[arg(long)]
    pub gradients: PathBuf,

    /// One 4D image or one 3D image per component
    #[arg(long, default_value_t = ImageDim::Concatenated4D)]
    pub image_dim: ImageDim,

    /// Label value treated as background
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub background: i64,

    /// Output image path (.nii or .nii.gz)
    #[arg(long, short)]
    pub output: PathBuf,
}
