//! volflow: atlas-based conversion between fMRI volumes, functional
//! connectivity matrices and gradient maps
//!
//! # Modules
//! - `nifti_io`: NIfTI-1 reading and writing (3D and 4D, .nii and .nii.gz)
//! - `atlas`: labelled parcellations
//! - `signal`: detrending, standardization and confound regression
//! - `masker`: region timeseries extraction
//! - `connectivity`: covariance estimators and connectivity measures
//! - `matrix_io`: CSV/TSV matrices (confounds, gradients, FC output)
//! - `config`: JSON-backed run configuration
//! - `volflow`: `fmrivols2conn` and `grad2fmrivols`

pub mod error;

// I/O modules
pub mod nifti_io;
pub mod matrix_io;

// Processing modules
pub mod atlas;
pub mod signal;
pub mod masker;
pub mod connectivity;

pub mod config;
pub mod volflow;

pub use atlas::{Atlas, Region};
pub use config::VolflowConfig;
pub use connectivity::{ConnectivityKind, ConnectivityMeasure, ConnectivityParams, CovarianceEstimator};
pub use error::{Result, VolflowError};
pub use masker::{LabelsMasker, MaskerParams, ReductionStrategy};
pub use volflow::{
    fmrivols2conn, fmrivols2conn_files, fmrivols2conn_with_masker, grad2fmrivols, ConnectivityResult,
    GradientVolumes, ImageDim,
};
