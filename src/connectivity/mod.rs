//! Functional connectivity estimation
//!
//! - `covariance`: empirical and Ledoit-Wolf covariance estimators
//! - `spd`: eigenvalue maps, SPD checks and the Riemannian geometric mean
//! - `measure`: correlation, partial correlation, tangent, covariance and
//!   precision matrices over region timeseries

pub mod covariance;
pub mod measure;
pub mod spd;

pub use covariance::{empirical_covariance, ledoit_wolf};
pub use measure::{
    cov_to_corr, prec_to_partial, sym_matrix_to_vec, vec_to_sym_matrix, ConnectivityKind,
    ConnectivityMeasure, ConnectivityParams, CovarianceEstimator,
};
pub use spd::{check_spd, geometric_mean, map_eigenvalues, spd_inverse};
