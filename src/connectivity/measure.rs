//! Connectivity measures over region timeseries
//!
//! Each subject is a (timepoints x regions) matrix. A covariance is estimated
//! per subject and turned into the requested connectivity kind. The tangent
//! kind projects every covariance onto the tangent space at the group
//! geometric mean, so with a single subject it is the zero matrix.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::covariance::{empirical_covariance, ledoit_wolf};
use super::spd::{check_spd, geometric_mean, map_eigenvalues, spd_inverse};
use crate::error::{Result, VolflowError};
use crate::signal::{standardize, Standardize};

/// Iteration cap for the tangent-space reference mean
const GMEAN_MAX_ITER: usize = 10;
const GMEAN_TOL: f64 = 1e-7;

/// Kind of connectivity matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityKind {
    #[default]
    Correlation,
    #[serde(alias = "partial correlation")]
    PartialCorrelation,
    Tangent,
    Covariance,
    Precision,
}

impl ConnectivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityKind::Correlation => "correlation",
            ConnectivityKind::PartialCorrelation => "partial correlation",
            ConnectivityKind::Tangent => "tangent",
            ConnectivityKind::Covariance => "covariance",
            ConnectivityKind::Precision => "precision",
        }
    }
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectivityKind {
    type Err = VolflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "correlation" => Ok(ConnectivityKind::Correlation),
            "partial correlation" | "partial_correlation" | "partial-correlation" => {
                Ok(ConnectivityKind::PartialCorrelation)
            }
            "tangent" => Ok(ConnectivityKind::Tangent),
            "covariance" => Ok(ConnectivityKind::Covariance),
            "precision" => Ok(ConnectivityKind::Precision),
            other => Err(VolflowError::InvalidParameter(format!(
                "unknown connectivity kind '{}' (expected correlation, partial correlation, tangent, covariance or precision)",
                other
            ))),
        }
    }
}

/// Covariance estimator used before the connectivity transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceEstimator {
    #[default]
    LedoitWolf,
    Empirical,
}

impl FromStr for CovarianceEstimator {
    type Err = VolflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ledoit_wolf" | "ledoitwolf" => Ok(CovarianceEstimator::LedoitWolf),
            "empirical" => Ok(CovarianceEstimator::Empirical),
            other => Err(VolflowError::InvalidParameter(format!(
                "unknown covariance estimator '{}'",
                other
            ))),
        }
    }
}

impl CovarianceEstimator {
    pub fn estimate(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            CovarianceEstimator::LedoitWolf => ledoit_wolf(x).0,
            CovarianceEstimator::Empirical => empirical_covariance(x),
        }
    }
}

/// Parameters for [`ConnectivityMeasure`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityParams {
    pub kind: ConnectivityKind,
    pub estimator: CovarianceEstimator,
    /// Z-score each subject's timeseries before estimating covariance
    pub standardize: bool,
    /// Return the lower triangle as a single-row matrix
    pub vectorize: bool,
    /// Drop the diagonal when vectorizing
    pub discard_diagonal: bool,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            kind: ConnectivityKind::Correlation,
            estimator: CovarianceEstimator::LedoitWolf,
            standardize: true,
            vectorize: false,
            discard_diagonal: false,
        }
    }
}

/// Covariance to correlation, with an exact unit diagonal
pub fn cov_to_corr(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let d: Vec<f64> = cov.diagonal().iter().map(|v| v.sqrt()).collect();
    if let Some(i) = d.iter().position(|&v| !(v > 0.0)) {
        return Err(VolflowError::NumericalError(format!(
            "region {} has zero variance",
            i
        )));
    }
    let mut corr = DMatrix::from_fn(cov.nrows(), cov.ncols(), |i, j| cov[(i, j)] / (d[i] * d[j]));
    corr.fill_diagonal(1.0);
    Ok(corr)
}

/// Precision to partial correlation, with an exact unit diagonal
pub fn prec_to_partial(precision: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let mut partial = cov_to_corr(precision)?;
    partial.neg_mut();
    partial.fill_diagonal(1.0);
    Ok(partial)
}

/// Lower triangle of a symmetric matrix, row by row
///
/// When the diagonal is kept it is divided by sqrt(2), so the vector norm
/// matches the matrix Frobenius norm up to a factor sqrt(2).
pub fn sym_matrix_to_vec(m: &DMatrix<f64>, discard_diagonal: bool) -> Vec<f64> {
    let n = m.nrows();
    let mut out = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        for j in 0..=i {
            if i == j {
                if !discard_diagonal {
                    out.push(m[(i, j)] / std::f64::consts::SQRT_2);
                }
            } else {
                out.push(m[(i, j)]);
            }
        }
    }
    out
}

/// Rebuild a symmetric matrix from [`sym_matrix_to_vec`] output
///
/// With `diagonal` given, `vec` is expected to exclude the diagonal.
pub fn vec_to_sym_matrix(vec: &[f64], diagonal: Option<&[f64]>) -> Result<DMatrix<f64>> {
    let len = vec.len();
    // n(n+1)/2 = len, or n(n-1)/2 = len without diagonal
    let n = match diagonal {
        Some(d) => d.len(),
        None => (((8 * len + 1) as f64).sqrt() as usize - 1) / 2,
    };
    let expected = if diagonal.is_some() { n * n.saturating_sub(1) / 2 } else { n * (n + 1) / 2 };
    if expected != len {
        return Err(VolflowError::ShapeMismatch(format!(
            "vector of length {} is not a triangular matrix of size {}",
            len, n
        )));
    }

    let mut m = DMatrix::zeros(n, n);
    let mut k = 0;
    for i in 0..n {
        for j in 0..=i {
            if i == j {
                match diagonal {
                    Some(d) => m[(i, i)] = d[i],
                    None => {
                        m[(i, i)] = vec[k] * std::f64::consts::SQRT_2;
                        k += 1;
                    }
                }
            } else {
                m[(i, j)] = vec[k];
                m[(j, i)] = vec[k];
                k += 1;
            }
        }
    }
    Ok(m)
}

/// Group connectivity estimator
#[derive(Debug, Clone)]
pub struct ConnectivityMeasure {
    pub params: ConnectivityParams,
    /// Group mean: geometric mean of covariances for tangent, arithmetic
    /// mean of the connectivity matrices otherwise
    pub mean: Option<DMatrix<f64>>,
    /// `mean^{-1/2}`, tangent kind only
    pub whitening: Option<DMatrix<f64>>,
}

impl ConnectivityMeasure {
    pub fn new(params: ConnectivityParams) -> Self {
        Self {
            params,
            mean: None,
            whitening: None,
        }
    }

    fn covariances(&self, subjects: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
        let first = subjects
            .first()
            .ok_or_else(|| VolflowError::InvalidParameter("no subjects given".to_string()))?;
        let n_regions = first.ncols();

        subjects
            .iter()
            .enumerate()
            .map(|(i, x)| {
                if x.ncols() != n_regions {
                    return Err(VolflowError::ShapeMismatch(format!(
                        "subject {} has {} regions, expected {}",
                        i,
                        x.ncols(),
                        n_regions
                    )));
                }
                if x.nrows() < 2 {
                    return Err(VolflowError::InvalidParameter(format!(
                        "subject {} has {} timepoints, need at least 2",
                        i,
                        x.nrows()
                    )));
                }
                let mut x = x.clone();
                if self.params.standardize {
                    standardize(&mut x, Standardize::ZScore);
                }
                Ok(self.params.estimator.estimate(&x))
            })
            .collect()
    }

    fn connectivity(&self, cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        match self.params.kind {
            ConnectivityKind::Covariance => Ok(cov.clone()),
            ConnectivityKind::Correlation => cov_to_corr(cov),
            ConnectivityKind::Precision => spd_inverse(cov),
            ConnectivityKind::PartialCorrelation => prec_to_partial(&spd_inverse(cov)?),
            ConnectivityKind::Tangent => {
                let whitening = self.whitening.as_ref().ok_or_else(|| {
                    VolflowError::InvalidParameter("tangent measure used before fit".to_string())
                })?;
                check_spd(cov)?;
                let whitened = whitening * cov * whitening;
                // symmetrise rounding noise before the eigen decomposition
                let whitened = (&whitened + whitened.transpose()) * 0.5;
                Ok(map_eigenvalues(&whitened, f64::ln))
            }
        }
    }

    fn output(&self, m: DMatrix<f64>) -> DMatrix<f64> {
        if self.params.vectorize {
            let v = sym_matrix_to_vec(&m, self.params.discard_diagonal);
            DMatrix::from_row_slice(1, v.len(), &v)
        } else {
            m
        }
    }

    /// Fit the group mean and return one connectivity matrix per subject
    ///
    /// # Arguments
    /// * `subjects` - Timeseries, each (timepoints x regions)
    ///
    /// # Returns
    /// Square (regions x regions) matrices, or single-row matrices when
    /// `vectorize` is set
    pub fn fit_transform(&mut self, subjects: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
        if self.params.kind == ConnectivityKind::Tangent && subjects.len() < 2 {
            return Err(VolflowError::InvalidParameter(format!(
                "tangent space embedding needs at least 2 subjects, got {}",
                subjects.len()
            )));
        }
        let covariances = self.covariances(subjects)?;
        let n = covariances[0].nrows();

        if self.params.kind == ConnectivityKind::Tangent {
            let mean = geometric_mean(&covariances, GMEAN_MAX_ITER, GMEAN_TOL)?;
            self.whitening = Some(map_eigenvalues(&mean, |v| 1.0 / v.sqrt()));
            self.mean = Some(mean);
        }

        let connectivities = covariances
            .iter()
            .map(|cov| self.connectivity(cov))
            .collect::<Result<Vec<_>>>()?;

        if self.params.kind != ConnectivityKind::Tangent {
            let sum = connectivities.iter().fold(DMatrix::zeros(n, n), |acc, c| acc + c);
            self.mean = Some(sum / connectivities.len() as f64);
        }

        log::debug!(
            "Computed {} {} matrices over {} regions",
            connectivities.len(),
            self.params.kind,
            n
        );
        Ok(connectivities.into_iter().map(|m| self.output(m)).collect())
    }

    /// Recover covariance matrices from fitted output
    ///
    /// Only kinds that keep the full covariance information can be inverted:
    /// covariance, precision and tangent. Vectorized input must keep its
    /// diagonal.
    pub fn inverse_transform(&self, connectivities: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
        if self.params.vectorize && self.params.discard_diagonal {
            return Err(VolflowError::InvalidParameter(
                "cannot invert connectivities vectorized without their diagonal".to_string(),
            ));
        }

        connectivities
            .iter()
            .map(|c| {
                let m = if self.params.vectorize {
                    vec_to_sym_matrix(c.as_slice(), None)?
                } else {
                    c.clone()
                };
                match self.params.kind {
                    ConnectivityKind::Covariance => Ok(m),
                    ConnectivityKind::Precision => spd_inverse(&m),
                    ConnectivityKind::Tangent => {
                        let mean = self.mean.as_ref().ok_or_else(|| {
                            VolflowError::InvalidParameter("tangent measure used before fit".to_string())
                        })?;
                        let mean_sqrt = map_eigenvalues(mean, f64::sqrt);
                        Ok(&mean_sqrt * map_eigenvalues(&m, f64::exp) * &mean_sqrt)
                    }
                    kind => Err(VolflowError::InvalidParameter(format!(
                        "{} matrices cannot be turned back into covariances",
                        kind
                    ))),
                }
            })
            .collect()
    }
}
