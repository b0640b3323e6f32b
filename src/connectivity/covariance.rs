//! Covariance estimators
//!
//! Both estimators centre the data and normalise by the number of samples
//! (not n - 1).
//!
//! Reference:
//! Ledoit, O., Wolf, M. (2004). "A well-conditioned estimator for
//! large-dimensional covariance matrices."
//! Journal of Multivariate Analysis, 88(2):365-411.
//! https://doi.org/10.1016/S0047-259X(03)00096-4
//!
//! Reference implementation: https://github.com/scikit-learn/scikit-learn
//! (sklearn.covariance.ledoit_wolf_shrinkage)

use nalgebra::DMatrix;

/// Centre every column of `x` (samples x features)
fn centred(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows() as f64;
    let mut c = x.clone();
    for j in 0..c.ncols() {
        let mean = c.column(j).sum() / n;
        for v in c.column_mut(j).iter_mut() {
            *v -= mean;
        }
    }
    c
}

/// Maximum likelihood covariance
pub fn empirical_covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
    let c = centred(x);
    (c.transpose() * &c) / x.nrows() as f64
}

/// Ledoit-Wolf shrinkage coefficient for centred data
fn shrinkage(x: &DMatrix<f64>) -> f64 {
    let (n_samples, n_features) = x.shape();
    if n_features == 1 {
        return 0.0;
    }
    let n = n_samples as f64;
    let p = n_features as f64;

    let x2 = x.map(|v| v * v);
    let emp_cov_trace: Vec<f64> = (0..n_features).map(|j| x2.column(j).sum() / n).collect();
    let mu = emp_cov_trace.iter().sum::<f64>() / p;

    let beta_ = (x2.transpose() * &x2).sum();
    let delta_ = (x.transpose() * x).map(|v| v * v).sum() / (n * n);

    let beta = 1.0 / (p * n) * (beta_ / n - delta_);
    let delta = (delta_ - 2.0 * mu * emp_cov_trace.iter().sum::<f64>() + p * mu * mu) / p;

    // beta is at most delta, so shrinkage stays within [0, 1]
    let beta = beta.min(delta);
    if beta == 0.0 {
        0.0
    } else {
        beta / delta
    }
}

/// Ledoit-Wolf shrunk covariance
///
/// # Returns
/// `(covariance, shrinkage)` where the covariance is
/// `(1 - s) * emp_cov + s * mu * I` with `mu = trace(emp_cov) / p`.
pub fn ledoit_wolf(x: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let c = centred(x);
    let n = x.nrows() as f64;
    let p = x.ncols();

    let emp_cov = (c.transpose() * &c) / n;
    let s = shrinkage(&c);
    let mu = emp_cov.trace() / p as f64;

    let mut shrunk = emp_cov * (1.0 - s);
    for i in 0..p {
        shrunk[(i, i)] += s * mu;
    }
    (shrunk, s)
}
