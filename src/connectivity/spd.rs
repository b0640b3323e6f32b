//! Symmetric positive definite matrix helpers
//!
//! Reference:
//! Varoquaux, G., Baronnet, F., Kleinschmidt, A., Fillard, P., Thirion, B.
//! (2010). "Detection of brain functional-connectivity difference in
//! post-stroke patients using group-level covariance modeling." MICCAI 2010.
//! https://doi.org/10.1007/978-3-642-15705-9_25

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{Result, VolflowError};

/// Absolute tolerance for the symmetry check
const SYMMETRY_TOL: f64 = 1e-7;

/// Apply `f` to the eigenvalues of a symmetric matrix: `V f(D) V^T`
pub fn map_eigenvalues<F>(m: &DMatrix<f64>, f: F) -> DMatrix<f64>
where
    F: Fn(f64) -> f64,
{
    let eig = SymmetricEigen::new(m.clone());
    form_symmetric(&eig.eigenvalues.map(f), &eig.eigenvectors)
}

fn form_symmetric(values: &DVector<f64>, vectors: &DMatrix<f64>) -> DMatrix<f64> {
    vectors * DMatrix::from_diagonal(values) * vectors.transpose()
}

/// Return an error unless `m` is square, symmetric and positive definite
pub fn check_spd(m: &DMatrix<f64>) -> Result<()> {
    if !m.is_square() {
        return Err(VolflowError::NotPositiveDefinite(format!(
            "matrix is {}x{}",
            m.nrows(),
            m.ncols()
        )));
    }
    let asymmetry = (m - m.transpose()).amax();
    if asymmetry > SYMMETRY_TOL {
        return Err(VolflowError::NotPositiveDefinite(format!(
            "matrix is not symmetric (max asymmetry {:e})",
            asymmetry
        )));
    }
    let eigenvalues = m.clone().symmetric_eigenvalues();
    let min = eigenvalues.min();
    if !(min > 0.0) {
        return Err(VolflowError::NotPositiveDefinite(format!(
            "smallest eigenvalue is {:e}",
            min
        )));
    }
    Ok(())
}

/// Inverse of an SPD matrix
pub fn spd_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_spd(m)?;
    m.clone()
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| VolflowError::NotPositiveDefinite("Cholesky factorisation failed".to_string()))
}

/// Riemannian geometric mean of SPD matrices
///
/// Gradient descent on the manifold starting from the arithmetic mean, with
/// the step halved whenever the norm of the mean log-map grows.
///
/// # Arguments
/// * `matrices` - Non-empty list of SPD matrices of equal size
/// * `max_iter` - Iteration cap (10 is enough for connectivity work)
/// * `tol` - Stop when `||mean log|| / sqrt(n) < tol`
pub fn geometric_mean(matrices: &[DMatrix<f64>], max_iter: usize, tol: f64) -> Result<DMatrix<f64>> {
    let first = matrices
        .first()
        .ok_or_else(|| VolflowError::InvalidParameter("no matrices to average".to_string()))?;
    let n = first.nrows();
    for m in matrices {
        if m.shape() != first.shape() {
            return Err(VolflowError::ShapeMismatch(format!(
                "matrices of shape {:?} and {:?}",
                first.shape(),
                m.shape()
            )));
        }
        check_spd(m)?;
    }

    let count = matrices.len() as f64;
    let mut gmean = matrices.iter().fold(DMatrix::zeros(n, n), |acc, m| acc + m) / count;
    let norm_ref = (n as f64).sqrt();
    let mut norm_old = f64::INFINITY;
    let mut step = 1.0;

    for iteration in 0..max_iter {
        let eig = SymmetricEigen::new(gmean.clone());
        let vals = &eig.eigenvalues;
        let vecs = &eig.eigenvectors;
        let gmean_inv_sqrt = form_symmetric(&vals.map(|v| 1.0 / v.sqrt()), vecs);

        let logs_mean = matrices
            .iter()
            .map(|m| map_eigenvalues(&(&gmean_inv_sqrt * m * &gmean_inv_sqrt), f64::ln))
            .fold(DMatrix::zeros(n, n), |acc, l| acc + l)
            / count;
        if logs_mean.iter().any(|v| !v.is_finite()) {
            return Err(VolflowError::NumericalError(
                "non-finite log-map in geometric mean".to_string(),
            ));
        }

        let log_eig = SymmetricEigen::new(logs_mean.clone());
        let gmean_sqrt = form_symmetric(&vals.map(f64::sqrt), vecs);
        let exp_step = form_symmetric(&log_eig.eigenvalues.map(|v| (v * step).exp()), &log_eig.eigenvectors);
        gmean = &gmean_sqrt * exp_step * &gmean_sqrt;

        let mut norm = logs_mean.norm();
        if norm < norm_old {
            norm_old = norm;
        } else if norm > norm_old {
            step /= 2.0;
            norm = norm_old;
        }
        if norm / norm_ref < tol {
            log::trace!("Geometric mean converged after {} iterations", iteration + 1);
            break;
        }
    }

    Ok(gmean)
}
