//! Timeseries cleaning
//!
//! Signals are `DMatrix<f64>` with one row per timepoint and one column per
//! signal. Cleaning runs in a fixed order: detrending (signals and
//! confounds), projection of the confound column space out of the signals,
//! then standardization.

use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolflowError};

/// Signal standardization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Standardize {
    /// Leave signals untouched
    None,
    /// Centre and divide by the population standard deviation
    #[default]
    ZScore,
    /// Centre and divide by the sample standard deviation (n - 1)
    ZScoreSample,
    /// Percent signal change relative to the column mean
    Psc,
}

impl FromStr for Standardize {
    type Err = VolflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "false" => Ok(Standardize::None),
            "zscore" | "true" => Ok(Standardize::ZScore),
            "zscore_sample" => Ok(Standardize::ZScoreSample),
            "psc" => Ok(Standardize::Psc),
            other => Err(VolflowError::InvalidParameter(format!(
                "unknown standardization '{}'",
                other
            ))),
        }
    }
}

/// Parameters for [`clean`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanParams {
    pub detrend: bool,
    pub standardize: Standardize,
    pub standardize_confounds: bool,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            detrend: false,
            standardize: Standardize::ZScore,
            standardize_confounds: true,
        }
    }
}

fn column_mean(signals: &DMatrix<f64>, j: usize) -> f64 {
    signals.column(j).sum() / signals.nrows() as f64
}

/// Remove the mean and the least-squares linear trend of every column
pub fn detrend(signals: &mut DMatrix<f64>) {
    let n = signals.nrows();
    if n == 0 {
        return;
    }

    // Centred, unit-norm ramp
    let centre = (n as f64 - 1.0) / 2.0;
    let mut ramp: Vec<f64> = (0..n).map(|t| t as f64 - centre).collect();
    let norm = ramp.iter().map(|r| r * r).sum::<f64>().sqrt();
    let norm = if norm < f64::EPSILON { 1.0 } else { norm };
    for r in ramp.iter_mut() {
        *r /= norm;
    }

    for j in 0..signals.ncols() {
        let mean = column_mean(signals, j);
        let mut projection = 0.0;
        for t in 0..n {
            signals[(t, j)] -= mean;
            projection += ramp[t] * signals[(t, j)];
        }
        for t in 0..n {
            signals[(t, j)] -= ramp[t] * projection;
        }
    }
}

/// Standardize every column in place
pub fn standardize(signals: &mut DMatrix<f64>, strategy: Standardize) {
    let n = signals.nrows();
    if strategy == Standardize::None {
        return;
    }
    if n <= 1 {
        log::warn!("Standardization of a single timepoint would zero the signal; skipping");
        return;
    }

    for j in 0..signals.ncols() {
        let mean = column_mean(signals, j);
        match strategy {
            Standardize::None => {}
            Standardize::ZScore | Standardize::ZScoreSample => {
                let ddof = if strategy == Standardize::ZScoreSample { 1.0 } else { 0.0 };
                let ss: f64 = signals.column(j).iter().map(|v| (v - mean).powi(2)).sum();
                let mut std = (ss / (n as f64 - ddof)).sqrt();
                if std < f64::EPSILON {
                    std = 1.0;
                }
                for t in 0..n {
                    signals[(t, j)] = (signals[(t, j)] - mean) / std;
                }
            }
            Standardize::Psc => {
                if mean.abs() < f64::EPSILON {
                    for t in 0..n {
                        signals[(t, j)] = 0.0;
                    }
                } else {
                    for t in 0..n {
                        signals[(t, j)] = (signals[(t, j)] - mean) / mean.abs() * 100.0;
                    }
                }
            }
        }
    }
}

/// Project the column space of `confounds` out of `signals`
///
/// Rank-deficient confounds are handled by keeping only left singular
/// vectors whose singular value is above `max(s) * max(n, k) * eps`.
pub fn regress_out(signals: &mut DMatrix<f64>, confounds: &DMatrix<f64>) -> Result<()> {
    if confounds.ncols() == 0 {
        return Ok(());
    }

    let svd = confounds.clone().svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| VolflowError::NumericalError("SVD of confounds failed".to_string()))?;
    let s = &svd.singular_values;
    let s_max = s.iter().cloned().fold(0.0f64, f64::max);
    let tol = s_max * confounds.nrows().max(confounds.ncols()) as f64 * f64::EPSILON;

    let kept: Vec<usize> = (0..s.len()).filter(|&i| s[i] > tol).collect();
    if kept.is_empty() {
        log::warn!("Confounds have rank 0; nothing regressed out");
        return Ok(());
    }
    if kept.len() < confounds.ncols() {
        log::debug!(
            "Confounds are rank deficient: {} of {} columns kept",
            kept.len(),
            confounds.ncols()
        );
    }

    let basis = u.select_columns(kept.iter());
    let coefficients = basis.transpose() * &*signals;
    *signals -= basis * coefficients;
    Ok(())
}

/// Clean signals: detrend, remove confounds, standardize
pub fn clean(
    signals: &DMatrix<f64>,
    confounds: Option<&DMatrix<f64>>,
    params: &CleanParams,
) -> Result<DMatrix<f64>> {
    let mut signals = signals.clone();

    let confounds = match confounds {
        Some(c) => {
            if c.nrows() != signals.nrows() {
                return Err(VolflowError::InvalidConfounds(format!(
                    "confounds have {} rows, signals have {} timepoints",
                    c.nrows(),
                    signals.nrows()
                )));
            }
            if c.iter().any(|v| !v.is_finite()) {
                return Err(VolflowError::InvalidConfounds(
                    "confounds contain non-finite values".to_string(),
                ));
            }
            Some(c.clone())
        }
        None => None,
    };

    if params.detrend {
        detrend(&mut signals);
    }

    if let Some(mut confounds) = confounds {
        if params.detrend {
            detrend(&mut confounds);
        }
        if params.standardize_confounds {
            standardize(&mut confounds, Standardize::ZScore);
        }
        regress_out(&mut signals, &confounds)?;
    }

    standardize(&mut signals, params.standardize);
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_signals() -> DMatrix<f64> {
        // column 0: linear trend, column 1: constant
        DMatrix::from_fn(10, 2, |t, j| if j == 0 { 2.0 * t as f64 + 1.0 } else { 5.0 })
    }

    #[test]
    fn test_detrend_removes_linear_trend() {
        let mut s = ramp_signals();
        detrend(&mut s);
        assert!(s.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn test_zscore_unit_variance() {
        let mut s = DMatrix::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        standardize(&mut s, Standardize::ZScore);
        let mean: f64 = s.iter().sum::<f64>() / 4.0;
        let var: f64 = s.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_sample_uses_n_minus_one() {
        let mut s = DMatrix::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        standardize(&mut s, Standardize::ZScoreSample);
        let var: f64 = s.iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_becomes_zero() {
        let mut s = ramp_signals();
        standardize(&mut s, Standardize::ZScore);
        assert!(s.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_psc() {
        let mut s = DMatrix::from_column_slice(2, 2, &[90.0, 110.0, 0.0, 0.0]);
        standardize(&mut s, Standardize::Psc);
        assert!((s[(0, 0)] + 10.0).abs() < 1e-12);
        assert!((s[(1, 0)] - 10.0).abs() < 1e-12);
        assert_eq!(s[(0, 1)], 0.0);
    }

    #[test]
    fn test_single_timepoint_is_left_alone() {
        let mut s = DMatrix::from_row_slice(1, 2, &[3.0, 4.0]);
        standardize(&mut s, Standardize::ZScore);
        assert_eq!(s[(0, 1)], 4.0);
    }

    #[test]
    fn test_regress_out_removes_confound() {
        let n = 50;
        let confound = DMatrix::from_fn(n, 1, |t, _| (t as f64 * 0.3).sin());
        let other = DMatrix::from_fn(n, 1, |t, _| (t as f64 * 0.7).cos());
        let mut signals = DMatrix::from_fn(n, 1, |t, _| 3.0 * confound[(t, 0)] + other[(t, 0)]);

        regress_out(&mut signals, &confound).unwrap();

        let dot: f64 = signals.iter().zip(confound.iter()).map(|(a, b)| a * b).sum();
        assert!(dot.abs() < 1e-9, "residual still correlates with confound: {}", dot);
    }

    #[test]
    fn test_regress_out_rank_deficient() {
        let n = 20;
        let c = DMatrix::from_fn(n, 2, |t, _| t as f64);
        let mut signals = DMatrix::from_fn(n, 1, |t, _| t as f64 * 2.0);
        regress_out(&mut signals, &c).unwrap();
        assert!(signals.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_clean_rejects_mismatched_confounds() {
        let signals = DMatrix::zeros(10, 2);
        let confounds = DMatrix::zeros(9, 1);
        let err = clean(&signals, Some(&confounds), &CleanParams::default()).unwrap_err();
        assert!(matches!(err, VolflowError::InvalidConfounds(_)));
    }

    #[test]
    fn test_clean_rejects_nan_confounds() {
        let signals = DMatrix::zeros(3, 1);
        let confounds = DMatrix::from_column_slice(3, 1, &[1.0, f64::NAN, 2.0]);
        assert!(clean(&signals, Some(&confounds), &CleanParams::default()).is_err());
    }

    #[test]
    fn test_standardize_from_str() {
        assert_eq!("zscore".parse::<Standardize>().unwrap(), Standardize::ZScore);
        assert_eq!("PSC".parse::<Standardize>().unwrap(), Standardize::Psc);
        assert!("minmax".parse::<Standardize>().is_err());
    }
}
