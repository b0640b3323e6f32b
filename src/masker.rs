//! Labels masker
//!
//! Reduces a 4D timeseries to one signal per atlas region, then cleans the
//! signals (see [`crate::signal::clean`]). The output has one row per
//! timepoint and one column per region, regions in ascending label order.

use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::atlas::{Atlas, Region};
use crate::error::{Result, VolflowError};
use crate::nifti_io::NiftiData4D;
use crate::signal::{clean, CleanParams, Standardize};

/// How voxel values within a region are reduced to one value per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReductionStrategy {
    #[default]
    Mean,
    Median,
    Sum,
    Minimum,
    Maximum,
    StandardDeviation,
    Variance,
}

impl FromStr for ReductionStrategy {
    type Err = VolflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(ReductionStrategy::Mean),
            "median" => Ok(ReductionStrategy::Median),
            "sum" => Ok(ReductionStrategy::Sum),
            "minimum" | "min" => Ok(ReductionStrategy::Minimum),
            "maximum" | "max" => Ok(ReductionStrategy::Maximum),
            "standard_deviation" | "std" => Ok(ReductionStrategy::StandardDeviation),
            "variance" | "var" => Ok(ReductionStrategy::Variance),
            other => Err(VolflowError::InvalidParameter(format!(
                "unknown reduction strategy '{}'",
                other
            ))),
        }
    }
}

impl ReductionStrategy {
    /// Reduce one region's voxel values
    pub fn reduce(&self, values: &mut [f64]) -> f64 {
        let n = values.len() as f64;
        if values.is_empty() {
            return 0.0;
        }
        match self {
            ReductionStrategy::Mean => values.iter().sum::<f64>() / n,
            ReductionStrategy::Sum => values.iter().sum(),
            ReductionStrategy::Minimum => values.iter().cloned().fold(f64::INFINITY, f64::min),
            ReductionStrategy::Maximum => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ReductionStrategy::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
            ReductionStrategy::Variance | ReductionStrategy::StandardDeviation => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                if *self == ReductionStrategy::Variance {
                    var
                } else {
                    var.sqrt()
                }
            }
        }
    }
}

/// Masker parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskerParams {
    /// Label value treated as background (default 0)
    pub background_label: i64,
    /// Region reduction (default mean)
    pub strategy: ReductionStrategy,
    /// Standardization of the extracted signals (default z-score)
    pub standardize: Standardize,
    /// Z-score confounds before regression (default true)
    pub standardize_confounds: bool,
    /// Remove linear trends before confound regression (default false)
    pub detrend: bool,
}

impl Default for MaskerParams {
    fn default() -> Self {
        Self {
            background_label: 0,
            strategy: ReductionStrategy::Mean,
            standardize: Standardize::ZScore,
            standardize_confounds: true,
            detrend: false,
        }
    }
}

impl MaskerParams {
    fn clean_params(&self) -> CleanParams {
        CleanParams {
            detrend: self.detrend,
            standardize: self.standardize,
            standardize_confounds: self.standardize_confounds,
        }
    }
}

/// Extracts region signals from 4D volumes under a fixed atlas
pub struct LabelsMasker<'a> {
    atlas: &'a Atlas,
    params: MaskerParams,
    /// Regions with their voxel indices (Fortran order)
    groups: Vec<(Region, Vec<usize>)>,
}

impl<'a> LabelsMasker<'a> {
    pub fn new(atlas: &'a Atlas, params: MaskerParams) -> Result<Self> {
        let groups = group_voxels(atlas, &params, None)?;
        Ok(Self { atlas, params, groups })
    }

    /// Restrict extraction to voxels where `mask` is non-zero
    ///
    /// Regions left without voxels are dropped.
    pub fn with_mask(mut self, mask: &[u8]) -> Result<Self> {
        if mask.len() != self.atlas.n_voxels() {
            return Err(VolflowError::ShapeMismatch(format!(
                "mask has {} voxels, atlas has {}",
                mask.len(),
                self.atlas.n_voxels()
            )));
        }
        self.groups = group_voxels(self.atlas, &self.params, Some(mask))?;
        Ok(self)
    }

    pub fn params(&self) -> &MaskerParams {
        &self.params
    }

    /// Regions in output column order
    pub fn regions(&self) -> Vec<Region> {
        self.groups.iter().map(|(r, _)| r.clone()).collect()
    }

    /// Raw per-region signals, before cleaning
    pub fn extract(&self, volume: &NiftiData4D) -> Result<DMatrix<f64>> {
        let (nx, ny, nz, nt) = volume.dims;
        if (nx, ny, nz) != self.atlas.dims() {
            return Err(VolflowError::ShapeMismatch(format!(
                "volume spatial shape {:?} does not match atlas {:?}",
                (nx, ny, nz),
                self.atlas.dims()
            )));
        }
        if volume.data.len() != nx * ny * nz * nt {
            return Err(VolflowError::ShapeMismatch(format!(
                "volume holds {} values for dimensions {:?}",
                volume.data.len(),
                volume.dims
            )));
        }

        let mut signals = DMatrix::zeros(nt, self.groups.len());
        let mut scratch = Vec::new();
        for t in 0..nt {
            let frame = volume.frame(t);
            for (r, (_, voxels)) in self.groups.iter().enumerate() {
                scratch.clear();
                scratch.extend(voxels.iter().map(|&v| frame[v]));
                signals[(t, r)] = self.params.strategy.reduce(&mut scratch);
            }
        }
        Ok(signals)
    }

    /// Extract and clean region signals
    ///
    /// # Arguments
    /// * `volume` - 4D series with the atlas' spatial shape
    /// * `confounds` - Optional regressors, one row per timepoint
    ///
    /// # Returns
    /// Matrix of shape (timepoints, regions)
    pub fn transform(
        &self,
        volume: &NiftiData4D,
        confounds: Option<&DMatrix<f64>>,
    ) -> Result<DMatrix<f64>> {
        let raw = self.extract(volume)?;
        clean(&raw, confounds, &self.params.clean_params())
    }
}

fn group_voxels(
    atlas: &Atlas,
    params: &MaskerParams,
    mask: Option<&[u8]>,
) -> Result<Vec<(Region, Vec<usize>)>> {
    let regions = atlas.regions(params.background_label);
    if regions.is_empty() {
        return Err(VolflowError::EmptyAtlas(params.background_label));
    }

    let position: std::collections::HashMap<i64, usize> = regions
        .iter()
        .enumerate()
        .map(|(i, r)| (r.label, i))
        .collect();
    let mut voxels: Vec<Vec<usize>> = vec![Vec::new(); regions.len()];
    for (v, label) in atlas.labels.iter().enumerate() {
        if mask.is_some_and(|m| m[v] == 0) {
            continue;
        }
        if let Some(&i) = position.get(label) {
            voxels[i].push(v);
        }
    }

    let mut groups = Vec::with_capacity(regions.len());
    for (mut region, voxels) in regions.into_iter().zip(voxels) {
        if voxels.is_empty() {
            log::warn!("Region {} has no voxels inside the mask; dropped", region.label);
            continue;
        }
        region.n_voxels = voxels.len();
        groups.push((region, voxels));
    }
    if groups.is_empty() {
        return Err(VolflowError::EmptyAtlas(params.background_label));
    }
    log::debug!(
        "{} regions (background label {})",
        groups.len(),
        params.background_label
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: [f64; 16] = [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];

    /// 2x2x1 atlas: voxels [0, 1, 2, 2]
    fn atlas() -> Atlas {
        Atlas::from_labels(vec![0, 1, 2, 2], (2, 2, 1), (1.0, 1.0, 1.0), IDENTITY).unwrap()
    }

    fn series(frames: &[[f64; 4]]) -> NiftiData4D {
        NiftiData4D {
            data: frames.iter().flatten().copied().collect(),
            dims: (2, 2, 1, frames.len()),
            voxel_size: (1.0, 1.0, 1.0),
            affine: IDENTITY,
            tr: 1.0,
        }
    }

    fn raw_params() -> MaskerParams {
        MaskerParams {
            standardize: Standardize::None,
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_mean_per_region() {
        let atlas = atlas();
        let masker = LabelsMasker::new(&atlas, raw_params()).unwrap();
        let volume = series(&[[100.0, 1.0, 2.0, 4.0], [100.0, 3.0, 6.0, 8.0]]);

        let signals = masker.transform(&volume, None).unwrap();
        assert_eq!(signals.shape(), (2, 2));
        assert_eq!(signals[(0, 0)], 1.0);
        assert_eq!(signals[(0, 1)], 3.0);
        assert_eq!(signals[(1, 1)], 7.0);
    }

    #[test]
    fn test_strategies() {
        let mut values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(ReductionStrategy::Median.reduce(&mut values), 2.5);
        assert_eq!(ReductionStrategy::Sum.reduce(&mut values), 10.0);
        assert_eq!(ReductionStrategy::Minimum.reduce(&mut values), 1.0);
        assert_eq!(ReductionStrategy::Maximum.reduce(&mut values), 4.0);
        assert!((ReductionStrategy::Variance.reduce(&mut values) - 1.25).abs() < 1e-12);
        assert!((ReductionStrategy::StandardDeviation.reduce(&mut values) - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_standardized_output() {
        let atlas = atlas();
        let masker = LabelsMasker::new(&atlas, MaskerParams::default()).unwrap();
        let volume = series(&[
            [0.0, 1.0, 2.0, 2.0],
            [0.0, 2.0, 4.0, 4.0],
            [0.0, 3.0, 9.0, 9.0],
        ]);
        let signals = masker.transform(&volume, None).unwrap();
        for j in 0..2 {
            let mean: f64 = signals.column(j).sum() / 3.0;
            assert!(mean.abs() < 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let atlas = atlas();
        let masker = LabelsMasker::new(&atlas, raw_params()).unwrap();
        let volume = NiftiData4D {
            data: vec![0.0; 8],
            dims: (2, 2, 2, 1),
            voxel_size: (1.0, 1.0, 1.0),
            affine: IDENTITY,
            tr: 1.0,
        };
        assert!(matches!(
            masker.transform(&volume, None),
            Err(VolflowError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_truncated_data_rejected() {
        let atlas = atlas();
        let masker = LabelsMasker::new(&atlas, raw_params()).unwrap();
        let mut volume = series(&[[0.0, 1.0, 2.0, 2.0], [0.0, 2.0, 4.0, 4.0]]);
        volume.data.truncate(6);
        assert!(matches!(
            masker.extract(&volume),
            Err(VolflowError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_mask_drops_empty_region() {
        let atlas = atlas();
        let masker = LabelsMasker::new(&atlas, raw_params())
            .unwrap()
            .with_mask(&[1, 0, 1, 1])
            .unwrap();
        let regions = masker.regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, 2);
    }

    #[test]
    fn test_empty_atlas() {
        let atlas = Atlas::from_labels(vec![0; 4], (2, 2, 1), (1.0, 1.0, 1.0), IDENTITY).unwrap();
        assert!(matches!(
            LabelsMasker::new(&atlas, MaskerParams::default()),
            Err(VolflowError::EmptyAtlas(0))
        ));
    }

    #[test]
    fn test_custom_background() {
        let atlas = atlas();
        let params = MaskerParams {
            background_label: 2,
            ..raw_params()
        };
        let masker = LabelsMasker::new(&atlas, params).unwrap();
        let labels: Vec<i64> = masker.regions().iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![0, 1]);
    }
}
