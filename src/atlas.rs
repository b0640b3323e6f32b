//! Labelled brain parcellations
//!
//! An atlas is a 3D integer label grid in Fortran order plus optional region
//! names. Regions are always enumerated in ascending label order; the masker,
//! the connectivity matrices and the gradient projection all rely on it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::Serialize;

use crate::error::{Result, VolflowError};
use crate::nifti_io::{read_nifti_file, NiftiData};

/// Maximum distance from an integer tolerated for float-encoded labels
const LABEL_TOLERANCE: f64 = 1e-3;

/// One parcel of an atlas
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub label: i64,
    pub name: Option<String>,
    pub n_voxels: usize,
}

/// Integer label image with geometry copied from its NIfTI header
#[derive(Debug, Clone)]
pub struct Atlas {
    pub labels: Vec<i64>,
    pub dims: (usize, usize, usize),
    pub voxel_size: (f64, f64, f64),
    pub affine: [f64; 16],
    pub names: BTreeMap<i64, String>,
}

impl Atlas {
    /// Build an atlas from raw labels
    pub fn from_labels(
        labels: Vec<i64>,
        dims: (usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Result<Self> {
        if labels.len() != dims.0 * dims.1 * dims.2 {
            return Err(VolflowError::ShapeMismatch(format!(
                "atlas has {} labels for dimensions {:?}",
                labels.len(),
                dims
            )));
        }
        Ok(Self {
            labels,
            dims,
            voxel_size,
            affine,
            names: BTreeMap::new(),
        })
    }

    /// Convert a loaded NIfTI volume into an atlas
    ///
    /// Values must be finite and integral (within a small tolerance, since
    /// many atlases are stored as float32).
    pub fn from_nifti(nifti: NiftiData) -> Result<Self> {
        let mut labels = Vec::with_capacity(nifti.data.len());
        for (i, &v) in nifti.data.iter().enumerate() {
            let rounded = v.round();
            if !v.is_finite() || (v - rounded).abs() > LABEL_TOLERANCE {
                return Err(VolflowError::InvalidAtlas(format!(
                    "voxel {} has non-integer label {}",
                    i, v
                )));
            }
            labels.push(rounded as i64);
        }
        Self::from_labels(labels, nifti.dims, nifti.voxel_size, nifti.affine)
    }

    /// Load an atlas from a .nii or .nii.gz file
    pub fn load(path: &Path) -> Result<Self> {
        let atlas = Self::from_nifti(read_nifti_file(path)?)?;
        log::info!(
            "Atlas {}: dims {:?}, {} voxels",
            path.display(),
            atlas.dims,
            atlas.n_voxels()
        );
        Ok(atlas)
    }

    /// Attach region names from a lookup table file
    pub fn with_label_names(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        self.names = parse_label_names(&content)?;
        Ok(self)
    }

    pub fn n_voxels(&self) -> usize {
        self.labels.len()
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Sorted distinct labels, excluding `background`
    pub fn region_labels(&self, background: i64) -> Vec<i64> {
        self.labels
            .iter()
            .copied()
            .filter(|&l| l != background)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Regions with voxel counts and names, ascending by label
    pub fn regions(&self, background: i64) -> Vec<Region> {
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for &l in &self.labels {
            if l != background {
                *counts.entry(l).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .map(|(label, n_voxels)| Region {
                label,
                name: self.names.get(&label).cloned(),
                n_voxels,
            })
            .collect()
    }
}

/// Parse a label lookup table
///
/// Rows are either `index,name` (comma or tab separated) or a bare name,
/// in which case names are numbered from 1 in file order.
fn parse_label_names(content: &str) -> Result<BTreeMap<i64, String>> {
    let delimiter = if content.contains('\t') { b'\t' } else { b',' };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let mut names = BTreeMap::new();
    let mut next_index = 1i64;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        match (record.len(), record.get(0), record.get(1)) {
            (1, Some(name), _) => {
                names.insert(next_index, name.to_string());
                next_index += 1;
            }
            (_, Some(index), Some(name)) => match index.parse::<i64>() {
                Ok(index) if name.is_empty() => {
                    return Err(VolflowError::InvalidAtlas(format!(
                        "label table row {}: label {} has an empty name",
                        row + 1,
                        index
                    )))
                }
                Ok(index) => {
                    names.insert(index, name.to_string());
                }
                // header row
                Err(_) if row == 0 => continue,
                Err(_) => {
                    return Err(VolflowError::InvalidAtlas(format!(
                        "label table row {}: '{}' is not an integer index",
                        row + 1,
                        index
                    )))
                }
            },
            _ => continue,
        }
    }
    Ok(names)
}
