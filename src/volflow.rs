//! Volume <-> connectivity conversions
//!
//! - [`fmrivols2conn`]: 4D fMRI volumes + atlas -> functional connectivity
//!   matrix over the atlas regions
//! - [`grad2fmrivols`]: per-region gradient components + atlas -> gradient
//!   maps in volume space

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::atlas::{Atlas, Region};
use crate::config::VolflowConfig;
use crate::connectivity::{ConnectivityKind, ConnectivityMeasure, ConnectivityParams};
use crate::error::{Result, VolflowError};
use crate::masker::LabelsMasker;
use crate::matrix_io::read_confounds;
use crate::nifti_io::{read_nifti_4d_file, save_nifti_4d_to_file, save_nifti_to_file, NiftiData, NiftiData4D};

/// Connectivity matrix with its row/column regions
#[derive(Debug, Clone)]
pub struct ConnectivityResult {
    /// Regions in row order (ascending label)
    pub regions: Vec<Region>,
    pub kind: ConnectivityKind,
    /// Square matrix, or a single row when vectorized
    pub matrix: DMatrix<f64>,
}

#[derive(Serialize)]
struct ConnectivityReport<'a> {
    kind: &'static str,
    regions: &'a [Region],
    matrix: Vec<Vec<f64>>,
}

impl ConnectivityResult {
    /// Column headers: region names where known, `label_<n>` otherwise
    pub fn region_names(&self) -> Vec<String> {
        self.regions
            .iter()
            .map(|r| r.name.clone().unwrap_or_else(|| format!("label_{}", r.label)))
            .collect()
    }

    pub fn to_json(&self, compact: bool) -> Result<String> {
        let report = ConnectivityReport {
            kind: self.kind.as_str(),
            regions: &self.regions,
            matrix: self.matrix.row_iter().map(|r| r.iter().copied().collect()).collect(),
        };
        Ok(if compact {
            serde_json::to_string(&report)?
        } else {
            serde_json::to_string_pretty(&report)?
        })
    }
}

/// Connectivity from volumes using a prepared masker
///
/// Region timeseries of all volumes are averaged element-wise before the
/// connectivity measure is fitted on the averaged series.
pub fn fmrivols2conn_with_masker(
    masker: &LabelsMasker<'_>,
    volumes: &[NiftiData4D],
    confounds: Option<&[DMatrix<f64>]>,
    params: &ConnectivityParams,
) -> Result<ConnectivityResult> {
    if volumes.is_empty() {
        return Err(VolflowError::InvalidParameter("no fMRI volumes given".to_string()));
    }
    if let Some(confounds) = confounds {
        if confounds.len() != volumes.len() {
            return Err(VolflowError::InvalidConfounds(format!(
                "{} confound tables for {} volumes",
                confounds.len(),
                volumes.len()
            )));
        }
    }

    let mut mean_ts: Option<DMatrix<f64>> = None;
    for (i, volume) in volumes.iter().enumerate() {
        let ts = masker.transform(volume, confounds.map(|c| &c[i]))?;
        log::debug!("Volume {}: {} timepoints x {} regions", i, ts.nrows(), ts.ncols());
        mean_ts = Some(match mean_ts {
            None => ts,
            Some(acc) => {
                if acc.shape() != ts.shape() {
                    return Err(VolflowError::ShapeMismatch(format!(
                        "volume {} gives timeseries of shape {:?}, expected {:?}",
                        i,
                        ts.shape(),
                        acc.shape()
                    )));
                }
                acc + ts
            }
        });
    }
    let mean_ts = mean_ts.map(|sum| sum / volumes.len() as f64).ok_or_else(|| {
        VolflowError::InvalidParameter("no fMRI volumes given".to_string())
    })?;

    let mut measure = ConnectivityMeasure::new(*params);
    let matrix = measure
        .fit_transform(std::slice::from_ref(&mean_ts))?
        .pop()
        .ok_or_else(|| VolflowError::NumericalError("connectivity measure returned nothing".to_string()))?;

    let regions = masker.regions();
    log::info!(
        "{} matrix over {} regions from {} volume(s)",
        params.kind,
        regions.len(),
        volumes.len()
    );
    Ok(ConnectivityResult {
        regions,
        kind: params.kind,
        matrix,
    })
}

/// Functional connectivity matrix from one or more 4D fMRI volumes
///
/// # Arguments
/// * `volumes` - 4D series in the atlas' voxel space
/// * `atlas` - Labelled parcellation
/// * `confounds` - Optional regressors, one table per volume
/// * `config` - Masker and connectivity parameters
///
/// # Returns
/// Regions x regions connectivity matrix of the requested kind
pub fn fmrivols2conn(
    volumes: &[NiftiData4D],
    atlas: &Atlas,
    confounds: Option<&[DMatrix<f64>]>,
    config: &VolflowConfig,
) -> Result<ConnectivityResult> {
    let masker = LabelsMasker::new(atlas, config.masker)?;
    fmrivols2conn_with_masker(&masker, volumes, confounds, &config.connectivity)
}

/// [`fmrivols2conn`] reading all inputs from disk
pub fn fmrivols2conn_files<P: AsRef<Path>>(
    volume_paths: &[P],
    atlas_path: &Path,
    confound_paths: Option<&[P]>,
    config: &VolflowConfig,
) -> Result<ConnectivityResult> {
    if volume_paths.is_empty() {
        return Err(VolflowError::InvalidParameter("no fMRI volumes given".to_string()));
    }
    if let Some(paths) = confound_paths {
        if paths.len() != volume_paths.len() {
            return Err(VolflowError::InvalidConfounds(format!(
                "{} confound files for {} volumes",
                paths.len(),
                volume_paths.len()
            )));
        }
    }

    let atlas = Atlas::load(atlas_path)?;
    let volumes = volume_paths
        .iter()
        .map(|p| read_nifti_4d_file(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let confounds = confound_paths
        .map(|paths| paths.iter().map(|p| read_confounds(p.as_ref())).collect::<Result<Vec<_>>>())
        .transpose()?;

    fmrivols2conn(&volumes, &atlas, confounds.as_deref(), config)
}

/// Layout of projected gradient maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImageDim {
    /// One 4D image, components along the fourth axis
    #[default]
    #[serde(rename = "4D")]
    Concatenated4D,
    /// One 3D image per component
    #[serde(rename = "3D")]
    Separate3D,
}

impl FromStr for ImageDim {
    type Err = VolflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "4D" => Ok(ImageDim::Concatenated4D),
            "3D" => Ok(ImageDim::Separate3D),
            other => Err(VolflowError::InvalidParameter(format!(
                "image dimension must be 4D or 3D, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ImageDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageDim::Concatenated4D => f.write_str("4D"),
            ImageDim::Separate3D => f.write_str("3D"),
        }
    }
}

/// Gradient maps in volume space
#[derive(Debug, Clone)]
pub enum GradientVolumes {
    Concatenated(NiftiData4D),
    Separate(Vec<NiftiData>),
}

impl GradientVolumes {
    pub fn n_components(&self) -> usize {
        match self {
            GradientVolumes::Concatenated(v) => v.n_timepoints(),
            GradientVolumes::Separate(v) => v.len(),
        }
    }

    /// Write the maps to disk
    ///
    /// A 4D image goes to `path`; separate images go to
    /// `<stem>_gradNN<ext>` next to it, numbered from 1.
    ///
    /// # Returns
    /// Paths written
    pub fn save(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match self {
            GradientVolumes::Concatenated(volume) => {
                save_nifti_4d_to_file(path, volume)?;
                Ok(vec![path.to_path_buf()])
            }
            GradientVolumes::Separate(volumes) => volumes
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let out = component_path(path, i + 1);
                    save_nifti_to_file(&out, &v.data, v.dims, v.voxel_size, &v.affine)?;
                    Ok(out)
                })
                .collect(),
        }
    }
}

/// `dir/name.nii.gz` -> `dir/name_grad03.nii.gz`
pub fn component_path(path: &Path, component: usize) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = [".nii.gz", ".nii"]
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext).map(|s| (s.to_string(), ext.to_string())))
        .unwrap_or_else(|| (file_name.clone(), ".nii".to_string()));
    path.with_file_name(format!("{}_grad{:02}{}", stem, component, ext))
}

/// Project per-region gradient components back into the atlas' voxel space
///
/// # Arguments
/// * `gradients` - (regions x components); row j belongs to the j-th atlas
///   region in ascending label order
/// * `atlas` - Parcellation the gradients were computed on
/// * `image_dim` - One 4D image or a list of 3D images
/// * `background` - Label left at zero
///
/// # Returns
/// Gradient maps with the atlas geometry
pub fn grad2fmrivols(
    gradients: &DMatrix<f64>,
    atlas: &Atlas,
    image_dim: ImageDim,
    background: i64,
) -> Result<GradientVolumes> {
    let labels = atlas.region_labels(background);
    if labels.is_empty() {
        return Err(VolflowError::EmptyAtlas(background));
    }
    if gradients.nrows() != labels.len() {
        return Err(VolflowError::ShapeMismatch(format!(
            "gradients have {} rows, atlas has {} regions",
            gradients.nrows(),
            labels.len()
        )));
    }
    let n_components = gradients.ncols();
    if n_components == 0 {
        return Err(VolflowError::InvalidParameter("gradients have no components".to_string()));
    }

    let row_of: HashMap<i64, usize> = labels.iter().enumerate().map(|(j, &l)| (l, j)).collect();
    let n_voxels = atlas.n_voxels();

    let maps: Vec<Vec<f64>> = (0..n_components)
        .map(|c| {
            let mut map = vec![0.0; n_voxels];
            for (v, label) in atlas.labels.iter().enumerate() {
                if let Some(&row) = row_of.get(label) {
                    map[v] = gradients[(row, c)];
                }
            }
            map
        })
        .collect();

    match image_dim {
        ImageDim::Concatenated4D => {
            log::info!("Gradient maps will be concatenated within one 4D image.");
            let (nx, ny, nz) = atlas.dims;
            Ok(GradientVolumes::Concatenated(NiftiData4D {
                data: maps.concat(),
                dims: (nx, ny, nz, n_components),
                voxel_size: atlas.voxel_size,
                affine: atlas.affine,
                tr: 1.0,
            }))
        }
        ImageDim::Separate3D => {
            log::info!("Gradient maps will be provided as a list of 3D images, one per gradient.");
            Ok(GradientVolumes::Separate(
                maps.into_iter()
                    .map(|data| NiftiData {
                        data,
                        dims: atlas.dims,
                        voxel_size: atlas.voxel_size,
                        affine: atlas.affine,
                        scl_slope: 1.0,
                        scl_inter: 0.0,
                    })
                    .collect(),
            ))
        }
    }
}
