//! Common test utilities for volflow integration tests
//!
//! Fixtures are small synthetic images written into a temporary directory:
//! a 4x3x2 atlas with regions 1, 2, 3 and 7 (zero is background) and 4D
//! series whose region signals are known sinusoids.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use volflow::nifti_io::{save_nifti_4d_to_file, save_nifti_to_file, NiftiData4D};

pub const DIMS: (usize, usize, usize) = (4, 3, 2);
pub const VOXEL_SIZE: (f64, f64, f64) = (3.0, 3.0, 3.0);
pub const AFFINE: [f64; 16] = [
    3.0, 0.0, 0.0, -6.0,
    0.0, 3.0, 0.0, -3.0,
    0.0, 0.0, 3.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Atlas labels in Fortran order
pub const LABELS: [f64; 24] = [
    0.0, 1.0, 1.0, 0.0,
    1.0, 1.0, 2.0, 2.0,
    2.0, 2.0, 0.0, 0.0,
    3.0, 3.0, 3.0, 0.0,
    7.0, 7.0, 7.0, 7.0,
    0.0, 3.0, 0.0, 0.0,
];

/// Region labels in ascending order
pub const REGIONS: [i64; 4] = [1, 2, 3, 7];

/// Signal of `region` at frame `t`; regions 1 and 2 share a driver
pub fn region_signal(region: i64, t: usize, phase: f64) -> f64 {
    let t = t as f64;
    let driver = (0.35 * t + phase).sin();
    match region {
        1 => driver + 0.25 * (1.9 * t).cos(),
        2 => 0.8 * driver + 0.3 * (1.1 * t).sin(),
        3 => (0.75 * t).cos(),
        7 => (1.4 * t + 0.5).sin() - 0.2 * (0.2 * t).cos(),
        _ => 0.0,
    }
}

/// 4D series over the fixture atlas
///
/// Background voxels hold a constant; region voxels carry the region signal
/// plus a voxel-dependent offset and a small voxel-dependent wobble.
pub fn synthetic_volume(nt: usize, phase: f64) -> NiftiData4D {
    let n = DIMS.0 * DIMS.1 * DIMS.2;
    let mut data = Vec::with_capacity(n * nt);
    for t in 0..nt {
        for (v, &label) in LABELS.iter().enumerate() {
            let label = label as i64;
            let value = if label == 0 {
                100.0
            } else {
                let wobble = 0.01 * ((v as f64 + 1.0) * 0.7 * t as f64).sin();
                10.0 + v as f64 + region_signal(label, t, phase) + wobble
            };
            data.push(value);
        }
    }
    NiftiData4D {
        data,
        dims: (DIMS.0, DIMS.1, DIMS.2, nt),
        voxel_size: VOXEL_SIZE,
        affine: AFFINE,
        tr: 2.0,
    }
}

/// Temporary directory holding fixture files
pub struct Fixture {
    pub dir: TempDir,
    pub atlas: PathBuf,
}

impl Fixture {
    /// Directory with the fixture atlas written as `atlas.nii.gz`
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let atlas = dir.path().join("atlas.nii.gz");
        save_nifti_to_file(&atlas, &LABELS, DIMS, VOXEL_SIZE, &AFFINE).unwrap();
        Fixture { dir, atlas }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a synthetic 4D series and return its path
    pub fn write_volume(&self, name: &str, nt: usize, phase: f64) -> PathBuf {
        let path = self.path(name);
        save_nifti_4d_to_file(&path, &synthetic_volume(nt, phase)).unwrap();
        path
    }

    /// Write a 3D image over the fixture grid
    pub fn write_image(&self, name: &str, data: &[f64]) -> PathBuf {
        let path = self.path(name);
        save_nifti_to_file(&path, data, DIMS, VOXEL_SIZE, &AFFINE).unwrap();
        path
    }

    /// Write a text file and return its path
    pub fn write_text(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Confound table (one column, with header) following the shared driver
pub fn driver_confounds_csv(nt: usize, phase: f64) -> String {
    let mut csv = String::from("driver\n");
    for t in 0..nt {
        csv.push_str(&format!("{}\n", (0.35 * t as f64 + phase).sin()));
    }
    csv
}

/// Pearson correlation coefficient
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file() && std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
