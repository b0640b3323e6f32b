//! NIfTI-1 file I/O
//!
//! Loads 3D and 4D NIfTI volumes (.nii and .nii.gz) into flat `f64` buffers
//! and writes float32 volumes back out. All buffers use Fortran order
//! (x varies fastest): `index = x + y*nx + z*nx*ny (+ t*nx*ny*nz)`.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Result, VolflowError};

/// Size of the NIfTI-1 header plus the empty extension block
const VOX_OFFSET: usize = 352;

/// A 3D volume loaded from NIfTI
#[derive(Debug, Clone)]
pub struct NiftiData {
    /// Volume data as f64
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
    /// Data scaling slope
    pub scl_slope: f64,
    /// Data scaling intercept
    pub scl_inter: f64,
}

/// A 4D timeseries volume loaded from NIfTI
#[derive(Debug, Clone)]
pub struct NiftiData4D {
    /// Frames concatenated, each frame in Fortran order
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz, nt)
    pub dims: (usize, usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
    /// Repetition time in seconds (pixdim[4])
    pub tr: f64,
}

impl NiftiData4D {
    /// Number of voxels in one frame
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Number of frames
    pub fn n_timepoints(&self) -> usize {
        self.dims.3
    }

    /// Borrow frame `t` as a flat 3D buffer
    pub fn frame(&self, t: usize) -> &[f64] {
        let n = self.n_voxels();
        &self.data[t * n..(t + 1) * n]
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn parse_object(bytes: &[u8]) -> Result<InMemNiftiObject> {
    if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if GzDecoder::new(Cursor::new(bytes))
                .read_to_end(&mut decompressed)
                .is_ok()
            {
                get_header_info(&decompressed)
            } else {
                "Could not decompress".to_string()
            };
            VolflowError::Nifti(format!("gzipped input: {} ({})", e, info))
        })
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| VolflowError::Nifti(format!("{} ({})", e, info)))
    }
}

/// Decode the volume of a parsed object into an ndarray with at least 3 axes
fn into_array(obj: InMemNiftiObject) -> Result<Array<f64, IxDyn>> {
    let ndim = obj.header().dim[0] as usize;
    if ndim < 3 {
        return Err(VolflowError::Nifti(format!(
            "Expected at least 3D volume, got {}D",
            ndim
        )));
    }

    let array: Array<f64, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| VolflowError::Nifti(format!("Failed to convert to ndarray: {}", e)))?;

    if array.ndim() < 3 {
        return Err(VolflowError::Nifti(format!(
            "Expected at least 3D array, got {}D",
            array.ndim()
        )));
    }
    Ok(array)
}

fn voxel_size(header: &NiftiHeader) -> (f64, f64, f64) {
    (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    )
}

/// Load a 3D NIfTI volume from bytes
///
/// Supports both .nii and .nii.gz files (gzip is auto-detected).
/// For 4D input only the first frame is returned.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData> {
    let obj = parse_object(bytes)?;
    let header = obj.header().clone();

    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = get_affine(&header);

    let array = into_array(obj)?;
    let shape = array.shape().to_vec();

    // Use the array shape for dimensions (nifti-rs may drop trailing axes)
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let mut data = Vec::with_capacity(nx * ny * nz);

    // Trailing axes stay at 0, which selects the first frame of 4D input
    let mut index = vec![0usize; shape.len()];
    for k in 0..nz {
        index[2] = k;
        for j in 0..ny {
            index[1] = j;
            for i in 0..nx {
                index[0] = i;
                data.push(array[index.as_slice()]);
            }
        }
    }

    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        voxel_size: voxel_size(&header),
        affine,
        scl_slope,
        scl_inter,
    })
}

/// Load a 4D NIfTI timeseries from bytes
///
/// A 3D file is returned as a single-frame series.
pub fn load_nifti_4d(bytes: &[u8]) -> Result<NiftiData4D> {
    let obj = parse_object(bytes)?;
    let header = obj.header().clone();
    let affine = get_affine(&header);
    let tr = if header.pixdim[4] > 0.0 { header.pixdim[4] as f64 } else { 1.0 };

    let array = into_array(obj)?;
    let shape = array.shape().to_vec();
    if shape.len() > 4 && shape[4..].iter().any(|&d| d > 1) {
        return Err(VolflowError::Nifti(format!(
            "Expected at most 4D volume, got shape {:?}",
            shape
        )));
    }

    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let nt = if shape.len() >= 4 { shape[3] } else { 1 };
    let mut data = Vec::with_capacity(nx * ny * nz * nt);

    let mut index = vec![0usize; shape.len()];
    for t in 0..nt {
        if shape.len() >= 4 {
            index[3] = t;
        }
        for k in 0..nz {
            index[2] = k;
            for j in 0..ny {
                index[1] = j;
                for i in 0..nx {
                    index[0] = i;
                    data.push(array[index.as_slice()]);
                }
            }
        }
    }

    Ok(NiftiData4D {
        data,
        dims: (nx, ny, nz, nt),
        voxel_size: voxel_size(&header),
        affine,
        tr,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    let mut affine = [0.0; 16];
    affine[15] = 1.0;
    if header.sform_code > 0 {
        for (row, srow) in [header.srow_x, header.srow_y, header.srow_z].iter().enumerate() {
            for (col, &v) in srow.iter().enumerate() {
                affine[row * 4 + col] = v as f64;
            }
        }
    } else {
        // no sform: scale by voxel size, origin at voxel zero
        let (vsx, vsy, vsz) = voxel_size(header);
        affine[0] = vsx;
        affine[5] = vsy;
        affine[10] = vsz;
    }
    affine
}

fn dim_to_i16(d: usize) -> Result<i16> {
    i16::try_from(d)
        .map_err(|_| VolflowError::InvalidParameter(format!("Dimension {} exceeds NIfTI-1 limit", d)))
}

/// Encode a float32 NIfTI-1 single file with `ndim` (3 or 4) dimensions
fn encode_nifti(
    data: &[f64],
    ndim: i16,
    dims: [usize; 4],
    voxel_size: (f64, f64, f64),
    tr: f64,
    affine: &[f64; 16],
) -> Result<Vec<u8>> {
    let [nx, ny, nz, nt] = dims;
    let expected = nx * ny * nz * nt;
    if data.len() != expected {
        return Err(VolflowError::ShapeMismatch(format!(
            "data has {} values, dimensions {:?} need {}",
            data.len(),
            dims,
            expected
        )));
    }
    let (vsx, vsy, vsz) = voxel_size;

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let dim: [i16; 8] = [
        ndim,
        dim_to_i16(nx)?,
        dim_to_i16(ny)?,
        dim_to_i16(nz)?,
        dim_to_i16(nt)?,
        1,
        1,
        1,
    ];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, tr as f32, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // xyzt_units: mm + sec
    header[123] = 2 | 8;

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + col] as f32).to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer.write_all(&header)?;
    buffer.write_all(&[0u8; 4])?;
    for &val in data {
        buffer.write_all(&(val as f32).to_le_bytes())?;
    }

    Ok(buffer)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn is_gz_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".nii.gz")
}

/// Save a 3D volume as NIfTI bytes
///
/// Writes an uncompressed .nii file
pub fn save_nifti(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>> {
    encode_nifti(data, 3, [dims.0, dims.1, dims.2, 1], voxel_size, 1.0, affine)
}

/// Save a 3D volume as gzipped NIfTI bytes (.nii.gz)
pub fn save_nifti_gz(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>> {
    gzip(&save_nifti(data, dims, voxel_size, affine)?)
}

/// Save a 4D series as NIfTI bytes
pub fn save_nifti_4d(volume: &NiftiData4D) -> Result<Vec<u8>> {
    let (nx, ny, nz, nt) = volume.dims;
    encode_nifti(&volume.data, 4, [nx, ny, nz, nt], volume.voxel_size, volume.tr, &volume.affine)
}

/// Save a 4D series as gzipped NIfTI bytes
pub fn save_nifti_4d_gz(volume: &NiftiData4D) -> Result<Vec<u8>> {
    gzip(&save_nifti_4d(volume)?)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        VolflowError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read file '{}': {}", path.display(), e),
        ))
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| {
        VolflowError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to write file '{}': {}", path.display(), e),
        ))
    })
}

/// Read a 3D NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    load_nifti(&read_bytes(path)?)
}

/// Read a 4D NIfTI file from a filesystem path
pub fn read_nifti_4d_file(path: &Path) -> Result<NiftiData4D> {
    let volume = load_nifti_4d(&read_bytes(path)?)?;
    log::debug!(
        "Loaded {}: dims {:?}, TR={:.3}s",
        path.display(),
        volume.dims,
        volume.tr
    );
    Ok(volume)
}

/// Save a 3D volume to a file
///
/// If the path ends with .nii.gz, the file is gzip compressed.
pub fn save_nifti_to_file(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<()> {
    let bytes = if is_gz_path(path) {
        save_nifti_gz(data, dims, voxel_size, affine)?
    } else {
        save_nifti(data, dims, voxel_size, affine)?
    };
    write_bytes(path, &bytes)
}

/// Save a 4D series to a file, gzip compressed for .nii.gz
pub fn save_nifti_4d_to_file(path: &Path, volume: &NiftiData4D) -> Result<()> {
    let bytes = if is_gz_path(path) {
        save_nifti_4d_gz(volume)?
    } else {
        save_nifti_4d(volume)?
    };
    write_bytes(path, &bytes)
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

    #[test]
    fn test_affine_prefers_sform() {
        let mut header = NiftiHeader::default();
        header.pixdim[1] = 2.0;
        header.pixdim[2] = 2.0;
        header.pixdim[3] = 2.0;
        assert_eq!(get_affine(&header)[10], 2.0);
        assert_eq!(get_affine(&header)[3], 0.0);

        // MNI-style sform with a flipped x axis
        header.sform_code = 4;
        header.srow_x = [-2.0, 0.0, 0.0, 90.0];
        header.srow_y = [0.0, 2.0, 0.0, -126.0];
        header.srow_z = [0.0, 0.0, 2.0, -72.0];
        let affine = get_affine(&header);
        assert_eq!(affine[0], -2.0);
        assert_eq!(affine[3], 90.0);
        assert_eq!(affine[7], -126.0);
        assert_eq!(affine[11], -72.0);
        assert_eq!(affine[15], 1.0);
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_header_info_small_file() {
        let info = get_header_info(&[0u8; 10]);
        assert!(info.contains("too small"));
    }

    #[test]
    fn test_save_nifti_header_fields() {
        let data = vec![0.0; 8];
        let affine = [
            1.5, 0.0, 0.0, 5.0,
            0.0, 2.5, 0.0, 10.0,
            0.0, 0.0, 3.5, 15.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let bytes = save_nifti(&data, (2, 2, 2), (1.5, 2.5, 3.5), &affine).unwrap();

        assert_eq!(bytes.len(), VOX_OFFSET + 8 * 4);
        assert_eq!(&bytes[344..348], b"n+1\0");
        assert_eq!(i16::from_le_bytes([bytes[40], bytes[41]]), 3);
        assert_eq!(i16::from_le_bytes([bytes[70], bytes[71]]), 16);
        assert_eq!(i16::from_le_bytes([bytes[254], bytes[255]]), 1);

        // srow_y[3]
        let srow_y3 = f32::from_le_bytes([bytes[308], bytes[309], bytes[310], bytes[311]]);
        assert_eq!(srow_y3, 10.0);
    }

    #[test]
    fn test_save_nifti_4d_header_fields() {
        let volume = NiftiData4D {
            data: vec![0.0; 2 * 2 * 2 * 5],
            dims: (2, 2, 2, 5),
            voxel_size: (2.0, 2.0, 2.0),
            affine: IDENTITY,
            tr: 0.8,
        };
        let bytes = save_nifti_4d(&volume).unwrap();

        assert_eq!(i16::from_le_bytes([bytes[40], bytes[41]]), 4);
        assert_eq!(i16::from_le_bytes([bytes[48], bytes[49]]), 5);
        let pixdim4 = f32::from_le_bytes([bytes[92], bytes[93], bytes[94], bytes[95]]);
        assert!((pixdim4 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_single_frame_series_stays_4d() {
        let volume = NiftiData4D {
            data: vec![1.0, 2.0, 3.0, 4.0],
            dims: (2, 2, 1, 1),
            voxel_size: (1.0, 1.0, 1.0),
            affine: IDENTITY,
            tr: 1.0,
        };
        let bytes = save_nifti_4d(&volume).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[40], bytes[41]]), 4);
        assert_eq!(i16::from_le_bytes([bytes[48], bytes[49]]), 1);

        let loaded = load_nifti_4d(&bytes).unwrap();
        assert_eq!(loaded.dims, (2, 2, 1, 1));
        assert_eq!(loaded.data, volume.data);

        let plain = save_nifti(&volume.data, (2, 2, 1), (1.0, 1.0, 1.0), &IDENTITY).unwrap();
        assert_eq!(i16::from_le_bytes([plain[40], plain[41]]), 3);
    }

    #[test]
    fn test_save_rejects_wrong_length() {
        let result = save_nifti(&[0.0; 7], (2, 2, 2), (1.0, 1.0, 1.0), &IDENTITY);
        assert!(matches!(result, Err(VolflowError::ShapeMismatch(_))));
    }

    #[test]
    fn test_load_4d_preserves_frame_order() {
        let dims = (3, 2, 2, 4);
        let n = 3 * 2 * 2;
        let data: Vec<f64> = (0..n * 4).map(|i| i as f64).collect();
        let volume = NiftiData4D {
            data: data.clone(),
            dims,
            voxel_size: (1.0, 1.0, 1.0),
            affine: IDENTITY,
            tr: 2.0,
        };

        let loaded = load_nifti_4d(&save_nifti_4d_gz(&volume).unwrap()).unwrap();
        assert_eq!(loaded.dims, dims);
        assert!((loaded.tr - 2.0).abs() < 1e-6);
        assert_eq!(loaded.frame(2)[1], data[2 * n + 1]);
        assert_eq!(loaded.data, data);
    }

    #[test]
    fn test_load_3d_from_4d_takes_first_frame() {
        let volume = NiftiData4D {
            data: (0..16).map(|i| i as f64).collect(),
            dims: (2, 2, 2, 2),
            voxel_size: (1.0, 1.0, 1.0),
            affine: IDENTITY,
            tr: 1.0,
        };
        let loaded = load_nifti(&save_nifti_4d(&volume).unwrap()).unwrap();
        assert_eq!(loaded.dims, (2, 2, 2));
        assert_eq!(loaded.data, (0..8).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_load_4d_from_3d_has_single_frame() {
        let bytes = save_nifti(&[1.0; 8], (2, 2, 2), (1.0, 1.0, 1.0), &IDENTITY).unwrap();
        let loaded = load_nifti_4d(&bytes).unwrap();
        assert_eq!(loaded.dims, (2, 2, 2, 1));
    }

    #[test]
    fn test_file_roundtrip_gz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");
        let affine = [
            1.0, 0.1, 0.2, 10.0,
            0.3, 2.0, 0.4, 20.0,
            0.5, 0.6, 3.0, 30.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let data: Vec<f64> = (0..64).map(|i| (i as f64) * 0.5 + 1.0).collect();

        save_nifti_to_file(&path, &data, (4, 4, 4), (1.0, 2.0, 3.0), &affine).unwrap();
        assert!(is_gzip(&std::fs::read(&path).unwrap()));

        let loaded = read_nifti_file(&path).unwrap();
        assert_eq!(loaded.dims, (4, 4, 4));
        assert!((loaded.voxel_size.1 - 2.0).abs() < 1e-6);
        for i in 0..16 {
            assert!((loaded.affine[i] - affine[i]).abs() < 1e-5, "affine[{}]", i);
        }
        for (a, b) in loaded.data.iter().zip(&data) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(load_nifti(&[0u8; 10]).is_err());
        assert!(load_nifti(&[0x1f, 0x8b, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_read_nonexistent_file() {
        let err = read_nifti_file(Path::new("/tmp/nonexistent_volflow_12345.nii")).unwrap_err();
        assert!(err.to_string().contains("Failed to read file"), "{}", err);
    }
}
