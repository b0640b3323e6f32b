use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read NIfTI: {0}")]
    Nifti(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid atlas: {0}")]
    InvalidAtlas(String),

    #[error("Atlas has no regions (background label {0})")]
    EmptyAtlas(i64),

    #[error("Invalid confounds: {0}")]
    InvalidConfounds(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Matrix is not symmetric positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("Numerical error: {0}")]
    NumericalError(String),
}

pub type Result<T> = std::result::Result<T, VolflowError>;
