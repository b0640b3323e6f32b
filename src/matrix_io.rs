//! Delimited-text matrices
//!
//! Confound regressors, gradient tables and connectivity matrices are
//! exchanged as CSV (or TSV, chosen by the `.tsv` extension or a tab in the
//! first line). A leading row with any non-numeric cell is a header.

use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use nalgebra::DMatrix;

use crate::error::{Result, VolflowError};

/// A numeric matrix with optional column names
#[derive(Debug, Clone)]
pub struct LabelledMatrix {
    pub columns: Option<Vec<String>>,
    pub data: DMatrix<f64>,
}

fn parse_cell(cell: &str) -> Option<f64> {
    match cell.to_lowercase().as_str() {
        "" | "n/a" | "na" | "nan" => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

fn delimiter_for(path: &Path, content: &str) -> u8 {
    let is_tsv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
    let first_line = content.lines().next().unwrap_or("");
    if is_tsv || first_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Parse delimited text into a matrix
pub fn parse_matrix(content: &str, delimiter: u8) -> Result<LabelledMatrix> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let mut columns = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let parsed: Option<Vec<f64>> = record.iter().map(parse_cell).collect();
        match parsed {
            Some(values) => rows.push(values),
            None if i == 0 => {
                columns = Some(record.iter().map(str::to_string).collect());
            }
            None => {
                return Err(VolflowError::InvalidParameter(format!(
                    "row {} contains a non-numeric cell",
                    i + 1
                )))
            }
        }
    }

    let ncols = rows.first().map_or_else(|| columns.as_ref().map_or(0, Vec::len), Vec::len);
    let data = DMatrix::from_fn(rows.len(), ncols, |r, c| rows[r][c]);
    Ok(LabelledMatrix { columns, data })
}

/// Read a CSV/TSV matrix file
pub fn read_matrix_csv(path: &Path) -> Result<LabelledMatrix> {
    let content = std::fs::read_to_string(path)?;
    parse_matrix(&content, delimiter_for(path, &content))
}

/// Read a confounds table, one row per timepoint
///
/// Missing cells (e.g. the first row of derivative regressors) are replaced
/// by the mean of the column's finite values.
pub fn read_confounds(path: &Path) -> Result<DMatrix<f64>> {
    let mut table = read_matrix_csv(path)?;
    fill_missing(&mut table.data)?;
    log::debug!(
        "Confounds {}: {} timepoints x {} regressors",
        path.display(),
        table.data.nrows(),
        table.data.ncols()
    );
    Ok(table.data)
}

fn fill_missing(data: &mut DMatrix<f64>) -> Result<()> {
    for j in 0..data.ncols() {
        let finite: Vec<f64> = data.column(j).iter().copied().filter(|v| v.is_finite()).collect();
        if finite.len() == data.nrows() {
            continue;
        }
        if finite.is_empty() {
            return Err(VolflowError::InvalidConfounds(format!(
                "column {} has no finite values",
                j + 1
            )));
        }
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        for v in data.column_mut(j).iter_mut() {
            if !v.is_finite() {
                *v = mean;
            }
        }
    }
    Ok(())
}

/// Write a matrix as CSV (TSV for a `.tsv` path), with an optional header row
pub fn write_matrix_csv(path: &Path, matrix: &DMatrix<f64>, header: Option<&[String]>) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter_for(path, ""))
        .from_path(path)?;
    if let Some(header) = header {
        writer.write_record(header)?;
    }
    for row in matrix.row_iter() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
