use std::io::Write;
use std::path::Path;

use volflow::matrix_io::write_matrix_csv;
use volflow::ConnectivityResult;

/// Write JSON string to stdout or a file.
pub fn write_output(json: &str, output_path: Option<&Path>) -> Result<(), String> {
    match output_path {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| format!("Failed to write output file '{}': {}", path.display(), e)),
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .map_err(|e| format!("Failed to write to stdout: {}", e))
        }
    }
}

/// Whether `path` asks for a delimited matrix rather than JSON
pub fn is_table_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("tsv"))
}

/// Write a connectivity result as a table (square matrices get region headers)
pub fn write_table(result: &ConnectivityResult, path: &Path) -> Result<(), String> {
    let header = if result.matrix.is_square() && result.matrix.ncols() == result.regions.len() {
        Some(result.region_names())
    } else {
        None
    };
    write_matrix_csv(path, &result.matrix, header.as_deref())
        .map_err(|e| format!("Failed to write output file '{}': {}", path.display(), e))
}
