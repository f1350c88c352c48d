use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;

use crate::error::ConvertError;
use crate::model::TableMatrix;

/// Writes the matrix as CSV without a header row.
///
/// # Errors
///
/// Propagates file and CSV writer errors.
pub fn write_csv(path: &Path, matrix: &TableMatrix, delimiter: u8) -> Result<(), ConvertError> {
    let file = std::fs::File::create(path)?;
    write_csv_to(file, matrix, delimiter)
}

/// # Errors
///
/// Propagates writer errors, and fails if the output is not UTF-8.
pub fn write_csv_to_string(matrix: &TableMatrix, delimiter: u8) -> Result<String, ConvertError> {
    let mut bytes = Vec::new();
    write_csv_to(&mut bytes, matrix, delimiter)?;
    String::from_utf8(bytes)
        .map_err(|error| ConvertError::InvalidOption(format!("invalid utf-8 csv output: {error}")))
}

fn write_csv_to<W: Write>(sink: W, matrix: &TableMatrix, delimiter: u8) -> Result<(), ConvertError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(false)
        .from_writer(sink);
    for row in matrix.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
