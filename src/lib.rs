mod assemble;
mod csv_out;
mod decode;
mod detect;
mod error;
mod extract;
mod model;
mod options;
mod pipeline;
mod preprocess;
mod recognize;
mod resolve;
mod scripted;
mod tesseract;
mod warning;

#[cfg(test)]
mod test_support;

use std::path::Path;

use image::DynamicImage;
use serde::Serialize;
use tracing::info;

pub use assemble::assemble;
pub use csv_out::{write_csv, write_csv_to_string};
pub use decode::{InputFormat, decode_image};
pub use detect::detect_separators;
pub use error::ConvertError;
pub use extract::extract_cells;
pub use model::{
    Axis, CellCoord, CellImage, CellRegion, Grid, Image, Recognition, SeparatorLine,
    SeparatorSource, TableMatrix,
};
pub use options::{ExtractOptions, TableArea};
pub use pipeline::{
    BatchJob, BatchResult, convert_batch, convert_image_bytes_to_csv_string,
    convert_image_to_csv, convert_segmentation,
};
pub use preprocess::preprocess;
pub use recognize::{
    MissReason, MissingCell, RecognitionOutcome, Recognizer, RecognizerError, recognize_cells,
};
pub use resolve::resolve_grid;
pub use scripted::{ScriptedRecognizer, ScriptedResponse};
pub use tesseract::TesseractRecognizer;
pub use warning::{ExtractWarning, WarningCode as ExtractWarningCode};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub rows: usize,
    pub cols: usize,
    pub cell_count: usize,
    pub warnings: Vec<ExtractWarning>,
}

/// Output of the geometric stages: the resolved grid and one crop per cell.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub grid: Grid,
    pub cells: Vec<CellImage>,
    pub warnings: Vec<ExtractWarning>,
}

#[derive(Serialize)]
struct Layout<'a> {
    rows: usize,
    cols: usize,
    #[serde(flatten)]
    grid: &'a Grid,
    cells: Vec<CellRegion>,
}

impl Segmentation {
    /// Grid boundaries and padded cell rectangles as pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn layout_json(&self) -> Result<String, ConvertError> {
        let layout = Layout {
            rows: self.grid.rows(),
            cols: self.grid.cols(),
            grid: &self.grid,
            cells: self.cells.iter().map(|cell| cell.bounds).collect(),
        };
        Ok(serde_json::to_string_pretty(&layout)?)
    }

    /// Writes every cell as `{row}-{col}.png` plus `grid.json` into `dir`,
    /// creating it if needed. Returns the number of cell images written.
    ///
    /// # Errors
    ///
    /// Propagates filesystem and encoder errors.
    pub fn write_cells(&self, dir: &Path) -> Result<usize, ConvertError> {
        std::fs::create_dir_all(dir)?;
        for cell in &self.cells {
            cell.pixels
                .save(dir.join(format!("{}-{}.png", cell.row(), cell.col())))?;
        }
        std::fs::write(dir.join("grid.json"), self.layout_json()?)?;
        Ok(self.cells.len())
    }
}

/// Runs preprocessing, separator detection, grid resolution and cell
/// extraction on a decoded image.
///
/// # Errors
///
/// Returns the first stage error; see [`ConvertError`].
pub fn segment_image(raw: &DynamicImage, options: &ExtractOptions) -> Result<Segmentation, ConvertError> {
    options.validate()?;

    let mut warnings = Vec::new();
    let image = preprocess(raw, options, &mut warnings)?;
    let separators = detect_separators(&image, options, &mut warnings)?;
    let grid = resolve_grid(&separators, options, &mut warnings)?;
    let cells = extract_cells(&image, &grid, options)?;

    info!(
        rows = grid.rows(),
        cols = grid.cols(),
        warnings = warnings.len(),
        "segmented table image"
    );
    Ok(Segmentation {
        grid,
        cells,
        warnings,
    })
}

/// # Errors
///
/// See [`decode_image`] and [`segment_image`].
pub fn segment_image_bytes(bytes: &[u8], options: &ExtractOptions) -> Result<Segmentation, ConvertError> {
    let raw = decode_image(bytes)?;
    segment_image(&raw, options)
}

/// # Errors
///
/// Fails when the file cannot be read, then as [`segment_image_bytes`].
pub fn segment_image_file(path: &Path, options: &ExtractOptions) -> Result<Segmentation, ConvertError> {
    let bytes = std::fs::read(path)?;
    segment_image_bytes(&bytes, options)
}
