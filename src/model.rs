use std::fmt::{self, Display, Formatter};
use std::io::Cursor;
use std::sync::Arc;

use image::{GrayImage, ImageFormat};
use serde::Serialize;

use crate::error::ConvertError;

/// Immutable single-channel intensity image shared between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Arc<GrayImage>,
}

impl Image {
    #[must_use]
    pub fn from_gray(pixels: GrayImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        self.pixels.get_pixel(x, y).0[0]
    }

    #[must_use]
    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Separates rows; its position is a y coordinate.
    Horizontal,
    /// Separates columns; its position is an x coordinate.
    Vertical,
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Horizontal => f.write_str("horizontal"),
            Self::Vertical => f.write_str("vertical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorSource {
    Ruled,
    Gutter,
}

/// A candidate row or column boundary as seen by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparatorLine {
    pub axis: Axis,
    pub position: u32,
    pub strength: f32,
    /// First pixel (inclusive) along the line where it was observed.
    pub start: u32,
    /// Last pixel (exclusive) along the line where it was observed.
    pub end: u32,
    pub source: SeparatorSource,
}

impl SeparatorLine {
    #[must_use]
    pub fn ruled(axis: Axis, position: u32, strength: f32, start: u32, end: u32) -> Self {
        Self {
            axis,
            position,
            strength,
            start,
            end,
            source: SeparatorSource::Ruled,
        }
    }

    #[must_use]
    pub fn gutter(axis: Axis, position: u32, strength: f32, start: u32, end: u32) -> Self {
        Self {
            axis,
            position,
            strength,
            start,
            end,
            source: SeparatorSource::Gutter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellCoord {
    pub row: usize,
    pub col: usize,
}

impl CellCoord {
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl Display for CellCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Resolved table layout. Boundaries are strictly increasing pixel positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    row_boundaries: Vec<u32>,
    col_boundaries: Vec<u32>,
}

impl Grid {
    /// Builds a grid from explicit boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::IrregularGrid`] when either sequence has fewer
    /// than two entries or is not strictly increasing.
    pub fn new(row_boundaries: Vec<u32>, col_boundaries: Vec<u32>) -> Result<Self, ConvertError> {
        check_boundaries(Axis::Horizontal, &row_boundaries)?;
        check_boundaries(Axis::Vertical, &col_boundaries)?;
        Ok(Self {
            row_boundaries,
            col_boundaries,
        })
    }

    #[must_use]
    pub fn row_boundaries(&self) -> &[u32] {
        &self.row_boundaries
    }

    #[must_use]
    pub fn col_boundaries(&self) -> &[u32] {
        &self.col_boundaries
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.row_boundaries.len() - 1
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.col_boundaries.len() - 1
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows() * self.cols()
    }

    #[must_use]
    pub fn region(&self, row: usize, col: usize) -> Option<CellRegion> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }

        let y = self.row_boundaries[row];
        let x = self.col_boundaries[col];
        Some(CellRegion {
            coord: CellCoord::new(row, col),
            x,
            y,
            width: self.col_boundaries[col + 1] - x,
            height: self.row_boundaries[row + 1] - y,
        })
    }

    /// All cell rectangles in row-major order.
    pub fn regions(&self) -> impl Iterator<Item = CellRegion> + '_ {
        (0..self.rows())
            .flat_map(move |row| (0..self.cols()).map(move |col| (row, col)))
            .filter_map(|(row, col)| self.region(row, col))
    }
}

fn check_boundaries(axis: Axis, boundaries: &[u32]) -> Result<(), ConvertError> {
    if boundaries.len() < 2 {
        return Err(ConvertError::IrregularGrid {
            axis,
            reason: format!("need at least 2 boundaries, found {}", boundaries.len()),
            boundaries: boundaries.to_vec(),
        });
    }

    if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ConvertError::IrregularGrid {
            axis,
            reason: "boundaries are not strictly increasing".to_string(),
            boundaries: boundaries.to_vec(),
        });
    }

    Ok(())
}

/// Pixel rectangle of one grid cell in the canonical image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellRegion {
    pub coord: CellCoord,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Cropped pixels of one cell. Owns its data.
#[derive(Debug, Clone, PartialEq)]
pub struct CellImage {
    pub coord: CellCoord,
    /// The crop rectangle after padding, in canonical image coordinates.
    pub bounds: CellRegion,
    pub pixels: GrayImage,
}

impl CellImage {
    #[must_use]
    pub fn row(&self) -> usize {
        self.coord.row
    }

    #[must_use]
    pub fn col(&self) -> usize {
        self.coord.col
    }

    /// Encodes the cell as PNG, the form handed to external engines.
    ///
    /// # Errors
    ///
    /// Propagates encoder failures.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Cursor::new(Vec::new());
        self.pixels.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}

/// Text of one recognized cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

impl Recognition {
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Final rectangular table of cell strings, indexed like the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMatrix {
    rows: Vec<Vec<String>>,
}

impl TableMatrix {
    pub(crate) fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn col_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}
