use std::io;

use thiserror::Error;

use crate::model::{Axis, CellCoord};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write image: {0}")]
    ImageWrite(#[from] image::ImageError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error(
        "no table structure detected ({horizontal} horizontal and {vertical} vertical separator candidates)"
    )]
    NoStructureDetected { horizontal: usize, vertical: usize },

    #[error("irregular grid along {axis} axis: {reason} (boundaries: {boundaries:?})")]
    IrregularGrid {
        axis: Axis,
        reason: String,
        boundaries: Vec<u32>,
    },

    #[error("recognition incomplete for {} cell(s): {}", .missing.len(), format_cells(.missing))]
    IncompleteRecognition { missing: Vec<CellCoord> },

    #[error("recognition engine failed{}: {message}", on_cell(.cell.as_ref()))]
    RecognitionEngine {
        cell: Option<CellCoord>,
        message: String,
    },

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConvertError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io_error",
            Self::Csv(_) => "csv_error",
            Self::ImageWrite(_) => "image_write_error",
            Self::Config(_) => "config_error",
            Self::InvalidOption(_) => "invalid_option",
            Self::UnsupportedImage(_) => "unsupported_image",
            Self::NoStructureDetected { .. } => "no_structure_detected",
            Self::IrregularGrid { .. } => "irregular_grid",
            Self::IncompleteRecognition { .. } => "incomplete_recognition",
            Self::RecognitionEngine { .. } => "recognition_engine_failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// Process exit status the CLI reports for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnsupportedImage(_) => 2,
            Self::NoStructureDetected { .. } => 3,
            Self::IrregularGrid { .. } => 4,
            Self::IncompleteRecognition { .. } => 5,
            Self::RecognitionEngine { .. } => 6,
            Self::Cancelled => 130,
            Self::Io(_)
            | Self::Csv(_)
            | Self::ImageWrite(_)
            | Self::Config(_)
            | Self::InvalidOption(_) => 1,
        }
    }
}

fn on_cell(cell: Option<&CellCoord>) -> String {
    cell.map(|cell| format!(" on cell {cell}")).unwrap_or_default()
}

fn format_cells(cells: &[CellCoord]) -> String {
    cells
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
