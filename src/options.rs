use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::ConvertError;

/// Rectangle of the input image to analyse, in input pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TableArea {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl TableArea {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

impl FromStr for TableArea {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let parts = spec.split(',').map(str::trim).collect::<Vec<_>>();
        if parts.len() != 4 {
            return Err(format!(
                "invalid area format '{spec}', expected exactly 4 coordinates"
            ));
        }

        let parse = |name: &str, value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| format!("invalid {name} coordinate: '{value}'"))
        };
        let x1 = parse("x1", parts[0])?;
        let y1 = parse("y1", parts[1])?;
        let x2 = parse("x2", parts[2])?;
        let y2 = parse("y2", parts[3])?;

        if x2 <= x1 || y2 <= y1 {
            return Err("area requires x2>x1 and y2>y1".to_string());
        }

        Ok(Self { x1, y1, x2, y2 })
    }
}

/// Tunables threaded through every pipeline stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Smallest accepted cell width or height.
    pub min_cell_size_px: u32,
    /// Candidates closer than this collapse into one boundary.
    pub separator_tolerance_px: u32,
    /// Allowed deviation of `spacing / reference` from a whole multiple when
    /// inferring missing boundaries.
    pub gap_fill_ratio_tolerance: f32,
    /// Maximum coefficient of variation of cell spacing on one axis.
    pub max_spacing_variation: f32,
    pub recognition_timeout_ms: u64,
    pub recognition_concurrency: usize,
    pub recognition_retries: u32,
    pub retry_backoff_ms: u64,
    /// Recognitions below this confidence count as unrecognized.
    pub min_confidence: f32,
    /// Inward trim applied to every side of a cell crop.
    pub cell_padding_px: u32,
    pub deskew: bool,
    pub max_skew_degrees: f32,
    /// Median filter radius; 0 disables the filter.
    pub median_radius: u32,
    pub line_min_length_px: u32,
    pub line_fill_ratio: f32,
    /// Intensity drop below background that marks a pixel as ink.
    pub line_contrast: u8,
    /// Thickest band still treated as a ruled line; darker bands beyond
    /// this are fills.
    pub max_line_thickness_px: u32,
    pub min_gutter_px: u32,
    /// Edge band ignored by line detection.
    pub border_margin_px: u32,
    pub area: Option<TableArea>,
    pub delimiter: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_cell_size_px: 8,
            separator_tolerance_px: 3,
            gap_fill_ratio_tolerance: 0.1,
            max_spacing_variation: 1.0,
            recognition_timeout_ms: 10_000,
            recognition_concurrency: 4,
            recognition_retries: 2,
            retry_backoff_ms: 100,
            min_confidence: 0.0,
            cell_padding_px: 2,
            deskew: true,
            max_skew_degrees: 5.0,
            median_radius: 0,
            line_min_length_px: 50,
            line_fill_ratio: 0.95,
            line_contrast: 24,
            max_line_thickness_px: 6,
            min_gutter_px: 8,
            border_margin_px: 8,
            area: None,
            delimiter: b',',
        }
    }
}

impl ExtractOptions {
    /// Loads options from a JSON document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or when [`ExtractOptions::validate`] rejects
    /// the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConvertError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads [`ExtractOptions::from_json_str`] input from a file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not hold valid options.
    pub fn from_json_file(path: &Path) -> Result<Self, ConvertError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidOption`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.min_cell_size_px == 0 {
            return Err(invalid("min_cell_size_px must be at least 1"));
        }
        if !(0.0..0.5).contains(&self.gap_fill_ratio_tolerance) {
            return Err(invalid("gap_fill_ratio_tolerance must be within 0.0..0.5"));
        }
        if self.max_spacing_variation <= 0.0 {
            return Err(invalid("max_spacing_variation must be positive"));
        }
        if self.recognition_concurrency == 0 {
            return Err(invalid("recognition_concurrency must be at least 1"));
        }
        if self.recognition_concurrency > Semaphore::MAX_PERMITS {
            return Err(invalid("recognition_concurrency is too large"));
        }
        if self.recognition_timeout_ms == 0 {
            return Err(invalid("recognition_timeout_ms must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid("min_confidence must be within 0.0..=1.0"));
        }
        if !(0.0..=45.0).contains(&self.max_skew_degrees) {
            return Err(invalid("max_skew_degrees must be within 0..=45"));
        }
        if self.line_min_length_px < 2 {
            return Err(invalid("line_min_length_px must be at least 2"));
        }
        if self.line_fill_ratio <= 0.0 || self.line_fill_ratio > 1.0 {
            return Err(invalid("line_fill_ratio must be within (0.0, 1.0]"));
        }
        if self.line_contrast == 0 {
            return Err(invalid("line_contrast must be at least 1"));
        }
        if self.max_line_thickness_px == 0 {
            return Err(invalid("max_line_thickness_px must be at least 1"));
        }
        if self.min_gutter_px == 0 {
            return Err(invalid("min_gutter_px must be at least 1"));
        }
        if !self.delimiter.is_ascii() {
            return Err(invalid("delimiter must be a single ASCII character"));
        }
        if self
            .area
            .is_some_and(|area| area.x2 <= area.x1 || area.y2 <= area.y1)
        {
            return Err(invalid("area requires x2>x1 and y2>y1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }
}

fn invalid(message: &str) -> ConvertError {
    ConvertError::InvalidOption(message.to_string())
}
