use crate::model::{Axis, CellCoord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    DeskewApplied,
    GutterFallback,
    BoundaryDropped,
    BoundaryInferred,
    RecognitionRetried,
    RecognitionTimedOut,
    RecognitionFailed,
    LowConfidence,
    EmptyRecognition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractWarning {
    pub code: WarningCode,
    pub message: String,
    pub axis: Option<Axis>,
    pub cell: Option<CellCoord>,
    pub confidence: Option<f32>,
}

impl ExtractWarning {
    #[must_use]
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            axis: None,
            cell: None,
            confidence: None,
        }
    }

    #[must_use]
    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = Some(axis);
        self
    }

    #[must_use]
    pub fn with_cell(mut self, cell: CellCoord) -> Self {
        self.cell = Some(cell);
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}
