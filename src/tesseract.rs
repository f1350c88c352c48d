use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::model::{CellImage, Recognition};
use crate::recognize::{Recognizer, RecognizerError};

/// Page segmentation mode that treats the input as a single text line.
const SINGLE_LINE_PSM: u8 = 7;

/// Recognizes cells by piping PNG data through the `tesseract` CLI.
///
/// The child process is killed when the call is dropped, so timeouts and
/// cancellation do not leave engines running.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: PathBuf,
    language: String,
    page_segmentation_mode: u8,
}

impl TesseractRecognizer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
            page_segmentation_mode: SINGLE_LINE_PSM,
        }
    }

    /// Overrides the `--psm` passed to the engine (7, single line, by default).
    #[must_use]
    pub fn with_page_segmentation_mode(mut self, mode: u8) -> Self {
        self.page_segmentation_mode = mode;
        self
    }

    fn arguments(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.page_segmentation_mode.to_string(),
            "-l".to_string(),
            self.language.clone(),
            "tsv".to_string(),
        ]
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(&self, cell: &CellImage) -> Result<Recognition, RecognizerError> {
        let png = cell
            .encode_png()
            .map_err(|error| RecognizerError::Transient(format!("png encode failed: {error}")))?;

        let mut command = Command::new(&self.program);
        command
            .args(self.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            RecognizerError::Fatal(format!(
                "failed to start {}: {error}",
                self.program.display()
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|error| RecognizerError::Transient(format!("write to engine failed: {error}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| RecognizerError::Transient(format!("engine I/O failed: {error}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizerError::Transient(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(cell = %cell.coord, confidence = recognition.confidence, "engine answered");
        Ok(recognition)
    }
}

/// Joins the word-level rows of tesseract TSV output.
///
/// Confidence is the mean word confidence scaled to 0..=1.
fn parse_tsv(tsv: &str) -> Recognition {
    let mut words = Vec::new();
    let mut confidence_sum = 0.0_f32;

    for line in tsv.lines().skip_while(|line| line.starts_with("level")) {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let Ok(confidence) = fields[10].trim().parse::<f32>() else {
            continue;
        };
        let text = fields[11].trim();
        if confidence < 0.0 || text.is_empty() {
            continue;
        }
        words.push(text);
        confidence_sum += confidence;
    }

    if words.is_empty() {
        return Recognition::new(String::new(), 0.0);
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = confidence_sum / words.len() as f32;
    Recognition::new(words.join(" "), (mean / 100.0).clamp(0.0, 1.0))
}
