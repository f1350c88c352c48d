use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{CellCoord, CellImage, Recognition};
use crate::recognize::{Recognizer, RecognizerError};

/// Canned behaviour for one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedResponse {
    Text(String, f32),
    /// Answers with full confidence after sleeping.
    Delay(Duration, String),
    /// Fails transiently this many times, then answers.
    FailTimes(u32, String),
    Transient(String),
    Crash(String),
}

/// Deterministic recognizer that answers from a table of responses.
///
/// Used to run the pipeline without an OCR engine installed. Cells without a
/// scripted response use the default, which is an empty answer unless
/// overridden.
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    responses: HashMap<CellCoord, ScriptedResponse>,
    default: Option<ScriptedResponse>,
    failures: Mutex<HashMap<CellCoord, u32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRecognizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts every cell of a table with full-confidence text.
    #[must_use]
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        let mut recognizer = Self::new();
        for (row, cells) in rows.iter().enumerate() {
            for (col, text) in cells.iter().enumerate() {
                recognizer.responses.insert(
                    CellCoord::new(row, col),
                    ScriptedResponse::Text((*text).to_string(), 1.0),
                );
            }
        }
        recognizer
    }

    #[must_use]
    pub fn with_response(mut self, coord: CellCoord, response: ScriptedResponse) -> Self {
        self.responses.insert(coord, response);
        self
    }

    #[must_use]
    pub fn with_default(mut self, response: ScriptedResponse) -> Self {
        self.default = Some(response);
        self
    }

    /// Total number of `recognize` calls, retries included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, coord: CellCoord) -> Result<Recognition, RecognizerError> {
        let response = self
            .responses
            .get(&coord)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_else(|| ScriptedResponse::Text(String::new(), 0.0));

        match response {
            ScriptedResponse::Text(text, confidence) => Ok(Recognition::new(text, confidence)),
            ScriptedResponse::Delay(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Recognition::new(text, 1.0))
            }
            ScriptedResponse::FailTimes(times, text) => {
                let failed = {
                    let mut failures = self.failures.lock().map_err(|_| {
                        RecognizerError::Fatal("script state poisoned".to_string())
                    })?;
                    let seen = failures.entry(coord).or_insert(0);
                    if *seen < times {
                        *seen += 1;
                        Some(*seen)
                    } else {
                        None
                    }
                };
                match failed {
                    Some(attempt) => Err(RecognizerError::Transient(format!(
                        "scripted failure {attempt} of {times}"
                    ))),
                    None => Ok(Recognition::new(text, 1.0)),
                }
            }
            ScriptedResponse::Transient(message) => Err(RecognizerError::Transient(message)),
            ScriptedResponse::Crash(message) => Err(RecognizerError::Fatal(message)),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, cell: &CellImage) -> Result<Recognition, RecognizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        self.respond(cell.coord).await
    }
}

/// Decrements the in-flight counter even when the call is dropped early.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
