use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ConvertError;
use crate::model::{CellCoord, CellImage, Recognition};
use crate::options::ExtractOptions;
use crate::warning::{ExtractWarning, WarningCode};

#[derive(Debug, Error)]
pub enum RecognizerError {
    /// The call may succeed if repeated.
    #[error("recognition failed: {0}")]
    Transient(String),
    /// The engine itself is unusable; the job must stop.
    #[error("recognition engine unavailable: {0}")]
    Fatal(String),
}

/// External text recognition engine for a single cell image.
///
/// Implementations must be safe to call concurrently for different cells.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, cell: &CellImage) -> Result<Recognition, RecognizerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Empty,
    LowConfidence,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingCell {
    pub coord: CellCoord,
    pub reason: MissReason,
}

/// Result of recognizing every cell of one image.
#[derive(Debug, Default)]
pub struct RecognitionOutcome {
    pub texts: BTreeMap<CellCoord, Recognition>,
    /// Sorted by coordinate.
    pub missing: Vec<MissingCell>,
    pub warnings: Vec<ExtractWarning>,
}

#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    timeout: Duration,
    retries: u32,
    backoff_ms: u64,
    min_confidence: f32,
}

impl CallPolicy {
    fn from_options(options: &ExtractOptions) -> Self {
        Self {
            timeout: options.recognition_timeout(),
            retries: options.recognition_retries,
            backoff_ms: options.retry_backoff_ms,
            min_confidence: options.min_confidence,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

enum CellResult {
    Recognized(Recognition),
    Missing(MissReason, Option<f32>),
    Fatal(String),
}

struct CellReport {
    coord: CellCoord,
    result: CellResult,
    failed_attempts: u32,
}

/// Recognizes every cell with at most `recognition_concurrency` calls in
/// flight.
///
/// Each call is bounded by `recognition_timeout_ms`. Timeouts and transient
/// failures are retried with linear backoff; a cell that still fails, comes
/// back empty, or falls under `min_confidence` is reported as missing
/// rather than failing the job.
///
/// # Errors
///
/// Returns [`ConvertError::RecognitionEngine`] when the engine reports a
/// fatal error, and [`ConvertError::Cancelled`] when `cancel` fires. Either
/// way, in-flight calls are aborted. Invalid options are rejected with
/// [`ConvertError::InvalidOption`] before any call is made.
pub async fn recognize_cells(
    cells: Arc<[CellImage]>,
    recognizer: Arc<dyn Recognizer>,
    options: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<RecognitionOutcome, ConvertError> {
    options.validate()?;
    let permits = Arc::new(Semaphore::new(options.recognition_concurrency));
    recognize_cells_with_permits(cells, recognizer, options, cancel, permits).await
}

/// Like [`recognize_cells`], drawing call slots from a pool that may be
/// shared with other images.
pub(crate) async fn recognize_cells_with_permits(
    cells: Arc<[CellImage]>,
    recognizer: Arc<dyn Recognizer>,
    options: &ExtractOptions,
    cancel: &CancellationToken,
    semaphore: Arc<Semaphore>,
) -> Result<RecognitionOutcome, ConvertError> {
    let policy = CallPolicy::from_options(options);
    let mut tasks = JoinSet::new();

    for index in 0..cells.len() {
        let cells = Arc::clone(&cells);
        let recognizer = Arc::clone(&recognizer);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let cell = &cells[index];
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return CellReport {
                    coord: cell.coord,
                    result: CellResult::Fatal("recognition pool closed".to_string()),
                    failed_attempts: 0,
                };
            };
            recognize_with_retries(recognizer.as_ref(), cell, policy).await
        });
    }

    let mut outcome = RecognitionOutcome::default();
    loop {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(pending = tasks.len(), "recognition cancelled");
                return Err(ConvertError::Cancelled);
            }
            joined = tasks.join_next() => joined,
        };

        let report = match joined {
            None => break,
            Some(Ok(report)) => report,
            Some(Err(error)) => {
                return Err(ConvertError::RecognitionEngine {
                    cell: None,
                    message: format!("recognition task failed: {error}"),
                });
            }
        };
        record(&mut outcome, report, policy)?;
    }

    outcome.missing.sort_by_key(|missing| missing.coord);
    outcome.warnings.sort_by_key(|warning| warning.cell);
    Ok(outcome)
}

fn record(
    outcome: &mut RecognitionOutcome,
    report: CellReport,
    policy: CallPolicy,
) -> Result<(), ConvertError> {
    let coord = report.coord;
    if report.failed_attempts > 0 {
        outcome.warnings.push(
            ExtractWarning::new(
                WarningCode::RecognitionRetried,
                format!(
                    "cell {coord} failed {} of {} attempt(s)",
                    report.failed_attempts,
                    policy.retries + 1
                ),
            )
            .with_cell(coord),
        );
    }

    match report.result {
        CellResult::Recognized(recognition) => {
            outcome.texts.insert(coord, recognition);
        }
        CellResult::Fatal(message) => {
            warn!(%coord, %message, "recognition engine failed");
            return Err(ConvertError::RecognitionEngine {
                cell: Some(coord),
                message,
            });
        }
        CellResult::Missing(reason, confidence) => {
            let warning = match reason {
                MissReason::Empty => ExtractWarning::new(
                    WarningCode::EmptyRecognition,
                    format!("cell {coord} produced no text"),
                ),
                MissReason::LowConfidence => ExtractWarning::new(
                    WarningCode::LowConfidence,
                    format!(
                        "cell {coord} confidence below the {:.2} minimum",
                        policy.min_confidence
                    ),
                ),
                MissReason::TimedOut => ExtractWarning::new(
                    WarningCode::RecognitionTimedOut,
                    format!(
                        "cell {coord} timed out after {}ms",
                        policy.timeout.as_millis()
                    ),
                ),
                MissReason::Failed => ExtractWarning::new(
                    WarningCode::RecognitionFailed,
                    format!("cell {coord} was not recognized after retries"),
                ),
            };
            let warning = match confidence {
                Some(confidence) => warning.with_confidence(confidence),
                None => warning,
            };
            outcome.warnings.push(warning.with_cell(coord));
            outcome.missing.push(MissingCell { coord, reason });
        }
    }
    Ok(())
}

async fn recognize_with_retries(
    recognizer: &dyn Recognizer,
    cell: &CellImage,
    policy: CallPolicy,
) -> CellReport {
    let mut last_failure = MissReason::Failed;
    let mut failed_attempts = 0;

    for attempt in 0..=policy.retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }

        let result = match tokio::time::timeout(policy.timeout, recognizer.recognize(cell)).await {
            Ok(Ok(recognition)) if recognition.is_empty() => {
                CellResult::Missing(MissReason::Empty, None)
            }
            Ok(Ok(recognition)) if recognition.confidence < policy.min_confidence => {
                CellResult::Missing(MissReason::LowConfidence, Some(recognition.confidence))
            }
            Ok(Ok(recognition)) => CellResult::Recognized(recognition),
            Ok(Err(RecognizerError::Fatal(message))) => CellResult::Fatal(message),
            Ok(Err(RecognizerError::Transient(message))) => {
                debug!(cell = %cell.coord, attempt, %message, "transient recognition failure");
                last_failure = MissReason::Failed;
                failed_attempts += 1;
                continue;
            }
            Err(_) => {
                debug!(cell = %cell.coord, attempt, "recognition timed out");
                last_failure = MissReason::TimedOut;
                failed_attempts += 1;
                continue;
            }
        };

        return CellReport {
            coord: cell.coord,
            result,
            failed_attempts,
        };
    }

    CellReport {
        coord: cell.coord,
        result: CellResult::Missing(last_failure, None),
        failed_attempts,
    }
}
