use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assemble::assemble;
use crate::csv_out::{write_csv, write_csv_to_string};
use crate::error::ConvertError;
use crate::model::{CellImage, TableMatrix};
use crate::options::ExtractOptions;
use crate::recognize::{Recognizer, recognize_cells_with_permits};
use crate::{ConversionReport, Segmentation, segment_image_bytes};

/// One image to convert as part of [`convert_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug)]
pub struct BatchResult {
    pub input: PathBuf,
    pub result: Result<ConversionReport, ConvertError>,
}

/// Recognizes the cells of a finished segmentation and assembles the table.
///
/// # Errors
///
/// Fails with [`ConvertError::InvalidOption`] for unusable options, with the
/// recognition errors of [`crate::recognize_cells`] or, when any cell ends
/// up without text, with [`ConvertError::IncompleteRecognition`].
pub async fn convert_segmentation(
    segmentation: Segmentation,
    recognizer: Arc<dyn Recognizer>,
    options: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<(TableMatrix, ConversionReport), ConvertError> {
    options.validate()?;
    let permits = Arc::new(Semaphore::new(options.recognition_concurrency));
    convert_with_permits(segmentation, recognizer, options, cancel, permits).await
}

async fn convert_with_permits(
    segmentation: Segmentation,
    recognizer: Arc<dyn Recognizer>,
    options: &ExtractOptions,
    cancel: &CancellationToken,
    permits: Arc<Semaphore>,
) -> Result<(TableMatrix, ConversionReport), ConvertError> {
    let Segmentation {
        grid,
        cells,
        mut warnings,
    } = segmentation;
    let cells: Arc<[CellImage]> = cells.into();

    let outcome =
        recognize_cells_with_permits(Arc::clone(&cells), recognizer, options, cancel, permits)
            .await?;
    warnings.extend(outcome.warnings);
    let matrix = assemble(&cells, &outcome.texts)?;

    info!(
        rows = grid.rows(),
        cols = grid.cols(),
        warnings = warnings.len(),
        "table conversion completed"
    );
    let report = ConversionReport {
        rows: grid.rows(),
        cols: grid.cols(),
        cell_count: grid.cell_count(),
        warnings,
    };
    Ok((matrix, report))
}

/// Segments on the blocking pool so large images do not stall the runtime.
async fn segment_off_runtime(
    bytes: Vec<u8>,
    options: &ExtractOptions,
) -> Result<Segmentation, ConvertError> {
    let options = options.clone();
    tokio::task::spawn_blocking(move || segment_image_bytes(&bytes, &options))
        .await
        .map_err(|error| {
            ConvertError::Io(std::io::Error::other(format!(
                "segmentation task failed: {error}"
            )))
        })?
}

/// Converts an encoded image to CSV text.
///
/// # Errors
///
/// Any [`ConvertError`] raised along the pipeline.
pub async fn convert_image_bytes_to_csv_string(
    bytes: &[u8],
    options: &ExtractOptions,
    recognizer: Arc<dyn Recognizer>,
    cancel: &CancellationToken,
) -> Result<(String, ConversionReport), ConvertError> {
    let segmentation = segment_off_runtime(bytes.to_vec(), options).await?;
    let (matrix, report) = convert_segmentation(segmentation, recognizer, options, cancel).await?;
    let csv = write_csv_to_string(&matrix, options.delimiter)?;
    Ok((csv, report))
}

/// Converts an image file into a CSV file. The output is only written once
/// the whole table has been recognized.
///
/// # Errors
///
/// Any [`ConvertError`] raised along the pipeline.
pub async fn convert_image_to_csv(
    input: &Path,
    output: &Path,
    options: &ExtractOptions,
    recognizer: Arc<dyn Recognizer>,
    cancel: &CancellationToken,
) -> Result<ConversionReport, ConvertError> {
    options.validate()?;
    let permits = Arc::new(Semaphore::new(options.recognition_concurrency));
    convert_file(input, output, options, recognizer, cancel, permits).await
}

async fn convert_file(
    input: &Path,
    output: &Path,
    options: &ExtractOptions,
    recognizer: Arc<dyn Recognizer>,
    cancel: &CancellationToken,
    permits: Arc<Semaphore>,
) -> Result<ConversionReport, ConvertError> {
    let bytes = tokio::fs::read(input).await?;
    let segmentation = segment_off_runtime(bytes, options).await?;
    let (matrix, report) =
        convert_with_permits(segmentation, recognizer, options, cancel, permits).await?;
    write_csv(output, &matrix, options.delimiter)?;
    Ok(report)
}

/// Converts several images concurrently, one task per image.
///
/// At most `recognition_concurrency` images are decoded and segmented at
/// once, and all of them draw recognition calls from one pool of the same
/// size. Each job runs under a child of `cancel`, so cancelling the parent
/// stops every job while a failing job leaves the others untouched. Results
/// come back in job order.
pub async fn convert_batch(
    jobs: Vec<BatchJob>,
    options: &ExtractOptions,
    recognizer: Arc<dyn Recognizer>,
    cancel: &CancellationToken,
) -> Vec<BatchResult> {
    let inputs = jobs.iter().map(|job| job.input.clone()).collect::<Vec<_>>();
    let mut results = inputs.iter().map(|_| None).collect::<Vec<Option<_>>>();
    let mut tasks = JoinSet::new();

    let slots = options.recognition_concurrency.clamp(1, Semaphore::MAX_PERMITS);
    let job_slots = Arc::new(Semaphore::new(slots));
    let call_slots = Arc::new(Semaphore::new(slots));

    for (index, job) in jobs.into_iter().enumerate() {
        let options = options.clone();
        let recognizer = Arc::clone(&recognizer);
        let cancel = cancel.child_token();
        let job_slots = Arc::clone(&job_slots);
        let call_slots = Arc::clone(&call_slots);
        tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ConvertError::Cancelled),
                permit = job_slots.acquire_owned() => match (permit, options.validate()) {
                    (Ok(_permit), Ok(())) => {
                        convert_file(
                            &job.input,
                            &job.output,
                            &options,
                            recognizer,
                            &cancel,
                            call_slots,
                        )
                        .await
                    }
                    (Err(_), _) => Err(ConvertError::Cancelled),
                    (_, Err(error)) => Err(error),
                },
            };
            (index, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Err(error) = &result {
                    warn!(input = %inputs[index].display(), %error, "batch job failed");
                }
                results[index] = Some(result);
            }
            Err(error) => warn!(%error, "batch task aborted"),
        }
    }

    inputs
        .into_iter()
        .zip(results)
        .map(|(input, result)| BatchResult {
            input,
            result: result.unwrap_or_else(|| Err(aborted_job())),
        })
        .collect()
}

/// A batch task that panicked or was aborted says nothing about which stage
/// failed.
fn aborted_job() -> ConvertError {
    ConvertError::Io(std::io::Error::other("conversion task aborted"))
}
