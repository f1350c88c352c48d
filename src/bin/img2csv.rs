use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use img2csv::{
    ConversionReport, ConvertError, ExtractOptions, ExtractWarning, Segmentation, TableArea,
    TesseractRecognizer, convert_segmentation, segment_image_file, write_csv,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "img2csv",
    version,
    about = "Convert images of spreadsheet tables into CSV"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Recognize every cell and write the table as CSV.
    Convert(ConvertArgs),
    /// Detect the grid and write one PNG per cell, without recognition.
    Segment(SegmentArgs),
}

#[derive(Debug, Args)]
struct DetectionArgs {
    /// JSON file with extraction options; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Analyse only this rectangle of the input, as x1,y1,x2,y2.
    #[arg(long)]
    area: Option<TableArea>,

    /// Minimum cell width and height in pixels.
    #[arg(long)]
    min_cell_size: Option<u32>,

    /// Separator clustering tolerance in pixels.
    #[arg(long)]
    tolerance: Option<u32>,

    /// Skip skew correction.
    #[arg(long)]
    no_deskew: bool,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Input image path (PNG, JPEG or BMP).
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV path.
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    detection: DetectionArgs,

    /// Per-cell recognition timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum recognition calls in flight.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Output delimiter character.
    #[arg(long)]
    delimiter: Option<char>,

    /// Path to the tesseract executable.
    #[arg(long, default_value = "tesseract")]
    tesseract: PathBuf,

    /// Recognition language passed to tesseract.
    #[arg(long, default_value = "eng")]
    lang: String,

    /// Tesseract page segmentation mode used for every cell.
    #[arg(long, default_value_t = 7)]
    psm: u8,

    /// Also write the cell images to this directory.
    #[arg(long)]
    dump_cells: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SegmentArgs {
    /// Input image path (PNG, JPEG or BMP).
    #[arg(short, long)]
    input: PathBuf,

    /// Directory receiving `{row}-{col}.png` and `grid.json`.
    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    detection: DetectionArgs,
}

fn parse_options(args: &DetectionArgs) -> Result<ExtractOptions> {
    let mut options = match &args.config {
        Some(path) => ExtractOptions::from_json_file(path)
            .with_context(|| format!("failed to load --config '{}'", path.display()))?,
        None => ExtractOptions::default(),
    };

    if args.area.is_some() {
        options.area = args.area;
    }
    if let Some(min_cell_size) = args.min_cell_size {
        options.min_cell_size_px = min_cell_size;
    }
    if let Some(tolerance) = args.tolerance {
        options.separator_tolerance_px = tolerance;
    }
    if args.no_deskew {
        options.deskew = false;
    }
    Ok(options)
}

fn parse_convert_options(args: &ConvertArgs) -> Result<ExtractOptions> {
    let mut options = parse_options(&args.detection)?;
    if let Some(timeout_ms) = args.timeout_ms {
        options.recognition_timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = args.concurrency {
        options.recognition_concurrency = concurrency;
    }
    if let Some(delimiter) = args.delimiter {
        if !delimiter.is_ascii() {
            anyhow::bail!("delimiter must be a single ASCII character");
        }
        #[allow(clippy::cast_possible_truncation)]
        let delimiter = delimiter as u8;
        options.delimiter = delimiter;
    }
    options.validate().context("invalid extraction options")?;
    Ok(options)
}

fn log_warnings(warnings: &[ExtractWarning], verbose: bool) {
    if warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", warnings.len());
    if verbose {
        for warning in warnings {
            eprintln!(
                "  - {:?} axis={:?} cell={:?} confidence={:?}: {}",
                warning.code, warning.axis, warning.cell, warning.confidence, warning.message
            );
        }
    }
}

fn segment(input: &Path, options: &ExtractOptions) -> Result<Segmentation> {
    segment_image_file(input, options)
        .with_context(|| format!("failed to segment '{}'", input.display()))
}

fn run_segment(args: &SegmentArgs) -> Result<usize> {
    let options = parse_options(&args.detection)?;
    options.validate().context("invalid extraction options")?;
    let segmentation = segment(&args.input, &options)?;
    log_warnings(&segmentation.warnings, args.detection.verbose);
    segmentation
        .write_cells(&args.out_dir)
        .with_context(|| format!("failed to write cells to '{}'", args.out_dir.display()))
}

async fn run_convert(args: &ConvertArgs, cancel: &CancellationToken) -> Result<ConversionReport> {
    let options = parse_convert_options(args)?;
    let segmentation = segment(&args.input, &options)?;
    if let Some(dir) = &args.dump_cells {
        segmentation
            .write_cells(dir)
            .with_context(|| format!("failed to write cells to '{}'", dir.display()))?;
    }

    let recognizer = Arc::new(
        TesseractRecognizer::new(&args.tesseract, args.lang.clone())
            .with_page_segmentation_mode(args.psm),
    );
    let (matrix, report) = convert_segmentation(segmentation, recognizer, &options, cancel)
        .await
        .with_context(|| format!("failed to recognize '{}'", args.input.display()))?;
    write_csv(&args.output, &matrix, options.delimiter)
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    Ok(report)
}

/// Prints the error chain and the affected grid lines or cells, and maps the
/// error kind to an exit status.
fn report_failure(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    let Some(kind) = error.downcast_ref::<ConvertError>() else {
        return ExitCode::from(1);
    };

    match kind {
        ConvertError::IrregularGrid {
            axis, boundaries, ..
        } => {
            eprintln!("  axis: {axis}");
            eprintln!("  boundaries: {boundaries:?}");
        }
        ConvertError::IncompleteRecognition { missing } => {
            for coord in missing {
                eprintln!("  missing cell {coord}");
            }
        }
        _ => {}
    }
    ExitCode::from(kind.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("img2csv=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Segment(args) => match run_segment(&args) {
            Ok(count) => {
                eprintln!("wrote {count} cell image(s) to '{}'", args.out_dir.display());
                ExitCode::SUCCESS
            }
            Err(error) => report_failure(&error),
        },
        Commands::Convert(args) => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            match run_convert(&args, &cancel).await {
                Ok(report) => {
                    log_warnings(&report.warnings, args.detection.verbose);
                    ExitCode::SUCCESS
                }
                Err(error) => report_failure(&error),
            }
        }
    }
}
