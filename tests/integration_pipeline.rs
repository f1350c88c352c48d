mod common;

use std::collections::HashSet;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use image::Luma;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use img2csv::{
    CellCoord, ConvertError, ExtractOptions, ExtractWarningCode, ScriptedRecognizer,
    ScriptedResponse, convert_image_to_csv, segment_image_bytes, segment_image_file,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const SHEET: [&[&str]; 3] = [
    &["Item", "Qty", "Price", "Note"],
    &["Bolt", "12", "0.10", "zinc, M6"],
    &["Nut", "40", "0.05", "say \"hex\""],
];

#[test]
fn ruled_grid_segments_into_row_major_cells() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("ruled.png");
    common::write_png(&input, &common::ruled_table(3, 4, 100, 60, 10))
        .expect("PNG fixture should be created");

    let segmentation = segment_image_file(&input, &ExtractOptions::default())
        .expect("segmentation should succeed");

    assert_eq!(segmentation.grid.row_boundaries(), &[10, 70, 130, 190]);
    assert_eq!(segmentation.grid.col_boundaries(), &[10, 110, 210, 310, 410]);
    assert_eq!(segmentation.cells.len(), 12);

    let coords = segmentation
        .cells
        .iter()
        .map(|cell| cell.coord)
        .collect::<Vec<_>>();
    let expected = (0..3)
        .flat_map(|row| (0..4).map(move |col| CellCoord::new(row, col)))
        .collect::<Vec<_>>();
    assert_eq!(coords, expected);
    assert_eq!(coords.iter().collect::<HashSet<_>>().len(), 12);
}

#[tokio::test]
async fn converts_ruled_table_to_csv_file() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("sheet.png");
    let output = dir.path().join("sheet.csv");
    common::write_png(&input, &common::ruled_table(3, 4, 100, 60, 10))
        .expect("PNG fixture should be created");

    let report = convert_image_to_csv(
        &input,
        &output,
        &ExtractOptions::default(),
        Arc::new(ScriptedRecognizer::from_rows(&SHEET)),
        &CancellationToken::new(),
    )
    .await
    .expect("conversion should succeed");

    let csv = std::fs::read_to_string(&output).expect("CSV should be readable");
    assert_eq!(
        csv,
        "Item,Qty,Price,Note\nBolt,12,0.10,\"zinc, M6\"\nNut,40,0.05,\"say \"\"hex\"\"\"\n"
    );
    assert_eq!((report.rows, report.cols, report.cell_count), (3, 4, 12));
}

#[test]
fn borderless_table_falls_back_to_gutters() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("borderless.png");
    common::write_png(&input, &common::borderless_table(3, 3, 80, 30, 20))
        .expect("PNG fixture should be created");

    let segmentation = segment_image_file(&input, &ExtractOptions::default())
        .expect("segmentation should succeed");

    assert_eq!((segmentation.grid.rows(), segmentation.grid.cols()), (3, 3));
    assert!(
        segmentation
            .warnings
            .iter()
            .any(|warning| warning.code == ExtractWarningCode::GutterFallback),
        "warnings: {:?}",
        segmentation.warnings
    );
}

#[test]
fn skewed_scan_is_straightened() {
    let img = common::ruled_table(3, 4, 100, 60, 40);
    let skewed = rotate_about_center(
        &img,
        2.0_f32.to_radians(),
        Interpolation::Bilinear,
        Luma([common::WHITE]),
    );
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("skewed.png");
    common::write_png(&input, &skewed).expect("PNG fixture should be created");

    let segmentation = segment_image_file(&input, &ExtractOptions::default())
        .expect("segmentation should succeed");

    assert!(
        segmentation
            .warnings
            .iter()
            .any(|warning| warning.code == ExtractWarningCode::DeskewApplied)
    );
    assert_eq!((segmentation.grid.rows(), segmentation.grid.cols()), (3, 4));
}

#[test]
fn blank_page_has_no_structure() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("blank.png");
    common::write_png(&input, &common::blank_page(300, 200))
        .expect("PNG fixture should be created");

    let err = segment_image_file(&input, &ExtractOptions::default())
        .expect_err("blank page should fail");
    assert!(matches!(err, ConvertError::NoStructureDetected { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn empty_input_is_unsupported() {
    let err = segment_image_bytes(&[], &ExtractOptions::default())
        .expect_err("empty input should fail");
    assert!(matches!(err, ConvertError::UnsupportedImage(_)));
}

#[tokio::test]
async fn unrecognized_cells_fail_with_coordinates() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("gaps.png");
    let output = dir.path().join("gaps.csv");
    common::write_png(&input, &common::ruled_table(3, 4, 100, 60, 10))
        .expect("PNG fixture should be created");

    let recognizer = ScriptedRecognizer::from_rows(&SHEET)
        .with_response(CellCoord::new(0, 2), ScriptedResponse::Text(String::new(), 0.0))
        .with_response(
            CellCoord::new(2, 1),
            ScriptedResponse::Delay(Duration::from_secs(10), "40".to_string()),
        );
    let options = ExtractOptions {
        recognition_timeout_ms: 100,
        recognition_retries: 1,
        retry_backoff_ms: 1,
        ..ExtractOptions::default()
    };

    let err = convert_image_to_csv(
        &input,
        &output,
        &options,
        Arc::new(recognizer),
        &CancellationToken::new(),
    )
    .await
    .expect_err("missing cells should fail");

    match err {
        ConvertError::IncompleteRecognition { missing } => {
            assert_eq!(missing, vec![CellCoord::new(0, 2), CellCoord::new(2, 1)]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists(), "no CSV should be written for a partial table");
}

#[test]
fn segmentation_is_deterministic() {
    let bytes = {
        let dir = tempdir().expect("tempdir should be created");
        let input = dir.path().join("ruled.png");
        common::write_png(&input, &common::ruled_table(2, 3, 90, 50, 15))
            .expect("PNG fixture should be created");
        std::fs::read(&input).expect("fixture should be readable")
    };

    let first = segment_image_bytes(&bytes, &ExtractOptions::default()).expect("first run");
    let second = segment_image_bytes(&bytes, &ExtractOptions::default()).expect("second run");
    assert_eq!(first.grid, second.grid);
    assert_eq!(first.cells, second.cells);
}

#[test]
fn cli_segment_writes_cell_images() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("cli-ruled.png");
    let out_dir = dir.path().join("cells");
    common::write_png(&input, &common::ruled_table(3, 4, 100, 60, 10))
        .expect("PNG fixture should be created");

    let status = Command::new(env!("CARGO_BIN_EXE_img2csv"))
        .args([
            "segment",
            "-i",
            &input.to_string_lossy(),
            "--out-dir",
            &out_dir.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");

    assert_eq!(status.code(), Some(0));
    assert!(out_dir.join("0-0.png").exists());
    assert!(out_dir.join("2-3.png").exists());
    let layout = std::fs::read_to_string(out_dir.join("grid.json")).expect("layout written");
    let layout: serde_json::Value = serde_json::from_str(&layout).expect("layout is JSON");
    assert_eq!(layout["rows"], 3);
    assert_eq!(layout["cols"], 4);
}

#[test]
fn cli_exit_codes_name_the_failure() {
    let dir = tempdir().expect("tempdir should be created");
    let blank = dir.path().join("blank.png");
    let empty = dir.path().join("empty.png");
    let ruled = dir.path().join("ruled.png");
    let output = dir.path().join("out.csv");
    common::write_png(&blank, &common::blank_page(300, 200)).expect("blank fixture");
    std::fs::write(&empty, b"").expect("empty fixture");
    common::write_png(&ruled, &common::ruled_table(2, 2, 100, 60, 10)).expect("ruled fixture");

    let run = |input: &std::path::Path, extra: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_img2csv"))
            .args([
                "convert",
                "-i",
                &input.to_string_lossy(),
                "-o",
                &output.to_string_lossy(),
            ])
            .args(extra)
            .output()
            .expect("CLI should run")
    };

    assert_eq!(run(&empty, &[]).status.code(), Some(2));
    assert_eq!(run(&blank, &[]).status.code(), Some(3));

    let crashed = run(&ruled, &["--tesseract", "/nonexistent/img2csv-test-engine"]);
    assert_eq!(crashed.status.code(), Some(6));
    let stderr = String::from_utf8_lossy(&crashed.stderr);
    assert!(stderr.contains("recognition engine failed"), "stderr: {stderr}");
}
