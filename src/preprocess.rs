use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::debug;

use crate::error::ConvertError;
use crate::model::Image;
use crate::options::ExtractOptions;
use crate::warning::{ExtractWarning, WarningCode};

/// Skew estimates below this are left uncorrected.
const MIN_SKEW_DEGREES: f32 = 0.5;

const SKEW_STEP_DEGREES: f32 = 0.25;

/// Fraction of histogram mass clipped at each end by contrast normalization.
const STRETCH_CLIP: f32 = 0.005;

/// Turns a decoded image into the canonical grayscale analysis image.
///
/// # Errors
///
/// Returns [`ConvertError::UnsupportedImage`] for zero-area input or a pixel
/// layout this crate cannot read, and [`ConvertError::InvalidOption`] when
/// the configured area lies outside the image.
pub fn preprocess(
    raw: &DynamicImage,
    options: &ExtractOptions,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Image, ConvertError> {
    if raw.width() == 0 || raw.height() == 0 {
        return Err(ConvertError::UnsupportedImage(format!(
            "image has zero area ({}x{})",
            raw.width(),
            raw.height()
        )));
    }

    let mut gray = match raw {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_)
        | DynamicImage::ImageRgb32F(_)
        | DynamicImage::ImageRgba32F(_) => raw.to_luma8(),
        other => {
            return Err(ConvertError::UnsupportedImage(format!(
                "unsupported pixel encoding {:?}",
                other.color()
            )));
        }
    };

    if let Some(area) = options.area {
        if area.x2 > gray.width() || area.y2 > gray.height() {
            return Err(ConvertError::InvalidOption(format!(
                "area {},{},{},{} exceeds image bounds {}x{}",
                area.x1,
                area.y1,
                area.x2,
                area.y2,
                gray.width(),
                gray.height()
            )));
        }
        gray = image::imageops::crop_imm(&gray, area.x1, area.y1, area.width(), area.height())
            .to_image();
    }

    if options.median_radius > 0 {
        gray = median_filter(&gray, options.median_radius, options.median_radius);
    }

    let mut gray = normalize_contrast(&gray);

    if options.deskew {
        let ink = background_level(&gray).saturating_sub(options.line_contrast);
        if let Some(angle) = estimate_skew_degrees(&gray, ink, options.max_skew_degrees) {
            debug!(angle, "correcting skew");
            gray = rotate_about_center(
                &gray,
                -angle.to_radians(),
                Interpolation::Bilinear,
                Luma([255]),
            );
            warnings.push(ExtractWarning::new(
                WarningCode::DeskewApplied,
                format!("rotated input by {:.2} degrees to correct skew", -angle),
            ));
        }
    }

    Ok(Image::from_gray(gray))
}

fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut hist = [0_u64; 256];
    for pixel in gray.pixels() {
        hist[usize::from(pixel.0[0])] += 1;
    }
    hist
}

/// Most frequent intensity, which for documents is the paper colour.
pub(crate) fn background_level(gray: &GrayImage) -> u8 {
    let hist = histogram(gray);
    let mut best = 255_u8;
    let mut best_count = 0_u64;
    for level in (0..=255_u8).rev() {
        let count = hist[usize::from(level)];
        if count > best_count {
            best = level;
            best_count = count;
        }
    }
    best
}

/// Linear stretch of the clipped intensity range onto 0..=255.
fn normalize_contrast(gray: &GrayImage) -> GrayImage {
    let hist = histogram(gray);
    let total = u64::from(gray.width()) * u64::from(gray.height());
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let clip = (total as f32 * STRETCH_CLIP) as u64;

    let mut low = 0_usize;
    let mut seen = 0_u64;
    while low < 255 && seen + hist[low] <= clip {
        seen += hist[low];
        low += 1;
    }

    let mut high = 255_usize;
    seen = 0;
    while high > 0 && seen + hist[high] <= clip {
        seen += hist[high];
        high -= 1;
    }

    if high <= low + 8 {
        return gray.clone();
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = 255.0 / (high - low) as f32;
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let value = ((f32::from(pixel.0[0]) - low as f32) * scale)
            .round()
            .clamp(0.0, 255.0) as u8;
        pixel.0[0] = value;
    }
    out
}

/// Projection-profile skew estimate in degrees.
///
/// Positive angles mean content descends to the right. Returns `None` for
/// small images, near-empty images, or skews under half a degree.
pub(crate) fn estimate_skew_degrees(gray: &GrayImage, ink: u8, max_degrees: f32) -> Option<f32> {
    let (width, height) = gray.dimensions();
    if width < 50 || height < 50 || max_degrees < MIN_SKEW_DEGREES {
        return None;
    }

    let points = gray
        .enumerate_pixels()
        .filter(|(x, _, pixel)| x % 2 == 0 && pixel.0[0] < ink)
        .map(|(x, y, _)| (x, y))
        .collect::<Vec<_>>();
    let sampled = (u64::from(width) / 2) * u64::from(height);
    if (points.len() as u64) * 200 < sampled {
        return None;
    }

    let mut best_angle = 0.0_f32;
    let mut best_score = projection_score(&points, width, height, 0.0, max_degrees);
    let mut step = 1_u16;
    loop {
        let magnitude = f32::from(step) * SKEW_STEP_DEGREES;
        if magnitude > max_degrees {
            break;
        }
        for angle in [magnitude, -magnitude] {
            let score = projection_score(&points, width, height, angle, max_degrees);
            if score > best_score {
                best_score = score;
                best_angle = angle;
            }
        }
        step += 1;
    }

    (best_angle.abs() >= MIN_SKEW_DEGREES).then_some(best_angle)
}

/// Sum of squared differences between adjacent rows of the ink profile taken
/// along lines of slope `angle`.
fn projection_score(
    points: &[(u32, u32)],
    width: u32,
    height: u32,
    angle: f32,
    max_degrees: f32,
) -> f64 {
    let tan = f64::from(angle.to_radians().tan());
    let margin = (f64::from(width) * f64::from(max_degrees.to_radians().tan())).ceil() + 1.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let offset = margin as usize;
    let mut bins = vec![0_u32; height as usize + 2 * offset];

    for &(x, y) in points {
        let shifted = f64::from(y) - f64::from(x) * tan + margin;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = shifted.round().max(0.0) as usize;
        if let Some(bin) = bins.get_mut(index) {
            *bin += 1;
        }
    }

    bins.windows(2)
        .map(|pair| {
            let diff = f64::from(pair[1]) - f64::from(pair[0]);
            diff * diff
        })
        .sum()
}
