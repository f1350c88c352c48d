use std::collections::BTreeSet;

use tracing::debug;

use crate::error::ConvertError;
use crate::model::{Axis, Image, SeparatorLine};
use crate::options::ExtractOptions;
use crate::preprocess::background_level;
use crate::warning::{ExtractWarning, WarningCode};

/// Largest run of background pixels tolerated inside a ruled line.
const MAX_LINE_GAP_PX: u32 = 1;

/// Intensity variance under which a scanline counts as blank.
const GUTTER_MAX_VARIANCE: f64 = 64.0;

/// Number of distinct ruled positions on an axis that makes whitespace
/// evidence on that axis redundant.
const RULED_AXIS_MIN_LINES: usize = 3;

const MASK_HORIZONTAL: u8 = 0b01;
const MASK_VERTICAL: u8 = 0b10;

/// Finds candidate row and column separators in the canonical image.
///
/// Near-duplicate candidates (thick lines, double rules) are all returned;
/// collapsing them is left to the grid resolver.
///
/// # Errors
///
/// Returns [`ConvertError::NoStructureDetected`] when either axis has fewer
/// than two candidates.
pub fn detect_separators(
    image: &Image,
    options: &ExtractOptions,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Vec<SeparatorLine>, ConvertError> {
    let background = background_level(image.as_gray());
    let ink = background.saturating_sub(options.line_contrast);
    let scan = Scan {
        image,
        options,
        background,
        ink,
    };

    let mut separators = Vec::new();
    let mut mask = vec![0_u8; image.width() as usize * image.height() as usize];

    let horizontal = scan.ruled_lines(Axis::Horizontal);
    let vertical = scan.ruled_lines(Axis::Vertical);
    for line in horizontal.iter().chain(&vertical) {
        scan.mark(&mut mask, line);
    }

    for (axis, ruled) in [(Axis::Horizontal, horizontal), (Axis::Vertical, vertical)] {
        let gutters = if distinct_positions(&ruled, options.separator_tolerance_px)
            >= RULED_AXIS_MIN_LINES
        {
            Vec::new()
        } else {
            scan.gutters(axis, &ruled, &mask)
        };

        if !gutters.is_empty() {
            warnings.push(
                ExtractWarning::new(
                    WarningCode::GutterFallback,
                    format!(
                        "{} {axis} boundaries inferred from whitespace gutters",
                        gutters.len()
                    ),
                )
                .with_axis(axis),
            );
        }

        debug!(%axis, ruled = ruled.len(), gutters = gutters.len(), "separator candidates");
        separators.extend(ruled);
        separators.extend(gutters);
    }

    separators.sort_by(|left, right| {
        left.axis
            .cmp(&right.axis)
            .then(left.position.cmp(&right.position))
            .then(left.start.cmp(&right.start))
    });

    let count = |axis: Axis| separators.iter().filter(|line| line.axis == axis).count();
    let horizontal = count(Axis::Horizontal);
    let vertical = count(Axis::Vertical);
    if horizontal < 2 || vertical < 2 {
        return Err(ConvertError::NoStructureDetected {
            horizontal,
            vertical,
        });
    }

    Ok(separators)
}

/// Counts positions that are further apart than `tolerance`.
fn distinct_positions(lines: &[SeparatorLine], tolerance: u32) -> usize {
    let positions = lines.iter().map(|line| line.position).collect::<BTreeSet<_>>();
    let mut count = 0;
    let mut last: Option<u32> = None;
    for position in positions {
        if last.is_none_or(|prev| position - prev > tolerance) {
            count += 1;
        }
        last = Some(position);
    }
    count
}

struct Scan<'a> {
    image: &'a Image,
    options: &'a ExtractOptions,
    background: u8,
    ink: u8,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32,
    last_dark: u32,
    dark: u32,
    luma_sum: u64,
}

impl Run {
    fn new(at: u32, luma: u8) -> Self {
        Self {
            start: at,
            last_dark: at,
            dark: 1,
            luma_sum: u64::from(luma),
        }
    }

    fn end(&self) -> u32 {
        self.last_dark + 1
    }
}

impl Scan<'_> {
    /// Lengths of the scanned axis: (positions across lines, pixels along a line).
    fn dimensions(&self, axis: Axis) -> (u32, u32) {
        match axis {
            Axis::Horizontal => (self.image.height(), self.image.width()),
            Axis::Vertical => (self.image.width(), self.image.height()),
        }
    }

    fn luma(&self, axis: Axis, across: u32, along: u32) -> u8 {
        match axis {
            Axis::Horizontal => self.image.luma(along, across),
            Axis::Vertical => self.image.luma(across, along),
        }
    }

    fn index(&self, axis: Axis, across: u32, along: u32) -> usize {
        let (x, y) = match axis {
            Axis::Horizontal => (along, across),
            Axis::Vertical => (across, along),
        };
        y as usize * self.image.width() as usize + x as usize
    }

    fn active(&self, len: u32) -> std::ops::Range<u32> {
        let margin = self.options.border_margin_px;
        if len <= margin.saturating_mul(2) {
            return 0..0;
        }
        margin..len - margin
    }

    fn ruled_lines(&self, axis: Axis) -> Vec<SeparatorLine> {
        let (across_len, along_len) = self.dimensions(axis);
        let along = self.active(along_len);
        let span = along.end.saturating_sub(along.start).max(1);
        let mut lines = Vec::new();

        for across in self.active(across_len) {
            let mut current: Option<Run> = None;
            for at in along.clone() {
                let luma = self.luma(axis, across, at);
                if luma >= self.ink {
                    continue;
                }
                current = match current {
                    Some(mut run) if at - run.last_dark <= MAX_LINE_GAP_PX + 1 => {
                        run.last_dark = at;
                        run.dark += 1;
                        run.luma_sum += u64::from(luma);
                        Some(run)
                    }
                    Some(run) => {
                        lines.extend(self.finish_run(axis, across, run, span));
                        Some(Run::new(at, luma))
                    }
                    None => Some(Run::new(at, luma)),
                };
            }
            if let Some(run) = current {
                lines.extend(self.finish_run(axis, across, run, span));
            }
        }

        lines
    }

    fn finish_run(&self, axis: Axis, across: u32, run: Run, span: u32) -> Option<SeparatorLine> {
        let length = run.end() - run.start;
        if length < self.options.line_min_length_px {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let fill = run.dark as f32 / length as f32;
        if fill < self.options.line_fill_ratio {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = run.luma_sum as f32 / run.dark as f32;
        if !self.stands_out(axis, across, &run, mean) {
            return None;
        }

        let background = f32::from(self.background.max(1));
        let contrast = ((background - mean) / background).clamp(0.0, 1.0);
        #[allow(clippy::cast_precision_loss)]
        let coverage = (length as f32 / span as f32).min(1.0);

        Some(SeparatorLine::ruled(
            axis,
            across,
            coverage * contrast,
            run.start,
            run.end(),
        ))
    }

    /// A ruled line is darker than the scanlines `max_line_thickness_px`
    /// away on both sides. Shaded bands are as dark as their neighbours.
    fn stands_out(&self, axis: Axis, across: u32, run: &Run, mean: f32) -> bool {
        let reach = self.options.max_line_thickness_px;
        let (across_len, _) = self.dimensions(axis);
        let before = across.checked_sub(reach);
        let after = across.checked_add(reach).filter(|&at| at < across_len);
        let contrast = f32::from(self.options.line_contrast);

        [before, after].into_iter().all(|neighbour| {
            let level = neighbour.map_or(f32::from(self.background), |at| {
                self.span_mean(axis, at, run)
            });
            level - mean >= contrast
        })
    }

    fn span_mean(&self, axis: Axis, across: u32, run: &Run) -> f32 {
        let sum = (run.start..run.end())
            .map(|at| u64::from(self.luma(axis, across, at)))
            .sum::<u64>();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f32 / (run.end() - run.start) as f32;
        mean
    }

    fn mark(&self, mask: &mut [u8], line: &SeparatorLine) {
        let bit = match line.axis {
            Axis::Horizontal => MASK_HORIZONTAL,
            Axis::Vertical => MASK_VERTICAL,
        };
        for along in line.start..line.end {
            mask[self.index(line.axis, line.position, along)] |= bit;
        }
    }

    /// Whitespace separators along `axis`, ignoring pixels that belong to
    /// ruled lines of the perpendicular axis.
    fn gutters(&self, axis: Axis, ruled: &[SeparatorLine], mask: &[u8]) -> Vec<SeparatorLine> {
        let (across_len, along_len) = self.dimensions(axis);
        let across_range = self.active(across_len);
        let along = self.active(along_len);
        if across_range.is_empty() || along.is_empty() {
            return Vec::new();
        }

        let perpendicular = match axis {
            Axis::Horizontal => MASK_VERTICAL,
            Axis::Vertical => MASK_HORIZONTAL,
        };
        let ruled_positions = ruled.iter().map(|line| line.position).collect::<BTreeSet<_>>();

        let blank = across_range
            .clone()
            .map(|across| {
                if ruled_positions.contains(&across) {
                    return false;
                }
                let values = along
                    .clone()
                    .filter(|&at| mask[self.index(axis, across, at)] & perpendicular == 0)
                    .map(|at| f64::from(self.luma(axis, across, at)))
                    .collect::<Vec<_>>();
                variance(&values) <= GUTTER_MAX_VARIANCE
                    && values
                        .iter()
                        .all(|&value| value >= f64::from(self.ink))
            })
            .collect::<Vec<_>>();

        let offset = across_range.start;
        let Some(first_ink) = blank.iter().position(|is_blank| !is_blank) else {
            return Vec::new();
        };
        let last_ink = blank.iter().rposition(|is_blank| !is_blank).unwrap_or(first_ink);

        let full_strength = 0.5;
        let edge_strength = 0.25;
        let mut gutters = Vec::new();
        let to_position = |index: usize| offset + u32::try_from(index).unwrap_or(u32::MAX);

        let leading = if first_ink > 0 { first_ink - 1 } else { 0 };
        gutters.push(SeparatorLine::gutter(
            axis,
            to_position(leading),
            edge_strength,
            along.start,
            along.end,
        ));

        let mut index = first_ink;
        while index <= last_ink {
            if !blank[index] {
                index += 1;
                continue;
            }
            let start = index;
            while index <= last_ink && blank[index] {
                index += 1;
            }
            let end = index;
            let band = u32::try_from(end - start).unwrap_or(u32::MAX);
            let bounded_by_rule = ruled_positions.contains(&(to_position(start) - 1))
                || ruled_positions.contains(&to_position(end));
            if band >= self.options.min_gutter_px && !bounded_by_rule {
                let scale = self.options.min_gutter_px.saturating_mul(4).max(1);
                #[allow(clippy::cast_precision_loss)]
                let strength = full_strength * (band.min(scale) as f32 / scale as f32);
                gutters.push(SeparatorLine::gutter(
                    axis,
                    to_position(start + (end - start - 1) / 2),
                    strength,
                    along.start,
                    along.end,
                ));
            }
        }

        let trailing = if last_ink + 1 < blank.len() {
            last_ink + 1
        } else {
            last_ink
        };
        if trailing > leading {
            gutters.push(SeparatorLine::gutter(
                axis,
                to_position(trailing),
                edge_strength,
                along.start,
                along.end,
            ));
        }

        let tolerance = self.options.separator_tolerance_px;
        gutters.retain(|gutter| {
            ruled
                .iter()
                .all(|line| line.position.abs_diff(gutter.position) > tolerance)
        });
        gutters
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count
}
