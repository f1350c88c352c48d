use tracing::debug;

use crate::error::ConvertError;
use crate::model::{Axis, Grid, SeparatorLine};
use crate::options::ExtractOptions;
use crate::warning::{ExtractWarning, WarningCode};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Boundary {
    position: u32,
    strength: f32,
}

/// Turns separator candidates into a consistent grid.
///
/// Per axis: candidates within `separator_tolerance_px` collapse into their
/// strongest member, boundaries closer than `min_cell_size_px` are thinned,
/// spacings that are whole multiples of the typical spacing get evenly
/// spaced boundaries inserted, and the result must pass the spacing
/// variation check. The result depends only on the candidate set, not on
/// its order.
///
/// # Errors
///
/// Returns [`ConvertError::IrregularGrid`] naming the failing axis.
pub fn resolve_grid(
    separators: &[SeparatorLine],
    options: &ExtractOptions,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Grid, ConvertError> {
    let rows = resolve_axis(Axis::Horizontal, separators, options, warnings)?;
    let cols = resolve_axis(Axis::Vertical, separators, options, warnings)?;
    debug!(rows = rows.len() - 1, cols = cols.len() - 1, "resolved grid");
    Grid::new(rows, cols)
}

fn resolve_axis(
    axis: Axis,
    separators: &[SeparatorLine],
    options: &ExtractOptions,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Vec<u32>, ConvertError> {
    let candidates = separators
        .iter()
        .filter(|line| line.axis == axis)
        .map(|line| Boundary {
            position: line.position,
            strength: line.strength,
        })
        .collect::<Vec<_>>();

    let clustered = cluster(candidates, options.separator_tolerance_px);
    if clustered.len() < 2 {
        return Err(ConvertError::IrregularGrid {
            axis,
            reason: format!(
                "need at least 2 distinct boundaries, found {}",
                clustered.len()
            ),
            boundaries: positions(&clustered),
        });
    }

    let thinned = drop_small_cells(axis, clustered, options.min_cell_size_px, warnings)?;
    let filled = fill_gaps(axis, &positions(&thinned), options.gap_fill_ratio_tolerance, warnings);
    check_regularity(axis, &filled, options.max_spacing_variation)?;
    Ok(filled)
}

fn positions(boundaries: &[Boundary]) -> Vec<u32> {
    boundaries.iter().map(|boundary| boundary.position).collect()
}

/// Greedy clustering over sorted positions. A cluster spans at most
/// `tolerance` pixels from its first member; its representative is the
/// strongest member, the lowest position among equals.
fn cluster(mut candidates: Vec<Boundary>, tolerance: u32) -> Vec<Boundary> {
    candidates.sort_by(|left, right| {
        left.position
            .cmp(&right.position)
            .then(right.strength.total_cmp(&left.strength))
    });

    let mut clusters: Vec<Boundary> = Vec::new();
    let mut cluster_start = 0_u32;
    for candidate in candidates {
        match clusters.last_mut() {
            Some(best) if candidate.position - cluster_start <= tolerance => {
                if candidate.strength.total_cmp(&best.strength).is_gt() {
                    *best = candidate;
                }
            }
            _ => {
                cluster_start = candidate.position;
                clusters.push(candidate);
            }
        }
    }
    clusters
}

/// Repeatedly removes one boundary of the narrowest too-small cell. The
/// weaker boundary goes (the higher one on a tie) but the outermost
/// boundaries are kept while an inner one can be dropped instead.
fn drop_small_cells(
    axis: Axis,
    mut boundaries: Vec<Boundary>,
    min_cell: u32,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Vec<Boundary>, ConvertError> {
    loop {
        let narrowest = boundaries
            .windows(2)
            .enumerate()
            .map(|(index, pair)| (index, pair[1].position - pair[0].position))
            .filter(|&(_, gap)| gap < min_cell)
            .min_by_key(|&(index, gap)| (gap, index));
        let Some((index, gap)) = narrowest else {
            return Ok(boundaries);
        };

        if boundaries.len() == 2 {
            return Err(ConvertError::IrregularGrid {
                axis,
                reason: format!("only cell is {gap}px, below the {min_cell}px minimum"),
                boundaries: positions(&boundaries),
            });
        }

        let last = boundaries.len() - 1;
        let victim = if index == 0 {
            index + 1
        } else if index + 1 == last {
            index
        } else if boundaries[index]
            .strength
            .total_cmp(&boundaries[index + 1].strength)
            .is_lt()
        {
            index
        } else {
            index + 1
        };

        let removed = boundaries.remove(victim);
        warnings.push(
            ExtractWarning::new(
                WarningCode::BoundaryDropped,
                format!(
                    "dropped {axis} boundary at {} leaving a {gap}px cell",
                    removed.position
                ),
            )
            .with_axis(axis),
        );
    }
}

/// Inserts evenly spaced boundaries into spacings that are close to a whole
/// multiple (at least 2) of the lower median spacing.
fn fill_gaps(
    axis: Axis,
    boundaries: &[u32],
    ratio_tolerance: f32,
    warnings: &mut Vec<ExtractWarning>,
) -> Vec<u32> {
    let spacings = boundaries
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<_>>();
    if spacings.len() < 2 {
        return boundaries.to_vec();
    }

    let mut sorted = spacings.clone();
    sorted.sort_unstable();
    let reference = f64::from(sorted[(sorted.len() - 1) / 2]);

    let mut filled = Vec::with_capacity(boundaries.len());
    for (pair, &spacing) in boundaries.windows(2).zip(&spacings) {
        filled.push(pair[0]);
        let ratio = f64::from(spacing) / reference;
        let multiple = ratio.round();
        if multiple < 2.0 || (ratio - multiple).abs() > f64::from(ratio_tolerance) {
            continue;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let parts = multiple as u32;
        for step in 1..parts {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let offset = (f64::from(spacing) * f64::from(step) / multiple).round() as u32;
            filled.push(pair[0] + offset);
        }
        warnings.push(
            ExtractWarning::new(
                WarningCode::BoundaryInferred,
                format!(
                    "inferred {} {axis} boundar{} between {} and {}",
                    parts - 1,
                    if parts == 2 { "y" } else { "ies" },
                    pair[0],
                    pair[1]
                ),
            )
            .with_axis(axis),
        );
    }
    if let Some(&last) = boundaries.last() {
        filled.push(last);
    }
    filled
}

fn check_regularity(axis: Axis, boundaries: &[u32], max_variation: f32) -> Result<(), ConvertError> {
    let spacings = boundaries
        .windows(2)
        .map(|pair| f64::from(pair[1] - pair[0]))
        .collect::<Vec<_>>();
    if spacings.len() < 2 {
        return Ok(());
    }

    #[allow(clippy::cast_precision_loss)]
    let count = spacings.len() as f64;
    let mean = spacings.iter().sum::<f64>() / count;
    let variance = spacings.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count;
    let variation = variance.sqrt() / mean;

    if variation > f64::from(max_variation) {
        return Err(ConvertError::IrregularGrid {
            axis,
            reason: format!(
                "spacing variation {variation:.2} exceeds the allowed {max_variation:.2}"
            ),
            boundaries: boundaries.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::resolve_grid;
    use crate::error::ConvertError;
    use crate::model::{Axis, SeparatorLine};
    use crate::options::ExtractOptions;
    use crate::warning::WarningCode;

    fn rows(positions: &[(u32, f32)]) -> Vec<SeparatorLine> {
        positions
            .iter()
            .map(|&(position, strength)| {
                SeparatorLine::ruled(Axis::Horizontal, position, strength, 0, 400)
            })
            .collect()
    }

    fn cols(positions: &[u32]) -> Vec<SeparatorLine> {
        positions
            .iter()
            .map(|&position| SeparatorLine::ruled(Axis::Vertical, position, 1.0, 0, 400))
            .collect()
    }

    fn with_columns(mut lines: Vec<SeparatorLine>) -> Vec<SeparatorLine> {
        lines.extend(cols(&[0, 100, 200]));
        lines
    }

    #[test]
    fn infers_missing_boundary_in_double_spacing() {
        let lines = with_columns(rows(&[(0, 1.0), (100, 1.0), (300, 1.0)]));
        let mut warnings = Vec::new();
        let grid = resolve_grid(&lines, &ExtractOptions::default(), &mut warnings)
            .expect("grid should resolve");
        assert_eq!(grid.row_boundaries(), &[0, 100, 200, 300]);
        assert_eq!(grid.col_boundaries(), &[0, 100, 200]);
        assert!(warnings
            .iter()
            .any(|w| w.code == WarningCode::BoundaryInferred && w.axis == Some(Axis::Horizontal)));
    }

    #[test]
    fn clusters_to_the_strongest_candidate() {
        let lines = with_columns(rows(&[(0, 1.0), (101, 0.4), (104, 0.9), (200, 1.0)]));
        let options = ExtractOptions {
            separator_tolerance_px: 5,
            ..ExtractOptions::default()
        };
        let grid = resolve_grid(&lines, &options, &mut Vec::new()).expect("grid should resolve");
        assert_eq!(grid.row_boundaries(), &[0, 104, 200]);
    }

    #[test]
    fn equal_strength_cluster_keeps_lower_coordinate() {
        let lines = with_columns(rows(&[(0, 1.0), (102, 0.5), (100, 0.5), (200, 1.0)]));
        let grid = resolve_grid(&lines, &ExtractOptions::default(), &mut Vec::new())
            .expect("grid should resolve");
        assert_eq!(grid.row_boundaries(), &[0, 100, 200]);
    }

    #[test]
    fn drops_weaker_boundary_of_undersized_cell() {
        let lines = with_columns(rows(&[(0, 1.0), (100, 1.0), (105, 0.3), (200, 1.0)]));
        let options = ExtractOptions {
            min_cell_size_px: 10,
            ..ExtractOptions::default()
        };
        let mut warnings = Vec::new();
        let grid = resolve_grid(&lines, &options, &mut warnings).expect("grid should resolve");
        assert_eq!(grid.row_boundaries(), &[0, 100, 200]);
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.code == WarningCode::BoundaryDropped)
                .count(),
            1
        );
    }

    #[test]
    fn keeps_outer_boundary_when_thinning() {
        let lines = with_columns(rows(&[(0, 0.1), (4, 1.0), (100, 1.0), (200, 1.0)]));
        let grid = resolve_grid(&lines, &ExtractOptions::default(), &mut Vec::new())
            .expect("grid should resolve");
        assert_eq!(grid.row_boundaries(), &[0, 100, 200]);
    }

    #[test]
    fn resolution_ignores_candidate_order() {
        let lines = with_columns(rows(&[
            (0, 1.0),
            (2, 0.7),
            (100, 0.8),
            (103, 0.8),
            (300, 1.0),
            (305, 0.2),
        ]));
        let mut reversed = lines.clone();
        reversed.reverse();

        let options = ExtractOptions::default();
        let forward = resolve_grid(&lines, &options, &mut Vec::new()).expect("forward");
        let backward = resolve_grid(&reversed, &options, &mut Vec::new()).expect("backward");
        assert_eq!(forward, backward);
    }

    #[test]
    fn rejects_irregular_spacing() {
        let lines = with_columns(rows(&[
            (0, 1.0),
            (10, 1.0),
            (20, 1.0),
            (30, 1.0),
            (295, 1.0),
        ]));
        let err = resolve_grid(&lines, &ExtractOptions::default(), &mut Vec::new())
            .expect_err("spacing should be irregular");
        match err {
            ConvertError::IrregularGrid {
                axis, boundaries, ..
            } => {
                assert_eq!(axis, Axis::Horizontal);
                assert_eq!(boundaries, vec![0, 10, 20, 30, 295]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_single_undersized_cell() {
        let lines = with_columns(rows(&[(0, 1.0), (5, 1.0)]));
        let err = resolve_grid(&lines, &ExtractOptions::default(), &mut Vec::new())
            .expect_err("lone 5px cell should fail");
        assert!(matches!(
            err,
            ConvertError::IrregularGrid {
                axis: Axis::Horizontal,
                ..
            }
        ));
    }
}
