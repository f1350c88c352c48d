use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConvertError;
use crate::model::{CellCoord, CellImage, Recognition, TableMatrix};

/// Builds the final row-major table from recognized cell text.
///
/// Cell text is whitespace-trimmed. The table is only produced when every
/// cell has text and every row has the same number of columns.
///
/// # Errors
///
/// Returns [`ConvertError::IncompleteRecognition`] listing every missing
/// coordinate in row-major order.
pub fn assemble(
    cells: &[CellImage],
    texts: &BTreeMap<CellCoord, Recognition>,
) -> Result<TableMatrix, ConvertError> {
    let coords = cells.iter().map(|cell| cell.coord).collect::<BTreeSet<_>>();

    let missing = coords
        .iter()
        .filter(|coord| !texts.contains_key(coord))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ConvertError::IncompleteRecognition { missing });
    }

    let Some(last_row) = coords.iter().map(|coord| coord.row).max() else {
        return Ok(TableMatrix::from_rows(Vec::new()));
    };
    let width = coords.iter().map(|coord| coord.col + 1).max().unwrap_or(0);

    let holes = (0..=last_row)
        .flat_map(|row| (0..width).map(move |col| CellCoord::new(row, col)))
        .filter(|coord| !coords.contains(coord))
        .collect::<Vec<_>>();
    if !holes.is_empty() {
        return Err(ConvertError::IncompleteRecognition { missing: holes });
    }

    let rows = (0..=last_row)
        .map(|row| {
            (0..width)
                .map(|col| {
                    texts
                        .get(&CellCoord::new(row, col))
                        .map(|recognition| recognition.text.trim().to_string())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    Ok(TableMatrix::from_rows(rows))
}
