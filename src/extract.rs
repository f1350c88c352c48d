use image::imageops;
use rayon::prelude::*;

use crate::error::ConvertError;
use crate::model::{CellImage, CellRegion, Grid, Image};
use crate::options::ExtractOptions;

/// Crops one image per grid cell, in row-major order.
///
/// Each crop is shrunk by `cell_padding_px` on every side to keep separator
/// pixels out of the cell; the padding is clamped so a crop is never empty.
///
/// # Errors
///
/// Returns [`ConvertError::InvalidOption`] when the grid reaches past the
/// image.
pub fn extract_cells(
    image: &Image,
    grid: &Grid,
    options: &ExtractOptions,
) -> Result<Vec<CellImage>, ConvertError> {
    let right = grid.col_boundaries().last().copied().unwrap_or(0);
    let bottom = grid.row_boundaries().last().copied().unwrap_or(0);
    if right > image.width() || bottom > image.height() {
        return Err(ConvertError::InvalidOption(format!(
            "grid extends to {right}x{bottom}, past the {}x{} image",
            image.width(),
            image.height()
        )));
    }

    let regions = grid.regions().collect::<Vec<_>>();
    let padding = options.cell_padding_px;
    let cells = regions
        .par_iter()
        .map(|region| crop(image, region, padding))
        .collect();
    Ok(cells)
}

fn crop(image: &Image, region: &CellRegion, padding: u32) -> CellImage {
    let pad_x = padding.min(region.width.saturating_sub(1) / 2);
    let pad_y = padding.min(region.height.saturating_sub(1) / 2);
    let bounds = CellRegion {
        coord: region.coord,
        x: region.x + pad_x,
        y: region.y + pad_y,
        width: region.width - 2 * pad_x,
        height: region.height - 2 * pad_y,
    };

    let pixels =
        imageops::crop_imm(image.as_gray(), bounds.x, bounds.y, bounds.width, bounds.height)
            .to_image();
    CellImage {
        coord: region.coord,
        bounds,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use image::{GrayImage, Luma};

    use super::extract_cells;
    use crate::error::ConvertError;
    use crate::model::{CellCoord, Grid, Image};
    use crate::options::ExtractOptions;
    use crate::test_support::ruled_table;

    #[test]
    fn yields_one_cell_per_grid_slot_in_row_major_order() {
        let image = Image::from_gray(ruled_table(3, 4, 100, 60, 10, 2));
        let grid = Grid::new(vec![10, 70, 130, 190], vec![10, 110, 210, 310, 410])
            .expect("grid should build");
        let cells = extract_cells(&image, &grid, &ExtractOptions::default())
            .expect("cells should extract");

        assert_eq!(cells.len(), 12);
        let coords = cells.iter().map(|cell| cell.coord).collect::<Vec<_>>();
        let unique = coords.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 12);
        assert_eq!(coords[0], CellCoord::new(0, 0));
        assert_eq!(coords[4], CellCoord::new(1, 0));
        assert_eq!(coords[11], CellCoord::new(2, 3));
    }

    #[test]
    fn padding_trims_the_rule_pixels() {
        let image = Image::from_gray(ruled_table(1, 1, 100, 60, 10, 2));
        let grid = Grid::new(vec![10, 70], vec![10, 110]).expect("grid should build");
        let cells = extract_cells(&image, &grid, &ExtractOptions::default())
            .expect("cells should extract");

        let cell = &cells[0];
        assert_eq!((cell.bounds.x, cell.bounds.y), (12, 12));
        assert_eq!(cell.pixels.dimensions(), (96, 56));
        assert_eq!(cell.pixels.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn padding_never_empties_a_cell() {
        let image = Image::from_gray(GrayImage::from_pixel(20, 20, Luma([255])));
        let grid = Grid::new(vec![0, 3, 20], vec![0, 1, 20]).expect("grid should build");
        let cells = extract_cells(&image, &grid, &ExtractOptions::default())
            .expect("cells should extract");

        assert_eq!(cells[0].pixels.dimensions(), (1, 1));
        assert!(cells.iter().all(|cell| cell.pixels.width() > 0 && cell.pixels.height() > 0));
    }

    #[test]
    fn rejects_grid_outside_image() {
        let image = Image::from_gray(GrayImage::from_pixel(20, 20, Luma([255])));
        let grid = Grid::new(vec![0, 10], vec![0, 30]).expect("grid should build");
        assert!(matches!(
            extract_cells(&image, &grid, &ExtractOptions::default()),
            Err(ConvertError::InvalidOption(_))
        ));
    }
}
