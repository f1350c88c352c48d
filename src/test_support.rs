use image::{GrayImage, Luma};

pub(crate) fn fill_rect(img: &mut GrayImage, x: u32, y: u32, width: u32, height: u32, value: u8) {
    for yy in y..y + height {
        for xx in x..x + width {
            img.put_pixel(xx, yy, Luma([value]));
        }
    }
}

/// Black-ruled table with a small ink mark centred in every cell. Rules
/// start at `margin` and repeat every `cell_w` / `cell_h` pixels.
pub(crate) fn ruled_table(
    rows: u32,
    cols: u32,
    cell_w: u32,
    cell_h: u32,
    margin: u32,
    thickness: u32,
) -> GrayImage {
    let width = margin * 2 + cols * cell_w + thickness;
    let height = margin * 2 + rows * cell_h + thickness;
    let mut img = GrayImage::from_pixel(width, height, Luma([255]));

    for row in 0..=rows {
        fill_rect(&mut img, margin, margin + row * cell_h, cols * cell_w + thickness, thickness, 0);
    }
    for col in 0..=cols {
        fill_rect(&mut img, margin + col * cell_w, margin, thickness, rows * cell_h + thickness, 0);
    }
    for row in 0..rows {
        for col in 0..cols {
            let x = margin + col * cell_w + cell_w / 2 - 6;
            let y = margin + row * cell_h + cell_h / 2 - 3;
            fill_rect(&mut img, x, y, 12, 6, 40);
        }
    }
    img
}

/// Borderless layout: one 30x8 ink block centred in each cell, no rules.
pub(crate) fn borderless_table(rows: u32, cols: u32, cell_w: u32, cell_h: u32, margin: u32) -> GrayImage {
    let width = margin * 2 + cols * cell_w;
    let height = margin * 2 + rows * cell_h;
    let mut img = GrayImage::from_pixel(width, height, Luma([255]));
    for row in 0..rows {
        for col in 0..cols {
            let x = margin + col * cell_w + (cell_w - 30) / 2;
            let y = margin + row * cell_h + (cell_h - 8) / 2;
            fill_rect(&mut img, x, y, 30, 8, 0);
        }
    }
    img
}
