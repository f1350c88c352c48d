use std::path::Path;

use image::{GrayImage, Luma};

pub const WHITE: u8 = 255;

fn fill_rect(img: &mut GrayImage, x: u32, y: u32, width: u32, height: u32, value: u8) {
    for yy in y..y + height {
        for xx in x..x + width {
            img.put_pixel(xx, yy, Luma([value]));
        }
    }
}

/// Renders a fully ruled table with 2px black rules and a short ink mark in
/// every cell. Rules sit at `margin + k * cell` on both axes.
pub fn ruled_table(rows: u32, cols: u32, cell_w: u32, cell_h: u32, margin: u32) -> GrayImage {
    let thickness = 2;
    let width = margin * 2 + cols * cell_w + thickness;
    let height = margin * 2 + rows * cell_h + thickness;
    let mut img = GrayImage::from_pixel(width, height, Luma([WHITE]));

    for row in 0..=rows {
        fill_rect(&mut img, margin, margin + row * cell_h, cols * cell_w + thickness, thickness, 0);
    }
    for col in 0..=cols {
        fill_rect(&mut img, margin + col * cell_w, margin, thickness, rows * cell_h + thickness, 0);
    }
    for row in 0..rows {
        for col in 0..cols {
            let x = margin + col * cell_w + cell_w / 2 - 10;
            let y = margin + row * cell_h + cell_h / 2 - 4;
            fill_rect(&mut img, x, y, 20, 8, 30);
        }
    }
    img
}

/// Renders a table without rules: one 30x8 ink block per cell.
pub fn borderless_table(rows: u32, cols: u32, cell_w: u32, cell_h: u32, margin: u32) -> GrayImage {
    let width = margin * 2 + cols * cell_w;
    let height = margin * 2 + rows * cell_h;
    let mut img = GrayImage::from_pixel(width, height, Luma([WHITE]));
    for row in 0..rows {
        for col in 0..cols {
            let x = margin + col * cell_w + (cell_w - 30) / 2;
            let y = margin + row * cell_h + (cell_h - 8) / 2;
            fill_rect(&mut img, x, y, 30, 8, 0);
        }
    }
    img
}

pub fn blank_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([WHITE]))
}

pub fn write_png(path: &Path, img: &GrayImage) -> Result<(), Box<dyn std::error::Error>> {
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}
