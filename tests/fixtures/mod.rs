//! Test images built in memory.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// A white PNG of the given size.
pub fn blank_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test png");
    bytes
}

/// A small PNG; the scripted engine never looks at the pixels.
pub fn small_png() -> Vec<u8> {
    blank_png(8, 8)
}

/// Leading bytes of a JFIF file, enough for format sniffing.
pub const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01";
