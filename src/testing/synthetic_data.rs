//! Synthetic focus targets
//!
//! A resolution-style chart rendered in memory: fine checkers of rising
//! contrast over coarse blocks, so both edge-count and Laplacian metrics
//! respond to defocus over a wide range of blur.

use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const BAND_CONTRAST: [u8; 4] = [30, 70, 120, 200];

/// Sharp focus chart of the given size.
///
/// Upper half: 2-pixel checkers whose contrast rises from left to right.
/// Lower half: 8-pixel blocks at near-full contrast.
pub fn focus_target(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let value = if y < height / 2 {
            let band = (x as usize * BAND_CONTRAST.len()) / width.max(1) as usize;
            let half = BAND_CONTRAST[band.min(BAND_CONTRAST.len() - 1)] / 2;
            if ((x / 2) + (y / 2)) % 2 == 0 {
                128 + half
            } else {
                128 - half
            }
        } else if ((x / 8) + (y / 8)) % 2 == 0 {
            235
        } else {
            20
        };
        Rgb([value, value, value])
    })
}

/// Focus chart blurred with a Gaussian of `sigma` pixels; `0.0` is sharp.
pub fn defocused_target(width: u32, height: u32, sigma: f32) -> RgbImage {
    let target = focus_target(width, height);
    if sigma > 0.0 {
        imageops::blur(&target, sigma)
    } else {
        target
    }
}

/// PNG-encode an image, as the transport would hand it out compressed.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
