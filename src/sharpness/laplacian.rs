/// Laplacian energy metric
///
/// Mean absolute 4-neighbour Laplacian of luminance. Unlike the thresholded
/// Canny count it changes smoothly with defocus, which helps low-texture
/// scenes where edge counts plateau.
use super::SharpnessScorer;
use image::GrayImage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaplacianScorer;

impl SharpnessScorer for LaplacianScorer {
    fn score(&self, image: &GrayImage) -> f64 {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let pixels = (w * h) as f64;
        debug_assert!(pixels > 0.0, "sharpness scorer called with an empty image");
        if w < 3 || h < 3 {
            return 0.0;
        }

        let px = image.as_raw();
        let mut energy = 0.0f64;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let i = y * w + x;
                let center = f64::from(px[i]);
                let neighbors = f64::from(px[i - 1])
                    + f64::from(px[i + 1])
                    + f64::from(px[i - w])
                    + f64::from(px[i + w]);
                energy += (4.0 * center - neighbors).abs();
            }
        }
        energy / pixels
    }

    fn name(&self) -> &'static str {
        "laplacian"
    }
}
