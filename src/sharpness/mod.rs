/// Sharpness scoring module
///
/// Turns a decoded frame into a scalar focus metric. Higher is sharper.
/// The default metric is the Canny edge-energy density: the sum of the
/// edge image divided by the pixel count.
pub mod canny;
pub mod laplacian;

pub use canny::CannyScorer;
pub use laplacian::LaplacianScorer;

use crate::config::{ScorerConfig, ScorerKind};
use image::{DynamicImage, GrayImage, RgbImage};
use std::sync::Arc;

/// Image sharpness metric.
///
/// Callers must not pass zero-size images; the frame source rejects them
/// before scoring.
pub trait SharpnessScorer: Send + Sync {
    /// Score a grayscale image.
    fn score(&self, image: &GrayImage) -> f64;

    /// Score any decoded image after luminance conversion.
    fn score_image(&self, image: &DynamicImage) -> f64 {
        self.score(&image.to_luma8())
    }

    fn name(&self) -> &'static str;
}

/// Build the scorer selected by configuration.
pub fn build_scorer(config: &ScorerConfig) -> Arc<dyn SharpnessScorer> {
    match config.kind {
        ScorerKind::Canny => Arc::new(CannyScorer::new(
            config.low_threshold,
            config.high_threshold,
        )),
        ScorerKind::Laplacian => Arc::new(LaplacianScorer),
    }
}

/// Blend an edge image onto a frame for assisted manual focus.
///
/// Each pixel becomes `0.5 * frame + 1.5 * edge`, saturated, so detected
/// edges render white over a dimmed frame.
pub fn overlay_edges(frame: &RgbImage, edges: &GrayImage) -> RgbImage {
    let (width, height) = frame.dimensions();
    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let src = frame.get_pixel(x, y);
        let edge = if x < edges.width() && y < edges.height() {
            edges.get_pixel(x, y)[0] as f32
        } else {
            0.0
        };
        for c in 0..3 {
            let value = 0.5 * src[c] as f32 + 1.5 * edge;
            pixel[c] = value.round().min(255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_build_scorer_from_config() {
        let scorer = build_scorer(&ScorerConfig::default());
        assert_eq!(scorer.name(), "canny");

        let scorer = build_scorer(&ScorerConfig {
            kind: ScorerKind::Laplacian,
            ..Default::default()
        });
        assert_eq!(scorer.name(), "laplacian");
    }

    #[test]
    fn test_overlay_marks_edges_white() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let mut edges = GrayImage::new(4, 4);
        edges.put_pixel(1, 1, Luma([255]));

        let out = overlay_edges(&frame, &edges);
        assert_eq!(out.get_pixel(1, 1), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([50, 50, 50]));
    }
}
