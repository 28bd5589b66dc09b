/// Canny edge-density metric
///
/// 3x3 Sobel gradients with L1 magnitude, non-maximum suppression along the
/// quantized gradient direction and hysteresis thresholding. Edge pixels are
/// 255, so the metric is `255 * edge_pixels / total_pixels`.
use super::SharpnessScorer;
use image::{GrayImage, Luma};

const TAN_22_5: f64 = 0.414_213_562;
const TAN_67_5: f64 = 2.414_213_562;

const NONE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannyScorer {
    pub low_threshold: f64,
    pub high_threshold: f64,
}

impl Default for CannyScorer {
    fn default() -> Self {
        Self::new(100.0, 200.0)
    }
}

impl CannyScorer {
    pub fn new(low_threshold: f64, high_threshold: f64) -> Self {
        Self {
            low_threshold,
            high_threshold,
        }
    }

    /// Binary edge image (0 or 255) of `image`.
    pub fn edge_map(&self, image: &GrayImage) -> GrayImage {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let mut out = GrayImage::new(image.width(), image.height());
        if w < 3 || h < 3 {
            return out;
        }

        let px = image.as_raw();
        let at = |x: usize, y: usize| px[y * w + x] as i32;

        let mut gx = vec![0i32; w * h];
        let mut gy = vec![0i32; w * h];
        let mut mag = vec![0i32; w * h];

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let dx = (at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1))
                    - (at(x - 1, y - 1) + 2 * at(x - 1, y) + at(x - 1, y + 1));
                let dy = (at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1))
                    - (at(x - 1, y - 1) + 2 * at(x, y - 1) + at(x + 1, y - 1));
                let i = y * w + x;
                gx[i] = dx;
                gy[i] = dy;
                mag[i] = dx.abs() + dy.abs();
            }
        }

        let mut state = vec![NONE; w * h];
        let mut stack = Vec::new();

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let i = y * w + x;
                let m = mag[i];
                if f64::from(m) <= self.low_threshold {
                    continue;
                }

                let ax = f64::from(gx[i].abs());
                let ay = f64::from(gy[i].abs());
                let (n1, n2) = if ay <= ax * TAN_22_5 {
                    (i - 1, i + 1)
                } else if ay > ax * TAN_67_5 {
                    (i - w, i + w)
                } else if (gx[i] > 0) == (gy[i] > 0) {
                    (i - w - 1, i + w + 1)
                } else {
                    (i - w + 1, i + w - 1)
                };

                if m > mag[n1] && m >= mag[n2] {
                    if f64::from(m) > self.high_threshold {
                        state[i] = STRONG;
                        stack.push(i);
                    } else {
                        state[i] = WEAK;
                    }
                }
            }
        }

        // Promote weak pixels 8-connected to a strong one.
        while let Some(i) = stack.pop() {
            let (x, y) = (i % w, i / w);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let j = ny * w + nx;
                    if state[j] == WEAK {
                        state[j] = STRONG;
                        stack.push(j);
                    }
                }
            }
        }

        for (i, s) in state.iter().enumerate() {
            if *s == STRONG {
                out.put_pixel((i % w) as u32, (i / w) as u32, Luma([255]));
            }
        }
        out
    }
}

impl SharpnessScorer for CannyScorer {
    fn score(&self, image: &GrayImage) -> f64 {
        let pixels = u64::from(image.width()) * u64::from(image.height());
        debug_assert!(pixels > 0, "sharpness scorer called with an empty image");
        if pixels == 0 {
            return 0.0;
        }
        let edges = self.edge_map(image);
        let sum: u64 = edges.as_raw().iter().map(|&v| u64::from(v)).sum();
        sum as f64 / pixels as f64
    }

    fn name(&self) -> &'static str {
        "canny"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{defocused_target, focus_target};

    #[test]
    fn test_uniform_image_has_no_edges() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(CannyScorer::default().score(&img), 0.0);
    }

    #[test]
    fn test_step_edge_detected() {
        let img = GrayImage::from_fn(16, 16, |x, _| if x < 8 { Luma([20]) } else { Luma([220]) });
        let edges = CannyScorer::default().edge_map(&img);
        // A vertical step produces a single-pixel-wide edge column per row.
        let count = edges.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(count, 14);
        assert!(CannyScorer::default().score(&img) > 0.0);
    }

    #[test]
    fn test_sharp_scores_higher_than_blurred() {
        let scorer = CannyScorer::default();
        let sharp = image::DynamicImage::ImageRgb8(focus_target(96, 72));
        let blurred = image::DynamicImage::ImageRgb8(defocused_target(96, 72, 3.0));
        assert!(scorer.score_image(&sharp) > scorer.score_image(&blurred));
    }

    #[test]
    fn test_tiny_images_tolerated() {
        let scorer = CannyScorer::default();
        assert_eq!(scorer.score(&GrayImage::new(1, 1)), 0.0);
        assert_eq!(scorer.score(&GrayImage::new(2, 5)), 0.0);
    }

    #[test]
    fn test_deterministic() {
        let scorer = CannyScorer::default();
        let img = image::DynamicImage::ImageRgb8(defocused_target(64, 48, 1.0));
        assert_eq!(scorer.score_image(&img), scorer.score_image(&img));
    }
}
