//! Inference engine
//!
//! A `Predictor` owns one loaded detector and turns a decoded image into a
//! `DetectionResult` in original-image coordinates.

use image::RgbImage;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use super::decode::{BoxDecoder, Candidate, EastDecoder};
use super::geometry::{corner_distance, sort_poly, Point};
use super::models::TextDetector;
use super::preprocess::ResizePolicy;
use super::{DetectionResult, RuntimeParams, TextLine, Timing};
use crate::error::{Error, Result};

/// Boxes with a first or last edge shorter than this are dropped (pixels)
pub const MIN_EDGE_PX: f32 = 5.0;

/// A candidate box mapped back to original-image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledBox {
    pub corners: [Point; 4],
    pub score: f32,
}

/// Loaded detector plus its pre- and post-processing
pub struct Predictor {
    checkpoint: PathBuf,
    detector: Mutex<Box<dyn TextDetector>>,
    decoder: Box<dyn BoxDecoder>,
    resize: ResizePolicy,
}

impl Predictor {
    /// Create a predictor with the EAST decoder and default resize policy
    pub fn new(checkpoint: &Path, detector: Box<dyn TextDetector>) -> Self {
        Self {
            checkpoint: checkpoint.to_path_buf(),
            detector: Mutex::new(detector),
            decoder: Box::new(EastDecoder::default()),
            resize: ResizePolicy::default(),
        }
    }

    /// Replace the box decoder
    pub fn with_decoder(mut self, decoder: Box<dyn BoxDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the working-size policy
    pub fn with_resize_policy(mut self, resize: ResizePolicy) -> Self {
        self.resize = resize;
        self
    }

    /// Checkpoint directory this predictor was loaded from
    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    /// Detect text lines in an RGB image
    ///
    /// The forward pass is serialized per predictor. A failure leaves the
    /// predictor usable for the next call.
    pub fn infer(&self, image: &RgbImage) -> Result<DetectionResult> {
        let start = Instant::now();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }

        let start_time = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let mut timing = Timing::default();

        let resized = self.resize.apply(image);
        let (working_w, working_h) = resized.image.dimensions();
        let rtparams = RuntimeParams {
            start_time,
            image_size: format!("{}x{}", width, height),
            working_size: format!("{}x{}", working_w, working_h),
        };

        let net_start = Instant::now();
        let maps = {
            let mut detector = self.detector.lock();
            detector.forward(&resized.image).map_err(Error::Forward)?
        };
        timing.net = net_start.elapsed().as_secs_f64();

        let candidates = self.decoder.decode(&maps, &mut timing)?;
        info!(
            "net {:.0}ms, restore {:.0}ms, nms {:.0}ms",
            timing.net * 1000.0,
            timing.restore * 1000.0,
            timing.nms * 1000.0
        );

        let boxes = rescale_candidates(&candidates, resized.ratio_h, resized.ratio_w);

        timing.overall = start.elapsed().as_secs_f64();
        info!("[timing] {}", timing.overall);

        let text_lines = filter_text_lines(&boxes);

        Ok(DetectionResult {
            text_lines,
            rtparams,
            timing,
            session_id: None,
        })
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        info!("Releasing predictor for {:?}", self.checkpoint);
    }
}

/// Map working-size candidates back to original-image coordinates
pub fn rescale_candidates(candidates: &[Candidate], ratio_h: f32, ratio_w: f32) -> Vec<ScaledBox> {
    candidates
        .iter()
        .map(|c| ScaledBox {
            corners: [
                (c[0] / ratio_w, c[1] / ratio_h),
                (c[2] / ratio_w, c[3] / ratio_h),
                (c[4] / ratio_w, c[5] / ratio_h),
                (c[6] / ratio_w, c[7] / ratio_h),
            ],
            score: c[8],
        })
        .collect()
}

/// Canonicalize corners and drop near-degenerate boxes, keeping input order
pub fn filter_text_lines(boxes: &[ScaledBox]) -> Vec<TextLine> {
    boxes
        .iter()
        .filter_map(|b| {
            let quad = sort_poly(b.corners.map(|(x, y)| [x as i32, y as i32]));
            if corner_distance(quad[0], quad[1]) < MIN_EDGE_PX
                || corner_distance(quad[3], quad[0]) < MIN_EDGE_PX
            {
                return None;
            }
            Some(TextLine::from_quad(quad, b.score))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{FailingDetector, FixedDetector, ZeroDetector};
    use crate::vision::DetectorOutput;
    use image::Rgb;
    use ndarray::{Array2, Array3};

    fn scaled(corners: [Point; 4], score: f32) -> ScaledBox {
        ScaledBox { corners, score }
    }

    #[test]
    fn test_rescale_round_trip() {
        // 200x100 works at 160x64
        let (ratio_w, ratio_h) = (160.0 / 200.0, 64.0 / 100.0);
        let original = [(50.0f32, 25.0f32), (150.0, 25.0), (150.0, 75.0), (50.0, 75.0)];

        let mut candidate = [0.0f32; 9];
        for (i, (x, y)) in original.iter().enumerate() {
            candidate[2 * i] = x * ratio_w;
            candidate[2 * i + 1] = y * ratio_h;
        }
        candidate[8] = 0.9;

        let boxes = rescale_candidates(&[candidate], ratio_h, ratio_w);

        assert_eq!(boxes.len(), 1);
        for (actual, expected) in boxes[0].corners.iter().zip(original.iter()) {
            assert!((actual.0 - expected.0).abs() < 1e-3);
            assert!((actual.1 - expected.1).abs() < 1e-3);
        }
        assert_eq!(boxes[0].score, 0.9);
    }

    #[test]
    fn test_degenerate_filter_boundary() {
        // First edge 4.9 px long: truncates below the threshold
        let short = scaled([(0.0, 0.0), (4.9, 0.0), (4.9, 20.0), (0.0, 20.0)], 0.8);
        // First edge 5.1 px long: kept
        let long = scaled([(0.0, 0.0), (5.1, 0.0), (5.1, 20.0), (0.0, 20.0)], 0.8);

        assert!(filter_text_lines(&[short]).is_empty());
        assert_eq!(filter_text_lines(&[long]).len(), 1);
    }

    #[test]
    fn test_degenerate_filter_last_edge() {
        // Wide but only 3 px tall
        let flat = scaled([(0.0, 0.0), (50.0, 0.0), (50.0, 3.0), (0.0, 3.0)], 0.8);
        assert!(filter_text_lines(&[flat]).is_empty());
    }

    #[test]
    fn test_filter_keeps_input_order() {
        let low = scaled([(0.0, 0.0), (40.0, 0.0), (40.0, 10.0), (0.0, 10.0)], 0.2);
        let high = scaled([(0.0, 50.0), (40.0, 50.0), (40.0, 60.0), (0.0, 60.0)], 0.9);

        let lines = filter_text_lines(&[low, high]);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].score, 0.2);
        assert_eq!(lines[1].score, 0.9);
        assert_eq!((lines[1].x0, lines[1].y0), (0.0, 50.0));
    }

    #[test]
    fn test_infer_blank_image() {
        let predictor = Predictor::new(Path::new("/ckpt"), Box::new(ZeroDetector));
        let image = RgbImage::new(100, 50);

        let result = predictor.infer(&image).unwrap();

        assert!(result.text_lines.is_empty());
        assert_eq!(result.rtparams.image_size, "100x50");
        assert_eq!(result.rtparams.working_size, "64x32");
        assert!(result.session_id.is_none());
    }

    #[test]
    fn test_infer_timing_complete() {
        let predictor = Predictor::new(Path::new("/ckpt"), Box::new(ZeroDetector));
        let result = predictor.infer(&RgbImage::new(320, 240)).unwrap();

        let timing = result.timing;
        assert!(timing.net >= 0.0);
        assert!(timing.restore >= 0.0);
        assert!(timing.nms >= 0.0);
        assert!(timing.overall >= timing.net);
    }

    #[test]
    fn test_infer_rescales_to_original() {
        // 250x120 works at 192x64: one box (8, 12) - (40, 20) in working space
        let mut score = Array2::<f32>::zeros((16, 48));
        let mut geometry = Array3::<f32>::zeros((16, 48, 5));
        for y in 3..5 {
            for x in 2..10 {
                score[[y, x]] = 0.95;
                let (px, py) = (x as f32 * 4.0, y as f32 * 4.0);
                geometry[[y, x, 0]] = py - 12.0;
                geometry[[y, x, 1]] = 40.0 - px;
                geometry[[y, x, 2]] = 20.0 - py;
                geometry[[y, x, 3]] = px - 8.0;
            }
        }
        let detector = FixedDetector::new(DetectorOutput { score, geometry });
        let predictor = Predictor::new(Path::new("/ckpt"), Box::new(detector));

        let result = predictor.infer(&RgbImage::new(250, 120)).unwrap();

        assert_eq!(result.rtparams.working_size, "192x64");
        assert_eq!(result.text_lines.len(), 1);
        let line = result.text_lines[0];
        // x / (192 / 250), y / (64 / 120), truncated
        assert_eq!((line.x0, line.y0), (10.0, 22.0));
        assert_eq!((line.x2, line.y2), (52.0, 37.0));
    }

    #[test]
    fn test_infer_rejects_empty_image() {
        let predictor = Predictor::new(Path::new("/ckpt"), Box::new(ZeroDetector));
        let result = predictor.infer(&RgbImage::new(0, 10));
        assert!(matches!(result, Err(Error::EmptyImage { width: 0, height: 10 })));
    }

    #[test]
    fn test_forward_failure_leaves_predictor_usable() {
        let predictor = Predictor::new(Path::new("/ckpt"), Box::new(FailingDetector::once()));
        let mut image = RgbImage::new(64, 64);
        image.put_pixel(0, 0, Rgb([1, 2, 3]));

        let first = predictor.infer(&image);
        assert!(matches!(first, Err(Error::Forward(_))));

        let second = predictor.infer(&image).unwrap();
        assert!(second.text_lines.is_empty());
    }
}
