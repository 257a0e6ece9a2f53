//! Vision Layer
//!
//! Scene text detection with an EAST model. The pipeline is:
//! - resize to a working size (`preprocess`)
//! - forward pass producing score and geometry maps (`models`)
//! - geometric decoding into candidate quadrangles (`decode`)
//! - rescaling and degenerate-box filtering (`engine`)
//!
//! Loaded predictors are memoized per checkpoint by `cache`.

pub mod cache;
pub mod decode;
pub mod engine;
pub mod geometry;
pub mod models;
pub mod preprocess;

#[cfg(test)]
pub(crate) mod testing;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use cache::PredictorCache;
pub use models::OrtPredictorLoader;
pub use preprocess::ResizePolicy;

/// Geometry channels of an RBOX map: top, right, bottom, left, angle
pub const GEOMETRY_CHANNELS: usize = 5;

/// One detected text line: an oriented quadrilateral in original-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub x3: f32,
    pub y3: f32,
    /// Confidence (0.0 - 1.0)
    pub score: f32,
}

impl TextLine {
    /// Build a text line from four integer corners
    pub fn from_quad(quad: [[i32; 2]; 4], score: f32) -> Self {
        Self {
            x0: quad[0][0] as f32,
            y0: quad[0][1] as f32,
            x1: quad[1][0] as f32,
            y1: quad[1][1] as f32,
            x2: quad[2][0] as f32,
            y2: quad[2][1] as f32,
            x3: quad[3][0] as f32,
            y3: quad[3][1] as f32,
            score,
        }
    }

    /// Corner points in drawing order
    pub fn corners(&self) -> [(f32, f32); 4] {
        [
            (self.x0, self.y0),
            (self.x1, self.y1),
            (self.x2, self.y2),
            (self.x3, self.y3),
        ]
    }
}

/// Parameters of one inference run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeParams {
    /// Local wall-clock time the run started (ISO 8601)
    pub start_time: String,
    /// Input size as "WxH"
    pub image_size: String,
    /// Size fed to the model as "WxH"
    pub working_size: String,
}

/// Stage durations in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Forward pass
    pub net: f64,
    /// Rectangle restoration from the geometry map
    pub restore: f64,
    /// Quadrangle merge and suppression
    pub nms: f64,
    /// Whole run, from start to rescaled boxes
    pub overall: f64,
}

/// Result of running the detector on one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Surviving text lines, in decoder order
    pub text_lines: Vec<TextLine>,
    pub rtparams: RuntimeParams,
    pub timing: Timing,
    /// Set by the persister once the session is written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Raw detector output at a quarter of the working resolution
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    /// Text probability per cell, shape (h, w)
    pub score: Array2<f32>,
    /// RBOX geometry per cell, shape (h, w, 5)
    pub geometry: Array3<f32>,
}

impl DetectorOutput {
    /// Build from NHWC tensors with batch size 1
    ///
    /// Accepts the two outputs in either order; the one with a single
    /// channel is the score map.
    pub fn from_nhwc(a: (&[i64], &[f32]), b: (&[i64], &[f32])) -> Result<Self> {
        let channels = |shape: &[i64]| shape.last().copied().unwrap_or_default();
        let (score, geometry) = if channels(a.0) == 1 { (a, b) } else { (b, a) };

        let (score_h, score_w) = nhwc_dims(score.0, 1)?;
        let (geo_h, geo_w) = nhwc_dims(geometry.0, GEOMETRY_CHANNELS)?;
        if (score_h, score_w) != (geo_h, geo_w) {
            return Err(Error::BoxDecode(format!(
                "score map {}x{} does not match geometry map {}x{}",
                score_w, score_h, geo_w, geo_h
            )));
        }

        let score = Array2::from_shape_vec((score_h, score_w), score.1.to_vec())
            .map_err(|e| Error::BoxDecode(e.to_string()))?;
        let geometry =
            Array3::from_shape_vec((geo_h, geo_w, GEOMETRY_CHANNELS), geometry.1.to_vec())
                .map_err(|e| Error::BoxDecode(e.to_string()))?;

        Ok(Self { score, geometry })
    }

    /// All-zero maps for a working image of the given size
    pub fn blank(working_width: u32, working_height: u32) -> Self {
        let h = (working_height / 4) as usize;
        let w = (working_width / 4) as usize;
        Self {
            score: Array2::zeros((h, w)),
            geometry: Array3::zeros((h, w, GEOMETRY_CHANNELS)),
        }
    }
}

/// Validate a [1, h, w, channels] shape and return (h, w)
fn nhwc_dims(shape: &[i64], channels: usize) -> Result<(usize, usize)> {
    match shape {
        [1, h, w, c] if *h >= 0 && *w >= 0 && *c as usize == channels => {
            Ok((*h as usize, *w as usize))
        }
        _ => Err(Error::BoxDecode(format!(
            "unexpected map shape {:?}, expected [1, h, w, {}]",
            shape, channels
        ))),
    }
}
