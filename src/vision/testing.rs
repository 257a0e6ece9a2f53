//! Test doubles for detectors and loaders

use anyhow::Result as AnyResult;
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::cache::PredictorLoader;
use super::engine::Predictor;
use super::models::TextDetector;
use super::DetectorOutput;
use crate::error::{Error, Result};

/// Detector whose maps are all zero (no text anywhere)
pub struct ZeroDetector;

impl TextDetector for ZeroDetector {
    fn forward(&mut self, input: &RgbImage) -> AnyResult<DetectorOutput> {
        let (width, height) = input.dimensions();
        Ok(DetectorOutput::blank(width, height))
    }
}

/// Detector returning the same maps for every input
pub struct FixedDetector {
    maps: DetectorOutput,
}

impl FixedDetector {
    pub fn new(maps: DetectorOutput) -> Self {
        Self { maps }
    }
}

impl TextDetector for FixedDetector {
    fn forward(&mut self, _input: &RgbImage) -> AnyResult<DetectorOutput> {
        Ok(self.maps.clone())
    }
}

/// Detector that fails a number of times, then behaves like `ZeroDetector`
pub struct FailingDetector {
    remaining_failures: usize,
}

impl FailingDetector {
    pub fn once() -> Self {
        Self {
            remaining_failures: 1,
        }
    }
}

impl TextDetector for FailingDetector {
    fn forward(&mut self, input: &RgbImage) -> AnyResult<DetectorOutput> {
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            anyhow::bail!("simulated forward failure");
        }
        ZeroDetector.forward(input)
    }
}

/// Loader producing `ZeroDetector` predictors and counting loads
#[derive(Clone, Default)]
pub struct CountingLoader {
    loads: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader whose every load fails as a missing checkpoint
    pub fn failing() -> Self {
        Self {
            loads: Arc::default(),
            fail: true,
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl PredictorLoader for CountingLoader {
    fn load(&self, checkpoint: &Path) -> Result<Predictor> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::CheckpointMissing(checkpoint.to_path_buf()));
        }
        Ok(Predictor::new(checkpoint, Box::new(ZeroDetector)))
    }
}
