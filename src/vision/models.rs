//! Model management for ONNX Runtime
//!
//! Resolves checkpoint directories to model files, verifies them, and runs
//! the EAST forward pass.

use anyhow::{Context, Result as AnyResult};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::cache::PredictorLoader;
use super::decode::{DecodeParams, EastDecoder};
use super::engine::Predictor;
use super::preprocess::{to_nhwc_tensor, ResizePolicy};
use super::DetectorOutput;
use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Name of the checkpoint state file inside a checkpoint directory
pub const CHECKPOINT_STATE_FILE: &str = "checkpoint";

/// Forward pass of a text detector
///
/// `input` is already at working size. Implementations may keep mutable
/// execution state; callers serialize access.
pub trait TextDetector: Send {
    fn forward(&mut self, input: &RgbImage) -> AnyResult<DetectorOutput>;
}

/// Resolve a checkpoint directory to the model file it points at
///
/// The state file holds a `model_checkpoint_path: "<name>"` line; the model
/// is looked up by the basename of `<name>` inside the directory.
pub fn resolve_checkpoint(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::CheckpointMissing(dir.to_path_buf()));
    }

    let state_path = dir.join(CHECKPOINT_STATE_FILE);
    let state = std::fs::read_to_string(&state_path).map_err(|e| Error::CheckpointState {
        path: dir.to_path_buf(),
        reason: format!("cannot read {:?}: {}", state_path, e),
    })?;

    let name = parse_model_checkpoint_path(&state).ok_or_else(|| Error::CheckpointState {
        path: dir.to_path_buf(),
        reason: "state file has no model_checkpoint_path".to_string(),
    })?;

    let basename = Path::new(&name)
        .file_name()
        .ok_or_else(|| Error::CheckpointState {
            path: dir.to_path_buf(),
            reason: format!("invalid model_checkpoint_path {:?}", name),
        })?;

    let model_path = dir.join(basename);
    if !model_path.is_file() {
        return Err(Error::CheckpointState {
            path: dir.to_path_buf(),
            reason: format!("model file {:?} not found", model_path),
        });
    }

    Ok(model_path)
}

fn parse_model_checkpoint_path(state: &str) -> Option<String> {
    state.lines().find_map(|line| {
        let value = line.trim().strip_prefix("model_checkpoint_path:")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// SHA256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a model file against an expected digest
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    info!("Checksum verified for {:?}", path);
    Ok(())
}

/// EAST detector backed by an ONNX Runtime session
pub struct OrtTextDetector {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl OrtTextDetector {
    /// Create a session from an exported EAST graph
    pub fn new(model_path: &Path, intra_threads: usize) -> AnyResult<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model has no inputs")?;

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        if output_names.len() < 2 {
            anyhow::bail!(
                "Expected score and geometry outputs, model has {:?}",
                output_names
            );
        }

        info!(
            "Model loaded. Input: {}, Outputs: {:?}",
            input_name, output_names
        );

        Ok(Self {
            session,
            input_name,
            output_names,
        })
    }
}

impl TextDetector for OrtTextDetector {
    fn forward(&mut self, input: &RgbImage) -> AnyResult<DetectorOutput> {
        let tensor = to_nhwc_tensor(input);
        let shape = tensor.shape().to_vec();
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input_value = ort::value::Value::from_array((shape.as_slice(), data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])?;

        let (first_shape, first_data) =
            outputs[self.output_names[0].as_str()].try_extract_tensor::<f32>()?;
        let (second_shape, second_data) =
            outputs[self.output_names[1].as_str()].try_extract_tensor::<f32>()?;

        let first_dims: Vec<i64> = first_shape.iter().copied().collect();
        let second_dims: Vec<i64> = second_shape.iter().copied().collect();
        debug!("Output shapes: {:?}, {:?}", first_dims, second_dims);

        let maps = DetectorOutput::from_nhwc((&first_dims, first_data), (&second_dims, second_data))?;
        Ok(maps)
    }
}

/// Loads predictors from checkpoint directories with ONNX Runtime
#[derive(Debug, Clone)]
pub struct OrtPredictorLoader {
    intra_threads: usize,
    sha256: Option<String>,
    decode: DecodeParams,
    resize: ResizePolicy,
}

impl OrtPredictorLoader {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            intra_threads: config.intra_threads,
            sha256: config.sha256.clone(),
            decode: config.decode_params(),
            resize: config.resize_policy(),
        }
    }

    fn build(&self, checkpoint: &Path, detector: Box<dyn TextDetector>) -> Predictor {
        let decoder = EastDecoder::new(self.decode);
        debug!("Decoder thresholds: {:?}", decoder.params());
        Predictor::new(checkpoint, detector)
            .with_decoder(Box::new(decoder))
            .with_resize_policy(self.resize)
    }
}

impl PredictorLoader for OrtPredictorLoader {
    fn load(&self, checkpoint: &Path) -> Result<Predictor> {
        let model_path = resolve_checkpoint(checkpoint)?;
        info!("Restore from {:?}", model_path);

        if let Some(expected) = &self.sha256 {
            verify_checksum(&model_path, expected)?;
        }

        let detector =
            OrtTextDetector::new(&model_path, self.intra_threads).map_err(|source| {
                Error::ModelLoad {
                    path: model_path.clone(),
                    source,
                }
            })?;

        Ok(self.build(checkpoint, Box::new(detector)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{FixedDetector, ZeroDetector};
    use ndarray::{Array2, Array3};
    use tempfile::TempDir;

    fn checkpoint_dir(state: &str, model_name: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CHECKPOINT_STATE_FILE), state).unwrap();
        if let Some(name) = model_name {
            std::fs::write(dir.path().join(name), b"not really onnx").unwrap();
        }
        dir
    }

    #[test]
    fn test_resolve_checkpoint() {
        let dir = checkpoint_dir(
            "model_checkpoint_path: \"/train/run1/east.onnx\"\nall_model_checkpoint_paths: \"east.onnx\"\n",
            Some("east.onnx"),
        );

        let model = resolve_checkpoint(dir.path()).unwrap();
        assert_eq!(model, dir.path().join("east.onnx"));
    }

    #[test]
    fn test_resolve_checkpoint_missing_dir() {
        let result = resolve_checkpoint(Path::new("/nonexistent/checkpoint/dir"));
        assert!(matches!(result, Err(Error::CheckpointMissing(_))));
    }

    #[test]
    fn test_resolve_checkpoint_without_state() {
        let dir = TempDir::new().unwrap();
        let result = resolve_checkpoint(dir.path());
        assert!(matches!(result, Err(Error::CheckpointState { .. })));
        assert!(result.unwrap_err().is_startup_fatal());
    }

    #[test]
    fn test_resolve_checkpoint_model_file_missing() {
        let dir = checkpoint_dir("model_checkpoint_path: \"east.onnx\"\n", None);
        let result = resolve_checkpoint(dir.path());
        assert!(matches!(result, Err(Error::CheckpointState { .. })));
    }

    #[test]
    fn test_resolve_checkpoint_empty_state() {
        let dir = checkpoint_dir("some_other_key: 1\n", Some("east.onnx"));
        assert!(resolve_checkpoint(dir.path()).is_err());
    }

    #[test]
    fn test_verify_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"abc").unwrap();

        // SHA256("abc")
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(verify_checksum(&path, digest).is_ok());
        assert!(verify_checksum(&path, &digest.to_uppercase()).is_ok());

        let result = verify_checksum(&path, "deadbeef");
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_loader_rejects_bad_checksum_before_loading() {
        let dir = checkpoint_dir("model_checkpoint_path: \"east.onnx\"\n", Some("east.onnx"));
        let config = ModelConfig {
            sha256: Some("00".to_string()),
            ..ModelConfig::default()
        };
        let loader = OrtPredictorLoader::from_config(&config);

        let result = loader.load(dir.path());
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_loader_applies_configured_decoding() {
        // One confident region scored 0.85 everywhere under it
        let mut score = Array2::<f32>::zeros((16, 80));
        let mut geometry = Array3::<f32>::zeros((16, 80, 5));
        for y in 3..5 {
            for x in 2..10 {
                score[[y, x]] = 0.85;
                let (px, py) = (x as f32 * 4.0, y as f32 * 4.0);
                geometry[[y, x, 0]] = py - 12.0;
                geometry[[y, x, 1]] = 40.0 - px;
                geometry[[y, x, 2]] = 20.0 - py;
                geometry[[y, x, 3]] = px - 8.0;
            }
        }
        let maps = DetectorOutput { score, geometry };
        let image = RgbImage::new(320, 64);

        let lenient = OrtPredictorLoader::from_config(&ModelConfig::default());
        let predictor =
            lenient.build(Path::new("/ckpt"), Box::new(FixedDetector::new(maps.clone())));
        assert_eq!(predictor.infer(&image).unwrap().text_lines.len(), 1);

        let strict = OrtPredictorLoader::from_config(&ModelConfig {
            score_map_thresh: 0.9,
            ..ModelConfig::default()
        });
        let predictor = strict.build(Path::new("/ckpt"), Box::new(FixedDetector::new(maps)));
        assert!(predictor.infer(&image).unwrap().text_lines.is_empty());
    }

    #[test]
    fn test_loader_applies_configured_working_size() {
        let loader = OrtPredictorLoader::from_config(&ModelConfig {
            max_side_len: 160,
            ..ModelConfig::default()
        });
        let predictor = loader.build(Path::new("/ckpt"), Box::new(ZeroDetector));

        let result = predictor.infer(&RgbImage::new(320, 240)).unwrap();

        // 160x120 capped, then 120 snaps down to 64
        assert_eq!(result.rtparams.working_size, "160x64");
        assert_eq!(result.rtparams.image_size, "320x240");
    }
}
