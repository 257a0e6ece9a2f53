//! Session-scoped result persistence
//!
//! Each saved detection gets its own directory under the results root:
//!
//! ```text
//! {results_root}/{session_id}/
//!     input.png
//!     output.png
//!     result.json
//! ```

use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::illustration::draw_illustration;
use crate::error::{Error, Result};
use crate::vision::DetectionResult;

pub const INPUT_IMAGE_FILE: &str = "input.png";
pub const OUTPUT_IMAGE_FILE: &str = "output.png";
pub const RESULT_JSON_FILE: &str = "result.json";

/// Paths and content of one persisted session
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub input_image_path: PathBuf,
    pub illustration_image_path: PathBuf,
    pub result_json_path: PathBuf,
    pub result: DetectionResult,
}

/// New time-ordered session identifier
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Writes detection artifacts into per-session directories
#[derive(Debug, Clone)]
pub struct ResultPersister {
    root: PathBuf,
}

impl ResultPersister {
    /// Create a persister, creating the results root if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("Results root: {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist under a freshly generated session id
    pub fn save(&self, image: &RgbImage, result: &mut DetectionResult) -> Result<SessionRecord> {
        self.save_as(&new_session_id(), image, result)
    }

    /// Persist under the given session id
    ///
    /// Fails with `SessionCollision` if the directory already exists.
    /// Artifacts written before a failure are left in place.
    pub fn save_as(
        &self,
        session_id: &str,
        image: &RgbImage,
        result: &mut DetectionResult,
    ) -> Result<SessionRecord> {
        let dir = self.root.join(session_id);
        fs::create_dir(&dir).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::SessionCollision(dir.clone()),
            _ => Error::Io(e),
        })?;

        let input_image_path = dir.join(INPUT_IMAGE_FILE);
        image.save_with_format(&input_image_path, ImageFormat::Png)?;

        let illustration_image_path = dir.join(OUTPUT_IMAGE_FILE);
        draw_illustration(image, &result.text_lines)
            .save_with_format(&illustration_image_path, ImageFormat::Png)?;

        let result_json_path = dir.join(RESULT_JSON_FILE);
        let mut writer = BufWriter::new(fs::File::create(&result_json_path)?);
        serde_json::to_writer(&mut writer, result)?;
        writer.flush()?;

        result.session_id = Some(session_id.to_string());
        debug!(
            "Saved {} text line(s) for session {}",
            result.text_lines.len(),
            session_id
        );

        Ok(SessionRecord {
            session_id: session_id.to_string(),
            input_image_path,
            illustration_image_path,
            result_json_path,
            result: result.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{RuntimeParams, TextLine, Timing};
    use image::Rgb;
    use tempfile::TempDir;

    fn result_with(lines: Vec<TextLine>) -> DetectionResult {
        DetectionResult {
            text_lines: lines,
            rtparams: RuntimeParams {
                start_time: "2026-10-14T09:30:00.000000".to_string(),
                image_size: "64x32".to_string(),
                working_size: "64x32".to_string(),
            },
            timing: Timing::default(),
            session_id: None,
        }
    }

    #[test]
    fn test_new_persister_creates_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("static").join("results");

        let persister = ResultPersister::new(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(persister.root(), root.as_path());
    }

    #[test]
    fn test_save_writes_all_artifacts() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let line = TextLine::from_quad([[4, 4], [40, 4], [40, 20], [4, 20]], 0.9);
        let mut result = result_with(vec![line]);

        let record = persister.save(&RgbImage::new(64, 32), &mut result).unwrap();

        assert!(record.input_image_path.is_file());
        assert!(record.illustration_image_path.is_file());
        assert!(record.result_json_path.is_file());
        assert_eq!(result.session_id.as_deref(), Some(record.session_id.as_str()));
        assert_eq!(
            record.result_json_path.parent().unwrap(),
            tmp.path().join(&record.session_id)
        );

        let output = image::open(&record.illustration_image_path).unwrap().to_rgb8();
        assert_eq!(*output.get_pixel(20, 4), Rgb([0, 255, 0]));
    }

    #[test]
    fn test_result_json_omits_session_id() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let mut result = result_with(vec![]);

        let record = persister.save(&RgbImage::new(8, 8), &mut result).unwrap();

        let json = fs::read_to_string(&record.result_json_path).unwrap();
        assert!(json.contains("\"text_lines\":[]"));
        assert!(!json.contains("session_id"));
        let parsed: DetectionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rtparams.image_size, "64x32");
    }

    #[test]
    fn test_two_saves_create_distinct_sessions() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let image = RgbImage::new(8, 8);

        let first = persister.save(&image, &mut result_with(vec![])).unwrap();
        let second = persister.save(&image, &mut result_with(vec![])).unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert!(tmp.path().join(&first.session_id).is_dir());
        assert!(tmp.path().join(&second.session_id).is_dir());
        assert_ne!(first.result_json_path, second.result_json_path);
        assert!(first.result_json_path.is_file());
        assert!(second.result_json_path.is_file());
    }

    #[test]
    fn test_session_ids_are_unique_and_ordered() {
        let ids: Vec<String> = (0..64).map(|_| new_session_id()).collect();

        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_existing_session_directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let image = RgbImage::new(8, 8);

        persister.save_as("fixed", &image, &mut result_with(vec![])).unwrap();
        let mut second = result_with(vec![]);
        let err = persister.save_as("fixed", &image, &mut second).unwrap_err();

        assert!(matches!(err, Error::SessionCollision(_)));
        assert!(second.session_id.is_none());
    }

    #[test]
    fn test_blank_result_output_matches_input() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let mut image = RgbImage::new(16, 16);
        image.put_pixel(5, 5, Rgb([200, 100, 50]));

        let record = persister.save(&image, &mut result_with(vec![])).unwrap();

        let input = image::open(&record.input_image_path).unwrap().to_rgb8();
        let output = image::open(&record.illustration_image_path).unwrap().to_rgb8();
        assert_eq!(input, output);
        assert_eq!(input, image);
    }

    #[test]
    fn test_failed_write_leaves_partial_session() {
        let tmp = TempDir::new().unwrap();
        let persister = ResultPersister::new(tmp.path()).unwrap();
        let mut result = result_with(vec![]);

        // PNG cannot encode a zero-area image
        let err = persister.save_as("partial", &RgbImage::new(0, 0), &mut result);

        assert!(err.is_err());
        assert!(tmp.path().join("partial").is_dir());
        assert!(!tmp.path().join("partial").join(RESULT_JSON_FILE).exists());
        assert!(result.session_id.is_none());
    }
}
