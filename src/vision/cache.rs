//! Predictor cache
//!
//! Memoizes loaded predictors by checkpoint path with least-recently-used
//! eviction. Loading happens under the cache lock, so concurrent requests
//! for the same checkpoint never load it twice.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::engine::Predictor;
use crate::error::Result;

/// Builds a predictor from a checkpoint directory
pub trait PredictorLoader: Send + Sync {
    fn load(&self, checkpoint: &Path) -> Result<Predictor>;
}

struct CacheEntry {
    checkpoint: PathBuf,
    predictor: Arc<Predictor>,
}

/// Bounded LRU cache of loaded predictors
pub struct PredictorCache {
    capacity: usize,
    /// Least recently used first
    entries: Mutex<Vec<CacheEntry>>,
    loader: Box<dyn PredictorLoader>,
}

impl PredictorCache {
    /// Create a cache holding at most `capacity` predictors (minimum 1)
    pub fn new(capacity: usize, loader: impl PredictorLoader + 'static) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Vec::new()),
            loader: Box::new(loader),
        }
    }

    /// Get the predictor for a checkpoint, loading it on first use
    ///
    /// A failed load is not cached.
    pub fn get(&self, checkpoint: &Path) -> Result<Arc<Predictor>> {
        let mut entries = self.entries.lock();

        if let Some(pos) = entries.iter().position(|e| e.checkpoint == checkpoint) {
            let entry = entries.remove(pos);
            let predictor = entry.predictor.clone();
            entries.push(entry);
            debug!("Predictor cache hit for {:?}", predictor.checkpoint());
            return Ok(predictor);
        }

        info!("loading model from {:?}", checkpoint);
        let predictor = Arc::new(self.loader.load(checkpoint)?);

        if entries.len() >= self.capacity {
            let evicted = entries.remove(0);
            info!("Evicting predictor for {:?}", evicted.checkpoint);
        }
        entries.push(CacheEntry {
            checkpoint: checkpoint.to_path_buf(),
            predictor: predictor.clone(),
        });

        Ok(predictor)
    }

    /// Whether a predictor for the checkpoint is loaded
    pub fn contains(&self, checkpoint: &Path) -> bool {
        self.entries.lock().iter().any(|e| e.checkpoint == checkpoint)
    }

    /// Number of loaded predictors
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every cached predictor
    ///
    /// Sessions are released once no in-flight request holds them.
    pub fn clear(&self) {
        let drained: Vec<CacheEntry> = self.entries.lock().drain(..).collect();
        if !drained.is_empty() {
            info!("Releasing {} cached predictor(s)", drained.len());
        }
    }
}
