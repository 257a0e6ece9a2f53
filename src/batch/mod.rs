//! Batch Layer
//!
//! One batch pass walks the manifest in order: look up each menu id in the
//! catalog, download its image, detect text, report the boxes to the results
//! API and persist the session. Pair *i* finishes before pair *i + 1* starts.

pub mod remote;

pub use remote::{read_manifest, Endpoints, RemoteClient, ReportPayload};

use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::ResultPersister;
use crate::vision::PredictorCache;

/// What happened to one manifest entry
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairOutcome {
    /// Id as listed in the manifest
    pub item_id: String,
    /// Id returned by the catalog, once looked up
    pub menu_id: Option<String>,
    /// Session the artifacts were written to
    pub session_id: Option<String>,
    /// Whether the results API accepted the boxes
    pub reported: bool,
    pub error: Option<String>,
}

impl PairOutcome {
    fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            ..Default::default()
        }
    }

    fn record_error(&mut self, err: &Error) {
        let message = err.to_string();
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{}; {}", previous, message),
            None => message,
        });
    }
}

/// Result of a whole batch pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Session of the last pair whose artifacts were persisted
    pub last_session_id: Option<String>,
    /// One entry per manifest id, in manifest order
    pub pairs: Vec<PairOutcome>,
}

impl BatchOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &PairOutcome> {
        self.pairs.iter().filter(|p| p.error.is_some())
    }
}

/// Runs batch passes against one checkpoint
pub struct BatchOrchestrator {
    remote: RemoteClient,
    cache: Arc<PredictorCache>,
    persister: Arc<ResultPersister>,
    checkpoint: PathBuf,
    manifest_path: PathBuf,
}

impl BatchOrchestrator {
    pub fn new(
        remote: RemoteClient,
        cache: Arc<PredictorCache>,
        persister: Arc<ResultPersister>,
        checkpoint: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote,
            cache,
            persister,
            checkpoint: checkpoint.into(),
            manifest_path: manifest_path.into(),
        }
    }

    pub fn cache(&self) -> &Arc<PredictorCache> {
        &self.cache
    }

    /// Root directory sessions are written under
    pub fn results_root(&self) -> &Path {
        self.persister.root()
    }

    /// Process every manifest entry in order
    ///
    /// Per-pair failures are recorded in the outcome and the pass moves on.
    /// Manifest errors, cancellation and checkpoint failures abort the pass.
    pub async fn run_batch_pass(
        &self,
        endpoints: &Endpoints,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let ids = read_manifest(&self.manifest_path)?;
        info!("Starting batch pass over {} menu id(s)", ids.len());

        let mut outcome = BatchOutcome::default();
        for item_id in &ids {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut pair = PairOutcome::new(item_id);
            if let Err(err) = self.process_pair(item_id, endpoints, cancel, &mut pair).await {
                if matches!(err, Error::Cancelled) || err.is_startup_fatal() {
                    return Err(err);
                }
                if err.is_remote() {
                    warn!("Remote call for menu id {} failed: {}", item_id, err);
                } else {
                    warn!("Menu id {} failed: {}", item_id, err);
                }
                pair.record_error(&err);
            }

            if let Some(session_id) = &pair.session_id {
                outcome.last_session_id = Some(session_id.clone());
            }
            outcome.pairs.push(pair);
        }

        info!(
            "Batch pass finished: {} pair(s), {} failure(s)",
            outcome.pairs.len(),
            outcome.failures().count()
        );
        Ok(outcome)
    }

    async fn process_pair(
        &self,
        item_id: &str,
        endpoints: &Endpoints,
        cancel: &CancellationToken,
        pair: &mut PairOutcome,
    ) -> Result<()> {
        let menu = cancellable(cancel, self.remote.lookup(&endpoints.catalog_url, item_id)).await?;
        pair.menu_id = Some(menu.menu_id.clone());

        let bytes = cancellable(cancel, self.remote.download_image(&menu.menu_image)).await?;

        let cache = self.cache.clone();
        let checkpoint = self.checkpoint.clone();
        let (image, mut result) = tokio::task::spawn_blocking(move || -> Result<_> {
            let image = image::load_from_memory(&bytes)?.to_rgb8();
            let predictor = cache.get(&checkpoint)?;
            let result = predictor.infer(&image)?;
            Ok((image, result))
        })
        .await??;
        debug!(
            "Menu {}: {} text line(s)",
            menu.menu_id,
            result.text_lines.len()
        );

        let payload = ReportPayload {
            menu_id: &menu.menu_id,
            scaled_box_bound: &result.text_lines,
        };
        match cancellable(cancel, self.remote.report(&endpoints.results_url, &payload)).await {
            Ok(()) => pair.reported = true,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                warn!("Menu {} not reported: {}", menu.menu_id, err);
                pair.record_error(&err);
            }
        }

        let persister = self.persister.clone();
        let record = tokio::task::spawn_blocking(move || persister.save(&image, &mut result))
            .await??;
        info!("Menu {} saved as session {}", menu.menu_id, record.session_id);
        pair.session_id = Some(record.session_id);

        Ok(())
    }
}

/// Race a remote call against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}
