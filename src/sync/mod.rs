//! The sync pipeline: download, parse, validate, transcode, commit.
//!
//! A sync never touches the Local Store until the archive has been fully
//! downloaded, parsed and validated. Assets are transcoded into memory, then
//! committed one `.part` rename at a time, with the dataset file written
//! last so that its presence means a sync completed.

pub mod error;
pub mod progress;
pub mod source;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fs4::fs_std::FileExt;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

pub use error::{DownloadError, SyncError};
pub use progress::SyncProgress;
pub use source::{ArchiveResponse, ArchiveSource, ChunkStream, HttpArchiveSource};

use crate::archive::{parse_archive, ArchiveAsset, ArchiveLayout};
use crate::model::{dataset_to_json, Record};
use crate::retry::{retry_with_delay, RetryAction, RetryConfig, RetryError};
use crate::store::LocalStore;
use crate::transcode::{transcode, CANONICAL_EXT};
use crate::validate::validate;
use progress::ProgressGate;

pub const DEFAULT_ARCHIVE_URL: &str = "https://villaface.duckdns.org/recipes.zip";

/// Download progress granularity.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Connect and read timeout, applied to every attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_TRANSCODE_CONCURRENCY: usize = 4;

/// Cap on up-front buffer allocation; larger archives grow the buffer.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub url: String,
    pub timeout: Duration,
    pub chunk_size: u64,
    pub retry: RetryConfig,
    pub transcode_concurrency: usize,
    pub layout: ArchiveLayout,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ARCHIVE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            transcode_concurrency: DEFAULT_TRANSCODE_CONCURRENCY,
            layout: ArchiveLayout::default(),
        }
    }
}

/// Counters describing a successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records in the written dataset file.
    pub records: usize,
    /// Asset files written, transcoded or not.
    pub assets_written: usize,
    /// Assets whose transcode failed and were stored as their original bytes.
    pub assets_stored_unprocessed: usize,
    /// Asset files from earlier syncs removed because the new archive no
    /// longer has them.
    pub stale_assets_removed: usize,
    pub bytes_downloaded: u64,
    /// Download attempts used, including the successful one.
    pub attempts: u32,
}

/// One asset ready to be committed.
struct StagedAsset {
    id: u32,
    bytes: Bytes,
    transcoded: bool,
}

/// Held for the duration of a sync or refresh. Dropping the file releases
/// the advisory lock.
#[derive(Debug)]
pub(crate) struct SyncLock {
    _file: std::fs::File,
}

pub struct SyncPipeline {
    store: Arc<dyn LocalStore>,
    source: Arc<dyn ArchiveSource>,
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn LocalStore>,
        source: Arc<dyn ArchiveSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// Pipeline fetching from `config.url` over HTTPS.
    pub fn from_config(store: Arc<dyn LocalStore>, config: SyncConfig) -> Result<Self, DownloadError> {
        let source = HttpArchiveSource::new(config.url.clone(), config.timeout)?;
        Ok(Self::new(store, Arc::new(source), config))
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// True iff the dataset file exists. The dataset is the last file a sync
    /// writes, so this means at least one sync completed.
    pub fn is_initialized(&self) -> bool {
        self.store.dataset_path().is_file()
    }

    /// Download the archive and replace the local dataset and assets.
    ///
    /// On any error the previous dataset and assets are left as they were.
    pub async fn sync(
        &self,
        progress: &mut dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let _lock = self.acquire_lock().await?;
        self.run(progress, cancel).await
    }

    /// Delete the local dataset and assets, then sync.
    ///
    /// The wipe happens before the download, so a failed refresh leaves the
    /// store empty rather than holding the old copy.
    pub async fn refresh(
        &self,
        progress: &mut dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let _lock = self.acquire_lock().await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.clear()).await??;
        tracing::info!("Cleared local data in {}", self.store.app_data_dir().display());
        self.run(progress, cancel).await
    }

    /// Take the store's exclusive sync lock without waiting. Nothing is
    /// created inside the store.
    pub(crate) async fn acquire_lock(&self) -> Result<SyncLock, SyncError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || -> Result<SyncLock, SyncError> {
            let lock_path = store.lock_path();
            if let Some(dir) = lock_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::File::create(&lock_path)?;
            file.try_lock_exclusive()
                .map_err(|_| SyncError::AlreadyRunning(lock_path))?;
            Ok(SyncLock { _file: file })
        })
        .await?
    }

    async fn run(
        &self,
        progress: &mut dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let gate = ProgressGate::new(progress);
        let source = self.source.as_ref();
        let gate_ref = &gate;
        let chunk_size = self.config.chunk_size.max(1);

        tracing::info!("Downloading archive from {}", source.location());
        let (data, attempts) = retry_with_delay(
            &self.config.retry,
            cancel,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            move |attempt| async move {
                tracing::debug!(attempt, "Opening archive stream");
                fetch_archive(source, gate_ref, chunk_size, cancel).await
            },
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled { .. }
            | RetryError::Failed {
                error: DownloadError::Cancelled,
                ..
            } => SyncError::Cancelled,
            RetryError::Failed {
                error: DownloadError::SizeUnknown { .. },
                ..
            } => SyncError::SizeUnknown,
            RetryError::Failed { attempts, error } => SyncError::DownloadFailed {
                attempts,
                source: error,
            },
        })?;
        let bytes_downloaded = data.len() as u64;
        tracing::info!(
            bytes = bytes_downloaded,
            attempts,
            "Archive downloaded"
        );

        let layout = self.config.layout.clone();
        let contents = tokio::task::spawn_blocking(move || parse_archive(&data, &layout)).await??;
        validate(
            &contents.records,
            contents.asset_names.iter().map(String::as_str),
        )?;
        tracing::info!(
            "Archive valid: {} recipes, {} images",
            contents.records.len(),
            contents.assets.len()
        );

        let staged = self.transcode_assets(contents.assets, &gate, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let records = contents.records;
        let record_count = records.len();
        let store = Arc::clone(&self.store);
        let (staged, stale_assets_removed) =
            tokio::task::spawn_blocking(move || {
                commit(store.as_ref(), records, &staged).map(|removed| (staged, removed))
            })
            .await??;

        let report = SyncReport {
            records: record_count,
            assets_written: staged.len(),
            assets_stored_unprocessed: staged.iter().filter(|a| !a.transcoded).count(),
            stale_assets_removed,
            bytes_downloaded,
            attempts,
        };
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} recipes, {} images written ({} stored unprocessed), {} stale removed",
            report.records,
            report.assets_written,
            report.assets_stored_unprocessed,
            report.stale_assets_removed
        );
        tracing::info!("  data dir: {}", self.store.app_data_dir().display());
        Ok(report)
    }

    /// Transcode every asset on the blocking pool, at most
    /// `transcode_concurrency` at a time, keeping archive order.
    async fn transcode_assets(
        &self,
        assets: Vec<ArchiveAsset>,
        gate: &ProgressGate<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StagedAsset>, SyncError> {
        let total = assets.len();
        let concurrency = self.config.transcode_concurrency.max(1);
        let results = stream::iter(assets)
            .map(|asset| async move {
                let raw = asset.bytes.clone();
                let outcome = tokio::task::spawn_blocking(move || transcode(&raw)).await;
                (asset, outcome)
            })
            .buffered(concurrency);
        tokio::pin!(results);

        gate.processing(0, total);
        let mut staged = Vec::with_capacity(total);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                next = results.next() => next,
            };
            let Some((asset, outcome)) = next else {
                break;
            };
            let failure = match outcome {
                Ok(Ok(bytes)) => {
                    staged.push(StagedAsset {
                        id: asset.id,
                        bytes: Bytes::from(bytes),
                        transcoded: true,
                    });
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("transcoder task failed: {}", e)),
            };
            if let Some(reason) = failure {
                tracing::warn!(
                    "Could not transcode {}, storing original bytes: {}",
                    asset.file_name,
                    reason
                );
                staged.push(StagedAsset {
                    id: asset.id,
                    bytes: asset.bytes,
                    transcoded: false,
                });
            }
            gate.processing(staged.len(), total);
        }
        Ok(staged)
    }
}

/// One download attempt: open, stream into memory, report progress.
async fn fetch_archive(
    source: &dyn ArchiveSource,
    gate: &ProgressGate<'_>,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<Bytes, DownloadError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        response = source.open() => response?,
    };
    let total = match response.content_length {
        Some(len) if len > 0 => len,
        _ => {
            return Err(DownloadError::SizeUnknown {
                url: source.location().to_string(),
            })
        }
    };

    let mut body = response.body;
    let mut buf = Vec::with_capacity(total.min(MAX_PREALLOC) as usize);
    let mut downloaded: u64 = 0;
    let mut reported: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk.map_err(|e| e.with_bytes_received(downloaded))?;
        downloaded += chunk.len() as u64;
        if downloaded > total {
            return Err(DownloadError::LengthMismatch {
                expected: total,
                received: downloaded,
            });
        }
        buf.extend_from_slice(&chunk);
        if downloaded - reported >= chunk_size {
            gate.download(downloaded, total);
            reported = downloaded;
        }
    }

    if downloaded != total {
        return Err(DownloadError::LengthMismatch {
            expected: total,
            received: downloaded,
        });
    }
    if reported != total {
        gate.download(total, total);
    }
    Ok(Bytes::from(buf))
}

/// Write staged assets, then the dataset, then prune stale assets. Returns
/// the number of stale assets removed.
fn commit(store: &dyn LocalStore, mut records: Vec<Record>, assets: &[StagedAsset]) -> io::Result<usize> {
    store.ensure()?;
    let images_dir = store.images_dir();
    std::fs::create_dir_all(&images_dir)?;

    for asset in assets {
        write_atomic(&store.asset_path(asset.id), &asset.bytes)?;
    }

    for record in &mut records {
        let path = std::path::absolute(store.asset_path(record.id))?;
        record.asset_ref = path.to_string_lossy().into_owned();
    }
    let json = dataset_to_json(&records).map_err(io::Error::other)?;
    write_atomic(&store.dataset_path(), &json)?;

    let keep: HashSet<String> = assets
        .iter()
        .map(|a| format!("{}.{}", a.id, CANONICAL_EXT))
        .collect();
    match prune_stale_assets(&images_dir, &keep) {
        Ok(removed) => Ok(removed),
        Err(e) => {
            tracing::warn!("Failed to prune stale images in {}: {}", images_dir.display(), e);
            Ok(0)
        }
    }
}

/// Write through a sibling `.part` file renamed into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let part = part_path(path);
    std::fs::write(&part, bytes)?;
    if let Err(e) = std::fs::rename(&part, path) {
        let _ = std::fs::remove_file(&part);
        return Err(e);
    }
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Remove every file in `images_dir` whose name is not in `keep`.
fn prune_stale_assets(images_dir: &Path, keep: &HashSet<String>) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(images_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if keep.contains(name.to_string_lossy().as_ref()) {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        tracing::debug!("Removed stale image {}", entry.path().display());
        removed += 1;
    }
    Ok(removed)
}
