//! Registry scanner service
//!
//! Runs one scan cycle over the storage root:
//! load and prune the registry, find files that are new and settled,
//! send them to the metadata extractor in batches, map each result onto the
//! catalog and file it as recognized or unrecognized. The registry is saved
//! after every batch so an aborted cycle keeps the batches it finished.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::catalog_mapper::CatalogMapper;
use super::extractor::{ExtractedMetadata, MetadataExtractor};
use super::rate_limiter::{RetryConfig, retry_async};
use crate::config::Config;
use crate::db::{LoadOutcome, PruneSummary, RegistryMediaItem, RegistryStorage, path_key};

/// Video file extensions we recognize
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi"];

/// Whether the path has one of [`VIDEO_EXTENSIONS`], case-insensitively
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// A file is settled once its newest timestamp is at least `skip` old.
///
/// Missing timestamps (filesystems without creation time) are ignored. A window
/// too large to represent never settles.
pub fn is_settled(
    created: Option<SystemTime>,
    modified: Option<SystemTime>,
    now: SystemTime,
    skip: Duration,
) -> bool {
    match created.into_iter().chain(modified).max() {
        Some(newest) => newest.checked_add(skip).is_some_and(|settles_at| settles_at <= now),
        None => true,
    }
}

/// Where a scan cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Idle,
    Loading,
    Filtering,
    Batching,
    Extracting,
    Mapping,
    Persisting,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Loading => "loading",
            ScanPhase::Filtering => "filtering",
            ScanPhase::Batching => "batching",
            ScanPhase::Extracting => "extracting",
            ScanPhase::Mapping => "mapping",
            ScanPhase::Persisting => "persisting",
        }
    }
}

/// Scanner settings
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Directory tree to scan
    pub storage_root: PathBuf,
    /// Registry JSON document
    pub database_path: PathBuf,
    /// Files touched more recently than this are left for a later cycle
    pub skip_modification: Duration,
    /// Files per extractor call
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
    /// Attempt budget and fixed delay for the extractor
    pub extract_retry: RetryConfig,
}

impl ScannerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage_root: config.storage_path.clone(),
            database_path: config.database_path.clone(),
            skip_modification: Duration::from_secs(
                config.skip_modification_minutes.saturating_mul(60),
            ),
            batch_size: config.scan_batch_size,
            batch_delay: config.scan_batch_delay,
            extract_retry: RetryConfig::fixed(config.extract_max_attempts, config.extract_retry_delay),
        }
    }
}

/// Counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub pruned: PruneSummary,
    pub candidates: usize,
    pub batches: usize,
    pub recognized: usize,
    pub unrecognized: usize,
    /// Mapping failed; retried next cycle
    pub unclassified: usize,
    /// Extractor gave up and the remaining batches were skipped
    pub aborted: bool,
}

/// Drives extractor -> catalog mapper -> registry for one scan cycle
pub struct RegistryScanner {
    storage: Arc<RegistryStorage>,
    extractor: Arc<dyn MetadataExtractor>,
    mapper: Arc<dyn CatalogMapper>,
    config: ScannerConfig,
    phase: RwLock<ScanPhase>,
}

impl RegistryScanner {
    pub fn new(
        storage: Arc<RegistryStorage>,
        extractor: Arc<dyn MetadataExtractor>,
        mapper: Arc<dyn CatalogMapper>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            storage,
            extractor,
            mapper,
            config,
            phase: RwLock::new(ScanPhase::Idle),
        }
    }

    pub fn storage(&self) -> &Arc<RegistryStorage> {
        &self.storage
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: ScanPhase) {
        debug!(phase = phase.as_str(), "Scan phase");
        *self.phase.write() = phase;
    }

    /// Run one cycle against the current time
    pub async fn scan(&self) -> Result<ScanSummary> {
        self.scan_at(SystemTime::now()).await
    }

    /// Run one cycle, judging file age against `now`
    pub async fn scan_at(&self, now: SystemTime) -> Result<ScanSummary> {
        let result = self.run_cycle(now).await;
        self.set_phase(ScanPhase::Idle);
        result
    }

    async fn run_cycle(&self, now: SystemTime) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        self.set_phase(ScanPhase::Loading);
        match self.storage.load(&self.config.database_path).await {
            LoadOutcome::Malformed | LoadOutcome::Unreadable => {
                warn!(
                    path = %self.config.database_path.display(),
                    "Continuing scan with in-memory registry state"
                );
            }
            LoadOutcome::Missing | LoadOutcome::Loaded(_) => {}
        }
        summary.pruned = self.storage.prune_missed_files();

        self.set_phase(ScanPhase::Filtering);
        let candidates = self.find_candidates(now).await?;
        summary.candidates = candidates.len();

        info!(
            root = %self.config.storage_root.display(),
            candidates = candidates.len(),
            "Starting registry scan"
        );

        if candidates.is_empty() {
            self.set_phase(ScanPhase::Persisting);
            self.persist().await?;
            info!("No new files to process");
            return Ok(summary);
        }

        self.set_phase(ScanPhase::Batching);
        let batch_size = self.config.batch_size.max(1);
        let total_batches = candidates.len().div_ceil(batch_size);

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            self.set_phase(ScanPhase::Extracting);
            let extracted = match retry_async(
                || self.extractor.extract(batch),
                &self.config.extract_retry,
                "extract_metadata",
            )
            .await
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    error!(
                        batch = index + 1,
                        total_batches,
                        files = batch.len(),
                        error = %e,
                        "Metadata extraction failed, aborting remaining batches"
                    );
                    summary.aborted = true;
                    break;
                }
            };

            self.set_phase(ScanPhase::Mapping);
            self.classify_batch(batch, extracted, &mut summary).await;
            summary.batches += 1;

            self.set_phase(ScanPhase::Persisting);
            if let Err(e) = self.persist().await {
                warn!(batch = index + 1, error = %e, "Failed to save registry after batch");
            }

            info!(
                batch = index + 1,
                total_batches,
                recognized = summary.recognized,
                unrecognized = summary.unrecognized,
                "Batch processed"
            );
        }

        self.set_phase(ScanPhase::Persisting);
        self.persist().await?;

        info!(
            candidates = summary.candidates,
            batches = summary.batches,
            recognized = summary.recognized,
            unrecognized = summary.unrecognized,
            unclassified = summary.unclassified,
            aborted = summary.aborted,
            "Registry scan complete"
        );

        Ok(summary)
    }

    /// Video files under the root that are not classified yet and are settled
    async fn find_candidates(&self, now: SystemTime) -> Result<Vec<String>> {
        let root = std::path::absolute(&self.config.storage_root)
            .unwrap_or_else(|_| self.config.storage_root.clone());
        let skip_set = self.storage.skip_set();
        let skip_modification = self.config.skip_modification;

        tokio::task::spawn_blocking(move || {
            collect_candidates(&root, &skip_set, now, skip_modification)
        })
        .await
        .context("Candidate enumeration task failed")
    }

    async fn classify_batch(
        &self,
        batch: &[String],
        extracted: Vec<ExtractedMetadata>,
        summary: &mut ScanSummary,
    ) {
        let mut pending: HashMap<String, &String> =
            batch.iter().map(|path| (path_key(path), path)).collect();

        if extracted.len() != batch.len() {
            warn!(
                requested = batch.len(),
                returned = extracted.len(),
                "Extractor returned a different number of records"
            );
        }

        for mut metadata in extracted {
            let Some(path) = pending.remove(&path_key(&metadata.file_path)) else {
                debug!(path = %metadata.file_path, "Ignoring extractor record for unknown or repeated file");
                continue;
            };
            metadata.file_path = path.clone();

            if !metadata.has_title() {
                debug!(path = %path, "No title extracted, filing as unrecognized");
                self.storage.add_unrecognized(path);
                summary.unrecognized += 1;
                continue;
            }

            let mapping = match self.mapper.map(&metadata).await {
                Ok(mapping) => mapping,
                Err(e) => {
                    warn!(path = %path, error = %e, "Catalog mapping failed, will retry next scan");
                    summary.unclassified += 1;
                    continue;
                }
            };

            if mapping.is_match() {
                let item = RegistryMediaItem::new(path.clone()).with_episode(
                    mapping.season_number.or(metadata.season_number),
                    mapping.episode_number.or(metadata.episode_number),
                );
                debug!(
                    path = %path,
                    catalog_id = mapping.catalog_id,
                    media_type = %mapping.media_type,
                    title = %mapping.title,
                    "File recognized"
                );
                self.storage
                    .add_recognized(mapping.catalog_id, mapping.media_type, item);
                summary.recognized += 1;
            } else {
                debug!(path = %path, title = %metadata.title, year = ?metadata.year, "No catalog match");
                self.storage.add_unrecognized(path);
                summary.unrecognized += 1;
            }
        }

        for path in pending.values() {
            debug!(path = %path, "Extractor returned nothing for file, will retry next scan");
        }
    }

    async fn persist(&self) -> Result<()> {
        self.storage
            .save(&self.config.database_path)
            .await
            .with_context(|| {
                format!("Failed to save registry to {}", self.config.database_path.display())
            })
    }
}

/// Walk `root` and keep video files that are unclassified, non-empty and settled.
///
/// Results are sorted and unique by normalized path.
fn collect_candidates(
    root: &Path,
    skip_set: &HashSet<String>,
    now: SystemTime,
    skip_modification: Duration,
) -> Vec<String> {
    if !root.is_dir() {
        warn!(root = %root.display(), "Storage root does not exist");
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut skipped_known = 0usize;
    let mut skipped_empty = 0usize;
    let mut skipped_recent = 0usize;

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    let mut candidates = Vec::new();
    for path in paths {
        let path_str = path.to_string_lossy().into_owned();
        let key = path_key(&path_str);

        if skip_set.contains(&key) {
            skipped_known += 1;
            continue;
        }

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path_str, error = %e, "Cannot stat file, skipping");
                continue;
            }
        };

        if metadata.len() == 0 {
            skipped_empty += 1;
            continue;
        }

        if !is_settled(metadata.created().ok(), metadata.modified().ok(), now, skip_modification) {
            skipped_recent += 1;
            continue;
        }

        if seen.insert(key) {
            candidates.push(path_str);
        }
    }

    debug!(
        candidates = candidates.len(),
        skipped_known,
        skipped_empty,
        skipped_recent,
        "Filtered scan candidates"
    );

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/a/Movie.mkv")));
        assert!(is_video_file(Path::new("/a/Movie.MP4")));
        assert!(is_video_file(Path::new("/a/Movie.avi")));
        assert!(!is_video_file(Path::new("/a/Movie.srt")));
        assert!(!is_video_file(Path::new("/a/mkv")));
    }

    #[test]
    fn test_is_settled_uses_newest_timestamp() {
        let now = SystemTime::now();
        let old = now - 2 * HOUR;
        let fresh = now - Duration::from_secs(60);

        assert!(is_settled(Some(old), Some(old), now, HOUR));
        assert!(!is_settled(Some(old), Some(fresh), now, HOUR));
        assert!(!is_settled(Some(fresh), Some(old), now, HOUR));
        assert!(is_settled(None, Some(old), now, HOUR));
        assert!(is_settled(None, None, now, HOUR));
    }

    #[test]
    fn test_huge_skip_window_never_settles() {
        let now = SystemTime::now();
        assert!(!is_settled(None, Some(now), now, Duration::MAX));
        assert!(!is_settled(None, Some(now), now, Duration::from_secs(u64::MAX / 2)));
    }

    #[test]
    fn test_scanner_config_saturates_skip_window() {
        let config = Config::from_lookup(|key| match key {
            "TMDB_API_KEY" => Some("k".to_string()),
            "SKIP_MODIFICATION_MINUTES" => Some(u64::MAX.to_string()),
            _ => None,
        })
        .unwrap();

        let scanner_config = ScannerConfig::from_config(&config);
        assert_eq!(scanner_config.skip_modification, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_collect_candidates_filters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("New.S01E01.mkv"), b"data").unwrap();
        fs::write(root.join("Known.2000.mkv"), b"data").unwrap();
        fs::write(root.join("Empty.2000.mkv"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"data").unwrap();

        let known = root.join("Known.2000.mkv").to_string_lossy().into_owned();
        let skip: HashSet<String> = [path_key(&known)].into_iter().collect();
        let later = SystemTime::now() + 2 * HOUR;

        let candidates = collect_candidates(root, &skip, later, HOUR);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].ends_with("New.S01E01.mkv"));

        // Too fresh right now
        assert!(collect_candidates(root, &skip, SystemTime::now(), HOUR).is_empty());
    }

    #[test]
    fn test_collect_candidates_missing_root() {
        let candidates = collect_candidates(
            Path::new("/definitely/not/here"),
            &HashSet::new(),
            SystemTime::now(),
            Duration::ZERO,
        );
        assert!(candidates.is_empty());
    }
}
