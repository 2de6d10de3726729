//! Integration tests for registry scan cycles
//!
//! These tests drive [`RegistryScanner`] end to end against a temp storage
//! root with scripted extractor and mapper implementations:
//! - Recognition and persistence
//! - Candidate filtering (skip set, empty files, debounce window)
//! - Extractor retries and aborts
//! - Overlap guard of the scan job

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use media_registry::db::{MediaType, RegistryStorage};
use media_registry::jobs::ScanJob;
use media_registry::services::{
    CatalogMapper, CatalogMapping, ExtractedMetadata, ExtractorError, MetadataExtractor,
    RegistryScanner, RetryConfig, ScanPhase, ScannerConfig,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;

const MINUTE: Duration = Duration::from_secs(60);

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Derives metadata from `<Title>.SxxEyy...` file names.
///
/// A file name starting with `Untitled` yields an empty title.
#[derive(Default)]
struct ScriptedExtractor {
    fail_on: Option<&'static str>,
    calls: AtomicUsize,
    started: Option<Arc<Notify>>,
    gate: Option<Arc<Notify>>,
}

fn metadata_for(path: &str) -> ExtractedMetadata {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let mut parts = stem.split('.');
    let title = parts.next().unwrap_or_default();

    let mut metadata = ExtractedMetadata {
        file_path: path.to_string(),
        title: if title.starts_with("Untitled") { String::new() } else { title.to_string() },
        ..Default::default()
    };

    for part in parts {
        let bytes = part.as_bytes();
        if part.len() == 6 && bytes[0] == b'S' && bytes[3] == b'E' {
            metadata.season_number = part[1..3].parse().ok();
            metadata.episode_number = part[4..6].parse().ok();
        }
    }
    metadata
}

#[async_trait]
impl MetadataExtractor for ScriptedExtractor {
    async fn extract(&self, file_paths: &[String]) -> Result<Vec<ExtractedMetadata>, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(started) = &self.started {
            started.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(needle) = self.fail_on
            && file_paths.iter().any(|p| p.contains(needle))
        {
            return Err(ExtractorError::MalformedResponse("scripted failure".to_string()));
        }

        Ok(file_paths.iter().map(|p| metadata_for(p)).collect())
    }
}

/// "Show" is tv:42, "Matrix" is movie:603, "Flaky" fails, anything else has no match
struct ScriptedMapper;

#[async_trait]
impl CatalogMapper for ScriptedMapper {
    async fn map(&self, metadata: &ExtractedMetadata) -> Result<CatalogMapping> {
        let mut mapping = CatalogMapping::no_match(metadata);
        match metadata.title.as_str() {
            "Show" => {
                mapping.catalog_id = 42;
                mapping.media_type = MediaType::Tv;
                // No episode-level data from the catalog
                mapping.season_number = None;
                mapping.episode_number = None;
            }
            "Matrix" => {
                mapping.catalog_id = 603;
                mapping.media_type = MediaType::Movie;
            }
            "Flaky" => anyhow::bail!("catalog unavailable"),
            _ => {}
        }
        Ok(mapping)
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    db_path: PathBuf,
}

impl Fixture {
    fn new(files: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("media");
        std::fs::create_dir_all(&root).unwrap();
        for file in files {
            std::fs::write(root.join(file), b"video").unwrap();
        }
        let db_path = dir.path().join("data").join("db.json");
        Self { _dir: dir, root, db_path }
    }

    fn path(&self, file: &str) -> String {
        self.root.join(file).to_string_lossy().into_owned()
    }

    fn config(&self, skip_modification: Duration, batch_size: usize) -> ScannerConfig {
        ScannerConfig {
            storage_root: self.root.clone(),
            database_path: self.db_path.clone(),
            skip_modification,
            batch_size,
            batch_delay: Duration::ZERO,
            extract_retry: RetryConfig::fixed(2, Duration::from_millis(1)),
        }
    }

    fn scanner(
        &self,
        extractor: Arc<ScriptedExtractor>,
        config: ScannerConfig,
    ) -> (Arc<RegistryStorage>, RegistryScanner) {
        let storage = Arc::new(RegistryStorage::new());
        let scanner = RegistryScanner::new(storage.clone(), extractor, Arc::new(ScriptedMapper), config);
        (storage, scanner)
    }

    async fn reload(&self) -> RegistryStorage {
        let storage = RegistryStorage::new();
        storage.load(&self.db_path).await;
        storage
    }
}

// ============================================================================
// Recognition
// ============================================================================

#[tokio::test]
async fn test_episodes_are_recognized_and_persisted() {
    let fixture = Fixture::new(&["Show.S01E01.1080p.mkv", "Show.S01E02.720p.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor.clone(), fixture.config(Duration::ZERO, 10));

    let summary = scanner.scan().await.unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.recognized, 2);
    assert!(!summary.aborted);
    assert_eq!(scanner.phase(), ScanPhase::Idle);

    let mut items = storage.get_recognized(42, MediaType::Tv);
    items.sort_by_key(|item| item.episode_number);
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.season_number == Some(1)));
    assert_eq!(items[0].episode_number, Some(1));
    assert_eq!(items[1].episode_number, Some(2));

    let reloaded = fixture.reload().await;
    assert_eq!(reloaded.get_recognized(42, MediaType::Tv).len(), 2);
}

#[tokio::test]
async fn test_classified_files_are_skipped_next_cycle() {
    let fixture = Fixture::new(&["Show.S01E01.mkv", "Nothing.2001.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor.clone(), fixture.config(Duration::ZERO, 10));

    scanner.scan().await.unwrap();
    assert_eq!(storage.unrecognized(), vec![fixture.path("Nothing.2001.mkv")]);

    let second = scanner.scan().await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_title_and_mapping_failure() {
    let fixture = Fixture::new(&["Untitled.mkv", "Flaky.2010.mkv", "Matrix.1999.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor, fixture.config(Duration::ZERO, 10));

    let summary = scanner.scan().await.unwrap();
    assert_eq!(summary.recognized, 1);
    assert_eq!(summary.unrecognized, 1);
    assert_eq!(summary.unclassified, 1);

    assert_eq!(storage.unrecognized(), vec![fixture.path("Untitled.mkv")]);
    assert_eq!(storage.get_recognized(603, MediaType::Movie).len(), 1);
    assert!(!storage.skip_set().iter().any(|key| key.contains("flaky")));

    // The failed mapping is retried by the next cycle
    let again = scanner.scan().await.unwrap();
    assert_eq!(again.candidates, 1);
}

#[tokio::test]
async fn test_removed_files_are_pruned() {
    let fixture = Fixture::new(&["Matrix.1999.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor, fixture.config(Duration::ZERO, 10));

    scanner.scan().await.unwrap();
    assert_eq!(storage.get_recognized(603, MediaType::Movie).len(), 1);

    std::fs::remove_file(fixture.root.join("Matrix.1999.mkv")).unwrap();
    let summary = scanner.scan().await.unwrap();
    assert_eq!(summary.pruned.recognized, 1);
    assert_eq!(summary.pruned.empty_keys, 1);
    assert!(fixture.reload().await.recognized().is_empty());
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_recent_files_wait_for_debounce_window() {
    let fixture = Fixture::new(&["Show.S01E01.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor, fixture.config(60 * MINUTE, 10));

    let now = SystemTime::now();

    let early = scanner.scan_at(now + MINUTE).await.unwrap();
    assert_eq!(early.candidates, 0);
    assert!(storage.recognized().is_empty());
    // A no-op cycle still writes the registry
    assert!(fixture.db_path.exists());

    let later = scanner.scan_at(now + 61 * MINUTE).await.unwrap();
    assert_eq!(later.candidates, 1);
    assert_eq!(storage.get_recognized(42, MediaType::Tv).len(), 1);
}

#[tokio::test]
async fn test_empty_and_non_video_files_are_not_candidates() {
    let fixture = Fixture::new(&["Show.S01E01.mkv", "notes.txt"]);
    std::fs::write(fixture.root.join("Empty.mkv"), b"").unwrap();
    let extractor = Arc::new(ScriptedExtractor::default());
    let (_storage, scanner) = fixture.scanner(extractor, fixture.config(Duration::ZERO, 10));

    let summary = scanner.scan().await.unwrap();
    assert_eq!(summary.candidates, 1);
}

#[tokio::test]
async fn test_ignored_files_are_never_sent() {
    let fixture = Fixture::new(&["Show.S01E01.mkv"]);
    let extractor = Arc::new(ScriptedExtractor::default());
    let (storage, scanner) = fixture.scanner(extractor.clone(), fixture.config(Duration::ZERO, 10));

    storage.add_ignored(&fixture.path("Show.S01E01.mkv"));
    storage.save(&fixture.db_path).await.unwrap();

    let summary = scanner.scan().await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Extractor failures
// ============================================================================

#[tokio::test]
async fn test_extractor_abort_keeps_earlier_batches() {
    let fixture = Fixture::new(&["Alpha.S01E01.mkv", "Beta.S01E01.mkv", "Gamma.S01E01.mkv"]);
    let extractor = Arc::new(ScriptedExtractor {
        fail_on: Some("Beta"),
        ..Default::default()
    });
    let (_storage, scanner) = fixture.scanner(extractor.clone(), fixture.config(Duration::ZERO, 1));

    let summary = scanner.scan().await.unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.batches, 1);
    // Alpha once, Beta twice (retry budget), Gamma never
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);

    let reloaded = fixture.reload().await;
    assert_eq!(reloaded.unrecognized(), vec![fixture.path("Alpha.S01E01.mkv")]);
}

// ============================================================================
// Scan job
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_run_is_skipped() {
    let fixture = Fixture::new(&["Show.S01E01.mkv"]);
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let extractor = Arc::new(ScriptedExtractor {
        started: Some(started.clone()),
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (storage, scanner) = fixture.scanner(extractor.clone(), fixture.config(Duration::ZERO, 10));
    let job = Arc::new(ScanJob::new(Arc::new(scanner)));

    let running = job.trigger();
    started.notified().await;
    assert!(job.is_running());
    assert_eq!(job.scanner().phase(), ScanPhase::Extracting);

    let skipped = job.run().await.unwrap();
    assert!(skipped.is_none());

    gate.notify_one();
    running.await.unwrap();

    assert!(!job.is_running());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.get_recognized(42, MediaType::Tv).len(), 1);
}
