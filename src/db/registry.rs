//! Registry storage
//!
//! The registry is one JSON document with three partitions:
//! - `Recognized`: `"<mediaType>:<catalogId>"` -> ordered list of files
//! - `Unrecognized`: files with no confident catalog match
//! - `Ignored`: files excluded from future scans
//!
//! Each partition sits behind its own `RwLock`. Readers always receive
//! copies, and no lock is held across file I/O.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::models::{MediaType, RecognizedKey, RegistryMediaItem};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Normalize a path into the key used for de-duplication:
/// absolute, trailing separators trimmed, lower-cased.
pub fn path_key(path: &str) -> String {
    let raw = Path::new(path);
    let absolute = std::path::absolute(raw).unwrap_or_else(|_| raw.to_path_buf());
    absolute
        .to_string_lossy()
        .trim_end_matches(['/', std::path::MAIN_SEPARATOR])
        .to_lowercase()
}

/// Serialized form of the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(rename = "Recognized", alias = "recognized", default)]
    pub recognized: BTreeMap<String, Vec<RegistryMediaItem>>,
    #[serde(rename = "Unrecognized", alias = "unrecognized", default)]
    pub unrecognized: Vec<String>,
    #[serde(rename = "Ignored", alias = "ignored", default)]
    pub ignored: Vec<String>,
}

/// Lenient on-disk shape: older registries may carry `null` lists.
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(rename = "Recognized", alias = "recognized", default)]
    recognized: Option<BTreeMap<String, Option<Vec<RegistryMediaItem>>>>,
    #[serde(rename = "Unrecognized", alias = "unrecognized", default)]
    unrecognized: Option<Vec<String>>,
    #[serde(rename = "Ignored", alias = "ignored", default)]
    ignored: Option<Vec<String>>,
}

impl From<RawDocument> for RegistryDocument {
    fn from(raw: RawDocument) -> Self {
        Self {
            recognized: raw
                .recognized
                .unwrap_or_default()
                .into_iter()
                .map(|(key, items)| (key, items.unwrap_or_default()))
                .collect(),
            unrecognized: raw.unrecognized.unwrap_or_default(),
            ignored: raw.ignored.unwrap_or_default(),
        }
    }
}

/// Partition sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub recognized_titles: usize,
    pub recognized_files: usize,
    pub unrecognized: usize,
    pub ignored: usize,
}

impl RegistryStats {
    pub fn is_empty(&self) -> bool {
        self.recognized_files == 0 && self.unrecognized == 0 && self.ignored == 0
    }
}

/// Result of [`RegistryStorage::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No registry file yet; in-memory state left untouched
    Missing,
    /// Document parsed and installed
    Loaded(RegistryStats),
    /// File could not be read; in-memory state left untouched
    Unreadable,
    /// File could not be parsed; in-memory state left untouched
    Malformed,
}

/// Entries removed by [`RegistryStorage::prune_missed_files`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub recognized: usize,
    pub unrecognized: usize,
    pub ignored: usize,
    pub empty_keys: usize,
}

/// Concurrency-safe registry index
#[derive(Debug, Default)]
pub struct RegistryStorage {
    recognized: RwLock<BTreeMap<String, Vec<RegistryMediaItem>>>,
    unrecognized: RwLock<Vec<String>>,
    ignored: RwLock<Vec<String>>,
}

impl RegistryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a storage pre-populated from a document
    pub fn from_document(document: RegistryDocument) -> Self {
        let storage = Self::new();
        storage.replace(document);
        storage
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load the registry document from `path`.
    ///
    /// A missing, unreadable or unparsable file is logged and leaves the
    /// current in-memory state untouched.
    pub async fn load(&self, path: impl AsRef<Path>) -> LoadOutcome {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading registry");

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Registry file not found, keeping current state");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read registry file");
                return LoadOutcome::Unreadable;
            }
        };

        match serde_json::from_slice::<RawDocument>(&bytes) {
            Ok(raw) => {
                self.replace(raw.into());
                let stats = self.stats();
                info!(
                    path = %path.display(),
                    recognized = stats.recognized_titles,
                    unrecognized = stats.unrecognized,
                    ignored = stats.ignored,
                    "Registry loaded"
                );
                LoadOutcome::Loaded(stats)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Registry file is malformed, keeping current state");
                LoadOutcome::Malformed
            }
        }
    }

    /// Serialize the whole registry to `path`.
    ///
    /// The document is written to a sibling temp file and renamed over the
    /// target, so readers never observe a half-written registry.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let document = self.snapshot();
        let json = serde_json::to_vec(&document).context("Failed to serialize registry")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create registry directory {}", parent.display()))?;
        }

        let tmp = temp_path_for(path);
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write registry temp file {}", tmp.display()))?;

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to replace registry file {}", path.display()));
        }

        debug!(path = %path.display(), bytes = json.len(), "Registry saved");
        Ok(())
    }

    /// Copy of the full document, one partition at a time
    pub fn snapshot(&self) -> RegistryDocument {
        RegistryDocument {
            recognized: self.recognized(),
            unrecognized: self.unrecognized(),
            ignored: self.ignored(),
        }
    }

    fn replace(&self, document: RegistryDocument) {
        *self.recognized.write() = document.recognized;
        *self.unrecognized.write() = document.unrecognized;
        *self.ignored.write() = document.ignored;
    }

    // =========================================================================
    // Recognized
    // =========================================================================

    /// Append `item` to the list for `<media_type>:<catalog_id>`
    pub fn add_recognized(&self, catalog_id: u64, media_type: MediaType, item: RegistryMediaItem) {
        let key = RecognizedKey::new(catalog_id, media_type).to_string();
        self.recognized.write().entry(key).or_default().push(item);
    }

    /// Snapshot of the files recognized as `<media_type>:<catalog_id>`
    pub fn get_recognized(&self, catalog_id: u64, media_type: MediaType) -> Vec<RegistryMediaItem> {
        let key = RecognizedKey::new(catalog_id, media_type).to_string();
        self.recognized
            .read()
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove `item` from the list stored under `key`
    pub fn remove_recognized(&self, key: &str, item: &RegistryMediaItem) -> bool {
        let mut recognized = self.recognized.write();
        let Some(items) = recognized.get_mut(key) else {
            return false;
        };
        match items.iter().position(|existing| existing == item) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_recognized_by_id(
        &self,
        catalog_id: u64,
        media_type: MediaType,
        item: &RegistryMediaItem,
    ) -> bool {
        self.remove_recognized(&RecognizedKey::new(catalog_id, media_type).to_string(), item)
    }

    /// Snapshot of the whole recognized partition
    pub fn recognized(&self) -> BTreeMap<String, Vec<RegistryMediaItem>> {
        self.recognized.read().clone()
    }

    // =========================================================================
    // Unrecognized / Ignored
    // =========================================================================

    /// Add a path to the unrecognized set. Returns false if already present.
    pub fn add_unrecognized(&self, path: &str) -> bool {
        insert_unique(&self.unrecognized, path)
    }

    pub fn remove_unrecognized(&self, path: &str) -> bool {
        remove_path(&self.unrecognized, path)
    }

    pub fn unrecognized(&self) -> Vec<String> {
        self.unrecognized.read().clone()
    }

    /// Add a path to the ignored set. Returns false if already present.
    pub fn add_ignored(&self, path: &str) -> bool {
        insert_unique(&self.ignored, path)
    }

    pub fn remove_ignored(&self, path: &str) -> bool {
        remove_path(&self.ignored, path)
    }

    pub fn ignored(&self) -> Vec<String> {
        self.ignored.read().clone()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn stats(&self) -> RegistryStats {
        let (recognized_titles, recognized_files) = {
            let recognized = self.recognized.read();
            (recognized.len(), recognized.values().map(Vec::len).sum())
        };
        RegistryStats {
            recognized_titles,
            recognized_files,
            unrecognized: self.unrecognized.read().len(),
            ignored: self.ignored.read().len(),
        }
    }

    /// Normalized keys (see [`path_key`]) of every classified file
    pub fn skip_set(&self) -> HashSet<String> {
        self.all_paths().iter().map(|p| path_key(p)).collect()
    }

    fn all_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .recognized
            .read()
            .values()
            .flatten()
            .map(|item| item.file_path.clone())
            .collect();
        paths.extend(self.unrecognized.read().iter().cloned());
        paths.extend(self.ignored.read().iter().cloned());
        paths
    }

    /// Drop entries whose file no longer exists and any recognized key left empty.
    ///
    /// Existence checks run before any write lock is taken.
    pub fn prune_missed_files(&self) -> PruneSummary {
        let missing: HashSet<String> = self
            .all_paths()
            .into_iter()
            .filter(|p| !Path::new(p).exists())
            .collect();

        let mut summary = PruneSummary::default();

        {
            let mut recognized = self.recognized.write();
            for items in recognized.values_mut() {
                let before = items.len();
                items.retain(|item| !missing.contains(&item.file_path));
                summary.recognized += before - items.len();
            }
            let before = recognized.len();
            recognized.retain(|_, items| !items.is_empty());
            summary.empty_keys = before - recognized.len();
        }

        summary.unrecognized = retain_existing(&self.unrecognized, &missing);
        summary.ignored = retain_existing(&self.ignored, &missing);

        info!(
            recognized = summary.recognized,
            unrecognized = summary.unrecognized,
            ignored = summary.ignored,
            empty_keys = summary.empty_keys,
            "Pruned missing files from registry"
        );

        summary
    }
}

fn insert_unique(partition: &RwLock<Vec<String>>, path: &str) -> bool {
    let key = path_key(path);
    let mut entries = partition.write();
    if entries.iter().any(|existing| path_key(existing) == key) {
        return false;
    }
    entries.push(path.to_string());
    true
}

fn remove_path(partition: &RwLock<Vec<String>>, path: &str) -> bool {
    let key = path_key(path);
    let mut entries = partition.write();
    match entries.iter().position(|existing| path_key(existing) == key) {
        Some(index) => {
            entries.remove(index);
            true
        }
        None => false,
    }
}

fn retain_existing(partition: &RwLock<Vec<String>>, missing: &HashSet<String>) -> usize {
    let mut entries = partition.write();
    let before = entries.len();
    entries.retain(|path| !missing.contains(path));
    before - entries.len()
}

fn temp_path_for(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry".to_string());
    path.with_file_name(format!(".{}.{}-{}.tmp", file_name, std::process::id(), n))
}
