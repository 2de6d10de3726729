//! Quick local search over the storage root
//!
//! Answers "which files on disk look like this title" without touching the
//! registry or any external service. The file listing is cached and
//! refreshed when the root directory changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use super::quality::{self, Quality};
use super::scanner::is_video_file;
use super::text_utils::normalize_season_number;
use super::title_matcher::NormalizedTitles;

const FILE_INDEX_TTL: Duration = Duration::from_secs(3 * 60 * 60);

static FILE_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid year regex"));

static EPISODE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:S(\d+)|Season\s*(\d+)).*?(?:E(\d+)|Episode\s*(\d+))")
        .expect("valid episode marker regex")
});

/// What the caller is looking for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
}

/// A movie file that matched the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieMatch {
    pub file_path: String,
    pub file_name: String,
    pub quality: Quality,
}

/// An episode file that matched the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMatch {
    pub file_path: String,
    pub file_name: String,
    pub season: String,
    pub episode: String,
    pub quality: Quality,
}

/// Video file listing of the root, stamped with when and against which root mtime it was built
struct FileIndex {
    built_at: Instant,
    root_modified: Option<SystemTime>,
    files: Arc<Vec<PathBuf>>,
}

impl FileIndex {
    /// Usable until the TTL runs out or the root directory is modified after the listing
    fn is_fresh(&self, now: Instant, root_modified: Option<SystemTime>) -> bool {
        if now.saturating_duration_since(self.built_at) >= FILE_INDEX_TTL {
            return false;
        }
        match (self.root_modified, root_modified) {
            (Some(listed), Some(current)) => current <= listed,
            _ => true,
        }
    }
}

/// Searches video files under one root directory
pub struct LibrarySearch {
    root: PathBuf,
    index: RwLock<Option<FileIndex>>,
}

impl LibrarySearch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every video file under the root. Empty when the root does not exist.
    pub fn video_files(&self) -> Arc<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Arc::new(Vec::new());
        }

        let root_modified = std::fs::metadata(&self.root)
            .and_then(|m| m.modified())
            .ok();

        if let Some(index) = self.index.read().as_ref() {
            if index.is_fresh(Instant::now(), root_modified) {
                return index.files.clone();
            }
            debug!(root = %self.root.display(), "File index stale, refreshing");
        }

        let files = Arc::new(list_video_files(&self.root));
        *self.index.write() = Some(FileIndex {
            built_at: Instant::now(),
            root_modified,
            files: files.clone(),
        });
        files
    }

    /// Drop the cached listing
    pub fn invalidate(&self) {
        *self.index.write() = None;
    }

    /// Movie files whose name matches the title and does not contradict the year
    pub fn find_movies(&self, query: &SearchQuery) -> Vec<MovieMatch> {
        let titles = NormalizedTitles::new(&query.title, query.original_title.as_deref());

        self.video_files()
            .iter()
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?;
                if !title_matches(&titles, path) || has_year_mismatch(file_name, query.year) {
                    return None;
                }
                Some(MovieMatch {
                    file_path: path.to_string_lossy().into_owned(),
                    file_name: file_name.to_string(),
                    quality: quality::classify_path(path),
                })
            })
            .collect()
    }

    /// Episode files matching the title, keyed by season (leading zeros stripped)
    pub fn find_episodes(&self, query: &SearchQuery) -> BTreeMap<String, Vec<EpisodeMatch>> {
        let titles = NormalizedTitles::new(&query.title, query.original_title.as_deref());
        let mut seasons: BTreeMap<String, Vec<EpisodeMatch>> = BTreeMap::new();

        for path in self.video_files().iter() {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !title_matches(&titles, path) {
                continue;
            }
            let Some((season, episode)) = episode_marker(file_name) else {
                continue;
            };

            seasons
                .entry(normalize_season_number(&season))
                .or_default()
                .push(EpisodeMatch {
                    file_path: path.to_string_lossy().into_owned(),
                    file_name: file_name.to_string(),
                    season,
                    episode,
                    quality: quality::classify_path(path),
                });
        }

        for episodes in seasons.values_mut() {
            episodes.sort_by_key(|e| e.episode.parse::<u32>().unwrap_or(u32::MAX));
        }

        seasons
    }
}

fn list_video_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files.dedup();

    debug!(root = %root.display(), count = files.len(), "Listed video files");
    files
}

fn title_matches(titles: &NormalizedTitles, path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| titles.matches_file_name(stem))
}

/// A file year further than one year from the query year is a mismatch
fn has_year_mismatch(file_name: &str, query_year: Option<i32>) -> bool {
    let Some(query_year) = query_year.filter(|y| *y > 0) else {
        return false;
    };

    FILE_YEAR
        .captures(file_name)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .is_some_and(|file_year| (file_year - query_year).abs() > 1)
}

/// Raw (season, episode) digits from `S01E02` or `Season 1 Episode 2`
fn episode_marker(file_name: &str) -> Option<(String, String)> {
    let caps = EPISODE_MARKER.captures(file_name)?;
    let season = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
    let episode = caps.get(3).or_else(|| caps.get(4))?.as_str().to_string();
    Some((season, episode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_has_year_mismatch() {
        assert!(!has_year_mismatch("Movie.1999.mkv", Some(2000)));
        assert!(has_year_mismatch("Movie.1995.mkv", Some(2000)));
        assert!(!has_year_mismatch("Movie.mkv", Some(2000)));
        assert!(!has_year_mismatch("Movie.1995.mkv", None));
    }

    #[test]
    fn test_episode_marker() {
        assert_eq!(
            episode_marker("Show.S01E02.mkv"),
            Some(("01".to_string(), "02".to_string()))
        );
        assert_eq!(
            episode_marker("Show Season 2 Episode 10.mkv"),
            Some(("2".to_string(), "10".to_string()))
        );
        assert_eq!(episode_marker("Show.2010.mkv"), None);
    }

    #[test]
    fn test_find_movies() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "The.Matrix.1999.1080p.mkv");
        touch(dir.path(), "The.Matrix.2021.mkv");
        touch(dir.path(), "Other.Film.1999.mkv");
        touch(dir.path(), "The.Matrix.1999.nfo");

        let search = LibrarySearch::new(dir.path());
        let movies = search.find_movies(&SearchQuery {
            title: "The Matrix".to_string(),
            original_title: None,
            year: Some(1999),
        });

        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].file_name, "The.Matrix.1999.1080p.mkv");
        assert_eq!(movies[0].quality, Quality::FullHd1080);
    }

    #[test]
    fn test_find_episodes_groups_by_season() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("Season 1");
        fs::create_dir(&nested).unwrap();
        touch(&nested, "Show.S01E02.720p.mkv");
        touch(&nested, "Show.S01E01.720p.mkv");
        touch(dir.path(), "Show.S02E01.mp4");
        touch(dir.path(), "Show.Special.mkv");

        let search = LibrarySearch::new(dir.path());
        let seasons = search.find_episodes(&SearchQuery {
            title: "Show".to_string(),
            ..Default::default()
        });

        assert_eq!(seasons.keys().collect::<Vec<_>>(), vec!["1", "2"]);
        let first: Vec<&str> = seasons["1"].iter().map(|e| e.episode.as_str()).collect();
        assert_eq!(first, vec!["01", "02"]);
        assert_eq!(seasons["1"][0].quality, Quality::Hd720);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let search = LibrarySearch::new("/definitely/not/here");
        assert!(search.video_files().is_empty());
    }

    #[test]
    fn test_file_index_freshness() {
        let built_at = Instant::now();
        let listed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let index = FileIndex {
            built_at,
            root_modified: Some(listed),
            files: Arc::new(Vec::new()),
        };

        assert!(index.is_fresh(built_at, Some(listed)));
        assert!(index.is_fresh(built_at, None));
        assert!(!index.is_fresh(built_at, Some(listed + Duration::from_secs(1))));
        assert!(!index.is_fresh(built_at + FILE_INDEX_TTL, Some(listed)));
    }

    #[test]
    fn test_index_is_cached_until_invalidated() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "A.mkv");

        let search = LibrarySearch::new(dir.path());
        assert_eq!(search.video_files().len(), 1);

        // Write inside a subdirectory so the root mtime does not move
        let nested = dir.path().join("sub");
        fs::create_dir(&nested).unwrap();
        search.video_files();
        touch(&nested, "B.mkv");
        assert_eq!(search.video_files().len(), 1);

        search.invalidate();
        assert_eq!(search.video_files().len(), 2);
    }
}
