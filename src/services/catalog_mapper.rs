//! Catalog mapping: extracted metadata -> canonical catalog title
//!
//! Movies need a year and take the first candidate released within a year
//! of it. Series prefer year-eligible candidates but fall back to the most
//! popular result overall.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::extractor::ExtractedMetadata;
use super::tmdb::{CatalogCandidate, CatalogClient, CatalogSearch};
use crate::db::MediaType;

/// Allowed distance between the query year and a candidate's year
const YEAR_TOLERANCE: i32 = 1;

/// Outcome of mapping one file. `catalog_id == 0` means no match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMapping {
    pub catalog_id: u64,
    pub media_type: MediaType,
    pub title: String,
    pub original_title: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub episode_name: Option<String>,
    pub release_year: Option<i32>,
    pub source_file_path: String,
}

impl CatalogMapping {
    /// Sentinel carrying the extractor's best guess for diagnostics
    pub fn no_match(metadata: &ExtractedMetadata) -> Self {
        Self {
            catalog_id: 0,
            media_type: media_type_of(metadata),
            title: metadata.title.clone(),
            original_title: metadata.original_title.clone(),
            season_number: metadata.season_number,
            episode_number: metadata.episode_number,
            episode_name: metadata.episode_name.clone(),
            release_year: metadata.year,
            source_file_path: metadata.file_path.clone(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.catalog_id != 0
    }
}

/// Maps extracted metadata onto the catalog
#[async_trait]
pub trait CatalogMapper: Send + Sync {
    /// Errors are transport failures; "no match" is an `Ok` sentinel
    async fn map(&self, metadata: &ExtractedMetadata) -> Result<CatalogMapping>;
}

/// Series when both season and episode are known
pub fn media_type_of(metadata: &ExtractedMetadata) -> MediaType {
    if metadata.is_episode() {
        MediaType::Tv
    } else {
        MediaType::Movie
    }
}

fn within_year(candidate: &CatalogCandidate, year: i32) -> bool {
    candidate
        .year
        .is_some_and(|y| (y - year).abs() <= YEAR_TOLERANCE)
}

/// First candidate, in catalog order, with the greatest popularity
fn most_popular<'a>(candidates: impl Iterator<Item = &'a CatalogCandidate>) -> Option<&'a CatalogCandidate> {
    candidates.reduce(|best, candidate| {
        if candidate.popularity > best.popularity {
            candidate
        } else {
            best
        }
    })
}

/// First candidate released within a year of `year`; nothing without a year
pub fn select_movie(candidates: &[CatalogCandidate], year: Option<i32>) -> Option<&CatalogCandidate> {
    let year = year?;
    candidates.iter().find(|c| within_year(c, year))
}

/// Most popular year-eligible candidate, else the most popular overall
pub fn select_series(candidates: &[CatalogCandidate], year: Option<i32>) -> Option<&CatalogCandidate> {
    if let Some(year) = year
        && let Some(best) = most_popular(candidates.iter().filter(|c| within_year(c, year)))
    {
        return Some(best);
    }
    most_popular(candidates.iter())
}

/// Mapper driving a [`CatalogClient`] such as TMDB
pub struct TmdbCatalogMapper {
    client: Arc<dyn CatalogClient>,
    language: String,
}

impl TmdbCatalogMapper {
    pub fn new(client: Arc<dyn CatalogClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            language: language.into(),
        }
    }

    /// Narrowed search first; without year and language when that finds nothing
    async fn search(&self, media_type: MediaType, metadata: &ExtractedMetadata) -> Result<Vec<CatalogCandidate>> {
        let title = metadata.title.trim().to_string();
        let narrowed = CatalogSearch {
            media_type,
            title: title.clone(),
            year: metadata.year,
            language: Some(self.language.clone()),
        };

        let results = self.client.search(&narrowed).await?;
        if !results.is_empty() {
            return Ok(results);
        }

        debug!(title = %title, "No narrowed results, retrying broad search");
        self.client
            .search(&CatalogSearch {
                media_type,
                title,
                year: None,
                language: None,
            })
            .await
    }
}

#[async_trait]
impl CatalogMapper for TmdbCatalogMapper {
    async fn map(&self, metadata: &ExtractedMetadata) -> Result<CatalogMapping> {
        if !metadata.has_title() {
            return Ok(CatalogMapping::no_match(metadata));
        }

        let media_type = media_type_of(metadata);
        let candidates = self.search(media_type, metadata).await?;

        let selected = match media_type {
            MediaType::Movie => select_movie(&candidates, metadata.year),
            MediaType::Tv => select_series(&candidates, metadata.year),
        };
        let Some(candidate) = selected else {
            debug!(
                path = %metadata.file_path,
                title = %metadata.title,
                candidates = candidates.len(),
                "No catalog candidate selected"
            );
            return Ok(CatalogMapping::no_match(metadata));
        };

        let details = self.client.details(media_type, candidate.id).await?;
        let (title, original_title, release_year) = match details {
            Some(d) => (d.title, d.original_title, d.year),
            None => (
                candidate.title.clone(),
                candidate.original_title.clone(),
                candidate.year,
            ),
        };

        let mut mapping = CatalogMapping {
            catalog_id: candidate.id,
            media_type,
            title,
            original_title,
            season_number: None,
            episode_number: None,
            episode_name: None,
            release_year,
            source_file_path: metadata.file_path.clone(),
        };

        if let (MediaType::Tv, Some(season), Some(episode)) =
            (media_type, metadata.season_number, metadata.episode_number)
        {
            let details = match self.client.episode(candidate.id, season, episode).await {
                Ok(details) => details,
                Err(e) => {
                    warn!(path = %metadata.file_path, error = %e, "Episode lookup failed");
                    None
                }
            };
            match details {
                Some(ep) => {
                    mapping.season_number = Some(ep.season_number);
                    mapping.episode_number = Some(ep.episode_number);
                    mapping.episode_name = ep.name;
                }
                None => {
                    mapping.season_number = Some(season);
                    mapping.episode_number = Some(episode);
                    mapping.episode_name = metadata.episode_name.clone();
                }
            }
        }

        debug!(
            path = %metadata.file_path,
            catalog_id = mapping.catalog_id,
            media_type = %mapping.media_type,
            title = %mapping.title,
            "Mapped to catalog"
        );
        Ok(mapping)
    }
}
