//! Registry record types
//!
//! Field names are serialized in PascalCase so the on-disk document stays
//! compatible with registries written by earlier releases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single classified file inside a recognized catalog title
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryMediaItem {
    #[serde(rename = "FilePath", alias = "filePath", alias = "file_path")]
    pub file_path: String,
    #[serde(
        rename = "SeasonNumber",
        alias = "seasonNumber",
        alias = "season_number",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub season_number: Option<i32>,
    #[serde(
        rename = "EpisodeNumber",
        alias = "episodeNumber",
        alias = "episode_number",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub episode_number: Option<i32>,
}

impl RegistryMediaItem {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            season_number: None,
            episode_number: None,
        }
    }

    pub fn with_episode(mut self, season: Option<i32>, episode: Option<i32>) -> Self {
        self.season_number = season;
        self.episode_number = episode;
        self
    }
}

/// Catalog media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => anyhow::bail!("Unknown media type: {}", other),
        }
    }
}

/// Key of a recognized partition entry: `"<mediaType>:<catalogId>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecognizedKey {
    pub media_type: MediaType,
    pub catalog_id: u64,
}

impl RecognizedKey {
    pub fn new(catalog_id: u64, media_type: MediaType) -> Self {
        Self {
            media_type,
            catalog_id,
        }
    }
}

impl fmt::Display for RecognizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.media_type, self.catalog_id)
    }
}

impl FromStr for RecognizedKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (media_type, id) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Malformed registry key: {}", s))?;
        Ok(Self {
            media_type: media_type.parse()?,
            catalog_id: id
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Malformed catalog id in key: {}", s))?,
        })
    }
}
