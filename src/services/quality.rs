//! Video quality classification from release-tag vocabulary
//!
//! An ordered rule table maps tags like "bdrip" or "hdcam" to one of four
//! labels. The first matching row wins; when no tag is present the file
//! size decides.

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Sd480 => "480p",
            Quality::Hd720 => "720p",
            Quality::FullHd1080 => "1080p",
            Quality::Uhd2160 => "2160p",
        }
    }

    /// Size heuristic used when no tag matched
    pub fn from_size_mb(size_mb: u64) -> Self {
        match size_mb {
            s if s > 4000 => Quality::Uhd2160,
            s if s > 1000 => Quality::FullHd1080,
            s if s > 500 => Quality::Hd720,
            _ => Quality::Sd480,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag that only counts when a resolution marker appears later in the name
struct ConditionalTag {
    pattern: Regex,
    followed_by: &'static str,
}

struct QualityRule {
    tags: Regex,
    conditional: Vec<ConditionalTag>,
    quality: Quality,
}

impl QualityRule {
    fn matches(&self, name: &str) -> bool {
        self.tags.is_match(name)
            || self.conditional.iter().any(|tag| {
                tag.pattern
                    .captures_iter(name)
                    .filter_map(|caps| caps.get(1))
                    .any(|m| name[m.end()..].contains(tag.followed_by))
            })
    }
}

/// Wrap an alternation so it only matches as a whole tag
fn tag_regex(alternation: &str) -> Regex {
    Regex::new(&format!(r"(?:^|[^a-z0-9])({})(?:[^a-z0-9]|$)", alternation))
        .expect("valid quality tag regex")
}

const WEB_DL: &str = r"web[\-\s]?dl";

static RULES: Lazy<Vec<QualityRule>> = Lazy::new(|| {
    let web_dl = |followed_by| ConditionalTag {
        pattern: tag_regex(WEB_DL),
        followed_by,
    };

    vec![
        QualityRule {
            tags: tag_regex(r"4k|2160p|uhd|ultra[\s\-]?hd"),
            conditional: vec![],
            quality: Quality::Uhd2160,
        },
        QualityRule {
            tags: tag_regex(r"1080p|full[\s\-]?hd|fhd|bdrip|blu[\-\s]?ray|remux"),
            conditional: vec![web_dl("1080p")],
            quality: Quality::FullHd1080,
        },
        QualityRule {
            tags: tag_regex(r"web[\-\s]?dlrip|720p|hd|hdrip|web[\-\s]?rip|brrip"),
            conditional: vec![web_dl("720p")],
            quality: Quality::Hd720,
        },
        QualityRule {
            tags: tag_regex(r"480p|sd|dvd|dvdrip|tvrip|satrip|iptvrip"),
            conditional: vec![web_dl("480p")],
            quality: Quality::Sd480,
        },
        QualityRule {
            tags: tag_regex(r"camrip|hdcam|cam|ts|telesync|tc|telecine|scr|screener|workprint|wp"),
            conditional: vec![],
            quality: Quality::Sd480,
        },
    ]
});

/// Classify by tag only
pub fn classify_name(file_name: &str) -> Option<Quality> {
    let name = file_name.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&name))
        .map(|rule| rule.quality)
}

/// Classify by tag, falling back to the size heuristic
pub fn classify(file_name: &str, size_bytes: Option<u64>) -> Quality {
    classify_name(file_name)
        .unwrap_or_else(|| Quality::from_size_mb(size_bytes.unwrap_or(0) / (1024 * 1024)))
}

/// Classify a file on disk; an unreadable file counts as zero bytes
pub fn classify_path(path: &Path) -> Quality {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let size = std::fs::metadata(path).ok().map(|m| m.len());
    classify(&file_name, size)
}
