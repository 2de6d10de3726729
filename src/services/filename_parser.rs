//! Filename parser for scene-style release names
//!
//! Parses names like:
//! - "Chicago.Fire.S14E08.Pilot.1080p.WEB.mkv"
//! - "[Group] Some Anime [05] - Episode Title [1080p].mkv"
//! - "The.Matrix.1999.BDRip.avi"
//!
//! Best effort only: every field is optional, and the result is used when
//! no smarter extractor is configured and for quick local searches.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parsed media information from a filename
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMediaName {
    pub title: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub year: Option<i32>,
    pub episode_name: Option<String>,
    pub is_ova: bool,
}

/// Release tags that terminate a title or episode name
const QUALITY_TAGS: &str = concat!(
    r"8k|4320p|ultrahd8k|8k(?:-|\s)?uhd|4k|2160p|uhd|ultra(?:-|\s)?hd|1440p|2k|qhd|quad(?:-|\s)?hd|",
    r"1080p|full(?:-|\s)?hd|fhd|720p|hd|480p|sd|standard(?:-|\s)?def|360p|240p|",
    r"camrip|hdcam|cam|ts|telesync|tc|telecine|scr|screener|workprint|wp|",
    r"bdrip|blu(?:-|\s)?ray|bd(?:-|\s)?remux|remux|brrip|",
    r"web(?:-|\s)?dlrip|webdlrip|web(?:-|\s)?dl|webdl|web(?:-|\s)?rip|webrip|",
    r"dvd(?:-|\s)?rip|dvdrip|dvd(?:-|\s)?r|dvdr|dvd|",
    r"tv(?:-|\s)?rip|tvrip|sat(?:-|\s)?rip|satrip|iptv(?:-|\s)?rip|iptvrip"
);

static EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[a-zA-Z0-9]+$").expect("valid extension regex"));
static DELIMITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[._]").expect("valid delimiter regex"));
static OVA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bOVA\b").expect("valid OVA regex"));
static SXXEXX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)S(\d{1,2})E(\d{1,2})").expect("valid SxxExx regex"));
static OTHER_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)(?:Season\s*(\d{1,2})\s*Episode\s*#?(\d{1,2}))",
        r"|(?:Part\s*(\d{1,2}))",
        r"|(?:E(\d{1,2}))",
        r"|(?:Episode\s*#?(\d{1,2}))",
        r"|(?:\[(\d{1,2})(?:-\d)?\])"
    ))
    .expect("valid episode regex")
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"19\d{2}|20\d{2}").expect("valid year regex"));
static LEADING_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\d+\]\s*").expect("valid index regex"));
static LEADING_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[^\]]+\]\s*").expect("valid group regex"));
static TITLE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\s*(?:\(\d{{4}}\)|\d{{4}}|\[[^\]]+\]|\((?:{q})\)|\b(?:{q})\b)",
        q = QUALITY_TAGS
    ))
    .expect("valid title end regex")
});
static EPISODE_NAME_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\s*(?:\[|\(|\d{{4}}|\b(?:{q})\b)", q = QUALITY_TAGS))
        .expect("valid episode name end regex")
});
static BRACKET_INDEX_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d{1,2}(?:-\d)?\]\s*[-:]?\s*").expect("valid marker regex"));
static TRAILING_PAREN_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^)]+\)$").expect("valid paren regex"));
static TRAILING_OPEN_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\($").expect("valid paren regex"));
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("valid space regex"));
static NAME_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r" - |: ").expect("valid split regex"));

/// Parse a file path (only the file name is considered)
pub fn parse_media_path(path: &str) -> ParsedMediaName {
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    parse_media_name(&file_name)
}

/// Parse a bare file name
pub fn parse_media_name(file_name: &str) -> ParsedMediaName {
    let name = normalize_name(file_name);
    let mut result = ParsedMediaName {
        is_ova: OVA.is_match(&name),
        ..Default::default()
    };

    let (season, episode) = parse_season_episode(&name, result.is_ova);
    result.season = season;
    result.episode = episode;
    result.year = parse_year(&name);

    result.title = match (season, episode) {
        (Some(s), Some(e)) => title_before_episode(&name, s, e),
        _ => None,
    };

    if !result.is_ova && episode.is_some() {
        result.episode_name = episode_name(&name, season, episode);
    }

    // "Show - Episode" with nothing recognizable before the marker
    if result.title.is_none()
        && let Some(ep_name) = result.episode_name.clone()
    {
        let parts: Vec<&str> = NAME_SPLIT.split(&ep_name).collect();
        if parts.len() > 1 {
            result.title = clean_text(parts[0]);
            result.episode_name = clean_text(parts[1]);
        }
    }

    if result.title.is_none() {
        result.title = general_title(&name);
    }

    debug!(
        file_name = file_name,
        title = ?result.title,
        season = ?result.season,
        episode = ?result.episode,
        year = ?result.year,
        "Parsed filename"
    );

    result
}

/// Strip the extension and turn dots/underscores into spaces
fn normalize_name(file_name: &str) -> String {
    let stem = EXTENSION.replace(file_name, "");
    DELIMITERS.replace_all(&stem, " ").trim().to_string()
}

fn parse_season_episode(name: &str, is_ova: bool) -> (Option<i32>, Option<i32>) {
    if let Some(caps) = SXXEXX.captures(name) {
        return (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        );
    }

    if is_ova {
        return (None, None);
    }

    let Some(caps) = OTHER_EPISODE.captures(name) else {
        return (None, None);
    };
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i32>().ok());

    if let (Some(season), Some(episode)) = (number(1), number(2)) {
        return (Some(season), Some(episode));
    }
    // Part N, En, Episode N, [NN]
    let episode = number(3).or(number(4)).or(number(5)).or(number(6));
    (None, episode)
}

/// First 19xx/20xx not touching another digit and not followed by an opening parenthesis
fn parse_year(name: &str) -> Option<i32> {
    YEAR.find_iter(name)
        .find(|m| {
            let before = name[..m.start()].chars().next_back();
            let after = name[m.end()..].chars().next();
            !matches!(before, Some(c) if c.is_ascii_digit())
                && !matches!(after, Some(c) if c.is_ascii_digit() || c == '(')
        })
        .and_then(|m| m.as_str().parse().ok())
}

/// Text preceding the episode marker or a year
fn title_before_episode(name: &str, season: i32, episode: i32) -> Option<String> {
    let body = LEADING_INDEX.replace(name, "");
    let end = Regex::new(&format!(
        r"(?i)\s+(?:S0?{s}E0?{e}\b|Season\s*0?{s}\b|\d{{4}}\b)",
        s = season,
        e = episode
    ))
    .ok()?;
    let cut = end.find(&body)?;
    clean_text(&body[..cut.start()])
}

/// Shortest non-empty prefix ending before a year, bracket group or quality tag
fn general_title(name: &str) -> Option<String> {
    let body = LEADING_GROUP.replace(name, "");
    let first_char_end = body
        .char_indices()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    let end = TITLE_END
        .find_at(&body, first_char_end)
        .map(|m| m.start())
        .unwrap_or(body.len());
    clean_text(&body[..end])
}

/// Text following the episode marker, up to the next bracket, year or tag
fn episode_name(name: &str, season: Option<i32>, episode: Option<i32>) -> Option<String> {
    let start = match (season, episode) {
        (Some(s), Some(e)) => {
            let marker = Regex::new(&format!(r"(?i)S0?{}E0?{}\s*[-:]?\s*", s, e)).ok()?;
            marker.find(name)?.end()
        }
        _ => BRACKET_INDEX_MARKER.find(name)?.end(),
    };

    let rest = &name[start..];
    let end = EPISODE_NAME_END
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    let raw = TRAILING_PAREN_GROUP.replace(&rest[..end], "");
    clean_text(&raw)
}

fn clean_text(text: &str) -> Option<String> {
    let text = TRAILING_OPEN_PAREN.replace(text.trim(), "");
    let text = MULTI_SPACE.replace_all(text.trim(), " ");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sxxexx() {
        let result = parse_media_path("/media/Chicago.Fire.S14E08.Pilot.1080p.WEB.mkv");
        assert_eq!(result.title.as_deref(), Some("Chicago Fire"));
        assert_eq!(result.season, Some(14));
        assert_eq!(result.episode, Some(8));
        assert_eq!(result.episode_name.as_deref(), Some("Pilot"));
        assert!(!result.is_ova);
    }

    #[test]
    fn test_parse_movie_with_year() {
        let result = parse_media_name("The.Matrix.1999.BDRip.avi");
        assert_eq!(result.title.as_deref(), Some("The Matrix"));
        assert_eq!(result.year, Some(1999));
        assert_eq!(result.season, None);
        assert_eq!(result.episode, None);
    }

    #[test]
    fn test_parse_movie_quality_terminates_title() {
        let result = parse_media_name("Inception_1080p_x264.mkv");
        assert_eq!(result.title.as_deref(), Some("Inception"));
        assert_eq!(result.year, None);
    }

    #[test]
    fn test_year_not_followed_by_digit() {
        assert_eq!(parse_media_name("Movie 19999.mkv").year, None);
        assert_eq!(parse_media_name("Movie (2010).mkv").year, Some(2010));
    }

    #[test]
    fn test_year_not_preceded_by_digit() {
        assert_eq!(parse_media_name("Movie 12000.mkv").year, None);
        assert_eq!(parse_media_name("Movie 12000 2004.mkv").year, Some(2004));
    }

    #[test]
    fn test_bracketed_episode_index() {
        let result = parse_media_name("[Group] Some Anime [05] - The Beginning [1080p].mkv");
        assert_eq!(result.season, None);
        assert_eq!(result.episode, Some(5));
        assert_eq!(result.episode_name.as_deref(), Some("The Beginning"));
        assert_eq!(result.title.as_deref(), Some("Some Anime"));
    }

    #[test]
    fn test_season_episode_words() {
        let result = parse_media_name("Show Season 2 Episode 3.mkv");
        assert_eq!(result.season, Some(2));
        assert_eq!(result.episode, Some(3));
        assert_eq!(result.title.as_deref(), Some("Show"));
    }

    #[test]
    fn test_ova_suppresses_episode() {
        let result = parse_media_name("Anime OVA Part 2.mkv");
        assert!(result.is_ova);
        assert_eq!(result.episode, None);
        assert_eq!(result.episode_name, None);
    }

    #[test]
    fn test_title_split_from_episode_name() {
        let result = parse_media_name("S01E02 - Show Name - Second Step.mkv");
        assert_eq!(result.title.as_deref(), Some("Show Name"));
        assert_eq!(result.episode_name.as_deref(), Some("Second Step"));
    }
}
