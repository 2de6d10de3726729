//! Fuzzy title matching against scene-style file names
//!
//! Matching is order-insensitive: each query token looks for an unused file
//! token that is equal to it or within a length-proportional edit distance.

use tracing::trace;

use super::text_utils::{levenshtein_bounded, normalize_title};

/// Release metadata that never belongs to a title
const RELEASE_TOKENS: &[&str] = &[
    "bdrip", "avc", "h264", "h265", "x264", "x265", "web", "webrip", "dl", "by", "bluray",
    "1080p", "720p", "rip", "4k", "uhd",
];

const STOP_WORDS: &[&str] = &["the"];

/// A primary title plus an optional original-language title, both normalized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedTitles {
    pub title: String,
    pub original_title: String,
}

impl NormalizedTitles {
    pub fn new(title: &str, original_title: Option<&str>) -> Self {
        Self {
            title: normalize_title(title),
            original_title: original_title.map(normalize_title).unwrap_or_default(),
        }
    }

    /// Whether either title matches an already-normalized file name
    pub fn matches(&self, normalized_file_name: &str) -> bool {
        (!self.title.is_empty() && is_title_match(normalized_file_name, &self.title))
            || (!self.original_title.is_empty()
                && is_title_match(normalized_file_name, &self.original_title))
    }

    /// Normalize `file_stem` and match it
    pub fn matches_file_name(&self, file_stem: &str) -> bool {
        self.matches(&normalize_title(file_stem))
    }
}

fn is_release_token(token: &str) -> bool {
    RELEASE_TOKENS.contains(&token)
}

/// Single letters are noise unless the query uses them as a word ("Malcolm X");
/// "a", "i" and single digits are always kept
fn is_meaningful(token: &str, query_tokens: &[&str]) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            c == 'a' || c == 'i' || c.is_ascii_digit() || query_tokens.contains(&token)
        }
        (Some(_), Some(_)) => true,
        _ => false,
    }
}

/// Edit budget for a pair of tokens: a quarter of the longer one, at least 1
fn fuzzy_threshold(query: &str, candidate: &str) -> usize {
    query
        .chars()
        .count()
        .max(candidate.chars().count())
        .div_ceil(4)
        .max(1)
}

/// Share of query tokens that must match: 75%, rounded up, at least 1
pub fn required_matches(query_tokens: usize) -> usize {
    (query_tokens * 3).div_ceil(4).max(1)
}

/// Match one normalized query title against a normalized file name
pub fn is_title_match(normalized_file_name: &str, normalized_query: &str) -> bool {
    let query_tokens: Vec<&str> = normalized_query
        .split_whitespace()
        .filter(|t| !STOP_WORDS.contains(t))
        .collect();

    if query_tokens.is_empty() {
        return false;
    }

    let mut file_tokens: Vec<Option<&str>> = normalized_file_name
        .split_whitespace()
        .filter(|t| !is_release_token(t) && is_meaningful(t, &query_tokens))
        .map(Some)
        .collect();

    let mut matched = 0;
    let mut worst_distance = 0;

    for query in &query_tokens {
        match best_candidate(query, &file_tokens) {
            Some((index, distance)) => {
                trace!(query = %query, file_token = ?file_tokens[index], distance, "Token matched");
                file_tokens[index] = None;
                matched += 1;
                worst_distance = worst_distance.max(distance);
            }
            None => trace!(query = %query, "Token unmatched"),
        }
    }

    if query_tokens.len() == 1 {
        return matched == 1 && worst_distance <= 1;
    }

    matched >= required_matches(query_tokens.len())
}

/// Unused file token equal to `query`, else the closest within the edit budget
fn best_candidate(query: &str, file_tokens: &[Option<&str>]) -> Option<(usize, usize)> {
    if let Some(index) = file_tokens.iter().position(|t| *t == Some(query)) {
        return Some((index, 0));
    }

    file_tokens
        .iter()
        .enumerate()
        .filter_map(|(index, token)| {
            let token = (*token)?;
            levenshtein_bounded(query, token, fuzzy_threshold(query, token))
                .map(|distance| (index, distance))
        })
        .min_by_key(|(_, distance)| *distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(file: &str, title: &str) -> bool {
        NormalizedTitles::new(title, None).matches_file_name(file)
    }

    #[test]
    fn test_verbatim_title_matches() {
        assert!(matches("The.Matrix.1999.BDRip", "The Matrix"));
        assert!(matches("Lord.of.the.Rings.Fellowship.1080p", "The Lord of the Rings"));
    }

    #[test]
    fn test_single_letter_title_words() {
        assert!(matches("X-Men.2000.mkv", "X-Men"));
        assert!(matches("V.for.Vendetta.2005.mkv", "V for Vendetta"));
        assert!(matches("Malcolm.X.1992.mkv", "Malcolm X"));
        // a stray letter in the file name still cannot stand in for a word
        assert!(!matches("Malcolm.Y.1992.mkv", "Malcolm X"));
    }

    #[test]
    fn test_order_insensitive() {
        assert!(matches("Rings of the Lord", "Lord of the Rings"));
    }

    #[test]
    fn test_single_token_tolerates_one_edit() {
        assert!(matches("Matrx.1999", "Matrix"));
        assert!(matches("Matrixx.1999", "Matrix"));
        assert!(!matches("Mtrx.1999", "Matrix"));
    }

    #[test]
    fn test_release_tokens_do_not_match() {
        assert!(!matches("Movie.WEB.DL.1080p", "Web"));
    }

    #[test]
    fn test_file_token_consumed_once() {
        // "dog" can only satisfy one of the two query tokens
        assert!(!matches("dog.mkv", "Dog Dog"));
        assert!(matches("dog.dog.mkv", "Dog Dog"));
    }

    #[test]
    fn test_multi_token_quorum() {
        // 3 of 4 tokens is enough
        assert!(matches("Pirates.Caribbean.Black.2003", "Pirates Caribbean Black Pearl"));
        // 2 of 4 is not
        assert!(!matches("Pirates.Caribbean.2003", "Pirates Caribbean Black Pearl"));
    }

    #[test]
    fn test_original_title_fallback() {
        let titles = NormalizedTitles::new("Brother", Some("Брат"));
        assert!(titles.matches_file_name("Brat.1997.DVDRip"));
        assert!(!titles.matches_file_name("Sister.1997"));
    }

    #[test]
    fn test_stop_word_only_query_never_matches() {
        assert!(!matches("The.Movie", "The"));
        assert!(!NormalizedTitles::default().matches("anything"));
    }

    #[test]
    fn test_required_matches() {
        assert_eq!(required_matches(1), 1);
        assert_eq!(required_matches(2), 2);
        assert_eq!(required_matches(3), 3);
        assert_eq!(required_matches(4), 3);
        assert_eq!(required_matches(8), 6);
    }
}
