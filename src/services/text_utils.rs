//! Shared text normalization and comparison utilities
//!
//! Used by the title matcher, the library search and the catalog mapper so
//! that queries and file names are reduced to the same token space.

use once_cell::sync::Lazy;
use regex::Regex;

static TITLE_DELIMITERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.\-_:'`]").expect("valid delimiter regex"));

/// Whether `input` contains any character from the Cyrillic blocks
pub fn has_cyrillic(input: &str) -> bool {
    input.chars().any(|c| {
        matches!(c,
            '\u{0400}'..='\u{04FF}'
            | '\u{0500}'..='\u{052F}'
            | '\u{2DE0}'..='\u{2DFF}'
            | '\u{A640}'..='\u{A69F}')
    })
}

fn transliterate_char(c: char) -> Option<&'static str> {
    let lower = c.to_lowercase().next().unwrap_or(c);
    let latin = match lower {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'є' => "ye",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'і' => "i",
        'ї' => "yi",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ў' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    };
    Some(latin)
}

/// Transliterate Cyrillic script to Latin. Other characters pass through.
///
/// Upper-case letters map to a capitalized Latin spelling ("Щ" -> "Shch").
pub fn transliterate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match transliterate_char(c) {
            Some(latin) if c.is_uppercase() => {
                let mut chars = latin.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            }
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

/// Normalize a title or file name for matching.
///
/// Cyrillic is transliterated, `. - _ : ' \`` become spaces, whitespace is
/// collapsed and everything is lower-cased.
pub fn normalize_title(title: &str) -> String {
    if title.trim().is_empty() {
        return String::new();
    }

    let title = if has_cyrillic(title) {
        transliterate(title)
    } else {
        title.to_string()
    };

    TITLE_DELIMITERS
        .replace_all(&title, " ")
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip leading zeros from a season label ("01" -> "1", "00" -> "0")
pub fn normalize_season_number(season: &str) -> String {
    let trimmed = season.trim().trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Calculate Levenshtein distance between two strings.
/// Returns the minimum number of single-character edits needed to transform one string into another.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    levenshtein_bounded(s1, s2, usize::MAX).unwrap_or(usize::MAX)
}

/// Levenshtein distance, giving up as soon as it must exceed `limit`.
///
/// Returns `None` when the distance is greater than `limit`.
pub fn levenshtein_bounded(s1: &str, s2: &str, limit: usize) -> Option<usize> {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let len1 = s1_chars.len();
    let len2 = s2_chars.len();

    if len1.abs_diff(len2) > limit {
        return None;
    }
    if len1 == 0 {
        return Some(len2);
    }
    if len2 == 0 {
        return Some(len1);
    }

    let mut prev_row: Vec<usize> = (0..=len2).collect();
    let mut curr_row: Vec<usize> = vec![0; len2 + 1];

    for i in 1..=len1 {
        curr_row[0] = i;
        let mut row_min = curr_row[0];
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] {
                0
            } else {
                1
            };
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
            row_min = row_min.min(curr_row[j]);
        }
        if row_min > limit {
            return None;
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    let distance = prev_row[len2];
    (distance <= limit).then_some(distance)
}
