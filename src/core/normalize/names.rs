//! Name cleanup
//!
//! Trims, collapses internal whitespace, folds to NFC, and title-cases
//! with an allow-list of surname particles that stay lowercase.

use unicode_normalization::UnicodeNormalization;

/// Surname particles that keep their lowercase form when not leading
const PARTICLES: &[&str] = &[
    "de", "du", "des", "da", "di", "la", "le", "van", "von", "der", "den", "ter", "ten",
];

/// Normalize a personal or place name
#[must_use]
pub fn clean_name(raw: &str) -> String {
    let collapsed: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let folded: String = collapsed.nfc().collect();

    folded
        .split(' ')
        .enumerate()
        .map(|(i, word)| title_case_word(word, i > 0))
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str, allow_particle: bool) -> String {
    if allow_particle && PARTICLES.contains(&word.to_lowercase().as_str()) {
        return word.to_lowercase();
    }

    // hyphenated segments each get their own capital (Jean-Luc)
    word.split('-')
        .map(capitalize_segment)
        .collect::<Vec<_>>()
        .join("-")
}

fn capitalize_segment(segment: &str) -> String {
    // apostrophes restart capitalization (O'Brien, D'Arcy)
    segment
        .split('\'')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
            }
        })
        .collect::<Vec<_>>()
        .join("'")
}

/// Split a full name into (given, family) on the last space
#[must_use]
pub fn split_full_name(full: &str) -> (String, String) {
    let cleaned = clean_name(full);
    match cleaned.rsplit_once(' ') {
        Some((given, family)) => {
            // keep trailing particles with the family name
            let mut given_words: Vec<&str> = given.split(' ').collect();
            let mut family_words = vec![family];
            while let Some(last) = given_words.last() {
                if PARTICLES.contains(&last.to_lowercase().as_str()) {
                    family_words.insert(0, given_words.pop().unwrap_or_default());
                } else {
                    break;
                }
            }
            (given_words.join(" "), family_words.join(" "))
        }
        None => (cleaned, String::new()),
    }
}
