//! Chat hygiene filters: slur detection/censoring and link detection.
//!
//! Slurs are matched three ways, and any hit counts:
//! 1. the base word on word boundaries,
//! 2. an obfuscation-tolerant pattern where common look-alikes stand in for
//!    letters (`4`/`@` for `a`, `3` for `e`, `1`/`!` for `i`, `0` for `o`,
//!    `5`/`$` for `s`, `7` for `t`, `9` for `g`),
//! 3. a substring search over the text with everything but ASCII letters
//!    stripped out.
//!
//! This stops casual leetspeak, nothing more. The substring pass over-matches
//! (`"spicy"` contains a listed word) and creative spellings get through.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

const BASE_SLUR_WORDS: &[&str] = &[
    "nigger",
    "nigga",
    "faggot",
    "fag",
    "kike",
    "chink",
    "spic",
    "wetback",
    "towelhead",
    "sandnigger",
    "gook",
    "jap",
    "paki",
    "retard",
    "tranny",
    "dyke",
    "cunt",
    "bitch",
    "whore",
    "slut",
];

struct SlurMatcher {
    word: &'static str,
    base: Regex,
    obfuscated: Regex,
}

impl SlurMatcher {
    fn new(word: &'static str) -> Result<Self, regex::Error> {
        let base = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))?;
        let obfuscated = Regex::new(&format!(r"(?i)\b{}\b", obfuscated_pattern(word)))?;
        Ok(Self {
            word,
            base,
            obfuscated,
        })
    }
}

static SLUR_MATCHERS: Lazy<Vec<SlurMatcher>> = Lazy::new(|| {
    BASE_SLUR_WORDS
        .iter()
        .filter_map(|w| match SlurMatcher::new(w) {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                warn!(word = %w, error = %e, "skipping slur pattern that does not compile");
                None
            }
        })
        .collect()
});

fn obfuscated_pattern(word: &str) -> String {
    word.chars()
        .map(|c| match c.to_ascii_lowercase() {
            'a' => "[aA4@]".to_string(),
            'e' => "[eE3]".to_string(),
            'i' => "[iI1!]".to_string(),
            'o' => "[oO0]".to_string(),
            's' => r"[sS5$]".to_string(),
            't' => "[tT7]".to_string(),
            'g' => "[gG9]".to_string(),
            other => regex::escape(&other.to_string()),
        })
        .collect()
}

/// Lowercased ASCII letters of `text`, each paired with its char index in
/// the original.
fn letters_only(text: &str) -> Vec<(usize, char)> {
    text.chars()
        .enumerate()
        .filter_map(|(i, c)| {
            let lower = c.to_ascii_lowercase();
            lower.is_ascii_lowercase().then_some((i, lower))
        })
        .collect()
}

pub fn contains_slur(text: &str) -> bool {
    let normalized: String = letters_only(text).into_iter().map(|(_, c)| c).collect();

    SLUR_MATCHERS.iter().any(|m| {
        m.base.is_match(text) || m.obfuscated.is_match(text) || normalized.contains(m.word)
    })
}

/// Replace every matched span with `*` of the same length.
///
/// Each listed word is applied in turn with all three matchers, so a span
/// can be rewritten more than once and the result is not guaranteed to be
/// stable under a second pass.
pub fn censor_slurs(text: &str) -> String {
    let mut censored = text.to_string();
    for m in SLUR_MATCHERS.iter() {
        censored = star_matches(&m.base, &censored);
        censored = star_matches(&m.obfuscated, &censored);
        censored = star_letter_runs(m.word, &censored);
    }
    censored
}

fn star_matches(re: &Regex, text: &str) -> String {
    re.replace_all(text, |caps: &Captures<'_>| "*".repeat(caps[0].chars().count()))
        .into_owned()
}

/// Stars out every occurrence of `word` in the letters-only view of `text`,
/// including any punctuation sitting between the matched letters.
fn star_letter_runs(word: &str, text: &str) -> String {
    let letters = letters_only(text);
    let needle: Vec<char> = word.chars().collect();
    if needle.is_empty() || letters.len() < needle.len() {
        return text.to_string();
    }

    let mut chars: Vec<char> = text.chars().collect();
    let mut k = 0;
    while k + needle.len() <= letters.len() {
        let hit = letters[k..k + needle.len()]
            .iter()
            .zip(&needle)
            .all(|((_, c), n)| c == n);
        if hit {
            let start = letters[k].0;
            let end = letters[k + needle.len() - 1].0;
            for c in &mut chars[start..=end] {
                *c = '*';
            }
            k += needle.len();
        } else {
            k += 1;
        }
    }
    chars.into_iter().collect()
}

const TLDS: &str = "com|net|org|io|gg|co|me|ly|xyz|info|biz|tv|ru|uk|de|fr|us|ca|app|dev|link|site|online|store|live|club|page|to";

static LINK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // explicit schemes
        r"(?i)\b(?:https?|ftp|wss?)://".to_string(),
        r"(?i)\bwww\.".to_string(),
        // bare domains with a common TLD
        format!(r"(?i)\b[a-z0-9][a-z0-9-]*\.(?:{TLDS})\b"),
        // shorteners and invite hosts
        r"(?i)\b(?:bit\.ly|tinyurl|t\.co|goo\.gl|is\.gd|ow\.ly|buff\.ly|discord\.gg|discord\.com/invite)\b".to_string(),
        // example[.]com, example(.)com, example{.}com, example dot com
        format!(
            r"(?i)\b[a-z0-9][a-z0-9-]*\s*(?:\[\s*\.\s*\]|\(\s*\.\s*\)|\{{\s*\.\s*\}}|\[dot\]|\(dot\)|\s+dot\s+)\s*(?:{TLDS})\b"
        ),
        // bare IPv4 literal
        r"\b(?:\d{1,3}\.){3}\d{1,3}\b".to_string(),
    ]
    .iter()
    .filter_map(|p| match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %p, error = %e, "skipping link pattern that does not compile");
            None
        }
    })
    .collect()
});

/// Heuristic URL detection. False negatives are expected; this is a chat
/// hygiene gate, not a security boundary.
pub fn contains_link(text: &str) -> bool {
    LINK_PATTERNS.iter().any(|re| re.is_match(text))
}
