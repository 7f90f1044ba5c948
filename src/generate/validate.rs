//! Output checks for generated brief content.
//!
//! A response is accepted only if:
//! - the headline has 8..=12 words,
//! - there are 2..=3 non-empty bullets,
//! - neither headline nor bullets hit the denylist (first person, opinion, sensational).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::GeneratedContent;

pub const HEADLINE_MIN_WORDS: usize = 8;
pub const HEADLINE_MAX_WORDS: usize = 12;
pub const BULLETS_MIN: usize = 2;
pub const BULLETS_MAX: usize = 3;

const LINE_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("headline has {0} words, expected {HEADLINE_MIN_WORDS}..={HEADLINE_MAX_WORDS}")]
    HeadlineLength(usize),
    #[error("{0} bullets, expected {BULLETS_MIN}..={BULLETS_MAX}")]
    BulletCount(usize),
    #[error("bullet {0} is empty")]
    EmptyBullet(usize),
    #[error("denylisted phrasing ({rule}): {matched:?}")]
    Denylisted { rule: &'static str, matched: String },
}

/// (rule name, pattern). Fixed list; changing it changes what readers get.
static DENYLIST: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("first_person", r"\bI\b|\bI'(?:m|ve|d|ll)\b"),
        ("first_person", r"(?i)\b(?:me|my|mine|myself)\b"),
        (
            "first_person_plural",
            r"(?i)\b(?:we|we're|we've|we'll|our|ours|ourselves)\b",
        ),
        (
            "opinion",
            concat!(
                r"(?i)\b(?:in my (?:opinion|view)|i (?:think|believe|feel)|it is clear that",
                r"|clearly|obviously|undeniably|needless to say)\b",
            ),
        ),
        (
            "sensational",
            concat!(
                r"(?i)\b(?:shocking|outrageous|disgraceful|disastrous|slams|destroys",
                r"|unbelievable|you won't believe|must[- ]read)\b",
            ),
        ),
    ]
    .into_iter()
    .map(|(rule, pat)| (rule, Regex::new(pat).expect("denylist regex")))
    .collect()
});

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// First denylist hit in `text`, if any.
pub fn denylist_hit(text: &str) -> Option<ValidationError> {
    DENYLIST.iter().find_map(|(rule, re)| {
        re.find(text).map(|m| ValidationError::Denylisted {
            rule: *rule,
            matched: m.as_str().to_string(),
        })
    })
}

pub fn validate(content: &GeneratedContent) -> Result<(), ValidationError> {
    let words = word_count(&content.headline);
    if !(HEADLINE_MIN_WORDS..=HEADLINE_MAX_WORDS).contains(&words) {
        return Err(ValidationError::HeadlineLength(words));
    }
    let n = content.bullets.len();
    if !(BULLETS_MIN..=BULLETS_MAX).contains(&n) {
        return Err(ValidationError::BulletCount(n));
    }
    if let Some(idx) = content.bullets.iter().position(|b| b.trim().is_empty()) {
        return Err(ValidationError::EmptyBullet(idx + 1));
    }
    if let Some(hit) = denylist_hit(&content.headline) {
        return Err(hit);
    }
    for b in &content.bullets {
        if let Some(hit) = denylist_hit(b) {
            return Err(hit);
        }
    }
    Ok(())
}

/// Single line, collapsed whitespace, no list markers or wrapping quotes, bounded length.
pub fn sanitize_line(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s = collapsed.as_str();
    for marker in ["- ", "* ", "• ", "– "] {
        if let Some(rest) = s.strip_prefix(marker) {
            s = rest;
        }
    }
    let s = s.trim_matches(|c| c == '"' || c == '\u{201C}' || c == '\u{201D}');
    s.chars().take(LINE_MAX_CHARS).collect::<String>().trim().to_string()
}

/// Sanitize every field of a response.
pub fn sanitize(content: GeneratedContent) -> GeneratedContent {
    GeneratedContent {
        headline: sanitize_line(&content.headline),
        bullets: content
            .bullets
            .iter()
            .map(|b| sanitize_line(b))
            .filter(|b| !b.is_empty())
            .collect(),
    }
}
