//! # Coverage Analyzer
//! Pure function from "who covered this topic" to a left/center/right split and an
//! imbalance score. Notes come from fixed templates so the methodology stays auditable.

use std::collections::HashSet;

use crate::model::{CoverageResult, LeaningBucket, SourceArticle};
use crate::sources::{normalize_domain, SourceRegistry};

pub const NOTE_NO_DIRECTIONAL: &str = "No directional coverage data.";
pub const NOTE_BALANCED: &str = "Coverage is balanced across left- and right-leaning sources.";
const NOTE_LEAN_LEFT: &str = "A lean is present: coverage tilts toward left-leaning sources.";
const NOTE_LEAN_RIGHT: &str = "A lean is present: coverage tilts toward right-leaning sources.";
const NOTE_SKEW_LEFT: &str =
    "Significant imbalance: coverage comes mostly from left-leaning sources.";
const NOTE_SKEW_RIGHT: &str =
    "Significant imbalance: coverage comes mostly from right-leaning sources.";

/// Bucket counts → result. `imbalance = 1 - 2*min(left_frac, right_frac)`, centre excluded.
pub fn score_counts(left: u32, center: u32, right: u32, unrated: u32) -> CoverageResult {
    let directional = left + right;
    let (imbalance, note) = if directional == 0 {
        (0.0, NOTE_NO_DIRECTIONAL)
    } else {
        let lf = f64::from(left) / f64::from(directional);
        let rf = f64::from(right) / f64::from(directional);
        let imbalance = round2((1.0 - 2.0 * lf.min(rf)).clamp(0.0, 1.0));
        (imbalance, note_for(imbalance, left >= right))
    };

    CoverageResult {
        left_count: left,
        center_count: center,
        right_count: right,
        unrated_count: unrated,
        imbalance_score: imbalance,
        note: note.to_string(),
    }
}

fn note_for(imbalance: f64, leans_left: bool) -> &'static str {
    if imbalance < 0.2 {
        NOTE_BALANCED
    } else if imbalance <= 0.5 {
        if leans_left {
            NOTE_LEAN_LEFT
        } else {
            NOTE_LEAN_RIGHT
        }
    } else if leans_left {
        NOTE_SKEW_LEFT
    } else {
        NOTE_SKEW_RIGHT
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Analyze a set of source keys (domains, URLs or names). Each distinct source counts once:
/// rated keys collapse onto the registry's domain, unrated ones onto their normalized form.
pub fn analyze_sources<'a, I>(registry: &SourceRegistry, sources: I) -> CoverageResult
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let (mut left, mut center, mut right, mut unrated) = (0u32, 0u32, 0u32, 0u32);
    for key in sources {
        let (domain, bucket) = match registry.lookup(key) {
            Some(source) => (source.domain.clone(), Some(source.leaning.bucket())),
            None => (normalize_domain(key), None),
        };
        if domain.is_empty() || !seen.insert(domain) {
            continue;
        }
        match bucket {
            Some(LeaningBucket::Left) => left += 1,
            Some(LeaningBucket::Center) => center += 1,
            Some(LeaningBucket::Right) => right += 1,
            None => unrated += 1,
        }
    }
    score_counts(left, center, right, unrated)
}

/// Convenience over a topic's articles.
pub fn analyze_articles(registry: &SourceRegistry, articles: &[SourceArticle]) -> CoverageResult {
    analyze_sources(registry, articles.iter().map(|a| a.source_domain.as_str()))
}
