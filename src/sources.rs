//! # Source Registry
//!
//! Maps news sources (by domain or display name) to their static political
//! leaning on the `-2..=+2` scale.
//!
//! - Loads from a JSON file (sources + aliases), falls back to `default_seed()`.
//! - Lookup is case-insensitive and tolerant of URLs, `www.` prefixes and punctuation.
//! - Fallback order: alias → exact domain → exact name → fuzzy name → `None`.
//! - Ratings are refreshed in bulk from an external rating feed (`apply_rating_feed`).

use std::{collections::HashMap, fs, path::Path};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use strsim::jaro_winkler;
use tracing::{debug, warn};

use crate::model::{Leaning, Source};

/// Minimum Jaro-Winkler similarity for a fuzzy name hit.
const FUZZY_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

/// One row of the periodic rating feed.
#[derive(Debug, Clone, Deserialize)]
pub struct RatingUpdate {
    pub domain: String,
    #[serde(default)]
    pub name: Option<String>,
    pub leaning: i8,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub provenance: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    /// Keyed by normalized domain.
    by_domain: HashMap<String, Source>,
    /// Normalized display name → domain.
    by_name: HashMap<String, String>,
    /// Normalized alias → domain.
    aliases: HashMap<String, String>,
}

impl SourceRegistry {
    pub fn from_sources(sources: Vec<Source>) -> Self {
        let mut reg = Self::default();
        for s in sources {
            reg.insert(s);
        }
        reg
    }

    /// Load from a JSON file: `{ "sources": [...], "aliases": {"alias": "domain"} }`.
    /// Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<RegistryFile>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(file) => {
                let mut reg = Self::from_sources(file.sources);
                for (alias, domain) in file.aliases {
                    reg.add_alias(&alias, &domain);
                }
                reg
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "source registry unreadable, using seed");
                Self::default_seed()
            }
        }
    }

    pub fn insert(&mut self, mut source: Source) {
        source.domain = normalize_domain(&source.domain);
        self.by_name
            .insert(normalize_name(&source.name), source.domain.clone());
        self.by_domain.insert(source.domain.clone(), source);
    }

    pub fn add_alias(&mut self, alias: &str, domain: &str) {
        self.aliases
            .insert(normalize_name(alias), normalize_domain(domain));
    }

    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }

    /// Resolve a domain, URL or display name to a rated source.
    pub fn lookup(&self, key: &str) -> Option<&Source> {
        let name = normalize_name(key);

        // 1) Alias resolution.
        if let Some(domain) = self.aliases.get(&name) {
            if let Some(s) = self.by_domain.get(domain) {
                return Some(s);
            }
        }

        // 2) Exact domain.
        let domain = normalize_domain(key);
        if let Some(s) = self.by_domain.get(&domain) {
            return Some(s);
        }

        // 3) Exact display name.
        if let Some(d) = self.by_name.get(&name) {
            return self.by_domain.get(d);
        }

        // 4) Fuzzy display name; best score wins, ties by domain for determinism.
        let best = self
            .by_name
            .iter()
            .map(|(n, d)| (jaro_winkler(n, &name), d))
            .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(a.1)));
        best.and_then(|(_, d)| self.by_domain.get(d))
    }

    pub fn leaning_of(&self, key: &str) -> Option<Leaning> {
        self.lookup(key).map(|s| s.leaning)
    }

    /// Apply a batch from the rating feed. Returns how many rows changed.
    /// Rows with an out-of-range leaning are ignored.
    pub fn apply_rating_feed(&mut self, updates: Vec<RatingUpdate>, now: DateTime<Utc>) -> usize {
        let mut changed = 0usize;
        for u in updates {
            let Ok(leaning) = Leaning::try_from(u.leaning) else {
                warn!(domain = %u.domain, leaning = u.leaning, "rating feed row ignored");
                continue;
            };
            let domain = normalize_domain(&u.domain);
            match self.by_domain.get_mut(&domain) {
                Some(existing) => {
                    let differs = existing.leaning != leaning
                        || u.confidence.is_some_and(|c| c != existing.leaning_confidence);
                    existing.leaning = leaning;
                    if let Some(c) = u.confidence {
                        existing.leaning_confidence = c.clamp(0.0, 1.0);
                    }
                    if let Some(p) = u.provenance {
                        existing.provenance = p;
                    }
                    existing.last_updated = now;
                    if differs {
                        changed += 1;
                    }
                }
                None => {
                    let name = u.name.unwrap_or_else(|| domain.clone());
                    self.insert(Source {
                        domain: domain.clone(),
                        name,
                        leaning,
                        leaning_confidence: u.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                        provenance: u.provenance.unwrap_or_default(),
                        last_updated: now,
                    });
                    changed += 1;
                }
            }
        }
        debug!(changed, total = self.len(), "rating feed applied");
        changed
    }

    /// Built-in seed with common US outlets. Used when no registry file is found.
    pub fn default_seed() -> Self {
        let seeded_at = DateTime::<Utc>::UNIX_EPOCH;
        let mut reg = Self::default();
        for (domain, name, leaning) in [
            ("jacobin.com", "Jacobin", -2),
            ("motherjones.com", "Mother Jones", -2),
            ("theguardian.com", "The Guardian", -1),
            ("nytimes.com", "New York Times", -1),
            ("washingtonpost.com", "Washington Post", -1),
            ("npr.org", "NPR", -1),
            ("reuters.com", "Reuters", 0),
            ("apnews.com", "Associated Press", 0),
            ("bbc.co.uk", "BBC News", 0),
            ("thehill.com", "The Hill", 0),
            ("wsj.com", "Wall Street Journal", 1),
            ("foxnews.com", "Fox News", 2),
            ("nationalreview.com", "National Review", 1),
            ("washingtonexaminer.com", "Washington Examiner", 1),
            ("breitbart.com", "Breitbart", 2),
        ] {
            let Ok(leaning) = Leaning::try_from(leaning) else {
                continue;
            };
            reg.insert(Source {
                domain: domain.to_string(),
                name: name.to_string(),
                leaning,
                leaning_confidence: 0.8,
                provenance: "seed".to_string(),
                last_updated: seeded_at,
            });
        }
        for (alias, domain) in [
            ("ap", "apnews.com"),
            ("the associated press", "apnews.com"),
            ("nyt", "nytimes.com"),
            ("the new york times", "nytimes.com"),
            ("wapo", "washingtonpost.com"),
            ("bbc", "bbc.co.uk"),
            ("the wall street journal", "wsj.com"),
            ("guardian", "theguardian.com"),
            ("fox", "foxnews.com"),
        ] {
            reg.add_alias(alias, domain);
        }
        reg
    }
}

/// `https://www.Reuters.com/world/x` → `reuters.com`.
pub fn normalize_domain(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = out.strip_prefix(scheme) {
            out = rest.to_string();
        }
    }
    if let Some(rest) = out.strip_prefix("www.") {
        out = rest.to_string();
    }
    if let Some(idx) = out.find(['/', '?', '#']) {
        out.truncate(idx);
    }
    out.trim_end_matches('.').to_string()
}

/// Lowercase, punctuation to spaces, collapsed whitespace.
fn normalize_name(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', ',', '’', '\''], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> SourceRegistry {
        SourceRegistry::default_seed()
    }

    #[test]
    fn exact_domain_and_url() {
        let r = reg();
        assert_eq!(r.leaning_of("reuters.com"), Some(Leaning::Center));
        assert_eq!(
            r.leaning_of("https://www.FoxNews.com/politics/story-1"),
            Some(Leaning::FarRight)
        );
    }

    #[test]
    fn alias_and_name() {
        let r = reg();
        assert_eq!(r.leaning_of("AP"), Some(Leaning::Center));
        assert_eq!(r.leaning_of("Mother Jones"), Some(Leaning::FarLeft));
        assert_eq!(r.leaning_of("The New York Times"), Some(Leaning::Left));
    }

    #[test]
    fn fuzzy_name_match() {
        let r = reg();
        assert_eq!(r.leaning_of("Washington Examiner."), Some(Leaning::Right));
    }

    #[test]
    fn unknown_is_none() {
        assert!(reg().lookup("totally-unknown.example").is_none());
    }

    #[test]
    fn rating_feed_updates_and_inserts() {
        let mut r = reg();
        let now = Utc::now();
        let changed = r.apply_rating_feed(
            vec![
                RatingUpdate {
                    domain: "thehill.com".into(),
                    name: None,
                    leaning: 1,
                    confidence: None,
                    provenance: Some("feed".into()),
                },
                RatingUpdate {
                    domain: "https://newsite.example".into(),
                    name: Some("New Site".into()),
                    leaning: -1,
                    confidence: Some(0.9),
                    provenance: None,
                },
                RatingUpdate {
                    domain: "bad.example".into(),
                    name: None,
                    leaning: 7,
                    confidence: None,
                    provenance: None,
                },
            ],
            now,
        );
        assert_eq!(changed, 2);
        assert_eq!(r.leaning_of("thehill.com"), Some(Leaning::Right));
        assert_eq!(r.lookup("thehill.com").unwrap().last_updated, now);
        assert_eq!(r.leaning_of("New Site"), Some(Leaning::Left));
        assert!(r.lookup("bad.example").is_none());
    }

    #[test]
    fn load_falls_back_to_seed() {
        let r = SourceRegistry::load_from_file("does/not/exist.json");
        assert!(!r.is_empty());
    }
}
