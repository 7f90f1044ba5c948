//! # Topic Selector
//! Pure, deterministic selection of the day's topics from the candidate pool.
//!
//! Policy:
//! - candidates selected within the trailing exclusion window are dropped before scoring;
//! - `score = w_civic*civic + w_quality*quality + w_sources*norm(source_count) + w_balance*bonus`;
//! - greedy: take the best, re-score the rest (the balance bonus depends on what was
//!   already taken), repeat until `max_topics` or the pool runs dry;
//! - ties go to the lowest candidate id.
//!
//! Fewer eligible candidates than `min_topics` is an error, never a short brief.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::config::{SelectionConfig, SelectionWeights};
use crate::error::{BriefError, Result};
use crate::model::{SelectionRecord, TopicCandidate};

/// A chosen topic with the numbers that got it chosen (kept for admin diagnostics).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTopic {
    pub candidate: TopicCandidate,
    /// 1-based rank in the day's brief.
    pub rank: u32,
    pub score: f64,
    pub balance_bonus: f64,
}

/// Candidates not excluded by the selection history, first occurrence of each id.
pub fn eligible_candidates<'a>(
    candidates: &'a [TopicCandidate],
    history: &[SelectionRecord],
    target: NaiveDate,
    exclusion_days: i64,
) -> Vec<&'a TopicCandidate> {
    let cutoff = target - Duration::days(exclusion_days);
    let excluded: HashSet<u64> = history
        .iter()
        .filter(|r| r.selected_date > cutoff)
        .map(|r| r.topic_id)
        .collect();

    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| !excluded.contains(&c.id))
        .filter(|c| seen.insert(c.id))
        .collect()
}

/// Diversity bonus in (0, 1]: halves for the first repeat of a category or geography,
/// thirds for the second, and so on. 1.0 when nothing has been picked yet.
pub fn balance_bonus(candidate: &TopicCandidate, picked: &[&TopicCandidate]) -> f64 {
    let same_category = picked
        .iter()
        .filter(|p| p.category.eq_ignore_ascii_case(&candidate.category))
        .count();
    let same_geography = picked
        .iter()
        .filter(|p| p.geography.eq_ignore_ascii_case(&candidate.geography))
        .count();
    0.5 / (1.0 + same_category as f64) + 0.5 / (1.0 + same_geography as f64)
}

/// Weighted score before the balance term.
fn base_score(c: &TopicCandidate, max_sources: u32, w: &SelectionWeights) -> f64 {
    let norm_sources = if max_sources == 0 {
        0.0
    } else {
        f64::from(c.source_count) / f64::from(max_sources)
    };
    w.civic * c.civic_score.clamp(0.0, 1.0)
        + w.quality * c.quality_score.clamp(0.0, 1.0)
        + w.sources * norm_sources
}

/// Select the day's topics in rank order.
pub fn select_topics(
    candidates: &[TopicCandidate],
    history: &[SelectionRecord],
    target: NaiveDate,
    cfg: &SelectionConfig,
) -> Result<Vec<ScoredTopic>> {
    let eligible = eligible_candidates(candidates, history, target, cfg.exclusion_days);
    if eligible.len() < cfg.min_topics {
        return Err(BriefError::InsufficientCandidates {
            eligible: eligible.len(),
            required: cfg.min_topics,
        });
    }

    let max_sources = eligible.iter().map(|c| c.source_count).max().unwrap_or(0);
    let w = cfg.weights;

    // (base score, candidate); the base part never changes between rounds.
    let mut remaining: Vec<(f64, &TopicCandidate)> = eligible
        .into_iter()
        .map(|c| (base_score(c, max_sources, &w), c))
        .collect();

    let mut picked: Vec<&TopicCandidate> = Vec::with_capacity(cfg.max_topics);
    let mut out = Vec::with_capacity(cfg.max_topics);

    while out.len() < cfg.max_topics && !remaining.is_empty() {
        let mut best: Option<(usize, f64, f64)> = None;
        for (idx, (base, c)) in remaining.iter().enumerate() {
            let bonus = balance_bonus(c, &picked);
            let score = base + w.balance * bonus;
            let better = match best {
                None => true,
                Some((bi, bs, _)) => match score.total_cmp(&bs) {
                    Ordering::Greater => true,
                    Ordering::Equal => c.id < remaining[bi].1.id,
                    Ordering::Less => false,
                },
            };
            if better {
                best = Some((idx, score, bonus));
            }
        }

        let Some((idx, score, bonus)) = best else {
            break;
        };
        let (_, chosen) = remaining.swap_remove(idx);
        picked.push(chosen);
        out.push(ScoredTopic {
            candidate: chosen.clone(),
            rank: out.len() as u32 + 1,
            score,
            balance_bonus: bonus,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cand(id: u64, category: &str, geography: &str) -> TopicCandidate {
        TopicCandidate {
            id,
            title: format!("Topic {id}"),
            summary: String::new(),
            civic_score: 0.5,
            quality_score: 0.5,
            source_count: 10,
            category: category.to_string(),
            geography: geography.to_string(),
            first_seen_at: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
            articles: vec![],
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    #[test]
    fn diversity_alternates_categories() {
        let pool = vec![
            cand(1, "Politics", "US"),
            cand(2, "Politics", "US"),
            cand(3, "Politics", "US"),
            cand(4, "Environment", "US"),
            cand(5, "Environment", "US"),
        ];
        let out = select_topics(&pool, &[], day(10), &SelectionConfig::default()).unwrap();
        let cats: Vec<&str> = out.iter().map(|t| t.candidate.category.as_str()).collect();
        assert_eq!(
            cats,
            vec!["Politics", "Environment", "Politics", "Environment", "Politics"]
        );
        let ranks: Vec<u32> = out.iter().map(|t| t.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn ties_break_by_lowest_id() {
        let pool = vec![cand(9, "A", "X"), cand(3, "A", "X"), cand(7, "A", "X")];
        let out = select_topics(&pool, &[], day(10), &SelectionConfig::default()).unwrap();
        let ids: Vec<u64> = out.iter().map(|t| t.candidate.id).collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }

    #[test]
    fn recent_selections_are_excluded() {
        let pool = vec![
            cand(1, "A", "X"),
            cand(2, "B", "Y"),
            cand(3, "C", "Z"),
            cand(4, "D", "W"),
        ];
        let history = vec![
            SelectionRecord {
                topic_id: 1,
                selected_date: day(1),
            },
            // 30 days before target: outside the window again.
            SelectionRecord {
                topic_id: 2,
                selected_date: NaiveDate::from_ymd_opt(2025, 8, 11).unwrap(),
            },
        ];
        let out = select_topics(&pool, &history, day(10), &SelectionConfig::default()).unwrap();
        let ids: HashSet<u64> = out.iter().map(|t| t.candidate.id).collect();
        assert!(!ids.contains(&1));
        assert!(ids.contains(&2));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn too_few_candidates_is_an_error() {
        let pool = vec![cand(1, "A", "X"), cand(2, "B", "Y")];
        match select_topics(&pool, &[], day(10), &SelectionConfig::default()) {
            Err(BriefError::InsufficientCandidates { eligible, required }) => {
                assert_eq!(eligible, 2);
                assert_eq!(required, 3);
            }
            other => panic!("expected InsufficientCandidates, got {other:?}"),
        }
    }

    #[test]
    fn higher_civic_score_wins_first() {
        let mut strong = cand(8, "A", "X");
        strong.civic_score = 0.95;
        let pool = vec![cand(1, "A", "X"), cand(2, "A", "X"), strong];
        let out = select_topics(&pool, &[], day(10), &SelectionConfig::default()).unwrap();
        assert_eq!(out[0].candidate.id, 8);
    }

    #[test]
    fn duplicate_ids_are_collapsed() {
        let pool = vec![cand(1, "A", "X"), cand(1, "A", "X"), cand(2, "B", "Y")];
        let eligible = eligible_candidates(&pool, &[], day(10), 30);
        assert_eq!(eligible.len(), 2);
    }

    #[test]
    fn bonus_is_one_for_first_pick() {
        let c = cand(1, "A", "X");
        assert!((balance_bonus(&c, &[]) - 1.0).abs() < 1e-12);
        let other = cand(2, "a", "Y");
        assert!((balance_bonus(&c, &[&other]) - 0.75).abs() < 1e-12);
    }
}
