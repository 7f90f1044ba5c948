//! Brief Generator: selected topics + coverage → brief items.
//!
//! Per topic: ask the text generator (standard framing), validate; on any failure ask
//! once more with strict framing; on a second failure build the item from the
//! candidate's own title and source snippets. An item is always produced.

pub mod ai_adapter;
pub mod validate;

use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::model::{BriefItem, ContentOrigin, CoverageResult, TopicCandidate};
use crate::selector::ScoredTopic;

pub use ai_adapter::{build_generator, DynTextGenerator, MockGenerator, TextGenerator};
pub use validate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFraming {
    Standard,
    /// Second attempt after a rejected answer.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub topic_id: u64,
    pub title: String,
    pub summary: String,
    pub snippets: Vec<String>,
    pub coverage_note: String,
    pub framing: PromptFraming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub headline: String,
    pub bullets: Vec<String>,
}

/// Why an attempt did not produce usable content. All variants lead to retry/fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

pub struct BriefGenerator {
    client: DynTextGenerator,
    timeout: Duration,
    max_links: usize,
}

impl BriefGenerator {
    pub fn new(client: DynTextGenerator, cfg: &GenerationConfig) -> Self {
        Self {
            client,
            timeout: cfg.timeout(),
            max_links: cfg.max_links,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Items for the day, in the selector's rank order. `coverage[i]` belongs to `topics[i]`.
    pub async fn generate_items(
        &self,
        topics: &[ScoredTopic],
        coverage: Vec<CoverageResult>,
    ) -> Vec<BriefItem> {
        let mut items = Vec::with_capacity(topics.len());
        for (idx, (topic, coverage)) in topics.iter().zip(coverage).enumerate() {
            let item = self
                .generate_item(&topic.candidate, coverage, idx as u32 + 1)
                .await;
            items.push(item);
        }
        items
    }

    pub async fn generate_item(
        &self,
        candidate: &TopicCandidate,
        coverage: CoverageResult,
        position: u32,
    ) -> BriefItem {
        let links = verification_links(candidate, self.max_links);

        for framing in [PromptFraming::Standard, PromptFraming::Strict] {
            let req = request_for(candidate, &coverage, framing);
            match self.attempt(&req).await {
                Ok(content) => {
                    debug!(topic_id = candidate.id, ?framing, "generated brief item");
                    return BriefItem {
                        topic_id: candidate.id,
                        position,
                        headline: content.headline,
                        bullets: content.bullets,
                        verification_links: links,
                        coverage,
                        origin: ContentOrigin::Generated,
                    };
                }
                Err(e) => {
                    warn!(
                        topic_id = candidate.id,
                        ?framing,
                        error = %e,
                        "generation attempt rejected"
                    );
                    if framing == PromptFraming::Standard {
                        counter!("generation_retry_total").increment(1);
                    }
                }
            }
        }

        counter!("generation_fallback_total").increment(1);
        let content = fallback_content(candidate);
        BriefItem {
            topic_id: candidate.id,
            position,
            headline: content.headline,
            bullets: content.bullets,
            verification_links: links,
            coverage,
            origin: ContentOrigin::Fallback,
        }
    }

    async fn attempt(&self, req: &GenerationRequest) -> Result<GeneratedContent, GenerationError> {
        let raw = tokio::time::timeout(self.timeout, self.client.generate(req))
            .await
            .map_err(|_| GenerationError::Timeout)??;
        let content = validate::sanitize(raw);
        validate::validate(&content)?;
        Ok(content)
    }
}

fn request_for(
    candidate: &TopicCandidate,
    coverage: &CoverageResult,
    framing: PromptFraming,
) -> GenerationRequest {
    GenerationRequest {
        topic_id: candidate.id,
        title: candidate.title.clone(),
        summary: candidate.summary.clone(),
        snippets: candidate
            .articles
            .iter()
            .map(|a| a.snippet.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        coverage_note: coverage.note.clone(),
        framing,
    }
}

/// Distinct non-empty article URLs, article order, at most `max`.
pub fn verification_links(candidate: &TopicCandidate, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for a in &candidate.articles {
        let url = a.url.trim();
        if url.is_empty() || out.iter().any(|u| u == url) {
            continue;
        }
        out.push(url.to_string());
        if out.len() >= max {
            break;
        }
    }
    out
}

/// Stand-in bullet when a candidate carries no text beyond its headline.
pub const FALLBACK_FILLER_BULLET: &str = "Further details were not available at publication time.";

/// Deterministic content: title cut to the headline limit, snippets verbatim. Fewer than
/// two snippets are topped up with the summary, then the headline, then a fixed filler.
pub fn fallback_content(candidate: &TopicCandidate) -> GeneratedContent {
    let title = candidate.title.trim();
    let headline = if title.is_empty() {
        format!("Topic {}", candidate.id)
    } else {
        title
            .split_whitespace()
            .take(validate::HEADLINE_MAX_WORDS)
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut bullets: Vec<String> = candidate
        .articles
        .iter()
        .map(|a| a.snippet.trim())
        .filter(|s| !s.is_empty())
        .take(validate::BULLETS_MAX)
        .map(str::to_string)
        .collect();
    for extra in [candidate.summary.trim(), headline.as_str(), FALLBACK_FILLER_BULLET] {
        if bullets.len() >= validate::BULLETS_MIN {
            break;
        }
        if !extra.is_empty() && !bullets.iter().any(|b| b == extra) {
            bullets.push(extra.to_string());
        }
    }

    GeneratedContent { headline, bullets }
}
