//! # Domain model
//! Plain data shared by every stage of the pipeline. Nothing here does I/O.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Static political leaning of a news source, `-2` (far left) to `+2` (far right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Leaning {
    FarLeft,
    Left,
    Center,
    Right,
    FarRight,
}

/// The three coverage buckets a leaning collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaningBucket {
    Left,
    Center,
    Right,
}

impl Leaning {
    pub fn bucket(self) -> LeaningBucket {
        match self {
            Leaning::FarLeft | Leaning::Left => LeaningBucket::Left,
            Leaning::Center => LeaningBucket::Center,
            Leaning::Right | Leaning::FarRight => LeaningBucket::Right,
        }
    }
}

impl TryFrom<i8> for Leaning {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -2 => Ok(Leaning::FarLeft),
            -1 => Ok(Leaning::Left),
            0 => Ok(Leaning::Center),
            1 => Ok(Leaning::Right),
            2 => Ok(Leaning::FarRight),
            other => Err(format!("leaning out of range -2..=2: {other}")),
        }
    }
}

impl From<Leaning> for i8 {
    fn from(l: Leaning) -> i8 {
        match l {
            Leaning::FarLeft => -2,
            Leaning::Left => -1,
            Leaning::Center => 0,
            Leaning::Right => 1,
            Leaning::FarRight => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Normalized domain, e.g. `reuters.com`. Identity of the source.
    pub domain: String,
    pub name: String,
    pub leaning: Leaning,
    #[serde(default = "default_confidence")]
    pub leaning_confidence: f32,
    /// Where the rating came from (e.g. "allsides-2025-09").
    #[serde(default)]
    pub provenance: String,
    pub last_updated: DateTime<Utc>,
}

fn default_confidence() -> f32 {
    0.5
}

/// One article covering a topic, as delivered by trend ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArticle {
    pub source_domain: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub civic_score: f64,
    pub quality_score: f64,
    pub source_count: u32,
    pub category: String,
    pub geography: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub articles: Vec<SourceArticle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub topic_id: u64,
    pub selected_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub left_count: u32,
    pub center_count: u32,
    pub right_count: u32,
    /// Sources that covered the topic but have no rating in the registry.
    pub unrated_count: u32,
    pub imbalance_score: f64,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefItem {
    pub topic_id: u64,
    /// 1-based rank within the brief.
    pub position: u32,
    pub headline: String,
    pub bullets: Vec<String>,
    pub verification_links: Vec<String>,
    pub coverage: CoverageResult,
    pub origin: ContentOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BriefStatus {
    Draft,
    Ready,
    Published,
    Skipped,
}

impl BriefStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BriefStatus::Published | BriefStatus::Skipped)
    }

    /// Allowed edges: draft->ready, draft->skipped, ready->published, ready->skipped.
    pub fn can_transition_to(self, next: BriefStatus) -> bool {
        matches!(
            (self, next),
            (BriefStatus::Draft, BriefStatus::Ready)
                | (BriefStatus::Draft, BriefStatus::Skipped)
                | (BriefStatus::Ready, BriefStatus::Published)
                | (BriefStatus::Ready, BriefStatus::Skipped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BriefStatus::Draft => "draft",
            BriefStatus::Ready => "ready",
            BriefStatus::Published => "published",
            BriefStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBrief {
    pub date: NaiveDate,
    pub items: Vec<BriefItem>,
    pub status: BriefStatus,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl DailyBrief {
    pub fn new_draft(date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            date,
            items: Vec::new(),
            status: BriefStatus::Draft,
            skip_reason: None,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trial,
    Individual,
    Team,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: u64,
    pub email: String,
    pub tier: Tier,
    /// IANA timezone name, e.g. `Europe/London`.
    pub timezone: String,
    /// Preferred local send hour, one of 6, 8 or 18.
    pub send_hour: u32,
    pub status: SubscriberStatus,
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Date of the last brief delivered; the at-most-once guard.
    #[serde(default)]
    pub last_sent_brief: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    TransientFailure(String),
    PermanentFailure(String),
    /// Retries used up; the send for that date is failed.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAttempt {
    pub subscriber_id: u64,
    pub brief_date: NaiveDate,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Utc>,
}

/// Run-lock identity: job name + date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub date: NaiveDate,
}

impl JobKey {
    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub key: JobKey,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
