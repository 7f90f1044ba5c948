//! Backing-store seam. The pipeline only talks to these traits; `LocalStore`
//! is the bundled implementation (in-memory, optionally snapshotted to JSON).

pub mod local;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::Result;
use crate::model::{
    BriefItem, BriefStatus, DailyBrief, JobKey, JobRun, JobState, SelectionRecord, SendAttempt,
    Subscriber, TopicCandidate,
};

pub use local::LocalStore;

/// Read side of trend ingestion plus the append-only selection log.
#[async_trait::async_trait]
pub trait TopicStore: Send + Sync {
    async fn candidates(&self) -> Result<Vec<TopicCandidate>>;
    /// Selection records with `selected_date >= since`.
    async fn selections_since(&self, since: NaiveDate) -> Result<Vec<SelectionRecord>>;
    async fn record_selections(&self, records: &[SelectionRecord]) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BriefStore: Send + Sync {
    /// Create the day's brief in `Draft`. Fails with `BriefExists` if one already exists.
    async fn create_brief(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<DailyBrief>;
    async fn brief(&self, date: NaiveDate) -> Result<Option<DailyBrief>>;
    /// Replace the items of a `Draft` brief. Any other status yields `ItemsLocked`.
    async fn save_items(&self, date: NaiveDate, items: Vec<BriefItem>, now: DateTime<Utc>)
        -> Result<()>;
    /// Atomically move `expected -> next`. Returns `false` when the current status is not
    /// `expected` (another writer won). The edge itself must be a legal transition.
    async fn compare_and_set_status(
        &self,
        date: NaiveDate,
        expected: BriefStatus,
        next: BriefStatus,
        skip_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn subscribers(&self) -> Result<Vec<Subscriber>>;
    async fn mark_sent(&self, id: u64, brief_date: NaiveDate, at: DateTime<Utc>) -> Result<()>;
    /// Flip to `Unsubscribed`. `false` for an unknown id.
    async fn unsubscribe(&self, id: u64) -> Result<bool>;
    async fn record_attempt(&self, attempt: SendAttempt) -> Result<()>;
    async fn attempts(&self, brief_date: NaiveDate) -> Result<Vec<SendAttempt>>;
}

/// Job table with run-locks keyed by (job name, date).
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Take the run-lock. `false` if the job already completed/failed, or is running and
    /// younger than `stale_after`.
    async fn try_acquire(
        &self,
        key: &JobKey,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool>;
    /// Take the run-lock of a job whose last run `Failed` (operator retry). `false` in every
    /// other state.
    async fn reopen_failed(&self, key: &JobKey, now: DateTime<Utc>) -> Result<bool>;
    async fn finish(&self, key: &JobKey, state: JobState, now: DateTime<Utc>) -> Result<()>;
    async fn job(&self, key: &JobKey) -> Result<Option<JobRun>>;
}

pub trait Store: TopicStore + BriefStore + SubscriberStore + JobStore {}

impl<T> Store for T where T: TopicStore + BriefStore + SubscriberStore + JobStore {}

pub type DynStore = Arc<dyn Store>;
