//! # Scheduler
//! Turns wall-clock time into jobs and runs each job at most once per key.
//!
//! Jobs (all keyed by the schedule-local date):
//! - `generate` once `generate_at` has passed
//! - `auto_publish` once `auto_publish_at` has passed
//! - `send@HH` every hour, `HH` being the UTC hour
//!
//! Every run takes the run-lock in the job table first, so two ticks, two processes or a
//! restart after a crash cannot run the same job twice. A `Running` lock older than
//! `stale_lock_secs` is treated as abandoned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BriefConfig;
use crate::coverage::analyze_articles;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{BriefError, Result};
use crate::generate::BriefGenerator;
use crate::lifecycle::{self, TransitionOutcome};
use crate::model::{
    BriefItem, BriefStatus, ContentOrigin, CoverageResult, JobKey, JobState, SelectionRecord,
};
use crate::selector::{eligible_candidates, select_topics};
use crate::sources::{RatingUpdate, SourceRegistry};
use crate::store::DynStore;

pub const JOB_GENERATE: &str = "generate";
pub const JOB_AUTO_PUBLISH: &str = "auto_publish";
pub const JOB_SEND_PREFIX: &str = "send@";

/// Result of one generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Ready { items: usize, fallbacks: usize },
    Skipped { reason: String },
    /// The brief had already left `draft`; nothing was touched.
    Unchanged { status: BriefStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    Generated(GenerationOutcome),
    AutoPublished { outcome: TransitionOutcome },
    Dispatched(DispatchReport),
    /// Run-lock held by a finished or live run.
    AlreadyRan,
}

pub struct Scheduler {
    store: DynStore,
    registry: Arc<RwLock<SourceRegistry>>,
    generator: BriefGenerator,
    dispatcher: Dispatcher,
    cfg: BriefConfig,
}

impl Scheduler {
    pub fn new(
        store: DynStore,
        registry: SourceRegistry,
        generator: BriefGenerator,
        dispatcher: Dispatcher,
        cfg: BriefConfig,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(RwLock::new(registry)),
            generator,
            dispatcher,
            cfg,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &BriefConfig {
        &self.cfg
    }

    /// Brief date at `now` in the schedule timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.cfg.schedule.timezone).date_naive()
    }

    /// Apply a batch from the rating feed to the live registry.
    pub async fn apply_rating_feed(
        &self,
        updates: Vec<RatingUpdate>,
        now: DateTime<Utc>,
    ) -> usize {
        let changed = self.registry.write().await.apply_rating_feed(updates, now);
        info!(changed, "source ratings refreshed");
        changed
    }

    /// Jobs whose trigger has passed at `now`, in the order they should run.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobKey> {
        let sched = &self.cfg.schedule;
        let local = now.with_timezone(&sched.timezone);
        let date = local.date_naive();
        let time = local.time();

        let mut jobs = Vec::with_capacity(3);
        if time >= sched.generate_at {
            jobs.push(JobKey::new(JOB_GENERATE, date));
        }
        if time >= sched.auto_publish_at {
            jobs.push(JobKey::new(JOB_AUTO_PUBLISH, date));
        }
        jobs.push(JobKey::new(format!("{JOB_SEND_PREFIX}{:02}", now.hour()), date));
        jobs
    }

    /// Run every due job once. Errors are logged; the caller's loop never sees them.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<(JobKey, JobOutcome)> {
        let mut done = Vec::new();
        for key in self.due_jobs(now) {
            match self.run_job(&key, now).await {
                Ok(JobOutcome::AlreadyRan) => debug!(job = %key, "already ran"),
                Ok(outcome) => done.push((key, outcome)),
                Err(e) => error!(job = %key, error = %e, "job failed"),
            }
        }
        done
    }

    /// Acquire the run-lock for `key`, run the job, record how it ended.
    pub async fn run_job(&self, key: &JobKey, now: DateTime<Utc>) -> Result<JobOutcome> {
        if !self
            .store
            .try_acquire(key, now, self.cfg.schedule.stale_after())
            .await?
        {
            return Ok(JobOutcome::AlreadyRan);
        }
        self.run_locked(key, now).await
    }

    /// Operator-triggered generation. Shares the scheduled `generate` run-lock, so it never
    /// overlaps the timed job; a run that ended `Failed` may be retried this way.
    pub async fn generate_now(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<JobOutcome> {
        let key = JobKey::new(JOB_GENERATE, date);
        let acquired = self
            .store
            .try_acquire(&key, now, self.cfg.schedule.stale_after())
            .await?
            || self.store.reopen_failed(&key, now).await?;
        if !acquired {
            debug!(job = %key, "generate already ran or is running");
            return Ok(JobOutcome::AlreadyRan);
        }
        self.run_locked(&key, now).await
    }

    async fn run_locked(&self, key: &JobKey, now: DateTime<Utc>) -> Result<JobOutcome> {
        let result = if key.name == JOB_GENERATE {
            self.run_generation(key.date, now)
                .await
                .map(JobOutcome::Generated)
        } else if key.name == JOB_AUTO_PUBLISH {
            lifecycle::auto_publish(&*self.store, key.date, now)
                .await
                .or_else(|e| match e {
                    // Generation never created a brief; nothing to publish.
                    BriefError::BriefNotFound(_) => Ok(TransitionOutcome::NoOp),
                    other => Err(other),
                })
                .map(|outcome| JobOutcome::AutoPublished { outcome })
        } else if key.name.starts_with(JOB_SEND_PREFIX) {
            self.dispatcher.run_hourly(now).await.map(JobOutcome::Dispatched)
        } else {
            Err(BriefError::Config(format!("unknown job {}", key.name)))
        };

        let state = if result.is_ok() {
            JobState::Completed
        } else {
            JobState::Failed
        };
        if let Err(e) = self.store.finish(key, state, Utc::now()).await {
            error!(job = %key, error = %e, "failed to record job state");
        }
        result
    }

    /// Build the day's brief: draft → items → ready, or skipped with a reason.
    pub async fn run_generation(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<GenerationOutcome> {
        let brief = match self.store.create_brief(date, now).await {
            Ok(b) => b,
            Err(BriefError::BriefExists(_)) => self
                .store
                .brief(date)
                .await?
                .ok_or(BriefError::BriefNotFound(date))?,
            Err(e) => return Err(e),
        };
        if brief.status != BriefStatus::Draft {
            debug!(%date, status = brief.status.as_str(), "brief already past draft");
            return Ok(GenerationOutcome::Unchanged {
                status: brief.status,
            });
        }

        let items = match self.build_items(date, now).await {
            Ok(items) => items,
            // Another run filled and advanced the brief first.
            Err(BriefError::ItemsLocked(_)) => return self.unchanged(date).await,
            Err(e) => {
                let reason = format!("{}: {e}", e.kind());
                if !lifecycle::abandon_draft(&*self.store, date, &reason, now)
                    .await?
                    .applied()
                {
                    return self.unchanged(date).await;
                }
                warn!(%date, %reason, "skipping brief");
                return Ok(GenerationOutcome::Skipped { reason });
            }
        };

        let fallbacks = items
            .iter()
            .filter(|i| i.origin == ContentOrigin::Fallback)
            .count();
        let count = items.len();
        match lifecycle::mark_ready(&*self.store, date, now).await {
            Ok(outcome) if outcome.applied() => {}
            Ok(_) | Err(BriefError::InvalidTransition { .. }) => return self.unchanged(date).await,
            Err(e) => return Err(e),
        }
        counter!("brief_generated_total").increment(1);
        info!(
            %date,
            items = count,
            fallbacks,
            provider = self.generator.provider_name(),
            "brief ready"
        );
        Ok(GenerationOutcome::Ready {
            items: count,
            fallbacks,
        })
    }

    async fn unchanged(&self, date: NaiveDate) -> Result<GenerationOutcome> {
        let status = self
            .store
            .brief(date)
            .await?
            .map(|b| b.status)
            .ok_or(BriefError::BriefNotFound(date))?;
        debug!(%date, status = status.as_str(), "brief moved on during generation");
        Ok(GenerationOutcome::Unchanged { status })
    }

    /// Select, generate, persist items and append the selection log. Draft stays draft.
    async fn build_items(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Vec<BriefItem>> {
        let sel = &self.cfg.selection;
        let candidates = self.store.candidates().await?;
        let since = date - ChronoDuration::days(sel.exclusion_days);
        let history = self.store.selections_since(since).await?;

        let eligible = eligible_candidates(&candidates, &history, date, sel.exclusion_days).len();
        gauge!("selection_eligible_candidates").set(eligible as f64);

        let topics = select_topics(&candidates, &history, date, sel)?;
        // Registry guard ends here; generation may take minutes.
        let coverage: Vec<CoverageResult> = {
            let registry = self.registry.read().await;
            topics
                .iter()
                .map(|t| analyze_articles(&registry, &t.candidate.articles))
                .collect()
        };
        let items = self.generator.generate_items(&topics, coverage).await;

        self.store.save_items(date, items.clone(), now).await?;
        let records: Vec<SelectionRecord> = topics
            .iter()
            .map(|t| SelectionRecord {
                topic_id: t.candidate.id,
                selected_date: date,
            })
            .collect();
        self.store.record_selections(&records).await?;
        Ok(items)
    }

    /// Background loop ticking every `tick_secs`.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let every = Duration::from_secs(self.cfg.schedule.tick_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ran = self.tick(Utc::now()).await;
                if !ran.is_empty() {
                    info!(jobs = ran.len(), "scheduler tick");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::dispatch::LogTransport;
    use crate::generate::MockGenerator;
    use crate::store::LocalStore;
    use chrono::TimeZone;

    fn scheduler(cfg: BriefConfig) -> Scheduler {
        let store: DynStore = Arc::new(LocalStore::in_memory());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(LogTransport::default()),
            cfg.dispatch.clone(),
        );
        Scheduler::new(
            store,
            SourceRegistry::default_seed(),
            BriefGenerator::new(Arc::new(MockGenerator::echo()), &GenerationConfig::default()),
            dispatcher,
            cfg,
        )
    }

    fn names(keys: &[JobKey]) -> Vec<&str> {
        keys.iter().map(|k| k.name.as_str()).collect()
    }

    #[test]
    fn due_jobs_follow_the_clock() {
        let s = scheduler(BriefConfig::default());
        let early = Utc.with_ymd_and_hms(2025, 9, 10, 4, 59, 0).unwrap();
        assert_eq!(names(&s.due_jobs(early)), vec!["send@04"]);

        let mid = Utc.with_ymd_and_hms(2025, 9, 10, 6, 0, 0).unwrap();
        assert_eq!(names(&s.due_jobs(mid)), vec!["generate", "send@06"]);

        let late = Utc.with_ymd_and_hms(2025, 9, 10, 7, 30, 0).unwrap();
        assert_eq!(
            names(&s.due_jobs(late)),
            vec!["generate", "auto_publish", "send@07"]
        );
    }

    #[test]
    fn due_jobs_use_schedule_timezone_date() {
        let mut cfg = BriefConfig::default();
        cfg.schedule.timezone = chrono_tz::America::New_York;
        let s = scheduler(cfg);
        // 02:00 UTC on the 11th is 22:00 on the 10th in New York.
        let now = Utc.with_ymd_and_hms(2025, 9, 11, 2, 0, 0).unwrap();
        let jobs = s.due_jobs(now);
        assert!(jobs
            .iter()
            .all(|k| k.date == NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()));
    }

    #[tokio::test]
    async fn second_run_of_same_key_is_skipped() {
        let s = scheduler(BriefConfig::default());
        let now = Utc.with_ymd_and_hms(2025, 9, 10, 7, 0, 0).unwrap();
        let key = JobKey::new(JOB_AUTO_PUBLISH, s.today(now));
        assert!(matches!(
            s.run_job(&key, now).await.unwrap(),
            JobOutcome::AutoPublished { .. }
        ));
        assert_eq!(s.run_job(&key, now).await.unwrap(), JobOutcome::AlreadyRan);
    }

    #[tokio::test]
    async fn unknown_job_is_recorded_as_failed() {
        let s = scheduler(BriefConfig::default());
        let now = Utc.with_ymd_and_hms(2025, 9, 10, 7, 0, 0).unwrap();
        let key = JobKey::new("rebuild", s.today(now));
        assert!(s.run_job(&key, now).await.is_err());
        let run = s.store().job(&key).await.unwrap().unwrap();
        assert_eq!(run.state, JobState::Failed);
    }
}
