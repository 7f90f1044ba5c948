// src/store/local.rs
//! In-process store. All state sits behind one mutex, so every trait method is
//! atomic with respect to the others; that is what makes `compare_and_set_status`
//! and `try_acquire` safe against racing tasks. With a snapshot path configured,
//! each mutation is followed by an atomic JSON write (tmp file + rename).

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BriefStore, JobStore, SubscriberStore, TopicStore};
use crate::config::ALLOWED_SEND_HOURS;
use crate::error::{BriefError, Result};
use crate::model::{
    BriefItem, BriefStatus, DailyBrief, JobKey, JobRun, JobState, SelectionRecord, SendAttempt,
    Subscriber, SubscriberStatus, TopicCandidate,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    candidates: BTreeMap<u64, TopicCandidate>,
    #[serde(default)]
    selections: Vec<SelectionRecord>,
    #[serde(default)]
    briefs: BTreeMap<NaiveDate, DailyBrief>,
    #[serde(default)]
    subscribers: BTreeMap<u64, Subscriber>,
    #[serde(default)]
    attempts: Vec<SendAttempt>,
    /// Keyed by `JobKey`'s display form (`name:date`).
    #[serde(default)]
    jobs: BTreeMap<String, JobRun>,
}

#[derive(Debug, Default)]
pub struct LocalStore {
    inner: Mutex<Snapshot>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Volatile store (tests, demos).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisted at `path`. A missing file starts empty; a corrupt one is an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| BriefError::Store(format!("parse {}: {e}", path.display())))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(BriefError::Store(format!("read {}: {e}", path.display()))),
        };
        Ok(Self {
            inner: Mutex::new(snapshot),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>> {
        self.inner
            .lock()
            .map_err(|_| BriefError::Store("store mutex poisoned".to_string()))
    }

    /// Persist while still holding the guard so snapshots are written in mutation order.
    fn persist(&self, snap: &Snapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_snapshot(path, snap)
            .map_err(|e| BriefError::Store(format!("write {}: {e}", path.display())))
    }

    /// Trend-ingestion side: insert or replace candidates by id.
    pub fn upsert_candidates(&self, candidates: Vec<TopicCandidate>) -> Result<()> {
        let mut g = self.lock()?;
        for c in candidates {
            g.candidates.insert(c.id, c);
        }
        self.persist(&g)
    }

    /// Drop candidates first seen before `cutoff`.
    pub fn prune_candidates(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut g = self.lock()?;
        let before = g.candidates.len();
        g.candidates.retain(|_, c| c.first_seen_at >= cutoff);
        let removed = before - g.candidates.len();
        self.persist(&g)?;
        Ok(removed)
    }

    /// Subscription-management side: insert or replace a subscriber by id.
    pub fn upsert_subscriber(&self, subscriber: Subscriber) -> Result<()> {
        if !ALLOWED_SEND_HOURS.contains(&subscriber.send_hour) {
            return Err(BriefError::Config(format!(
                "send_hour {} not one of {:?}",
                subscriber.send_hour, ALLOWED_SEND_HOURS
            )));
        }
        let mut g = self.lock()?;
        g.subscribers.insert(subscriber.id, subscriber);
        self.persist(&g)
    }

    pub fn subscriber(&self, id: u64) -> Result<Option<Subscriber>> {
        Ok(self.lock()?.subscribers.get(&id).cloned())
    }
}

fn write_snapshot(path: &Path, snap: &Snapshot) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snap)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[async_trait::async_trait]
impl TopicStore for LocalStore {
    async fn candidates(&self) -> Result<Vec<TopicCandidate>> {
        Ok(self.lock()?.candidates.values().cloned().collect())
    }

    async fn selections_since(&self, since: NaiveDate) -> Result<Vec<SelectionRecord>> {
        Ok(self
            .lock()?
            .selections
            .iter()
            .filter(|r| r.selected_date >= since)
            .copied()
            .collect())
    }

    async fn record_selections(&self, records: &[SelectionRecord]) -> Result<()> {
        let mut g = self.lock()?;
        for r in records {
            if !g.selections.contains(r) {
                g.selections.push(*r);
            }
        }
        self.persist(&g)
    }
}

#[async_trait::async_trait]
impl BriefStore for LocalStore {
    async fn create_brief(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<DailyBrief> {
        let mut g = self.lock()?;
        if g.briefs.contains_key(&date) {
            return Err(BriefError::BriefExists(date));
        }
        let brief = DailyBrief::new_draft(date, now);
        g.briefs.insert(date, brief.clone());
        self.persist(&g)?;
        Ok(brief)
    }

    async fn brief(&self, date: NaiveDate) -> Result<Option<DailyBrief>> {
        Ok(self.lock()?.briefs.get(&date).cloned())
    }

    async fn save_items(
        &self,
        date: NaiveDate,
        items: Vec<BriefItem>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut g = self.lock()?;
        let brief = g
            .briefs
            .get_mut(&date)
            .ok_or(BriefError::BriefNotFound(date))?;
        if brief.status != BriefStatus::Draft {
            return Err(BriefError::ItemsLocked(date));
        }
        brief.items = items;
        brief.updated_at = now;
        self.persist(&g)
    }

    async fn compare_and_set_status(
        &self,
        date: NaiveDate,
        expected: BriefStatus,
        next: BriefStatus,
        skip_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !expected.can_transition_to(next) {
            return Err(BriefError::InvalidTransition {
                from: expected,
                to: next,
            });
        }
        let mut g = self.lock()?;
        let brief = g
            .briefs
            .get_mut(&date)
            .ok_or(BriefError::BriefNotFound(date))?;
        if brief.status != expected {
            return Ok(false);
        }
        brief.status = next;
        brief.updated_at = now;
        match next {
            BriefStatus::Published => brief.published_at = Some(now),
            BriefStatus::Skipped => brief.skip_reason = skip_reason,
            BriefStatus::Draft | BriefStatus::Ready => {}
        }
        self.persist(&g)?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl SubscriberStore for LocalStore {
    async fn subscribers(&self) -> Result<Vec<Subscriber>> {
        Ok(self.lock()?.subscribers.values().cloned().collect())
    }

    async fn mark_sent(&self, id: u64, brief_date: NaiveDate, at: DateTime<Utc>) -> Result<()> {
        let mut g = self.lock()?;
        let Some(sub) = g.subscribers.get_mut(&id) else {
            warn!(subscriber_id = id, "mark_sent for unknown subscriber");
            return Ok(());
        };
        sub.last_sent_at = Some(at);
        sub.last_sent_brief = Some(sub.last_sent_brief.map_or(brief_date, |d| d.max(brief_date)));
        self.persist(&g)
    }

    async fn unsubscribe(&self, id: u64) -> Result<bool> {
        let mut g = self.lock()?;
        let Some(sub) = g.subscribers.get_mut(&id) else {
            return Ok(false);
        };
        sub.status = SubscriberStatus::Unsubscribed;
        self.persist(&g)?;
        Ok(true)
    }

    async fn record_attempt(&self, attempt: SendAttempt) -> Result<()> {
        let mut g = self.lock()?;
        g.attempts.push(attempt);
        self.persist(&g)
    }

    async fn attempts(&self, brief_date: NaiveDate) -> Result<Vec<SendAttempt>> {
        Ok(self
            .lock()?
            .attempts
            .iter()
            .filter(|a| a.brief_date == brief_date)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl JobStore for LocalStore {
    async fn try_acquire(
        &self,
        key: &JobKey,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool> {
        let mut g = self.lock()?;
        let id = key.to_string();
        if let Some(run) = g.jobs.get(&id) {
            let reclaimable =
                run.state == JobState::Running && now - run.started_at > stale_after;
            if !reclaimable {
                return Ok(false);
            }
            warn!(job = %key, started_at = %run.started_at, "reclaiming stale run-lock");
        }
        g.jobs.insert(
            id,
            JobRun {
                key: key.clone(),
                state: JobState::Running,
                started_at: now,
                finished_at: None,
            },
        );
        self.persist(&g)?;
        Ok(true)
    }

    async fn reopen_failed(&self, key: &JobKey, now: DateTime<Utc>) -> Result<bool> {
        let mut g = self.lock()?;
        let Some(run) = g.jobs.get_mut(&key.to_string()) else {
            return Ok(false);
        };
        if run.state != JobState::Failed {
            return Ok(false);
        }
        run.state = JobState::Running;
        run.started_at = now;
        run.finished_at = None;
        self.persist(&g)?;
        Ok(true)
    }

    async fn finish(&self, key: &JobKey, state: JobState, now: DateTime<Utc>) -> Result<()> {
        let mut g = self.lock()?;
        match g.jobs.get_mut(&key.to_string()) {
            Some(run) => {
                run.state = state;
                run.finished_at = Some(now);
            }
            None => {
                warn!(job = %key, "finish called without a run-lock");
                return Ok(());
            }
        }
        self.persist(&g)
    }

    async fn job(&self, key: &JobKey) -> Result<Option<JobRun>> {
        Ok(self.lock()?.jobs.get(&key.to_string()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tier;
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, 5, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn one_brief_per_date() {
        let s = LocalStore::in_memory();
        s.create_brief(date(), now()).await.unwrap();
        assert!(matches!(
            s.create_brief(date(), now()).await,
            Err(BriefError::BriefExists(_))
        ));
    }

    #[tokio::test]
    async fn cas_only_applies_on_expected_status() {
        let s = LocalStore::in_memory();
        s.create_brief(date(), now()).await.unwrap();
        assert!(s
            .compare_and_set_status(date(), BriefStatus::Draft, BriefStatus::Ready, None, now())
            .await
            .unwrap());
        // Second writer expecting Draft loses.
        assert!(!s
            .compare_and_set_status(date(), BriefStatus::Draft, BriefStatus::Skipped, None, now())
            .await
            .unwrap());
        // Illegal edge is an error regardless of state.
        assert!(s
            .compare_and_set_status(date(), BriefStatus::Draft, BriefStatus::Published, None, now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn items_locked_after_draft() {
        let s = LocalStore::in_memory();
        s.create_brief(date(), now()).await.unwrap();
        s.save_items(date(), vec![], now()).await.unwrap();
        s.compare_and_set_status(date(), BriefStatus::Draft, BriefStatus::Ready, None, now())
            .await
            .unwrap();
        assert!(matches!(
            s.save_items(date(), vec![], now()).await,
            Err(BriefError::ItemsLocked(_))
        ));
    }

    #[tokio::test]
    async fn run_lock_blocks_until_stale() {
        let s = LocalStore::in_memory();
        let key = JobKey::new("generate", date());
        let stale = Duration::minutes(30);
        assert!(s.try_acquire(&key, now(), stale).await.unwrap());
        assert!(!s.try_acquire(&key, now() + Duration::minutes(5), stale).await.unwrap());
        assert!(s.try_acquire(&key, now() + Duration::minutes(31), stale).await.unwrap());
        s.finish(&key, JobState::Completed, now()).await.unwrap();
        assert!(!s.try_acquire(&key, now() + Duration::days(1), stale).await.unwrap());
        assert!(!s.reopen_failed(&key, now()).await.unwrap());

        s.finish(&key, JobState::Failed, now()).await.unwrap();
        assert!(!s.try_acquire(&key, now() + Duration::days(1), stale).await.unwrap());
        assert!(s.reopen_failed(&key, now()).await.unwrap());
        assert!(!s.reopen_failed(&key, now()).await.unwrap());
        assert_eq!(s.job(&key).await.unwrap().unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("brief.json");
        {
            let s = LocalStore::open(&path).unwrap();
            s.create_brief(date(), now()).await.unwrap();
            s.upsert_subscriber(Subscriber {
                id: 7,
                email: "a@example.com".into(),
                tier: Tier::Individual,
                timezone: "UTC".into(),
                send_hour: 6,
                status: SubscriberStatus::Active,
                last_sent_at: None,
                last_sent_brief: None,
            })
            .unwrap();
            s.mark_sent(7, date(), now()).await.unwrap();
        }
        let s = LocalStore::open(&path).unwrap();
        let brief = s.brief(date()).await.unwrap().unwrap();
        assert_eq!(brief.status, BriefStatus::Draft);
        let sub = s.subscriber(7).unwrap().unwrap();
        assert_eq!(sub.last_sent_brief, Some(date()));
    }

    #[test]
    fn rejects_unsupported_send_hour() {
        let s = LocalStore::in_memory();
        let sub = Subscriber {
            id: 1,
            email: "a@example.com".into(),
            tier: Tier::Trial,
            timezone: "UTC".into(),
            send_hour: 7,
            status: SubscriberStatus::Active,
            last_sent_at: None,
            last_sent_brief: None,
        };
        assert!(matches!(s.upsert_subscriber(sub), Err(BriefError::Config(_))));
    }
}
