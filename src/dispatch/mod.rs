//! # Email Dispatcher
//! Delivers published briefs to active subscribers once their local send hour arrives.
//!
//! - A subscriber's brief is the one dated on their local calendar day. If that one is not
//!   published yet, the previous day's brief is used so far-off timezones still get it.
//! - Due from `send_hour` onward, so a brief published after the hour still goes out on
//!   the next hourly run.
//! - At most once per subscriber per brief date (`last_sent_brief` guard).
//! - Sends are throttled to `rate_per_sec`; excess waits, nothing is dropped.
//! - Transient failures are retried with exponential backoff up to `max_attempts`;
//!   permanent failures are recorded once. Every attempt lands in the audit trail.
//! - One subscriber's failure never stops the batch.

pub mod email;
pub mod render;
pub mod throttle;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::{BriefError, Result};
use crate::model::{
    AttemptOutcome, BriefStatus, DailyBrief, SendAttempt, Subscriber, SubscriberStatus,
};
use crate::store::DynStore;

pub use email::{
    DeliveryResult, DynTransport, EmailTransport, LogTransport, OutgoingEmail, SmtpTransport,
};
pub use throttle::Throttle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Published briefs that went out (or were attempted) in this run, oldest first.
    pub brief_dates: Vec<NaiveDate>,
    pub sent: usize,
    /// Active subscribers whose local send hour has not come yet.
    pub not_due: usize,
    /// Due subscribers that already hold the newest published brief.
    pub already_sent: usize,
    /// Due subscribers with no published brief for their local day (or the day before).
    pub awaiting_brief: usize,
    pub permanent_failures: usize,
    pub exhausted: usize,
    pub invalid_timezone: usize,
}

impl DispatchReport {
    /// Everyone passed over without a send attempt.
    pub fn skipped(&self) -> usize {
        self.not_due + self.already_sent + self.awaiting_brief + self.invalid_timezone
    }

    fn note_brief(&mut self, date: NaiveDate) {
        if let Err(pos) = self.brief_dates.binary_search(&date) {
            self.brief_dates.insert(pos, date);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryStatus {
    Sent,
    Permanent,
    Exhausted,
}

pub struct Dispatcher {
    store: DynStore,
    transport: DynTransport,
    cfg: DispatchConfig,
    throttle: Throttle,
}

impl Dispatcher {
    pub fn new(store: DynStore, transport: DynTransport, cfg: DispatchConfig) -> Self {
        let throttle = Throttle::per_second(cfg.rate_per_sec);
        Self {
            store,
            transport,
            cfg,
            throttle,
        }
    }

    /// Hourly job body: every active subscriber past their send hour gets the newest
    /// published brief for their local day, unless they already have it.
    pub async fn run_hourly(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut published: HashMap<NaiveDate, Option<DailyBrief>> = HashMap::new();

        for sub in self.store.subscribers().await? {
            if sub.status != SubscriberStatus::Active {
                continue;
            }
            let local = match local_time(&sub, now) {
                Ok(t) => t,
                Err(tz) => {
                    warn!(subscriber_id = sub.id, timezone = %tz, "invalid subscriber timezone");
                    report.invalid_timezone += 1;
                    continue;
                }
            };
            if local.hour() < sub.send_hour {
                report.not_due += 1;
                continue;
            }

            let today = local.date_naive();
            let mut chosen = None;
            for date in [Some(today), today.pred_opt()].into_iter().flatten() {
                if !published.contains_key(&date) {
                    let found = self
                        .store
                        .brief(date)
                        .await?
                        .filter(|b| b.status == BriefStatus::Published);
                    published.insert(date, found);
                }
                if matches!(published.get(&date), Some(Some(_))) {
                    chosen = Some(date);
                    break;
                }
            }
            let Some(brief) = chosen
                .and_then(|d| published.get(&d))
                .and_then(Option::as_ref)
            else {
                debug!(subscriber_id = sub.id, %today, "no published brief for subscriber's day");
                report.awaiting_brief += 1;
                continue;
            };
            if sub.last_sent_brief.is_some_and(|d| d >= brief.date) {
                report.already_sent += 1;
                continue;
            }

            report.note_brief(brief.date);
            let email = render::render_email(brief, &sub.email, Some(sub.id), &self.cfg);
            match self.deliver(sub.id, brief.date, &email).await {
                DeliveryStatus::Sent => {
                    if let Err(e) = self.store.mark_sent(sub.id, brief.date, Utc::now()).await {
                        error!(subscriber_id = sub.id, error = %e, "mark_sent failed after send");
                    }
                    report.sent += 1;
                }
                DeliveryStatus::Permanent => report.permanent_failures += 1,
                DeliveryStatus::Exhausted => report.exhausted += 1,
            }
        }

        if !report.brief_dates.is_empty() {
            info!(
                briefs = ?report.brief_dates,
                sent = report.sent,
                already_sent = report.already_sent,
                permanent = report.permanent_failures,
                exhausted = report.exhausted,
                "dispatch finished"
            );
        }
        Ok(report)
    }

    /// Send one brief (ready or published) to an arbitrary address. No subscriber state changes.
    pub async fn test_send(&self, date: NaiveDate, address: &str) -> Result<DeliveryResult> {
        let brief = self
            .store
            .brief(date)
            .await?
            .ok_or(BriefError::BriefNotFound(date))?;
        if !matches!(brief.status, BriefStatus::Ready | BriefStatus::Published) {
            return Err(BriefError::InvalidTransition {
                from: brief.status,
                to: BriefStatus::Published,
            });
        }
        let email = render::render_email(&brief, address, None, &self.cfg);
        self.throttle.acquire().await;
        let result = self.send_once(&email).await;
        info!(%date, to = %address, ?result, "test send");
        Ok(result)
    }

    async fn send_once(&self, email: &OutgoingEmail) -> DeliveryResult {
        match tokio::time::timeout(self.cfg.send_timeout(), self.transport.send(email)).await {
            Ok(r) => r,
            Err(_) => DeliveryResult::Transient("send timed out".to_string()),
        }
    }

    async fn deliver(
        &self,
        subscriber_id: u64,
        brief_date: NaiveDate,
        email: &OutgoingEmail,
    ) -> DeliveryStatus {
        let max = self.cfg.max_attempts.max(1);
        for attempt in 1..=max {
            if attempt > 1 {
                counter!("email_retry_total").increment(1);
                tokio::time::sleep(self.cfg.backoff_before(attempt)).await;
            }
            self.throttle.acquire().await;

            let (outcome, status) = match self.send_once(email).await {
                DeliveryResult::Accepted => (AttemptOutcome::Accepted, Some(DeliveryStatus::Sent)),
                DeliveryResult::Permanent(m) => {
                    (AttemptOutcome::PermanentFailure(m), Some(DeliveryStatus::Permanent))
                }
                DeliveryResult::Transient(m) => (AttemptOutcome::TransientFailure(m), None),
            };
            self.record(subscriber_id, brief_date, attempt, outcome).await;

            match status {
                Some(DeliveryStatus::Sent) => {
                    counter!("email_sent_total").increment(1);
                    return DeliveryStatus::Sent;
                }
                Some(s) => {
                    counter!("email_failed_total", "kind" => "permanent").increment(1);
                    warn!(subscriber_id, %brief_date, "permanent delivery failure");
                    return s;
                }
                None => {
                    debug!(subscriber_id, %brief_date, attempt, "transient delivery failure");
                }
            }
        }

        counter!("email_failed_total", "kind" => "exhausted").increment(1);
        warn!(subscriber_id, %brief_date, attempts = max, "delivery retries exhausted");
        self.record(subscriber_id, brief_date, max, AttemptOutcome::Exhausted).await;
        DeliveryStatus::Exhausted
    }

    async fn record(
        &self,
        subscriber_id: u64,
        brief_date: NaiveDate,
        attempt_number: u32,
        outcome: AttemptOutcome,
    ) {
        let attempt = SendAttempt {
            subscriber_id,
            brief_date,
            attempt_number,
            outcome,
            at: Utc::now(),
        };
        if let Err(e) = self.store.record_attempt(attempt).await {
            error!(subscriber_id, error = %e, "failed to record send attempt");
        }
    }
}

/// `now` on the subscriber's wall clock. `Err` carries the unparseable timezone.
pub fn local_time(
    sub: &Subscriber,
    now: DateTime<Utc>,
) -> std::result::Result<DateTime<Tz>, String> {
    let tz: Tz = sub.timezone.parse().map_err(|_| sub.timezone.clone())?;
    Ok(now.with_timezone(&tz))
}
