//! # Brief lifecycle
//! The only place brief status changes. Every transition is a compare-and-set on the
//! store, so an admin click and the auto-publish trigger can race safely: exactly one
//! of them applies, the other sees `NoOp`.
//!
//! ```text
//! draft ──► ready ──► published
//!   │         │
//!   └────► skipped ◄┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{BriefError, Result};
use crate::model::BriefStatus;
use crate::store::BriefStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied,
    /// Already in the target (or another terminal) state, or a concurrent writer won.
    NoOp,
}

impl TransitionOutcome {
    pub fn applied(self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

async fn current_status<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
) -> Result<BriefStatus> {
    store
        .brief(date)
        .await?
        .map(|b| b.status)
        .ok_or(BriefError::BriefNotFound(date))
}

async fn cas<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    expected: BriefStatus,
    next: BriefStatus,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    if store
        .compare_and_set_status(date, expected, next, reason, now)
        .await?
    {
        info!(%date, from = expected.as_str(), to = next.as_str(), "brief transition");
        Ok(TransitionOutcome::Applied)
    } else {
        debug!(%date, from = expected.as_str(), to = next.as_str(), "transition lost a race");
        Ok(TransitionOutcome::NoOp)
    }
}

/// `draft -> ready` after generation succeeded.
pub async fn mark_ready<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    match current_status(store, date).await? {
        BriefStatus::Draft => {
            cas(store, date, BriefStatus::Draft, BriefStatus::Ready, None, now).await
        }
        BriefStatus::Ready => Ok(TransitionOutcome::NoOp),
        other => Err(BriefError::InvalidTransition {
            from: other,
            to: BriefStatus::Ready,
        }),
    }
}

/// Admin publish. Idempotent on `published`; `skipped` is terminal so also a no-op.
/// Publishing a `draft` is rejected: the brief has no validated content yet.
pub async fn publish<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    match current_status(store, date).await? {
        BriefStatus::Ready => {
            let out =
                cas(store, date, BriefStatus::Ready, BriefStatus::Published, None, now).await?;
            if out.applied() {
                counter!("brief_published_total", "path" => "manual").increment(1);
            }
            Ok(out)
        }
        BriefStatus::Published | BriefStatus::Skipped => Ok(TransitionOutcome::NoOp),
        BriefStatus::Draft => Err(BriefError::InvalidTransition {
            from: BriefStatus::Draft,
            to: BriefStatus::Published,
        }),
    }
}

/// Auto-publish trigger: publishes only if the brief is still `ready`.
pub async fn auto_publish<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    match current_status(store, date).await? {
        BriefStatus::Ready => {
            let out =
                cas(store, date, BriefStatus::Ready, BriefStatus::Published, None, now).await?;
            if out.applied() {
                counter!("brief_published_total", "path" => "auto").increment(1);
            }
            Ok(out)
        }
        status => {
            debug!(%date, status = status.as_str(), "auto-publish: nothing to do");
            Ok(TransitionOutcome::NoOp)
        }
    }
}

/// Skip from `draft` or `ready`. Terminal briefs are left alone.
pub async fn skip<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    // A CAS loss here may mean draft -> ready happened in between; retry once from the
    // fresh status before giving up.
    for _ in 0..2 {
        let from = current_status(store, date).await?;
        if from.is_terminal() {
            return Ok(TransitionOutcome::NoOp);
        }
        let reason = Some(reason.to_string());
        let out = cas(store, date, from, BriefStatus::Skipped, reason, now).await?;
        if out.applied() {
            counter!("brief_skipped_total").increment(1);
            return Ok(out);
        }
    }
    Ok(TransitionOutcome::NoOp)
}

/// `draft -> skipped` when generation could not produce the brief. Unlike [`skip`] this
/// never touches a brief that already reached `ready`.
pub async fn abandon_draft<S: BriefStore + ?Sized>(
    store: &S,
    date: NaiveDate,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let reason = Some(reason.to_string());
    let out = cas(store, date, BriefStatus::Draft, BriefStatus::Skipped, reason, now).await?;
    if out.applied() {
        counter!("brief_skipped_total").increment(1);
    }
    Ok(out)
}
