// tests/dispatch_idempotence.rs
//
// Email dispatch guarantees:
// - a subscriber receives a given brief at most once, however often the hourly job runs
// - delivery happens once the subscriber's local send hour has arrived
// - permanent failures are not retried; transient ones retry with backoff, then give up
// - one subscriber's failure never affects another's delivery

mod common;

use chrono::NaiveDate;

use daily_brief::config::BriefConfig;
use daily_brief::dispatch::DeliveryResult;
use daily_brief::generate::MockGenerator;
use daily_brief::lifecycle::{mark_ready, publish};
use daily_brief::model::{AttemptOutcome, SubscriberStatus};
use daily_brief::store::{BriefStore, SubscriberStore};

use common::{at, day, harness, subscriber, Harness};

async fn ready(h: &Harness, date: NaiveDate) {
    h.store.create_brief(date, at(date, 5, 0)).await.unwrap();
    mark_ready(&*h.store, date, at(date, 5, 1)).await.unwrap();
}

async fn published(h: &Harness, date: NaiveDate) {
    ready(h, date).await;
    publish(&*h.store, date, at(date, 6, 0)).await.unwrap();
}

fn setup() -> Harness {
    harness(BriefConfig::default(), MockGenerator::echo())
}

#[tokio::test]
async fn hourly_run_twice_sends_once() {
    let h = setup();
    published(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();
    h.local.upsert_subscriber(subscriber(2, "America/New_York", 6)).unwrap();
    h.local.upsert_subscriber(subscriber(3, "UTC", 8)).unwrap();

    let d = h.scheduler.dispatcher();
    let first = d.run_hourly(at(day(), 6, 0)).await.unwrap();
    assert_eq!(first.brief_dates, vec![day()]);
    assert_eq!(first.sent, 1);
    assert_eq!(first.not_due, 2);

    let second = d.run_hourly(at(day(), 6, 30)).await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.already_sent, 1);

    assert_eq!(h.transport.attempts_to("reader1@example.com"), 1);
    assert_eq!(h.transport.total(), 1);
    let sub = h.local.subscriber(1).unwrap().unwrap();
    assert_eq!(sub.last_sent_brief, Some(day()));
    assert!(sub.last_sent_at.is_some());
}

#[tokio::test]
async fn brief_published_after_send_hour_goes_out_next_run() {
    let h = setup();
    ready(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();

    let d = h.scheduler.dispatcher();
    assert_eq!(d.run_hourly(at(day(), 6, 0)).await.unwrap().awaiting_brief, 1);

    publish(&*h.store, day(), at(day(), 7, 0)).await.unwrap();
    let report = d.run_hourly(at(day(), 7, 0)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.brief_dates, vec![day()]);
    assert_eq!(d.run_hourly(at(day(), 8, 0)).await.unwrap().already_sent, 1);
    assert_eq!(h.transport.total(), 1);
}

#[tokio::test]
async fn local_send_hour_follows_subscriber_timezone() {
    let h = setup();
    published(&h, day()).await;
    h.local.upsert_subscriber(subscriber(2, "America/New_York", 6)).unwrap();

    let d = h.scheduler.dispatcher();
    // 06:00 UTC is 02:00 in New York.
    assert_eq!(d.run_hourly(at(day(), 6, 0)).await.unwrap().sent, 0);
    // 10:00 UTC is 06:00 EDT.
    assert_eq!(d.run_hourly(at(day(), 10, 0)).await.unwrap().sent, 1);
    assert_eq!(h.transport.attempts_to("reader2@example.com"), 1);
}

#[tokio::test]
async fn permanent_failure_is_not_retried_and_isolated() {
    let h = setup();
    published(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();
    h.local.upsert_subscriber(subscriber(2, "UTC", 6)).unwrap();
    h.transport.script(
        "reader1@example.com",
        vec![DeliveryResult::Permanent("550 mailbox unavailable".into())],
    );

    let report = h
        .scheduler
        .dispatcher()
        .run_hourly(at(day(), 6, 5))
        .await
        .unwrap();
    assert_eq!(report.permanent_failures, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.attempts_to("reader1@example.com"), 1);
    assert_eq!(h.transport.attempts_to("reader2@example.com"), 1);

    let attempts = h.store.attempts(day()).await.unwrap();
    let for_one: Vec<_> = attempts.iter().filter(|a| a.subscriber_id == 1).collect();
    assert_eq!(for_one.len(), 1);
    assert!(matches!(
        for_one[0].outcome,
        AttemptOutcome::PermanentFailure(_)
    ));
    assert_eq!(h.local.subscriber(1).unwrap().unwrap().last_sent_brief, None);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_after_max_attempts() {
    let h = setup();
    published(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();
    h.local.upsert_subscriber(subscriber(2, "UTC", 6)).unwrap();
    h.transport.script(
        "reader1@example.com",
        vec![DeliveryResult::Transient("421 try later".into()); 5],
    );

    let started = tokio::time::Instant::now();
    let report = h
        .scheduler
        .dispatcher()
        .run_hourly(at(day(), 6, 0))
        .await
        .unwrap();
    assert_eq!(report.exhausted, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.attempts_to("reader1@example.com"), 3);
    // 500 ms + 1000 ms of backoff between the three attempts.
    assert!(started.elapsed() >= std::time::Duration::from_millis(1500));

    let attempts = h.store.attempts(day()).await.unwrap();
    let outcomes: Vec<_> = attempts
        .iter()
        .filter(|a| a.subscriber_id == 1)
        .map(|a| (a.attempt_number, a.outcome.clone()))
        .collect();
    assert_eq!(outcomes.len(), 4);
    assert!(matches!(outcomes[0], (1, AttemptOutcome::TransientFailure(_))));
    assert!(matches!(outcomes[2], (3, AttemptOutcome::TransientFailure(_))));
    assert_eq!(outcomes[3], (3, AttemptOutcome::Exhausted));
}

#[tokio::test(start_paused = true)]
async fn transient_then_accepted_counts_as_sent() {
    let h = setup();
    published(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();
    h.transport.script(
        "reader1@example.com",
        vec![DeliveryResult::Transient("timeout".into())],
    );

    let report = h
        .scheduler
        .dispatcher()
        .run_hourly(at(day(), 6, 0))
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.attempts_to("reader1@example.com"), 2);
    assert_eq!(
        h.local.subscriber(1).unwrap().unwrap().last_sent_brief,
        Some(day())
    );
}

#[tokio::test]
async fn unpublished_brief_is_never_dispatched() {
    let h = setup();
    ready(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();

    let report = h
        .scheduler
        .dispatcher()
        .run_hourly(at(day(), 6, 0))
        .await
        .unwrap();
    assert!(report.brief_dates.is_empty());
    assert_eq!(report.awaiting_brief, 1);
    assert_eq!(h.transport.total(), 0);
}

#[tokio::test]
async fn test_send_leaves_subscribers_alone() {
    let h = setup();
    ready(&h, day()).await;
    h.local.upsert_subscriber(subscriber(1, "UTC", 6)).unwrap();

    let result = h
        .scheduler
        .dispatcher()
        .test_send(day(), "editor@example.com")
        .await
        .unwrap();
    assert_eq!(result, DeliveryResult::Accepted);
    let email = h.transport.last().unwrap();
    assert_eq!(email.to, "editor@example.com");
    assert!(!email.text.contains("Unsubscribe"));
    assert_eq!(h.local.subscriber(1).unwrap().unwrap().last_sent_brief, None);
    assert!(h.store.attempts(day()).await.unwrap().is_empty());
}

#[tokio::test]
async fn inactive_and_broken_subscribers_are_skipped() {
    let h = setup();
    published(&h, day()).await;
    let mut gone = subscriber(1, "UTC", 6);
    gone.status = SubscriberStatus::Unsubscribed;
    h.local.upsert_subscriber(gone).unwrap();
    h.local.upsert_subscriber(subscriber(2, "Not/AZone", 6)).unwrap();
    h.local.upsert_subscriber(subscriber(3, "UTC", 6)).unwrap();

    let report = h
        .scheduler
        .dispatcher()
        .run_hourly(at(day(), 6, 0))
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.invalid_timezone, 1);
    assert_eq!(h.transport.attempts_to("reader1@example.com"), 0);
    assert_eq!(h.transport.attempts_to("reader3@example.com"), 1);
}
