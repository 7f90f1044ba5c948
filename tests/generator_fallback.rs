// tests/generator_fallback.rs
//
// A generator that always fails must not keep the day's brief from reaching `ready`:
// every item falls back to the candidate's own title and snippets.
// A slow provider must not hold up rating-feed refreshes meanwhile.

mod common;

use std::time::Duration;

use chrono::Utc;

use daily_brief::config::BriefConfig;
use daily_brief::generate::validate::{word_count, HEADLINE_MAX_WORDS};
use daily_brief::generate::{GenerationError, MockGenerator};
use daily_brief::model::{BriefStatus, ContentOrigin};
use daily_brief::scheduler::GenerationOutcome;
use daily_brief::sources::RatingUpdate;
use daily_brief::store::{BriefStore, TopicStore};

use common::{at, day, harness, pool};

#[tokio::test]
async fn failing_provider_still_produces_ready_brief() {
    let mock = MockGenerator::always(Err(GenerationError::Provider("503 upstream".into())));
    let h = harness(BriefConfig::default(), mock.clone());
    h.local.upsert_candidates(pool(6)).unwrap();

    let outcome = h
        .scheduler
        .run_generation(day(), at(day(), 5, 0))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GenerationOutcome::Ready {
            items: 5,
            fallbacks: 5
        }
    );
    // Standard + strict attempt per item.
    assert_eq!(mock.calls(), 10);

    let brief = h.store.brief(day()).await.unwrap().unwrap();
    assert_eq!(brief.status, BriefStatus::Ready);
    assert_eq!(brief.items.len(), 5);
    for (i, item) in brief.items.iter().enumerate() {
        assert_eq!(item.position as usize, i + 1);
        assert_eq!(item.origin, ContentOrigin::Fallback);
        assert!(word_count(&item.headline) <= HEADLINE_MAX_WORDS);
        assert!(item.bullets.len() >= 2, "{:?}", item.bullets);
        assert!(item.bullets.iter().all(|b| !b.trim().is_empty()));
        assert_eq!(item.verification_links.len(), 3);
        // reuters (center), nytimes (left), foxnews (right)
        assert_eq!(item.coverage.left_count, 1);
        assert_eq!(item.coverage.center_count, 1);
        assert_eq!(item.coverage.right_count, 1);
    }

    // The selection log now excludes these topics for 30 days.
    let log = h.store.selections_since(day()).await.unwrap();
    assert_eq!(log.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn hanging_provider_times_out_into_fallback() {
    let h = harness(BriefConfig::default(), MockGenerator::hanging());
    h.local.upsert_candidates(pool(3)).unwrap();

    let outcome = h
        .scheduler
        .run_generation(day(), at(day(), 5, 0))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GenerationOutcome::Ready {
            items: 3,
            fallbacks: 3
        }
    );
}

#[tokio::test]
async fn healthy_provider_output_is_used() {
    let h = harness(BriefConfig::default(), MockGenerator::echo());
    h.local.upsert_candidates(pool(4)).unwrap();

    h.scheduler
        .run_generation(day(), at(day(), 5, 0))
        .await
        .unwrap();
    let brief = h.store.brief(day()).await.unwrap().unwrap();
    assert_eq!(brief.items.len(), 4);
    assert!(brief
        .items
        .iter()
        .all(|i| i.origin == ContentOrigin::Generated));
}

#[tokio::test(start_paused = true)]
async fn rating_refresh_is_not_blocked_by_generation() {
    let h = harness(BriefConfig::default(), MockGenerator::hanging());
    h.local.upsert_candidates(pool(3)).unwrap();

    let s = h.scheduler.clone();
    let generation = tokio::spawn(async move { s.run_generation(day(), at(day(), 5, 0)).await });
    // Generation is now waiting on the provider.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let update = RatingUpdate {
        domain: "newsite.example".into(),
        name: Some("New Site".into()),
        leaning: 1,
        confidence: None,
        provenance: None,
    };
    let changed = tokio::time::timeout(
        Duration::from_millis(10),
        h.scheduler.apply_rating_feed(vec![update], Utc::now()),
    )
    .await
    .expect("rating refresh waited on generation");
    assert_eq!(changed, 1);

    let outcome = generation.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        GenerationOutcome::Ready {
            items: 3,
            fallbacks: 3
        }
    );
}
