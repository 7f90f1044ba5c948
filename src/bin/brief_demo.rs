//! Offline walk through one day: seed topics and subscribers, generate, publish, dispatch.
//! Uses the mock text generator and the log-only email transport, so no keys are needed.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use daily_brief::config::BriefConfig;
use daily_brief::dispatch::{Dispatcher, LogTransport};
use daily_brief::generate::{BriefGenerator, MockGenerator};
use daily_brief::lifecycle;
use daily_brief::model::{SourceArticle, Subscriber, SubscriberStatus, Tier, TopicCandidate};
use daily_brief::sources::SourceRegistry;
use daily_brief::store::{DynStore, LocalStore};
use daily_brief::{init_tracing, Scheduler};

fn topic(id: u64, title: &str, category: &str, civic: f64, domains: &[&str]) -> TopicCandidate {
    TopicCandidate {
        id,
        title: title.to_string(),
        summary: format!("Summary of {title}."),
        civic_score: civic,
        quality_score: 0.6,
        source_count: domains.len() as u32,
        category: category.to_string(),
        geography: "US".to_string(),
        first_seen_at: Utc::now() - Duration::hours(6),
        articles: domains
            .iter()
            .enumerate()
            .map(|(i, d)| SourceArticle {
                source_domain: d.to_string(),
                url: format!("https://{d}/story/{id}"),
                snippet: format!("Report {} on {title}.", i + 1),
            })
            .collect(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    // Defaults keep the demo independent of local config files (UTC schedule).
    let mut cfg = BriefConfig::default();
    cfg.dispatch.unsubscribe_secret = "demo-only-secret".to_string();
    let local = Arc::new(LocalStore::in_memory());
    local.upsert_candidates(vec![
        topic(
            1,
            "Senate passes infrastructure bill",
            "Politics",
            0.9,
            &["apnews.com", "foxnews.com", "cnn.com"],
        ),
        topic(
            2,
            "City council expands bus service",
            "Transport",
            0.7,
            &["reuters.com", "nytimes.com"],
        ),
        topic(3, "Drought prompts new water limits", "Environment", 0.8, &["npr.org", "wsj.com"]),
        topic(4, "School board revises budget plan", "Education", 0.6, &["msnbc.com"]),
        topic(
            5,
            "Court hears voting rights appeal",
            "Politics",
            0.85,
            &["breitbart.com", "nationalreview.com"],
        ),
    ])?;
    local.upsert_subscriber(Subscriber {
        id: 1,
        email: "reader@example.com".to_string(),
        tier: Tier::Individual,
        timezone: "UTC".to_string(),
        send_hour: 8,
        status: SubscriberStatus::Active,
        last_sent_at: None,
        last_sent_brief: None,
    })?;

    let store: DynStore = local;
    let transport = Arc::new(LogTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), cfg.dispatch.clone());
    let generator = BriefGenerator::new(Arc::new(MockGenerator::echo()), &cfg.generation);
    let scheduler = Scheduler::new(
        store.clone(),
        SourceRegistry::default_seed(),
        generator,
        dispatcher,
        cfg,
    );

    let today = Utc::now().date_naive();
    let outcome = scheduler.run_generation(today, Utc::now()).await?;
    println!("generation: {}", serde_json::to_string(&outcome)?);

    lifecycle::publish(&*store, today, Utc::now()).await?;
    if let Some(brief) = store.brief(today).await? {
        println!("{}", serde_json::to_string_pretty(&brief)?);
    }

    // Pretend it is 08:00 UTC so the subscriber is due.
    let send_time = today
        .and_hms_opt(8, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or_else(Utc::now);
    let report = scheduler.dispatcher().run_hourly(send_time).await?;
    println!("dispatch: {}", serde_json::to_string(&report)?);
    println!("emails logged: {}", transport.sent());
    Ok(())
}
